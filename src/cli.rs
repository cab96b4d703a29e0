use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;

use crate::config::{PatchConfig, PatchOptions};
use crate::image::DiscImage;
use crate::layout::{LayoutPlan, PlacementKind};
use crate::patcher::{self, PatchRequest};
use crate::progress::Progress;

#[derive(Debug, Parser)]
#[command(name = "gcpatch", version, about = "Replace files inside a GameCube disc image")]
pub struct Args {
    /// Source disc image (.iso/.gcm).
    #[arg(short = 'i', long = "input", value_name = "IMAGE")]
    pub input: PathBuf,

    /// Directory mirroring the disc's file tree.
    #[arg(short = 'm', long = "mods", value_name = "DIR")]
    pub mods: PathBuf,

    #[arg(short = 'o', long = "output", value_name = "IMAGE")]
    pub output: Option<PathBuf>,

    /// TOML patch config with expected hashes and output name.
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[arg(long = "skip-hash", conflicts_with = "verify_hash")]
    pub skip_hash: bool,

    #[arg(long = "verify-hash")]
    pub verify_hash: bool,

    /// Replace the output file if it exists.
    #[arg(long = "force", short = 'f')]
    pub force: bool,

    #[arg(long = "verbose", short = 'v')]
    pub verbose: bool,

    /// Print the planned layout and exit without writing.
    #[arg(long = "dry-run")]
    pub dry_run: bool,
}

impl Args {
    /// Builds the request, letting flags override the config file.
    ///
    /// # Errors
    /// Fails when the config file cannot be loaded.
    pub fn to_request(&self) -> anyhow::Result<PatchRequest> {
        let config = match &self.config {
            Some(path) => PatchConfig::load(path)?,
            None => PatchConfig::default(),
        };
        let mut options = PatchOptions::from_config(&config);
        if self.verify_hash {
            options.skip_hash = false;
        }
        if self.skip_hash {
            options.skip_hash = true;
        }
        options.overwrite = self.force;

        let output = match (&self.output, &config.output_name) {
            (Some(output), _) => output.clone(),
            (None, Some(name)) => self.input.with_file_name(name),
            (None, None) => patcher::default_output_path(&self.input),
        };
        Ok(PatchRequest {
            source: self.input.clone(),
            mod_root: self.mods.clone(),
            output,
            options,
        })
    }
}

pub fn run(args: Args) -> anyhow::Result<()> {
    let request = args.to_request()?;

    if args.dry_run {
        let (image, plan) = patcher::prepare(&request)
            .with_context(|| format!("failed to plan {}", request.source.display()))?;
        println!("{}", image.game_title());
        print_plan(&plan, &image);
        return Ok(());
    }

    let mut last_percent = None;
    let mut report = |p: &Progress| {
        let percent = (p.ratio() * 100.0) as u32;
        if args.verbose && last_percent != Some(percent) && percent % 10 == 0 {
            eprintln!("{percent:>3}% {}", p.description.as_deref().unwrap_or(""));
            last_percent = Some(percent);
        }
    };
    let summary = patcher::run(&request, &mut report)?;

    println!(
        "wrote {} ({} file(s) patched, {} relocated, {:#x} bytes)",
        summary.output.display(),
        summary.patched,
        summary.relocated,
        summary.output_len
    );
    if let Some(md5) = &summary.output_md5 {
        println!("md5 {md5}");
    }
    Ok(())
}

fn print_plan(plan: &LayoutPlan, image: &DiscImage) {
    if plan.is_identity() {
        println!("no files to patch");
    }
    for p in &plan.placements {
        let how = match p.kind {
            PlacementKind::InPlace => "in place",
            PlacementKind::Relocated => "relocated",
        };
        println!(
            "  {:<40} {:#010x}+{:#x} -> {:#010x}+{:#x} ({how})",
            p.target.describe(image.tree()),
            p.source_extent.offset,
            p.source_extent.length,
            p.offset,
            p.length
        );
    }
    println!(
        "output size {:#x} (source {:#x})",
        plan.output_len, plan.original_len
    );
}
