use std::path::{Path, PathBuf};

use tracing::{error, info};

use crate::config::PatchOptions;
use crate::error::Result;
use crate::image::DiscImage;
use crate::integrity;
use crate::layout::{self, LayoutPlan};
use crate::progress::ProgressFn;
use crate::resolver;
use crate::writer;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchRequest {
    pub source: PathBuf,
    pub mod_root: PathBuf,
    pub output: PathBuf,
    pub options: PatchOptions,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchSummary {
    pub output: PathBuf,
    pub patched: usize,
    pub relocated: usize,
    pub output_len: u64,
    pub output_md5: Option<String>,
}

/// Default output path: `<stem>-patched.<ext>` beside the source image.
#[must_use]
pub fn default_output_path(source: &Path) -> PathBuf {
    let stem = source
        .file_stem()
        .map_or_else(|| "image".into(), |s| s.to_string_lossy().into_owned());
    let name = match source.extension() {
        Some(ext) => format!("{stem}-patched.{}", ext.to_string_lossy()),
        None => format!("{stem}-patched"),
    };
    source.with_file_name(name)
}

/// Opens the source, checks its digest and plans the layout without writing.
///
/// # Errors
/// The first failing stage's error.
pub fn prepare(request: &PatchRequest) -> Result<(DiscImage, LayoutPlan)> {
    let image = DiscImage::open(&request.source)?;
    integrity::verify_source(&image, &request.options.hash_check())?;
    let patches = resolver::resolve(&image, &request.mod_root)?;
    let plan = layout::plan(&image, &patches)?;
    info!(
        in_place = plan.diagnostics.in_place,
        relocated = plan.diagnostics.relocated,
        size = plan.output_len,
        "planned layout"
    );
    Ok((image, plan))
}

/// Runs one complete patch: read, resolve, plan, write, hash, commit.
///
/// # Errors
/// Fails fast with the stage's error; the destination is only replaced once
/// every stage has succeeded.
pub fn run(request: &PatchRequest, progress: &mut ProgressFn<'_>) -> Result<PatchSummary> {
    let result = run_stages(request, progress);
    if let Err(err) = &result {
        error!(class = err.class(), "patch failed: {err}");
    }
    result
}

fn run_stages(request: &PatchRequest, progress: &mut ProgressFn<'_>) -> Result<PatchSummary> {
    let (image, plan) = prepare(request)?;
    let staged = writer::stage(
        &image,
        &plan,
        &request.output,
        request.options.overwrite,
        progress,
    )?;
    let report = integrity::finalize(staged.path(), &request.options.hash_check())?;
    let output = staged.commit()?;

    Ok(PatchSummary {
        output,
        patched: plan.placements.len(),
        relocated: plan.diagnostics.relocated,
        output_len: plan.output_len,
        output_md5: report.map(|r| r.output_md5),
    })
}
