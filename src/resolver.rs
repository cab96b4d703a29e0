use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::error::{PatchError, Result};
use crate::format::dol::{DolHeader, DOL_HEADER_SIZE};
use crate::format::fst::{FileSystemTree, LookupError};
use crate::format::{apploader_size, APPLOADER_HEADER_SIZE};
use crate::image::{DiscImage, SystemFile, SYSTEM_DIR};

#[derive(Debug, Error)]
pub enum ResolutionError {
    #[error("mod file '{path}' has no matching file in the disc image")]
    PathNotFound { path: String },
    #[error("mod file '{path}' resolves ambiguously ({reason})")]
    AmbiguousPath { path: String, reason: String },
    #[error("mod file '{path}' names a directory in the disc image")]
    TargetIsDirectory { path: String },
    #[error("mod file '{path}' is not a usable system file: {reason}")]
    InvalidSystemFile { path: String, reason: String },
    #[error("mod file path {} is not valid UTF-8", .path.display())]
    NonUtf8Path { path: PathBuf },
    #[error("failed to walk mod root {}: {source}", .path.display())]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },
}

/// Where a replacement goes: an FST file entry or a region outside the FST.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Target {
    Entry(usize),
    System(SystemFile),
}

impl Target {
    #[must_use]
    pub fn describe(self, tree: &FileSystemTree) -> String {
        match self {
            Self::Entry(index) => tree.path_of(index),
            Self::System(sf) => sf.mod_path(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModFile {
    /// Path relative to the mod root, `/`-separated.
    pub relative_path: String,
    pub host_path: PathBuf,
    /// Size of the host file.
    pub length: u64,
    /// Bytes placed on disc. The whole file, except for the boot DOL and the
    /// apploader, whose headers declare their size.
    pub payload_len: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchEntry {
    pub target: Target,
    pub file: ModFile,
}

/// Enumerates `mod_root` and maps every regular file onto the image.
///
/// # Errors
/// `PatchError::Resolution` when a mod file has no unique target,
/// `PatchError::Io` when the mod root cannot be walked.
pub fn resolve(image: &DiscImage, mod_root: &Path) -> Result<Vec<PatchEntry>> {
    let files = collect_mod_files(mod_root)?;
    let mut patches = resolve_files(image.tree(), files)?;
    for patch in &mut patches {
        if let Target::System(sf) = patch.target {
            patch.file.payload_len = system_payload_len(sf, &patch.file)?;
        }
    }
    info!(
        mods = patches.len(),
        "resolved mod root {}",
        mod_root.display()
    );
    Ok(patches)
}

/// Lists regular files below `mod_root`, sorted by their relative path so the
/// result does not depend on the host's directory order.
///
/// # Errors
/// `PatchError::Io` when the root is missing or is not a directory,
/// `ResolutionError::Walk` when traversal fails part way.
pub fn collect_mod_files(mod_root: &Path) -> Result<Vec<ModFile>> {
    let meta =
        std::fs::metadata(mod_root).map_err(PatchError::io("failed to read mod root", mod_root))?;
    if !meta.is_dir() {
        return Err(PatchError::Io {
            action: "mod root is not a directory",
            path: mod_root.to_path_buf(),
            source: std::io::Error::from(std::io::ErrorKind::InvalidInput),
        });
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(mod_root).follow_links(false) {
        let entry = entry.map_err(|source| ResolutionError::Walk {
            path: source.path().unwrap_or(mod_root).to_path_buf(),
            source,
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(mod_root)
            .unwrap_or(entry.path());
        let mut parts = Vec::new();
        for component in relative.components() {
            let Some(part) = component.as_os_str().to_str() else {
                return Err(ResolutionError::NonUtf8Path {
                    path: entry.path().to_path_buf(),
                }
                .into());
            };
            parts.push(part);
        }
        let length = entry
            .metadata()
            .map_err(|source| ResolutionError::Walk {
                path: entry.path().to_path_buf(),
                source,
            })?
            .len();
        files.push(ModFile {
            relative_path: parts.join("/"),
            host_path: entry.path().to_path_buf(),
            length,
            payload_len: length,
        });
    }
    files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    Ok(files)
}

/// Pairs every mod file with its target. Paths compare byte for byte, so
/// distinct mod files never share a target.
///
/// # Errors
/// The first file without a unique target aborts resolution.
pub fn resolve_files(
    tree: &FileSystemTree,
    files: Vec<ModFile>,
) -> Result<Vec<PatchEntry>, ResolutionError> {
    let mut out = Vec::with_capacity(files.len());
    for file in files {
        let target = resolve_target(tree, &file.relative_path)?;
        debug!(
            "{} -> {} ({} bytes)",
            file.relative_path,
            target.describe(tree),
            file.length
        );
        out.push(PatchEntry { target, file });
    }
    Ok(out)
}

fn resolve_target(tree: &FileSystemTree, relative_path: &str) -> Result<Target, ResolutionError> {
    if let Some((head, rest)) = relative_path.split_once('/') {
        if head == SYSTEM_DIR {
            return SystemFile::from_mod_name(rest)
                .map(Target::System)
                .ok_or_else(|| ResolutionError::PathNotFound {
                    path: relative_path.to_string(),
                });
        }
    }

    match tree.lookup(relative_path) {
        Ok(index) if tree.entries()[index].is_dir() => Err(ResolutionError::TargetIsDirectory {
            path: relative_path.to_string(),
        }),
        Ok(index) => Ok(Target::Entry(index)),
        Err(LookupError::NotFound) => Err(ResolutionError::PathNotFound {
            path: relative_path.to_string(),
        }),
        Err(LookupError::Ambiguous) => Err(ResolutionError::AmbiguousPath {
            path: relative_path.to_string(),
            reason: "its directory holds that name more than once".to_string(),
        }),
    }
}

/// Payload size of a system file replacement, taken from its own header
/// where the format has one.
fn system_payload_len(sf: SystemFile, file: &ModFile) -> Result<u64> {
    let invalid = |reason: String| ResolutionError::InvalidSystemFile {
        path: file.relative_path.clone(),
        reason,
    };
    let declared = match sf {
        SystemFile::Dol => {
            let head = read_head(file, DOL_HEADER_SIZE)?;
            DolHeader::parse(&head, 0)
                .map_err(|err| invalid(err.to_string()))?
                .total_length()
        }
        SystemFile::Apploader => {
            let head = read_head(file, APPLOADER_HEADER_SIZE)?;
            apploader_size(&head, 0).map_err(|err| invalid(err.to_string()))?
        }
        SystemFile::Header | SystemFile::Bi2 | SystemFile::Fst => return Ok(file.length),
    };
    if declared > file.length {
        return Err(invalid(format!(
            "header declares {declared:#x} bytes, file has {:#x}",
            file.length
        ))
        .into());
    }
    Ok(declared)
}

fn read_head(file: &ModFile, size: u64) -> Result<Vec<u8>> {
    if file.length < size {
        return Err(ResolutionError::InvalidSystemFile {
            path: file.relative_path.clone(),
            reason: format!("shorter than its {size:#x}-byte header"),
        }
        .into());
    }
    let mut head = vec![0u8; size as usize];
    File::open(&file.host_path)
        .and_then(|mut f| f.read_exact(&mut head))
        .map_err(PatchError::io("failed to read mod file", &file.host_path))?;
    Ok(head)
}
