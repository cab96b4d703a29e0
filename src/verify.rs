use std::path::Path;

use crate::error::Result;
use crate::image::{DiscImage, Extent, SystemFile};

/// Summary of a re-parsed image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyReport {
    pub title: String,
    pub entries: usize,
    pub files: usize,
    pub len: u64,
    /// End of the last byte referenced by the header or the table.
    pub data_end: u64,
}

/// Re-opens an image with the full set of structural checks.
///
/// # Errors
/// Any error [`DiscImage::open`] reports.
pub fn verify_image(path: &Path) -> Result<VerifyReport> {
    let image = DiscImage::open(path)?;
    Ok(VerifyReport {
        title: image.game_title(),
        entries: image.tree().len(),
        files: image.tree().files().count(),
        len: image.len(),
        data_end: image.occupied_end(),
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryChange {
    /// A file whose offset or length differs between the two images.
    File {
        path: String,
        before: Extent,
        after: Extent,
    },
    Dol { before: Extent, after: Extent },
    /// Paths present on one side only, or entries whose kind differs.
    Structure { path: String },
}

impl EntryChange {
    #[must_use]
    pub fn path(&self) -> String {
        match self {
            Self::File { path, .. } | Self::Structure { path } => path.clone(),
            Self::Dol { .. } => SystemFile::Dol.mod_path(),
        }
    }

    #[must_use]
    pub fn moved(&self) -> bool {
        match self {
            Self::File { before, after, .. } | Self::Dol { before, after } => {
                before.offset != after.offset
            }
            Self::Structure { .. } => false,
        }
    }

    #[must_use]
    pub fn resized(&self) -> bool {
        match self {
            Self::File { before, after, .. } | Self::Dol { before, after } => {
                before.length != after.length
            }
            Self::Structure { .. } => false,
        }
    }
}

/// Lists per-file placement differences between two images, in table order
/// of `before`. Payload bytes are not compared.
#[must_use]
pub fn diff_trees(before: &DiscImage, after: &DiscImage) -> Vec<EntryChange> {
    let mut changes = Vec::new();

    let dol_before = before.system_extent(SystemFile::Dol);
    let dol_after = after.system_extent(SystemFile::Dol);
    if dol_before != dol_after {
        changes.push(EntryChange::Dol {
            before: dol_before,
            after: dol_after,
        });
    }

    let old = before.tree();
    let new = after.tree();
    for index in 1..old.len().max(new.len()) {
        let (Some(a), Some(b)) = (old.entry(index), new.entry(index)) else {
            let path = if index < old.len() { old.path_of(index) } else { new.path_of(index) };
            changes.push(EntryChange::Structure { path });
            continue;
        };
        if a.name != b.name || a.parent != b.parent || a.is_dir() != b.is_dir() {
            changes.push(EntryChange::Structure {
                path: old.path_of(index),
            });
            continue;
        }
        if let (Some(x), Some(y)) = (before.file_extent(index), after.file_extent(index)) {
            if x != y {
                changes.push(EntryChange::File {
                    path: old.path_of(index),
                    before: x,
                    after: y,
                });
            }
        }
    }
    changes
}
