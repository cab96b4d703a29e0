use std::collections::BTreeMap;

use thiserror::Error;
use tracing::{debug, warn};

use crate::format::{align_up, MAX_DISC_SIZE};
use crate::image::{DiscImage, Extent, SystemFile};
use crate::resolver::{ModFile, PatchEntry, Target};

/// Alignment of relocated payloads.
pub const RELOCATION_ALIGN: u64 = 0x8000;
/// Images grown by relocation are padded up to this boundary.
pub const OUTPUT_ALIGN: u64 = 0x20;

#[derive(Debug, Error)]
pub enum LayoutError {
    #[error("cannot patch '{path}': {feature}")]
    Unsupported { path: String, feature: String },
    #[error("patched image needs {required:#x} bytes, a disc holds at most {limit:#x}")]
    ExceedsDiscCapacity { required: u64, limit: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlacementKind {
    InPlace,
    Relocated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placement {
    pub target: Target,
    pub kind: PlacementKind,
    /// Output offset of the replacement payload.
    pub offset: u64,
    pub length: u64,
    /// Bytes reserved at `offset`; anything past `length` is zero-filled.
    pub slot_length: u64,
    pub source_extent: Extent,
    pub file: ModFile,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LayoutDiagnostics {
    pub in_place: usize,
    pub relocated: usize,
    /// Zero bytes written behind shrunk in-place replacements.
    pub zero_filled: u64,
    /// Alignment gaps in front of relocated payloads.
    pub alignment_padding: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayoutPlan {
    /// Ordered by output offset.
    pub placements: Vec<Placement>,
    pub dol_offset: u32,
    pub original_len: u64,
    pub output_len: u64,
    pub relocation_start: u64,
    pub diagnostics: LayoutDiagnostics,
}

impl LayoutPlan {
    /// New `(offset, length)` pairs for the file entries this plan touches.
    #[must_use]
    pub fn table_overrides(&self) -> BTreeMap<usize, (u32, u32)> {
        self.placements
            .iter()
            .filter_map(|p| match p.target {
                // both fields were range checked while planning
                Target::Entry(index) => Some((index, (p.offset as u32, p.length as u32))),
                Target::System(_) => None,
            })
            .collect()
    }

    #[must_use]
    pub fn placement_for(&self, target: Target) -> Option<&Placement> {
        self.placements.iter().find(|p| p.target == target)
    }

    /// True when writing this plan reproduces the source byte for byte.
    #[must_use]
    pub fn is_identity(&self) -> bool {
        self.placements.is_empty()
    }
}

/// Decides where each replacement lands in the output image.
///
/// Replacements that fit their current slot stay there; larger ones move to
/// fresh 32 KiB aligned space behind everything the source image references,
/// in the order given.
///
/// # Errors
/// `LayoutError::Unsupported` for targets that cannot be replaced,
/// `ExceedsDiscCapacity` when the result would not fit on a disc.
pub fn plan(image: &DiscImage, patches: &[PatchEntry]) -> Result<LayoutPlan, LayoutError> {
    let tree = image.tree();
    let relocation_start = image.occupied_end();
    let mut cursor = relocation_start;
    let mut dol_offset = image.header().dol_offset;
    let mut diagnostics = LayoutDiagnostics::default();
    let mut placements = Vec::with_capacity(patches.len());

    for patch in patches {
        let path = patch.target.describe(tree);
        let current = current_extent(image, patch.target, &path)?;
        let length = patch.file.payload_len;

        let (kind, offset) = if length <= current.length {
            (PlacementKind::InPlace, current.offset)
        } else {
            check_relocatable(patch.target, &path, current, length)?;
            let offset = align_up(cursor, RELOCATION_ALIGN);
            diagnostics.alignment_padding += offset - cursor;
            cursor = offset + length;
            if cursor > MAX_DISC_SIZE {
                return Err(LayoutError::ExceedsDiscCapacity {
                    required: cursor,
                    limit: MAX_DISC_SIZE,
                });
            }
            if patch.target == Target::System(SystemFile::Dol) {
                // MAX_DISC_SIZE is below u32::MAX
                dol_offset = offset as u32;
            }
            (PlacementKind::Relocated, offset)
        };

        let slot_length = match kind {
            PlacementKind::InPlace => {
                diagnostics.in_place += 1;
                diagnostics.zero_filled += current.length - length;
                current.length
            }
            PlacementKind::Relocated => {
                diagnostics.relocated += 1;
                length
            }
        };
        debug!(
            "{path}: {kind:?} {:#x}+{:#x} -> {offset:#x}+{length:#x}",
            current.offset, current.length
        );
        placements.push(Placement {
            target: patch.target,
            kind,
            offset,
            length,
            slot_length,
            source_extent: current,
            file: patch.file.clone(),
        });
    }

    let original_len = image.len();
    let output_len = if diagnostics.relocated > 0 {
        original_len.max(align_up(cursor, OUTPUT_ALIGN))
    } else {
        original_len
    };
    if output_len > MAX_DISC_SIZE {
        return Err(LayoutError::ExceedsDiscCapacity {
            required: output_len,
            limit: MAX_DISC_SIZE,
        });
    }
    if output_len > original_len {
        warn!(
            "patched image grows from {original_len:#x} to {output_len:#x} bytes"
        );
    }

    placements.sort_by_key(|p| (p.offset, p.target));
    Ok(LayoutPlan {
        placements,
        dol_offset,
        original_len,
        output_len,
        relocation_start,
        diagnostics,
    })
}

fn current_extent(image: &DiscImage, target: Target, path: &str) -> Result<Extent, LayoutError> {
    let unsupported = |feature: &str| LayoutError::Unsupported {
        path: path.to_string(),
        feature: feature.to_string(),
    };
    match target {
        Target::System(SystemFile::Header) => Err(unsupported(
            "the disc header is rebuilt from the table layout and cannot be replaced",
        )),
        Target::System(SystemFile::Fst) => Err(unsupported(
            "the file system table is regenerated and cannot be replaced",
        )),
        Target::System(sf) => Ok(image.system_extent(sf)),
        Target::Entry(index) => {
            let extent = image
                .file_extent(index)
                .ok_or_else(|| unsupported("target is not a file"))?;
            let aliased = extent.length > 0
                && image.tree().files().any(|(other, offset, length)| {
                    other != index
                        && u64::from(offset) == extent.offset
                        && u64::from(length) == extent.length
                });
            if aliased {
                return Err(unsupported(
                    "its payload is shared with another table entry",
                ));
            }
            Ok(extent)
        }
    }
}

fn check_relocatable(
    target: Target,
    path: &str,
    current: Extent,
    length: u64,
) -> Result<(), LayoutError> {
    let fixed = match target {
        Target::System(SystemFile::Apploader) => "the apploader has a fixed offset",
        Target::System(SystemFile::Bi2) => "bi2.bin has a fixed offset",
        _ => {
            if u32::try_from(length).is_err() {
                return Err(LayoutError::ExceedsDiscCapacity {
                    required: length,
                    limit: MAX_DISC_SIZE,
                });
            }
            return Ok(());
        }
    };
    Err(LayoutError::Unsupported {
        path: path.to_string(),
        feature: format!(
            "{fixed} and the replacement ({length:#x} bytes) exceeds its {:#x}-byte slot",
            current.length
        ),
    })
}
