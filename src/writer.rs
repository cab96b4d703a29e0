use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::error::{PatchError, Result};
use crate::image::{DiscImage, SystemFile};
use crate::layout::LayoutPlan;
use crate::progress::{Progress, ProgressFn};
use crate::resolver::ModFile;
use crate::stream::{write_zeros, RegionChunks, CHUNK_SIZE};

/// A fully written image that has not replaced its destination yet.
///
/// Dropping it deletes the temporary file, leaving the destination as it
/// was.
#[derive(Debug)]
pub struct WrittenImage {
    temp: NamedTempFile,
    destination: PathBuf,
    overwrite: bool,
    len: u64,
}

impl WrittenImage {
    /// Location of the staged bytes, valid until commit or drop.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.temp.path()
    }

    #[must_use]
    pub fn destination(&self) -> &Path {
        &self.destination
    }

    #[must_use]
    pub fn len(&self) -> u64 {
        self.len
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Atomically moves the staged image onto its destination.
    ///
    /// # Errors
    /// `PatchError::Io` when the rename fails, or when the destination
    /// appeared in the meantime and overwriting is off.
    pub fn commit(self) -> Result<PathBuf> {
        let Self {
            temp,
            destination,
            overwrite,
            len,
        } = self;
        let persisted = if overwrite {
            temp.persist(&destination)
        } else {
            temp.persist_noclobber(&destination)
        };
        persisted.map_err(|err| PatchError::Io {
            action: "failed to move patched image to",
            path: destination.clone(),
            source: err.error,
        })?;
        info!(size = len, "wrote {}", destination.display());
        Ok(destination)
    }
}

enum Payload<'a> {
    Bytes(Vec<u8>),
    File(&'a ModFile),
}

/// A region of the output that does not come from the source image.
struct Segment<'a> {
    offset: u64,
    /// Bytes covered in the output; the payload is zero-padded up to this.
    length: u64,
    payload: Payload<'a>,
    label: String,
}

/// Writes the patched image into a temporary file beside `output`.
///
/// # Errors
/// `PatchError::Io` when `output` exists and `overwrite` is off, or on any
/// read/write failure. No partial output is left behind.
pub fn stage(
    image: &DiscImage,
    plan: &LayoutPlan,
    output: &Path,
    overwrite: bool,
    progress: &mut ProgressFn<'_>,
) -> Result<WrittenImage> {
    if !overwrite && output.exists() {
        return Err(PatchError::Io {
            action: "refusing to overwrite",
            path: output.to_path_buf(),
            source: io::Error::from(io::ErrorKind::AlreadyExists),
        });
    }
    let dir = match output.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut temp = tempfile::Builder::new()
        .prefix(".gcpatch-")
        .suffix(".tmp")
        .tempfile_in(dir)
        .map_err(PatchError::io("failed to create temporary file in", dir))?;
    debug!("staging output in {}", temp.path().display());

    let segments = build_segments(image, plan);
    {
        let mut sink = Sink {
            out: BufWriter::with_capacity(CHUNK_SIZE, temp.as_file_mut()),
            written: 0,
            total: plan.output_len,
            progress,
            destination: output,
        };
        for segment in &segments {
            sink.copy_original(image, segment.offset)?;
            if segment.offset < sink.written {
                return Err(PatchError::Io {
                    action: "overlapping output regions while writing",
                    path: output.to_path_buf(),
                    source: io::Error::new(io::ErrorKind::InvalidInput, segment.label.clone()),
                });
            }
            sink.write_segment(segment)?;
        }
        sink.copy_original(image, plan.output_len)?;
        sink.out
            .flush()
            .map_err(PatchError::io("failed to write", output))?;
    }
    temp.as_file()
        .sync_all()
        .map_err(PatchError::io("failed to sync", output))?;

    Ok(WrittenImage {
        temp,
        destination: output.to_path_buf(),
        overwrite,
        len: plan.output_len,
    })
}

/// [`stage`] followed by [`WrittenImage::commit`].
///
/// # Errors
/// See both.
pub fn write(
    image: &DiscImage,
    plan: &LayoutPlan,
    output: &Path,
    overwrite: bool,
    progress: &mut ProgressFn<'_>,
) -> Result<PathBuf> {
    stage(image, plan, output, overwrite, progress)?.commit()
}

fn build_segments<'a>(image: &DiscImage, plan: &'a LayoutPlan) -> Vec<Segment<'a>> {
    let mut segments = Vec::with_capacity(plan.placements.len() + 2);

    let header = image.header();
    if plan.dol_offset != header.dol_offset {
        let mut rebuilt = header.clone();
        rebuilt.dol_offset = plan.dol_offset;
        let bytes = rebuilt.to_bytes();
        segments.push(Segment {
            offset: 0,
            length: bytes.len() as u64,
            payload: Payload::Bytes(bytes),
            label: SystemFile::Header.mod_path(),
        });
    }

    let overrides = plan.table_overrides();
    if !overrides.is_empty() {
        let fst = image.system_extent(SystemFile::Fst);
        let bytes = image.tree().to_bytes(&overrides);
        segments.push(Segment {
            offset: fst.offset,
            length: bytes.len() as u64,
            payload: Payload::Bytes(bytes),
            label: SystemFile::Fst.mod_path(),
        });
    }

    // an empty slot has nothing to write and may sit inside another file's range
    for placement in plan.placements.iter().filter(|p| p.slot_length > 0) {
        segments.push(Segment {
            offset: placement.offset,
            length: placement.slot_length,
            payload: Payload::File(&placement.file),
            label: placement.file.relative_path.clone(),
        });
    }
    segments.sort_by_key(|s| s.offset);
    segments
}

struct Sink<'p, 'f, W: Write> {
    out: W,
    written: u64,
    total: u64,
    progress: &'p mut ProgressFn<'f>,
    destination: &'p Path,
}

impl<W: Write> Sink<'_, '_, W> {
    fn report(&mut self, what: &str) {
        (self.progress)(&Progress::new(self.written, self.total, what));
    }

    fn put(&mut self, bytes: &[u8]) -> Result<()> {
        self.out
            .write_all(bytes)
            .map_err(PatchError::io("failed to write", self.destination))?;
        self.written += bytes.len() as u64;
        Ok(())
    }

    fn zeros(&mut self, count: u64) -> Result<()> {
        write_zeros(&mut self.out, count).map_err(PatchError::io("failed to write", self.destination))?;
        self.written += count;
        Ok(())
    }

    /// Copies source bytes up to `until`; positions past the end of the
    /// source are zero-filled.
    fn copy_original(&mut self, image: &DiscImage, until: u64) -> Result<()> {
        if until <= self.written {
            return Ok(());
        }
        let copy_end = until.min(image.len());
        if copy_end > self.written {
            let chunks = image
                .region_chunks(self.written, copy_end - self.written)
                .map_err(PatchError::io("failed to read", image.path()))?;
            for chunk in chunks {
                let chunk = chunk.map_err(PatchError::io("failed to read", image.path()))?;
                self.put(&chunk)?;
                self.report("copying original data");
            }
        }
        if until > self.written {
            self.zeros(until - self.written)?;
            self.report("padding");
        }
        Ok(())
    }

    fn write_segment(&mut self, segment: &Segment<'_>) -> Result<()> {
        let payload_len = match &segment.payload {
            Payload::Bytes(bytes) => {
                self.put(bytes)?;
                bytes.len() as u64
            }
            Payload::File(file) => {
                let chunks = RegionChunks::open_exact(&file.host_path, file.length)
                    .map_err(PatchError::io("failed to read mod file", &file.host_path))?
                    .take_len(file.payload_len);
                for chunk in chunks {
                    let chunk =
                        chunk.map_err(PatchError::io("failed to read mod file", &file.host_path))?;
                    self.put(&chunk)?;
                    self.report(&segment.label);
                }
                file.payload_len
            }
        };
        if segment.length > payload_len {
            self.zeros(segment.length - payload_len)?;
        }
        self.report(&segment.label);
        Ok(())
    }
}
