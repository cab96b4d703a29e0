use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

/// Upper bound for any single buffer held while copying payloads.
pub const CHUNK_SIZE: usize = 1 << 20;

/// A finite, non-restartable sequence of byte chunks covering one region of a
/// file. Every chunk is read on demand, so memory stays bounded by
/// `CHUNK_SIZE` regardless of the region length.
#[derive(Debug)]
pub struct RegionChunks {
    file: File,
    pos: u64,
    end: u64,
    chunk_size: usize,
}

impl RegionChunks {
    #[must_use]
    pub fn new(file: File, offset: u64, length: u64) -> Self {
        Self {
            file,
            pos: offset,
            end: offset.saturating_add(length),
            chunk_size: CHUNK_SIZE,
        }
    }

    /// Streams a whole file whose length was recorded earlier; a file that has
    /// grown or shrunk since is rejected instead of being silently truncated.
    ///
    /// # Errors
    /// Propagates open/stat failures, and `InvalidData` on a length change.
    pub fn open_exact(path: &Path, expected_len: u64) -> io::Result<Self> {
        let file = File::open(path)?;
        let actual = file.metadata()?.len();
        if actual != expected_len {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "{} changed size since it was scanned ({expected_len} -> {actual} bytes)",
                    path.display()
                ),
            ));
        }
        Ok(Self::new(file, 0, expected_len))
    }

    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Stops after at most `length` more bytes.
    #[must_use]
    pub fn take_len(mut self, length: u64) -> Self {
        self.end = self.end.min(self.pos.saturating_add(length));
        self
    }

    #[must_use]
    pub fn remaining(&self) -> u64 {
        self.end.saturating_sub(self.pos)
    }

    /// Drains the remaining chunks into `out`, returning the byte count.
    ///
    /// # Errors
    /// Propagates the first read or write failure.
    pub fn copy_to<W: Write>(self, out: &mut W) -> io::Result<u64> {
        let mut written = 0u64;
        for chunk in self {
            let chunk = chunk?;
            out.write_all(&chunk)?;
            written += chunk.len() as u64;
        }
        Ok(written)
    }
}

impl Iterator for RegionChunks {
    type Item = io::Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        let left = self.remaining();
        if left == 0 {
            return None;
        }
        let size = usize::try_from(left).map_or(self.chunk_size, |l| l.min(self.chunk_size));
        let mut buf = vec![0u8; size];
        let read = self
            .file
            .seek(SeekFrom::Start(self.pos))
            .and_then(|_| self.file.read_exact(&mut buf));
        match read {
            Ok(()) => {
                self.pos += size as u64;
                Some(Ok(buf))
            }
            Err(err) => {
                // a failed region is not resumable
                self.pos = self.end;
                Some(Err(err))
            }
        }
    }
}

/// Writes `count` zero bytes in bounded blocks.
///
/// # Errors
/// Propagates write failures.
pub fn write_zeros<W: Write>(out: &mut W, count: u64) -> io::Result<()> {
    const BLOCK: [u8; 0x8000] = [0u8; 0x8000];
    let mut left = count;
    while left > 0 {
        let n = left.min(BLOCK.len() as u64) as usize;
        out.write_all(&BLOCK[..n])?;
        left -= n as u64;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::{write_zeros, RegionChunks};

    fn scratch(bytes: &[u8]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        file.write_all(bytes).expect("write");
        file.flush().expect("flush");
        file
    }

    #[test]
    fn yields_bounded_chunks_for_region() {
        let data = (0u8..=99).collect::<Vec<_>>();
        let file = scratch(&data);
        let chunks = RegionChunks::new(file.reopen().expect("reopen"), 10, 25).with_chunk_size(10);
        let chunks = chunks.collect::<Result<Vec<_>, _>>().expect("read");
        assert_eq!(chunks.iter().map(Vec::len).collect::<Vec<_>>(), vec![10, 10, 5]);
        assert_eq!(chunks.concat(), data[10..35].to_vec());
    }

    #[test]
    fn stops_after_read_error() {
        let file = scratch(&[1, 2, 3]);
        let mut chunks = RegionChunks::new(file.reopen().expect("reopen"), 0, 8);
        assert!(chunks.next().expect("item").is_err());
        assert!(chunks.next().is_none());
    }

    #[test]
    fn rejects_file_that_changed_size() {
        let file = scratch(&[0u8; 16]);
        let err = RegionChunks::open_exact(file.path(), 12).expect_err("must fail");
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
    }

    #[test]
    fn copies_whole_file() {
        let file = scratch(b"replacement");
        let mut out = Vec::new();
        let n = RegionChunks::open_exact(file.path(), 11)
            .expect("open")
            .copy_to(&mut out)
            .expect("copy");
        assert_eq!(n, 11);
        assert_eq!(out, b"replacement");
    }

    #[test]
    fn streams_only_the_leading_bytes() {
        let file = scratch(b"payload....");
        let mut out = Vec::new();
        let n = RegionChunks::open_exact(file.path(), 11)
            .expect("open")
            .take_len(7)
            .copy_to(&mut out)
            .expect("copy");
        assert_eq!(n, 7);
        assert_eq!(out, b"payload");
    }

    #[test]
    fn writes_zero_padding() {
        let mut out = Vec::new();
        write_zeros(&mut out, 0x8001).expect("zeros");
        assert_eq!(out.len(), 0x8001);
        assert!(out.iter().all(|&b| b == 0));
    }
}
