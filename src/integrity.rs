use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use md5::{Digest, Md5};
use thiserror::Error;
use tracing::{debug, info};

use crate::image::DiscImage;
use crate::stream::RegionChunks;

#[derive(Debug, Error)]
pub enum IntegrityError {
    #[error("{subject} md5 mismatch: expected {expected}, got {actual}")]
    HashMismatch {
        subject: String,
        expected: String,
        actual: String,
    },
    #[error("failed to hash {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Hash expectations for one patch run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HashCheck {
    /// Bypasses every digest computation when set.
    pub skip: bool,
    pub expected_source_md5: Option<String>,
    pub expected_output_md5: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegrityReport {
    pub output_md5: String,
}

/// Lowercase hex MD5 of a whole file, streamed in bounded chunks.
///
/// # Errors
/// `IntegrityError::Io` when the file cannot be read.
pub fn md5_file(path: &Path) -> Result<String, IntegrityError> {
    let wrap = |source| IntegrityError::Io {
        path: path.to_path_buf(),
        source,
    };
    let file = File::open(path).map_err(wrap)?;
    let len = file.metadata().map_err(wrap)?.len();
    let mut hasher = Md5::new();
    for chunk in RegionChunks::new(file, 0, len) {
        hasher.update(chunk.map_err(wrap)?);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Compares the source image against the expected digest, if any, before
/// anything is written.
///
/// # Errors
/// `IntegrityError::HashMismatch` when the digests differ.
pub fn verify_source(image: &DiscImage, check: &HashCheck) -> Result<(), IntegrityError> {
    if check.skip {
        return Ok(());
    }
    let Some(expected) = &check.expected_source_md5 else {
        return Ok(());
    };
    let actual = md5_file(image.path())?;
    compare("source image", expected, actual)?;
    info!("source image md5 matches");
    Ok(())
}

/// Hashes a freshly written image and checks it against the expected output
/// digest. Returns `None` when hashing is skipped. Running it twice on the
/// same file gives the same report.
///
/// # Errors
/// `IntegrityError::HashMismatch` when an expected output digest differs.
pub fn finalize(path: &Path, check: &HashCheck) -> Result<Option<IntegrityReport>, IntegrityError> {
    if check.skip {
        debug!("skipping output hash");
        return Ok(None);
    }
    let actual = md5_file(path)?;
    let output_md5 = match &check.expected_output_md5 {
        Some(expected) => compare("output image", expected, actual)?,
        None => actual,
    };
    info!(md5 = %output_md5, "hashed output image");
    Ok(Some(IntegrityReport { output_md5 }))
}

fn compare(subject: &str, expected: &str, actual: String) -> Result<String, IntegrityError> {
    if expected.trim().eq_ignore_ascii_case(&actual) {
        Ok(actual)
    } else {
        Err(IntegrityError::HashMismatch {
            subject: subject.to_string(),
            expected: expected.trim().to_ascii_lowercase(),
            actual,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::{finalize, md5_file, HashCheck, IntegrityError};

    fn scratch(bytes: &[u8]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        file.write_all(bytes).expect("write");
        file
    }

    #[test]
    fn hashes_known_content() {
        let file = scratch(b"abc");
        assert_eq!(
            md5_file(file.path()).expect("hash"),
            "900150983cd24fb0d6963f7d28e17f72"
        );
    }

    #[test]
    fn skipped_check_reports_nothing() {
        let file = scratch(b"abc");
        let check = HashCheck {
            skip: true,
            expected_output_md5: Some("00".to_string()),
            ..HashCheck::default()
        };
        assert!(finalize(file.path(), &check).expect("skip").is_none());
    }

    #[test]
    fn expected_digest_is_compared_case_insensitively() {
        let file = scratch(b"abc");
        let check = HashCheck {
            expected_output_md5: Some("900150983CD24FB0D6963F7D28E17F72".to_string()),
            ..HashCheck::default()
        };
        let report = finalize(file.path(), &check).expect("match").expect("report");
        assert_eq!(report.output_md5, "900150983cd24fb0d6963f7d28e17f72");
        // idempotent
        let again = finalize(file.path(), &check).expect("match").expect("report");
        assert_eq!(again, report);
    }

    #[test]
    fn mismatch_names_both_digests() {
        let file = scratch(b"abc");
        let check = HashCheck {
            expected_output_md5: Some("d41d8cd98f00b204e9800998ecf8427e".to_string()),
            ..HashCheck::default()
        };
        let err = finalize(file.path(), &check).expect_err("mismatch");
        assert!(matches!(err, IntegrityError::HashMismatch { .. }));
        let text = err.to_string();
        assert!(text.contains("d41d8cd98f00b204e9800998ecf8427e"), "{text}");
        assert!(text.contains("900150983cd24fb0d6963f7d28e17f72"), "{text}");
    }
}
