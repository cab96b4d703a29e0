use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::format::FormatError;
use crate::integrity::IntegrityError;
use crate::layout::LayoutError;
use crate::resolver::ResolutionError;

/// Terminal error of one patch run. Every stage fails fast into exactly one
/// of these classes.
#[derive(Debug, Error)]
pub enum PatchError {
    #[error(transparent)]
    Format(#[from] FormatError),
    #[error(transparent)]
    Resolution(#[from] ResolutionError),
    #[error(transparent)]
    Layout(#[from] LayoutError),
    #[error("{action} {}: {source}", .path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Integrity(#[from] IntegrityError),
}

impl PatchError {
    pub(crate) fn io(action: &'static str, path: impl Into<PathBuf>) -> impl FnOnce(io::Error) -> Self {
        let path = path.into();
        move |source| Self::Io {
            action,
            path,
            source,
        }
    }

    /// Short class name used in logs and by the CLI exit message.
    #[must_use]
    pub fn class(&self) -> &'static str {
        match self {
            Self::Format(_) => "format error",
            Self::Resolution(_) => "resolution error",
            Self::Layout(_) => "layout error",
            Self::Io { .. } => "i/o error",
            Self::Integrity(_) => "integrity error",
        }
    }
}

pub type Result<T, E = PatchError> = std::result::Result<T, E>;
