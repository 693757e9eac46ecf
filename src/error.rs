use std::io;
use std::path::PathBuf;

use crate::types::PixelFormat;

/// Backend-specific error details.
///
/// Where the media backend reports native error values (`ffmpeg_next::Error`
/// with the `ffmpeg` feature) the original value is preserved.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum BackendError {
    #[error("{0}")]
    Message(String),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[cfg(feature = "ffmpeg")]
    #[error("ffmpeg: {0}")]
    Ffmpeg(#[from] ffmpeg_next::Error),
}

impl BackendError {
    pub fn message(msg: impl Into<String>) -> Self {
        Self::Message(msg.into())
    }
}

/// Top-level crate error.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    #[error("unsupported pixel format {0:?}")]
    UnsupportedFormat(PixelFormat),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("plane {plane} holds {len} bytes, {needed} required")]
    PlaneTooSmall {
        plane: usize,
        needed: usize,
        len: usize,
    },
    #[error("no video track found")]
    NoTrackFound,
    #[error("failed to open video source: {0}")]
    SourceOpen(#[source] BackendError),
    #[error("decoder failure: {0}")]
    Decoder(#[source] BackendError),
    #[error("failed writing frame to {}: {source}", path.display())]
    StorageWrite {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed reading frame from {}: {source}", path.display())]
    StorageRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl Error {
    pub(crate) fn decoder(msg: impl Into<String>) -> Self {
        Self::Decoder(BackendError::message(msg))
    }

    pub(crate) fn source_open(msg: impl Into<String>) -> Self {
        Self::SourceOpen(BackendError::message(msg))
    }
}
