//! [`MediaBackend`](crate::decoder::MediaBackend) implementations.

pub mod raw;

#[cfg(feature = "ffmpeg")]
pub mod ffmpeg;
