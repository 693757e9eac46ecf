//! Replace a live camera feed with frames decoded from a prerecorded video.
//!
//! Decoding runs through a pluggable [`MediaBackend`]; decoded frames are
//! repacked into I420/NV21, rotated to the preview orientation and served
//! round-robin, or rendered straight into a host-provided [`RenderTarget`].

pub mod backend;
pub mod binding;
pub mod config;
pub mod decoder;
pub mod driver;
pub mod error;
pub mod extract;
pub mod frame;
pub mod jpeg;
pub mod materialize;
pub mod playback;
pub mod preview;
pub mod queue;
pub mod rotate;
pub mod source;
pub mod types;

// Re-exports
pub use config::ReplayConfig;
pub use decoder::*;
pub use driver::{DecodeSession, SessionState, SessionSummary, StopHandle};
pub use error::*;
pub use extract::extract;
pub use frame::*;
pub use materialize::{DecodeStatus, FrameMaterializer, MaterializeObserver, StatusHandle};
pub use playback::{Playback, PlaybackOptions};
pub use preview::PreviewFeed;
pub use queue::{FrameRecord, ReplacementQueue};
pub use rotate::{rotate_nv21, rotate_nv21_by};
pub use source::*;
pub use types::*;
