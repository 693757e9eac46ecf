use core::time::Duration;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::types::{OutputFormat, Rotation};

/// Settings shared by preview serving, playback injection and bindings.
///
/// Every field has a default, so hosts may deserialize a partial document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
    /// Video played into texture targets and materialized for preview frames.
    pub video_path: PathBuf,
    /// Pre-rotated variant decoded into image-reader targets.
    pub rotated_video_path: PathBuf,
    /// Parent of `decode_video_*` and `dump_frame_*` directories.
    pub work_dir: PathBuf,
    pub output_format: OutputFormat,
    pub preview_rotation: Rotation,
    /// JPEG-dump every served preview frame.
    pub dump_preview_frames: bool,
    /// Sleep until each frame's presentation time during playback.
    pub pace_playback: bool,
    pub io_timeout_ms: u64,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        ReplayConfig {
            video_path: PathBuf::from("virtual.mp4"),
            rotated_video_path: PathBuf::from("virtual_rotated.mp4"),
            work_dir: PathBuf::from("."),
            output_format: OutputFormat::Nv21,
            preview_rotation: Rotation::Deg90,
            dump_preview_frames: false,
            pace_playback: true,
            io_timeout_ms: 10,
        }
    }
}

impl ReplayConfig {
    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }
}
