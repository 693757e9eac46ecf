//! Replacement frames for callback-style preview capture.
//!
//! The camera's own preview bytes are never passed through: a frame is
//! either taken from the replacement video or nothing is delivered.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use uuid::Uuid;

use crate::config::ReplayConfig;
use crate::decoder::MediaBackend;
use crate::error::Error;
use crate::extract::extract;
use crate::frame::PackedFrame;
use crate::jpeg::{self, DEFAULT_QUALITY};
use crate::materialize::{DecodeStatus, FrameMaterializer};
use crate::queue::ReplacementQueue;
use crate::rotate::rotate_nv21_by;
use crate::types::{OutputFormat, PackedLayout, Size};

/// Decodes the replacement video once, then serves its frames in a loop as
/// NV21 buffers sized for the preview.
pub struct PreviewFeed<B: MediaBackend> {
    backend: B,
    config: ReplayConfig,
    materializer: FrameMaterializer,
    queue: Arc<ReplacementQueue>,
    decode_dir: PathBuf,
    dump_dir: Option<PathBuf>,
    dumped: AtomicU32,
}

impl<B: MediaBackend> PreviewFeed<B> {
    pub fn new(backend: B, config: ReplayConfig) -> Result<Self, Error> {
        if config.output_format == OutputFormat::Jpeg {
            return Err(Error::InvalidArgument(
                "preview frames must be materialized as I420 or NV21".into(),
            ));
        }
        let decode_dir = config.work_dir.join(format!("decode_video_{}", Uuid::new_v4()));
        let dump_dir = config
            .dump_preview_frames
            .then(|| config.work_dir.join(format!("dump_frame_{}", Uuid::new_v4())));

        let materializer = FrameMaterializer::new(config.output_format)
            .output_dir(&decode_dir)
            .timeout(config.io_timeout());
        let queue = Arc::new(ReplacementQueue::new(materializer.status_handle()));
        let materializer = materializer.observer(queue.clone());

        Ok(PreviewFeed {
            backend,
            config,
            materializer,
            queue,
            decode_dir,
            dump_dir,
            dumped: AtomicU32::new(0),
        })
    }

    pub fn config(&self) -> &ReplayConfig {
        &self.config
    }

    pub fn decode_dir(&self) -> &Path {
        &self.decode_dir
    }

    pub fn dump_dir(&self) -> Option<&Path> {
        self.dump_dir.as_deref()
    }

    pub fn status(&self) -> DecodeStatus {
        self.materializer.status()
    }

    /// Start materializing the replacement video if that has not happened
    /// yet. Returns whether this call started it.
    pub fn ensure_decoding(&self) -> Result<bool, Error> {
        self.materializer.start(&self.backend, &self.config.video_path)
    }

    /// The next replacement frame for a preview of `preview` size, or `None`
    /// while the video is still being decoded.
    pub fn next_frame(&self, preview: Size) -> Option<Vec<u8>> {
        if let Err(e) = self.ensure_decoding() {
            log::warn!("cannot decode {}: {e}", self.config.video_path.display());
            return None;
        }
        let bytes = self.queue.request_next()?;

        let rotation = self.config.preview_rotation;
        let stored = if rotation.swaps_axes() {
            preview.transposed()
        } else {
            preview
        };
        if bytes.len() != stored.yuv420_len() {
            log::warn!(
                "stored frame of {} bytes does not match a {}x{} preview",
                bytes.len(),
                preview.width,
                preview.height
            );
            return None;
        }

        let nv21 = match self.config.output_format.layout() {
            PackedLayout::Nv21 => bytes,
            PackedLayout::I420 => {
                let packed = PackedFrame::from_parts(PackedLayout::I420, stored, bytes);
                match extract(&packed.as_frame(), PackedLayout::Nv21) {
                    Ok(frame) => frame.into_bytes(),
                    Err(e) => {
                        log::warn!("cannot convert stored frame: {e}");
                        return None;
                    }
                }
            }
        };
        let frame = match rotate_nv21_by(&nv21, stored, rotation) {
            Ok(rotated) => rotated.into_owned(),
            Err(e) => {
                log::warn!("cannot rotate stored frame: {e}");
                return None;
            }
        };

        if let Some(dir) = &self.dump_dir {
            if let Err(e) = self.dump(dir, &frame, preview) {
                log::warn!("{e}");
            }
        }
        Some(frame)
    }

    fn dump(&self, dir: &Path, frame: &[u8], size: Size) -> Result<(), Error> {
        jpeg::ensure_dir(dir)?;
        let n = self.dumped.fetch_add(1, Ordering::Relaxed) + 1;
        jpeg::write_nv21(&dir.join(format!("{n}.jpg")), frame, size, DEFAULT_QUALITY)
    }

    /// Stop decoding and wait for the decode thread.
    pub fn close(&self) {
        self.materializer.stop();
        self.materializer.join();
    }
}

impl<B: MediaBackend> Drop for PreviewFeed<B> {
    fn drop(&mut self) {
        self.close();
    }
}
