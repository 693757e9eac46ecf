//! Turning a whole video file into a numbered sequence of packed frames.

use core::time::Duration;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;

use crate::decoder::{MediaBackend, VideoDecoder};
use crate::driver::{DEFAULT_TIMEOUT, DecodeSession, StopHandle};
use crate::error::{BackendError, Error};
use crate::extract::extract;
use crate::frame::Frame;
use crate::jpeg::{self, DEFAULT_QUALITY};
use crate::source::VideoSource;
use crate::types::{OutputFormat, Size};

/// Aggregate state of one materialization run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DecodeStatus {
    NotStarted = 0,
    Decoding = 1,
    /// Output exhausted or stopped; every stored frame has been announced.
    Finished = 2,
    /// The source could not be opened or the decoder failed mid-stream.
    Failed = 3,
}

impl DecodeStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => DecodeStatus::Decoding,
            2 => DecodeStatus::Finished,
            3 => DecodeStatus::Failed,
            _ => DecodeStatus::NotStarted,
        }
    }
}

/// Shared, lock-free view of a [`DecodeStatus`].
#[derive(Debug, Clone, Default)]
pub struct StatusHandle(Arc<AtomicU8>);

impl StatusHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> DecodeStatus {
        DecodeStatus::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn is_finished(&self) -> bool {
        self.get() == DecodeStatus::Finished
    }

    fn set(&self, status: DecodeStatus) {
        self.0.store(status as u8, Ordering::Release);
    }

    /// NotStarted -> Decoding. Returns `false` if a run already began.
    fn begin(&self) -> bool {
        self.0
            .compare_exchange(
                DecodeStatus::NotStarted as u8,
                DecodeStatus::Decoding as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }
}

/// Receives materialization events. All methods run on the decode thread.
pub trait MaterializeObserver: Send + Sync {
    /// A frame was persisted at `path`.
    fn on_frame_stored(&self, index: u32, path: &Path) {
        let _ = (index, path);
    }

    /// A frame was decoded. `frame` is only valid for the duration of the call.
    fn on_frame_decoded(&self, index: u32, frame: &dyn Frame) {
        let _ = (index, frame);
    }

    /// Fired exactly once when a run ends without a decoder error.
    fn on_finished(&self) {}

    fn on_failed(&self, error: &Error) {
        let _ = error;
    }
}

/// File name of materialized frame `index` (1-based).
///
/// ```
/// use camera_replay::{OutputFormat, Size, materialize::frame_file_name};
///
/// let size = Size::new(640, 480);
/// assert_eq!(frame_file_name(7, OutputFormat::I420, size), "frame_00007_I420_640x480.yuv");
/// assert_eq!(frame_file_name(7, OutputFormat::Jpeg, size), "frame_00007.jpg");
/// ```
pub fn frame_file_name(index: u32, format: OutputFormat, size: Size) -> String {
    match format {
        OutputFormat::Jpeg => format!("frame_{index:05}.jpg"),
        _ => format!(
            "frame_{index:05}_{}_{}x{}.yuv",
            format.layout(),
            size.width,
            size.height
        ),
    }
}

/// Decodes a video file on a background thread, extracting every frame into
/// the configured layout and, with an output directory, persisting it.
pub struct FrameMaterializer {
    format: OutputFormat,
    output_dir: Option<PathBuf>,
    observers: Vec<Arc<dyn MaterializeObserver>>,
    status: StatusHandle,
    stop: StopHandle,
    timeout: Duration,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl FrameMaterializer {
    pub fn new(format: OutputFormat) -> Self {
        FrameMaterializer {
            format,
            output_dir: None,
            observers: Vec::new(),
            status: StatusHandle::new(),
            stop: StopHandle::new(),
            timeout: DEFAULT_TIMEOUT,
            worker: Mutex::new(None),
        }
    }

    /// Persist frames under `dir`, creating it on start. Without an output
    /// directory frames are only delivered through
    /// [`MaterializeObserver::on_frame_decoded`].
    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    pub fn observer(mut self, observer: Arc<dyn MaterializeObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    pub fn status(&self) -> DecodeStatus {
        self.status.get()
    }

    pub fn status_handle(&self) -> StatusHandle {
        self.status.clone()
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Open `path` and start decoding it on a new thread.
    ///
    /// Returns `Ok(false)` without doing anything if this materializer has
    /// already been started. Errors opening the source or the decoder are
    /// returned here and leave the status at [`DecodeStatus::Failed`].
    pub fn start<B: MediaBackend>(&self, backend: &B, path: &Path) -> Result<bool, Error> {
        if !self.status.begin() {
            log::debug!("materialization of {} already started", path.display());
            return Ok(false);
        }
        match self.spawn(backend, path) {
            Ok(handle) => {
                *self.worker.lock() = Some(handle);
                Ok(true)
            }
            Err(e) => {
                self.status.set(DecodeStatus::Failed);
                for observer in &self.observers {
                    observer.on_failed(&e);
                }
                Err(e)
            }
        }
    }

    fn spawn<B: MediaBackend>(&self, backend: &B, path: &Path) -> Result<JoinHandle<()>, Error> {
        if let Some(dir) = &self.output_dir {
            jpeg::ensure_dir(dir)?;
        }
        let session = DecodeSession::open(backend, path, None)?
            .with_timeout(self.timeout)
            .with_stop_handle(self.stop.clone());
        log::info!(
            "materializing {} as {:?} into {}",
            path.display(),
            self.format,
            self.output_dir
                .as_deref()
                .map_or_else(|| String::from("memory"), |d| d.display().to_string())
        );

        let worker = Worker {
            format: self.format,
            output_dir: self.output_dir.clone(),
            observers: self.observers.clone(),
            status: self.status.clone(),
        };
        thread::Builder::new()
            .name("frame-materializer".into())
            .spawn(move || worker.run(session))
            .map_err(|e| Error::Decoder(BackendError::Io(e)))
    }

    /// Ask the decode thread to stop at its next loop boundary.
    pub fn stop(&self) {
        self.stop.stop();
    }

    /// Wait for the decode thread to exit.
    pub fn join(&self) {
        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                log::error!("frame materializer thread panicked");
                self.status.set(DecodeStatus::Failed);
            }
        }
    }
}

struct Worker {
    format: OutputFormat,
    output_dir: Option<PathBuf>,
    observers: Vec<Arc<dyn MaterializeObserver>>,
    status: StatusHandle,
}

impl Worker {
    fn run<S, D>(self, mut session: DecodeSession<S, D>)
    where
        S: VideoSource,
        D: VideoDecoder,
    {
        let mut index = 0u32;
        let mut stored = 0u32;
        let result = session.run(|frame| {
            index += 1;
            if self.deliver(index, frame) {
                stored += 1;
            }
        });
        drop(session);

        match result {
            Ok(summary) => {
                log::info!(
                    "materialization finished: {} decoded, {stored} stored{}",
                    summary.frames,
                    if summary.cancelled { " (stopped)" } else { "" }
                );
                self.status.set(DecodeStatus::Finished);
                for observer in &self.observers {
                    observer.on_finished();
                }
            }
            Err(e) => {
                self.status.set(DecodeStatus::Failed);
                for observer in &self.observers {
                    observer.on_failed(&e);
                }
            }
        }
    }

    /// Returns whether the frame was persisted.
    fn deliver(&self, index: u32, frame: &dyn Frame) -> bool {
        for observer in &self.observers {
            observer.on_frame_decoded(index, frame);
        }
        let Some(dir) = &self.output_dir else {
            return false;
        };

        let packed = match extract(frame, self.format.layout()) {
            Ok(packed) => packed,
            Err(e) => {
                log::warn!("skipping frame {index}: {e}");
                return false;
            }
        };
        let path = dir.join(frame_file_name(index, self.format, packed.size()));
        let written = match self.format {
            OutputFormat::Jpeg => jpeg::write_nv21(&path, packed.as_bytes(), packed.size(), DEFAULT_QUALITY),
            _ => packed.write_to(&path).map_err(|source| Error::StorageWrite {
                path: path.clone(),
                source,
            }),
        };
        match written {
            Ok(()) => {
                log::debug!("stored frame {index} at {}", path.display());
                for observer in &self.observers {
                    observer.on_frame_stored(index, &path);
                }
                true
            }
            Err(e) => {
                log::warn!("{e}");
                false
            }
        }
    }
}
