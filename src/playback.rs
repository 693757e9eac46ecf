//! Continuous video injection into a render target.

use core::time::Duration;
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};

use crate::config::ReplayConfig;
use crate::decoder::{MediaBackend, RenderTarget};
use crate::driver::{DEFAULT_TIMEOUT, DecodeSession, SessionSummary, StopHandle};
use crate::error::{BackendError, Error};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackOptions {
    /// Restart from the first sync sample at end of stream.
    pub looping: bool,
    /// Render at presentation time instead of as fast as frames decode.
    pub pace: bool,
    pub timeout: Duration,
}

impl Default for PlaybackOptions {
    fn default() -> Self {
        PlaybackOptions {
            looping: true,
            pace: true,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl From<&ReplayConfig> for PlaybackOptions {
    fn from(config: &ReplayConfig) -> Self {
        PlaybackOptions {
            looping: true,
            pace: config.pace_playback,
            timeout: config.io_timeout(),
        }
    }
}

/// A video decoding straight into a [`RenderTarget`] on its own thread.
///
/// Dropping a `Playback` stops it and waits for the decoder to be released.
pub struct Playback {
    path: PathBuf,
    stop: StopHandle,
    handle: Option<JoinHandle<Result<SessionSummary, Error>>>,
}

impl Playback {
    /// Open `path` and start rendering it into `target`.
    ///
    /// Opening happens on the calling thread so that a missing file or an
    /// unusable track is reported here.
    pub fn spawn<B: MediaBackend>(
        backend: &B,
        path: &Path,
        target: Box<dyn RenderTarget>,
        options: PlaybackOptions,
    ) -> Result<Self, Error> {
        let stop = StopHandle::new();
        let mut session = DecodeSession::open(backend, path, Some(target))?
            .with_timeout(options.timeout)
            .with_stop_handle(stop.clone());

        let name = path.display().to_string();
        let handle = thread::Builder::new()
            .name("playback".into())
            .spawn(move || {
                let result = session.run_to_surface(options.looping, options.pace);
                match &result {
                    Ok(summary) => log::info!(
                        "playback of {name} ended after {} frames, {} loops",
                        summary.frames,
                        summary.loops
                    ),
                    Err(e) => log::error!("playback of {name} failed: {e}"),
                }
                result
            })
            .map_err(|e| Error::Decoder(BackendError::Io(e)))?;

        log::info!("playback of {} started", path.display());
        Ok(Playback {
            path: path.to_path_buf(),
            stop,
            handle: Some(handle),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Ask the playback thread to stop at its next loop boundary.
    pub fn stop(&self) {
        self.stop.stop();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(JoinHandle::is_finished)
    }

    /// Wait for the playback thread and return how it ended.
    pub fn join(mut self) -> Result<SessionSummary, Error> {
        self.join_inner()
    }

    fn join_inner(&mut self) -> Result<SessionSummary, Error> {
        match self.handle.take() {
            Some(handle) => handle
                .join()
                .unwrap_or_else(|_| Err(Error::decoder("playback thread panicked"))),
            None => Ok(SessionSummary::default()),
        }
    }
}

impl Drop for Playback {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.stop();
            let _ = self.join_inner();
            log::info!("playback of {} stopped", self.path.display());
        }
    }
}
