//! The decode driver: a feed/drain pull loop between a [`VideoSource`] and a
//! [`VideoDecoder`], with cooperative cancellation.

use core::time::Duration;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use crate::decoder::{MediaBackend, OutputInfo, RenderTarget, VideoDecoder};
use crate::error::Error;
use crate::frame::DecodedFrame;
use crate::source::{TrackFormat, VideoSource, select_video_track};

/// Bounded wait for each decoder input/output acquisition.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(10);

/// Cooperative stop flag shared between a session and whoever controls it.
///
/// The session polls it once per loop iteration.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    Idle,
    Running,
    /// End of input has been queued; remaining outputs are being drained.
    Draining,
    Done,
    Cancelled,
}

/// What a finished run produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionSummary {
    /// Frames handed to the consumer or rendered.
    pub frames: u64,
    /// Times playback wrapped back to the start.
    pub loops: u64,
    pub cancelled: bool,
}

#[derive(Debug, Clone, Copy)]
enum Mode {
    Frames,
    Surface { looping: bool, pace: bool },
}

/// Sleeps until each frame's presentation time relative to the first one.
struct PaceClock {
    anchor: Option<(Instant, Duration)>,
}

impl PaceClock {
    fn new() -> Self {
        PaceClock { anchor: None }
    }

    fn reset(&mut self) {
        self.anchor = None;
    }

    fn wait_until(&mut self, timestamp: Duration) {
        let (start, first) = *self.anchor.get_or_insert((Instant::now(), timestamp));
        let due = start + timestamp.saturating_sub(first);
        let now = Instant::now();
        if due > now {
            std::thread::sleep(due - now);
        }
    }
}

/// One decode of one video track.
///
/// Decoder and source are released when the run loop exits, whatever the
/// reason, and again (idempotently) on drop.
pub struct DecodeSession<S: VideoSource, D: VideoDecoder> {
    source: S,
    decoder: D,
    track: TrackFormat,
    state: SessionState,
    input_done: bool,
    output_done: bool,
    stop: StopHandle,
    timeout: Duration,
    sample: Vec<u8>,
    released: bool,
}

impl<S: VideoSource, D: VideoDecoder> DecodeSession<S, D> {
    /// Open `path` through `backend`, select its first video track and start
    /// a decoder for it. With a render target the session can only run in
    /// surface mode.
    pub fn open<B>(backend: &B, path: &Path, target: Option<Box<dyn RenderTarget>>) -> Result<Self, Error>
    where
        B: MediaBackend<Source = S, Decoder = D>,
    {
        let mut source = backend.open_source(path)?;
        let Some(index) = select_video_track(source.tracks()) else {
            source.release();
            log::warn!("no video track in {}", path.display());
            return Err(Error::NoTrackFound);
        };
        let track = match source.tracks().iter().find(|t| t.index == index) {
            Some(track) => track.clone(),
            None => {
                source.release();
                return Err(Error::NoTrackFound);
            }
        };
        if let Err(e) = source.select_track(index) {
            source.release();
            return Err(e);
        }
        let decoder = match backend.create_decoder(&source, &track) {
            Ok(decoder) => decoder,
            Err(e) => {
                source.release();
                return Err(e);
            }
        };
        log::info!(
            "opened {} track {} ({}, {:?}, {:.2} fps)",
            path.display(),
            track.index,
            track.mime,
            track.size,
            track.fps().unwrap_or_default()
        );
        Self::new(source, decoder, track, target)
    }

    /// Configure and start `decoder` for an already selected `track`.
    pub fn new(source: S, decoder: D, track: TrackFormat, target: Option<Box<dyn RenderTarget>>) -> Result<Self, Error> {
        let mut session = DecodeSession {
            source,
            decoder,
            track,
            state: SessionState::Idle,
            input_done: false,
            output_done: false,
            stop: StopHandle::new(),
            timeout: DEFAULT_TIMEOUT,
            sample: Vec::new(),
            released: false,
        };
        // On error the session drops here and releases both ends.
        session.decoder.configure(&session.track, target)?;
        session.decoder.start()?;
        Ok(session)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Share an existing stop flag instead of the session's own.
    pub fn with_stop_handle(mut self, stop: StopHandle) -> Self {
        self.stop = stop;
        self
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn track(&self) -> &TrackFormat {
        &self.track
    }

    /// Decode to the end of the stream (or until stopped), handing every
    /// decoded frame to `on_frame` before its buffer goes back to the decoder.
    pub fn run<F>(&mut self, mut on_frame: F) -> Result<SessionSummary, Error>
    where
        F: FnMut(&DecodedFrame<'_>),
    {
        self.drive(Mode::Frames, &mut on_frame)
    }

    /// Render every frame straight into the session's render target. With
    /// `looping`, end of stream seeks back to the first sync sample and
    /// playback continues until stopped.
    pub fn run_to_surface(&mut self, looping: bool, pace: bool) -> Result<SessionSummary, Error> {
        self.drive(Mode::Surface { looping, pace }, &mut |_: &DecodedFrame<'_>| {})
    }

    /// Stop the decoder and release the source.
    pub fn close(&mut self) {
        if self.released {
            return;
        }
        self.decoder.stop();
        self.source.release();
        self.released = true;
    }

    fn drive(&mut self, mode: Mode, on_frame: &mut dyn FnMut(&DecodedFrame<'_>)) -> Result<SessionSummary, Error> {
        if self.released {
            return Err(Error::InvalidArgument("decode session already closed".into()));
        }
        let result = self.drive_loop(mode, on_frame);
        self.close();
        if let Err(e) = &result {
            log::error!("decode of track {} aborted: {e}", self.track.index);
        }
        result
    }

    fn drive_loop(&mut self, mode: Mode, on_frame: &mut dyn FnMut(&DecodedFrame<'_>)) -> Result<SessionSummary, Error> {
        let mut summary = SessionSummary::default();
        let mut clock = match mode {
            Mode::Surface { pace: true, .. } => Some(PaceClock::new()),
            _ => None,
        };
        self.state = SessionState::Running;

        loop {
            if self.stop.is_stopped() {
                self.state = SessionState::Cancelled;
                summary.cancelled = true;
                return Ok(summary);
            }
            if self.output_done {
                match mode {
                    Mode::Surface { looping: true, .. } => {
                        self.rewind()?;
                        summary.loops += 1;
                        if let Some(clock) = clock.as_mut() {
                            clock.reset();
                        }
                    }
                    _ => {
                        self.state = SessionState::Done;
                        return Ok(summary);
                    }
                }
            }

            if !self.input_done {
                self.feed_input()?;
            }
            if let Some(info) = self.decoder.dequeue_output(self.timeout)? {
                self.handle_output(info, mode, on_frame, clock.as_mut(), &mut summary)?;
            }
        }
    }

    fn feed_input(&mut self) -> Result<(), Error> {
        let Some(slot) = self.decoder.dequeue_input(self.timeout)? else {
            return Ok(());
        };
        let size = self.source.read_sample(&mut self.sample)?;
        if size == 0 {
            self.decoder.queue_end_of_stream(slot)?;
            self.input_done = true;
            self.state = SessionState::Draining;
        } else {
            let timestamp = self.source.sample_time();
            self.decoder.queue_input(slot, &self.sample[..size], timestamp)?;
            self.source.advance();
        }
        Ok(())
    }

    fn handle_output(
        &mut self,
        info: OutputInfo,
        mode: Mode,
        on_frame: &mut dyn FnMut(&DecodedFrame<'_>),
        clock: Option<&mut PaceClock>,
        summary: &mut SessionSummary,
    ) -> Result<(), Error> {
        if info.end_of_stream {
            self.output_done = true;
        }
        if info.size == 0 {
            return self.decoder.release_output(info.index, false);
        }
        match mode {
            Mode::Frames => {
                if let Some(frame) = self.decoder.output_frame(info.index) {
                    on_frame(&frame);
                    summary.frames += 1;
                }
                self.decoder.release_output(info.index, false)
            }
            Mode::Surface { .. } => {
                if let Some(clock) = clock {
                    clock.wait_until(info.timestamp);
                }
                self.decoder.release_output(info.index, true)?;
                summary.frames += 1;
                Ok(())
            }
        }
    }

    fn rewind(&mut self) -> Result<(), Error> {
        log::debug!("end of stream on track {}, looping", self.track.index);
        self.source.seek_to_sync(Duration::ZERO)?;
        self.decoder.flush()?;
        self.input_done = false;
        self.output_done = false;
        self.state = SessionState::Running;
        Ok(())
    }
}

impl<S: VideoSource, D: VideoDecoder> Drop for DecodeSession<S, D> {
    fn drop(&mut self) {
        self.close();
    }
}
