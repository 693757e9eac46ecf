//! A backend for headerless files of concatenated packed I420/NV21 frames.
//!
//! Every frame is a sync sample and "decoding" is a copy, which makes this
//! backend useful wherever a real codec library is unavailable.

use core::time::Duration;
use std::collections::VecDeque;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::decoder::{InputSlot, MediaBackend, OutputInfo, RenderTarget, VideoDecoder};
use crate::error::{BackendError, Error};
use crate::frame::{DecodedFrame, packed_frame};
use crate::source::{TrackFormat, VideoSource};
use crate::types::{PackedLayout, Ratio, Size};

pub const RAW_MIME: &str = "video/raw";

/// Decoder buffers in flight at once.
const SLOTS: usize = 4;

#[derive(Debug, Default)]
struct Counters {
    sources: AtomicUsize,
    decoders: AtomicUsize,
}

/// Opens raw frame files of a fixed size and layout.
#[derive(Debug, Clone)]
pub struct RawBackend {
    size: Size,
    layout: PackedLayout,
    frame_rate: Ratio,
    counters: Arc<Counters>,
}

impl RawBackend {
    pub fn new(size: Size, layout: PackedLayout) -> Self {
        RawBackend {
            size,
            layout,
            frame_rate: Ratio {
                numerator: 30,
                denominator: 1,
            },
            counters: Arc::default(),
        }
    }

    pub fn with_frame_rate(mut self, frame_rate: Ratio) -> Self {
        self.frame_rate = frame_rate;
        self
    }

    pub fn size(&self) -> Size {
        self.size
    }

    /// Sources opened through this backend and not yet released.
    pub fn open_sources(&self) -> usize {
        self.counters.sources.load(Ordering::SeqCst)
    }

    /// Decoders started through this backend and not yet stopped.
    pub fn active_decoders(&self) -> usize {
        self.counters.decoders.load(Ordering::SeqCst)
    }
}

impl MediaBackend for RawBackend {
    type Source = RawVideoSource;
    type Decoder = RawVideoDecoder;

    fn open_source(&self, path: &Path) -> Result<RawVideoSource, Error> {
        let frame_len = self.size.yuv420_len();
        if frame_len == 0 {
            return Err(Error::InvalidArgument(format!("empty frame size {:?}", self.size)));
        }
        let data = fs::read(path).map_err(|e| Error::SourceOpen(BackendError::Io(e)))?;
        if data.len() % frame_len != 0 {
            log::warn!(
                "{} ends with a partial frame of {} bytes",
                path.display(),
                data.len() % frame_len
            );
        }
        let samples = data.chunks_exact(frame_len).map(<[u8]>::to_vec).collect();
        let mut source = RawVideoSource::from_frames(self.size, self.frame_rate, samples);
        source.counters = Some(self.counters.clone());
        self.counters.sources.fetch_add(1, Ordering::SeqCst);
        Ok(source)
    }

    fn create_decoder(&self, _source: &RawVideoSource, track: &TrackFormat) -> Result<RawVideoDecoder, Error> {
        if track.mime != RAW_MIME {
            return Err(Error::source_open(format!("no raw decoder for {}", track.mime)));
        }
        let mut decoder = RawVideoDecoder::new(self.layout);
        decoder.counters = Some(self.counters.clone());
        Ok(decoder)
    }
}

fn frame_duration(frame_rate: Ratio) -> Duration {
    if frame_rate.numerator == 0 {
        return Duration::ZERO;
    }
    Duration::from_nanos(1_000_000_000 * u64::from(frame_rate.denominator) / u64::from(frame_rate.numerator))
}

/// Raw samples for one or more tracks, only the selected one readable.
pub struct RawVideoSource {
    tracks: Vec<TrackFormat>,
    samples: Vec<Vec<u8>>,
    frame_duration: Duration,
    selected: Option<usize>,
    cursor: usize,
    counters: Option<Arc<Counters>>,
    released: bool,
}

impl RawVideoSource {
    /// A source with arbitrary track descriptions. `samples` belong to
    /// whichever track gets selected.
    pub fn new(tracks: Vec<TrackFormat>, samples: Vec<Vec<u8>>, frame_duration: Duration) -> Self {
        RawVideoSource {
            tracks,
            samples,
            frame_duration,
            selected: None,
            cursor: 0,
            counters: None,
            released: false,
        }
    }

    /// A single raw video track made of `frames`.
    pub fn from_frames(size: Size, frame_rate: Ratio, frames: Vec<Vec<u8>>) -> Self {
        let frame_duration = frame_duration(frame_rate);
        let track = TrackFormat {
            index: 0,
            mime: RAW_MIME.into(),
            size: Some(size),
            frame_rate: Some(frame_rate),
            duration: Some(frame_duration * frames.len() as u32),
        };
        Self::new(vec![track], frames, frame_duration)
    }

    pub fn is_released(&self) -> bool {
        self.released
    }
}

impl VideoSource for RawVideoSource {
    fn tracks(&self) -> &[TrackFormat] {
        &self.tracks
    }

    fn select_track(&mut self, index: usize) -> Result<(), Error> {
        if !self.tracks.iter().any(|t| t.index == index) {
            return Err(Error::InvalidArgument(format!("no track {index}")));
        }
        self.selected = Some(index);
        self.cursor = 0;
        Ok(())
    }

    fn read_sample(&mut self, buf: &mut Vec<u8>) -> Result<usize, Error> {
        if self.selected.is_none() {
            return Err(Error::InvalidArgument("no track selected".into()));
        }
        buf.clear();
        match self.samples.get(self.cursor) {
            Some(sample) => {
                buf.extend_from_slice(sample);
                Ok(sample.len())
            }
            None => Ok(0),
        }
    }

    fn sample_time(&self) -> Duration {
        self.frame_duration * self.cursor as u32
    }

    fn advance(&mut self) -> bool {
        if self.cursor < self.samples.len() {
            self.cursor += 1;
        }
        self.cursor < self.samples.len()
    }

    fn seek_to_sync(&mut self, time: Duration) -> Result<(), Error> {
        self.cursor = if self.frame_duration.is_zero() {
            0
        } else {
            let n = time.as_nanos() / self.frame_duration.as_nanos();
            (n as usize).min(self.samples.len())
        };
        Ok(())
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Some(counters) = &self.counters {
            counters.sources.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

struct OutputBuffer {
    data: Vec<u8>,
    timestamp: Duration,
}

/// Copies each sample through unchanged, after checking its size.
pub struct RawVideoDecoder {
    layout: PackedLayout,
    size: Option<Size>,
    target: Option<Box<dyn RenderTarget>>,
    started: bool,
    outputs: Vec<Option<OutputBuffer>>,
    pending: VecDeque<OutputInfo>,
    held: Vec<usize>,
    next_input: usize,
    end_of_stream: bool,
    counters: Option<Arc<Counters>>,
}

impl RawVideoDecoder {
    pub fn new(layout: PackedLayout) -> Self {
        RawVideoDecoder {
            layout,
            size: None,
            target: None,
            started: false,
            outputs: Vec::new(),
            pending: VecDeque::new(),
            held: Vec::new(),
            next_input: 0,
            end_of_stream: false,
            counters: None,
        }
    }

    fn in_flight(&self) -> usize {
        self.outputs.iter().filter(|o| o.is_some()).count()
    }

    fn store(&mut self, buffer: OutputBuffer) -> usize {
        match self.outputs.iter().position(Option::is_none) {
            Some(index) => {
                self.outputs[index] = Some(buffer);
                index
            }
            None => {
                self.outputs.push(Some(buffer));
                self.outputs.len() - 1
            }
        }
    }

    fn ensure_started(&self) -> Result<(), Error> {
        if self.started {
            Ok(())
        } else {
            Err(Error::decoder("decoder not started"))
        }
    }

    fn frame(&self, index: usize) -> Option<DecodedFrame<'_>> {
        let size = self.size?;
        let buffer = self.outputs.get(index)?.as_ref()?;
        if buffer.data.is_empty() {
            return None;
        }
        Some(packed_frame(self.layout, size, &buffer.data, buffer.timestamp))
    }
}

impl VideoDecoder for RawVideoDecoder {
    fn configure(&mut self, track: &TrackFormat, target: Option<Box<dyn RenderTarget>>) -> Result<(), Error> {
        let size = track
            .size
            .ok_or_else(|| Error::source_open(format!("track {} has no frame size", track.index)))?;
        self.size = Some(size);
        self.target = target;
        Ok(())
    }

    fn start(&mut self) -> Result<(), Error> {
        if self.size.is_none() {
            return Err(Error::decoder("decoder not configured"));
        }
        if !self.started {
            self.started = true;
            if let Some(counters) = &self.counters {
                counters.decoders.fetch_add(1, Ordering::SeqCst);
            }
        }
        Ok(())
    }

    fn dequeue_input(&mut self, _timeout: Duration) -> Result<Option<InputSlot>, Error> {
        self.ensure_started()?;
        if self.end_of_stream || self.in_flight() >= SLOTS {
            return Ok(None);
        }
        let slot = InputSlot(self.next_input);
        self.next_input = (self.next_input + 1) % SLOTS;
        Ok(Some(slot))
    }

    fn queue_input(&mut self, _slot: InputSlot, sample: &[u8], timestamp: Duration) -> Result<(), Error> {
        self.ensure_started()?;
        let expected = self.size.map_or(0, |s| s.yuv420_len());
        if sample.len() != expected {
            return Err(Error::decoder(format!(
                "sample of {} bytes, expected {expected}",
                sample.len()
            )));
        }
        let index = self.store(OutputBuffer {
            data: sample.to_vec(),
            timestamp,
        });
        self.pending.push_back(OutputInfo {
            index,
            size: sample.len(),
            timestamp,
            end_of_stream: false,
        });
        Ok(())
    }

    fn queue_end_of_stream(&mut self, _slot: InputSlot) -> Result<(), Error> {
        self.ensure_started()?;
        self.end_of_stream = true;
        let index = self.store(OutputBuffer {
            data: Vec::new(),
            timestamp: Duration::ZERO,
        });
        self.pending.push_back(OutputInfo {
            index,
            size: 0,
            timestamp: Duration::ZERO,
            end_of_stream: true,
        });
        Ok(())
    }

    fn dequeue_output(&mut self, _timeout: Duration) -> Result<Option<OutputInfo>, Error> {
        self.ensure_started()?;
        let info = self.pending.pop_front();
        if let Some(info) = &info {
            self.held.push(info.index);
        }
        Ok(info)
    }

    fn output_frame(&mut self, index: usize) -> Option<DecodedFrame<'_>> {
        if self.target.is_some() || !self.held.contains(&index) {
            return None;
        }
        self.frame(index)
    }

    fn release_output(&mut self, index: usize, render: bool) -> Result<(), Error> {
        let Some(position) = self.held.iter().position(|&i| i == index) else {
            return Err(Error::decoder(format!("output {index} was not dequeued")));
        };
        self.held.swap_remove(position);

        let result = match (render, self.target.take()) {
            (true, Some(mut target)) => {
                let result = match self.frame(index) {
                    Some(frame) => target.present(&frame),
                    None => Ok(()),
                };
                self.target = Some(target);
                result
            }
            (_, target) => {
                self.target = target;
                Ok(())
            }
        };
        if let Some(slot) = self.outputs.get_mut(index) {
            *slot = None;
        }
        result
    }

    fn flush(&mut self) -> Result<(), Error> {
        self.pending.clear();
        self.held.clear();
        self.outputs.clear();
        self.end_of_stream = false;
        Ok(())
    }

    fn stop(&mut self) {
        self.pending.clear();
        self.held.clear();
        self.outputs.clear();
        self.target = None;
        if self.started {
            self.started = false;
            if let Some(counters) = &self.counters {
                counters.decoders.fetch_sub(1, Ordering::SeqCst);
            }
        }
    }
}
