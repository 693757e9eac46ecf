use core::time::Duration;
use std::path::Path;

use crate::error::Error;
use crate::frame::{DecodedFrame, Frame};
use crate::source::{TrackFormat, VideoSource};

/// Handle to a decoder input buffer obtained from
/// [`VideoDecoder::dequeue_input`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputSlot(pub usize);

/// Metadata of a drained decoder output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputInfo {
    pub index: usize,
    /// Payload size; zero for a bare end-of-stream marker.
    pub size: usize,
    pub timestamp: Duration,
    pub end_of_stream: bool,
}

/// A destination surface that decoded frames can be rendered into directly.
pub trait RenderTarget: Send {
    fn present(&mut self, frame: &dyn Frame) -> Result<(), Error>;
}

/// A video decoder driven by a pull loop.
///
/// Input and output buffers are acquired with a bounded wait; `Ok(None)`
/// means the wait elapsed and the caller should try again later.
pub trait VideoDecoder: Send {
    /// Prepare for `track`. With a render target, outputs released with
    /// `render = true` are drawn into it instead of being read back.
    fn configure(&mut self, track: &TrackFormat, target: Option<Box<dyn RenderTarget>>) -> Result<(), Error>;

    fn start(&mut self) -> Result<(), Error>;

    fn dequeue_input(&mut self, timeout: Duration) -> Result<Option<InputSlot>, Error>;

    /// Submit a compressed sample into a slot from `dequeue_input`.
    fn queue_input(&mut self, slot: InputSlot, sample: &[u8], timestamp: Duration) -> Result<(), Error>;

    /// Signal that no further input follows.
    fn queue_end_of_stream(&mut self, slot: InputSlot) -> Result<(), Error>;

    fn dequeue_output(&mut self, timeout: Duration) -> Result<Option<OutputInfo>, Error>;

    /// Borrow the frame held by a drained output. `None` when the output
    /// carries no readable image (e.g. it is bound to a render target).
    fn output_frame(&mut self, index: usize) -> Option<DecodedFrame<'_>>;

    /// Hand an output back, optionally rendering it first.
    fn release_output(&mut self, index: usize, render: bool) -> Result<(), Error>;

    /// Drop all queued input and pending output, e.g. after a seek.
    fn flush(&mut self) -> Result<(), Error>;

    /// Stop decoding and release codec resources. Safe to call more than once.
    fn stop(&mut self);
}

/// Opens sources and constructs matching decoders.
pub trait MediaBackend: Send + Sync + 'static {
    type Source: VideoSource + 'static;
    type Decoder: VideoDecoder + 'static;

    fn open_source(&self, path: &Path) -> Result<Self::Source, Error>;

    fn create_decoder(&self, source: &Self::Source, track: &TrackFormat) -> Result<Self::Decoder, Error>;
}
