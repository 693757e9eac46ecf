use core::time::Duration;

use ffmpeg_next::format::Pixel;
use ffmpeg_next::software::scaling;
use ffmpeg_next::{Packet, Rational, codec, frame};

use super::{from_duration, to_duration};
use crate::decoder::{InputSlot, OutputInfo, RenderTarget, VideoDecoder};
use crate::error::Error;
use crate::frame::{DecodedFrame, Plane};
use crate::source::TrackFormat;
use crate::types::{PixelFormat, Size};

/// Index reported for the bare end-of-stream output.
const EOS_INDEX: usize = usize::MAX;

struct Scaler(scaling::Context);

// SAFETY: the scaler is owned by exactly one decoder and only touched
// through `&mut self`; swscale contexts carry no thread affinity.
unsafe impl Send for Scaler {}

struct Output {
    frame: frame::Video,
    pixel_format: PixelFormat,
    timestamp: Duration,
}

/// A software FFmpeg decoder behind the slot-based decoder interface.
///
/// Outputs come back in one of the 4:2:0 layouts; anything else is
/// converted to planar YUV 4:2:0 first.
pub struct FfmpegDecoder {
    decoder: ffmpeg_next::decoder::Video,
    time_base: Rational,
    target: Option<Box<dyn RenderTarget>>,
    started: bool,
    stalled: Option<Packet>,
    eos_requested: bool,
    eos_sent: bool,
    eos_delivered: bool,
    outputs: Vec<Option<Output>>,
    scaler: Option<Scaler>,
}

impl FfmpegDecoder {
    pub(super) fn new(parameters: codec::Parameters, time_base: Rational) -> Result<Self, Error> {
        let decoder = codec::context::Context::from_parameters(parameters)
            .and_then(|context| context.decoder().video())
            .map_err(|e| Error::SourceOpen(e.into()))?;
        Ok(FfmpegDecoder {
            decoder,
            time_base,
            target: None,
            started: false,
            stalled: None,
            eos_requested: false,
            eos_sent: false,
            eos_delivered: false,
            outputs: Vec::new(),
            scaler: None,
        })
    }

    /// Retry a packet the decoder refused, then a pending end-of-stream.
    fn pump(&mut self) -> Result<(), Error> {
        if let Some(packet) = self.stalled.take() {
            match self.decoder.send_packet(&packet) {
                Ok(()) => {}
                Err(ffmpeg_next::Error::Other {
                    errno: ffmpeg_next::error::EAGAIN,
                }) => {
                    self.stalled = Some(packet);
                    return Ok(());
                }
                Err(e) => return Err(Error::Decoder(e.into())),
            }
        }
        if self.eos_requested && !self.eos_sent {
            self.decoder.send_eof().map_err(|e| Error::Decoder(e.into()))?;
            self.eos_sent = true;
        }
        Ok(())
    }

    fn ensure_started(&self) -> Result<(), Error> {
        if self.started {
            Ok(())
        } else {
            Err(Error::decoder("decoder not started"))
        }
    }

    fn to_yuv420(&mut self, decoded: frame::Video) -> Result<(frame::Video, PixelFormat), Error> {
        let pixel_format = match decoded.format() {
            Pixel::YUV420P | Pixel::YUVJ420P => PixelFormat::I420,
            Pixel::NV12 => PixelFormat::Nv12,
            Pixel::NV21 => PixelFormat::Nv21,
            format => {
                let (width, height) = (decoded.width(), decoded.height());
                let stale = self.scaler.as_ref().is_none_or(|s| {
                    let input = s.0.input();
                    input.format != format || input.width != width || input.height != height
                });
                if stale {
                    let context = scaling::Context::get(
                        format,
                        width,
                        height,
                        Pixel::YUV420P,
                        width,
                        height,
                        scaling::Flags::BILINEAR,
                    )
                    .map_err(|e| Error::Decoder(e.into()))?;
                    self.scaler = Some(Scaler(context));
                }
                let mut converted = frame::Video::empty();
                if let Some(scaler) = self.scaler.as_mut() {
                    scaler.0.run(&decoded, &mut converted).map_err(|e| Error::Decoder(e.into()))?;
                }
                converted.set_pts(decoded.pts());
                return Ok((converted, PixelFormat::I420));
            }
        };
        Ok((decoded, pixel_format))
    }

    fn store(&mut self, output: Output) -> usize {
        match self.outputs.iter().position(Option::is_none) {
            Some(index) => {
                self.outputs[index] = Some(output);
                index
            }
            None => {
                self.outputs.push(Some(output));
                self.outputs.len() - 1
            }
        }
    }
}

fn view(output: &Output) -> DecodedFrame<'_> {
    let frame = &output.frame;
    let size = Size::new(frame.width(), frame.height());
    let y = Plane::new(frame.data(0), frame.stride(0), 1);
    let planes = match output.pixel_format {
        PixelFormat::Nv12 => {
            let uv = frame.data(1);
            [y, Plane::new(uv, frame.stride(1), 2), Plane::new(uv.get(1..).unwrap_or(&[]), frame.stride(1), 2)]
        }
        PixelFormat::Nv21 => {
            let vu = frame.data(1);
            [y, Plane::new(vu.get(1..).unwrap_or(&[]), frame.stride(1), 2), Plane::new(vu, frame.stride(1), 2)]
        }
        _ => [
            y,
            Plane::new(frame.data(1), frame.stride(1), 1),
            Plane::new(frame.data(2), frame.stride(2), 1),
        ],
    };
    DecodedFrame::new(output.pixel_format, size, planes, output.timestamp)
}

impl VideoDecoder for FfmpegDecoder {
    fn configure(&mut self, track: &TrackFormat, target: Option<Box<dyn RenderTarget>>) -> Result<(), Error> {
        log::debug!("configuring ffmpeg decoder for {}", track.mime);
        self.target = target;
        Ok(())
    }

    fn start(&mut self) -> Result<(), Error> {
        self.started = true;
        Ok(())
    }

    fn dequeue_input(&mut self, _timeout: Duration) -> Result<Option<InputSlot>, Error> {
        self.ensure_started()?;
        self.pump()?;
        if self.eos_requested || self.stalled.is_some() {
            return Ok(None);
        }
        Ok(Some(InputSlot(0)))
    }

    fn queue_input(&mut self, _slot: InputSlot, sample: &[u8], timestamp: Duration) -> Result<(), Error> {
        self.ensure_started()?;
        let mut packet = Packet::copy(sample);
        packet.set_pts(Some(from_duration(timestamp, self.time_base)));
        match self.decoder.send_packet(&packet) {
            Ok(()) => Ok(()),
            Err(ffmpeg_next::Error::Other {
                errno: ffmpeg_next::error::EAGAIN,
            }) => {
                self.stalled = Some(packet);
                Ok(())
            }
            Err(e) => Err(Error::Decoder(e.into())),
        }
    }

    fn queue_end_of_stream(&mut self, _slot: InputSlot) -> Result<(), Error> {
        self.ensure_started()?;
        self.eos_requested = true;
        self.pump()
    }

    fn dequeue_output(&mut self, _timeout: Duration) -> Result<Option<OutputInfo>, Error> {
        self.ensure_started()?;
        self.pump()?;
        if self.eos_delivered {
            return Ok(None);
        }
        let mut decoded = frame::Video::empty();
        match self.decoder.receive_frame(&mut decoded) {
            Ok(()) => {
                let ts = decoded.timestamp().or(decoded.pts()).unwrap_or(0);
                let timestamp = to_duration(ts, self.time_base);
                let (frame, pixel_format) = self.to_yuv420(decoded)?;
                let size = Size::new(frame.width(), frame.height()).yuv420_len();
                let index = self.store(Output {
                    frame,
                    pixel_format,
                    timestamp,
                });
                Ok(Some(OutputInfo {
                    index,
                    size,
                    timestamp,
                    end_of_stream: false,
                }))
            }
            Err(ffmpeg_next::Error::Other {
                errno: ffmpeg_next::error::EAGAIN,
            }) => Ok(None),
            Err(ffmpeg_next::Error::Eof) => {
                self.eos_delivered = true;
                Ok(Some(OutputInfo {
                    index: EOS_INDEX,
                    size: 0,
                    timestamp: Duration::ZERO,
                    end_of_stream: true,
                }))
            }
            Err(e) => Err(Error::Decoder(e.into())),
        }
    }

    fn output_frame(&mut self, index: usize) -> Option<DecodedFrame<'_>> {
        if self.target.is_some() {
            return None;
        }
        self.outputs.get(index)?.as_ref().map(view)
    }

    fn release_output(&mut self, index: usize, render: bool) -> Result<(), Error> {
        if index == EOS_INDEX {
            return Ok(());
        }
        let output = self
            .outputs
            .get_mut(index)
            .and_then(Option::take)
            .ok_or_else(|| Error::decoder(format!("output {index} was not dequeued")))?;
        match (render, self.target.as_mut()) {
            (true, Some(target)) => target.present(&view(&output)),
            _ => Ok(()),
        }
    }

    fn flush(&mut self) -> Result<(), Error> {
        self.decoder.flush();
        self.stalled = None;
        self.eos_requested = false;
        self.eos_sent = false;
        self.eos_delivered = false;
        self.outputs.clear();
        Ok(())
    }

    fn stop(&mut self) {
        self.started = false;
        self.stalled = None;
        self.outputs.clear();
        self.target = None;
    }
}
