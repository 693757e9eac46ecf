use core::time::Duration;
use std::path::Path;

use ffmpeg_next::format::context::Input;
use ffmpeg_next::{Packet, Rational, codec, media};

use super::to_duration;
use crate::error::Error;
use crate::source::{TrackFormat, VideoSource};
use crate::types::{Ratio, Size};

/// A demuxed container file.
pub struct FfmpegSource {
    input: Input,
    tracks: Vec<TrackFormat>,
    selected: Option<usize>,
    current: Option<Packet>,
    exhausted: bool,
}

impl FfmpegSource {
    pub fn open(path: &Path) -> Result<Self, Error> {
        let input = ffmpeg_next::format::input(&path).map_err(|e| Error::SourceOpen(e.into()))?;
        let tracks = input.streams().map(|stream| describe(&stream)).collect();
        Ok(FfmpegSource {
            input,
            tracks,
            selected: None,
            current: None,
            exhausted: false,
        })
    }

    pub(super) fn codec_parameters(&self, index: usize) -> Result<(codec::Parameters, Rational), Error> {
        let stream = self
            .input
            .stream(index)
            .ok_or_else(|| Error::InvalidArgument(format!("no stream {index}")))?;
        Ok((stream.parameters(), stream.time_base()))
    }

    fn time_base(&self) -> Rational {
        self.selected
            .and_then(|index| self.input.stream(index))
            .map_or(Rational::new(0, 1), |stream| stream.time_base())
    }

    /// Read ahead to the next non-empty packet of the selected stream.
    fn load(&mut self) -> Result<(), Error> {
        if self.current.is_some() || self.exhausted {
            return Ok(());
        }
        let selected = self
            .selected
            .ok_or_else(|| Error::InvalidArgument("no track selected".into()))?;
        loop {
            let mut packet = Packet::empty();
            match packet.read(&mut self.input) {
                Ok(()) if packet.stream() == selected && packet.size() > 0 => {
                    self.current = Some(packet);
                    return Ok(());
                }
                Ok(()) => {}
                Err(ffmpeg_next::Error::Eof) => {
                    self.exhausted = true;
                    return Ok(());
                }
                Err(e) => return Err(Error::Decoder(e.into())),
            }
        }
    }
}

fn describe(stream: &ffmpeg_next::format::stream::Stream<'_>) -> TrackFormat {
    let parameters = stream.parameters();
    let prefix = match parameters.medium() {
        media::Type::Video => "video",
        media::Type::Audio => "audio",
        media::Type::Subtitle => "text",
        _ => "application",
    };
    let size = match parameters.medium() {
        media::Type::Video => frame_size(stream),
        _ => None,
    };

    let rate = stream.avg_frame_rate();
    let frame_rate = (rate.numerator() > 0 && rate.denominator() > 0).then(|| Ratio {
        numerator: rate.numerator() as u32,
        denominator: rate.denominator() as u32,
    });
    let duration = (stream.duration() > 0).then(|| to_duration(stream.duration(), stream.time_base()));

    TrackFormat {
        index: stream.index(),
        mime: format!("{prefix}/{}", parameters.id().name()),
        size,
        frame_rate,
        duration,
    }
}

/// Coded frame size, read through a throwaway decoder context.
fn frame_size(stream: &ffmpeg_next::format::stream::Stream<'_>) -> Option<Size> {
    let context = codec::context::Context::from_parameters(stream.parameters()).ok()?;
    let video = context.decoder().video().ok()?;
    let (width, height) = (video.width(), video.height());
    (width > 0 && height > 0).then(|| Size::new(width, height))
}

impl VideoSource for FfmpegSource {
    fn tracks(&self) -> &[TrackFormat] {
        &self.tracks
    }

    fn select_track(&mut self, index: usize) -> Result<(), Error> {
        if self.input.stream(index).is_none() {
            return Err(Error::InvalidArgument(format!("no stream {index}")));
        }
        self.selected = Some(index);
        self.current = None;
        Ok(())
    }

    fn read_sample(&mut self, buf: &mut Vec<u8>) -> Result<usize, Error> {
        self.load()?;
        buf.clear();
        match &self.current {
            Some(packet) => {
                buf.extend_from_slice(packet.data().unwrap_or(&[]));
                Ok(buf.len())
            }
            None => Ok(0),
        }
    }

    fn sample_time(&self) -> Duration {
        let ts = self
            .current
            .as_ref()
            .and_then(|packet| packet.pts().or(packet.dts()))
            .unwrap_or(0);
        to_duration(ts, self.time_base())
    }

    fn advance(&mut self) -> bool {
        self.current = None;
        match self.load() {
            Ok(()) => self.current.is_some(),
            Err(e) => {
                log::warn!("reading next packet failed: {e}");
                false
            }
        }
    }

    fn seek_to_sync(&mut self, time: Duration) -> Result<(), Error> {
        // Container seeks are expressed in AV_TIME_BASE (microseconds).
        let ts = i64::try_from(time.as_micros()).unwrap_or(i64::MAX);
        let result = if ts == 0 {
            self.input.seek(0, ..)
        } else {
            self.input.seek(ts, ..ts)
        };
        result.map_err(|e| Error::Decoder(e.into()))?;
        self.current = None;
        self.exhausted = false;
        Ok(())
    }

    fn release(&mut self) {
        self.current = None;
        self.exhausted = true;
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    fn write_y4m(path: &Path, size: Size, frames: usize) {
        let mut data = format!("YUV4MPEG2 W{} H{} F30:1 Ip A1:1 C420jpeg\n", size.width, size.height).into_bytes();
        for k in 0..frames {
            data.extend_from_slice(b"FRAME\n");
            data.extend(std::iter::repeat_n(k as u8, size.yuv420_len()));
        }
        fs::write(path, data).unwrap();
    }

    #[test]
    fn describes_video_track_geometry() {
        ffmpeg_next::init().unwrap();
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("clip.y4m");
        write_y4m(&path, Size::new(4, 2), 2);

        let mut source = FfmpegSource::open(&path).unwrap();
        let track = source.tracks()[0].clone();
        assert!(track.is_video());
        assert_eq!(track.mime, "video/rawvideo");
        assert_eq!(track.size, Some(Size::new(4, 2)));

        source.select_track(track.index).unwrap();
        let mut buf = Vec::new();
        assert_eq!(source.read_sample(&mut buf).unwrap(), 12);
        assert!(source.advance());
        assert_eq!(source.read_sample(&mut buf).unwrap(), 12);
        assert_eq!(buf, vec![1; 12]);
        assert!(!source.advance());
    }
}
