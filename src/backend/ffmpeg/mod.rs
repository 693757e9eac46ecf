//! Container demuxing and software decoding through FFmpeg.

use core::time::Duration;
use std::path::Path;

use ffmpeg_next::Rational;

use crate::decoder::MediaBackend;
use crate::error::Error;
use crate::source::TrackFormat;

mod decoder;
mod source;

pub use decoder::FfmpegDecoder;
pub use source::FfmpegSource;

/// Opens any container/codec pair the linked FFmpeg libraries support.
#[derive(Debug, Clone, Copy)]
pub struct FfmpegBackend {
    _private: (),
}

impl FfmpegBackend {
    /// Initialize FFmpeg (safe to call more than once).
    pub fn new() -> Result<Self, Error> {
        ffmpeg_next::init().map_err(|e| Error::SourceOpen(e.into()))?;
        Ok(FfmpegBackend { _private: () })
    }
}

impl MediaBackend for FfmpegBackend {
    type Source = FfmpegSource;
    type Decoder = FfmpegDecoder;

    fn open_source(&self, path: &Path) -> Result<FfmpegSource, Error> {
        FfmpegSource::open(path)
    }

    fn create_decoder(&self, source: &FfmpegSource, track: &TrackFormat) -> Result<FfmpegDecoder, Error> {
        let (parameters, time_base) = source.codec_parameters(track.index)?;
        FfmpegDecoder::new(parameters, time_base)
    }
}

fn to_duration(ts: i64, time_base: Rational) -> Duration {
    let (num, den) = (time_base.numerator(), time_base.denominator());
    if ts <= 0 || num <= 0 || den <= 0 {
        return Duration::ZERO;
    }
    let nanos = i128::from(ts) * i128::from(num) * 1_000_000_000 / i128::from(den);
    Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
}

fn from_duration(time: Duration, time_base: Rational) -> i64 {
    let (num, den) = (time_base.numerator(), time_base.denominator());
    if num <= 0 || den <= 0 {
        return 0;
    }
    let ts = time.as_nanos() as i128 * i128::from(den) / (i128::from(num) * 1_000_000_000);
    i64::try_from(ts).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_follow_the_time_base() {
        let tb = Rational::new(1, 90_000);
        assert_eq!(to_duration(90_000, tb), Duration::from_secs(1));
        assert_eq!(to_duration(-5, tb), Duration::ZERO);
        assert_eq!(from_duration(Duration::from_millis(500), tb), 45_000);
    }
}
