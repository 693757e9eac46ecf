use core::time::Duration;

use crate::error::Error;
use crate::types::{Ratio, Size};

/// Description of one track in a container.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackFormat {
    pub index: usize,
    /// e.g. `video/h264`, `video/raw`, `audio/aac`.
    pub mime: String,
    pub size: Option<Size>,
    pub frame_rate: Option<Ratio>,
    pub duration: Option<Duration>,
}

impl TrackFormat {
    pub fn is_video(&self) -> bool {
        self.mime.starts_with("video/")
    }

    /// Frames per second, when the container reports a usable rate.
    pub fn fps(&self) -> Option<f64> {
        self.frame_rate.map(|r| r.as_f64()).filter(|fps| *fps > 0.0)
    }
}

/// A demuxed container with a cursor over the selected track's samples.
pub trait VideoSource: Send {
    fn tracks(&self) -> &[TrackFormat];

    /// Restrict the sample cursor to one track.
    fn select_track(&mut self, index: usize) -> Result<(), Error>;

    /// Copy the current sample into `buf`, replacing its contents.
    /// Returns the sample size; zero means the track is exhausted.
    fn read_sample(&mut self, buf: &mut Vec<u8>) -> Result<usize, Error>;

    /// Presentation time of the current sample.
    fn sample_time(&self) -> Duration;

    /// Move to the next sample. Returns `false` once past the last one.
    fn advance(&mut self) -> bool;

    /// Reposition at the nearest sync sample at or before `time`.
    fn seek_to_sync(&mut self, time: Duration) -> Result<(), Error>;

    /// Release underlying handles. Safe to call more than once.
    fn release(&mut self) {}
}

/// Index of the first track whose mime type is `video/*`.
pub fn select_video_track(tracks: &[TrackFormat]) -> Option<usize> {
    tracks.iter().find(|t| t.is_video()).map(|t| t.index)
}
