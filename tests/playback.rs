mod common;

use std::path::Path;
use std::sync::{Arc, OnceLock, Weak, mpsc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use camera_replay::backend::raw::{RawBackend, RawVideoDecoder, RawVideoSource};
use camera_replay::binding::{CaptureHost, TargetKind, TargetTable};
use camera_replay::{
    DecodeSession, Error, Frame, MediaBackend, PackedLayout, Playback, PlaybackOptions, Ratio,
    RenderTarget, ReplayConfig, SessionState, Size, TrackFormat, VideoSource,
};

use common::{CountingTarget, init_logger, nv21_frame, wait_for, write_clip};

const SIZE: Size = Size {
    width: 4,
    height: 2,
};

const FPS: Ratio = Ratio {
    numerator: 30,
    denominator: 1,
};

/// A source that records whether it was released.
struct Tracked {
    inner: RawVideoSource,
    released: Arc<AtomicBool>,
}

impl VideoSource for Tracked {
    fn tracks(&self) -> &[TrackFormat] {
        self.inner.tracks()
    }

    fn select_track(&mut self, index: usize) -> Result<(), Error> {
        self.inner.select_track(index)
    }

    fn read_sample(&mut self, buf: &mut Vec<u8>) -> Result<usize, Error> {
        self.inner.read_sample(buf)
    }

    fn sample_time(&self) -> Duration {
        self.inner.sample_time()
    }

    fn advance(&mut self) -> bool {
        self.inner.advance()
    }

    fn seek_to_sync(&mut self, time: Duration) -> Result<(), Error> {
        self.inner.seek_to_sync(time)
    }

    fn release(&mut self) {
        self.inner.release();
        self.released.store(true, Ordering::SeqCst);
    }
}

fn tracked(frames: Vec<Vec<u8>>) -> (Tracked, TrackFormat, Arc<AtomicBool>) {
    let mut inner = RawVideoSource::from_frames(SIZE, FPS, frames);
    inner.select_track(0).unwrap();
    let track = inner.tracks()[0].clone();
    let released = Arc::new(AtomicBool::new(false));
    let source = Tracked {
        inner,
        released: released.clone(),
    };
    (source, track, released)
}

#[test]
fn session_delivers_frames_in_order() {
    init_logger();
    let frames: Vec<Vec<u8>> = (1..=6).map(|k| nv21_frame(SIZE, k)).collect();
    let (source, track, released) = tracked(frames.clone());
    let mut session = DecodeSession::new(source, RawVideoDecoder::new(PackedLayout::Nv21), track, None).unwrap();
    assert_eq!(session.state(), SessionState::Idle);

    let mut seen = Vec::new();
    let summary = session
        .run(|frame| {
            let luma = frame.planes()[0].data;
            seen.push((luma[0], frame.timestamp()));
        })
        .unwrap();

    assert_eq!(summary.frames, 6);
    assert!(!summary.cancelled);
    assert_eq!(session.state(), SessionState::Done);
    assert!(released.load(Ordering::SeqCst));
    let expected: Vec<(u8, Duration)> = (0..6u32)
        .map(|i| (frames[i as usize][0], Duration::from_nanos(33_333_333) * i))
        .collect();
    assert_eq!(seen, expected);
}

#[test]
fn decoder_failure_aborts_and_releases() {
    let (source, track, released) = tracked(vec![nv21_frame(SIZE, 1), vec![0; 5], nv21_frame(SIZE, 3)]);
    let mut session = DecodeSession::new(source, RawVideoDecoder::new(PackedLayout::Nv21), track, None).unwrap();

    let mut delivered = 0;
    let err = session.run(|_| delivered += 1).unwrap_err();
    assert!(matches!(err, Error::Decoder(_)));
    assert_eq!(delivered, 1);
    assert!(released.load(Ordering::SeqCst));

    // A closed session refuses to run again.
    assert!(matches!(session.run(|_| {}), Err(Error::InvalidArgument(_))));
}

#[test]
fn stop_before_run_is_cancelled() {
    let (source, track, released) = tracked(vec![nv21_frame(SIZE, 1)]);
    let mut session = DecodeSession::new(source, RawVideoDecoder::new(PackedLayout::Nv21), track, None).unwrap();
    session.stop_handle().stop();

    let summary = session.run(|_| panic!("no frame expected")).unwrap();
    assert!(summary.cancelled);
    assert_eq!(summary.frames, 0);
    assert_eq!(session.state(), SessionState::Cancelled);
    assert!(released.load(Ordering::SeqCst));
}

#[test]
fn dropping_an_unrun_session_releases() {
    let (source, track, released) = tracked(vec![nv21_frame(SIZE, 1)]);
    let session = DecodeSession::new(source, RawVideoDecoder::new(PackedLayout::Nv21), track, None).unwrap();
    drop(session);
    assert!(released.load(Ordering::SeqCst));
}

/// Reports a single audio track.
struct AudioOnly;

impl MediaBackend for AudioOnly {
    type Source = RawVideoSource;
    type Decoder = RawVideoDecoder;

    fn open_source(&self, _: &Path) -> Result<RawVideoSource, Error> {
        let track = TrackFormat {
            index: 0,
            mime: "audio/aac".into(),
            size: None,
            frame_rate: None,
            duration: None,
        };
        Ok(RawVideoSource::new(vec![track], Vec::new(), Duration::ZERO))
    }

    fn create_decoder(&self, _: &RawVideoSource, _: &TrackFormat) -> Result<RawVideoDecoder, Error> {
        Ok(RawVideoDecoder::new(PackedLayout::Nv21))
    }
}

#[test]
fn no_video_track() {
    let result = DecodeSession::open(&AudioOnly, Path::new("song.m4a"), None);
    assert!(matches!(result, Err(Error::NoTrackFound)));
}

#[test]
fn surface_playback_loops_until_stopped() {
    init_logger();
    let tmp = tempfile::tempdir().unwrap();
    let clip = write_clip(tmp.path(), "clip.yuv", SIZE, 3);
    let backend = RawBackend::new(SIZE, PackedLayout::Nv21);
    let target = CountingTarget::default();

    let playback = Playback::spawn(
        &backend,
        &clip,
        Box::new(target.clone()),
        PlaybackOptions {
            pace: false,
            ..PlaybackOptions::default()
        },
    )
    .unwrap();
    assert!(wait_for(|| target.count() > 9));
    assert!(!playback.is_finished());

    playback.stop();
    let summary = playback.join().unwrap();
    assert!(summary.cancelled);
    assert!(summary.loops >= 3);
    assert_eq!((backend.open_sources(), backend.active_decoders()), (0, 0));
}

#[test]
fn surface_playback_without_looping_ends() {
    let tmp = tempfile::tempdir().unwrap();
    let clip = write_clip(tmp.path(), "clip.yuv", SIZE, 4);
    let backend = RawBackend::new(SIZE, PackedLayout::Nv21).with_frame_rate(Ratio {
        numerator: 1000,
        denominator: 1,
    });
    let target = CountingTarget::default();
    let playback = Playback::spawn(
        &backend,
        &clip,
        Box::new(target.clone()),
        PlaybackOptions {
            looping: false,
            ..PlaybackOptions::default()
        },
    )
    .unwrap();

    let summary = playback.join().unwrap();
    assert_eq!(summary.frames, 4);
    assert_eq!(summary.loops, 0);
    assert_eq!(target.count(), 4);
}

struct Host {
    target: CountingTarget,
}

impl CaptureHost for Host {
    type Target = u32;
    type Synthetic = u32;

    fn create_synthetic(&self, target: &u32) -> Result<u32, Error> {
        Ok(target + 1000)
    }

    fn target_kind(&self, target: &u32) -> TargetKind {
        match target {
            1 => TargetKind::Texture,
            2 => TargetKind::ImageReader,
            _ => TargetKind::Other,
        }
    }

    fn is_valid(&self, _: &u32) -> bool {
        true
    }

    fn render_target(&self, _: &u32) -> Option<Box<dyn RenderTarget>> {
        Some(Box::new(self.target.clone()))
    }
}

#[test]
fn bindings_play_into_configured_targets() {
    init_logger();
    let tmp = tempfile::tempdir().unwrap();
    let clip = write_clip(tmp.path(), "virtual.yuv", SIZE, 3);
    let backend = RawBackend::new(SIZE, PackedLayout::Nv21);
    let config = ReplayConfig {
        video_path: clip,
        rotated_video_path: tmp.path().join("missing_rotated.yuv"),
        pace_playback: false,
        ..ReplayConfig::default()
    };
    let target = CountingTarget::default();
    let table = TargetTable::new(Host {
        target: target.clone(),
    });

    let texture = table.observe(&1).unwrap();
    assert_eq!(texture.synthetic, 1001);
    let reader = table.observe(&2).unwrap().id;
    let other = table.observe(&3).unwrap().id;

    // Nothing is configured yet.
    assert_eq!(table.start_playback(&backend, &config).unwrap(), 0);

    table.observe(&1).unwrap();
    table.observe(&2).unwrap();
    assert!(table.mark_configured(other));
    // Only the texture plays: the rotated video is missing and "other"
    // targets are never touched.
    assert_eq!(table.start_playback(&backend, &config).unwrap(), 1);
    assert!(table.is_playing(texture.id));
    assert!(!table.is_playing(reader));
    assert!(!table.is_playing(other));
    assert!(wait_for(|| target.count() > 0));

    // Already playing targets are left alone.
    assert_eq!(table.start_playback(&backend, &config).unwrap(), 0);

    table.close();
    assert!(table.is_empty());
    assert_eq!((backend.open_sources(), backend.active_decoders()), (0, 0));
}

#[test]
fn image_reader_plays_rotated_video() {
    let tmp = tempfile::tempdir().unwrap();
    let backend = RawBackend::new(SIZE, PackedLayout::Nv21);
    let config = ReplayConfig {
        video_path: tmp.path().join("missing.yuv"),
        rotated_video_path: write_clip(tmp.path(), "rotated.yuv", SIZE, 2),
        pace_playback: false,
        ..ReplayConfig::default()
    };
    let target = CountingTarget::default();
    let table = TargetTable::new(Host {
        target: target.clone(),
    });
    table.observe(&2).unwrap();
    let reader = table.observe(&2).unwrap();
    assert!(reader.configured);

    assert_eq!(table.start_playback(&backend, &config).unwrap(), 1);
    assert!(wait_for(|| target.count() > 0));
    table.close();
    assert_eq!(backend.open_sources(), 0);
}

#[test]
fn failed_playback_is_reported() {
    let tmp = tempfile::tempdir().unwrap();
    let backend = RawBackend::new(SIZE, PackedLayout::Nv21);
    let config = ReplayConfig {
        video_path: tmp.path().join("missing.yuv"),
        ..ReplayConfig::default()
    };
    let table = TargetTable::new(Host {
        target: CountingTarget::default(),
    });
    let id = table.observe(&1).unwrap().id;
    table.mark_configured(id);

    let err = table.start_playback(&backend, &config).unwrap_err();
    assert!(matches!(err, Error::SourceOpen(_)));
    assert!(!table.is_playing(id));
}

/// A host that looks itself up in the table from every callback.
struct Reentrant {
    table: Arc<OnceLock<Weak<TargetTable<Reentrant>>>>,
    target: CountingTarget,
}

impl Reentrant {
    fn table(&self) -> Option<Arc<TargetTable<Reentrant>>> {
        self.table.get().and_then(Weak::upgrade)
    }
}

impl CaptureHost for Reentrant {
    type Target = u32;
    type Synthetic = u32;

    fn create_synthetic(&self, target: &u32) -> Result<u32, Error> {
        if let Some(table) = self.table() {
            assert_eq!(table.id_of(target), None);
        }
        Ok(*target)
    }

    fn target_kind(&self, _: &u32) -> TargetKind {
        TargetKind::Texture
    }

    fn is_valid(&self, target: &u32) -> bool {
        self.table().is_some_and(|table| table.id_of(target).is_some())
    }

    fn render_target(&self, target: &u32) -> Option<Box<dyn RenderTarget>> {
        let table = self.table()?;
        let id = table.id_of(target)?;
        assert!(!table.is_playing(id));
        Some(Box::new(self.target.clone()))
    }
}

#[test]
fn host_callbacks_may_query_the_table() {
    let tmp = tempfile::tempdir().unwrap();
    let backend = RawBackend::new(SIZE, PackedLayout::Nv21);
    let config = ReplayConfig {
        video_path: write_clip(tmp.path(), "virtual.yuv", SIZE, 2),
        pace_playback: false,
        ..ReplayConfig::default()
    };
    let slot = Arc::new(OnceLock::new());
    let target = CountingTarget::default();
    let table = Arc::new(TargetTable::new(Reentrant {
        table: slot.clone(),
        target: target.clone(),
    }));
    slot.set(Arc::downgrade(&table)).unwrap();

    let (tx, rx) = mpsc::channel();
    let worker = {
        let table = table.clone();
        std::thread::spawn(move || {
            let id = table.observe(&7).unwrap().id;
            table.observe(&7).unwrap();
            let started = table.start_playback(&backend, &config);
            tx.send((id, started.map_err(|e| e.to_string()))).unwrap();
            backend
        })
    };

    // A held lock around the callbacks would never get here.
    let (id, started) = rx.recv_timeout(Duration::from_secs(10)).unwrap();
    assert_eq!(started, Ok(1));
    assert!(table.is_playing(id));
    assert!(wait_for(|| target.count() > 0));

    table.close();
    let backend = worker.join().unwrap();
    assert_eq!((backend.open_sources(), backend.active_decoders()), (0, 0));
}
