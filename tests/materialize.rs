mod common;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use camera_replay::backend::raw::RawBackend;
use camera_replay::{
    DecodeStatus, Error, Frame, FrameMaterializer, MaterializeObserver, OutputFormat, PackedLayout,
    PreviewFeed, ReplacementQueue, ReplayConfig, Rotation, Size, StopHandle, rotate_nv21,
};
use parking_lot::Mutex;

use common::{init_logger, nv21_frame, wait_for, write_clip};

const SIZE: Size = Size {
    width: 4,
    height: 2,
};

#[derive(Default)]
struct Recorder {
    stored: Mutex<Vec<(u32, PathBuf)>>,
    decoded: Mutex<Vec<(u32, Size)>>,
    finished: AtomicUsize,
    failed: AtomicUsize,
    stop_after: Option<(u32, StopHandle)>,
}

impl MaterializeObserver for Recorder {
    fn on_frame_stored(&self, index: u32, path: &Path) {
        self.stored.lock().push((index, path.to_path_buf()));
        if let Some((at, stop)) = &self.stop_after {
            if index == *at {
                stop.stop();
            }
        }
    }

    fn on_frame_decoded(&self, index: u32, frame: &dyn Frame) {
        self.decoded.lock().push((index, frame.size()));
    }

    fn on_finished(&self) {
        self.finished.fetch_add(1, Ordering::SeqCst);
    }

    fn on_failed(&self, _: &Error) {
        self.failed.fetch_add(1, Ordering::SeqCst);
    }
}

fn file_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[test]
fn materializes_every_frame_in_order() {
    init_logger();
    let tmp = tempfile::tempdir().unwrap();
    let clip = write_clip(tmp.path(), "clip.yuv", SIZE, 5);
    let out = tmp.path().join("frames");
    let backend = RawBackend::new(SIZE, PackedLayout::Nv21);

    let recorder = Arc::new(Recorder::default());
    let materializer = FrameMaterializer::new(OutputFormat::I420)
        .output_dir(&out)
        .observer(recorder.clone());
    assert_eq!(materializer.status(), DecodeStatus::NotStarted);
    assert!(materializer.start(&backend, &clip).unwrap());
    assert!(!materializer.start(&backend, &clip).unwrap());
    materializer.join();

    assert_eq!(materializer.status(), DecodeStatus::Finished);
    assert_eq!(recorder.finished.load(Ordering::SeqCst), 1);
    assert_eq!(recorder.failed.load(Ordering::SeqCst), 0);

    let indices: Vec<u32> = recorder.stored.lock().iter().map(|(i, _)| *i).collect();
    assert_eq!(indices, vec![1, 2, 3, 4, 5]);
    assert_eq!(recorder.decoded.lock().len(), 5);
    assert_eq!(
        file_names(&out),
        (1..=5)
            .map(|i| format!("frame_0000{i}_I420_4x2.yuv"))
            .collect::<Vec<_>>()
    );

    // NV21 chroma (V, U) = (3, 103) lands as U then V in I420.
    let third = fs::read(out.join("frame_00003_I420_4x2.yuv")).unwrap();
    assert_eq!(&third[..8], &nv21_frame(SIZE, 3)[..8]);
    assert_eq!(&third[8..], &[103, 103, 3, 3]);

    assert_eq!((backend.open_sources(), backend.active_decoders()), (0, 0));
}

#[test]
fn stop_after_three_of_ten() {
    init_logger();
    let tmp = tempfile::tempdir().unwrap();
    let clip = write_clip(tmp.path(), "clip.yuv", SIZE, 10);
    let out = tmp.path().join("frames");
    let backend = RawBackend::new(SIZE, PackedLayout::Nv21);

    let materializer = FrameMaterializer::new(OutputFormat::Nv21).output_dir(&out);
    let recorder = Arc::new(Recorder {
        stop_after: Some((3, materializer.stop_handle())),
        ..Recorder::default()
    });
    let materializer = materializer.observer(recorder.clone());
    materializer.start(&backend, &clip).unwrap();
    materializer.join();

    assert_eq!(
        file_names(&out),
        vec![
            "frame_00001_NV21_4x2.yuv",
            "frame_00002_NV21_4x2.yuv",
            "frame_00003_NV21_4x2.yuv",
        ]
    );
    assert_eq!(materializer.status(), DecodeStatus::Finished);
    assert_eq!(recorder.finished.load(Ordering::SeqCst), 1);
    assert_eq!((backend.open_sources(), backend.active_decoders()), (0, 0));
}

#[test]
fn empty_clip_still_finishes_once() {
    let tmp = tempfile::tempdir().unwrap();
    let clip = write_clip(tmp.path(), "empty.yuv", SIZE, 0);
    let backend = RawBackend::new(SIZE, PackedLayout::Nv21);
    let recorder = Arc::new(Recorder::default());
    let materializer = FrameMaterializer::new(OutputFormat::Nv21)
        .output_dir(tmp.path().join("frames"))
        .observer(recorder.clone());
    materializer.start(&backend, &clip).unwrap();
    materializer.join();

    assert_eq!(materializer.status(), DecodeStatus::Finished);
    assert_eq!(recorder.finished.load(Ordering::SeqCst), 1);
    assert!(recorder.stored.lock().is_empty());
}

#[test]
fn in_memory_delivery_without_output_dir() {
    let tmp = tempfile::tempdir().unwrap();
    let clip = write_clip(tmp.path(), "clip.yuv", SIZE, 4);
    let backend = RawBackend::new(SIZE, PackedLayout::Nv21);
    let recorder = Arc::new(Recorder::default());
    let materializer = FrameMaterializer::new(OutputFormat::Nv21).observer(recorder.clone());
    materializer.start(&backend, &clip).unwrap();
    materializer.join();

    assert_eq!(
        *recorder.decoded.lock(),
        (1..=4).map(|i| (i, SIZE)).collect::<Vec<_>>()
    );
    assert!(recorder.stored.lock().is_empty());
    assert_eq!(file_names(tmp.path()), vec!["clip.yuv"]);
}

#[test]
fn jpeg_output() {
    let tmp = tempfile::tempdir().unwrap();
    let size = Size::new(16, 16);
    let clip = write_clip(tmp.path(), "clip.yuv", size, 2);
    let out = tmp.path().join("frames");
    let backend = RawBackend::new(size, PackedLayout::Nv21);
    let materializer = FrameMaterializer::new(OutputFormat::Jpeg).output_dir(&out);
    materializer.start(&backend, &clip).unwrap();
    materializer.join();

    assert_eq!(file_names(&out), vec!["frame_00001.jpg", "frame_00002.jpg"]);
    let jpeg = fs::read(out.join("frame_00001.jpg")).unwrap();
    assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
}

#[test]
fn missing_source_fails_start() {
    let tmp = tempfile::tempdir().unwrap();
    let backend = RawBackend::new(SIZE, PackedLayout::Nv21);
    let recorder = Arc::new(Recorder::default());
    let materializer = FrameMaterializer::new(OutputFormat::Nv21).observer(recorder.clone());

    let err = materializer.start(&backend, &tmp.path().join("nope.yuv")).unwrap_err();
    assert!(matches!(err, Error::SourceOpen(_)));
    assert_eq!(materializer.status(), DecodeStatus::Failed);
    assert_eq!(recorder.failed.load(Ordering::SeqCst), 1);
    assert_eq!(recorder.finished.load(Ordering::SeqCst), 0);
    assert!(!materializer.start(&backend, &tmp.path().join("nope.yuv")).unwrap());
}

fn finished_queue(tmp: &Path, count: u8) -> (FrameMaterializer, Arc<ReplacementQueue>) {
    let clip = write_clip(tmp, "clip.yuv", SIZE, count);
    let backend = RawBackend::new(SIZE, PackedLayout::Nv21);
    let materializer = FrameMaterializer::new(OutputFormat::Nv21).output_dir(tmp.join("frames"));
    let queue = Arc::new(ReplacementQueue::new(materializer.status_handle()));
    let materializer = materializer.observer(queue.clone());

    assert_eq!(queue.request_next(), None);
    materializer.start(&backend, &clip).unwrap();
    materializer.join();
    (materializer, queue)
}

#[test]
fn queue_serves_round_robin() {
    let tmp = tempfile::tempdir().unwrap();
    let (_materializer, queue) = finished_queue(tmp.path(), 3);
    assert!(queue.is_available());

    for k in 1..=3 {
        assert_eq!(queue.request_next().unwrap(), nv21_frame(SIZE, k));
    }
    assert_eq!(queue.request_next().unwrap(), nv21_frame(SIZE, 1));
    assert_eq!(queue.len(), 3);
}

#[test]
fn concurrent_consumers_see_each_record_equally() {
    let tmp = tempfile::tempdir().unwrap();
    let (_materializer, queue) = finished_queue(tmp.path(), 3);

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let queue = queue.clone();
            thread::spawn(move || {
                (0..30)
                    .map(|_| queue.next_record().unwrap().index)
                    .collect::<Vec<_>>()
            })
        })
        .collect();
    let mut counts = [0usize; 3];
    for handle in handles {
        for index in handle.join().unwrap() {
            counts[index as usize - 1] += 1;
        }
    }
    assert_eq!(counts, [40, 40, 40]);
    // 120 rotations of 3 records leave the head where it started.
    assert_eq!(queue.next_record().unwrap().index, 1);
}

#[test]
fn unreadable_frame_is_not_available() {
    let tmp = tempfile::tempdir().unwrap();
    let (_materializer, queue) = finished_queue(tmp.path(), 2);
    fs::remove_file(tmp.path().join("frames/frame_00001_NV21_4x2.yuv")).unwrap();

    assert_eq!(queue.request_next(), None);
    assert_eq!(queue.request_next().unwrap(), nv21_frame(SIZE, 2));
}

#[test]
fn preview_feed_serves_rotated_frames() {
    init_logger();
    let tmp = tempfile::tempdir().unwrap();
    // Stored portrait, served for a landscape preview.
    let stored = Size::new(2, 4);
    let preview = Size::new(4, 2);
    let clip = write_clip(tmp.path(), "virtual.mp4", stored, 3);
    let config = ReplayConfig {
        video_path: clip,
        work_dir: tmp.path().to_path_buf(),
        dump_preview_frames: true,
        ..ReplayConfig::default()
    };
    assert_eq!(config.preview_rotation, Rotation::Deg90);

    let feed = PreviewFeed::new(RawBackend::new(stored, PackedLayout::Nv21), config).unwrap();
    assert!(feed.decode_dir().starts_with(tmp.path()));

    let mut first = None;
    assert!(wait_for(|| {
        first = feed.next_frame(preview);
        first.is_some()
    }));
    let source = nv21_frame(stored, 1);
    let expected = rotate_nv21(&source, 2, 4, 90).unwrap();
    assert_eq!(first.unwrap(), &expected[..]);
    assert_eq!(feed.status(), DecodeStatus::Finished);

    // Wrong preview geometry never yields foreign bytes.
    assert_eq!(feed.next_frame(Size::new(8, 8)), None);

    let dump = feed.dump_dir().unwrap();
    assert!(dump.join("1.jpg").exists());
    let decode_dir = feed.decode_dir().file_name().unwrap().to_string_lossy().into_owned();
    assert!(decode_dir.starts_with("decode_video_"));
}

#[test]
fn preview_feed_rejects_jpeg_storage() {
    let config = ReplayConfig {
        output_format: OutputFormat::Jpeg,
        ..ReplayConfig::default()
    };
    let err = PreviewFeed::new(RawBackend::new(SIZE, PackedLayout::Nv21), config).err().unwrap();
    assert!(matches!(err, Error::InvalidArgument(_)));
}
