#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use camera_replay::{Error, Frame, RenderTarget, Size};

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Frame `k` (1-based) of a synthetic NV21 clip: luma `k*10 + i`, chroma
/// pairs `(k, k + 100)`.
pub fn nv21_frame(size: Size, k: u8) -> Vec<u8> {
    let area = size.area();
    let mut frame: Vec<u8> = (0..area).map(|i| k.wrapping_mul(10).wrapping_add(i as u8)).collect();
    for _ in 0..area / 4 {
        frame.push(k);
        frame.push(k.wrapping_add(100));
    }
    frame
}

/// Write `count` concatenated NV21 frames to `dir/name`.
pub fn write_clip(dir: &Path, name: &str, size: Size, count: u8) -> PathBuf {
    let path = dir.join(name);
    let data: Vec<u8> = (1..=count).flat_map(|k| nv21_frame(size, k)).collect();
    fs::write(&path, data).unwrap();
    path
}

pub fn wait_for(mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    false
}

/// A render target that counts what it is shown.
#[derive(Clone, Default)]
pub struct CountingTarget {
    pub presented: Arc<AtomicUsize>,
}

impl CountingTarget {
    pub fn count(&self) -> usize {
        self.presented.load(Ordering::SeqCst)
    }
}

impl RenderTarget for CountingTarget {
    fn present(&mut self, frame: &dyn Frame) -> Result<(), Error> {
        assert!(!frame.planes().is_empty());
        self.presented.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
