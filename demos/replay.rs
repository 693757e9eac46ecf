use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use camera_replay::{
    FrameMaterializer, MaterializeObserver, MediaBackend, OutputFormat, ReplacementQueue,
};

struct Progress {
    stored: AtomicU32,
}

impl MaterializeObserver for Progress {
    fn on_frame_stored(&self, index: u32, path: &std::path::Path) {
        self.stored.store(index, Ordering::Relaxed);
        if index % 30 == 0 {
            println!("  stored frame {index} at {}", path.display());
        }
    }

    fn on_finished(&self) {
        println!("  done: {} frames", self.stored.load(Ordering::Relaxed));
    }
}

fn run<B: MediaBackend>(backend: B, input: PathBuf, out_dir: PathBuf, format: OutputFormat) {
    let progress = Arc::new(Progress {
        stored: AtomicU32::new(0),
    });
    let materializer = FrameMaterializer::new(format)
        .output_dir(&out_dir)
        .observer(progress);
    let queue = Arc::new(ReplacementQueue::new(materializer.status_handle()));
    let materializer = materializer.observer(queue.clone());

    println!("Decoding {} into {}", input.display(), out_dir.display());
    materializer
        .start(&backend, &input)
        .expect("failed to start decoding");
    materializer.join();
    println!("Status: {:?}", materializer.status());

    // Serve a few frames the way a preview consumer would.
    for _ in 0..3 {
        match queue.request_next() {
            Some(frame) => println!("  served {} bytes", frame.len()),
            None => println!("  nothing to serve"),
        }
    }
}

fn main() {
    env_logger::init();

    let args: Vec<String> = std::env::args().collect();
    let format = match args.get(3).map(String::as_str) {
        Some("i420") => OutputFormat::I420,
        Some("jpeg") => OutputFormat::Jpeg,
        _ => OutputFormat::Nv21,
    };

    #[cfg(feature = "ffmpeg")]
    {
        use camera_replay::backend::ffmpeg::FfmpegBackend;

        if args.len() < 3 {
            eprintln!("usage: replay <video> <out-dir> [i420|nv21|jpeg]");
            return;
        }
        let backend = FfmpegBackend::new().expect("failed to initialize ffmpeg");
        run(backend, PathBuf::from(&args[1]), PathBuf::from(&args[2]), format);
    }

    #[cfg(not(feature = "ffmpeg"))]
    {
        use camera_replay::backend::raw::RawBackend;
        use camera_replay::{PackedLayout, Size};

        if args.len() < 6 {
            eprintln!("usage: replay <raw-nv21-file> <out-dir> <i420|nv21|jpeg> <width> <height>");
            return;
        }
        let width: u32 = args[4].parse().expect("width must be a number");
        let height: u32 = args[5].parse().expect("height must be a number");
        let backend = RawBackend::new(Size::new(width, height), PackedLayout::Nv21);
        run(backend, PathBuf::from(&args[1]), PathBuf::from(&args[2]), format);
    }
}
