use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use image::ImageReader;
use tiny_skia::{ColorU8, Pixmap};

use crate::frames::FrameStore;

struct LoadOutcome {
    index: usize,
    result: Result<Pixmap>,
}

/// Issues one load request per frame across a small pool of worker threads
/// and aggregates their completions on the owning thread. Completion order is
/// unspecified; failures count toward readiness just like successes.
pub struct Preloader {
    receiver: Receiver<LoadOutcome>,
    workers: Vec<JoinHandle<()>>,
    cancel: Arc<AtomicBool>,
    total: usize,
    completed: usize,
    ready: bool,
    started_at: Instant,
    timeout: Option<Duration>,
}

impl Preloader {
    pub fn spawn(store: &FrameStore, workers: usize, timeout: Option<Duration>) -> Result<Self> {
        let total = store.frame_count();
        let paths = (0..total)
            .map(|index| store.frame_path(index))
            .collect::<Result<Vec<_>>>()?;

        let worker_count = workers.max(1).min(total.max(1));
        let (sender, receiver) = mpsc::channel();
        let cancel = Arc::new(AtomicBool::new(false));

        let mut handles = Vec::with_capacity(worker_count);
        for worker in 0..worker_count {
            // Strided assignment; each index is requested exactly once.
            let jobs: Vec<(usize, PathBuf)> = paths
                .iter()
                .enumerate()
                .skip(worker)
                .step_by(worker_count)
                .map(|(index, path)| (index, path.clone()))
                .collect();
            let handle = spawn_worker(worker, jobs, sender.clone(), cancel.clone())?;
            handles.push(handle);
        }

        Ok(Self {
            receiver,
            workers: handles,
            cancel,
            total,
            completed: 0,
            ready: false,
            started_at: Instant::now(),
            timeout,
        })
    }

    /// Drains completed loads into the store. Call once per tick from the
    /// thread that owns the store. Returns true on the single call where
    /// readiness latches.
    pub fn pump(&mut self, store: &mut FrameStore) -> bool {
        loop {
            match self.receiver.try_recv() {
                Ok(outcome) => self.apply(store, outcome),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }

        if !self.ready {
            if let Some(timeout) = self.timeout {
                if self.started_at.elapsed() >= timeout {
                    self.abandon_pending(store, timeout);
                }
            }
        }

        if !self.ready && self.completed == self.total {
            self.ready = true;
            let counts = store.counts();
            eprintln!(
                "[SSV] preload: {} frame(s) resolved ({} loaded, {} failed)",
                self.total, counts.loaded, counts.failed
            );
            return true;
        }
        false
    }

    fn apply(&mut self, store: &mut FrameStore, outcome: LoadOutcome) {
        let applied = match outcome.result {
            Ok(image) => store.mark_loaded(outcome.index, image),
            Err(error) => {
                let path = store
                    .frame_path(outcome.index)
                    .map(|path| path.display().to_string())
                    .unwrap_or_else(|_| "<unknown>".to_owned());
                eprintln!(
                    "[SSV] preload: frame {} failed ({path}): {error:#}",
                    outcome.index
                );
                store.mark_failed(outcome.index)
            }
        };
        // Each asset settles exactly once; late reports after a timeout
        // sweep must not bump the counter twice.
        if applied {
            self.completed += 1;
        }
    }

    fn abandon_pending(&mut self, store: &mut FrameStore, timeout: Duration) {
        let pending = store.pending_indices();
        if pending.is_empty() {
            return;
        }
        for index in &pending {
            if store.mark_failed(*index) {
                self.completed += 1;
            }
        }
        eprintln!(
            "[SSV] preload: timed out after {:.1}s; abandoned {} pending frame(s)",
            timeout.as_secs_f32(),
            pending.len()
        );
    }

    pub fn total(&self) -> usize {
        self.total
    }

    /// Successes plus failures; monotone from 0 to total.
    pub fn completed(&self) -> usize {
        self.completed
    }

    pub fn ready(&self) -> bool {
        self.ready
    }

    /// Loading indicator value: floor(completed / total * 100).
    pub fn percent(&self) -> u32 {
        if self.total == 0 {
            return 100;
        }
        (self.completed * 100 / self.total) as u32
    }

    /// Stops workers and joins them. Idempotent; also invoked on drop.
    pub fn shutdown(&mut self) {
        self.cancel.store(true, Ordering::Relaxed);
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                eprintln!("[SSV] preload: worker thread panicked");
            }
        }
    }
}

impl Drop for Preloader {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn spawn_worker(
    worker: usize,
    jobs: Vec<(usize, PathBuf)>,
    sender: Sender<LoadOutcome>,
    cancel: Arc<AtomicBool>,
) -> Result<JoinHandle<()>> {
    thread::Builder::new()
        .name(format!("ssv-preload-{worker}"))
        .spawn(move || {
            for (index, path) in jobs {
                if cancel.load(Ordering::Relaxed) {
                    break;
                }
                let result = decode_frame(&path);
                if sender.send(LoadOutcome { index, result }).is_err() {
                    break;
                }
            }
        })
        .context("failed to spawn preload worker")
}

/// Decodes an image file into a premultiplied RGBA pixmap.
fn decode_frame(path: &Path) -> Result<Pixmap> {
    let decoded = ImageReader::open(path)
        .with_context(|| format!("failed to open {}", path.display()))?
        .decode()
        .with_context(|| format!("failed to decode {}", path.display()))?;
    let rgba = decoded.to_rgba8();
    let (width, height) = rgba.dimensions();

    let mut pixmap = Pixmap::new(width, height)
        .ok_or_else(|| anyhow!("image {} has zero dimensions", path.display()))?;
    for (dst, src) in pixmap.data_mut().chunks_exact_mut(4).zip(rgba.pixels()) {
        let [r, g, b, a] = src.0;
        let premultiplied = ColorU8::from_rgba(r, g, b, a).premultiply();
        dst[0] = premultiplied.red();
        dst[1] = premultiplied.green();
        dst[2] = premultiplied.blue();
        dst[3] = premultiplied.alpha();
    }
    Ok(pixmap)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SequenceSettings;
    use std::fs;

    fn write_png(path: &Path, width: u32, height: u32) {
        let mut buffer = image::RgbaImage::new(width, height);
        for pixel in buffer.pixels_mut() {
            *pixel = image::Rgba([200, 120, 40, 255]);
        }
        buffer.save(path).expect("test frame should save");
    }

    fn settings(count: usize) -> SequenceSettings {
        SequenceSettings {
            prefix: "frame-".to_owned(),
            extension: "png".to_owned(),
            frame_count: count,
        }
    }

    fn settle(preloader: &mut Preloader, store: &mut FrameStore) {
        let deadline = Instant::now() + Duration::from_secs(30);
        while !preloader.ready() {
            preloader.pump(store);
            assert!(Instant::now() < deadline, "preload did not settle in time");
            thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn completes_with_all_frames_present() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut store = FrameStore::new(dir.path(), settings(6)).expect("store");
        for index in 0..6 {
            write_png(&store.frame_path(index).expect("path"), 3, 3);
        }

        let mut preloader = Preloader::spawn(&store, 3, None).expect("spawn");
        settle(&mut preloader, &mut store);

        assert_eq!(preloader.completed(), 6);
        assert_eq!(preloader.percent(), 100);
        assert_eq!(store.counts().loaded, 6);
        for index in 0..6 {
            assert!(store.is_drawable(index));
        }
    }

    #[test]
    fn missing_frames_fail_without_blocking_readiness() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut store = FrameStore::new(dir.path(), settings(5)).expect("store");
        for index in 0..5 {
            if index == 2 {
                continue;
            }
            write_png(&store.frame_path(index).expect("path"), 3, 3);
        }

        let mut preloader = Preloader::spawn(&store, 2, None).expect("spawn");
        settle(&mut preloader, &mut store);

        assert_eq!(preloader.completed(), 5);
        let counts = store.counts();
        assert_eq!(counts.loaded, 4);
        assert_eq!(counts.failed, 1);
        assert!(!store.is_drawable(2));
    }

    #[test]
    fn corrupt_frames_count_as_failed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut store = FrameStore::new(dir.path(), settings(3)).expect("store");
        write_png(&store.frame_path(0).expect("path"), 3, 3);
        write_png(&store.frame_path(1).expect("path"), 3, 3);
        fs::write(store.frame_path(2).expect("path"), b"not an image").expect("write");

        let mut preloader = Preloader::spawn(&store, 2, None).expect("spawn");
        settle(&mut preloader, &mut store);

        assert_eq!(store.counts().failed, 1);
        assert!(!store.is_drawable(2));
    }

    #[test]
    fn percent_is_floored_and_monotone() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut store = FrameStore::new(dir.path(), settings(7)).expect("store");
        for index in 0..7 {
            write_png(&store.frame_path(index).expect("path"), 2, 2);
        }

        let mut preloader = Preloader::spawn(&store, 2, None).expect("spawn");
        let mut last_percent = 0;
        let deadline = Instant::now() + Duration::from_secs(30);
        while !preloader.ready() {
            preloader.pump(&mut store);
            let percent = preloader.percent();
            assert!(percent >= last_percent, "percent must not decrease");
            assert!(percent <= 100);
            last_percent = percent;
            assert!(Instant::now() < deadline, "preload did not settle in time");
        }
        assert_eq!(preloader.percent(), 100);
    }
}
