//! Tracking backend contract and the worker thread that drives it.
//!
//! Detection and pose solving live in the backend; this module only feeds it
//! frames and forwards its per-frame output as [`TrackerEvent`]s.

use std::{
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

use anyhow::Result;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use crate::{
    config::TrackerOptions,
    projection::ProjectionMatrix,
    types::{CameraParams, FaceEstimate, Frame},
};

// Upper bound on how long a stop request waits for the worker to notice it.
const FRAME_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// One pose update for an image target. `world_matrix` is column-major.
#[derive(Clone, Debug, PartialEq)]
pub struct TargetUpdate {
    pub target_index: usize,
    pub world_matrix: Option<[f32; 16]>,
}

#[derive(Clone, Debug)]
pub enum TrackerEvent {
    UpdateMatrix(TargetUpdate),
    Face {
        has_face: bool,
        estimate: Option<FaceEstimate>,
    },
}

/// Input frame size handed to the backend at setup.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InputSize {
    pub width: u32,
    pub height: u32,
}

impl InputSize {
    pub fn aspect(&self) -> f32 {
        if self.height == 0 {
            1.0
        } else {
            self.width as f32 / self.height as f32
        }
    }
}

pub trait ImageTargetEngine: Send + 'static {
    /// Load and register the targets in `source`; returns `[width, height]`
    /// per target in index order.
    fn add_targets(
        &mut self,
        source: &Path,
        options: &TrackerOptions,
        input: InputSize,
    ) -> Result<Vec<[f32; 2]>>;

    fn projection_matrix(&self) -> ProjectionMatrix;

    /// Run once on the first frame before processing begins.
    fn warm_up(&mut self, _frame: &Frame) -> Result<()> {
        Ok(())
    }

    fn track(&mut self, frame: &Frame) -> Result<Vec<TargetUpdate>>;
}

pub trait FaceEngine: Send + 'static {
    fn setup(&mut self, flip: bool, options: &TrackerOptions, input: InputSize) -> Result<()>;

    fn camera_params(&self) -> CameraParams;

    fn warm_up(&mut self, _frame: &Frame) -> Result<()> {
        Ok(())
    }

    /// `None` when no face is present in the frame.
    fn estimate(&mut self, frame: &Frame) -> Result<Option<FaceEstimate>>;
}

pub enum Backend {
    ImageTargets {
        engine: Box<dyn ImageTargetEngine>,
        source: PathBuf,
    },
    Face(Box<dyn FaceEngine>),
}

impl Backend {
    pub fn image_targets(engine: impl ImageTargetEngine, source: impl Into<PathBuf>) -> Self {
        Backend::ImageTargets {
            engine: Box::new(engine),
            source: source.into(),
        }
    }

    pub fn face(engine: impl FaceEngine) -> Self {
        Backend::Face(Box::new(engine))
    }

    pub fn label(&self) -> &'static str {
        match self {
            Backend::ImageTargets { .. } => "image-targets",
            Backend::Face(_) => "face",
        }
    }

    pub(crate) fn warm_up(&mut self, frame: &Frame) -> Result<()> {
        match self {
            Backend::ImageTargets { engine, .. } => engine.warm_up(frame),
            Backend::Face(engine) => engine.warm_up(frame),
        }
    }

    fn process(&mut self, frame: &Frame, out: &mut Vec<TrackerEvent>) -> Result<()> {
        match self {
            Backend::ImageTargets { engine, .. } => {
                out.extend(engine.track(frame)?.into_iter().map(TrackerEvent::UpdateMatrix));
            }
            Backend::Face(engine) => {
                let estimate = engine.estimate(frame)?;
                out.push(TrackerEvent::Face {
                    has_face: estimate.is_some(),
                    estimate,
                });
            }
        }
        Ok(())
    }
}

/// Handle to the running frame-processing loop. The backend is handed back
/// when the loop is stopped.
#[derive(Debug)]
pub struct TrackerWorker {
    stop: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<Backend>>,
}

impl TrackerWorker {
    /// Whether the loop is still processing frames.
    pub fn is_processing(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop and join the loop. Returns the backend unless the worker panicked
    /// or was already stopped.
    pub fn stop(&mut self) -> Option<Backend> {
        self.stop.store(true, Ordering::SeqCst);
        let handle = self.handle.take()?;
        match handle.join() {
            Ok(backend) => Some(backend),
            Err(_) => {
                log::error!("tracking worker panicked");
                None
            }
        }
    }
}

impl Drop for TrackerWorker {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

pub fn start_worker(
    mut backend: Backend,
    frame_rx: Receiver<Frame>,
    event_tx: Sender<TrackerEvent>,
) -> TrackerWorker {
    log::info!("starting {} tracking worker", backend.label());

    let stop = Arc::new(AtomicBool::new(false));
    let stop_flag = stop.clone();

    let handle = thread::spawn(move || {
        let mut events = Vec::new();
        while !stop_flag.load(Ordering::Relaxed) {
            let Some(frame) = recv_latest_frame(&frame_rx) else {
                break;
            };
            let Some(frame) = frame else {
                continue;
            };

            events.clear();
            if let Err(err) = backend.process(&frame, &mut events) {
                log::warn!("tracking backend failed on frame: {err:?}");
                continue;
            }
            // Stop requests win over late results.
            if stop_flag.load(Ordering::Relaxed) {
                break;
            }
            for event in events.drain(..) {
                if event_tx.send(event).is_err() {
                    return backend;
                }
            }
        }
        backend
    });

    TrackerWorker {
        stop,
        handle: Some(handle),
    }
}

/// `None` when the source is gone, `Some(None)` when no frame arrived in time.
fn recv_latest_frame(frame_rx: &Receiver<Frame>) -> Option<Option<Frame>> {
    let mut frame = match frame_rx.recv_timeout(FRAME_POLL_INTERVAL) {
        Ok(frame) => frame,
        Err(RecvTimeoutError::Timeout) => return Some(None),
        Err(RecvTimeoutError::Disconnected) => return None,
    };
    // Drop stale frames if the backend fell behind.
    while let Ok(newer) = frame_rx.try_recv() {
        frame = newer;
    }
    Some(Some(frame))
}

#[cfg(test)]
mod tests {
    use crossbeam_channel::{bounded, unbounded};

    use super::*;

    struct CountingFaces {
        seen: usize,
    }

    impl FaceEngine for CountingFaces {
        fn setup(&mut self, _: bool, _: &TrackerOptions, _: InputSize) -> Result<()> {
            Ok(())
        }

        fn camera_params(&self) -> CameraParams {
            CameraParams::default()
        }

        fn estimate(&mut self, _frame: &Frame) -> Result<Option<FaceEstimate>> {
            self.seen += 1;
            if self.seen == 2 {
                anyhow::bail!("transient failure");
            }
            Ok(None)
        }
    }

    #[test]
    fn worker_forwards_events_and_returns_backend() {
        let (frame_tx, frame_rx) = bounded(1);
        let (event_tx, event_rx) = unbounded();
        let mut worker = start_worker(
            Backend::face(CountingFaces { seen: 0 }),
            frame_rx,
            event_tx,
        );

        for _ in 0..3 {
            frame_tx.send(Frame::solid(4, 4, [0, 0, 0])).expect("send frame");
            std::thread::sleep(Duration::from_millis(20));
        }
        std::thread::sleep(Duration::from_millis(50));
        assert!(worker.is_processing());

        let backend = worker.stop();
        assert!(matches!(backend, Some(Backend::Face(_))));
        assert!(!worker.is_processing());
        assert!(worker.stop().is_none());

        // The failing frame produces no event.
        let events: Vec<_> = event_rx.try_iter().collect();
        assert_eq!(events.len(), 2);
        assert!(events
            .iter()
            .all(|e| matches!(e, TrackerEvent::Face { has_face: false, estimate: None })));
    }

    #[test]
    fn worker_exits_when_frames_stop() {
        let (frame_tx, frame_rx) = bounded::<Frame>(1);
        let (event_tx, _event_rx) = unbounded();
        let mut worker = start_worker(
            Backend::face(CountingFaces { seen: 0 }),
            frame_rx,
            event_tx,
        );
        drop(frame_tx);
        std::thread::sleep(Duration::from_millis(100));
        assert!(!worker.is_processing());
        assert!(worker.stop().is_some());
    }

    #[test]
    fn input_aspect_guards_zero_height() {
        assert_eq!(InputSize { width: 4, height: 0 }.aspect(), 1.0);
        assert_eq!(
            InputSize {
                width: 640,
                height: 480
            }
            .aspect(),
            640.0 / 480.0
        );
    }
}
