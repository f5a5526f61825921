//! Session orchestration: device, tracking worker, light sampling and the
//! scene store they feed.
//!
//! The host owns the session on its render thread and calls [`ArSession::pump`]
//! once per frame before reading the store. Tracking results produced since
//! the previous pump are applied in arrival order, so the store is complete
//! for the frame about to be drawn.

use crossbeam_channel::{Receiver, Sender, bounded, unbounded};

use crate::{
    anchor::{AnchorId, EdgeCallbacks},
    config::{SessionCallbacks, SessionConfig},
    error::{Result, TrackingError},
    face_mesh::FaceTopology,
    light::LightSampler,
    pipeline::{CameraStream, FrameTaps, VideoDevice},
    projection::{ProjectionMatrix, derive_camera_params},
    store::SceneStore,
    tracker::{Backend, InputSize, TrackerEvent, TrackerWorker, start_worker},
    types::{FacingMode, Frame, TargetDescriptor},
};

pub struct ArSession<D: VideoDevice> {
    config: SessionConfig,
    callbacks: SessionCallbacks,
    device: D,
    backend: Option<Backend>,
    face_mode: bool,
    facing: FacingMode,
    store: SceneStore,
    stream: Option<CameraStream>,
    video_tx: Sender<Frame>,
    video_rx: Receiver<Frame>,
    tracker_tx: Sender<Frame>,
    tracker_rx: Receiver<Frame>,
    event_tx: Sender<TrackerEvent>,
    event_rx: Receiver<TrackerEvent>,
    latest_frame: Option<Frame>,
    input: Option<InputSize>,
    projection: Option<ProjectionMatrix>,
    worker: Option<TrackerWorker>,
    light: LightSampler,
}

impl<D: VideoDevice> ArSession<D> {
    pub fn new(
        config: SessionConfig,
        device: D,
        backend: Backend,
        callbacks: SessionCallbacks,
    ) -> Self {
        let face_mode = matches!(backend, Backend::Face(_));
        let facing = config.facing.unwrap_or(if face_mode {
            FacingMode::User
        } else {
            FacingMode::Environment
        });
        let light = LightSampler::new(config.light.update_interval)
            .with_sample_count(config.light.sample_count);

        let (video_tx, video_rx) = bounded(1);
        let (tracker_tx, tracker_rx) = bounded(1);
        let (event_tx, event_rx) = unbounded();

        Self {
            config,
            callbacks,
            device,
            backend: Some(backend),
            face_mode,
            facing,
            store: SceneStore::new(),
            stream: None,
            video_tx,
            video_rx,
            tracker_tx,
            tracker_rx,
            event_tx,
            event_rx,
            latest_frame: None,
            input: None,
            projection: None,
            worker: None,
            light,
        }
    }

    pub fn register_anchor(&mut self, target: usize, callbacks: EdgeCallbacks) -> AnchorId {
        self.store.register_anchor(target, callbacks)
    }

    pub fn attach_face_surface(&mut self, topology: FaceTopology, callbacks: EdgeCallbacks) {
        self.store.attach_face_surface(topology, callbacks);
    }

    pub fn store(&self) -> &SceneStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut SceneStore {
        &mut self.store
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn facing(&self) -> FacingMode {
        self.facing
    }

    pub fn targets(&self) -> &[TargetDescriptor] {
        self.store.targets()
    }

    /// Whether the device has delivered at least one frame.
    pub fn is_ready(&self) -> bool {
        self.latest_frame.is_some()
    }

    pub fn is_tracking(&self) -> bool {
        self.worker.as_ref().is_some_and(TrackerWorker::is_processing)
    }

    pub fn latest_frame(&self) -> Option<&Frame> {
        self.latest_frame.as_ref()
    }

    /// Acquire the device, start light estimation if enabled, and start
    /// tracking when `autoplay` is set.
    pub fn start(&mut self) -> Result<()> {
        self.open_device()?;
        if self.config.light.enabled {
            self.start_light_estimation();
        }
        if self.config.autoplay {
            self.start_tracking()?;
        }
        Ok(())
    }

    pub fn open_device(&mut self) -> Result<()> {
        let result = self.acquire_device();
        self.report(result)
    }

    /// Set the backend up for the current input and begin processing frames.
    /// A no-op while already tracking.
    pub fn start_tracking(&mut self) -> Result<()> {
        if self.is_tracking() {
            return Ok(());
        }
        // Clear out a worker that exited since the last pump.
        self.stop_tracking();
        let result = self.begin_tracking();
        self.report(result)
    }

    /// Cancel frame processing and drive everything tracked to lost.
    /// Stopping twice is a no-op.
    pub fn stop_tracking(&mut self) {
        let Some(mut worker) = self.worker.take() else {
            return;
        };
        match worker.stop() {
            Some(backend) => self.backend = Some(backend),
            None => log::error!("tracking backend was lost with its worker"),
        }
        // Results still queued belong to the stopped run.
        let dropped = self.event_rx.try_iter().count();
        if dropped > 0 {
            log::debug!("discarded {dropped} tracking events after stop");
        }
        self.store.reset_tracking();
        log::info!("tracking stopped");
    }

    /// Flip the facing mode with a full stop / re-acquire / restart cycle.
    /// Tracking resumes only if it was running. When re-acquisition fails the
    /// session is left stopped and the error is reported.
    pub fn switch_camera(&mut self) -> Result<()> {
        let was_tracking = self.is_tracking();
        self.stop_tracking();
        self.release_device();
        self.facing = self.facing.flipped();
        log::info!("switching to {} camera", self.facing.label());

        let result = self.acquire_device().and_then(|()| {
            if was_tracking {
                self.begin_tracking()
            } else {
                Ok(())
            }
        });
        self.report(result)
    }

    pub fn start_light_estimation(&mut self) {
        self.light.start();
        self.store.install_light_rig();
    }

    pub fn stop_light_estimation(&mut self) {
        self.light.stop();
        self.store.remove_light_rig();
    }

    /// Apply everything that happened since the previous call. Call once per
    /// render frame, before reading the store.
    pub fn pump(&mut self) {
        while let Ok(frame) = self.video_rx.try_recv() {
            self.latest_frame = Some(frame);
        }
        self.refresh_input_size();

        while let Ok(event) = self.event_rx.try_recv() {
            self.store.apply(&event);
        }

        if self.worker.as_ref().is_some_and(|w| !w.is_processing()) {
            log::warn!("tracking worker exited unexpectedly");
            self.stop_tracking();
        }

        if self.light.due() {
            if let Some(frame) = self.latest_frame.as_ref() {
                let estimate = self.light.estimate(frame);
                log::debug!(
                    "light estimate ambient={:.2} directional={:.2} color={}",
                    estimate.ambient_intensity,
                    estimate.directional_intensity,
                    estimate.color
                );
                self.store.apply_light(estimate);
                if let Some(on_light_update) = self.callbacks.on_light_update.as_mut() {
                    on_light_update(&estimate);
                }
            }
        }
    }

    /// Stop tracking, cancel the light timer, remove the light rig and
    /// release the device.
    pub fn shutdown(&mut self) {
        self.stop_tracking();
        self.stop_light_estimation();
        self.release_device();
    }

    fn acquire_device(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }
        let taps = FrameTaps {
            video: self.video_tx.clone(),
            tracker: self.tracker_tx.clone(),
        };
        let stream = self
            .device
            .acquire(self.facing, taps)
            .map_err(|source| TrackingError::Device {
                facing: self.facing,
                source,
            })?;
        log::info!("{} camera acquired", self.facing.label());
        self.stream = Some(stream);
        Ok(())
    }

    fn release_device(&mut self) {
        if let Some(stream) = self.stream.take() {
            stream.stop();
        }
        // Frames from the released device must not reach the next run.
        while self.video_rx.try_recv().is_ok() {}
        while self.tracker_rx.try_recv().is_ok() {}
        self.latest_frame = None;
        self.input = None;
    }

    fn wait_for_frame(&mut self) -> Result<Frame> {
        self.acquire_device()?;
        if let Some(frame) = self.latest_frame.as_ref() {
            return Ok(frame.clone());
        }
        let frame = self
            .video_rx
            .recv_timeout(self.config.ready_timeout)
            .map_err(|_| TrackingError::NotReady(self.config.ready_timeout))?;
        self.latest_frame = Some(frame.clone());
        Ok(frame)
    }

    fn begin_tracking(&mut self) -> Result<()> {
        let first = self.wait_for_frame()?;
        let mut backend = self.backend.take().ok_or(TrackingError::BackendLost)?;

        if let Err(err) = self.setup_backend(&mut backend, &first) {
            self.backend = Some(backend);
            return Err(err);
        }

        self.worker = Some(start_worker(
            backend,
            self.tracker_rx.clone(),
            self.event_tx.clone(),
        ));
        log::info!(
            "tracking started ({} camera, {}x{})",
            self.facing.label(),
            first.width,
            first.height
        );
        if let Some(on_ready) = self.callbacks.on_ready.as_mut() {
            on_ready();
        }
        Ok(())
    }

    fn setup_backend(&mut self, backend: &mut Backend, first: &Frame) -> Result<()> {
        let input = InputSize {
            width: first.width,
            height: first.height,
        };
        let mirrored = self.is_mirrored();

        match backend {
            Backend::ImageTargets { engine, source } => {
                let dimensions = engine
                    .add_targets(source, &self.config.tracker, input)
                    .map_err(TrackingError::BackendSetup)?;
                let targets = dimensions
                    .into_iter()
                    .enumerate()
                    .map(|(index, [width, height])| TargetDescriptor {
                        index,
                        width,
                        height,
                    })
                    .collect::<Vec<_>>();
                log::info!("registered {} image targets", targets.len());
                self.store.set_targets(targets);

                let projection = engine.projection_matrix();
                self.store
                    .set_camera_params(derive_camera_params(&projection, input.aspect()));
                self.projection = Some(projection);
            }
            Backend::Face(engine) => {
                engine
                    .setup(mirrored, &self.config.tracker, input)
                    .map_err(TrackingError::BackendSetup)?;
                self.store.set_camera_params(engine.camera_params());
            }
        }

        backend
            .warm_up(first)
            .map_err(TrackingError::BackendSetup)?;
        self.store.set_mirrored(mirrored);
        self.input = Some(input);
        Ok(())
    }

    /// Image-target camera aspect follows the live input size; face-mode
    /// parameters come from the backend as-is.
    fn refresh_input_size(&mut self) {
        if self.face_mode {
            return;
        }
        let (Some(frame), Some(projection)) = (self.latest_frame.as_ref(), self.projection) else {
            return;
        };
        let current = InputSize {
            width: frame.width,
            height: frame.height,
        };
        if self.input != Some(current) {
            self.store
                .set_camera_params(derive_camera_params(&projection, current.aspect()));
            self.input = Some(current);
        }
    }

    fn is_mirrored(&self) -> bool {
        self.facing == FacingMode::User && self.config.flip_user_camera
    }

    fn report<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            log::error!("{err}");
            if let Some(on_error) = self.callbacks.on_error.as_mut() {
                on_error(err);
            }
        }
        result
    }
}

impl<D: VideoDevice> Drop for ArSession<D> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
