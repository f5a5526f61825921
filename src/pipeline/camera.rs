use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use anyhow::{Result, anyhow};
use crossbeam_channel::Sender;

use crate::types::{FacingMode, Frame};

/// Where captured frames go. Each tap drops frames while its consumer is busy.
#[derive(Clone, Debug)]
pub struct FrameTaps {
    /// The session's view of the live video, read by the light sampler.
    pub video: Sender<Frame>,
    /// Input of the tracking worker.
    pub tracker: Sender<Frame>,
}

impl FrameTaps {
    fn publish(&self, frame: Frame) {
        let _ = self.video.try_send(frame.clone());
        let _ = self.tracker.try_send(frame);
    }
}

/// A video device that can be (re)acquired for a facing direction.
pub trait VideoDevice {
    fn acquire(&mut self, facing: FacingMode, taps: FrameTaps) -> Result<CameraStream>;
}

#[derive(Debug)]
pub struct CameraStream {
    stop: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<()>>,
}

impl CameraStream {
    pub fn stop(mut self) {
        self.halt();
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    fn halt(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for CameraStream {
    fn drop(&mut self) {
        self.halt();
    }
}

/// Open a frame reader on a fresh capture thread and pump it until stopped or
/// until it returns `None`. Failed reads are logged and skipped.
///
/// The reader is built on the capture thread itself, so it need not be `Send`.
pub fn spawn_capture<M, F>(taps: FrameTaps, open_reader: M) -> CameraStream
where
    M: FnOnce() -> Result<F> + Send + 'static,
    F: FnMut() -> Option<Result<Frame>>,
{
    let stop = Arc::new(AtomicBool::new(false));
    let stop_flag = stop.clone();

    let handle = thread::spawn(move || {
        let mut next_frame = match open_reader() {
            Ok(reader) => reader,
            Err(err) => {
                log::error!("failed to open camera: {err:?}");
                return;
            }
        };

        while !stop_flag.load(Ordering::Relaxed) {
            match next_frame() {
                Some(Ok(frame)) => taps.publish(frame),
                Some(Err(err)) => log::warn!("camera frame read failed: {err:?}"),
                None => break,
            }
        }
    });

    CameraStream {
        stop,
        handle: Some(handle),
    }
}

/// Replays a fixed frame at a steady rate. Useful without camera hardware and
/// in tests; individual facing modes can be marked unavailable.
#[derive(Clone, Debug)]
pub struct StillDevice {
    frame: Frame,
    interval: Duration,
    unavailable: Vec<FacingMode>,
    acquisitions: Arc<AtomicUsize>,
}

impl StillDevice {
    pub fn new(frame: Frame, interval: Duration) -> Self {
        Self {
            frame,
            interval,
            unavailable: Vec::new(),
            acquisitions: Arc::default(),
        }
    }

    pub fn without(mut self, facing: FacingMode) -> Self {
        self.unavailable.push(facing);
        self
    }

    /// Successful acquisitions so far, shared across clones.
    pub fn acquisitions(&self) -> usize {
        self.acquisitions.load(Ordering::SeqCst)
    }
}

impl VideoDevice for StillDevice {
    fn acquire(&mut self, facing: FacingMode, taps: FrameTaps) -> Result<CameraStream> {
        if self.unavailable.contains(&facing) {
            return Err(anyhow!("no {} camera present", facing.label()));
        }
        self.acquisitions.fetch_add(1, Ordering::SeqCst);

        let frame = self.frame.clone();
        let interval = self.interval;
        Ok(spawn_capture(taps, move || {
            Ok(move || {
                thread::sleep(interval);
                let mut next = frame.clone();
                next.timestamp = Instant::now();
                Some(Ok(next))
            })
        }))
    }
}

#[cfg(feature = "camera-nokhwa")]
pub use self::nokhwa_device::{CameraDevice, NokhwaDevice, available_cameras};

#[cfg(feature = "camera-nokhwa")]
mod nokhwa_device {
    use anyhow::{Result, anyhow};
    use nokhwa::{
        Camera,
        pixel_format::RgbFormat,
        query,
        utils::{ApiBackend, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType},
    };

    use super::{CameraStream, FrameTaps, VideoDevice, spawn_capture};
    use crate::{
        pipeline::rgba_converter::{self, PixelLayout},
        types::{FacingMode, Frame},
    };

    // Built-in cameras on some platforms reject YUYV even when it is
    // advertised, so raw RGB variants come first.
    const PREFERRED_PIXEL_FORMATS: &[FrameFormat] = &[
        FrameFormat::RAWRGB,
        FrameFormat::RAWBGR,
        FrameFormat::GRAY,
        FrameFormat::YUYV,
        FrameFormat::NV12,
        FrameFormat::MJPEG,
    ];

    fn requested_formats() -> [RequestedFormat<'static>; 3] {
        [
            RequestedFormat::with_formats(
                RequestedFormatType::AbsoluteHighestFrameRate,
                PREFERRED_PIXEL_FORMATS,
            ),
            RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestFrameRate),
            RequestedFormat::new::<RgbFormat>(RequestedFormatType::None),
        ]
    }

    #[derive(Clone, Debug)]
    pub struct CameraDevice {
        pub index: CameraIndex,
        pub label: String,
    }

    pub fn available_cameras() -> Result<Vec<CameraDevice>> {
        let cameras = query(ApiBackend::Auto)?;
        Ok(cameras
            .into_iter()
            .map(|info| CameraDevice {
                index: info.index().clone(),
                label: info.human_name(),
            })
            .collect())
    }

    /// Picks a camera for the facing mode. Desktop APIs do not report facing,
    /// so labels are matched first and list order breaks ties: the first
    /// camera is taken as the user-facing one, the last as the environment one.
    pub(crate) fn select_camera(
        cameras: &[CameraDevice],
        facing: FacingMode,
    ) -> Option<&CameraDevice> {
        let hints: &[&str] = match facing {
            FacingMode::User => &["front", "user", "facetime", "integrated"],
            FacingMode::Environment => &["back", "rear", "environment", "world"],
        };
        cameras
            .iter()
            .find(|c| {
                let label = c.label.to_lowercase();
                hints.iter().any(|h| label.contains(h))
            })
            .or_else(|| match facing {
                FacingMode::User => cameras.first(),
                FacingMode::Environment => cameras.last(),
            })
    }

    fn build_camera(index: CameraIndex) -> Result<Camera> {
        let mut last_err = None;

        for requested in requested_formats() {
            match Camera::new(index.clone(), requested) {
                Ok(mut camera) => match camera.open_stream() {
                    Ok(()) => return Ok(camera),
                    Err(err) => last_err = Some(err.into()),
                },
                Err(err) => last_err = Some(err.into()),
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow!("failed to open camera with any supported format")))
    }

    fn pixel_layout(format: FrameFormat) -> PixelLayout {
        match format {
            FrameFormat::NV12 => PixelLayout::Nv12,
            FrameFormat::YUYV => PixelLayout::Yuyv,
            FrameFormat::MJPEG => PixelLayout::Mjpeg,
            FrameFormat::RAWRGB => PixelLayout::Rgb,
            FrameFormat::RAWBGR => PixelLayout::Bgr,
            FrameFormat::GRAY => PixelLayout::Gray,
        }
    }

    #[derive(Debug, Default)]
    pub struct NokhwaDevice;

    impl VideoDevice for NokhwaDevice {
        fn acquire(&mut self, facing: FacingMode, taps: FrameTaps) -> Result<CameraStream> {
            let cameras = available_cameras()?;
            let device = select_camera(&cameras, facing)
                .cloned()
                .ok_or_else(|| anyhow!("no camera found"))?;
            log::info!("acquiring {} camera: {}", facing.label(), device.label);

            // Fail fast before spawning the capture thread.
            build_camera(device.index.clone())?;

            Ok(spawn_capture(taps, move || {
                let mut camera = build_camera(device.index)?;
                let mut rgba = Vec::new();
                Ok(move || {
                    let frame = match camera.frame() {
                        Ok(frame) => frame,
                        Err(err) => return Some(Err(err.into())),
                    };
                    let resolution = frame.resolution();
                    let size = rgba_converter::convert_into(
                        pixel_layout(frame.source_frame_format()),
                        frame.buffer(),
                        resolution.width_x,
                        resolution.height_y,
                        &mut rgba,
                    );
                    Some(size.map(|(width, height)| Frame::new(rgba.clone(), width, height)))
                })
            }))
        }
    }

}

#[cfg(test)]
mod tests {
    use crossbeam_channel::bounded;

    use super::*;

    #[test]
    fn still_device_fans_out_to_both_taps() {
        let (video_tx, video_rx) = bounded(1);
        let (tracker_tx, tracker_rx) = bounded(1);
        let mut device = StillDevice::new(Frame::solid(2, 2, [1, 2, 3]), Duration::from_millis(5));
        let stream = device
            .acquire(
                FacingMode::User,
                FrameTaps {
                    video: video_tx,
                    tracker: tracker_tx,
                },
            )
            .expect("acquire");

        let frame = video_rx
            .recv_timeout(Duration::from_secs(1))
            .expect("video frame");
        assert_eq!(frame.dimensions(), (2, 2));
        assert!(tracker_rx.recv_timeout(Duration::from_secs(1)).is_ok());
        assert!(stream.is_running());
        stream.stop();
        assert_eq!(device.acquisitions(), 1);
    }

    #[test]
    fn unavailable_facing_fails_acquisition() {
        let (video, _v) = bounded(1);
        let (tracker, _t) = bounded(1);
        let mut device = StillDevice::new(Frame::solid(1, 1, [0, 0, 0]), Duration::from_millis(5))
            .without(FacingMode::Environment);
        assert!(device
            .acquire(FacingMode::Environment, FrameTaps { video, tracker })
            .is_err());
        assert_eq!(device.acquisitions(), 0);
    }
}
