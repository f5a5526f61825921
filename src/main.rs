//! `light-probe`: prints light estimates sampled from a camera or a still
//! image, the same way an AR session drives its light rig.
//!
//! ```text
//! light-probe [--image PATH] [--facing user|environment] [--interval-ms N]
//!             [--samples N] [--count N] [--snapshot PATH]
//! ```

use std::{path::PathBuf, time::Duration};

use anyhow::{Context, Result, anyhow, bail};
use ar_tracking_sync::{
    FacingMode, Frame,
    light::{DEFAULT_SAMPLE_COUNT, DEFAULT_UPDATE_INTERVAL, LightRig, LightSampler},
    pipeline::{FrameTaps, StillDevice, VideoDevice},
};
use crossbeam_channel::bounded;
use image::RgbaImage;

const STILL_FRAME_INTERVAL: Duration = Duration::from_millis(33);
const FRAME_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug)]
struct Args {
    image: Option<PathBuf>,
    facing: FacingMode,
    interval: Duration,
    samples: usize,
    count: usize,
    snapshot: Option<PathBuf>,
}

impl Args {
    fn parse() -> Result<Self> {
        let mut args = Self {
            image: None,
            facing: FacingMode::Environment,
            interval: DEFAULT_UPDATE_INTERVAL,
            samples: DEFAULT_SAMPLE_COUNT,
            count: 20,
            snapshot: None,
        };

        let mut iter = std::env::args().skip(1);
        while let Some(flag) = iter.next() {
            let mut value = || {
                iter.next()
                    .ok_or_else(|| anyhow!("missing value for {flag}"))
            };
            match flag.as_str() {
                "--image" => args.image = Some(value()?.into()),
                "--snapshot" => args.snapshot = Some(value()?.into()),
                "--facing" => {
                    args.facing = match value()?.as_str() {
                        "user" => FacingMode::User,
                        "environment" => FacingMode::Environment,
                        other => bail!("unknown facing mode: {other}"),
                    }
                }
                "--interval-ms" => {
                    let ms: u64 = value()?.parse().context("--interval-ms")?;
                    args.interval = Duration::from_millis(ms.max(1));
                }
                "--samples" => args.samples = value()?.parse().context("--samples")?,
                "--count" => args.count = value()?.parse().context("--count")?,
                other => bail!("unknown argument: {other}"),
            }
        }
        Ok(args)
    }
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse()?;

    match args.image.as_deref() {
        Some(path) => {
            let raster = image::open(path)
                .with_context(|| format!("failed to read {}", path.display()))?
                .to_rgba8();
            let (width, height) = raster.dimensions();
            let frame = Frame::new(raster.into_raw(), width, height);
            probe(StillDevice::new(frame, STILL_FRAME_INTERVAL), &args)
        }
        None => probe_camera(&args),
    }
}

#[cfg(feature = "camera-nokhwa")]
fn probe_camera(args: &Args) -> Result<()> {
    use ar_tracking_sync::pipeline::{NokhwaDevice, available_cameras};

    for camera in available_cameras()? {
        log::info!("found camera {:?}: {}", camera.index, camera.label);
    }
    probe(NokhwaDevice, args)
}

#[cfg(not(feature = "camera-nokhwa"))]
fn probe_camera(_args: &Args) -> Result<()> {
    bail!("built without camera support; pass --image PATH")
}

fn probe(mut device: impl VideoDevice, args: &Args) -> Result<()> {
    let (video, video_rx) = bounded(1);
    // Nothing tracks here; the tap only needs a live receiver.
    let (tracker, _tracker_rx) = bounded(1);
    let stream = device.acquire(args.facing, FrameTaps { video, tracker })?;

    let mut sampler = LightSampler::new(args.interval).with_sample_count(args.samples);
    let mut rig = LightRig::default();
    let mut latest: Option<Frame> = None;
    let mut reported = 0;

    sampler.start();
    while reported < args.count {
        let frame = video_rx
            .recv_timeout(FRAME_TIMEOUT)
            .context("camera stopped delivering frames")?;
        let frame = latest.insert(frame);
        if !sampler.due() {
            continue;
        }

        let estimate = sampler.estimate(frame);
        rig.apply(&estimate);
        reported += 1;
        log::info!(
            "#{reported} {}x{} ambient={:.3} directional={:.3} direction={:?} color={}",
            frame.width,
            frame.height,
            rig.ambient.intensity,
            rig.directional.intensity,
            estimate.direction,
            rig.ambient.color
        );
    }
    sampler.stop();
    stream.stop();

    if let (Some(path), Some(frame)) = (args.snapshot.as_ref(), latest) {
        let raster = RgbaImage::from_raw(frame.width, frame.height, frame.rgba)
            .ok_or_else(|| anyhow!("frame buffer does not match its size"))?;
        raster
            .save(path)
            .with_context(|| format!("failed to write {}", path.display()))?;
        log::info!("saved last frame to {}", path.display());
    }
    Ok(())
}
