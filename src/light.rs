//! Cheap ambient light estimation from sampled video pixels.
//!
//! A fixed number of pixels is read at a constant stride from the current
//! frame; their mean color and perceived brightness drive the scene lights.
//! This is a heuristic, not a light probe.

use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, tick};
use image::RgbaImage;

use crate::types::{Frame, LightEstimate, Rgb};

pub const DEFAULT_SAMPLE_COUNT: usize = 1_000;
pub const DEFAULT_UPDATE_INTERVAL: Duration = Duration::from_millis(100);

const AMBIENT_RANGE: (f32, f32) = (0.2, 1.0);
const DIRECTIONAL_RANGE: (f32, f32) = (0.3, 1.0);
const DIRECTIONAL_GAIN: f32 = 1.5;
const HEMISPHERE_INTENSITY: f32 = 0.5;

/// Estimate lighting from a tightly packed RGBA8 buffer.
///
/// Sums are divided by `sample_count` rather than by the number of pixels
/// actually visited; the two differ when the stride rounds down.
pub fn estimate_from_rgba(data: &[u8], sample_count: usize) -> LightEstimate {
    let sample_count = sample_count.max(1);
    let step = (data.len() / (4 * sample_count)).max(1);

    let mut total_brightness = 0.0_f64;
    let mut totals = [0.0_f64; 3];
    for px in data.chunks_exact(4).step_by(step) {
        let (r, g, b) = (px[0] as f64, px[1] as f64, px[2] as f64);
        total_brightness += (0.299 * r + 0.587 * g + 0.114 * b) / 255.0;
        totals[0] += r;
        totals[1] += g;
        totals[2] += b;
    }

    let n = sample_count as f64;
    let avg_brightness = (total_brightness / n) as f32;
    let avg = totals.map(|t| (t / n) as f32);

    LightEstimate {
        ambient_intensity: avg_brightness.clamp(AMBIENT_RANGE.0, AMBIENT_RANGE.1),
        directional_intensity: (avg_brightness * DIRECTIONAL_GAIN)
            .clamp(DIRECTIONAL_RANGE.0, DIRECTIONAL_RANGE.1),
        direction: avg.map(|c| ((c - 128.0) / 128.0).clamp(-1.0, 1.0)),
        color: Rgb::new(
            avg[0].clamp(0.0, 255.0),
            avg[1].clamp(0.0, 255.0),
            avg[2].clamp(0.0, 255.0),
        ),
    }
}

/// Periodic sampler. Owns the off-screen raster and the interval timer.
pub struct LightSampler {
    interval: Duration,
    sample_count: usize,
    raster: RgbaImage,
    ticker: Option<Receiver<Instant>>,
}

impl LightSampler {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            sample_count: DEFAULT_SAMPLE_COUNT,
            raster: RgbaImage::new(0, 0),
            ticker: None,
        }
    }

    pub fn with_sample_count(mut self, sample_count: usize) -> Self {
        self.sample_count = sample_count.max(1);
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn start(&mut self) {
        if self.ticker.is_none() {
            log::info!("light estimation every {:?}", self.interval);
            self.ticker = Some(tick(self.interval));
        }
    }

    /// Cancel the timer. Idempotent.
    pub fn stop(&mut self) {
        if self.ticker.take().is_some() {
            log::info!("light estimation stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.ticker.is_some()
    }

    /// Whether at least one tick elapsed since the last call. Missed ticks
    /// collapse into one sample.
    pub fn due(&mut self) -> bool {
        self.ticker
            .as_ref()
            .is_some_and(|ticker| ticker.try_iter().count() > 0)
    }

    /// Copy the frame into the raster at native resolution and sample it.
    pub fn estimate(&mut self, frame: &Frame) -> LightEstimate {
        if self.raster.dimensions() != frame.dimensions() {
            self.raster = RgbaImage::new(frame.width, frame.height);
        }

        let raster: &mut [u8] = &mut self.raster;
        if frame.rgba.len() == raster.len() {
            raster.copy_from_slice(&frame.rgba);
        } else {
            log::warn!(
                "frame buffer is {} bytes, expected {} for {}x{}",
                frame.rgba.len(),
                raster.len(),
                frame.width,
                frame.height
            );
            let len = frame.rgba.len().min(raster.len());
            raster[..len].copy_from_slice(&frame.rgba[..len]);
            raster[len..].fill(0);
        }

        estimate_from_rgba(&self.raster, self.sample_count)
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AmbientLight {
    pub color: Rgb,
    pub intensity: f32,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DirectionalLight {
    pub color: Rgb,
    pub intensity: f32,
    pub position: [f32; 3],
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HemisphereLight {
    pub sky_color: Rgb,
    pub ground_color: Rgb,
    pub intensity: f32,
}

/// The light objects a renderer mirrors while estimation is enabled.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LightRig {
    pub ambient: AmbientLight,
    pub directional: DirectionalLight,
    pub hemisphere: HemisphereLight,
}

impl Default for LightRig {
    fn default() -> Self {
        Self {
            ambient: AmbientLight {
                color: Rgb::WHITE,
                intensity: 0.5,
            },
            directional: DirectionalLight {
                color: Rgb::WHITE,
                intensity: 0.8,
                position: [0.0, 1.0, 0.0],
            },
            hemisphere: HemisphereLight {
                sky_color: Rgb::WHITE,
                ground_color: Rgb::HEMISPHERE_GROUND,
                intensity: HEMISPHERE_INTENSITY,
            },
        }
    }
}

impl LightRig {
    pub fn apply(&mut self, estimate: &LightEstimate) {
        self.ambient.intensity = estimate.ambient_intensity;
        self.ambient.color = estimate.color;
        self.directional.intensity = estimate.directional_intensity;
        self.directional.position = estimate.direction;
        self.directional.color = estimate.color;
    }
}
