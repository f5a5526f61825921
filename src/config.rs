use std::{fmt, time::Duration};

use crate::{
    error::TrackingError,
    light::{DEFAULT_SAMPLE_COUNT, DEFAULT_UPDATE_INTERVAL},
    types::{FacingMode, LightEstimate},
};

const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(5);

/// Tuning forwarded verbatim to the tracking backend. `None` leaves the
/// backend default in place.
#[derive(Clone, Debug, PartialEq)]
pub struct TrackerOptions {
    pub max_track: usize,
    pub filter_min_cf: Option<f32>,
    pub filter_beta: Option<f32>,
    pub warmup_tolerance: Option<u32>,
    pub miss_tolerance: Option<u32>,
}

impl Default for TrackerOptions {
    fn default() -> Self {
        Self {
            max_track: 1,
            filter_min_cf: None,
            filter_beta: None,
            warmup_tolerance: None,
            miss_tolerance: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct LightConfig {
    pub enabled: bool,
    pub update_interval: Duration,
    pub sample_count: usize,
}

impl Default for LightConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            update_interval: DEFAULT_UPDATE_INTERVAL,
            sample_count: DEFAULT_SAMPLE_COUNT,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SessionConfig {
    pub tracker: TrackerOptions,
    /// Acquire the device and start tracking from `ArSession::start`.
    pub autoplay: bool,
    /// Mirror content and set the face backend up flipped while the camera
    /// faces the user.
    pub flip_user_camera: bool,
    /// Initial facing mode. Defaults per backend kind when unset.
    pub facing: Option<FacingMode>,
    pub light: LightConfig,
    /// How long to wait for the first video frame before giving up.
    pub ready_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            tracker: TrackerOptions::default(),
            autoplay: true,
            flip_user_camera: true,
            facing: None,
            light: LightConfig::default(),
            ready_timeout: DEFAULT_READY_TIMEOUT,
        }
    }
}

/// Host-level hooks. Each one is optional.
#[derive(Default)]
pub struct SessionCallbacks {
    pub on_ready: Option<Box<dyn FnMut()>>,
    pub on_error: Option<Box<dyn FnMut(&TrackingError)>>,
    pub on_light_update: Option<Box<dyn FnMut(&LightEstimate)>>,
}

impl SessionCallbacks {
    pub fn on_ready(mut self, f: impl FnMut() + 'static) -> Self {
        self.on_ready = Some(Box::new(f));
        self
    }

    pub fn on_error(mut self, f: impl FnMut(&TrackingError) + 'static) -> Self {
        self.on_error = Some(Box::new(f));
        self
    }

    pub fn on_light_update(mut self, f: impl FnMut(&LightEstimate) + 'static) -> Self {
        self.on_light_update = Some(Box::new(f));
        self
    }
}

impl fmt::Debug for SessionCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCallbacks")
            .field("on_ready", &self.on_ready.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("on_light_update", &self.on_light_update.is_some())
            .finish()
    }
}
