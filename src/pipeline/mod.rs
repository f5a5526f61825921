pub mod camera;
pub mod rgba_converter;

pub use camera::{CameraStream, FrameTaps, StillDevice, VideoDevice, spawn_capture};
#[cfg(feature = "camera-nokhwa")]
pub use camera::{CameraDevice, NokhwaDevice, available_cameras};
