use std::{fmt, time::Instant};

/// One RGBA8 video frame as delivered by the capture device.
#[derive(Clone, Debug)]
pub struct Frame {
    pub rgba: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp: Instant,
}

impl Frame {
    pub fn new(rgba: Vec<u8>, width: u32, height: u32) -> Self {
        Self {
            rgba,
            width,
            height,
            timestamp: Instant::now(),
        }
    }

    /// A frame filled with a single opaque color.
    pub fn solid(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        let pixels = width as usize * height as usize;
        let mut rgba = Vec::with_capacity(pixels * 4);
        for _ in 0..pixels {
            rgba.extend_from_slice(&[rgb[0], rgb[1], rgb[2], 255]);
        }
        Self::new(rgba, width, height)
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FacingMode {
    User,
    Environment,
}

impl FacingMode {
    pub fn flipped(self) -> Self {
        match self {
            FacingMode::User => FacingMode::Environment,
            FacingMode::Environment => FacingMode::User,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            FacingMode::User => "user",
            FacingMode::Environment => "environment",
        }
    }
}

/// A registered image target. Dimensions come from the target asset and are
/// fixed once registration completes.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TargetDescriptor {
    pub index: usize,
    pub width: f32,
    pub height: f32,
}

/// Number of points in the face landmark topology.
pub const FACE_LANDMARK_COUNT: usize = 468;

/// Per-frame face pose and landmark geometry. Never retained across frames.
#[derive(Clone, Debug)]
pub struct FaceEstimate {
    /// Row-major 4x4 face transform.
    pub face_matrix: [f32; 16],
    pub face_scale: f32,
    pub metric_landmarks: Vec<[f32; 3]>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CameraParams {
    /// Vertical field of view in degrees.
    pub fov: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
}

impl Default for CameraParams {
    fn default() -> Self {
        Self {
            fov: 75.0,
            aspect: 1.0,
            near: 0.1,
            far: 1000.0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Rgb {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

impl Rgb {
    pub const WHITE: Rgb = Rgb::new(255.0, 255.0, 255.0);
    pub const HEMISPHERE_GROUND: Rgb = Rgb::new(64.0, 64.0, 64.0);

    pub const fn new(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b }
    }

    /// CSS-style `rgb(r, g, b)` notation, as consumed by web renderers.
    pub fn css(&self) -> String {
        format!("rgb({}, {}, {})", self.r, self.g, self.b)
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.css())
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LightEstimate {
    pub ambient_intensity: f32,
    pub directional_intensity: f32,
    pub direction: [f32; 3],
    pub color: Rgb,
}
