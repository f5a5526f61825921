//! Camera parameters derived from a tracking backend's projection matrix.
//!
//! The entries read here follow the flat 16-float layout handed out by the
//! backend: `[5]` holds the vertical focal term, `[10]` and `[14]` the depth
//! terms. A degenerate matrix (`[10] == ±1`) yields infinite planes and is
//! passed through untouched.

use crate::types::CameraParams;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ProjectionMatrix(pub [f32; 16]);

impl ProjectionMatrix {
    pub fn fov_degrees(&self) -> f32 {
        2.0 * (1.0 / self.0[5]).atan() * 180.0 / std::f32::consts::PI
    }

    pub fn near(&self) -> f32 {
        self.0[14] / (self.0[10] - 1.0)
    }

    pub fn far(&self) -> f32 {
        self.0[14] / (self.0[10] + 1.0)
    }
}

impl From<[f32; 16]> for ProjectionMatrix {
    fn from(value: [f32; 16]) -> Self {
        Self(value)
    }
}

/// Derive renderer camera parameters. `aspect` is not encoded in a way the
/// renderer expects, so the caller supplies it (usually the frame aspect).
pub fn derive_camera_params(projection: &ProjectionMatrix, aspect: f32) -> CameraParams {
    CameraParams {
        fov: projection.fov_degrees(),
        aspect,
        near: projection.near(),
        far: projection.far(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matrix_with(m5: f32, m10: f32, m14: f32) -> ProjectionMatrix {
        let mut m = [0.0; 16];
        m[0] = 1.0;
        m[5] = m5;
        m[10] = m10;
        m[14] = m14;
        ProjectionMatrix(m)
    }

    #[test]
    fn unit_focal_term_gives_right_angle() {
        let params = derive_camera_params(&matrix_with(1.0, 2.0, 3.0), 1.0);
        assert!((params.fov - 90.0).abs() < 1e-4);
    }

    #[test]
    fn depth_terms_give_known_planes() {
        let params = derive_camera_params(&matrix_with(1.0, 2.0, 3.0), 4.0 / 3.0);
        assert!((params.near - 3.0).abs() < 1e-6);
        assert!((params.far - 1.0).abs() < 1e-6);
        assert_eq!(params.aspect, 4.0 / 3.0);
    }

    #[test]
    fn gl_style_perspective_matches_source_parameters() {
        let near = 10.0_f32;
        let far = 100_000.0_f32;
        let fovy = 45.0_f32.to_radians();
        let f = 1.0 / (fovy / 2.0).tan();
        let m = matrix_with(
            f,
            -(far + near) / (far - near),
            -2.0 * far * near / (far - near),
        );
        let params = derive_camera_params(&m, 1.0);
        assert!((params.fov - 45.0).abs() < 1e-3);
        assert!((params.near - near).abs() / near < 1e-3);
        assert!((params.far - far).abs() / far < 1e-2);
        assert!(params.near < params.far);
    }

    #[test]
    fn degenerate_depth_term_is_not_rejected() {
        let params = derive_camera_params(&matrix_with(1.0, 1.0, 3.0), 1.0);
        assert!(params.near.is_infinite());
    }
}
