use glam::{Mat3, Mat4, Quat, Vec3};

use crate::types::{FaceEstimate, TargetDescriptor};

/// Fixed per-target transform mapping the marker-local unit frame onto the
/// target's physical footprint. Built once at registration.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PostMatrix(Mat4);

impl PostMatrix {
    pub fn new(width: f32, height: f32) -> Self {
        let translation = Vec3::new(width / 2.0, width / 2.0 + (height - width) / 2.0, 0.0);
        Self(Mat4::from_scale_rotation_translation(
            Vec3::splat(width),
            Quat::IDENTITY,
            translation,
        ))
    }

    pub fn for_target(target: &TargetDescriptor) -> Self {
        Self::new(target.width, target.height)
    }

    pub fn matrix(&self) -> &Mat4 {
        &self.0
    }
}

pub fn build_post_matrix(width: f32, height: f32) -> PostMatrix {
    PostMatrix::new(width, height)
}

/// `raw ∘ post`: the backend pose followed by the target normalization.
pub fn compose_world_matrix(raw: &Mat4, post: &PostMatrix) -> Mat4 {
    *raw * post.0
}

/// Column-major flat layout, as the image backend emits world matrices.
pub fn mat4_from_column_major(values: &[f32; 16]) -> Mat4 {
    Mat4::from_cols_array(values)
}

/// Row-major flat layout, as the face backend emits its face matrix.
pub fn mat4_from_row_major(values: &[f32; 16]) -> Mat4 {
    Mat4::from_cols_array(values).transpose()
}

/// World matrix of a face-relative anchor pinned to `landmark`.
///
/// The rotation block of the face matrix is scaled by the face scale and the
/// landmark's metric position is carried through the same block before the
/// face translation is added. Returns `None` when the estimate has no such
/// landmark.
pub fn landmark_matrix(estimate: &FaceEstimate, landmark: usize) -> Option<Mat4> {
    let t = estimate.metric_landmarks.get(landmark)?;
    let fm = mat4_from_row_major(&estimate.face_matrix);
    let basis = Mat3::from_mat4(fm);
    let scaled = basis * estimate.face_scale;
    let translation = basis * Vec3::from_array(*t) + fm.w_axis.truncate();

    Some(Mat4::from_cols(
        scaled.x_axis.extend(0.0),
        scaled.y_axis.extend(0.0),
        scaled.z_axis.extend(0.0),
        translation.extend(1.0),
    ))
}

/// Horizontal mirror applied to content shown over a mirrored user-facing feed.
pub fn mirror_x() -> Mat4 {
    Mat4::from_scale(Vec3::new(-1.0, 1.0, 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_eq(a: &Mat4, b: &Mat4) -> bool {
        a.abs_diff_eq(*b, 1e-5)
    }

    #[test]
    fn post_matrix_centers_portrait_target() {
        let post = PostMatrix::new(1.0, 2.0);
        let (scale, rotation, translation) = post.matrix().to_scale_rotation_translation();
        assert!(scale.abs_diff_eq(Vec3::ONE, 1e-6));
        assert!(rotation.abs_diff_eq(Quat::IDENTITY, 1e-6));
        assert!(translation.abs_diff_eq(Vec3::new(0.5, 1.0, 0.0), 1e-6));
    }

    #[test]
    fn post_matrix_scales_uniformly_by_width() {
        let post = PostMatrix::new(4.0, 3.0);
        let corner = post.matrix().transform_point3(Vec3::new(1.0, 1.0, 1.0));
        assert!(corner.abs_diff_eq(Vec3::new(6.0, 5.5, 4.0), 1e-5));
    }

    #[test]
    fn compose_with_identity_returns_post() {
        let post = PostMatrix::new(1.0, 2.0);
        let world = compose_world_matrix(&Mat4::IDENTITY, &post);
        assert!(approx_eq(&world, post.matrix()));
    }

    #[test]
    fn cached_post_matrix_matches_per_frame_rebuild() {
        let cached = build_post_matrix(0.8, 1.3);
        for frame in 0..1000 {
            let angle = frame as f32 * 0.01;
            let raw = Mat4::from_rotation_translation(
                Quat::from_rotation_y(angle),
                Vec3::new(angle, -angle, 5.0),
            );
            let reused = compose_world_matrix(&raw, &cached);
            let rebuilt = compose_world_matrix(&raw, &build_post_matrix(0.8, 1.3));
            assert_eq!(reused.to_cols_array(), rebuilt.to_cols_array());
        }
    }

    #[test]
    fn row_major_input_is_transposed() {
        let mut values = [0.0; 16];
        values[0] = 1.0;
        values[5] = 1.0;
        values[10] = 1.0;
        values[15] = 1.0;
        values[3] = 7.0;
        let m = mat4_from_row_major(&values);
        assert_eq!(m.w_axis.x, 7.0);
        let c = mat4_from_column_major(&values);
        assert_eq!(c.x_axis.w, 7.0);
    }

    #[test]
    fn landmark_matrix_applies_scale_and_offset() {
        #[rustfmt::skip]
        let face_matrix = [
            0.0, -1.0, 0.0, 10.0,
            1.0,  0.0, 0.0, 20.0,
            0.0,  0.0, 1.0, 30.0,
            0.0,  0.0, 0.0,  1.0,
        ];
        let estimate = FaceEstimate {
            face_matrix,
            face_scale: 2.0,
            metric_landmarks: vec![[0.0, 0.0, 0.0], [1.0, 2.0, 3.0]],
        };

        let m = landmark_matrix(&estimate, 1).expect("landmark present");
        // translation = R * t + T
        assert!(m.w_axis.truncate().abs_diff_eq(Vec3::new(8.0, 21.0, 33.0), 1e-5));
        // rotation block scaled by s
        assert!((m.x_axis.y - 2.0).abs() < 1e-6);
        assert!((m.y_axis.x + 2.0).abs() < 1e-6);
        assert!((m.z_axis.z - 2.0).abs() < 1e-6);
        assert_eq!(m.w_axis.w, 1.0);

        assert!(landmark_matrix(&estimate, 2).is_none());
    }

    #[test]
    fn mirror_flips_x_only() {
        let p = mirror_x().transform_point3(Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(p, Vec3::new(-1.0, 2.0, 3.0));
    }
}
