//! The single owned scene state read by the renderer.
//!
//! Only the session mutates it, on its own thread, between render passes.

use glam::Mat4;

use crate::{
    anchor::{AnchorId, AnchorSet, EdgeCallbacks},
    face_mesh::{FaceSurface, FaceTopology},
    light::LightRig,
    pose::{mat4_from_column_major, mirror_x},
    tracker::{TargetUpdate, TrackerEvent},
    types::{CameraParams, LightEstimate, TargetDescriptor},
};

/// What the renderer needs to place one anchor node.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AnchorView {
    pub visible: bool,
    pub world_matrix: Option<Mat4>,
}

#[derive(Debug, Default)]
pub struct SceneStore {
    anchors: AnchorSet,
    face: Option<FaceSurface>,
    targets: Vec<TargetDescriptor>,
    camera: CameraParams,
    mirrored: bool,
    light_rig: Option<LightRig>,
    light_estimate: Option<LightEstimate>,
}

impl SceneStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_anchor(&mut self, target: usize, callbacks: EdgeCallbacks) -> AnchorId {
        self.anchors.register(target, callbacks)
    }

    pub fn attach_face_surface(&mut self, topology: FaceTopology, callbacks: EdgeCallbacks) {
        self.face = Some(FaceSurface::new(topology, callbacks));
    }

    pub fn anchors(&self) -> &AnchorSet {
        &self.anchors
    }

    /// Renderer-facing anchor state, mirrored when the feed is mirrored.
    pub fn anchor_view(&self, id: AnchorId) -> Option<AnchorView> {
        let anchor = self.anchors.get(id)?;
        Some(AnchorView {
            visible: anchor.visible(),
            world_matrix: anchor.world_matrix().map(|m| self.present(m)),
        })
    }

    pub fn face_surface(&self) -> Option<&FaceSurface> {
        self.face.as_ref()
    }

    pub fn face_surface_mut(&mut self) -> Option<&mut FaceSurface> {
        self.face.as_mut()
    }

    pub fn face_world_matrix(&self) -> Option<Mat4> {
        self.face.as_ref().map(|face| self.present(face.world_matrix()))
    }

    pub fn targets(&self) -> &[TargetDescriptor] {
        &self.targets
    }

    pub fn camera_params(&self) -> CameraParams {
        self.camera
    }

    pub fn is_mirrored(&self) -> bool {
        self.mirrored
    }

    pub fn light_rig(&self) -> Option<&LightRig> {
        self.light_rig.as_ref()
    }

    pub fn light_estimate(&self) -> Option<&LightEstimate> {
        self.light_estimate.as_ref()
    }

    pub(crate) fn set_targets(&mut self, targets: Vec<TargetDescriptor>) {
        self.anchors.set_targets(&targets);
        self.targets = targets;
    }

    pub(crate) fn set_camera_params(&mut self, camera: CameraParams) {
        self.camera = camera;
    }

    pub(crate) fn set_mirrored(&mut self, mirrored: bool) {
        self.mirrored = mirrored;
    }

    pub(crate) fn apply(&mut self, event: &TrackerEvent) {
        match event {
            TrackerEvent::UpdateMatrix(TargetUpdate {
                target_index,
                world_matrix,
            }) => {
                let raw = world_matrix.as_ref().map(mat4_from_column_major);
                self.anchors.apply_target_update(*target_index, raw.as_ref());
            }
            TrackerEvent::Face { has_face, estimate } => {
                if *has_face && estimate.is_none() {
                    log::warn!("face reported without an estimate; treating as absent");
                }
                let estimate = estimate.as_ref().filter(|_| *has_face);
                if let Some(face) = self.face.as_mut() {
                    face.update(estimate);
                }
                self.anchors.apply_face_update(estimate);
            }
        }
    }

    /// Everything tracked goes back to lost.
    pub(crate) fn reset_tracking(&mut self) {
        let lost = self.anchors.force_lost();
        if lost > 0 {
            log::debug!("{lost} anchors forced lost");
        }
        if let Some(face) = self.face.as_mut() {
            face.force_lost();
        }
    }

    pub(crate) fn install_light_rig(&mut self) {
        if self.light_rig.is_none() {
            self.light_rig = Some(LightRig::default());
        }
    }

    /// Drop the rig together with the last estimate.
    pub(crate) fn remove_light_rig(&mut self) {
        self.light_rig = None;
        self.light_estimate = None;
    }

    pub(crate) fn apply_light(&mut self, estimate: LightEstimate) {
        if let Some(rig) = self.light_rig.as_mut() {
            rig.apply(&estimate);
        }
        self.light_estimate = Some(estimate);
    }

    fn present(&self, matrix: &Mat4) -> Mat4 {
        if self.mirrored {
            mirror_x() * *matrix
        } else {
            *matrix
        }
    }
}
