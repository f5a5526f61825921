//! Found/lost reconciliation for tracked anchors.
//!
//! Each anchor runs a two-state machine. Callbacks fire only on edges; a
//! found anchor keeps receiving fresh matrices every frame. A lost anchor
//! keeps its stale matrix, so consumers must gate on visibility.

use std::fmt;

use glam::Mat4;

use crate::{
    pose::{PostMatrix, compose_world_matrix, landmark_matrix},
    types::{FaceEstimate, TargetDescriptor},
};

pub type Callback = Box<dyn FnMut()>;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum AnchorPhase {
    #[default]
    Lost,
    Found,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Edge {
    Found,
    Lost,
}

impl AnchorPhase {
    /// Next phase for a detected/undetected observation, plus the edge taken.
    pub fn observe(self, detected: bool) -> (AnchorPhase, Option<Edge>) {
        match (self, detected) {
            (AnchorPhase::Lost, true) => (AnchorPhase::Found, Some(Edge::Found)),
            (AnchorPhase::Found, false) => (AnchorPhase::Lost, Some(Edge::Lost)),
            (phase, _) => (phase, None),
        }
    }

    pub fn is_found(self) -> bool {
        self == AnchorPhase::Found
    }
}

/// Optional found/lost hooks. Missing hooks are skipped.
#[derive(Default)]
pub struct EdgeCallbacks {
    pub on_found: Option<Callback>,
    pub on_lost: Option<Callback>,
}

impl EdgeCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_found(mut self, f: impl FnMut() + 'static) -> Self {
        self.on_found = Some(Box::new(f));
        self
    }

    pub fn on_lost(mut self, f: impl FnMut() + 'static) -> Self {
        self.on_lost = Some(Box::new(f));
        self
    }

    pub(crate) fn fire(&mut self, edge: Edge) {
        let hook = match edge {
            Edge::Found => self.on_found.as_mut(),
            Edge::Lost => self.on_lost.as_mut(),
        };
        if let Some(hook) = hook {
            hook();
        }
    }
}

impl fmt::Debug for EdgeCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EdgeCallbacks")
            .field("on_found", &self.on_found.is_some())
            .field("on_lost", &self.on_lost.is_some())
            .finish()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct AnchorId(usize);

#[derive(Debug)]
pub struct Anchor {
    /// Image target index in image mode, landmark index in face mode.
    pub target: usize,
    phase: AnchorPhase,
    world_matrix: Option<Mat4>,
    callbacks: EdgeCallbacks,
}

impl Anchor {
    fn new(target: usize, callbacks: EdgeCallbacks) -> Self {
        Self {
            target,
            phase: AnchorPhase::Lost,
            world_matrix: None,
            callbacks,
        }
    }

    pub fn phase(&self) -> AnchorPhase {
        self.phase
    }

    pub fn visible(&self) -> bool {
        self.phase.is_found()
    }

    /// Last written world matrix. Still set after the anchor is lost.
    pub fn world_matrix(&self) -> Option<&Mat4> {
        self.world_matrix.as_ref()
    }

    /// Advance the state machine. The found hook runs before the new matrix
    /// is written; `matrix` is ignored for undetected observations.
    fn observe(&mut self, matrix: Option<Mat4>) -> Option<Edge> {
        let (next, edge) = self.phase.observe(matrix.is_some());
        if let Some(edge) = edge {
            log::debug!("anchor on target {} {:?}", self.target, edge);
            self.callbacks.fire(edge);
        }
        if let Some(matrix) = matrix {
            self.world_matrix = Some(matrix);
        }
        self.phase = next;
        edge
    }
}

/// All anchors of a session plus the cached per-target post matrices.
#[derive(Debug, Default)]
pub struct AnchorSet {
    anchors: Vec<Anchor>,
    post_matrices: Vec<Option<PostMatrix>>,
}

impl AnchorSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, target: usize, callbacks: EdgeCallbacks) -> AnchorId {
        self.anchors.push(Anchor::new(target, callbacks));
        AnchorId(self.anchors.len() - 1)
    }

    pub fn get(&self, id: AnchorId) -> Option<&Anchor> {
        self.anchors.get(id.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (AnchorId, &Anchor)> {
        self.anchors
            .iter()
            .enumerate()
            .map(|(idx, anchor)| (AnchorId(idx), anchor))
    }

    pub fn len(&self) -> usize {
        self.anchors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.anchors.is_empty()
    }

    /// Build one post matrix per registered target. Replaces any previous set.
    pub fn set_targets(&mut self, targets: &[TargetDescriptor]) {
        let slots = targets.iter().map(|t| t.index + 1).max().unwrap_or(0);
        self.post_matrices = vec![None; slots];
        for target in targets {
            self.post_matrices[target.index] = Some(PostMatrix::for_target(target));
        }
    }

    pub fn post_matrix(&self, target_index: usize) -> Option<&PostMatrix> {
        self.post_matrices.get(target_index).and_then(Option::as_ref)
    }

    /// Fan an image-target update out to every anchor bound to that target.
    /// Returns the edges taken, one entry per affected anchor.
    pub fn apply_target_update(
        &mut self,
        target_index: usize,
        raw: Option<&Mat4>,
    ) -> Vec<(AnchorId, Edge)> {
        let composed = match raw {
            Some(raw) => match self.post_matrix(target_index) {
                Some(post) => Some(compose_world_matrix(raw, post)),
                None => {
                    log::warn!("pose update for unregistered target {target_index} ignored");
                    return Vec::new();
                }
            },
            None => None,
        };

        let mut edges = Vec::new();
        for (idx, anchor) in self.anchors.iter_mut().enumerate() {
            if anchor.target != target_index {
                continue;
            }
            if let Some(edge) = anchor.observe(composed) {
                edges.push((AnchorId(idx), edge));
            }
        }
        edges
    }

    /// Apply the shared face signal to every anchor. Visible anchors take the
    /// matrix of their reference landmark; an anchor whose landmark is absent
    /// from the estimate has no pose and is treated as undetected.
    pub fn apply_face_update(&mut self, estimate: Option<&FaceEstimate>) -> Vec<(AnchorId, Edge)> {
        let mut edges = Vec::new();
        for (idx, anchor) in self.anchors.iter_mut().enumerate() {
            let matrix = estimate.and_then(|estimate| {
                let matrix = landmark_matrix(estimate, anchor.target);
                if matrix.is_none() {
                    log::warn!(
                        "landmark {} missing from face estimate ({} points)",
                        anchor.target,
                        estimate.metric_landmarks.len()
                    );
                }
                matrix
            });
            if let Some(edge) = anchor.observe(matrix) {
                edges.push((AnchorId(idx), edge));
            }
        }
        edges
    }

    /// Drive every anchor to lost, firing lost hooks for those that were found.
    pub fn force_lost(&mut self) -> usize {
        let mut lost = 0;
        for anchor in &mut self.anchors {
            if anchor.observe(None).is_some() {
                lost += 1;
            }
        }
        lost
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::Cell, rc::Rc};

    use glam::Vec3;

    use super::*;

    fn counting_callbacks() -> (EdgeCallbacks, Rc<Cell<u32>>, Rc<Cell<u32>>) {
        let found = Rc::new(Cell::new(0));
        let lost = Rc::new(Cell::new(0));
        let (f, l) = (found.clone(), lost.clone());
        let callbacks = EdgeCallbacks::new()
            .on_found(move || f.set(f.get() + 1))
            .on_lost(move || l.set(l.get() + 1));
        (callbacks, found, lost)
    }

    fn single_target(width: f32, height: f32) -> AnchorSet {
        let mut set = AnchorSet::new();
        set.set_targets(&[TargetDescriptor {
            index: 0,
            width,
            height,
        }]);
        set
    }

    #[test]
    fn phase_transitions_cover_all_inputs() {
        assert_eq!(
            AnchorPhase::Lost.observe(true),
            (AnchorPhase::Found, Some(Edge::Found))
        );
        assert_eq!(AnchorPhase::Lost.observe(false), (AnchorPhase::Lost, None));
        assert_eq!(
            AnchorPhase::Found.observe(false),
            (AnchorPhase::Lost, Some(Edge::Lost))
        );
        assert_eq!(AnchorPhase::Found.observe(true), (AnchorPhase::Found, None));
    }

    #[test]
    fn edges_fire_once_per_transition() {
        let mut set = single_target(1.0, 1.0);
        let (callbacks, found, lost) = counting_callbacks();
        let id = set.register(0, callbacks);

        let pattern = [false, true, true, true, false, false, true, false, true];
        for detected in pattern {
            let raw = detected.then_some(Mat4::IDENTITY);
            set.apply_target_update(0, raw.as_ref());
        }

        assert_eq!(found.get(), 3);
        assert_eq!(lost.get(), 2);
        assert!(set.get(id).map(Anchor::visible).unwrap_or(false));
    }

    #[test]
    fn found_anchor_tracks_every_frame() {
        let mut set = single_target(1.0, 1.0);
        let id = set.register(0, EdgeCallbacks::new());
        set.apply_target_update(0, Some(&Mat4::IDENTITY));
        let moved = Mat4::from_translation(Vec3::new(0.0, 0.0, -3.0));
        set.apply_target_update(0, Some(&moved));

        let anchor = set.get(id).expect("anchor");
        let expected = compose_world_matrix(&moved, &PostMatrix::new(1.0, 1.0));
        assert_eq!(anchor.world_matrix(), Some(&expected));
    }

    #[test]
    fn lost_anchor_keeps_stale_matrix() {
        let mut set = single_target(2.0, 1.0);
        let id = set.register(0, EdgeCallbacks::new());
        set.apply_target_update(0, Some(&Mat4::IDENTITY));
        set.apply_target_update(0, None);

        let anchor = set.get(id).expect("anchor");
        assert!(!anchor.visible());
        assert!(anchor.world_matrix().is_some());
    }

    #[test]
    fn anchors_sharing_a_target_fan_out() {
        let mut set = AnchorSet::new();
        set.set_targets(&[
            TargetDescriptor {
                index: 0,
                width: 1.0,
                height: 1.0,
            },
            TargetDescriptor {
                index: 1,
                width: 1.0,
                height: 1.5,
            },
        ]);
        let a = set.register(1, EdgeCallbacks::new());
        let b = set.register(1, EdgeCallbacks::new());
        let other = set.register(0, EdgeCallbacks::new());

        let edges = set.apply_target_update(1, Some(&Mat4::IDENTITY));
        assert_eq!(edges, vec![(a, Edge::Found), (b, Edge::Found)]);

        let ma = set.get(a).and_then(Anchor::world_matrix).copied();
        let mb = set.get(b).and_then(Anchor::world_matrix).copied();
        assert!(ma.is_some());
        assert_eq!(ma, mb);
        assert!(!set.get(other).map(Anchor::visible).unwrap_or(true));
    }

    #[test]
    fn unregistered_target_is_ignored() {
        let mut set = single_target(1.0, 1.0);
        let (callbacks, found, _) = counting_callbacks();
        let id = set.register(3, callbacks);
        assert!(set.apply_target_update(3, Some(&Mat4::IDENTITY)).is_empty());
        assert_eq!(found.get(), 0);
        assert!(!set.get(id).map(Anchor::visible).unwrap_or(true));
    }

    #[test]
    fn face_signal_is_shared_by_all_anchors() {
        let mut set = AnchorSet::new();
        let (nose, nose_found, nose_lost) = counting_callbacks();
        let (chin, chin_found, _) = counting_callbacks();
        set.register(1, nose);
        set.register(152, chin);

        let mut landmarks = vec![[0.0; 3]; 468];
        landmarks[1] = [0.0, 0.0, 1.0];
        #[rustfmt::skip]
        let estimate = FaceEstimate {
            face_matrix: [
                1.0, 0.0, 0.0, 0.0,
                0.0, 1.0, 0.0, 0.0,
                0.0, 0.0, 1.0, -50.0,
                0.0, 0.0, 0.0, 1.0,
            ],
            face_scale: 1.0,
            metric_landmarks: landmarks,
        };

        set.apply_face_update(None);
        set.apply_face_update(Some(&estimate));
        set.apply_face_update(Some(&estimate));
        set.apply_face_update(None);

        assert_eq!(nose_found.get(), 1);
        assert_eq!(nose_lost.get(), 1);
        assert_eq!(chin_found.get(), 1);
    }

    #[test]
    fn force_lost_only_reports_found_anchors() {
        let mut set = AnchorSet::new();
        set.set_targets(&[
            TargetDescriptor {
                index: 0,
                width: 1.0,
                height: 1.0,
            },
            TargetDescriptor {
                index: 1,
                width: 1.0,
                height: 1.0,
            },
        ]);
        let (callbacks, _, lost) = counting_callbacks();
        set.register(0, callbacks);
        set.register(1, EdgeCallbacks::new());
        set.apply_target_update(0, Some(&Mat4::IDENTITY));

        assert_eq!(set.force_lost(), 1);
        assert_eq!(lost.get(), 1);
        assert_eq!(set.force_lost(), 0);
        assert!(set.iter().all(|(_, anchor)| !anchor.visible()));
    }

    #[test]
    fn anchor_on_absent_landmark_stays_lost() {
        let mut set = AnchorSet::new();
        let (callbacks, found, _) = counting_callbacks();
        let id = set.register(600, callbacks);

        #[rustfmt::skip]
        let estimate = FaceEstimate {
            face_matrix: [
                1.0, 0.0, 0.0, 5.0,
                0.0, 1.0, 0.0, 0.0,
                0.0, 0.0, 1.0, 0.0,
                0.0, 0.0, 0.0, 1.0,
            ],
            face_scale: 1.0,
            metric_landmarks: vec![[0.0; 3]; 468],
        };

        assert!(set.apply_face_update(Some(&estimate)).is_empty());
        let anchor = set.get(id).expect("anchor");
        assert!(!anchor.visible());
        assert!(anchor.world_matrix().is_none());
        assert_eq!(found.get(), 0);
    }
}
