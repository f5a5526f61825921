//! Deformable face surface driven by per-frame landmark estimates.
//!
//! Buffers are sized once from the topology and only mutated in place.

use glam::{Mat4, Vec3};

use crate::{
    anchor::{AnchorPhase, EdgeCallbacks},
    pose::mat4_from_row_major,
    types::{FACE_LANDMARK_COUNT, FaceEstimate},
};

/// Fixed face mesh topology. Triangle indices and UVs come from the host's
/// face geometry asset.
#[derive(Clone, Debug)]
pub struct FaceTopology {
    pub vertex_count: usize,
    pub indices: Vec<u32>,
    pub uvs: Vec<[f32; 2]>,
}

impl FaceTopology {
    pub fn new(indices: Vec<u32>, uvs: Vec<[f32; 2]>) -> Self {
        Self {
            vertex_count: FACE_LANDMARK_COUNT,
            indices,
            uvs,
        }
    }

    /// Points only, no triangles. Normals stay zero.
    pub fn point_cloud() -> Self {
        Self::new(Vec::new(), Vec::new())
    }
}

impl Default for FaceTopology {
    fn default() -> Self {
        Self::point_cloud()
    }
}

#[derive(Debug)]
pub struct FaceSurface {
    positions: Vec<f32>,
    normals: Vec<f32>,
    uvs: Vec<f32>,
    indices: Vec<u32>,
    phase: AnchorPhase,
    dirty: bool,
    world_matrix: Mat4,
    callbacks: EdgeCallbacks,
}

impl FaceSurface {
    pub fn new(topology: FaceTopology, callbacks: EdgeCallbacks) -> Self {
        let vertex_count = topology.vertex_count;
        let mut uvs = vec![0.0; vertex_count * 2];
        for (i, uv) in topology.uvs.iter().take(vertex_count).enumerate() {
            uvs[i * 2] = uv[0];
            uvs[i * 2 + 1] = uv[1];
        }

        let triangle_count = topology.indices.len() / 3;
        let indices: Vec<u32> = topology
            .indices
            .chunks_exact(3)
            .filter(|tri| tri.iter().all(|&i| (i as usize) < vertex_count))
            .flatten()
            .copied()
            .collect();
        if indices.len() / 3 != triangle_count {
            log::warn!(
                "dropped {} face triangles outside the {vertex_count}-vertex topology",
                triangle_count - indices.len() / 3
            );
        }

        Self {
            positions: vec![0.0; vertex_count * 3],
            normals: vec![0.0; vertex_count * 3],
            uvs,
            indices,
            phase: AnchorPhase::Lost,
            dirty: false,
            world_matrix: Mat4::IDENTITY,
            callbacks,
        }
    }

    pub fn vertex_count(&self) -> usize {
        self.positions.len() / 3
    }

    pub fn visible(&self) -> bool {
        self.phase.is_found()
    }

    pub fn positions(&self) -> &[f32] {
        &self.positions
    }

    pub fn normals(&self) -> &[f32] {
        &self.normals
    }

    pub fn uvs(&self) -> &[f32] {
        &self.uvs
    }

    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    pub fn world_matrix(&self) -> &Mat4 {
        &self.world_matrix
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Renderer acknowledgement: returns whether an upload is due and clears it.
    pub fn take_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    /// Apply one frame. Without an estimate only visibility changes; stale
    /// geometry is left in place.
    pub fn update(&mut self, estimate: Option<&FaceEstimate>) {
        let (next, edge) = self.phase.observe(estimate.is_some());
        if let Some(edge) = edge {
            log::debug!("face surface {edge:?}");
            self.callbacks.fire(edge);
        }
        self.phase = next;

        let Some(estimate) = estimate else {
            return;
        };

        self.world_matrix = mat4_from_row_major(&estimate.face_matrix);
        self.write_positions(&estimate.metric_landmarks);
        self.dirty = true;
        self.compute_vertex_normals();
    }

    /// Drive the surface to lost, e.g. when tracking stops.
    pub fn force_lost(&mut self) {
        self.update(None);
    }

    fn write_positions(&mut self, landmarks: &[[f32; 3]]) {
        let vertex_count = self.vertex_count();
        if landmarks.len() < vertex_count {
            log::warn!(
                "face estimate has {} landmarks, expected {vertex_count}",
                landmarks.len()
            );
        }
        for (slot, point) in self.positions.chunks_exact_mut(3).zip(landmarks) {
            slot.copy_from_slice(point);
        }
    }

    /// Area-weighted vertex normals over the triangle list.
    fn compute_vertex_normals(&mut self) {
        self.normals.fill(0.0);

        for tri in self.indices.chunks_exact(3) {
            let [a, b, c] = [tri[0] as usize, tri[1] as usize, tri[2] as usize];
            let pa = vertex(&self.positions, a);
            let pb = vertex(&self.positions, b);
            let pc = vertex(&self.positions, c);
            // Cross product length is twice the triangle area.
            let face_normal = (pc - pb).cross(pa - pb);
            for idx in [a, b, c] {
                let n = &mut self.normals[idx * 3..idx * 3 + 3];
                n[0] += face_normal.x;
                n[1] += face_normal.y;
                n[2] += face_normal.z;
            }
        }

        for n in self.normals.chunks_exact_mut(3) {
            let normalized = Vec3::new(n[0], n[1], n[2]).normalize_or_zero();
            n.copy_from_slice(&normalized.to_array());
        }
    }
}

fn vertex(buffer: &[f32], idx: usize) -> Vec3 {
    Vec3::new(buffer[idx * 3], buffer[idx * 3 + 1], buffer[idx * 3 + 2])
}
