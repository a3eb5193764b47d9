//! Physics bodies ("heads") and the N-body integrator
//!
//! A [`Model`] never stores its current vertices. They are derived on demand
//! from the shared rest pose, rotated by the accumulated rotation offset and
//! placed at the current center, so rotation error never compounds across
//! frames.

use glam::{Mat3, Vec2, Vec3};
use std::f32::consts::TAU;
use std::sync::Arc;

/// Pairwise attraction strength.
pub const GRAVITY: f32 = 0.001;

/// Floor on squared distance so coincident bodies don't produce infinite force.
pub const MIN_DISTANCE_SQ: f32 = 0.01;

/// Half the side of the standard head quad.
pub const HEAD_HALF_EXTENT: f32 = 0.3;

/// GPU vertex layout: position followed by texture coordinate.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub uv: [f32; 2],
}

impl Vertex {
    pub fn new(position: Vec3, uv: Vec2) -> Self {
        Self {
            position: position.to_array(),
            uv: uv.to_array(),
        }
    }
}

pub type Index = u16;

/// Rest-pose geometry shared by every model of the same shape.
#[derive(Debug)]
pub struct Mesh {
    vertices: Vec<Vertex>,
    indices: Vec<Index>,
    rest_center: Vec3,
}

impl Mesh {
    pub fn new(vertices: Vec<Vertex>, indices: Vec<Index>) -> Self {
        let rest_center = if vertices.is_empty() {
            Vec3::ZERO
        } else {
            let sum: Vec3 = vertices.iter().map(|v| Vec3::from(v.position)).sum();
            sum / vertices.len() as f32
        };
        Self {
            vertices,
            indices,
            rest_center,
        }
    }

    /// Textured square centered on the origin, two triangles.
    pub fn quad(half_extent: f32) -> Self {
        let h = half_extent;
        Self::new(
            vec![
                Vertex::new(Vec3::new(-h, h, 0.0), Vec2::new(0.0, 0.0)),
                Vertex::new(Vec3::new(h, h, 0.0), Vec2::new(1.0, 0.0)),
                Vertex::new(Vec3::new(h, -h, 0.0), Vec2::new(1.0, 1.0)),
                Vertex::new(Vec3::new(-h, -h, 0.0), Vec2::new(0.0, 1.0)),
            ],
            vec![0, 1, 2, 0, 2, 3],
        )
    }

    pub fn vertices(&self) -> &[Vertex] {
        &self.vertices
    }

    pub fn indices(&self) -> &[Index] {
        &self.indices
    }

    pub fn rest_center(&self) -> Vec3 {
        self.rest_center
    }
}

/// One physics body.
#[derive(Debug, Clone)]
pub struct Model {
    mesh: Arc<Mesh>,
    id: u32,
    center: Vec3,
    velocity: Vec3,
    rotation_offset: f32,
    mass: f32,
}

impl Model {
    /// A body at the mesh's rest pose, unit mass, at rest.
    pub fn new(mesh: Arc<Mesh>) -> Self {
        let center = mesh.rest_center();
        Self {
            mesh,
            id: 0,
            center,
            velocity: Vec3::ZERO,
            rotation_offset: 0.0,
            mass: 1.0,
        }
    }

    /// The standard head: a 0.6 x 0.6 quad with its own mesh.
    pub fn quad() -> Self {
        Self::new(Arc::new(Mesh::quad(HEAD_HALF_EXTENT)))
    }

    pub fn mesh(&self) -> &Arc<Mesh> {
        &self.mesh
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn set_id(&mut self, id: u32) {
        self.id = id;
    }

    pub fn center(&self) -> Vec3 {
        self.center
    }

    pub fn velocity(&self) -> Vec3 {
        self.velocity
    }

    pub fn set_velocity(&mut self, velocity: Vec3) {
        self.velocity = velocity;
    }

    pub fn mass(&self) -> f32 {
        self.mass
    }

    pub fn set_mass(&mut self, mass: f32) {
        self.mass = mass;
    }

    pub fn rotation_offset(&self) -> f32 {
        self.rotation_offset
    }

    pub fn set_rotation_offset(&mut self, angle: f32) {
        self.rotation_offset = angle.rem_euclid(TAU);
    }

    /// Spin by `angle` radians around the model's center.
    pub fn add_rotation(&mut self, angle: f32) {
        self.set_rotation_offset(self.rotation_offset + angle);
    }

    /// Shift the model by `offset`.
    pub fn translate(&mut self, offset: Vec3) {
        self.center += offset;
    }

    /// Current vertex positions, derived from the rest pose.
    pub fn vertex_positions(&self) -> impl Iterator<Item = Vec3> + '_ {
        let rotation = Mat3::from_rotation_z(self.rotation_offset);
        let rest_center = self.mesh.rest_center();
        let center = self.center;
        self.mesh
            .vertices()
            .iter()
            .map(move |v| rotation * (Vec3::from(v.position) - rest_center) + center)
    }

    /// Current vertices ready for upload.
    pub fn vertices(&self) -> Vec<Vertex> {
        self.vertex_positions()
            .zip(self.mesh.vertices())
            .map(|(position, rest)| Vertex {
                position: position.to_array(),
                uv: rest.uv,
            })
            .collect()
    }

    /// Current vertices as raw bytes, in upload layout.
    pub fn vertex_bytes(&self) -> Vec<u8> {
        bytemuck::cast_slice(&self.vertices()).to_vec()
    }

    /// One explicit Euler step of mutual attraction for every body, followed by
    /// reflection off the `width` x `height` region centered on the origin.
    ///
    /// O(n²) in the number of models.
    pub fn apply_physics(dt: f32, models: &mut [Model], width: f32, height: f32) {
        let accelerations: Vec<Vec3> = (0..models.len())
            .map(|i| {
                let here = models[i].center;
                models
                    .iter()
                    .enumerate()
                    .filter(|&(j, _)| j != i)
                    .fold(Vec3::ZERO, |acc, (_, other)| {
                        let delta = other.center - here;
                        let distance_sq = delta.length_squared().max(MIN_DISTANCE_SQ);
                        acc + delta.normalize_or_zero() * (GRAVITY * other.mass / distance_sq)
                    })
            })
            .collect();

        let half_width = width / 2.0;
        let half_height = height / 2.0;
        for (model, acceleration) in models.iter_mut().zip(accelerations) {
            model.velocity += acceleration * dt;
            model.translate(model.velocity * dt);
            model.reflect(half_width, half_height);
        }
    }

    fn reflect(&mut self, half_width: f32, half_height: f32) {
        if self.center.x < -half_width || self.center.x > half_width {
            self.center.x = self.center.x.clamp(-half_width, half_width);
            self.velocity.x = -self.velocity.x;
        }
        if self.center.y < -half_height || self.center.y > half_height {
            self.center.y = self.center.y.clamp(-half_height, half_height);
            self.velocity.y = -self.velocity.y;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPSILON: f32 = 1e-5;

    fn quad_model() -> Model {
        Model::quad()
    }

    fn positions(model: &Model) -> Vec<Vec3> {
        model.vertex_positions().collect()
    }

    fn assert_close(a: &[Vec3], b: &[Vec3]) {
        assert_eq!(a.len(), b.len());
        for (a, b) in a.iter().zip(b) {
            assert!(a.abs_diff_eq(*b, EPSILON), "{a} != {b}");
        }
    }

    #[test]
    fn translate_round_trip_restores_pose() {
        let mut model = quad_model();
        model.add_rotation(0.7);
        let center = model.center();
        let before = positions(&model);

        let offset = Vec3::new(0.4, -1.25, 0.0);
        model.translate(offset);
        assert!(model.center().abs_diff_eq(center + offset, EPSILON));
        model.translate(-offset);

        assert!(model.center().abs_diff_eq(center, EPSILON));
        assert_close(&positions(&model), &before);
    }

    #[test]
    fn full_turn_returns_to_rest_pose() {
        let mut model = quad_model();
        let rest = positions(&model);
        for _ in 0..100 {
            model.add_rotation(TAU / 100.0);
        }
        for (a, b) in positions(&model).iter().zip(&rest) {
            assert!(a.abs_diff_eq(*b, 1e-4), "{a} != {b}");
        }
    }

    #[test]
    fn rotation_keeps_center() {
        let mut model = quad_model();
        model.translate(Vec3::new(1.0, 1.0, 0.0));
        model.add_rotation(1.3);
        let centroid: Vec3 = model.vertex_positions().sum::<Vec3>() / 4.0;
        assert!(centroid.abs_diff_eq(model.center(), EPSILON));
    }

    #[test]
    fn lone_body_at_rest_stays_put() {
        let mut models = vec![quad_model()];
        models[0].translate(Vec3::new(0.2, -0.4, 0.0));
        let start = models[0].center();

        for _ in 0..100 {
            Model::apply_physics(0.1, &mut models, 2.0, 4.0);
        }

        assert_eq!(models[0].center(), start);
        assert_eq!(models[0].velocity(), Vec3::ZERO);
    }

    #[test]
    fn bodies_attract_each_other() {
        let mut models = vec![quad_model(), quad_model()];
        models[0].translate(Vec3::new(-0.5, 0.0, 0.0));
        models[1].translate(Vec3::new(0.5, 0.0, 0.0));

        Model::apply_physics(0.1, &mut models, 4.0, 4.0);

        assert!(models[0].velocity().x > 0.0);
        assert!(models[1].velocity().x < 0.0);
    }

    #[test]
    fn bodies_stay_inside_the_boundary() {
        let (width, height) = (1.5, 4.0);
        let mut models: Vec<Model> = (0..6)
            .map(|i| {
                let mut model = quad_model();
                model.translate(Vec3::new(0.1 * i as f32 - 0.3, 0.3 * i as f32 - 0.9, 0.0));
                model.set_velocity(Vec3::new(3.0 - i as f32, i as f32 * 2.0 - 5.0, 0.0));
                model.set_mass(1.0 + i as f32);
                model
            })
            .collect();

        for iterations in [1, 5, 50] {
            for _ in 0..iterations {
                Model::apply_physics(0.1, &mut models, width, height);
            }
            for model in &models {
                let c = model.center();
                assert!(c.x >= -width / 2.0 && c.x <= width / 2.0, "x out of bounds: {c}");
                assert!(c.y >= -height / 2.0 && c.y <= height / 2.0, "y out of bounds: {c}");
            }
        }
    }

    #[test]
    fn wall_hit_inverts_velocity() {
        let mut models = vec![quad_model()];
        models[0].set_velocity(Vec3::new(10.0, 0.0, 0.0));

        Model::apply_physics(0.1, &mut models, 1.0, 1.0);

        assert_eq!(models[0].center().x, 0.5);
        assert_eq!(models[0].velocity().x, -10.0);
    }

    #[test]
    fn vertices_carry_rest_uvs() {
        let mut model = quad_model();
        model.add_rotation(0.5);
        let uvs: Vec<[f32; 2]> = model.vertices().iter().map(|v| v.uv).collect();
        let rest: Vec<[f32; 2]> = model.mesh().vertices().iter().map(|v| v.uv).collect();
        assert_eq!(uvs, rest);
        assert_eq!(model.mesh().indices(), &[0, 1, 2, 0, 2, 3]);
    }

    #[test]
    fn vertex_bytes_match_layout() {
        let model = quad_model();
        let bytes = model.vertex_bytes();
        assert_eq!(bytes.len(), 4 * std::mem::size_of::<Vertex>());
        let first: Vertex = bytemuck::pod_read_unaligned(&bytes[..std::mem::size_of::<Vertex>()]);
        assert_eq!(first.uv, [0.0, 0.0]);
        assert_eq!(first.position, [-0.3, 0.3, 0.0]);
    }
}
