// src/scene/mesh.rs
// Host triangle meshes and their instances
// Exists so meshes carry geometry plus material/medium references by scene index

use crate::error::{RenderError, RenderResult};
use glam::{Mat4, Vec2, Vec3};

/// Indexed triangle mesh. Optional attribute arrays are either empty or one per vertex.
///
/// A mesh without a material is a medium boundary: rays pass through it and
/// switch between its inside and outside media.
#[derive(Clone, Debug, Default)]
pub struct Mesh {
    pub positions: Vec<Vec3>,
    pub normals: Vec<Vec3>,
    pub texcoords: Vec<Vec2>,
    pub tangents: Vec<Vec3>,
    pub indices: Vec<[u32; 3]>,
    pub material: Option<usize>,
    pub inside_medium: Option<usize>,
    pub outside_medium: Option<usize>,
    /// Emitted radiance of every triangle, independent of the material.
    pub le: Vec3,
}

impl Mesh {
    pub fn new(positions: Vec<Vec3>, indices: Vec<[u32; 3]>) -> Self {
        Self {
            positions,
            indices,
            ..Self::default()
        }
    }

    pub fn with_material(mut self, material: usize) -> Self {
        self.material = Some(material);
        self
    }

    pub fn with_media(mut self, inside: Option<usize>, outside: Option<usize>) -> Self {
        self.inside_medium = inside;
        self.outside_medium = outside;
        self
    }

    pub fn with_emission(mut self, le: Vec3) -> Self {
        self.le = le;
        self
    }

    pub fn triangle() -> Self {
        Self::new(
            vec![Vec3::ZERO, Vec3::X, Vec3::new(0.5, 1.0, 0.0)],
            vec![[0, 1, 2]],
        )
    }

    /// Two-triangle quad spanning `center ± u ± v`.
    pub fn quad(center: Vec3, u: Vec3, v: Vec3) -> Self {
        Self::new(
            vec![center - u - v, center + u - v, center + u + v, center - u + v],
            vec![[0, 1, 2], [0, 2, 3]],
        )
    }

    /// Axis-aligned box (12 triangles).
    pub fn cuboid(min: Vec3, max: Vec3) -> Self {
        let positions = (0..8)
            .map(|i| {
                Vec3::new(
                    if i & 1 == 0 { min.x } else { max.x },
                    if i & 2 == 0 { min.y } else { max.y },
                    if i & 4 == 0 { min.z } else { max.z },
                )
            })
            .collect();
        let indices = vec![
            [0, 2, 1], [1, 2, 3], // -z
            [4, 5, 6], [5, 7, 6], // +z
            [0, 1, 4], [1, 5, 4], // -y
            [2, 6, 3], [3, 6, 7], // +y
            [0, 4, 2], [2, 4, 6], // -x
            [1, 3, 5], [3, 7, 5], // +x
        ];
        Self::new(positions, indices)
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len()
    }

    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn triangle_vertices(&self, tri: usize) -> Option<[Vec3; 3]> {
        let [a, b, c] = *self.indices.get(tri)?;
        Some([
            *self.positions.get(a as usize)?,
            *self.positions.get(b as usize)?,
            *self.positions.get(c as usize)?,
        ])
    }

    pub fn is_emissive(&self) -> bool {
        self.le.max_element() > 0.0
    }

    pub fn validate(&self) -> RenderResult<()> {
        if self.positions.is_empty() || self.indices.is_empty() {
            return Err(RenderError::upload("mesh has no vertices or no triangles"));
        }
        let vertex_count = self.positions.len();
        for (tri, corners) in self.indices.iter().enumerate() {
            if let Some(&bad) = corners.iter().find(|&&v| v as usize >= vertex_count) {
                return Err(RenderError::upload(format!(
                    "triangle {tri} references vertex {bad} of {vertex_count}"
                )));
            }
        }
        let attributes = [
            ("normals", self.normals.len()),
            ("texcoords", self.texcoords.len()),
            ("tangents", self.tangents.len()),
        ];
        for (name, len) in attributes {
            if len != 0 && len != vertex_count {
                return Err(RenderError::upload(format!(
                    "mesh has {len} {name} for {vertex_count} vertices"
                )));
            }
        }
        let degenerate = (0..self.triangle_count())
            .filter_map(|tri| self.triangle_vertices(tri))
            .filter(|[a, b, c]| (*b - *a).cross(*c - *a).length() < 1e-8)
            .count();
        if degenerate > 0 {
            log::warn!("Mesh contains {degenerate} degenerate triangles");
        }
        Ok(())
    }
}

/// Placement of a mesh in the world.
#[derive(Clone, Debug, PartialEq)]
pub struct MeshInstance {
    pub mesh: usize,
    pub transform: Mat4,
}

impl MeshInstance {
    pub fn new(mesh: usize) -> Self {
        Self {
            mesh,
            transform: Mat4::IDENTITY,
        }
    }

    pub fn with_transform(mesh: usize, transform: Mat4) -> Self {
        Self { mesh, transform }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builders_produce_valid_meshes() {
        for mesh in [
            Mesh::triangle(),
            Mesh::quad(Vec3::ZERO, Vec3::X, Vec3::Y),
            Mesh::cuboid(Vec3::ZERO, Vec3::ONE),
        ] {
            mesh.validate().unwrap();
        }
        assert_eq!(Mesh::cuboid(Vec3::ZERO, Vec3::ONE).triangle_count(), 12);
    }

    #[test]
    fn validation_rejects_bad_indices_and_attributes() {
        let mesh = Mesh::new(vec![Vec3::ZERO, Vec3::X], vec![[0, 1, 2]]);
        assert!(mesh.validate().is_err());
        let mut mesh = Mesh::triangle();
        mesh.normals = vec![Vec3::Z];
        assert!(mesh.validate().is_err());
        assert!(Mesh::default().validate().is_err());
    }

    #[test]
    fn cuboid_faces_have_full_area() {
        let mesh = Mesh::cuboid(Vec3::ZERO, Vec3::splat(2.0));
        let area: f32 = (0..mesh.triangle_count())
            .filter_map(|t| mesh.triangle_vertices(t))
            .map(|[a, b, c]| 0.5 * (b - a).cross(c - a).length())
            .sum();
        assert!((area - 24.0).abs() < 1e-4);
    }
}
