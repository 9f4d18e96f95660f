//! Procedural meshes: single quads, subdivided planes and UV spheres.

use std::{f32::consts::PI, rc::Rc};

use cgmath::{EuclideanSpace, InnerSpace, Point3, Vector3};

use crate::data_structures::{
    material::{Material, MaterialRef},
    mesh::{DrawMode, Geometry, Mesh},
};

fn mesh(mode: DrawMode, geometry: Geometry, material: MaterialRef, name: &str) -> Mesh {
    Mesh {
        mode,
        geometry: Rc::new(geometry),
        material,
        name: Some(name.to_string()),
    }
}

/// A single flat-shaded quad through four coplanar points, counter-clockwise
/// when seen from the front.
pub fn quad(points: [Point3<f32>; 4], material: Option<MaterialRef>) -> Mesh {
    let material = material.unwrap_or_else(|| Material::new("quad_material").shared());
    let mut normals = Vec::with_capacity(12);
    for (i, &p) in points.iter().enumerate() {
        let prev = points[(i + 3) % 4];
        let next = points[(i + 1) % 4];
        let n = (next - p).cross(prev - p).normalize();
        normals.extend_from_slice(&[n.x, n.y, n.z]);
    }
    let positions = points.iter().flat_map(|p| [p.x, p.y, p.z]).collect();
    let texcoords = vec![0.0, 0.0, 0.0, 1.0, 1.0, 1.0, 1.0, 0.0];
    mesh(
        DrawMode::Quads,
        Geometry::new(positions, normals, texcoords, vec![0, 1, 2, 3]),
        material,
        "quad",
    )
}

/// Square grid of `divisions * divisions` quads.
#[derive(Clone, Debug)]
pub struct Plane {
    pub center: Point3<f32>,
    pub normal: Vector3<f32>,
    pub size: f32,
    pub divisions: u32,
}

impl Default for Plane {
    fn default() -> Self {
        Self {
            center: Point3::origin(),
            normal: Vector3::unit_y(),
            size: 1000.0,
            divisions: 1,
        }
    }
}

impl Plane {
    pub fn build(&self, material: Option<MaterialRef>) -> Mesh {
        let material = material.unwrap_or_else(|| Material::new("plane_material").shared());
        let divisions = self.divisions.max(1);
        let normal = self.normal.normalize();
        let mut x = Vector3::unit_y().cross(normal);
        if x.magnitude2() < 1e-3 {
            x = Vector3::unit_z().cross(normal);
        }
        let x = x.normalize();
        let y = x.cross(normal);
        let step = self.size / divisions as f32;
        let (sx, sy) = (x * step, y * step);
        let half = divisions as f32 * 0.5;

        let mut positions = Vec::new();
        let mut normals = Vec::new();
        let mut texcoords = Vec::new();
        for j in 0..=divisions {
            for i in 0..=divisions {
                let p = self.center + sx * (i as f32 - half) + sy * (j as f32 - half);
                positions.extend_from_slice(&[p.x, p.y, p.z]);
                normals.extend_from_slice(&[normal.x, normal.y, normal.z]);
                texcoords.extend_from_slice(&[
                    i as f32 / divisions as f32,
                    j as f32 / divisions as f32,
                ]);
            }
        }

        let idx = |i: u32, j: u32| j * (divisions + 1) + i;
        let mut indices = Vec::with_capacity(4 * (divisions * divisions) as usize);
        for j in 0..divisions {
            for i in 0..divisions {
                indices.extend_from_slice(&[idx(i, j + 1), idx(i + 1, j + 1), idx(i + 1, j), idx(i, j)]);
            }
        }

        mesh(
            DrawMode::Quads,
            Geometry::new(positions, normals, texcoords, indices),
            material,
            "plane",
        )
    }
}

/// UV sphere around the origin.
#[derive(Clone, Debug)]
pub struct Sphere {
    pub radius: f32,
    /// Flip normals and winding so the inside is rendered (sky domes).
    pub inside: bool,
    pub latitude_divisions: u32,
    pub longitude_divisions: u32,
}

impl Default for Sphere {
    fn default() -> Self {
        Self {
            radius: 1.0,
            inside: false,
            latitude_divisions: 20,
            longitude_divisions: 40,
        }
    }
}

impl Sphere {
    pub fn build(&self, material: Option<MaterialRef>) -> Mesh {
        let material = material.unwrap_or_else(|| Material::new("sphere_material").shared());
        let (lats, lngs) = (self.latitude_divisions.max(2), self.longitude_divisions.max(3));

        let mut positions = Vec::new();
        let mut normals = Vec::new();
        let mut texcoords = Vec::new();
        for lat in 0..=lats {
            // 0 at the north pole, pi at the south pole
            let theta = lat as f32 * PI / lats as f32;
            for lng in 0..=lngs {
                let phi = lng as f32 * 2.0 * PI / lngs as f32;
                let n = [phi.cos() * theta.sin(), theta.cos(), phi.sin() * theta.sin()];
                normals.extend_from_slice(&n);
                positions.extend(n.iter().map(|c| c * self.radius));
                texcoords.extend_from_slice(&[
                    1.0 - lng as f32 / lngs as f32,
                    1.0 - lat as f32 / lats as f32,
                ]);
            }
        }

        let mut indices = Vec::with_capacity(6 * (lats * lngs) as usize);
        for lat in 0..lats {
            for lng in 0..lngs {
                let i = lat * (lngs + 1) + lng;
                let j = i + lngs + 1;
                indices.extend_from_slice(&[i + 1, j, i, i + 1, j + 1, j]);
            }
        }

        if self.inside {
            for n in normals.iter_mut() {
                *n = -*n;
            }
            for tri in indices.chunks_exact_mut(3) {
                tri.reverse();
            }
        }

        mesh(
            DrawMode::Triangles,
            Geometry::new(positions, normals, texcoords, indices),
            material,
            "sphere",
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plane_faces_its_normal() {
        let plane = Plane {
            size: 2.0,
            ..Default::default()
        }
        .build(None);
        assert_eq!(plane.vertex_count(), 4);
        let prim = &plane.primitives()[0];
        let p = |i: usize| Vector3::from(prim[i].position);
        let n = (p(1) - p(0)).cross(p(2) - p(0)).normalize();
        assert!((n - Vector3::unit_y()).magnitude() < 1e-5);
    }

    #[test]
    fn inside_sphere_is_the_mirrored_sphere() {
        let outside = Sphere::default().build(None);
        let inside = Sphere {
            inside: true,
            ..Default::default()
        }
        .build(None);
        let mirrored = outside.inside_out().unwrap();
        assert_eq!(inside.geometry.indices, mirrored.geometry.indices);
        assert_eq!(inside.geometry.normals, mirrored.geometry.normals);
    }
}
