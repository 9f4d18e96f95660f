//! Models: ordered mesh collections sharing one coordinate space.

use std::{cell::RefCell, collections::HashMap, rc::Rc};

use crate::data_structures::{
    material::{Material, MaterialRef},
    mesh::{DrawMode, Geometry, Mesh},
};

#[derive(Clone, Debug, Default)]
pub struct Model {
    pub meshes: Vec<Mesh>,
}

impl From<Mesh> for Model {
    fn from(mesh: Mesh) -> Self {
        Model { meshes: vec![mesh] }
    }
}

impl Model {
    pub fn new(meshes: Vec<Mesh>) -> Self {
        Self { meshes }
    }

    /// True once every mesh has been uploaded to a device.
    pub fn is_prepared(&self) -> bool {
        self.meshes.iter().all(|m| m.geometry.handle().is_some())
    }

    /// Distinct materials in first-use order.
    pub fn materials(&self) -> Vec<MaterialRef> {
        let mut seen = Vec::<MaterialRef>::new();
        for mesh in &self.meshes {
            if !seen.iter().any(|m| Rc::ptr_eq(m, &mesh.material)) {
                seen.push(mesh.material.clone());
            }
        }
        seen
    }

    /// Merge meshes sharing a draw mode and material into one draw list.
    ///
    /// Merged groups keep the order in which their first mesh appeared.
    /// Indices are re-based by the running vertex count so the resolved
    /// primitives are identical to the unmerged model.
    pub fn optimise(&mut self) {
        let mut groups: Vec<MergeGroup> = Vec::new();
        let mut lookup: HashMap<(DrawMode, *const RefCell<Material>), usize> = HashMap::new();

        for mesh in self.meshes.drain(..) {
            let key = (mesh.mode, Rc::as_ptr(&mesh.material));
            let idx = *lookup.entry(key).or_insert_with(|| {
                groups.push(MergeGroup::new(&mesh));
                groups.len() - 1
            });
            groups[idx].append(&mesh.geometry);
        }

        self.meshes = groups.into_iter().map(MergeGroup::into_mesh).collect();
    }

    /// Structural copy: geometry is shared, materials are duplicated.
    ///
    /// Meshes that shared a material in `self` share one duplicate in the copy.
    pub fn copy(&self) -> Model {
        let mut copies: HashMap<*const RefCell<Material>, MaterialRef> = HashMap::new();
        let meshes = self
            .meshes
            .iter()
            .map(|mesh| {
                let material = copies
                    .entry(Rc::as_ptr(&mesh.material))
                    .or_insert_with(|| Rc::new(RefCell::new(mesh.material.borrow().clone())))
                    .clone();
                Mesh {
                    mode: mesh.mode,
                    geometry: mesh.geometry.clone(),
                    material,
                    name: mesh.name.clone(),
                }
            })
            .collect();
        Model { meshes }
    }
}

struct MergeGroup {
    mode: DrawMode,
    material: MaterialRef,
    name: Option<String>,
    vertices: usize,
    positions: Vec<f32>,
    normals: Vec<f32>,
    texcoords: Vec<f32>,
    indices: Vec<u32>,
}

impl MergeGroup {
    fn new(mesh: &Mesh) -> Self {
        Self {
            mode: mesh.mode,
            material: mesh.material.clone(),
            name: mesh.name.clone(),
            vertices: 0,
            positions: Vec::new(),
            normals: Vec::new(),
            texcoords: Vec::new(),
            indices: Vec::new(),
        }
    }

    fn append(&mut self, geometry: &Geometry) {
        let offset = self.vertices as u32;
        let count = geometry.vertex_count();
        self.positions.extend_from_slice(&geometry.positions);
        append_attribute(&mut self.normals, self.vertices, &geometry.normals, count, 3);
        append_attribute(&mut self.texcoords, self.vertices, &geometry.texcoords, count, 2);
        self.indices
            .extend(geometry.indices.iter().map(|i| i + offset));
        self.vertices += count;
    }

    fn into_mesh(self) -> Mesh {
        Mesh {
            mode: self.mode,
            geometry: Rc::new(Geometry::new(
                self.positions,
                self.normals,
                self.texcoords,
                self.indices,
            )),
            material: self.material,
            name: self.name,
        }
    }
}

// Keeps an optional attribute either empty or sized for every vertex when
// merging meshes that disagree on whether they carry it.
fn append_attribute(dst: &mut Vec<f32>, dst_vertices: usize, src: &[f32], src_vertices: usize, width: usize) {
    match (dst.is_empty() && dst_vertices > 0, src.is_empty()) {
        (_, true) if dst.is_empty() => {}
        (_, true) => dst.resize(dst.len() + width * src_vertices, 0.0),
        (true, false) => {
            dst.resize(width * dst_vertices, 0.0);
            dst.extend_from_slice(src);
        }
        (false, false) => dst.extend_from_slice(src),
    }
}
