//! Indexed mesh data.
//!
//! A [`Mesh`] couples shared, immutable [`Geometry`] with a material reference.
//! Geometry is reference counted so copies of a model never duplicate vertex
//! buffers, and the GPU upload handle is memoized on the geometry itself.

use std::{cell::Cell, rc::Rc};

use crate::{
    data_structures::material::MaterialRef,
    device::MeshKey,
    error::{Error, Result},
};

/// Primitive assembly for an index buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DrawMode {
    Triangles,
    Quads,
}

impl DrawMode {
    /// Number of indices making up one primitive.
    pub fn corners(self) -> usize {
        match self {
            DrawMode::Triangles => 3,
            DrawMode::Quads => 4,
        }
    }
}

/// A fully resolved vertex, mostly useful for inspection and tests.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Vertex {
    pub position: [f32; 3],
    pub normal: Option<[f32; 3]>,
    pub texcoord: Option<[f32; 2]>,
}

/// Flat vertex arrays plus an index buffer.
///
/// `normals` and `texcoords` are either empty or sized for every vertex.
#[derive(Debug, Default)]
pub struct Geometry {
    pub positions: Vec<f32>,
    pub normals: Vec<f32>,
    pub texcoords: Vec<f32>,
    pub indices: Vec<u32>,
    handle: Cell<Option<MeshKey>>,
}

impl Clone for Geometry {
    // A cloned geometry is new data and has not been uploaded yet.
    fn clone(&self) -> Self {
        Self::new(
            self.positions.clone(),
            self.normals.clone(),
            self.texcoords.clone(),
            self.indices.clone(),
        )
    }
}

impl Geometry {
    pub fn new(
        positions: Vec<f32>,
        normals: Vec<f32>,
        texcoords: Vec<f32>,
        indices: Vec<u32>,
    ) -> Self {
        Self {
            positions,
            normals,
            texcoords,
            indices,
            handle: Cell::new(None),
        }
    }

    pub fn vertex_count(&self) -> usize {
        self.positions.len() / 3
    }

    pub fn has_normals(&self) -> bool {
        !self.normals.is_empty()
    }

    pub fn has_texcoords(&self) -> bool {
        !self.texcoords.is_empty()
    }

    /// Draw handle in the device resource table, once uploaded.
    pub fn handle(&self) -> Option<MeshKey> {
        self.handle.get()
    }

    pub(crate) fn set_handle(&self, handle: Option<MeshKey>) {
        self.handle.set(handle);
    }

    /// Vertex `index` with whichever attributes the geometry has, or `None`
    /// past the end of the position array.
    pub fn vertex(&self, index: u32) -> Option<Vertex> {
        let i = index as usize;
        let position = self.positions.get(3 * i..3 * i + 3)?;
        let normal = self.normals.get(3 * i..3 * i + 3).map(|n| [n[0], n[1], n[2]]);
        let texcoord = self.texcoords.get(2 * i..2 * i + 2).map(|t| [t[0], t[1]]);
        Some(Vertex {
            position: [position[0], position[1], position[2]],
            normal,
            texcoord,
        })
    }

    /// Checks the array length and index range invariants.
    pub fn validate(&self, mode: DrawMode) -> Result<()> {
        if self.positions.len() % 3 != 0 {
            return Err(Error::InvalidMesh(format!(
                "{} position components is not a multiple of 3",
                self.positions.len()
            )));
        }
        let n = self.vertex_count();
        if self.has_normals() && self.normals.len() != 3 * n {
            return Err(Error::InvalidMesh(format!(
                "expected {} normal components, got {}",
                3 * n,
                self.normals.len()
            )));
        }
        if self.has_texcoords() && self.texcoords.len() != 2 * n {
            return Err(Error::InvalidMesh(format!(
                "expected {} texcoord components, got {}",
                2 * n,
                self.texcoords.len()
            )));
        }
        if let Some(bad) = self.indices.iter().find(|&&i| i as usize >= n) {
            return Err(Error::InvalidMesh(format!(
                "index {bad} out of range for {n} vertices"
            )));
        }
        if mode == DrawMode::Quads && self.indices.len() % 4 != 0 {
            return Err(Error::InvalidMesh(format!(
                "{} quad indices is not a multiple of 4",
                self.indices.len()
            )));
        }
        Ok(())
    }

    /// Index buffer expanded to a triangle list.
    ///
    /// Quads `a b c d` become `a b c` and `a c d`, keeping the winding.
    pub fn triangle_indices(&self, mode: DrawMode) -> Vec<u32> {
        match mode {
            DrawMode::Triangles => self.indices.clone(),
            DrawMode::Quads => self
                .indices
                .chunks_exact(4)
                .flat_map(|q| [q[0], q[1], q[2], q[0], q[2], q[3]])
                .collect(),
        }
    }
}

/// One draw list: geometry, a draw mode and a material.
#[derive(Clone, Debug)]
pub struct Mesh {
    pub mode: DrawMode,
    pub geometry: Rc<Geometry>,
    pub material: MaterialRef,
    pub name: Option<String>,
}

impl Mesh {
    pub fn new(mode: DrawMode, geometry: Geometry, material: MaterialRef) -> Result<Self> {
        geometry.validate(mode)?;
        Ok(Self {
            mode,
            geometry: Rc::new(geometry),
            material,
            name: None,
        })
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn vertex_count(&self) -> usize {
        self.geometry.vertex_count()
    }

    /// Primitives resolved to vertices, in draw order.
    pub fn primitives(&self) -> Vec<Vec<Vertex>> {
        self.geometry
            .indices
            .chunks(self.mode.corners())
            .map(|p| p.iter().filter_map(|&i| self.geometry.vertex(i)).collect())
            .collect()
    }

    /// Mirror the mesh so it renders from the inside.
    ///
    /// Normals are negated and every primitive's winding is reversed. The
    /// shared geometry is left untouched; the result owns fresh data.
    pub fn inside_out(&self) -> Result<Mesh> {
        let corners = self.mode.corners();
        if self.geometry.indices.len() % corners != 0 {
            return Err(Error::InvalidMesh(format!(
                "cannot mirror {} indices as groups of {corners}",
                self.geometry.indices.len()
            )));
        }
        let normals = self.geometry.normals.iter().map(|n| -n).collect();
        let indices = self
            .geometry
            .indices
            .chunks_exact(corners)
            .flat_map(|p| p.iter().rev().copied())
            .collect();
        let geometry = Geometry::new(
            self.geometry.positions.clone(),
            normals,
            self.geometry.texcoords.clone(),
            indices,
        );
        Ok(Mesh {
            mode: self.mode,
            geometry: Rc::new(geometry),
            material: self.material.clone(),
            name: self.name.clone(),
        })
    }
}
