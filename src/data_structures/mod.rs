//! Engine data structures: meshes, materials, models, lights and the scene graph.
//!
//! - `mesh` holds indexed geometry and its draw mode
//! - `material` is a keyed bag of values with lazily loaded texture maps
//! - `model` groups meshes and merges them by material
//! - `instance` holds per-node transformation data
//! - `lighting` defines point and directional lights
//! - `primitives` builds quads, planes and spheres
//! - `scene_graph` organizes nodes into a renderable scene
//! - `texture` wraps wgpu textures for the GPU backend

pub mod instance;
pub mod lighting;
pub mod material;
pub mod mesh;
pub mod model;
pub mod primitives;
pub mod scene_graph;
pub mod texture;
