//! lumen-ngin
//!
//! A small scene renderer built around multi-pass lighting accumulation.
//! Opaque geometry is lit in windows of up to eight lights into a float
//! buffer, composited with its unlit colour and overlaid with sorted
//! transparent geometry. Models come from Wavefront OBJ/MTL files or are
//! built procedurally, and all GPU work goes through the
//! [`GraphicsDevice`](device::GraphicsDevice) trait so a scene can render
//! with wgpu or be recorded for inspection.
//!
//! High-level modules
//! - `camera`: look-at camera with perspective or orthographic projection
//! - `context`: the device plus bound shader, transform stack and texture cache
//! - `data_structures`: meshes, materials, models, lights and the scene graph
//! - `device`: the GPU seam with its wgpu and recording backends
//! - `error`: the crate error type
//! - `pipelines`: shaders, material binding and the render passes
//! - `render`: frame composition
//! - `resources`: OBJ/MTL import and texture loading
//!

pub mod camera;
pub mod context;
pub mod data_structures;
pub mod device;
pub mod error;
pub mod pipelines;
pub mod render;
pub mod resources;

// Re-exports commonly used types for convenience in downstream code.
pub use cgmath::*;
pub use error::{Error, Result};
