//! The GPU seam.
//!
//! Everything the renderer needs from a graphics API goes through
//! [`GraphicsDevice`]: a small, GL-shaped command interface that hands out
//! typed keys into resource tables owned by the backend. Meshes, materials and
//! framebuffers only ever hold those keys.
//!
//! Two backends ship with the crate:
//! - [`wgpu_device::WgpuDevice`] records commands and replays them through wgpu
//!   render passes on [`GraphicsDevice::submit`];
//! - [`recording::RecordingDevice`] keeps the command stream for inspection,
//!   which is what the renderer's protocol tests run against.

use std::{any::Any, borrow::Cow};

use cgmath::Matrix4;

use crate::{
    data_structures::mesh::{DrawMode, Geometry},
    error::Result,
};

pub mod recording;
pub mod wgpu_device;

slotmap::new_key_type! {
    pub struct ProgramKey;
    pub struct MeshKey;
    pub struct TextureKey;
    pub struct FramebufferKey;
}

/// Texture units available to a program.
pub const MAX_TEXTURE_UNITS: u32 = 4;

/// Size in bytes of a program's packed uniform block.
pub const UNIFORM_BLOCK_SIZE: usize = 1024;
const SLOTS: usize = UNIFORM_BLOCK_SIZE / 16;

/// How the fragment colour is combined with the target.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BlendMode {
    /// `src * src_alpha + dst * 0`
    Overwrite,
    /// `src * src_alpha + dst`
    Additive,
    /// `src * src_alpha + dst * (1 - src_alpha)`
    Alpha,
}

/// Constant depth offset applied while rasterizing (polygon offset).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DepthBias {
    pub slope_scale: f32,
    pub constant: i32,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DrawState {
    pub blend: BlendMode,
    pub depth_test: bool,
    pub depth_write: bool,
    pub cull_back_faces: bool,
    pub depth_bias: Option<DepthBias>,
}

impl Default for DrawState {
    fn default() -> Self {
        Self {
            blend: BlendMode::Alpha,
            depth_test: true,
            depth_write: true,
            cull_back_faces: true,
            depth_bias: None,
        }
    }
}

impl Eq for DrawState {}

impl std::hash::Hash for DrawState {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.blend.hash(state);
        self.depth_test.hash(state);
        self.depth_write.hash(state);
        self.cull_back_faces.hash(state);
        self.depth_bias
            .map(|b| (b.slope_scale.to_bits(), b.constant))
            .hash(state);
    }
}

/// A value for a named program uniform.
#[derive(Clone, Debug, PartialEq)]
pub enum UniformValue {
    /// 1 to 4 float components.
    Float(Vec<f32>),
    /// 1 to 4 int components.
    Int(Vec<i32>),
    /// One float per array element.
    FloatArray(Vec<f32>),
    /// One vec4 per array element.
    Vec4Array(Vec<[f32; 4]>),
    Matrix([[f32; 4]; 4]),
}

impl UniformValue {
    pub fn as_floats(&self) -> Option<&[f32]> {
        match self {
            UniformValue::Float(v) | UniformValue::FloatArray(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_ints(&self) -> Option<&[i32]> {
        match self {
            UniformValue::Int(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_vec4s(&self) -> Option<&[[f32; 4]]> {
        match self {
            UniformValue::Vec4Array(v) => Some(v),
            _ => None,
        }
    }
}

/// Shape of a declared uniform. Every element occupies one 16 byte slot,
/// matrices four.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UniformType {
    Float,
    Int,
    Mat4,
}

#[derive(Clone, Debug, PartialEq)]
pub struct UniformDecl {
    pub name: Cow<'static, str>,
    pub ty: UniformType,
    /// Array length, 1 for plain uniforms.
    pub count: usize,
}

impl UniformDecl {
    pub const fn new(name: &'static str, ty: UniformType) -> Self {
        Self::array(name, ty, 1)
    }

    pub const fn array(name: &'static str, ty: UniformType, count: usize) -> Self {
        Self {
            name: Cow::Borrowed(name),
            ty,
            count,
        }
    }

    fn slots(&self) -> usize {
        match self.ty {
            UniformType::Mat4 => 4 * self.count,
            _ => self.count,
        }
    }
}

/// Program source text plus its uniform block declaration.
///
/// `header` is prepended to every stage. The uniform block of a program is
/// laid out from `uniforms` in declaration order, one vec4 slot per element.
#[derive(Clone, Debug, Default)]
pub struct ShaderSource {
    pub header: Cow<'static, str>,
    pub vertex: Cow<'static, str>,
    pub fragment: Cow<'static, str>,
    pub geometry: Option<Cow<'static, str>>,
    pub uniforms: Vec<UniformDecl>,
}

impl ShaderSource {
    /// A single WGSL module providing both `vs_main` and `fs_main`.
    pub fn wgsl(source: &'static str, uniforms: Vec<UniformDecl>) -> Self {
        Self {
            header: Cow::Borrowed(""),
            vertex: Cow::Borrowed(source),
            fragment: Cow::Borrowed(source),
            geometry: None,
            uniforms,
        }
    }
}

/// Where each declared uniform lives inside the packed block.
#[derive(Clone, Debug, Default)]
pub struct UniformLayout {
    entries: Vec<(UniformDecl, usize)>,
}

impl UniformLayout {
    pub fn new(decls: &[UniformDecl]) -> Result<Self> {
        let mut entries = Vec::with_capacity(decls.len());
        let mut slots = 0;
        for decl in decls {
            entries.push((decl.clone(), slots));
            slots += decl.slots();
        }
        if slots > SLOTS {
            return Err(crate::error::Error::InvalidUniform {
                name: decls.last().map(|d| d.name.to_string()).unwrap_or_default(),
                message: format!("uniform block needs {slots} slots, at most {SLOTS} fit"),
            });
        }
        Ok(Self { entries })
    }

    pub fn find(&self, name: &str) -> Option<(&UniformDecl, usize)> {
        self.entries
            .iter()
            .find(|(decl, _)| decl.name == name)
            .map(|(decl, offset)| (decl, *offset))
    }

    /// Write `value` into `block` at the slot of `name`.
    ///
    /// Returns false if the program declares no such uniform, which mirrors
    /// GL silently ignoring unknown locations.
    pub fn write(&self, block: &mut [[u32; 4]], name: &str, value: &UniformValue) -> bool {
        let Some((decl, offset)) = self.find(name) else {
            return false;
        };
        let capacity = decl.slots();
        let slots = &mut block[offset..offset + capacity];
        match value {
            UniformValue::Float(v) => {
                for (c, x) in slots[0].iter_mut().zip(v) {
                    *c = x.to_bits();
                }
            }
            UniformValue::Int(v) => {
                for (c, x) in slots[0].iter_mut().zip(v) {
                    *c = *x as u32;
                }
            }
            UniformValue::FloatArray(v) => {
                for (slot, x) in slots.iter_mut().zip(v) {
                    slot[0] = x.to_bits();
                }
            }
            UniformValue::Vec4Array(v) => {
                for (slot, x) in slots.iter_mut().zip(v) {
                    *slot = x.map(f32::to_bits);
                }
            }
            UniformValue::Matrix(m) => {
                for (slot, column) in slots.iter_mut().zip(m) {
                    *slot = column.map(f32::to_bits);
                }
            }
        }
        true
    }
}

/// Decoded texture with its full mip chain, level 0 first.
#[derive(Clone, Debug)]
pub struct TextureData {
    pub label: String,
    pub levels: Vec<image::RgbaImage>,
}

/// GL-like command interface over a GPU backend.
///
/// State set through this trait (bound program, textures, framebuffer, draw
/// state, camera) persists until changed, and every draw snapshots it.
pub trait GraphicsDevice: Any {
    /// Compile and link a program. Failure leaves nothing allocated.
    fn create_program(&mut self, name: &str, source: &ShaderSource) -> Result<ProgramKey>;

    fn use_program(&mut self, program: Option<ProgramKey>);

    fn set_uniform(&mut self, program: ProgramKey, name: &str, value: &UniformValue);

    fn bind_texture(&mut self, unit: u32, texture: TextureKey);

    fn create_texture(&mut self, data: &TextureData) -> Result<TextureKey>;

    fn destroy_texture(&mut self, texture: TextureKey);

    fn upload_mesh(&mut self, mode: DrawMode, geometry: &Geometry) -> Result<MeshKey>;

    fn destroy_mesh(&mut self, mesh: MeshKey);

    /// Float colour attachment plus depth. Fails if the result is incomplete.
    fn create_framebuffer(&mut self, width: u32, height: u32) -> Result<FramebufferKey>;

    fn resize_framebuffer(&mut self, framebuffer: FramebufferKey, width: u32, height: u32)
    -> Result<()>;

    fn destroy_framebuffer(&mut self, framebuffer: FramebufferKey);

    /// The colour attachment, usable as a sampled texture.
    fn framebuffer_texture(&self, framebuffer: FramebufferKey) -> Option<TextureKey>;

    /// `None` selects the default target.
    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferKey>);

    fn clear(&mut self, colour: Option<[f32; 4]>, depth: bool);

    fn set_draw_state(&mut self, state: DrawState);

    fn set_camera(&mut self, view: Matrix4<f32>, projection: Matrix4<f32>);

    fn draw(&mut self, mesh: MeshKey, model: Matrix4<f32>);

    /// Draw geometry that is not kept in the resource table.
    fn draw_immediate(&mut self, mode: DrawMode, geometry: &Geometry, model: Matrix4<f32>) -> Result<()>;

    /// Flush everything recorded since the last submit.
    fn submit(&mut self) -> Result<()>;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}
