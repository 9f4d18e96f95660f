//! The binding context.
//!
//! [`Context`] owns the [`GraphicsDevice`] and everything that would
//! otherwise be global render state: which shader is bound, the model
//! transform stack and the texture cache. Shaders are bound through
//! [`Context::bind_shader`], which hands out a [`ShaderGuard`] that restores
//! the previous binding when dropped, on every exit path.

use std::{
    ops::{Deref, DerefMut},
    path::Path,
    rc::Rc,
};

use cgmath::{Matrix4, SquareMatrix};

use crate::{
    data_structures::{material::MaterialRef, mesh::Mesh},
    device::{GraphicsDevice, MeshKey, ProgramKey},
    error::{Error, Result},
    pipelines::shader::Shader,
    resources::texture::{FileTextureSource, GpuTexture, TextureCache, TextureSource},
};

pub struct Context {
    device: Box<dyn GraphicsDevice>,
    active: Option<Rc<Shader>>,
    transforms: Vec<Matrix4<f32>>,
    textures: TextureCache,
}

impl Context {
    pub fn new(device: impl GraphicsDevice) -> Self {
        Self::with_texture_source(device, FileTextureSource)
    }

    pub fn with_texture_source(device: impl GraphicsDevice, source: impl TextureSource + 'static) -> Self {
        Self {
            device: Box::new(device),
            active: None,
            transforms: vec![Matrix4::identity()],
            textures: TextureCache::new(Box::new(source)),
        }
    }

    pub fn device(&mut self) -> &mut dyn GraphicsDevice {
        self.device.as_mut()
    }

    pub fn device_ref(&self) -> &dyn GraphicsDevice {
        self.device.as_ref()
    }

    /// The concrete backend, e.g. to read back a frame or set the target.
    pub fn device_as<T: GraphicsDevice>(&mut self) -> Option<&mut T> {
        self.device.as_any_mut().downcast_mut::<T>()
    }

    /// Bind `shader` until the returned guard is dropped.
    pub fn bind_shader(&mut self, shader: &Rc<Shader>) -> Result<ShaderGuard<'_>> {
        let program = shader
            .program()
            .ok_or_else(|| Error::ShaderNotLinked(shader.name().to_string()))?;
        let previous = self.active.replace(shader.clone());
        self.device.use_program(Some(program));
        Ok(ShaderGuard {
            ctx: self,
            previous,
        })
    }

    pub fn active_shader(&self) -> Option<&Rc<Shader>> {
        self.active.as_ref()
    }

    pub fn bound_program(&self) -> Option<ProgramKey> {
        self.active.as_ref().and_then(|s| s.program())
    }

    fn restore(&mut self, previous: Option<Rc<Shader>>) {
        self.device
            .use_program(previous.as_ref().and_then(|s| s.program()));
        self.active = previous;
    }

    /// Current model transform (top of the stack).
    pub fn transform(&self) -> Matrix4<f32> {
        self.transforms
            .last()
            .copied()
            .unwrap_or_else(Matrix4::identity)
    }

    /// Push `m` composed with the current transform.
    pub fn push_transform(&mut self, m: Matrix4<f32>) {
        let top = self.transform() * m;
        self.transforms.push(top);
    }

    pub fn pop_transform(&mut self) {
        if self.transforms.len() > 1 {
            self.transforms.pop();
        } else {
            log::warn!("unbalanced pop_transform ignored");
        }
    }

    /// Run `f` with `m` pushed onto the transform stack.
    pub fn with_transform<T>(
        &mut self,
        m: Matrix4<f32>,
        f: impl FnOnce(&mut Self) -> Result<T>,
    ) -> Result<T> {
        self.push_transform(m);
        let result = f(self);
        self.pop_transform();
        result
    }

    /// Upload the mesh geometry unless it already is. Shared geometry is
    /// uploaded once.
    pub fn upload_mesh(&mut self, mesh: &Mesh) -> Result<MeshKey> {
        if let Some(handle) = mesh.geometry.handle() {
            return Ok(handle);
        }
        let handle = self.device.upload_mesh(mesh.mode, &mesh.geometry)?;
        mesh.geometry.set_handle(Some(handle));
        Ok(handle)
    }

    /// Free the device buffers of `mesh`. Other meshes sharing its geometry
    /// lose their upload too.
    pub fn release_mesh(&mut self, mesh: &Mesh) {
        if let Some(handle) = mesh.geometry.handle() {
            self.device.destroy_mesh(handle);
            mesh.geometry.set_handle(None);
        }
    }

    pub fn load_texture(&mut self, path: &Path) -> Result<Rc<GpuTexture>> {
        self.textures.load(self.device.as_mut(), path)
    }

    pub fn white_texture(&mut self) -> Result<Rc<GpuTexture>> {
        self.textures.white(self.device.as_mut())
    }

    pub fn is_texture_cached(&self, path: &Path) -> bool {
        self.textures.is_cached(path)
    }

    /// Load every dirty or unresolved texture map of `material`.
    pub fn resolve_material(&mut self, material: &MaterialRef) -> Result<()> {
        let pending = material.borrow().unresolved_maps();
        for (key, path) in pending {
            let texture = self.load_texture(&path)?;
            material.borrow_mut().store_texture(&key, texture);
        }
        Ok(())
    }

    /// Free device textures no material uses any more. Returns how many.
    pub fn collect_garbage(&mut self) -> usize {
        self.textures.collect(self.device.as_mut())
    }
}

/// Keeps a shader bound. Derefs to the [`Context`].
pub struct ShaderGuard<'a> {
    ctx: &'a mut Context,
    previous: Option<Rc<Shader>>,
}

impl Deref for ShaderGuard<'_> {
    type Target = Context;

    fn deref(&self) -> &Context {
        self.ctx
    }
}

impl DerefMut for ShaderGuard<'_> {
    fn deref_mut(&mut self) -> &mut Context {
        self.ctx
    }
}

impl Drop for ShaderGuard<'_> {
    fn drop(&mut self) {
        let previous = self.previous.take();
        self.ctx.restore(previous);
    }
}
