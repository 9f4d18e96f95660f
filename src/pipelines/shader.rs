//! Shader programs and the material binding protocol.
//!
//! A [`Shader`] wraps a device program plus declarative binding rules that
//! map material keys to uniforms and texture units. Render passes stay
//! shader agnostic: before each draw they call [`Shader::set_material`] and
//! the rules decide what gets uploaded.
//!
//! Every uniform operation requires the shader to be the bound program of the
//! [`Context`] (see [`Context::bind_shader`]).

use cgmath::Matrix4;

use crate::{
    context::Context,
    data_structures::material::{MaterialRef, MaterialValue},
    device::{MAX_TEXTURE_UNITS, ProgramKey, ShaderSource, TextureKey, UniformValue},
    error::{Error, Result},
};

/// How a material value is uploaded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UniformKind {
    Float,
    Int,
}

#[derive(Clone, Debug)]
struct UniformRule {
    key: String,
    uniform: String,
    kind: UniformKind,
    default: Option<MaterialValue>,
}

#[derive(Clone, Debug)]
struct TextureRule {
    key: String,
    uniform: String,
}

#[derive(Debug)]
pub struct Shader {
    name: String,
    program: Option<ProgramKey>,
    link_error: Option<String>,
    reserved_textures: u32,
    uniform_rules: Vec<UniformRule>,
    texture_rules: Vec<TextureRule>,
}

impl Shader {
    /// Compile `source`. A failure is logged and leaves the shader unlinked;
    /// check [`is_linked`](Self::is_linked) before binding.
    pub fn new(ctx: &mut Context, name: &str, source: &ShaderSource) -> Self {
        match Self::compile(ctx, name, source) {
            Ok(shader) => shader,
            Err(e) => {
                log::error!("{e}");
                Self {
                    link_error: Some(e.to_string()),
                    ..Self::unlinked(name)
                }
            }
        }
    }

    pub fn compile(ctx: &mut Context, name: &str, source: &ShaderSource) -> Result<Self> {
        let program = ctx.device().create_program(name, source)?;
        Ok(Self {
            program: Some(program),
            ..Self::unlinked(name)
        })
    }

    fn unlinked(name: &str) -> Self {
        Self {
            name: name.to_string(),
            program: None,
            link_error: None,
            reserved_textures: 0,
            uniform_rules: Vec::new(),
            texture_rules: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_linked(&self) -> bool {
        self.program.is_some()
    }

    pub fn link_error(&self) -> Option<&str> {
        self.link_error.as_deref()
    }

    pub fn program(&self) -> Option<ProgramKey> {
        self.program
    }

    /// Texture units below `n` are left to the pass; material maps start at `n`.
    pub fn with_reserved_textures(mut self, n: u32) -> Self {
        self.reserved_textures = n;
        self
    }

    pub fn reserved_textures(&self) -> u32 {
        self.reserved_textures
    }

    pub fn bind_material_to_uniform(&mut self, key: &str, uniform: &str, kind: UniformKind) {
        self.add_uniform_rule(key, uniform, kind, None);
    }

    /// Like [`bind_material_to_uniform`](Self::bind_material_to_uniform), but
    /// uploads `default` when the material lacks `key`.
    pub fn bind_material_to_uniform_or(
        &mut self,
        key: &str,
        uniform: &str,
        kind: UniformKind,
        default: impl Into<MaterialValue>,
    ) {
        self.add_uniform_rule(key, uniform, kind, Some(default.into()));
    }

    fn add_uniform_rule(&mut self, key: &str, uniform: &str, kind: UniformKind, default: Option<MaterialValue>) {
        let rule = UniformRule {
            key: key.to_string(),
            uniform: uniform.to_string(),
            kind,
            default,
        };
        match self.uniform_rules.iter_mut().find(|r| r.key == key) {
            Some(existing) => *existing = rule,
            None => self.uniform_rules.push(rule),
        }
    }

    /// Bind the texture map `key` to the sampler `uniform`. Materials
    /// without the map get a 1x1 white texture.
    pub fn bind_material_to_texture(&mut self, key: &str, uniform: &str) {
        let rule = TextureRule {
            key: key.to_string(),
            uniform: uniform.to_string(),
        };
        match self.texture_rules.iter_mut().find(|r| r.key == key) {
            Some(existing) => *existing = rule,
            None => self.texture_rules.push(rule),
        }
    }

    fn bound_program(&self, ctx: &Context) -> Result<ProgramKey> {
        match self.program {
            Some(program) if ctx.bound_program() == Some(program) => Ok(program),
            Some(_) => Err(Error::ShaderNotBound(self.name.clone())),
            None => Err(Error::ShaderNotLinked(self.name.clone())),
        }
    }

    fn upload(&self, ctx: &mut Context, name: &str, value: UniformValue) -> Result<()> {
        let program = self.bound_program(ctx)?;
        ctx.device().set_uniform(program, name, &value);
        Ok(())
    }

    pub fn uniformf(&self, ctx: &mut Context, name: &str, values: &[f32]) -> Result<()> {
        check_components(name, values.len())?;
        self.upload(ctx, name, UniformValue::Float(values.to_vec()))
    }

    pub fn uniformi(&self, ctx: &mut Context, name: &str, values: &[i32]) -> Result<()> {
        check_components(name, values.len())?;
        self.upload(ctx, name, UniformValue::Int(values.to_vec()))
    }

    /// Float array uniform, one value per element.
    pub fn uniform1fv(&self, ctx: &mut Context, name: &str, values: &[f32]) -> Result<()> {
        self.upload(ctx, name, UniformValue::FloatArray(values.to_vec()))
    }

    /// vec2 array uniform. Each element fills the front of its vec4 slot.
    pub fn uniform2fv(&self, ctx: &mut Context, name: &str, values: &[[f32; 2]]) -> Result<()> {
        let padded = values.iter().map(|&[x, y]| [x, y, 0.0, 0.0]).collect();
        self.upload(ctx, name, UniformValue::Vec4Array(padded))
    }

    /// vec3 array uniform, padded like [`uniform2fv`](Self::uniform2fv).
    pub fn uniform3fv(&self, ctx: &mut Context, name: &str, values: &[[f32; 3]]) -> Result<()> {
        let padded = values.iter().map(|&[x, y, z]| [x, y, z, 0.0]).collect();
        self.upload(ctx, name, UniformValue::Vec4Array(padded))
    }

    /// vec4 array uniform.
    pub fn uniform4fv(&self, ctx: &mut Context, name: &str, values: &[[f32; 4]]) -> Result<()> {
        self.upload(ctx, name, UniformValue::Vec4Array(values.to_vec()))
    }

    pub fn uniform_matrixf(&self, ctx: &mut Context, name: &str, m: Matrix4<f32>) -> Result<()> {
        self.upload(ctx, name, UniformValue::Matrix(m.into()))
    }

    /// Bind `texture` to `unit` and point the sampler uniform at that unit.
    pub fn bind_texture(&self, ctx: &mut Context, uniform: &str, unit: u32, texture: TextureKey) -> Result<()> {
        let program = self.bound_program(ctx)?;
        if unit >= MAX_TEXTURE_UNITS {
            return Err(Error::InvalidUniform {
                name: uniform.to_string(),
                message: format!("texture unit {unit} exceeds the {MAX_TEXTURE_UNITS} available"),
            });
        }
        let device = ctx.device();
        device.bind_texture(unit, texture);
        device.set_uniform(program, uniform, &UniformValue::Int(vec![unit as i32]));
        Ok(())
    }

    /// Upload `material` through the binding rules.
    ///
    /// Dirty or unresolved texture maps are loaded first. Texture units are
    /// assigned from `reserved_textures` upwards in rule order.
    pub fn set_material(&self, ctx: &mut Context, material: &MaterialRef) -> Result<()> {
        self.bound_program(ctx)?;
        ctx.resolve_material(material)?;

        for rule in &self.uniform_rules {
            let value = material.borrow().get(&rule.key).cloned();
            let Some(value) = value.or_else(|| rule.default.clone()) else {
                continue;
            };
            let Some(floats) = value.floats() else {
                log::warn!(
                    "material key '{}' is a texture map, cannot upload it to '{}'",
                    rule.key,
                    rule.uniform
                );
                continue;
            };
            let floats = &floats[..floats.len().min(4)];
            match rule.kind {
                UniformKind::Float => self.uniformf(ctx, &rule.uniform, floats)?,
                UniformKind::Int => {
                    let ints: Vec<i32> = floats.iter().map(|v| *v as i32).collect();
                    self.uniformi(ctx, &rule.uniform, &ints)?
                }
            }
        }

        for (i, rule) in self.texture_rules.iter().enumerate() {
            let texture = material.borrow().texture(&rule.key).cloned();
            let texture = match texture {
                Some(texture) => texture,
                None => ctx.white_texture()?,
            };
            let unit = self.reserved_textures + i as u32;
            self.bind_texture(ctx, &rule.uniform, unit, texture.key())?;
        }
        Ok(())
    }
}

fn check_components(name: &str, n: usize) -> Result<()> {
    if (1..=4).contains(&n) {
        Ok(())
    } else {
        Err(Error::InvalidUniform {
            name: name.to_string(),
            message: format!("expected 1 to 4 components, got {n}"),
        })
    }
}
