//! A [`GraphicsDevice`] that records instead of rendering.
//!
//! Every call is appended to a command log and every draw is captured with a
//! full snapshot of the state it would have been issued under, so tests can
//! check what the renderer asked for without a GPU.

use std::{any::Any, collections::BTreeMap};

use cgmath::{Matrix4, SquareMatrix};
use slotmap::SlotMap;

use crate::{
    data_structures::mesh::{DrawMode, Geometry},
    device::{
        DrawState, FramebufferKey, GraphicsDevice, MAX_TEXTURE_UNITS, MeshKey, ProgramKey,
        ShaderSource, TextureData, TextureKey, UniformLayout, UniformValue,
    },
    error::{Error, Result},
};

const UNITS: usize = MAX_TEXTURE_UNITS as usize;

#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    CreateProgram(String),
    UseProgram(Option<ProgramKey>),
    SetUniform {
        program: ProgramKey,
        name: String,
        value: UniformValue,
    },
    BindTexture(u32, TextureKey),
    CreateTexture(TextureKey),
    DestroyTexture(TextureKey),
    UploadMesh(MeshKey),
    DestroyMesh(MeshKey),
    CreateFramebuffer {
        framebuffer: FramebufferKey,
        width: u32,
        height: u32,
    },
    ResizeFramebuffer {
        framebuffer: FramebufferKey,
        width: u32,
        height: u32,
    },
    DestroyFramebuffer(FramebufferKey),
    BindFramebuffer(Option<FramebufferKey>),
    Clear {
        colour: Option<[f32; 4]>,
        depth: bool,
    },
    SetDrawState(DrawState),
    /// Index into [`RecordingDevice::draws`].
    Draw(usize),
    Submit,
}

/// A draw together with the state it was issued under.
#[derive(Clone, Debug)]
pub struct DrawRecord {
    pub program: ProgramKey,
    /// `None` for immediate geometry.
    pub mesh: Option<MeshKey>,
    pub mode: DrawMode,
    pub geometry: Geometry,
    pub framebuffer: Option<FramebufferKey>,
    pub state: DrawState,
    pub textures: [Option<TextureKey>; UNITS],
    pub uniforms: BTreeMap<String, UniformValue>,
    pub model: Matrix4<f32>,
    pub view: Matrix4<f32>,
    pub projection: Matrix4<f32>,
}

impl DrawRecord {
    pub fn uniform(&self, name: &str) -> Option<&UniformValue> {
        self.uniforms.get(name)
    }

    pub fn float(&self, name: &str) -> Option<f32> {
        self.uniform(name)
            .and_then(UniformValue::as_floats)
            .and_then(|v| v.first().copied())
    }

    pub fn int(&self, name: &str) -> Option<i32> {
        self.uniform(name)
            .and_then(UniformValue::as_ints)
            .and_then(|v| v.first().copied())
    }
}

struct Program {
    name: String,
    layout: UniformLayout,
    uniforms: BTreeMap<String, UniformValue>,
}

struct Mesh {
    mode: DrawMode,
    geometry: Geometry,
}

struct Framebuffer {
    colour: TextureKey,
    size: (u32, u32),
}

pub struct RecordingDevice {
    max_texture_size: u32,
    programs: SlotMap<ProgramKey, Program>,
    meshes: SlotMap<MeshKey, Mesh>,
    textures: SlotMap<TextureKey, (u32, u32)>,
    framebuffers: SlotMap<FramebufferKey, Framebuffer>,
    commands: Vec<Command>,
    draws: Vec<DrawRecord>,
    program: Option<ProgramKey>,
    framebuffer: Option<FramebufferKey>,
    state: DrawState,
    units: [Option<TextureKey>; UNITS],
    view: Matrix4<f32>,
    projection: Matrix4<f32>,
}

impl Default for RecordingDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingDevice {
    pub fn new() -> Self {
        Self::with_max_texture_size(8192)
    }

    /// Framebuffers larger than `max` in either dimension are incomplete.
    pub fn with_max_texture_size(max: u32) -> Self {
        Self {
            max_texture_size: max,
            programs: SlotMap::with_key(),
            meshes: SlotMap::with_key(),
            textures: SlotMap::with_key(),
            framebuffers: SlotMap::with_key(),
            commands: Vec::new(),
            draws: Vec::new(),
            program: None,
            framebuffer: None,
            state: DrawState::default(),
            units: [None; UNITS],
            view: Matrix4::identity(),
            projection: Matrix4::identity(),
        }
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn draws(&self) -> &[DrawRecord] {
        &self.draws
    }

    /// Forget recorded commands and draws. Resources stay alive.
    pub fn clear_commands(&mut self) {
        self.commands.clear();
        self.draws.clear();
    }

    pub fn bound_program(&self) -> Option<ProgramKey> {
        self.program
    }

    pub fn program_name(&self, program: ProgramKey) -> Option<&str> {
        self.programs.get(program).map(|p| p.name.as_str())
    }

    pub fn live_meshes(&self) -> usize {
        self.meshes.len()
    }

    pub fn live_textures(&self) -> usize {
        self.textures.len()
    }

    pub fn framebuffer_size(&self, framebuffer: FramebufferKey) -> Option<(u32, u32)> {
        self.framebuffers.get(framebuffer).map(|fb| fb.size)
    }

    fn check_framebuffer(&self, width: u32, height: u32) -> Result<()> {
        let reason = if width == 0 || height == 0 {
            "zero-sized attachment"
        } else if width > self.max_texture_size || height > self.max_texture_size {
            "attachment exceeds the maximum texture dimension"
        } else {
            return Ok(());
        };
        Err(Error::FramebufferIncomplete {
            width,
            height,
            reason: reason.to_string(),
        })
    }

    fn record_draw(&mut self, mesh: Option<MeshKey>, mode: DrawMode, geometry: Geometry, model: Matrix4<f32>) {
        let Some(program) = self.program.filter(|p| self.programs.contains_key(*p)) else {
            log::warn!("draw issued without a bound program, skipped");
            return;
        };
        let uniforms = self.programs[program].uniforms.clone();
        self.draws.push(DrawRecord {
            program,
            mesh,
            mode,
            geometry,
            framebuffer: self.framebuffer,
            state: self.state,
            textures: self.units,
            uniforms,
            model,
            view: self.view,
            projection: self.projection,
        });
        self.commands.push(Command::Draw(self.draws.len() - 1));
    }
}

fn check_stage(name: &str, stage: &str, body: &str, entry: &str) -> Result<()> {
    if body.contains(entry) {
        Ok(())
    } else {
        Err(Error::ShaderCompile {
            name: format!("{name} ({stage})"),
            message: format!("missing entry point `{entry}`"),
        })
    }
}

impl GraphicsDevice for RecordingDevice {
    fn create_program(&mut self, name: &str, source: &ShaderSource) -> Result<ProgramKey> {
        if source.geometry.is_some() {
            return Err(Error::ShaderCompile {
                name: name.to_string(),
                message: "geometry stages are not supported".to_string(),
            });
        }
        check_stage(name, "vertex", &source.vertex, "fn vs_main")?;
        check_stage(name, "fragment", &source.fragment, "fn fs_main")?;
        let layout = UniformLayout::new(&source.uniforms)?;
        self.commands.push(Command::CreateProgram(name.to_string()));
        Ok(self.programs.insert(Program {
            name: name.to_string(),
            layout,
            uniforms: BTreeMap::new(),
        }))
    }

    fn use_program(&mut self, program: Option<ProgramKey>) {
        self.program = program;
        self.commands.push(Command::UseProgram(program));
    }

    fn set_uniform(&mut self, program: ProgramKey, name: &str, value: &UniformValue) {
        if let Some(p) = self.programs.get_mut(program) {
            if p.layout.find(name).is_some() {
                p.uniforms.insert(name.to_string(), value.clone());
            }
        }
        self.commands.push(Command::SetUniform {
            program,
            name: name.to_string(),
            value: value.clone(),
        });
    }

    fn bind_texture(&mut self, unit: u32, texture: TextureKey) {
        if let Some(slot) = self.units.get_mut(unit as usize) {
            *slot = Some(texture);
        }
        self.commands.push(Command::BindTexture(unit, texture));
    }

    fn create_texture(&mut self, data: &TextureData) -> Result<TextureKey> {
        let size = data
            .levels
            .first()
            .map(|img| img.dimensions())
            .ok_or_else(|| anyhow::anyhow!("texture '{}' has no image data", data.label))?;
        let key = self.textures.insert(size);
        self.commands.push(Command::CreateTexture(key));
        Ok(key)
    }

    fn destroy_texture(&mut self, texture: TextureKey) {
        self.textures.remove(texture);
        self.commands.push(Command::DestroyTexture(texture));
    }

    fn upload_mesh(&mut self, mode: DrawMode, geometry: &Geometry) -> Result<MeshKey> {
        geometry.validate(mode)?;
        let key = self.meshes.insert(Mesh {
            mode,
            geometry: geometry.clone(),
        });
        self.commands.push(Command::UploadMesh(key));
        Ok(key)
    }

    fn destroy_mesh(&mut self, mesh: MeshKey) {
        self.meshes.remove(mesh);
        self.commands.push(Command::DestroyMesh(mesh));
    }

    fn create_framebuffer(&mut self, width: u32, height: u32) -> Result<FramebufferKey> {
        self.check_framebuffer(width, height)?;
        let colour = self.textures.insert((width, height));
        let framebuffer = self.framebuffers.insert(Framebuffer {
            colour,
            size: (width, height),
        });
        self.commands.push(Command::CreateFramebuffer {
            framebuffer,
            width,
            height,
        });
        Ok(framebuffer)
    }

    fn resize_framebuffer(&mut self, framebuffer: FramebufferKey, width: u32, height: u32) -> Result<()> {
        self.check_framebuffer(width, height)?;
        let fb = self
            .framebuffers
            .get_mut(framebuffer)
            .ok_or(Error::UnknownResource("framebuffer"))?;
        fb.size = (width, height);
        if let Some(colour) = self.textures.get_mut(fb.colour) {
            *colour = (width, height);
        }
        self.commands.push(Command::ResizeFramebuffer {
            framebuffer,
            width,
            height,
        });
        Ok(())
    }

    fn destroy_framebuffer(&mut self, framebuffer: FramebufferKey) {
        if let Some(fb) = self.framebuffers.remove(framebuffer) {
            self.textures.remove(fb.colour);
        }
        self.commands.push(Command::DestroyFramebuffer(framebuffer));
    }

    fn framebuffer_texture(&self, framebuffer: FramebufferKey) -> Option<TextureKey> {
        self.framebuffers.get(framebuffer).map(|fb| fb.colour)
    }

    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferKey>) {
        if let Some(colour) = framebuffer.and_then(|fb| self.framebuffer_texture(fb)) {
            for unit in self.units.iter_mut() {
                if *unit == Some(colour) {
                    *unit = None;
                }
            }
        }
        self.framebuffer = framebuffer;
        self.commands.push(Command::BindFramebuffer(framebuffer));
    }

    fn clear(&mut self, colour: Option<[f32; 4]>, depth: bool) {
        self.commands.push(Command::Clear { colour, depth });
    }

    fn set_draw_state(&mut self, state: DrawState) {
        self.state = state;
        self.commands.push(Command::SetDrawState(state));
    }

    fn set_camera(&mut self, view: Matrix4<f32>, projection: Matrix4<f32>) {
        self.view = view;
        self.projection = projection;
    }

    fn draw(&mut self, mesh: MeshKey, model: Matrix4<f32>) {
        let Some(stored) = self.meshes.get(mesh) else {
            log::warn!("draw of unknown mesh skipped");
            return;
        };
        let (mode, geometry) = (stored.mode, stored.geometry.clone());
        self.record_draw(Some(mesh), mode, geometry, model);
    }

    fn draw_immediate(&mut self, mode: DrawMode, geometry: &Geometry, model: Matrix4<f32>) -> Result<()> {
        geometry.validate(mode)?;
        self.record_draw(None, mode, geometry.clone(), model);
        Ok(())
    }

    fn submit(&mut self) -> Result<()> {
        self.commands.push(Command::Submit);
        Ok(())
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
