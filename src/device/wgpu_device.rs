//! wgpu implementation of [`GraphicsDevice`].
//!
//! wgpu has no mutable global pipeline state, so the device keeps GL-style
//! state itself and records every draw together with a snapshot of that
//! state. [`GraphicsDevice::submit`] turns the recording into one render pass
//! per framebuffer binding, creating pipelines on demand for each
//! `(program, draw state, target format)` combination.

use std::{any::Any, collections::HashMap, iter, time::Duration};

use anyhow::anyhow;
use cgmath::{Matrix, Matrix4, SquareMatrix};
use slotmap::SlotMap;
use wgpu::util::DeviceExt;

use crate::{
    data_structures::{
        mesh::{DrawMode, Geometry},
        texture::{Texture, create_default_sampler, texture_2d},
    },
    device::{
        DrawState, FramebufferKey, GraphicsDevice, MAX_TEXTURE_UNITS, MeshKey, ProgramKey,
        ShaderSource, TextureData, TextureKey, UNIFORM_BLOCK_SIZE, UniformDecl, UniformLayout,
        UniformType, UniformValue,
    },
    error::{Error, Result},
    pipelines::basic::{GpuVertex, Vertex, mk_render_pipeline},
};

const COMMON_WGSL: &str = include_str!("../pipelines/common.wgsl");
const TRANSFORM_SIZE: usize = std::mem::size_of::<TransformUniform>();
const UNITS: usize = MAX_TEXTURE_UNITS as usize;

#[repr(C)]
#[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct TransformUniform {
    model: [[f32; 4]; 4],
    view: [[f32; 4]; 4],
    projection: [[f32; 4]; 4],
    normal: [[f32; 4]; 4],
}

impl TransformUniform {
    fn new(model: Matrix4<f32>, view: Matrix4<f32>, projection: Matrix4<f32>) -> Self {
        let normal = (view * model)
            .invert()
            .map(|m| m.transpose())
            .unwrap_or_else(Matrix4::identity);
        Self {
            model: model.into(),
            view: view.into(),
            projection: projection.into(),
            normal: normal.into(),
        }
    }
}

struct Program {
    name: String,
    vertex: wgpu::ShaderModule,
    fragment: wgpu::ShaderModule,
    layout: UniformLayout,
    block: Vec<[u32; 4]>,
}

struct GpuMesh {
    vertex: wgpu::Buffer,
    index: wgpu::Buffer,
    count: u32,
}

struct Framebuffer {
    colour: TextureKey,
    depth: Texture,
}

struct Layouts {
    transforms: wgpu::BindGroupLayout,
    params: wgpu::BindGroupLayout,
    textures: wgpu::BindGroupLayout,
    pipeline: wgpu::PipelineLayout,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
struct PipelineKey {
    program: ProgramKey,
    state: DrawState,
    format: wgpu::TextureFormat,
}

#[derive(Clone, Copy)]
enum DrawGeometry {
    Stored(MeshKey),
    Transient(usize),
}

struct RecordedDraw {
    program: ProgramKey,
    state: DrawState,
    transforms: TransformUniform,
    block: Vec<[u32; 4]>,
    units: [TextureKey; UNITS],
    geometry: DrawGeometry,
}

struct Segment {
    target: Option<FramebufferKey>,
    clear_colour: Option<wgpu::Color>,
    clear_depth: bool,
    draws: Vec<RecordedDraw>,
}

struct BoundState {
    program: Option<ProgramKey>,
    framebuffer: Option<FramebufferKey>,
    draw_state: DrawState,
    units: [Option<TextureKey>; UNITS],
    view: Matrix4<f32>,
    projection: Matrix4<f32>,
}

/// Default render target the caller hands in every frame (surface or offscreen).
struct Target {
    view: wgpu::TextureView,
    texture: Option<wgpu::Texture>,
    size: (u32, u32),
    depth: Texture,
}

pub struct WgpuDevice {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    target_format: wgpu::TextureFormat,
    target: Option<Target>,
    layouts: Layouts,
    sampler: wgpu::Sampler,
    programs: SlotMap<ProgramKey, Program>,
    meshes: SlotMap<MeshKey, GpuMesh>,
    textures: SlotMap<TextureKey, Texture>,
    framebuffers: SlotMap<FramebufferKey, Framebuffer>,
    pipelines: HashMap<PipelineKey, wgpu::RenderPipeline>,
    white: TextureKey,
    state: BoundState,
    segments: Vec<Segment>,
    transient: Vec<GpuMesh>,
}

impl WgpuDevice {
    /// Wrap an existing device. `target_format` is the format of the targets
    /// later passed to [`set_target`](Self::set_target).
    pub fn new(device: wgpu::Device, queue: wgpu::Queue, target_format: wgpu::TextureFormat) -> Self {
        let layouts = mk_layouts(&device);
        let sampler = create_default_sampler(&device);
        let mut textures = SlotMap::with_key();
        let white = textures.insert(Texture::from_data(
            &device,
            &queue,
            &TextureData {
                label: "white".to_string(),
                levels: vec![image::RgbaImage::from_pixel(1, 1, image::Rgba([255; 4]))],
            },
        ));
        Self {
            device,
            queue,
            target_format,
            target: None,
            layouts,
            sampler,
            programs: SlotMap::with_key(),
            meshes: SlotMap::with_key(),
            textures,
            framebuffers: SlotMap::with_key(),
            pipelines: HashMap::new(),
            white,
            state: BoundState {
                program: None,
                framebuffer: None,
                draw_state: DrawState::default(),
                units: [None; UNITS],
                view: Matrix4::identity(),
                projection: Matrix4::identity(),
            },
            segments: Vec::new(),
            transient: Vec::new(),
        }
    }

    /// Create a device rendering into its own offscreen `width` x `height` target.
    pub fn headless(width: u32, height: u32) -> Result<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::PRIMARY,
            ..wgpu::InstanceDescriptor::new_without_display_handle()
        });
        let adapter = futures::executor::block_on(instance.request_adapter(
            &wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::default(),
                compatible_surface: None,
                force_fallback_adapter: false,
            },
        ))
        .map_err(|e| anyhow!("no suitable adapter: {e}"))?;
        let (device, queue) = futures::executor::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("headless device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
                memory_hints: Default::default(),
                trace: wgpu::Trace::Off,
                experimental_features: wgpu::ExperimentalFeatures::disabled(),
            },
        ))
        .map_err(|e| anyhow!("device request failed: {e}"))?;
        device.on_uncaptured_error(std::sync::Arc::new(|e| {
            log::error!("wgpu error: {e}");
        }));

        let format = wgpu::TextureFormat::Rgba8UnormSrgb;
        let mut this = Self::new(device, queue, format);
        let texture = texture_2d(
            &this.device,
            "offscreen target",
            [width, height],
            1,
            format,
            wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
        );
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        this.set_target(view, width, height);
        if let Some(target) = this.target.as_mut() {
            target.texture = Some(texture);
        }
        Ok(this)
    }

    /// Set the default target (e.g. the current surface texture view).
    ///
    /// The depth buffer for the default target is reallocated only when the
    /// size changes.
    pub fn set_target(&mut self, view: wgpu::TextureView, width: u32, height: u32) {
        let depth = match self.target.take() {
            Some(old) if old.size == (width, height) => old.depth,
            _ => Texture::create_depth_texture(&self.device, [width, height], "depth_texture"),
        };
        self.target = Some(Target {
            view,
            texture: None,
            size: (width, height),
            depth,
        });
    }

    /// Read back the offscreen target created by [`headless`](Self::headless).
    pub fn read_target(&self) -> Result<image::RgbaImage> {
        let target = self.target.as_ref().ok_or(Error::UnknownResource("target"))?;
        let texture = target
            .texture
            .as_ref()
            .ok_or_else(|| anyhow!("the default target is not readable"))?;
        let (width, height) = target.size;
        let bytes = self.read_texture(texture, width, height, 4)?;
        image::RgbaImage::from_raw(width, height, bytes)
            .ok_or_else(|| Error::Texture(anyhow!("readback size mismatch")))
    }

    /// Read back a framebuffer's accumulation buffer as linear RGBA floats.
    pub fn read_framebuffer(&self, framebuffer: FramebufferKey) -> Result<Vec<[f32; 4]>> {
        let fb = self
            .framebuffers
            .get(framebuffer)
            .ok_or(Error::UnknownResource("framebuffer"))?;
        let colour = self
            .textures
            .get(fb.colour)
            .ok_or(Error::UnknownResource("texture"))?;
        let size = colour.texture.size();
        let bytes = self.read_texture(&colour.texture, size.width, size.height, 8)?;
        Ok(bytes
            .chunks_exact(8)
            .map(|px| {
                let c = |i: usize| f16_to_f32(u16::from_le_bytes([px[2 * i], px[2 * i + 1]]));
                [c(0), c(1), c(2), c(3)]
            })
            .collect())
    }

    fn read_texture(
        &self,
        texture: &wgpu::Texture,
        width: u32,
        height: u32,
        bytes_per_pixel: u32,
    ) -> Result<Vec<u8>> {
        let unpadded = bytes_per_pixel * width;
        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let padded = unpadded.div_ceil(align) * align;
        let output_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Readback Buffer"),
            size: (padded * height) as wgpu::BufferAddress,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Readback Encoder"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfo {
                aspect: wgpu::TextureAspect::All,
                texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
            },
            wgpu::TexelCopyBufferInfo {
                buffer: &output_buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded),
                    rows_per_image: Some(height),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(iter::once(encoder.finish()));

        let buffer_slice = output_buffer.slice(..);
        let (tx, rx) = futures_intrusive::channel::shared::oneshot_channel();
        buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        self.device
            .poll(wgpu::PollType::Wait {
                submission_index: None,
                timeout: Some(Duration::from_secs(3)),
            })
            .map_err(|e| anyhow!("device poll failed: {e}"))?;
        futures::executor::block_on(rx.receive())
            .ok_or_else(|| anyhow!("readback channel closed"))?
            .map_err(|e| anyhow!("buffer map failed: {e}"))?;

        let data = buffer_slice.get_mapped_range();
        let mut out = Vec::with_capacity((unpadded * height) as usize);
        for row in data.chunks(padded as usize) {
            out.extend_from_slice(&row[..unpadded as usize]);
        }
        drop(data);
        output_buffer.unmap();
        Ok(out)
    }

    fn compile_stage(&self, name: &str, stage: &str, header: &str, body: &str) -> Result<wgpu::ShaderModule> {
        let label = format!("{name} ({stage})");
        let source = format!("{COMMON_WGSL}\n{header}\n{body}");
        let module = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(&label),
            source: wgpu::ShaderSource::Wgsl(source.into()),
        });
        let info = futures::executor::block_on(module.get_compilation_info());
        let errors: Vec<String> = info
            .messages
            .iter()
            .filter(|m| matches!(m.message_type, wgpu::CompilationMessageType::Error))
            .map(|m| m.message.clone())
            .collect();
        if errors.is_empty() {
            Ok(module)
        } else {
            Err(Error::ShaderCompile {
                name: label,
                message: errors.join("\n"),
            })
        }
    }

    fn upload(&self, mode: DrawMode, geometry: &Geometry) -> GpuMesh {
        let vertices: Vec<GpuVertex> = (0..geometry.vertex_count() as u32)
            .filter_map(|i| geometry.vertex(i))
            .map(|v| GpuVertex {
                position: v.position,
                normal: v.normal.unwrap_or([0.0; 3]),
                tex_coords: v.texcoord.unwrap_or([0.0; 2]),
            })
            .collect();
        let indices = geometry.triangle_indices(mode);
        let vertex = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Mesh Vertex Buffer"),
                contents: bytemuck::cast_slice(&vertices),
                usage: wgpu::BufferUsages::VERTEX,
            });
        let index = self
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Mesh Index Buffer"),
                contents: bytemuck::cast_slice(&indices),
                usage: wgpu::BufferUsages::INDEX,
            });
        GpuMesh {
            vertex,
            index,
            count: indices.len() as u32,
        }
    }

    fn check_framebuffer(&self, width: u32, height: u32) -> Result<()> {
        let max = self.device.limits().max_texture_dimension_2d;
        let reason = if width == 0 || height == 0 {
            "zero-sized attachment"
        } else if width > max || height > max {
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

    fn record(&mut self, draw: RecordedDraw) {
        let target = self.state.framebuffer;
        match self.segments.last_mut() {
            Some(segment) if segment.target == target => segment.draws.push(draw),
            _ => self.segments.push(Segment {
                target,
                clear_colour: None,
                clear_depth: false,
                draws: vec![draw],
            }),
        }
    }

    fn snapshot(&self, geometry: DrawGeometry, model: Matrix4<f32>) -> Option<RecordedDraw> {
        let Some(program) = self.state.program.and_then(|p| self.programs.get(p).map(|prog| (p, prog))) else {
            log::warn!("draw issued without a bound program, skipped");
            return None;
        };
        let units = self.state.units.map(|unit| {
            unit.filter(|t| self.textures.contains_key(*t))
                .unwrap_or(self.white)
        });
        Some(RecordedDraw {
            program: program.0,
            state: self.state.draw_state,
            transforms: TransformUniform::new(model, self.state.view, self.state.projection),
            block: program.1.block.clone(),
            units,
            geometry,
        })
    }

    fn format_of(&self, target: Option<FramebufferKey>) -> wgpu::TextureFormat {
        match target {
            Some(_) => Texture::ACCUMULATION_FORMAT,
            None => self.target_format,
        }
    }

    fn ensure_pipeline(&mut self, key: PipelineKey) -> Result<()> {
        if self.pipelines.contains_key(&key) {
            return Ok(());
        }
        let program = self
            .programs
            .get(key.program)
            .ok_or(Error::UnknownResource("program"))?;
        log::debug!("creating pipeline for '{}' ({:?})", program.name, key.state);
        let pipeline = mk_render_pipeline(
            &self.device,
            &self.layouts.pipeline,
            key.format,
            Some(Texture::DEPTH_FORMAT),
            &key.state,
            &[GpuVertex::desc()],
            &program.vertex,
            &program.fragment,
        );
        self.pipelines.insert(key, pipeline);
        Ok(())
    }

    fn texture_bind_group(&self, units: &[TextureKey; UNITS]) -> Result<wgpu::BindGroup> {
        let textures = units
            .iter()
            .map(|key| {
                self.textures
                    .get(*key)
                    .ok_or(Error::UnknownResource("texture"))
            })
            .collect::<Result<Vec<_>>>()?;
        let entries: Vec<wgpu::BindGroupEntry> = textures
            .iter()
            .enumerate()
            .flat_map(|(unit, texture)| {
                [
                    wgpu::BindGroupEntry {
                        binding: 2 * unit as u32,
                        resource: wgpu::BindingResource::TextureView(&texture.view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 2 * unit as u32 + 1,
                        resource: wgpu::BindingResource::Sampler(
                            texture.sampler.as_ref().unwrap_or(&self.sampler),
                        ),
                    },
                ]
            })
            .collect();
        Ok(self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            layout: &self.layouts.textures,
            entries: &entries,
            label: Some("texture_unit_bind_group"),
        }))
    }

    fn uniform_bind_groups(&self, draws: &[&RecordedDraw]) -> (wgpu::BindGroup, wgpu::BindGroup) {
        let mut transforms = vec![0u8; TRANSFORM_SIZE * draws.len()];
        let mut params = vec![0u8; UNIFORM_BLOCK_SIZE * draws.len()];
        for (i, draw) in draws.iter().enumerate() {
            transforms[i * TRANSFORM_SIZE..(i + 1) * TRANSFORM_SIZE]
                .copy_from_slice(bytemuck::bytes_of(&draw.transforms));
            let block: &[u8] = bytemuck::cast_slice(&draw.block);
            params[i * UNIFORM_BLOCK_SIZE..i * UNIFORM_BLOCK_SIZE + block.len()]
                .copy_from_slice(block);
        }
        let mk = |label, contents: &[u8], layout, size: usize| {
            let buffer = self
                .device
                .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some(label),
                    contents,
                    usage: wgpu::BufferUsages::UNIFORM,
                });
            self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                layout,
                entries: &[wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                        buffer: &buffer,
                        offset: 0,
                        size: wgpu::BufferSize::new(size as u64),
                    }),
                }],
                label: Some(label),
            })
        };
        (
            mk("Transform Buffer", &transforms, &self.layouts.transforms, TRANSFORM_SIZE),
            mk("Uniform Block Buffer", &params, &self.layouts.params, UNIFORM_BLOCK_SIZE),
        )
    }
}

impl GraphicsDevice for WgpuDevice {
    fn create_program(&mut self, name: &str, source: &ShaderSource) -> Result<ProgramKey> {
        if source.geometry.is_some() {
            return Err(Error::ShaderCompile {
                name: name.to_string(),
                message: "geometry stages are not supported by the wgpu backend".to_string(),
            });
        }
        let layout = UniformLayout::new(&source.uniforms)?;
        let header = format!("{}\n{}", params_wgsl(&source.uniforms), source.header);
        let vertex = self.compile_stage(name, "vertex", &header, &source.vertex)?;
        let fragment = self.compile_stage(name, "fragment", &header, &source.fragment)?;
        let block = vec![[0; 4]; UNIFORM_BLOCK_SIZE / 16];
        Ok(self.programs.insert(Program {
            name: name.to_string(),
            vertex,
            fragment,
            layout,
            block,
        }))
    }

    fn use_program(&mut self, program: Option<ProgramKey>) {
        self.state.program = program;
    }

    fn set_uniform(&mut self, program: ProgramKey, name: &str, value: &UniformValue) {
        if let Some(p) = self.programs.get_mut(program) {
            if !p.layout.write(&mut p.block, name, value) {
                log::trace!("program '{}' has no uniform '{name}'", p.name);
            }
        }
    }

    fn bind_texture(&mut self, unit: u32, texture: TextureKey) {
        match self.state.units.get_mut(unit as usize) {
            Some(slot) => *slot = Some(texture),
            None => log::warn!("texture unit {unit} out of range"),
        }
    }

    fn create_texture(&mut self, data: &TextureData) -> Result<TextureKey> {
        if data.levels.is_empty() {
            return Err(Error::Texture(anyhow!("texture '{}' has no image data", data.label)));
        }
        let texture = Texture::from_data(&self.device, &self.queue, data);
        Ok(self.textures.insert(texture))
    }

    fn destroy_texture(&mut self, texture: TextureKey) {
        if texture != self.white {
            self.textures.remove(texture);
        }
    }

    fn upload_mesh(&mut self, mode: DrawMode, geometry: &Geometry) -> Result<MeshKey> {
        geometry.validate(mode)?;
        let mesh = self.upload(mode, geometry);
        Ok(self.meshes.insert(mesh))
    }

    fn destroy_mesh(&mut self, mesh: MeshKey) {
        self.meshes.remove(mesh);
    }

    fn create_framebuffer(&mut self, width: u32, height: u32) -> Result<FramebufferKey> {
        self.check_framebuffer(width, height)?;
        let colour = self
            .textures
            .insert(Texture::create_accumulation_texture(&self.device, [width, height]));
        let depth = Texture::create_depth_texture(&self.device, [width, height], "accumulation depth");
        Ok(self.framebuffers.insert(Framebuffer { colour, depth }))
    }

    fn resize_framebuffer(&mut self, framebuffer: FramebufferKey, width: u32, height: u32) -> Result<()> {
        self.check_framebuffer(width, height)?;
        let fb = self
            .framebuffers
            .get_mut(framebuffer)
            .ok_or(Error::UnknownResource("framebuffer"))?;
        fb.depth = Texture::create_depth_texture(&self.device, [width, height], "accumulation depth");
        if let Some(colour) = self.textures.get_mut(fb.colour) {
            *colour = Texture::create_accumulation_texture(&self.device, [width, height]);
        }
        Ok(())
    }

    fn destroy_framebuffer(&mut self, framebuffer: FramebufferKey) {
        if let Some(fb) = self.framebuffers.remove(framebuffer) {
            self.textures.remove(fb.colour);
        }
    }

    fn framebuffer_texture(&self, framebuffer: FramebufferKey) -> Option<TextureKey> {
        self.framebuffers.get(framebuffer).map(|fb| fb.colour)
    }

    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferKey>) {
        // A texture cannot be sampled while it is the render target.
        if let Some(colour) = framebuffer.and_then(|fb| self.framebuffer_texture(fb)) {
            for unit in self.state.units.iter_mut() {
                if *unit == Some(colour) {
                    *unit = None;
                }
            }
        }
        self.state.framebuffer = framebuffer;
    }

    fn clear(&mut self, colour: Option<[f32; 4]>, depth: bool) {
        let target = self.state.framebuffer;
        let colour = colour.map(|[r, g, b, a]| wgpu::Color {
            r: r as f64,
            g: g as f64,
            b: b as f64,
            a: a as f64,
        });
        match self.segments.last_mut() {
            Some(segment) if segment.target == target && segment.draws.is_empty() => {
                segment.clear_colour = colour.or(segment.clear_colour);
                segment.clear_depth |= depth;
            }
            _ => self.segments.push(Segment {
                target,
                clear_colour: colour,
                clear_depth: depth,
                draws: Vec::new(),
            }),
        }
    }

    fn set_draw_state(&mut self, state: DrawState) {
        self.state.draw_state = state;
    }

    fn set_camera(&mut self, view: Matrix4<f32>, projection: Matrix4<f32>) {
        self.state.view = view;
        self.state.projection = projection;
    }

    fn draw(&mut self, mesh: MeshKey, model: Matrix4<f32>) {
        if let Some(draw) = self.snapshot(DrawGeometry::Stored(mesh), model) {
            self.record(draw);
        }
    }

    fn draw_immediate(&mut self, mode: DrawMode, geometry: &Geometry, model: Matrix4<f32>) -> Result<()> {
        geometry.validate(mode)?;
        let mesh = self.upload(mode, geometry);
        self.transient.push(mesh);
        if let Some(draw) = self.snapshot(DrawGeometry::Transient(self.transient.len() - 1), model) {
            self.record(draw);
        }
        Ok(())
    }

    fn submit(&mut self) -> Result<()> {
        let segments = std::mem::take(&mut self.segments);
        let transient = std::mem::take(&mut self.transient);
        if segments.is_empty() {
            return Ok(());
        }

        // Pipelines are created up front; the passes below only borrow them.
        for segment in &segments {
            let format = self.format_of(segment.target);
            for draw in &segment.draws {
                self.ensure_pipeline(PipelineKey {
                    program: draw.program,
                    state: draw.state,
                    format,
                })?;
            }
        }

        let draws: Vec<&RecordedDraw> = segments.iter().flat_map(|s| &s.draws).collect();
        let uniforms = (!draws.is_empty()).then(|| self.uniform_bind_groups(&draws));
        let texture_groups = draws
            .iter()
            .map(|d| self.texture_bind_group(&d.units))
            .collect::<Result<Vec<_>>>()?;

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Frame Encoder"),
            });
        let mut index = 0;
        for segment in &segments {
            let (view, depth_view) = match segment.target {
                Some(key) => {
                    let fb = self
                        .framebuffers
                        .get(key)
                        .ok_or(Error::UnknownResource("framebuffer"))?;
                    let colour = self
                        .textures
                        .get(fb.colour)
                        .ok_or(Error::UnknownResource("texture"))?;
                    (&colour.view, &fb.depth.view)
                }
                None => {
                    let target = self.target.as_ref().ok_or(Error::UnknownResource("target"))?;
                    (&target.view, &target.depth.view)
                }
            };
            let format = self.format_of(segment.target);

            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Render Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: segment
                            .clear_colour
                            .map_or(wgpu::LoadOp::Load, wgpu::LoadOp::Clear),
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: depth_view,
                    depth_ops: Some(wgpu::Operations {
                        load: if segment.clear_depth {
                            wgpu::LoadOp::Clear(1.0)
                        } else {
                            wgpu::LoadOp::Load
                        },
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                occlusion_query_set: None,
                timestamp_writes: None,
                multiview_mask: None,
            });

            for draw in &segment.draws {
                let key = PipelineKey {
                    program: draw.program,
                    state: draw.state,
                    format,
                };
                let mesh = match draw.geometry {
                    DrawGeometry::Stored(k) => self.meshes.get(k),
                    DrawGeometry::Transient(i) => transient.get(i),
                };
                if let (Some(pipeline), Some(mesh), Some((transforms, params))) =
                    (self.pipelines.get(&key), mesh, uniforms.as_ref())
                {
                    render_pass.set_pipeline(pipeline);
                    render_pass.set_bind_group(0, transforms, &[(index * TRANSFORM_SIZE) as u32]);
                    render_pass.set_bind_group(1, params, &[(index * UNIFORM_BLOCK_SIZE) as u32]);
                    render_pass.set_bind_group(2, &texture_groups[index], &[]);
                    render_pass.set_vertex_buffer(0, mesh.vertex.slice(..));
                    render_pass.set_index_buffer(mesh.index.slice(..), wgpu::IndexFormat::Uint32);
                    render_pass.draw_indexed(0..mesh.count, 0, 0..1);
                }
                index += 1;
            }
        }

        self.queue.submit(iter::once(encoder.finish()));
        Ok(())
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

fn mk_layouts(device: &wgpu::Device) -> Layouts {
    let dynamic_uniform = |label| {
        device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: true,
                    min_binding_size: None,
                },
                count: None,
            }],
            label: Some(label),
        })
    };
    let transforms = dynamic_uniform("transforms_bind_group_layout");
    let params = dynamic_uniform("params_bind_group_layout");

    let entries: Vec<wgpu::BindGroupLayoutEntry> = (0..MAX_TEXTURE_UNITS)
        .flat_map(|unit| {
            [
                wgpu::BindGroupLayoutEntry {
                    binding: 2 * unit,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        multisampled: false,
                        view_dimension: wgpu::TextureViewDimension::D2,
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2 * unit + 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ]
        })
        .collect();
    let textures = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        entries: &entries,
        label: Some("texture_units_bind_group_layout"),
    });

    let pipeline = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some("Render Pipeline Layout"),
        bind_group_layouts: &[Some(&transforms), Some(&params), Some(&textures)],
        immediate_size: 0,
    });

    Layouts {
        transforms,
        params,
        textures,
        pipeline,
    }
}

/// WGSL declaration of a program's uniform block, one vec4 slot per element.
fn params_wgsl(decls: &[UniformDecl]) -> String {
    let mut fields: Vec<String> = decls
        .iter()
        .map(|decl| {
            let ty = match decl.ty {
                UniformType::Float => "vec4<f32>",
                UniformType::Int => "vec4<i32>",
                UniformType::Mat4 => "mat4x4<f32>",
            };
            if decl.count == 1 {
                format!("    {}: {ty},", decl.name)
            } else {
                format!("    {}: array<{ty}, {}>,", decl.name, decl.count)
            }
        })
        .collect();
    if fields.is_empty() {
        fields.push("    _unused: vec4<f32>,".to_string());
    }
    format!(
        "struct Params {{\n{}\n}}\n@group(1) @binding(0)\nvar<uniform> params: Params;\n",
        fields.join("\n")
    )
}

fn f16_to_f32(bits: u16) -> f32 {
    let sign = if bits & 0x8000 != 0 { -1.0 } else { 1.0 };
    let exponent = ((bits >> 10) & 0x1f) as i32;
    let mantissa = (bits & 0x3ff) as f32;
    match exponent {
        0 => sign * mantissa * 2f32.powi(-24),
        0x1f if mantissa == 0.0 => sign * f32::INFINITY,
        0x1f => f32::NAN,
        e => sign * (1.0 + mantissa / 1024.0) * 2f32.powi(e - 15),
    }
}

#[cfg(test)]
mod tests {
    use super::{f16_to_f32, params_wgsl};
    use crate::device::{UniformDecl, UniformType};

    #[test]
    fn params_struct_follows_declarations() {
        let wgsl = params_wgsl(&[
            UniformDecl::new("ambient", UniformType::Float),
            UniformDecl::array("falloffs", UniformType::Float, 8),
            UniformDecl::new("illum", UniformType::Int),
        ]);
        assert!(wgsl.contains("ambient: vec4<f32>,"));
        assert!(wgsl.contains("falloffs: array<vec4<f32>, 8>,"));
        assert!(wgsl.contains("illum: vec4<i32>,"));
        assert!(params_wgsl(&[]).contains("_unused"));
    }

    #[test]
    fn decodes_half_floats() {
        assert_eq!(f16_to_f32(0x3c00), 1.0);
        assert_eq!(f16_to_f32(0xc000), -2.0);
        assert_eq!(f16_to_f32(0x3800), 0.5);
        assert_eq!(f16_to_f32(0x0000), 0.0);
        assert!(f16_to_f32(0x7c00).is_infinite());
    }
}
