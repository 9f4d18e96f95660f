//! The lighting accumulation pass.
//!
//! Every opaque node is drawn into an offscreen float framebuffer once per
//! window of up to [`MAX_LIGHTS`] lights. The first window overwrites and
//! writes depth (slightly biased away from the camera), every later window
//! adds its contribution on top with depth writes off. Ambient light is only
//! uploaded for the first window, so it is counted once regardless of the
//! number of lights.
//!
//! [`irradiance`] evaluates the same model on the CPU.

use std::rc::Rc;

use cgmath::{InnerSpace, Matrix4, Vector3};

use crate::{
    camera::Camera,
    context::Context,
    data_structures::{lighting::Light, scene_graph::NodeRef},
    device::{
        BlendMode, DepthBias, DrawState, FramebufferKey, ShaderSource, TextureKey, UniformDecl,
        UniformType,
    },
    error::Result,
    pipelines::shader::{Shader, UniformKind},
};

pub const MAX_LIGHTS: usize = 8;

/// Uniforms every lighting program must declare to receive lights.
pub const LIGHT_UNIFORMS: [UniformDecl; 6] = [
    UniformDecl::new("ambient", UniformType::Float),
    UniformDecl::new("num_lights", UniformType::Int),
    UniformDecl::array("colours", UniformType::Float, MAX_LIGHTS),
    UniformDecl::array("positions", UniformType::Float, MAX_LIGHTS),
    UniformDecl::array("intensities", UniformType::Float, MAX_LIGHTS),
    UniformDecl::array("falloffs", UniformType::Float, MAX_LIGHTS),
];

pub fn lighting_shader_source() -> ShaderSource {
    let mut uniforms = LIGHT_UNIFORMS.to_vec();
    uniforms.extend([
        UniformDecl::new("diffuse_colour", UniformType::Float),
        UniformDecl::new("specular", UniformType::Float),
        UniformDecl::new("specular_exponent", UniformType::Float),
        UniformDecl::new("dissolve", UniformType::Float),
        UniformDecl::new("transmit", UniformType::Float),
        UniformDecl::new("illum", UniformType::Int),
    ]);
    ShaderSource::wgsl(include_str!("lighting.wgsl"), uniforms)
}

/// The built-in lighting shader with its material rules.
pub fn lighting_shader(ctx: &mut Context) -> Result<Shader> {
    let mut shader = Shader::compile(ctx, "lighting", &lighting_shader_source())?;
    shader.bind_material_to_texture("map_Kd", "diffuse_tex");
    shader.bind_material_to_uniform_or("Kd", "diffuse_colour", UniformKind::Float, [1.0, 1.0, 1.0]);
    shader.bind_material_to_uniform_or("Ks", "specular", UniformKind::Float, [0.0, 0.0, 0.0]);
    shader.bind_material_to_uniform_or("Ns", "specular_exponent", UniformKind::Float, 1.0);
    shader.bind_material_to_uniform_or("d", "dissolve", UniformKind::Float, 1.0);
    shader.bind_material_to_uniform_or("transmit", "transmit", UniformKind::Float, 0.0);
    shader.bind_material_to_uniform_or("illum", "illum", UniformKind::Int, 1.0);
    Ok(shader)
}

/// Up to [`MAX_LIGHTS`] lights in the layout the shader expects, positions
/// and directions already in view space.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LightWindow {
    pub colours: Vec<[f32; 4]>,
    pub positions: Vec<[f32; 4]>,
    pub intensities: Vec<f32>,
    pub falloffs: Vec<f32>,
}

impl LightWindow {
    pub fn new(lights: &[Light], view: &Matrix4<f32>) -> Self {
        let lights = &lights[..lights.len().min(MAX_LIGHTS)];
        Self {
            colours: lights.iter().map(Light::colour).collect(),
            positions: lights.iter().map(|l| l.view_vector(view)).collect(),
            intensities: lights.iter().map(Light::intensity).collect(),
            falloffs: lights.iter().map(Light::falloff).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    fn upload(&self, shader: &Shader, ctx: &mut Context) -> Result<()> {
        shader.uniformi(ctx, "num_lights", &[self.len() as i32])?;
        shader.uniform4fv(ctx, "colours", &self.colours)?;
        shader.uniform4fv(ctx, "positions", &self.positions)?;
        shader.uniform1fv(ctx, "intensities", &self.intensities)?;
        shader.uniform1fv(ctx, "falloffs", &self.falloffs)
    }
}

/// Split `lights` into consecutive windows of at most [`MAX_LIGHTS`].
pub fn light_windows(lights: &[Light], view: &Matrix4<f32>) -> Vec<LightWindow> {
    lights
        .chunks(MAX_LIGHTS)
        .map(|chunk| LightWindow::new(chunk, view))
        .collect()
}

/// Material terms of a shaded point.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Surface {
    pub specular: [f32; 3],
    pub specular_exponent: f32,
    pub transmit: f32,
}

impl Default for Surface {
    fn default() -> Self {
        Self {
            specular: [0.0; 3],
            specular_exponent: 1.0,
            transmit: 0.0,
        }
    }
}

/// What one window adds at a view-space `position` with `normal`, without
/// ambient. Mirrors `calc_light` in the shader.
pub fn irradiance(
    window: &LightWindow,
    position: Vector3<f32>,
    normal: Vector3<f32>,
    surface: &Surface,
) -> [f32; 3] {
    let n = if normal.magnitude2() > 0.0 {
        normal.normalize()
    } else {
        normal
    };
    let mut total = [0.0; 3];
    for i in 0..window.len() {
        let light = window.positions[i];
        let mut intensity = window.intensities[i];
        let mut l = Vector3::new(light[0], light[1], light[2]);
        if light[3] > 0.0 {
            l -= position;
            intensity /= 1.0 + l.magnitude2() * window.falloffs[i];
            l = l.normalize();
        }
        let cos_angle = n.dot(l);
        let diffuse = cos_angle.max(0.0) - surface.transmit * cos_angle.min(0.0);
        let specular = if diffuse > 0.0 && position.magnitude2() > 0.0 {
            let r = l - n * (2.0 * n.dot(l));
            position.normalize().dot(r).max(0.0).powf(surface.specular_exponent)
        } else {
            0.0
        };
        for (c, out) in total.iter_mut().enumerate() {
            *out += intensity
                * window.colours[i][c]
                * (diffuse + specular * surface.specular[c]);
        }
    }
    total
}

pub struct LightingPass {
    pub ambient: [f32; 4],
    shader: Rc<Shader>,
    framebuffer: Option<FramebufferKey>,
    size: (u32, u32),
}

impl LightingPass {
    pub fn new(ctx: &mut Context) -> Result<Self> {
        Ok(Self {
            ambient: [0.0, 0.0, 0.0, 1.0],
            shader: Rc::new(lighting_shader(ctx)?),
            framebuffer: None,
            size: (0, 0),
        })
    }

    pub fn shader(&self) -> &Rc<Shader> {
        &self.shader
    }

    pub fn framebuffer(&self) -> Option<FramebufferKey> {
        self.framebuffer
    }

    /// The accumulated lighting of the last frame.
    pub fn texture(&self, ctx: &Context) -> Option<TextureKey> {
        self.framebuffer
            .and_then(|fb| ctx.device_ref().framebuffer_texture(fb))
    }

    /// The framebuffer for `size`, reallocated only when the size changed.
    fn acquire_framebuffer(&mut self, ctx: &mut Context, size: (u32, u32)) -> Result<FramebufferKey> {
        match self.framebuffer {
            Some(fb) if self.size == size => Ok(fb),
            Some(fb) => {
                ctx.device().resize_framebuffer(fb, size.0, size.1)?;
                self.size = size;
                Ok(fb)
            }
            None => {
                let fb = ctx.device().create_framebuffer(size.0, size.1)?;
                log::debug!("lighting framebuffer {}x{}", size.0, size.1);
                self.framebuffer = Some(fb);
                self.size = size;
                Ok(fb)
            }
        }
    }

    pub fn release(&mut self, ctx: &mut Context) {
        if let Some(fb) = self.framebuffer.take() {
            ctx.device().destroy_framebuffer(fb);
        }
        self.size = (0, 0);
    }

    pub fn render(&mut self, ctx: &mut Context, camera: &Camera, nodes: &[NodeRef]) -> Result<()> {
        let fb = self.acquire_framebuffer(ctx, camera.viewport)?;
        ctx.device().bind_framebuffer(Some(fb));
        ctx.device().clear(Some([0.0; 4]), true);

        let result = self.accumulate(ctx, camera, nodes);

        ctx.device().set_draw_state(DrawState::default());
        ctx.device().bind_framebuffer(None);
        result
    }

    fn accumulate(&self, ctx: &mut Context, camera: &Camera, nodes: &[NodeRef]) -> Result<()> {
        let lights: Vec<Light> = nodes
            .iter()
            .filter_map(|n| n.borrow().light().cloned())
            .collect();
        if lights.is_empty() {
            return Ok(());
        }
        let windows = light_windows(&lights, &camera.view_matrix());

        let mut standard = Vec::new();
        let mut custom = Vec::new();
        for node in nodes.iter().filter(|n| !n.borrow().is_transparent()) {
            match node.borrow().shader() {
                Some(shader) => custom.push((shader, node.clone())),
                None => standard.push(node.clone()),
            }
        }

        self.draw_windows(ctx, camera, &self.shader, &windows, &standard)?;
        for (shader, node) in custom {
            self.draw_windows(ctx, camera, &shader, &windows, std::slice::from_ref(&node))?;
        }
        Ok(())
    }

    fn draw_windows(
        &self,
        ctx: &mut Context,
        camera: &Camera,
        shader: &Rc<Shader>,
        windows: &[LightWindow],
        nodes: &[NodeRef],
    ) -> Result<()> {
        if nodes.is_empty() {
            return Ok(());
        }
        let mut ctx = ctx.bind_shader(shader)?;
        for (i, window) in windows.iter().enumerate() {
            let state = if i == 0 {
                shader.uniformf(&mut ctx, "ambient", &self.ambient)?;
                DrawState {
                    blend: BlendMode::Overwrite,
                    depth_write: true,
                    depth_bias: Some(DepthBias {
                        constant: 1,
                        slope_scale: 0.01,
                    }),
                    ..Default::default()
                }
            } else {
                shader.uniformf(&mut ctx, "ambient", &[0.0; 4])?;
                DrawState {
                    blend: BlendMode::Additive,
                    depth_write: false,
                    depth_bias: None,
                    ..Default::default()
                }
            };
            ctx.device().set_draw_state(state);
            window.upload(shader, &mut ctx)?;
            for node in nodes {
                node.borrow().draw(&mut ctx, camera)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use cgmath::{Point3, SquareMatrix};

    use super::*;
    use crate::data_structures::lighting::{PointLight, Sunlight};

    #[test]
    fn windows_hold_at_most_eight_lights() {
        let lights: Vec<Light> = (0..17)
            .map(|i| PointLight::new(Point3::new(i as f32, 0.0, 0.0)).into())
            .collect();
        let windows = light_windows(&lights, &Matrix4::identity());
        let sizes: Vec<usize> = windows.iter().map(LightWindow::len).collect();
        assert_eq!(sizes, vec![8, 8, 1]);
        assert_eq!(windows[2].positions[0], [16.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn head_on_sun_gives_full_intensity() {
        let sun: Light = Sunlight::new(Vector3::unit_z(), [1.0; 4], 2.0).into();
        let window = LightWindow::new(&[sun], &Matrix4::identity());
        let lit = irradiance(
            &window,
            Vector3::new(0.0, 0.0, -5.0),
            Vector3::unit_z(),
            &Surface::default(),
        );
        assert_relative_eq!(lit[0], 2.0);
    }

    #[test]
    fn back_faces_only_receive_transmitted_light() {
        let sun: Light = Sunlight::new(-Vector3::unit_z(), [1.0; 4], 1.0).into();
        let window = LightWindow::new(&[sun], &Matrix4::identity());
        let surface = Surface {
            transmit: 0.25,
            ..Default::default()
        };
        let lit = irradiance(&window, Vector3::new(0.0, 0.0, -5.0), Vector3::unit_z(), &surface);
        assert_relative_eq!(lit[1], 0.25);
    }
}
