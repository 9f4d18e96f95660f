//! The composite pass: opaque nodes are redrawn onto the default target with
//! their unlit colour multiplied by the accumulated lighting. The lighting
//! buffer is sampled at each fragment's own screen position.

use std::rc::Rc;

use cgmath::Matrix4;

use crate::{
    camera::Camera,
    context::Context,
    data_structures::scene_graph::NodeRef,
    device::{DrawState, ShaderSource, TextureKey, UniformDecl, UniformType},
    error::Result,
    pipelines::shader::{Shader, UniformKind},
};

/// Maps clip space to lighting texture coordinates (y points down in wgpu
/// textures).
#[rustfmt::skip]
pub const TEXTURE_BIAS: Matrix4<f32> = Matrix4::new(
    0.5, 0.0, 0.0, 0.0,
    0.0, -0.5, 0.0, 0.0,
    0.0, 0.0, 1.0, 0.0,
    0.5, 0.5, 0.0, 1.0,
);

pub fn composite_shader_source() -> ShaderSource {
    ShaderSource::wgsl(
        include_str!("composite.wgsl"),
        vec![
            UniformDecl::new("colour", UniformType::Float),
            UniformDecl::new("illum", UniformType::Int),
            UniformDecl::new("tex_projection", UniformType::Mat4),
        ],
    )
}

pub struct CompositePass {
    shader: Rc<Shader>,
}

impl CompositePass {
    pub fn new(ctx: &mut Context) -> Result<Self> {
        // unit 0 holds the lighting buffer
        let mut shader = Shader::compile(ctx, "composite", &composite_shader_source())?
            .with_reserved_textures(1);
        shader.bind_material_to_uniform_or("Kd", "colour", UniformKind::Float, [1.0, 1.0, 1.0]);
        shader.bind_material_to_uniform_or("illum", "illum", UniformKind::Int, 1.0);
        shader.bind_material_to_texture("map_Kd", "diffuse");
        Ok(Self {
            shader: Rc::new(shader),
        })
    }

    pub fn shader(&self) -> &Rc<Shader> {
        &self.shader
    }

    pub fn render(
        &self,
        ctx: &mut Context,
        camera: &Camera,
        nodes: &[NodeRef],
        lighting: TextureKey,
    ) -> Result<()> {
        ctx.device().set_draw_state(DrawState::default());
        let mut ctx = ctx.bind_shader(&self.shader)?;
        self.shader.bind_texture(&mut ctx, "lighting", 0, lighting)?;
        self.shader
            .uniform_matrixf(&mut ctx, "tex_projection", TEXTURE_BIAS)?;
        for node in nodes.iter().filter(|n| !n.borrow().is_transparent()) {
            node.borrow().draw(&mut ctx, camera)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use cgmath::Vector4;

    use super::TEXTURE_BIAS;

    #[test]
    fn bias_maps_clip_corners_to_texture_corners() {
        let top_left = TEXTURE_BIAS * Vector4::new(-2.0, 2.0, 0.5, 2.0);
        assert_relative_eq!(top_left.x / top_left.w, 0.0);
        assert_relative_eq!(top_left.y / top_left.w, 0.0);
        let bottom_right = TEXTURE_BIAS * Vector4::new(1.0, -1.0, 0.0, 1.0);
        assert_relative_eq!(bottom_right.x / bottom_right.w, 1.0);
        assert_relative_eq!(bottom_right.y / bottom_right.w, 1.0);
    }
}
