//! Transparent nodes, drawn last with alpha blending and without writing
//! depth, from the back of the scene to the front.

use std::rc::Rc;

use crate::{
    camera::Camera,
    context::Context,
    data_structures::scene_graph::{NodeRef, SceneNode},
    device::{BlendMode, DrawState, ShaderSource, UniformDecl, UniformType},
    error::Result,
    pipelines::shader::{Shader, UniformKind},
};

pub fn unlit_shader_source() -> ShaderSource {
    ShaderSource::wgsl(
        include_str!("unlit.wgsl"),
        vec![
            UniformDecl::new("colour", UniformType::Float),
            UniformDecl::new("dissolve", UniformType::Float),
        ],
    )
}

pub struct TransparentPass {
    shader: Rc<Shader>,
}

impl TransparentPass {
    pub fn new(ctx: &mut Context) -> Result<Self> {
        let mut shader = Shader::compile(ctx, "unlit", &unlit_shader_source())?;
        shader.bind_material_to_texture("map_Kd", "diffuse");
        shader.bind_material_to_uniform_or("Kd", "colour", UniformKind::Float, [1.0, 1.0, 1.0]);
        shader.bind_material_to_uniform_or("d", "dissolve", UniformKind::Float, 1.0);
        Ok(Self {
            shader: Rc::new(shader),
        })
    }

    pub fn shader(&self) -> &Rc<Shader> {
        &self.shader
    }

    pub fn render(&self, ctx: &mut Context, camera: &Camera, nodes: &[NodeRef]) -> Result<()> {
        let sorted = back_to_front(camera, nodes);
        if sorted.is_empty() {
            return Ok(());
        }
        ctx.device().set_draw_state(DrawState {
            blend: BlendMode::Alpha,
            depth_write: false,
            ..Default::default()
        });
        let result = {
            let mut ctx = ctx.bind_shader(&self.shader)?;
            sorted
                .iter()
                .try_for_each(|node| node.borrow().draw(&mut ctx, camera))
        };
        ctx.device().set_draw_state(DrawState::default());
        result
    }
}

/// Transparent, drawable nodes ordered furthest first. Ties keep scene order.
pub fn back_to_front(camera: &Camera, nodes: &[NodeRef]) -> Vec<NodeRef> {
    let mut sorted: Vec<(f32, NodeRef)> = nodes
        .iter()
        .filter(|n| {
            let node = n.borrow();
            node.is_transparent() && !matches!(*node, SceneNode::Light(_))
        })
        .map(|n| (camera.depth_of(n.borrow().position()), n.clone()))
        .collect();
    sorted.sort_by(|a, b| b.0.total_cmp(&a.0));
    sorted.into_iter().map(|(_, n)| n).collect()
}
