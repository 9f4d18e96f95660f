//! Frame composition.
//!
//! A frame runs the configured [`RenderPass`]es in order:
//!
//! 1. [`RenderPass::Lighting`] accumulates light on every opaque node
//! 2. [`RenderPass::Composite`] multiplies it by the unlit colour onto the
//!    default target (left out when [`RendererConfig::composite`] is off, in
//!    which case opaque nodes only show up in [`Renderer::lighting_buffer`])
//! 3. [`RenderPass::Transparent`] blends transparent nodes on top
//!
//! Every frame starts from the default draw state with the default target
//! bound and no shader active, and leaves the context the same way.

use crate::{
    camera::Camera,
    context::Context,
    data_structures::{
        model::Model,
        scene_graph::{NodeRef, SceneNode},
    },
    device::{DrawState, FramebufferKey, TextureKey},
    error::Result,
    pipelines::{composite::CompositePass, lighting::LightingPass, transparent::TransparentPass},
};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RendererConfig {
    pub clear_colour: [f32; 4],
    pub composite: bool,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            clear_colour: [0.0, 0.0, 0.0, 1.0],
            composite: true,
        }
    }
}

pub enum RenderPass {
    Lighting(LightingPass),
    Composite(CompositePass),
    Transparent(TransparentPass),
}

pub struct Renderer {
    pub config: RendererConfig,
    ctx: Context,
    passes: Vec<RenderPass>,
}

impl Renderer {
    pub fn new(mut ctx: Context, config: RendererConfig) -> Result<Self> {
        let mut passes = vec![RenderPass::Lighting(LightingPass::new(&mut ctx)?)];
        if config.composite {
            passes.push(RenderPass::Composite(CompositePass::new(&mut ctx)?));
        }
        passes.push(RenderPass::Transparent(TransparentPass::new(&mut ctx)?));
        Ok(Self { config, ctx, passes })
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut Context {
        &mut self.ctx
    }

    pub fn passes(&self) -> &[RenderPass] {
        &self.passes
    }

    fn lighting(&self) -> Option<&LightingPass> {
        self.passes.iter().find_map(|pass| match pass {
            RenderPass::Lighting(lighting) => Some(lighting),
            _ => None,
        })
    }

    pub fn lighting_framebuffer(&self) -> Option<FramebufferKey> {
        self.lighting().and_then(LightingPass::framebuffer)
    }

    /// The accumulated lighting of the last frame, once one was rendered.
    pub fn lighting_buffer(&self) -> Option<TextureKey> {
        self.lighting().and_then(|l| l.texture(&self.ctx))
    }

    /// Resolve the materials of `model` and upload its meshes. Geometry
    /// shared between meshes or models is uploaded once.
    pub fn prepare_model(&mut self, model: &Model) -> Result<()> {
        for mesh in &model.meshes {
            self.ctx.resolve_material(&mesh.material)?;
            self.ctx.upload_mesh(mesh)?;
        }
        Ok(())
    }

    /// Free the device buffers of `model`. Drawing it again re-uploads.
    pub fn release_model(&mut self, model: &Model) {
        for mesh in &model.meshes {
            self.ctx.release_mesh(mesh);
        }
    }

    /// Prepare everything `node` draws, recursing into groups.
    pub fn prepare_node(&mut self, node: &NodeRef) -> Result<()> {
        match &*node.borrow() {
            SceneNode::Model(model) => self.prepare_model(&model.model),
            SceneNode::Group(group) => group
                .children
                .iter()
                .try_for_each(|child| self.prepare_node(child)),
            SceneNode::Ray(ray) => self.ctx.resolve_material(&ray.material),
            SceneNode::Light(_) => Ok(()),
        }
    }

    /// Render one frame. An unusable camera is reported before any device
    /// state changes.
    pub fn render(&mut self, nodes: &[NodeRef], ambient: [f32; 4], camera: &Camera) -> Result<()> {
        let projection = camera.projection_matrix()?;
        for pass in &mut self.passes {
            if let RenderPass::Lighting(lighting) = pass {
                lighting.ambient = ambient;
            }
        }

        let device = self.ctx.device();
        device.set_draw_state(DrawState::default());
        device.bind_framebuffer(None);
        device.clear(Some(self.config.clear_colour), true);
        device.set_camera(camera.view_matrix(), projection);

        let result = self.run_passes(nodes, camera);

        let device = self.ctx.device();
        device.set_draw_state(DrawState::default());
        device.bind_framebuffer(None);
        let freed = self.ctx.collect_garbage();
        if freed > 0 {
            log::debug!("freed {freed} unused textures");
        }
        let submitted = self.ctx.device().submit();
        result.and(submitted)
    }

    fn run_passes(&mut self, nodes: &[NodeRef], camera: &Camera) -> Result<()> {
        let mut lighting = None;
        for pass in &mut self.passes {
            match pass {
                RenderPass::Lighting(pass) => {
                    pass.render(&mut self.ctx, camera, nodes)?;
                    lighting = pass.texture(&self.ctx);
                }
                RenderPass::Composite(pass) => match lighting {
                    Some(texture) => pass.render(&mut self.ctx, camera, nodes, texture)?,
                    None => log::warn!("composite pass skipped: no lighting buffer"),
                },
                RenderPass::Transparent(pass) => pass.render(&mut self.ctx, camera, nodes)?,
            }
        }
        Ok(())
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        for pass in &mut self.passes {
            if let RenderPass::Lighting(lighting) = pass {
                lighting.release(&mut self.ctx);
            }
        }
    }
}
