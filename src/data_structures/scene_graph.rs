//! The scene graph.
//!
//! A [`Scene`] is an ordered list of shared [`NodeRef`]s plus the ambient
//! light and the [`Renderer`] that draws them. Nodes are a closed set:
//!
//! - [`ModelNode`] places a shared [`Model`] with its own [`Instance`]
//! - [`SceneNode::Light`] feeds the lighting pass and draws nothing
//! - [`GroupNode`] nests children under a common transform
//! - [`RayNode`] is a camera facing quad between two points (beams, lasers)
//!
//! Nodes draw through whatever shader the pass has bound on the [`Context`],
//! uploading each mesh's material with [`Shader::set_material`] first.

use std::{
    cell::{Ref, RefCell, RefMut},
    fmt,
    rc::Rc,
};

use cgmath::{EuclideanSpace, InnerSpace, Point3};

use crate::{
    camera::Camera,
    context::Context,
    data_structures::{
        instance::Instance,
        lighting::Light,
        material::MaterialRef,
        mesh::{DrawMode, Geometry, Mesh},
        model::Model,
    },
    error::Result,
    pipelines::shader::Shader,
    render::Renderer,
};

/// Per-frame hook of a model node, called with the elapsed seconds.
pub type Updater = Rc<dyn Fn(&mut Instance, f32)>;

/// A placed model. Cloning copies the per-instance state and shares the model.
#[derive(Clone)]
pub struct ModelNode {
    pub model: Rc<Model>,
    pub instance: Instance,
    /// Drawn by the transparent pass instead of lighting and composite.
    pub transparent: bool,
    /// Replaces the built-in lighting shader for this node.
    pub shader: Option<Rc<Shader>>,
    pub updater: Option<Updater>,
}

impl fmt::Debug for ModelNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelNode")
            .field("meshes", &self.model.meshes.len())
            .field("instance", &self.instance)
            .field("transparent", &self.transparent)
            .field("shader", &self.shader.as_ref().map(|s| s.name()))
            .field("updater", &self.updater.is_some())
            .finish()
    }
}

impl ModelNode {
    pub fn new(model: impl Into<Rc<Model>>) -> Self {
        Self {
            model: model.into(),
            instance: Instance::new(),
            transparent: false,
            shader: None,
            updater: None,
        }
    }

    pub fn with_instance(mut self, instance: Instance) -> Self {
        self.instance = instance;
        self
    }

    pub fn with_transparency(mut self, transparent: bool) -> Self {
        self.transparent = transparent;
        self
    }

    pub fn with_shader(mut self, shader: Rc<Shader>) -> Self {
        self.shader = Some(shader);
        self
    }

    pub fn with_updater(mut self, updater: impl Fn(&mut Instance, f32) + 'static) -> Self {
        self.updater = Some(Rc::new(updater));
        self
    }

    fn draw(&self, ctx: &mut Context) -> Result<()> {
        ctx.with_transform(self.instance.to_matrix(), |ctx| {
            for mesh in &self.model.meshes {
                draw_mesh(ctx, mesh)?;
            }
            Ok(())
        })
    }
}

fn draw_mesh(ctx: &mut Context, mesh: &Mesh) -> Result<()> {
    if let Some(shader) = ctx.active_shader().cloned() {
        shader.set_material(ctx, &mesh.material)?;
    }
    let handle = ctx.upload_mesh(mesh)?;
    let model = ctx.transform();
    ctx.device().draw(handle, model);
    Ok(())
}

/// Children drawn under one shared transform. Groups are always opaque;
/// their children are drawn with them whatever their own flags say.
#[derive(Clone, Debug, Default)]
pub struct GroupNode {
    pub children: Vec<NodeRef>,
    pub instance: Instance,
}

impl GroupNode {
    pub fn new(children: Vec<NodeRef>) -> Self {
        Self {
            children,
            instance: Instance::new(),
        }
    }
}

/// A flat strip of `width` from `p1` to `p2`, turned to face the camera.
#[derive(Clone, Debug)]
pub struct RayNode {
    pub p1: Point3<f32>,
    pub p2: Point3<f32>,
    pub width: f32,
    pub transparent: bool,
    pub material: MaterialRef,
}

impl RayNode {
    pub fn new(p1: Point3<f32>, p2: Point3<f32>, width: f32, material: MaterialRef) -> Self {
        Self {
            p1,
            p2,
            width,
            transparent: true,
            material,
        }
    }

    /// The quad as seen from `camera`, or `None` when the ray points
    /// straight at it.
    pub fn geometry(&self, camera: &Camera) -> Option<Geometry> {
        let eye = camera.eye_vector();
        let across = (self.p2 - self.p1).cross(eye);
        if across.magnitude2() < f32::EPSILON || eye.magnitude2() < f32::EPSILON {
            return None;
        }
        let across = across.normalize() * (self.width * 0.5);
        let n = -eye.normalize();
        let corners = [
            self.p1 + across,
            self.p1 - across,
            self.p2 - across,
            self.p2 + across,
        ];
        Some(Geometry::new(
            corners.iter().flat_map(|p| [p.x, p.y, p.z]).collect(),
            corners.iter().flat_map(|_| [n.x, n.y, n.z]).collect(),
            vec![0.0, 0.0, 0.0, 1.0, 1.0, 1.0, 1.0, 0.0],
            vec![0, 1, 2, 3],
        ))
    }

    fn draw(&self, ctx: &mut Context, camera: &Camera) -> Result<()> {
        let Some(geometry) = self.geometry(camera) else {
            return Ok(());
        };
        if let Some(shader) = ctx.active_shader().cloned() {
            shader.set_material(ctx, &self.material)?;
        }
        let model = ctx.transform();
        ctx.device().draw_immediate(DrawMode::Quads, &geometry, model)
    }
}

#[derive(Clone, Debug)]
pub enum SceneNode {
    Model(ModelNode),
    Light(Light),
    Group(GroupNode),
    Ray(RayNode),
}

impl SceneNode {
    pub fn update(&mut self, dt: f32) {
        match self {
            SceneNode::Model(node) => {
                if let Some(updater) = node.updater.clone() {
                    updater(&mut node.instance, dt);
                }
            }
            SceneNode::Group(group) => {
                for child in &group.children {
                    child.borrow_mut().update(dt);
                }
            }
            SceneNode::Light(_) | SceneNode::Ray(_) => (),
        }
    }

    /// Lights count as transparent so the opaque passes skip them.
    pub fn is_transparent(&self) -> bool {
        match self {
            SceneNode::Model(node) => node.transparent,
            SceneNode::Ray(ray) => ray.transparent,
            SceneNode::Light(_) => true,
            SceneNode::Group(_) => false,
        }
    }

    pub fn shader(&self) -> Option<Rc<Shader>> {
        match self {
            SceneNode::Model(node) => node.shader.clone(),
            _ => None,
        }
    }

    pub fn light(&self) -> Option<&Light> {
        match self {
            SceneNode::Light(light) => Some(light),
            _ => None,
        }
    }

    /// World position used to sort transparent nodes.
    pub fn position(&self) -> Point3<f32> {
        match self {
            SceneNode::Model(node) => Point3::from_vec(node.instance.position),
            SceneNode::Group(group) => Point3::from_vec(group.instance.position),
            SceneNode::Ray(ray) => ray.p1.midpoint(ray.p2),
            SceneNode::Light(light) => {
                let h = light.homogeneous();
                Point3::new(h.x, h.y, h.z)
            }
        }
    }

    /// Draw with the currently bound shader.
    pub fn draw(&self, ctx: &mut Context, camera: &Camera) -> Result<()> {
        match self {
            SceneNode::Model(node) => node.draw(ctx),
            SceneNode::Ray(ray) => ray.draw(ctx, camera),
            SceneNode::Group(group) => ctx.with_transform(group.instance.to_matrix(), |ctx| {
                for child in &group.children {
                    child.borrow().draw(ctx, camera)?;
                }
                Ok(())
            }),
            SceneNode::Light(_) => Ok(()),
        }
    }
}

impl From<ModelNode> for SceneNode {
    fn from(node: ModelNode) -> Self {
        SceneNode::Model(node)
    }
}

impl From<Light> for SceneNode {
    fn from(light: Light) -> Self {
        SceneNode::Light(light)
    }
}

impl From<GroupNode> for SceneNode {
    fn from(group: GroupNode) -> Self {
        SceneNode::Group(group)
    }
}

impl From<RayNode> for SceneNode {
    fn from(ray: RayNode) -> Self {
        SceneNode::Ray(ray)
    }
}

/// A shared, mutable handle on a node. Equality is identity.
#[derive(Clone, Debug)]
pub struct NodeRef(Rc<RefCell<SceneNode>>);

impl NodeRef {
    pub fn new(node: impl Into<SceneNode>) -> Self {
        Self(Rc::new(RefCell::new(node.into())))
    }

    pub fn borrow(&self) -> Ref<'_, SceneNode> {
        self.0.borrow()
    }

    pub fn borrow_mut(&self) -> RefMut<'_, SceneNode> {
        self.0.borrow_mut()
    }

    pub fn ptr_eq(&self, other: &NodeRef) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl PartialEq for NodeRef {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for NodeRef {}

impl From<SceneNode> for NodeRef {
    fn from(node: SceneNode) -> Self {
        NodeRef::new(node)
    }
}

impl From<ModelNode> for NodeRef {
    fn from(node: ModelNode) -> Self {
        NodeRef::new(node)
    }
}

impl From<Light> for NodeRef {
    fn from(light: Light) -> Self {
        NodeRef::new(light)
    }
}

impl From<GroupNode> for NodeRef {
    fn from(group: GroupNode) -> Self {
        NodeRef::new(group)
    }
}

impl From<RayNode> for NodeRef {
    fn from(ray: RayNode) -> Self {
        NodeRef::new(ray)
    }
}

impl From<Model> for NodeRef {
    fn from(model: Model) -> Self {
        NodeRef::new(ModelNode::new(model))
    }
}

impl From<Rc<Model>> for NodeRef {
    fn from(model: Rc<Model>) -> Self {
        NodeRef::new(ModelNode::new(model))
    }
}

impl From<Mesh> for NodeRef {
    fn from(mesh: Mesh) -> Self {
        NodeRef::new(ModelNode::new(Model::from(mesh)))
    }
}

pub struct Scene {
    nodes: Vec<NodeRef>,
    /// Ambient light, added once per pixel by the lighting pass.
    pub ambient: [f32; 4],
    renderer: Renderer,
}

impl Scene {
    pub fn new(renderer: Renderer) -> Self {
        Self {
            nodes: Vec::new(),
            ambient: [0.0, 0.0, 0.0, 1.0],
            renderer,
        }
    }

    pub fn renderer(&self) -> &Renderer {
        &self.renderer
    }

    pub fn renderer_mut(&mut self) -> &mut Renderer {
        &mut self.renderer
    }

    pub fn context(&mut self) -> &mut Context {
        self.renderer.context_mut()
    }

    /// Add a node, model or mesh and prepare its resources for drawing.
    /// Adding a node that is already in the scene does nothing.
    pub fn add(&mut self, node: impl Into<NodeRef>) -> Result<NodeRef> {
        let node = node.into();
        if self.nodes.contains(&node) {
            return Ok(node);
        }
        self.renderer.prepare_node(&node)?;
        self.nodes.push(node.clone());
        Ok(node)
    }

    /// Returns whether `node` was in the scene.
    pub fn remove(&mut self, node: &NodeRef) -> bool {
        let before = self.nodes.len();
        self.nodes.retain(|n| n != node);
        self.nodes.len() != before
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
    }

    pub fn nodes(&self) -> &[NodeRef] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Top-level lights in insertion order.
    pub fn lights(&self) -> Vec<Light> {
        self.nodes
            .iter()
            .filter_map(|n| n.borrow().light().cloned())
            .collect()
    }

    /// Advance every node by `dt` seconds, in insertion order.
    pub fn update(&mut self, dt: f32) {
        for node in &self.nodes {
            node.borrow_mut().update(dt);
        }
    }

    pub fn render(&mut self, camera: &Camera) -> Result<()> {
        self.renderer.render(&self.nodes, self.ambient, camera)
    }
}

#[cfg(test)]
mod tests {
    use cgmath::{Point3, Vector3};

    use super::*;
    use crate::{
        camera::Camera,
        data_structures::{lighting::PointLight, material::Material},
    };

    fn ray() -> RayNode {
        RayNode::new(
            Point3::new(-1.0, 0.0, 0.0),
            Point3::new(1.0, 0.0, 0.0),
            0.5,
            Material::new("beam").shared(),
        )
    }

    #[test]
    fn ray_quad_faces_the_camera() {
        let camera = Camera::new(Point3::new(0.0, 0.0, 10.0), Point3::origin());
        let geometry = ray().geometry(&camera).unwrap();
        let p = |i: u32| Vector3::from(geometry.vertex(i).unwrap().position);
        let normal = (p(1) - p(0)).cross(p(3) - p(0)).normalize();
        assert!((normal - Vector3::unit_z()).magnitude() < 1e-5);
        assert!(((p(0) - p(1)).magnitude() - 0.5).abs() < 1e-5);
    }

    #[test]
    fn ray_along_the_view_has_no_quad() {
        let camera = Camera::new(Point3::new(5.0, 0.0, 0.0), Point3::origin());
        assert!(ray().geometry(&camera).is_none());
    }

    #[test]
    fn lights_are_never_opaque() {
        let light = SceneNode::from(Light::from(PointLight::default()));
        assert!(light.is_transparent());
        assert!(!SceneNode::from(GroupNode::default()).is_transparent());
    }

    #[test]
    fn node_equality_is_identity() {
        let a = NodeRef::new(GroupNode::default());
        let b = NodeRef::new(GroupNode::default());
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
    }
}
