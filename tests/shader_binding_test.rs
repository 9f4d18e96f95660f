use std::rc::Rc;

use lumen_ngin::{
    device::{ShaderSource, UniformDecl, UniformType, UniformValue, recording::Command},
    data_structures::material::{Material, MaterialValue},
    error::Error,
    pipelines::shader::{Shader, UniformKind},
};

use crate::common::test_utils::{recorder, recording_context};

mod common;

const FLAT: &str = "fn vs_main() {}\nfn fs_main() {}\n";

fn flat_source() -> ShaderSource {
    ShaderSource::wgsl(
        FLAT,
        vec![
            UniformDecl::new("tint", UniformType::Float),
            UniformDecl::new("mode", UniformType::Int),
            UniformDecl::new("shininess", UniformType::Float),
        ],
    )
}

#[test]
fn guards_restore_the_previous_shader() {
    let (mut ctx, _) = recording_context();
    let outer = Rc::new(Shader::compile(&mut ctx, "outer", &flat_source()).unwrap());
    let inner = Rc::new(Shader::compile(&mut ctx, "inner", &flat_source()).unwrap());
    {
        let mut guard = ctx.bind_shader(&outer).unwrap();
        {
            let guard = guard.bind_shader(&inner).unwrap();
            assert_eq!(guard.bound_program(), inner.program());
        }
        assert_eq!(guard.bound_program(), outer.program());
        assert_eq!(recorder(&mut guard).bound_program(), outer.program());
    }
    assert_eq!(ctx.bound_program(), None);
    assert_eq!(recorder(&mut ctx).bound_program(), None);
}

#[test]
fn early_returns_release_the_binding() {
    let (mut ctx, _) = recording_context();
    let shader = Rc::new(Shader::compile(&mut ctx, "flat", &flat_source()).unwrap());

    let fails = |ctx: &mut lumen_ngin::context::Context| -> lumen_ngin::Result<()> {
        let mut ctx = ctx.bind_shader(&shader)?;
        shader.uniformf(&mut ctx, "tint", &[1.0, 2.0, 3.0, 4.0, 5.0])?;
        Ok(())
    };
    assert!(matches!(fails(&mut ctx), Err(Error::InvalidUniform { .. })));
    assert!(ctx.active_shader().is_none());
}

#[test]
fn compile_failures_leave_the_shader_unlinked() {
    let (mut ctx, _) = recording_context();
    let broken = ShaderSource::wgsl("fn vs_main() {}\n", vec![]);
    let shader = Rc::new(Shader::new(&mut ctx, "broken", &broken));
    assert!(!shader.is_linked());
    assert!(shader.link_error().unwrap().contains("fs_main"));
    assert!(matches!(
        ctx.bind_shader(&shader).map(|_| ()),
        Err(Error::ShaderNotLinked(_))
    ));
    assert!(matches!(
        Shader::compile(&mut ctx, "broken", &broken),
        Err(Error::ShaderCompile { .. })
    ));
}

#[test]
fn vector_arrays_fill_one_slot_per_element() {
    let (mut ctx, _) = recording_context();
    let source = ShaderSource::wgsl(
        FLAT,
        vec![
            UniformDecl::array("offsets", UniformType::Float, 4),
            UniformDecl::array("points", UniformType::Float, 4),
        ],
    );
    let shader = Rc::new(Shader::compile(&mut ctx, "arrays", &source).unwrap());
    assert!(matches!(
        shader.uniform3fv(&mut ctx, "points", &[[1.0, 2.0, 3.0]]),
        Err(Error::ShaderNotBound(_))
    ));

    let mut guard = ctx.bind_shader(&shader).unwrap();
    shader
        .uniform2fv(&mut guard, "offsets", &[[1.0, 2.0], [3.0, 4.0]])
        .unwrap();
    shader
        .uniform3fv(&mut guard, "points", &[[1.0, 2.0, 3.0]])
        .unwrap();
    let device = recorder(&mut guard);
    let uniform = |name: &str| {
        device.commands().iter().rev().find_map(|c| match c {
            Command::SetUniform { name: n, value, .. } if n == name => Some(value.clone()),
            _ => None,
        })
    };
    assert_eq!(
        uniform("offsets"),
        Some(UniformValue::Vec4Array(vec![[1.0, 2.0, 0.0, 0.0], [3.0, 4.0, 0.0, 0.0]]))
    );
    assert_eq!(
        uniform("points"),
        Some(UniformValue::Vec4Array(vec![[1.0, 2.0, 3.0, 0.0]]))
    );
}

#[test]
fn uniforms_need_the_shader_bound() {
    let (mut ctx, _) = recording_context();
    let a = Rc::new(Shader::compile(&mut ctx, "a", &flat_source()).unwrap());
    let b = Rc::new(Shader::compile(&mut ctx, "b", &flat_source()).unwrap());
    assert!(matches!(
        a.uniformf(&mut ctx, "tint", &[1.0]),
        Err(Error::ShaderNotBound(_))
    ));
    let material = Material::new("m").shared();
    let mut guard = ctx.bind_shader(&b).unwrap();
    assert!(matches!(
        a.set_material(&mut guard, &material),
        Err(Error::ShaderNotBound(_))
    ));
    assert!(b.uniformi(&mut guard, "mode", &[2]).is_ok());
}

#[test]
fn set_material_follows_the_rules() {
    let (mut ctx, textures) = recording_context();
    let mut shader = Shader::compile(&mut ctx, "flat", &flat_source())
        .unwrap()
        .with_reserved_textures(1);
    shader.bind_material_to_uniform("Kd", "tint", UniformKind::Float);
    shader.bind_material_to_uniform("illum", "mode", UniformKind::Int);
    shader.bind_material_to_uniform_or("Ns", "shininess", UniformKind::Float, 8.0);
    shader.bind_material_to_texture("map_Kd", "diffuse");
    shader.bind_material_to_texture("map_Ks", "gloss");
    let shader = Rc::new(shader);

    let material = Material::new("m")
        .with("Kd", MaterialValue::Tuple(vec![0.5, 0.25, 1.0, 1.0, 9.0]))
        .with("illum", 2.0)
        .with("map_Kd", MaterialValue::Map("wood.png".into()))
        .shared();

    let mut guard = ctx.bind_shader(&shader).unwrap();
    shader.set_material(&mut guard, &material).unwrap();
    let device = recorder(&mut guard);
    let uniform = |name: &str| {
        device.commands().iter().rev().find_map(|c| match c {
            Command::SetUniform { name: n, value, .. } if n == name => Some(value.clone()),
            _ => None,
        })
    };
    assert_eq!(uniform("tint"), Some(UniformValue::Float(vec![0.5, 0.25, 1.0, 1.0])));
    assert_eq!(uniform("mode"), Some(UniformValue::Int(vec![2])));
    assert_eq!(uniform("shininess"), Some(UniformValue::Float(vec![8.0])));
    assert_eq!(uniform("diffuse"), Some(UniformValue::Int(vec![1])));
    assert_eq!(uniform("gloss"), Some(UniformValue::Int(vec![2])));
    assert_eq!(textures.loads("wood.png"), 1);

    let bound: Vec<u32> = device
        .commands()
        .iter()
        .filter_map(|c| match c {
            Command::BindTexture(unit, _) => Some(*unit),
            _ => None,
        })
        .collect();
    assert_eq!(bound, vec![1, 2]);
}

#[test]
fn texture_units_are_limited() {
    let (mut ctx, _) = recording_context();
    let shader = Rc::new(Shader::compile(&mut ctx, "flat", &flat_source()).unwrap());
    let white = ctx.white_texture().unwrap();
    let mut guard = ctx.bind_shader(&shader).unwrap();
    assert!(shader.bind_texture(&mut guard, "t", 3, white.key()).is_ok());
    assert!(matches!(
        shader.bind_texture(&mut guard, "t", 4, white.key()),
        Err(Error::InvalidUniform { .. })
    ));
}

#[test]
fn transform_stack_composes_and_survives_errors() {
    use cgmath::{Matrix4, SquareMatrix, Vector3};
    let (mut ctx, _) = recording_context();
    let up = Matrix4::from_translation(Vector3::new(0.0, 1.0, 0.0));
    let result: lumen_ngin::Result<()> = ctx.with_transform(up, |ctx| {
        ctx.push_transform(up);
        assert_eq!(ctx.transform(), Matrix4::from_translation(Vector3::new(0.0, 2.0, 0.0)));
        ctx.pop_transform();
        Err(Error::UnknownResource("mesh"))
    });
    assert!(result.is_err());
    assert_eq!(ctx.transform(), Matrix4::identity());
    ctx.pop_transform();
    assert_eq!(ctx.transform(), Matrix4::identity());
}
