use std::path::Path;

use lumen_ngin::{
    data_structures::{material::{Material, MaterialValue}, mesh::DrawMode},
    error::Error,
    resources::obj::{ObjImporter, ObjOptions, load_obj},
};

use crate::common::test_utils::{TempAssets, init_logger};

mod common;

const QUAD: &str = "\
v 0 0 0
v 1 0 0
v 1 1 0
v 0 1 0
vn 0 0 1
usemtl white
f 1//1 2//1 3//1
f 1//1 3//1 4//1
";

fn importer() -> ObjImporter {
    init_logger();
    let mut importer = ObjImporter::new(ObjOptions::default());
    importer.materials_mut().insert(Material::new("white"));
    importer.materials_mut().insert(Material::new("red").with("Kd", [1.0, 0.0, 0.0]));
    importer
}

#[test]
fn shared_corners_become_one_vertex() {
    let meshes = importer().import(QUAD, Path::new("quad.obj")).unwrap();
    assert_eq!(meshes.len(), 1);
    let mesh = &meshes[0];
    assert_eq!(mesh.mode, DrawMode::Triangles);
    assert_eq!(mesh.vertex_count(), 4);
    assert_eq!(mesh.geometry.indices, vec![0, 1, 2, 0, 2, 3]);
    assert_eq!(mesh.geometry.normals.len(), 12);
    assert!(!mesh.geometry.has_texcoords());
}

#[test]
fn corners_differing_in_any_index_stay_separate() {
    let source = "\
v 0 0 0
v 1 0 0
v 0 1 0
vt 0 0
vt 1 1
usemtl white
f 1/1 2/1 3/1
f 1/2 2/1 3/1
";
    let meshes = importer().import(source, Path::new("split.obj")).unwrap();
    assert_eq!(meshes[0].vertex_count(), 4);
    assert_eq!(meshes[0].geometry.indices, vec![0, 1, 2, 3, 1, 2]);
    assert_eq!(meshes[0].geometry.vertex(3).unwrap().texcoord, Some([1.0, 1.0]));
}

#[test]
fn quads_are_kept_as_quads() {
    let source = "\
v 0 0 0
v 1 0 0
v 1 1 0
v 0 1 0
v 2 0 0
usemtl white
f 1 2 3 4
f 2 5 3
";
    let meshes = importer().import(source, Path::new("mixed.obj")).unwrap();
    let mesh = &meshes[0];
    assert_eq!(mesh.mode, DrawMode::Quads);
    // the triangle is padded to a degenerate quad
    assert_eq!(mesh.geometry.indices, vec![0, 1, 2, 3, 1, 4, 2, 2]);
}

#[test]
fn every_material_change_starts_a_new_mesh() {
    let source = "\
o crate
v 0 0 0
v 1 0 0
v 0 1 0
usemtl white
f 1 2 3
usemtl red
f 3 2 1
usemtl white
f 1 3 2
";
    let meshes = importer().import(source, Path::new("groups.obj")).unwrap();
    assert_eq!(meshes.len(), 3);
    assert_eq!(meshes[0].name.as_deref(), Some("crate"));
    assert_eq!(meshes[1].material.borrow().name, "red");
    assert!(std::rc::Rc::ptr_eq(&meshes[0].material, &meshes[2].material));
}

#[test]
fn negative_indices_count_back_from_the_current_vertex() {
    let source = "\
v 0 0 0
v 1 0 0
v 0 1 0
usemtl white
f -3 -2 -1
v 5 5 5
f -4 -3 -1
";
    let meshes = importer().import(source, Path::new("relative.obj")).unwrap();
    let prims = meshes[0].primitives();
    assert_eq!(prims[0][2].position, [0.0, 1.0, 0.0]);
    assert_eq!(prims[1][2].position, [5.0, 5.0, 5.0]);
}

#[test]
fn swap_yz_applies_to_positions_and_normals() {
    let mut importer = importer();
    importer.options.swap_yz = true;
    let meshes = importer.import(QUAD, Path::new("quad.obj")).unwrap();
    let v = meshes[0].geometry.vertex(2).unwrap();
    assert_eq!(v.position, [1.0, 0.0, 1.0]);
    assert_eq!(v.normal, Some([0.0, 1.0, 0.0]));
}

#[test]
fn face_before_any_material_is_a_parse_error() {
    let source = "v 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2 3\n";
    let err = importer().import(source, Path::new("bare.obj")).unwrap_err();
    assert!(matches!(err, Error::Parse { line: 4, .. }), "{err}");
}

#[test]
fn unknown_material_is_a_parse_error() {
    let err = importer()
        .import("usemtl chrome\n", Path::new("chrome.obj"))
        .unwrap_err();
    match err {
        Error::Parse { line, message, .. } => {
            assert_eq!(line, 1);
            assert!(message.contains("chrome"));
        }
        other => panic!("unexpected error {other}"),
    }
}

#[test]
fn bad_numbers_and_out_of_range_indices_report_their_line() {
    let err = importer()
        .import("v 0 zero 0\n", Path::new("nan.obj"))
        .unwrap_err();
    assert!(matches!(err, Error::Parse { line: 1, .. }));

    let source = "v 0 0 0\nusemtl white\nf 1 2 3\n";
    let err = importer().import(source, Path::new("range.obj")).unwrap_err();
    assert!(matches!(err, Error::Parse { line: 3, .. }), "{err}");
}

#[test]
fn mtllib_is_resolved_next_to_the_obj_and_loaded_once() {
    let assets = TempAssets::new(&[
        (
            "scene.mtl",
            "newmtl stone\nKd 0.5 0.5 0.5\nNs 10\nmap_Kd -blendu on stone.png\n",
        ),
        (
            "a.obj",
            "mtllib scene.mtl\nv 0 0 0\nv 1 0 0\nv 0 1 0\nusemtl stone\nf 1 2 3\n",
        ),
        (
            "b.obj",
            "mtllib scene.mtl\nv 0 0 0\nv 1 0 0\nv 0 1 0\nusemtl stone\nf 3 2 1\n",
        ),
    ]);
    let mut importer = ObjImporter::new(ObjOptions::default());
    let a = importer.load(assets.path("a.obj")).unwrap();
    let b = importer.load(assets.path("b.obj")).unwrap();
    assert!(importer.materials().is_loaded(assets.path("scene.mtl")));
    assert_eq!(importer.materials().len(), 1);
    assert!(std::rc::Rc::ptr_eq(&a.meshes[0].material, &b.meshes[0].material));

    let material = a.meshes[0].material.borrow();
    assert_eq!(material.get("Ns"), Some(&MaterialValue::Scalar(10.0)));
    assert_eq!(material.get("Kd"), Some(&MaterialValue::Tuple(vec![0.5, 0.5, 0.5])));
    assert_eq!(material.texture_path("map_Kd"), Some(assets.path("stone.png")));
}

#[test]
fn missing_files_are_not_found_errors() {
    let assets = TempAssets::new(&[("lonely.obj", "mtllib nowhere.mtl\n")]);
    let mut importer = ObjImporter::new(ObjOptions::default());
    assert!(matches!(
        importer.load(assets.path("absent.obj")),
        Err(Error::NotFound { .. })
    ));
    assert!(matches!(
        importer.load(assets.path("lonely.obj")),
        Err(Error::NotFound { .. })
    ));
}

#[test]
fn statements_before_newmtl_are_rejected() {
    let assets = TempAssets::new(&[
        ("early.mtl", "Kd 1 1 1\nnewmtl late\n"),
        ("early.obj", "mtllib early.mtl\n"),
    ]);
    let err = ObjImporter::new(ObjOptions::default())
        .load(assets.path("early.obj"))
        .unwrap_err();
    assert!(matches!(err, Error::Parse { line: 1, .. }), "{err}");
}

#[test]
fn optimise_merges_meshes_by_material() {
    let assets = TempAssets::new(&[
        ("m.mtl", "newmtl a\nKd 1 0 0\nnewmtl b\nKd 0 1 0\n"),
        (
            "m.obj",
            "mtllib m.mtl\nv 0 0 0\nv 1 0 0\nv 0 1 0\nusemtl a\nf 1 2 3\nusemtl b\nf 1 2 3\nusemtl a\nf 3 2 1\n",
        ),
    ]);
    let mut importer = ObjImporter::new(ObjOptions {
        optimise: true,
        ..Default::default()
    });
    let model = importer.load(assets.path("m.obj")).unwrap();
    assert_eq!(model.meshes.len(), 2);
    assert_eq!(model.meshes[0].material.borrow().name, "a");
    assert_eq!(model.meshes[0].geometry.indices, vec![0, 1, 2, 3, 4, 5]);
}

#[test]
fn load_obj_reads_a_model_with_its_own_library() {
    let assets = TempAssets::new(&[
        ("tri.mtl", "newmtl glass\nKd 0.2 0.4 0.6\nd 0.5\n"),
        (
            "tri.obj",
            "mtllib tri.mtl\nv 0 0 0\nv 1 0 0\nv 0 1 0\nusemtl glass\nf 1 2 3\n",
        ),
    ]);
    let model = load_obj(assets.path("tri.obj"), ObjOptions::default()).unwrap();
    assert_eq!(model.meshes.len(), 1);
    assert_eq!(model.meshes[0].vertex_count(), 3);
    let material = model.meshes[0].material.borrow();
    assert_eq!(material.name, "glass");
    assert_eq!(material.get("d"), Some(&MaterialValue::Scalar(0.5)));
}

#[test]
fn mtllib_arguments_each_name_a_library() {
    let assets = TempAssets::new(&[
        ("a.mtl", "newmtl red\nKd 1 0 0\n"),
        ("b.mtl", "newmtl blue\nKd 0 0 1\n"),
        (
            "two.obj",
            "mtllib a.mtl b.mtl\nv 0 0 0\nv 1 0 0\nv 0 1 0\nusemtl blue\nf 1 2 3\n",
        ),
    ]);
    let mut importer = ObjImporter::new(ObjOptions::default());
    let model = importer.load(assets.path("two.obj")).unwrap();
    assert!(importer.materials().is_loaded(assets.path("a.mtl")));
    assert!(importer.materials().is_loaded(assets.path("b.mtl")));
    assert_eq!(model.meshes[0].material.borrow().name, "blue");
}
