#[cfg(feature = "integration-tests")]
use lumen_ngin::{
    camera::Camera,
    context::Context,
    data_structures::scene_graph::Scene,
    device::wgpu_device::WgpuDevice,
    render::{Renderer, RendererConfig},
};

#[cfg(feature = "integration-tests")]
mod common;

#[cfg(feature = "integration-tests")]
fn gpu_scene(clear_colour: [f32; 4]) -> Scene {
    common::test_utils::init_logger();
    let device = WgpuDevice::headless(64, 48).expect("a wgpu adapter");
    let config = RendererConfig {
        clear_colour,
        ..Default::default()
    };
    Scene::new(Renderer::new(Context::new(device), config).expect("built-in shaders compile"))
}

#[cfg(feature = "integration-tests")]
fn camera() -> Camera {
    use cgmath::Point3;
    Camera::new(Point3::new(0.0, 0.0, 5.0), Point3::new(0.0, 0.0, 0.0)).with_viewport(64, 48)
}

#[test]
#[cfg(feature = "integration-tests")]
fn should_render_clear_colour() {
    let mut scene = gpu_scene([1.0; 4]);
    scene.render(&camera()).unwrap();
    let image = scene
        .context()
        .device_as::<WgpuDevice>()
        .unwrap()
        .read_target()
        .unwrap();
    for pixel in image.pixels() {
        assert_eq!(*pixel, image::Rgba([255, 255, 255, 255]));
    }
}

#[test]
#[cfg(feature = "integration-tests")]
fn unlit_scene_accumulates_nothing() {
    use cgmath::Point3;
    use lumen_ngin::data_structures::primitives::quad;

    let mut scene = gpu_scene([0.0, 0.0, 0.0, 1.0]);
    scene
        .add(quad(
            [
                Point3::new(-1.0, -1.0, 0.0),
                Point3::new(1.0, -1.0, 0.0),
                Point3::new(1.0, 1.0, 0.0),
                Point3::new(-1.0, 1.0, 0.0),
            ],
            None,
        ))
        .unwrap();
    scene.render(&camera()).unwrap();
    let fb = scene.renderer().lighting_framebuffer().unwrap();
    let texels = scene
        .context()
        .device_as::<WgpuDevice>()
        .unwrap()
        .read_framebuffer(fb)
        .unwrap();
    assert!(texels.iter().all(|t| *t == [0.0; 4]));
}

#[test]
#[cfg(feature = "integration-tests")]
fn head_on_sun_lights_a_white_quad_fully() {
    use cgmath::{Point3, Vector3};
    use lumen_ngin::data_structures::{
        lighting::{Light, Sunlight},
        primitives::quad,
    };

    let mut scene = gpu_scene([0.0, 0.0, 0.0, 1.0]);
    scene
        .add(quad(
            [
                Point3::new(-1.0, -1.0, 0.0),
                Point3::new(1.0, -1.0, 0.0),
                Point3::new(1.0, 1.0, 0.0),
                Point3::new(-1.0, 1.0, 0.0),
            ],
            None,
        ))
        .unwrap();
    scene
        .add(Light::from(Sunlight::new(Vector3::unit_z(), [1.0; 4], 1.0)))
        .unwrap();
    scene.render(&camera()).unwrap();
    let image = scene
        .context()
        .device_as::<WgpuDevice>()
        .unwrap()
        .read_target()
        .unwrap();
    assert_eq!(*image.get_pixel(32, 24), image::Rgba([255, 255, 255, 255]));
    assert_eq!(*image.get_pixel(0, 0), image::Rgba([0, 0, 0, 255]));
}
