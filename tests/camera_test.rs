use approx::assert_relative_eq;
use cgmath::{Point3, Vector4};
use lumen_ngin::{
    Error,
    camera::{Camera, Projection},
};

#[test]
fn view_matrix_looks_down_negative_z() {
    let camera = Camera::new(Point3::new(0.0, 0.0, 10.0), Point3::new(0.0, 0.0, 0.0));
    let v = camera.view_matrix() * Vector4::new(1.0, 2.0, 3.0, 1.0);
    assert_relative_eq!(v.x, 1.0, epsilon = 1e-5);
    assert_relative_eq!(v.y, 2.0, epsilon = 1e-5);
    assert_relative_eq!(v.z, -7.0, epsilon = 1e-5);
    assert_relative_eq!(camera.depth_of(Point3::new(0.0, 0.0, 0.0)), 10.0, epsilon = 1e-5);
}

#[test]
fn view_matrix_reference_points() {
    let h = std::f32::consts::SQRT_2 * 10.0;
    let cases = [
        ((0.0, 0.0, 20.0), (0.0, 0.0, 0.0), (2.0, 1.0, -20.0)),
        ((20.0, 0.0, 0.0), (0.0, 0.0, 0.0), (0.0, 1.0, -18.0)),
        ((-20.0, 0.0, 0.0), (0.0, 0.0, 0.0), (0.0, 1.0, -22.0)),
        (
            (2.0, h, h),
            (2.0, 0.0, 0.0),
            (0.0, std::f32::consts::FRAC_1_SQRT_2, std::f32::consts::FRAC_1_SQRT_2 - 20.0),
        ),
    ];
    for (eye, target, expected) in cases {
        let camera = Camera::new(
            Point3::new(eye.0, eye.1, eye.2),
            Point3::new(target.0, target.1, target.2),
        );
        let v = camera.view_matrix() * Vector4::new(2.0, 1.0, 0.0, 1.0);
        assert_relative_eq!(v.x, expected.0, epsilon = 1e-4);
        assert_relative_eq!(v.y, expected.1, epsilon = 1e-4);
        assert_relative_eq!(v.z, expected.2, epsilon = 1e-4);
    }
}

#[test]
fn looking_straight_down_falls_back_to_z_up() {
    let camera = Camera::new(Point3::new(0.0, 10.0, 0.0), Point3::new(0.0, 0.0, 0.0));
    let v = camera.view_matrix() * Vector4::new(1.0, 0.0, 2.0, 1.0);
    assert_relative_eq!(v.x, -1.0, epsilon = 1e-5);
    assert_relative_eq!(v.y, 2.0, epsilon = 1e-5);
    assert_relative_eq!(v.z, -10.0, epsilon = 1e-5);
}

#[test]
fn perspective_maps_near_and_far_to_wgpu_depth_range() {
    let camera = Camera::default();
    let proj = camera.projection_matrix().unwrap();
    let near = proj * Vector4::new(0.0, 0.0, -camera.near, 1.0);
    let far = proj * Vector4::new(0.0, 0.0, -camera.far, 1.0);
    assert_relative_eq!(near.z / near.w, 0.0, epsilon = 1e-4);
    assert_relative_eq!(far.z / far.w, 1.0, epsilon = 1e-4);
}

#[test]
fn orthographic_bounds_follow_the_aspect_ratio() {
    let camera = Camera::orthographic(Point3::new(0.0, 0.0, 10.0), Point3::new(0.0, 0.0, 0.0), 10.0)
        .with_viewport(800, 600);
    assert_eq!(camera.projection, Projection::Orthographic { scale: 10.0 });
    let (l, r, b, t) = camera.bounds(10.0);
    assert_relative_eq!(l, -5.0);
    assert_relative_eq!(r, 5.0);
    assert_relative_eq!(b, -3.75);
    assert_relative_eq!(t, 3.75);

    let edge = camera.projection_matrix().unwrap() * Vector4::new(5.0, 3.75, -5.0, 1.0);
    assert_relative_eq!(edge.x / edge.w, 1.0, epsilon = 1e-5);
    assert_relative_eq!(edge.y / edge.w, 1.0, epsilon = 1e-5);
}

#[test]
fn unusable_cameras_are_errors() {
    let camera = Camera::default().with_viewport(0, 48);
    assert!(matches!(
        camera.projection_matrix(),
        Err(Error::FramebufferIncomplete { width: 0, height: 48, .. })
    ));

    for fov in [0.0, 180.0, -10.0, f32::NAN] {
        let camera = Camera {
            projection: Projection::Perspective { fov },
            ..Default::default()
        };
        assert!(matches!(camera.validate(), Err(Error::InvalidCamera(_))), "fov {fov}");
    }

    let flat = Camera {
        near: 5.0,
        far: 5.0,
        ..Default::default()
    };
    assert!(matches!(flat.projection_matrix(), Err(Error::InvalidCamera(_))));
    assert!(Camera::default().validate().is_ok());
}

#[test]
fn camera_on_its_target_looks_down_negative_z() {
    let camera = Camera::new(Point3::new(1.0, 2.0, 3.0), Point3::new(1.0, 2.0, 3.0));
    let v = camera.view_matrix() * Vector4::new(1.0, 2.0, 0.0, 1.0);
    assert_relative_eq!(v.x, 0.0, epsilon = 1e-5);
    assert_relative_eq!(v.y, 0.0, epsilon = 1e-5);
    assert_relative_eq!(v.z, -3.0, epsilon = 1e-5);
}
