//! Look-at camera with perspective or orthographic projection.

use cgmath::{Deg, InnerSpace, Matrix4, Point3, Vector3, Vector4, ortho, perspective};

use crate::error::{Error, Result};

/// cgmath produces OpenGL clip space (z in -1..1); wgpu expects z in 0..1.
#[rustfmt::skip]
pub const OPENGL_TO_WGPU_MATRIX: Matrix4<f32> = Matrix4::new(
    1.0, 0.0, 0.0, 0.0,
    0.0, 1.0, 0.0, 0.0,
    0.0, 0.0, 0.5, 0.0,
    0.0, 0.0, 0.5, 1.0,
);

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Projection {
    /// Vertical field of view in degrees.
    Perspective { fov: f32 },
    /// `scale` is the width of the view volume in world units.
    Orthographic { scale: f32 },
}

#[derive(Clone, Debug, PartialEq)]
pub struct Camera {
    pub viewport: (u32, u32),
    pub position: Point3<f32>,
    pub look_at: Point3<f32>,
    pub near: f32,
    pub far: f32,
    pub projection: Projection,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            viewport: (800, 600),
            position: Point3::new(0.0, 15.0, 15.0),
            look_at: Point3::new(0.0, 0.0, 0.0),
            near: 1.0,
            far: 10000.0,
            projection: Projection::Perspective { fov: 67.5 },
        }
    }
}

impl Camera {
    pub fn new(position: Point3<f32>, look_at: Point3<f32>) -> Self {
        Self {
            position,
            look_at,
            ..Default::default()
        }
    }

    pub fn orthographic(position: Point3<f32>, look_at: Point3<f32>, scale: f32) -> Self {
        Self {
            projection: Projection::Orthographic { scale },
            ..Self::new(position, look_at)
        }
    }

    pub fn with_viewport(mut self, width: u32, height: u32) -> Self {
        self.viewport = (width, height);
        self
    }

    pub fn aspect(&self) -> f32 {
        self.viewport.0 as f32 / self.viewport.1.max(1) as f32
    }

    /// Direction the camera looks in (not normalized).
    pub fn eye_vector(&self) -> Vector3<f32> {
        self.look_at - self.position
    }

    /// World to view transform. The camera looks down -z in view space.
    ///
    /// The up hint is +y, or +z when looking (almost) straight along y. A
    /// camera whose `look_at` equals its position looks down world -z.
    pub fn view_matrix(&self) -> Matrix4<f32> {
        let eye = self.eye_vector();
        let f = if eye.magnitude2() > f32::EPSILON {
            eye.normalize()
        } else {
            -Vector3::unit_z()
        };
        let mut up = Vector3::unit_y();
        if f.cross(up).magnitude2() < 1e-6 {
            up = Vector3::unit_z();
        }
        let s = f.cross(up).normalize();
        let u = s.cross(f);
        // Rows s, u, -f: the inverse (transpose) of the basis rotation.
        #[rustfmt::skip]
        let rotation = Matrix4::new(
            s.x, u.x, -f.x, 0.0,
            s.y, u.y, -f.y, 0.0,
            s.z, u.z, -f.z, 0.0,
            0.0, 0.0, 0.0, 1.0,
        );
        let p = self.position;
        rotation * Matrix4::from_translation(Vector3::new(-p.x, -p.y, -p.z))
    }

    /// (left, right, bottom, top) of the orthographic view volume.
    pub fn bounds(&self, scale: f32) -> (f32, f32, f32, f32) {
        let hs = 0.5 * scale;
        let vs = hs / self.aspect();
        (-hs, hs, -vs, vs)
    }

    /// Check that a projection can be built and the viewport rendered into.
    pub fn validate(&self) -> Result<()> {
        let (width, height) = self.viewport;
        if width == 0 || height == 0 {
            return Err(Error::FramebufferIncomplete {
                width,
                height,
                reason: "zero-sized viewport".to_string(),
            });
        }
        let invalid = |reason: String| Err(Error::InvalidCamera(reason));
        match self.projection {
            Projection::Perspective { fov } if !(fov > 0.0 && fov < 180.0) => {
                return invalid(format!("field of view {fov} is outside (0, 180) degrees"));
            }
            Projection::Perspective { .. } if !(self.near > 0.0) => {
                return invalid(format!("near plane {} must be positive", self.near));
            }
            Projection::Orthographic { scale } if !(scale > 0.0) => {
                return invalid(format!("orthographic scale {scale} must be positive"));
            }
            _ => {}
        }
        if !(self.far > self.near) {
            return invalid(format!("far plane {} is not beyond near plane {}", self.far, self.near));
        }
        Ok(())
    }

    /// Projection into wgpu clip space. Fails for the cameras
    /// [`validate`](Self::validate) rejects.
    pub fn projection_matrix(&self) -> Result<Matrix4<f32>> {
        self.validate()?;
        let proj = match self.projection {
            Projection::Perspective { fov } => perspective(Deg(fov), self.aspect(), self.near, self.far),
            Projection::Orthographic { scale } => {
                let (l, r, b, t) = self.bounds(scale);
                ortho(l, r, b, t, self.near, self.far)
            }
        };
        Ok(OPENGL_TO_WGPU_MATRIX * proj)
    }

    /// View-space depth of a world point; larger means further away.
    pub fn depth_of(&self, point: Point3<f32>) -> f32 {
        let v = self.view_matrix() * Vector4::new(point.x, point.y, point.z, 1.0);
        -v.z
    }
}
