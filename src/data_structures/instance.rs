//! Per-node placement.
//!
//! Model and group nodes carry an [`Instance`]. While drawing, its matrix is
//! pushed onto the context's transform stack, so nested groups compose like
//! a matrix stack.

use cgmath::{Deg, InnerSpace, Matrix4, One, Quaternion, Rotation3, Vector3};

/// Position, rotation (as quaternion) and scale of a node.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Instance {
    pub position: Vector3<f32>,
    pub rotation: Quaternion<f32>,
    pub scale: Vector3<f32>,
}

impl Instance {
    /// Identity transformation (no move, rotate, or scale).
    pub fn new() -> Self {
        Self {
            position: Vector3::new(0.0, 0.0, 0.0),
            rotation: Quaternion::one(),
            scale: Vector3::new(1.0, 1.0, 1.0),
        }
    }

    pub fn with_position(mut self, position: Vector3<f32>) -> Self {
        self.position = position;
        self
    }

    /// Rotation of `angle` degrees about `axis`. A zero axis means no rotation.
    pub fn with_rotation(mut self, angle: f32, axis: Vector3<f32>) -> Self {
        self.rotation = if axis.magnitude2() > 0.0 {
            Quaternion::from_axis_angle(axis.normalize(), Deg(angle))
        } else {
            Quaternion::one()
        };
        self
    }

    pub fn with_scale(mut self, scale: f32) -> Self {
        self.scale = Vector3::new(scale, scale, scale);
        self
    }

    /// Translation after rotation after scale.
    pub fn to_matrix(&self) -> Matrix4<f32> {
        Matrix4::from_translation(self.position)
            * Matrix4::from(self.rotation)
            * Matrix4::from_nonuniform_scale(self.scale.x, self.scale.y, self.scale.z)
    }
}

impl From<Vector3<f32>> for Instance {
    fn from(position: Vector3<f32>) -> Self {
        Self::new().with_position(position)
    }
}

impl Default for Instance {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use cgmath::{Vector3, Vector4};

    use super::Instance;

    #[test]
    fn scales_then_rotates_then_moves() {
        let instance = Instance::from(Vector3::new(10.0, 0.0, 0.0))
            .with_rotation(90.0, Vector3::unit_z())
            .with_scale(2.0);
        let p = instance.to_matrix() * Vector4::new(1.0, 0.0, 0.0, 1.0);
        assert_relative_eq!(p.x, 10.0, epsilon = 1e-5);
        assert_relative_eq!(p.y, 2.0, epsilon = 1e-5);
    }
}
