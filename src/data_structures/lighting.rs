//! Point and directional lights.
//!
//! Lights are handed to the lighting shader as homogeneous view-space
//! 4-vectors: `w == 1` marks a position, `w == 0` a direction towards the
//! light.

use cgmath::{EuclideanSpace, InnerSpace, Matrix4, Point3, Vector3, Vector4};

#[derive(Clone, Debug, PartialEq)]
pub struct PointLight {
    pub position: Point3<f32>,
    /// RGBA; the alpha component normally stays at 1.
    pub colour: [f32; 4],
    pub intensity: f32,
    /// Quadratic attenuation coefficient.
    pub falloff: f32,
}

impl Default for PointLight {
    fn default() -> Self {
        Self {
            position: Point3::origin(),
            colour: [1.0; 4],
            intensity: 5.0,
            falloff: 2.0,
        }
    }
}

impl PointLight {
    pub fn new(position: Point3<f32>) -> Self {
        Self {
            position,
            ..Default::default()
        }
    }
}

/// A light infinitely far away.
#[derive(Clone, Debug, PartialEq)]
pub struct Sunlight {
    direction: Vector3<f32>,
    pub colour: [f32; 4],
    pub intensity: f32,
}

impl Sunlight {
    /// `direction` points from the scene towards the light; it is normalized.
    pub fn new(direction: Vector3<f32>, colour: [f32; 4], intensity: f32) -> Self {
        Self {
            direction: direction.normalize(),
            colour,
            intensity,
        }
    }

    pub fn direction(&self) -> Vector3<f32> {
        self.direction
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Light {
    Point(PointLight),
    Sun(Sunlight),
}

impl From<PointLight> for Light {
    fn from(l: PointLight) -> Self {
        Light::Point(l)
    }
}

impl From<Sunlight> for Light {
    fn from(l: Sunlight) -> Self {
        Light::Sun(l)
    }
}

impl Light {
    pub fn w(&self) -> f32 {
        match self {
            Light::Point(_) => 1.0,
            Light::Sun(_) => 0.0,
        }
    }

    pub fn colour(&self) -> [f32; 4] {
        match self {
            Light::Point(l) => l.colour,
            Light::Sun(l) => l.colour,
        }
    }

    pub fn intensity(&self) -> f32 {
        match self {
            Light::Point(l) => l.intensity,
            Light::Sun(l) => l.intensity,
        }
    }

    /// Directional lights never attenuate.
    pub fn falloff(&self) -> f32 {
        match self {
            Light::Point(l) => l.falloff,
            Light::Sun(_) => 0.0,
        }
    }

    /// World-space homogeneous vector (position or direction).
    pub fn homogeneous(&self) -> Vector4<f32> {
        match self {
            Light::Point(l) => l.position.to_vec().extend(1.0),
            Light::Sun(l) => l.direction.extend(0.0),
        }
    }

    /// The light as seen through `view`, keeping its `w`.
    pub fn view_vector(&self, view: &Matrix4<f32>) -> [f32; 4] {
        let v = view * self.homogeneous();
        [v.x, v.y, v.z, self.w()]
    }
}
