//! Scene lighting consumed by the `ambient` and `diffuse` opcodes
use nalgebra::Vector3;

/// A light at infinity
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct DistantLight {
    /// Direction pointing from the surface towards the light
    pub direction: Vector3<f32>,
    pub color: Vector3<f32>,
}

/// Lights visible to a shading invocation
#[derive(Clone, Debug, PartialEq)]
pub struct Lighting {
    pub ambient: Vector3<f32>,
    pub lights: Vec<DistantLight>,
}

impl Default for Lighting {
    fn default() -> Self {
        Self {
            ambient: Vector3::zeros(),
            lights: vec![],
        }
    }
}

impl Lighting {
    pub fn new(ambient: Vector3<f32>) -> Self {
        Self {
            ambient,
            lights: vec![],
        }
    }

    /// Adds a distant light
    pub fn with_light(mut self, direction: Vector3<f32>, color: Vector3<f32>) -> Self {
        self.lights.push(DistantLight { direction, color });
        self
    }

    /// Lambertian response for a surface normal
    ///
    /// The normal does not need to be normalized; a zero normal receives no
    /// light.
    pub fn diffuse(&self, n: Vector3<f32>) -> Vector3<f32> {
        let Some(n) = n.try_normalize(0.0) else {
            return Vector3::zeros();
        };
        self.lights
            .iter()
            .filter_map(|l| {
                let d = l.direction.try_normalize(0.0)?;
                Some(l.color * n.dot(&d).max(0.0))
            })
            .sum()
    }
}
