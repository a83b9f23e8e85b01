//! Gradient noise for the `noise*` opcodes
//!
//! Classic hashed Perlin noise, remapped from roughly `[-1, 1]` into the
//! `[0, 1]` range that shading-language `noise` returns.
use nalgebra::Vector3;

fn fade(t: f32) -> f32 {
    t * t * t * (t * (t * 6.0 - 15.0) + 10.0)
}

fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + t * (b - a)
}

fn hash(x: i32, y: i32, z: i32, seed: u32) -> u32 {
    let mut h = seed;
    h ^= x as u32;
    h = h.wrapping_mul(0x85EB_CA6B);
    h ^= y as u32;
    h = h.wrapping_mul(0xC2B2_AE35);
    h ^= z as u32;
    h = h.wrapping_mul(0x27D4_EB2D);
    h ^= h >> 16;
    h
}

fn grad(hash: u32, x: f32, y: f32, z: f32) -> f32 {
    let h = hash & 15;
    let u = if h < 8 { x } else { y };
    let v = match h {
        0..4 => y,
        12 | 14 => x,
        _ => z,
    };
    let u = if h & 1 == 0 { u } else { -u };
    let v = if h & 2 == 0 { v } else { -v };
    u + v
}

fn perlin(p: Vector3<f32>, seed: u32) -> f32 {
    let cell = p.map(f32::floor);
    let (xi, yi, zi) = (cell.x as i32, cell.y as i32, cell.z as i32);
    let f = p - cell;
    let (u, v, w) = (fade(f.x), fade(f.y), fade(f.z));

    let corner = |dx: i32, dy: i32, dz: i32| {
        grad(
            hash(xi + dx, yi + dy, zi + dz, seed),
            f.x - dx as f32,
            f.y - dy as f32,
            f.z - dz as f32,
        )
    };
    lerp(
        lerp(
            lerp(corner(0, 0, 0), corner(1, 0, 0), u),
            lerp(corner(0, 1, 0), corner(1, 1, 0), u),
            v,
        ),
        lerp(
            lerp(corner(0, 0, 1), corner(1, 0, 1), u),
            lerp(corner(0, 1, 1), corner(1, 1, 1), u),
            v,
        ),
        w,
    )
}

/// Scalar noise in `[0, 1]` over a 3D domain
pub fn noise(p: Vector3<f32>) -> f32 {
    (0.5 + 0.5 * perlin(p, 0)).clamp(0.0, 1.0)
}

/// Vector noise in `[0, 1]³`, one decorrelated channel per component
pub fn noise3(p: Vector3<f32>) -> Vector3<f32> {
    Vector3::new(
        noise(p),
        noise(p + Vector3::new(31.416, 47.853, 12.679)),
        noise(p + Vector3::new(-73.156, 19.427, 61.871)),
    )
}

/// Lifts a 1D domain into 3D
pub fn domain1(x: f32) -> Vector3<f32> {
    Vector3::new(x, 0.0, 0.0)
}

/// Lifts a 2D domain into 3D
pub fn domain2(x: f32, y: f32) -> Vector3<f32> {
    Vector3::new(x, y, 0.0)
}
