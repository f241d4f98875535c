//! Math type re-exports and small color utilities.

// Re-export glam types used throughout the renderer
pub use glam::{Mat4, UVec2, Vec2, Vec3, Vec4};

/// Exact sRGB transfer function (linear -> display).
#[inline]
pub fn linear_to_srgb(v: f32) -> f32 {
    if v <= 0.0031308 {
        v * 12.92
    } else {
        1.055 * v.powf(1.0 / 2.4) - 0.055
    }
}

/// Rec.709 luminance of a linear RGB triple.
#[inline]
pub fn luminance(rgb: Vec3) -> f32 {
    rgb.dot(Vec3::new(0.2126, 0.7152, 0.0722))
}
