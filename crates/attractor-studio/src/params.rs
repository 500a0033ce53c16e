use bytemuck::{Pod, Zeroable};

use crate::config::{AttractorConfig, MAX_DIMENSION};

/// Size in bytes of `words` 32-bit words.
pub fn words(words: u64) -> u64 {
    words * 4
}

/// Uniform block shared by every entry point of `dejong.wgsl`.
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct Uniforms {
    pub a: f32,
    pub b: f32,
    pub c: f32,
    pub d: f32,
    pub frame: f32,
    pub width: f32,
    pub loops: f32,
    pub bright: f32,
    pub budget: f32,
    pub tsres: f32,
    pub height: f32,
    /// Data pixels per surface pixel.
    pub scale: f32,
}

pub const UNIFORM_WORDS: u64 = (std::mem::size_of::<Uniforms>() / 4) as u64;

/// Brightness is scaled into the range the fragment shader's exposure expects.
const BRIGHTNESS_UNIT: f32 = 4.9e-6;

impl Uniforms {
    pub fn new(config: &AttractorConfig, t: f64, frame: u64, canvas: Canvas) -> Self {
        let param = |k: f64| (4.0 * (t * k).sin()) as f32;
        Self {
            a: param(1.03),
            b: param(1.07),
            c: param(1.09),
            d: param(1.13),
            frame: frame as f32,
            width: canvas.width as f32,
            loops: config.loops as f32,
            bright: config.brightness * BRIGHTNESS_UNIT,
            budget: config.budget_ms.clamp(0.01, 100.0),
            tsres: config.timestamp_resolution,
            height: canvas.height as f32,
            scale: canvas.scale,
        }
    }
}

/// Resolution of the point-density image.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Canvas {
    pub width: u32,
    pub height: u32,
    /// Canvas pixels per surface pixel.
    pub scale: f32,
}

impl Canvas {
    /// Scales the surface by `scale_percent` and clamps each edge to `[1, MAX_DIMENSION]`,
    /// then shrinks both edges until the data buffer fits `max_bytes`.
    pub fn fit(surface_width: u32, surface_height: u32, scale_percent: f32, max_bytes: u64) -> Self {
        let scale = f64::from(scale_percent) * 0.01;
        let edge = |px: u32| (f64::from(px) * scale).clamp(1.0, f64::from(MAX_DIMENSION)) as u32;
        let (mut width, mut height) = (edge(surface_width), edge(surface_height));

        while data_buffer_bytes(width, height) > max_bytes && (width > 1 || height > 1) {
            let shrink = (max_bytes as f64 / data_buffer_bytes(width, height) as f64)
                .sqrt()
                .min(0.99);
            width = ((f64::from(width) * shrink) as u32).max(1);
            height = ((f64::from(height) * shrink) as u32).max(1);
        }

        Self {
            width,
            height,
            scale: width as f32 / surface_width.max(1) as f32,
        }
    }

    pub fn data_bytes(&self) -> u64 {
        data_buffer_bytes(self.width, self.height)
    }
}

/// Three accumulation channels per pixel plus one trailing word.
///
/// The extra word keeps the size off multiples of 4096, which some drivers handle
/// markedly slower.
pub fn data_buffer_bytes(width: u32, height: u32) -> u64 {
    words(u64::from(width) * u64::from(height) * 3 + 1)
}
