use crate::{
    atlas::Atlas,
    params::{MarchConfig, RenderParameters},
};

use image::{ImageBuffer, Rgba};
use rayon::prelude::*;

const CUBE_CENTER: [f32; 3] = [0.5, 0.5, 0.5];
/// Slack when testing whether a sample left the unit cube, so the entry
/// point itself is not rejected by rounding.
const EXIT_TOLERANCE: f32 = 1e-4;
const MIN_WINDOW_WIDTH: f32 = 1.0;

/// One rendered RGBA8 frame, rows top to bottom.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl Frame {
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Self {
        Self {
            width,
            height,
            pixels,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let start = ((y * self.width + x) * 4) as usize;
        let rgba = self.pixels.get(start..start + 4)?;
        Some([rgba[0], rgba[1], rgba[2], rgba[3]])
    }

    pub fn to_image(&self) -> Option<ImageBuffer<Rgba<u8>, Vec<u8>>> {
        ImageBuffer::from_raw(self.width, self.height, self.pixels.clone())
    }
}

/// CPU ray marcher compositing the atlas front to back.
#[derive(Debug, Clone, Default)]
pub struct RayMarchCompositor {
    config: MarchConfig,
}

impl RayMarchCompositor {
    pub fn new(config: MarchConfig) -> Self {
        Self { config }
    }

    /// Renders one frame. Without an atlas a coordinate gradient is drawn.
    pub fn render(
        &self,
        atlas: Option<&Atlas>,
        params: &RenderParameters,
        width: u32,
        height: u32,
    ) -> Frame {
        let pixels: Vec<u8> = (0..height)
            .into_par_iter()
            .flat_map(|y| {
                (0..width)
                    .flat_map(|x| match atlas {
                        Some(atlas) => self.shade(atlas, params, x, y, width, height),
                        None => gradient(x, y, width, height),
                    })
                    .collect::<Vec<u8>>()
            })
            .collect();

        Frame::new(width, height, pixels)
    }

    fn shade(
        &self,
        atlas: &Atlas,
        params: &RenderParameters,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
    ) -> [u8; 4] {
        let direction = self.ray_direction(x, y, width, height, params.zoom);
        let direction = rotate(direction, params);
        // Rotations pivot on the cube center, which is also the eye.
        let origin = CUBE_CENTER;

        match intersect_unit_cube(origin, direction) {
            Some((t_near, _)) => self.march(atlas, params, origin, direction, t_near),
            None => [0; 4],
        }
    }

    /// Pinhole camera looking down -Z; zoom narrows the field of view.
    fn ray_direction(&self, x: u32, y: u32, width: u32, height: u32, zoom: f32) -> [f32; 3] {
        let aspect = width as f32 / height as f32;
        let scale = (self.config.fov_y * 0.5).tan() / zoom.max(f32::EPSILON);
        let ndc_x = (x as f32 + 0.5) / width as f32 * 2.0 - 1.0;
        let ndc_y = 1.0 - (y as f32 + 0.5) / height as f32 * 2.0;
        normalize([ndc_x * aspect * scale, ndc_y * scale, -1.0])
    }

    fn march(
        &self,
        atlas: &Atlas,
        params: &RenderParameters,
        origin: [f32; 3],
        direction: [f32; 3],
        t_near: f32,
    ) -> [u8; 4] {
        let config = &self.config;
        let mut color = 0.0f32;
        let mut alpha = 0.0f32;

        for step in 0..config.max_steps {
            let t = t_near + step as f32 * config.step_size;
            let position = add(origin, scale(direction, t));
            if position
                .iter()
                .any(|&c| !(-EXIT_TOLERANCE..=1.0 + EXIT_TOLERANCE).contains(&c))
            {
                break;
            }

            let sample = atlas.sample(position, config.edge_clamp);
            let Some(intensity) = window_intensity(sample, params) else {
                continue;
            };
            let sample_alpha = intensity * params.opacity * config.alpha_scale;
            color += intensity * sample_alpha * (1.0 - alpha);
            alpha += sample_alpha * (1.0 - alpha);

            if alpha >= config.opacity_cutoff {
                break;
            }
        }

        if alpha <= 0.0 {
            return [0; 4];
        }
        let grey = to_u8(color / alpha);
        [grey, grey, grey, to_u8(alpha)]
    }
}

/// Windowed intensity in `[0, 1]`, or `None` when the sample falls at or
/// below the threshold.
pub fn window_intensity(sample: f32, params: &RenderParameters) -> Option<f32> {
    let width = params.window_width.max(MIN_WINDOW_WIDTH);
    let low = params.window_level - width / 2.0;
    let intensity = ((sample - low) / width).clamp(0.0, 1.0);
    (intensity > params.threshold / 255.0).then_some(intensity)
}

/// Slab test against the unit cube. Returns `(t_near, t_far)` only for rays
/// that pass through it with `t_near < t_far` and `t_far` not behind the
/// origin; grazing rays count as misses.
pub fn intersect_unit_cube(origin: [f32; 3], direction: [f32; 3]) -> Option<(f32, f32)> {
    let mut t_near = f32::NEG_INFINITY;
    let mut t_far = f32::INFINITY;

    for axis in 0..3 {
        if direction[axis].abs() < f32::EPSILON {
            if !(0.0..=1.0).contains(&origin[axis]) {
                return None;
            }
            continue;
        }
        let inverse = 1.0 / direction[axis];
        let t0 = -origin[axis] * inverse;
        let t1 = (1.0 - origin[axis]) * inverse;
        t_near = t_near.max(t0.min(t1));
        t_far = t_far.min(t0.max(t1));
    }

    if t_near >= t_far || t_far < 0.0 {
        None
    } else {
        Some((t_near, t_far))
    }
}

fn gradient(x: u32, y: u32, width: u32, height: u32) -> [u8; 4] {
    let r = to_u8(x as f32 / width as f32);
    let g = to_u8(y as f32 / height as f32);
    [r, g, 128, 255]
}

/// Vertical (about X) first, then horizontal (about Y).
fn rotate(v: [f32; 3], params: &RenderParameters) -> [f32; 3] {
    let (sin_x, cos_x) = params.rotation_vertical.sin_cos();
    let v = [v[0], v[1] * cos_x - v[2] * sin_x, v[1] * sin_x + v[2] * cos_x];
    let (sin_y, cos_y) = params.rotation_horizontal.sin_cos();
    [v[0] * cos_y + v[2] * sin_y, v[1], -v[0] * sin_y + v[2] * cos_y]
}

#[inline]
fn to_u8(value: f32) -> u8 {
    (value * 255.0).round().clamp(0.0, 255.0) as u8
}

fn add(a: [f32; 3], b: [f32; 3]) -> [f32; 3] {
    [a[0] + b[0], a[1] + b[1], a[2] + b[2]]
}

fn scale(v: [f32; 3], s: f32) -> [f32; 3] {
    [v[0] * s, v[1] * s, v[2] * s]
}

fn normalize(v: [f32; 3]) -> [f32; 3] {
    let length = (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt();
    scale(v, 1.0 / length)
}
