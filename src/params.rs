use serde::{Deserialize, Serialize};
use std::f32::consts::FRAC_PI_2;

/// Rotation applied per pixel of pointer drag by a UI layer.
pub const ROTATION_PER_PIXEL: f32 = 0.01;
/// Zoom change per unit of wheel delta by a UI layer.
pub const ZOOM_PER_WHEEL_UNIT: f32 = -0.001;
pub const ZOOM_RANGE: (f32, f32) = (0.1, 3.0);
pub const VERTICAL_ROTATION_RANGE: (f32, f32) = (-FRAC_PI_2, FRAC_PI_2);

/// User driven state read once at the start of every frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderParameters {
    /// Samples at or below `threshold / 255` after windowing are skipped.
    pub threshold: f32,
    pub opacity: f32,
    pub window_level: f32,
    pub window_width: f32,
    /// Rotation about the X axis, applied first.
    pub rotation_vertical: f32,
    /// Rotation about the Y axis, applied second.
    pub rotation_horizontal: f32,
    pub zoom: f32,
}

impl Default for RenderParameters {
    fn default() -> Self {
        Self {
            threshold: 0.0,
            opacity: 1.0,
            window_level: 128.0,
            window_width: 256.0,
            rotation_vertical: 0.0,
            rotation_horizontal: 0.0,
            zoom: 1.0,
        }
    }
}

impl RenderParameters {
    pub fn with_window(mut self, level: f32, width: f32) -> Self {
        self.window_level = level;
        self.window_width = width;
        self
    }

    /// Sets both rotations, keeping the vertical one within a quarter turn.
    pub fn set_rotation(&mut self, vertical: f32, horizontal: f32) {
        self.rotation_vertical = vertical.clamp(VERTICAL_ROTATION_RANGE.0, VERTICAL_ROTATION_RANGE.1);
        self.rotation_horizontal = horizontal;
    }

    pub fn set_zoom(&mut self, zoom: f32) {
        self.zoom = zoom.clamp(ZOOM_RANGE.0, ZOOM_RANGE.1);
    }
}

/// Quality and performance knobs of the ray marcher.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MarchConfig {
    /// Distance between samples, in units of the cube edge.
    pub step_size: f32,
    pub max_steps: u32,
    /// Marching stops once accumulated alpha reaches this value.
    pub opacity_cutoff: f32,
    /// Scales per-sample alpha.
    pub alpha_scale: f32,
    /// Sample positions are clamped to `[edge_clamp, 1 - edge_clamp]`.
    pub edge_clamp: f32,
    /// Vertical field of view in radians.
    pub fov_y: f32,
}

impl Default for MarchConfig {
    fn default() -> Self {
        Self {
            step_size: 0.005,
            max_steps: 200,
            opacity_cutoff: 0.95,
            alpha_scale: 0.05,
            edge_clamp: 0.001,
            fov_y: 45f32.to_radians(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamps_rotation_and_zoom() {
        let mut params = RenderParameters::default();
        params.set_rotation(3.0, 5.0);
        params.set_zoom(10.0);
        assert_eq!(params.rotation_vertical, FRAC_PI_2);
        assert_eq!(params.rotation_horizontal, 5.0);
        assert_eq!(params.zoom, 3.0);

        let windowed = params.with_window(40.0, 80.0);
        assert_eq!((windowed.window_level, windowed.window_width), (40.0, 80.0));
        assert_eq!(windowed.zoom, 3.0);
    }

    #[test]
    fn partial_config_uses_defaults() {
        let config: MarchConfig = serde_json::from_str(r#"{ "max_steps": 50 }"#).unwrap();
        assert_eq!(config.max_steps, 50);
        assert_eq!(config.step_size, 0.005);
    }
}
