use crate::{
    atlas::Atlas,
    compositor::{Frame, RayMarchCompositor},
    params::{MarchConfig, RenderParameters},
    volume::Volume,
};

use parking_lot::RwLock;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;
use web_time::Instant;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("No usable rendering surface: {0}")]
    UnsupportedSurface(String),

    #[error("GPU readback failed: {0}")]
    Readback(String),
}

/// Renderer surface shared between a UI thread and the render loop.
///
/// The atlas is swapped whole on `load`, parameters are copied once at the
/// start of each frame, so updates made while a frame is in flight apply to
/// the next one.
pub struct VolumeRenderer {
    compositor: RayMarchCompositor,
    atlas: RwLock<Option<Arc<Atlas>>>,
    params: RwLock<RenderParameters>,
    surface: RwLock<(u32, u32)>,
}

impl VolumeRenderer {
    pub fn new(width: u32, height: u32, config: MarchConfig) -> Result<Self, RenderError> {
        check_surface(width, height)?;
        Ok(Self {
            compositor: RayMarchCompositor::new(config),
            atlas: RwLock::new(None),
            params: RwLock::new(RenderParameters::default()),
            surface: RwLock::new((width, height)),
        })
    }

    /// Packs `volume` and makes it the one rendered from the next frame on.
    pub fn load(&self, volume: &Volume) {
        let start = Instant::now();
        let atlas = Arc::new(Atlas::pack(volume));
        debug!(
            layout = ?atlas.layout(),
            elapsed = ?start.elapsed(),
            "packed atlas"
        );
        *self.atlas.write() = Some(atlas);
    }

    pub fn unload(&self) {
        *self.atlas.write() = None;
    }

    pub fn atlas(&self) -> Option<Arc<Atlas>> {
        self.atlas.read().clone()
    }

    pub fn parameters(&self) -> RenderParameters {
        *self.params.read()
    }

    pub fn set_parameters(&self, params: RenderParameters) {
        *self.params.write() = params;
    }

    pub fn set_threshold(&self, threshold: f32) {
        self.params.write().threshold = threshold;
    }

    pub fn set_opacity(&self, opacity: f32) {
        self.params.write().opacity = opacity;
    }

    pub fn set_window_level(&self, level: f32) {
        self.params.write().window_level = level;
    }

    pub fn set_window_width(&self, width: f32) {
        self.params.write().window_width = width;
    }

    pub fn set_rotation(&self, vertical: f32, horizontal: f32) {
        self.params.write().set_rotation(vertical, horizontal);
    }

    pub fn set_zoom(&self, zoom: f32) {
        self.params.write().set_zoom(zoom);
    }

    pub fn size(&self) -> (u32, u32) {
        *self.surface.read()
    }

    pub fn resize(&self, width: u32, height: u32) -> Result<(), RenderError> {
        check_surface(width, height)?;
        *self.surface.write() = (width, height);
        Ok(())
    }

    /// Renders with a snapshot of the current parameters.
    pub fn render(&self) -> Frame {
        let params = self.parameters();
        self.render_with(&params)
    }

    /// Renders with explicit parameters, ignoring the stored ones.
    pub fn render_with(&self, params: &RenderParameters) -> Frame {
        let atlas = self.atlas();
        let (width, height) = self.size();
        let start = Instant::now();
        let frame = self
            .compositor
            .render(atlas.as_deref(), params, width, height);
        debug!(width, height, elapsed = ?start.elapsed(), "rendered frame");
        frame
    }
}

pub(crate) fn check_surface(width: u32, height: u32) -> Result<(), RenderError> {
    if width == 0 || height == 0 {
        return Err(RenderError::UnsupportedSurface(format!(
            "surface of {width}x{height} pixels"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    #[test]
    fn rejects_empty_surface() {
        assert!(matches!(
            VolumeRenderer::new(0, 10, MarchConfig::default()),
            Err(RenderError::UnsupportedSurface(_))
        ));
        let renderer = VolumeRenderer::new(4, 4, MarchConfig::default()).unwrap();
        assert!(renderer.resize(4, 0).is_err());
        assert_eq!(renderer.size(), (4, 4));
    }

    #[test]
    fn setters_update_the_next_snapshot() {
        let renderer = VolumeRenderer::new(2, 2, MarchConfig::default()).unwrap();
        renderer.set_threshold(10.0);
        renderer.set_opacity(0.5);
        renderer.set_window_level(40.0);
        renderer.set_window_width(80.0);
        renderer.set_zoom(0.01);
        let params = renderer.parameters();
        assert_eq!(params.threshold, 10.0);
        assert_eq!(params.opacity, 0.5);
        assert_eq!((params.window_level, params.window_width), (40.0, 80.0));
        assert_eq!(params.zoom, 0.1);
    }

    #[test]
    fn load_swaps_atlas_without_touching_the_old_one() {
        let renderer = VolumeRenderer::new(3, 3, MarchConfig::default()).unwrap();
        renderer.load(&Volume::new(Array3::from_elem((2, 2, 2), 10u8)));
        let held = renderer.atlas().unwrap();

        renderer.load(&Volume::new(Array3::from_elem((4, 2, 2), 20u8)));
        assert_eq!(held.layout().depth, 2);
        assert_eq!(renderer.atlas().unwrap().layout().depth, 4);
    }

    #[test]
    fn unload_restores_placeholder_and_keeps_parameters() {
        let renderer = VolumeRenderer::new(4, 4, MarchConfig::default()).unwrap();
        let params = renderer.parameters().with_window(30.0, 60.0);
        renderer.set_parameters(params);
        let placeholder = renderer.render();

        renderer.load(&Volume::new(Array3::from_elem((2, 2, 2), 200u8)));
        assert_ne!(renderer.render(), placeholder);

        renderer.unload();
        assert!(renderer.atlas().is_none());
        assert_eq!(renderer.render(), placeholder);
        assert_eq!(renderer.parameters(), params);
    }

    #[test]
    fn resize_changes_frame_size() {
        let renderer = VolumeRenderer::new(3, 3, MarchConfig::default()).unwrap();
        renderer.resize(6, 2).unwrap();
        let frame = renderer.render();
        assert_eq!((frame.width(), frame.height()), (6, 2));
        assert_eq!(frame.pixels().len(), 6 * 2 * 4);
    }
}
