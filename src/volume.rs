use image::ImageBuffer;
use image::Luma;
use ndarray::Array3;
use ndarray::ArrayView2;
use ndarray::s;
use rayon::prelude::*;

/// An immutable 8-bit scalar field shaped (depth, height, width).
#[derive(Debug, Clone, PartialEq)]
pub struct Volume {
    data: Array3<u8>,
    window: Option<(f32, f32)>,
}

impl Volume {
    pub fn new(data: Array3<u8>) -> Self {
        Self { data, window: None }
    }

    /// Normalizes raw samples to 8 bits using the minimum and maximum of the
    /// whole field, so relative intensities survive across slices.
    ///
    /// `raw_window` is a (center, width) pair in raw units and is carried
    /// through the same mapping. Returns `None` when `raw` does not match
    /// `dim`.
    pub fn from_raw(
        raw: &[i32],
        dim: (usize, usize, usize),
        raw_window: Option<(f64, f64)>,
    ) -> Option<Self> {
        let min = raw.par_iter().copied().min().unwrap_or(0);
        let max = raw.par_iter().copied().max().unwrap_or(0);
        let range = if max > min { (max - min) as f64 } else { 1.0 };

        let normalized: Vec<u8> = raw
            .par_iter()
            .map(|&v| Self::normalize_to_u8(v, min, range))
            .collect();
        let data = Array3::from_shape_vec(dim, normalized).ok()?;

        let window = raw_window.map(|(center, width)| {
            let center = (center - min as f64) / range * 255.0;
            let width = width / range * 255.0;
            (center as f32, width as f32)
        });
        Some(Self { data, window })
    }

    #[inline]
    fn normalize_to_u8(value: i32, min: i32, range: f64) -> u8 {
        (((value - min) as f64 / range) * 255.0)
            .round()
            .clamp(0.0, 255.0) as u8
    }

    /// Get the dimensions of the volume (depth, height, width)
    pub fn dim(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    /// Get the dimensions as `[width, height, depth]`
    pub fn dimensions(&self) -> [usize; 3] {
        let (depth, height, width) = self.data.dim();
        [width, height, depth]
    }

    /// Flat intensities, x fastest then y then z.
    pub fn data(&self) -> &[u8] {
        self.data.as_slice().unwrap_or_default()
    }

    pub fn array(&self) -> &Array3<u8> {
        &self.data
    }

    /// Display window (level, width) in 8-bit units, if the source carried
    /// one.
    pub fn window(&self) -> Option<(f32, f32)> {
        self.window
    }

    pub fn slice(&self, index: usize) -> Option<ArrayView2<'_, u8>> {
        (index < self.dim().0).then(|| self.data.slice(s![index, .., ..]))
    }

    pub fn get_image(&self, index: usize) -> Option<ImageBuffer<Luma<u8>, Vec<u8>>> {
        Self::slice_to_image(&self.slice(index)?)
    }

    fn slice_to_image(slice: &ArrayView2<'_, u8>) -> Option<ImageBuffer<Luma<u8>, Vec<u8>>> {
        let (height, width) = slice.dim();
        let pixel_data: Vec<u8> = slice.iter().copied().collect();
        ImageBuffer::from_raw(width as u32, height as u32, pixel_data)
    }
}
