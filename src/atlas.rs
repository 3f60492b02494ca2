//! Packs the slices of a volume side by side on one 2D grid so a renderer
//! can sample the whole field from a single texture.

use crate::volume::Volume;

use image::{ImageBuffer, Luma};
use ndarray::{Array2, s};
use serde::{Deserialize, Serialize};

/// Grid placement of slices inside the atlas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AtlasLayout {
    pub slice_width: usize,
    pub slice_height: usize,
    pub depth: usize,
    pub slices_per_row: usize,
    pub rows: usize,
    pub atlas_width: usize,
    pub atlas_height: usize,
}

impl AtlasLayout {
    pub fn new(depth: usize, slice_width: usize, slice_height: usize) -> Self {
        let slices_per_row = ceil_sqrt(depth);
        let rows = if slices_per_row == 0 {
            0
        } else {
            depth.div_ceil(slices_per_row)
        };
        Self {
            slice_width,
            slice_height,
            depth,
            slices_per_row,
            rows,
            atlas_width: slices_per_row * slice_width,
            atlas_height: rows * slice_height,
        }
    }

    /// Grid (row, column) of slice `z`.
    pub fn cell(&self, z: usize) -> (usize, usize) {
        (z / self.slices_per_row, z % self.slices_per_row)
    }

    /// Pixel offset of the top-left corner of slice `z`, as (y, x).
    pub fn origin(&self, z: usize) -> (usize, usize) {
        let (row, column) = self.cell(z);
        (row * self.slice_height, column * self.slice_width)
    }
}

fn ceil_sqrt(n: usize) -> usize {
    let root = n.isqrt();
    if root * root == n { root } else { root + 1 }
}

/// Atlas pixels plus the layout that produced them.
#[derive(Debug, Clone, PartialEq)]
pub struct Atlas {
    layout: AtlasLayout,
    data: Array2<u8>,
}

impl Atlas {
    /// Copies every slice of `volume` into its cell. Trailing cells that no
    /// slice maps to stay zero.
    pub fn pack(volume: &Volume) -> Self {
        let (depth, height, width) = volume.dim();
        let layout = AtlasLayout::new(depth, width, height);
        let mut data = Array2::<u8>::zeros((layout.atlas_height, layout.atlas_width));

        for (z, slice) in volume.array().outer_iter().enumerate() {
            let (y0, x0) = layout.origin(z);
            data.slice_mut(s![y0..y0 + height, x0..x0 + width])
                .assign(&slice);
        }

        Self { layout, data }
    }

    pub fn layout(&self) -> &AtlasLayout {
        &self.layout
    }

    pub fn data(&self) -> &Array2<u8> {
        &self.data
    }

    /// Value of voxel (x, y, z) read back through the atlas.
    #[inline]
    pub fn voxel(&self, x: usize, y: usize, z: usize) -> u8 {
        let (y0, x0) = self.layout.origin(z);
        self.data[[y0 + y, x0 + x]]
    }

    /// Samples the field at a normalized position.
    ///
    /// The position is clamped to `[edge, 1 - edge]` on every axis. In-plane
    /// lookup is nearest neighbour; along depth the two neighbouring slices
    /// are blended, except on the last slice.
    pub fn sample(&self, position: [f32; 3], edge: f32) -> f32 {
        let layout = &self.layout;
        if layout.depth == 0 || layout.slice_width == 0 || layout.slice_height == 0 {
            return 0.0;
        }
        let [px, py, pz] = position.map(|p| p.clamp(edge, 1.0 - edge));

        let x = ((px * layout.slice_width as f32) as usize).min(layout.slice_width - 1);
        let y = ((py * layout.slice_height as f32) as usize).min(layout.slice_height - 1);
        let depth = pz * (layout.depth - 1) as f32;
        let z = (depth.floor() as usize).min(layout.depth - 1);
        let fraction = depth - z as f32;

        let current = self.voxel(x, y, z) as f32;
        if z + 1 >= layout.depth {
            return current;
        }
        let next = self.voxel(x, y, z + 1) as f32;
        current + (next - current) * fraction
    }

    pub fn to_image(&self) -> Option<ImageBuffer<Luma<u8>, Vec<u8>>> {
        let pixels: Vec<u8> = self.data.iter().copied().collect();
        ImageBuffer::from_raw(
            self.layout.atlas_width as u32,
            self.layout.atlas_height as u32,
            pixels,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;
    use pretty_assertions::assert_eq;

    fn ramp_volume(depth: usize, height: usize, width: usize) -> Volume {
        Volume::new(Array3::from_shape_fn((depth, height, width), |(z, y, x)| {
            (z * 16 + y * 4 + x) as u8
        }))
    }

    #[test]
    fn layout_is_ceil_sqrt_grid() {
        let layout = AtlasLayout::new(4, 4, 4);
        assert_eq!((layout.slices_per_row, layout.rows), (2, 2));

        let layout = AtlasLayout::new(5, 3, 2);
        assert_eq!((layout.slices_per_row, layout.rows), (3, 2));
        assert_eq!((layout.atlas_width, layout.atlas_height), (9, 4));

        let layout = AtlasLayout::new(1, 8, 8);
        assert_eq!((layout.slices_per_row, layout.rows), (1, 1));
    }

    #[test]
    fn every_voxel_lands_in_its_cell() {
        let volume = ramp_volume(5, 3, 4);
        let atlas = Atlas::pack(&volume);
        for ((z, y, x), &value) in volume.array().indexed_iter() {
            assert_eq!(atlas.layout().cell(z), (z / 3, z % 3));
            assert_eq!(atlas.voxel(x, y, z), value);
        }
    }

    #[test]
    fn trailing_cells_stay_zero() {
        let volume = Volume::new(Array3::from_elem((3, 2, 2), 9u8));
        let atlas = Atlas::pack(&volume);
        let unused = atlas.data().slice(s![2..4, 2..4]);
        assert!(unused.iter().all(|&v| v == 0));
    }

    #[test]
    fn blends_between_slices_but_not_past_the_last() {
        let mut data = Array3::zeros((3, 1, 1));
        data[[0, 0, 0]] = 0;
        data[[1, 0, 0]] = 100;
        data[[2, 0, 0]] = 200;
        let atlas = Atlas::pack(&Volume::new(data));

        assert!((atlas.sample([0.5, 0.5, 0.25], 0.001) - 50.0).abs() < 1e-3);
        assert!((atlas.sample([0.5, 0.5, 1.0], 0.001) - 199.8).abs() < 1e-2);
    }
}
