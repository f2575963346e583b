use crate::enums::Orientation;

use image::{GrayImage, ImageBuffer};
use ndarray::{Array3, ArrayView2, Axis};
use rayon::prelude::*;

/// Decoded pixel data of one image block.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Volume {
    /// Voxels indexed as (slice, row, column).
    pub data: Array3<u16>,
    /// Voxel spacing (x, y, z) in mm: between columns, between rows and
    /// between slices along the slice normal.
    pub spacing: (f64, f64, f64),
    /// Slices were resampled to undo a gantry tilt.
    pub tilt_corrected: bool,
}

impl Volume {
    pub fn new(data: Array3<u16>, spacing: (f64, f64, f64)) -> Self {
        Self {
            data,
            spacing,
            tilt_corrected: false,
        }
    }

    /// (slices, rows, columns)
    pub fn dim(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    fn axis(orientation: Orientation) -> Axis {
        match orientation {
            Orientation::Axial => Axis(0),
            Orientation::Coronal => Axis(1),
            Orientation::Sagittal => Axis(2),
        }
    }

    /// Number of planes along `orientation`.
    pub fn extent(&self, orientation: Orientation) -> usize {
        self.data.len_of(Self::axis(orientation))
    }

    /// Size of the volume in mm (x, y, z).
    pub fn physical_size(&self) -> (f64, f64, f64) {
        let (slices, rows, columns) = self.dim();
        (
            columns as f64 * self.spacing.0,
            rows as f64 * self.spacing.1,
            slices as f64 * self.spacing.2,
        )
    }

    /// Plane `index` along `orientation`, `None` past the end.
    pub fn slice(&self, orientation: Orientation, index: usize) -> Option<ArrayView2<'_, u16>> {
        (index < self.extent(orientation))
            .then(|| self.data.index_axis(Self::axis(orientation), index))
    }

    /// 8-bit rendering of one plane, stretched to the plane's value range.
    pub fn preview(&self, orientation: Orientation, index: usize) -> Option<GrayImage> {
        let plane = self.slice(orientation, index)?;
        let (height, width) = plane.dim();
        let (low, high) = plane
            .iter()
            .fold((u16::MAX, u16::MIN), |(low, high), &v| (low.min(v), high.max(v)));
        let window = f32::from(high.saturating_sub(low)).max(1.0);

        let pixels: Vec<u8> = plane
            .into_par_iter()
            .map(|&v| (f32::from(v.saturating_sub(low)) * 255.0 / window).clamp(0.0, 255.0) as u8)
            .collect();
        ImageBuffer::from_raw(width as u32, height as u32, pixels)
    }

    /// [`Volume::preview`] of the middle plane along `orientation`.
    pub fn center_preview(&self, orientation: Orientation) -> Option<GrayImage> {
        self.preview(orientation, self.extent(orientation) / 2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp() -> Volume {
        let mut data = Array3::<u16>::zeros((2, 3, 4));
        for ((k, row, column), value) in data.indexed_iter_mut() {
            *value = (k * 100 + row * 10 + column) as u16;
        }
        Volume::new(data, (0.5, 0.5, 2.0))
    }

    #[test]
    fn planes_along_every_orientation() {
        let volume = ramp();
        assert_eq!(volume.dim(), (2, 3, 4));
        assert_eq!(volume.slice(Orientation::Axial, 1).unwrap().dim(), (3, 4));
        assert_eq!(volume.slice(Orientation::Coronal, 2).unwrap().dim(), (2, 4));
        assert_eq!(volume.slice(Orientation::Sagittal, 3).unwrap().dim(), (2, 3));
        assert_eq!(volume.slice(Orientation::Sagittal, 3).unwrap()[[1, 2]], 123);
        assert!(volume.slice(Orientation::Axial, 2).is_none());
        assert_eq!(volume.physical_size(), (2.0, 1.5, 4.0));
    }

    #[test]
    fn preview_spans_full_grey_range() {
        let volume = ramp();
        let image = volume.preview(Orientation::Axial, 0).unwrap();
        assert_eq!(image.dimensions(), (4, 3));
        assert_eq!(image.get_pixel(0, 0).0[0], 0);
        assert_eq!(image.get_pixel(3, 2).0[0], 255);

        let flat = Volume::new(Array3::from_elem((1, 2, 2), 7), (1.0, 1.0, 1.0));
        let image = flat.center_preview(Orientation::Axial).unwrap();
        assert!(image.pixels().all(|pixel| pixel.0[0] == 0));
        assert!(Volume::default().center_preview(Orientation::Axial).is_none());
    }
}
