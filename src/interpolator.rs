use ndarray::{Array3, ArrayView2, Axis};
use rayon::prelude::*;

pub(crate) struct Interpolator;

impl Interpolator {
    /// Resample every slice of `volume` along its row axis so that slice `k`
    /// is read `k * rows_per_slice` rows further down. This undoes the
    /// in-plane drift of a gantry-tilted stack. Samples that fall outside
    /// the source slice become 0.
    pub(crate) fn shear_along_columns(volume: &Array3<u16>, rows_per_slice: f64) -> Array3<u16> {
        let (depth, height, width) = volume.dim();
        let mut corrected = Array3::<u16>::zeros((depth, height, width));
        if height == 0 || width == 0 {
            return corrected;
        }
        let last_row = (height - 1) as f64;

        corrected
            .axis_iter_mut(Axis(0))
            .into_par_iter()
            .enumerate()
            .for_each(|(k, mut slice)| {
                let source = volume.index_axis(Axis(0), k);
                let shift = k as f64 * rows_per_slice;
                for ((row, column), value) in slice.indexed_iter_mut() {
                    let y = row as f64 + shift;
                    if !(0.0..=last_row).contains(&y) {
                        continue;
                    }
                    let sample = Self::bilinear_interpolate(&source, y as f32, column as f32);
                    *value = sample.round().clamp(0.0, f32::from(u16::MAX)) as u16;
                }
            });

        corrected
    }

    #[inline]
    pub(crate) fn bilinear_interpolate(slice: &ArrayView2<u16>, y: f32, x: f32) -> f32 {
        let (height, width) = slice.dim();

        let y0 = (y.floor() as usize).min(height - 1);
        let x0 = (x.floor() as usize).min(width - 1);
        let y1 = (y0 + 1).min(height - 1);
        let x1 = (x0 + 1).min(width - 1);

        let dy = y - y0 as f32;
        let dx = x - x0 as f32;
        let one_minus_dx = 1.0 - dx;
        let one_minus_dy = 1.0 - dy;

        let v00 = f32::from(slice[[y0, x0]]);
        let v01 = f32::from(slice[[y0, x1]]);
        let v10 = f32::from(slice[[y1, x0]]);
        let v11 = f32::from(slice[[y1, x1]]);

        let v0 = v00.mul_add(one_minus_dx, v01 * dx);
        let v1 = v10.mul_add(one_minus_dx, v11 * dx);

        v0.mul_add(one_minus_dy, v1 * dy)
    }
}
