//! Geometry of a gantry-tilted (or otherwise sheared) slice stack.
//!
//! Given the origins of two slices and their shared orientation, the offset
//! of the first origin from the line through the second origin along the
//! slice normal tells whether the stack is orthogonal, regularly tilted
//! (offset only along the column direction) or irregularly sheared.

use crate::numeric::{NumericFormat, parse_decimal_array};
use nalgebra::Vector3;

/// In-plane offsets below this (in mm) are considered noise.
pub const SHEAR_EPSILON: f64 = 0.001;

/// Tilt description derived from two slice origins `n` slices apart.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct GantryTiltInformation {
    shift_right: f64,
    shift_up: f64,
    shift_normal: f64,
    naive_spacing: f64,
    slices_apart: u32,
}

impl GantryTiltInformation {
    /// `origin_a` and `origin_b` are the origins of two slices `slices_apart`
    /// slices apart; `right` and `up` are the row and column direction
    /// cosines of the slices.
    pub fn new(
        origin_a: Vector3<f64>,
        origin_b: Vector3<f64>,
        right: Vector3<f64>,
        up: Vector3<f64>,
        slices_apart: u32,
    ) -> Self {
        let right = right.try_normalize(f64::EPSILON).unwrap_or(right);
        let up = up.try_normalize(f64::EPSILON).unwrap_or(up);
        let normal = right.cross(&up);
        let normal = normal.try_normalize(f64::EPSILON).unwrap_or(normal);

        let a_from_b = origin_a - origin_b;
        Self {
            shift_right: a_from_b.dot(&right),
            shift_up: a_from_b.dot(&up),
            shift_normal: a_from_b.dot(&normal).abs(),
            naive_spacing: a_from_b.norm(),
            slices_apart,
        }
    }

    /// Build from raw Image Position (Patient) and Image Orientation
    /// (Patient) strings. Returns `None` if any of them does not parse.
    pub fn from_tag_values(
        origin_a: &str,
        origin_b: &str,
        orientation: &str,
        slices_apart: u32,
        format: NumericFormat,
    ) -> Option<Self> {
        let a = parse_decimal_array::<3>(origin_a, format)?;
        let b = parse_decimal_array::<3>(origin_b, format)?;
        let (right, up) = orientation_vectors(orientation, format)?;
        Some(Self::new(
            Vector3::from(a),
            Vector3::from(b),
            right,
            up,
            slices_apart,
        ))
    }

    /// Offset of the first origin from the normal line, along the row direction.
    pub fn shift_right(&self) -> f64 {
        self.shift_right
    }

    /// Offset of the first origin from the normal line, along the column direction.
    pub fn shift_up(&self) -> f64 {
        self.shift_up
    }

    /// Distance between both origins along the slice normal.
    pub fn shift_normal(&self) -> f64 {
        self.shift_normal
    }

    /// Plain distance between both origins. This is what a consumer that
    /// ignores the tilt would take as slice spacing.
    pub fn naive_spacing(&self) -> f64 {
        self.naive_spacing
    }

    pub fn slices_apart(&self) -> u32 {
        self.slices_apart
    }

    pub fn is_sheared(&self) -> bool {
        self.slices_apart > 0
            && (self.shift_right.abs() > SHEAR_EPSILON || self.shift_up.abs() > SHEAR_EPSILON)
    }

    /// Shear only along the column direction, as produced by a tilted gantry.
    pub fn is_regular_gantry_tilt(&self) -> bool {
        self.slices_apart > 0
            && self.shift_right.abs() <= SHEAR_EPSILON
            && self.shift_up.abs() > SHEAR_EPSILON
    }

    pub fn tilt_angle_radians(&self) -> f64 {
        if self.shift_normal <= f64::EPSILON {
            return 0.0;
        }
        (self.shift_up.abs() / self.shift_normal).atan()
    }

    pub fn tilt_angle_degrees(&self) -> f64 {
        self.tilt_angle_radians().to_degrees()
    }

    /// Shift along the column direction between neighbouring slices, used to
    /// shear the stack back into an orthogonal one.
    pub fn correction_per_slice(&self) -> f64 {
        if self.slices_apart == 0 {
            return 0.0;
        }
        self.shift_up / f64::from(self.slices_apart)
    }

    /// Real distance between neighbouring slices along the normal.
    pub fn inter_slice_distance(&self) -> f64 {
        if self.slices_apart == 0 {
            return 0.0;
        }
        self.shift_normal / f64::from(self.slices_apart)
    }
}

/// Row and column direction cosines from an Image Orientation (Patient) value.
pub fn orientation_vectors(
    orientation: &str,
    format: NumericFormat,
) -> Option<(Vector3<f64>, Vector3<f64>)> {
    let values = parse_decimal_array::<6>(orientation, format)?;
    Some((
        Vector3::new(values[0], values[1], values[2]),
        Vector3::new(values[3], values[4], values[5]),
    ))
}

/// Slice normal (row × column) from an Image Orientation (Patient) value.
pub fn orientation_normal(orientation: &str, format: NumericFormat) -> Option<Vector3<f64>> {
    let (right, up) = orientation_vectors(orientation, format)?;
    Some(right.cross(&up))
}

#[cfg(test)]
mod tests {
    use super::*;

    const AXIAL: &str = "1\\0\\0\\0\\1\\0";

    fn tilt(a: [f64; 3], b: [f64; 3], n: u32) -> GantryTiltInformation {
        GantryTiltInformation::new(
            Vector3::from(a),
            Vector3::from(b),
            Vector3::x(),
            Vector3::y(),
            n,
        )
    }

    #[test]
    fn orthogonal_stack_is_not_sheared() {
        let info = tilt([0.0, 0.0, 0.0], [0.0, 0.0, 5.0], 1);
        assert!(!info.is_sheared());
        assert!(!info.is_regular_gantry_tilt());
        assert!((info.shift_normal() - 5.0).abs() < 1e-12);
        assert!((info.naive_spacing() - 5.0).abs() < 1e-12);
    }

    #[test]
    fn offset_along_column_direction_is_regular_tilt() {
        let d = 0.8;
        let info = tilt([0.0, d, 0.0], [0.0, 0.0, 2.0], 1);
        assert!(info.is_sheared());
        assert!(info.is_regular_gantry_tilt());
        assert!((info.shift_up() - d).abs() < 1e-12);
        assert!(info.shift_right().abs() < 1e-12);
        assert!((info.tilt_angle_radians() - (d / 2.0).atan()).abs() < 1e-12);
    }

    #[test]
    fn offset_along_row_direction_is_irregular_shear() {
        let info = tilt([0.3, 0.8, 0.0], [0.0, 0.0, 2.0], 1);
        assert!(info.is_sheared());
        assert!(!info.is_regular_gantry_tilt());
    }

    #[test]
    fn per_slice_values_divide_by_span() {
        let info = tilt([0.0, 3.0, 0.0], [0.0, 0.0, 12.0], 4);
        assert!((info.correction_per_slice() - 0.75).abs() < 1e-12);
        assert!((info.inter_slice_distance() - 3.0).abs() < 1e-12);
        assert_eq!(info.slices_apart(), 4);
    }

    #[test]
    fn default_describes_no_tilt() {
        let info = GantryTiltInformation::default();
        assert!(!info.is_sheared());
        assert!(!info.is_regular_gantry_tilt());
        assert_eq!(info.correction_per_slice(), 0.0);
    }

    #[test]
    fn parses_from_tag_strings() {
        let info = GantryTiltInformation::from_tag_values(
            "0\\1.5\\0",
            "0\\0\\3",
            AXIAL,
            1,
            NumericFormat::C,
        )
        .unwrap();
        assert!(info.is_regular_gantry_tilt());
        assert!(
            GantryTiltInformation::from_tag_values("0\\0", "0\\0\\3", AXIAL, 1, NumericFormat::C)
                .is_none()
        );
    }
}
