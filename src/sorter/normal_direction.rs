use super::{DatasetSorter, SortedPartition};
use crate::gantry_tilt::{GantryTiltInformation, orientation_normal};
use crate::numeric::{NumericFormat, parse_decimal_array};
use crate::sort_criterion::SortError;
use crate::tag::{TagPath, well_known};
use crate::tag_source::{Record, TagValueSource};
use log::debug;
use nalgebra::Vector3;

/// Makes the slice order of a block follow its slice normal.
///
/// Image decoding stacks slices in the given order, so a block whose origins
/// run against the normal would come out mirrored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NormalDirectionConsistencySorter {
    format: NumericFormat,
}

impl Default for NormalDirectionConsistencySorter {
    fn default() -> Self {
        Self {
            format: NumericFormat::C,
        }
    }
}

impl NormalDirectionConsistencySorter {
    pub fn new() -> Self {
        Self::default()
    }

    fn origin(&self, record: &Record, source: &dyn TagValueSource) -> Result<Option<Vector3<f64>>, SortError> {
        Ok(source
            .value(record, well_known::IMAGE_POSITION_PATIENT)?
            .and_then(|text| parse_decimal_array::<3>(&text, self.format))
            .map(Vector3::from))
    }
}

impl DatasetSorter for NormalDirectionConsistencySorter {
    fn tags_of_interest(&self) -> Vec<TagPath> {
        vec![
            TagPath::element(well_known::IMAGE_POSITION_PATIENT),
            TagPath::element(well_known::IMAGE_ORIENTATION_PATIENT),
        ]
    }

    fn sort(
        &self,
        records: &[Record],
        source: &dyn TagValueSource,
    ) -> Result<Vec<SortedPartition>, SortError> {
        let mut sorted = records.to_vec();
        let (Some(first), Some(last)) = (records.first(), records.last()) else {
            return Ok(vec![SortedPartition::new(sorted)]);
        };
        if records.len() < 2 {
            return Ok(vec![SortedPartition::new(sorted)]);
        }

        let orientation = source.value_or_empty(first, well_known::IMAGE_ORIENTATION_PATIENT)?;
        let normal = orientation_normal(&orientation, self.format);
        let first_origin = self.origin(first, source)?;
        let last_origin = self.origin(last, source)?;

        let (Some(normal), Some(first_origin), Some(last_origin)) = (normal, first_origin, last_origin) else {
            debug!("Cannot determine slice direction of block starting at '{first}', keeping order");
            return Ok(vec![SortedPartition::new(sorted)]);
        };

        if normal.dot(&(last_origin - first_origin)) < 0.0 {
            debug!("Reversing block starting at '{first}' to follow the slice normal");
            sorted.reverse();
        }

        let tilt = match (sorted.first(), sorted.last()) {
            (Some(first), Some(last)) => GantryTiltInformation::from_tag_values(
                &source.value_or_empty(first, well_known::IMAGE_POSITION_PATIENT)?,
                &source.value_or_empty(last, well_known::IMAGE_POSITION_PATIENT)?,
                &orientation,
                (sorted.len() - 1) as u32,
                self.format,
            ),
            _ => None,
        };

        Ok(vec![SortedPartition {
            records: sorted,
            split_reason: None,
            tilt: tilt.filter(GantryTiltInformation::is_sheared),
        }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sorter::test_support::{AXIAL, axial_stack, names, stack};

    #[test]
    fn reverses_blocks_running_against_the_normal() {
        let (source, records) = axial_stack(&[4.0, 2.0, 0.0]);
        let sorter = NormalDirectionConsistencySorter::new();

        let output = sorter.sort(&records, &source).unwrap();
        assert_eq!(output.len(), 1);
        assert_eq!(names(&output[0].records), ["s2", "s1", "s0"]);

        let again = sorter.sort(&output[0].records, &source).unwrap();
        assert_eq!(again[0].records, output[0].records);
    }

    #[test]
    fn keeps_blocks_following_the_normal() {
        let (source, records) = axial_stack(&[0.0, 2.0, 4.0]);
        let output = NormalDirectionConsistencySorter::new()
            .sort(&records, &source)
            .unwrap();
        assert_eq!(output[0].records, records);
        assert!(output[0].tilt.is_none());
    }

    #[test]
    fn recomputes_tilt_from_new_endpoints() {
        let positions = [[0.0, -1.0, 4.0], [0.0, -0.5, 2.0], [0.0, 0.0, 0.0]];
        let (source, records) = stack(&positions, AXIAL);
        let output = NormalDirectionConsistencySorter::new()
            .sort(&records, &source)
            .unwrap();
        assert_eq!(names(&output[0].records), ["s2", "s1", "s0"]);
        let tilt = output[0].tilt.unwrap();
        assert!(tilt.is_regular_gantry_tilt());
        assert_eq!(tilt.slices_apart(), 2);
        assert!((tilt.shift_up() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn single_frame_is_left_alone() {
        let (source, records) = axial_stack(&[1.0]);
        let output = NormalDirectionConsistencySorter::new()
            .sort(&records, &source)
            .unwrap();
        assert_eq!(output[0].records, records);
    }
}
