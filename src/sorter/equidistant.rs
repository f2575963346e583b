use super::{DatasetSorter, SortedPartition};
use crate::enums::SplitReasonKind;
use crate::gantry_tilt::{GantryTiltInformation, orientation_vectors};
use crate::numeric::{NumericFormat, parse_decimal_array};
use crate::sort_criterion::SortError;
use crate::split_reason::SplitReason;
use crate::tag::{TagPath, well_known};
use crate::tag_source::{Record, TagValueSource};
use log::{debug, trace};
use nalgebra::Vector3;
use std::fmt;

/// Default tolerated origin error, as a fraction of the inter-slice distance.
pub const DEFAULT_ADAPTIVE_ORIGIN_TOLERANCE: f64 = 0.3;

/// How far a slice origin may lie from its expected position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OriginTolerance {
    /// Fraction of the distance between the first two slices.
    Adaptive(f64),
    /// Fixed distance in mm.
    Absolute(f64),
}

impl Default for OriginTolerance {
    fn default() -> Self {
        OriginTolerance::Adaptive(DEFAULT_ADAPTIVE_ORIGIN_TOLERANCE)
    }
}

/// Cuts a partition that is already ordered along the slice normal into
/// blocks of equally spaced slices.
///
/// Each pass walks the remaining frames and keeps those that continue the
/// arithmetic progression established by the first two distinct origins.
/// Everything else is set aside and analyzed by the next pass, so each pass
/// yields exactly one block.
#[derive(Debug, Clone, PartialEq)]
pub struct EquiDistantBlocksSorter {
    accept_tilt: bool,
    accept_two_slices_groups: bool,
    tolerance: OriginTolerance,
    format: NumericFormat,
}

impl Default for EquiDistantBlocksSorter {
    fn default() -> Self {
        Self {
            accept_tilt: false,
            accept_two_slices_groups: true,
            tolerance: OriginTolerance::default(),
            format: NumericFormat::C,
        }
    }
}

#[derive(Debug, Default)]
struct SliceGroupingResult {
    sorted: Vec<Record>,
    unsorted: Vec<Record>,
    tilt: Option<GantryTiltInformation>,
    reason: SplitReason,
}

struct AcceptedSlice<'a> {
    record: &'a Record,
    origin: Vector3<f64>,
}

impl EquiDistantBlocksSorter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept a regular gantry tilt as a valid block geometry.
    pub fn set_accept_tilt(&mut self, accept: bool) {
        self.accept_tilt = accept;
    }

    pub fn accept_tilt(&self) -> bool {
        self.accept_tilt
    }

    /// Keep tilted blocks that consist of two slices only. Two slices cannot
    /// confirm a tilt, so without this the second one is split off again.
    pub fn set_accept_two_slices_groups(&mut self, accept: bool) {
        self.accept_two_slices_groups = accept;
    }

    pub fn accept_two_slices_groups(&self) -> bool {
        self.accept_two_slices_groups
    }

    pub fn set_tolerated_origin_offset_to_adaptive(&mut self, fraction_of_inter_slice_distance: f64) {
        self.tolerance = OriginTolerance::Adaptive(fraction_of_inter_slice_distance);
    }

    pub fn set_tolerated_origin_offset(&mut self, millimeters: f64) {
        self.tolerance = OriginTolerance::Absolute(millimeters);
    }

    pub fn tolerated_origin_offset(&self) -> OriginTolerance {
        self.tolerance
    }

    fn tolerated_error(&self, step: &Vector3<f64>) -> f64 {
        match self.tolerance {
            OriginTolerance::Absolute(millimeters) => millimeters,
            OriginTolerance::Adaptive(fraction) => step.norm() * fraction,
        }
    }

    fn position_of(
        &self,
        record: &Record,
        source: &dyn TagValueSource,
    ) -> Result<Option<(String, Vector3<f64>)>, SortError> {
        let Some(text) = source.value(record, well_known::IMAGE_POSITION_PATIENT)? else {
            return Ok(None);
        };
        let text = text.trim().to_string();
        Ok(parse_decimal_array::<3>(&text, self.format).map(|origin| (text, Vector3::from(origin))))
    }

    fn orientation_of(
        &self,
        record: &Record,
        source: &dyn TagValueSource,
    ) -> Result<Option<(Vector3<f64>, Vector3<f64>)>, SortError> {
        Ok(source
            .value(record, well_known::IMAGE_ORIENTATION_PATIENT)?
            .and_then(|text| orientation_vectors(&text, self.format)))
    }

    /// Reason for rejecting an origin that is off its expected position:
    /// "missing slices" if it lies on the progression further ahead.
    fn off_pattern_reason(
        last: &AcceptedSlice<'_>,
        step: &Vector3<f64>,
        origin: &Vector3<f64>,
        tolerated: f64,
    ) -> (SplitReasonKind, String) {
        let step_squared = step.norm_squared();
        if step_squared > 0.0 {
            let slots = ((origin - last.origin).dot(step) / step_squared).round();
            if slots >= 2.0 && (last.origin + step * slots - origin).norm() <= tolerated {
                return (
                    SplitReasonKind::MissingSlices,
                    format!("{} slice(s) missing after '{}'", slots - 1.0, last.record),
                );
            }
        }
        (
            SplitReasonKind::DistanceInconsistency,
            format!(
                "origin off by more than {tolerated:.3} mm from expected position after '{}'",
                last.record
            ),
        )
    }

    /// One pass: the longest equally spaced run starting at the first frame.
    fn analyze(
        &self,
        records: &[Record],
        source: &dyn TagValueSource,
    ) -> Result<SliceGroupingResult, SortError> {
        let mut result = SliceGroupingResult::default();
        let mut step: Option<Vector3<f64>> = None;
        let mut last_accepted: Option<AcceptedSlice<'_>> = None;
        let mut previous_position: Option<String> = None;

        for (index, record) in records.iter().enumerate() {
            let Some((position, origin)) = self.position_of(record, source)? else {
                // frames without position never join a geometric block
                if result.sorted.is_empty() {
                    result.sorted.push(record.clone());
                    result.unsorted.extend_from_slice(&records[index + 1..]);
                    if index + 1 < records.len() {
                        result.reason.add(
                            SplitReasonKind::MissingPosition,
                            format!("'{record}' has no image position"),
                        );
                    }
                    return Ok(result);
                }
                trace!("  '{record}' has no image position, set aside");
                result.unsorted.push(record.clone());
                result.reason.add(
                    SplitReasonKind::MissingPosition,
                    format!("'{record}' has no image position"),
                );
                continue;
            };

            let fits = if previous_position.as_deref() == Some(position.as_str()) {
                trace!("  '{record}' repeats the previous position, set aside");
                result.reason.add(
                    SplitReasonKind::Overlap,
                    format!("'{record}' shares position {position} with its predecessor"),
                );
                false
            } else {
                match (&last_accepted, step) {
                    (None, _) => true,
                    (Some(last), None) => {
                        let candidate = origin - last.origin;
                        let tilt = self.orientation_of(record, source)?.map(|(right, up)| {
                            GantryTiltInformation::new(last.origin, origin, right, up, 1)
                        });

                        let fits = match tilt {
                            Some(tilt) if tilt.is_sheared() => {
                                if self.accept_tilt && tilt.is_regular_gantry_tilt() {
                                    debug!(
                                        "Block starting at '{}' is tilted by {:.3} degrees",
                                        last.record,
                                        tilt.tilt_angle_degrees()
                                    );
                                    result.tilt = Some(tilt);
                                    true
                                } else {
                                    debug!(
                                        "'{record}' is sheared against '{}' (right {:.4}, up {:.4}), set aside",
                                        last.record,
                                        tilt.shift_right(),
                                        tilt.shift_up()
                                    );
                                    result.reason.add(
                                        SplitReasonKind::GantryTiltDifference,
                                        format!("'{record}' is sheared against '{}'", last.record),
                                    );
                                    false
                                }
                            }
                            _ => true,
                        };
                        if fits {
                            step = Some(candidate);
                        }
                        fits
                    }
                    (Some(last), Some(step)) => {
                        let expected = last.origin + step;
                        let error = (expected - origin).norm();
                        let tolerated = self.tolerated_error(&step);
                        if error > tolerated {
                            let (kind, details) =
                                Self::off_pattern_reason(last, &step, &origin, tolerated);
                            trace!("  '{record}' does not fit ({kind}), set aside");
                            result.reason.add(kind, details);
                            false
                        } else {
                            true
                        }
                    }
                }
            };

            if fits {
                result.sorted.push(record.clone());
                last_accepted = Some(AcceptedSlice { record, origin });
            } else {
                result.unsorted.push(record.clone());
            }
            previous_position = Some(position);
        }

        Ok(result)
    }

    /// Tilt recomputed from the first and last slice of a confirmed block.
    fn block_tilt(
        &self,
        block: &[Record],
        source: &dyn TagValueSource,
    ) -> Result<Option<GantryTiltInformation>, SortError> {
        let (Some(first), Some(last)) = (block.first(), block.last()) else {
            return Ok(None);
        };
        let first_position = source.value_or_empty(first, well_known::IMAGE_POSITION_PATIENT)?;
        let last_position = source.value_or_empty(last, well_known::IMAGE_POSITION_PATIENT)?;
        let orientation = source.value_or_empty(first, well_known::IMAGE_ORIENTATION_PATIENT)?;
        Ok(GantryTiltInformation::from_tag_values(
            &first_position,
            &last_position,
            &orientation,
            (block.len() - 1) as u32,
            self.format,
        ))
    }
}

impl DatasetSorter for EquiDistantBlocksSorter {
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
        let mut output = Vec::new();
        let mut remaining = records.to_vec();
        let mut inherited = SplitReason::new();

        while !remaining.is_empty() {
            let mut result = self.analyze(&remaining, source)?;

            if result.sorted.is_empty() {
                // cannot happen: the first frame of a pass is always taken
                result.sorted = std::mem::take(&mut result.unsorted);
            }

            if result.tilt.is_some() && result.sorted.len() == 2 && !self.accept_two_slices_groups {
                debug!("Only two slices support the tilt hypothesis, splitting them");
                if let Some(second) = result.sorted.pop() {
                    result.unsorted.insert(0, second);
                }
                result.tilt = None;
                result.reason.add(
                    SplitReasonKind::GantryTiltDifference,
                    "two slices alone cannot confirm a gantry tilt",
                );
            }

            if result.tilt.is_some() && result.sorted.len() > 1 {
                result.tilt = self.block_tilt(&result.sorted, source)?.or(result.tilt);
            }

            debug!(
                "Equidistant block of {} frames, {} set aside{}",
                result.sorted.len(),
                result.unsorted.len(),
                if result.tilt.is_some() { ", tilted" } else { "" }
            );

            output.push(SortedPartition {
                records: result.sorted,
                split_reason: (!inherited.is_empty()).then(|| inherited.clone()),
                tilt: result.tilt,
            });
            inherited = result.reason;
            remaining = result.unsorted;
        }

        Ok(output)
    }
}

impl fmt::Display for EquiDistantBlocksSorter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Equidistant blocks")?;
        match self.tolerance {
            OriginTolerance::Adaptive(fraction) => {
                write!(f, ", origin tolerance {fraction} x inter-slice distance")?
            }
            OriginTolerance::Absolute(millimeters) => write!(f, ", origin tolerance {millimeters} mm")?,
        }
        if self.accept_tilt {
            write!(f, ", accepting gantry tilt")?;
        }
        if !self.accept_two_slices_groups {
            write!(f, ", rejecting two-slice tilt groups")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sorter::test_support::{AXIAL, axial_stack, names, stack};

    fn tilt_accepting() -> EquiDistantBlocksSorter {
        let mut sorter = EquiDistantBlocksSorter::new();
        sorter.set_accept_tilt(true);
        sorter
    }

    #[test]
    fn regular_stack_is_one_block() {
        let (source, records) = axial_stack(&[0.0, 2.5, 5.0, 7.5]);
        let output = EquiDistantBlocksSorter::new().sort(&records, &source).unwrap();
        assert_eq!(output.len(), 1);
        assert_eq!(output[0].records, records);
        assert!(output[0].tilt.is_none());
        assert!(output[0].split_reason.is_none());
    }

    #[test]
    fn gap_splits_and_is_reported_as_missing_slices() {
        let (source, records) = axial_stack(&[0.0, 1.0, 2.0, 4.0, 5.0]);
        let output = EquiDistantBlocksSorter::new().sort(&records, &source).unwrap();
        assert_eq!(output.len(), 2);
        assert_eq!(names(&output[0].records), ["s0", "s1", "s2"]);
        assert_eq!(names(&output[1].records), ["s3", "s4"]);
        let reason = output[1].split_reason.as_ref().unwrap();
        assert!(reason.has(SplitReasonKind::MissingSlices));
    }

    #[test]
    fn irregular_offset_is_a_distance_inconsistency() {
        let (source, records) = axial_stack(&[0.0, 1.0, 2.0, 3.5]);
        let output = EquiDistantBlocksSorter::new().sort(&records, &source).unwrap();
        assert_eq!(output.len(), 2);
        let reason = output[1].split_reason.as_ref().unwrap();
        assert!(reason.has(SplitReasonKind::DistanceInconsistency));
    }

    #[test]
    fn adaptive_tolerance_accepts_small_jitter() {
        let (source, records) = axial_stack(&[0.0, 2.0, 4.5, 6.0]);
        let output = EquiDistantBlocksSorter::new().sort(&records, &source).unwrap();
        assert_eq!(output.len(), 1);

        let mut strict = EquiDistantBlocksSorter::new();
        strict.set_tolerated_origin_offset(0.1);
        let output = strict.sort(&records, &source).unwrap();
        assert_eq!(output.len(), 2);
        assert_eq!(names(&output[0].records), ["s0", "s1"]);
        assert_eq!(names(&output[1].records), ["s2", "s3"]);
    }

    #[test]
    fn repeated_positions_become_separate_time_steps() {
        let (source, records) = axial_stack(&[0.0, 0.0, 1.0, 1.0, 2.0, 2.0]);
        let output = EquiDistantBlocksSorter::new().sort(&records, &source).unwrap();
        assert_eq!(output.len(), 2);
        assert_eq!(names(&output[0].records), ["s0", "s2", "s4"]);
        assert_eq!(names(&output[1].records), ["s1", "s3", "s5"]);
        assert!(
            output[1]
                .split_reason
                .as_ref()
                .unwrap()
                .has(SplitReasonKind::Overlap)
        );
    }

    #[test]
    fn frame_without_position_stays_alone() {
        let (mut source, mut records) = axial_stack(&[0.0, 1.0]);
        let lonely = Record::new("lonely", 0);
        source.add_record(lonely.clone());
        records.insert(0, lonely.clone());

        let output = EquiDistantBlocksSorter::new().sort(&records, &source).unwrap();
        assert_eq!(output.len(), 2);
        assert_eq!(output[0].records, vec![lonely]);
        assert_eq!(names(&output[1].records), ["s0", "s1"]);
        assert!(
            output[1]
                .split_reason
                .as_ref()
                .unwrap()
                .has(SplitReasonKind::MissingPosition)
        );
    }

    #[test]
    fn frame_without_position_is_set_aside_alone() {
        let (mut source, mut records) = axial_stack(&[0.0, 1.0, 2.0, 3.0]);
        let lonely = Record::new("lonely", 0);
        source.add_record(lonely.clone());
        records.insert(2, lonely.clone());

        let output = EquiDistantBlocksSorter::new().sort(&records, &source).unwrap();
        let all: Vec<Vec<String>> = output.iter().map(|p| names(&p.records)).collect();
        assert_eq!(all, vec![vec!["s0", "s1", "s2", "s3"], vec!["lonely"]]);
        assert!(
            output[1]
                .split_reason
                .as_ref()
                .unwrap()
                .has(SplitReasonKind::MissingPosition)
        );
    }

    fn tilted(count: usize, shift_up_per_slice: f64) -> Vec<[f64; 3]> {
        (0..count)
            .map(|i| [0.0, -(i as f64) * shift_up_per_slice, i as f64 * 2.0])
            .collect()
    }

    #[test]
    fn tilted_stack_is_accepted_when_asked() {
        let (source, records) = stack(&tilted(5, 0.5), AXIAL);

        let output = tilt_accepting().sort(&records, &source).unwrap();
        assert_eq!(output.len(), 1);
        let tilt = output[0].tilt.unwrap();
        assert!(tilt.is_regular_gantry_tilt());
        assert_eq!(tilt.slices_apart(), 4);
        assert!((tilt.shift_up() - 2.0).abs() < 1e-9);
        assert!((tilt.correction_per_slice() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn tilted_stack_is_split_when_tilt_not_accepted() {
        let (source, records) = stack(&tilted(3, 0.5), AXIAL);
        let output = EquiDistantBlocksSorter::new().sort(&records, &source).unwrap();
        assert!(output.len() > 1);
        assert!(output.iter().all(|p| p.tilt.is_none()));
        assert!(
            output[1]
                .split_reason
                .as_ref()
                .unwrap()
                .has(SplitReasonKind::GantryTiltDifference)
        );
    }

    #[test]
    fn irregular_shear_is_never_accepted() {
        let positions: Vec<[f64; 3]> = (0..3)
            .map(|i| [i as f64 * 0.5, i as f64 * 0.5, i as f64 * 2.0])
            .collect();
        let (source, records) = stack(&positions, AXIAL);
        let output = tilt_accepting().sort(&records, &source).unwrap();
        assert_eq!(output.len(), 3);
        assert!(output.iter().all(|p| p.tilt.is_none()));
    }

    #[test]
    fn two_slice_tilt_is_undone_unless_accepted() {
        let (source, records) = stack(&tilted(2, 0.5), AXIAL);

        let mut sorter = tilt_accepting();
        sorter.set_accept_two_slices_groups(false);
        let output = sorter.sort(&records, &source).unwrap();
        assert_eq!(output.len(), 2);
        assert_eq!(output[0].records, vec![records[0].clone()]);
        assert_eq!(output[1].records, vec![records[1].clone()]);
        assert!(output.iter().all(|p| p.tilt.is_none()));

        sorter.set_accept_two_slices_groups(true);
        let output = sorter.sort(&records, &source).unwrap();
        assert_eq!(output.len(), 1);
        assert!(output[0].tilt.is_some());
    }

    #[test]
    fn confirmed_block_is_stable_under_resorting() {
        let (source, records) = stack(&tilted(6, 0.25), AXIAL);
        let sorter = tilt_accepting();
        let first = sorter.sort(&records, &source).unwrap();
        assert_eq!(first.len(), 1);
        let second = sorter.sort(&first[0].records, &source).unwrap();
        assert_eq!(second, first);
    }
}
