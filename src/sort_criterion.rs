//! Ordering of frames within a group.
//!
//! A [`CriterionChain`] is an ordered list of [`SortCriterion`] steps. The
//! first step that can tell two frames apart decides; if none can, frames
//! are ordered by their identity (filename, frame index), so sorting is
//! always total.
//!
//! Attribute values are fetched once per frame into sort keys before
//! sorting, which keeps comparisons infallible and lets orientation
//! mismatches surface as errors before any ordering happens.

use crate::gantry_tilt::orientation_vectors;
use crate::numeric::{NumericFormat, parse_decimal, parse_decimal_array};
use crate::tag::{DicomTag, TagPath, well_known};
use crate::tag_source::{Record, TagSourceError, TagValueSource};
use nalgebra::Vector3;
use std::cmp::Ordering;
use std::fmt;
use thiserror::Error;

/// Per-component tolerance when checking that two orientations are the same.
pub const ORIENTATION_TOLERANCE: f64 = 1e-4;

/// Distances along the normal below this are treated as "same position".
pub const DISTANCE_EPSILON: f64 = 1e-5;

#[derive(Debug, Error)]
pub enum SortError {
    #[error(transparent)]
    TagSource(#[from] TagSourceError),

    #[error(
        "cannot order '{left}' and '{right}' by position: orientations differ, \
         split by Image Orientation (Patient) first"
    )]
    IncompatibleOrientation { left: Record, right: Record },
}

/// One step of a [`CriterionChain`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortCriterion {
    /// Numeric comparison when both values are numbers, lexicographic otherwise.
    ByTagValue(DicomTag),
    /// Signed distance of Image Position (Patient) along the slice normal.
    ByImagePositionPatient,
}

impl SortCriterion {
    pub fn tags_of_interest(&self) -> Vec<DicomTag> {
        match self {
            SortCriterion::ByTagValue(tag) => vec![*tag],
            SortCriterion::ByImagePositionPatient => vec![
                well_known::IMAGE_POSITION_PATIENT,
                well_known::IMAGE_ORIENTATION_PATIENT,
            ],
        }
    }

    fn key(
        &self,
        record: &Record,
        source: &dyn TagValueSource,
        format: NumericFormat,
    ) -> Result<StepKey, TagSourceError> {
        match self {
            SortCriterion::ByTagValue(tag) => {
                let value = source.value(record, *tag)?;
                Ok(StepKey::Value(SortValue::from_tag_value(value, format)))
            }
            SortCriterion::ByImagePositionPatient => {
                let position = source.value(record, well_known::IMAGE_POSITION_PATIENT)?;
                let orientation = source.value(record, well_known::IMAGE_ORIENTATION_PATIENT)?;

                let position = position.and_then(|p| parse_decimal_array::<3>(&p, format));
                let orientation = orientation.and_then(|o| parse_decimal_array::<6>(&o, format));

                let distance = match (position, orientation) {
                    (Some(position), Some(orientation)) => {
                        let right = Vector3::new(orientation[0], orientation[1], orientation[2]);
                        let up = Vector3::new(orientation[3], orientation[4], orientation[5]);
                        let normal = right.cross(&up);
                        SortValue::Number(normal.dot(&Vector3::from(position)))
                    }
                    _ => SortValue::Missing,
                };
                Ok(StepKey::Position {
                    orientation,
                    distance,
                })
            }
        }
    }
}

impl fmt::Display for SortCriterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortCriterion::ByTagValue(tag) => match tag.name() {
                Some(name) => write!(f, "{tag} {name}"),
                None => write!(f, "{tag}"),
            },
            SortCriterion::ByImagePositionPatient => f.write_str("image position along normal"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum SortValue {
    Number(f64),
    Text(String),
    Missing,
}

impl SortValue {
    fn from_tag_value(value: Option<String>, format: NumericFormat) -> Self {
        match value {
            None => SortValue::Missing,
            Some(text) => match parse_decimal(&text, format) {
                Some(number) => SortValue::Number(number),
                None => SortValue::Text(text.trim_end_matches([' ', '\0']).to_string()),
            },
        }
    }

    fn as_number(&self) -> Option<f64> {
        match self {
            SortValue::Number(number) => Some(*number),
            _ => None,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            SortValue::Number(_) => 0,
            SortValue::Text(_) => 1,
            SortValue::Missing => 2,
        }
    }

    // numbers before text before missing values
    fn compare(&self, other: &SortValue) -> Ordering {
        match (self, other) {
            (SortValue::Number(a), SortValue::Number(b)) => a.total_cmp(b),
            (SortValue::Text(a), SortValue::Text(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum StepKey {
    Value(SortValue),
    Position {
        orientation: Option<[f64; 6]>,
        distance: SortValue,
    },
}

fn orientations_match(a: &[f64; 6], b: &[f64; 6]) -> bool {
    a.iter()
        .zip(b)
        .all(|(x, y)| (x - y).abs() <= ORIENTATION_TOLERANCE)
}

fn compare_orientations(a: &Option<[f64; 6]>, b: &Option<[f64; 6]>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a
            .iter()
            .zip(b)
            .map(|(x, y)| x.total_cmp(y))
            .find(|ordering| ordering.is_ne())
            .unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// How position steps treat frames of different orientation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OrientationPolicy {
    /// All frames must share one orientation; a mismatch is an error.
    Require,
    /// Frames are grouped by orientation first, then by distance.
    Segregate,
}

/// Pre-fetched comparison key of one frame.
#[derive(Debug, Clone)]
pub(crate) struct SortKey {
    record: Record,
    steps: Vec<StepKey>,
}

impl SortKey {
    fn compare(&self, other: &SortKey, policy: OrientationPolicy) -> Ordering {
        for (mine, theirs) in self.steps.iter().zip(&other.steps) {
            let ordering = match (mine, theirs) {
                (StepKey::Value(a), StepKey::Value(b)) => a.compare(b),
                (
                    StepKey::Position {
                        orientation: oa,
                        distance: a,
                    },
                    StepKey::Position {
                        orientation: ob,
                        distance: b,
                    },
                ) => match policy {
                    OrientationPolicy::Require => a.compare(b),
                    OrientationPolicy::Segregate => {
                        let same = matches!((oa, ob), (Some(x), Some(y)) if orientations_match(x, y));
                        if same {
                            a.compare(b)
                        } else {
                            compare_orientations(oa, ob).then_with(|| a.compare(b))
                        }
                    }
                },
                _ => Ordering::Equal,
            };
            if ordering.is_ne() {
                return ordering;
            }
        }
        self.record.cmp(&other.record)
    }
}

/// Ordered list of criteria with identity order as terminal fallback.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CriterionChain {
    criteria: Vec<SortCriterion>,
    format: NumericFormat,
}

impl CriterionChain {
    pub fn new(criteria: Vec<SortCriterion>) -> Self {
        Self {
            criteria,
            format: NumericFormat::C,
        }
    }

    /// Chain with a single criterion.
    pub fn by(criterion: SortCriterion) -> Self {
        Self::new(vec![criterion])
    }

    /// Append a criterion consulted when all previous ones tie.
    pub fn then(mut self, criterion: SortCriterion) -> Self {
        self.criteria.push(criterion);
        self
    }

    pub fn with_format(mut self, format: NumericFormat) -> Self {
        self.format = format;
        self
    }

    pub fn criteria(&self) -> &[SortCriterion] {
        &self.criteria
    }

    pub fn is_empty(&self) -> bool {
        self.criteria.is_empty()
    }

    /// Tags read by all criteria of the chain, without duplicates.
    pub fn tags_of_interest(&self) -> Vec<TagPath> {
        let mut tags: Vec<TagPath> = Vec::new();
        for tag in self.criteria.iter().flat_map(SortCriterion::tags_of_interest) {
            let path = TagPath::element(tag);
            if !tags.contains(&path) {
                tags.push(path);
            }
        }
        tags
    }

    fn key(&self, record: &Record, source: &dyn TagValueSource) -> Result<SortKey, SortError> {
        let steps = self
            .criteria
            .iter()
            .map(|criterion| criterion.key(record, source, self.format))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(SortKey {
            record: record.clone(),
            steps,
        })
    }

    pub(crate) fn keys(
        &self,
        records: &[Record],
        source: &dyn TagValueSource,
        policy: OrientationPolicy,
    ) -> Result<Vec<SortKey>, SortError> {
        let keys = records
            .iter()
            .map(|record| self.key(record, source))
            .collect::<Result<Vec<_>, _>>()?;
        if policy == OrientationPolicy::Require {
            Self::ensure_common_orientation(&keys)?;
        }
        Ok(keys)
    }

    fn ensure_common_orientation(keys: &[SortKey]) -> Result<(), SortError> {
        let Some(step_count) = keys.first().map(|key| key.steps.len()) else {
            return Ok(());
        };
        for step in 0..step_count {
            let mut reference: Option<(&Record, &[f64; 6])> = None;
            for key in keys {
                let StepKey::Position {
                    orientation: Some(orientation),
                    ..
                } = &key.steps[step]
                else {
                    continue;
                };
                match reference {
                    None => reference = Some((&key.record, orientation)),
                    Some((first, expected)) => {
                        if !orientations_match(expected, orientation) {
                            return Err(SortError::IncompatibleOrientation {
                                left: first.clone(),
                                right: key.record.clone(),
                            });
                        }
                    }
                }
            }
        }
        Ok(())
    }

    pub(crate) fn sort_keys(keys: &mut [SortKey], policy: OrientationPolicy) {
        keys.sort_by(|a, b| a.compare(b, policy));
    }

    /// Sort `records` in place. Fails if a position criterion is asked to
    /// order frames of different orientation.
    pub fn sort(&self, records: &mut Vec<Record>, source: &dyn TagValueSource) -> Result<(), SortError> {
        let mut keys = self.keys(records, source, OrientationPolicy::Require)?;
        Self::sort_keys(&mut keys, OrientationPolicy::Require);
        *records = keys.into_iter().map(|key| key.record).collect();
        Ok(())
    }

    /// Strict weak "before" relation used for sorting.
    pub fn is_left_before_right(
        &self,
        left: &Record,
        right: &Record,
        source: &dyn TagValueSource,
    ) -> Result<bool, SortError> {
        let keys = self.keys(
            &[left.clone(), right.clone()],
            source,
            OrientationPolicy::Require,
        )?;
        Ok(keys[0].compare(&keys[1], OrientationPolicy::Require) == Ordering::Less)
    }

    /// Signed distance from `from` to `to` along the first criterion able to
    /// express one. `None` when no criterion can.
    pub fn numeric_distance(
        &self,
        from: &Record,
        to: &Record,
        source: &dyn TagValueSource,
    ) -> Result<Option<f64>, SortError> {
        let keys = self.keys(
            &[from.clone(), to.clone()],
            source,
            OrientationPolicy::Require,
        )?;
        Ok(Self::key_distance(&keys[0], &keys[1]))
    }

    pub(crate) fn key_distance(from: &SortKey, to: &SortKey) -> Option<f64> {
        for (a, b) in from.steps.iter().zip(&to.steps) {
            match (a, b) {
                (StepKey::Value(a), StepKey::Value(b)) => {
                    if let (Some(a), Some(b)) = (a.as_number(), b.as_number()) {
                        return Some(b - a);
                    }
                }
                (
                    StepKey::Position { distance: a, .. },
                    StepKey::Position { distance: b, .. },
                ) => {
                    if let (Some(a), Some(b)) = (a.as_number(), b.as_number()) {
                        let distance = b - a;
                        if distance.abs() > DISTANCE_EPSILON {
                            return Some(distance);
                        }
                    }
                }
                _ => {}
            }
        }
        None
    }
}

impl SortKey {
    pub(crate) fn record(&self) -> &Record {
        &self.record
    }

    pub(crate) fn into_record(self) -> Record {
        self.record
    }
}

impl fmt::Display for CriterionChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.criteria.is_empty() {
            return f.write_str("(identity order)");
        }
        for (index, criterion) in self.criteria.iter().enumerate() {
            if index > 0 {
                f.write_str(", then ")?;
            }
            write!(f, "{criterion}")?;
        }
        Ok(())
    }
}

/// Whether two Image Orientation (Patient) values describe the same plane
/// orientation within [`ORIENTATION_TOLERANCE`].
pub fn same_orientation(a: &str, b: &str, format: NumericFormat) -> bool {
    match (orientation_vectors(a, format), orientation_vectors(b, format)) {
        (Some((ra, ua)), Some((rb, ub))) => {
            (ra - rb).amax() <= ORIENTATION_TOLERANCE && (ua - ub).amax() <= ORIENTATION_TOLERANCE
        }
        _ => false,
    }
}
