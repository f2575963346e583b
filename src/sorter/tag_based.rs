use super::{DatasetSorter, SortedPartition};
use crate::enums::SplitReasonKind;
use crate::numeric::{NumericFormat, cut_decimal_places};
use crate::sort_criterion::{CriterionChain, OrientationPolicy, SortError, SortKey};
use crate::split_reason::SplitReason;
use crate::tag::{DicomTag, TagPath};
use crate::tag_source::{Record, TagValueSource};
use log::{debug, trace};
use std::collections::HashMap;
use std::fmt;

/// Relative deviation from the expected sort distance that still counts as
/// "equal step" during strict sorting.
pub const DEFAULT_STRICT_DISTANCE_TOLERANCE: f64 = 0.01;

/// Normalizes a distinguishing value before it becomes part of the grouping key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagValueProcessor {
    /// Round every decimal component to the given number of places.
    CutDecimalPlaces(u32),
}

impl TagValueProcessor {
    pub fn process(&self, value: &str, format: NumericFormat) -> String {
        match self {
            TagValueProcessor::CutDecimalPlaces(places) => cut_decimal_places(value, *places, format),
        }
    }
}

/// Groups frames by distinguishing attributes and sorts every group.
///
/// 1. frames with equal (processed) distinguishing values form a group
/// 2. each group is sorted by the criterion chain
/// 3. with strict sorting, groups are re-split where the sort distance
///    between neighbours deviates from the first distance of the group
/// 4. groups are emitted in the order of their first frames
#[derive(Debug, Clone, PartialEq)]
pub struct TagBasedSorter {
    distinguishing: Vec<(DicomTag, Option<TagValueProcessor>)>,
    criterion: Option<CriterionChain>,
    strict_sorting: bool,
    expect_distance_one: bool,
    strict_tolerance: f64,
    format: NumericFormat,
}

impl Default for TagBasedSorter {
    fn default() -> Self {
        Self {
            distinguishing: Vec::new(),
            criterion: None,
            strict_sorting: false,
            expect_distance_one: false,
            strict_tolerance: DEFAULT_STRICT_DISTANCE_TOLERANCE,
            format: NumericFormat::C,
        }
    }
}

struct Group {
    values: Vec<String>,
    records: Vec<Record>,
}

impl TagBasedSorter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_distinguishing_tag(&mut self, tag: DicomTag, processor: Option<TagValueProcessor>) {
        self.distinguishing.push((tag, processor));
    }

    pub fn with_distinguishing_tag(mut self, tag: DicomTag, processor: Option<TagValueProcessor>) -> Self {
        self.add_distinguishing_tag(tag, processor);
        self
    }

    pub fn distinguishing_tags(&self) -> &[(DicomTag, Option<TagValueProcessor>)] {
        &self.distinguishing
    }

    pub fn set_sort_criterion(&mut self, criterion: Option<CriterionChain>) {
        self.criterion = criterion;
    }

    pub fn with_sort_criterion(mut self, criterion: CriterionChain) -> Self {
        self.criterion = Some(criterion);
        self
    }

    pub fn sort_criterion(&self) -> Option<&CriterionChain> {
        self.criterion.as_ref()
    }

    pub fn set_strict_sorting(&mut self, strict: bool) {
        self.strict_sorting = strict;
    }

    pub fn strict_sorting(&self) -> bool {
        self.strict_sorting
    }

    pub fn set_expect_distance_one(&mut self, expect: bool) {
        self.expect_distance_one = expect;
    }

    pub fn expect_distance_one(&self) -> bool {
        self.expect_distance_one
    }

    pub fn set_strict_tolerance(&mut self, relative: f64) {
        self.strict_tolerance = relative;
    }

    pub fn strict_tolerance(&self) -> f64 {
        self.strict_tolerance
    }

    fn distinguishing_values(
        &self,
        record: &Record,
        source: &dyn TagValueSource,
    ) -> Result<Vec<String>, SortError> {
        self.distinguishing
            .iter()
            .map(|(tag, processor)| {
                let raw = source.value_or_empty(record, *tag)?;
                Ok(match processor {
                    Some(processor) => processor.process(&raw, self.format),
                    None => raw,
                })
            })
            .collect()
    }

    fn group(&self, records: &[Record], source: &dyn TagValueSource) -> Result<Vec<Group>, SortError> {
        let mut groups: Vec<Group> = Vec::new();
        let mut index_by_values: HashMap<Vec<String>, usize> = HashMap::new();

        for record in records {
            let values = self.distinguishing_values(record, source)?;
            match index_by_values.get(&values) {
                Some(&index) => groups[index].records.push(record.clone()),
                None => {
                    index_by_values.insert(values.clone(), groups.len());
                    groups.push(Group {
                        values,
                        records: vec![record.clone()],
                    });
                }
            }
        }
        Ok(groups)
    }

    /// Names of the distinguishing tags that are not constant across groups.
    fn differing_tags(&self, groups: &[Group]) -> String {
        self.distinguishing
            .iter()
            .enumerate()
            .filter(|(index, _)| {
                groups
                    .windows(2)
                    .any(|pair| pair[0].values[*index] != pair[1].values[*index])
            })
            .map(|(_, (tag, _))| match tag.name() {
                Some(name) => format!("{tag} {name}"),
                None => tag.to_string(),
            })
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn is_non_unit_integer(distance: f64) -> bool {
        let magnitude = distance.abs();
        magnitude > 1.5 && (magnitude - magnitude.round()).abs() < 1e-6
    }

    /// Cut a sorted group wherever the sort distance deviates from the
    /// expected step. Returns each piece with the reason it was cut off.
    fn split_by_distance(&self, keys: Vec<SortKey>) -> Vec<(Vec<Record>, Option<String>)> {
        let mut pieces = Vec::new();
        let mut current: Vec<Record> = Vec::new();
        let mut current_reason: Option<String> = None;
        let mut expected: Option<f64> = None;
        let mut first_step_seen = false;
        let mut previous: Option<&SortKey> = None;

        for key in &keys {
            if let Some(previous) = previous {
                if let Some(distance) = CriterionChain::key_distance(previous, key) {
                    let cut_reason = match expected {
                        None if !first_step_seen
                            && self.expect_distance_one
                            && Self::is_non_unit_integer(distance) =>
                        {
                            Some(format!(
                                "expected a distance of 1, found {distance} between '{}' and '{}'",
                                previous.record(),
                                key.record()
                            ))
                        }
                        None => {
                            expected = Some(distance);
                            None
                        }
                        Some(step) if (distance - step).abs() > step.abs() * self.strict_tolerance => {
                            Some(format!(
                                "expected a distance of {step}, found {distance} between '{}' and '{}'",
                                previous.record(),
                                key.record()
                            ))
                        }
                        Some(_) => None,
                    };
                    first_step_seen = true;

                    if let Some(reason) = cut_reason {
                        debug!("Strict sorting splits group: {reason}");
                        pieces.push((std::mem::take(&mut current), current_reason.take()));
                        current_reason = Some(reason);
                        expected = None;
                    }
                }
            }
            current.push(key.record().clone());
            previous = Some(key);
        }

        if !current.is_empty() {
            pieces.push((current, current_reason));
        }
        pieces
    }
}

impl DatasetSorter for TagBasedSorter {
    fn tags_of_interest(&self) -> Vec<TagPath> {
        let mut tags: Vec<TagPath> = self
            .distinguishing
            .iter()
            .map(|(tag, _)| TagPath::element(*tag))
            .collect();
        if let Some(criterion) = &self.criterion {
            for path in criterion.tags_of_interest() {
                if !tags.contains(&path) {
                    tags.push(path);
                }
            }
        }
        tags
    }

    fn sort(
        &self,
        records: &[Record],
        source: &dyn TagValueSource,
    ) -> Result<Vec<SortedPartition>, SortError> {
        let groups = self.group(records, source)?;
        debug!(
            "Tag based sorting: {} frames in {} groups",
            records.len(),
            groups.len()
        );

        let mismatch = (groups.len() > 1).then(|| {
            SplitReason::with(SplitReasonKind::ValueMismatch, self.differing_tags(&groups))
        });

        let Some(criterion) = &self.criterion else {
            return Ok(groups
                .into_iter()
                .map(|group| SortedPartition::with_reason(group.records, mismatch.clone()))
                .collect());
        };

        let mut partitions: Vec<(SortKey, SortedPartition)> = Vec::new();
        for group in groups {
            let mut keys = criterion.keys(&group.records, source, OrientationPolicy::Require)?;
            CriterionChain::sort_keys(&mut keys, OrientationPolicy::Require);

            let pieces = if self.strict_sorting {
                self.split_by_distance(keys)
            } else {
                vec![(keys.into_iter().map(SortKey::into_record).collect(), None)]
            };

            for (piece, distance_reason) in pieces {
                let mut reason = mismatch.clone();
                if let Some(details) = distance_reason {
                    reason
                        .get_or_insert_with(SplitReason::new)
                        .add(SplitReasonKind::SortDistanceTooLarge, details);
                }
                let first = criterion.keys(&piece[..1], source, OrientationPolicy::Segregate)?;
                let representative = first.into_iter().next();
                if let Some(representative) = representative {
                    partitions.push((representative, SortedPartition::with_reason(piece, reason)));
                }
            }
        }

        let mut representatives: Vec<SortKey> =
            partitions.iter().map(|(key, _)| key.clone()).collect();
        CriterionChain::sort_keys(&mut representatives, OrientationPolicy::Segregate);

        let mut by_first: HashMap<Record, SortedPartition> = partitions
            .into_iter()
            .map(|(key, partition)| (key.into_record(), partition))
            .collect();

        let output: Vec<SortedPartition> = representatives
            .iter()
            .filter_map(|key| by_first.remove(key.record()))
            .collect();

        for (index, partition) in output.iter().enumerate() {
            for record in &partition.records {
                trace!("  OUTPUT({index}) : {record}");
            }
        }
        Ok(output)
    }
}

impl fmt::Display for TagBasedSorter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Tag based sorting")?;
        for (tag, processor) in &self.distinguishing {
            write!(f, "  Split at {tag}")?;
            if let Some(name) = tag.name() {
                write!(f, " {name}")?;
            }
            match processor {
                Some(TagValueProcessor::CutDecimalPlaces(places)) => {
                    writeln!(f, " (cut to {places} decimal places)")?
                }
                None => writeln!(f)?,
            }
        }
        match &self.criterion {
            Some(criterion) => write!(f, "  Sort by {criterion}")?,
            None => write!(f, "  No sorting")?,
        }
        if self.strict_sorting {
            write!(f, ", strict")?;
        }
        if self.expect_distance_one {
            write!(f, ", expecting distance 1")?;
        }
        Ok(())
    }
}
