//! Sorting stages of the series reader.
//!
//! Every stage takes one ordered partition of frames and returns one or
//! more ordered partitions. The union of the outputs is always exactly the
//! input: stages split and reorder, they never drop or duplicate frames.
//!
//! Stages
//! - [`TagBasedSorter`]: group by distinguishing attributes, sort each group,
//!   optionally re-split groups whose sort distances are irregular.
//! - [`EquiDistantBlocksSorter`]: cut a geometrically ordered partition into
//!   blocks of equally spaced slices, detecting gantry tilt.
//! - [`NormalDirectionConsistencySorter`]: make slice order follow the
//!   slice normal.
//! - [`FilenameSorter`]: order by filename and frame index.

mod equidistant;
mod filename;
mod normal_direction;
mod tag_based;

pub use equidistant::{DEFAULT_ADAPTIVE_ORIGIN_TOLERANCE, EquiDistantBlocksSorter, OriginTolerance};
pub use filename::FilenameSorter;
pub use normal_direction::NormalDirectionConsistencySorter;
pub use tag_based::{DEFAULT_STRICT_DISTANCE_TOLERANCE, TagBasedSorter, TagValueProcessor};

use crate::gantry_tilt::GantryTiltInformation;
use crate::sort_criterion::SortError;
use crate::split_reason::SplitReason;
use crate::tag::TagPath;
use crate::tag_source::{Record, TagValueSource};
use std::fmt;

/// One output partition of a sorting stage.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SortedPartition {
    pub records: Vec<Record>,
    pub split_reason: Option<SplitReason>,
    /// Set by geometric stages when the partition forms a tilted stack.
    pub tilt: Option<GantryTiltInformation>,
}

impl SortedPartition {
    pub fn new(records: Vec<Record>) -> Self {
        Self {
            records,
            split_reason: None,
            tilt: None,
        }
    }

    pub fn with_reason(records: Vec<Record>, split_reason: Option<SplitReason>) -> Self {
        Self {
            records,
            split_reason,
            tilt: None,
        }
    }
}

/// A pipeline stage.
pub trait DatasetSorter {
    /// Attributes the stage reads, so a tag source can pre-fetch them.
    fn tags_of_interest(&self) -> Vec<TagPath>;

    /// Partition and order `records`.
    fn sort(
        &self,
        records: &[Record],
        source: &dyn TagValueSource,
    ) -> Result<Vec<SortedPartition>, SortError>;
}

/// The configurable stages.
#[derive(Debug, Clone, PartialEq)]
pub enum Sorter {
    TagBased(TagBasedSorter),
    EquiDistantBlocks(EquiDistantBlocksSorter),
    NormalDirectionConsistency(NormalDirectionConsistencySorter),
    Filename(FilenameSorter),
}

impl DatasetSorter for Sorter {
    fn tags_of_interest(&self) -> Vec<TagPath> {
        match self {
            Sorter::TagBased(sorter) => sorter.tags_of_interest(),
            Sorter::EquiDistantBlocks(sorter) => sorter.tags_of_interest(),
            Sorter::NormalDirectionConsistency(sorter) => sorter.tags_of_interest(),
            Sorter::Filename(sorter) => sorter.tags_of_interest(),
        }
    }

    fn sort(
        &self,
        records: &[Record],
        source: &dyn TagValueSource,
    ) -> Result<Vec<SortedPartition>, SortError> {
        match self {
            Sorter::TagBased(sorter) => sorter.sort(records, source),
            Sorter::EquiDistantBlocks(sorter) => sorter.sort(records, source),
            Sorter::NormalDirectionConsistency(sorter) => sorter.sort(records, source),
            Sorter::Filename(sorter) => sorter.sort(records, source),
        }
    }
}

impl fmt::Display for Sorter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sorter::TagBased(sorter) => write!(f, "{sorter}"),
            Sorter::EquiDistantBlocks(sorter) => write!(f, "{sorter}"),
            Sorter::NormalDirectionConsistency(_) => f.write_str("Normal direction consistency"),
            Sorter::Filename(_) => f.write_str("Filename"),
        }
    }
}

impl From<TagBasedSorter> for Sorter {
    fn from(sorter: TagBasedSorter) -> Self {
        Sorter::TagBased(sorter)
    }
}

impl From<EquiDistantBlocksSorter> for Sorter {
    fn from(sorter: EquiDistantBlocksSorter) -> Self {
        Sorter::EquiDistantBlocks(sorter)
    }
}

impl From<NormalDirectionConsistencySorter> for Sorter {
    fn from(sorter: NormalDirectionConsistencySorter) -> Self {
        Sorter::NormalDirectionConsistency(sorter)
    }
}

impl From<FilenameSorter> for Sorter {
    fn from(sorter: FilenameSorter) -> Self {
        Sorter::Filename(sorter)
    }
}
