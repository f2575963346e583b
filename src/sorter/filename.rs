use super::{DatasetSorter, SortedPartition};
use crate::sort_criterion::SortError;
use crate::tag::TagPath;
use crate::tag_source::{Record, TagValueSource};

/// Orders frames by filename, then frame index. Never splits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FilenameSorter;

impl DatasetSorter for FilenameSorter {
    fn tags_of_interest(&self) -> Vec<TagPath> {
        Vec::new()
    }

    fn sort(
        &self,
        records: &[Record],
        _source: &dyn TagValueSource,
    ) -> Result<Vec<SortedPartition>, SortError> {
        let mut sorted = records.to_vec();
        sorted.sort();
        Ok(vec![SortedPartition::new(sorted)])
    }
}
