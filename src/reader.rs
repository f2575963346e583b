//! The series reader: runs the sorting pipeline over a set of frames and
//! describes the resulting image blocks.
//!
//! Pipeline, in order:
//! 1. a mandatory [`TagBasedSorter`] splitting frames that can never share a
//!    volume (matrix size, pixel spacing, orientation, slice thickness,
//!    number of frames)
//! 2. the configured stages, each applied to every partition of the
//!    previous stage
//! 3. a mandatory [`EquiDistantBlocksSorter`]
//! 4. a [`BlockCondenser`] hook
//! 5. per block: [`NormalDirectionConsistencySorter`] and an
//!    [`ImageBlockDescriptor`]

use crate::block::{ImageBlockDescriptor, SliceIndexOutOfRange};
use crate::dicom_scanner::DicomTagScanner;
use crate::numeric::CLocaleScope;
use crate::sort_criterion::{CriterionChain, SortCriterion, SortError};
use crate::sorter::{
    DatasetSorter, EquiDistantBlocksSorter, NormalDirectionConsistencySorter, SortedPartition, Sorter,
    TagBasedSorter, TagValueProcessor,
};
use crate::split_reason::SplitReason;
use crate::tag::{DicomTag, TagPath, well_known};
use crate::tag_source::{Record, TagSourceError, TagValueSource};
use crate::volume_loader::{ImageMaterializer, MaterializeError};
use log::{debug, info, trace};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

/// Decimal places kept of Image Orientation (Patient) before comparing it.
pub const DEFAULT_DECIMAL_PLACES_FOR_ORIENTATION: u32 = 5;

#[derive(Debug, Error)]
pub enum ReaderError {
    #[error(transparent)]
    Sort(#[from] SortError),

    #[error(transparent)]
    TagSource(#[from] TagSourceError),

    #[error(transparent)]
    Materialize(#[from] MaterializeError),

    #[error(transparent)]
    SliceIndex(#[from] SliceIndexOutOfRange),

    #[error("output index {index} out of range ({count} outputs)")]
    OutputIndexOutOfRange { index: usize, count: usize },
}

/// Hook run after the equidistant sorter, e.g. to merge blocks of identical
/// geometry into time series.
pub trait BlockCondenser: Send + Sync {
    fn condense(
        &self,
        blocks: Vec<SortedPartition>,
        source: &dyn TagValueSource,
    ) -> Result<Vec<SortedPartition>, SortError>;
}

/// Leaves blocks as they are.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCondensing;

impl BlockCondenser for NoCondensing {
    fn condense(
        &self,
        blocks: Vec<SortedPartition>,
        _source: &dyn TagValueSource,
    ) -> Result<Vec<SortedPartition>, SortError> {
        Ok(blocks)
    }
}

#[derive(Clone)]
pub struct DicomSeriesReader {
    label: String,
    description: String,
    decimal_places_for_orientation: u32,
    fix_tilt_by_shearing: bool,
    sorters: Vec<Sorter>,
    equidistant: EquiDistantBlocksSorter,
    normal_direction: NormalDirectionConsistencySorter,
    condenser: Arc<dyn BlockCondenser>,
    outputs: Vec<ImageBlockDescriptor>,
}

impl Default for DicomSeriesReader {
    fn default() -> Self {
        Self::new()
    }
}

impl DicomSeriesReader {
    /// A reader with only the mandatory stages. Tilted stacks are accepted
    /// and corrected by shearing.
    pub fn new() -> Self {
        let mut equidistant = EquiDistantBlocksSorter::new();
        equidistant.set_accept_tilt(true);
        Self {
            label: String::new(),
            description: String::new(),
            decimal_places_for_orientation: DEFAULT_DECIMAL_PLACES_FOR_ORIENTATION,
            fix_tilt_by_shearing: true,
            sorters: Vec::new(),
            equidistant,
            normal_direction: NormalDirectionConsistencySorter::new(),
            condenser: Arc::new(NoCondensing),
            outputs: Vec::new(),
        }
    }

    /// A reader that splits by series and orders slices by their position
    /// along the normal, then by acquisition and instance number.
    pub fn classic() -> Self {
        let mut reader = Self::new();
        reader.label = "classic".to_string();
        reader.description = "Sort images by series and image position".to_string();
        reader.add_sorting_element(
            TagBasedSorter::new()
                .with_distinguishing_tag(well_known::SERIES_INSTANCE_UID, None)
                .with_sort_criterion(
                    CriterionChain::by(SortCriterion::ByImagePositionPatient)
                        .then(SortCriterion::ByTagValue(well_known::ACQUISITION_NUMBER))
                        .then(SortCriterion::ByTagValue(well_known::INSTANCE_NUMBER)),
                ),
        );
        reader
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn set_label(&mut self, label: impl Into<String>) {
        self.label = label.into();
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn set_description(&mut self, description: impl Into<String>) {
        self.description = description.into();
    }

    /// Append a stage to run between the mandatory ones.
    pub fn add_sorting_element(&mut self, sorter: impl Into<Sorter>) {
        self.sorters.push(sorter.into());
    }

    pub fn sorting_elements(&self) -> &[Sorter] {
        &self.sorters
    }

    /// Apply `change` to the last configured tag based stage. A new stage is
    /// appended if there is none.
    fn with_tag_sorter(&mut self, change: impl FnOnce(&mut TagBasedSorter)) {
        let last = self.sorters.iter_mut().rev().find_map(|sorter| match sorter {
            Sorter::TagBased(sorter) => Some(sorter),
            _ => None,
        });
        match last {
            Some(sorter) => change(sorter),
            None => {
                let mut sorter = TagBasedSorter::new();
                change(&mut sorter);
                self.sorters.push(sorter.into());
            }
        }
    }

    pub fn add_distinguishing_tag(&mut self, tag: DicomTag, processor: Option<TagValueProcessor>) {
        self.with_tag_sorter(|sorter| sorter.add_distinguishing_tag(tag, processor));
    }

    pub fn set_sort_criterion(&mut self, criterion: CriterionChain) {
        self.with_tag_sorter(|sorter| sorter.set_sort_criterion(Some(criterion)));
    }

    pub fn set_strict_sorting(&mut self, strict: bool) {
        self.with_tag_sorter(|sorter| sorter.set_strict_sorting(strict));
    }

    pub fn set_expect_distance_one(&mut self, expect: bool) {
        self.with_tag_sorter(|sorter| sorter.set_expect_distance_one(expect));
    }

    /// Accept regularly tilted stacks as blocks and shear them into
    /// orthogonal volumes when loading.
    pub fn set_fix_tilt_by_shearing(&mut self, fix: bool) {
        self.fix_tilt_by_shearing = fix;
        self.equidistant.set_accept_tilt(fix);
    }

    pub fn fix_tilt_by_shearing(&self) -> bool {
        self.fix_tilt_by_shearing
    }

    pub fn set_accept_two_slices_groups(&mut self, accept: bool) {
        self.equidistant.set_accept_two_slices_groups(accept);
    }

    pub fn accept_two_slices_groups(&self) -> bool {
        self.equidistant.accept_two_slices_groups()
    }

    /// Tolerated origin error: absolute in mm, or relative to the
    /// inter-slice distance.
    pub fn set_tolerated_origin_offset(&mut self, value: f64, is_absolute: bool) {
        if is_absolute {
            self.equidistant.set_tolerated_origin_offset(value);
        } else {
            self.equidistant.set_tolerated_origin_offset_to_adaptive(value);
        }
    }

    pub fn set_tolerated_origin_offset_to_adaptive(&mut self, fraction_of_inter_slice_distance: f64) {
        self.equidistant
            .set_tolerated_origin_offset_to_adaptive(fraction_of_inter_slice_distance);
    }

    pub fn equidistant_sorter(&self) -> &EquiDistantBlocksSorter {
        &self.equidistant
    }

    pub fn set_decimal_places_for_orientation(&mut self, places: u32) {
        self.decimal_places_for_orientation = places;
    }

    pub fn decimal_places_for_orientation(&self) -> u32 {
        self.decimal_places_for_orientation
    }

    pub fn set_condenser(&mut self, condenser: Arc<dyn BlockCondenser>) {
        self.condenser = condenser;
    }

    fn mandatory_sorter(&self) -> TagBasedSorter {
        TagBasedSorter::new()
            .with_distinguishing_tag(well_known::ROWS, None)
            .with_distinguishing_tag(well_known::COLUMNS, None)
            .with_distinguishing_tag(well_known::PIXEL_SPACING, None)
            .with_distinguishing_tag(well_known::IMAGER_PIXEL_SPACING, None)
            .with_distinguishing_tag(
                well_known::IMAGE_ORIENTATION_PATIENT,
                Some(TagValueProcessor::CutDecimalPlaces(
                    self.decimal_places_for_orientation,
                )),
            )
            .with_distinguishing_tag(well_known::SLICE_THICKNESS, None)
            .with_distinguishing_tag(well_known::NUMBER_OF_FRAMES, None)
    }

    /// Every tag path the pipeline and the block descriptors read.
    pub fn tags_of_interest(&self) -> Vec<TagPath> {
        let mut tags: Vec<TagPath> = Vec::new();
        let stage_tags = self
            .mandatory_sorter()
            .tags_of_interest()
            .into_iter()
            .chain(self.sorters.iter().flat_map(Sorter::tags_of_interest))
            .chain(self.equidistant.tags_of_interest())
            .chain(self.normal_direction.tags_of_interest())
            .chain(ImageBlockDescriptor::tags_of_interest());
        for path in stage_tags {
            if !tags.contains(&path) {
                tags.push(path);
            }
        }
        tags
    }

    fn run_stage(
        stage_index: usize,
        stage: &dyn DatasetSorter,
        input: Vec<SortedPartition>,
        source: &dyn TagValueSource,
    ) -> Result<Vec<SortedPartition>, SortError> {
        debug!("Sorting step {stage_index}: {} groups input", input.len());
        let mut output = Vec::new();

        for (group_index, partition) in input.into_iter().enumerate() {
            trace!(
                "Sorting step {stage_index}, group {group_index} ({} frames)",
                partition.records.len()
            );
            for record in &partition.records {
                trace!("  INPUT     : {record}");
            }

            for result in stage.sort(&partition.records, source)? {
                let mut split_reason = result.split_reason;
                if let Some(inherited) = &partition.split_reason {
                    split_reason
                        .get_or_insert_with(SplitReason::new)
                        .extend(inherited);
                }
                output.push(SortedPartition {
                    records: result.records,
                    split_reason,
                    tilt: result.tilt.or(partition.tilt),
                });
            }
        }
        Ok(output)
    }

    /// Sort `records` into image blocks. Previous outputs are discarded.
    pub fn analyze(
        &mut self,
        records: &[Record],
        source: &dyn TagValueSource,
    ) -> Result<&[ImageBlockDescriptor], ReaderError> {
        let _locale = CLocaleScope::enter();
        self.outputs.clear();
        if records.is_empty() {
            debug!("Nothing to analyze");
            return Ok(self.outputs.as_slice());
        }

        let mandatory = Sorter::from(self.mandatory_sorter());
        let equidistant = Sorter::from(self.equidistant.clone());
        let stages = std::iter::once(&mandatory)
            .chain(self.sorters.iter())
            .chain(std::iter::once(&equidistant));

        let mut partitions = vec![SortedPartition::new(records.to_vec())];
        for (stage_index, stage) in stages.enumerate() {
            partitions = Self::run_stage(stage_index, stage, partitions, source)?;
        }

        let blocks = self.condenser.condense(partitions, source)?;

        let mut outputs = Vec::with_capacity(blocks.len());
        for block in blocks {
            if block.records.is_empty() {
                continue;
            }
            let mut ordered = self.normal_direction.sort(&block.records, source)?;
            let (records, tilt) = match ordered.pop() {
                Some(result) if ordered.is_empty() => {
                    // a refined tilt only replaces a tilt found by the block sorters
                    let tilt = block.tilt.map(|tilt| result.tilt.unwrap_or(tilt));
                    (result.records, tilt)
                }
                _ => (block.records, block.tilt),
            };
            outputs.push(ImageBlockDescriptor::describe(
                records,
                block.split_reason,
                tilt,
                source,
            )?);
        }

        info!("Found {} image block(s) in {} frames", outputs.len(), records.len());
        self.outputs = outputs;
        Ok(self.outputs.as_slice())
    }

    /// Scan `paths` for the tags of interest and analyze all their frames.
    /// The scanner is returned so its values remain accessible.
    pub fn analyze_files(&mut self, paths: &[impl AsRef<Path> + Sync]) -> Result<DicomTagScanner, ReaderError> {
        let mut scanner = DicomTagScanner::new(self.tags_of_interest());
        {
            let _locale = CLocaleScope::enter();
            scanner.scan_files(paths);
        }
        let records = scanner.records();
        self.analyze(&records, &scanner)?;
        Ok(scanner)
    }

    pub fn number_of_outputs(&self) -> usize {
        self.outputs.len()
    }

    pub fn outputs(&self) -> &[ImageBlockDescriptor] {
        &self.outputs
    }

    pub fn output(&self, index: usize) -> Result<&ImageBlockDescriptor, ReaderError> {
        self.outputs.get(index).ok_or(ReaderError::OutputIndexOutOfRange {
            index,
            count: self.outputs.len(),
        })
    }

    pub fn output_mut(&mut self, index: usize) -> Result<&mut ImageBlockDescriptor, ReaderError> {
        let count = self.outputs.len();
        self.outputs
            .get_mut(index)
            .ok_or(ReaderError::OutputIndexOutOfRange { index, count })
    }

    /// Decode the pixel data of one block and attach it to its descriptor.
    pub fn load_block(
        &mut self,
        index: usize,
        materializer: &dyn ImageMaterializer,
    ) -> Result<&ImageBlockDescriptor, ReaderError> {
        let _locale = CLocaleScope::enter();
        let fix_tilt = self.fix_tilt_by_shearing;
        let block = self.output_mut(index)?;
        let volume = materializer.load(block.records(), fix_tilt, block.tilt())?;
        debug!("Loaded block {index}: {:?} voxels, spacing {:?}", volume.dim(), volume.spacing);
        block.set_volume(volume);
        Ok(&*block)
    }

    /// Decode every block.
    pub fn load_images(&mut self, materializer: &dyn ImageMaterializer) -> Result<(), ReaderError> {
        for index in 0..self.outputs.len() {
            self.load_block(index, materializer)?;
        }
        Ok(())
    }
}

impl fmt::Debug for DicomSeriesReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DicomSeriesReader")
            .field("label", &self.label)
            .field("decimal_places_for_orientation", &self.decimal_places_for_orientation)
            .field("fix_tilt_by_shearing", &self.fix_tilt_by_shearing)
            .field("sorters", &self.sorters)
            .field("equidistant", &self.equidistant)
            .field("outputs", &self.outputs.len())
            .finish()
    }
}

impl fmt::Display for DicomSeriesReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "DICOM series reader '{}'", self.label)?;
        if !self.description.is_empty() {
            writeln!(f, "  {}", self.description)?;
        }
        writeln!(
            f,
            "  Fix tilt by shearing: {}",
            if self.fix_tilt_by_shearing { "yes" } else { "no" }
        )?;
        writeln!(
            f,
            "  Orientation compared to {} decimal places",
            self.decimal_places_for_orientation
        )?;
        for (index, sorter) in self.sorters.iter().enumerate() {
            writeln!(f, "  Sorting step {}: {sorter}", index + 1)?;
        }
        write!(f, "  {}", self.equidistant)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enums::{ReaderImplementationLevel, SplitReasonKind};
    use crate::sorter::FilenameSorter;
    use crate::sorter::test_support::AXIAL;
    use crate::tag_source::InMemoryTagSource;

    struct Series {
        source: InMemoryTagSource,
        records: Vec<Record>,
    }

    impl Series {
        fn new(reader: &DicomSeriesReader) -> Self {
            let mut source = InMemoryTagSource::new();
            source.declare_all(reader.tags_of_interest());
            Self {
                source,
                records: Vec::new(),
            }
        }

        fn slice(&mut self, name: &str, position: [f64; 3], orientation: &str) -> &mut Self {
            let record = Record::new(name, 0);
            let values = [
                (well_known::ROWS, "4".to_string()),
                (well_known::COLUMNS, "4".to_string()),
                (well_known::PIXEL_SPACING, "0.5\\0.5".to_string()),
                (well_known::IMAGE_ORIENTATION_PATIENT, orientation.to_string()),
                (
                    well_known::IMAGE_POSITION_PATIENT,
                    format!("{}\\{}\\{}", position[0], position[1], position[2]),
                ),
                (well_known::SOP_CLASS_UID, "1.2.840.10008.5.1.4.1.1.2".to_string()),
                (well_known::MODALITY, "CT".to_string()),
            ];
            for (tag, value) in values {
                self.source.set(&record, tag, value);
            }
            self.records.push(record);
            self
        }
    }

    fn sorted_by_position() -> DicomSeriesReader {
        let mut reader = DicomSeriesReader::new();
        reader.set_sort_criterion(CriterionChain::by(SortCriterion::ByImagePositionPatient));
        reader
    }

    fn names(block: &ImageBlockDescriptor) -> Vec<String> {
        block.records().iter().map(|r| r.to_string()).collect()
    }

    #[test]
    fn shuffled_stack_becomes_one_ordered_block() {
        let mut reader = sorted_by_position();
        let mut series = Series::new(&reader);
        for (name, z) in [("c", 4.0), ("a", 0.0), ("d", 6.0), ("b", 2.0)] {
            series.slice(name, [0.0, 0.0, z], AXIAL);
        }

        let outputs = reader.analyze(&series.records, &series.source).unwrap();
        assert_eq!(outputs.len(), 1);
        assert_eq!(names(&outputs[0]), ["a", "b", "c", "d"]);
        assert_eq!(
            outputs[0].reader_implementation_level(),
            ReaderImplementationLevel::Supported
        );
        assert!(!outputs[0].has_gantry_tilt());
    }

    #[test]
    fn different_orientations_never_share_a_block() {
        let mut reader = sorted_by_position();
        let mut series = Series::new(&reader);
        series
            .slice("axial0", [0.0, 0.0, 0.0], AXIAL)
            .slice("axial1", [0.0, 0.0, 1.0], AXIAL)
            .slice("coronal0", [0.0, 0.0, 0.0], "1\\0\\0\\0\\0\\-1")
            .slice("coronal1", [0.0, 1.0, 0.0], "1\\0\\0\\0\\0\\-1");

        let outputs = reader.analyze(&series.records, &series.source).unwrap();
        assert_eq!(outputs.len(), 2);
        for block in outputs {
            let reason = block.split_reason().unwrap();
            assert!(reason.has(SplitReasonKind::ValueMismatch));
        }
    }

    #[test]
    fn gap_is_reported_on_the_later_block() {
        let mut reader = sorted_by_position();
        let mut series = Series::new(&reader);
        for (index, z) in [0.0, 1.0, 2.0, 5.0, 6.0].iter().enumerate() {
            series.slice(&format!("s{index}"), [0.0, 0.0, *z], AXIAL);
        }

        let outputs = reader.analyze(&series.records, &series.source).unwrap();
        assert_eq!(outputs.len(), 2);
        assert!(outputs[0].split_reason().is_none());
        assert!(
            outputs[1]
                .split_reason()
                .unwrap()
                .has(SplitReasonKind::MissingSlices)
        );
    }

    #[test]
    fn descending_stack_is_turned_along_the_normal() {
        let mut reader = DicomSeriesReader::new();
        let mut series = Series::new(&reader);
        series
            .slice("top", [0.0, 0.0, 4.0], AXIAL)
            .slice("middle", [0.0, 0.0, 2.0], AXIAL)
            .slice("bottom", [0.0, 0.0, 0.0], AXIAL);

        let outputs = reader.analyze(&series.records, &series.source).unwrap();
        assert_eq!(outputs.len(), 1);
        assert_eq!(names(&outputs[0]), ["bottom", "middle", "top"]);
    }

    #[test]
    fn tilt_is_kept_only_when_fixing_by_shearing() {
        let mut reader = sorted_by_position();
        let mut series = Series::new(&reader);
        for index in 0..4 {
            let i = index as f64;
            series.slice(&format!("t{index}"), [0.0, -0.5 * i, 2.0 * i], AXIAL);
        }

        let outputs = reader.analyze(&series.records, &series.source).unwrap();
        assert_eq!(outputs.len(), 1);
        assert!(outputs[0].has_gantry_tilt());
        assert_eq!(outputs[0].tilt().unwrap().slices_apart(), 3);

        reader.set_fix_tilt_by_shearing(false);
        let outputs = reader.analyze(&series.records, &series.source).unwrap();
        assert!(outputs.len() > 1);
        assert!(outputs.iter().all(|block| !block.has_gantry_tilt()));
    }

    #[test]
    fn every_frame_lands_in_exactly_one_block() {
        let mut reader = sorted_by_position();
        let mut series = Series::new(&reader);
        for (index, z) in [0.0, 0.0, 1.0, 3.0, 3.5, 4.0, 10.0].iter().enumerate() {
            series.slice(&format!("s{index}"), [0.0, 0.0, *z], AXIAL);
        }
        let lonely = Record::new("no-geometry", 0);
        series.source.add_record(lonely.clone());
        series.records.push(lonely);

        let outputs = reader.analyze(&series.records, &series.source).unwrap();
        let mut seen: Vec<Record> = outputs
            .iter()
            .flat_map(|block| block.records().iter().cloned())
            .collect();
        seen.sort();
        let mut expected = series.records.clone();
        expected.sort();
        assert_eq!(seen, expected);
    }

    #[test]
    fn output_index_is_checked() {
        let mut reader = DicomSeriesReader::new();
        let source = InMemoryTagSource::new();
        assert!(reader.analyze(&[], &source).unwrap().is_empty());
        assert!(matches!(
            reader.output(0),
            Err(ReaderError::OutputIndexOutOfRange { index: 0, count: 0 })
        ));
    }

    #[test]
    fn undeclared_tags_surface_as_errors() {
        let mut reader = sorted_by_position();
        let mut source = InMemoryTagSource::new();
        let record = Record::new("x", 0);
        source.add_record(record.clone());
        let error = reader.analyze(&[record], &source).unwrap_err();
        assert!(matches!(
            error,
            ReaderError::Sort(SortError::TagSource(TagSourceError::UndeclaredTag(_)))
        ));
    }

    #[test]
    fn configuration_reaches_the_tag_stage() {
        let mut reader = DicomSeriesReader::new();
        reader.add_distinguishing_tag(well_known::SERIES_NUMBER, None);
        reader.set_strict_sorting(true);
        reader.set_expect_distance_one(true);
        assert_eq!(reader.sorting_elements().len(), 1);
        let Sorter::TagBased(sorter) = &reader.sorting_elements()[0] else {
            panic!("expected a tag based stage");
        };
        assert!(sorter.strict_sorting());
        assert!(sorter.expect_distance_one());
        assert!(
            reader
                .tags_of_interest()
                .contains(&TagPath::element(well_known::SERIES_NUMBER))
        );
    }

    #[test]
    fn options_go_to_the_last_tag_stage() {
        let mut reader = DicomSeriesReader::new();
        reader.add_sorting_element(TagBasedSorter::new());
        reader.add_sorting_element(TagBasedSorter::new());
        reader.add_sorting_element(FilenameSorter);
        reader.set_strict_sorting(true);

        let stages = reader.sorting_elements();
        assert_eq!(stages.len(), 3);
        assert!(matches!(&stages[0], Sorter::TagBased(sorter) if !sorter.strict_sorting()));
        assert!(matches!(&stages[1], Sorter::TagBased(sorter) if sorter.strict_sorting()));
        assert!(matches!(stages[2], Sorter::Filename(_)));
    }

    #[test]
    fn condenser_sees_equidistant_blocks() {
        struct MergeAll;
        impl BlockCondenser for MergeAll {
            fn condense(
                &self,
                blocks: Vec<SortedPartition>,
                _source: &dyn TagValueSource,
            ) -> Result<Vec<SortedPartition>, SortError> {
                let records = blocks.into_iter().flat_map(|block| block.records).collect();
                Ok(vec![SortedPartition::new(records)])
            }
        }

        let mut reader = sorted_by_position();
        reader.set_condenser(Arc::new(MergeAll));
        let mut series = Series::new(&reader);
        for (index, z) in [0.0, 1.0, 5.0].iter().enumerate() {
            series.slice(&format!("s{index}"), [0.0, 0.0, *z], AXIAL);
        }
        let outputs = reader.analyze(&series.records, &series.source).unwrap();
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].len(), 3);
    }
}
