//! JSON configuration of a [`DicomSeriesReader`].
//!
//! ```json
//! {
//!   "label": "by series",
//!   "fix_tilt_by_shearing": true,
//!   "tolerated_origin_error": 0.5,
//!   "tolerated_origin_error_is_absolute": true,
//!   "sorter": {
//!     "distinguishing": [
//!       { "tag": "(0020,000E)" },
//!       { "tag": "(0020,0037)", "cut_decimal_places": 3 }
//!     ],
//!     "sorting": ["image_position_patient", { "tag": "(0020,0013)" }]
//!   }
//! }
//! ```
//!
//! `sorter` is a shorthand for a reader with a single tag based stage.
//! Readers with more stages list them under `stages`, in the order they run:
//!
//! ```json
//! {
//!   "stages": [
//!     { "kind": "tag_based", "distinguishing": [{ "tag": "(0020,000E)" }] },
//!     { "kind": "filename" },
//!     { "kind": "equi_distant_blocks", "tolerated_origin_error": 0.2 }
//!   ]
//! }
//! ```

use crate::reader::{DEFAULT_DECIMAL_PLACES_FOR_ORIENTATION, DicomSeriesReader};
use crate::sort_criterion::{CriterionChain, SortCriterion};
use crate::sorter::{
    DEFAULT_ADAPTIVE_ORIGIN_TOLERANCE, EquiDistantBlocksSorter, FilenameSorter,
    NormalDirectionConsistencySorter, OriginTolerance, Sorter, TagBasedSorter, TagValueProcessor,
};
use crate::tag::{DicomTag, TagPathParseError};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    InvalidTag(#[from] TagPathParseError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    pub label: String,
    pub description: String,
    pub fix_tilt_by_shearing: bool,
    pub accept_two_slices_groups: bool,
    /// Unset keeps the adaptive default.
    pub tolerated_origin_error: Option<f64>,
    pub tolerated_origin_error_is_absolute: bool,
    pub decimal_places_for_orientation: u32,
    pub sorter: Option<SorterConfig>,
    /// Stages run after `sorter`.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub stages: Vec<StageConfig>,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            label: String::new(),
            description: String::new(),
            fix_tilt_by_shearing: true,
            accept_two_slices_groups: true,
            tolerated_origin_error: None,
            tolerated_origin_error_is_absolute: false,
            decimal_places_for_orientation: DEFAULT_DECIMAL_PLACES_FOR_ORIENTATION,
            sorter: None,
            stages: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SorterConfig {
    pub strict_sorting: bool,
    pub expect_distance_one: bool,
    pub distinguishing: Vec<DistinguishingTagConfig>,
    /// Highest priority first.
    pub sorting: Vec<SortingKeyConfig>,
}

/// One configured stage of a reader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StageConfig {
    TagBased(SorterConfig),
    EquiDistantBlocks(BlocksConfig),
    NormalDirectionConsistency,
    Filename,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlocksConfig {
    pub accept_tilt: bool,
    pub accept_two_slices_groups: bool,
    pub tolerated_origin_error: Option<f64>,
    pub tolerated_origin_error_is_absolute: bool,
}

impl Default for BlocksConfig {
    fn default() -> Self {
        Self {
            accept_tilt: false,
            accept_two_slices_groups: true,
            tolerated_origin_error: None,
            tolerated_origin_error_is_absolute: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistinguishingTagConfig {
    pub tag: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cut_decimal_places: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortingKeyConfig {
    Tag(String),
    ImagePositionPatient,
}

impl ReaderConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let data = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&data)
    }

    pub fn from_json(data: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(data)?)
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        fs::write(path, self.to_json()?).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    /// A reader configured as described.
    pub fn build(&self) -> Result<DicomSeriesReader, ConfigError> {
        let mut reader = DicomSeriesReader::new();
        reader.set_label(self.label.clone());
        reader.set_description(self.description.clone());
        reader.set_fix_tilt_by_shearing(self.fix_tilt_by_shearing);
        reader.set_accept_two_slices_groups(self.accept_two_slices_groups);
        reader.set_decimal_places_for_orientation(self.decimal_places_for_orientation);
        if let Some(tolerance) = self.tolerated_origin_error {
            reader.set_tolerated_origin_offset(tolerance, self.tolerated_origin_error_is_absolute);
        }
        if let Some(sorter) = &self.sorter {
            reader.add_sorting_element(sorter.build()?);
        }
        for stage in &self.stages {
            reader.add_sorting_element(stage.build()?);
        }
        Ok(reader)
    }

    /// Describe the configuration of `reader`.
    pub fn from_reader(reader: &DicomSeriesReader) -> Self {
        let (tolerated_origin_error, tolerated_origin_error_is_absolute) =
            describe_tolerance(reader.equidistant_sorter().tolerated_origin_offset());

        let (sorter, stages) = match reader.sorting_elements() {
            [Sorter::TagBased(sorter)] => (Some(SorterConfig::from_sorter(sorter)), Vec::new()),
            stages => (None, stages.iter().map(StageConfig::from_sorter).collect()),
        };

        Self {
            label: reader.label().to_string(),
            description: reader.description().to_string(),
            fix_tilt_by_shearing: reader.fix_tilt_by_shearing(),
            accept_two_slices_groups: reader.accept_two_slices_groups(),
            tolerated_origin_error,
            tolerated_origin_error_is_absolute,
            decimal_places_for_orientation: reader.decimal_places_for_orientation(),
            sorter,
            stages,
        }
    }
}

/// Unset stands for the adaptive default.
fn describe_tolerance(tolerance: OriginTolerance) -> (Option<f64>, bool) {
    match tolerance {
        OriginTolerance::Adaptive(fraction) if fraction == DEFAULT_ADAPTIVE_ORIGIN_TOLERANCE => (None, false),
        OriginTolerance::Adaptive(fraction) => (Some(fraction), false),
        OriginTolerance::Absolute(millimeters) => (Some(millimeters), true),
    }
}

impl StageConfig {
    fn build(&self) -> Result<Sorter, ConfigError> {
        Ok(match self {
            StageConfig::TagBased(sorter) => Sorter::TagBased(sorter.build()?),
            StageConfig::EquiDistantBlocks(blocks) => {
                let mut sorter = EquiDistantBlocksSorter::new();
                sorter.set_accept_tilt(blocks.accept_tilt);
                sorter.set_accept_two_slices_groups(blocks.accept_two_slices_groups);
                match (blocks.tolerated_origin_error, blocks.tolerated_origin_error_is_absolute) {
                    (Some(millimeters), true) => sorter.set_tolerated_origin_offset(millimeters),
                    (Some(fraction), false) => sorter.set_tolerated_origin_offset_to_adaptive(fraction),
                    (None, _) => {}
                }
                Sorter::EquiDistantBlocks(sorter)
            }
            StageConfig::NormalDirectionConsistency => {
                Sorter::NormalDirectionConsistency(NormalDirectionConsistencySorter::new())
            }
            StageConfig::Filename => Sorter::Filename(FilenameSorter),
        })
    }

    fn from_sorter(sorter: &Sorter) -> Self {
        match sorter {
            Sorter::TagBased(sorter) => StageConfig::TagBased(SorterConfig::from_sorter(sorter)),
            Sorter::EquiDistantBlocks(sorter) => {
                let (tolerated_origin_error, tolerated_origin_error_is_absolute) =
                    describe_tolerance(sorter.tolerated_origin_offset());
                StageConfig::EquiDistantBlocks(BlocksConfig {
                    accept_tilt: sorter.accept_tilt(),
                    accept_two_slices_groups: sorter.accept_two_slices_groups(),
                    tolerated_origin_error,
                    tolerated_origin_error_is_absolute,
                })
            }
            Sorter::NormalDirectionConsistency(_) => StageConfig::NormalDirectionConsistency,
            Sorter::Filename(_) => StageConfig::Filename,
        }
    }
}

impl SorterConfig {
    fn build(&self) -> Result<TagBasedSorter, ConfigError> {
        let mut sorter = TagBasedSorter::new();
        for distinguishing in &self.distinguishing {
            let tag: DicomTag = distinguishing.tag.parse()?;
            let processor = distinguishing
                .cut_decimal_places
                .map(TagValueProcessor::CutDecimalPlaces);
            sorter.add_distinguishing_tag(tag, processor);
        }

        let criteria = self
            .sorting
            .iter()
            .map(|key| match key {
                SortingKeyConfig::Tag(tag) => Ok(SortCriterion::ByTagValue(tag.parse()?)),
                SortingKeyConfig::ImagePositionPatient => Ok(SortCriterion::ByImagePositionPatient),
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;
        if !criteria.is_empty() {
            sorter.set_sort_criterion(Some(CriterionChain::new(criteria)));
        }

        sorter.set_strict_sorting(self.strict_sorting);
        sorter.set_expect_distance_one(self.expect_distance_one);
        Ok(sorter)
    }

    fn from_sorter(sorter: &TagBasedSorter) -> Self {
        let distinguishing = sorter
            .distinguishing_tags()
            .iter()
            .map(|(tag, processor)| DistinguishingTagConfig {
                tag: tag.to_string(),
                cut_decimal_places: processor.map(|TagValueProcessor::CutDecimalPlaces(places)| places),
            })
            .collect();
        let sorting = sorter
            .sort_criterion()
            .map(|chain| {
                chain
                    .criteria()
                    .iter()
                    .map(|criterion| match criterion {
                        SortCriterion::ByTagValue(tag) => SortingKeyConfig::Tag(tag.to_string()),
                        SortCriterion::ByImagePositionPatient => SortingKeyConfig::ImagePositionPatient,
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self {
            strict_sorting: sorter.strict_sorting(),
            expect_distance_one: sorter.expect_distance_one(),
            distinguishing,
            sorting,
        }
    }
}
