//! Description of one output block of the series reader.

use crate::enums::{PixelSpacingInterpretation, ReaderImplementationLevel};
use crate::gantry_tilt::GantryTiltInformation;
use crate::numeric::{NumericFormat, parse_decimal, parse_decimal_array};
use crate::split_reason::SplitReason;
use crate::tag::{DicomTag, TagPath, well_known};
use crate::tag_source::{Record, TagSourceError, TagValueSource};
use crate::volume::Volume;
use log::debug;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

const CT_IMAGE_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.2";
const MR_IMAGE_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.4";
const PET_IMAGE_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.128";
const CR_IMAGE_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.1";
const DX_IMAGE_STORAGE_FOR_PRESENTATION: &str = "1.2.840.10008.5.1.4.1.1.1.1";
const DX_IMAGE_STORAGE_FOR_PROCESSING: &str = "1.2.840.10008.5.1.4.1.1.1.1.1";
const NM_IMAGE_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.20";
const SECONDARY_CAPTURE_IMAGE_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.7";

/// Decoding confidence for a SOP Class UID.
pub fn reader_implementation_level(sop_class_uid: &str) -> ReaderImplementationLevel {
    match sop_class_uid.trim_matches(|c: char| c.is_whitespace() || c == '\0') {
        "" => ReaderImplementationLevel::Unknown,
        CT_IMAGE_STORAGE
        | MR_IMAGE_STORAGE
        | PET_IMAGE_STORAGE
        | CR_IMAGE_STORAGE
        | DX_IMAGE_STORAGE_FOR_PRESENTATION
        | DX_IMAGE_STORAGE_FOR_PROCESSING => ReaderImplementationLevel::Supported,
        NM_IMAGE_STORAGE => ReaderImplementationLevel::PartlySupported,
        SECONDARY_CAPTURE_IMAGE_STORAGE => ReaderImplementationLevel::Implemented,
        _ => ReaderImplementationLevel::Unsupported,
    }
}

/// Human-readable name of a SOP Class UID, falling back to the UID itself.
pub fn sop_class_name(sop_class_uid: &str) -> &str {
    match sop_class_uid.trim_matches(|c: char| c.is_whitespace() || c == '\0') {
        CT_IMAGE_STORAGE => "CT Image Storage",
        MR_IMAGE_STORAGE => "MR Image Storage",
        PET_IMAGE_STORAGE => "Positron Emission Tomography Image Storage",
        CR_IMAGE_STORAGE => "Computed Radiography Image Storage",
        DX_IMAGE_STORAGE_FOR_PRESENTATION => "Digital X-Ray Image Storage - For Presentation",
        DX_IMAGE_STORAGE_FOR_PROCESSING => "Digital X-Ray Image Storage - For Processing",
        NM_IMAGE_STORAGE => "Nuclear Medicine Image Storage",
        SECONDARY_CAPTURE_IMAGE_STORAGE => "Secondary Capture Image Storage",
        other => other,
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("slice index {index} out of range ({len} slices)")]
pub struct SliceIndexOutOfRange {
    pub index: usize,
    pub len: usize,
}

/// Value of an attribute at the first and the last frame of a block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValueRange {
    pub first: String,
    pub last: String,
}

impl ValueRange {
    pub fn is_empty(&self) -> bool {
        self.first.is_empty() && self.last.is_empty()
    }
}

impl fmt::Display for ValueRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.first == self.last {
            write!(f, "{}", self.first)
        } else {
            write!(f, "{} - {}", self.first, self.last)
        }
    }
}

/// Attributes describing a block, captured when the block is formed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BlockProperties {
    pub series_number: String,
    pub study_description: String,
    pub series_description: String,
    pub modality: String,
    pub sequence_name: String,
    pub orientation: String,
    pub rows: Option<u32>,
    pub columns: Option<u32>,
    pub slice_location: ValueRange,
    pub acquisition_number: ValueRange,
    pub instance_number: ValueRange,
    pub image_position: ValueRange,
    pub window_center: String,
    pub window_width: String,
    pub image_type: String,
    pub photometric_interpretation: String,
    pub pixel_spacing: String,
    pub imager_pixel_spacing: String,
    pub sop_class_uid: String,
    pub slice_locations: Vec<String>,
    pub instance_numbers: Vec<String>,
    pub sop_instance_uids: Vec<String>,
    pub filenames: Vec<PathBuf>,
}

/// One output block: the ordered frames that form one volume, why they were
/// split from their neighbours, and what is known about them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImageBlockDescriptor {
    records: Vec<Record>,
    split_reason: Option<SplitReason>,
    tilt: Option<GantryTiltInformation>,
    reader_level: ReaderImplementationLevel,
    properties: BlockProperties,
    slice_loaded: Vec<bool>,
    volume: Option<Volume>,
    format: NumericFormat,
}

impl ImageBlockDescriptor {
    /// Attributes read by [`ImageBlockDescriptor::describe`].
    pub fn tags_of_interest() -> Vec<TagPath> {
        [
            well_known::SERIES_NUMBER,
            well_known::STUDY_DESCRIPTION,
            well_known::SERIES_DESCRIPTION,
            well_known::MODALITY,
            well_known::SEQUENCE_NAME,
            well_known::IMAGE_ORIENTATION_PATIENT,
            well_known::IMAGE_POSITION_PATIENT,
            well_known::ROWS,
            well_known::COLUMNS,
            well_known::SLICE_LOCATION,
            well_known::ACQUISITION_NUMBER,
            well_known::INSTANCE_NUMBER,
            well_known::WINDOW_CENTER,
            well_known::WINDOW_WIDTH,
            well_known::IMAGE_TYPE,
            well_known::PHOTOMETRIC_INTERPRETATION,
            well_known::PIXEL_SPACING,
            well_known::IMAGER_PIXEL_SPACING,
            well_known::SOP_CLASS_UID,
            well_known::SOP_INSTANCE_UID,
        ]
        .into_iter()
        .map(TagPath::element)
        .collect()
    }

    /// Build the descriptor of an ordered block, reading its describing
    /// attributes from `source`.
    pub fn describe(
        records: Vec<Record>,
        split_reason: Option<SplitReason>,
        tilt: Option<GantryTiltInformation>,
        source: &dyn TagValueSource,
    ) -> Result<Self, TagSourceError> {
        let properties = Self::read_properties(&records, source)?;
        let reader_level = reader_implementation_level(&properties.sop_class_uid);
        debug!(
            "Block of {} frames, {} ({reader_level})",
            records.len(),
            sop_class_name(&properties.sop_class_uid)
        );
        Ok(Self {
            slice_loaded: vec![false; records.len()],
            records,
            split_reason,
            tilt,
            reader_level,
            properties,
            volume: None,
            format: NumericFormat::C,
        })
    }

    fn read_properties(
        records: &[Record],
        source: &dyn TagValueSource,
    ) -> Result<BlockProperties, TagSourceError> {
        let (Some(first), Some(last)) = (records.first(), records.last()) else {
            return Ok(BlockProperties::default());
        };
        let single = |tag: DicomTag| source.value_or_empty(first, tag);
        let range = |tag: DicomTag| -> Result<ValueRange, TagSourceError> {
            Ok(ValueRange {
                first: source.value_or_empty(first, tag)?,
                last: source.value_or_empty(last, tag)?,
            })
        };
        let per_slice = |tag: DicomTag| -> Result<Vec<String>, TagSourceError> {
            records
                .iter()
                .map(|record| source.value_or_empty(record, tag))
                .collect()
        };
        let count = |tag: DicomTag| -> Result<Option<u32>, TagSourceError> {
            Ok(single(tag)?.trim().parse().ok())
        };

        Ok(BlockProperties {
            series_number: single(well_known::SERIES_NUMBER)?,
            study_description: single(well_known::STUDY_DESCRIPTION)?,
            series_description: single(well_known::SERIES_DESCRIPTION)?,
            modality: single(well_known::MODALITY)?,
            sequence_name: single(well_known::SEQUENCE_NAME)?,
            orientation: single(well_known::IMAGE_ORIENTATION_PATIENT)?,
            rows: count(well_known::ROWS)?,
            columns: count(well_known::COLUMNS)?,
            slice_location: range(well_known::SLICE_LOCATION)?,
            acquisition_number: range(well_known::ACQUISITION_NUMBER)?,
            instance_number: range(well_known::INSTANCE_NUMBER)?,
            image_position: range(well_known::IMAGE_POSITION_PATIENT)?,
            window_center: single(well_known::WINDOW_CENTER)?,
            window_width: single(well_known::WINDOW_WIDTH)?,
            image_type: single(well_known::IMAGE_TYPE)?,
            photometric_interpretation: single(well_known::PHOTOMETRIC_INTERPRETATION)?,
            pixel_spacing: single(well_known::PIXEL_SPACING)?,
            imager_pixel_spacing: single(well_known::IMAGER_PIXEL_SPACING)?,
            sop_class_uid: single(well_known::SOP_CLASS_UID)?,
            slice_locations: per_slice(well_known::SLICE_LOCATION)?,
            instance_numbers: per_slice(well_known::INSTANCE_NUMBER)?,
            sop_instance_uids: per_slice(well_known::SOP_INSTANCE_UID)?,
            filenames: records.iter().map(Record::to_path_buf).collect(),
        })
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn split_reason(&self) -> Option<&SplitReason> {
        self.split_reason.as_ref()
    }

    pub fn tilt(&self) -> Option<&GantryTiltInformation> {
        self.tilt.as_ref()
    }

    pub fn has_gantry_tilt(&self) -> bool {
        self.tilt.is_some_and(|tilt| tilt.is_regular_gantry_tilt())
    }

    pub fn reader_implementation_level(&self) -> ReaderImplementationLevel {
        self.reader_level
    }

    pub fn properties(&self) -> &BlockProperties {
        &self.properties
    }

    pub fn sop_class_uid(&self) -> &str {
        &self.properties.sop_class_uid
    }

    pub fn sop_class_name(&self) -> &str {
        sop_class_name(&self.properties.sop_class_uid)
    }

    /// Whether Pixel Spacing describes the patient or the detector plane.
    pub fn pixel_spacing_interpretation(&self) -> PixelSpacingInterpretation {
        let pixel_spacing = self.properties.pixel_spacing.trim();
        let imager_pixel_spacing = self.properties.imager_pixel_spacing.trim();

        match (pixel_spacing.is_empty(), imager_pixel_spacing.is_empty()) {
            (true, true) => PixelSpacingInterpretation::Unknown,
            (true, false) => PixelSpacingInterpretation::AtDetector,
            (false, true) => PixelSpacingInterpretation::InPatient,
            // equal values: the detector spacing was not corrected for magnification
            (false, false) if pixel_spacing == imager_pixel_spacing => {
                PixelSpacingInterpretation::AtDetector
            }
            (false, false) => PixelSpacingInterpretation::InPatient,
        }
    }

    /// In-plane spacing (x, y) to use for the image: Pixel Spacing, else
    /// Imager Pixel Spacing, else 1.0.
    pub fn desired_pixel_spacing(&self) -> (f64, f64) {
        let parse = |value: &str| {
            parse_decimal_array::<2>(value, self.format)
                .filter(|[row, column]| *row > 0.0 && *column > 0.0)
                .map(|[row, column]| (column, row))
        };
        parse(&self.properties.pixel_spacing)
            .or_else(|| parse(&self.properties.imager_pixel_spacing))
            .unwrap_or((1.0, 1.0))
    }

    /// First slice location as a number, if present.
    pub fn first_slice_location(&self) -> Option<f64> {
        parse_decimal(&self.properties.slice_location.first, self.format)
    }

    pub fn set_slice_loaded(&mut self, index: usize, loaded: bool) -> Result<(), SliceIndexOutOfRange> {
        let len = self.slice_loaded.len();
        let flag = self
            .slice_loaded
            .get_mut(index)
            .ok_or(SliceIndexOutOfRange { index, len })?;
        *flag = loaded;
        Ok(())
    }

    pub fn is_slice_loaded(&self, index: usize) -> Result<bool, SliceIndexOutOfRange> {
        self.slice_loaded
            .get(index)
            .copied()
            .ok_or(SliceIndexOutOfRange {
                index,
                len: self.slice_loaded.len(),
            })
    }

    pub fn all_slices_loaded(&self) -> bool {
        self.slice_loaded.iter().all(|loaded| *loaded)
    }

    pub fn volume(&self) -> Option<&Volume> {
        self.volume.as_ref()
    }

    pub fn take_volume(&mut self) -> Option<Volume> {
        self.volume.take()
    }

    /// Attach decoded voxels. The in-plane spacing is replaced by
    /// [`ImageBlockDescriptor::desired_pixel_spacing`] and every slice is
    /// marked loaded.
    pub fn set_volume(&mut self, mut volume: Volume) {
        let (x, y) = self.desired_pixel_spacing();
        volume.spacing.0 = x;
        volume.spacing.1 = y;
        self.slice_loaded.iter_mut().for_each(|loaded| *loaded = true);
        self.volume = Some(volume);
    }

    /// Multi-line description, optionally listing every frame.
    pub fn print(&self, f: &mut impl fmt::Write, with_files: bool) -> fmt::Result {
        let properties = &self.properties;
        writeln!(f, "  Number of Frames: '{}'", self.records.len())?;
        writeln!(f, "  SOP class: '{}'", self.sop_class_name())?;
        writeln!(f, "  Reader implementation level: '{}'", self.reader_level)?;

        let mut single = |label: &str, value: &str| -> fmt::Result {
            if !value.is_empty() {
                writeln!(f, "  {label}: '{value}'")?;
            }
            Ok(())
        };
        single("Series Number", &properties.series_number)?;
        single("Study Description", &properties.study_description)?;
        single("Series Description", &properties.series_description)?;
        single("Modality", &properties.modality)?;
        single("Sequence Name", &properties.sequence_name)?;
        single("Slice Location", &properties.slice_location.to_string())?;
        single("Acquisition Number", &properties.acquisition_number.to_string())?;
        single("Instance Number", &properties.instance_number.to_string())?;
        single("Image Position", &properties.image_position.to_string())?;
        single("Image Orientation", &properties.orientation)?;

        writeln!(
            f,
            "  Pixel spacing interpretation: '{}'",
            self.pixel_spacing_interpretation()
        )?;
        writeln!(
            f,
            "  Gantry Tilt: '{}'",
            if self.has_gantry_tilt() { "yes" } else { "no" }
        )?;
        if let Some(reason) = &self.split_reason {
            writeln!(f, "  Split reason: '{reason}'")?;
        }

        if with_files {
            writeln!(f, "  Files in this image block:")?;
            for record in &self.records {
                writeln!(f, "    {record}")?;
            }
        }
        Ok(())
    }
}

impl fmt::Display for ImageBlockDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.print(f, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enums::SplitReasonKind;
    use crate::tag_source::InMemoryTagSource;

    fn block(values: &[(DicomTag, &str)], frames: usize) -> ImageBlockDescriptor {
        let mut source = InMemoryTagSource::new();
        source.declare_all(ImageBlockDescriptor::tags_of_interest());
        let records: Vec<Record> = (0..frames).map(|i| Record::new(format!("f{i}.dcm"), 0)).collect();
        for (index, record) in records.iter().enumerate() {
            source.add_record(record.clone());
            for (tag, value) in values {
                source.set(record, *tag, *value);
            }
            source.set(record, well_known::INSTANCE_NUMBER, (index + 1).to_string());
        }
        ImageBlockDescriptor::describe(records, None, None, &source).unwrap()
    }

    #[test]
    fn classifies_sop_classes() {
        assert_eq!(
            reader_implementation_level(CT_IMAGE_STORAGE),
            ReaderImplementationLevel::Supported
        );
        assert_eq!(
            reader_implementation_level("1.2.840.10008.5.1.4.1.1.20\0"),
            ReaderImplementationLevel::PartlySupported
        );
        assert_eq!(
            reader_implementation_level(SECONDARY_CAPTURE_IMAGE_STORAGE),
            ReaderImplementationLevel::Implemented
        );
        assert_eq!(reader_implementation_level(""), ReaderImplementationLevel::Unknown);
        assert_eq!(
            reader_implementation_level("1.2.840.10008.5.1.4.1.1.481.1"),
            ReaderImplementationLevel::Unsupported
        );
    }

    #[test]
    fn captures_first_and_last_values() {
        let descriptor = block(
            &[
                (well_known::MODALITY, "CT"),
                (well_known::ROWS, "512"),
                (well_known::SOP_CLASS_UID, CT_IMAGE_STORAGE),
            ],
            3,
        );
        let properties = descriptor.properties();
        assert_eq!(properties.modality, "CT");
        assert_eq!(properties.rows, Some(512));
        assert_eq!(properties.columns, None);
        assert_eq!(properties.instance_number.to_string(), "1 - 3");
        assert_eq!(properties.instance_numbers, ["1", "2", "3"]);
        assert_eq!(
            descriptor.reader_implementation_level(),
            ReaderImplementationLevel::Supported
        );
    }

    #[test]
    fn interprets_pixel_spacing() {
        let neither = block(&[], 1);
        assert_eq!(neither.pixel_spacing_interpretation(), PixelSpacingInterpretation::Unknown);
        assert_eq!(neither.desired_pixel_spacing(), (1.0, 1.0));

        let detector = block(&[(well_known::IMAGER_PIXEL_SPACING, "0.2\\0.3")], 1);
        assert_eq!(
            detector.pixel_spacing_interpretation(),
            PixelSpacingInterpretation::AtDetector
        );
        assert_eq!(detector.desired_pixel_spacing(), (0.3, 0.2));

        let patient = block(
            &[
                (well_known::PIXEL_SPACING, "0.5\\0.5"),
                (well_known::IMAGER_PIXEL_SPACING, "0.6\\0.6"),
            ],
            1,
        );
        assert_eq!(
            patient.pixel_spacing_interpretation(),
            PixelSpacingInterpretation::InPatient
        );
        assert_eq!(patient.desired_pixel_spacing(), (0.5, 0.5));

        let uncorrected = block(
            &[
                (well_known::PIXEL_SPACING, "0.6\\0.6"),
                (well_known::IMAGER_PIXEL_SPACING, "0.6\\0.6"),
            ],
            1,
        );
        assert_eq!(
            uncorrected.pixel_spacing_interpretation(),
            PixelSpacingInterpretation::AtDetector
        );
    }

    #[test]
    fn slice_flags_reject_bad_indices() {
        let mut descriptor = block(&[], 2);
        assert!(!descriptor.all_slices_loaded());
        descriptor.set_slice_loaded(1, true).unwrap();
        assert_eq!(descriptor.is_slice_loaded(1), Ok(true));
        assert_eq!(
            descriptor.set_slice_loaded(2, true),
            Err(SliceIndexOutOfRange { index: 2, len: 2 })
        );
        assert!(descriptor.is_slice_loaded(5).is_err());
    }

    #[test]
    fn print_lists_files_on_request() {
        let mut descriptor = block(&[(well_known::MODALITY, "MR")], 2);
        descriptor.split_reason = Some(SplitReason::with(SplitReasonKind::Overlap, "x"));

        let short = descriptor.to_string();
        assert!(short.contains("Modality: 'MR'"));
        assert!(short.contains("Split reason"));
        assert!(!short.contains("f1.dcm"));

        let mut long = String::new();
        descriptor.print(&mut long, true).unwrap();
        assert!(long.contains("    f1.dcm"));
    }
}
