//! Synthetic frame series for exercising the reader without DICOM files.

#![allow(dead_code)]

use dicom_series_sort::tag::well_known;
use dicom_series_sort::{DicomSeriesReader, DicomTag, InMemoryTagSource, Record};

pub const AXIAL: &str = "1\\0\\0\\0\\1\\0";
pub const CORONAL: &str = "1\\0\\0\\0\\0\\-1";

pub const CT_IMAGE_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.2";
pub const NM_IMAGE_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.20";
pub const SECONDARY_CAPTURE_IMAGE_STORAGE: &str = "1.2.840.10008.5.1.4.1.1.7";

/// Frames with in-memory attribute values, declared for a given reader.
pub struct SyntheticSeries {
    pub source: InMemoryTagSource,
    pub records: Vec<Record>,
    orientation: String,
    shared: Vec<(DicomTag, String)>,
}

impl SyntheticSeries {
    /// A CT series of 64x64 axial frames with 0.5 mm pixels.
    pub fn new(reader: &DicomSeriesReader) -> Self {
        let mut source = InMemoryTagSource::new();
        source.declare_all(reader.tags_of_interest());
        Self {
            source,
            records: Vec::new(),
            orientation: AXIAL.to_string(),
            shared: vec![
                (well_known::ROWS, "64".to_string()),
                (well_known::COLUMNS, "64".to_string()),
                (well_known::PIXEL_SPACING, "0.5\\0.5".to_string()),
                (well_known::SLICE_THICKNESS, "1".to_string()),
                (well_known::MODALITY, "CT".to_string()),
                (well_known::SOP_CLASS_UID, CT_IMAGE_STORAGE.to_string()),
            ],
        }
    }

    /// Value every frame added afterwards carries.
    pub fn with(mut self, tag: DicomTag, value: &str) -> Self {
        self.shared.retain(|(existing, _)| *existing != tag);
        self.shared.push((tag, value.to_string()));
        self
    }

    pub fn without(mut self, tag: DicomTag) -> Self {
        self.shared.retain(|(existing, _)| *existing != tag);
        self
    }

    /// Orientation of frames added afterwards.
    pub fn set_orientation(&mut self, orientation: &str) {
        self.orientation = orientation.to_string();
    }

    /// Add a frame at `position`.
    pub fn frame(&mut self, name: &str, position: [f64; 3]) -> Record {
        let record = Record::new(name, 0);
        for (tag, value) in &self.shared {
            self.source.set(&record, *tag, value.as_str());
        }
        self.source
            .set(&record, well_known::IMAGE_ORIENTATION_PATIENT, self.orientation.as_str());
        self.source.set(
            &record,
            well_known::IMAGE_POSITION_PATIENT,
            format!("{}\\{}\\{}", position[0], position[1], position[2]),
        );
        self.records.push(record.clone());
        record
    }

    /// Add a frame without any geometry.
    pub fn frame_without_position(&mut self, name: &str) -> Record {
        let record = Record::new(name, 0);
        for (tag, value) in &self.shared {
            self.source.set(&record, *tag, value.as_str());
        }
        self.records.push(record.clone());
        record
    }

    /// Axial frames `{prefix}{i}` at the given z positions.
    pub fn axial_stack(&mut self, prefix: &str, z_positions: &[f64]) -> &mut Self {
        for (index, z) in z_positions.iter().enumerate() {
            self.frame(&format!("{prefix}{index}"), [0.0, 0.0, *z]);
        }
        self
    }

    /// Set a value on one already added frame.
    pub fn set(&mut self, record: &Record, tag: DicomTag, value: &str) {
        self.source.set(record, tag, value);
    }
}

pub fn names(records: &[Record]) -> Vec<String> {
    records.iter().map(|record| record.to_string()).collect()
}
