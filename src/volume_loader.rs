//! Decoding of sorted image blocks into volumes.

use crate::dicom_scanner::FunctionalGroups;
use crate::gantry_tilt::GantryTiltInformation;
use crate::interpolator::Interpolator;
use crate::numeric::{NumericFormat, parse_decimal, parse_decimal_array};
use crate::tag_source::Record;
use crate::volume::Volume;

use dicom::{
    object::{FileDicomObject, InMemDicomObject, open_file},
    pixeldata::{ConvertOptions, PixelDecoder, VoiLutOption},
};
use dicom_dictionary_std::tags;
use log::{debug, warn};
use nalgebra::Vector3;
use ndarray::{Array3, s};
use rayon::prelude::*;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MaterializeError {
    #[error("Image block contains no frames")]
    EmptyBlock,

    #[error("Inconsistent image dimensions: '{record}' is {found:?}, expected {expected:?}")]
    InconsistentDimensions {
        record: Record,
        expected: (usize, usize),
        found: (usize, usize),
    },

    #[error("Time step {index} has dimensions {found:?}, expected {expected:?}")]
    InconsistentTimeSteps {
        index: usize,
        expected: (usize, usize, usize),
        found: (usize, usize, usize),
    },

    #[error("Frame {frame} requested from '{}' which has {available} frame(s)", path.display())]
    FrameOutOfRange {
        path: PathBuf,
        frame: u32,
        available: usize,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("DICOM error: {0}")]
    Dicom(#[from] dicom::object::ReadError),

    #[error("Pixel data error: {0}")]
    PixelData(#[from] dicom::pixeldata::Error),
}

/// Turns an ordered list of frames into voxel data.
pub trait ImageMaterializer {
    /// Load the frames in the given order as one volume. With
    /// `correct_tilt` and a regular gantry tilt, slices are sheared back
    /// into an orthogonal stack.
    fn load(
        &self,
        records: &[Record],
        correct_tilt: bool,
        tilt: Option<&GantryTiltInformation>,
    ) -> Result<Volume, MaterializeError>;

    /// Load one volume per time step. All steps must share dimensions.
    fn load_3dt(
        &self,
        time_steps: &[Vec<Record>],
        correct_tilt: bool,
        tilt: Option<&GantryTiltInformation>,
    ) -> Result<Vec<Volume>, MaterializeError> {
        let volumes = time_steps
            .iter()
            .map(|records| self.load(records, correct_tilt, tilt))
            .collect::<Result<Vec<_>, _>>()?;

        if let Some(first) = volumes.first() {
            let expected = first.dim();
            if let Some((index, volume)) = volumes
                .iter()
                .enumerate()
                .find(|(_, volume)| volume.dim() != expected)
            {
                return Err(MaterializeError::InconsistentTimeSteps {
                    index,
                    expected,
                    found: volume.dim(),
                });
            }
        }
        Ok(volumes)
    }
}

/// Geometry attributes read alongside the pixel data.
#[derive(Debug, Clone, Default, PartialEq)]
struct SliceGeometry {
    /// (row spacing, column spacing)
    pixel_spacing: Option<(f64, f64)>,
    position: Option<Vector3<f64>>,
    /// Origins of the frames of an enhanced multi-frame object.
    frame_positions: Vec<Option<Vector3<f64>>>,
    slice_thickness: Option<f64>,
}

impl SliceGeometry {
    fn position_of(&self, frame: u32) -> Option<Vector3<f64>> {
        self.frame_positions
            .get(frame as usize)
            .copied()
            .flatten()
            .or(self.position)
    }
}

struct DecodedFile {
    /// (frame, row, column)
    frames: Array3<u16>,
    geometry: SliceGeometry,
}

/// Reads pixel data with dicom-rs. Files are decoded in parallel, each file
/// once even if several of its frames are requested.
#[derive(Debug, Clone, Copy, Default)]
pub struct DicomVolumeMaterializer {
    format: NumericFormat,
}

impl DicomVolumeMaterializer {
    pub fn new() -> Self {
        Self::default()
    }

    fn text(dicom_object: &FileDicomObject<InMemDicomObject>, tag: dicom::core::Tag) -> Option<String> {
        dicom_object
            .element(tag)
            .ok()?
            .to_str()
            .ok()
            .map(|value| value.into_owned())
    }

    fn read_geometry(&self, dicom_object: &FileDicomObject<InMemDicomObject>) -> SliceGeometry {
        let groups = FunctionalGroups::of(dicom_object);
        // top level attributes first, the first frame's functional groups after
        let value = |sequence, tag| {
            Self::text(dicom_object, tag).or_else(|| groups.frame_value(0, sequence, tag))
        };
        let spacing = |tag| {
            value(tags::PIXEL_MEASURES_SEQUENCE, tag)
                .and_then(|value| parse_decimal_array::<2>(&value, self.format))
                .map(|[row, column]| (row, column))
        };
        let position = |value: String| parse_decimal_array::<3>(&value, self.format).map(Vector3::from);

        SliceGeometry {
            pixel_spacing: spacing(tags::PIXEL_SPACING).or_else(|| spacing(tags::IMAGER_PIXEL_SPACING)),
            position: Self::text(dicom_object, tags::IMAGE_POSITION_PATIENT).and_then(position),
            frame_positions: (0..groups.frames())
                .map(|frame| {
                    groups
                        .frame_value(frame, tags::PLANE_POSITION_SEQUENCE, tags::IMAGE_POSITION_PATIENT)
                        .and_then(position)
                })
                .collect(),
            slice_thickness: value(tags::PIXEL_MEASURES_SEQUENCE, tags::SLICE_THICKNESS)
                .and_then(|value| parse_decimal(&value, self.format)),
        }
    }

    fn decode_file(&self, path: &Path) -> Result<DecodedFile, MaterializeError> {
        let dicom_object = open_file(path)?;
        let pixel_data = dicom_object.decode_pixel_data()?;
        let options = ConvertOptions::new().with_voi_lut(VoiLutOption::First);
        let frames = pixel_data
            .to_ndarray_with_options::<u16>(&options)?
            .slice_move(s![.., .., .., 0]);
        Ok(DecodedFile {
            frames,
            geometry: self.read_geometry(&dicom_object),
        })
    }

    fn decode_files(&self, records: &[Record]) -> Result<HashMap<PathBuf, DecodedFile>, MaterializeError> {
        let mut paths: Vec<PathBuf> = records.iter().map(Record::to_path_buf).collect();
        paths.sort();
        paths.dedup();

        paths
            .into_par_iter()
            .map(|path| {
                let decoded = self.decode_file(&path)?;
                Ok((path, decoded))
            })
            .collect()
    }

    fn build_volume_array(
        records: &[Record],
        files: &HashMap<PathBuf, DecodedFile>,
    ) -> Result<Array3<u16>, MaterializeError> {
        let mut frames = Vec::with_capacity(records.len());
        for record in records {
            let decoded = files
                .get(record.filename())
                .ok_or(MaterializeError::EmptyBlock)?;
            let available = decoded.frames.dim().0;
            let index = record.frame() as usize;
            if index >= available {
                return Err(MaterializeError::FrameOutOfRange {
                    path: record.to_path_buf(),
                    frame: record.frame(),
                    available,
                });
            }
            frames.push((record, decoded.frames.slice(s![index, .., ..])));
        }

        let Some((_, first)) = frames.first() else {
            return Err(MaterializeError::EmptyBlock);
        };
        let (height, width) = first.dim();
        let mut volume = Array3::<u16>::zeros((frames.len(), height, width));

        for (i, (record, image)) in frames.iter().enumerate() {
            if image.dim() != (height, width) {
                return Err(MaterializeError::InconsistentDimensions {
                    record: (*record).clone(),
                    expected: (height, width),
                    found: image.dim(),
                });
            }
            volume.slice_mut(s![i, .., ..]).assign(image);
        }

        Ok(volume)
    }

    /// Distance between slices: the tilt's distance along the normal when
    /// the stack was sheared, else the distance of the first two origins,
    /// else the slice thickness, else 1.
    fn slice_distance(
        records: &[Record],
        files: &HashMap<PathBuf, DecodedFile>,
        corrected_tilt: Option<&GantryTiltInformation>,
    ) -> f64 {
        if let Some(tilt) = corrected_tilt {
            return tilt.inter_slice_distance();
        }
        let geometry = |record: &Record| files.get(record.filename()).map(|file| &file.geometry);
        let origin = |record: &Record| {
            geometry(record).and_then(|geometry| geometry.position_of(record.frame()))
        };

        if let (Some(a), Some(b)) = (
            records.first().and_then(origin),
            records.get(1).and_then(origin),
        ) {
            let distance = (b - a).norm();
            if distance > f64::EPSILON {
                return distance;
            }
        }
        records
            .first()
            .and_then(geometry)
            .and_then(|geometry| geometry.slice_thickness)
            .filter(|thickness| *thickness > 0.0)
            .unwrap_or(1.0)
    }
}

impl ImageMaterializer for DicomVolumeMaterializer {
    fn load(
        &self,
        records: &[Record],
        correct_tilt: bool,
        tilt: Option<&GantryTiltInformation>,
    ) -> Result<Volume, MaterializeError> {
        let Some(first) = records.first() else {
            return Err(MaterializeError::EmptyBlock);
        };

        let files = self.decode_files(records)?;
        let mut data = Self::build_volume_array(records, &files)?;

        let (row_spacing, column_spacing) = files
            .get(first.filename())
            .and_then(|file| file.geometry.pixel_spacing)
            .unwrap_or((1.0, 1.0));

        let corrected_tilt = tilt.filter(|tilt| correct_tilt && tilt.is_regular_gantry_tilt());
        if let Some(tilt) = corrected_tilt {
            let rows_per_slice = tilt.correction_per_slice() / row_spacing;
            debug!(
                "Correcting gantry tilt of {:.3} degrees, {rows_per_slice:.4} rows per slice",
                tilt.tilt_angle_degrees()
            );
            data = Interpolator::shear_along_columns(&data, rows_per_slice);
        } else if tilt.is_some_and(GantryTiltInformation::is_sheared) {
            warn!("Loading sheared block starting at '{first}' without correction");
        }

        let z_spacing = Self::slice_distance(records, &files, corrected_tilt);
        let mut volume = Volume::new(data, (column_spacing, row_spacing, z_spacing));
        volume.tilt_corrected = corrected_tilt.is_some();
        Ok(volume)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decoded(frames: usize, position: Option<[f64; 3]>, thickness: Option<f64>) -> DecodedFile {
        DecodedFile {
            frames: Array3::from_shape_fn((frames, 2, 2), |(k, r, c)| (k * 4 + r * 2 + c) as u16),
            geometry: SliceGeometry {
                pixel_spacing: Some((0.5, 0.7)),
                position: position.map(Vector3::from),
                frame_positions: Vec::new(),
                slice_thickness: thickness,
            },
        }
    }

    #[test]
    fn stacks_frames_in_record_order() {
        let records = vec![Record::new("b", 0), Record::new("a", 1), Record::new("a", 0)];
        let mut files = HashMap::new();
        files.insert(PathBuf::from("a"), decoded(2, None, None));
        files.insert(PathBuf::from("b"), decoded(1, None, None));

        let volume = DicomVolumeMaterializer::build_volume_array(&records, &files).unwrap();
        assert_eq!(volume.dim(), (3, 2, 2));
        assert_eq!(volume[[0, 0, 0]], 0);
        assert_eq!(volume[[1, 0, 0]], 4);
        assert_eq!(volume[[2, 1, 1]], 3);
    }

    #[test]
    fn missing_frame_is_reported() {
        let records = vec![Record::new("a", 3)];
        let mut files = HashMap::new();
        files.insert(PathBuf::from("a"), decoded(2, None, None));
        let error = DicomVolumeMaterializer::build_volume_array(&records, &files).unwrap_err();
        assert!(matches!(error, MaterializeError::FrameOutOfRange { available: 2, .. }));
    }

    #[test]
    fn slice_distance_prefers_origins_over_thickness() {
        let records = vec![Record::new("a", 0), Record::new("b", 0)];
        let mut files = HashMap::new();
        files.insert(PathBuf::from("a"), decoded(1, Some([0.0, 0.0, 0.0]), Some(5.0)));
        files.insert(PathBuf::from("b"), decoded(1, Some([0.0, 0.0, 2.5]), Some(5.0)));
        assert_eq!(DicomVolumeMaterializer::slice_distance(&records, &files, None), 2.5);

        files.insert(PathBuf::from("b"), decoded(1, None, Some(5.0)));
        assert_eq!(DicomVolumeMaterializer::slice_distance(&records, &files, None), 5.0);

        let tilt = GantryTiltInformation::new(
            Vector3::new(0.0, 1.0, 0.0),
            Vector3::new(0.0, 0.0, 6.0),
            Vector3::x(),
            Vector3::y(),
            2,
        );
        assert_eq!(DicomVolumeMaterializer::slice_distance(&records, &files, Some(&tilt)), 3.0);
    }

    #[test]
    fn slice_distance_uses_frame_origins() {
        let records = vec![Record::new("multi", 2), Record::new("multi", 0)];
        let mut file = decoded(3, Some([0.0, 0.0, 0.0]), Some(5.0));
        file.geometry.frame_positions = vec![
            Some(Vector3::new(0.0, 0.0, 0.0)),
            Some(Vector3::new(0.0, 0.0, 5.0)),
            Some(Vector3::new(0.0, 0.0, 1.25)),
        ];
        let mut files = HashMap::new();
        files.insert(PathBuf::from("multi"), file);
        assert_eq!(DicomVolumeMaterializer::slice_distance(&records, &files, None), 1.25);
    }

    #[test]
    fn empty_block_is_an_error() {
        let error = DicomVolumeMaterializer::new().load(&[], false, None).unwrap_err();
        assert!(matches!(error, MaterializeError::EmptyBlock));
    }
}
