//! # DICOM series sorting library
//!
//! This crate sorts a loose set of DICOM frames into image blocks that can
//! each be loaded as one regular 3D volume.
//!
//! This library is part of the dicom-rs ecosystem and leverages its
//! components to read attribute values and pixel data. Files are scanned in
//! parallel using rayon, reading only the attributes the sorting pipeline
//! declares as interesting. The pipeline then:
//!  - splits frames that can never share a volume (matrix size, pixel
//!    spacing, orientation, slice thickness, number of frames)
//!  - applies configurable tag based grouping and sorting
//!  - cuts the sorted frames into blocks of equally spaced slices,
//!    detecting gantry tilt on the way
//!  - makes slice order follow the slice normal
//!
//! Every block carries the reason it was split from its neighbours, its
//! tilt (if any) and a description of the images it contains. Blocks can
//! then be decoded into a [`Volume`], optionally shearing tilted stacks
//! back into orthogonal ones.
//!
//! # Examples
//!
//! ## Sorting a directory into image blocks
//!
//! ```no_run
//! # use dicom_series_sort::{DicomSeriesReader, DicomTagScanner, DicomVolumeMaterializer, Orientation};
//! let files = DicomTagScanner::files_in_directory("dicom")
//!     .expect("should have listed the directory");
//! let mut reader = DicomSeriesReader::classic();
//! reader.analyze_files(&files).expect("should have sorted the files");
//! for block in reader.outputs() {
//!     println!("{block}");
//! }
//!
//! let block = reader
//!     .load_block(0, &DicomVolumeMaterializer::new())
//!     .expect("should have decoded the first block");
//! if let Some(volume) = block.volume() {
//!     let image = volume
//!         .center_preview(Orientation::Axial)
//!         .expect("should have returned image at center of volume");
//!     image.save("result.png").expect("should have saved the image");
//! }
//! ```

pub mod block;
pub mod config;
pub mod dicom_scanner;
pub mod enums;
pub mod gantry_tilt;
mod interpolator;
pub mod numeric;
pub mod reader;
pub mod sort_criterion;
pub mod sorter;
pub mod split_reason;
pub mod tag;
pub mod tag_source;
pub mod volume;
pub mod volume_loader;

pub use block::ImageBlockDescriptor;
pub use config::{ConfigError, ReaderConfig};
pub use dicom_scanner::DicomTagScanner;
pub use enums::{Orientation, PixelSpacingInterpretation, ReaderImplementationLevel, SplitReasonKind};
pub use gantry_tilt::GantryTiltInformation;
pub use reader::{BlockCondenser, DicomSeriesReader, NoCondensing, ReaderError};
pub use sort_criterion::{CriterionChain, SortCriterion, SortError};
pub use split_reason::SplitReason;
pub use tag::{DicomTag, TagPath};
pub use tag_source::{InMemoryTagSource, Record, TagSourceError, TagValueSource};
pub use volume::Volume;
pub use volume_loader::{DicomVolumeMaterializer, ImageMaterializer, MaterializeError};
