//! A [`TagValueSource`] that reads attribute values from DICOM files.

use crate::tag::{TagPath, TagPathNode};
use crate::tag_source::{FoundTagValue, Record, TagSourceError, TagValueSource, ensure_declared};

use dicom::core::Tag;
use dicom::object::{InMemDicomObject, OpenFileOptions};
use dicom_dictionary_std::tags;
use log::{debug, warn};
use rayon::prelude::*;
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

/// Frame geometry of enhanced multi-frame objects: the functional group
/// sequence holding each attribute.
const FRAME_GEOMETRY: [(Tag, Tag); 4] = [
    (tags::PLANE_POSITION_SEQUENCE, tags::IMAGE_POSITION_PATIENT),
    (tags::PLANE_ORIENTATION_SEQUENCE, tags::IMAGE_ORIENTATION_PATIENT),
    (tags::PIXEL_MEASURES_SEQUENCE, tags::PIXEL_SPACING),
    (tags::PIXEL_MEASURES_SEQUENCE, tags::SLICE_THICKNESS),
];

/// Values read from one file.
#[derive(Debug, Default)]
struct ScannedFile {
    frames: u32,
    values: Vec<(TagPath, String)>,
    /// Per frame values taking precedence over `values`. Empty unless the
    /// file holds more than one frame.
    frame_values: Vec<Vec<(TagPath, String)>>,
}

impl ScannedFile {
    fn unreadable() -> Self {
        Self {
            frames: 1,
            ..Self::default()
        }
    }
}

/// Scans DICOM files for a fixed set of tag paths.
///
/// Files are opened in parallel and read only up to the pixel data. A file
/// with `NumberOfFrames` > 1 contributes one [`Record`] per frame when every
/// frame has its own position in the functional groups. Such frames report
/// their own position, orientation, pixel spacing and slice thickness as
/// top level values. Multi-frame files without per frame positions are
/// registered as a single record. Files that cannot be read are still
/// registered (as a single frame without any values), so they come out of
/// the reader as blocks of their own instead of vanishing.
#[derive(Debug, Default)]
pub struct DicomTagScanner {
    declared: BTreeSet<TagPath>,
    order: Vec<Record>,
    files: HashMap<PathBuf, ScannedFile>,
}

impl DicomTagScanner {
    pub fn new(paths: impl IntoIterator<Item = TagPath>) -> Self {
        Self {
            declared: paths.into_iter().collect(),
            ..Self::default()
        }
    }

    /// Regular files directly inside `directory`, sorted by name.
    pub fn files_in_directory(directory: impl AsRef<Path>) -> Result<Vec<PathBuf>, TagSourceError> {
        let mut paths: Vec<PathBuf> = fs::read_dir(directory.as_ref())?
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.is_file())
            .collect();
        paths.sort();
        Ok(paths)
    }

    /// Scan `paths`, appending their frames to [`TagValueSource::records`].
    /// Files already scanned are skipped.
    pub fn scan_files(&mut self, paths: &[impl AsRef<Path> + Sync]) {
        let pending: Vec<&Path> = paths
            .iter()
            .map(AsRef::as_ref)
            .filter(|path| !self.files.contains_key(*path))
            .collect();

        let declared = &self.declared;
        let scanned: Vec<(PathBuf, ScannedFile)> = pending
            .par_iter()
            .map(|path| {
                let file = Self::scan_file(path, declared).unwrap_or_else(|error| {
                    warn!("Could not read '{}': {error}", path.display());
                    ScannedFile::unreadable()
                });
                (path.to_path_buf(), file)
            })
            .collect();

        for (path, file) in scanned {
            self.register(path, file);
        }
        debug!("Scanned {} files, {} frames", self.files.len(), self.order.len());
    }

    fn register(&mut self, path: PathBuf, file: ScannedFile) {
        if self.files.contains_key(&path) {
            return;
        }
        for frame in 0..file.frames {
            self.order.push(Record::new(&path, frame));
        }
        self.files.insert(path, file);
    }

    fn scan_file(path: &Path, declared: &BTreeSet<TagPath>) -> Result<ScannedFile, TagSourceError> {
        let object = OpenFileOptions::new()
            .read_until(tags::PIXEL_DATA)
            .open_file(path)?;
        let file = Self::scan_object(&object, declared);
        if file.frames == 1 && file.frame_values.is_empty() {
            if let Some(frames) = Self::number_of_frames(&object).filter(|frames| *frames > 1) {
                debug!(
                    "'{}' has {frames} frames without own positions, kept as one record",
                    path.display()
                );
            }
        }
        Ok(file)
    }

    fn number_of_frames(object: &InMemDicomObject) -> Option<u32> {
        Self::text(object, tags::NUMBER_OF_FRAMES).and_then(|value| value.parse::<u32>().ok())
    }

    fn scan_object(object: &InMemDicomObject, declared: &BTreeSet<TagPath>) -> ScannedFile {
        let mut values = Vec::new();
        for path in declared {
            Self::resolve(object, path.nodes(), TagPath::default(), &mut values);
        }

        let frames = Self::number_of_frames(object).unwrap_or(1).max(1);
        let frame_values = if frames > 1 {
            Self::frame_geometry(object, frames, declared).unwrap_or_default()
        } else {
            Vec::new()
        };
        ScannedFile {
            frames: if frame_values.is_empty() { 1 } else { frames },
            values,
            frame_values,
        }
    }

    /// Declared geometry of every frame. `None` unless every frame has a
    /// position of its own.
    fn frame_geometry(
        object: &InMemDicomObject,
        frames: u32,
        declared: &BTreeSet<TagPath>,
    ) -> Option<Vec<Vec<(TagPath, String)>>> {
        let groups = FunctionalGroups::of(object);
        if groups.frames() < frames as usize {
            return None;
        }

        (0..frames as usize)
            .map(|frame| {
                groups.frame_value(frame, tags::PLANE_POSITION_SEQUENCE, tags::IMAGE_POSITION_PATIENT)?;
                let values: Vec<(TagPath, String)> = FRAME_GEOMETRY
                    .iter()
                    .filter_map(|&(sequence, tag)| {
                        let path = TagPath::element(tag.into());
                        if !declared.contains(&path) {
                            return None;
                        }
                        groups.frame_value(frame, sequence, tag).map(|value| (path, value))
                    })
                    .collect();
                Some(values)
            })
            .collect()
    }

    pub(crate) fn text(object: &InMemDicomObject, tag: Tag) -> Option<String> {
        object
            .element(tag)
            .ok()?
            .to_str()
            .ok()
            .map(|value| value.trim_matches(|c: char| c.is_whitespace() || c == '\0').to_string())
    }

    /// Collect every concrete path below `object` described by `nodes`.
    fn resolve(
        object: &InMemDicomObject,
        nodes: &[TagPathNode],
        prefix: TagPath,
        out: &mut Vec<(TagPath, String)>,
    ) {
        let Some((node, rest)) = nodes.split_first() else {
            return;
        };

        match node {
            TagPathNode::Element(tag) if rest.is_empty() => {
                if let Some(value) = Self::text(object, Tag::from(*tag)) {
                    out.push((prefix.join(*node), value));
                }
            }
            TagPathNode::AnyElement if rest.is_empty() => {
                for element in object.iter() {
                    let tag = element.header().tag;
                    if let Some(value) = Self::text(object, tag) {
                        out.push((prefix.join(TagPathNode::Element(tag.into())), value));
                    }
                }
            }
            TagPathNode::SequenceSelection(tag, index) => {
                let item = object
                    .element(Tag::from(*tag))
                    .ok()
                    .and_then(|element| element.items())
                    .and_then(|items| items.get(*index));
                if let Some(item) = item {
                    Self::resolve(item, rest, prefix.join(*node), out);
                }
            }
            TagPathNode::AnySelection(tag) => {
                let items = object
                    .element(Tag::from(*tag))
                    .ok()
                    .and_then(|element| element.items());
                for (index, item) in items.into_iter().flatten().enumerate() {
                    let concrete = TagPathNode::SequenceSelection(*tag, index);
                    Self::resolve(item, rest, prefix.join(concrete), out);
                }
            }
            // an element in the middle of a path has no items to descend into
            TagPathNode::Element(_) | TagPathNode::AnyElement => {}
        }
    }
}

/// Functional groups of an enhanced multi-frame object.
pub(crate) struct FunctionalGroups<'a> {
    per_frame: &'a [InMemDicomObject],
    shared: Option<&'a InMemDicomObject>,
}

impl<'a> FunctionalGroups<'a> {
    pub(crate) fn of(object: &'a InMemDicomObject) -> Self {
        let items = move |tag: Tag| -> &'a [InMemDicomObject] {
            object
                .element(tag)
                .ok()
                .and_then(|element| element.items())
                .unwrap_or_default()
        };
        Self {
            per_frame: items(tags::PER_FRAME_FUNCTIONAL_GROUPS_SEQUENCE),
            shared: items(tags::SHARED_FUNCTIONAL_GROUPS_SEQUENCE).first(),
        }
    }

    /// Number of frames with a per frame functional group item.
    pub(crate) fn frames(&self) -> usize {
        self.per_frame.len()
    }

    /// `tag` inside the first item of `sequence` in the groups of `frame`,
    /// else in the shared groups.
    pub(crate) fn frame_value(&self, frame: usize, sequence: Tag, tag: Tag) -> Option<String> {
        let lookup = |groups: &InMemDicomObject| {
            let item = groups.element(sequence).ok()?.items()?.first()?;
            DicomTagScanner::text(item, tag)
        };
        self.per_frame
            .get(frame)
            .and_then(lookup)
            .or_else(|| self.shared.and_then(lookup))
    }
}

impl TagValueSource for DicomTagScanner {
    fn declared_tags(&self) -> &BTreeSet<TagPath> {
        &self.declared
    }

    fn get(&self, record: &Record, path: &TagPath) -> Result<Vec<FoundTagValue>, TagSourceError> {
        ensure_declared(&self.declared, path)?;
        let file = self
            .files
            .get(record.filename())
            .filter(|file| record.frame() < file.frames)
            .ok_or_else(|| TagSourceError::UnknownRecord(record.clone()))?;

        let matching = |values: &[(TagPath, String)]| -> Vec<FoundTagValue> {
            values
                .iter()
                .filter(|(stored, _)| stored == path || path.matches(stored))
                .map(|(stored, value)| FoundTagValue::found(value.clone(), stored.clone()))
                .collect()
        };
        let mut found = file
            .frame_values
            .get(record.frame() as usize)
            .map(|values| matching(values))
            .unwrap_or_default();
        if found.is_empty() {
            found = matching(&file.values);
        }
        found.sort_by(|a, b| a.path.cmp(&b.path));
        found.dedup_by(|a, b| a.path == b.path);

        if found.is_empty() {
            found.push(FoundTagValue::not_found(path.clone()));
        }
        Ok(found)
    }

    fn records(&self) -> Vec<Record> {
        self.order.clone()
    }
}
