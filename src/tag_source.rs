//! Access to attribute values of the frames being sorted.
//!
//! The sorting pipeline never reads DICOM files itself. Every attribute is
//! obtained from a [`TagValueSource`], which must be told up front (via
//! [`TagValueSource::declared_tags`]) which attributes will be asked for.
//! Asking for anything else is a wiring bug and fails loudly.

use crate::tag::{DicomTag, TagPath};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// One input frame: a file and the frame index inside it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Record {
    filename: Arc<Path>,
    frame: u32,
}

impl Record {
    pub fn new(filename: impl AsRef<Path>, frame: u32) -> Self {
        Self {
            filename: Arc::from(filename.as_ref()),
            frame,
        }
    }

    pub fn filename(&self) -> &Path {
        &self.filename
    }

    pub fn frame(&self) -> u32 {
        self.frame
    }

    pub fn to_path_buf(&self) -> PathBuf {
        self.filename.to_path_buf()
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.frame > 0 {
            write!(f, "{}, {}", self.filename.display(), self.frame)
        } else {
            write!(f, "{}", self.filename.display())
        }
    }
}

/// Result of one attribute lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoundTagValue {
    pub found: bool,
    pub value: String,
    /// The concrete path the value was found at (wildcards resolved).
    pub path: TagPath,
}

impl FoundTagValue {
    pub fn found(value: impl Into<String>, path: TagPath) -> Self {
        Self {
            found: true,
            value: value.into(),
            path,
        }
    }

    pub fn not_found(path: TagPath) -> Self {
        Self {
            found: false,
            value: String::new(),
            path,
        }
    }
}

#[derive(Debug, Error)]
pub enum TagSourceError {
    #[error("tag path {0} was not declared to the tag source")]
    UndeclaredTag(TagPath),

    #[error("record '{0}' is unknown to the tag source")]
    UnknownRecord(Record),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("DICOM error: {0}")]
    Dicom(#[from] dicom::object::ReadError),
}

pub trait TagValueSource {
    /// Paths this source was asked to provide.
    fn declared_tags(&self) -> &BTreeSet<TagPath>;

    /// All values of `path` for `record`. A wildcarded path may yield several
    /// values; a path that was declared but is absent yields one `not found`
    /// entry.
    fn get(&self, record: &Record, path: &TagPath) -> Result<Vec<FoundTagValue>, TagSourceError>;

    /// Every record this source knows, in registration order.
    fn records(&self) -> Vec<Record>;

    /// First found value of a top-level attribute.
    fn value(&self, record: &Record, tag: DicomTag) -> Result<Option<String>, TagSourceError> {
        self.path_value(record, &TagPath::element(tag))
    }

    /// First found value of `path`.
    fn path_value(&self, record: &Record, path: &TagPath) -> Result<Option<String>, TagSourceError> {
        Ok(self
            .get(record, path)?
            .into_iter()
            .find(|found| found.found)
            .map(|found| found.value))
    }

    /// Like [`TagValueSource::value`], but an absent attribute reads as `""`.
    fn value_or_empty(&self, record: &Record, tag: DicomTag) -> Result<String, TagSourceError> {
        Ok(self.value(record, tag)?.unwrap_or_default())
    }
}

/// Guard shared by tag source implementations.
pub(crate) fn ensure_declared(
    declared: &BTreeSet<TagPath>,
    path: &TagPath,
) -> Result<(), TagSourceError> {
    if declared.contains(path) || declared.iter().any(|pattern| pattern.matches(path)) {
        Ok(())
    } else {
        Err(TagSourceError::UndeclaredTag(path.clone()))
    }
}

/// A tag source backed by values already held in memory.
#[derive(Debug, Default, Clone)]
pub struct InMemoryTagSource {
    declared: BTreeSet<TagPath>,
    order: Vec<Record>,
    values: HashMap<Record, HashMap<TagPath, String>>,
}

impl InMemoryTagSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declare(&mut self, path: impl Into<TagPath>) {
        self.declared.insert(path.into());
    }

    pub fn declare_all(&mut self, paths: impl IntoIterator<Item = TagPath>) {
        self.declared.extend(paths);
    }

    /// Register a record without any values.
    pub fn add_record(&mut self, record: Record) {
        if !self.values.contains_key(&record) {
            self.order.push(record.clone());
            self.values.insert(record, HashMap::new());
        }
    }

    /// Set a value, registering the record if needed. Setting a value does
    /// not declare its path.
    pub fn set(&mut self, record: &Record, path: impl Into<TagPath>, value: impl Into<String>) {
        self.add_record(record.clone());
        if let Some(values) = self.values.get_mut(record) {
            values.insert(path.into(), value.into());
        }
    }
}

impl TagValueSource for InMemoryTagSource {
    fn declared_tags(&self) -> &BTreeSet<TagPath> {
        &self.declared
    }

    fn get(&self, record: &Record, path: &TagPath) -> Result<Vec<FoundTagValue>, TagSourceError> {
        ensure_declared(&self.declared, path)?;
        let values = self
            .values
            .get(record)
            .ok_or_else(|| TagSourceError::UnknownRecord(record.clone()))?;

        if path.is_explicit() {
            return Ok(vec![match values.get(path) {
                Some(value) => FoundTagValue::found(value.clone(), path.clone()),
                None => FoundTagValue::not_found(path.clone()),
            }]);
        }

        let mut found: Vec<FoundTagValue> = values
            .iter()
            .filter(|(stored, _)| path.matches(stored))
            .map(|(stored, value)| FoundTagValue::found(value.clone(), stored.clone()))
            .collect();
        found.sort_by(|a, b| a.path.cmp(&b.path));

        if found.is_empty() {
            found.push(FoundTagValue::not_found(path.clone()));
        }
        Ok(found)
    }

    fn records(&self) -> Vec<Record> {
        self.order.clone()
    }
}
