//! Identification of DICOM attributes.
//!
//! A [`DicomTag`] is a plain (group, element) pair. A [`TagPath`] addresses
//! an attribute that may live inside sequences, and may contain wildcards so
//! that one path can describe many concrete attributes.
//!
//! The textual form of a path joins its nodes with `.`:
//!
//! - `(0020,0032)` an explicit element
//! - `(0040,A730)[2]` item 2 of a sequence
//! - `(0040,A730)[*]` any item of a sequence
//! - `*` any element
//!
//! e.g. `(5200,9230)[*].(0020,9113)[0].(0020,0032)`.

use dicom::core::Tag;
use dicom_dictionary_std::tags;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A (group, element) attribute tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DicomTag {
    pub group: u16,
    pub element: u16,
}

impl DicomTag {
    pub const fn new(group: u16, element: u16) -> Self {
        Self { group, element }
    }

    /// Keyword from the standard data dictionary, when known.
    pub fn name(&self) -> Option<&'static str> {
        use dicom::core::dictionary::{DataDictionary, DataDictionaryEntry};
        let dictionary: &'static dicom_dictionary_std::StandardDataDictionary =
            &dicom_dictionary_std::StandardDataDictionary;
        dictionary
            .by_tag(Tag::from(*self))
            .map(|entry| entry.alias())
    }
}

impl From<Tag> for DicomTag {
    fn from(tag: Tag) -> Self {
        Self::new(tag.group(), tag.element())
    }
}

impl From<DicomTag> for Tag {
    fn from(tag: DicomTag) -> Self {
        Tag(tag.group, tag.element)
    }
}

impl fmt::Display for DicomTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:04X},{:04X})", self.group, self.element)
    }
}

impl FromStr for DicomTag {
    type Err = TagPathParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || TagPathParseError::InvalidTag(s.to_string());
        let inner = s
            .trim()
            .strip_prefix('(')
            .and_then(|rest| rest.strip_suffix(')'))
            .ok_or_else(invalid)?;
        let (group, element) = inner.split_once(',').ok_or_else(invalid)?;
        let group = u16::from_str_radix(group.trim(), 16).map_err(|_| invalid())?;
        let element = u16::from_str_radix(element.trim(), 16).map_err(|_| invalid())?;
        Ok(Self::new(group, element))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TagPathParseError {
    #[error("invalid tag '{0}', expected (gggg,eeee)")]
    InvalidTag(String),

    #[error("invalid item selection in '{0}'")]
    InvalidSelection(String),

    #[error("empty tag path")]
    Empty,
}

/// One step of a [`TagPath`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TagPathNode {
    Element(DicomTag),
    AnyElement,
    SequenceSelection(DicomTag, usize),
    AnySelection(DicomTag),
}

impl TagPathNode {
    pub fn tag(&self) -> Option<DicomTag> {
        match self {
            TagPathNode::Element(tag)
            | TagPathNode::SequenceSelection(tag, _)
            | TagPathNode::AnySelection(tag) => Some(*tag),
            TagPathNode::AnyElement => None,
        }
    }

    pub fn is_wildcard(&self) -> bool {
        matches!(self, TagPathNode::AnyElement | TagPathNode::AnySelection(_))
    }

    /// Whether `self` (possibly wildcarded) describes `other`.
    pub fn matches(&self, other: &TagPathNode) -> bool {
        match (self, other) {
            (TagPathNode::AnyElement, TagPathNode::Element(_) | TagPathNode::AnyElement) => true,
            (TagPathNode::AnyElement, _) => false,
            (TagPathNode::Element(a), TagPathNode::Element(b)) => a == b,
            (TagPathNode::AnySelection(a), TagPathNode::SequenceSelection(b, _))
            | (TagPathNode::AnySelection(a), TagPathNode::AnySelection(b)) => a == b,
            (TagPathNode::SequenceSelection(a, i), TagPathNode::SequenceSelection(b, j)) => {
                a == b && i == j
            }
            _ => false,
        }
    }
}

impl fmt::Display for TagPathNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TagPathNode::Element(tag) => write!(f, "{tag}"),
            TagPathNode::AnyElement => write!(f, "*"),
            TagPathNode::SequenceSelection(tag, index) => write!(f, "{tag}[{index}]"),
            TagPathNode::AnySelection(tag) => write!(f, "{tag}[*]"),
        }
    }
}

impl FromStr for TagPathNode {
    type Err = TagPathParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s == "*" {
            return Ok(TagPathNode::AnyElement);
        }

        match s.split_once('[') {
            None => Ok(TagPathNode::Element(s.parse()?)),
            Some((tag, selection)) => {
                let tag: DicomTag = tag.parse()?;
                let selection = selection
                    .strip_suffix(']')
                    .ok_or_else(|| TagPathParseError::InvalidSelection(s.to_string()))?;
                if selection == "*" {
                    Ok(TagPathNode::AnySelection(tag))
                } else {
                    let index = selection
                        .parse::<usize>()
                        .map_err(|_| TagPathParseError::InvalidSelection(s.to_string()))?;
                    Ok(TagPathNode::SequenceSelection(tag, index))
                }
            }
        }
    }
}

/// An immutable path to a (possibly nested, possibly wildcarded) attribute.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TagPath {
    nodes: Vec<TagPathNode>,
}

impl TagPath {
    pub fn new(nodes: Vec<TagPathNode>) -> Self {
        Self { nodes }
    }

    /// Path consisting of a single top-level element.
    pub fn element(tag: DicomTag) -> Self {
        Self {
            nodes: vec![TagPathNode::Element(tag)],
        }
    }

    /// Extend by one node, returning a new path.
    pub fn join(&self, node: TagPathNode) -> Self {
        let mut nodes = self.nodes.clone();
        nodes.push(node);
        Self { nodes }
    }

    pub fn nodes(&self) -> &[TagPathNode] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn is_explicit(&self) -> bool {
        !self.nodes.iter().any(TagPathNode::is_wildcard)
    }

    /// The tag of the last node, i.e. the attribute whose value the path yields.
    pub fn leaf_tag(&self) -> Option<DicomTag> {
        self.nodes.last().and_then(TagPathNode::tag)
    }

    /// Whether this path describes `other`. Only wildcards in `self` are
    /// honoured, and both paths must have the same depth.
    pub fn matches(&self, other: &TagPath) -> bool {
        self.nodes.len() == other.nodes.len()
            && self
                .nodes
                .iter()
                .zip(&other.nodes)
                .all(|(mine, theirs)| mine.matches(theirs))
    }
}

impl From<DicomTag> for TagPath {
    fn from(tag: DicomTag) -> Self {
        TagPath::element(tag)
    }
}

impl From<Tag> for TagPath {
    fn from(tag: Tag) -> Self {
        TagPath::element(tag.into())
    }
}

impl fmt::Display for TagPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, node) in self.nodes.iter().enumerate() {
            if index > 0 {
                f.write_str(".")?;
            }
            write!(f, "{node}")?;
        }
        Ok(())
    }
}

impl FromStr for TagPath {
    type Err = TagPathParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().is_empty() {
            return Err(TagPathParseError::Empty);
        }
        // tags contain no '.', so splitting on it is unambiguous
        let nodes = s
            .split('.')
            .map(str::parse)
            .collect::<Result<Vec<TagPathNode>, _>>()?;
        Ok(Self { nodes })
    }
}

/// Attributes the sorting pipeline itself relies on.
pub mod well_known {
    use super::{DicomTag, tags};

    pub const ROWS: DicomTag = DicomTag::new(tags::ROWS.0, tags::ROWS.1);
    pub const COLUMNS: DicomTag = DicomTag::new(tags::COLUMNS.0, tags::COLUMNS.1);
    pub const PIXEL_SPACING: DicomTag = DicomTag::new(tags::PIXEL_SPACING.0, tags::PIXEL_SPACING.1);
    pub const IMAGER_PIXEL_SPACING: DicomTag =
        DicomTag::new(tags::IMAGER_PIXEL_SPACING.0, tags::IMAGER_PIXEL_SPACING.1);
    pub const IMAGE_ORIENTATION_PATIENT: DicomTag = DicomTag::new(
        tags::IMAGE_ORIENTATION_PATIENT.0,
        tags::IMAGE_ORIENTATION_PATIENT.1,
    );
    pub const IMAGE_POSITION_PATIENT: DicomTag = DicomTag::new(
        tags::IMAGE_POSITION_PATIENT.0,
        tags::IMAGE_POSITION_PATIENT.1,
    );
    pub const SLICE_THICKNESS: DicomTag =
        DicomTag::new(tags::SLICE_THICKNESS.0, tags::SLICE_THICKNESS.1);
    pub const NUMBER_OF_FRAMES: DicomTag =
        DicomTag::new(tags::NUMBER_OF_FRAMES.0, tags::NUMBER_OF_FRAMES.1);

    pub const SOP_CLASS_UID: DicomTag = DicomTag::new(tags::SOP_CLASS_UID.0, tags::SOP_CLASS_UID.1);
    pub const SOP_INSTANCE_UID: DicomTag =
        DicomTag::new(tags::SOP_INSTANCE_UID.0, tags::SOP_INSTANCE_UID.1);
    pub const SERIES_INSTANCE_UID: DicomTag =
        DicomTag::new(tags::SERIES_INSTANCE_UID.0, tags::SERIES_INSTANCE_UID.1);
    pub const SERIES_NUMBER: DicomTag = DicomTag::new(tags::SERIES_NUMBER.0, tags::SERIES_NUMBER.1);
    pub const STUDY_DESCRIPTION: DicomTag =
        DicomTag::new(tags::STUDY_DESCRIPTION.0, tags::STUDY_DESCRIPTION.1);
    pub const SERIES_DESCRIPTION: DicomTag =
        DicomTag::new(tags::SERIES_DESCRIPTION.0, tags::SERIES_DESCRIPTION.1);
    pub const MODALITY: DicomTag = DicomTag::new(tags::MODALITY.0, tags::MODALITY.1);
    pub const SEQUENCE_NAME: DicomTag = DicomTag::new(tags::SEQUENCE_NAME.0, tags::SEQUENCE_NAME.1);
    pub const SLICE_LOCATION: DicomTag =
        DicomTag::new(tags::SLICE_LOCATION.0, tags::SLICE_LOCATION.1);
    pub const ACQUISITION_NUMBER: DicomTag =
        DicomTag::new(tags::ACQUISITION_NUMBER.0, tags::ACQUISITION_NUMBER.1);
    pub const INSTANCE_NUMBER: DicomTag =
        DicomTag::new(tags::INSTANCE_NUMBER.0, tags::INSTANCE_NUMBER.1);
    pub const WINDOW_CENTER: DicomTag = DicomTag::new(tags::WINDOW_CENTER.0, tags::WINDOW_CENTER.1);
    pub const WINDOW_WIDTH: DicomTag = DicomTag::new(tags::WINDOW_WIDTH.0, tags::WINDOW_WIDTH.1);
    pub const IMAGE_TYPE: DicomTag = DicomTag::new(tags::IMAGE_TYPE.0, tags::IMAGE_TYPE.1);
    pub const PHOTOMETRIC_INTERPRETATION: DicomTag = DicomTag::new(
        tags::PHOTOMETRIC_INTERPRETATION.0,
        tags::PHOTOMETRIC_INTERPRETATION.1,
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_round_trips_through_text() {
        let tag = well_known::IMAGE_POSITION_PATIENT;
        assert_eq!(tag.to_string(), "(0020,0032)");
        assert_eq!("(0020,0032)".parse::<DicomTag>(), Ok(tag));
        assert_eq!("(0020, 0032)".parse::<DicomTag>(), Ok(tag));
        assert!("0020,0032".parse::<DicomTag>().is_err());
    }

    #[test]
    fn well_known_tags_carry_dictionary_names() {
        assert_eq!(
            well_known::IMAGE_ORIENTATION_PATIENT.name(),
            Some("ImageOrientationPatient")
        );
    }

    #[test]
    fn nested_path_round_trips_through_text() {
        let text = "(5200,9230)[*].(0020,9113)[0].(0020,0032)";
        let path: TagPath = text.parse().unwrap();
        assert_eq!(path.len(), 3);
        assert_eq!(path.to_string(), text);
        assert_eq!(path.leaf_tag(), Some(well_known::IMAGE_POSITION_PATIENT));
        assert!(!path.is_explicit());
    }

    #[test]
    fn wildcards_match_explicit_paths_of_same_shape() {
        let pattern: TagPath = "(5200,9230)[*].*".parse().unwrap();
        let concrete: TagPath = "(5200,9230)[3].(0020,0032)".parse().unwrap();
        let other_sequence: TagPath = "(5200,9229)[3].(0020,0032)".parse().unwrap();
        let deeper: TagPath = "(5200,9230)[3].(0020,9113)[0].(0020,0032)".parse().unwrap();

        assert!(pattern.matches(&concrete));
        assert!(!pattern.matches(&other_sequence));
        assert!(!pattern.matches(&deeper));
        assert!(!concrete.matches(&pattern));
    }

    #[test]
    fn rejects_malformed_selection() {
        assert!(matches!(
            "(0040,A730)[x]".parse::<TagPath>(),
            Err(TagPathParseError::InvalidSelection(_))
        ));
        assert_eq!("".parse::<TagPath>(), Err(TagPathParseError::Empty));
    }
}
