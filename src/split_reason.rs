use crate::enums::SplitReasonKind;
use std::collections::BTreeMap;
use std::fmt;

/// Why a group of frames was separated from its neighbours.
///
/// Each [`SplitReasonKind`] is recorded at most once; the first detail
/// recorded for a kind is the one that is kept.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SplitReason {
    reasons: BTreeMap<SplitReasonKind, String>,
}

impl SplitReason {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(kind: SplitReasonKind, details: impl Into<String>) -> Self {
        let mut reason = Self::new();
        reason.add(kind, details);
        reason
    }

    /// Record `kind`. Returns `false` if the kind was already present.
    pub fn add(&mut self, kind: SplitReasonKind, details: impl Into<String>) -> bool {
        if self.reasons.contains_key(&kind) {
            return false;
        }
        self.reasons.insert(kind, details.into());
        true
    }

    /// Copy over the kinds of `other` that are not present yet.
    pub fn extend(&mut self, other: &SplitReason) {
        for (kind, details) in &other.reasons {
            self.reasons
                .entry(*kind)
                .or_insert_with(|| details.clone());
        }
    }

    pub fn has(&self, kind: SplitReasonKind) -> bool {
        self.reasons.contains_key(&kind)
    }

    pub fn details(&self, kind: SplitReasonKind) -> Option<&str> {
        self.reasons.get(&kind).map(String::as_str)
    }

    pub fn kinds(&self) -> impl Iterator<Item = SplitReasonKind> + '_ {
        self.reasons.keys().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.reasons.is_empty()
    }

    pub fn len(&self) -> usize {
        self.reasons.len()
    }
}

impl fmt::Display for SplitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, (kind, details)) in self.reasons.iter().enumerate() {
            if index > 0 {
                f.write_str("; ")?;
            }
            if details.is_empty() {
                write!(f, "{kind}")?;
            } else {
                write!(f, "{kind}: {details}")?;
            }
        }
        Ok(())
    }
}
