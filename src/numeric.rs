//! Decimal parsing of DICOM attribute values.
//!
//! DICOM stores decimal strings (`DS`) with a `.` separator and multiple
//! values separated by `\`. Parsing always goes through an explicit
//! [`NumericFormat`]; the process-wide "active" format only exists for
//! collaborators that cannot be handed one (external tag readers and image
//! decoders), and is switched with a scoped [`CLocaleScope`].

use log::warn;
use std::sync::{Mutex, MutexGuard};

/// How decimal numbers are written in attribute strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NumericFormat {
    pub decimal_separator: char,
}

impl NumericFormat {
    /// The "C" format: `.` as decimal separator, as mandated for DICOM `DS`.
    pub const C: NumericFormat = NumericFormat {
        decimal_separator: '.',
    };
}

impl Default for NumericFormat {
    fn default() -> Self {
        Self::C
    }
}

struct LocaleState {
    active: NumericFormat,
    replaced: Vec<NumericFormat>,
}

static LOCALE_STATE: Mutex<LocaleState> = Mutex::new(LocaleState {
    active: NumericFormat::C,
    replaced: Vec::new(),
});

fn locale_state() -> MutexGuard<'static, LocaleState> {
    // a poisoned lock only means another thread panicked mid-push; the stack is still usable
    LOCALE_STATE
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// The currently active process-wide format.
pub fn active_format() -> NumericFormat {
    locale_state().active
}

/// Replace the process-wide format without a scope. Used by callers that
/// run with a non-"C" convention outside of any analysis.
pub fn set_active_format(format: NumericFormat) {
    locale_state().active = format;
}

/// Forces the "C" format for its lifetime and restores the previous one on
/// drop. Scopes nest; each drop pops exactly one entry.
#[must_use = "the previous format is restored when the scope is dropped"]
pub struct CLocaleScope {
    _private: (),
}

impl CLocaleScope {
    pub fn enter() -> Self {
        let mut state = locale_state();
        let previous = state.active;
        state.replaced.push(previous);
        state.active = NumericFormat::C;
        Self { _private: () }
    }
}

impl Drop for CLocaleScope {
    fn drop(&mut self) {
        let mut state = locale_state();
        match state.replaced.pop() {
            Some(previous) => state.active = previous,
            None => warn!("Mismatched numeric locale pop, keeping current format"),
        }
    }
}

/// Parse a single decimal value. Surrounding whitespace (DICOM pads with
/// spaces) is ignored. Returns `None` if the string is not a number.
pub fn parse_decimal(value: &str, format: NumericFormat) -> Option<f64> {
    let trimmed = value.trim_matches(|c: char| c.is_whitespace() || c == '\0');
    if trimmed.is_empty() {
        return None;
    }

    let parsed = if format.decimal_separator == '.' {
        trimmed.parse::<f64>()
    } else {
        if trimmed.contains('.') {
            return None;
        }
        trimmed
            .replace(format.decimal_separator, ".")
            .parse::<f64>()
    };

    parsed.ok().filter(|v| v.is_finite())
}

/// Parse a `\`-separated multi-valued decimal string. Every component must
/// parse, otherwise `None`.
pub fn parse_decimal_list(value: &str, format: NumericFormat) -> Option<Vec<f64>> {
    value
        .split('\\')
        .map(|component| parse_decimal(component, format))
        .collect()
}

/// Parse exactly `N` components, e.g. an Image Position (Patient) triple.
pub fn parse_decimal_array<const N: usize>(value: &str, format: NumericFormat) -> Option<[f64; N]> {
    let values = parse_decimal_list(value, format)?;
    values.try_into().ok()
}

/// Round every component of a `\`-separated decimal string to
/// `decimal_places` places. Components that do not parse are kept verbatim.
pub fn cut_decimal_places(value: &str, decimal_places: u32, format: NumericFormat) -> String {
    let factor = 10f64.powi(decimal_places as i32);
    value
        .split('\\')
        .map(|component| match parse_decimal(component, format) {
            Some(number) => {
                let cut = (number * factor).round() / factor;
                // normalize -0 so that jitter around zero does not split groups
                let cut = if cut == 0.0 { 0.0 } else { cut };
                format!("{:.*}", decimal_places as usize, cut)
            }
            None => component.to_string(),
        })
        .collect::<Vec<_>>()
        .join("\\")
}
