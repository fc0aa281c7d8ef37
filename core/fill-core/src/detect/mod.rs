//! OTP field detection.
//!
//! Detection is an ordered strategy chain over a [`PageSnapshot`]; the first
//! strategy that yields a candidate wins:
//!
//! 1. [`split`]: a horizontal row (or sibling run) of 4–8 single-character fields
//! 2. [`labelled`]: a single field whose attributes name it as a code field
//! 3. [`generic`]: a numeric field with OTP wording nearby
//! 4. [`fallback`]: exactly the canonical number of visible text fields, or
//!    any empty field that can hold the code
//!
//! Candidates are computed fresh for every attempt and never cached: the page
//! is assumed to have changed since the last look.

mod fallback;
mod generic;
mod labelled;
mod split;

pub use generic::is_likely_otp_field;

use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;

use crate::page::{Element, ElementId, PageSnapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Fields in one container whose top edges line up.
    SplitRow,
    /// Run of `maxlength=1` sibling inputs.
    SplitAdjacent,
    /// Attribute keywords, `autocomplete=one-time-code`, short fixed lengths.
    Labelled,
    /// Numeric field with OTP wording in its surrounding text.
    GenericNumeric,
    /// Exactly the canonical count of visible text fields.
    LastResortSplit,
    /// Any empty field that can hold the code.
    LastResortSingle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateKind {
    SingleField,
    SplitFields,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldCandidate {
    pub elements: Vec<ElementId>,
    pub kind: CandidateKind,
    pub confidence: Confidence,
    pub strategy: Strategy,
}

impl FieldCandidate {
    pub fn single(element: ElementId, confidence: Confidence, strategy: Strategy) -> Self {
        Self {
            elements: vec![element],
            kind: CandidateKind::SingleField,
            confidence,
            strategy,
        }
    }

    pub fn split(elements: Vec<ElementId>, confidence: Confidence, strategy: Strategy) -> Self {
        Self {
            elements,
            kind: CandidateKind::SplitFields,
            confidence,
            strategy,
        }
    }

    pub fn describe(&self, page: &PageSnapshot) -> String {
        match self.kind {
            CandidateKind::SingleField => self
                .elements
                .first()
                .and_then(|id| page.get(*id))
                .map(Element::describe)
                .unwrap_or_else(|| "unknown field".to_string()),
            CandidateKind::SplitFields => {
                let container = self
                    .elements
                    .first()
                    .and_then(|id| page.get(*id))
                    .and_then(|element| element.parent)
                    .and_then(|parent| page.get(parent))
                    .map(|parent| format!(" in {}", parent.describe()))
                    .unwrap_or_default();
                format!("{} split fields{}", self.elements.len(), container)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectOptions {
    /// Maximum spread of top edges within a split row, in CSS pixels.
    pub row_tolerance_px: f64,
    /// The common split-field count, ranked above other sizes.
    pub canonical_split_len: usize,
    pub split_range: RangeInclusive<usize>,
}

impl Default for DetectOptions {
    fn default() -> Self {
        Self {
            row_tolerance_px: 20.0,
            canonical_split_len: 6,
            split_range: 4..=8,
        }
    }
}

/// Runs the strategy chain. `code_len` is the length of the normalized code.
pub fn detect(
    page: &PageSnapshot,
    code_len: usize,
    options: &DetectOptions,
) -> Option<FieldCandidate> {
    let candidate = split::detect(page, code_len, options)
        .or_else(|| labelled::detect(page, options))
        .or_else(|| generic::detect(page, options))
        .or_else(|| fallback::detect(page, code_len, options));

    match &candidate {
        Some(candidate) => tracing::debug!(
            strategy = ?candidate.strategy,
            confidence = ?candidate.confidence,
            fields = candidate.elements.len(),
            "OTP target detected"
        ),
        None => tracing::debug!(inputs = page.inputs().count(), "No OTP target detected"),
    }

    candidate
}

/// An empty, visible, enabled, writable input.
pub fn is_valid_otp_field(element: &Element) -> bool {
    element.is_input()
        && element.is_text_entry()
        && element.is_empty()
        && element.is_editable()
        && element.is_visible()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confidence_orders_high_above_low() {
        assert!(Confidence::High > Confidence::Medium);
        assert!(Confidence::Medium > Confidence::Low);
    }

    #[test]
    fn valid_field_requires_empty_visible_enabled() {
        let field = Element::new("input").with_rect(0.0, 0.0, 80.0, 30.0);
        assert!(is_valid_otp_field(&field));
        assert!(!is_valid_otp_field(&field.clone().with_value("1")));
        assert!(!is_valid_otp_field(&field.clone().disabled()));
        assert!(!is_valid_otp_field(&field.clone().readonly()));
        assert!(!is_valid_otp_field(&field.clone().style_hidden()));
        assert!(!is_valid_otp_field(
            &field.clone().with_rect(0.0, 0.0, 0.0, 0.0)
        ));
        assert!(!is_valid_otp_field(&field.with_attr("type", "hidden")));
    }

    #[test]
    fn empty_page_has_no_candidate() {
        let page = PageSnapshot::default();
        assert!(detect(&page, 6, &DetectOptions::default()).is_none());
    }
}
