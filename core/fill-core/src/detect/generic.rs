//! Strategy 3: numeric-intent fields with OTP wording around them.

use super::{is_valid_otp_field, Confidence, DetectOptions, FieldCandidate, Strategy};
use crate::page::{Element, PageSnapshot};
use crate::patterns::{contains_keyword, CONTEXT_KEYWORDS, RE_NOT_OTP};

/// Ancestors whose text counts as the field's surrounding context.
const CONTEXT_TAGS: &[&str] = &["div", "form", "section"];

fn has_otp_context(page: &PageSnapshot, element: &Element) -> bool {
    page.closest(element.id, CONTEXT_TAGS)
        .map(|container| contains_keyword(&page.text_content(container.id), CONTEXT_KEYWORDS))
        .unwrap_or(false)
}

/// Whether a usable field looks like it takes a passcode: a short fixed
/// length, or OTP wording in its nearest container.
///
/// Used by the mutation watcher to decide if an inserted subtree is worth a
/// second look.
pub fn is_likely_otp_field(page: &PageSnapshot, element: &Element) -> bool {
    if !is_valid_otp_field(element) {
        return false;
    }
    let short = element
        .max_length()
        .map(|max| DetectOptions::default().split_range.contains(&max) || max == 1)
        .unwrap_or(false);
    short || has_otp_context(page, element)
}

pub(super) fn detect(page: &PageSnapshot, _options: &DetectOptions) -> Option<FieldCandidate> {
    page.inputs()
        .filter(|element| element.has_numeric_intent() && is_valid_otp_field(element))
        .filter(|element| {
            !element
                .attr("name")
                .map(|name| RE_NOT_OTP.is_match(name))
                .unwrap_or(false)
        })
        .find(|element| has_otp_context(page, element))
        .map(|element| {
            FieldCandidate::single(element.id, Confidence::Low, Strategy::GenericNumeric)
        })
}
