//! Strategy 4: last resort when nothing on the page is labelled.

use super::{Confidence, DetectOptions, FieldCandidate, Strategy};
use crate::page::{Element, ElementId, PageSnapshot};

pub(super) fn detect(
    page: &PageSnapshot,
    code_len: usize,
    options: &DetectOptions,
) -> Option<FieldCandidate> {
    let visible: Vec<&Element> = page
        .inputs()
        .filter(|element| element.is_plain_text_input() && element.is_visible())
        .collect();

    // Split fields are rewritten in place, so filled members do not disqualify
    // the group. That keeps a repeated fill with the same code idempotent.
    if visible.len() == options.canonical_split_len
        && visible.iter().all(|element| element.is_editable())
    {
        let ids: Vec<ElementId> = visible.iter().map(|element| element.id).collect();
        return Some(FieldCandidate::split(
            ids,
            Confidence::Low,
            Strategy::LastResortSplit,
        ));
    }

    page.inputs()
        .filter(|element| element.is_plain_text_input() && element.is_visible())
        .find(|element| {
            element.is_empty()
                && element.is_editable()
                && element
                    .max_length()
                    .map(|max| max >= code_len)
                    .unwrap_or(true)
        })
        .map(|element| {
            FieldCandidate::single(element.id, Confidence::Low, Strategy::LastResortSingle)
        })
}
