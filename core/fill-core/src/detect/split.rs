//! Strategy 1: split fields, one input per character.

use std::collections::HashSet;

use super::{is_valid_otp_field, Confidence, DetectOptions, FieldCandidate, Strategy};
use crate::page::{Element, ElementId, PageSnapshot};

const CONTAINER_TAGS: &[&str] = &["div", "section", "form", "fieldset"];

/// Ranking among split candidates: confidence first, then whether the group
/// size equals the code length. Ties keep document order.
type Rank = (Confidence, bool);

pub(super) fn detect(
    page: &PageSnapshot,
    code_len: usize,
    options: &DetectOptions,
) -> Option<FieldCandidate> {
    let mut best: Option<(Rank, FieldCandidate)> = None;
    let mut seen: HashSet<Vec<ElementId>> = HashSet::new();

    for container in page
        .elements()
        .iter()
        .filter(|element| CONTAINER_TAGS.contains(&element.tag.as_str()))
    {
        let members: Vec<&Element> = page
            .descendants(container.id)
            .into_iter()
            .filter(|element| element.is_text_entry())
            .collect();
        if !options.split_range.contains(&members.len()) {
            continue;
        }

        // Nested wrappers around the same inputs describe the same group.
        let ids: Vec<ElementId> = members.iter().map(|element| element.id).collect();
        if !seen.insert(ids.clone()) {
            continue;
        }

        if !forms_row(&members, options.row_tolerance_px) {
            continue;
        }

        let confidence = if members.len() == options.canonical_split_len {
            Confidence::High
        } else {
            Confidence::Medium
        };
        consider(
            &mut best,
            FieldCandidate::split(ids, confidence, Strategy::SplitRow),
            code_len,
        );
    }

    for group in adjacent_groups(page) {
        if !options.split_range.contains(&group.len()) {
            continue;
        }
        if !same_input_type(&group) || !group.iter().all(|element| is_valid_otp_field(element)) {
            continue;
        }
        let ids: Vec<ElementId> = group.iter().map(|element| element.id).collect();
        if seen.contains(&ids) {
            continue;
        }
        consider(
            &mut best,
            FieldCandidate::split(ids, Confidence::Low, Strategy::SplitAdjacent),
            code_len,
        );
    }

    best.map(|(_, candidate)| candidate)
}

fn consider(best: &mut Option<(Rank, FieldCandidate)>, candidate: FieldCandidate, code_len: usize) {
    let rank = (candidate.confidence, candidate.elements.len() == code_len);
    let replace = match best {
        Some((current, _)) => rank > *current,
        None => true,
    };
    if replace {
        *best = Some((rank, candidate));
    }
}

/// Every member is a usable field and all top edges sit within `tolerance`.
fn forms_row(members: &[&Element], tolerance: f64) -> bool {
    if members.is_empty() || !members.iter().all(|element| is_valid_otp_field(element)) {
        return false;
    }
    let tops = members.iter().map(|element| element.rect.top());
    let (min, max) = tops.fold((f64::INFINITY, f64::NEG_INFINITY), |(min, max), top| {
        (min.min(top), max.max(top))
    });
    max - min <= tolerance
}

fn same_input_type(group: &[&Element]) -> bool {
    let Some(first) = group.first() else {
        return false;
    };
    let input_type = first.input_type();
    group.iter().all(|element| element.input_type() == input_type)
}

fn is_single_char_like(element: &Element) -> bool {
    if !element.is_input() {
        return false;
    }
    if element.max_length() == Some(1) || element.size() == Some(1) {
        return true;
    }
    matches!(element.input_type().as_str(), "text" | "number") && element.max_length().is_none()
}

/// Groups inputs by walking forward over `maxlength=1` element siblings.
fn adjacent_groups(page: &PageSnapshot) -> Vec<Vec<&Element>> {
    let mut groups = Vec::new();
    let mut used: HashSet<ElementId> = HashSet::new();

    for input in page.inputs().filter(|element| is_single_char_like(element)) {
        if used.contains(&input.id) {
            continue;
        }
        let mut group = vec![input];
        used.insert(input.id);

        let mut next = page.next_sibling(input.id);
        while let Some(sibling) = next {
            if sibling.is_input() && sibling.max_length() == Some(1) {
                group.push(sibling);
                used.insert(sibling.id);
                next = page.next_sibling(sibling.id);
            } else {
                break;
            }
        }
        groups.push(group);
    }

    groups
}
