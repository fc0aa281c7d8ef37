//! Strategy 2: a single field labelled as a code field by its attributes.

use super::{is_valid_otp_field, Confidence, DetectOptions, FieldCandidate, Strategy};
use crate::page::{Element, PageSnapshot};
use crate::patterns::{
    contains_keyword, ARIA_LABEL_KEYWORDS, CLASS_KEYWORDS, ID_KEYWORDS, NAME_KEYWORDS,
    PLACEHOLDER_KEYWORDS, RE_NOT_OTP,
};

/// Attributes checked against [`RE_NOT_OTP`] before any rule applies.
const IDENTIFYING_ATTRS: &[&str] = &[
    "name",
    "id",
    "placeholder",
    "class",
    "aria-label",
    "autocomplete",
];

enum Rule {
    OneTimeCode,
    Keyword {
        attr: &'static str,
        keywords: &'static [&'static str],
    },
    ShortFixedLength,
}

/// Rules in priority order; every input is tried against a rule before the
/// next rule is considered.
const RULES: &[Rule] = &[
    Rule::OneTimeCode,
    Rule::Keyword {
        attr: "name",
        keywords: NAME_KEYWORDS,
    },
    Rule::Keyword {
        attr: "id",
        keywords: ID_KEYWORDS,
    },
    Rule::Keyword {
        attr: "placeholder",
        keywords: PLACEHOLDER_KEYWORDS,
    },
    Rule::ShortFixedLength,
    Rule::Keyword {
        attr: "class",
        keywords: CLASS_KEYWORDS,
    },
    Rule::Keyword {
        attr: "aria-label",
        keywords: ARIA_LABEL_KEYWORDS,
    },
];

impl Rule {
    fn matches(&self, element: &Element, options: &DetectOptions) -> bool {
        match self {
            Rule::OneTimeCode => element
                .attr("autocomplete")
                .map(|value| value.trim().eq_ignore_ascii_case("one-time-code"))
                .unwrap_or(false),
            Rule::Keyword { attr, keywords } => element
                .attr(attr)
                .map(|value| contains_keyword(value, keywords))
                .unwrap_or(false),
            Rule::ShortFixedLength => {
                element.is_plain_text_input()
                    && element
                        .max_length()
                        .map(|max| options.split_range.contains(&max))
                        .unwrap_or(false)
            }
        }
    }

    fn confidence(&self) -> Confidence {
        match self {
            Rule::OneTimeCode => Confidence::High,
            Rule::Keyword { .. } => Confidence::Medium,
            Rule::ShortFixedLength => Confidence::Low,
        }
    }
}

fn looks_like_other_field(element: &Element) -> bool {
    IDENTIFYING_ATTRS.iter().any(|attr| {
        element
            .attr(attr)
            .map(|value| RE_NOT_OTP.is_match(value))
            .unwrap_or(false)
    })
}

pub(super) fn detect(page: &PageSnapshot, options: &DetectOptions) -> Option<FieldCandidate> {
    let usable: Vec<&Element> = page
        .inputs()
        .filter(|element| is_valid_otp_field(element) && !looks_like_other_field(element))
        .collect();

    RULES.iter().find_map(|rule| {
        usable
            .iter()
            .find(|element| rule.matches(element, options))
            .map(|element| FieldCandidate::single(element.id, rule.confidence(), Strategy::Labelled))
    })
}
