//! On-page visual feedback for fill attempts.
//!
//! Success highlights the filled fields and the submit-like control, then
//! reverts them; a banner confirms the fill. Failure shows a panel carrying
//! the raw code so the user can copy it by hand. All reverts and dismissals
//! are deferred ops, owned by the script's effect scope.

use std::time::Duration;

use crate::detect::{CandidateKind, FieldCandidate};
use crate::page::{Element, ElementId, PageSnapshot};
use crate::patterns::{RE_SUBMIT_CLASS, RE_SUBMIT_TEXT};
use crate::script::{HighlightStyle, Overlay, OverlayKind, PageOp, TimedOp};

pub const SUCCESS_MESSAGE: &str = "OTP auto-filled successfully";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeedbackTimings {
    pub highlight: Duration,
    pub banner: Duration,
    pub copy_panel: Duration,
}

impl Default for FeedbackTimings {
    fn default() -> Self {
        Self {
            highlight: Duration::from_millis(2000),
            banner: Duration::from_millis(3000),
            copy_panel: Duration::from_millis(10_000),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum SubmitRule {
    SubmitType,
    ButtonText,
    ButtonClass,
}

impl SubmitRule {
    const ORDER: [SubmitRule; 3] = [
        SubmitRule::SubmitType,
        SubmitRule::ButtonText,
        SubmitRule::ButtonClass,
    ];

    fn matches(self, page: &PageSnapshot, element: &Element) -> bool {
        match self {
            SubmitRule::SubmitType => {
                (element.is_button() || element.is_input())
                    && element
                        .attr("type")
                        .map(|value| value.trim().eq_ignore_ascii_case("submit"))
                        .unwrap_or(false)
            }
            SubmitRule::ButtonText => {
                element.is_button() && RE_SUBMIT_TEXT.is_match(&page.text_content(element.id))
            }
            SubmitRule::ButtonClass => {
                element.is_button()
                    && element
                        .attr("class")
                        .map(|class| RE_SUBMIT_CLASS.is_match(class))
                        .unwrap_or(false)
            }
        }
    }
}

/// First submit-like control inside the viewport. Rules are tried in order:
/// submit type, button wording, button class.
pub fn find_submit_control(page: &PageSnapshot) -> Option<ElementId> {
    SubmitRule::ORDER.iter().find_map(|rule| {
        page.elements()
            .iter()
            .filter(|element| !element.style_hidden && page.is_in_viewport(element))
            .find(|element| rule.matches(page, element))
            .map(|element| element.id)
    })
}

/// Highlights for a successful fill, plus their deferred reverts.
pub fn success_ops(
    page: &PageSnapshot,
    candidate: &FieldCandidate,
    timings: &FeedbackTimings,
) -> (Vec<TimedOp>, Vec<TimedOp>) {
    let field_style = match candidate.kind {
        CandidateKind::SingleField => HighlightStyle::Field,
        CandidateKind::SplitFields => HighlightStyle::FieldPulse,
    };

    let mut highlighted: Vec<(ElementId, HighlightStyle)> = candidate
        .elements
        .iter()
        .map(|element| (*element, field_style))
        .collect();
    if let Some(submit) = find_submit_control(page) {
        if !candidate.elements.contains(&submit) {
            highlighted.push((submit, HighlightStyle::SubmitGlow));
        }
    }

    let mut now = Vec::new();
    let mut deferred = Vec::new();
    for (element, style) in highlighted {
        now.push(TimedOp::now(PageOp::Highlight { element, style }));
        deferred.push(TimedOp::after(
            timings.highlight,
            PageOp::ClearHighlight { element },
        ));
    }

    now.push(TimedOp::now(PageOp::ShowOverlay {
        overlay: Overlay::SuccessBanner {
            message: SUCCESS_MESSAGE.to_string(),
        },
    }));
    deferred.push(TimedOp::after(
        timings.banner,
        PageOp::DismissOverlay {
            kind: OverlayKind::SuccessBanner,
        },
    ));

    (now, deferred)
}

/// The copy-to-clipboard panel shown when no field could be filled.
pub fn failure_ops(code: &str, timings: &FeedbackTimings) -> (Vec<TimedOp>, Vec<TimedOp>) {
    (
        vec![TimedOp::now(PageOp::ShowOverlay {
            overlay: Overlay::CopyPanel {
                code: code.to_string(),
            },
        })],
        vec![TimedOp::after(
            timings.copy_panel,
            PageOp::DismissOverlay {
                kind: OverlayKind::CopyPanel,
            },
        )],
    )
}
