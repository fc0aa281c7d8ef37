//! Late-field watcher.
//!
//! OTP fields often appear after the first render, once the site's API has
//! answered. The host reports inserted subtrees; the watcher records whether
//! one of them holds a plausible field. It never fills by itself.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::detect::is_likely_otp_field;
use crate::page::{ElementId, PageSnapshot};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Readiness {
    Idle,
    FieldSeen {
        element: ElementId,
        seen_at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LateField {
    pub element: ElementId,
    /// The inserted subtree root that contained the field.
    pub root: ElementId,
}

#[derive(Debug)]
pub struct MutationWatcher {
    readiness: Readiness,
}

impl Default for MutationWatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl MutationWatcher {
    pub fn new() -> Self {
        Self {
            readiness: Readiness::Idle,
        }
    }

    pub fn readiness(&self) -> &Readiness {
        &self.readiness
    }

    /// Inspects the inserted roots (and their descendants) in order. The
    /// first plausible field found updates readiness and is returned.
    pub fn observe(&mut self, snapshot: &PageSnapshot, inserted_roots: &[ElementId]) -> Option<LateField> {
        let found = inserted_roots.iter().find_map(|root| {
            let element = snapshot.get(*root)?;
            std::iter::once(element)
                .chain(snapshot.descendants(*root))
                .find(|candidate| candidate.is_input() && is_likely_otp_field(snapshot, candidate))
                .map(|field| LateField {
                    element: field.id,
                    root: *root,
                })
        })?;

        tracing::debug!(element = %found.element, root = %found.root, "Potential OTP field inserted");
        self.readiness = Readiness::FieldSeen {
            element: found.element,
            seen_at: Utc::now(),
        };
        Some(found)
    }

    /// Forgets a seen field, e.g. after a fill consumed it.
    pub fn reset(&mut self) {
        self.readiness = Readiness::Idle;
    }
}
