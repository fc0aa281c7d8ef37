//! Fill scripts: ordered, timed page operations.
//!
//! A fill attempt is planned as a [`FillScript`]. The `commit` half writes the
//! code and must run to completion in order; its delays only stagger focus
//! moves. The `deferred` half reverts visual effects and dismisses overlays.
//! Deferred ops live in an [`EffectScope`] so that the next fill attempt can
//! supersede them instead of racing them.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::page::ElementId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomEvent {
    Input,
    Change,
    KeyDown { key: char },
    KeyUp { key: Option<char> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HighlightStyle {
    /// Green background on a filled single field.
    Field,
    /// Green background plus a slight scale-up on each split field.
    FieldPulse,
    /// Glow around the detected submit control.
    SubmitGlow,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Overlay {
    SuccessBanner { message: String },
    CopyPanel { code: String },
}

impl Overlay {
    pub fn kind(&self) -> OverlayKind {
        match self {
            Overlay::SuccessBanner { .. } => OverlayKind::SuccessBanner,
            Overlay::CopyPanel { .. } => OverlayKind::CopyPanel,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlayKind {
    SuccessBanner,
    CopyPanel,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum PageOp {
    Focus {
        element: ElementId,
    },
    SetValue {
        element: ElementId,
        value: String,
    },
    Dispatch {
        element: ElementId,
        event: DomEvent,
    },
    Highlight {
        element: ElementId,
        style: HighlightStyle,
    },
    ClearHighlight {
        element: ElementId,
    },
    ShowOverlay {
        overlay: Overlay,
    },
    DismissOverlay {
        kind: OverlayKind,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimedOp {
    /// Offset from the start of the script.
    #[serde(with = "millis")]
    pub delay: Duration,
    pub op: PageOp,
}

impl TimedOp {
    pub fn now(op: PageOp) -> Self {
        Self {
            delay: Duration::ZERO,
            op,
        }
    }

    pub fn after(delay: Duration, op: PageOp) -> Self {
        Self { delay, op }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Generation(pub u64);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FillScript {
    pub generation: Generation,
    pub commit: Vec<TimedOp>,
    pub deferred: Vec<TimedOp>,
}

impl FillScript {
    pub fn new(generation: Generation) -> Self {
        Self {
            generation,
            commit: Vec::new(),
            deferred: Vec::new(),
        }
    }

    /// Sorts both halves by delay; ops sharing a delay keep insertion order.
    pub fn finish(mut self) -> Self {
        self.commit.sort_by_key(|op| op.delay);
        self.deferred.sort_by_key(|op| op.delay);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.commit.is_empty() && self.deferred.is_empty()
    }
}

/// Writes one code into a single field: value, then input/change/keyup.
pub fn single_field_ops(element: ElementId, code: &str) -> Vec<TimedOp> {
    vec![
        TimedOp::now(PageOp::Focus { element }),
        TimedOp::now(PageOp::SetValue {
            element,
            value: code.to_string(),
        }),
        TimedOp::now(PageOp::Dispatch {
            element,
            event: DomEvent::Input,
        }),
        TimedOp::now(PageOp::Dispatch {
            element,
            event: DomEvent::Change,
        }),
        TimedOp::now(PageOp::Dispatch {
            element,
            event: DomEvent::KeyUp { key: None },
        }),
    ]
}

/// Writes one character per field, left to right. Extra characters are
/// ignored; extra fields are left untouched. Focus advances to the next field
/// `stagger * (i + 1)` after the writes.
pub fn split_field_ops(elements: &[ElementId], code: &str, stagger: Duration) -> Vec<TimedOp> {
    let mut ops = Vec::new();
    for (index, (&element, digit)) in elements.iter().zip(code.chars()).enumerate() {
        ops.push(TimedOp::now(PageOp::SetValue {
            element,
            value: String::new(),
        }));
        ops.push(TimedOp::now(PageOp::SetValue {
            element,
            value: digit.to_string(),
        }));
        for event in [
            DomEvent::Input,
            DomEvent::Change,
            DomEvent::KeyDown { key: digit },
            DomEvent::KeyUp { key: Some(digit) },
        ] {
            ops.push(TimedOp::now(PageOp::Dispatch { element, event }));
        }

        if index + 1 < elements.len() {
            let step = u32::try_from(index + 1).unwrap_or(u32::MAX);
            ops.push(TimedOp::after(
                stagger.saturating_mul(step),
                PageOp::Focus {
                    element: elements[index + 1],
                },
            ));
        }
    }

    ops
}

/// Pending deferred effects of the most recent script.
#[derive(Debug, Default)]
pub struct EffectScope {
    generation: Option<Generation>,
    pending: Vec<TimedOp>,
}

impl EffectScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs the deferred ops of `script`, returning the ops of the superseded
    /// scope. Callers apply the returned ops immediately, before the new commit.
    pub fn supersede(&mut self, script: &FillScript) -> Vec<PageOp> {
        let stale = self.flush();
        self.generation = Some(script.generation);
        self.pending = script.deferred.clone();
        self.pending.sort_by_key(|op| op.delay);
        stale
    }

    /// Ops whose delay has elapsed since the current script started.
    pub fn take_due(&mut self, elapsed: Duration) -> Vec<PageOp> {
        let split = self
            .pending
            .iter()
            .position(|op| op.delay > elapsed)
            .unwrap_or(self.pending.len());
        self.pending.drain(..split).map(|op| op.op).collect()
    }

    /// Delay (from script start) of the next pending op.
    pub fn next_deadline(&self) -> Option<Duration> {
        self.pending.first().map(|op| op.delay)
    }

    /// Drains everything still pending, in delay order.
    pub fn flush(&mut self) -> Vec<PageOp> {
        self.pending.drain(..).map(|op| op.op).collect()
    }

    pub fn generation(&self) -> Option<Generation> {
        self.generation
    }

    pub fn is_idle(&self) -> bool {
        self.pending.is_empty()
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
