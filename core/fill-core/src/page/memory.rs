//! In-memory page used by offline runs and tests.

use std::collections::BTreeMap;

use super::{Element, ElementId, PageContext, PageSnapshot};
use crate::error::{FillError, Result};
use crate::script::{DomEvent, HighlightStyle, Overlay, PageOp};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchedEvent {
    pub element: ElementId,
    pub event: DomEvent,
}

/// A page backed by a [`PageSnapshot`] that records every applied op.
#[derive(Debug, Clone, Default)]
pub struct MemoryPage {
    dom: PageSnapshot,
    focused: Option<ElementId>,
    events: Vec<DispatchedEvent>,
    highlights: BTreeMap<ElementId, HighlightStyle>,
    overlays: Vec<Overlay>,
    reject_writes: bool,
}

impl MemoryPage {
    pub fn new(dom: PageSnapshot) -> Self {
        Self {
            dom,
            ..Self::default()
        }
    }

    pub fn dom(&self) -> &PageSnapshot {
        &self.dom
    }

    /// Simulates a page script inserting an element after load.
    pub fn insert(&mut self, parent: Option<ElementId>, element: Element) -> ElementId {
        self.dom.push(parent, element)
    }

    /// Makes every subsequent `SetValue` fail, as a page that blocks scripted input would.
    pub fn set_reject_writes(&mut self, reject: bool) {
        self.reject_writes = reject;
    }

    pub fn value(&self, id: ElementId) -> Option<&str> {
        self.dom.get(id).map(|element| element.value.as_str())
    }

    pub fn focused(&self) -> Option<ElementId> {
        self.focused
    }

    pub fn events(&self) -> &[DispatchedEvent] {
        &self.events
    }

    pub fn events_for(&self, id: ElementId) -> Vec<DomEvent> {
        self.events
            .iter()
            .filter(|dispatched| dispatched.element == id)
            .map(|dispatched| dispatched.event)
            .collect()
    }

    pub fn highlight(&self, id: ElementId) -> Option<HighlightStyle> {
        self.highlights.get(&id).copied()
    }

    pub fn highlighted(&self) -> impl Iterator<Item = ElementId> + '_ {
        self.highlights.keys().copied()
    }

    pub fn overlays(&self) -> &[Overlay] {
        &self.overlays
    }

    fn element_mut(&mut self, id: ElementId) -> Result<&mut Element> {
        self.dom.get_mut(id).ok_or(FillError::UnknownElement(id))
    }

    fn require(&self, id: ElementId) -> Result<()> {
        self.dom
            .get(id)
            .map(|_| ())
            .ok_or(FillError::UnknownElement(id))
    }
}

impl PageContext for MemoryPage {
    fn snapshot(&self) -> Result<PageSnapshot> {
        Ok(self.dom.clone())
    }

    fn apply(&mut self, op: &PageOp) -> Result<()> {
        match op {
            PageOp::Focus { element } => {
                self.require(*element)?;
                self.focused = Some(*element);
            }
            PageOp::SetValue { element, value } => {
                let reject = self.reject_writes;
                let target = self.element_mut(*element)?;
                if reject {
                    return Err(FillError::WriteRejected {
                        element: *element,
                        reason: "page blocked scripted input".to_string(),
                    });
                }
                if target.disabled {
                    return Err(FillError::WriteRejected {
                        element: *element,
                        reason: "element is disabled".to_string(),
                    });
                }
                target.value = value.clone();
            }
            PageOp::Dispatch { element, event } => {
                self.require(*element)?;
                self.events.push(DispatchedEvent {
                    element: *element,
                    event: *event,
                });
            }
            PageOp::Highlight { element, style } => {
                self.require(*element)?;
                self.highlights.insert(*element, *style);
            }
            PageOp::ClearHighlight { element } => {
                self.highlights.remove(element);
            }
            PageOp::ShowOverlay { overlay } => {
                self.overlays
                    .retain(|existing| existing.kind() != overlay.kind());
                self.overlays.push(overlay.clone());
            }
            PageOp::DismissOverlay { kind } => {
                self.overlays.retain(|existing| existing.kind() != *kind);
            }
        }
        Ok(())
    }
}
