//! Serializable page snapshots.
//!
//! The host page context captures the live DOM into a [`PageSnapshot`]: a flat
//! list of elements in document order with parent links, attributes, current
//! values and layout boxes. Detection runs against the snapshot only, so the
//! heuristics are deterministic and testable without a rendering engine.
//!
//! Writes flow back through a [`PageContext`], which applies [`PageOp`]s to the
//! real page (or to a [`MemoryPage`] in tests and offline runs).

mod memory;

pub use memory::{DispatchedEvent, MemoryPage};

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex};

use crate::error::{FillError, Result};
use crate::script::PageOp;

const DEFAULT_VIEWPORT_HEIGHT: f64 = 900.0;

/// Input types that never take typed text.
const NON_TEXT_INPUT_TYPES: &[&str] = &[
    "hidden", "submit", "button", "reset", "checkbox", "radio", "image", "file", "range", "color",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ElementId(pub u32);

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn top(&self) -> f64 {
        self.y
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }

    pub fn has_area(&self) -> bool {
        self.width > 0.0 && self.height > 0.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Element {
    pub id: ElementId,
    /// Lowercase tag name (`input`, `div`, `button`, ...).
    pub tag: String,
    #[serde(default)]
    pub parent: Option<ElementId>,
    #[serde(default)]
    pub attrs: BTreeMap<String, String>,
    /// Current `value` property for form controls.
    #[serde(default)]
    pub value: String,
    /// Own text, excluding descendants.
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub rect: Rect,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub readonly: bool,
    /// Computed `display: none` or `visibility: hidden`.
    #[serde(default)]
    pub style_hidden: bool,
}

impl Element {
    pub fn new(tag: &str) -> Self {
        Self {
            id: ElementId(0),
            tag: tag.to_ascii_lowercase(),
            parent: None,
            attrs: BTreeMap::new(),
            value: String::new(),
            text: String::new(),
            rect: Rect::default(),
            disabled: false,
            readonly: false,
            style_hidden: false,
        }
    }

    pub fn with_attr(mut self, name: &str, value: &str) -> Self {
        self.attrs
            .insert(name.to_ascii_lowercase(), value.to_string());
        self
    }

    pub fn with_rect(mut self, x: f64, y: f64, width: f64, height: f64) -> Self {
        self.rect = Rect::new(x, y, width, height);
        self
    }

    pub fn with_value(mut self, value: &str) -> Self {
        self.value = value.to_string();
        self
    }

    pub fn with_text(mut self, text: &str) -> Self {
        self.text = text.to_string();
        self
    }

    pub fn disabled(mut self) -> Self {
        self.disabled = true;
        self
    }

    pub fn readonly(mut self) -> Self {
        self.readonly = true;
        self
    }

    pub fn style_hidden(mut self) -> Self {
        self.style_hidden = true;
        self
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn is_input(&self) -> bool {
        self.tag == "input"
    }

    pub fn is_button(&self) -> bool {
        self.tag == "button"
    }

    /// Effective input type; missing or empty `type` behaves as `text`.
    pub fn input_type(&self) -> String {
        match self.attr("type").map(str::trim) {
            Some(value) if !value.is_empty() => value.to_ascii_lowercase(),
            _ => "text".to_string(),
        }
    }

    pub fn max_length(&self) -> Option<usize> {
        self.attr("maxlength")
            .and_then(|value| value.trim().parse::<usize>().ok())
    }

    pub fn size(&self) -> Option<usize> {
        self.attr("size")
            .and_then(|value| value.trim().parse::<usize>().ok())
    }

    /// An `input` that accepts typed characters.
    pub fn is_text_entry(&self) -> bool {
        self.is_input() && !NON_TEXT_INPUT_TYPES.contains(&self.input_type().as_str())
    }

    /// Plain text-like inputs used by the last-resort scan.
    pub fn is_plain_text_input(&self) -> bool {
        self.is_input() && matches!(self.input_type().as_str(), "text" | "number" | "tel")
    }

    pub fn has_numeric_intent(&self) -> bool {
        if !self.is_input() {
            return false;
        }
        let input_type = self.input_type();
        input_type == "number"
            || input_type == "tel"
            || self
                .attr("inputmode")
                .map(|mode| mode.eq_ignore_ascii_case("numeric"))
                .unwrap_or(false)
    }

    /// Has a non-zero layout box.
    pub fn is_rendered(&self) -> bool {
        self.rect.has_area()
    }

    pub fn is_visible(&self) -> bool {
        self.is_rendered() && !self.style_hidden
    }

    pub fn is_editable(&self) -> bool {
        !self.disabled && !self.readonly && self.input_type() != "hidden"
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }

    /// Short selector-like label for logs and outcomes, e.g. `input#otp[name=code]`.
    pub fn describe(&self) -> String {
        let mut label = self.tag.clone();
        if let Some(id) = self.attr("id").filter(|value| !value.is_empty()) {
            label.push('#');
            label.push_str(id);
        }
        if let Some(name) = self.attr("name").filter(|value| !value.is_empty()) {
            label.push_str(&format!("[name={}]", name));
        }
        label
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageSnapshot {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_viewport_height")]
    pub viewport_height: f64,
    #[serde(default)]
    elements: Vec<Element>,
    #[serde(skip)]
    index: IndexCache,
}

fn default_viewport_height() -> f64 {
    DEFAULT_VIEWPORT_HEIGHT
}

impl Default for PageSnapshot {
    fn default() -> Self {
        Self {
            url: None,
            viewport_height: DEFAULT_VIEWPORT_HEIGHT,
            elements: Vec::new(),
            index: IndexCache::default(),
        }
    }
}

/// Lookup tables over `elements`, built on first query.
#[derive(Debug)]
struct TreeIndex {
    /// First position of each id.
    positions: HashMap<ElementId, usize>,
    /// Positions of the elements under each parent link, in document order.
    children: HashMap<Option<ElementId>, Vec<usize>>,
}

impl TreeIndex {
    fn build(elements: &[Element]) -> Self {
        let mut index = TreeIndex {
            positions: HashMap::with_capacity(elements.len()),
            children: HashMap::new(),
        };
        for (position, element) in elements.iter().enumerate() {
            index.positions.entry(element.id).or_insert(position);
            index
                .children
                .entry(element.parent)
                .or_default()
                .push(position);
        }
        index
    }
}

/// Snapshot-owned index cache. Never part of equality or serialization.
#[derive(Default, Clone)]
struct IndexCache(OnceCell<Arc<TreeIndex>>);

impl fmt::Debug for IndexCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("IndexCache")
    }
}

impl PartialEq for IndexCache {
    fn eq(&self, _other: &Self) -> bool {
        true
    }
}

impl PageSnapshot {
    pub fn from_json(json: &str) -> Result<Self> {
        let snapshot: PageSnapshot =
            serde_json::from_str(json).map_err(|source| FillError::SnapshotJson { source })?;
        snapshot.validate()?;
        Ok(snapshot)
    }

    /// Snapshot over elements that already carry ids and parent links.
    pub fn from_elements(elements: Vec<Element>) -> Result<Self> {
        let snapshot = PageSnapshot {
            elements,
            ..PageSnapshot::default()
        };
        snapshot.validate()?;
        Ok(snapshot)
    }

    /// Checks that ids are unique and every parent link resolves to an earlier element.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for element in &self.elements {
            if let Some(parent) = element.parent {
                if !seen.contains(&parent) {
                    return Err(FillError::InvalidSnapshot(format!(
                        "element {} references parent {} that does not precede it",
                        element.id, parent
                    )));
                }
            }
            if !seen.insert(element.id) {
                return Err(FillError::InvalidSnapshot(format!(
                    "duplicate element id {}",
                    element.id
                )));
            }
        }
        Ok(())
    }

    /// All elements in document order.
    pub fn elements(&self) -> &[Element] {
        &self.elements
    }

    /// Appends an element under `parent`, assigning the next free id.
    pub fn push(&mut self, parent: Option<ElementId>, mut element: Element) -> ElementId {
        let id = self.next_free_id();
        element.id = id;
        element.parent = parent;

        // Keep document order: a child lands after its parent's last descendant.
        let insert_at = match parent {
            Some(parent) => match self.position(parent) {
                Some(at) => self
                    .descendant_positions(parent)
                    .last()
                    .map_or(at, |last| *last)
                    + 1,
                None => self.elements.len(),
            },
            None => self.elements.len(),
        };
        self.elements.insert(insert_at, element);
        self.index = IndexCache::default();
        id
    }

    fn next_free_id(&self) -> ElementId {
        let max = self.elements.iter().map(|element| element.id.0).max();
        if let Some(next) = max.map_or(Some(0), |max| max.checked_add(1)) {
            return ElementId(next);
        }
        // Ids run up to u32::MAX; reuse the lowest gap.
        let used: HashSet<u32> = self.elements.iter().map(|element| element.id.0).collect();
        ElementId((0..u32::MAX).find(|id| !used.contains(id)).unwrap_or(u32::MAX))
    }

    fn index(&self) -> &TreeIndex {
        self.index
            .0
            .get_or_init(|| Arc::new(TreeIndex::build(&self.elements)))
    }

    pub fn get(&self, id: ElementId) -> Option<&Element> {
        self.position(id).map(|position| &self.elements[position])
    }

    /// Mutable access drops the index, since the caller may relink the element.
    pub fn get_mut(&mut self, id: ElementId) -> Option<&mut Element> {
        let position = self.position(id)?;
        self.index = IndexCache::default();
        self.elements.get_mut(position)
    }

    fn position(&self, id: ElementId) -> Option<usize> {
        self.index().positions.get(&id).copied()
    }

    pub fn inputs(&self) -> impl Iterator<Item = &Element> {
        self.elements.iter().filter(|element| element.is_input())
    }

    pub fn children(&self, id: ElementId) -> impl Iterator<Item = &Element> {
        self.index()
            .children
            .get(&Some(id))
            .map(Vec::as_slice)
            .unwrap_or_default()
            .iter()
            .map(move |position| &self.elements[*position])
    }

    /// The following element sibling (`nextElementSibling`).
    pub fn next_sibling(&self, id: ElementId) -> Option<&Element> {
        let start = self.position(id)?;
        let siblings = self.index().children.get(&self.elements[start].parent)?;
        let after = siblings.partition_point(|position| *position <= start);
        siblings.get(after).map(|position| &self.elements[*position])
    }

    pub fn is_descendant_of(&self, id: ElementId, ancestor: ElementId) -> bool {
        let mut current = self.get(id).and_then(|element| element.parent);
        let mut hops = 0;
        while let Some(parent) = current {
            if parent == ancestor {
                return true;
            }
            hops += 1;
            if hops > self.elements.len() {
                return false;
            }
            current = self.get(parent).and_then(|element| element.parent);
        }
        false
    }

    /// Positions under `id`, sorted. Only links that point backwards are
    /// followed, so a malformed snapshot cannot loop.
    fn descendant_positions(&self, id: ElementId) -> Vec<usize> {
        let index = self.index();
        let Some(&root) = index.positions.get(&id) else {
            return Vec::new();
        };
        let mut found = Vec::new();
        let mut stack = vec![root];
        while let Some(position) = stack.pop() {
            let Some(children) = index.children.get(&Some(self.elements[position].id)) else {
                continue;
            };
            for &child in children.iter().filter(|child| **child > position) {
                found.push(child);
                stack.push(child);
            }
        }
        found.sort_unstable();
        found.dedup();
        found
    }

    /// Descendants of `id` in document order, excluding `id` itself.
    pub fn descendants(&self, id: ElementId) -> Vec<&Element> {
        self.descendant_positions(id)
            .into_iter()
            .map(|position| &self.elements[position])
            .collect()
    }

    /// Nearest element (starting at `id` itself) whose tag is in `tags`.
    pub fn closest(&self, id: ElementId, tags: &[&str]) -> Option<&Element> {
        let mut current = self.get(id);
        let mut hops = 0;
        while let Some(element) = current {
            if tags.contains(&element.tag.as_str()) {
                return Some(element);
            }
            hops += 1;
            if hops > self.elements.len() {
                return None;
            }
            current = element.parent.and_then(|parent| self.get(parent));
        }
        None
    }

    /// `textContent` of an element: its own text plus all descendant text.
    pub fn text_content(&self, id: ElementId) -> String {
        let mut parts = Vec::new();
        if let Some(element) = self.get(id) {
            if !element.text.is_empty() {
                parts.push(element.text.as_str());
            }
        }
        for element in self.descendants(id) {
            if !element.text.is_empty() {
                parts.push(element.text.as_str());
            }
        }
        parts.join(" ")
    }

    /// Rendered and inside the vertical viewport.
    pub fn is_in_viewport(&self, element: &Element) -> bool {
        element.is_rendered()
            && element.rect.top() < self.viewport_height
            && element.rect.bottom() > 0.0
    }
}

/// The page-side boundary: read the DOM, apply scripted writes.
pub trait PageContext {
    fn snapshot(&self) -> Result<PageSnapshot>;
    fn apply(&mut self, op: &PageOp) -> Result<()>;
}

impl<P: PageContext> PageContext for Arc<Mutex<P>> {
    fn snapshot(&self) -> Result<PageSnapshot> {
        let page = self
            .lock()
            .map_err(|_| FillError::PageUnavailable("page lock poisoned".to_string()))?;
        page.snapshot()
    }

    fn apply(&mut self, op: &PageOp) -> Result<()> {
        let mut page = self
            .lock()
            .map_err(|_| FillError::PageUnavailable("page lock poisoned".to_string()))?;
        page.apply(op)
    }
}

impl<P: PageContext + ?Sized> PageContext for Box<P> {
    fn snapshot(&self) -> Result<PageSnapshot> {
        (**self).snapshot()
    }

    fn apply(&mut self, op: &PageOp) -> Result<()> {
        (**self).apply(op)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form_page() -> (PageSnapshot, ElementId, ElementId, ElementId) {
        let mut page = PageSnapshot::default();
        let form = page.push(None, Element::new("form").with_text("Enter the code"));
        let first = page.push(
            Some(form),
            Element::new("input")
                .with_attr("maxlength", "1")
                .with_rect(0.0, 100.0, 40.0, 40.0),
        );
        let second = page.push(
            Some(form),
            Element::new("input")
                .with_attr("maxlength", "1")
                .with_rect(50.0, 100.0, 40.0, 40.0),
        );
        (page, form, first, second)
    }

    #[test]
    fn push_keeps_children_after_parent() {
        let (mut page, form, _, _) = form_page();
        let footer = page.push(None, Element::new("footer"));
        let late = page.push(Some(form), Element::new("button").with_text("Verify"));

        let order: Vec<_> = page.elements().iter().map(|element| element.id).collect();
        let late_index = order.iter().position(|id| *id == late).unwrap();
        let footer_index = order.iter().position(|id| *id == footer).unwrap();
        assert!(late_index < footer_index);
        assert!(page.validate().is_ok());
    }

    #[test]
    fn tree_queries_follow_parent_links() {
        let (page, form, first, second) = form_page();
        assert_eq!(page.next_sibling(first).map(|e| e.id), Some(second));
        assert_eq!(page.next_sibling(second), None);
        assert_eq!(page.children(form).count(), 2);
        assert_eq!(page.closest(first, &["form"]).map(|e| e.id), Some(form));
        assert_eq!(page.text_content(form), "Enter the code");
    }

    #[test]
    fn descendants_follow_document_order_after_late_pushes() {
        let (mut page, form, first, second) = form_page();
        let wrapper = page.push(Some(form), Element::new("div"));
        let nested = page.push(Some(wrapper), Element::new("span").with_text("digits"));
        page.push(None, Element::new("footer").with_text("help"));

        let ids: Vec<_> = page.descendants(form).iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![first, second, wrapper, nested]);
        assert!(page.is_descendant_of(nested, form));
        assert_eq!(page.text_content(form), "Enter the code digits");
        assert_eq!(page.next_sibling(form).map(|e| e.tag.as_str()), Some("footer"));
    }

    #[test]
    fn relinking_through_get_mut_refreshes_queries() {
        let (mut page, form, first, second) = form_page();
        assert_eq!(page.children(form).count(), 2);

        page.get_mut(second).unwrap().parent = Some(first);

        assert_eq!(page.children(form).count(), 1);
        assert_eq!(page.children(first).map(|e| e.id).collect::<Vec<_>>(), vec![second]);
        assert_eq!(page.next_sibling(first), None);
    }

    #[test]
    fn push_after_max_id_reuses_a_free_id() {
        let mut top = Element::new("form");
        top.id = ElementId(u32::MAX);
        let mut page = PageSnapshot::from_elements(vec![top]).unwrap();

        let child = page.push(Some(ElementId(u32::MAX)), Element::new("input"));

        assert_eq!(child, ElementId(0));
        assert_eq!(page.get(child).unwrap().parent, Some(ElementId(u32::MAX)));
        assert!(page.validate().is_ok());
    }

    #[test]
    fn input_type_defaults_to_text() {
        let input = Element::new("INPUT");
        assert_eq!(input.tag, "input");
        assert_eq!(input.input_type(), "text");
        assert!(input.is_text_entry());
        assert!(!Element::new("input").with_attr("type", "hidden").is_text_entry());
    }

    #[test]
    fn attribute_lookup_ignores_case() {
        let mut input = Element::new("input");
        input
            .attrs
            .insert("autoComplete".to_string(), "one-time-code".to_string());
        assert_eq!(input.attr("autocomplete"), Some("one-time-code"));
    }

    #[test]
    fn validate_rejects_dangling_parent() {
        let mut orphan = Element::new("input");
        orphan.id = ElementId(1);
        orphan.parent = Some(ElementId(42));
        assert!(matches!(
            PageSnapshot::from_elements(vec![orphan]),
            Err(FillError::InvalidSnapshot(_))
        ));
    }

    #[test]
    fn snapshot_parses_from_json() {
        let json = r#"{
            "url": "https://example.test/verify",
            "elements": [
                {"id": 0, "tag": "form"},
                {"id": 1, "tag": "input", "parent": 0,
                 "attrs": {"name": "otp", "maxlength": "6"},
                 "rect": {"x": 0, "y": 10, "width": 120, "height": 30}}
            ]
        }"#;
        let page = PageSnapshot::from_json(json).unwrap();
        assert_eq!(page.viewport_height, DEFAULT_VIEWPORT_HEIGHT);
        let input = page.get(ElementId(1)).unwrap();
        assert_eq!(input.max_length(), Some(6));
        assert_eq!(input.describe(), "input[name=otp]");
    }
}
