//! In-page capture: turns the current selection and page into a
//! [`CaptureRecord`].
//!
//! Capturing is a pure read. The only page mutation that ever happens
//! around a capture is the cosmetic flash done by the notifier.

use crate::dom::{Document, NodeId, Selection};
use crate::models::{CaptureRecord, CONTEXT_MAX_CHARS};

/// Host seam for "whatever the page currently shows".
pub trait SelectionSource: Send + Sync {
    fn read(&self) -> CaptureRecord;

    /// The live range behind the record, when the source has one.
    fn selection(&self) -> Option<Selection> {
        None
    }
}

/// Selector over a parsed page snapshot.
#[derive(Debug, Clone)]
pub struct PageSelector {
    doc: Document,
    url: String,
    selection: Option<Selection>,
    note: Option<String>,
    location: Option<String>,
}

impl PageSelector {
    pub fn new(doc: Document, url: impl Into<String>) -> Self {
        Self {
            doc,
            url: url.into(),
            selection: None,
            note: None,
            location: None,
        }
    }

    pub fn with_selection(mut self, selection: Selection) -> Self {
        self.selection = Some(selection);
        self
    }

    /// Select the first occurrence of `needle`. Returns false, leaving the
    /// selection empty, if the text is not on the page.
    pub fn select_text(&mut self, needle: &str) -> bool {
        self.selection = Selection::find(&self.doc, needle);
        self.selection.is_some()
    }

    pub fn with_note(mut self, note: Option<String>) -> Self {
        self.note = note;
        self
    }

    pub fn with_location(mut self, location: Option<String>) -> Self {
        self.location = location;
        self
    }

    pub fn capture(&self) -> CaptureRecord {
        let selection_text = self
            .selection
            .filter(|s| !s.is_collapsed())
            .map(|s| s.text(&self.doc).trim().to_string())
            .unwrap_or_default();

        let surrounding_context = match self.selection {
            Some(sel) if !selection_text.is_empty() => {
                Some(surrounding_context(&self.doc, sel.common_ancestor(&self.doc)))
            }
            _ => None,
        };

        CaptureRecord {
            selection_text,
            page_title: self.doc.title(),
            page_url: self.url.clone(),
            page_content: page_content(&self.doc),
            surrounding_context,
            note: self.note.clone(),
            location: self.location.clone(),
        }
    }
}

impl SelectionSource for PageSelector {
    fn read(&self) -> CaptureRecord {
        self.capture()
    }

    fn selection(&self) -> Option<Selection> {
        self.selection.filter(|s| !s.is_collapsed())
    }
}

/// A record assembled elsewhere, served as-is.
impl SelectionSource for CaptureRecord {
    fn read(&self) -> CaptureRecord {
        self.clone()
    }
}

/// Text of the element enclosing the range, cut to [`CONTEXT_MAX_CHARS`].
/// A text-node container contributes its parent element's text.
fn surrounding_context(doc: &Document, container: NodeId) -> String {
    let element = if doc.is_text(container) {
        doc.parent(container).and_then(|p| doc.element_ancestor(p))
    } else {
        Some(container)
    };
    element
        .map(|e| doc.text_content(e))
        .unwrap_or_default()
        .chars()
        .take(CONTEXT_MAX_CHARS)
        .collect()
}

fn page_content(doc: &Document) -> String {
    let root = doc.body().unwrap_or(Document::ROOT);
    let rendered = doc.inner_text(root);
    if rendered.is_empty() {
        doc.text_content(root).trim().to_string()
    } else {
        rendered
    }
}
