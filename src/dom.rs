//! Page snapshots: a small arena DOM built from HTML/XHTML markup.
//!
//! The selector needs parent links, document order, and element text, not
//! a full browser DOM. Markup is read with `quick-xml` in a lenient mode:
//! mismatched end tags close the nearest matching open element, void
//! elements never take children, and text inside `script`, `style`,
//! `noscript` and `template` is dropped.

use quick_xml::events::Event;
use quick_xml::Reader;
use std::borrow::Cow;

pub type NodeId = usize;

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

const HIDDEN_ELEMENTS: &[&str] = &["script", "style", "noscript", "template"];

const BLOCK_ELEMENTS: &[&str] = &[
    "address", "article", "aside", "blockquote", "body", "dd", "div", "dl", "dt", "figcaption",
    "figure", "footer", "form", "h1", "h2", "h3", "h4", "h5", "h6", "header", "hr", "li", "main",
    "nav", "ol", "p", "pre", "section", "table", "tbody", "td", "tfoot", "th", "thead", "tr",
    "ul",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    Element { tag: String },
    Text(String),
}

#[derive(Debug, Clone)]
pub struct Node {
    pub kind: NodeKind,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
}

/// Parsed page. Node `0` is the synthetic document root.
#[derive(Debug, Clone)]
pub struct Document {
    nodes: Vec<Node>,
}

impl Default for Document {
    fn default() -> Self {
        Self {
            nodes: vec![Node {
                kind: NodeKind::Element {
                    tag: "#document".to_string(),
                },
                parent: None,
                children: Vec::new(),
            }],
        }
    }
}

impl Document {
    pub const ROOT: NodeId = 0;

    /// Parse markup into a node tree. Never fails: malformed input yields
    /// whatever structure could be recovered.
    pub fn parse(markup: &str) -> Self {
        let mut doc = Document::default();
        let mut reader = Reader::from_str(markup);
        reader.config_mut().check_end_names = false;
        reader.config_mut().trim_text(false);

        // Open elements, innermost last.
        let mut stack: Vec<(NodeId, String)> = vec![(Self::ROOT, "#document".to_string())];
        let mut hidden_depth = 0usize;

        loop {
            let before = reader.buffer_position();
            match reader.read_event() {
                Ok(Event::Start(e)) => {
                    let tag = tag_name(e.name().as_ref());
                    let parent = stack.last().map(|(id, _)| *id).unwrap_or(Self::ROOT);
                    let id = doc.push(parent, NodeKind::Element { tag: tag.clone() });
                    if VOID_ELEMENTS.contains(&tag.as_str()) {
                        continue;
                    }
                    if HIDDEN_ELEMENTS.contains(&tag.as_str()) {
                        hidden_depth += 1;
                    }
                    stack.push((id, tag));
                }
                Ok(Event::Empty(e)) => {
                    let tag = tag_name(e.name().as_ref());
                    let parent = stack.last().map(|(id, _)| *id).unwrap_or(Self::ROOT);
                    doc.push(parent, NodeKind::Element { tag });
                }
                Ok(Event::End(e)) => {
                    let tag = tag_name(e.name().as_ref());
                    // Close up to the nearest matching open element; stray
                    // end tags are ignored.
                    if let Some(pos) = stack.iter().rposition(|(_, open)| *open == tag) {
                        if pos == 0 {
                            continue;
                        }
                        for (_, closed) in stack.drain(pos..) {
                            if HIDDEN_ELEMENTS.contains(&closed.as_str()) {
                                hidden_depth = hidden_depth.saturating_sub(1);
                            }
                        }
                    }
                }
                Ok(Event::Text(t)) => {
                    if hidden_depth > 0 {
                        continue;
                    }
                    let text = match t.unescape_with(html_entity) {
                        Ok(s) => s.into_owned(),
                        Err(_) => String::from_utf8_lossy(&t).into_owned(),
                    };
                    doc.push_text(&stack, text);
                }
                Ok(Event::CData(c)) => {
                    if hidden_depth > 0 {
                        continue;
                    }
                    let text = String::from_utf8_lossy(&c).into_owned();
                    doc.push_text(&stack, text);
                }
                Ok(Event::Eof) => break,
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!("page snapshot: recovering from markup error: {}", e);
                    if reader.buffer_position() == before {
                        break;
                    }
                }
            }
        }

        doc
    }

    fn push(&mut self, parent: NodeId, kind: NodeKind) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(Node {
            kind,
            parent: Some(parent),
            children: Vec::new(),
        });
        self.nodes[parent].children.push(id);
        id
    }

    fn push_text(&mut self, stack: &[(NodeId, String)], text: String) {
        if text.is_empty() {
            return;
        }
        let parent = stack.last().map(|(id, _)| *id).unwrap_or(Self::ROOT);
        self.push(parent, NodeKind::Text(text));
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn is_text(&self, id: NodeId) -> bool {
        matches!(self.node(id).map(|n| &n.kind), Some(NodeKind::Text(_)))
    }

    pub fn tag(&self, id: NodeId) -> Option<&str> {
        match self.node(id).map(|n| &n.kind) {
            Some(NodeKind::Element { tag }) => Some(tag.as_str()),
            _ => None,
        }
    }

    pub fn text(&self, id: NodeId) -> Option<&str> {
        match self.node(id).map(|n| &n.kind) {
            Some(NodeKind::Text(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).and_then(|n| n.parent)
    }

    /// Nearest element that is `id` itself or one of its ancestors.
    pub fn element_ancestor(&self, id: NodeId) -> Option<NodeId> {
        if self.tag(id).is_some() {
            return Some(id);
        }
        let mut cur = self.parent(id);
        while let Some(p) = cur {
            if self.tag(p).is_some() {
                return Some(p);
            }
            cur = self.parent(p);
        }
        None
    }

    /// `id` followed by its ancestors up to the root.
    pub fn ancestors(&self, id: NodeId) -> Vec<NodeId> {
        let mut chain = vec![id];
        let mut cur = self.parent(id);
        while let Some(p) = cur {
            chain.push(p);
            cur = self.parent(p);
        }
        chain
    }

    /// Deepest node containing both `a` and `b` (inclusive).
    pub fn common_ancestor(&self, a: NodeId, b: NodeId) -> NodeId {
        let chain_b = self.ancestors(b);
        self.ancestors(a)
            .into_iter()
            .find(|n| chain_b.contains(n))
            .unwrap_or(Self::ROOT)
    }

    /// First element with the given tag in document order.
    pub fn find_element(&self, tag: &str) -> Option<NodeId> {
        self.descendants(Self::ROOT)
            .into_iter()
            .find(|&id| self.tag(id) == Some(tag))
    }

    /// Descendants of `id` in document order, `id` excluded.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut pending: Vec<NodeId> = match self.node(id) {
            Some(n) => n.children.iter().rev().copied().collect(),
            None => return out,
        };
        while let Some(next) = pending.pop() {
            out.push(next);
            if let Some(n) = self.node(next) {
                pending.extend(n.children.iter().rev().copied());
            }
        }
        out
    }

    /// All text nodes in document order.
    pub fn text_nodes(&self) -> Vec<NodeId> {
        self.descendants(Self::ROOT)
            .into_iter()
            .filter(|&id| self.is_text(id))
            .collect()
    }

    /// Concatenated raw text of `id` and its descendants, like `textContent`.
    pub fn text_content(&self, id: NodeId) -> String {
        if let Some(text) = self.text(id) {
            return text.to_string();
        }
        self.descendants(id)
            .into_iter()
            .filter_map(|n| self.text(n))
            .collect()
    }

    /// Rendered text of `id`: whitespace collapsed, block elements and
    /// `<br>` on their own lines, blank lines removed. Approximates
    /// `innerText` without layout.
    pub fn inner_text(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.render_text(id, &mut out);
        out.lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn render_text(&self, id: NodeId, out: &mut String) {
        let Some(node) = self.node(id) else { return };
        match &node.kind {
            NodeKind::Text(s) => out.push_str(&collapse_whitespace(s)),
            NodeKind::Element { tag } => {
                if tag == "br" {
                    out.push('\n');
                    return;
                }
                if tag == "head" || tag == "title" {
                    return;
                }
                let block = BLOCK_ELEMENTS.contains(&tag.as_str());
                if block {
                    out.push('\n');
                }
                for &child in &node.children {
                    self.render_text(child, out);
                }
                if block {
                    out.push('\n');
                }
            }
        }
    }

    /// Contents of the first `<title>`, whitespace collapsed.
    pub fn title(&self) -> String {
        self.find_element("title")
            .map(|t| collapse_whitespace(&self.text_content(t)).trim().to_string())
            .unwrap_or_default()
    }

    pub fn body(&self) -> Option<NodeId> {
        self.find_element("body")
    }
}

fn tag_name(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).to_ascii_lowercase()
}

fn collapse_whitespace(s: &str) -> Cow<'_, str> {
    if !s.chars().any(|c| c.is_whitespace() && c != ' ') && !s.contains("  ") {
        return Cow::Borrowed(s);
    }
    let mut out = String::with_capacity(s.len());
    let mut in_ws = false;
    for c in s.chars() {
        if c.is_whitespace() && c != '\u{a0}' {
            if !in_ws {
                out.push(' ');
            }
            in_ws = true;
        } else {
            out.push(c);
            in_ws = false;
        }
    }
    Cow::Owned(out)
}

fn html_entity(name: &str) -> Option<&'static str> {
    Some(match name {
        "lt" => "<",
        "gt" => ">",
        "amp" => "&",
        "quot" => "\"",
        "apos" => "'",
        "nbsp" => "\u{a0}",
        "mdash" => "\u{2014}",
        "ndash" => "\u{2013}",
        "hellip" => "\u{2026}",
        "lsquo" => "\u{2018}",
        "rsquo" => "\u{2019}",
        "ldquo" => "\u{201c}",
        "rdquo" => "\u{201d}",
        "copy" => "\u{a9}",
        _ => return None,
    })
}

/// A point inside a text node, counted in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Boundary {
    pub node: NodeId,
    pub offset: usize,
}

/// A selection range between two text positions, start before end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selection {
    pub start: Boundary,
    pub end: Boundary,
}

impl Selection {
    /// Build a range, rejecting boundaries that are not inside text nodes
    /// or that are out of order.
    pub fn new(doc: &Document, start: Boundary, end: Boundary) -> Option<Self> {
        let start_len = doc.text(start.node)?.chars().count();
        let end_len = doc.text(end.node)?.chars().count();
        if start.offset > start_len || end.offset > end_len {
            return None;
        }
        let order = doc.text_nodes();
        let si = order.iter().position(|&n| n == start.node)?;
        let ei = order.iter().position(|&n| n == end.node)?;
        if si > ei || (si == ei && start.offset > end.offset) {
            return None;
        }
        Some(Self { start, end })
    }

    /// Range over the first occurrence of `needle` in the document text.
    pub fn find(doc: &Document, needle: &str) -> Option<Self> {
        if needle.is_empty() {
            return None;
        }
        let nodes = doc.text_nodes();
        let mut haystack = String::new();
        // (node, first char index in haystack, char length)
        let mut spans = Vec::with_capacity(nodes.len());
        let mut chars = 0usize;
        for &n in &nodes {
            let text = doc.text(n).unwrap_or_default();
            let len = text.chars().count();
            spans.push((n, chars, len));
            haystack.push_str(text);
            chars += len;
        }

        let byte = haystack.find(needle)?;
        let start_char = haystack[..byte].chars().count();
        let end_char = start_char + needle.chars().count();

        let start = spans
            .iter()
            .find(|(_, s, len)| start_char >= *s && start_char < s + len)
            .map(|&(node, s, _)| Boundary {
                node,
                offset: start_char - s,
            })?;
        let end = spans
            .iter()
            .find(|(_, s, len)| end_char > *s && end_char <= s + len)
            .map(|&(node, s, _)| Boundary {
                node,
                offset: end_char - s,
            })?;
        Some(Self { start, end })
    }

    pub fn is_collapsed(&self) -> bool {
        self.start == self.end
    }

    /// Selected text, untrimmed, like `Selection.toString()`.
    pub fn text(&self, doc: &Document) -> String {
        let order = doc.text_nodes();
        let Some(si) = order.iter().position(|&n| n == self.start.node) else {
            return String::new();
        };
        let Some(ei) = order.iter().position(|&n| n == self.end.node) else {
            return String::new();
        };

        let mut out = String::new();
        for (i, &node) in order.iter().enumerate().take(ei + 1).skip(si) {
            let text = doc.text(node).unwrap_or_default();
            let from = if i == si { self.start.offset } else { 0 };
            let to = if i == ei {
                self.end.offset
            } else {
                text.chars().count()
            };
            out.extend(text.chars().skip(from).take(to.saturating_sub(from)));
        }
        out
    }

    /// The `commonAncestorContainer` of the range.
    pub fn common_ancestor(&self, doc: &Document) -> NodeId {
        doc.common_ancestor(self.start.node, self.end.node)
    }
}
