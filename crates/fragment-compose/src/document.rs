//! The page being composed.
//!
//! A `Document` owns the parsed `scraper::Html`, the aggregate status code,
//! and the discovery latch. It is shared (`Arc<Document>`) between the tasks
//! that resolve fragments; the tree is only mutated through
//! [`Document::replace_fragment`] and [`Document::append_head`], both under
//! the document lock.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, RwLock};

use ego_tree::NodeId;
use scraper::node::Element;
use scraper::{Html, Node, Selector};

use crate::dom::{self, DomError};
use crate::error::{ComposeError, ComposeResult};
use crate::fragment::{Fragment, Placeholder};

/// Default aggregate status of a page.
pub const DEFAULT_STATUS: u16 = 200;

/// Every placeholder shape: `<fragment>` anywhere, `<script type="fragment">`
/// only inside `<head>`.
const PLACEHOLDER_SELECTOR: &str = r#"fragment, head script[type="fragment" i]"#;

/// Exclusive handle to one placeholder node.
///
/// Only [`Document::discover`] creates slots and it hands out at most one per
/// node, so two fragments can never splice into the same place.
#[derive(Debug, PartialEq, Eq)]
pub struct Slot {
    node: NodeId,
}

impl Slot {
    pub fn node(&self) -> NodeId {
        self.node
    }
}

pub struct Document {
    html: Mutex<Html>,
    status_code: RwLock<u16>,
    discovered: AtomicBool,
}

impl Document {
    /// Parse raw HTML. HTML parsing is error tolerant, so any string yields
    /// a document (with `<html>`, `<head>` and `<body>` synthesized).
    pub fn parse(raw: &str) -> Self {
        Self::from_html(Html::parse_document(raw))
    }

    /// Parse raw bytes, which must be UTF-8.
    pub fn from_bytes(raw: &[u8]) -> ComposeResult<Self> {
        let text = std::str::from_utf8(raw)
            .map_err(|e| ComposeError::Parse(format!("document is not valid UTF-8: {e}")))?;
        Ok(Self::parse(text))
    }

    pub fn from_html(html: Html) -> Self {
        Self {
            html: Mutex::new(html),
            status_code: RwLock::new(DEFAULT_STATUS),
            discovered: AtomicBool::new(false),
        }
    }

    /// Enumerate the fragments to resolve on the server, in document order.
    ///
    /// Deferred fragments are left for the browser and are not returned. A
    /// document can be discovered only once.
    pub fn discover(&self) -> ComposeResult<Vec<Fragment>> {
        if self.discovered.swap(true, Ordering::SeqCst) {
            return Err(ComposeError::AlreadyDiscovered);
        }
        let selector = Selector::parse(PLACEHOLDER_SELECTOR)
            .map_err(|e| ComposeError::Parse(format!("placeholder selector: {e}")))?;
        let html = self.html.lock().map_err(|_| ComposeError::Poisoned)?;
        let Some(root) = dom::root_element(&html) else {
            return Ok(Vec::new());
        };

        let mut fragments = Vec::new();
        let mut deferred = 0usize;
        for element in root.select(&selector) {
            let placeholder = if element.value().name() == "fragment" {
                Placeholder::Element
            } else {
                Placeholder::Script
            };
            let slot = Slot { node: element.id() };
            let fragment = Fragment::from_element(element.value(), placeholder, slot);
            if fragment.is_deferred() {
                deferred += 1;
                continue;
            }
            fragments.push(fragment);
        }

        tracing::debug!(found = fragments.len(), deferred, "discovered fragments");
        Ok(fragments)
    }

    /// Splice `markup` in place of the slot's placeholder.
    ///
    /// The markup is parsed before the lock is taken. A slot whose node was
    /// already removed by an enclosing fragment's replacement is left alone.
    pub fn replace_fragment(&self, slot: &Slot, markup: &str) -> ComposeResult<()> {
        let replacement = Html::parse_fragment(markup);
        let mut html = self.html.lock().map_err(|_| ComposeError::Poisoned)?;
        match dom::replace_with_fragment(&mut html.tree, slot.node, &replacement) {
            Ok(()) => Ok(()),
            Err(DomError::Detached(_)) => {
                tracing::debug!(node = ?slot.node, "placeholder no longer in the tree, skipping splice");
                Ok(())
            }
            Err(e) => Err(ComposeError::Serialization(e.to_string())),
        }
    }

    /// Append nodes to `<head>`, creating it if the tree has none.
    pub fn append_head(&self, nodes: &[Element]) -> ComposeResult<()> {
        if nodes.is_empty() {
            return Ok(());
        }
        let mut html = self.html.lock().map_err(|_| ComposeError::Poisoned)?;
        let head = match dom::find_element(&html.tree, "head") {
            Some(head) => head,
            None => {
                let parent = dom::root_element(&html)
                    .map(|el| el.id())
                    .unwrap_or_else(|| html.tree.root().id());
                let mut parent = html
                    .tree
                    .get_mut(parent)
                    .ok_or_else(|| ComposeError::Serialization("document root missing".into()))?;
                parent.prepend(Node::Element(dom::element("head", &[]))).id()
            }
        };

        let mut head = html
            .tree
            .get_mut(head)
            .ok_or_else(|| ComposeError::Serialization("head element missing".into()))?;
        for node in nodes {
            head.append(Node::Element(node.clone()));
        }
        Ok(())
    }

    pub fn set_status_code(&self, code: u16) {
        match self.status_code.write() {
            Ok(mut status) => *status = code,
            Err(poisoned) => *poisoned.into_inner() = code,
        }
    }

    pub fn status_code(&self) -> u16 {
        match self.status_code.read() {
            Ok(status) => *status,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Serialize the composed page.
    pub fn render(&self) -> ComposeResult<String> {
        let html = self
            .html
            .lock()
            .map_err(|_| ComposeError::Serialization("document lock poisoned".into()))?;
        Ok(dom::serialize(&html))
    }

    /// Run `f` with access to the parsed tree.
    pub fn with_html<R>(&self, f: impl FnOnce(&Html) -> R) -> ComposeResult<R> {
        let html = self.html.lock().map_err(|_| ComposeError::Poisoned)?;
        Ok(f(&html))
    }
}
