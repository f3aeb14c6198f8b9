//! Helpers over `scraper`'s tree: building head elements, splicing a parsed
//! fragment in place of a node, and serializing a whole document.
//!
//! Every walk here is iterative, so nesting depth in markup from a fragment
//! origin is bounded by the heap and never by the thread stack.

use ego_tree::{NodeId, NodeRef, Tree};
use html5ever::tendril::StrTendril;
use html5ever::{Attribute, LocalName, Namespace, QualName};
use scraper::node::{Doctype, Element};
use scraper::{ElementRef, Html, Node};

const HTML_NAMESPACE: &str = "http://www.w3.org/1999/xhtml";

/// Structural failures of tree operations.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DomError {
    /// The id does not address a node of this tree.
    #[error("unknown node {0:?}")]
    UnknownNode(NodeId),

    /// The node is no longer reachable from the document root.
    #[error("node {0:?} is detached")]
    Detached(NodeId),
}

/// Build an HTML element. Names are lower-cased; a repeated attribute keeps
/// its last value.
pub fn element(name: &str, attrs: &[(String, String)]) -> Element {
    let attrs = attrs
        .iter()
        .map(|(key, value)| Attribute {
            name: QualName::new(None, Namespace::from(""), LocalName::from(key.to_ascii_lowercase())),
            value: StrTendril::from_slice(value),
        })
        .collect();
    Element::new(
        QualName::new(
            None,
            Namespace::from(HTML_NAMESPACE),
            LocalName::from(name.to_ascii_lowercase()),
        ),
        attrs,
    )
}

/// Whether `node` can still be reached from the root of its tree.
pub fn is_attached(node: NodeRef<'_, Node>) -> bool {
    let root = node.tree().root().id();
    match node.ancestors().last() {
        Some(top) => top.id() == root,
        None => node.id() == root,
    }
}

/// First element named `name`, in document order.
pub fn find_element(tree: &Tree<Node>, name: &str) -> Option<NodeId> {
    tree.root()
        .descendants()
        .find(|node| node.value().as_element().is_some_and(|el| el.name() == name))
        .map(|node| node.id())
}

/// The top-level `<html>` element of a parse.
pub fn root_element(html: &Html) -> Option<ElementRef<'_>> {
    html.tree.root().children().find_map(ElementRef::wrap)
}

/// Replace `target` with the top-level nodes of `fragment`, in order.
///
/// `fragment` comes from [`Html::parse_fragment`]; the synthetic `<html>`
/// wrapper the parser adds is skipped. The target is detached, not freed,
/// so ids handed out earlier stay valid.
pub fn replace_with_fragment(
    tree: &mut Tree<Node>,
    target: NodeId,
    fragment: &Html,
) -> Result<(), DomError> {
    let attached = match tree.get(target) {
        Some(node) => node.parent().is_some() && is_attached(node),
        None => return Err(DomError::UnknownNode(target)),
    };
    if !attached {
        return Err(DomError::Detached(target));
    }

    // (node in `fragment`, its copy in `tree`) pairs whose children still
    // need copying.
    let mut pending: Vec<(NodeId, NodeId)> = Vec::new();

    if let Some(wrapper) = root_element(fragment) {
        for child in wrapper.children() {
            let mut anchor = tree.get_mut(target).ok_or(DomError::UnknownNode(target))?;
            let copy = anchor.insert_before(child.value().clone()).id();
            pending.push((child.id(), copy));
        }
    }

    while let Some((source, dest)) = pending.pop() {
        let Some(source) = fragment.tree.get(source) else {
            continue;
        };
        for child in source.children() {
            let mut parent = tree.get_mut(dest).ok_or(DomError::UnknownNode(dest))?;
            let copy = parent.append(child.value().clone()).id();
            pending.push((child.id(), copy));
        }
    }

    if let Some(mut node) = tree.get_mut(target) {
        node.detach();
    }
    Ok(())
}

/// Serialize a parsed document.
///
/// Elements go through html5ever's serializer. The doctype is written here
/// because html5ever only emits its name, which would drop public and
/// system identifiers and change the page's rendering mode.
pub fn serialize(html: &Html) -> String {
    let mut out = String::new();
    for child in html.tree.root().children() {
        match child.value() {
            Node::Doctype(doctype) => write_doctype(&mut out, doctype),
            Node::Comment(comment) => {
                out.push_str("<!--");
                out.push_str(comment);
                out.push_str("-->");
            }
            Node::Element(_) => {
                if let Some(element) = ElementRef::wrap(child) {
                    out.push_str(&element.html());
                }
            }
            _ => {}
        }
    }
    out
}

fn write_doctype(out: &mut String, doctype: &Doctype) {
    out.push_str("<!DOCTYPE ");
    out.push_str(doctype.name());
    let public_id = doctype.public_id();
    let system_id = doctype.system_id();
    if !public_id.is_empty() {
        out.push_str(" PUBLIC \"");
        out.push_str(public_id);
        out.push('"');
        if !system_id.is_empty() {
            out.push_str(" \"");
            out.push_str(system_id);
            out.push('"');
        }
    } else if !system_id.is_empty() {
        out.push_str(" SYSTEM \"");
        out.push_str(system_id);
        out.push('"');
    }
    out.push('>');
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_document_roundtrip_keeps_structure() {
        let src = "<!DOCTYPE html><html><head><title>T</title></head><body><p>a &amp; b</p></body></html>";
        assert_eq!(serialize(&Html::parse_document(src)), src);
    }

    #[test]
    fn test_legacy_doctype_is_preserved() {
        let html = Html::parse_document(
            r#"<!DOCTYPE HTML PUBLIC "-//W3C//DTD HTML 4.01 Transitional//EN" "http://www.w3.org/TR/html4/loose.dtd"><p>x</p>"#,
        );
        assert!(serialize(&html).starts_with(
            r#"<!DOCTYPE html PUBLIC "-//W3C//DTD HTML 4.01 Transitional//EN" "http://www.w3.org/TR/html4/loose.dtd">"#
        ));
    }

    #[test]
    fn test_foreign_attribute_prefix_is_preserved() {
        let html = Html::parse_document(r##"<body><svg><use xlink:href="#icon"></use></svg></body>"##);
        assert!(serialize(&html).contains(r##"<use xlink:href="#icon">"##));
    }

    #[test]
    fn test_script_text_is_not_escaped() {
        let html = Html::parse_document("<html><head><script>if (a < b) {}</script></head></html>");
        assert!(serialize(&html).contains("<script>if (a < b) {}</script>"));
    }

    #[test]
    fn test_comments_around_root_survive() {
        let html = Html::parse_document("<!-- top --><html><body></body></html>");
        assert!(serialize(&html).starts_with("<!-- top --><html>"));
    }

    #[test]
    fn test_element_builder() {
        let el = element("LINK", &attrs(&[("href", "/b.css"), ("REL", "stylesheet")]));
        assert_eq!(el.name(), "link");
        assert_eq!(el.attr("href"), Some("/b.css"));
        assert_eq!(el.attr("rel"), Some("stylesheet"));
    }

    #[test]
    fn test_replace_with_fragment_splices_in_place() {
        let mut html = Html::parse_document(
            "<html><body><h1>x</h1><fragment>old</fragment><footer>f</footer></body></html>",
        );
        let target = find_element(&html.tree, "fragment").unwrap();
        let replacement = Html::parse_fragment("<div>new</div><span>two</span>");

        replace_with_fragment(&mut html.tree, target, &replacement).unwrap();
        let out = serialize(&html);
        assert!(out.contains("<h1>x</h1><div>new</div><span>two</span><footer>f</footer>"));
        assert!(!out.contains("old"));
        assert!(!is_attached(html.tree.get(target).unwrap()));
    }

    #[test]
    fn test_replace_detached_node_fails() {
        let mut html = Html::parse_document(
            r#"<html><body><fragment id="outer"><fragment id="inner"></fragment></fragment></body></html>"#,
        );
        let ids: Vec<NodeId> = html
            .tree
            .root()
            .descendants()
            .filter(|n| n.value().as_element().is_some_and(|e| e.name() == "fragment"))
            .map(|n| n.id())
            .collect();
        assert_eq!(ids.len(), 2);

        replace_with_fragment(&mut html.tree, ids[0], &Html::parse_fragment("<p>x</p>")).unwrap();
        // the inner fragment went away with its parent's subtree
        assert_eq!(
            replace_with_fragment(&mut html.tree, ids[1], &Html::parse_fragment("<p>y</p>")),
            Err(DomError::Detached(ids[1]))
        );
        assert_eq!(serialize(&html).matches("<p>").count(), 1);
    }

    #[test]
    fn test_replace_root_is_rejected() {
        let mut html = Html::parse_document("<p>x</p>");
        let root = html.tree.root().id();
        assert_eq!(
            replace_with_fragment(&mut html.tree, root, &Html::parse_fragment("y")),
            Err(DomError::Detached(root))
        );
    }

    #[test]
    fn test_deeply_nested_markup() {
        let depth = 20_000;
        let mut html = Html::parse_document("<html><body><fragment></fragment></body></html>");
        let target = find_element(&html.tree, "fragment").unwrap();
        let markup = format!("{}deep", "<object>".repeat(depth));

        replace_with_fragment(&mut html.tree, target, &Html::parse_fragment(&markup)).unwrap();
        let out = serialize(&html);
        assert_eq!(out.matches("<object>").count(), depth);
        assert!(out.contains("deep</object>"));
    }
}
