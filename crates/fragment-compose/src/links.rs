//! `Link` response header parsing and head-node synthesis.
//!
//! A fragment origin announces the assets its markup needs through the
//! `Link` header:
//!
//! ```text
//! Link: </a.js>; rel=script, </b.css>; rel=stylesheet; media="print"
//! ```
//!
//! Only `rel=script` and `rel=stylesheet` map to head nodes. Every other
//! relation is dropped; widening the mapping is a deliberate change to
//! [`to_nodes`].

use std::fmt;

use scraper::node::Element;

use crate::dom;

pub const REL_SCRIPT: &str = "script";
pub const REL_STYLESHEET: &str = "stylesheet";

/// One entry of a `Link` header.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Link {
    pub url: String,
    pub rel: String,
    /// Remaining `key=value` parameters in header order.
    pub params: Vec<(String, String)>,
}

impl Link {
    pub fn new(url: &str, rel: &str) -> Self {
        Self {
            url: url.to_string(),
            rel: rel.to_string(),
            params: Vec::new(),
        }
    }

    pub fn with_param(mut self, key: &str, value: &str) -> Self {
        self.set_param(key, value);
        self
    }

    fn set_param(&mut self, key: &str, value: &str) {
        if let Some(slot) = self.params.iter_mut().find(|(k, _)| k == key) {
            slot.1 = value.to_string();
        } else {
            self.params.push((key.to_string(), value.to_string()));
        }
    }

    pub fn is_rel(&self, rel: &str) -> bool {
        self.rel.eq_ignore_ascii_case(rel)
    }
}

impl fmt::Display for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}>", self.url)?;
        if !self.rel.is_empty() {
            write!(f, "; rel={}", self.rel)?;
        }
        for (key, value) in &self.params {
            if value.is_empty() {
                write!(f, "; {key}")?;
            } else {
                write!(f, "; {key}=\"{value}\"")?;
            }
        }
        Ok(())
    }
}

/// Parse a `Link` header value into its entries.
///
/// Entries are split on `,`, tokens within an entry on `;`. A `<...>` token
/// is the URL, `rel=...` sets the relation (quotes stripped), anything else
/// becomes a parameter. Entries without a URL are dropped.
pub fn parse(value: &str) -> Vec<Link> {
    let mut links = Vec::new();

    for chunk in value.split(',') {
        let mut link = Link::default();

        for part in chunk.split(';') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            if part.len() >= 2 && part.starts_with('<') && part.ends_with('>') {
                link.url = part.trim_matches(|c| c == '<' || c == '>').to_string();
                continue;
            }

            let (key, val) = parse_param(part);
            if key.is_empty() {
                continue;
            }
            if key.eq_ignore_ascii_case("rel") {
                link.rel = val.to_string();
                continue;
            }
            link.set_param(key, val);
        }

        if !link.url.is_empty() {
            links.push(link);
        }
    }

    links
}

fn parse_param(raw: &str) -> (&str, &str) {
    match raw.split_once('=') {
        Some((key, val)) => (key.trim(), val.trim().trim_matches('"')),
        None => (raw, ""),
    }
}

/// Render entries back into a single `Link` header value.
pub fn to_header(links: &[Link]) -> String {
    links
        .iter()
        .map(|l| l.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Entries whose relation is `rel` (case-insensitive).
pub fn filter_by_rel(links: &[Link], rel: &str) -> Vec<Link> {
    links.iter().filter(|l| l.is_rel(rel)).cloned().collect()
}

pub fn stylesheets(links: &[Link]) -> Vec<Link> {
    filter_by_rel(links, REL_STYLESHEET)
}

pub fn scripts(links: &[Link]) -> Vec<Link> {
    filter_by_rel(links, REL_SCRIPT)
}

/// Convert entries into head nodes, preserving order.
///
/// `rel=script` becomes `<script src=URL>`, `rel=stylesheet` becomes
/// `<link href=URL rel=stylesheet>`; remaining parameters are copied as
/// attributes, except ones that would overwrite the URL or the relation and
/// ones whose name is not a plain attribute token. Other relations produce
/// nothing.
pub fn to_nodes(links: &[Link]) -> Vec<Element> {
    let mut nodes = Vec::with_capacity(links.len());

    for link in links {
        let (name, mut attrs) = if link.is_rel(REL_SCRIPT) {
            ("script", vec![("src".to_string(), link.url.clone())])
        } else if link.is_rel(REL_STYLESHEET) {
            (
                "link",
                vec![
                    ("href".to_string(), link.url.clone()),
                    ("rel".to_string(), REL_STYLESHEET.to_string()),
                ],
            )
        } else {
            continue;
        };

        for (key, value) in &link.params {
            let reserved = attrs.iter().any(|(k, _)| k.eq_ignore_ascii_case(key));
            if reserved || !is_attribute_name(key) {
                tracing::debug!(url = %link.url, param = %key, "link parameter not copied");
                continue;
            }
            attrs.push((key.to_ascii_lowercase(), value.clone()));
        }
        nodes.push(dom::element(name, &attrs));
    }

    nodes
}

fn is_attribute_name(key: &str) -> bool {
    !key.is_empty()
        && key
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b':'))
}

/// Recover `Link` entries from head nodes built by [`to_nodes`].
pub fn from_nodes(nodes: &[Element]) -> Vec<Link> {
    nodes
        .iter()
        .filter_map(|node| {
            let (url_attr, rel) = match node.name() {
                "script" => ("src", REL_SCRIPT),
                "link" if node.attr("rel").is_some_and(|r| r.eq_ignore_ascii_case(REL_STYLESHEET)) => {
                    ("href", REL_STYLESHEET)
                }
                _ => return None,
            };
            let url = node.attr(url_attr)?;
            let mut link = Link::new(url, rel);
            for (key, value) in node.attrs() {
                if key.eq_ignore_ascii_case(url_attr) || key.eq_ignore_ascii_case("rel") {
                    continue;
                }
                link.set_param(key, value);
            }
            Some(link)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_script_and_stylesheet() {
        let links = parse("</a.js>; rel=script, </b.css>; rel=stylesheet");
        assert_eq!(links.len(), 2);
        assert_eq!(links[0].url, "/a.js");
        assert_eq!(links[0].rel, "script");
        assert_eq!(links[1].url, "/b.css");
        assert_eq!(links[1].rel, "stylesheet");
    }

    #[test]
    fn test_parse_quoted_rel_and_params() {
        let links = parse(r#"<https://cdn.example/app.css>; rel="stylesheet"; media="print"; crossorigin"#);
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].rel, "stylesheet");
        assert_eq!(
            links[0].params,
            vec![
                ("media".to_string(), "print".to_string()),
                ("crossorigin".to_string(), String::new()),
            ]
        );
    }

    #[test]
    fn test_entry_without_url_is_dropped() {
        let links = parse("rel=script, </ok.js>; rel=script, ; ,");
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].url, "/ok.js");
    }

    #[test]
    fn test_empty_header() {
        assert!(parse("").is_empty());
        assert!(to_nodes(&parse("")).is_empty());
    }

    #[test]
    fn test_to_nodes_maps_known_relations_in_order() {
        let nodes = to_nodes(&parse("</a.js>; rel=script, </b.css>; rel=stylesheet"));
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].name(), "script");
        assert_eq!(nodes[0].attr("src"), Some("/a.js"));
        assert_eq!(nodes[1].name(), "link");
        assert_eq!(nodes[1].attr("href"), Some("/b.css"));
        assert_eq!(nodes[1].attr("rel"), Some("stylesheet"));
    }

    #[test]
    fn test_to_nodes_drops_other_relations() {
        let nodes = to_nodes(&parse("</font.woff2>; rel=preload; as=font, </a.js>; rel=script"));
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].attr("src"), Some("/a.js"));
    }

    #[test]
    fn test_params_become_attributes() {
        let nodes = to_nodes(&parse(r#"</a.js>; rel=script; type="module"; defer"#));
        assert_eq!(nodes[0].attr("type"), Some("module"));
        assert_eq!(nodes[0].attr("defer"), Some(""));
    }

    #[test]
    fn test_params_never_replace_the_url() {
        let nodes = to_nodes(&parse(
            r#"</a.js>; rel=script; src="https://evil.example/x.js", </b.css>; rel=stylesheet; href="/other.css"; rel2=x"#,
        ));
        assert_eq!(nodes[0].attr("src"), Some("/a.js"));
        assert_eq!(nodes[1].attr("href"), Some("/b.css"));
        assert_eq!(nodes[1].attr("rel"), Some("stylesheet"));
        assert_eq!(nodes[1].attr("rel2"), Some("x"));
    }

    #[test]
    fn test_params_with_unusable_names_are_skipped() {
        let nodes = to_nodes(&parse(r#"</a.js>; rel=script; on"load=x; data-id=7"#));
        assert_eq!(nodes[0].attrs().count(), 2);
        assert_eq!(nodes[0].attr("data-id"), Some("7"));
    }

    #[test]
    fn test_filters() {
        let links = parse("</a.js>; rel=script, </b.css>; rel=stylesheet, </c.js>; rel=script");
        assert_eq!(scripts(&links).len(), 2);
        assert_eq!(stylesheets(&links).len(), 1);
        assert_eq!(stylesheets(&links)[0].url, "/b.css");
        assert!(filter_by_rel(&links, "preload").is_empty());
    }

    #[test]
    fn test_reparse_synthesized_header_is_stable() {
        let original = parse(r#"</a.js>; rel=script; async, </b.css>; rel=stylesheet; media="screen""#);
        let nodes = to_nodes(&original);
        let header = to_header(&from_nodes(&nodes));
        let reparsed = parse(&header);

        let pairs = |links: &[Link]| -> Vec<(String, String)> {
            links.iter().map(|l| (l.rel.clone(), l.url.clone())).collect()
        };
        assert_eq!(pairs(&original), pairs(&reparsed));
        assert_eq!(reparsed[1].params, vec![("media".to_string(), "screen".to_string())]);
    }
}
