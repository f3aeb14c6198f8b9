//! A single placeholder and its resolution.
//!
//! Attribute rules:
//!
//! | attribute  | absent            | present                                  |
//! |------------|-------------------|------------------------------------------|
//! | `timeout`  | 60 s              | positive integer seconds, otherwise 60 s |
//! | `deferred` | `false`           | `true` unless it equals `false` (any case) |
//! | `primary`  | `false`           | `true` unless it equals `false` (any case) |
//! | `id`       | generated UUID    | the attribute value                      |
//! | `method`   | inbound method    | the parsed method, if valid              |

use std::time::Duration;

use reqwest::Method;
use scraper::node::Element;

use crate::config::ComposeConfig;
use crate::document::{Document, Slot};
use crate::error::{ComposeError, ComposeResult};
use crate::fetch::{self, FetchResponse, HttpFetcher, RequestContext};
use crate::links;

/// Timeout applied when the attribute is missing or unusable.
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Which markup shape the fragment was discovered from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placeholder {
    /// `<fragment>` anywhere in the document.
    Element,
    /// `<script type="fragment">` inside `<head>`.
    Script,
}

/// Which configured URL a fetch targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Primary,
    Fallback,
}

/// Resolution state. Moves forward only:
/// `Pending → Fetching(Primary) → Succeeded | Failed | Fetching(Fallback)`,
/// and `Fetching(Fallback) → Succeeded | Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentState {
    Pending,
    Fetching(Source),
    Succeeded,
    Failed,
}

#[derive(Debug)]
pub struct Fragment {
    id: String,
    src: String,
    fallback: Option<String>,
    method: Option<Method>,
    timeout: Duration,
    deferred: bool,
    primary: bool,
    reference: Option<String>,
    placeholder: Placeholder,
    slot: Slot,

    state: FragmentState,
    status_code: u16,
    head: Vec<Element>,
}

impl Fragment {
    /// Read the fetch configuration off a placeholder element.
    pub(crate) fn from_element(element: &Element, placeholder: Placeholder, slot: Slot) -> Self {
        let id = element
            .attr("id")
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        Self {
            id,
            src: element.attr("src").unwrap_or_default().to_string(),
            fallback: non_empty(element.attr("fallback")),
            method: parse_method(element.attr("method")),
            timeout: parse_timeout(element.attr("timeout")),
            deferred: parse_flag(element.attr("deferred")),
            primary: parse_flag(element.attr("primary")),
            reference: non_empty(element.attr("ref")),
            placeholder,
            slot,
            state: FragmentState::Pending,
            status_code: 0,
            head: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn src(&self) -> &str {
        &self.src
    }

    pub fn fallback(&self) -> Option<&str> {
        self.fallback.as_deref()
    }

    /// Method from the `method` attribute, `GET` when none was given.
    pub fn method(&self) -> Method {
        self.method.clone().unwrap_or(Method::GET)
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn is_deferred(&self) -> bool {
        self.deferred
    }

    pub fn is_primary(&self) -> bool {
        self.primary
    }

    /// Informational `ref` attribute. Never a resolution dependency.
    pub fn reference(&self) -> Option<&str> {
        self.reference.as_deref()
    }

    pub fn placeholder(&self) -> Placeholder {
        self.placeholder
    }

    pub fn slot(&self) -> &Slot {
        &self.slot
    }

    pub fn state(&self) -> FragmentState {
        self.state
    }

    /// Status of the last response received, 0 if none arrived.
    pub fn status_code(&self) -> u16 {
        self.status_code
    }

    /// Head nodes produced from the origin's `Link` header.
    pub fn head_nodes(&self) -> &[Element] {
        &self.head
    }

    pub fn into_head_nodes(self) -> Vec<Element> {
        self.head
    }

    /// Fetch this fragment and splice the result into `document`.
    ///
    /// The primary source is tried first. Only a failure that
    /// [`triggers_fallback`](ComposeError::triggers_fallback) under the
    /// configured policy leads to one more attempt against the fallback
    /// source; any other failure is terminal. On failure the placeholder is
    /// left as it is and no head nodes are recorded.
    pub async fn resolve(
        &mut self,
        document: &Document,
        fetcher: &HttpFetcher,
        ctx: &RequestContext,
        config: &ComposeConfig,
    ) -> ComposeResult<()> {
        if self.state != FragmentState::Pending {
            return Err(ComposeError::AlreadyResolved(self.id.clone()));
        }

        self.state = FragmentState::Fetching(Source::Primary);
        let src = self.src.clone();
        let outcome = match self.attempt(&src, fetcher, ctx, config).await {
            Ok(response) => Ok(response),
            Err(e) if e.triggers_fallback(config.fallback_policy) => {
                match self.fallback.clone() {
                    Some(fallback) => {
                        tracing::info!(
                            fragment = %self.id,
                            src = %self.src,
                            fallback = %fallback,
                            error = %e,
                            "primary source failed, trying fallback"
                        );
                        self.state = FragmentState::Fetching(Source::Fallback);
                        self.attempt(&fallback, fetcher, ctx, config).await
                    }
                    None => Err(e),
                }
            }
            Err(e) => Err(e),
        };

        let response = match outcome {
            Ok(response) => response,
            Err(e) => {
                self.state = FragmentState::Failed;
                return Err(e);
            }
        };

        let nodes = links::to_nodes(&links::parse(&response.link_header()));
        if let Err(e) = document.replace_fragment(&self.slot, &response.body) {
            self.state = FragmentState::Failed;
            return Err(e);
        }
        self.head.extend(nodes);
        self.state = FragmentState::Succeeded;
        tracing::debug!(fragment = %self.id, url = %response.url, "fragment resolved");
        Ok(())
    }

    /// One fetch against `target`. Any status other than 200 is an error,
    /// but the status is still recorded.
    async fn attempt(
        &mut self,
        target: &str,
        fetcher: &HttpFetcher,
        ctx: &RequestContext,
        config: &ComposeConfig,
    ) -> ComposeResult<FetchResponse> {
        let url = fetch::resolve_url(target, config)?;
        let method = self.method.clone().unwrap_or_else(|| ctx.method().clone());

        let response = fetcher.fetch(method, &url, ctx, self.timeout).await?;
        self.status_code = response.status;
        if response.status != 200 {
            return Err(ComposeError::UpstreamStatus {
                url: response.url,
                status: response.status,
            });
        }
        Ok(response)
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Positive whole seconds; anything else falls back to the default.
pub fn parse_timeout(value: Option<&str>) -> Duration {
    let secs = value
        .and_then(|v| v.trim().parse::<u64>().ok())
        .filter(|secs| *secs > 0)
        .unwrap_or(DEFAULT_TIMEOUT_SECS);
    Duration::from_secs(secs)
}

/// Absent means `false`; present means `true` unless the value is `false`.
pub fn parse_flag(value: Option<&str>) -> bool {
    value.is_some_and(|v| !v.trim().eq_ignore_ascii_case("false"))
}

fn parse_method(value: Option<&str>) -> Option<Method> {
    let value = value?.trim();
    if value.is_empty() {
        return None;
    }
    Method::from_bytes(value.to_ascii_uppercase().as_bytes()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fragment_from(markup: &str) -> Fragment {
        let doc = Document::parse(markup);
        doc.discover().unwrap().into_iter().next().unwrap()
    }

    #[test]
    fn test_parse_timeout() {
        assert_eq!(parse_timeout(None), Duration::from_secs(60));
        assert_eq!(parse_timeout(Some("5")), Duration::from_secs(5));
        assert_eq!(parse_timeout(Some(" 7 ")), Duration::from_secs(7));
        assert_eq!(parse_timeout(Some("abc")), Duration::from_secs(60));
        assert_eq!(parse_timeout(Some("-3")), Duration::from_secs(60));
        assert_eq!(parse_timeout(Some("0")), Duration::from_secs(60));
        assert_eq!(parse_timeout(Some("")), Duration::from_secs(60));
    }

    #[test]
    fn test_parse_flag() {
        assert!(!parse_flag(None));
        assert!(parse_flag(Some("")));
        assert!(parse_flag(Some("true")));
        assert!(parse_flag(Some("yes")));
        assert!(!parse_flag(Some("false")));
        assert!(!parse_flag(Some("FALSE")));
        assert!(!parse_flag(Some("False")));
    }

    #[test]
    fn test_from_element_defaults() {
        let f = fragment_from(r#"<fragment src="/a"></fragment>"#);
        assert_eq!(f.src(), "/a");
        assert_eq!(f.fallback(), None);
        assert_eq!(f.method(), Method::GET);
        assert_eq!(f.timeout(), Duration::from_secs(60));
        assert!(!f.is_primary());
        assert!(!f.is_deferred());
        assert_eq!(f.reference(), None);
        assert_eq!(f.state(), FragmentState::Pending);
        assert_eq!(f.status_code(), 0);
        assert!(f.head_nodes().is_empty());
        assert!(uuid::Uuid::parse_str(f.id()).is_ok());
    }

    #[test]
    fn test_from_element_all_attributes() {
        let f = fragment_from(
            r#"<fragment src="/a" fallback="/b" method="post" timeout="3"
                         primary="TRUE" id="main" ref="nav"></fragment>"#,
        );
        assert_eq!(f.fallback(), Some("/b"));
        assert_eq!(f.method(), Method::POST);
        assert_eq!(f.timeout(), Duration::from_secs(3));
        assert!(f.is_primary());
        assert_eq!(f.id(), "main");
        assert_eq!(f.reference(), Some("nav"));
    }

    #[test]
    fn test_generated_ids_are_unique() {
        let doc = Document::parse(r#"<fragment src="/a"></fragment><fragment src="/b"></fragment>"#);
        let fragments = doc.discover().unwrap();
        assert_ne!(fragments[0].id(), fragments[1].id());
    }

    #[test]
    fn test_invalid_method_is_ignored() {
        let f = fragment_from(r#"<fragment src="/a" method="G E T"></fragment>"#);
        assert_eq!(f.method(), Method::GET);
        assert!(f.method.is_none());
    }

    #[tokio::test]
    async fn test_resolve_twice_is_rejected() {
        let doc = Document::parse(r#"<fragment src="   "></fragment>"#);
        let mut f = doc.discover().unwrap().remove(0);
        let config = ComposeConfig::default();
        let fetcher = HttpFetcher::new(&config).unwrap();
        let ctx = RequestContext::default();

        // empty source fails without touching the network
        let first = f.resolve(&doc, &fetcher, &ctx, &config).await;
        assert!(matches!(first, Err(ComposeError::FragmentUrl { .. })));
        assert_eq!(f.state(), FragmentState::Failed);

        let second = f.resolve(&doc, &fetcher, &ctx, &config).await;
        assert!(matches!(second, Err(ComposeError::AlreadyResolved(_))));
    }
}
