//! Concurrent resolution of every fragment in a document.
//!
//! One task is spawned per discovered fragment. Tasks never see each
//! other's errors: a failed fragment degrades its own slot and is reported
//! in [`Resolution::outcomes`]. After every task has finished, status and
//! head nodes are aggregated in discovery order, so the result does not
//! depend on which origin answered first.

use std::sync::Arc;

use scraper::node::Element;
use tokio::sync::Semaphore;

use crate::config::ComposeConfig;
use crate::document::{Document, DEFAULT_STATUS};
use crate::error::{ComposeError, ComposeResult};
use crate::fetch::{FetchResponse, HttpFetcher, RequestContext};
use crate::fragment::{Fragment, FragmentState};

/// What happened to one fragment, in discovery order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FragmentOutcome {
    pub id: String,
    pub src: String,
    pub primary: bool,
    pub state: FragmentState,
    /// Last status received from an origin, 0 if none.
    pub status_code: u16,
    /// Error kind and message for fragments that did not succeed.
    pub error: Option<(&'static str, String)>,
}

impl FragmentOutcome {
    fn from_fragment(fragment: &Fragment, error: Option<&ComposeError>) -> Self {
        Self {
            id: fragment.id().to_string(),
            src: fragment.src().to_string(),
            primary: fragment.is_primary(),
            state: fragment.state(),
            status_code: fragment.status_code(),
            error: error.map(|e| (e.kind(), e.to_string())),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.state == FragmentState::Succeeded
    }
}

/// Page-level result of a resolution pass.
#[derive(Debug, Clone)]
pub struct Resolution {
    /// Status of the first-discovered primary fragment that received a
    /// response, otherwise 200.
    pub status_code: u16,
    /// Head nodes of all fragments, concatenated in discovery order.
    pub head: Vec<Element>,
    pub outcomes: Vec<FragmentOutcome>,
}

/// A fully composed page.
#[derive(Debug, Clone)]
pub struct Composed {
    pub html: String,
    pub status_code: u16,
    pub outcomes: Vec<FragmentOutcome>,
}

/// Resolves fragments against their origins.
#[derive(Clone)]
pub struct Resolver {
    fetcher: HttpFetcher,
    config: Arc<ComposeConfig>,
}

struct Pending {
    id: String,
    src: String,
    primary: bool,
}

impl Resolver {
    pub fn new(config: ComposeConfig) -> ComposeResult<Self> {
        config.validate()?;
        let fetcher = HttpFetcher::new(&config)?;
        Ok(Self::with_fetcher(config, fetcher))
    }

    pub fn with_fetcher(config: ComposeConfig, fetcher: HttpFetcher) -> Self {
        Self {
            fetcher,
            config: Arc::new(config),
        }
    }

    /// Rewrite every fragment response before its status is checked, e.g.
    /// to map a stale-but-usable 503 to 200 or to strip headers.
    pub fn with_response_filter(
        mut self,
        filter: impl Fn(FetchResponse) -> FetchResponse + Send + Sync + 'static,
    ) -> Self {
        self.fetcher = self.fetcher.with_response_filter(filter);
        self
    }

    pub fn config(&self) -> &ComposeConfig {
        &self.config
    }

    /// Resolve every non-deferred fragment of `document`.
    ///
    /// Blocks until all fragment tasks are done. Only discovery failures are
    /// returned as errors; fragment failures are logged and reported per
    /// fragment. The aggregate status is also stored on the document. Head
    /// nodes are returned, not appended; see [`Resolver::compose`].
    pub async fn resolve(
        &self,
        document: &Arc<Document>,
        ctx: &RequestContext,
    ) -> ComposeResult<Resolution> {
        let fragments = document.discover()?;
        let limiter = self
            .config
            .max_concurrency
            .map(|permits| Arc::new(Semaphore::new(permits)));

        let mut pending = Vec::with_capacity(fragments.len());
        let mut handles = Vec::with_capacity(fragments.len());

        for mut fragment in fragments {
            pending.push(Pending {
                id: fragment.id().to_string(),
                src: fragment.src().to_string(),
                primary: fragment.is_primary(),
            });

            let document = Arc::clone(document);
            let fetcher = self.fetcher.clone();
            let config = Arc::clone(&self.config);
            let ctx = ctx.clone();
            let limiter = limiter.clone();

            handles.push(tokio::spawn(async move {
                let _permit = match limiter {
                    Some(limiter) => limiter.acquire_owned().await.ok(),
                    None => None,
                };
                let result = fragment.resolve(&document, &fetcher, &ctx, &config).await;
                (fragment, result)
            }));
        }

        let finished = futures::future::join_all(handles).await;

        let mut status_code = DEFAULT_STATUS;
        let mut primary_decided = false;
        let mut head = Vec::new();
        let mut outcomes = Vec::with_capacity(finished.len());

        for (pending, joined) in pending.into_iter().zip(finished) {
            let (fragment, result) = match joined {
                Ok(done) => done,
                Err(e) => {
                    tracing::warn!(fragment = %pending.id, src = %pending.src, error = %e, "fragment task panicked");
                    outcomes.push(FragmentOutcome {
                        id: pending.id,
                        src: pending.src,
                        primary: pending.primary,
                        state: FragmentState::Failed,
                        status_code: 0,
                        error: Some(("panic", e.to_string())),
                    });
                    continue;
                }
            };

            if let Err(e) = &result {
                tracing::warn!(
                    fragment = %fragment.id(),
                    src = %fragment.src(),
                    kind = e.kind(),
                    error = %e,
                    "fragment left unresolved"
                );
            }

            if fragment.is_primary() && fragment.status_code() != 0 {
                if primary_decided {
                    tracing::debug!(
                        fragment = %fragment.id(),
                        status = fragment.status_code(),
                        "later primary fragment ignored"
                    );
                } else {
                    status_code = fragment.status_code();
                    primary_decided = true;
                }
            }

            outcomes.push(FragmentOutcome::from_fragment(&fragment, result.as_ref().err()));
            head.extend(fragment.into_head_nodes());
        }

        document.set_status_code(status_code);
        tracing::debug!(
            fragments = outcomes.len(),
            failed = outcomes.iter().filter(|o| !o.succeeded()).count(),
            status = status_code,
            "resolution finished"
        );

        Ok(Resolution {
            status_code,
            head,
            outcomes,
        })
    }

    /// Parse, resolve, append head nodes, and render in one call.
    pub async fn compose(&self, raw_html: &str, ctx: &RequestContext) -> ComposeResult<Composed> {
        let document = Arc::new(Document::parse(raw_html));
        let resolution = self.resolve(&document, ctx).await?;
        document.append_head(&resolution.head)?;
        let html = document.render()?;

        Ok(Composed {
            html,
            status_code: document.status_code(),
            outcomes: resolution.outcomes,
        })
    }
}
