//! HTTP front end: render a view, compose its fragments, respond.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use fragment_compose::{ComposeError, Composed, RequestContext, Resolver};

use crate::views::{ViewEngine, ViewError};

/// View rendered for `/`.
pub const INDEX_VIEW: &str = "index";

#[derive(thiserror::Error, Debug)]
pub enum GatewayError {
    #[error(transparent)]
    View(#[from] ViewError),

    #[error(transparent)]
    Compose(#[from] ComposeError),
}

/// Shared by every request.
pub struct GatewayState {
    resolver: Resolver,
    views: Arc<dyn ViewEngine>,
    skip_prefixes: Vec<String>,
    query_bindings: Vec<String>,
}

impl GatewayState {
    pub fn new(resolver: Resolver, views: Arc<dyn ViewEngine>) -> Self {
        Self {
            resolver,
            views,
            skip_prefixes: Vec::new(),
            query_bindings: Vec::new(),
        }
    }

    /// Query parameters exposed to views as bindings. Anything not listed
    /// here is ignored.
    pub fn with_query_bindings(mut self, names: Vec<String>) -> Self {
        self.query_bindings = names;
        self
    }

    /// Bindings for a request: the listed query parameters plus `path`.
    pub fn bindings(&self, path: &str, mut params: HashMap<String, String>) -> Map<String, Value> {
        let mut bindings: Map<String, Value> = self
            .query_bindings
            .iter()
            .filter_map(|name| params.remove_entry(name))
            .map(|(k, v)| (k, Value::String(v)))
            .collect();
        bindings.insert("path".to_string(), Value::String(path.to_string()));
        bindings
    }

    /// Paths starting with any of `prefixes` are not composed.
    pub fn with_skip_prefixes(mut self, prefixes: Vec<String>) -> Self {
        self.skip_prefixes = prefixes;
        self
    }

    pub fn skips(&self, path: &str) -> bool {
        self.skip_prefixes
            .iter()
            .any(|prefix| !prefix.is_empty() && path.starts_with(prefix.as_str()))
    }

    /// Render `name` and compose it. `Ok(None)` when the view does not exist.
    pub async fn compose_view(
        &self,
        name: &str,
        bindings: &Map<String, Value>,
        ctx: &RequestContext,
    ) -> Result<Option<Composed>, GatewayError> {
        let Some(raw) = self.views.render(name, bindings)? else {
            return Ok(None);
        };
        let composed = self.resolver.compose(&raw, ctx).await?;
        Ok(Some(composed))
    }
}

/// Build the axum Router.
pub fn router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .fallback(render_page)
        .with_state(state)
}

/// Listen on `addr` until ctrl-c.
pub async fn serve(addr: &str, state: Arc<GatewayState>) -> anyhow::Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Gateway listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!("Failed to listen for ctrl-c: {e}");
            }
        })
        .await?;
    Ok(())
}

/// `/` is `index`; otherwise the path without surrounding slashes.
pub fn view_name(path: &str) -> &str {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        INDEX_VIEW
    } else {
        trimmed
    }
}

// ── Handlers ────────────────────────────────────────────────────

async fn health() -> Json<Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn render_page(
    State(state): State<Arc<GatewayState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let path = uri.path();
    if state.skips(path) {
        return (StatusCode::NOT_FOUND, "Not Found").into_response();
    }

    let bindings = state.bindings(path, params);

    // Dropping the guard (request finished or client gone) stops any
    // fragment fetch still in flight.
    let token = CancellationToken::new();
    let _guard = token.clone().drop_guard();
    let ctx = RequestContext::new(method, headers).with_cancellation(token);

    let name = view_name(path);
    match state.compose_view(name, &bindings, &ctx).await {
        Ok(Some(composed)) => {
            let status = StatusCode::from_u16(composed.status_code).unwrap_or(StatusCode::OK);
            (status, Html(composed.html)).into_response()
        }
        Ok(None) | Err(GatewayError::View(ViewError::InvalidName(_))) => {
            tracing::debug!(view = name, "no such view");
            (StatusCode::NOT_FOUND, "Not Found").into_response()
        }
        Err(e) => {
            tracing::error!(view = name, error = %e, "page composition failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
