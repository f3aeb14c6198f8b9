//! Outbound HTTP for fragment origins, wrapping reqwest.
//!
//! One request per call, no retries: the retry budget of a fragment is its
//! single fallback attempt, decided by the caller. Each call is bounded by
//! its own timeout and by the inbound request's cancellation token.

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{self, HeaderMap, HeaderName};
use reqwest::Method;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::config::ComposeConfig;
use crate::error::{ComposeError, ComposeResult};

/// What the host layer tells us about the inbound page request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    method: Method,
    headers: HeaderMap,
    cancellation: CancellationToken,
}

impl RequestContext {
    pub fn new(method: Method, headers: HeaderMap) -> Self {
        Self {
            method,
            headers,
            cancellation: CancellationToken::new(),
        }
    }

    /// Tie fetches to a token owned by the host request.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new(Method::GET, HeaderMap::new())
    }
}

/// Response from a fragment origin, body already decoded.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub url: String,
    pub status: u16,
    /// Response headers with `Connection` stripped.
    pub headers: HeaderMap,
    pub body: String,
}

impl FetchResponse {
    /// Raw `Link` header value, or `""`. Multiple headers are joined.
    pub fn link_header(&self) -> String {
        self.headers
            .get_all(header::LINK)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Headers that never travel between the inbound request and an origin.
fn is_stripped(name: &HeaderName) -> bool {
    *name == header::CONNECTION
        || *name == header::HOST
        || *name == header::CONTENT_LENGTH
        || *name == header::TRANSFER_ENCODING
        || *name == header::ACCEPT_ENCODING
}

/// Copy inbound headers for an outbound fetch.
///
/// Drops `Connection` plus every header it names, and the framing headers
/// that belong to the inbound hop. `Accept-Encoding` is left to the client
/// so origins only send encodings it can decode.
pub fn outbound_headers(inbound: &HeaderMap) -> HeaderMap {
    let named_by_connection: Vec<String> = inbound
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|name| name.trim().to_ascii_lowercase())
        .filter(|name| !name.is_empty())
        .collect();

    let mut out = HeaderMap::with_capacity(inbound.len());
    for (name, value) in inbound {
        if is_stripped(name) {
            continue;
        }
        if named_by_connection.iter().any(|n| n == name.as_str()) {
            continue;
        }
        out.append(name.clone(), value.clone());
    }
    out
}

/// Resolve a fragment source against the default origin.
///
/// Absolute URLs pass through; anything without a host is joined onto
/// `{default_scheme}://{default_host}/`.
pub fn resolve_url(src: &str, config: &ComposeConfig) -> ComposeResult<Url> {
    let invalid = |message: String| ComposeError::FragmentUrl {
        src: src.to_string(),
        message,
    };
    let trimmed = src.trim();
    if trimmed.is_empty() {
        return Err(invalid("empty".into()));
    }
    match Url::parse(trimmed) {
        Ok(url) if url.has_host() => Ok(url),
        Ok(_) => Err(invalid("no host".into())),
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            let base = Url::parse(&config.base_url())
                .map_err(|e| ComposeError::Config(format!("default host: {e}")))?;
            base.join(trimmed).map_err(|e| invalid(e.to_string()))
        }
        Err(e) => Err(invalid(e.to_string())),
    }
}

/// Rewrites an origin response before its status is checked.
pub type ResponseFilter = Arc<dyn Fn(FetchResponse) -> FetchResponse + Send + Sync>;

/// HTTP client for fragment origins.
#[derive(Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    filter: Option<ResponseFilter>,
}

impl HttpFetcher {
    /// Build a client from the composition settings.
    pub fn new(config: &ComposeConfig) -> ComposeResult<Self> {
        let mut builder = reqwest::Client::builder()
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
            .redirect(reqwest::redirect::Policy::limited(5))
            .gzip(true);
        if let Some(ua) = &config.user_agent {
            builder = builder.user_agent(ua.as_str());
        }
        let client = builder
            .build()
            .map_err(|e| ComposeError::Config(format!("http client: {e}")))?;
        Ok(Self {
            client,
            filter: None,
        })
    }

    /// Wrap an existing reqwest client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client,
            filter: None,
        }
    }

    /// Pass every response through `filter` before it is returned.
    pub fn with_response_filter(
        mut self,
        filter: impl Fn(FetchResponse) -> FetchResponse + Send + Sync + 'static,
    ) -> Self {
        self.filter = Some(Arc::new(filter));
        self
    }

    /// Perform one fetch.
    ///
    /// Returns the response for any status code, after the response filter;
    /// deciding whether a non-200 answer is a failure is left to the caller,
    /// which may still want the status. Cancellation of `ctx` wins over an
    /// in-flight request.
    pub async fn fetch(
        &self,
        method: Method,
        url: &Url,
        ctx: &RequestContext,
        timeout: Duration,
    ) -> ComposeResult<FetchResponse> {
        let request = self
            .client
            .request(method, url.clone())
            .headers(outbound_headers(ctx.headers()))
            .timeout(timeout);

        let token = ctx.cancellation();
        tokio::select! {
            biased;
            _ = token.cancelled() => Err(ComposeError::Cancelled),
            result = send(request, url, timeout) => match &self.filter {
                Some(filter) => result.map(|response| filter(response)),
                None => result,
            },
        }
    }
}

async fn send(
    request: reqwest::RequestBuilder,
    url: &Url,
    timeout: Duration,
) -> ComposeResult<FetchResponse> {
    let response = request
        .send()
        .await
        .map_err(|e| map_reqwest_error(e, url, timeout))?;

    let status = response.status().as_u16();
    let mut headers = response.headers().clone();
    headers.remove(header::CONNECTION);

    let bytes = response
        .bytes()
        .await
        .map_err(|e| map_reqwest_error(e, url, timeout))?;

    tracing::debug!(url = %url, status, bytes = bytes.len(), "fragment origin answered");

    Ok(FetchResponse {
        url: url.to_string(),
        status,
        headers,
        body: String::from_utf8_lossy(&bytes).into_owned(),
    })
}

fn map_reqwest_error(e: reqwest::Error, url: &Url, timeout: Duration) -> ComposeError {
    if e.is_timeout() {
        ComposeError::Timeout {
            url: url.to_string(),
            timeout_secs: timeout.as_secs(),
        }
    } else if e.is_decode() {
        ComposeError::Decode {
            url: url.to_string(),
            message: e.to_string(),
        }
    } else {
        ComposeError::Network {
            url: url.to_string(),
            message: e.to_string(),
        }
    }
}
