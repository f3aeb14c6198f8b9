//! Error taxonomy for page composition.
//!
//! Document-level failures (`Parse` of the initial markup, `Serialization`)
//! abort a render. Every other kind, including an unusable fragment URL, is
//! raised by a single fragment and stays isolated to that fragment's slot.

use crate::config::FallbackPolicy;

/// All errors produced while composing a page.
#[derive(thiserror::Error, Debug)]
pub enum ComposeError {
    /// Unparsable initial markup.
    #[error("Parse error: {0}")]
    Parse(String),

    /// A fragment's `src` or `fallback` is not a usable URL.
    #[error("Invalid fragment URL {src:?}: {message}")]
    FragmentUrl { src: String, message: String },

    /// Connection-level failure talking to a fragment origin.
    #[error("Network error fetching {url}: {message}")]
    Network { url: String, message: String },

    /// The fetch did not complete within the fragment's timeout.
    #[error("Timed out after {timeout_secs}s fetching {url}")]
    Timeout { url: String, timeout_secs: u64 },

    /// The response body could not be decoded (e.g. corrupt gzip stream).
    #[error("Decode error for {url}: {message}")]
    Decode { url: String, message: String },

    /// The origin answered with something other than 200.
    #[error("Upstream {url} answered {status}")]
    UpstreamStatus { url: String, status: u16 },

    /// The composed tree could not be serialized.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The caller's request context was cancelled mid-flight.
    #[error("Request cancelled")]
    Cancelled,

    /// `resolve` was called on a fragment that already left `Pending`.
    #[error("Fragment {0} was already resolved")]
    AlreadyResolved(String),

    /// `discover` was called twice on the same document.
    #[error("Fragments were already discovered for this document")]
    AlreadyDiscovered,

    /// A document lock was poisoned by a panicking writer.
    #[error("Document lock poisoned")]
    Poisoned,

    /// Invalid or unreadable configuration.
    #[error("Config error: {0}")]
    Config(String),
}

impl ComposeError {
    /// Whether this failure of a primary-source fetch moves the fragment on
    /// to its fallback source under the given policy.
    pub fn triggers_fallback(&self, policy: FallbackPolicy) -> bool {
        match self {
            ComposeError::Timeout { .. } => true,
            ComposeError::UpstreamStatus { .. } => {
                policy == FallbackPolicy::TimeoutOrUpstreamStatus
            }
            _ => false,
        }
    }

    /// True for the document-level kinds that abort a whole render. Errors
    /// reported in per-fragment outcomes are never fatal.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ComposeError::Parse(_) | ComposeError::Serialization(_) | ComposeError::Poisoned
        )
    }

    /// Short machine-readable name of the error kind, used in logs and
    /// per-fragment outcome reports.
    pub fn kind(&self) -> &'static str {
        match self {
            ComposeError::Parse(_) => "parse",
            ComposeError::FragmentUrl { .. } => "fragment_url",
            ComposeError::Network { .. } => "network",
            ComposeError::Timeout { .. } => "timeout",
            ComposeError::Decode { .. } => "decode",
            ComposeError::UpstreamStatus { .. } => "upstream_status",
            ComposeError::Serialization(_) => "serialization",
            ComposeError::Cancelled => "cancelled",
            ComposeError::AlreadyResolved(_) => "already_resolved",
            ComposeError::AlreadyDiscovered => "already_discovered",
            ComposeError::Poisoned => "poisoned",
            ComposeError::Config(_) => "config",
        }
    }
}

impl From<serde_json::Error> for ComposeError {
    fn from(e: serde_json::Error) -> Self {
        ComposeError::Config(e.to_string())
    }
}

/// Convenience alias used across the crate.
pub type ComposeResult<T> = Result<T, ComposeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_timeout_triggers_fallback_by_default() {
        let timeout = ComposeError::Timeout {
            url: "http://a/".into(),
            timeout_secs: 1,
        };
        let status = ComposeError::UpstreamStatus {
            url: "http://a/".into(),
            status: 503,
        };
        let network = ComposeError::Network {
            url: "http://a/".into(),
            message: "refused".into(),
        };

        assert!(timeout.triggers_fallback(FallbackPolicy::TimeoutOnly));
        assert!(!status.triggers_fallback(FallbackPolicy::TimeoutOnly));
        assert!(!network.triggers_fallback(FallbackPolicy::TimeoutOnly));
        assert!(!ComposeError::Cancelled.triggers_fallback(FallbackPolicy::TimeoutOnly));
    }

    #[test]
    fn test_upstream_status_policy() {
        let status = ComposeError::UpstreamStatus {
            url: "http://a/".into(),
            status: 404,
        };
        assert!(status.triggers_fallback(FallbackPolicy::TimeoutOrUpstreamStatus));
    }

    #[test]
    fn test_fatal_kinds() {
        assert!(ComposeError::Parse("x".into()).is_fatal());
        assert!(!ComposeError::FragmentUrl {
            src: "http://[::1".into(),
            message: "invalid IPv6 address".into(),
        }
        .is_fatal());
        assert!(ComposeError::Serialization("x".into()).is_fatal());
        assert!(!ComposeError::Cancelled.is_fatal());
        assert_eq!(ComposeError::AlreadyDiscovered.kind(), "already_discovered");
    }
}
