//! Fragment composition — assemble a server-rendered page from fragments
//! fetched concurrently from remote origins.
//!
//! ```text
//! <fragment src="/header" primary timeout="2" fallback="/header-static"></fragment>
//! ```
//!
//! [`Document`] finds the placeholders, [`Resolver`] fetches them in
//! parallel and splices the markup in place, and `Link` headers from the
//! origins become `<script>`/`<link>` nodes in `<head>`.

pub mod config;
pub mod document;
pub mod dom;
pub mod error;
pub mod fetch;
pub mod fragment;
pub mod links;
pub mod resolver;

pub use config::{ComposeConfig, FallbackPolicy};
pub use document::{Document, Slot};
pub use error::{ComposeError, ComposeResult};
pub use fetch::{FetchResponse, HttpFetcher, RequestContext, ResponseFilter};
pub use fragment::{Fragment, FragmentState, Placeholder, Source};
pub use links::Link;
pub use resolver::{Composed, FragmentOutcome, Resolution, Resolver};
