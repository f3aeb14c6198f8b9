//! HTTP gateway for fragment composition.
//!
//! Renders a view by name, composes the fragments it contains with
//! [`fragment_compose::Resolver`], and answers with the composed page and
//! its aggregate status code.

pub mod server;
pub mod views;

pub use server::{router, serve, GatewayError, GatewayState};
pub use views::{DirectoryViews, ViewEngine, ViewError};
