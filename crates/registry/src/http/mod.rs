//! HTTP-style registries built on [`crate::core::RankedRegistry`].
//!
//! | Registry | Key | Winner |
//! |----------|-----|--------|
//! | [`ServletRegistry`] | [`PathPattern`] | one per pattern |
//! | [`ErrorPageRegistry`] | [`ErrorKey`] | one per code or exception type |
//! | [`ListenerRegistry`] | [`ListenerKind`] | all, in ranking order |
//!
//! A [`ContextRegistry`] bundles the three for one servlet context. The
//! [`HandlerRegistry`] orders contexts (longest path first, then ranking) and
//! maps a request URI to the context and servlet that serve it.

mod context;
mod error_pages;
mod listeners;
mod pattern;
mod servlets;

#[cfg(test)]
mod tests;

pub use context::{ContextInfo, ContextRegistry, ContextSnapshot, HandlerRegistry, ServletHandle};
pub use error_pages::{ErrorKey, ErrorPageRegistry, parse_error_page};
pub use listeners::{ListenerKind, ListenerRegistry};
pub use pattern::{PathMatch, PathPattern};
pub use servlets::{PathResolution, ServletRegistry};
