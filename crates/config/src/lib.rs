//! Configuration store contract, selection filters and change events.
//!
//! A store holds property sets keyed by [`arbor_primitives::Pid`]. Every
//! committed change is published to subscribers through an [`EventSource`]:
//!
//! - [`ConfigurationEvent::Updated`] carries the new properties and change count.
//! - [`ConfigurationEvent::Deleted`] is terminal for the pid.
//! - [`ConfigurationEvent::LocationChanged`] reports binding changes.
//!
//! Subscription only sees future changes. Consumers that start after the store
//! (or see it restart, [`SourceEvent::Available`]) list the existing
//! configurations themselves and replay them.

/// Error types for store access and filter parsing.
pub mod error;
/// Change events and ordered delivery.
pub mod event;
/// Selection filter language.
pub mod filter;
/// In-process store implementation.
pub mod memory;
/// The store trait and configuration snapshots.
pub mod store;

pub use error::{ConfigError, Result};
pub use event::{ConfigurationEvent, ConfigurationListener, EventSource, SourceEvent, Subscription};
pub use filter::Filter;
pub use memory::MemoryStore;
pub use store::{Configuration, ConfigurationStore};
