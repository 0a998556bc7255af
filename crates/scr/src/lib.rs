#![cfg_attr(doc, allow(rustdoc::private_intra_doc_links))]
//! Dynamic component runtime.
//!
//! # Purpose
//!
//! Components are declared with immutable [`ComponentMetadata`] and implemented
//! by a [`Lifecycle`]. The runtime activates them when their configuration and
//! mandatory service references are present, reconfigures them when the
//! configuration changes and deactivates them when either goes away.
//!
//! # Mental Model
//!
//! 1. **Register:** A unit at a [`Location`](arbor_primitives::Location) registers
//!    components. Each gets a [`ComponentHolder`], indexed by configuration pid.
//! 2. **Configure:** [`ConfigurationSupport`] listens to a configuration store,
//!    checks bindings and delivers configurations to the holders of their pid.
//! 3. **Activate:** A holder activates an instance per configuration (one for a
//!    singleton, one per factory configuration) once references are satisfied.
//! 4. **Withdraw:** Deleting a configuration, losing a reference or stopping the
//!    unit deactivates the affected instances.
//!
//! # Key Types
//!
//! | Type | Role |
//! |------|------|
//! | [`Runtime`] | Facade wiring the pieces together. |
//! | [`ComponentRegistry`] | Units, holders and the pid index. |
//! | [`ComponentHolder`] | Instances of one component and their states. |
//! | [`ConfigurationSupport`] | Store listener, binding checks and catch-up. |
//! | [`ServiceTable`] | Services references resolve against. |
//!
//! # Concurrency
//!
//! There is no global event loop. Every holder has its own lock; configuration
//! events for different holders proceed in parallel. The pid index and the
//! service table are copy-on-write and never block readers.
//!
//! # Logging
//!
//! The runtime emits `tracing` events: `warn` for transient store failures,
//! `error` for binding conflicts and activation failures, `debug` for dispatch.
//! Hosting processes may call [`settings::init_tracing`].

pub mod config_support;
pub mod holder;
pub mod lifecycle;
pub mod metadata;
pub mod registry;
pub mod runtime;
pub mod services;
pub mod settings;

#[cfg(any(test, doc))]
pub(crate) mod invariants;
#[cfg(any(test, doc))]
pub(crate) mod test_fixtures;

pub use config_support::{ConfigurationSupport, TargetedPid};
pub use holder::{ComponentHolder, HolderError, HolderSnapshot, InstanceKind, InstanceSnapshot, InstanceState};
pub use lifecycle::{ActivationContext, ActivationError, DeactivationReason, Lifecycle, Modified, NoopLifecycle};
pub use metadata::{Cardinality, ComponentMetadata, ConfigurationPolicy, MetadataError, ReferenceMetadata};
pub use registry::{ComponentRegistry, RegistrationError, RegistrySnapshot, UnitId, UnitSnapshot};
pub use runtime::{Runtime, RuntimeError};
pub use services::{ServiceRef, ServiceTable};
pub use settings::{CatchUpScope, RuntimeSettings, SettingsError};
