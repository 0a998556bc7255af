//! Component lifecycle callbacks.

use std::collections::BTreeMap;

use arbor_primitives::{Pid, Properties};
use serde::Serialize;
use thiserror::Error;

use crate::services::ServiceRef;

/// Raised by a component that cannot start or apply a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ActivationError {
	message: String,
}

impl ActivationError {
	pub fn new(message: impl Into<String>) -> Self {
		Self { message: message.into() }
	}

	pub fn message(&self) -> &str {
		&self.message
	}
}

/// What an instance did with a new configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Modified {
	/// Applied in place; the instance stays active.
	Applied,
	/// Needs a restart: the runtime deactivates and reactivates it.
	Reactivate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeactivationReason {
	Unspecified,
	Disabled,
	ReferenceUnsatisfied,
	ConfigurationDeleted,
	ConfigurationModified,
	Disposed,
	UnitStopped,
}

/// Everything an instance sees when called.
#[derive(Debug)]
pub struct ActivationContext<'a> {
	pub component: &'a str,
	/// Instance key: the component name for the singleton instance, the
	/// configuration pid for factory configuration instances.
	pub instance: &'a Pid,
	pub properties: &'a Properties,
	pub(crate) bound: &'a BTreeMap<String, Vec<ServiceRef>>,
}

impl ActivationContext<'_> {
	/// Best service bound to reference `name`.
	pub fn service(&self, name: &str) -> Option<&ServiceRef> {
		self.bound.get(name)?.first()
	}

	/// Every service bound to reference `name`, best first.
	pub fn services(&self, name: &str) -> &[ServiceRef] {
		self.bound.get(name).map(Vec::as_slice).unwrap_or_default()
	}
}

/// Callbacks of a component implementation.
///
/// One implementation serves every instance of the component; the context
/// tells instances apart. Panics are caught and treated as failures.
pub trait Lifecycle: Send + Sync {
	fn activate(&self, ctx: &ActivationContext<'_>) -> Result<(), ActivationError>;

	/// Applies new properties to an active instance.
	fn modified(&self, _ctx: &ActivationContext<'_>) -> Result<Modified, ActivationError> {
		Ok(Modified::Reactivate)
	}

	fn deactivate(&self, _ctx: &ActivationContext<'_>, _reason: DeactivationReason) {}
}

/// Lifecycle with no behavior, for components that only publish state.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopLifecycle;

impl Lifecycle for NoopLifecycle {
	fn activate(&self, _ctx: &ActivationContext<'_>) -> Result<(), ActivationError> {
		Ok(())
	}

	fn modified(&self, _ctx: &ActivationContext<'_>) -> Result<Modified, ActivationError> {
		Ok(Modified::Applied)
	}
}
