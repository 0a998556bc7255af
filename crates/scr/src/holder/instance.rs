use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use arbor_primitives::{ConfigIdentity, Pid, Properties, keys};
use serde::Serialize;

use crate::services::ServiceRef;

/// Lifecycle position of one managed instance.
///
/// `Unsatisfied -> Configuring -> Active -> (Reconfiguring -> Active)* -> Disposed`.
/// A failed activation or reconfiguration lands back in `Unsatisfied`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum InstanceState {
	Unsatisfied,
	Configuring,
	Active,
	Reconfiguring,
	Disposed,
}

impl fmt::Display for InstanceState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(match self {
			Self::Unsatisfied => "unsatisfied",
			Self::Configuring => "configuring",
			Self::Active => "active",
			Self::Reconfiguring => "reconfiguring",
			Self::Disposed => "disposed",
		})
	}
}

/// Where an instance came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum InstanceKind {
	/// The one instance of a non-factory component, keyed by its name.
	Singleton,
	/// Spawned by a factory configuration, keyed by the configuration pid.
	FactoryConfiguration,
	/// Created on request from a component factory.
	ComponentFactory,
}

/// One managed instance.
#[derive(Debug)]
pub(crate) struct Instance {
	pub key: Pid,
	pub kind: InstanceKind,
	pub state: InstanceState,
	/// Configuration currently applied, if any.
	pub source: Option<ConfigIdentity>,
	pub configuration: Option<Arc<Properties>>,
	pub change_count: Option<u64>,
	/// Extra properties given at creation (component factory instances).
	pub extra: Option<Properties>,
	/// Services bound by the last successful activation.
	pub bound: BTreeMap<String, Vec<ServiceRef>>,
	pub activations: u64,
	pub last_error: Option<String>,
}

impl Instance {
	pub fn new(key: Pid, kind: InstanceKind) -> Self {
		Self {
			key,
			kind,
			state: InstanceState::Unsatisfied,
			source: None,
			configuration: None,
			change_count: None,
			extra: None,
			bound: BTreeMap::new(),
			activations: 0,
			last_error: None,
		}
	}

	/// Properties passed to lifecycle callbacks: declared properties, then the
	/// configuration, then creation properties, then the identity keys.
	pub fn effective_properties(&self, component: &str, declared: &Properties) -> Properties {
		let mut props = declared.clone();
		if let Some(config) = &self.configuration {
			props.overlay(config);
		}
		if let Some(extra) = &self.extra {
			props.overlay(extra);
		}
		props.insert(keys::COMPONENT_NAME, component);
		if let Some(source) = &self.source {
			props.insert(keys::SERVICE_PID, source.pid.as_str());
			if let Some(factory) = &source.factory_pid {
				props.insert(keys::FACTORY_PID, factory.as_str());
			}
		}
		props
	}

	pub fn snapshot(&self) -> InstanceSnapshot {
		InstanceSnapshot {
			key: self.key.to_string(),
			kind: self.kind,
			state: self.state,
			configuration_pid: self.source.as_ref().map(|s| s.pid.to_string()),
			change_count: self.change_count,
			activations: self.activations,
			last_error: self.last_error.clone(),
		}
	}
}

/// Diagnostic view of one instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstanceSnapshot {
	pub key: String,
	pub kind: InstanceKind,
	pub state: InstanceState,
	pub configuration_pid: Option<String>,
	pub change_count: Option<u64>,
	pub activations: u64,
	pub last_error: Option<String>,
}
