//! The runtime facade: registry, configuration support and settings wired
//! together with a documented lifecycle.
//!
//! ```text
//! Runtime::new(settings)
//!   -> register_unit / register_component        (any order)
//!   -> attach_store(store, events)               (catch-up replay)
//!   -> ... configuration and service events ...
//!   -> detach_store / unregister_unit / shutdown
//! ```

use std::sync::Arc;

use arbor_config::{ConfigError, ConfigurationStore, EventSource, SourceEvent, Subscription};
use arbor_primitives::{Location, Properties};
use thiserror::Error;

use crate::config_support::ConfigurationSupport;
use crate::holder::{ComponentHolder, HolderError};
use crate::lifecycle::Lifecycle;
use crate::metadata::ComponentMetadata;
use crate::registry::{ComponentRegistry, RegistrationError, RegistrySnapshot, UnitId};
use crate::services::ServiceRef;
use crate::settings::RuntimeSettings;

#[derive(Debug, Error)]
pub enum RuntimeError {
	#[error(transparent)]
	Registration(#[from] RegistrationError),

	#[error(transparent)]
	Holder(#[from] HolderError),

	#[error(transparent)]
	Config(#[from] ConfigError),
}

/// Owns the component registry and routes configuration to it.
#[derive(Debug)]
pub struct Runtime {
	registry: Arc<ComponentRegistry>,
	support: Arc<ConfigurationSupport>,
	settings: RuntimeSettings,
}

impl Default for Runtime {
	fn default() -> Self {
		Self::new(RuntimeSettings::default())
	}
}

impl Runtime {
	pub fn new(settings: RuntimeSettings) -> Self {
		let registry = Arc::new(ComponentRegistry::new());
		let support = Arc::new(ConfigurationSupport::new(Arc::clone(&registry), settings.clone()));
		Self {
			registry,
			support,
			settings,
		}
	}

	pub fn registry(&self) -> &Arc<ComponentRegistry> {
		&self.registry
	}

	pub fn configuration_support(&self) -> &Arc<ConfigurationSupport> {
		&self.support
	}

	pub fn settings(&self) -> &RuntimeSettings {
		&self.settings
	}

	pub fn register_unit(&self, location: impl Into<Location>) -> UnitId {
		self.registry.register_unit(location)
	}

	/// Registers a component, hands it the configurations that already exist
	/// and enables it unless its metadata says otherwise.
	pub fn register_component(
		&self,
		unit: UnitId,
		metadata: Arc<ComponentMetadata>,
		lifecycle: Arc<dyn Lifecycle>,
	) -> Result<Arc<ComponentHolder>, RuntimeError> {
		let enabled = metadata.enabled();
		let holder = self.registry.register_component(unit, metadata, lifecycle)?;
		self.support.configure_holder(&holder);
		if enabled {
			holder.enable()?;
		}
		Ok(holder)
	}

	/// Subscribes to `events` and announces `store` as available, replaying
	/// what it already holds.
	///
	/// # Errors
	///
	/// A non-transient catch-up failure. The subscription is withdrawn and the
	/// store detached in that case.
	pub fn attach_store(
		&self,
		store: Arc<dyn ConfigurationStore>,
		events: &EventSource,
	) -> Result<Subscription, RuntimeError> {
		let subscription = events.subscribe(self.support.clone());
		match self.support.source_changed(SourceEvent::Available(store)) {
			Ok(replayed) => {
				tracing::info!(replayed, "configuration store attached");
				Ok(subscription)
			}
			Err(err) => {
				events.unsubscribe(subscription);
				let _ = self.support.source_changed(SourceEvent::Unavailable);
				Err(err.into())
			}
		}
	}

	pub fn detach_store(&self, events: &EventSource, subscription: Subscription) {
		events.unsubscribe(subscription);
		let _ = self.support.source_changed(SourceEvent::Unavailable);
		tracing::info!("configuration store detached");
	}

	/// Disposes the unit's holders, then releases the configurations bound to
	/// it on first use. Returns how many holders there were.
	pub fn unregister_unit(&self, unit: UnitId) -> usize {
		let location = self.registry.unit_location(unit);
		let disposed = self.registry.unregister_unit(unit);
		if let Some(location) = location {
			self.support.unit_removed(&location);
		}
		disposed
	}

	pub fn register_service(&self, interface: &str, properties: Properties) -> ServiceRef {
		self.registry.service_registered(interface, properties)
	}

	pub fn unregister_service(&self, id: i64) -> Option<ServiceRef> {
		self.registry.service_unregistered(id)
	}

	pub fn snapshot(&self) -> RegistrySnapshot {
		self.registry.snapshot()
	}

	/// Disposes every holder of every unit.
	pub fn shutdown(&self) {
		for unit in self.registry.snapshot().units {
			self.unregister_unit(unit.id);
		}
	}
}
