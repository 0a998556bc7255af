//! Configuration store contract.

use std::sync::Arc;

use arbor_primitives::{ConfigIdentity, Location, Pid, Properties, keys};

use crate::error::Result;
use crate::filter::Filter;

/// Point-in-time copy of one stored configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Configuration {
	pub identity: ConfigIdentity,
	/// `None` until the first update supplies properties.
	pub properties: Option<Arc<Properties>>,
	pub bound_location: Option<Location>,
	/// Incremented on every successful property update.
	pub change_count: u64,
}

impl Configuration {
	pub fn pid(&self) -> &Pid {
		&self.identity.pid
	}

	/// Attributes filters are evaluated against: the properties plus the
	/// identity and binding keys.
	pub fn filter_attributes(&self) -> Properties {
		let mut attrs = self.properties.as_deref().cloned().unwrap_or_default();
		attrs.insert(keys::SERVICE_PID, self.identity.pid.as_str());
		if let Some(factory) = &self.identity.factory_pid {
			attrs.insert(keys::FACTORY_PID, factory.as_str());
		}
		if let Some(location) = &self.bound_location {
			attrs.insert(keys::BOUND_LOCATION, location.as_str());
		}
		attrs
	}

	/// Whether an owning unit at `location` may use this configuration.
	pub fn usable_by(&self, location: &Location) -> bool {
		self.bound_location.as_ref().is_none_or(|bound| bound == location)
	}
}

/// A store of persisted configurations.
///
/// Implementations may be out-of-process; every call can fail with a transient
/// [`crate::ConfigError::Io`].
pub trait ConfigurationStore: Send + Sync {
	/// Fetches the configuration for `pid`, or `None` if it does not exist.
	fn get(&self, pid: &Pid) -> Result<Option<Configuration>>;

	/// Replaces the properties of `pid`, creating it on first use. Returns the
	/// new change count.
	fn update(&self, pid: &Pid, properties: Properties) -> Result<u64>;

	/// Deletes `pid`. Deleted identities are terminal.
	fn delete(&self, pid: &Pid) -> Result<()>;

	/// Lists configurations with properties whose attributes match `filter`;
	/// `None` lists all of them.
	fn list(&self, filter: Option<&Filter>) -> Result<Vec<Configuration>>;

	/// Creates a new configuration spawned from `factory_pid` and returns its
	/// generated pid. The configuration has no properties until updated.
	fn create_factory_instance(&self, factory_pid: &Pid) -> Result<Pid>;

	/// Binds `pid` to `location`, or unbinds it when `None`. An explicit
	/// binding is static: it outlives the unit at `location`.
	fn set_bound_location(&self, pid: &Pid, location: Option<Location>) -> Result<()>;

	/// Unbinds every configuration bound to `location` by
	/// [`bind_location`](Self::bind_location), once the unit there is gone.
	/// Static bindings stay. Returns how many were released.
	fn release_dynamic_bindings(&self, location: &Location) -> Result<usize>;

	/// Binds an unbound configuration to `location` dynamically; a no-op when
	/// it is already bound there.
	///
	/// # Errors
	///
	/// [`crate::ConfigError::BoundElsewhere`] when another location holds it.
	/// Stores should override this to make the check-and-set atomic and to
	/// record the binding as dynamic.
	fn bind_location(&self, pid: &Pid, location: &Location) -> Result<()> {
		let config = self.get(pid)?.ok_or_else(|| crate::ConfigError::NotFound(pid.clone()))?;
		match config.bound_location {
			Some(bound) if &bound == location => Ok(()),
			Some(bound) => Err(crate::ConfigError::BoundElsewhere {
				pid: pid.clone(),
				bound,
				requested: location.clone(),
			}),
			None => self.set_bound_location(pid, Some(location.clone())),
		}
	}

	/// Lists with a textual filter.
	///
	/// # Errors
	///
	/// [`crate::ConfigError::InvalidFilter`] when `filter` does not parse.
	fn list_str(&self, filter: &str) -> Result<Vec<Configuration>> {
		let filter = Filter::parse(filter)?;
		self.list(Some(&filter))
	}
}
