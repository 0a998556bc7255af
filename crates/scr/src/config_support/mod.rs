//! # Configuration Support
//!
//! Routes configuration events from the store to component holders.
//!
//! # Role
//!
//! Listens to a [`ConfigurationStore`], resolves holders through
//! [`ComponentRegistry::holders_by_pid`], fetches the current configuration,
//! checks its binding against the holder's unit and delivers it. When the
//! store becomes available, existing configurations are replayed because a
//! subscription only sees later changes.
//!
//! # Invariants
//!
//! - A failure delivering to one holder never prevents delivery to the others.
//!   - Enforced in: `ConfigurationSupport::each_holder`
//!   - Tested by: `config_support::tests::fan_out_survives_a_failing_holder`
//! - A configuration bound to another unit is never delivered (unless
//!   `ignore_bound_location` is set).
//!   - Enforced in: `ConfigurationSupport::check_binding`
//!   - Tested by: `config_support::tests::binding_is_enforced`
//! - Transient store failures are logged at warn level and skipped.
//!   - Tested by: `config_support::tests::transient_fetch_failure_is_skipped`
//! - Bindings made on first use end with the unit that made them; the freed
//!   configurations reach other units through the resulting location events.
//!   - Enforced in: `ConfigurationSupport::unit_removed`
//!   - Tested by: `config_support::tests::removed_unit_frees_its_dynamic_bindings`
//! - No holder lock is held while the store is called.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use arbor_config::{
	ConfigError, Configuration, ConfigurationEvent, ConfigurationListener, ConfigurationStore, Filter, SourceEvent,
};
use arbor_primitives::{ConfigIdentity, Location, Pid, keys};
use parking_lot::RwLock;

use crate::holder::{ComponentHolder, HolderError, panic_message};
use crate::registry::ComponentRegistry;
use crate::settings::{CatchUpScope, RuntimeSettings};

mod targeted;

pub use targeted::TargetedPid;

/// Configuration event listener and catch-up scanner.
pub struct ConfigurationSupport {
	registry: Arc<ComponentRegistry>,
	settings: RuntimeSettings,
	store: RwLock<Option<Arc<dyn ConfigurationStore>>>,
}

impl ConfigurationSupport {
	pub fn new(registry: Arc<ComponentRegistry>, settings: RuntimeSettings) -> Self {
		Self {
			registry,
			settings,
			store: RwLock::new(None),
		}
	}

	pub fn is_attached(&self) -> bool {
		self.store.read().is_some()
	}

	fn store(&self) -> Option<Arc<dyn ConfigurationStore>> {
		self.store.read().clone()
	}

	/// Tracks store availability. On `Available` every matching configuration
	/// is replayed once as an update; returns how many were replayed.
	///
	/// # Errors
	///
	/// Non-transient store errors while listing (a malformed filter). Transient
	/// ones are logged and reported as zero replayed.
	pub fn source_changed(&self, event: SourceEvent) -> Result<usize, ConfigError> {
		match event {
			SourceEvent::Available(store) => {
				*self.store.write() = Some(Arc::clone(&store));
				tracing::debug!("configuration store available");
				match self.catch_up(store.as_ref()) {
					Err(err) if err.is_transient() => {
						tracing::warn!(error = %err, "configuration catch-up skipped");
						Ok(0)
					}
					other => other,
				}
			}
			SourceEvent::Unavailable => {
				*self.store.write() = None;
				tracing::debug!("configuration store unavailable");
				Ok(0)
			}
		}
	}

	fn catch_up(&self, store: &dyn ConfigurationStore) -> Result<usize, ConfigError> {
		let configurations = match self.settings.catch_up {
			CatchUpScope::All => store.list(None)?,
			CatchUpScope::KnownPids => {
				let pids = self.registry.known_pids();
				if pids.is_empty() {
					return Ok(0);
				}
				store.list(Some(&known_pids_filter(&pids)))?
			}
		};

		let mut replayed = 0;
		for config in configurations {
			let Some(properties) = config.properties else {
				continue;
			};
			self.configuration_event(&ConfigurationEvent::Updated {
				identity: config.identity,
				properties,
				change_count: config.change_count,
			});
			replayed += 1;
		}
		tracing::debug!(replayed, "configuration catch-up done");
		Ok(replayed)
	}

	/// Delivers the configurations that apply to a freshly registered holder:
	/// the strongest singleton configuration and every factory configuration.
	/// Returns whether anything was delivered.
	pub fn configure_holder(&self, holder: &ComponentHolder) -> bool {
		if holder.metadata().is_configuration_ignored() {
			return false;
		}
		let Some(store) = self.store() else {
			return false;
		};

		let mut delivered = false;
		for base in holder.metadata().configuration_pids() {
			if let Some(config) = self.best_singleton(store.as_ref(), holder, base, None) {
				delivered |= self.deliver_logged(holder, &config);
			}

			let factories = Filter::any(vec![
				Filter::eq(keys::FACTORY_PID, base.as_str()),
				Filter::eq(
					keys::FACTORY_PID,
					TargetedPid::for_location(base, holder.location()).as_str(),
				),
			]);
			match store.list(Some(&factories)) {
				Ok(configs) => {
					for config in configs {
						delivered |= self.deliver(store.as_ref(), holder, &config);
					}
				}
				Err(err) => self.fetch_failed(base, &err),
			}
		}
		delivered
	}

	/// Releases the bindings a removed unit acquired on first use. Returns how
	/// many were released; a transient store failure releases none.
	pub fn unit_removed(&self, location: &Location) -> usize {
		let Some(store) = self.store() else {
			return 0;
		};
		match store.release_dynamic_bindings(location) {
			Ok(released) => {
				if released > 0 {
					tracing::debug!(%location, released, "unit bindings released");
				}
				released
			}
			Err(err) => {
				tracing::warn!(%location, error = %err, "releasing unit bindings failed");
				0
			}
		}
	}

	/// Targeted configuration for the holder's unit if present and usable,
	/// else the plain one.
	fn best_singleton(
		&self,
		store: &dyn ConfigurationStore,
		holder: &ComponentHolder,
		base: &Pid,
		exclude: Option<&Pid>,
	) -> Option<Configuration> {
		let candidates = [TargetedPid::for_location(base, holder.location()), base.clone()];
		candidates.iter().filter(|pid| Some(*pid) != exclude).find_map(|pid| {
			self.fetch(store, pid)
				.filter(|config| config.properties.is_some() && !config.identity.is_factory())
				.filter(|config| self.check_binding(store, config, holder))
		})
	}

	fn updated(&self, identity: &ConfigIdentity, change_count: u64) {
		let Some(store) = self.store() else {
			return;
		};
		let targeted = TargetedPid::parse(identity.target());

		self.each_holder(&targeted, identity, |holder| {
			if holder.change_count(&identity.pid).is_some_and(|applied| applied >= change_count) {
				return Ok(());
			}
			if !identity.is_factory() && self.is_outranked(holder, &targeted, &identity.pid) {
				tracing::debug!(component = %holder.name(), pid = %identity.pid, "stronger configuration already applied");
				return Ok(());
			}
			let Some(config) = self.fetch(store.as_ref(), &identity.pid) else {
				return Ok(());
			};
			if !self.check_binding(store.as_ref(), &config, holder) {
				return Ok(());
			}
			self.deliver_checked(holder, &config)?;
			Ok(())
		});
	}

	fn deleted(&self, identity: &ConfigIdentity) {
		let store = self.store();
		let targeted = TargetedPid::parse(identity.target());

		self.each_holder(&targeted, identity, |holder| self.withdraw(store.as_deref(), holder, identity));
	}

	fn location_changed(&self, identity: &ConfigIdentity, new: Option<&Location>) {
		let Some(store) = self.store() else {
			return;
		};
		let targeted = TargetedPid::parse(identity.target());

		self.each_holder(&targeted, identity, |holder| {
			let usable = self.settings.ignore_bound_location || new.is_none_or(|loc| loc == holder.location());
			let using = holder.uses_configuration(&identity.pid);
			if using && !usable {
				tracing::debug!(component = %holder.name(), pid = %identity.pid, "configuration moved away");
				return self.withdraw(Some(store.as_ref()), holder, identity);
			}
			if !using && usable {
				if !identity.is_factory() && self.is_outranked(holder, &targeted, &identity.pid) {
					return Ok(());
				}
				if let Some(config) = self.fetch(store.as_ref(), &identity.pid)
					&& self.check_binding(store.as_ref(), &config, holder)
				{
					self.deliver_checked(holder, &config)?;
				}
			}
			Ok(())
		})
	}

	/// Removes `identity` from `holder`. A singleton falls back to the next
	/// best configuration instead when one exists.
	fn withdraw(
		&self,
		store: Option<&dyn ConfigurationStore>,
		holder: &ComponentHolder,
		identity: &ConfigIdentity,
	) -> Result<(), HolderError> {
		if !identity.is_factory()
			&& holder.uses_configuration(&identity.pid)
			&& let Some(store) = store
		{
			let base = TargetedPid::parse(&identity.pid);
			if let Some(config) = self.best_singleton(store, holder, base.base(), Some(&identity.pid)) {
				tracing::debug!(component = %holder.name(), from = %identity.pid, to = %config.identity.pid, "falling back");
				self.deliver_checked(holder, &config)?;
				return Ok(());
			}
		}
		holder.configuration_deleted(&identity.pid)?;
		Ok(())
	}

	/// Whether `holder` already runs with a configuration that binds stronger
	/// than `targeted`.
	fn is_outranked(&self, holder: &ComponentHolder, targeted: &TargetedPid, pid: &Pid) -> bool {
		holder
			.configuration_source()
			.filter(|current| &current.pid != pid && !current.is_factory())
			.is_some_and(|current| TargetedPid::parse(&current.pid).binds_stronger(targeted))
	}

	/// Runs `f` for every holder `targeted` applies to, isolating failures.
	fn each_holder(
		&self,
		targeted: &TargetedPid,
		identity: &ConfigIdentity,
		f: impl Fn(&ComponentHolder) -> Result<(), HolderError>,
	) {
		for holder in self.registry.holders_by_pid(targeted.base()) {
			if !targeted.matches(holder.location()) {
				continue;
			}
			match catch_unwind(AssertUnwindSafe(|| f(holder.as_ref()))) {
				Ok(Ok(())) => {}
				Ok(Err(err @ HolderError::Disposed { .. })) => {
					tracing::debug!(pid = %identity.pid, error = %err, "holder disposed during delivery");
				}
				Ok(Err(err)) => {
					tracing::error!(component = %holder.name(), pid = %identity.pid, error = %err, "configuration delivery failed");
				}
				Err(panic) => {
					tracing::error!(
						component = %holder.name(),
						pid = %identity.pid,
						error = %panic_message(&*panic),
						"configuration delivery panicked"
					);
				}
			}
		}
	}

	/// Binding check then delivery, for callers outside `each_holder`.
	fn deliver(&self, store: &dyn ConfigurationStore, holder: &ComponentHolder, config: &Configuration) -> bool {
		self.check_binding(store, config, holder) && self.deliver_logged(holder, config)
	}

	fn deliver_logged(&self, holder: &ComponentHolder, config: &Configuration) -> bool {
		match self.deliver_checked(holder, config) {
			Ok(delivered) => delivered,
			Err(err) => {
				tracing::error!(component = %holder.name(), pid = %config.identity.pid, error = %err, "configuration delivery failed");
				false
			}
		}
	}

	fn deliver_checked(&self, holder: &ComponentHolder, config: &Configuration) -> Result<bool, HolderError> {
		let Some(properties) = config.properties.clone() else {
			return Ok(false);
		};
		tracing::debug!(
			component = %holder.name(),
			pid = %config.identity.pid,
			change_count = config.change_count,
			"delivering configuration"
		);
		holder.configuration_updated(&config.identity, properties, config.change_count)?;
		Ok(true)
	}

	/// Whether `holder` may use `config`. An unbound configuration is bound to
	/// the holder's unit on first use.
	fn check_binding(&self, store: &dyn ConfigurationStore, config: &Configuration, holder: &ComponentHolder) -> bool {
		if self.settings.ignore_bound_location {
			return true;
		}
		let result = match &config.bound_location {
			Some(bound) if bound == holder.location() => return true,
			Some(bound) => Err(ConfigError::BoundElsewhere {
				pid: config.identity.pid.clone(),
				bound: bound.clone(),
				requested: holder.location().clone(),
			}),
			None => store.bind_location(&config.identity.pid, holder.location()),
		};
		match result {
			Ok(()) => true,
			Err(err @ ConfigError::BoundElsewhere { .. }) => {
				tracing::error!(component = %holder.name(), location = %holder.location(), error = %err, "configuration not delivered");
				false
			}
			Err(err) => {
				self.fetch_failed(&config.identity.pid, &err);
				false
			}
		}
	}

	fn fetch(&self, store: &dyn ConfigurationStore, pid: &Pid) -> Option<Configuration> {
		match store.get(pid) {
			Ok(config) => config,
			Err(err) => {
				self.fetch_failed(pid, &err);
				None
			}
		}
	}

	fn fetch_failed(&self, pid: &Pid, err: &ConfigError) {
		if err.is_transient() {
			tracing::warn!(%pid, error = %err, "configuration fetch failed, skipping");
		} else {
			tracing::error!(%pid, error = %err, "configuration fetch failed");
		}
	}
}

impl ConfigurationListener for ConfigurationSupport {
	fn configuration_event(&self, event: &ConfigurationEvent) {
		tracing::debug!(kind = event.kind(), pid = %event.identity().pid, "configuration event");
		match event {
			ConfigurationEvent::Updated {
				identity, change_count, ..
			} => self.updated(identity, *change_count),
			ConfigurationEvent::Deleted { identity } => self.deleted(identity),
			ConfigurationEvent::LocationChanged { identity, new, .. } => self.location_changed(identity, new.as_ref()),
		}
	}
}

impl std::fmt::Debug for ConfigurationSupport {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ConfigurationSupport")
			.field("settings", &self.settings)
			.field("attached", &self.is_attached())
			.finish_non_exhaustive()
	}
}

/// Filter selecting every configuration, plain or targeted, singleton or
/// factory, that one of `pids` configures.
fn known_pids_filter(pids: &[Pid]) -> Filter {
	let mut filters = Vec::with_capacity(pids.len() * 4);
	for pid in pids {
		let targeted = format!("{pid}|");
		filters.push(Filter::eq(keys::SERVICE_PID, pid.as_str()));
		filters.push(Filter::prefix(keys::SERVICE_PID, &targeted));
		filters.push(Filter::eq(keys::FACTORY_PID, pid.as_str()));
		filters.push(Filter::prefix(keys::FACTORY_PID, &targeted));
	}
	Filter::any(filters)
}
