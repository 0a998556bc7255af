//! # Component Registry
//!
//! Owning units, their component holders and the pid index configuration
//! events are routed through.
//!
//! # Role
//!
//! The registry is an explicit object handed to whoever needs it; there is no
//! process-wide table. Holders refer back to their unit by [`UnitId`], never by
//! pointer.
//!
//! # Invariants
//!
//! - Lookups load an immutable table and never block on registration.
//!   - Enforced in: [`ComponentRegistry::holders_by_pid`]
//! - Component names are unique across units.
//!   - Enforced in: [`ComponentRegistry::register_component`]
//!   - Tested by: `registry::tests::duplicate_names_are_rejected`
//! - Holders are disposed outside the registry lock, after they left the table.
//!   - Enforced in: [`ComponentRegistry::unregister_unit`]
//!   - Failure symptom: a slow deactivation blocks every registration.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use arbor_primitives::{Location, Pid, Properties};
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::Serialize;
use thiserror::Error;

use crate::holder::{ComponentHolder, HolderSnapshot};
use crate::lifecycle::{DeactivationReason, Lifecycle};
use crate::metadata::ComponentMetadata;
use crate::services::{ServiceRef, ServiceTable};


/// Handle of an owning unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct UnitId(pub(crate) u64);

impl UnitId {
	pub fn get(self) -> u64 {
		self.0
	}
}

impl fmt::Display for UnitId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "unit#{}", self.0)
	}
}

/// Errors raised while registering components.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistrationError {
	#[error("unknown {0}")]
	UnknownUnit(UnitId),

	#[error("component {name} is already registered by {unit}")]
	DuplicateComponent { name: String, unit: UnitId },
}

#[derive(Debug, Clone)]
struct UnitEntry {
	location: Location,
	components: Vec<String>,
}

#[derive(Default, Clone)]
struct Table {
	units: FxHashMap<UnitId, UnitEntry>,
	by_name: FxHashMap<String, Arc<ComponentHolder>>,
	/// Configuration pid to every holder configured by it.
	by_pid: FxHashMap<Pid, Vec<Arc<ComponentHolder>>>,
}

impl Table {
	fn unlink(&mut self, name: &str) -> Option<Arc<ComponentHolder>> {
		let holder = self.by_name.remove(name)?;
		for pid in holder.metadata().configuration_pids() {
			if let Some(list) = self.by_pid.get_mut(pid) {
				list.retain(|h| !Arc::ptr_eq(h, &holder));
				if list.is_empty() {
					self.by_pid.remove(pid);
				}
			}
		}
		Some(holder)
	}
}

/// Units, holders and the pid index.
pub struct ComponentRegistry {
	write: Mutex<()>,
	table: ArcSwap<Table>,
	next_unit: AtomicU64,
	services: Arc<ServiceTable>,
}

impl Default for ComponentRegistry {
	fn default() -> Self {
		Self::with_services(Arc::new(ServiceTable::new()))
	}
}

impl ComponentRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	/// Registry whose holders resolve references against `services`.
	pub fn with_services(services: Arc<ServiceTable>) -> Self {
		Self {
			write: Mutex::new(()),
			table: ArcSwap::from_pointee(Table::default()),
			next_unit: AtomicU64::new(1),
			services,
		}
	}

	pub fn services(&self) -> &Arc<ServiceTable> {
		&self.services
	}

	/// Adds an owning unit. Configurations bound to `location` are usable by
	/// its components.
	pub fn register_unit(&self, location: impl Into<Location>) -> UnitId {
		let unit = UnitId(self.next_unit.fetch_add(1, Ordering::Relaxed));
		let location = location.into();
		self.update(|table| {
			table.units.insert(
				unit,
				UnitEntry {
					location: location.clone(),
					components: Vec::new(),
				},
			);
		});
		tracing::debug!(%unit, %location, "unit registered");
		unit
	}

	pub fn unit_location(&self, unit: UnitId) -> Option<Location> {
		self.table.load().units.get(&unit).map(|u| u.location.clone())
	}

	/// Creates a disabled holder for `metadata` owned by `unit`.
	///
	/// # Errors
	///
	/// - [`RegistrationError::UnknownUnit`] when `unit` is not registered.
	/// - [`RegistrationError::DuplicateComponent`] when the name is taken.
	pub fn register_component(
		&self,
		unit: UnitId,
		metadata: Arc<ComponentMetadata>,
		lifecycle: Arc<dyn Lifecycle>,
	) -> Result<Arc<ComponentHolder>, RegistrationError> {
		let _guard = self.write.lock();
		let mut next = Table::clone(&self.table.load());

		let location = next
			.units
			.get(&unit)
			.map(|u| u.location.clone())
			.ok_or(RegistrationError::UnknownUnit(unit))?;
		if let Some(existing) = next.by_name.get(metadata.name()) {
			return Err(RegistrationError::DuplicateComponent {
				name: metadata.name().to_owned(),
				unit: existing.unit(),
			});
		}

		let holder = Arc::new(ComponentHolder::new(
			metadata,
			unit,
			location,
			lifecycle,
			Arc::clone(&self.services),
		));
		let name = holder.name().to_owned();
		for pid in holder.metadata().configuration_pids() {
			next.by_pid.entry(pid.clone()).or_default().push(Arc::clone(&holder));
		}
		next.by_name.insert(name.clone(), Arc::clone(&holder));
		if let Some(entry) = next.units.get_mut(&unit) {
			entry.components.push(name.clone());
		}
		self.table.store(Arc::new(next));
		tracing::debug!(component = %name, %unit, "component registered");
		Ok(holder)
	}

	/// Removes one component and disposes its holder.
	pub fn unregister_component(&self, name: &str) -> bool {
		let mut removed = None;
		self.update(|table| {
			removed = table.unlink(name);
			if let Some(holder) = &removed
				&& let Some(entry) = table.units.get_mut(&holder.unit())
			{
				entry.components.retain(|c| c != name);
			}
		});
		match removed {
			Some(holder) => {
				holder.dispose(DeactivationReason::Disposed);
				true
			}
			None => false,
		}
	}

	/// Removes a unit and disposes the holders of its components. Returns how
	/// many holders were disposed.
	pub fn unregister_unit(&self, unit: UnitId) -> usize {
		let mut holders = Vec::new();
		self.update(|table| {
			let Some(entry) = table.units.remove(&unit) else {
				return;
			};
			holders = entry.components.iter().filter_map(|name| table.unlink(name)).collect();
		});
		for holder in &holders {
			holder.dispose(DeactivationReason::UnitStopped);
		}
		if !holders.is_empty() {
			tracing::debug!(%unit, components = holders.len(), "unit unregistered");
		}
		holders.len()
	}

	/// Every holder configured by `pid`. Several components may share a pid.
	pub fn holders_by_pid(&self, pid: &Pid) -> Vec<Arc<ComponentHolder>> {
		self.table.load().by_pid.get(pid).cloned().unwrap_or_default()
	}

	pub fn holder(&self, name: &str) -> Option<Arc<ComponentHolder>> {
		self.table.load().by_name.get(name).cloned()
	}

	/// Every holder, ordered by component name.
	pub fn holders(&self) -> Vec<Arc<ComponentHolder>> {
		let mut holders: Vec<_> = self.table.load().by_name.values().cloned().collect();
		holders.sort_by(|a, b| a.name().cmp(b.name()));
		holders
	}

	/// Every configuration pid some holder is configured by.
	pub fn known_pids(&self) -> Vec<Pid> {
		let mut pids: Vec<Pid> = self.table.load().by_pid.keys().cloned().collect();
		pids.sort();
		pids
	}

	/// Publishes a service and lets every holder re-evaluate its references.
	pub fn service_registered(&self, interface: &str, properties: Properties) -> ServiceRef {
		let service = self.services.register(interface, properties);
		self.dependencies_changed();
		service
	}

	/// Withdraws a service and lets every holder re-evaluate its references.
	pub fn service_unregistered(&self, id: i64) -> Option<ServiceRef> {
		let service = self.services.unregister(id)?;
		self.dependencies_changed();
		Some(service)
	}

	fn dependencies_changed(&self) {
		for holder in self.table.load().by_name.values() {
			holder.dependencies_changed();
		}
	}

	pub fn snapshot(&self) -> RegistrySnapshot {
		let table = self.table.load();
		let mut units: Vec<UnitSnapshot> = table
			.units
			.iter()
			.map(|(id, entry)| UnitSnapshot {
				id: *id,
				location: entry.location.to_string(),
				components: entry.components.clone(),
			})
			.collect();
		units.sort_by_key(|u| u.id);
		RegistrySnapshot {
			units,
			components: self.holders().iter().map(|h| h.snapshot()).collect(),
			services: self.services.len(),
		}
	}

	fn update(&self, f: impl FnOnce(&mut Table)) {
		let _guard = self.write.lock();
		let mut next = Table::clone(&self.table.load());
		f(&mut next);
		self.table.store(Arc::new(next));
	}
}

impl fmt::Debug for ComponentRegistry {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let table = self.table.load();
		f.debug_struct("ComponentRegistry")
			.field("units", &table.units.len())
			.field("components", &table.by_name.len())
			.field("services", &self.services)
			.finish()
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnitSnapshot {
	pub id: UnitId,
	pub location: String,
	pub components: Vec<String>,
}

/// Diagnostic view of the whole registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistrySnapshot {
	pub units: Vec<UnitSnapshot>,
	pub components: Vec<HolderSnapshot>,
	pub services: usize,
}
