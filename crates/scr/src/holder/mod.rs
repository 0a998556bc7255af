//! # Component Holder
//!
//! Owns the live instances of one component description.
//!
//! # Role
//!
//! A holder receives configuration deliveries and service availability
//! changes and drives each instance through
//! `Unsatisfied -> Configuring -> Active -> (Reconfiguring -> Active)* -> Disposed`.
//! It never talks to the configuration store: [`crate::config_support`] fetches
//! and filters, the holder only applies.
//!
//! # Invariants
//!
//! - Every mutating operation runs under the holder's own lock; holders never
//!   share a lock, so a slow activation stalls only its own component.
//!   - Enforced in: [`ComponentHolder::with_state`]
//! - Delivering the same `(pid, change count)` twice does not re-run lifecycle
//!   callbacks.
//!   - Enforced in: [`ComponentHolder::configuration_updated`]
//!   - Tested by: `holder::tests::duplicate_delivery_is_ignored`
//!   - Failure symptom: components restart on every catch-up scan.
//! - A failed or panicking activation leaves the instance `Unsatisfied` with the
//!   error recorded, never `Active`.
//!   - Enforced in: [`ComponentHolder::activate`]
//!   - Tested by: `holder::tests::failed_activation_stays_unsatisfied`
//! - Once disposed, every operation returns [`HolderError::Disposed`].
//!   - Tested by: `holder::tests::disposed_holder_rejects_operations`
//! - A dependency change is settled by whichever thread next releases the
//!   lock, readers included, so it is never dropped.
//!   - Enforced in: [`ComponentHolder::read_state`]
//!   - Tested by: `holder::tests::dependency_change_racing_a_reader_is_settled`
//!
//! # Reentrancy
//!
//! Lifecycle callbacks run under the holder lock. A callback may register or
//! unregister services; the resulting [`ComponentHolder::dependencies_changed`]
//! on this same holder only marks it dirty, and the thread holding the lock
//! settles the change before releasing it.

use std::any::Any;
use std::collections::BTreeMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use arbor_primitives::{ConfigIdentity, Location, Pid, Properties};
use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;

use crate::lifecycle::{ActivationContext, DeactivationReason, Lifecycle, Modified};
use crate::metadata::{ComponentMetadata, ConfigurationPolicy};
use crate::registry::UnitId;
use crate::services::{ServiceRef, ServiceTable};

mod instance;
#[cfg(test)]
mod tests;

pub(crate) use instance::Instance;
pub use instance::{InstanceKind, InstanceSnapshot, InstanceState};

/// Errors returned by holder operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HolderError {
	/// The holder was disposed; it accepts nothing any more.
	#[error("component {component} has been disposed")]
	Disposed { component: String },

	#[error("component {component} is not a component factory")]
	NotAFactory { component: String },

	#[error("component {component} is disabled")]
	Disabled { component: String },

	/// The component requires a configuration and has none.
	#[error("component {component} requires a configuration")]
	ConfigurationRequired { component: String },

	/// A component factory instance could not be activated.
	#[error("component {component}: instance failed to activate: {message}")]
	ActivationFailed { component: String, message: String },

	#[error("component {component} has no instance {instance}")]
	UnknownInstance { component: String, instance: Pid },
}

/// Configuration a component factory hands to the instances it creates.
#[derive(Debug, Clone)]
struct FactoryConfiguration {
	source: ConfigIdentity,
	properties: Arc<Properties>,
	change_count: u64,
}

#[derive(Debug)]
pub(crate) struct HolderState {
	enabled: bool,
	disposed: Option<DeactivationReason>,
	instances: BTreeMap<Pid, Instance>,
	/// Singleton configuration of a component factory.
	factory_configuration: Option<FactoryConfiguration>,
	next_factory_instance: u64,
}

/// Owns the instances of one component.
pub struct ComponentHolder {
	metadata: Arc<ComponentMetadata>,
	unit: UnitId,
	location: Location,
	lifecycle: Arc<dyn Lifecycle>,
	services: Arc<ServiceTable>,
	state: Mutex<HolderState>,
	/// Service availability changed and has not been evaluated yet.
	dependencies_dirty: AtomicBool,
}

impl ComponentHolder {
	/// Creates a disabled holder without instances.
	pub fn new(
		metadata: Arc<ComponentMetadata>,
		unit: UnitId,
		location: Location,
		lifecycle: Arc<dyn Lifecycle>,
		services: Arc<ServiceTable>,
	) -> Self {
		Self {
			metadata,
			unit,
			location,
			lifecycle,
			services,
			state: Mutex::new(HolderState {
				enabled: false,
				disposed: None,
				instances: BTreeMap::new(),
				factory_configuration: None,
				next_factory_instance: 0,
			}),
			dependencies_dirty: AtomicBool::new(false),
		}
	}

	pub fn metadata(&self) -> &Arc<ComponentMetadata> {
		&self.metadata
	}

	pub fn name(&self) -> &str {
		self.metadata.name()
	}

	pub fn unit(&self) -> UnitId {
		self.unit
	}

	/// Location of the owning unit, checked against configuration bindings.
	pub fn location(&self) -> &Location {
		&self.location
	}

	/// Applies a configuration. Returns `true` when a new instance was created
	/// for it.
	///
	/// A delivery whose identity matches the applied one and whose change count
	/// is not newer is ignored.
	///
	/// # Errors
	///
	/// [`HolderError::Disposed`] after [`dispose`](Self::dispose).
	pub fn configuration_updated(
		&self,
		identity: &ConfigIdentity,
		properties: Arc<Properties>,
		change_count: u64,
	) -> Result<bool, HolderError> {
		self.with_state(|state| {
			self.check_live(state)?;
			if self.metadata.is_configuration_ignored() {
				return Ok(false);
			}
			let enabled = state.enabled;

			if !identity.is_factory() && self.metadata.is_factory() {
				if state
					.factory_configuration
					.as_ref()
					.is_some_and(|c| &c.source == identity && change_count <= c.change_count)
				{
					return Ok(false);
				}
				state.factory_configuration = Some(FactoryConfiguration {
					source: identity.clone(),
					properties: Arc::clone(&properties),
					change_count,
				});
				for inst in state.instances.values_mut() {
					apply(inst, identity, &properties, change_count);
					if enabled {
						self.reconfigure(inst);
					}
				}
				return Ok(false);
			}

			let (key, kind) = if identity.is_factory() {
				(identity.pid.clone(), InstanceKind::FactoryConfiguration)
			} else {
				(self.singleton_key(), InstanceKind::Singleton)
			};

			if let Some(inst) = state.instances.get_mut(&key) {
				if is_duplicate(inst, identity, change_count) {
					tracing::debug!(component = %self.name(), pid = %identity.pid, change_count, "duplicate delivery ignored");
					return Ok(false);
				}
				apply(inst, identity, &properties, change_count);
				if enabled {
					self.reconfigure(inst);
				}
				return Ok(false);
			}

			let mut inst = Instance::new(key.clone(), kind);
			apply(&mut inst, identity, &properties, change_count);
			if enabled {
				self.activate(&mut inst);
			}
			state.instances.insert(key, inst);
			Ok(true)
		})
	}

	/// Withdraws configuration `pid`. Returns whether any instance used it.
	///
	/// Factory configuration instances are removed. A singleton under
	/// [`ConfigurationPolicy::Require`] is removed, one under
	/// [`ConfigurationPolicy::Optional`] restarts unconfigured.
	///
	/// # Errors
	///
	/// [`HolderError::Disposed`] after [`dispose`](Self::dispose).
	pub fn configuration_deleted(&self, pid: &Pid) -> Result<bool, HolderError> {
		self.with_state(|state| {
			self.check_live(state)?;
			if self.metadata.is_configuration_ignored() {
				return Ok(false);
			}

			if state
				.factory_configuration
				.as_ref()
				.is_some_and(|c| &c.source.pid == pid)
			{
				state.factory_configuration = None;
				let enabled = state.enabled;
				for inst in state.instances.values_mut() {
					clear(inst);
					if enabled {
						self.reconfigure(inst);
					}
				}
				return Ok(true);
			}

			let Some(key) = state
				.instances
				.values()
				.find(|inst| inst.source.as_ref().is_some_and(|s| &s.pid == pid))
				.map(|inst| inst.key.clone())
			else {
				return Ok(false);
			};

			let keep = state.instances.get(&key).is_some_and(|inst| {
				inst.kind == InstanceKind::Singleton && self.metadata.policy() == ConfigurationPolicy::Optional
			});
			if keep {
				let enabled = state.enabled;
				if let Some(inst) = state.instances.get_mut(&key) {
					self.deactivate(inst, DeactivationReason::ConfigurationDeleted);
					clear(inst);
					if enabled {
						self.activate(inst);
					}
				}
			} else if let Some(mut inst) = state.instances.remove(&key) {
				self.deactivate(&mut inst, DeactivationReason::ConfigurationDeleted);
				inst.state = InstanceState::Disposed;
				tracing::debug!(component = %self.name(), instance = %inst.key, "instance removed");
			}
			Ok(true)
		})
	}

	/// Last change count applied from `pid`, or `None` when `pid` was never
	/// delivered. Callers use it to skip fetching an unchanged configuration.
	pub fn change_count(&self, pid: &Pid) -> Option<u64> {
		self.read_state(|state| {
			if let Some(config) = state.factory_configuration.as_ref().filter(|c| &c.source.pid == pid) {
				return Some(config.change_count);
			}
			state
				.instances
				.values()
				.find(|inst| inst.source.as_ref().is_some_and(|s| &s.pid == pid))
				.and_then(|inst| inst.change_count)
		})
	}

	/// Identity of the singleton configuration currently applied.
	pub fn configuration_source(&self) -> Option<ConfigIdentity> {
		self.read_state(|state| {
			if let Some(config) = &state.factory_configuration {
				return Some(config.source.clone());
			}
			state
				.instances
				.get(&self.singleton_key())
				.and_then(|inst| inst.source.clone())
		})
	}

	/// Whether any instance currently runs with configuration `pid`.
	pub fn uses_configuration(&self, pid: &Pid) -> bool {
		self.change_count(pid).is_some()
	}

	/// Starts activating instances. Components that run without configuration
	/// get their default instance here.
	///
	/// # Errors
	///
	/// [`HolderError::Disposed`] after [`dispose`](Self::dispose).
	pub fn enable(&self) -> Result<(), HolderError> {
		self.with_state(|state| {
			self.check_live(state)?;
			if state.enabled {
				return Ok(());
			}
			state.enabled = true;

			let key = self.singleton_key();
			if !self.metadata.is_factory()
				&& self.metadata.policy() != ConfigurationPolicy::Require
				&& !state.instances.contains_key(&key)
			{
				state.instances.insert(key.clone(), Instance::new(key, InstanceKind::Singleton));
			}
			for inst in state.instances.values_mut() {
				self.activate(inst);
			}
			tracing::debug!(component = %self.name(), "enabled");
			Ok(())
		})
	}

	/// Deactivates every instance but keeps the applied configurations.
	///
	/// # Errors
	///
	/// [`HolderError::Disposed`] after [`dispose`](Self::dispose).
	pub fn disable(&self) -> Result<(), HolderError> {
		self.with_state(|state| {
			self.check_live(state)?;
			if !state.enabled {
				return Ok(());
			}
			state.enabled = false;
			for inst in state.instances.values_mut() {
				self.deactivate(inst, DeactivationReason::Disabled);
			}
			tracing::debug!(component = %self.name(), "disabled");
			Ok(())
		})
	}

	pub fn is_enabled(&self) -> bool {
		self.read_state(|state| state.enabled)
	}

	/// Deactivates and drops every instance. Waits for an in-flight operation
	/// to finish; afterwards every operation fails with
	/// [`HolderError::Disposed`]. Returns `false` if already disposed.
	pub fn dispose(&self, reason: DeactivationReason) -> bool {
		self.with_state(|state| {
			if state.disposed.is_some() {
				return false;
			}
			for (_, mut inst) in std::mem::take(&mut state.instances) {
				self.deactivate(&mut inst, reason);
				inst.state = InstanceState::Disposed;
			}
			state.factory_configuration = None;
			state.enabled = false;
			state.disposed = Some(reason);
			tracing::debug!(component = %self.name(), ?reason, "disposed");
			true
		})
	}

	pub fn is_disposed(&self) -> bool {
		self.read_state(|state| state.disposed.is_some())
	}

	/// Re-evaluates references after services came or went.
	///
	/// Active instances that lost a mandatory reference deactivate; unsatisfied
	/// instances whose references are now satisfied activate. If another thread
	/// holds the holder lock, that thread settles the change before releasing.
	pub fn dependencies_changed(&self) {
		self.dependencies_dirty.store(true, Ordering::Release);
		self.settle_pending();
	}

	/// Creates an instance of a component factory with `properties` layered on
	/// top of its configuration. Returns the instance key.
	///
	/// # Errors
	///
	/// - [`HolderError::NotAFactory`] for regular components.
	/// - [`HolderError::Disabled`] while the holder is disabled.
	/// - [`HolderError::ConfigurationRequired`] for a factory that requires a
	///   configuration before one arrived.
	/// - [`HolderError::ActivationFailed`] when the instance cannot activate;
	///   nothing is kept in that case.
	pub fn new_instance(&self, properties: Properties) -> Result<Pid, HolderError> {
		self.with_state(|state| {
			self.check_live(state)?;
			if !self.metadata.is_factory() {
				return Err(HolderError::NotAFactory {
					component: self.name().to_owned(),
				});
			}
			if !state.enabled {
				return Err(HolderError::Disabled {
					component: self.name().to_owned(),
				});
			}

			if self.metadata.policy() == ConfigurationPolicy::Require && state.factory_configuration.is_none() {
				return Err(HolderError::ConfigurationRequired {
					component: self.name().to_owned(),
				});
			}

			state.next_factory_instance += 1;
			let key = Pid::new(format!("{}#{}", self.name(), state.next_factory_instance));
			let mut inst = Instance::new(key.clone(), InstanceKind::ComponentFactory);
			inst.extra = Some(properties);
			if let Some(config) = &state.factory_configuration {
				apply(&mut inst, &config.source, &config.properties, config.change_count);
			}
			self.activate(&mut inst);
			if inst.state != InstanceState::Active {
				return Err(HolderError::ActivationFailed {
					component: self.name().to_owned(),
					message: inst.last_error.unwrap_or_else(|| "references unsatisfied".to_owned()),
				});
			}
			state.instances.insert(key.clone(), inst);
			Ok(key)
		})
	}

	/// Deactivates and drops one component factory instance.
	///
	/// # Errors
	///
	/// [`HolderError::UnknownInstance`] when `key` names no factory instance.
	pub fn dispose_instance(&self, key: &Pid) -> Result<(), HolderError> {
		self.with_state(|state| {
			self.check_live(state)?;
			match state.instances.get(key) {
				Some(inst) if inst.kind == InstanceKind::ComponentFactory => {}
				_ => {
					return Err(HolderError::UnknownInstance {
						component: self.name().to_owned(),
						instance: key.clone(),
					});
				}
			}
			if let Some(mut inst) = state.instances.remove(key) {
				self.deactivate(&mut inst, DeactivationReason::Disposed);
				inst.state = InstanceState::Disposed;
			}
			Ok(())
		})
	}

	/// Diagnostic view; available even after disposal.
	pub fn snapshot(&self) -> HolderSnapshot {
		self.read_state(|state| HolderSnapshot {
			component: self.name().to_owned(),
			unit: self.unit.get(),
			location: self.location.to_string(),
			policy: self.metadata.policy(),
			factory: self.metadata.factory().map(str::to_owned),
			enabled: state.enabled,
			disposed: state.disposed,
			configuration_pids: self.metadata.configuration_pids().iter().map(ToString::to_string).collect(),
			instances: state.instances.values().map(Instance::snapshot).collect(),
		})
	}

	fn singleton_key(&self) -> Pid {
		Pid::new(self.name())
	}

	fn check_live(&self, state: &HolderState) -> Result<(), HolderError> {
		if state.disposed.is_some() {
			return Err(HolderError::Disposed {
				component: self.name().to_owned(),
			});
		}
		Ok(())
	}

	/// Read-only access under the holder lock. Settles like
	/// [`with_state`](Self::with_state): a dependency change that found the
	/// lock taken by a reader is not lost.
	pub(crate) fn read_state<T>(&self, f: impl FnOnce(&HolderState) -> T) -> T {
		self.with_state(|state| f(state))
	}

	/// Runs `f` under the holder lock, then settles dependency changes that
	/// arrived meanwhile. Every lock of `state` goes through here or
	/// [`read_state`](Self::read_state); only `settle_pending` may `try_lock`.
	fn with_state<T>(&self, f: impl FnOnce(&mut HolderState) -> T) -> T {
		let mut state = self.state.lock();
		let out = f(&mut state);
		self.settle(&mut state);
		drop(state);
		self.settle_pending();
		out
	}

	fn settle(&self, state: &mut HolderState) {
		while self.dependencies_dirty.swap(false, Ordering::AcqRel) {
			self.reevaluate(state);
		}
	}

	/// Settles if the lock is free. A busy lock means its owner settles on
	/// release.
	fn settle_pending(&self) {
		while self.dependencies_dirty.load(Ordering::Acquire) {
			let Some(mut state) = self.state.try_lock() else {
				return;
			};
			self.settle(&mut state);
		}
	}

	fn reevaluate(&self, state: &mut HolderState) {
		if state.disposed.is_some() || !state.enabled {
			return;
		}
		for inst in state.instances.values_mut() {
			match inst.state {
				InstanceState::Active if self.bind_references().is_none() => {
					tracing::debug!(component = %self.name(), instance = %inst.key, "mandatory reference lost");
					self.deactivate(inst, DeactivationReason::ReferenceUnsatisfied);
				}
				InstanceState::Unsatisfied => self.activate(inst),
				_ => {}
			}
		}
	}

	/// Services for every reference, or `None` when a mandatory one has none.
	fn bind_references(&self) -> Option<BTreeMap<String, Vec<ServiceRef>>> {
		let mut bound = BTreeMap::new();
		for reference in self.metadata.references() {
			let mut services = self.services.matching(reference);
			if services.is_empty() && reference.cardinality.is_mandatory() {
				return None;
			}
			if !reference.cardinality.is_multiple() {
				services.truncate(1);
			}
			bound.insert(reference.name.clone(), services);
		}
		Some(bound)
	}

	fn activate(&self, inst: &mut Instance) {
		if inst.state == InstanceState::Active {
			return;
		}
		let Some(bound) = self.bind_references() else {
			inst.state = InstanceState::Unsatisfied;
			tracing::debug!(component = %self.name(), instance = %inst.key, "references unsatisfied");
			return;
		};

		inst.state = InstanceState::Configuring;
		let properties = inst.effective_properties(self.name(), self.metadata.properties());
		let result = {
			let ctx = ActivationContext {
				component: self.name(),
				instance: &inst.key,
				properties: &properties,
				bound: &bound,
			};
			catch_unwind(AssertUnwindSafe(|| self.lifecycle.activate(&ctx)))
		};

		match result {
			Ok(Ok(())) => {
				inst.state = InstanceState::Active;
				inst.bound = bound;
				inst.activations += 1;
				inst.last_error = None;
				tracing::debug!(component = %self.name(), instance = %inst.key, "activated");
			}
			Ok(Err(err)) => self.fail(inst, err.to_string()),
			Err(panic) => self.fail(inst, panic_message(&*panic)),
		}
	}

	fn fail(&self, inst: &mut Instance, error: String) {
		tracing::error!(component = %self.name(), instance = %inst.key, %error, "activation failed");
		inst.state = InstanceState::Unsatisfied;
		inst.bound.clear();
		inst.last_error = Some(error);
	}

	fn deactivate(&self, inst: &mut Instance, reason: DeactivationReason) {
		if inst.state != InstanceState::Active {
			inst.state = InstanceState::Unsatisfied;
			return;
		}
		let properties = inst.effective_properties(self.name(), self.metadata.properties());
		let result = {
			let ctx = ActivationContext {
				component: self.name(),
				instance: &inst.key,
				properties: &properties,
				bound: &inst.bound,
			};
			catch_unwind(AssertUnwindSafe(|| self.lifecycle.deactivate(&ctx, reason)))
		};
		if let Err(panic) = result {
			tracing::error!(
				component = %self.name(),
				instance = %inst.key,
				error = %panic_message(&*panic),
				"deactivation panicked"
			);
		}
		inst.state = InstanceState::Unsatisfied;
		inst.bound.clear();
		tracing::debug!(component = %self.name(), instance = %inst.key, ?reason, "deactivated");
	}

	/// Hands new properties to an active instance, or activates an inactive one.
	fn reconfigure(&self, inst: &mut Instance) {
		if inst.state != InstanceState::Active {
			self.activate(inst);
			return;
		}

		inst.state = InstanceState::Reconfiguring;
		let properties = inst.effective_properties(self.name(), self.metadata.properties());
		let result = {
			let ctx = ActivationContext {
				component: self.name(),
				instance: &inst.key,
				properties: &properties,
				bound: &inst.bound,
			};
			catch_unwind(AssertUnwindSafe(|| self.lifecycle.modified(&ctx)))
		};
		inst.state = InstanceState::Active;

		match result {
			Ok(Ok(Modified::Applied)) => {
				tracing::debug!(component = %self.name(), instance = %inst.key, "configuration applied");
			}
			Ok(Ok(Modified::Reactivate)) => {
				self.deactivate(inst, DeactivationReason::ConfigurationModified);
				self.activate(inst);
			}
			Ok(Err(err)) => {
				self.deactivate(inst, DeactivationReason::ConfigurationModified);
				self.fail(inst, err.to_string());
			}
			Err(panic) => {
				self.deactivate(inst, DeactivationReason::ConfigurationModified);
				self.fail(inst, panic_message(&*panic));
			}
		}
	}
}

impl std::fmt::Debug for ComponentHolder {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ComponentHolder")
			.field("component", &self.name())
			.field("unit", &self.unit)
			.field("location", &self.location)
			.finish_non_exhaustive()
	}
}

fn is_duplicate(inst: &Instance, identity: &ConfigIdentity, change_count: u64) -> bool {
	inst.source.as_ref() == Some(identity) && inst.change_count.is_some_and(|applied| change_count <= applied)
}

fn apply(inst: &mut Instance, identity: &ConfigIdentity, properties: &Arc<Properties>, change_count: u64) {
	inst.source = Some(identity.clone());
	inst.configuration = Some(Arc::clone(properties));
	inst.change_count = Some(change_count);
}

fn clear(inst: &mut Instance) {
	inst.source = None;
	inst.configuration = None;
	inst.change_count = None;
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
	if let Some(msg) = payload.downcast_ref::<&str>() {
		(*msg).to_owned()
	} else if let Some(msg) = payload.downcast_ref::<String>() {
		msg.clone()
	} else {
		"panic".to_owned()
	}
}

/// Diagnostic view of a holder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HolderSnapshot {
	pub component: String,
	pub unit: u64,
	pub location: String,
	pub policy: ConfigurationPolicy,
	pub factory: Option<String>,
	pub enabled: bool,
	pub disposed: Option<DeactivationReason>,
	pub configuration_pids: Vec<String>,
	pub instances: Vec<InstanceSnapshot>,
}

impl HolderSnapshot {
	pub fn active_instances(&self) -> usize {
		self.instances.iter().filter(|i| i.state == InstanceState::Active).count()
	}
}
