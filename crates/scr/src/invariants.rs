#![allow(dead_code)]

use std::sync::atomic::Ordering;
use std::sync::{Arc, Barrier};
use std::thread;

use arbor_config::{ConfigurationStore, MemoryStore};
use arbor_primitives::{ConfigIdentity, Location, Pid, Properties};

use crate::holder::{ComponentHolder, HolderError, InstanceState};
use crate::lifecycle::{DeactivationReason, Lifecycle};
use crate::metadata::{Cardinality, ComponentMetadata, ConfigurationPolicy};
use crate::registry::UnitId;
use crate::runtime::Runtime;
use crate::test_fixtures::{Gate, Recorder, props};

fn required(name: &str, pid: &str) -> Arc<ComponentMetadata> {
	ComponentMetadata::builder(name)
		.configuration_pid(pid)
		.policy(ConfigurationPolicy::Require)
		.build()
		.unwrap()
}

fn register(runtime: &Runtime, unit: UnitId, name: &str, pid: &str, lifecycle: Arc<dyn Lifecycle>) {
	runtime.register_component(unit, required(name, pid), lifecycle).unwrap();
}

/// Invariant: Delivering the same `(pid, change count)` twice ends in the same
/// state and runs no lifecycle callback the second time.
pub(crate) fn inv_idempotent_delivery() {
	let runtime = Runtime::default();
	let unit = runtime.register_unit("unit:a");
	let recorder = Recorder::new();
	register(&runtime, unit, "web", "web", recorder.clone());
	let holder = runtime.registry().holder("web").unwrap();

	let identity = ConfigIdentity::singleton("web");
	for _ in 0..2 {
		holder.configuration_updated(&identity, props(&[("port", "80")]), 3).unwrap();
	}
	let before = holder.snapshot();
	holder.configuration_updated(&identity, props(&[("port", "80")]), 3).unwrap();

	assert_eq!(holder.snapshot(), before);
	assert_eq!(recorder.activations(), 1);
	assert_eq!(recorder.modifications(), 0);
	assert!(recorder.deactivations().is_empty());
}

#[cfg_attr(test, test)]
pub(crate) fn test_idempotent_delivery() {
	inv_idempotent_delivery()
}

/// Invariant: Two holders share pid `p`; one failing during delivery does not
/// keep the other from receiving it.
pub(crate) fn inv_fan_out_isolation() {
	let runtime = Runtime::default();
	let unit = runtime.register_unit("unit:a");
	let failing = Recorder::new();
	failing.panic_on_activate.store(true, Ordering::SeqCst);
	let spy = Recorder::new();
	register(&runtime, unit, "first", "p", failing);
	register(&runtime, unit, "second", "p", spy.clone());

	let store = Arc::new(MemoryStore::new());
	runtime.attach_store(store.clone(), store.events()).unwrap();
	store.update(&Pid::new("p"), Properties::new().with("k", 1)).unwrap();

	assert_eq!(spy.activations(), 1, "spy must still receive the configuration");
}

#[cfg_attr(test, test)]
pub(crate) fn test_fan_out_isolation() {
	inv_fan_out_isolation()
}

/// Invariant: Configurations existing before the store became available are
/// replayed once each when it does.
pub(crate) fn inv_catch_up_replay() {
	let runtime = Runtime::default();
	let unit = runtime.register_unit("unit:a");
	let p1 = Recorder::new();
	let p2 = Recorder::new();
	register(&runtime, unit, "c1", "p1", p1.clone());
	register(&runtime, unit, "c2", "p2", p2.clone());

	let store = Arc::new(MemoryStore::new());
	store.update(&Pid::new("p1"), Properties::new()).unwrap();
	store.update(&Pid::new("p2"), Properties::new()).unwrap();
	assert_eq!(p1.activations() + p2.activations(), 0);

	runtime.attach_store(store.clone(), store.events()).unwrap();
	assert_eq!((p1.activations(), p2.activations()), (1, 1));
}

#[cfg_attr(test, test)]
pub(crate) fn test_catch_up_replay() {
	inv_catch_up_replay()
}

/// Invariant: A configuration bound to `L1` never reaches a holder in `L2`;
/// rebinding to `L2`, or unbinding, lets it through.
pub(crate) fn inv_binding_enforcement() {
	for rebind in [Some(Location::new("L2")), None] {
		let runtime = Runtime::default();
		runtime.register_unit("L1");
		let l2 = runtime.register_unit("L2");
		let recorder = Recorder::new();
		register(&runtime, l2, "web", "p", recorder.clone());

		let store = Arc::new(MemoryStore::new());
		let pid = Pid::new("p");
		store.update(&pid, Properties::new()).unwrap();
		store.set_bound_location(&pid, Some(Location::new("L1"))).unwrap();
		runtime.attach_store(store.clone(), store.events()).unwrap();
		store.update(&pid, Properties::new().with("again", true)).unwrap();
		assert_eq!(recorder.activations(), 0, "bound to L1, delivered to L2");

		store.set_bound_location(&pid, rebind.clone()).unwrap();
		assert_eq!(recorder.activations(), 1, "rebind={rebind:?}");
	}
}

#[cfg_attr(test, test)]
pub(crate) fn test_binding_enforcement() {
	inv_binding_enforcement()
}

/// Invariant: Deleting one factory-spawned pid leaves its siblings untouched.
pub(crate) fn inv_factory_instance_isolation() {
	let runtime = Runtime::default();
	let unit = runtime.register_unit("unit:a");
	let recorder = Recorder::new();
	register(&runtime, unit, "worker", "worker", recorder.clone());
	let store = Arc::new(MemoryStore::new());
	runtime.attach_store(store.clone(), store.events()).unwrap();

	let factory = Pid::new("worker");
	let pids: Vec<Pid> = (0..3)
		.map(|n| {
			let pid = store.create_factory_instance(&factory).unwrap();
			store.update(&pid, Properties::new().with("n", n)).unwrap();
			pid
		})
		.collect();
	store.delete(&pids[1]).unwrap();

	let snapshot = runtime.registry().holder("worker").unwrap().snapshot();
	let remaining: Vec<(String, InstanceState, u64)> = snapshot
		.instances
		.into_iter()
		.map(|i| (i.key, i.state, i.activations))
		.collect();
	assert_eq!(
		remaining,
		vec![
			(pids[0].to_string(), InstanceState::Active, 1),
			(pids[2].to_string(), InstanceState::Active, 1),
		]
	);
	assert_eq!(recorder.deactivations().len(), 1);
}

#[cfg_attr(test, test)]
pub(crate) fn test_factory_instance_isolation() {
	inv_factory_instance_isolation()
}

fn attached(runtime: &Runtime) -> Arc<MemoryStore> {
	let store = Arc::new(MemoryStore::new());
	runtime.attach_store(store.clone(), store.events()).unwrap();
	store
}

fn state_of(holder: &ComponentHolder) -> Vec<InstanceState> {
	holder.snapshot().instances.iter().map(|i| i.state).collect()
}

/// Invariant: Disposing a holder while a delivery is activating it waits for
/// that delivery to finish, deactivates the instance, and afterwards every
/// delivery is rejected.
pub(crate) fn inv_dispose_waits_for_delivery() {
	let runtime = Runtime::default();
	let unit = runtime.register_unit("unit:a");
	let gate = Gate::new();
	register(&runtime, unit, "web", "p", gate.clone());
	let holder = runtime.registry().holder("web").unwrap();
	let store = attached(&runtime);

	let delivery = {
		let store = store.clone();
		thread::spawn(move || store.update(&Pid::new("p"), Properties::new()).unwrap())
	};
	gate.wait_entered();

	let disposal = {
		let (holder, log) = (holder.clone(), gate.log());
		thread::spawn(move || {
			let disposed = holder.dispose(DeactivationReason::Disposed);
			log.lock().push("disposed");
			disposed
		})
	};
	gate.open();
	delivery.join().unwrap();
	assert!(disposal.join().unwrap());

	assert_eq!(gate.steps(), vec!["activate-start", "activate-end", "deactivate", "disposed"]);
	let late = holder.configuration_updated(&ConfigIdentity::singleton("p"), props(&[]), 9);
	assert!(matches!(late, Err(HolderError::Disposed { .. })));
}

#[cfg_attr(test, test)]
pub(crate) fn test_dispose_waits_for_delivery() {
	inv_dispose_waits_for_delivery()
}

/// Invariant: A holder stuck in activation does not delay configuration of
/// another holder, even through the same store.
pub(crate) fn inv_independent_holders() {
	let runtime = Runtime::default();
	let unit = runtime.register_unit("unit:a");
	let gate = Gate::new();
	let fast = Recorder::new();
	register(&runtime, unit, "slow", "slow", gate.clone());
	register(&runtime, unit, "fast", "fast", fast.clone());
	let store = attached(&runtime);

	let blocked = {
		let store = store.clone();
		thread::spawn(move || store.update(&Pid::new("slow"), Properties::new()).unwrap())
	};
	gate.wait_entered();

	store.update(&Pid::new("fast"), Properties::new()).unwrap();
	assert_eq!(fast.activations(), 1, "fast holder waited on the slow one");
	let fast_holder = runtime.registry().holder("fast").unwrap();
	assert_eq!(state_of(&fast_holder), vec![InstanceState::Active]);
	assert_eq!(gate.steps(), vec!["activate-start"]);

	gate.open();
	blocked.join().unwrap();
	let slow_holder = runtime.registry().holder("slow").unwrap();
	assert_eq!(state_of(&slow_holder), vec![InstanceState::Active]);
}

#[cfg_attr(test, test)]
pub(crate) fn test_independent_holders() {
	inv_independent_holders()
}

/// Invariant: A service appearing while another thread holds the holder lock
/// is still seen once that thread lets go.
pub(crate) fn inv_dependency_change_not_lost() {
	let runtime = Runtime::default();
	let unit = runtime.register_unit("unit:a");
	let metadata = ComponentMetadata::builder("web")
		.reference("log", "Log", Cardinality::MandatoryUnary)
		.build()
		.unwrap();
	let recorder = Recorder::new();
	let holder = runtime.register_component(unit, metadata, recorder.clone()).unwrap();
	assert_eq!(state_of(&holder), vec![InstanceState::Unsatisfied]);

	let locked = Arc::new(Barrier::new(2));
	let changed = Arc::new(Barrier::new(2));
	let reader = {
		let (holder, locked, changed) = (holder.clone(), locked.clone(), changed.clone());
		thread::spawn(move || {
			holder.read_state(|_| {
				locked.wait();
				changed.wait();
			});
		})
	};
	locked.wait();
	runtime.register_service("Log", Properties::new());
	assert_eq!(recorder.activations(), 0);
	changed.wait();
	reader.join().unwrap();

	assert_eq!(recorder.activations(), 1);
	assert_eq!(state_of(&holder), vec![InstanceState::Active]);
}

#[cfg_attr(test, test)]
pub(crate) fn test_dependency_change_not_lost() {
	inv_dependency_change_not_lost()
}
