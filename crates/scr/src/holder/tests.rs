use std::sync::{Arc, Barrier, OnceLock, Weak};
use std::thread;

use arbor_primitives::{ConfigIdentity, Pid, Properties};
use pretty_assertions::assert_eq;

use super::*;
use crate::lifecycle::ActivationError;
use crate::metadata::{Cardinality, ComponentMetadata, ConfigurationPolicy};
use crate::test_fixtures::{Recorder, holder, holder_with, props, singleton};

fn meta(policy: ConfigurationPolicy) -> Arc<ComponentMetadata> {
	ComponentMetadata::builder("web").policy(policy).build().unwrap()
}

fn states(holder: &ComponentHolder) -> Vec<(String, InstanceState)> {
	holder.snapshot().instances.into_iter().map(|i| (i.key, i.state)).collect()
}

#[test]
fn duplicate_delivery_is_ignored() {
	let recorder = Recorder::applying();
	let holder = holder(meta(ConfigurationPolicy::Require), recorder.clone());
	holder.enable().unwrap();
	assert!(states(&holder).is_empty());

	assert!(holder.configuration_updated(&singleton("web"), props(&[("port", "80")]), 1).unwrap());
	assert!(!holder.configuration_updated(&singleton("web"), props(&[("port", "80")]), 1).unwrap());
	assert_eq!(recorder.activations(), 1);
	assert_eq!(recorder.modifications(), 0);

	holder.configuration_updated(&singleton("web"), props(&[("port", "81")]), 2).unwrap();
	assert_eq!(recorder.activations(), 1);
	assert_eq!(recorder.modifications(), 1);
	assert_eq!(recorder.last_property("port").as_deref(), Some("81"));
	assert_eq!(holder.change_count(&Pid::new("web")), Some(2));
	assert_eq!(holder.change_count(&Pid::new("other")), None);
}

#[test]
fn factory_configurations_get_their_own_instances() {
	let recorder = Recorder::new();
	let holder = holder(meta(ConfigurationPolicy::Require), recorder.clone());
	holder.enable().unwrap();

	let first = ConfigIdentity::factory("web~1", "web");
	let second = ConfigIdentity::factory("web~2", "web");
	assert!(holder.configuration_updated(&first, props(&[("n", "1")]), 1).unwrap());
	assert!(holder.configuration_updated(&second, props(&[("n", "2")]), 1).unwrap());
	assert!(!holder.configuration_updated(&first, props(&[("n", "1b")]), 2).unwrap());
	assert_eq!(
		states(&holder),
		vec![
			("web~1".to_owned(), InstanceState::Active),
			("web~2".to_owned(), InstanceState::Active),
		]
	);

	assert!(holder.configuration_deleted(&Pid::new("web~1")).unwrap());
	assert_eq!(states(&holder), vec![("web~2".to_owned(), InstanceState::Active)]);
	assert_eq!(holder.change_count(&Pid::new("web~2")), Some(1));
	assert!(!holder.configuration_deleted(&Pid::new("web~1")).unwrap());
}

#[test]
fn failed_activation_stays_unsatisfied() {
	let recorder = Recorder::failing();
	let holder = holder(meta(ConfigurationPolicy::Optional), recorder.clone());
	holder.enable().unwrap();

	let snapshot = holder.snapshot();
	assert_eq!(snapshot.instances.len(), 1);
	assert_eq!(snapshot.instances[0].state, InstanceState::Unsatisfied);
	assert_eq!(snapshot.instances[0].last_error.as_deref(), Some("boom"));
	assert_eq!(recorder.activations(), 0);

	recorder.fail_activation.store(false, std::sync::atomic::Ordering::SeqCst);
	holder.configuration_updated(&singleton("web"), props(&[]), 1).unwrap();
	let snapshot = holder.snapshot();
	assert_eq!(snapshot.instances[0].state, InstanceState::Active);
	assert_eq!(snapshot.instances[0].last_error, None);
}

#[test]
fn panicking_activation_is_contained() {
	let recorder = Recorder::new();
	recorder.panic_on_activate.store(true, std::sync::atomic::Ordering::SeqCst);
	let holder = holder(meta(ConfigurationPolicy::Optional), recorder.clone());
	holder.enable().unwrap();

	let snapshot = holder.snapshot();
	assert_eq!(snapshot.instances[0].state, InstanceState::Unsatisfied);
	assert_eq!(snapshot.instances[0].last_error.as_deref(), Some("activate exploded"));
	assert!(holder.configuration_updated(&singleton("web"), props(&[]), 1).is_ok());
}

#[test]
fn disposed_holder_rejects_operations() {
	let recorder = Recorder::new();
	let holder = holder(meta(ConfigurationPolicy::Optional), recorder.clone());
	holder.enable().unwrap();
	assert_eq!(recorder.live(), 1);

	assert!(holder.dispose(DeactivationReason::UnitStopped));
	assert!(!holder.dispose(DeactivationReason::Disposed));
	assert_eq!(recorder.deactivations(), vec![DeactivationReason::UnitStopped]);
	assert!(holder.is_disposed());

	let err = HolderError::Disposed {
		component: "web".to_owned(),
	};
	assert_eq!(holder.configuration_updated(&singleton("web"), props(&[]), 1), Err(err.clone()));
	assert_eq!(holder.configuration_deleted(&Pid::new("web")), Err(err.clone()));
	assert_eq!(holder.enable(), Err(err));
	assert_eq!(holder.snapshot().disposed, Some(DeactivationReason::UnitStopped));
	assert!(holder.snapshot().instances.is_empty());
}

#[test]
fn optional_singleton_restarts_unconfigured_on_delete() {
	let recorder = Recorder::new();
	let holder = holder(meta(ConfigurationPolicy::Optional), recorder.clone());
	holder.enable().unwrap();
	assert_eq!(recorder.activations(), 1);
	assert_eq!(recorder.last_property("service.pid"), None);

	assert!(!holder.configuration_updated(&singleton("web"), props(&[("port", "80")]), 1).unwrap());
	assert_eq!(recorder.activations(), 2);
	assert_eq!(recorder.deactivations(), vec![DeactivationReason::ConfigurationModified]);
	assert_eq!(recorder.last_property("port").as_deref(), Some("80"));

	assert!(holder.configuration_deleted(&Pid::new("web")).unwrap());
	assert_eq!(recorder.activations(), 3);
	assert_eq!(recorder.deactivations()[1], DeactivationReason::ConfigurationDeleted);
	assert_eq!(recorder.last_property("port"), None);
	assert_eq!(holder.configuration_source(), None);
	assert_eq!(states(&holder), vec![("web".to_owned(), InstanceState::Active)]);
}

#[test]
fn required_singleton_is_removed_on_delete() {
	let recorder = Recorder::new();
	let holder = holder(meta(ConfigurationPolicy::Require), recorder.clone());
	holder.enable().unwrap();
	holder.configuration_updated(&singleton("web"), props(&[]), 1).unwrap();
	assert_eq!(recorder.live(), 1);

	assert!(holder.configuration_deleted(&Pid::new("web")).unwrap());
	assert_eq!(recorder.live(), 0);
	assert!(states(&holder).is_empty());
}

#[test]
fn ignore_policy_skips_configuration() {
	let recorder = Recorder::new();
	let holder = holder(meta(ConfigurationPolicy::Ignore), recorder.clone());
	holder.enable().unwrap();

	assert!(!holder.configuration_updated(&singleton("web"), props(&[("port", "80")]), 1).unwrap());
	assert_eq!(holder.change_count(&Pid::new("web")), None);
	assert_eq!(recorder.activations(), 1);
	assert_eq!(recorder.last_property("port"), None);
}

#[test]
fn disabled_holder_keeps_configuration() {
	let recorder = Recorder::new();
	let holder = holder(meta(ConfigurationPolicy::Require), recorder.clone());

	assert!(holder.configuration_updated(&singleton("web"), props(&[("port", "80")]), 1).unwrap());
	assert_eq!(recorder.activations(), 0);
	assert_eq!(states(&holder), vec![("web".to_owned(), InstanceState::Unsatisfied)]);

	holder.enable().unwrap();
	assert_eq!(recorder.activations(), 1);
	assert_eq!(recorder.last_property("port").as_deref(), Some("80"));
	assert_eq!(recorder.last_property("component.name").as_deref(), Some("web"));

	holder.disable().unwrap();
	assert_eq!(recorder.deactivations(), vec![DeactivationReason::Disabled]);
	assert_eq!(holder.change_count(&Pid::new("web")), Some(1));
	assert!(!holder.is_enabled());
}

#[test]
fn applied_modification_keeps_instance_running() {
	let recorder = Recorder::applying();
	let holder = holder(meta(ConfigurationPolicy::Optional), recorder.clone());
	holder.enable().unwrap();

	holder.configuration_updated(&singleton("web"), props(&[("port", "80")]), 1).unwrap();
	assert_eq!(recorder.activations(), 1);
	assert_eq!(recorder.modifications(), 1);
	assert!(recorder.deactivations().is_empty());
	assert_eq!(holder.snapshot().instances[0].activations, 1);
}

#[test]
fn mandatory_reference_gates_activation() {
	let services = Arc::new(ServiceTable::new());
	let metadata = ComponentMetadata::builder("web")
		.targeted_reference("log", "Log", Cardinality::MandatoryUnary, "(kind=file)")
		.build()
		.unwrap();
	let recorder = Recorder::new();
	let holder = holder_with(metadata, recorder.clone(), services.clone());
	holder.enable().unwrap();
	assert_eq!(states(&holder), vec![("web".to_owned(), InstanceState::Unsatisfied)]);

	services.register("Log", Properties::new().with("kind", "console"));
	holder.dependencies_changed();
	assert_eq!(recorder.activations(), 0);

	let log = services.register("Log", Properties::new().with("kind", "file"));
	holder.dependencies_changed();
	assert_eq!(recorder.activations(), 1);
	assert_eq!(states(&holder), vec![("web".to_owned(), InstanceState::Active)]);

	services.unregister(log.id);
	holder.dependencies_changed();
	assert_eq!(recorder.deactivations(), vec![DeactivationReason::ReferenceUnsatisfied]);
	assert_eq!(states(&holder), vec![("web".to_owned(), InstanceState::Unsatisfied)]);
}

fn log_gated() -> (Arc<ServiceTable>, Arc<Recorder>, Arc<ComponentHolder>) {
	let services = Arc::new(ServiceTable::new());
	let metadata = ComponentMetadata::builder("web")
		.reference("log", "Log", Cardinality::MandatoryUnary)
		.build()
		.unwrap();
	let recorder = Recorder::new();
	let holder = Arc::new(holder_with(metadata, recorder.clone(), services.clone()));
	holder.enable().unwrap();
	(services, recorder, holder)
}

#[test]
fn dependency_change_during_a_read_is_settled() {
	let (services, recorder, holder) = log_gated();

	holder.read_state(|_| {
		services.register("Log", Properties::new());
		holder.dependencies_changed();
	});
	assert_eq!(recorder.activations(), 1);
	assert_eq!(states(&holder), vec![("web".to_owned(), InstanceState::Active)]);
}

#[test]
fn dependency_change_racing_a_reader_is_settled() {
	let (services, recorder, holder) = log_gated();
	let reading = Arc::new(Barrier::new(2));
	let changed = Arc::new(Barrier::new(2));

	let reader = {
		let (holder, reading, changed) = (holder.clone(), reading.clone(), changed.clone());
		thread::spawn(move || {
			holder.read_state(|_| {
				reading.wait();
				changed.wait();
			});
		})
	};
	reading.wait();
	services.register("Log", Properties::new());
	holder.dependencies_changed();
	assert_eq!(recorder.activations(), 0);
	changed.wait();
	reader.join().unwrap();

	assert_eq!(recorder.activations(), 1);
}

#[test]
fn component_factory_creates_instances_on_request() {
	let recorder = Recorder::new();
	let metadata = ComponentMetadata::builder("web").factory("web.factory").build().unwrap();
	let holder = holder(metadata, recorder.clone());
	assert_eq!(
		holder.new_instance(Properties::new()),
		Err(HolderError::Disabled {
			component: "web".to_owned()
		})
	);

	holder.enable().unwrap();
	assert!(states(&holder).is_empty());

	let key = holder.new_instance(Properties::new().with("tenant", "a")).unwrap();
	assert_eq!(key, Pid::new("web#1"));
	assert_eq!(recorder.last_property("tenant").as_deref(), Some("a"));

	holder.configuration_updated(&singleton("web"), props(&[("port", "80")]), 1).unwrap();
	assert_eq!(recorder.last_property("port").as_deref(), Some("80"));

	holder.dispose_instance(&key).unwrap();
	assert_eq!(recorder.live(), 0);
	assert!(matches!(holder.dispose_instance(&key), Err(HolderError::UnknownInstance { .. })));

	let plain = crate::test_fixtures::holder(meta(ConfigurationPolicy::Optional), Recorder::new());
	assert!(matches!(plain.new_instance(Properties::new()), Err(HolderError::NotAFactory { .. })));
}

#[test]
fn failed_factory_instance_is_not_kept() {
	let metadata = ComponentMetadata::builder("web").factory("web.factory").build().unwrap();
	let holder = holder(metadata, Recorder::failing());
	holder.enable().unwrap();

	let err = holder.new_instance(Properties::new()).unwrap_err();
	assert_eq!(
		err,
		HolderError::ActivationFailed {
			component: "web".to_owned(),
			message: "boom".to_owned(),
		}
	);
	assert!(states(&holder).is_empty());
}

/// Registers a service from inside its own activation and signals the change
/// on the holder that is currently activating.
struct SelfRegistering {
	holder: OnceLock<Weak<ComponentHolder>>,
	services: Arc<ServiceTable>,
}

impl Lifecycle for SelfRegistering {
	fn activate(&self, _ctx: &ActivationContext<'_>) -> Result<(), ActivationError> {
		self.services.register("Peer", Properties::new());
		if let Some(holder) = self.holder.get().and_then(Weak::upgrade) {
			holder.dependencies_changed();
		}
		Ok(())
	}
}

#[test]
fn reentrant_dependency_change_does_not_deadlock() {
	let services = Arc::new(ServiceTable::new());
	let metadata = ComponentMetadata::builder("web")
		.reference("peers", "Peer", Cardinality::OptionalMultiple)
		.build()
		.unwrap();
	let lifecycle = Arc::new(SelfRegistering {
		holder: OnceLock::new(),
		services: services.clone(),
	});
	let holder = Arc::new(holder_with(metadata, lifecycle.clone(), services.clone()));
	lifecycle.holder.set(Arc::downgrade(&holder)).unwrap();

	holder.enable().unwrap();
	assert_eq!(states(&holder), vec![("web".to_owned(), InstanceState::Active)]);
	assert_eq!(services.len(), 1);
}
