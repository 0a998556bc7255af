//! Components publishing servlets into a ranked path registry: configuration
//! drives activation, activation drives registration, ranking picks the winner.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};

use arbor_config::{ConfigurationStore, MemoryStore};
use arbor_primitives::{Pid, Properties, ServiceOrder, keys};
use arbor_registry::http::ServletRegistry;
use arbor_registry::{Candidate, FailureReason, KeyStatus, RegistrationId};
use arbor_scr::{
	ActivationContext, ActivationError, ComponentMetadata, ConfigurationPolicy, DeactivationReason, Lifecycle, Runtime,
};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;

struct Servlet {
	label: String,
	order: ServiceOrder,
	live: AtomicUsize,
}

impl Candidate for Servlet {
	fn order(&self) -> ServiceOrder {
		self.order
	}

	fn init(&self) -> Result<(), FailureReason> {
		self.live.fetch_add(1, Ordering::SeqCst);
		Ok(())
	}

	fn destroy(&self) {
		self.live.fetch_sub(1, Ordering::SeqCst);
	}

	fn name(&self) -> String {
		self.label.clone()
	}
}

/// Registers one servlet per active instance, at the configured alias.
struct ServletComponent {
	servlets: Arc<ServletRegistry<Servlet>>,
	next_id: AtomicI64,
	registered: Mutex<BTreeMap<Pid, RegistrationId>>,
}

impl Lifecycle for ServletComponent {
	fn activate(&self, ctx: &ActivationContext<'_>) -> Result<(), ActivationError> {
		let alias = ctx
			.properties
			.get("alias")
			.and_then(|v| v.as_str())
			.ok_or_else(|| ActivationError::new("alias missing"))?;
		let label = ctx
			.properties
			.get("label")
			.map(ToString::to_string)
			.unwrap_or_else(|| ctx.instance.to_string());
		let servlet = Arc::new(Servlet {
			label,
			order: ServiceOrder::new(ctx.properties.ranking(), self.next_id.fetch_add(1, Ordering::SeqCst)),
			live: AtomicUsize::new(0),
		});
		let id = self
			.servlets
			.add(servlet, [alias])
			.map_err(|err| ActivationError::new(err.to_string()))?;
		self.registered.lock().insert(ctx.instance.clone(), id);
		Ok(())
	}

	fn deactivate(&self, ctx: &ActivationContext<'_>, _reason: DeactivationReason) {
		if let Some(id) = self.registered.lock().remove(ctx.instance) {
			let _ = self.servlets.remove(id);
		}
	}
}

fn serving(servlets: &ServletRegistry<Servlet>, path: &str) -> Option<String> {
	servlets.resolve(path).map(|r| r.servlet.label.clone())
}

fn setup() -> (Runtime, Arc<MemoryStore>, Arc<ServletRegistry<Servlet>>) {
	let runtime = Runtime::default();
	let servlets = Arc::new(ServletRegistry::new());
	let unit = runtime.register_unit("unit:web");
	let metadata = ComponentMetadata::builder("servlet")
		.policy(ConfigurationPolicy::Require)
		.build()
		.unwrap();
	let lifecycle = Arc::new(ServletComponent {
		servlets: Arc::clone(&servlets),
		next_id: AtomicI64::new(1),
		registered: Mutex::new(BTreeMap::new()),
	});
	runtime.register_component(unit, metadata, lifecycle).unwrap();

	let store = Arc::new(MemoryStore::new());
	runtime.attach_store(store.clone(), store.events()).unwrap();
	(runtime, store, servlets)
}

fn spawn(store: &MemoryStore, label: &str, alias: &str, ranking: i64) -> Pid {
	let pid = store.create_factory_instance(&Pid::new("servlet")).unwrap();
	let props = Properties::new()
		.with("label", label)
		.with("alias", alias)
		.with(keys::SERVICE_RANKING, ranking);
	store.update(&pid, props).unwrap();
	pid
}

#[test]
fn higher_ranked_configuration_takes_over_the_path() {
	let (_runtime, store, servlets) = setup();

	let low = spawn(&store, "low", "/app/*", 1);
	assert_eq!(serving(&servlets, "/app/index").as_deref(), Some("low"));

	let high = spawn(&store, "high", "/app/*", 5);
	assert_eq!(serving(&servlets, "/app/index").as_deref(), Some("high"));

	let snapshots = servlets.snapshots();
	let low_status = &snapshots.iter().find(|s| s.name == "low").unwrap().keys[0].status;
	assert_eq!(low_status, &KeyStatus::Shadowed);

	store.delete(&high).unwrap();
	assert_eq!(serving(&servlets, "/app/index").as_deref(), Some("low"));

	store.delete(&low).unwrap();
	assert_eq!(serving(&servlets, "/app/index"), None);
	assert!(servlets.snapshots().is_empty());
}

#[test]
fn reconfiguring_moves_the_servlet() {
	let (runtime, store, servlets) = setup();
	let pid = spawn(&store, "main", "/a/*", 0);
	assert_eq!(serving(&servlets, "/a/x").as_deref(), Some("main"));

	store
		.update(&pid, Properties::new().with("label", "main").with("alias", "/b/*"))
		.unwrap();
	assert_eq!(serving(&servlets, "/a/x"), None);
	assert_eq!(serving(&servlets, "/b/x").as_deref(), Some("main"));

	let snapshot = runtime.snapshot();
	assert_eq!(snapshot.components[0].instances[0].activations, 2);
}

#[test]
fn invalid_alias_leaves_instance_unsatisfied() {
	let (runtime, store, servlets) = setup();
	spawn(&store, "broken", "no-slash", 0);

	assert!(servlets.snapshots().is_empty());
	let holder = runtime.registry().holder("servlet").unwrap();
	let instance = &holder.snapshot().instances[0];
	assert_eq!(instance.state, arbor_scr::InstanceState::Unsatisfied);
	assert!(instance.last_error.as_deref().is_some_and(|e| e.contains("no-slash")));
}

#[test]
fn stopping_the_unit_unregisters_servlets() {
	let (runtime, store, servlets) = setup();
	let one = spawn(&store, "one", "/one", 0);
	let two = spawn(&store, "two", "/two", 0);
	assert_eq!(servlets.snapshots().len(), 2);
	assert!(store.get(&one).unwrap().unwrap().bound_location.is_some());

	runtime.shutdown();
	assert!(servlets.snapshots().is_empty());
	assert!(runtime.registry().holder("servlet").is_none());
	// Bound on first use by the stopped unit, so free again.
	for pid in [&one, &two] {
		assert_eq!(store.get(pid).unwrap().unwrap().bound_location, None);
	}
}
