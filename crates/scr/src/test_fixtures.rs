#![allow(dead_code)]

//! Shared fixtures for holder, registry and configuration support tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::time::Duration;

use arbor_primitives::{ConfigIdentity, Location, Properties};
use parking_lot::Mutex;

use crate::holder::ComponentHolder;
use crate::lifecycle::{ActivationContext, ActivationError, DeactivationReason, Lifecycle, Modified};
use crate::metadata::ComponentMetadata;
use crate::registry::UnitId;
use crate::services::ServiceTable;

/// Lifecycle that counts its callbacks and can be told to fail.
pub(crate) struct Recorder {
	activations: AtomicUsize,
	modifications: AtomicUsize,
	deactivations: Mutex<Vec<DeactivationReason>>,
	last_properties: Mutex<Option<Properties>>,
	pub fail_activation: AtomicBool,
	pub panic_on_activate: AtomicBool,
	modified: Modified,
}

impl Recorder {
	/// Restarts on reconfiguration.
	pub fn new() -> Arc<Self> {
		Self::with_modified(Modified::Reactivate)
	}

	/// Applies reconfiguration in place.
	pub fn applying() -> Arc<Self> {
		Self::with_modified(Modified::Applied)
	}

	fn with_modified(modified: Modified) -> Arc<Self> {
		Arc::new(Self {
			activations: AtomicUsize::new(0),
			modifications: AtomicUsize::new(0),
			deactivations: Mutex::new(Vec::new()),
			last_properties: Mutex::new(None),
			fail_activation: AtomicBool::new(false),
			panic_on_activate: AtomicBool::new(false),
			modified,
		})
	}

	pub fn failing() -> Arc<Self> {
		let recorder = Self::new();
		recorder.fail_activation.store(true, Ordering::SeqCst);
		recorder
	}

	pub fn activations(&self) -> usize {
		self.activations.load(Ordering::SeqCst)
	}

	pub fn modifications(&self) -> usize {
		self.modifications.load(Ordering::SeqCst)
	}

	pub fn deactivations(&self) -> Vec<DeactivationReason> {
		self.deactivations.lock().clone()
	}

	/// Active instances, counted from callbacks.
	pub fn live(&self) -> isize {
		self.activations() as isize - self.deactivations.lock().len() as isize
	}

	/// Property `key` as seen by the last activation or modification.
	pub fn last_property(&self, key: &str) -> Option<String> {
		self.last_properties
			.lock()
			.as_ref()
			.and_then(|p| p.get(key))
			.map(ToString::to_string)
	}
}

impl Lifecycle for Recorder {
	fn activate(&self, ctx: &ActivationContext<'_>) -> Result<(), ActivationError> {
		if self.panic_on_activate.load(Ordering::SeqCst) {
			panic!("activate exploded");
		}
		if self.fail_activation.load(Ordering::SeqCst) {
			return Err(ActivationError::new("boom"));
		}
		self.activations.fetch_add(1, Ordering::SeqCst);
		*self.last_properties.lock() = Some(ctx.properties.clone());
		Ok(())
	}

	fn modified(&self, ctx: &ActivationContext<'_>) -> Result<Modified, ActivationError> {
		self.modifications.fetch_add(1, Ordering::SeqCst);
		*self.last_properties.lock() = Some(ctx.properties.clone());
		Ok(self.modified)
	}

	fn deactivate(&self, _ctx: &ActivationContext<'_>, reason: DeactivationReason) {
		self.deactivations.lock().push(reason);
	}
}

/// How long a [`Gate`] waits before giving up on a test.
pub(crate) const GATE_TIMEOUT: Duration = Duration::from_secs(5);

/// Lifecycle whose activation blocks until the test opens it, logging each
/// step so tests can assert how other threads interleaved.
pub(crate) struct Gate {
	log: Arc<Mutex<Vec<&'static str>>>,
	entered_tx: Mutex<Sender<()>>,
	entered_rx: Mutex<Receiver<()>>,
	release_tx: Mutex<Sender<()>>,
	release_rx: Mutex<Receiver<()>>,
}

impl Gate {
	pub fn new() -> Arc<Self> {
		let (entered_tx, entered_rx) = mpsc::channel();
		let (release_tx, release_rx) = mpsc::channel();
		Arc::new(Self {
			log: Arc::new(Mutex::new(Vec::new())),
			entered_tx: Mutex::new(entered_tx),
			entered_rx: Mutex::new(entered_rx),
			release_tx: Mutex::new(release_tx),
			release_rx: Mutex::new(release_rx),
		})
	}

	/// Blocks until an activation is waiting at the gate.
	pub fn wait_entered(&self) {
		self.entered_rx
			.lock()
			.recv_timeout(GATE_TIMEOUT)
			.expect("activation never reached the gate");
	}

	/// Lets one waiting activation through.
	pub fn open(&self) {
		let _ = self.release_tx.lock().send(());
	}

	/// Shared with other threads so their steps land in the same log.
	pub fn log(&self) -> Arc<Mutex<Vec<&'static str>>> {
		Arc::clone(&self.log)
	}

	pub fn steps(&self) -> Vec<&'static str> {
		self.log.lock().clone()
	}
}

impl Lifecycle for Gate {
	fn activate(&self, _ctx: &ActivationContext<'_>) -> Result<(), ActivationError> {
		self.log.lock().push("activate-start");
		let _ = self.entered_tx.lock().send(());
		if self.release_rx.lock().recv_timeout(GATE_TIMEOUT).is_err() {
			return Err(ActivationError::new("gate never opened"));
		}
		self.log.lock().push("activate-end");
		Ok(())
	}

	fn deactivate(&self, _ctx: &ActivationContext<'_>, _reason: DeactivationReason) {
		self.log.lock().push("deactivate");
	}
}

pub(crate) fn holder(metadata: Arc<ComponentMetadata>, lifecycle: Arc<dyn Lifecycle>) -> ComponentHolder {
	holder_with(metadata, lifecycle, Arc::new(ServiceTable::new()))
}

pub(crate) fn holder_with(
	metadata: Arc<ComponentMetadata>,
	lifecycle: Arc<dyn Lifecycle>,
	services: Arc<ServiceTable>,
) -> ComponentHolder {
	ComponentHolder::new(metadata, UnitId(1), Location::new("unit:test"), lifecycle, services)
}

pub(crate) fn singleton(pid: &str) -> ConfigIdentity {
	ConfigIdentity::singleton(pid)
}

pub(crate) fn props(pairs: &[(&str, &str)]) -> Arc<Properties> {
	Arc::new(pairs.iter().map(|(k, v)| (*k, *v)).collect())
}
