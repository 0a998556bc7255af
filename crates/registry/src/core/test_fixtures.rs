use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use arbor_primitives::ServiceOrder;

use super::candidate::{Candidate, FailureReason};

/// Candidate that counts its callbacks and can be told to fail activation.
#[derive(Debug)]
pub(crate) struct Contender {
	pub name: &'static str,
	pub order: ServiceOrder,
	pub inits: AtomicUsize,
	pub destroys: AtomicUsize,
	pub fail_with: Option<FailureReason>,
	pub panic_on_init: AtomicBool,
}

impl Contender {
	pub fn new(name: &'static str, ranking: i32, service_id: i64) -> Arc<Self> {
		Arc::new(Self::build(name, ranking, service_id, None))
	}

	pub fn failing(name: &'static str, ranking: i32, service_id: i64, reason: FailureReason) -> Arc<Self> {
		Arc::new(Self::build(name, ranking, service_id, Some(reason)))
	}

	fn build(name: &'static str, ranking: i32, service_id: i64, fail_with: Option<FailureReason>) -> Self {
		Self {
			name,
			order: ServiceOrder::new(ranking, service_id),
			inits: AtomicUsize::new(0),
			destroys: AtomicUsize::new(0),
			fail_with,
			panic_on_init: AtomicBool::new(false),
		}
	}

	pub fn inits(&self) -> usize {
		self.inits.load(Ordering::SeqCst)
	}

	pub fn destroys(&self) -> usize {
		self.destroys.load(Ordering::SeqCst)
	}

	/// Initialized and not yet destroyed.
	pub fn live(&self) -> bool {
		self.inits() > self.destroys()
	}
}

impl Candidate for Contender {
	fn order(&self) -> ServiceOrder {
		self.order
	}

	fn init(&self) -> Result<(), FailureReason> {
		if self.panic_on_init.load(Ordering::SeqCst) {
			panic!("contender {} refused to start", self.name);
		}
		if let Some(reason) = self.fail_with {
			return Err(reason);
		}
		self.inits.fetch_add(1, Ordering::SeqCst);
		Ok(())
	}

	fn destroy(&self) {
		self.destroys.fetch_add(1, Ordering::SeqCst);
	}

	fn name(&self) -> String {
		self.name.to_owned()
	}
}
