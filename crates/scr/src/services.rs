//! Available services, as seen by reference resolution.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use arbor_primitives::{Properties, ServiceOrder, keys};
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::metadata::ReferenceMetadata;

/// A registered service.
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceRef {
	pub id: i64,
	pub interface: Arc<str>,
	pub properties: Arc<Properties>,
}

impl ServiceRef {
	pub fn order(&self) -> ServiceOrder {
		ServiceOrder::new(self.properties.ranking(), self.id)
	}
}

type ByInterface = FxHashMap<Arc<str>, Vec<ServiceRef>>;

/// Services currently registered, grouped by interface and kept in
/// [`ServiceOrder`]. Reads never block.
pub struct ServiceTable {
	write: Mutex<()>,
	services: ArcSwap<ByInterface>,
	next_id: AtomicI64,
}

impl Default for ServiceTable {
	fn default() -> Self {
		Self {
			write: Mutex::new(()),
			services: ArcSwap::from_pointee(FxHashMap::default()),
			next_id: AtomicI64::new(1),
		}
	}
}

impl ServiceTable {
	pub fn new() -> Self {
		Self::default()
	}

	/// Registers a service and returns its id. `service.id` is set on the
	/// stored properties.
	pub fn register(&self, interface: &str, properties: Properties) -> ServiceRef {
		let id = self.next_id.fetch_add(1, Ordering::Relaxed);
		let service = ServiceRef {
			id,
			interface: Arc::from(interface),
			properties: Arc::new(properties.with(keys::SERVICE_ID, id)),
		};

		let _guard = self.write.lock();
		let mut next = ByInterface::clone(&self.services.load());
		let list = next.entry(Arc::clone(&service.interface)).or_default();
		let pos = list.partition_point(|s| s.order() <= service.order());
		list.insert(pos, service.clone());
		self.services.store(Arc::new(next));
		tracing::debug!(service = id, interface, "service registered");
		service
	}

	pub fn unregister(&self, id: i64) -> Option<ServiceRef> {
		let _guard = self.write.lock();
		let mut next = ByInterface::clone(&self.services.load());
		let mut removed = None;
		next.retain(|_, list| {
			if let Some(pos) = list.iter().position(|s| s.id == id) {
				removed = Some(list.remove(pos));
			}
			!list.is_empty()
		});
		if removed.is_some() {
			self.services.store(Arc::new(next));
			tracing::debug!(service = id, "service unregistered");
		}
		removed
	}

	/// Services for `reference`, best first.
	pub fn matching(&self, reference: &ReferenceMetadata) -> Vec<ServiceRef> {
		let services = self.services.load();
		let Some(list) = services.get(reference.interface.as_str()) else {
			return Vec::new();
		};
		list.iter()
			.filter(|s| reference.target.as_ref().is_none_or(|f| f.matches(&s.properties)))
			.cloned()
			.collect()
	}

	pub fn is_satisfied(&self, reference: &ReferenceMetadata) -> bool {
		!reference.cardinality.is_mandatory() || !self.matching(reference).is_empty()
	}

	pub fn len(&self) -> usize {
		self.services.load().values().map(Vec::len).sum()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

impl fmt::Debug for ServiceTable {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("ServiceTable").field("services", &self.len()).finish()
	}
}
