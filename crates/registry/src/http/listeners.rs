//! Event listener registry.
//!
//! Unlike servlets and error pages, listeners do not compete: every listener
//! registered for a kind is active, and they are notified in ranking order.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use arbor_primitives::ServiceOrder;
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::Serialize;

use crate::core::{Candidate, FailureReason, KeySnapshot, KeyStatus, RegistrationId, RegistrationSnapshot, RegistryError};

/// Event families a listener can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ListenerKind {
	ContextLifecycle,
	ContextAttribute,
	Session,
	SessionId,
	SessionAttribute,
	Request,
	RequestAttribute,
}

impl ListenerKind {
	pub const ALL: [Self; 7] = [
		Self::ContextLifecycle,
		Self::ContextAttribute,
		Self::Session,
		Self::SessionId,
		Self::SessionAttribute,
		Self::Request,
		Self::RequestAttribute,
	];

	pub fn as_str(self) -> &'static str {
		match self {
			Self::ContextLifecycle => "context-lifecycle",
			Self::ContextAttribute => "context-attribute",
			Self::Session => "session",
			Self::SessionId => "session-id",
			Self::SessionAttribute => "session-attribute",
			Self::Request => "request",
			Self::RequestAttribute => "request-attribute",
		}
	}
}

impl fmt::Display for ListenerKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

struct Entry<C> {
	id: RegistrationId,
	order: ServiceOrder,
	kinds: Vec<ListenerKind>,
	listener: Arc<C>,
	outcome: Result<(), FailureReason>,
}

struct State<C> {
	entries: FxHashMap<RegistrationId, Arc<Entry<C>>>,
	/// Successfully initialized listeners per kind, best ranked first.
	by_kind: FxHashMap<ListenerKind, Vec<Arc<Entry<C>>>>,
}

impl<C> Clone for State<C> {
	fn clone(&self) -> Self {
		Self {
			entries: self.entries.clone(),
			by_kind: self.by_kind.clone(),
		}
	}
}

/// Listeners keyed by event kind.
pub struct ListenerRegistry<C> {
	write: Mutex<()>,
	state: ArcSwap<State<C>>,
	next_id: AtomicU64,
}

impl<C: Candidate> Default for ListenerRegistry<C> {
	fn default() -> Self {
		Self::new()
	}
}

impl<C: Candidate> ListenerRegistry<C> {
	pub fn new() -> Self {
		Self {
			write: Mutex::new(()),
			state: ArcSwap::from_pointee(State {
				entries: FxHashMap::default(),
				by_kind: FxHashMap::default(),
			}),
			next_id: AtomicU64::new(1),
		}
	}

	/// Initializes `listener` and, on success, activates it for every kind.
	/// A failed listener stays registered so its reason can be reported.
	pub fn add(&self, listener: Arc<C>, kinds: impl IntoIterator<Item = ListenerKind>) -> Result<RegistrationId, RegistryError> {
		let mut kinds: Vec<ListenerKind> = kinds.into_iter().collect();
		kinds.sort_unstable();
		kinds.dedup();
		if kinds.is_empty() {
			return Err(RegistryError::NoKeys);
		}

		let id = RegistrationId(self.next_id.fetch_add(1, Ordering::Relaxed));
		let outcome = catch_unwind(AssertUnwindSafe(|| listener.init())).unwrap_or(Err(FailureReason::ExceptionOnInit));
		if let Err(reason) = outcome {
			tracing::error!(registration = %id, listener = %listener.name(), %reason, "listener activation failed");
		}
		let entry = Arc::new(Entry {
			id,
			order: listener.order(),
			kinds,
			listener,
			outcome,
		});

		let _guard = self.write.lock();
		let mut next = State::clone(&self.state.load());
		next.entries.insert(id, Arc::clone(&entry));
		if entry.outcome.is_ok() {
			for kind in &entry.kinds {
				let list = next.by_kind.entry(*kind).or_default();
				let pos = list.partition_point(|e| e.order <= entry.order);
				list.insert(pos, Arc::clone(&entry));
			}
		}
		self.state.store(Arc::new(next));
		Ok(id)
	}

	/// Unregisters `id`, destroying it if it was initialized.
	pub fn remove(&self, id: RegistrationId) -> Result<Arc<C>, RegistryError> {
		let entry = {
			let _guard = self.write.lock();
			let mut next = State::clone(&self.state.load());
			let entry = next.entries.remove(&id).ok_or(RegistryError::UnknownRegistration(id))?;
			for kind in &entry.kinds {
				if let Some(list) = next.by_kind.get_mut(kind) {
					list.retain(|e| e.id != id);
				}
			}
			self.state.store(Arc::new(next));
			entry
		};
		if entry.outcome.is_ok() && catch_unwind(AssertUnwindSafe(|| entry.listener.destroy())).is_err() {
			tracing::error!(registration = %id, listener = %entry.listener.name(), "listener destroy panicked");
		}
		Ok(Arc::clone(&entry.listener))
	}

	/// Active listeners for `kind` in notification order.
	pub fn listeners(&self, kind: ListenerKind) -> Vec<Arc<C>> {
		self.state
			.load()
			.by_kind
			.get(&kind)
			.map(|list| list.iter().map(|e| Arc::clone(&e.listener)).collect())
			.unwrap_or_default()
	}

	pub fn status(&self, id: RegistrationId) -> Option<Vec<(ListenerKind, KeyStatus)>> {
		let state = self.state.load();
		let entry = state.entries.get(&id)?;
		Some(entry.kinds.iter().map(|kind| (*kind, entry_status(entry))).collect())
	}

	pub fn len(&self) -> usize {
		self.state.load().entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	pub fn snapshots(&self) -> Vec<RegistrationSnapshot> {
		let state = self.state.load();
		let mut out: Vec<RegistrationSnapshot> = state
			.entries
			.values()
			.map(|entry| RegistrationSnapshot {
				id: entry.id,
				name: entry.listener.name(),
				ranking: entry.order.ranking,
				service_id: entry.order.service_id,
				keys: entry
					.kinds
					.iter()
					.map(|kind| KeySnapshot {
						key: kind.to_string(),
						status: entry_status(entry),
					})
					.collect(),
			})
			.collect();
		out.sort_by_key(|s| s.id);
		out
	}

	pub fn clear(&self) {
		let ids: Vec<RegistrationId> = self.state.load().entries.keys().copied().collect();
		for id in ids {
			let _ = self.remove(id);
		}
	}
}

fn entry_status<C>(entry: &Entry<C>) -> KeyStatus {
	match entry.outcome {
		Ok(()) => KeyStatus::Active,
		Err(reason) => KeyStatus::Failed(reason),
	}
}
