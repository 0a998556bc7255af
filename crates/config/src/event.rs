//! Configuration change events and their delivery.
//!
//! # Ordering
//!
//! Stores push events with [`EventSource::enqueue`] inside the critical section
//! that commits the change, then call [`EventSource::drain`] after releasing it.
//!
//! Every pid has its own lane: a FIFO queue plus a delivery guard. A lane is
//! drained by one thread at a time, so delivery order for a pid equals commit
//! order. Lanes of different pids drain independently; a listener blocked on
//! one pid does not hold back events for another.
//!
//! A listener may call back into the store. A nested event for the pid being
//! delivered is queued and delivered by the thread already draining that lane;
//! one for another pid is delivered right away.
//!
//! - Enforced in: [`EventSource::drain`]
//! - Tested by: `event::tests::slow_listener_does_not_block_other_pids`

use std::collections::VecDeque;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use arbor_primitives::{ConfigIdentity, Location, Pid, Properties};
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::store::ConfigurationStore;

/// A committed configuration change.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigurationEvent {
	Updated {
		identity: ConfigIdentity,
		properties: Arc<Properties>,
		change_count: u64,
	},
	Deleted {
		identity: ConfigIdentity,
	},
	LocationChanged {
		identity: ConfigIdentity,
		old: Option<Location>,
		new: Option<Location>,
	},
}

impl ConfigurationEvent {
	pub fn identity(&self) -> &ConfigIdentity {
		match self {
			Self::Updated { identity, .. } | Self::Deleted { identity } | Self::LocationChanged { identity, .. } => identity,
		}
	}

	pub fn kind(&self) -> &'static str {
		match self {
			Self::Updated { .. } => "updated",
			Self::Deleted { .. } => "deleted",
			Self::LocationChanged { .. } => "location-changed",
		}
	}
}

/// Receives configuration events.
pub trait ConfigurationListener: Send + Sync {
	fn configuration_event(&self, event: &ConfigurationEvent);
}

impl<F> ConfigurationListener for F
where
	F: Fn(&ConfigurationEvent) + Send + Sync,
{
	fn configuration_event(&self, event: &ConfigurationEvent) {
		self(event)
	}
}

/// Availability transitions of the configuration store service.
#[derive(Clone)]
pub enum SourceEvent {
	/// The store appeared (or restarted). Existing configurations must be replayed.
	Available(Arc<dyn ConfigurationStore>),
	/// The store went away.
	Unavailable,
}

impl fmt::Debug for SourceEvent {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Available(_) => f.write_str("Available"),
			Self::Unavailable => f.write_str("Unavailable"),
		}
	}
}

/// Handle returned by [`EventSource::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subscription(u64);

type Subscribers = Vec<(Subscription, Arc<dyn ConfigurationListener>)>;

/// Pending events of one pid.
#[derive(Default)]
struct Lane {
	queue: Mutex<VecDeque<ConfigurationEvent>>,
	delivering: Mutex<()>,
}

/// Subscriber list plus the per-pid delivery lanes.
pub struct EventSource {
	subscribers: ArcSwap<Subscribers>,
	next_id: AtomicU64,
	/// Lanes with queued or in-flight events. Pushing happens under this lock,
	/// so a lane is only dropped once nothing can reach it any more.
	lanes: Mutex<FxHashMap<Pid, Arc<Lane>>>,
}

impl Default for EventSource {
	fn default() -> Self {
		Self {
			subscribers: ArcSwap::from_pointee(Vec::new()),
			next_id: AtomicU64::new(1),
			lanes: Mutex::new(FxHashMap::default()),
		}
	}
}

impl EventSource {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn subscribe(&self, listener: Arc<dyn ConfigurationListener>) -> Subscription {
		let id = Subscription(self.next_id.fetch_add(1, Ordering::Relaxed));
		self.subscribers.rcu(|current| {
			let mut next = Vec::clone(current);
			next.push((id, Arc::clone(&listener)));
			next
		});
		id
	}

	/// Returns false if the subscription was unknown.
	pub fn unsubscribe(&self, subscription: Subscription) -> bool {
		let prev = self.subscribers.rcu(|current| current.iter().filter(|(id, _)| *id != subscription).cloned().collect::<Vec<_>>());
		prev.iter().any(|(id, _)| *id == subscription)
	}

	pub fn subscriber_count(&self) -> usize {
		self.subscribers.load().len()
	}

	/// Queues an event on its pid's lane without delivering it.
	pub fn enqueue(&self, event: ConfigurationEvent) {
		let mut lanes = self.lanes.lock();
		let lane = lanes.entry(event.identity().pid.clone()).or_default();
		lane.queue.lock().push_back(event);
	}

	/// Delivers queued events of every lane no other thread is draining.
	pub fn drain(&self) {
		let pending: Vec<(Pid, Arc<Lane>)> = self
			.lanes
			.lock()
			.iter()
			.map(|(pid, lane)| (pid.clone(), Arc::clone(lane)))
			.collect();
		for (pid, lane) in pending {
			self.drain_lane(&pid, &lane);
		}
	}

	/// Queues and delivers one event.
	pub fn publish(&self, event: ConfigurationEvent) {
		let pid = event.identity().pid.clone();
		self.enqueue(event);
		let lane = self.lanes.lock().get(&pid).cloned();
		if let Some(lane) = lane {
			self.drain_lane(&pid, &lane);
		}
	}

	/// Number of pids with queued or in-flight events.
	pub fn pending_lanes(&self) -> usize {
		self.lanes.lock().len()
	}

	fn drain_lane(&self, pid: &Pid, lane: &Arc<Lane>) {
		loop {
			let Some(guard) = lane.delivering.try_lock() else {
				return;
			};
			loop {
				let next = lane.queue.lock().pop_front();
				let Some(event) = next else {
					break;
				};
				self.deliver(&event);
			}
			drop(guard);
			if lane.queue.lock().is_empty() {
				self.retire(pid, lane);
				return;
			}
		}
	}

	/// Drops an idle lane. A lane someone is draining, or that received an event
	/// since, stays.
	fn retire(&self, pid: &Pid, lane: &Arc<Lane>) {
		let mut lanes = self.lanes.lock();
		let Some(current) = lanes.get(pid) else {
			return;
		};
		if !Arc::ptr_eq(current, lane) {
			return;
		}
		let idle = lane.delivering.try_lock().is_some() && lane.queue.lock().is_empty();
		if idle {
			lanes.remove(pid);
		}
	}

	fn deliver(&self, event: &ConfigurationEvent) {
		let subscribers = self.subscribers.load_full();
		tracing::trace!(kind = event.kind(), pid = %event.identity().pid, listeners = subscribers.len(), "delivering configuration event");
		for (id, listener) in subscribers.iter() {
			if catch_unwind(AssertUnwindSafe(|| listener.configuration_event(event))).is_err() {
				tracing::error!(subscription = id.0, kind = event.kind(), pid = %event.identity().pid, "configuration listener panicked");
			}
		}
	}
}

impl fmt::Debug for EventSource {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("EventSource")
			.field("subscribers", &self.subscriber_count())
			.field("lanes", &self.pending_lanes())
			.finish()
	}
}

#[cfg(test)]
mod tests;
