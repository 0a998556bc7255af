//! In-process configuration store.

use std::fmt;
use std::sync::Arc;

use arbor_primitives::{ConfigIdentity, Location, Pid, Properties};
use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::error::{ConfigError, Result};
use crate::event::{ConfigurationEvent, EventSource};
use crate::filter::Filter;
use crate::store::{Configuration, ConfigurationStore};


#[derive(Default)]
struct State {
	entries: FxHashMap<Pid, Configuration>,
	/// Deleted pids; every later mutation on them fails.
	tombstones: FxHashSet<Pid>,
	/// Pids whose binding was made on first use rather than set explicitly.
	dynamic: FxHashSet<Pid>,
	/// Next instance number per factory pid.
	factory_seq: FxHashMap<Pid, u64>,
	/// Pending simulated read failures.
	failing_reads: u32,
}

impl State {
	fn check_live(&self, pid: &Pid) -> Result<()> {
		if self.tombstones.contains(pid) {
			return Err(ConfigError::Deleted(pid.clone()));
		}
		Ok(())
	}

	fn take_read_failure(&mut self, target: &str) -> Result<()> {
		if self.failing_reads > 0 {
			self.failing_reads -= 1;
			return Err(ConfigError::io(
				target,
				std::io::Error::new(std::io::ErrorKind::Interrupted, "simulated backend failure"),
			));
		}
		Ok(())
	}
}

/// Configuration store kept in memory, publishing change events.
#[derive(Default)]
pub struct MemoryStore {
	state: Mutex<State>,
	events: EventSource,
}

impl MemoryStore {
	pub fn new() -> Self {
		Self::default()
	}

	/// Listeners subscribe here.
	pub fn events(&self) -> &EventSource {
		&self.events
	}

	/// Makes the next `count` reads (`get`, `list`) fail with an I/O error, the
	/// way an out-of-process backend does while it restarts.
	pub fn fail_reads(&self, count: u32) {
		self.state.lock().failing_reads = count;
	}

	pub fn len(&self) -> usize {
		self.state.lock().entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Runs `f` under the state lock, then delivers whatever it queued.
	fn commit<T>(&self, f: impl FnOnce(&mut State, &EventSource) -> Result<T>) -> Result<T> {
		let result = {
			let mut state = self.state.lock();
			f(&mut state, &self.events)
		};
		self.events.drain();
		result
	}
}

impl ConfigurationStore for MemoryStore {
	fn get(&self, pid: &Pid) -> Result<Option<Configuration>> {
		let mut state = self.state.lock();
		state.take_read_failure(pid.as_str())?;
		Ok(state.entries.get(pid).cloned())
	}

	fn update(&self, pid: &Pid, properties: Properties) -> Result<u64> {
		self.commit(|state, events| {
			state.check_live(pid)?;
			let entry = state.entries.entry(pid.clone()).or_insert_with(|| Configuration {
				identity: ConfigIdentity::singleton(pid.clone()),
				properties: None,
				bound_location: None,
				change_count: 0,
			});
			let properties = Arc::new(properties);
			entry.properties = Some(Arc::clone(&properties));
			entry.change_count += 1;
			tracing::debug!(pid = %pid, change_count = entry.change_count, "configuration updated");
			events.enqueue(ConfigurationEvent::Updated {
				identity: entry.identity.clone(),
				properties,
				change_count: entry.change_count,
			});
			Ok(entry.change_count)
		})
	}

	fn delete(&self, pid: &Pid) -> Result<()> {
		self.commit(|state, events| {
			state.check_live(pid)?;
			let removed = state.entries.remove(pid).ok_or_else(|| ConfigError::NotFound(pid.clone()))?;
			state.tombstones.insert(pid.clone());
			state.dynamic.remove(pid);
			tracing::debug!(pid = %pid, "configuration deleted");
			events.enqueue(ConfigurationEvent::Deleted {
				identity: removed.identity,
			});
			Ok(())
		})
	}

	fn list(&self, filter: Option<&Filter>) -> Result<Vec<Configuration>> {
		let mut state = self.state.lock();
		let target = filter.map_or_else(|| "*".to_owned(), ToString::to_string);
		state.take_read_failure(&target)?;
		let mut out: Vec<Configuration> = state
			.entries
			.values()
			.filter(|c| c.properties.is_some())
			.filter(|c| filter.is_none_or(|f| f.matches(&c.filter_attributes())))
			.cloned()
			.collect();
		out.sort_by(|a, b| a.identity.pid.cmp(&b.identity.pid));
		Ok(out)
	}

	fn create_factory_instance(&self, factory_pid: &Pid) -> Result<Pid> {
		self.commit(|state, _| {
			let pid = loop {
				let seq = state.factory_seq.entry(factory_pid.clone()).or_insert(0);
				*seq += 1;
				let candidate = Pid::new(format!("{factory_pid}~{seq}"));
				if !state.entries.contains_key(&candidate) && !state.tombstones.contains(&candidate) {
					break candidate;
				}
			};
			state.entries.insert(
				pid.clone(),
				Configuration {
					identity: ConfigIdentity::factory(pid.clone(), factory_pid.clone()),
					properties: None,
					bound_location: None,
					change_count: 0,
				},
			);
			Ok(pid)
		})
	}

	fn set_bound_location(&self, pid: &Pid, location: Option<Location>) -> Result<()> {
		self.commit(|state, events| {
			state.check_live(pid)?;
			let entry = state.entries.get_mut(pid).ok_or_else(|| ConfigError::NotFound(pid.clone()))?;
			let unchanged = entry.bound_location == location;
			let old = std::mem::replace(&mut entry.bound_location, location.clone());
			let identity = entry.identity.clone();
			state.dynamic.remove(pid);
			if unchanged {
				return Ok(());
			}
			events.enqueue(ConfigurationEvent::LocationChanged { identity, old, new: location });
			Ok(())
		})
	}

	fn release_dynamic_bindings(&self, location: &Location) -> Result<usize> {
		self.commit(|state, events| {
			let State { entries, dynamic, .. } = state;
			let mut released: Vec<&mut Configuration> = entries
				.values_mut()
				.filter(|c| dynamic.contains(&c.identity.pid) && c.bound_location.as_ref() == Some(location))
				.collect();
			released.sort_by(|a, b| a.identity.pid.cmp(&b.identity.pid));
			for config in &mut released {
				config.bound_location = None;
				dynamic.remove(&config.identity.pid);
				events.enqueue(ConfigurationEvent::LocationChanged {
					identity: config.identity.clone(),
					old: Some(location.clone()),
					new: None,
				});
			}
			if !released.is_empty() {
				tracing::debug!(%location, released = released.len(), "dynamic bindings released");
			}
			Ok(released.len())
		})
	}

	fn bind_location(&self, pid: &Pid, location: &Location) -> Result<()> {
		self.commit(|state, events| {
			state.check_live(pid)?;
			let entry = state.entries.get_mut(pid).ok_or_else(|| ConfigError::NotFound(pid.clone()))?;
			match &entry.bound_location {
				Some(bound) if bound == location => Ok(()),
				Some(bound) => Err(ConfigError::BoundElsewhere {
					pid: pid.clone(),
					bound: bound.clone(),
					requested: location.clone(),
				}),
				None => {
					entry.bound_location = Some(location.clone());
					events.enqueue(ConfigurationEvent::LocationChanged {
						identity: entry.identity.clone(),
						old: None,
						new: Some(location.clone()),
					});
					state.dynamic.insert(pid.clone());
					Ok(())
				}
			}
		})
	}
}

impl fmt::Debug for MemoryStore {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("MemoryStore").field("configurations", &self.len()).field("events", &self.events).finish()
	}
}
