//! Per-key ranked candidate lists with single-winner activation.
//!
//! # Role
//!
//! Keeps, for every key, the registrations competing for it in precedence
//! order and activates only the head. Reads load an immutable per-key list and
//! never block; writes to one key serialize on that key's bucket lock and never
//! touch other keys.
//!
//! # Invariants
//!
//! - The head of a key's list is the only active registration for that key, and
//!   it is the best-ranked registration whose activation did not fail.
//!   - Enforced in: [`RankedRegistry::add`], [`RankedRegistry::remove`]
//!   - Tested by: `invariants::test_shadow_restore`, `invariants::test_cascade_on_failure`
//! - A registration is initialized once however many keys it wins, and destroyed
//!   when it stops winning its last key.
//!   - Enforced in: `Registration::acquire`, `Registration::release`
//!   - Tested by: `invariants::test_single_init_across_keys`
//! - Status is tracked per key; one registration may be active on one key and
//!   shadowed on another.
//!   - Tested by: `invariants::test_per_key_status`
//! - A key with no registrations left has no bucket, and a registration removed
//!   before it reached a key never lands there.
//!   - Enforced in: `RankedRegistry::remove_from`, `RankedRegistry::insert_into`
//!   - Tested by: `tests::emptied_keys_are_pruned`, `tests::clear_racing_add_leaves_nothing_behind`

use std::fmt;
use std::hash::Hash;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use arbor_primitives::ServiceOrder;
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use super::candidate::{Candidate, FailureReason};
use super::error::RegistryError;
use super::status::{KeySnapshot, KeyStatus, RegistrationId, RegistrationSnapshot};

/// Bound for registry keys.
pub trait RegistryKey: Clone + Eq + Hash + fmt::Display + Send + Sync + 'static {}
impl<T> RegistryKey for T where T: Clone + Eq + Hash + fmt::Display + Send + Sync + 'static {}

struct Registration<K, C> {
	id: RegistrationId,
	order: ServiceOrder,
	keys: Vec<K>,
	candidate: Arc<C>,
	/// Number of keys this registration is currently active on.
	uses: Mutex<u32>,
}

impl<K, C: Candidate> Registration<K, C> {
	fn acquire(&self) -> Result<(), FailureReason> {
		let mut uses = self.uses.lock();
		if *uses == 0 {
			let result = catch_unwind(AssertUnwindSafe(|| self.candidate.init())).unwrap_or(Err(FailureReason::ExceptionOnInit));
			if let Err(reason) = result {
				tracing::error!(registration = %self.id, candidate = %self.candidate.name(), %reason, "activation failed");
				return Err(reason);
			}
		}
		*uses += 1;
		Ok(())
	}

	fn release(&self) {
		let mut uses = self.uses.lock();
		match *uses {
			0 => {}
			1 => {
				*uses = 0;
				if catch_unwind(AssertUnwindSafe(|| self.candidate.destroy())).is_err() {
					tracing::error!(registration = %self.id, candidate = %self.candidate.name(), "destroy panicked");
				}
			}
			n => *uses = n - 1,
		}
	}
}

/// Immutable contents of one key's bucket.
struct KeyState<K, C> {
	/// Competing registrations, best first. The head is active.
	ranked: Vec<Arc<Registration<K, C>>>,
	failed: Vec<(Arc<Registration<K, C>>, FailureReason)>,
}

impl<K, C> Default for KeyState<K, C> {
	fn default() -> Self {
		Self {
			ranked: Vec::new(),
			failed: Vec::new(),
		}
	}
}

impl<K, C> Clone for KeyState<K, C> {
	fn clone(&self) -> Self {
		Self {
			ranked: self.ranked.clone(),
			failed: self.failed.clone(),
		}
	}
}

impl<K, C> KeyState<K, C> {
	fn status_of(&self, id: RegistrationId) -> Option<KeyStatus> {
		if let Some(pos) = self.ranked.iter().position(|r| r.id == id) {
			return Some(if pos == 0 { KeyStatus::Active } else { KeyStatus::Shadowed });
		}
		self.failed.iter().find(|(r, _)| r.id == id).map(|(_, reason)| KeyStatus::Failed(*reason))
	}
}

struct Bucket<K, C> {
	/// Serializes writers. `true` once the bucket has been pruned from the map;
	/// a writer that finds it so starts over with a fresh bucket.
	write: Mutex<bool>,
	state: ArcSwap<KeyState<K, C>>,
}

impl<K, C> Bucket<K, C> {
	fn new() -> Self {
		Self {
			write: Mutex::new(false),
			state: ArcSwap::from_pointee(KeyState::default()),
		}
	}
}

type Buckets<K, C> = FxHashMap<K, Arc<Bucket<K, C>>>;
type Registrations<K, C> = FxHashMap<RegistrationId, Arc<Registration<K, C>>>;

/// Ranked candidate registry.
pub struct RankedRegistry<K, C> {
	label: &'static str,
	buckets: ArcSwap<Buckets<K, C>>,
	registrations: ArcSwap<Registrations<K, C>>,
	next_id: AtomicU64,
}

impl<K: RegistryKey, C: Candidate> RankedRegistry<K, C> {
	/// `label` names the registry in log output.
	pub fn new(label: &'static str) -> Self {
		Self {
			label,
			buckets: ArcSwap::from_pointee(FxHashMap::default()),
			registrations: ArcSwap::from_pointee(FxHashMap::default()),
			next_id: AtomicU64::new(1),
		}
	}

	/// Registers `candidate` for every key in `keys`.
	///
	/// On each key where the candidate becomes the head it is activated; on
	/// success the previous head is released and shadowed, on failure the
	/// candidate is marked failed for that key and the previous head keeps
	/// serving. Where it does not become the head it is shadowed without any
	/// activation attempt.
	pub fn add(&self, candidate: Arc<C>, keys: impl IntoIterator<Item = K>) -> Result<RegistrationId, RegistryError> {
		let mut keys: Vec<K> = keys.into_iter().collect();
		dedup_keys(&mut keys);
		if keys.is_empty() {
			return Err(RegistryError::NoKeys);
		}

		let id = RegistrationId(self.next_id.fetch_add(1, Ordering::Relaxed));
		let reg = Arc::new(Registration {
			id,
			order: candidate.order(),
			keys,
			candidate,
			uses: Mutex::new(0),
		});
		self.registrations.rcu(|current| {
			let mut next = Registrations::clone(current);
			next.insert(id, Arc::clone(&reg));
			next
		});

		for key in &reg.keys {
			self.insert_into(key, &reg);
		}
		Ok(id)
	}

	fn insert_into(&self, key: &K, reg: &Arc<Registration<K, C>>) {
		loop {
			let bucket = self.bucket(key);
			let retired = bucket.write.lock();
			if *retired {
				continue;
			}
			// A racing remove already ran for this id; it found nothing here.
			if !self.registrations.load().contains_key(&reg.id) {
				tracing::debug!(registry = self.label, key = %key, registration = %reg.id, "removed before insertion");
				return;
			}
			self.insert_locked(key, &bucket, reg);
			return;
		}
	}

	fn insert_locked(&self, key: &K, bucket: &Bucket<K, C>, reg: &Arc<Registration<K, C>>) {
		let current = bucket.state.load_full();

		// Equal orders keep registration order: the newcomer goes last.
		let pos = current.ranked.partition_point(|r| r.order <= reg.order);
		if pos > 0 {
			let mut next = KeyState::clone(&current);
			next.ranked.insert(pos, Arc::clone(reg));
			bucket.state.store(Arc::new(next));
			tracing::debug!(registry = self.label, key = %key, registration = %reg.id, "shadowed by other service");
			return;
		}

		match reg.acquire() {
			Ok(()) => {
				let mut next = KeyState::clone(&current);
				next.ranked.insert(0, Arc::clone(reg));
				bucket.state.store(Arc::new(next));
				if let Some(old) = current.ranked.first() {
					tracing::debug!(registry = self.label, key = %key, registration = %old.id, by = %reg.id, "demoted");
					old.release();
				} else {
					tracing::debug!(registry = self.label, key = %key, registration = %reg.id, "activated");
				}
			}
			Err(reason) => {
				let mut next = KeyState::clone(&current);
				next.failed.push((Arc::clone(reg), reason));
				bucket.state.store(Arc::new(next));
			}
		}
	}

	/// Unregisters `id` from every key it claims, releasing it where it was
	/// active and promoting the next candidate. Candidates whose activation
	/// fails during promotion are marked failed and skipped.
	pub fn remove(&self, id: RegistrationId) -> Result<Arc<C>, RegistryError> {
		let prev = self.registrations.rcu(|current| {
			let mut next = Registrations::clone(current);
			next.remove(&id);
			next
		});
		let reg = prev.get(&id).cloned().ok_or(RegistryError::UnknownRegistration(id))?;

		for key in &reg.keys {
			self.remove_from(key, &reg);
		}
		Ok(Arc::clone(&reg.candidate))
	}

	fn remove_from(&self, key: &K, reg: &Arc<Registration<K, C>>) {
		loop {
			let Some(bucket) = self.buckets.load().get(key).cloned() else {
				return;
			};
			let mut retired = bucket.write.lock();
			if *retired {
				continue;
			}
			let current = bucket.state.load_full();
			let mut next = KeyState::clone(&current);
			next.failed.retain(|(r, _)| r.id != reg.id);

			if let Some(pos) = next.ranked.iter().position(|r| r.id == reg.id) {
				next.ranked.remove(pos);
				if pos == 0 {
					reg.release();
					self.promote_head(key, &mut next);
				}
			}
			if next.ranked.is_empty() && next.failed.is_empty() {
				*retired = true;
				self.prune(key, &bucket);
			}
			bucket.state.store(Arc::new(next));
			return;
		}
	}

	/// Drops `bucket` from the map. Caller holds its write lock and has marked
	/// it retired.
	fn prune(&self, key: &K, bucket: &Arc<Bucket<K, C>>) {
		self.buckets.rcu(|current| {
			let mut next = Buckets::clone(current);
			if next.get(key).is_some_and(|b| Arc::ptr_eq(b, bucket)) {
				next.remove(key);
			}
			next
		});
		tracing::trace!(registry = self.label, key = %key, "bucket pruned");
	}

	fn promote_head(&self, key: &K, state: &mut KeyState<K, C>) {
		while let Some(head) = state.ranked.first().cloned() {
			match head.acquire() {
				Ok(()) => {
					tracing::debug!(registry = self.label, key = %key, registration = %head.id, "promoted");
					return;
				}
				Err(reason) => {
					state.ranked.remove(0);
					state.failed.push((head, reason));
				}
			}
		}
	}

	/// Active candidate for `key`.
	pub fn lookup(&self, key: &K) -> Option<Arc<C>> {
		let buckets = self.buckets.load();
		let state = buckets.get(key)?.state.load();
		state.ranked.first().map(|r| Arc::clone(&r.candidate))
	}

	/// Every non-failed candidate for `key`, best first.
	pub fn candidates(&self, key: &K) -> Vec<Arc<C>> {
		let buckets = self.buckets.load();
		let Some(bucket) = buckets.get(key) else {
			return Vec::new();
		};
		bucket.state.load().ranked.iter().map(|r| Arc::clone(&r.candidate)).collect()
	}

	/// Per-key status of registration `id`.
	pub fn status(&self, id: RegistrationId) -> Option<Vec<(K, KeyStatus)>> {
		let reg = self.registrations.load().get(&id).cloned()?;
		Some(self.key_statuses(&reg))
	}

	/// Status of registration `id` on one key.
	pub fn status_on(&self, id: RegistrationId, key: &K) -> Option<KeyStatus> {
		let buckets = self.buckets.load();
		buckets.get(key)?.state.load().status_of(id)
	}

	fn key_statuses(&self, reg: &Registration<K, C>) -> Vec<(K, KeyStatus)> {
		let buckets = self.buckets.load();
		reg.keys
			.iter()
			.filter_map(|key| {
				let status = buckets.get(key)?.state.load().status_of(reg.id)?;
				Some((key.clone(), status))
			})
			.collect()
	}

	/// Keys with a bucket, including those whose candidates all failed.
	pub fn key_count(&self) -> usize {
		self.buckets.load().len()
	}

	/// Keys that currently have an active candidate.
	pub fn active_keys(&self) -> Vec<K> {
		self.buckets
			.load()
			.iter()
			.filter(|(_, bucket)| !bucket.state.load().ranked.is_empty())
			.map(|(key, _)| key.clone())
			.collect()
	}

	pub fn candidate(&self, id: RegistrationId) -> Option<Arc<C>> {
		self.registrations.load().get(&id).map(|r| Arc::clone(&r.candidate))
	}

	pub fn len(&self) -> usize {
		self.registrations.load().len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Snapshots of every registration, ordered by id.
	pub fn snapshots(&self) -> Vec<RegistrationSnapshot> {
		let registrations = self.registrations.load_full();
		let mut out: Vec<RegistrationSnapshot> = registrations
			.values()
			.map(|reg| RegistrationSnapshot {
				id: reg.id,
				name: reg.candidate.name(),
				ranking: reg.order.ranking,
				service_id: reg.order.service_id,
				keys: self
					.key_statuses(reg)
					.into_iter()
					.map(|(key, status)| KeySnapshot {
						key: key.to_string(),
						status,
					})
					.collect(),
			})
			.collect();
		out.sort_by_key(|s| s.id);
		out
	}

	/// Removes every registration, destroying active candidates.
	pub fn clear(&self) {
		let mut ids: Vec<RegistrationId> = self.registrations.load().keys().copied().collect();
		ids.sort_unstable();
		for id in ids {
			// Concurrent removal already handled it.
			let _ = self.remove(id);
		}
	}

	fn bucket(&self, key: &K) -> Arc<Bucket<K, C>> {
		loop {
			let old = self.buckets.load_full();
			if let Some(bucket) = old.get(key) {
				return Arc::clone(bucket);
			}
			let bucket = Arc::new(Bucket::new());
			let mut next = Buckets::clone(&old);
			next.insert(key.clone(), Arc::clone(&bucket));
			let prev = self.buckets.compare_and_swap(&old, Arc::new(next));
			if Arc::ptr_eq(&prev, &old) {
				return bucket;
			}
			// CAS failed, retry with updated map
		}
	}
}

fn dedup_keys<K: PartialEq>(keys: &mut Vec<K>) {
	let mut i = 0;
	while i < keys.len() {
		if keys[..i].contains(&keys[i]) {
			keys.remove(i);
		} else {
			i += 1;
		}
	}
}

impl<K, C> fmt::Debug for RankedRegistry<K, C> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("RankedRegistry")
			.field("label", &self.label)
			.field("keys", &self.buckets.load().len())
			.field("registrations", &self.registrations.load().len())
			.finish()
	}
}
