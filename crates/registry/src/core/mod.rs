#![cfg_attr(doc, allow(rustdoc::private_intra_doc_links))]
//! Ranked candidate registry infrastructure.
//!
//! # Purpose
//!
//! Many registrations may claim the same key (a URL pattern, an error code, a
//! listener type). Exactly one of them serves each key at a time. This module
//! holds the generic machinery; [`crate::http`] specializes it.
//!
//! # Mental Model
//!
//! 1. **Add:** A [`Candidate`] is registered under one or more keys and receives
//!    a [`RegistrationId`].
//! 2. **Rank:** Each key keeps its candidates sorted by [`ServiceOrder`]. The head
//!    is the only active candidate.
//! 3. **Activate:** Becoming the head runs [`Candidate::init`]. Success demotes the
//!    previous head; failure leaves it in place.
//! 4. **Remove:** Removing the head promotes the next candidate, cascading past
//!    candidates whose activation fails.
//!
//! # Precedence Contract
//!
//! Candidates are ordered by [`ServiceOrder`]:
//! 1. **Ranking:** Higher ranking wins.
//! 2. **Service id:** Earlier registration wins ties; runtime-created (negative id)
//!    registrations beat dynamic ones.
//! 3. **Exact ties:** The candidate registered first keeps the key. The newcomer is
//!    shadowed without an activation attempt.
//!
//! - Enforced in: [`ServiceOrder::cmp`], [`RankedRegistry::add`]
//! - Tested by: [`crate::core::invariants::test_ranking_total_order`]
//! - Failure symptom: A lower-ranked handler serves requests.
//!
//! # Key Types
//!
//! | Type | Role |
//! |------|------|
//! | [`RankedRegistry`] | Per-key ranked lists and activation bookkeeping. |
//! | [`Candidate`] | Activation callbacks and precedence of one handler. |
//! | [`KeyStatus`] | Active, shadowed or failed standing on one key. |
//! | [`RegistrationSnapshot`] | Serializable status of one registration. |
//!
//! # Concurrency
//!
//! - **Reads:** Wait-free (atomic load of the key's current list).
//! - **Writes:** Serialized per key by the bucket lock. Writes to different keys
//!   do not contend. The bucket table itself grows with a CAS retry loop.
//!
//! Activation callbacks run while the key's bucket lock is held. A callback must
//! not add or remove registrations on the key it is being activated for.
//!
//! # Invariants
//!
//! - At most one active candidate per key, and it is the best non-failed one.
//!   - Enforced in: [`RankedRegistry::add`], [`RankedRegistry::remove`].
//!   - Tested by: [`crate::core::invariants::test_shadow_restore`], [`crate::core::invariants::test_cascade_on_failure`]
//!   - Failure symptom: Two handlers serve one key, or none does while a valid one exists.
//!
//! - Status is tracked per key.
//!   - Tested by: [`crate::core::invariants::test_per_key_status`]
//!   - Failure symptom: A handler shadowed on one code reports itself shadowed on all of them.
//!
//! - Init and destroy are paired, once per registration.
//!   - Tested by: [`crate::core::invariants::test_single_init_across_keys`]
//!   - Failure symptom: Handlers initialized twice or destroyed while still serving.

mod candidate;
mod error;
mod ranked;
mod status;

#[cfg(any(test, doc))]
pub(crate) mod invariants;

#[cfg(any(test, doc))]
pub(crate) mod test_fixtures;


pub use arbor_primitives::ServiceOrder;
pub use candidate::{Candidate, FailureReason, Shared};
pub use error::RegistryError;
pub use ranked::{RankedRegistry, RegistryKey};
pub use status::{KeySnapshot, KeyStatus, RegistrationId, RegistrationSnapshot};
