//! Precedence between competing registrations.
//!
//! # Precedence Contract
//!
//! Sorting a slice of [`ServiceOrder`] ascending puts the winner first:
//! 1. **Ranking:** Higher ranking wins.
//! 2. **Service id:** On equal ranking, negative ids win over non-negative ones.
//!    Non-negative ids compare ascending (earlier registration wins). Negative ids
//!    compare descending, so `-1` beats `-2`.
//!
//! Negative ids are handed out by the hosting runtime for registrations it creates
//! itself, counting down from `-1`. Their inverted order is load bearing: a built-in
//! registration always beats a dynamic one of equal ranking, and among built-ins the
//! first one created wins. Do not normalize it.
//!
//! Id `0` counts as non-negative: it loses to every negative id and beats every
//! positive one. No runtime hands out `0`, so it only matters for
//! hand-constructed orders.
//!
//! - Enforced in: [`ServiceOrder::cmp`]
//! - Tested by: `order::tests::negative_ids_outrank_positive_ids`,
//!   `order::tests::zero_id_sorts_with_non_negative_ids`, `order::tests::total_order`

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::properties::{Properties, keys};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceOrder {
	pub ranking: i32,
	/// Stable insertion sequence of the registration.
	pub service_id: i64,
}

impl ServiceOrder {
	pub const fn new(ranking: i32, service_id: i64) -> Self {
		Self { ranking, service_id }
	}

	/// Reads `service.ranking` and `service.id` from a registration's properties.
	pub fn from_properties(props: &Properties) -> Option<Self> {
		let service_id = props.get(keys::SERVICE_ID)?.as_int()?;
		Some(Self::new(props.ranking(), service_id))
	}

	/// Returns true when `self` takes precedence over `other`.
	#[inline]
	pub fn is_winner_over(&self, other: &Self) -> bool {
		self.cmp(other) == Ordering::Less
	}
}

impl Ord for ServiceOrder {
	fn cmp(&self, other: &Self) -> Ordering {
		other
			.ranking
			.cmp(&self.ranking)
			.then_with(|| cmp_service_id(self.service_id, other.service_id))
	}
}

impl PartialOrd for ServiceOrder {
	fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
		Some(self.cmp(other))
	}
}

fn cmp_service_id(a: i64, b: i64) -> Ordering {
	match (a < 0, b < 0) {
		(true, true) => b.cmp(&a),
		(true, false) => Ordering::Less,
		(false, true) => Ordering::Greater,
		(false, false) => a.cmp(&b),
	}
}

impl fmt::Display for ServiceOrder {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "ranking={} id={}", self.ranking, self.service_id)
	}
}

#[cfg(test)]
mod tests;
