use std::cmp::Ordering;

use proptest::prelude::*;

use super::ServiceOrder;
use crate::Properties;
use crate::properties::keys;

#[test]
fn higher_ranking_wins() {
	let low = ServiceOrder::new(1, 1);
	let high = ServiceOrder::new(2, 2);
	assert!(high.is_winner_over(&low));
	assert!(!low.is_winner_over(&high));
}

#[test]
fn earlier_id_wins_on_equal_ranking() {
	let first = ServiceOrder::new(5, 10);
	let second = ServiceOrder::new(5, 11);
	assert!(first.is_winner_over(&second));
}

/// Negative ids are runtime-internal registrations. They beat every
/// non-negative id of equal ranking and order among themselves in reverse.
#[test]
fn negative_ids_outrank_positive_ids() {
	let internal_first = ServiceOrder::new(0, -1);
	let internal_second = ServiceOrder::new(0, -2);
	let zero = ServiceOrder::new(0, 0);
	let dynamic = ServiceOrder::new(0, 1);

	let mut all = vec![dynamic, zero, internal_second, internal_first];
	all.sort();
	assert_eq!(all, vec![internal_first, internal_second, zero, dynamic]);
}

#[test]
fn zero_id_sorts_with_non_negative_ids() {
	let zero = ServiceOrder::new(0, 0);
	assert!(ServiceOrder::new(0, -1).is_winner_over(&zero));
	assert!(ServiceOrder::new(0, i64::MIN).is_winner_over(&zero));
	assert!(zero.is_winner_over(&ServiceOrder::new(0, 1)));
	assert_eq!(zero.cmp(&ServiceOrder::new(0, 0)), Ordering::Equal);
}

#[test]
fn ranking_dominates_negative_ids() {
	let internal = ServiceOrder::new(0, -1);
	let ranked = ServiceOrder::new(1, 100);
	assert!(ranked.is_winner_over(&internal));
}

#[test]
fn reads_order_from_properties() {
	let props = Properties::new().with(keys::SERVICE_RANKING, 3).with(keys::SERVICE_ID, 42i64);
	assert_eq!(ServiceOrder::from_properties(&props), Some(ServiceOrder::new(3, 42)));
	assert_eq!(ServiceOrder::from_properties(&Properties::new()), None);
}

proptest! {
	/// The winner among distinct orders is always the highest ranking, and among
	/// equal rankings the id the precedence contract prefers.
	#[test]
	fn total_order(pairs in proptest::collection::hash_set((-3i32..3, -50i64..50), 1..20)) {
		let orders: Vec<ServiceOrder> = pairs.iter().map(|&(r, id)| ServiceOrder::new(r, id)).collect();

		for a in &orders {
			for b in &orders {
				let ab = a.cmp(b);
				prop_assert_eq!(ab, b.cmp(a).reverse());
				prop_assert_eq!(ab == Ordering::Equal, a == b);
			}
		}

		let winner = *orders.iter().min().unwrap();
		let top_rank = orders.iter().map(|o| o.ranking).max().unwrap();
		prop_assert_eq!(winner.ranking, top_rank);

		let same_rank: Vec<i64> = orders.iter().filter(|o| o.ranking == top_rank).map(|o| o.service_id).collect();
		let expected = match same_rank.iter().filter(|id| **id < 0).max() {
			Some(neg) => *neg,
			None => *same_rank.iter().min().unwrap(),
		};
		prop_assert_eq!(winner.service_id, expected);
	}
}
