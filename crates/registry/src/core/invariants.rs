#![allow(dead_code)]

use std::sync::Arc;

use super::test_fixtures::Contender;
use super::{FailureReason, KeyStatus, RankedRegistry};

fn registry() -> RankedRegistry<&'static str, Contender> {
	RankedRegistry::new("test")
}

fn active_name(reg: &RankedRegistry<&'static str, Contender>, key: &'static str) -> Option<&'static str> {
	reg.lookup(&key).map(|p| p.name)
}

/// Invariant: A higher-ranked registration shadows the current winner, and the
/// winner is restored when the higher one leaves.
pub(crate) fn inv_shadow_restore() {
	let reg = registry();
	let a = Contender::new("a", 1, 10);
	let b = Contender::new("b", 2, 11);

	let id_a = reg.add(Arc::clone(&a), ["k"]).unwrap();
	let id_b = reg.add(Arc::clone(&b), ["k"]).unwrap();

	assert_eq!(active_name(&reg, "k"), Some("b"));
	assert_eq!(reg.status_on(id_a, &"k"), Some(KeyStatus::Shadowed));
	assert_eq!(reg.status_on(id_b, &"k"), Some(KeyStatus::Active));
	assert!(!a.live(), "shadowed registration must be released");

	reg.remove(id_b).unwrap();

	assert_eq!(active_name(&reg, "k"), Some("a"));
	assert_eq!(reg.status_on(id_a, &"k"), Some(KeyStatus::Active));
	assert!(a.live());
	assert_eq!(b.inits(), b.destroys());
}

#[cfg_attr(test, test)]
pub(crate) fn test_shadow_restore() {
	inv_shadow_restore()
}

/// Invariant: A registration whose activation fails never displaces a working
/// one, whatever the registration order.
pub(crate) fn inv_cascade_on_failure() {
	for failing_first in [true, false] {
		let reg = registry();
		let a = Contender::failing("a", 1, 10, FailureReason::ExceptionOnInit);
		let b = Contender::new("b", 2, 11);

		let (id_a, id_b) = if failing_first {
			let id_a = reg.add(Arc::clone(&a), ["k"]).unwrap();
			(id_a, reg.add(Arc::clone(&b), ["k"]).unwrap())
		} else {
			let id_b = reg.add(Arc::clone(&b), ["k"]).unwrap();
			(reg.add(Arc::clone(&a), ["k"]).unwrap(), id_b)
		};

		assert_eq!(active_name(&reg, "k"), Some("b"), "failing_first={failing_first}");
		assert_eq!(reg.status_on(id_b, &"k"), Some(KeyStatus::Active));
		let a_status = reg.status_on(id_a, &"k");
		assert!(a_status.is_some_and(|s| !s.is_active()), "failing_first={failing_first}: {a_status:?}");

		// Removing the winner cascades past the failing candidate.
		reg.remove(id_b).unwrap();
		assert_eq!(active_name(&reg, "k"), None);
		assert_eq!(reg.status_on(id_a, &"k"), Some(KeyStatus::Failed(FailureReason::ExceptionOnInit)));
	}
}

#[cfg_attr(test, test)]
pub(crate) fn test_cascade_on_failure() {
	inv_cascade_on_failure()
}

/// Invariant: Standing is tracked per key. One registration can serve one key
/// while being shadowed on another.
pub(crate) fn inv_per_key_status() {
	let reg = registry();
	let broad = Contender::new("broad", 0, 10);
	let narrow = Contender::new("narrow", 5, 11);

	let id_broad = reg.add(Arc::clone(&broad), ["404", "500"]).unwrap();
	let id_narrow = reg.add(Arc::clone(&narrow), ["404"]).unwrap();

	assert_eq!(reg.status_on(id_broad, &"404"), Some(KeyStatus::Shadowed));
	assert_eq!(reg.status_on(id_broad, &"500"), Some(KeyStatus::Active));
	assert_eq!(reg.status_on(id_narrow, &"404"), Some(KeyStatus::Active));
	assert!(broad.live(), "still serving 500");
}

#[cfg_attr(test, test)]
pub(crate) fn test_per_key_status() {
	inv_per_key_status()
}

/// Invariant: A registration is initialized once no matter how many keys it
/// wins, and destroyed only after losing the last one.
pub(crate) fn inv_single_init_across_keys() {
	let reg = registry();
	let multi = Contender::new("multi", 0, 10);
	let id = reg.add(Arc::clone(&multi), ["a", "b", "c"]).unwrap();
	assert_eq!(multi.inits(), 1);

	let over_a = reg.add(Contender::new("over-a", 9, 11), ["a"]).unwrap();
	let over_b = reg.add(Contender::new("over-b", 9, 12), ["b"]).unwrap();
	assert_eq!(multi.destroys(), 0, "still active on c");

	reg.add(Contender::new("over-c", 9, 13), ["c"]).unwrap();
	assert_eq!(multi.destroys(), 1);

	reg.remove(over_a).unwrap();
	reg.remove(over_b).unwrap();
	assert_eq!(multi.inits(), 2, "re-initialized once for a and b together");
	assert!(multi.live());

	reg.remove(id).unwrap();
	assert_eq!(multi.inits(), multi.destroys());
}

#[cfg_attr(test, test)]
pub(crate) fn test_single_init_across_keys() {
	inv_single_init_across_keys()
}

/// Invariant: The active candidate is the one with the highest ranking and,
/// among equal rankings, the earliest service id.
pub(crate) fn inv_ranking_total_order(entries: &[(i32, i64)]) {
	let reg: RankedRegistry<&'static str, Contender> = registry();
	for (ranking, service_id) in entries {
		reg.add(Contender::new("p", *ranking, *service_id), ["k"]).unwrap();
	}
	let expected = entries.iter().map(|(r, s)| arbor_primitives::ServiceOrder::new(*r, *s)).min();
	assert_eq!(reg.lookup(&"k").map(|p| p.order), expected);

	let listed: Vec<_> = reg.candidates(&"k").iter().map(|p| p.order).collect();
	assert!(listed.windows(2).all(|w| w[0] < w[1]), "candidates out of order: {listed:?}");
}

#[cfg_attr(test, test)]
pub(crate) fn test_ranking_total_order() {
	inv_ranking_total_order(&[(0, 5), (3, 9), (3, 7), (-1, 1), (3, -2), (3, -1)]);
}
