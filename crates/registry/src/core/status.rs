//! Status vocabulary and diagnostic snapshots.

use std::fmt;

use serde::Serialize;

use super::candidate::FailureReason;

/// Handle returned by [`super::RankedRegistry::add`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct RegistrationId(pub(crate) u64);

impl RegistrationId {
	pub const fn get(self) -> u64 {
		self.0
	}
}

impl fmt::Display for RegistrationId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "#{}", self.0)
	}
}

/// Standing of one registration on one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "kebab-case")]
pub enum KeyStatus {
	/// Winner of the key; its activation succeeded.
	Active,
	/// Valid but outranked by the active registration.
	Shadowed,
	/// Activation failed; the registration no longer competes for the key.
	Failed(FailureReason),
}

impl KeyStatus {
	/// The reason reported to management tooling, `None` when active.
	pub fn failure_reason(self) -> Option<FailureReason> {
		match self {
			Self::Active => None,
			Self::Shadowed => Some(FailureReason::ShadowedByOtherService),
			Self::Failed(reason) => Some(reason),
		}
	}

	pub fn is_active(self) -> bool {
		matches!(self, Self::Active)
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeySnapshot {
	pub key: String,
	pub status: KeyStatus,
}

/// Point-in-time view of a registration across all keys it claims.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistrationSnapshot {
	pub id: RegistrationId,
	pub name: String,
	pub ranking: i32,
	pub service_id: i64,
	pub keys: Vec<KeySnapshot>,
}

impl RegistrationSnapshot {
	/// Active on at least one key.
	pub fn is_serving(&self) -> bool {
		self.keys.iter().any(|k| k.status.is_active())
	}
}
