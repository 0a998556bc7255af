//! Ranked candidate registries.
//!
//! Competing registrations claim keys; for each key exactly one winner is
//! active and the rest wait, shadowed, to take over. See [`core`] for the
//! generic machinery and [`http`] for the servlet, error page and listener
//! registries built on it.

pub mod core;
pub mod http;

pub use crate::core::{
	Candidate, FailureReason, KeySnapshot, KeyStatus, RankedRegistry, RegistrationId, RegistrationSnapshot, RegistryError,
	RegistryKey, ServiceOrder, Shared,
};
