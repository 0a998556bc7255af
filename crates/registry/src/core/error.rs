use super::status::RegistrationId;

/// Errors raised by registry bookkeeping.
///
/// Activation failures are not errors: they are recorded per key as a
/// [`super::FailureReason`] and surface through status snapshots.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
	#[error("unknown registration {0}")]
	UnknownRegistration(RegistrationId),

	#[error("registration claims no keys")]
	NoKeys,

	#[error("invalid pattern {pattern:?}: {reason}")]
	InvalidPattern { pattern: String, reason: &'static str },
}
