//! Error page registry.

use std::fmt;
use std::sync::Arc;

use crate::core::{Candidate, RankedRegistry, RegistrationId, RegistrationSnapshot, RegistryError};

/// What an error page handles.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ErrorKey {
	Code(u16),
	/// Fully qualified exception type name.
	Exception(String),
}

impl fmt::Display for ErrorKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Code(code) => write!(f, "{code}"),
			Self::Exception(name) => f.write_str(name),
		}
	}
}

/// Expands one error page declaration.
///
/// `4xx` and `5xx` claim the whole class, three digits claim one code, anything
/// else names an exception type.
pub fn parse_error_page(value: &str) -> Result<Vec<ErrorKey>, RegistryError> {
	let value = value.trim();
	if value.is_empty() {
		return Err(RegistryError::InvalidPattern {
			pattern: value.to_owned(),
			reason: "empty error page declaration",
		});
	}
	if value.eq_ignore_ascii_case("4xx") {
		return Ok((400..500).map(ErrorKey::Code).collect());
	}
	if value.eq_ignore_ascii_case("5xx") {
		return Ok((500..600).map(ErrorKey::Code).collect());
	}
	if value.len() == 3
		&& value.bytes().all(|b| b.is_ascii_digit())
		&& let Ok(code) = value.parse::<u16>()
	{
		return Ok(vec![ErrorKey::Code(code)]);
	}
	Ok(vec![ErrorKey::Exception(value.to_owned())])
}

/// Error pages keyed by status code and exception type.
pub struct ErrorPageRegistry<C> {
	inner: RankedRegistry<ErrorKey, C>,
}

impl<C: Candidate> Default for ErrorPageRegistry<C> {
	fn default() -> Self {
		Self::new()
	}
}

impl<C: Candidate> ErrorPageRegistry<C> {
	pub fn new() -> Self {
		Self {
			inner: RankedRegistry::new("error-pages"),
		}
	}

	pub fn add<'a>(&self, handler: Arc<C>, declarations: impl IntoIterator<Item = &'a str>) -> Result<RegistrationId, RegistryError> {
		let mut keys = Vec::new();
		for declaration in declarations {
			keys.extend(parse_error_page(declaration)?);
		}
		self.inner.add(handler, keys)
	}

	pub fn remove(&self, id: RegistrationId) -> Result<Arc<C>, RegistryError> {
		self.inner.remove(id)
	}

	/// Handler for a failed request.
	///
	/// `exception_chain` lists the thrown type first, then its supertypes. The
	/// first type with an error page wins; otherwise the status code decides.
	pub fn resolve(&self, code: u16, exception_chain: &[&str]) -> Option<Arc<C>> {
		exception_chain
			.iter()
			.find_map(|name| self.inner.lookup(&ErrorKey::Exception((*name).to_owned())))
			.or_else(|| self.inner.lookup(&ErrorKey::Code(code)))
	}

	pub fn registry(&self) -> &RankedRegistry<ErrorKey, C> {
		&self.inner
	}

	pub fn snapshots(&self) -> Vec<RegistrationSnapshot> {
		self.inner.snapshots()
	}

	pub fn clear(&self) {
		self.inner.clear();
	}
}
