//! Servlet path registry.

use std::sync::Arc;

use super::pattern::{PathMatch, PathPattern, extension_of};
use crate::core::{Candidate, RankedRegistry, RegistrationId, RegistrationSnapshot, RegistryError};

/// Resolved request target.
#[derive(Debug, Clone)]
pub struct PathResolution<C> {
	pub servlet: Arc<C>,
	pub pattern: PathPattern,
	pub servlet_path: String,
	pub path_info: Option<String>,
	pub request_uri: String,
}

/// Servlets keyed by path pattern. One active servlet per pattern.
///
/// Resolution order: exact match, then the longest matching prefix, then the
/// extension of the last segment, then the default servlet.
pub struct ServletRegistry<C> {
	inner: RankedRegistry<PathPattern, C>,
}

impl<C: Candidate> Default for ServletRegistry<C> {
	fn default() -> Self {
		Self::new()
	}
}

impl<C: Candidate> ServletRegistry<C> {
	pub fn new() -> Self {
		Self {
			inner: RankedRegistry::new("servlets"),
		}
	}

	/// Registers `servlet` under every pattern. Fails without registering
	/// anything when a pattern is malformed.
	pub fn add<'a>(&self, servlet: Arc<C>, patterns: impl IntoIterator<Item = &'a str>) -> Result<RegistrationId, RegistryError> {
		let patterns = patterns.into_iter().map(PathPattern::parse).collect::<Result<Vec<_>, _>>()?;
		self.inner.add(servlet, patterns)
	}

	pub fn remove(&self, id: RegistrationId) -> Result<Arc<C>, RegistryError> {
		self.inner.remove(id)
	}

	/// Active servlet registered for exactly `pattern`.
	pub fn servlet_for(&self, pattern: &PathPattern) -> Option<Arc<C>> {
		self.inner.lookup(pattern)
	}

	pub fn resolve(&self, path: &str) -> Option<PathResolution<C>> {
		let exact = PathPattern::Exact(path.to_owned());
		if let Some(found) = self.try_pattern(&exact, path) {
			return Some(found);
		}

		let mut prefix = path.trim_end_matches('/');
		loop {
			if let Some(found) = self.try_pattern(&PathPattern::Prefix(prefix.to_owned()), path) {
				return Some(found);
			}
			match prefix.rfind('/') {
				Some(idx) => prefix = &prefix[..idx],
				None => break,
			}
		}

		if let Some(ext) = extension_of(path)
			&& let Some(found) = self.try_pattern(&PathPattern::Extension(ext.to_owned()), path)
		{
			return Some(found);
		}

		self.try_pattern(&PathPattern::Default, path)
	}

	fn try_pattern(&self, pattern: &PathPattern, path: &str) -> Option<PathResolution<C>> {
		let servlet = self.inner.lookup(pattern)?;
		let PathMatch { servlet_path, path_info } = pattern.matches(path)?;
		Some(PathResolution {
			servlet,
			pattern: pattern.clone(),
			servlet_path,
			path_info,
			request_uri: path.to_owned(),
		})
	}

	pub fn registry(&self) -> &RankedRegistry<PathPattern, C> {
		&self.inner
	}

	pub fn snapshots(&self) -> Vec<RegistrationSnapshot> {
		self.inner.snapshots()
	}

	pub fn clear(&self) {
		self.inner.clear();
	}
}
