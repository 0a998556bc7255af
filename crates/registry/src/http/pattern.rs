//! Servlet path patterns.

use std::fmt;

use crate::core::RegistryError;

/// One servlet mapping.
///
/// | Form | Variant |
/// |------|---------|
/// | `/` | [`PathPattern::Default`] |
/// | `/a/b/*`, `/*` | [`PathPattern::Prefix`] (stored without `/*`) |
/// | `*.ext` | [`PathPattern::Extension`] (stored without `*.`) |
/// | `""`, `/a/b` | [`PathPattern::Exact`] |
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PathPattern {
	Exact(String),
	Prefix(String),
	Extension(String),
	Default,
}

/// How a request path splits against a matched pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathMatch {
	pub servlet_path: String,
	pub path_info: Option<String>,
}

impl PathPattern {
	pub fn parse(pattern: &str) -> Result<Self, RegistryError> {
		let invalid = |reason| RegistryError::InvalidPattern {
			pattern: pattern.to_owned(),
			reason,
		};
		if pattern == "/" {
			return Ok(Self::Default);
		}
		if let Some(ext) = pattern.strip_prefix("*.") {
			if ext.is_empty() || ext.contains(['/', '*', '.']) {
				return Err(invalid("extension must be a single non-empty segment"));
			}
			return Ok(Self::Extension(ext.to_owned()));
		}
		if pattern.is_empty() {
			return Ok(Self::Exact(String::new()));
		}
		if !pattern.starts_with('/') {
			return Err(invalid("must start with '/' or '*.'"));
		}
		if let Some(prefix) = pattern.strip_suffix("/*") {
			if prefix.contains('*') {
				return Err(invalid("wildcard only allowed as trailing '/*'"));
			}
			return Ok(Self::Prefix(prefix.to_owned()));
		}
		if pattern.contains('*') {
			return Err(invalid("wildcard only allowed as trailing '/*'"));
		}
		Ok(Self::Exact(pattern.to_owned()))
	}

	/// Matches `path` (relative to the context) against this pattern.
	pub fn matches(&self, path: &str) -> Option<PathMatch> {
		match self {
			Self::Exact(exact) => (path == exact).then(|| PathMatch {
				servlet_path: path.to_owned(),
				path_info: None,
			}),
			Self::Prefix(prefix) => {
				let rest = path.strip_prefix(prefix.as_str())?;
				if !rest.is_empty() && !rest.starts_with('/') {
					return None;
				}
				Some(PathMatch {
					servlet_path: prefix.clone(),
					path_info: (!rest.is_empty()).then(|| rest.to_owned()),
				})
			}
			Self::Extension(ext) => (extension_of(path) == Some(ext.as_str())).then(|| PathMatch {
				servlet_path: path.to_owned(),
				path_info: None,
			}),
			Self::Default => Some(PathMatch {
				servlet_path: path.to_owned(),
				path_info: None,
			}),
		}
	}
}

/// Extension of the last path segment, without the dot.
pub(crate) fn extension_of(path: &str) -> Option<&str> {
	let segment = path.rsplit('/').next()?;
	let (_, ext) = segment.rsplit_once('.')?;
	(!ext.is_empty()).then_some(ext)
}

impl fmt::Display for PathPattern {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Exact(path) => f.write_str(path),
			Self::Prefix(prefix) => write!(f, "{prefix}/*"),
			Self::Extension(ext) => write!(f, "*.{ext}"),
			Self::Default => f.write_str("/"),
		}
	}
}
