//! Settings of the runtime itself, loaded from TOML.
//!
//! ```toml
//! ignore-bound-location = false
//! catch-up = "known-pids"
//! log-level = "arbor_scr=debug,info"
//! ```
//!
//! Every key is optional.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Error)]
pub enum SettingsError {
	#[error("failed to read settings {}: {source}", .path.display())]
	Io {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("invalid settings in {origin}: {source}")]
	Parse {
		/// File path, or `<inline>` for strings.
		origin: String,
		#[source]
		source: toml::de::Error,
	},

	#[error("invalid log filter {filter:?}: {reason}")]
	LogFilter { filter: String, reason: String },

	/// A global subscriber is already installed.
	#[error("tracing subscriber already installed: {0}")]
	Subscriber(String),
}

/// Which configurations are replayed when the store becomes available.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CatchUpScope {
	/// Every configuration in the store.
	All,
	/// Only pids some registered component is configured by.
	#[default]
	KnownPids,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct RuntimeSettings {
	/// Deliver configurations regardless of the unit they are bound to.
	pub ignore_bound_location: bool,
	pub catch_up: CatchUpScope,
	/// Filter directive used when `RUST_LOG` is unset.
	pub log_level: String,
}

impl Default for RuntimeSettings {
	fn default() -> Self {
		Self {
			ignore_bound_location: false,
			catch_up: CatchUpScope::default(),
			log_level: "info".to_owned(),
		}
	}
}

impl RuntimeSettings {
	pub fn from_toml_str(input: &str) -> Result<Self, SettingsError> {
		toml::from_str(input).map_err(|source| SettingsError::Parse {
			origin: "<inline>".to_owned(),
			source,
		})
	}

	/// Reads settings from a TOML file.
	pub fn load(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
		let path = path.as_ref();
		let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Io {
			path: path.to_owned(),
			source,
		})?;
		toml::from_str(&content).map_err(|source| SettingsError::Parse {
			origin: path.display().to_string(),
			source,
		})
	}

	/// `RUST_LOG` if set, else [`log_level`](Self::log_level).
	pub fn env_filter(&self) -> Result<EnvFilter, SettingsError> {
		if let Ok(filter) = EnvFilter::try_from_default_env() {
			return Ok(filter);
		}
		EnvFilter::try_new(&self.log_level).map_err(|err| SettingsError::LogFilter {
			filter: self.log_level.clone(),
			reason: err.to_string(),
		})
	}
}

/// Installs a global fmt subscriber for hosting processes. Fails if one is
/// already installed; the runtime itself only emits events.
pub fn init_tracing(settings: &RuntimeSettings) -> Result<(), SettingsError> {
	let filter = settings.env_filter()?;
	tracing_subscriber::fmt()
		.with_env_filter(filter)
		.with_target(true)
		.try_init()
		.map_err(|err| SettingsError::Subscriber(err.to_string()))
}

#[cfg(test)]
mod tests {
	use std::io::Write;

	use pretty_assertions::assert_eq;

	use super::*;

	#[test]
	fn every_key_is_optional() {
		assert_eq!(RuntimeSettings::from_toml_str("").unwrap(), RuntimeSettings::default());
		let settings = RuntimeSettings::from_toml_str("catch-up = \"all\"").unwrap();
		assert_eq!(settings.catch_up, CatchUpScope::All);
		assert!(!settings.ignore_bound_location);
	}

	#[test]
	fn loads_from_file() {
		let mut file = tempfile::NamedTempFile::new().unwrap();
		writeln!(file, "ignore-bound-location = true\nlog-level = \"debug\"").unwrap();

		let settings = RuntimeSettings::load(file.path()).unwrap();
		assert!(settings.ignore_bound_location);
		assert_eq!(settings.log_level, "debug");
		assert_eq!(settings.catch_up, CatchUpScope::KnownPids);
	}

	#[test]
	fn reports_bad_input() {
		let err = RuntimeSettings::from_toml_str("catch-up = \"some\"").unwrap_err();
		assert!(matches!(err, SettingsError::Parse { ref origin, .. } if origin == "<inline>"));
		assert!(RuntimeSettings::from_toml_str("unknown = 1").is_err());

		let dir = tempfile::tempdir().unwrap();
		let missing = dir.path().join("absent.toml");
		let err = RuntimeSettings::load(&missing).unwrap_err();
		assert!(matches!(err, SettingsError::Io { ref path, .. } if path == &missing));
	}
}
