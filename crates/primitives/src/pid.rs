use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Persistent identifier of one configuration.
///
/// Cheap to clone; pids travel through every event and holder lookup.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Pid(Arc<str>);

impl Pid {
	pub fn new(pid: impl Into<Arc<str>>) -> Self {
		Self(pid.into())
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Debug for Pid {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "Pid({:?})", &*self.0)
	}
}

impl fmt::Display for Pid {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl Borrow<str> for Pid {
	fn borrow(&self) -> &str {
		&self.0
	}
}

impl From<&str> for Pid {
	fn from(value: &str) -> Self {
		Self::new(value)
	}
}

impl From<String> for Pid {
	fn from(value: String) -> Self {
		Self::new(value)
	}
}

/// Identity of a configuration as seen by listeners.
///
/// When `factory_pid` is set, `pid` is a generated instance identifier and
/// `factory_pid` names the template it was spawned from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConfigIdentity {
	pub pid: Pid,
	pub factory_pid: Option<Pid>,
}

impl ConfigIdentity {
	pub fn singleton(pid: impl Into<Pid>) -> Self {
		Self {
			pid: pid.into(),
			factory_pid: None,
		}
	}

	pub fn factory(pid: impl Into<Pid>, factory_pid: impl Into<Pid>) -> Self {
		Self {
			pid: pid.into(),
			factory_pid: Some(factory_pid.into()),
		}
	}

	/// The pid component holders are looked up by: the factory pid for factory
	/// configurations, the pid itself otherwise.
	pub fn target(&self) -> &Pid {
		self.factory_pid.as_ref().unwrap_or(&self.pid)
	}

	pub fn is_factory(&self) -> bool {
		self.factory_pid.is_some()
	}
}

impl fmt::Display for ConfigIdentity {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match &self.factory_pid {
			Some(factory) => write!(f, "{}@{}", self.pid, factory),
			None => write!(f, "{}", self.pid),
		}
	}
}

/// Location of the owning unit a configuration is bound to.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Location(Arc<str>);

impl Location {
	pub fn new(location: impl Into<Arc<str>>) -> Self {
		Self(location.into())
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Debug for Location {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "Location({:?})", &*self.0)
	}
}

impl fmt::Display for Location {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl From<&str> for Location {
	fn from(value: &str) -> Self {
		Self::new(value)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn target_prefers_factory_pid() {
		let singleton = ConfigIdentity::singleton("a");
		assert_eq!(singleton.target().as_str(), "a");

		let spawned = ConfigIdentity::factory("a~1", "a");
		assert_eq!(spawned.target().as_str(), "a");
		assert!(spawned.is_factory());
		assert_eq!(spawned.to_string(), "a~1@a");
	}

	#[test]
	fn pid_serializes_as_plain_string() {
		let json = serde_json::to_string(&Pid::new("org.example")).unwrap();
		assert_eq!(json, "\"org.example\"");
	}
}
