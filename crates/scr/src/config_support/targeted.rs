//! Location-targeted pids.
//!
//! A pid of the form `base|location` configures the components configured by
//! `base`, but only in the unit at `location`. When both exist, the targeted
//! one wins for that unit.

use std::fmt;

use arbor_primitives::{Location, Pid};

const SEPARATOR: char = '|';

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetedPid {
	base: Pid,
	location: Option<Location>,
}

impl TargetedPid {
	pub fn parse(pid: &Pid) -> Self {
		match pid.as_str().split_once(SEPARATOR) {
			Some((base, location)) if !base.is_empty() && !location.is_empty() => Self {
				base: Pid::new(base),
				location: Some(Location::new(location)),
			},
			_ => Self {
				base: pid.clone(),
				location: None,
			},
		}
	}

	/// The pid `base` targeted at `location`.
	pub fn for_location(base: &Pid, location: &Location) -> Pid {
		Pid::new(format!("{base}{SEPARATOR}{location}"))
	}

	/// Pid component metadata names.
	pub fn base(&self) -> &Pid {
		&self.base
	}

	pub fn location(&self) -> Option<&Location> {
		self.location.as_ref()
	}

	/// Whether a unit at `location` may use this pid.
	pub fn matches(&self, location: &Location) -> bool {
		self.location.as_ref().is_none_or(|target| target == location)
	}

	/// 1 for a plain pid, 2 for a targeted one.
	pub fn strength(&self) -> u8 {
		if self.location.is_some() { 2 } else { 1 }
	}

	pub fn binds_stronger(&self, other: &TargetedPid) -> bool {
		self.strength() > other.strength()
	}
}

impl fmt::Display for TargetedPid {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match &self.location {
			Some(location) => write!(f, "{}{SEPARATOR}{location}", self.base),
			None => write!(f, "{}", self.base),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_targeted_and_plain_pids() {
		let targeted = TargetedPid::parse(&Pid::new("web|unit:a"));
		assert_eq!(targeted.base().as_str(), "web");
		assert_eq!(targeted.location().map(Location::as_str), Some("unit:a"));
		assert!(targeted.matches(&Location::new("unit:a")));
		assert!(!targeted.matches(&Location::new("unit:b")));
		assert_eq!(targeted.to_string(), "web|unit:a");

		let plain = TargetedPid::parse(&Pid::new("web"));
		assert!(plain.matches(&Location::new("unit:b")));
		assert!(targeted.binds_stronger(&plain));
		assert!(!plain.binds_stronger(&targeted));

		assert_eq!(TargetedPid::parse(&Pid::new("web|")).base().as_str(), "web|");
	}

	#[test]
	fn builds_targeted_pid() {
		let pid = TargetedPid::for_location(&Pid::new("web"), &Location::new("unit:a"));
		assert_eq!(pid.as_str(), "web|unit:a");
		assert_eq!(TargetedPid::parse(&pid).base().as_str(), "web");
	}
}
