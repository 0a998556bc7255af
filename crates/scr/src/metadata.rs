//! Immutable component descriptions.
//!
//! Metadata is validated once, when built, so that a malformed reference
//! target or a duplicate reference name is rejected at registration time and
//! never surfaces while the component runs.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use arbor_config::Filter;
use arbor_primitives::{Pid, Properties, PropertyValue};
use serde::Serialize;
use thiserror::Error;

/// Errors raised while building metadata.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MetadataError {
	#[error("component name must not be empty")]
	EmptyName,

	#[error("component {component}: reference name must not be empty")]
	EmptyReferenceName { component: String },

	#[error("component {component}: duplicate reference {reference:?}")]
	DuplicateReference { component: String, reference: String },

	#[error("component {component}: reference {reference:?} has no interface")]
	EmptyInterface { component: String, reference: String },

	#[error("component {component}: reference {reference:?} has invalid target: {reason}")]
	InvalidTarget {
		component: String,
		reference: String,
		reason: String,
	},

	#[error("invalid cardinality {0:?}, expected one of 0..1, 1..1, 0..n, 1..n")]
	InvalidCardinality(String),

	#[error("invalid configuration policy {0:?}, expected ignore, optional or require")]
	InvalidPolicy(String),
}

/// Whether a component needs a configuration to run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConfigurationPolicy {
	/// Runs unconfigured; configuration events are not delivered.
	Ignore,
	/// Runs with metadata properties until a configuration arrives.
	#[default]
	Optional,
	/// Runs only while a configuration is present.
	Require,
}

impl FromStr for ConfigurationPolicy {
	type Err = MetadataError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"ignore" => Ok(Self::Ignore),
			"optional" => Ok(Self::Optional),
			"require" => Ok(Self::Require),
			other => Err(MetadataError::InvalidPolicy(other.to_owned())),
		}
	}
}

/// How many services a reference binds, and whether it must bind any.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
pub enum Cardinality {
	#[serde(rename = "0..1")]
	OptionalUnary,
	#[default]
	#[serde(rename = "1..1")]
	MandatoryUnary,
	#[serde(rename = "0..n")]
	OptionalMultiple,
	#[serde(rename = "1..n")]
	MandatoryMultiple,
}

impl Cardinality {
	pub fn is_mandatory(self) -> bool {
		matches!(self, Self::MandatoryUnary | Self::MandatoryMultiple)
	}

	pub fn is_multiple(self) -> bool {
		matches!(self, Self::OptionalMultiple | Self::MandatoryMultiple)
	}

	pub fn as_str(self) -> &'static str {
		match self {
			Self::OptionalUnary => "0..1",
			Self::MandatoryUnary => "1..1",
			Self::OptionalMultiple => "0..n",
			Self::MandatoryMultiple => "1..n",
		}
	}
}

impl FromStr for Cardinality {
	type Err = MetadataError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"0..1" => Ok(Self::OptionalUnary),
			"1..1" => Ok(Self::MandatoryUnary),
			"0..n" => Ok(Self::OptionalMultiple),
			"1..n" => Ok(Self::MandatoryMultiple),
			other => Err(MetadataError::InvalidCardinality(other.to_owned())),
		}
	}
}

impl fmt::Display for Cardinality {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// A declared dependency on a service interface.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceMetadata {
	pub name: String,
	pub interface: String,
	pub cardinality: Cardinality,
	/// Parsed target filter, if any.
	pub target: Option<Filter>,
}

impl ReferenceMetadata {
	pub fn new(name: impl Into<String>, interface: impl Into<String>, cardinality: Cardinality) -> Self {
		Self {
			name: name.into(),
			interface: interface.into(),
			cardinality,
			target: None,
		}
	}
}

/// Reference declaration with an unparsed target, as handed to the builder.
#[derive(Debug, Clone)]
struct ReferenceDecl {
	reference: ReferenceMetadata,
	target: Option<String>,
}

/// Immutable description of a component.
#[derive(Debug, Clone, PartialEq)]
pub struct ComponentMetadata {
	name: String,
	configuration_pids: Vec<Pid>,
	policy: ConfigurationPolicy,
	/// Component factory id. Factory components only run instances created
	/// explicitly through the holder.
	factory: Option<String>,
	enabled: bool,
	references: Vec<ReferenceMetadata>,
	properties: Properties,
}

impl ComponentMetadata {
	pub fn builder(name: impl Into<String>) -> ComponentMetadataBuilder {
		ComponentMetadataBuilder {
			name: name.into(),
			configuration_pids: Vec::new(),
			policy: ConfigurationPolicy::default(),
			factory: None,
			enabled: true,
			references: Vec::new(),
			properties: Properties::new(),
		}
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	/// Pids this component is configured by. Defaults to the component name.
	pub fn configuration_pids(&self) -> &[Pid] {
		&self.configuration_pids
	}

	pub fn policy(&self) -> ConfigurationPolicy {
		self.policy
	}

	pub fn is_configuration_ignored(&self) -> bool {
		self.policy == ConfigurationPolicy::Ignore
	}

	pub fn factory(&self) -> Option<&str> {
		self.factory.as_deref()
	}

	pub fn is_factory(&self) -> bool {
		self.factory.is_some()
	}

	/// Whether the component is enabled when registered.
	pub fn enabled(&self) -> bool {
		self.enabled
	}

	pub fn references(&self) -> &[ReferenceMetadata] {
		&self.references
	}

	pub fn reference(&self, name: &str) -> Option<&ReferenceMetadata> {
		self.references.iter().find(|r| r.name == name)
	}

	pub fn properties(&self) -> &Properties {
		&self.properties
	}
}

pub struct ComponentMetadataBuilder {
	name: String,
	configuration_pids: Vec<Pid>,
	policy: ConfigurationPolicy,
	factory: Option<String>,
	enabled: bool,
	references: Vec<ReferenceDecl>,
	properties: Properties,
}

impl ComponentMetadataBuilder {
	/// Adds a configuration pid. Without any, the component name is used.
	pub fn configuration_pid(mut self, pid: impl Into<Pid>) -> Self {
		self.configuration_pids.push(pid.into());
		self
	}

	pub fn policy(mut self, policy: ConfigurationPolicy) -> Self {
		self.policy = policy;
		self
	}

	pub fn factory(mut self, factory: impl Into<String>) -> Self {
		self.factory = Some(factory.into());
		self
	}

	pub fn enabled(mut self, enabled: bool) -> Self {
		self.enabled = enabled;
		self
	}

	pub fn reference(mut self, name: impl Into<String>, interface: impl Into<String>, cardinality: Cardinality) -> Self {
		self.references.push(ReferenceDecl {
			reference: ReferenceMetadata::new(name, interface, cardinality),
			target: None,
		});
		self
	}

	/// Adds a reference restricted to services matching `target`.
	pub fn targeted_reference(
		mut self,
		name: impl Into<String>,
		interface: impl Into<String>,
		cardinality: Cardinality,
		target: impl Into<String>,
	) -> Self {
		self.references.push(ReferenceDecl {
			reference: ReferenceMetadata::new(name, interface, cardinality),
			target: Some(target.into()),
		});
		self
	}

	pub fn property(mut self, key: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
		self.properties.insert(key, value);
		self
	}

	/// Validates and freezes the description.
	pub fn build(self) -> Result<Arc<ComponentMetadata>, MetadataError> {
		if self.name.trim().is_empty() {
			return Err(MetadataError::EmptyName);
		}

		let mut seen = BTreeSet::new();
		let mut references = Vec::with_capacity(self.references.len());
		for ReferenceDecl { mut reference, target } in self.references {
			if reference.name.is_empty() {
				return Err(MetadataError::EmptyReferenceName { component: self.name });
			}
			if !seen.insert(reference.name.clone()) {
				return Err(MetadataError::DuplicateReference {
					component: self.name,
					reference: reference.name,
				});
			}
			if reference.interface.is_empty() {
				return Err(MetadataError::EmptyInterface {
					component: self.name,
					reference: reference.name,
				});
			}
			if let Some(target) = target {
				match Filter::parse(&target) {
					Ok(filter) => reference.target = Some(filter),
					Err(err) => {
						return Err(MetadataError::InvalidTarget {
							component: self.name,
							reference: reference.name,
							reason: err.to_string(),
						});
					}
				}
			}
			references.push(reference);
		}

		let mut configuration_pids = self.configuration_pids;
		if configuration_pids.is_empty() {
			configuration_pids.push(Pid::new(self.name.as_str()));
		}
		configuration_pids.dedup();

		Ok(Arc::new(ComponentMetadata {
			name: self.name,
			configuration_pids,
			policy: self.policy,
			factory: self.factory,
			enabled: self.enabled,
			references,
			properties: self.properties,
		}))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn pids_default_to_name() {
		let meta = ComponentMetadata::builder("org.example.Web").build().unwrap();
		assert_eq!(meta.configuration_pids(), &[Pid::new("org.example.Web")]);
		assert_eq!(meta.policy(), ConfigurationPolicy::Optional);
		assert!(meta.enabled());
	}

	#[test]
	fn rejects_bad_declarations_eagerly() {
		assert_eq!(ComponentMetadata::builder(" ").build().unwrap_err(), MetadataError::EmptyName);

		let dup = ComponentMetadata::builder("c")
			.reference("log", "Log", Cardinality::MandatoryUnary)
			.reference("log", "Log", Cardinality::OptionalUnary)
			.build();
		assert!(matches!(dup, Err(MetadataError::DuplicateReference { .. })));

		let bad_target = ComponentMetadata::builder("c")
			.targeted_reference("db", "DataSource", Cardinality::MandatoryUnary, "(name=main")
			.build();
		assert!(matches!(bad_target, Err(MetadataError::InvalidTarget { .. })));
	}

	#[test]
	fn cardinality_parses_declared_forms() {
		for (text, expected) in [
			("0..1", Cardinality::OptionalUnary),
			("1..1", Cardinality::MandatoryUnary),
			("0..n", Cardinality::OptionalMultiple),
			("1..n", Cardinality::MandatoryMultiple),
		] {
			let parsed: Cardinality = text.parse().unwrap();
			assert_eq!(parsed, expected);
			assert_eq!(parsed.to_string(), text);
		}
		assert!("2..n".parse::<Cardinality>().is_err());
		assert!(Cardinality::MandatoryMultiple.is_mandatory());
		assert!(!Cardinality::OptionalMultiple.is_mandatory());
	}

	#[test]
	fn policy_parses() {
		assert_eq!("require".parse::<ConfigurationPolicy>().unwrap(), ConfigurationPolicy::Require);
		assert!("sometimes".parse::<ConfigurationPolicy>().is_err());
	}
}
