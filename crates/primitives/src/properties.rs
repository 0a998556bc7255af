use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Well-known property keys.
pub mod keys {
	pub const SERVICE_PID: &str = "service.pid";
	pub const FACTORY_PID: &str = "service.factoryPid";
	pub const SERVICE_RANKING: &str = "service.ranking";
	pub const SERVICE_ID: &str = "service.id";
	pub const COMPONENT_NAME: &str = "component.name";
	pub const BOUND_LOCATION: &str = "service.bundleLocation";
}

/// One property value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
	Bool(bool),
	Int(i64),
	Float(f64),
	Str(String),
	List(Vec<PropertyValue>),
}

impl PropertyValue {
	pub fn as_str(&self) -> Option<&str> {
		match self {
			Self::Str(s) => Some(s),
			_ => None,
		}
	}

	pub fn as_int(&self) -> Option<i64> {
		match self {
			Self::Int(v) => Some(*v),
			_ => None,
		}
	}

	/// Textual form used by filter matching. Lists have no scalar form.
	pub fn to_filter_string(&self) -> Option<String> {
		match self {
			Self::Bool(b) => Some(b.to_string()),
			Self::Int(v) => Some(v.to_string()),
			Self::Float(v) => Some(v.to_string()),
			Self::Str(s) => Some(s.clone()),
			Self::List(_) => None,
		}
	}
}

impl fmt::Display for PropertyValue {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Bool(b) => write!(f, "{b}"),
			Self::Int(v) => write!(f, "{v}"),
			Self::Float(v) => write!(f, "{v}"),
			Self::Str(s) => f.write_str(s),
			Self::List(items) => {
				f.write_str("[")?;
				for (i, item) in items.iter().enumerate() {
					if i > 0 {
						f.write_str(", ")?;
					}
					write!(f, "{item}")?;
				}
				f.write_str("]")
			}
		}
	}
}

impl From<&str> for PropertyValue {
	fn from(value: &str) -> Self {
		Self::Str(value.to_owned())
	}
}

impl From<String> for PropertyValue {
	fn from(value: String) -> Self {
		Self::Str(value)
	}
}

impl From<i64> for PropertyValue {
	fn from(value: i64) -> Self {
		Self::Int(value)
	}
}

impl From<i32> for PropertyValue {
	fn from(value: i32) -> Self {
		Self::Int(value.into())
	}
}

impl From<bool> for PropertyValue {
	fn from(value: bool) -> Self {
		Self::Bool(value)
	}
}

impl From<f64> for PropertyValue {
	fn from(value: f64) -> Self {
		Self::Float(value)
	}
}

/// Ordered property set. Keys compare case-sensitively.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Properties(BTreeMap<String, PropertyValue>);

impl Properties {
	pub fn new() -> Self {
		Self::default()
	}

	/// Builder-style insert.
	pub fn with(mut self, key: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
		self.0.insert(key.into(), value.into());
		self
	}

	pub fn insert(&mut self, key: impl Into<String>, value: impl Into<PropertyValue>) -> Option<PropertyValue> {
		self.0.insert(key.into(), value.into())
	}

	pub fn get(&self, key: &str) -> Option<&PropertyValue> {
		self.0.get(key)
	}

	pub fn remove(&mut self, key: &str) -> Option<PropertyValue> {
		self.0.remove(key)
	}

	pub fn contains_key(&self, key: &str) -> bool {
		self.0.contains_key(key)
	}

	pub fn len(&self) -> usize {
		self.0.len()
	}

	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	pub fn iter(&self) -> impl Iterator<Item = (&str, &PropertyValue)> {
		self.0.iter().map(|(k, v)| (k.as_str(), v))
	}

	/// Copies every entry of `other` over `self`.
	pub fn overlay(&mut self, other: &Properties) {
		for (k, v) in &other.0 {
			self.0.insert(k.clone(), v.clone());
		}
	}

	/// Reads `service.ranking`. Missing or non-integer values rank as 0.
	pub fn ranking(&self) -> i32 {
		self.get(keys::SERVICE_RANKING)
			.and_then(PropertyValue::as_int)
			.and_then(|v| i32::try_from(v).ok())
			.unwrap_or(0)
	}
}

impl<K, V> FromIterator<(K, V)> for Properties
where
	K: Into<String>,
	V: Into<PropertyValue>,
{
	fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
		Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn overlay_replaces_existing_keys() {
		let mut base = Properties::new().with("a", 1).with("b", "x");
		base.overlay(&Properties::new().with("b", "y").with("c", true));

		assert_eq!(base.get("a"), Some(&PropertyValue::Int(1)));
		assert_eq!(base.get("b"), Some(&PropertyValue::Str("y".into())));
		assert_eq!(base.get("c"), Some(&PropertyValue::Bool(true)));
	}

	#[test]
	fn ranking_defaults_to_zero() {
		assert_eq!(Properties::new().ranking(), 0);
		assert_eq!(Properties::new().with(keys::SERVICE_RANKING, "high").ranking(), 0);
		assert_eq!(Properties::new().with(keys::SERVICE_RANKING, 7).ranking(), 7);
		assert_eq!(Properties::new().with(keys::SERVICE_RANKING, i64::MAX).ranking(), 0);
	}

	#[test]
	fn untagged_json_roundtrip_keeps_types() {
		let props = Properties::new().with("n", 3).with("s", "v").with("l", PropertyValue::List(vec![1.into(), "x".into()]));
		let json = serde_json::to_string(&props).unwrap();
		assert_eq!(json, r#"{"l":[1,"x"],"n":3,"s":"v"}"#);
		let back: Properties = serde_json::from_str(&json).unwrap();
		assert_eq!(back, props);
	}
}
