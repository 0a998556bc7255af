use arbor_primitives::{Properties, PropertyValue};
use pretty_assertions::assert_eq;

use super::Filter;
use crate::ConfigError;

fn attrs() -> Properties {
	Properties::new()
		.with("service.pid", "org.example.a")
		.with("service.factoryPid", "org.example")
		.with("port", 8080)
		.with("tags", PropertyValue::List(vec!["red".into(), "blue".into()]))
}

#[test]
fn parses_equality() {
	assert_eq!(Filter::parse("(service.pid=a)").unwrap(), Filter::eq("service.pid", "a"));
}

#[test]
fn parses_nested_operators() {
	let f = Filter::parse("(&(service.pid=a)(|(port=1)(!(port=2))))").unwrap();
	assert_eq!(
		f,
		Filter::And(vec![
			Filter::eq("service.pid", "a"),
			Filter::Or(vec![Filter::eq("port", "1"), Filter::Not(Box::new(Filter::eq("port", "2")))]),
		])
	);
}

#[test]
fn presence_and_substring() {
	assert_eq!(Filter::parse("(port=*)").unwrap(), Filter::Present("port".into()));
	assert_eq!(
		Filter::parse("(service.pid=org.*.a)").unwrap(),
		Filter::Substring {
			attr: "service.pid".into(),
			parts: vec!["org.".into(), ".a".into()],
		}
	);
}

#[test]
fn matching() {
	let a = attrs();
	assert!(Filter::parse("(service.pid=org.example.a)").unwrap().matches(&a));
	assert!(Filter::parse("(SERVICE.PID=org.example.a)").unwrap().matches(&a));
	assert!(Filter::parse("(service.pid=org.*)").unwrap().matches(&a));
	assert!(Filter::parse("(service.pid=*.a)").unwrap().matches(&a));
	assert!(Filter::parse("(service.pid=org*ex*a)").unwrap().matches(&a));
	assert!(!Filter::parse("(service.pid=*.b)").unwrap().matches(&a));
	assert!(Filter::parse("(port=8080)").unwrap().matches(&a));
	assert!(Filter::parse("(tags=blue)").unwrap().matches(&a));
	assert!(Filter::parse("(!(missing=*))").unwrap().matches(&a));
	assert!(!Filter::parse("(&(port=8080)(missing=*))").unwrap().matches(&a));
}

#[test]
fn escapes_roundtrip_through_display() {
	let f = Filter::eq("service.pid", "weird(pid)*");
	let text = f.to_string();
	assert_eq!(text, r"(service.pid=weird\(pid\)\*)");
	assert_eq!(Filter::parse(&text).unwrap(), f);
	assert!(f.matches(&Properties::new().with("service.pid", "weird(pid)*")));
}

#[test]
fn malformed_filters_are_rejected() {
	for bad in ["", "service.pid=a", "(service.pid=a", "(=a)", "(&)", "(a=b))", "(a=(b)"] {
		match Filter::parse(bad) {
			Err(ConfigError::InvalidFilter { filter, .. }) => assert_eq!(filter, bad),
			other => panic!("expected InvalidFilter for {bad:?}, got {other:?}"),
		}
	}
}

#[test]
fn prefix_filter_matches_and_prints() {
	let f = Filter::prefix("service.pid", "org.example|");
	assert_eq!(f.to_string(), "(service.pid=org.example|*)");
	assert!(f.matches(&Properties::new().with("service.pid", "org.example|unit:1")));
	assert!(!f.matches(&Properties::new().with("service.pid", "org.example")));
	assert_eq!(Filter::parse(&f.to_string()).unwrap(), f);
}
