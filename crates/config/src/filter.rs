//! # Filter
//!
//! Selection filters over configuration attributes, in the parenthesized prefix
//! notation configuration stores use to list configurations.
//!
//! ## Supported Syntax
//!
//! ```text
//! filter     = "(" body ")"
//! body       = and | or | not | item
//! and        = "&" filter+
//! or         = "|" filter+
//! not        = "!" filter
//! item       = attr "=" value
//! value      = "*"                 presence
//!            | chunk ("*" chunk)*  equality or substring match
//! ```
//!
//! Attribute names compare case-insensitively. `\(`, `\)`, `\*` and `\\` escape
//! the special characters inside values.
//!
//! Filters built from pids go through [`Filter::eq`], which never parses and so
//! never fails on pids containing special characters.

use std::fmt;

use arbor_primitives::{Properties, PropertyValue};

use crate::error::{ConfigError, Result};

#[cfg(test)]
mod tests;

/// A parsed selection filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
	And(Vec<Filter>),
	Or(Vec<Filter>),
	Not(Box<Filter>),
	/// Attribute present with any value.
	Present(String),
	/// Exact match.
	Equals(String, String),
	/// Wildcard match; `parts` are the literal chunks between `*`s.
	Substring { attr: String, parts: Vec<String> },
}

impl Filter {
	/// Parses a filter string.
	///
	/// # Errors
	///
	/// Returns [`ConfigError::InvalidFilter`] when the input does not match the grammar.
	pub fn parse(input: &str) -> Result<Self> {
		let mut parser = Parser::new(input);
		parser.skip_ws();
		let filter = parser.parse_filter().map_err(|reason| invalid(input, reason))?;
		parser.skip_ws();
		if let Some(ch) = parser.peek() {
			return Err(invalid(input, parser.error(format!("expected end of input, found '{ch}'"))));
		}
		Ok(filter)
	}

	/// Equality filter for an attribute, escaping nothing because nothing is parsed.
	pub fn eq(attr: &str, value: &str) -> Self {
		Self::Equals(attr.to_owned(), value.to_owned())
	}

	/// Matches values starting with `prefix`.
	pub fn prefix(attr: &str, prefix: &str) -> Self {
		Self::Substring {
			attr: attr.to_owned(),
			parts: vec![prefix.to_owned(), String::new()],
		}
	}

	/// Disjunction of filters. A single filter is returned unchanged.
	pub fn any(mut filters: Vec<Filter>) -> Self {
		if filters.len() == 1 {
			filters.remove(0)
		} else {
			Self::Or(filters)
		}
	}

	/// Evaluates the filter against an attribute set.
	pub fn matches(&self, attrs: &Properties) -> bool {
		match self {
			Self::And(items) => items.iter().all(|f| f.matches(attrs)),
			Self::Or(items) => items.iter().any(|f| f.matches(attrs)),
			Self::Not(inner) => !inner.matches(attrs),
			Self::Present(attr) => lookup(attrs, attr).is_some(),
			Self::Equals(attr, expected) => lookup(attrs, attr).is_some_and(|v| value_matches(v, &|s| s == expected)),
			Self::Substring { attr, parts } => {
				lookup(attrs, attr).is_some_and(|v| value_matches(v, &|s| substring_matches(s, parts)))
			}
		}
	}
}

fn lookup<'a>(attrs: &'a Properties, attr: &str) -> Option<&'a PropertyValue> {
	attrs.get(attr).or_else(|| attrs.iter().find(|(k, _)| k.eq_ignore_ascii_case(attr)).map(|(_, v)| v))
}

fn value_matches(value: &PropertyValue, pred: &dyn Fn(&str) -> bool) -> bool {
	match value {
		PropertyValue::List(items) => items.iter().any(|item| value_matches(item, pred)),
		other => other.to_filter_string().is_some_and(|s| pred(&s)),
	}
}

fn substring_matches(value: &str, parts: &[String]) -> bool {
	let Some((first, rest)) = parts.split_first() else {
		return true;
	};
	let Some(mut remaining) = value.strip_prefix(first.as_str()) else {
		return false;
	};
	let Some((last, middle)) = rest.split_last() else {
		return remaining.is_empty();
	};
	for part in middle {
		match remaining.find(part.as_str()) {
			Some(idx) => remaining = &remaining[idx + part.len()..],
			None => return false,
		}
	}
	remaining.len() >= last.len() && remaining.ends_with(last.as_str())
}

fn escape(value: &str) -> String {
	let mut out = String::with_capacity(value.len());
	for ch in value.chars() {
		if matches!(ch, '(' | ')' | '*' | '\\') {
			out.push('\\');
		}
		out.push(ch);
	}
	out
}

impl fmt::Display for Filter {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::And(items) | Self::Or(items) => {
				f.write_str(if matches!(self, Self::And(_)) { "(&" } else { "(|" })?;
				for item in items {
					write!(f, "{item}")?;
				}
				f.write_str(")")
			}
			Self::Not(inner) => write!(f, "(!{inner})"),
			Self::Present(attr) => write!(f, "({attr}=*)"),
			Self::Equals(attr, value) => write!(f, "({attr}={})", escape(value)),
			Self::Substring { attr, parts } => {
				let escaped: Vec<String> = parts.iter().map(|p| escape(p)).collect();
				write!(f, "({attr}={})", escaped.join("*"))
			}
		}
	}
}

fn invalid(filter: &str, reason: ParseError) -> ConfigError {
	ConfigError::InvalidFilter {
		filter: filter.to_owned(),
		reason: reason.to_string(),
	}
}

/// Position-tagged parse failure.
#[derive(Debug)]
struct ParseError {
	message: String,
	position: usize,
}

impl fmt::Display for ParseError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "at position {}: {}", self.position, self.message)
	}
}

/// Recursive descent state.
struct Parser<'a> {
	input: &'a str,
	position: usize,
}

impl<'a> Parser<'a> {
	fn new(input: &'a str) -> Self {
		Self { input, position: 0 }
	}

	fn peek(&self) -> Option<char> {
		self.input.chars().next()
	}

	fn next(&mut self) -> Option<char> {
		let ch = self.peek()?;
		self.position += ch.len_utf8();
		self.input = &self.input[ch.len_utf8()..];
		Some(ch)
	}

	fn skip_ws(&mut self) {
		while self.peek().is_some_and(char::is_whitespace) {
			self.next();
		}
	}

	fn take(&mut self, expected: char) -> std::result::Result<(), ParseError> {
		match self.next() {
			Some(ch) if ch == expected => Ok(()),
			Some(ch) => Err(ParseError {
				message: format!("expected '{expected}', found '{ch}'"),
				position: self.position - ch.len_utf8(),
			}),
			None => Err(self.error(format!("expected '{expected}', found end of input"))),
		}
	}

	fn error(&self, message: String) -> ParseError {
		ParseError {
			message,
			position: self.position,
		}
	}

	fn parse_filter(&mut self) -> std::result::Result<Filter, ParseError> {
		self.take('(')?;
		self.skip_ws();
		let filter = match self.peek() {
			Some('&') => {
				self.next();
				Filter::And(self.parse_list()?)
			}
			Some('|') => {
				self.next();
				Filter::Or(self.parse_list()?)
			}
			Some('!') => {
				self.next();
				self.skip_ws();
				Filter::Not(Box::new(self.parse_filter()?))
			}
			Some(_) => self.parse_item()?,
			None => return Err(self.error("unexpected end of input".into())),
		};
		self.skip_ws();
		self.take(')')?;
		Ok(filter)
	}

	fn parse_list(&mut self) -> std::result::Result<Vec<Filter>, ParseError> {
		let mut items = Vec::new();
		self.skip_ws();
		while self.peek() == Some('(') {
			items.push(self.parse_filter()?);
			self.skip_ws();
		}
		if items.is_empty() {
			return Err(self.error("operator requires at least one operand".into()));
		}
		Ok(items)
	}

	fn parse_item(&mut self) -> std::result::Result<Filter, ParseError> {
		let mut attr = String::new();
		while let Some(ch) = self.peek() {
			if matches!(ch, '=' | '(' | ')' | '*' | '<' | '>' | '~') {
				break;
			}
			attr.push(ch);
			self.next();
		}
		let attr = attr.trim().to_owned();
		if attr.is_empty() {
			return Err(self.error("missing attribute name".into()));
		}
		self.take('=')?;

		let mut parts = vec![String::new()];
		let mut wildcard = false;
		loop {
			match self.peek() {
				None => return Err(self.error("unterminated value".into())),
				Some(')') => break,
				Some('(') => return Err(self.error("unescaped '(' in value".into())),
				Some('*') => {
					self.next();
					wildcard = true;
					parts.push(String::new());
				}
				Some('\\') => {
					self.next();
					let ch = self.next().ok_or_else(|| self.error("dangling escape".into()))?;
					if let Some(last) = parts.last_mut() {
						last.push(ch);
					}
				}
				Some(ch) => {
					self.next();
					if let Some(last) = parts.last_mut() {
						last.push(ch);
					}
				}
			}
		}

		if !wildcard {
			let value = parts.pop().unwrap_or_default();
			return Ok(Filter::Equals(attr, value));
		}
		if parts.len() == 2 && parts.iter().all(String::is_empty) {
			return Ok(Filter::Present(attr));
		}
		Ok(Filter::Substring { attr, parts })
	}
}
