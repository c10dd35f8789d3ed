//! Filter queries
//!
//! A [`Query`] is a list of condition groups. Conditions inside a group are
//! AND-ed, groups are OR-ed, an empty query matches every item. Each
//! condition is keyed by `"path?operator"`; equality has no suffix.

use std::fmt;
use std::str::FromStr;

use serde_json::{Map, Value};
use tracing::debug;

use crate::base::item::is_valid_path;
use crate::error::{Error, Result};

/// Separator between a field path and its operator suffix
pub const OPERATOR_SEPARATOR: char = '?';

/// Comparison operators understood by Base
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    /// Equal (no suffix)
    Equals,
    /// Not equal (`ne`)
    NotEquals,
    /// Greater than (`gt`)
    GreaterThan,
    /// Greater than or equal (`gte`)
    GreaterThanOrEqual,
    /// Less than (`lt`)
    LessThan,
    /// Less than or equal (`lte`)
    LessThanOrEqual,
    /// String or list contains (`contains`)
    Contains,
    /// String or list does not contain (`not_contains`)
    NotContains,
    /// Inclusive range given as `[low, high]` (`range`)
    Range,
    /// String prefix (`prefix`)
    Prefix,
}

impl Operator {
    /// All operators
    pub const ALL: [Operator; 10] = [
        Operator::Equals,
        Operator::NotEquals,
        Operator::GreaterThan,
        Operator::GreaterThanOrEqual,
        Operator::LessThan,
        Operator::LessThanOrEqual,
        Operator::Contains,
        Operator::NotContains,
        Operator::Range,
        Operator::Prefix,
    ];

    /// Suffix appended after `?`, `None` for equality
    pub fn suffix(self) -> Option<&'static str> {
        match self {
            Operator::Equals => None,
            Operator::NotEquals => Some("ne"),
            Operator::GreaterThan => Some("gt"),
            Operator::GreaterThanOrEqual => Some("gte"),
            Operator::LessThan => Some("lt"),
            Operator::LessThanOrEqual => Some("lte"),
            Operator::Contains => Some("contains"),
            Operator::NotContains => Some("not_contains"),
            Operator::Range => Some("range"),
            Operator::Prefix => Some("prefix"),
        }
    }

    /// Operator for a suffix
    pub fn from_suffix(suffix: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|op| op.suffix() == Some(suffix))
    }

    /// Condition key for `path` with this operator
    pub fn key(self, path: &str) -> String {
        match self.suffix() {
            Some(suffix) => format!("{}{}{}", path, OPERATOR_SEPARATOR, suffix),
            None => path.to_string(),
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.suffix().unwrap_or("eq"))
    }
}

impl FromStr for Operator {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s == "eq" {
            return Ok(Operator::Equals);
        }
        Self::from_suffix(s).ok_or_else(|| Error::BadQuery(format!("unknown operator '{}'", s)))
    }
}

/// Split a condition key into its path and optional operator suffix.
///
/// The path must be a valid dotted path and a `?` must be followed by a
/// suffix. Suffixes outside [`Operator`] are returned as-is and left for
/// the server to judge.
pub fn parse_key(key: &str) -> Result<(&str, Option<&str>)> {
    let (path, suffix) = match key.split_once(OPERATOR_SEPARATOR) {
        Some((path, suffix)) => (path, Some(suffix)),
        None => (key, None),
    };

    if !is_valid_path(path) {
        return Err(Error::BadQuery(format!("invalid field path in '{}'", key)));
    }
    if let Some(suffix) = suffix {
        if suffix.is_empty() {
            return Err(Error::BadQuery(format!("missing operator after '?' in '{}'", key)));
        }
        if Operator::from_suffix(suffix).is_none() {
            debug!("Forwarding unknown query operator '{}' in '{}'", suffix, key);
        }
    }
    Ok((path, suffix))
}

/// One group of AND-ed conditions
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Conditions {
    terms: Map<String, Value>,
}

impl Conditions {
    /// Empty group
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a condition with an explicit operator
    pub fn with(self, path: &str, op: Operator, value: impl Into<Value>) -> Self {
        self.raw(op.key(path), value)
    }

    /// Add a condition by its raw `"path?operator"` key
    pub fn raw(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.terms.insert(key.into(), value.into());
        self
    }

    /// `path == value`
    pub fn eq(self, path: &str, value: impl Into<Value>) -> Self {
        self.with(path, Operator::Equals, value)
    }

    /// `path != value`
    pub fn ne(self, path: &str, value: impl Into<Value>) -> Self {
        self.with(path, Operator::NotEquals, value)
    }

    /// `path > value`
    pub fn gt(self, path: &str, value: impl Into<Value>) -> Self {
        self.with(path, Operator::GreaterThan, value)
    }

    /// `path >= value`
    pub fn gte(self, path: &str, value: impl Into<Value>) -> Self {
        self.with(path, Operator::GreaterThanOrEqual, value)
    }

    /// `path < value`
    pub fn lt(self, path: &str, value: impl Into<Value>) -> Self {
        self.with(path, Operator::LessThan, value)
    }

    /// `path <= value`
    pub fn lte(self, path: &str, value: impl Into<Value>) -> Self {
        self.with(path, Operator::LessThanOrEqual, value)
    }

    /// `path` contains `value`
    pub fn contains(self, path: &str, value: impl Into<Value>) -> Self {
        self.with(path, Operator::Contains, value)
    }

    /// `path` does not contain `value`
    pub fn not_contains(self, path: &str, value: impl Into<Value>) -> Self {
        self.with(path, Operator::NotContains, value)
    }

    /// `path` starts with `value`
    pub fn prefix(self, path: &str, value: impl Into<Value>) -> Self {
        self.with(path, Operator::Prefix, value)
    }

    /// `low <= path <= high`
    pub fn range(self, path: &str, low: impl Into<Value>, high: impl Into<Value>) -> Self {
        self.with(path, Operator::Range, Value::Array(vec![low.into(), high.into()]))
    }

    /// True when the group has no condition
    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    /// Number of conditions
    pub fn len(&self) -> usize {
        self.terms.len()
    }

    fn compile(&self) -> Result<Map<String, Value>> {
        for key in self.terms.keys() {
            parse_key(key)?;
        }
        Ok(self.terms.clone())
    }
}

impl From<Map<String, Value>> for Conditions {
    fn from(terms: Map<String, Value>) -> Self {
        Self { terms }
    }
}

/// OR-ed list of condition groups
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    groups: Vec<Conditions>,
}

impl Query {
    /// Query matching every item
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a group, OR-ed with the existing ones
    pub fn or(mut self, group: Conditions) -> Self {
        self.groups.push(group);
        self
    }

    /// Add a group in place
    pub fn push(&mut self, group: Conditions) {
        self.groups.push(group);
    }

    /// Condition groups
    pub fn groups(&self) -> &[Conditions] {
        &self.groups
    }

    /// True when the query matches every item
    pub fn is_empty(&self) -> bool {
        self.groups.iter().all(Conditions::is_empty)
    }

    /// Validate condition keys and produce the wire form, dropping empty groups
    pub fn compile(&self) -> Result<Vec<Map<String, Value>>> {
        self.groups
            .iter()
            .filter(|group| !group.is_empty())
            .map(Conditions::compile)
            .collect()
    }
}

impl From<Conditions> for Query {
    fn from(group: Conditions) -> Self {
        Self { groups: vec![group] }
    }
}

impl FromIterator<Conditions> for Query {
    fn from_iter<I: IntoIterator<Item = Conditions>>(iter: I) -> Self {
        Self {
            groups: iter.into_iter().collect(),
        }
    }
}
