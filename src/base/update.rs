//! Partial updates
//!
//! [`Updates`] maps dotted field paths to [`Update`] operations and compiles
//! into the document Base expects on `PATCH /items/{key}`.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{Map, Number, Value};

/// One operation on a field
#[derive(Debug, Clone, PartialEq)]
pub enum Update {
    /// Replace the value
    Set(Value),
    /// Add to a number; negative deltas subtract
    Increment(Number),
    /// Append to a list
    Append(Vec<Value>),
    /// Prepend to a list
    Prepend(Vec<Value>),
    /// Remove the field
    Trim,
}

impl Update {
    /// Replace the value at the path
    pub fn set(value: impl Into<Value>) -> Self {
        Update::Set(value.into())
    }

    /// Add `delta` to the number at the path
    pub fn increment(delta: impl Into<Delta>) -> Self {
        Update::Increment(delta.into().0)
    }

    /// Append a single value
    pub fn append_one(value: impl Into<Value>) -> Self {
        Update::Append(vec![value.into()])
    }

    /// Append every value of `values`, in order
    pub fn append_many<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Update::Append(values.into_iter().map(Into::into).collect())
    }

    /// Prepend a single value
    pub fn prepend_one(value: impl Into<Value>) -> Self {
        Update::Prepend(vec![value.into()])
    }

    /// Prepend every value of `values`, keeping their order
    pub fn prepend_many<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Update::Prepend(values.into_iter().map(Into::into).collect())
    }

    /// Remove the field
    pub fn trim() -> Self {
        Update::Trim
    }
}

/// Wire document of an update request. Empty groups are not serialized.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UpdateDocument {
    /// Paths to overwrite
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub set: Map<String, Value>,
    /// Paths to increment
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub increment: Map<String, Value>,
    /// Paths to append to
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub append: Map<String, Value>,
    /// Paths to prepend to
    #[serde(skip_serializing_if = "Map::is_empty")]
    pub prepend: Map<String, Value>,
    /// Paths to remove
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub delete: Vec<String>,
}

/// Field path to operation. A later operation on the same path replaces
/// the earlier one.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Updates {
    ops: BTreeMap<String, Update>,
}

impl Updates {
    /// No operations
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an operation
    pub fn with(mut self, path: impl Into<String>, update: Update) -> Self {
        self.insert(path, update);
        self
    }

    /// Shorthand for `with(path, Update::set(value))`
    pub fn set(self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.with(path, Update::set(value))
    }

    /// Shorthand for `with(path, Update::increment(delta))`
    pub fn increment(self, path: impl Into<String>, delta: impl Into<Delta>) -> Self {
        self.with(path, Update::increment(delta))
    }

    /// Shorthand for `with(path, Update::trim())`
    pub fn trim(self, path: impl Into<String>) -> Self {
        self.with(path, Update::Trim)
    }

    /// Add an operation in place, returning the one it replaced
    pub fn insert(&mut self, path: impl Into<String>, update: Update) -> Option<Update> {
        self.ops.insert(path.into(), update)
    }

    /// True when there is nothing to update
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Number of operations
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Sort every operation into its group
    pub fn compile(&self) -> UpdateDocument {
        let mut doc = UpdateDocument::default();
        for (path, update) in &self.ops {
            match update {
                Update::Set(value) => {
                    doc.set.insert(path.clone(), value.clone());
                }
                Update::Increment(delta) => {
                    doc.increment.insert(path.clone(), Value::Number(delta.clone()));
                }
                Update::Append(values) => {
                    doc.append.insert(path.clone(), Value::Array(values.clone()));
                }
                Update::Prepend(values) => {
                    doc.prepend.insert(path.clone(), Value::Array(values.clone()));
                }
                Update::Trim => doc.delete.push(path.clone()),
            }
        }
        doc
    }
}

impl<S: Into<String>> FromIterator<(S, Update)> for Updates {
    fn from_iter<I: IntoIterator<Item = (S, Update)>>(iter: I) -> Self {
        Self {
            ops: iter.into_iter().map(|(path, op)| (path.into(), op)).collect(),
        }
    }
}

/// Amount added by [`Update::increment`].
///
/// Integers of any width stay exact. Whole floats go out as integers and
/// NaN or infinite floats increment by zero.
#[derive(Debug, Clone, PartialEq)]
pub struct Delta(Number);

macro_rules! delta_from_int {
    ($($t:ty),*) => {$(
        impl From<$t> for Delta {
            fn from(delta: $t) -> Self {
                Delta(Number::from(delta))
            }
        }
    )*};
}

delta_from_int!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize);

impl From<f64> for Delta {
    fn from(delta: f64) -> Self {
        if !delta.is_finite() {
            return Delta(Number::from(0));
        }
        if delta.fract() == 0.0 && delta.abs() < i64::MAX as f64 {
            return Delta(Number::from(delta as i64));
        }
        Delta(Number::from_f64(delta).unwrap_or_else(|| Number::from(0)))
    }
}

impl From<f32> for Delta {
    fn from(delta: f32) -> Self {
        Delta::from(f64::from(delta))
    }
}

impl From<Number> for Delta {
    fn from(delta: Number) -> Self {
        Delta(delta)
    }
}
