//! Canonical items and dotted field paths
//!
//! An [`Item`] is the keyed mapping Base stores. Any `Serialize` value whose
//! serde representation is a map or struct can be normalized into one: serde
//! attributes decide field names (`rename`) and omitted fields
//! (`skip_serializing_if`), nested structs become nested items.
//!
//! Numbers travel as JSON numbers. When reading a dynamic item back, treat
//! numeric fields as floating point (`Value::as_f64`).

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// One stored record: field name to JSON value
pub type Item = Map<String, Value>;

/// Field holding the item key
pub const KEY_FIELD: &str = "key";

/// Reserved field holding an expiry unix timestamp
pub const EXPIRES_FIELD: &str = "__expires";

/// Separator between the segments of a field path
pub const PATH_SEPARATOR: char = '.';

/// Normalize a record into an item.
///
/// Maps are returned as equal maps, structs are mapped through their serde
/// metadata. Anything that does not serialize to a keyed mapping fails with
/// [`Error::BadItem`].
///
/// ```
/// use serde::Serialize;
///
/// #[derive(Serialize)]
/// struct User {
///     key: String,
///     #[serde(rename = "user_name")]
///     name: String,
///     #[serde(skip_serializing_if = "Vec::is_empty")]
///     likes: Vec<String>,
/// }
///
/// let item = deta::base::to_item(&User {
///     key: "u1".into(),
///     name: "jimmy".into(),
///     likes: vec![],
/// })
/// .unwrap();
/// assert_eq!(item["user_name"], "jimmy");
/// assert!(!item.contains_key("likes"));
/// ```
pub fn to_item<T: Serialize + ?Sized>(record: &T) -> Result<Item> {
    let value = serde_json::to_value(record).map_err(|e| Error::BadItem(e.to_string()))?;
    match value {
        Value::Object(map) => Ok(map),
        other => Err(Error::BadItem(format!(
            "expected a keyed mapping, got {}",
            kind_name(&other)
        ))),
    }
}

/// Normalize every record of a slice
pub fn to_items<T: Serialize>(records: &[T]) -> Result<Vec<Item>> {
    records.iter().map(to_item).collect()
}

fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a sequence",
        Value::Object(_) => "a mapping",
    }
}

/// Key of an item, if it has a string key
pub fn key_of(item: &Item) -> Option<&str> {
    item.get(KEY_FIELD).and_then(Value::as_str)
}

/// Segments of a dotted field path
pub fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split(PATH_SEPARATOR)
}

/// A path is valid when it is non-empty and no segment is empty
pub fn is_valid_path(path: &str) -> bool {
    !path.is_empty() && segments(path).all(|segment| !segment.is_empty())
}

/// Read the value at a dotted path, descending through nested items
pub fn lookup<'a>(item: &'a Item, path: &str) -> Option<&'a Value> {
    if !is_valid_path(path) {
        return None;
    }
    let mut segments = segments(path);
    let first = segments.next()?;
    segments.try_fold(item.get(first)?, |value, segment| {
        value.as_object()?.get(segment)
    })
}
