//! Wire value representation.
//!
//! Protocol payloads are JSON, but handles are smuggled through as strings
//! of the form `{DENO_WORLD_INST_ID:N}` (host→PHP) and `{PHP_WORLD_INST_ID:N}`
//! (PHP→host), per §6.2. `PhpValue` is the decoded form; encoding back to
//! JSON re-inserts the marker strings so the far side's `json_decode` sees
//! an ordinary string it then recognizes as a handle reference.

use std::collections::BTreeMap;
use std::fmt;

use regex::Regex;
use serde_json::Value as Json;
use std::sync::OnceLock;

/// Marker prefix for a handle to a host-side `PhpProxy`, embedded in JSON
/// sent to PHP (§6.2).
pub const HOST_HANDLE_MARKER_PREFIX: &str = "DENO_WORLD_INST_ID";
/// Marker prefix for a handle to a PHP-side object, embedded in JSON sent
/// to the host (§6.2).
pub const PHP_HANDLE_MARKER_PREFIX: &str = "PHP_WORLD_INST_ID";

fn marker_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\{(DENO_WORLD_INST_ID|PHP_WORLD_INST_ID):(\d+)\}$").expect("valid regex")
    })
}

/// A decoded protocol value: either an ordinary JSON scalar/array/object, or
/// a handle reference recognized from its marker string.
#[derive(Debug, Clone, PartialEq)]
pub enum PhpValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Array(Vec<PhpValue>),
    Object(BTreeMap<String, PhpValue>),
    /// A reference to a PHP-side object, by its handle id in the PHP-side
    /// table (decoded from a `{PHP_WORLD_INST_ID:N}` marker).
    PhpHandle(u32),
    /// A reference to a host-side proxy object, by its handle id in the
    /// host-side table (decoded from a `{DENO_WORLD_INST_ID:N}` marker,
    /// only meaningful when the host itself parses its own markers back
    /// out of a round-tripped value).
    HostHandle(u32),
    /// The distinguished "undefined" result (an inbound length of `-1`,
    /// §4.1), distinct from `Null`: e.g. reading a missing global or a
    /// missing subscript path segment yields this, not `Null`.
    Undefined,
}

impl fmt::Display for PhpValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

impl PhpValue {
    pub fn to_json(&self) -> Json {
        match self {
            PhpValue::Null => Json::Null,
            PhpValue::Bool(b) => Json::Bool(*b),
            PhpValue::Int(i) => Json::Number((*i).into()),
            PhpValue::Float(n) => serde_json::Number::from_f64(*n)
                .map(Json::Number)
                .unwrap_or(Json::Null),
            PhpValue::String(s) => Json::String(s.clone()),
            PhpValue::Array(items) => Json::Array(items.iter().map(PhpValue::to_json).collect()),
            PhpValue::Object(map) => {
                let mut obj = serde_json::Map::new();
                for (k, v) in map {
                    obj.insert(k.clone(), v.to_json());
                }
                Json::Object(obj)
            }
            PhpValue::PhpHandle(id) => {
                Json::String(format!("{{{PHP_HANDLE_MARKER_PREFIX}:{id}}}"))
            }
            PhpValue::HostHandle(id) => {
                Json::String(format!("{{{HOST_HANDLE_MARKER_PREFIX}:{id}}}"))
            }
            // `undefined` has no JSON form of its own; it only ever arises
            // from the wire's distinguished `-1`-length frame, never from
            // decoding a JSON value we'd need to re-encode.
            PhpValue::Undefined => Json::Null,
        }
    }

    pub fn from_json(json: &Json) -> PhpValue {
        match json {
            Json::Null => PhpValue::Null,
            Json::Bool(b) => PhpValue::Bool(*b),
            Json::Number(n) => {
                if let Some(i) = n.as_i64() {
                    PhpValue::Int(i)
                } else {
                    PhpValue::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            Json::String(s) => decode_marker(s).unwrap_or_else(|| PhpValue::String(s.clone())),
            Json::Array(items) => PhpValue::Array(items.iter().map(PhpValue::from_json).collect()),
            Json::Object(obj) => {
                let mut map = BTreeMap::new();
                for (k, v) in obj {
                    map.insert(k.clone(), PhpValue::from_json(v));
                }
                PhpValue::Object(map)
            }
        }
    }

    /// Parses a complete JSON document into a `PhpValue`.
    pub fn parse(bytes: &[u8]) -> Result<PhpValue, serde_json::Error> {
        let json: Json = serde_json::from_slice(bytes)?;
        Ok(PhpValue::from_json(&json))
    }

    /// Serializes to the JSON bytes sent over the wire.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.to_json().to_string().into_bytes()
    }

    pub fn as_php_handle(&self) -> Option<u32> {
        match self {
            PhpValue::PhpHandle(id) => Some(*id),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PhpValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Highest PHP-side handle id reachable anywhere inside this value,
    /// including ones nested in arrays/objects. Every PHP object crossing
    /// the wire registers a fresh, strictly increasing id, so this is what
    /// callers use to keep a local high-water mark in sync with PHP's own.
    pub fn max_php_handle(&self) -> Option<u32> {
        match self {
            PhpValue::PhpHandle(id) => Some(*id),
            PhpValue::Array(items) => items.iter().filter_map(PhpValue::max_php_handle).max(),
            PhpValue::Object(map) => map.values().filter_map(PhpValue::max_php_handle).max(),
            _ => None,
        }
    }
}

fn decode_marker(s: &str) -> Option<PhpValue> {
    let caps = marker_regex().captures(s)?;
    let id: u32 = caps.get(2)?.as_str().parse().ok()?;
    match &caps[1] {
        PHP_HANDLE_MARKER_PREFIX => Some(PhpValue::PhpHandle(id)),
        HOST_HANDLE_MARKER_PREFIX => Some(PhpValue::HostHandle(id)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_roundtrip() {
        let v = PhpValue::Int(42);
        let json = v.to_json();
        assert_eq!(PhpValue::from_json(&json), v);
    }

    #[test]
    fn php_handle_marker_roundtrip() {
        let v = PhpValue::PhpHandle(7);
        let json = v.to_json();
        assert_eq!(json, Json::String("{PHP_WORLD_INST_ID:7}".into()));
        assert_eq!(PhpValue::from_json(&json), v);
    }

    #[test]
    fn host_handle_marker_roundtrip() {
        let v = PhpValue::HostHandle(3);
        let json = v.to_json();
        assert_eq!(json, Json::String("{DENO_WORLD_INST_ID:3}".into()));
        assert_eq!(PhpValue::from_json(&json), v);
    }

    #[test]
    fn ordinary_string_is_not_a_marker() {
        let v = PhpValue::String("{PHP_WORLD_INST_ID:abc}".into());
        let json = v.to_json();
        // non-digit id, must not parse as a handle
        assert_eq!(PhpValue::from_json(&json), v);
    }

    #[test]
    fn nested_array_roundtrip() {
        let v = PhpValue::Array(vec![PhpValue::Int(1), PhpValue::PhpHandle(9), PhpValue::Null]);
        let json = v.to_json();
        assert_eq!(PhpValue::from_json(&json), v);
    }

    #[test]
    fn undefined_is_distinct_from_null() {
        assert_ne!(PhpValue::Undefined, PhpValue::Null);
    }

    #[test]
    fn parse_and_to_bytes() {
        let parsed = PhpValue::parse(br#"{"a":1,"b":"{PHP_WORLD_INST_ID:5}"}"#).unwrap();
        match parsed {
            PhpValue::Object(map) => {
                assert_eq!(map.get("a"), Some(&PhpValue::Int(1)));
                assert_eq!(map.get("b"), Some(&PhpValue::PhpHandle(5)));
            }
            other => panic!("unexpected value: {other:?}"),
        }
    }
}
