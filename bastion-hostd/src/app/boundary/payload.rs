use serde_json::{Map, Value};
use std::io;

/// Nesting deeper than this is replaced by [`TRUNCATED_MARKER`].
pub const MAX_DEPTH: usize = 64;
pub const TRUNCATED_MARKER: &str = "[Truncated]";
const FORBIDDEN_KEYS: &[&str] = &["__proto__", "constructor", "prototype"];

/// Payload after canonicalisation, with the byte length of its compact JSON
/// encoding. The same input always yields the same bytes.
#[derive(Clone, Debug, PartialEq)]
pub struct CanonicalPayload {
    pub value: Value,
    pub bytes: usize,
}

pub fn canonicalize(payload: &Value) -> CanonicalPayload {
    let value = canonical_value(payload, 0);
    let mut counter = ByteCounter(0);
    let bytes = match serde_json::to_writer(&mut counter, &value) {
        Ok(()) => counter.0,
        Err(_) => usize::MAX,
    };
    CanonicalPayload { value, bytes }
}

fn is_forbidden_key(key: &str) -> bool {
    FORBIDDEN_KEYS.contains(&key) || (key.len() > 4 && key.starts_with("__") && key.ends_with("__"))
}

fn canonical_value(value: &Value, depth: usize) -> Value {
    if depth >= MAX_DEPTH && matches!(value, Value::Array(_) | Value::Object(_)) {
        return Value::String(TRUNCATED_MARKER.to_string());
    }
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().filter(|k| !is_forbidden_key(k)).collect();
            keys.sort();
            let mut out = Map::new();
            for key in keys {
                if let Some(inner) = map.get(key) {
                    out.insert(key.clone(), canonical_value(inner, depth + 1));
                }
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| canonical_value(item, depth + 1))
                .collect(),
        ),
        other => other.clone(),
    }
}

struct ByteCounter(usize);

impl io::Write for ByteCounter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0 = self.0.saturating_add(buf.len());
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
