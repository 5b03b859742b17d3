use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;

/// Opaque, ordered identifier of the newest record already observed.
///
/// Servers hand these out as integers or as decimal strings. Two decimal values compare
/// numerically (at any length); anything else falls back to lexicographic order.
#[derive(Debug, Clone)]
pub struct Cursor(String);

impl Cursor {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Reads the cursor carried by a record's `entity_id`.
    pub fn from_record(record: &Value) -> Option<Self> {
        match record.get("entity_id")? {
            Value::Number(number) => Some(Self(number.to_string())),
            Value::String(raw) if !raw.is_empty() => Some(Self(raw.clone())),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn decimal_digits(&self) -> Option<&str> {
        let digits = self.0.trim_start_matches('0');
        if !self.0.is_empty() && self.0.bytes().all(|b| b.is_ascii_digit()) {
            Some(digits)
        } else {
            None
        }
    }
}

impl Ord for Cursor {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.decimal_digits(), other.decimal_digits()) {
            (Some(left), Some(right)) => left
                .len()
                .cmp(&right.len())
                .then_with(|| left.cmp(right)),
            _ => self.0.cmp(&other.0),
        }
    }
}

impl PartialEq for Cursor {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Cursor {}

impl PartialOrd for Cursor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<u64> for Cursor {
    fn from(value: u64) -> Self {
        Self(value.to_string())
    }
}
