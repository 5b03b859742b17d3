use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use std::fmt;

/// Everything except RFC 3986 unreserved characters.
const COMPONENT_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Percent-encodes one URL path segment or query component.
pub fn encode_component(raw: &str) -> String {
    utf8_percent_encode(raw, COMPONENT_ENCODE_SET).to_string()
}

/// A single query-string value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryValue {
    Scalar(String),
    /// Each element is encoded separately, then joined with a literal `,`.
    List(Vec<String>),
    /// Serializes as `key=`.
    Empty,
}

impl QueryValue {
    pub fn scalar(value: impl Into<String>) -> Self {
        Self::Scalar(value.into())
    }

    fn encode(&self) -> String {
        match self {
            Self::Scalar(value) => encode_component(value),
            Self::List(values) => values
                .iter()
                .map(|value| encode_component(value))
                .collect::<Vec<_>>()
                .join(","),
            Self::Empty => String::new(),
        }
    }
}

/// Ordered query parameters. Insertion order is preserved on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryParams {
    pairs: Vec<(String, QueryValue)>,
}

impl QueryParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, key: impl Into<String>, value: QueryValue) -> &mut Self {
        self.pairs.push((key.into(), value));
        self
    }

    /// Pushes `key=1` only when `flag` is set.
    pub fn push_flag(&mut self, key: impl Into<String>, flag: bool) -> &mut Self {
        if flag {
            self.push(key, QueryValue::scalar("1"));
        }
        self
    }

    pub fn push_opt<V: ToString>(&mut self, key: impl Into<String>, value: Option<V>) -> &mut Self {
        if let Some(value) = value {
            self.push(key, QueryValue::Scalar(value.to_string()));
        }
        self
    }

    pub fn get(&self, key: &str) -> Option<&QueryValue> {
        self.pairs
            .iter()
            .find(|(candidate, _)| candidate == key)
            .map(|(_, value)| value)
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }
}

impl fmt::Display for QueryParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, (key, value)) in self.pairs.iter().enumerate() {
            if idx > 0 {
                f.write_str("&")?;
            }
            write!(f, "{}={}", encode_component(key), value.encode())?;
        }
        Ok(())
    }
}
