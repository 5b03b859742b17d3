//! Canonical, source-tagged views over raw feed records.
//!
//! Records arrive in a handful of loosely defined shapes. [`classify`] sniffs them in a
//! fixed order and never fails: anything it does not recognise comes back with
//! `known == false` for the caller to filter.

pub mod dates;

use chrono::{DateTime, FixedOffset};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

use crate::stream::Record;

/// `network` value that marks a record as an internal message.
pub const DEFAULT_MESSAGE_NETWORK: &str = "internal";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifyOptions {
    /// Substitute the nested original for retweets.
    pub retweeted_by: bool,
    pub message_network: String,
}

impl Default for ClassifyOptions {
    fn default() -> Self {
        Self {
            retweeted_by: true,
            message_network: DEFAULT_MESSAGE_NETWORK.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SourceFlags {
    pub twitter: bool,
    pub facebook: bool,
    pub message: bool,
}

/// The recognised record shapes, in the order they are tried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordShape {
    /// String identifier, text body and entity annotations.
    Twitter,
    /// Platform identifier; only usable with a string `message`.
    Facebook { has_message: bool },
    /// `network` equal to the configured sentinel.
    Message,
    Unknown,
}

impl RecordShape {
    pub fn detect(record: &Value, message_network: &str) -> Self {
        if looks_like_twitter(record) {
            RecordShape::Twitter
        } else if truthy(record.get("facebook_id")) || truthy(record.get("fb_id")) {
            RecordShape::Facebook {
                has_message: record.get("message").is_some_and(Value::is_string),
            }
        } else if record.get("network").and_then(Value::as_str) == Some(message_network) {
            RecordShape::Message
        } else {
            RecordShape::Unknown
        }
    }

    pub fn source(self) -> SourceFlags {
        match self {
            RecordShape::Twitter => SourceFlags {
                twitter: true,
                ..SourceFlags::default()
            },
            RecordShape::Facebook { .. } => SourceFlags {
                facebook: true,
                ..SourceFlags::default()
            },
            RecordShape::Message => SourceFlags {
                message: true,
                ..SourceFlags::default()
            },
            RecordShape::Unknown => SourceFlags::default(),
        }
    }

    pub fn is_known(self) -> bool {
        match self {
            RecordShape::Twitter | RecordShape::Message => true,
            RecordShape::Facebook { has_message } => has_message,
            RecordShape::Unknown => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Context {
    pub shape: RecordShape,
    pub source: SourceFlags,
    pub known: bool,
    /// The record to present. For a resolved retweet this is the nested original.
    pub record: Record,
    /// The record exactly as it arrived.
    pub original: Record,
    pub retweet: bool,
    /// Actor of the outer record when a retweet was resolved.
    pub retweeted_by: Option<Value>,
}

impl Context {
    /// Creation time of the effective record, from `created_at` or `created_time`.
    pub fn created_at(&self) -> Option<DateTime<FixedOffset>> {
        ["created_at", "created_time"]
            .iter()
            .filter_map(|field| self.record.get(*field).and_then(Value::as_str))
            .find_map(dates::parse_created_at)
    }
}

/// Classifies a raw record. Never fails; `null` and non-object records are unknown.
pub fn classify(record: &Record, options: &ClassifyOptions) -> Context {
    let shape = RecordShape::detect(record, &options.message_network);
    let mut context = Context {
        shape,
        source: shape.source(),
        known: shape.is_known(),
        record: Arc::clone(record),
        original: Arc::clone(record),
        retweet: false,
        retweeted_by: None,
    };

    if shape == RecordShape::Twitter && options.retweeted_by {
        if let Some(nested) = record.get("retweeted_status").filter(|nested| truthy(Some(*nested))) {
            context.retweet = true;
            context.retweeted_by = record.get("user").cloned();
            context.record = Arc::new(nested.clone());
        }
    }

    context
}

fn looks_like_twitter(record: &Value) -> bool {
    let has_id = non_empty_str(record.get("id_str")) || non_empty_str(record.get("id"));
    has_id && non_empty_str(record.get("text")) && truthy(record.get("entities"))
}

fn non_empty_str(value: Option<&Value>) -> bool {
    value
        .and_then(Value::as_str)
        .is_some_and(|value| !value.is_empty())
}

/// Loose presence check: absent, `null`, `false`, `0` and `""` count as missing.
fn truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(flag)) => *flag,
        Some(Value::Number(number)) => number.as_f64().is_some_and(|n| n != 0.0),
        Some(Value::String(text)) => !text.is_empty(),
        Some(Value::Array(_)) | Some(Value::Object(_)) => true,
    }
}
