use serde_json::Value;
use std::sync::Arc;

use super::error::StreamError;
use super::META_CALLBACK_PREFIX;
use crate::transport::{encode_component, Dispatcher, QueryParams, QueryValue};

/// Query options for the account meta endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccountMetaParameters {
    pub quick_stats: bool,
    /// Streams to include. A single name is sent the same way as a list of one.
    pub streams: Vec<String>,
}

impl AccountMetaParameters {
    pub fn to_query(&self) -> QueryParams {
        let mut params = QueryParams::new();
        params.push_flag("quick_stats", self.quick_stats);
        if !self.streams.is_empty() {
            params.push("streams", QueryValue::List(self.streams.clone()));
        }
        params
    }
}

/// Account-level view of a host: `GET {host}/{user}.json`.
pub struct AccountSource {
    user: String,
    host: String,
    dispatcher: Arc<Dispatcher>,
}

impl AccountSource {
    pub fn new(user: impl Into<String>, host: impl Into<String>, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            user: user.into(),
            host: host.into().trim_end_matches('/').to_string(),
            dispatcher,
        }
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn meta_url(&self) -> String {
        format!("{}/{}.json", self.host, encode_component(&self.user))
    }

    pub async fn meta(&self, params: &AccountMetaParameters) -> Result<Value, StreamError> {
        let payload = self
            .dispatcher
            .dispatch(&self.meta_url(), params.to_query(), META_CALLBACK_PREFIX)
            .await?;
        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::{AccountMetaParameters, AccountSource};
    use crate::transport::{Dispatcher, DEFAULT_TIMEOUT};
    use std::sync::Arc;

    #[test]
    fn account_meta_query_joins_streams() {
        let params = AccountMetaParameters {
            quick_stats: true,
            streams: vec!["launch".to_string(), "support".to_string()],
        };
        assert_eq!(
            params.to_query().to_string(),
            "quick_stats=1&streams=launch,support"
        );
        assert!(AccountMetaParameters::default().to_query().is_empty());
    }

    #[test]
    fn account_meta_url_uses_user_segment() {
        let account = AccountSource::new(
            "acme",
            "http://feeds.test",
            Arc::new(Dispatcher::http(DEFAULT_TIMEOUT)),
        );
        assert_eq!(account.meta_url(), "http://feeds.test/acme.json");
        assert_eq!(account.user(), "acme");
    }
}
