use std::env;
use std::time::Duration;

use thiserror::Error;

use crate::context::DEFAULT_MESSAGE_NETWORK;
use crate::poller::DEFAULT_FREQUENCY;
use crate::stream::{StreamIdentity, DEFAULT_HOST};
use crate::transport::DEFAULT_TIMEOUT;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} is required (env var or command-line argument)")]
    MissingEnvVar(&'static str),
    #[error("invalid value for {name}: `{value}`")]
    InvalidValue { name: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Feed host, e.g. `http://tweetriver.com`.
    pub api_url: String,
    pub stream: Option<StreamIdentity>,
    pub timeout: Duration,
    pub frequency: Duration,
    pub message_network: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_HOST.to_string(),
            stream: None,
            timeout: DEFAULT_TIMEOUT,
            frequency: DEFAULT_FREQUENCY,
            message_network: DEFAULT_MESSAGE_NETWORK.to_string(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds a config from an arbitrary variable source. Unset and blank values fall
    /// back to defaults.
    pub fn from_lookup<L>(lookup: L) -> Result<Self, ConfigError>
    where
        L: Fn(&str) -> Option<String>,
    {
        let read = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
        let defaults = Self::default();

        let stream = read("RIVER_STREAM")
            .map(|raw| {
                raw.parse::<StreamIdentity>()
                    .map_err(|_| ConfigError::InvalidValue {
                        name: "RIVER_STREAM",
                        value: raw,
                    })
            })
            .transpose()?;

        let timeout = match read("RIVER_TIMEOUT_MS") {
            Some(raw) => Duration::from_millis(parse_positive("RIVER_TIMEOUT_MS", &raw)?),
            None => defaults.timeout,
        };
        let frequency = match read("RIVER_FREQUENCY_SECS") {
            Some(raw) => Duration::from_secs(parse_positive("RIVER_FREQUENCY_SECS", &raw)?),
            None => defaults.frequency,
        };

        Ok(Self {
            api_url: read("RIVER_API_URL").unwrap_or(defaults.api_url),
            stream,
            timeout,
            frequency,
            message_network: read("RIVER_MESSAGE_NETWORK").unwrap_or(defaults.message_network),
        })
    }

    /// The stream to poll, or an error naming the variable that would provide it.
    pub fn require_stream(&self) -> Result<&StreamIdentity, ConfigError> {
        self.stream
            .as_ref()
            .ok_or(ConfigError::MissingEnvVar("RIVER_STREAM"))
    }
}

fn parse_positive(name: &'static str, raw: &str) -> Result<u64, ConfigError> {
    match raw.trim().parse::<u64>() {
        Ok(value) if value > 0 => Ok(value),
        _ => Err(ConfigError::InvalidValue {
            name,
            value: raw.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::{Config, ConfigError};
    use crate::stream::StreamIdentity;
    use std::collections::HashMap;
    use std::time::Duration;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let config = Config::from_lookup(lookup(&[])).expect("defaults are valid");
        assert_eq!(config, Config::default());
        assert_eq!(config.api_url, "http://tweetriver.com");
        assert_eq!(config.timeout, Duration::from_secs(10));
        assert_eq!(config.frequency, Duration::from_secs(30));
        assert_eq!(config.message_network, "internal");
        assert_eq!(
            config.require_stream(),
            Err(ConfigError::MissingEnvVar("RIVER_STREAM"))
        );
    }

    #[test]
    fn reads_every_variable() {
        let config = Config::from_lookup(lookup(&[
            ("RIVER_API_URL", "http://feeds.test"),
            ("RIVER_STREAM", "acme/launch"),
            ("RIVER_TIMEOUT_MS", "2500"),
            ("RIVER_FREQUENCY_SECS", "5"),
            ("RIVER_MESSAGE_NETWORK", "massrelevance"),
        ]))
        .expect("valid config");

        assert_eq!(config.api_url, "http://feeds.test");
        assert_eq!(
            config.require_stream().cloned(),
            Ok(StreamIdentity::new("acme", "launch").expect("valid identity"))
        );
        assert_eq!(config.timeout, Duration::from_millis(2500));
        assert_eq!(config.frequency, Duration::from_secs(5));
        assert_eq!(config.message_network, "massrelevance");
    }

    #[test]
    fn blank_values_fall_back_to_defaults() {
        let config = Config::from_lookup(lookup(&[("RIVER_API_URL", "  "), ("RIVER_STREAM", "")]))
            .expect("blank values are ignored");
        assert_eq!(config.api_url, "http://tweetriver.com");
        assert_eq!(config.stream, None);
    }

    #[test]
    fn rejects_malformed_values() {
        assert_eq!(
            Config::from_lookup(lookup(&[("RIVER_TIMEOUT_MS", "soon")])),
            Err(ConfigError::InvalidValue {
                name: "RIVER_TIMEOUT_MS",
                value: "soon".to_string(),
            })
        );
        assert!(Config::from_lookup(lookup(&[("RIVER_FREQUENCY_SECS", "0")])).is_err());
        assert_eq!(
            Config::from_lookup(lookup(&[("RIVER_STREAM", "acme")])),
            Err(ConfigError::InvalidValue {
                name: "RIVER_STREAM",
                value: "acme".to_string(),
            })
        );
    }
}
