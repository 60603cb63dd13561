// Copyright 2025 Kore Ledger, SL
// SPDX-License-Identifier: Apache-2.0

//! # Runtime configuration
//!
//! The configuration declares which adapters to run, how ports route and which policies
//! wrap each port. It is read from TOML or JSON:
//!
//! ```toml
//! [[adapters.inbound]]
//! name = "api"
//! type = "local"
//! settings = { capacity = 16 }
//!
//! [ports.greet]
//! strategy = "first"
//! handlers = ["app.greeting:hello"]
//!
//! [policies.greet.retry]
//! max_attempts = 5
//!
//! [policies.greet.backpressure]
//! max_concurrent = 10
//! rejection_strategy = "queue"
//! queue_size = 20
//!
//! [policies.greet.timeout]
//! seconds = 2.5
//! ```
//!
//! A policy section that is absent leaves the matching middleware out of the port's chain.
//!

use crate::Error;

use router::{
    BackpressureConfig, RetryConfig, StrategyKind, parse_seconds, saturating_seconds,
};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use std::{
    collections::{HashMap, HashSet},
    path::Path,
    time::Duration,
};

/// Complete runtime configuration.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub adapters: AdaptersConfig,
    pub ports: HashMap<String, PortConfig>,
    pub policies: HashMap<String, PortPolicy>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptersConfig {
    pub inbound: Vec<AdapterConfig>,
    pub outbound: Vec<AdapterConfig>,
}

/// One adapter block.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AdapterConfig {
    /// Unique adapter name, used by `deliver`.
    pub name: String,
    /// Factory key. Defaults to `name`.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    /// Adapter specific settings.
    #[serde(default)]
    pub settings: Map<String, Value>,
}

fn enabled_by_default() -> bool {
    true
}

impl AdapterConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: None,
            enabled: true,
            settings: Map::new(),
        }
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    pub fn with_setting(mut self, key: impl Into<String>, value: Value) -> Self {
        self.settings.insert(key.into(), value);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// The factory key of this adapter.
    pub fn kind(&self) -> &str {
        self.kind.as_deref().unwrap_or(&self.name)
    }
}

/// Routing declaration of a port.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortConfig {
    pub strategy: StrategyKind,
    /// Handler references, bound in order at start.
    pub handlers: Vec<String>,
}

/// Per-port policies.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortPolicy {
    pub retry: Option<RetryConfig>,
    pub backpressure: Option<BackpressureConfig>,
    pub timeout: Option<TimeoutConfig>,
}

/// Upper bound of the time one dispatch may spend in the pipeline.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TimeoutConfig {
    pub seconds: f64,
}

impl TimeoutConfig {
    /// The limit as a `Duration`, clamped when out of range.
    pub fn duration(&self) -> Duration {
        saturating_seconds(self.seconds)
    }
}

impl RuntimeConfig {
    /// Parses a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self, Error> {
        toml::from_str(content).map_err(|e| Error::Config(e.to_string()))
    }

    /// Parses a JSON document.
    pub fn from_json_str(content: &str) -> Result<Self, Error> {
        serde_json::from_str(content).map_err(|e| Error::Config(e.to_string()))
    }

    /// Reads a `.toml` or `.json` file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Can't read {}: {}", path.display(), e))
        })?;
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Self::from_toml_str(&content),
            Some("json") => Self::from_json_str(&content),
            _ => Err(Error::Config(format!(
                "Unsupported configuration format: {}",
                path.display()
            ))),
        }
    }

    /// Enabled inbound adapter blocks, in declaration order.
    pub fn enabled_inbound(&self) -> impl Iterator<Item = &AdapterConfig> {
        self.adapters.inbound.iter().filter(|a| a.enabled)
    }

    /// Enabled outbound adapter blocks, in declaration order.
    pub fn enabled_outbound(&self) -> impl Iterator<Item = &AdapterConfig> {
        self.adapters.outbound.iter().filter(|a| a.enabled)
    }

    /// Checks the whole configuration.
    ///
    /// # Errors
    ///
    /// [`Error::Config`] naming the first offending adapter or policy.
    pub fn validate(&self) -> Result<(), Error> {
        let mut names = HashSet::new();
        for adapter in self.adapters.inbound.iter().chain(&self.adapters.outbound) {
            if adapter.name.is_empty() {
                return Err(Error::Config("Adapter name must not be empty".to_owned()));
            }
            if !names.insert(adapter.name.as_str()) {
                return Err(Error::Config(format!(
                    "Duplicate adapter name '{}'",
                    adapter.name
                )));
            }
        }

        for (port, policy) in &self.policies {
            let invalid =
                |reason: String| Error::Config(format!("Policy of port '{}': {}", port, reason));
            if let Some(retry) = &policy.retry {
                retry.validate().map_err(invalid)?;
            }
            if let Some(backpressure) = &policy.backpressure {
                backpressure.validate().map_err(invalid)?;
            }
            if let Some(timeout) = &policy.timeout {
                if parse_seconds("timeout.seconds", timeout.seconds).map_err(invalid)?
                    == Duration::ZERO
                {
                    return Err(invalid("timeout.seconds must be positive".to_owned()));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    use router::RejectionStrategy;
    use serde_json::json;

    const TOML: &str = r#"
        [[adapters.inbound]]
        name = "api"
        type = "local"
        settings = { capacity = 16 }

        [[adapters.inbound]]
        name = "legacy"
        enabled = false

        [[adapters.outbound]]
        name = "loopback"

        [ports.greet]
        handlers = ["app.greeting:hello"]

        [ports.events]
        strategy = "broadcast"
        handlers = ["audit", "app.mail:notify"]

        [policies.greet.retry]
        max_attempts = 5
        retryable_errors = ["503"]

        [policies.greet.backpressure]
        max_concurrent = 10
        rejection_strategy = "queue"
        queue_size = 20

        [policies.greet.timeout]
        seconds = 2.5
    "#;

    #[test]
    fn test_parse_toml() {
        let config = RuntimeConfig::from_toml_str(TOML).unwrap();
        assert!(config.validate().is_ok());

        let api = &config.adapters.inbound[0];
        assert_eq!(api.kind(), "local");
        assert_eq!(api.settings.get("capacity"), Some(&json!(16)));
        assert!(!config.adapters.inbound[1].enabled);
        assert_eq!(config.enabled_inbound().count(), 1);
        assert_eq!(config.adapters.outbound[0].kind(), "loopback");

        assert_eq!(config.ports["greet"].strategy, StrategyKind::First);
        assert_eq!(config.ports["events"].strategy, StrategyKind::Broadcast);
        assert_eq!(config.ports["events"].handlers, vec!["audit", "app.mail:notify"]);

        let policy = &config.policies["greet"];
        let retry = policy.retry.as_ref().unwrap();
        assert_eq!(retry.max_attempts, 5);
        assert_eq!(retry.initial_delay, 1.0);
        assert_eq!(retry.retryable_errors, vec!["503"]);
        let backpressure = policy.backpressure.as_ref().unwrap();
        assert_eq!(backpressure.rejection_strategy, RejectionStrategy::Queue);
        assert_eq!(backpressure.queue_size, 20);
        assert_eq!(
            policy.timeout.as_ref().unwrap().duration(),
            Duration::from_millis(2500)
        );
    }

    #[test]
    fn test_parse_json() {
        let config = RuntimeConfig::from_json_str(
            r#"{"policies": {"p": {"backpressure": {"rejection_strategy": "drop"}}}}"#,
        )
        .unwrap();
        let backpressure = config.policies["p"].backpressure.as_ref().unwrap();
        assert_eq!(backpressure.max_concurrent, 100);
        assert_eq!(backpressure.rejection_strategy, RejectionStrategy::Drop);
        assert!(config.policies["p"].retry.is_none());
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            RuntimeConfig::from_toml_str("ports = 3"),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            RuntimeConfig::from_toml_str("[ports.p]\nstrategy = \"random\""),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = RuntimeConfig::default();
        config.adapters.inbound.push(AdapterConfig::new("api"));
        config.adapters.outbound.push(AdapterConfig::new("api"));
        let Err(Error::Config(reason)) = config.validate() else {
            panic!("expected config error");
        };
        assert!(reason.contains("Duplicate adapter name 'api'"));

        let invalid_policies = [
            PortPolicy {
                retry: Some(RetryConfig {
                    max_attempts: 0,
                    ..RetryConfig::default()
                }),
                ..PortPolicy::default()
            },
            PortPolicy {
                backpressure: Some(BackpressureConfig {
                    max_concurrent: 0,
                    ..BackpressureConfig::default()
                }),
                ..PortPolicy::default()
            },
            PortPolicy {
                timeout: Some(TimeoutConfig { seconds: 0.0 }),
                ..PortPolicy::default()
            },
        ];
        for policy in invalid_policies {
            let mut config = RuntimeConfig::default();
            config.policies.insert("p".to_owned(), policy);
            let Err(Error::Config(reason)) = config.validate() else {
                panic!("expected config error");
            };
            assert!(reason.contains("port 'p'"));
        }
    }

    #[test]
    fn test_validate_rejects_out_of_range_durations() {
        let huge = [
            PortPolicy {
                timeout: Some(TimeoutConfig { seconds: 1e20 }),
                ..PortPolicy::default()
            },
            PortPolicy {
                timeout: Some(TimeoutConfig { seconds: -2.0 }),
                ..PortPolicy::default()
            },
            PortPolicy {
                retry: Some(RetryConfig {
                    max_delay: 1e20,
                    ..RetryConfig::default()
                }),
                ..PortPolicy::default()
            },
            PortPolicy {
                retry: Some(RetryConfig {
                    initial_delay: f64::INFINITY,
                    ..RetryConfig::default()
                }),
                ..PortPolicy::default()
            },
        ];
        for policy in huge {
            let mut config = RuntimeConfig::default();
            config.policies.insert("slow".to_owned(), policy);
            let Err(Error::Config(reason)) = config.validate() else {
                panic!("expected config error");
            };
            assert!(reason.contains("port 'slow'"));
            assert!(reason.contains("not a valid duration") || reason.contains("positive"));
        }

        assert_eq!(TimeoutConfig { seconds: 1e20 }.duration(), Duration::MAX);
        assert_eq!(
            TimeoutConfig { seconds: 2.5 }.duration(),
            Duration::from_millis(2500)
        );
    }

    #[test]
    fn test_from_file_by_extension() {
        let dir = tempfile::tempdir().unwrap();

        let toml_path = dir.path().join("switchboard.toml");
        std::fs::write(&toml_path, TOML).unwrap();
        let config = RuntimeConfig::from_file(&toml_path).unwrap();
        assert_eq!(config.adapters.inbound.len(), 2);

        let json_path = dir.path().join("switchboard.json");
        std::fs::write(&json_path, r#"{"ports": {"p": {"handlers": ["h"]}}}"#).unwrap();
        let config = RuntimeConfig::from_file(&json_path).unwrap();
        assert_eq!(config.ports["p"].handlers, vec!["h"]);

        let yaml_path = dir.path().join("switchboard.yaml");
        std::fs::write(&yaml_path, "ports: {}").unwrap();
        assert!(matches!(
            RuntimeConfig::from_file(&yaml_path),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            RuntimeConfig::from_file(dir.path().join("missing.toml")),
            Err(Error::Config(_))
        ));
    }
}
