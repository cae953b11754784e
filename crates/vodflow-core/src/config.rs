//! Process configuration.
//!
//! Read once at startup, either from `VODFLOW_*` environment variables or
//! from a YAML document. A missing workflow location or an unparsable value
//! is fatal.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use url::Url;

use crate::error::{ConfigError, StoreError};
use crate::executor::ExecutorSettings;
use crate::impls::redis_store::{DEFAULT_CLOSED_TTL, DEFAULT_KEY_PREFIX};
use crate::impls::{InMemoryWorkOrderStore, RedisWorkOrderStore};
use crate::manager::DEFAULT_MAX_WRITE_ATTEMPTS;
use crate::ports::WorkOrderStore;

pub const DEFAULT_RECONCILE_INTERVAL: Duration = Duration::from_secs(5);

const ENV_PREFIX: &str = "VODFLOW_";
const ENDPOINT_PREFIX: &str = "VODFLOW_ENDPOINT_";
const PARAM_PREFIX: &str = "VODFLOW_PARAM_";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    #[serde(with = "duration_secs")]
    pub reconcile_interval: Duration,

    /// Path, `file://`, `http://` or `https://` URL.
    pub workflow_location: Option<String>,

    pub store: StoreConfig,

    #[serde(with = "opt_duration_secs")]
    pub executor_call_timeout: Option<Duration>,

    pub max_write_attempts: u32,

    pub executor: ExecutorSettings,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            reconcile_interval: DEFAULT_RECONCILE_INTERVAL,
            workflow_location: None,
            store: StoreConfig::Memory,
            executor_call_timeout: None,
            max_write_attempts: DEFAULT_MAX_WRITE_ATTEMPTS,
            executor: ExecutorSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StoreConfig {
    #[default]
    Memory,
    Redis(RedisStoreConfig),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RedisStoreConfig {
    pub url: String,
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    #[serde(default = "default_closed_ttl", with = "duration_secs")]
    pub closed_ttl: Duration,
}

impl RedisStoreConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            key_prefix: default_key_prefix(),
            closed_ttl: DEFAULT_CLOSED_TTL,
        }
    }
}

fn default_key_prefix() -> String {
    DEFAULT_KEY_PREFIX.to_string()
}

fn default_closed_ttl() -> Duration {
    DEFAULT_CLOSED_TTL
}

impl StoreConfig {
    /// Construct the configured backend.
    pub async fn open(&self) -> Result<Arc<dyn WorkOrderStore>, StoreError> {
        Ok(match self {
            StoreConfig::Memory => Arc::new(InMemoryWorkOrderStore::new()),
            StoreConfig::Redis(redis) => Arc::new(
                RedisWorkOrderStore::connect(&redis.url, redis.key_prefix.clone(), redis.closed_ttl)
                    .await?,
            ),
        })
    }
}

impl OrchestratorConfig {
    /// Read `VODFLOW_*` from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(std::env::vars())
    }

    /// Variables:
    /// - `VODFLOW_WORKFLOW_LOCATION` (required)
    /// - `VODFLOW_RECONCILE_INTERVAL_SECS`
    /// - `VODFLOW_REDIS_URL` (selects the Redis store), `VODFLOW_REDIS_KEY_PREFIX`,
    ///   `VODFLOW_CLOSED_TTL_SECS`
    /// - `VODFLOW_EXECUTOR_CALL_TIMEOUT_SECS`
    /// - `VODFLOW_MAX_WRITE_ATTEMPTS`
    /// - `VODFLOW_PUBLIC_BASE_URL`
    /// - `VODFLOW_ENDPOINT_<NAME>` (URL), `VODFLOW_PARAM_<NAME>`; names are lowercased
    pub fn from_vars<I>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let vars: HashMap<String, String> = vars
            .into_iter()
            .filter(|(k, _)| k.starts_with(ENV_PREFIX))
            .collect();
        let get = |name: &str| vars.get(name).map(|v| v.trim()).filter(|v| !v.is_empty());

        let mut config = Self {
            workflow_location: Some(
                get("VODFLOW_WORKFLOW_LOCATION")
                    .ok_or(ConfigError::Missing("VODFLOW_WORKFLOW_LOCATION"))?
                    .to_string(),
            ),
            ..Self::default()
        };

        if let Some(v) = get("VODFLOW_RECONCILE_INTERVAL_SECS") {
            config.reconcile_interval = secs("VODFLOW_RECONCILE_INTERVAL_SECS", v)?;
            if config.reconcile_interval.is_zero() {
                return Err(ConfigError::Invalid {
                    name: "VODFLOW_RECONCILE_INTERVAL_SECS",
                    reason: "must be greater than zero".to_string(),
                });
            }
        }

        if let Some(url) = get("VODFLOW_REDIS_URL") {
            let mut redis = RedisStoreConfig::new(url);
            if let Some(prefix) = get("VODFLOW_REDIS_KEY_PREFIX") {
                redis.key_prefix = prefix.to_string();
            }
            if let Some(v) = get("VODFLOW_CLOSED_TTL_SECS") {
                redis.closed_ttl = secs("VODFLOW_CLOSED_TTL_SECS", v)?;
            }
            config.store = StoreConfig::Redis(redis);
        }

        if let Some(v) = get("VODFLOW_EXECUTOR_CALL_TIMEOUT_SECS") {
            config.executor_call_timeout = Some(secs("VODFLOW_EXECUTOR_CALL_TIMEOUT_SECS", v)?);
        }
        if let Some(v) = get("VODFLOW_MAX_WRITE_ATTEMPTS") {
            config.max_write_attempts = parse("VODFLOW_MAX_WRITE_ATTEMPTS", v)?;
        }
        if let Some(v) = get("VODFLOW_PUBLIC_BASE_URL") {
            config.executor.public_base_url = Some(parse("VODFLOW_PUBLIC_BASE_URL", v)?);
        }

        for (key, value) in &vars {
            if let Some(name) = key.strip_prefix(ENDPOINT_PREFIX) {
                let url: Url = parse("VODFLOW_ENDPOINT_*", value.trim())?;
                config.executor.endpoints.insert(name.to_lowercase(), url);
            } else if let Some(name) = key.strip_prefix(PARAM_PREFIX) {
                config
                    .executor
                    .params
                    .insert(name.to_lowercase(), value.clone());
            }
        }

        Ok(config)
    }

    /// Parse a YAML configuration document. Durations are in seconds.
    pub fn from_yaml(raw: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(raw).map_err(|e| ConfigError::Invalid {
            name: "configuration",
            reason: e.to_string(),
        })
    }

    pub fn require_workflow_location(&self) -> Result<&str, ConfigError> {
        self.workflow_location
            .as_deref()
            .ok_or(ConfigError::Missing("workflow_location"))
    }
}

fn parse<T>(name: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
        name,
        reason: format!("{raw:?}: {e}"),
    })
}

fn secs(name: &'static str, raw: &str) -> Result<Duration, ConfigError> {
    parse::<u64>(name, raw).map(Duration::from_secs)
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}

mod opt_duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(d).map(|v| v.map(Duration::from_secs))
    }
}
