//! Relay configuration document and startup validation.
//!
//! The configuration is read once at startup and treated as immutable for
//! the process lifetime; components receive the parts they need by reference
//! at construction and never re-read it. File loading auto-detects the
//! format from the extension (TOML or JSON; the deployed config document is
//! JSON). The proving-service credentials can be overridden from the
//! environment so they never have to live in the mounted file.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use url::Url;
use zkrelay_types::CircuitType;

/// Environment override for the proving service endpoint.
pub const ENV_PROVING_SERVICE_BASE_URL: &str = "PROVING_SERVICE_BASE_URL";
/// Environment override for the proving service credential.
pub const ENV_PROVING_SERVICE_API_KEY: &str = "PROVING_SERVICE_API_KEY";

/// Top-level relay configuration.
///
/// The top-level fields describe the remote proving service (endpoint,
/// credential and its retry policy); everything else lives under
/// [`SdkConfig`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Coordinator-facing configuration.
    pub sdk_config: SdkConfig,
    /// Proving service endpoint.
    pub base_url: String,
    /// Proving service credential.
    pub api_key: String,
    /// Proving service retry attempts.
    pub retry_count: u32,
    /// Fixed wait between proving service retries, in seconds.
    pub retry_wait_time_sec: u64,
    /// Per-attempt timeout for proving service calls, in seconds.
    pub connection_timeout_sec: u64,
}

/// Coordinator, key-volume and worker-pool configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SdkConfig {
    /// Identity prefix used when registering and claiming with the
    /// coordinator.
    pub prover_name_prefix: String,
    /// Root directory the key manager loads proving keys from.
    pub keys_dir: PathBuf,
    /// Local bookkeeping path; opaque to the relay core.
    pub db_path: PathBuf,
    /// Coordinator endpoint and retry policy.
    pub coordinator: CoordinatorConfig,
    /// External chain RPC, consumed outside the relay core.
    pub l2geth: L2gethConfig,
    /// Accepted circuits and worker pool size.
    pub prover: ProverConfig,
    /// Bind address for the health listener.
    pub health_listener_addr: String,
}

/// Coordinator endpoint plus its independent retry policy parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Coordinator endpoint.
    pub base_url: String,
    /// Coordinator retry attempts.
    pub retry_count: u32,
    /// Fixed wait between coordinator retries, in seconds.
    pub retry_wait_time_sec: u64,
    /// Per-attempt timeout for coordinator calls, in seconds.
    pub connection_timeout_sec: u64,
}

/// External chain RPC endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct L2gethConfig {
    /// RPC endpoint URL.
    pub endpoint: String,
}

/// Accepted circuit set, pinned version and pool size.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProverConfig {
    /// Enumerated circuit types this worker accepts.
    pub circuit_types: Vec<CircuitType>,
    /// Pinned circuit version; tasks for any other version are rejected.
    pub circuit_version: String,
    /// Number of concurrent worker slots.
    pub n_workers: usize,
}

impl Config {
    /// Load config from file (auto-detects format from extension).
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let string = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config at {path:?}"))?;

        match path.extension().and_then(|s| s.to_str()) {
            Some("toml") => Self::from_toml_str(&string),
            Some("json") => Self::from_json_str(&string),
            Some(ext) => anyhow::bail!("Unsupported config format: .{ext}"),
            None => anyhow::bail!("Config file must have an extension (e.g., .json)"),
        }
    }

    /// Parse config from TOML string.
    pub fn from_toml_str(s: &str) -> anyhow::Result<Self> {
        toml_edit::de::from_str(s).context("Failed to deserialize TOML config")
    }

    /// Parse config from JSON string.
    pub fn from_json_str(s: &str) -> anyhow::Result<Self> {
        serde_json::from_str(s).context("Failed to deserialize JSON config")
    }

    /// Applies the `PROVING_SERVICE_*` environment overrides.
    pub fn override_with_env(&mut self) -> anyhow::Result<()> {
        self.override_with(|key| match std::env::var_os(key) {
            Some(val) => val
                .into_string()
                .map(Some)
                .map_err(|_| anyhow::anyhow!("{key} env var is not valid UTF-8")),
            None => Ok(None),
        })
    }

    fn override_with(
        &mut self,
        lookup: impl Fn(&str) -> anyhow::Result<Option<String>>,
    ) -> anyhow::Result<()> {
        if let Some(val) = lookup(ENV_PROVING_SERVICE_BASE_URL)? {
            self.base_url = val;
        }
        if let Some(val) = lookup(ENV_PROVING_SERVICE_API_KEY)? {
            self.api_key = val;
        }
        Ok(())
    }

    /// Rejects configurations the relay cannot run with.
    ///
    /// A failure here is fatal to the whole process: it is the only
    /// permanent rejection that aborts startup rather than a single task.
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(!self.api_key.is_empty(), "api_key must not be empty");
        Url::parse(&self.base_url)
            .with_context(|| format!("invalid proving service base_url: {}", self.base_url))?;
        Url::parse(&self.sdk_config.coordinator.base_url).with_context(|| {
            format!(
                "invalid coordinator base_url: {}",
                self.sdk_config.coordinator.base_url
            )
        })?;

        let prover = &self.sdk_config.prover;
        anyhow::ensure!(prover.n_workers >= 1, "n_workers must be at least 1");
        anyhow::ensure!(
            !prover.circuit_types.is_empty(),
            "circuit_types must not be empty"
        );
        anyhow::ensure!(
            !prover.circuit_version.is_empty(),
            "circuit_version must not be empty"
        );

        self.sdk_config
            .health_listener_addr
            .parse::<SocketAddr>()
            .with_context(|| {
                format!(
                    "invalid health_listener_addr: {}",
                    self.sdk_config.health_listener_addr
                )
            })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const JSON: &str = r#"{
        "sdk_config": {
            "prover_name_prefix": "cloud_prover_",
            "keys_dir": "/keys",
            "db_path": "/data/relay.db",
            "coordinator": {
                "base_url": "http://coordinator:8390",
                "retry_count": 10,
                "retry_wait_time_sec": 10,
                "connection_timeout_sec": 30
            },
            "l2geth": { "endpoint": "http://l2geth:8545" },
            "prover": {
                "circuit_types": ["chunk", "batch"],
                "circuit_version": "v0.13.1",
                "n_workers": 4
            },
            "health_listener_addr": "0.0.0.0:89"
        },
        "base_url": "https://prover.example.com",
        "api_key": "secret",
        "retry_count": 3,
        "retry_wait_time_sec": 5,
        "connection_timeout_sec": 60
    }"#;

    #[test]
    fn parses_the_deployed_json_document() {
        let config = Config::from_json_str(JSON).unwrap();
        assert_eq!(config.sdk_config.prover.n_workers, 4);
        assert_eq!(
            config.sdk_config.prover.circuit_types,
            vec![CircuitType::Chunk, CircuitType::Batch]
        );
        assert_eq!(config.retry_count, 3);
        config.validate().unwrap();
    }

    #[test]
    fn parses_toml() {
        let toml = r#"
            base_url = "https://prover.example.com"
            api_key = "secret"
            retry_count = 3
            retry_wait_time_sec = 5
            connection_timeout_sec = 60

            [sdk_config]
            prover_name_prefix = "cloud_prover_"
            keys_dir = "/keys"
            db_path = "/data/relay.db"
            health_listener_addr = "0.0.0.0:89"

            [sdk_config.coordinator]
            base_url = "http://coordinator:8390"
            retry_count = 10
            retry_wait_time_sec = 10
            connection_timeout_sec = 30

            [sdk_config.l2geth]
            endpoint = "http://l2geth:8545"

            [sdk_config.prover]
            circuit_types = ["chunk"]
            circuit_version = "v0.13.1"
            n_workers = 1
        "#;
        let config = Config::from_toml_str(toml).unwrap();
        assert_eq!(config.sdk_config.prover.circuit_version, "v0.13.1");
        config.validate().unwrap();
    }

    #[test]
    fn load_rejects_unknown_extensions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.ini");
        std::fs::write(&path, "x").unwrap();
        assert!(Config::load(&path).is_err());
    }

    #[test]
    fn load_reads_json_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, JSON).unwrap();
        let config = Config::load(&path).unwrap();
        assert_eq!(config.api_key, "secret");
    }

    #[test]
    fn env_overrides_replace_the_proving_service_credentials() {
        let mut config = Config::from_json_str(JSON).unwrap();
        config
            .override_with(|key| {
                Ok(match key {
                    ENV_PROVING_SERVICE_BASE_URL => Some("https://other.example.com".to_string()),
                    ENV_PROVING_SERVICE_API_KEY => Some("rotated".to_string()),
                    _ => None,
                })
            })
            .unwrap();
        assert_eq!(config.base_url, "https://other.example.com");
        assert_eq!(config.api_key, "rotated");
    }

    #[test]
    fn absent_env_leaves_the_file_values() {
        let mut config = Config::from_json_str(JSON).unwrap();
        config.override_with(|_| Ok(None)).unwrap();
        assert_eq!(config.base_url, "https://prover.example.com");
    }

    #[test]
    fn validate_rejects_zero_workers() {
        let mut config = Config::from_json_str(JSON).unwrap();
        config.sdk_config.prover.n_workers = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_empty_circuit_set() {
        let mut config = Config::from_json_str(JSON).unwrap();
        config.sdk_config.prover.circuit_types.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_empty_api_key() {
        let mut config = Config::from_json_str(JSON).unwrap();
        config.api_key.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_unparseable_listener_addr() {
        let mut config = Config::from_json_str(JSON).unwrap();
        config.sdk_config.health_listener_addr = "not-an-addr".to_string();
        assert!(config.validate().is_err());
    }
}
