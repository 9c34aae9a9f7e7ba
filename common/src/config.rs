use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

/// Top-level configuration, split into subtables by concern — one
/// subtable per area, each independently unit-testable with `Default`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    pub http: HttpConfig,
    #[serde(default)]
    pub identities: IdentityConfig,
    #[serde(default)]
    pub streaming: StreamingConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub cleanup: CleanupConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HttpConfig {
    /// ip:port the streaming service binds to.
    pub socket: String,

    /// public origin used when constructing download/stream URLs.
    pub base_url: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IdentityCredential {
    pub id: String,
    pub auth_token: String,
    pub home_data_center_id: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IdentityConfig {
    pub primary: IdentityCredential,

    #[serde(default)]
    pub additional_client_identities: Vec<IdentityCredential>,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        IdentityConfig {
            primary: IdentityCredential {
                id: "primary".to_string(),
                auth_token: String::new(),
                home_data_center_id: 1,
            },
            additional_client_identities: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StreamingConfig {
    /// must be a power of two; default 1 MiB.
    pub chunk_size: u64,
    pub max_concurrent_streams_per_identity: u32,
    /// outstanding chunk reads a single upstream session will allow.
    pub session_concurrency_cap: u32,
    pub locator_cache_max_entries: usize,
    pub locator_negative_cache_seconds: u64,
    /// retries on the auth-migration error before `UpstreamUnavailable`.
    pub max_session_reopen_retries: u32,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        StreamingConfig {
            chunk_size: 1024 * 1024,
            max_concurrent_streams_per_identity: 16,
            session_concurrency_cap: 8,
            locator_cache_max_entries: 1000,
            locator_negative_cache_seconds: 60,
            max_session_reopen_retries: 3,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// 0 disables expiry.
    pub link_expiry_seconds: u64,
    /// 0 disables the ceiling.
    pub monthly_bandwidth_ceiling_bytes: u64,
    pub shorten_threshold_bytes: u64,
    pub cors_allowed_origins: Vec<String>,
    pub rate_limit_requests_per_minute: u32,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        PolicyConfig {
            link_expiry_seconds: 0,
            monthly_bandwidth_ceiling_bytes: 0,
            shorten_threshold_bytes: 20 * 1024 * 1024,
            cors_allowed_origins: Vec::new(),
            rate_limit_requests_per_minute: 120,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CleanupConfig {
    pub stale_stream_max_age_seconds: u64,
    pub stream_cleanup_interval_seconds: u64,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        CleanupConfig {
            stale_stream_max_age_seconds: 14400,
            stream_cleanup_interval_seconds: 600,
        }
    }
}

#[instrument]
pub async fn read_config(path: &Path) -> anyhow::Result<Config> {
    debug!("reading config file");

    let doc = tokio::fs::read_to_string(path)
        .await
        .map_err(|err| anyhow::anyhow!("failed to read config file {path:?}: {err}"))?;

    let config: Config = toml::from_str(&doc)
        .map_err(|err| anyhow::anyhow!("failed to parse config file {path:?}: {err}"))?;

    validate(&config)?;

    debug!("successfully parsed config file");
    Ok(config)
}

fn validate(config: &Config) -> anyhow::Result<()> {
    if !config.streaming.chunk_size.is_power_of_two() {
        return Err(anyhow::anyhow!("streaming.chunk_size must be a power of two"));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_toml() {
        let doc = r#"
            [http]
            socket = "127.0.0.1:8080"
            base_url = "https://dl.example"

            [identities.primary]
            id = "bot1"
            auth_token = "secret"
            home_data_center_id = 2
        "#;

        let config: Config = toml::from_str(doc).unwrap();
        assert_eq!(config.http.socket, "127.0.0.1:8080");
        assert_eq!(config.streaming.chunk_size, 1024 * 1024);
        assert_eq!(config.identities.primary.id, "bot1");
    }

    #[test]
    fn rejects_non_power_of_two_chunk_size() {
        let mut config = Config {
            http: HttpConfig {
                socket: "127.0.0.1:8080".to_string(),
                base_url: "https://dl.example".to_string(),
            },
            identities: IdentityConfig::default(),
            streaming: StreamingConfig::default(),
            policy: PolicyConfig::default(),
            cleanup: CleanupConfig::default(),
        };
        config.streaming.chunk_size = 3;
        assert!(validate(&config).is_err());
    }
}
