use crate::config::{
    CleanupConfig, Config, HttpConfig, IdentityConfig, IdentityCredential, PolicyConfig,
    StreamingConfig,
};

/// A `Config` with every field at a sane default, for use by tests across
/// the workspace that need a `Config` but aren't exercising config parsing
/// itself.
pub fn minimal_config() -> Config {
    Config {
        http: HttpConfig {
            socket: "127.0.0.1:0".to_string(),
            base_url: "https://dl.example.test".to_string(),
        },
        identities: IdentityConfig {
            primary: IdentityCredential {
                id: "bot1".to_string(),
                auth_token: "test-token".to_string(),
                home_data_center_id: 1,
            },
            additional_client_identities: Vec::new(),
        },
        streaming: StreamingConfig::default(),
        policy: PolicyConfig::default(),
        cleanup: CleanupConfig::default(),
    }
}
