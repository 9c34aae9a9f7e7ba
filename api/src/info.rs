use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BotInfo {
    pub id: String,
    pub username: String,
    pub first_name: String,
    pub mention: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Features {
    pub link_expiry_enabled: bool,
    pub link_expiry_duration_seconds: u64,
    pub video_frontend_url: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Bandwidth {
    pub limit_bytes: u64,
    pub used_bytes: u64,
    pub month: String,
    pub enabled: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Streaming {
    pub active_streams: usize,
    pub supported_formats: Vec<String>,
    pub range_requests_supported: bool,
    pub seeking_supported: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InfoResponse {
    pub status: String,
    pub bot_info: BotInfo,
    pub features: Features,
    pub bandwidth: Bandwidth,
    pub streaming: Streaming,
    pub uptime_seconds: u64,
    pub server_time_utc: String,
    pub total_users: u64,
}

/// Assembles the `/api/info` body from already-collected figures. Kept
/// free of IO so the axum handler's only job is gathering those figures
/// (registry snapshot, ledger read, process start time) and calling this.
#[allow(clippy::too_many_arguments)]
pub fn build_info(
    bot_info: BotInfo,
    link_expiry_seconds: u64,
    video_frontend_url: Option<String>,
    bandwidth_limit_bytes: u64,
    bandwidth_used_bytes: u64,
    bandwidth_month: String,
    bandwidth_enabled: bool,
    active_streams: usize,
    uptime_seconds: u64,
    server_time_utc: String,
    total_users: u64,
) -> InfoResponse {
    InfoResponse {
        status: "ok".to_string(),
        bot_info,
        features: Features {
            link_expiry_enabled: link_expiry_seconds > 0,
            link_expiry_duration_seconds: link_expiry_seconds,
            video_frontend_url,
        },
        bandwidth: Bandwidth {
            limit_bytes: bandwidth_limit_bytes,
            used_bytes: bandwidth_used_bytes,
            month: bandwidth_month,
            enabled: bandwidth_enabled,
        },
        streaming: Streaming {
            active_streams,
            supported_formats: vec!["*/*".to_string()],
            range_requests_supported: true,
            seeking_supported: true,
        },
        uptime_seconds,
        server_time_utc,
        total_users,
    }
}
