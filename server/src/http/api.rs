use std::sync::Arc;

use axum::extract::State;
use axum::response::Json;

use api::info::build_info;

use super::svc::HttpEndpoint;
use crate::ledger::current_month_key;

pub(super) async fn info_handler(State(state): State<Arc<HttpEndpoint>>) -> Json<api::info::InfoResponse> {
    let month = current_month_key();
    let used_bytes = state.bandwidth_gate.ledger().usage(&month);
    let ceiling = state.config.policy.monthly_bandwidth_ceiling_bytes;

    let info = build_info(
        state.bot_info.clone(),
        state.config.policy.link_expiry_seconds,
        None,
        ceiling,
        used_bytes,
        month,
        ceiling > 0,
        state.stream_registry.snapshot_count(),
        state.started_at.elapsed().as_secs(),
        chrono::Utc::now().to_rfc3339(),
        0,
    );

    Json(info)
}
