use std::time::Duration;

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};

use crate::policy::bandwidth::BandwidthCeilingReached;
use crate::policy::expiry::ReferenceExpired;
use crate::policy::ratelimit::RateLimited;

use api::reference::InvalidReference;

/// Pre-body errors that surface as a concrete HTTP response.
/// `UpstreamAuthMigration` and `ClientCancelled` never reach here: the
/// former is handled inside the chunk fetcher, the latter is bookkeeping
/// only and produces no response at all (the connection just closes).
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("invalid reference")]
    InvalidReference,

    #[error("reference expired")]
    ReferenceExpired,

    #[error("reference not found")]
    ReferenceNotFound,

    #[error("no client identity available")]
    NoClientAvailable,

    #[error("upstream unavailable")]
    UpstreamUnavailable,

    #[error("range not satisfiable for a {size}-byte file")]
    RangeNotSatisfiable { size: u64 },

    #[error("monthly bandwidth ceiling reached")]
    BandwidthCeilingReached,

    #[error("rate limited")]
    RateLimited { retry_after: Duration },

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<InvalidReference> for CoreError {
    fn from(_: InvalidReference) -> Self {
        CoreError::InvalidReference
    }
}

impl From<ReferenceExpired> for CoreError {
    fn from(_: ReferenceExpired) -> Self {
        CoreError::ReferenceExpired
    }
}

impl From<BandwidthCeilingReached> for CoreError {
    fn from(_: BandwidthCeilingReached) -> Self {
        CoreError::BandwidthCeilingReached
    }
}

impl From<RateLimited> for CoreError {
    fn from(value: RateLimited) -> Self {
        CoreError::RateLimited {
            retry_after: value.retry_after,
        }
    }
}

impl IntoResponse for CoreError {
    fn into_response(self) -> Response {
        let no_store = [(header::CACHE_CONTROL, "no-store")];

        match self {
            CoreError::InvalidReference => {
                (StatusCode::NOT_FOUND, no_store, "invalid reference").into_response()
            }
            CoreError::ReferenceExpired => {
                (StatusCode::GONE, no_store, "this link has expired").into_response()
            }
            CoreError::ReferenceNotFound => {
                (StatusCode::NOT_FOUND, no_store, "file not found").into_response()
            }
            CoreError::NoClientAvailable | CoreError::UpstreamUnavailable => {
                (StatusCode::SERVICE_UNAVAILABLE, no_store, "upstream unavailable, try again shortly").into_response()
            }
            CoreError::RangeNotSatisfiable { size } => (
                StatusCode::RANGE_NOT_SATISFIABLE,
                [
                    (header::CACHE_CONTROL, "no-store".to_string()),
                    (header::CONTENT_RANGE, format!("bytes */{size}")),
                ],
            )
                .into_response(),
            CoreError::BandwidthCeilingReached => (
                StatusCode::SERVICE_UNAVAILABLE,
                no_store,
                "monthly bandwidth ceiling reached",
            )
                .into_response(),
            CoreError::RateLimited { retry_after } => (
                StatusCode::TOO_MANY_REQUESTS,
                [
                    (header::CACHE_CONTROL, "no-store".to_string()),
                    (header::RETRY_AFTER, retry_after.as_secs().max(1).to_string()),
                ],
                "rate limited",
            )
                .into_response(),
            CoreError::Internal(err) => {
                tracing::error!(error = %err, "internal error serving request");
                (StatusCode::INTERNAL_SERVER_ERROR, no_store, "internal error").into_response()
            }
        }
    }
}
