use std::sync::Arc;

use async_stream::try_stream;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures_util::{pin_mut, Stream, StreamExt};
use tracing::{instrument, warn};

use api::reference::decode;

use super::error::CoreError;
use super::range::parse_range;
use super::svc::HttpEndpoint;
use crate::chunk::fetch_range;

const MAX_RESELECTIONS: usize = 2;

/// Shared pipeline for `/dl/{ref}` and `/stream/{ref}`; `attachment`
/// controls the one header difference between them (forcing a download
/// vs. allowing inline playback).
#[instrument(skip(state, headers))]
pub(super) async fn serve(
    state: Arc<HttpEndpoint>,
    headers: HeaderMap,
    reference: String,
    attachment: bool,
) -> Result<Response, CoreError> {
    let client_ip = client_ip(&headers);
    state.rate_limiter.check(&client_ip)?;

    let message_id = decode(&reference).map_err(|_| CoreError::InvalidReference)?;

    let mut excluded = Vec::new();
    // select() reserves the wip slot as part of choosing the identity, so a
    // reselection below (after a failed locator lookup) must drop this
    // iteration's guard before trying again, or the abandoned identity would
    // stay oversubscribed for no reason. Letting `wip_guard` fall out of
    // scope at the end of each loop iteration does exactly that.
    let (identity, wip_guard, credential, locator) = loop {
        let (identity, wip_guard) = state
            .dispatcher
            .select(&excluded)
            .ok_or(CoreError::NoClientAvailable)?;
        let credential = identity.credential();

        match state.locator_lookup(credential.clone(), message_id).await {
            Ok(locator) => break (identity, wip_guard, credential, locator),
            Err(err) if excluded.len() < MAX_RESELECTIONS => {
                warn!(identity = %credential.id, error = %err, "locator lookup failed, reselecting identity");
                excluded.push(credential.id.clone());
            }
            Err(err) => return Err(map_lookup_error(err)),
        }
    };

    crate::policy::check_expiry(&locator, state.config.policy.link_expiry_seconds)?;
    state.bandwidth_gate.check()?;

    let range = parse_range(&state.range_regex, headers.get(header::RANGE).and_then(|v| v.to_str().ok()), locator.size)
        .map_err(|_| CoreError::RangeNotSatisfiable { size: locator.size })?;

    let stream_id = make_stream_id(&reference, &identity.id, message_id);
    let stream_session = state
        .stream_registry
        .register(stream_id.clone(), &identity, message_id, wip_guard);

    let length = if locator.size == 0 { 0 } else { range.until - range.from + 1 };
    let chunks = fetch_range(
        state.registry.clone(),
        identity.clone(),
        credential,
        locator.clone(),
        range.from,
        length,
        state.config.streaming.chunk_size,
        state.config.streaming.max_session_reopen_retries,
        stream_session.clone(),
        stream_session.cancel_handle(),
    );

    let registry_handle = state.stream_registry.clone();
    let body = Body::from_stream(streamed_body(chunks, registry_handle, stream_id));

    let mut response_headers = HeaderMap::new();
    response_headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    response_headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&locator.mime).unwrap_or(HeaderValue::from_static("application/octet-stream")),
    );
    response_headers.insert(header::CONTENT_LENGTH, HeaderValue::from(length));

    if attachment {
        response_headers.insert(
            header::CONTENT_DISPOSITION,
            HeaderValue::from_str(&format!("attachment; filename=\"{}\"", sanitize_filename(&locator.filename)))
                .unwrap_or(HeaderValue::from_static("attachment")),
        );
    }

    if let Some(origin) = state.cors.allow_origin_header(header_str(&headers, header::ORIGIN)) {
        response_headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_str(&origin).unwrap());
        response_headers.insert(
            header::ACCESS_CONTROL_EXPOSE_HEADERS,
            HeaderValue::from_static("Content-Range, Accept-Ranges"),
        );
    }

    let status = if range.partial {
        response_headers.insert(
            header::CONTENT_RANGE,
            HeaderValue::from_str(&format!("bytes {}-{}/{}", range.from, range.until, locator.size)).unwrap(),
        );
        StatusCode::PARTIAL_CONTENT
    } else {
        StatusCode::OK
    };

    Ok((status, response_headers, body).into_response())
}

pub(super) async fn preflight(state: Arc<HttpEndpoint>, headers: HeaderMap) -> Response {
    match header_str(&headers, header::ORIGIN) {
        Some(origin) if state.cors.is_allowed(origin) => {
            let mut response_headers = HeaderMap::new();
            response_headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_str(origin).unwrap());
            response_headers.insert(header::ACCESS_CONTROL_ALLOW_METHODS, HeaderValue::from_static("GET, OPTIONS"));
            (StatusCode::NO_CONTENT, response_headers).into_response()
        }
        _ => StatusCode::FORBIDDEN.into_response(),
    }
}

pub(super) async fn download_handler(
    State(state): State<Arc<HttpEndpoint>>,
    headers: HeaderMap,
    Path(reference): Path<String>,
) -> Result<Response, CoreError> {
    serve(state, headers, reference, true).await
}

pub(super) async fn stream_handler(
    State(state): State<Arc<HttpEndpoint>>,
    headers: HeaderMap,
    Path(reference): Path<String>,
) -> Result<Response, CoreError> {
    serve(state, headers, reference, false).await
}

pub(super) async fn stream_preflight_handler(
    State(state): State<Arc<HttpEndpoint>>,
    headers: HeaderMap,
) -> Response {
    preflight(state, headers).await
}

fn map_lookup_error(err: anyhow::Error) -> CoreError {
    if let Some(transport_err) = err.downcast_ref::<crate::session::TransportError>() {
        if matches!(transport_err, crate::session::TransportError::NotFound) {
            return CoreError::ReferenceNotFound;
        }
    }
    CoreError::UpstreamUnavailable
}

fn client_ip(headers: &HeaderMap) -> String {
    header_str(headers, header::HeaderName::from_static("x-forwarded-for"))
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn header_str<'a>(headers: &'a HeaderMap, name: impl header::AsHeaderName) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn sanitize_filename(name: &str) -> String {
    name.replace('"', "")
}

fn make_stream_id(reference: &str, identity_id: &str, message_id: u64) -> String {
    format!("{reference}-{identity_id}-{message_id}-{}", next_disambiguator())
}

/// A process-local monotonic counter distinguishing concurrent requests for
/// the same reference; just enough to keep two simultaneous streams of the
/// same file from colliding in the registry.
fn next_disambiguator() -> u64 {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    COUNTER.fetch_add(1, Ordering::Relaxed)
}

fn streamed_body(
    chunks: impl Stream<Item = Result<Bytes, crate::chunk::ChunkFetchError>> + Send + 'static,
    registry: Arc<crate::registry::StreamRegistry>,
    stream_id: String,
) -> impl Stream<Item = Result<Bytes, std::io::Error>> {
    try_stream! {
        let _guard = DeregisterGuard { registry, stream_id };
        pin_mut!(chunks);
        while let Some(chunk) = chunks.next().await {
            match chunk {
                Ok(bytes) => yield bytes,
                Err(err) => {
                    warn!(error = %err, "chunk fetch failed mid-body, closing connection");
                    break;
                }
            }
        }
    }
}

struct DeregisterGuard {
    registry: Arc<crate::registry::StreamRegistry>,
    stream_id: String,
}

impl Drop for DeregisterGuard {
    fn drop(&mut self) {
        self.registry.deregister(&self.stream_id);
    }
}
