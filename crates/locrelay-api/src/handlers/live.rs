//! Live location stream relay
//!
//! `GET /api/location/live/sse` opens the matching upstream stream with the
//! service credential attached and relays its events unchanged. Every way
//! the relay can end produces exactly one synthesized `error` event.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{RawQuery, State};
use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use futures::stream::{self, Stream, StreamExt};
use tracing::{debug, info, warn};

use locrelay_core::{ErrorPayload, SseFrame, SseParser, SubscriptionFilter, ERROR_EVENT};

use crate::error::ApiError;
use crate::state::AppState;
use crate::upstream::{RelayFailure, UpstreamClient, LAST_EVENT_ID};

/// Disables response buffering in nginx-style proxies
const X_ACCEL_BUFFERING: HeaderName = HeaderName::from_static("x-accel-buffering");

/// GET /api/location/live/sse
///
/// Example: GET /api/location/live/sse?users=Adar&heartbeat=10&limit=100
pub async fn stream_live(
    State(state): State<AppState>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    // Configuration is checked first: nothing goes upstream without it
    let upstream = match state.upstream() {
        Ok(upstream) => Arc::clone(upstream),
        Err(failure) => {
            warn!(%failure, "Live stream requested but the location API is not configured");
            return Ok(event_stream(stream::once(async move {
                error_event(&failure)
            })));
        }
    };

    let filter = SubscriptionFilter::from_query(query.as_deref().unwrap_or_default())?;
    let last_event_id = headers.get(LAST_EVENT_ID).cloned();

    if state.debug_mode() {
        info!(?filter, resume = ?last_event_id, "Opening live location relay");
    } else {
        info!(
            all = filter.all,
            users = filter.users.len(),
            devices = filter.devices.len(),
            resume = filter.since.is_some() || last_event_id.is_some(),
            "Opening live location relay"
        );
    }

    Ok(event_stream(relay(upstream, query, last_event_id)))
}

/// Relay upstream events, then one `error` event describing why it ended.
///
/// When the last relayed frame was already an upstream `error` event, that
/// event stands as the terminal one and nothing is synthesized. Nothing
/// happens until the response body is first polled, and dropping the body
/// (inbound disconnect) drops the upstream response with it.
fn relay(
    upstream: Arc<UpstreamClient>,
    query: Option<String>,
    last_event_id: Option<HeaderValue>,
) -> impl Stream<Item = Event> + Send + 'static {
    async_stream::stream! {
        let response = match upstream
            .open_live(query.as_deref(), last_event_id.as_ref())
            .await
        {
            Ok(response) => response,
            Err(failure) => {
                yield error_event(&failure);
                return;
            }
        };

        let mut body = Box::pin(response.bytes_stream());
        let mut parser = SseParser::new();
        let mut relayed: u64 = 0;
        let mut upstream_error = false;

        let failure = loop {
            match body.next().await {
                Some(Ok(chunk)) => {
                    for frame in parser.feed(&chunk) {
                        upstream_error = frame.event_name() == ERROR_EVENT;
                        relayed += 1;
                        yield relay_event(&frame);
                    }
                    if let Err(e) = parser.check() {
                        warn!(error = %e, "Upstream sent an oversized frame");
                        break RelayFailure::Transport;
                    }
                }
                Some(Err(e)) => {
                    warn!(error = %e, "Upstream stream failed");
                    break RelayFailure::from_transport(&e);
                }
                None => break RelayFailure::Closed,
            }
        };

        if parser.has_partial() {
            debug!("Discarding partial upstream frame");
        }
        info!(%failure, relayed, "Live location relay ended");

        if upstream_error {
            debug!("Upstream error event already relayed");
        } else {
            yield error_event(&failure);
        }
    }
}

/// Re-emit an upstream frame with the same name, id, retry and data
fn relay_event(frame: &SseFrame) -> Event {
    let mut event = Event::default().data(&frame.data);
    if let Some(name) = &frame.event {
        event = event.event(name);
    }
    if let Some(id) = &frame.id {
        event = event.id(id);
    }
    if let Some(retry) = frame.retry {
        event = event.retry(Duration::from_millis(retry));
    }
    event
}

/// Terminal `error` event: `{"error": "<message>"}`
fn error_event(failure: &RelayFailure) -> Event {
    Event::default()
        .event(ERROR_EVENT)
        .data(ErrorPayload::new(failure.to_string()).to_json())
}

/// Wrap events in an SSE response with proxy-friendly headers.
///
/// No keep-alive comments are added: upstream heartbeats keep the
/// connection alive.
fn event_stream<S>(events: S) -> Response
where
    S: Stream<Item = Event> + Send + 'static,
{
    let sse = Sse::new(events.map(Ok::<_, Infallible>));

    (
        [
            (header::CONNECTION, "keep-alive"),
            (X_ACCEL_BUFFERING, "no"),
        ],
        sse,
    )
        .into_response()
}
