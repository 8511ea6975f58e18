//! Event source implementation

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{Stream, StreamExt};
use locrelay_core::{SseParser, SubscriptionFilter, ERROR_EVENT};
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use reqwest::{Client, Response};
use tracing::{debug, trace, warn};
use url::Url;

use super::reconnect::{ReconnectPolicy, ReconnectStrategy};
use super::types::{SourceEvent, StreamError, StreamResult};

const LAST_EVENT_ID: &str = "last-event-id";

/// A live stream that reconnects on failure.
///
/// # Lifecycle
///
/// - Created with the stream URL and the filter to subscribe with
/// - Turned into a `Stream` of [`SourceEvent`]s via [`into_stream`](Self::into_stream)
/// - Dropping the stream closes the connection and cancels pending reconnects
///
/// Every failure is reported as [`SourceEvent::Error`] before the next
/// attempt. Reconnects send `Last-Event-ID` and replace `since` with the
/// last id seen. A rejected request with a client error status ends the
/// stream.
#[derive(Debug, Clone)]
pub struct EventSource {
    http: Client,
    url: Url,
    filter: SubscriptionFilter,
    strategy: Arc<dyn ReconnectStrategy>,
    last_event_id: Option<String>,
}

impl EventSource {
    /// Create an event source with the default reconnect policy
    pub fn new(http: Client, url: Url, filter: SubscriptionFilter) -> Self {
        Self {
            http,
            url,
            filter,
            strategy: Arc::new(ReconnectPolicy::default()),
            last_event_id: None,
        }
    }

    pub fn with_policy(self, policy: ReconnectPolicy) -> Self {
        self.with_strategy(Arc::new(policy))
    }

    pub fn with_strategy(mut self, strategy: Arc<dyn ReconnectStrategy>) -> Self {
        self.strategy = strategy;
        self
    }

    /// Resume from a previously seen event id on the first connect
    pub fn with_last_event_id(mut self, id: Option<String>) -> Self {
        self.last_event_id = id;
        self
    }

    pub fn last_event_id(&self) -> Option<&str> {
        self.last_event_id.as_deref()
    }

    /// URL of the next request
    pub fn request_url(&self) -> Url {
        let filter = match &self.last_event_id {
            Some(id) => self.filter.resumed_from(id.as_str()),
            None => self.filter.clone(),
        };

        let mut url = self.url.clone();
        url.set_query(Some(&filter.to_query_string()));
        url
    }

    async fn connect(&self) -> StreamResult<Response> {
        let url = self.request_url();
        debug!("Connecting to SSE stream: {}", url);

        let mut request = self
            .http
            .get(url)
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache");
        if let Some(id) = &self.last_event_id {
            request = request.header(LAST_EVENT_ID, id.as_str());
        }

        let response = request.send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(StreamError::Server { status, message });
        }

        Ok(response)
    }

    /// Run the source as a stream of events.
    ///
    /// The stream ends only when the reconnect strategy gives up or the
    /// server rejects the request outright.
    pub fn into_stream(self) -> impl Stream<Item = SourceEvent> + Send + 'static {
        async_stream::stream! {
            let mut source = self;
            let mut attempt: u32 = 0;
            let mut server_hint: Option<Duration> = None;

            loop {
                match source.connect().await {
                    Ok(response) => {
                        yield SourceEvent::Open;

                        let mut body = Box::pin(response.bytes_stream());
                        let mut parser = SseParser::new();

                        let error = loop {
                            match body.next().await {
                                Some(Ok(chunk)) => {
                                    for frame in parser.feed(&chunk) {
                                        // A relayed error is not progress
                                        if frame.event_name() != ERROR_EVENT {
                                            attempt = 0;
                                        }
                                        if let Some(ms) = frame.retry {
                                            server_hint = Some(Duration::from_millis(ms));
                                        }
                                        if let Some(id) = &frame.id {
                                            source.last_event_id =
                                                Some(id.clone()).filter(|id| !id.is_empty());
                                        }
                                        trace!(event = frame.event_name(), "SSE frame");
                                        yield SourceEvent::Frame(frame);
                                    }
                                    if let Err(e) = parser.check() {
                                        warn!(error = %e, "Abandoning live stream");
                                        break StreamError::Protocol(e);
                                    }
                                }
                                Some(Err(e)) => break StreamError::Connection(e),
                                None => break StreamError::Closed,
                            }
                        };

                        if parser.has_partial() {
                            debug!("Discarding partial SSE frame");
                        }
                        yield SourceEvent::Error(error);
                    }
                    Err(error) => {
                        let fatal = error.is_fatal();
                        yield SourceEvent::Error(error);
                        if fatal {
                            warn!("Live stream rejected, not reconnecting");
                            return;
                        }
                    }
                }

                attempt = attempt.saturating_add(1);
                match source.strategy.next_delay(attempt, server_hint) {
                    Some(delay) => {
                        debug!(attempt, ?delay, "Reconnecting live stream");
                        tokio::time::sleep(delay).await;
                    }
                    None => {
                        debug!(attempt, "Giving up on live stream");
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source() -> EventSource {
        EventSource::new(
            Client::new(),
            Url::parse("http://relay.test/api/location/live/sse").unwrap(),
            SubscriptionFilter::users(["Adar"]).with_heartbeat(10),
        )
    }

    #[test]
    fn test_request_url() {
        assert_eq!(
            source().request_url().as_str(),
            "http://relay.test/api/location/live/sse?users=Adar&heartbeat=10"
        );
    }

    #[test]
    fn test_resume_replaces_since() {
        let source = source().with_last_event_id(Some("42".into()));

        assert_eq!(source.last_event_id(), Some("42"));
        assert_eq!(
            source.request_url().query(),
            Some("users=Adar&since=42&heartbeat=10")
        );
    }
}
