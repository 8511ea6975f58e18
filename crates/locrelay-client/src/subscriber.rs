//! Live location subscriber
//!
//! Owns at most one live stream at a time and folds its events into a
//! [`LiveState`] snapshot that callers read or watch.

use std::sync::Arc;

use futures::StreamExt;
use locrelay_core::{
    ErrorPayload, EventKind, LocationPoint, SseFrame, SubscriptionFilter, LIVE_STREAM_PATH,
};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::Result;
use crate::streaming::{
    EventSource, ReconnectPolicy, ReconnectStrategy, SourceEvent, StreamError,
};

/// Connection lifecycle of a [`LiveSubscriber`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionPhase {
    /// No filter active
    #[default]
    Idle,
    /// Stream requested, no event received yet
    Connecting,
    /// At least one event received on the current connection
    Streaming,
    /// Last connection failed; a reconnect may still follow
    Errored,
    /// Subscriber shut down; terminal
    Closed,
}

/// Snapshot of what the subscriber has received
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LiveState {
    pub phase: ConnectionPhase,
    /// True once any event has arrived on the current connection
    pub connected: bool,
    /// Received points in arrival order
    pub points: Vec<LocationPoint>,
    /// Latest failure message
    pub error: Option<String>,
    /// Id of the most recent event that carried one
    pub last_event_id: Option<String>,
}

impl LiveState {
    /// Fold one source event into the state
    pub fn apply(&mut self, event: &SourceEvent) {
        match event {
            SourceEvent::Open => self.on_open(),
            SourceEvent::Frame(frame) => self.on_frame(frame),
            SourceEvent::Error(error) => self.on_transport_error(error),
        }
    }

    /// Response headers received for a (re)connect
    pub fn on_open(&mut self) {
        if self.phase == ConnectionPhase::Errored {
            self.phase = ConnectionPhase::Connecting;
        }
    }

    pub fn on_frame(&mut self, frame: &SseFrame) {
        if self.phase == ConnectionPhase::Closed {
            return;
        }

        if let Some(id) = &frame.id {
            self.last_event_id = Some(id.clone()).filter(|id| !id.is_empty());
        }

        match EventKind::from_name(frame.event_name()) {
            EventKind::Point => self.on_point(&frame.data),
            EventKind::Heartbeat => self.mark_streaming(),
            EventKind::Error => self.on_error_event(&frame.data),
            EventKind::Other => {
                debug!(event = frame.event_name(), "Ignoring unknown live event");
            }
        }
    }

    pub fn on_point(&mut self, data: &str) {
        self.mark_streaming();
        match LocationPoint::from_json(data) {
            Ok(point) => self.points.push(point),
            Err(e) => warn!("Dropping malformed point event: {}", e),
        }
    }

    /// Failure reported by the relay as an `error` event
    ///
    /// Within one connection the first reported error wins; a later one
    /// only describes the fallout.
    pub fn on_error_event(&mut self, data: &str) {
        self.connected = false;
        if self.phase == ConnectionPhase::Errored && self.error.is_some() {
            debug!(error = %ErrorPayload::message_from(data), "Keeping first stream error");
            return;
        }
        self.phase = ConnectionPhase::Errored;
        self.error = Some(ErrorPayload::message_from(data));
    }

    /// Connection failed or ended.
    ///
    /// A message from a preceding `error` event is kept, since the relay
    /// always closes the stream right after sending one.
    pub fn on_transport_error(&mut self, error: &StreamError) {
        if matches!(self.phase, ConnectionPhase::Closed | ConnectionPhase::Idle) {
            return;
        }
        self.connected = false;
        if self.phase != ConnectionPhase::Errored {
            self.phase = ConnectionPhase::Errored;
            self.error = Some(error.to_string());
        }
    }

    fn mark_streaming(&mut self) {
        if self.phase != ConnectionPhase::Streaming {
            self.error = None;
        }
        self.phase = ConnectionPhase::Streaming;
        self.connected = true;
    }
}

/// UI-facing subscription options
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveOptions {
    #[serde(default)]
    pub users: Vec<String>,
    #[serde(default)]
    pub devices: Vec<String>,
    #[serde(default)]
    pub all: bool,
    #[serde(default)]
    pub heartbeat: Option<u32>,
    #[serde(default)]
    pub limit: Option<u32>,
    #[serde(default)]
    pub enabled: bool,
}

impl LiveOptions {
    pub fn to_filter(&self) -> SubscriptionFilter {
        SubscriptionFilter {
            all: self.all,
            users: self.users.clone(),
            devices: self.devices.clone(),
            heartbeat: self.heartbeat,
            limit: self.limit,
            since: None,
        }
    }
}

struct ActiveStream {
    filter: SubscriptionFilter,
    task: JoinHandle<()>,
}

/// Client for the relay's live location stream.
///
/// # Example
///
/// ```no_run
/// use locrelay_client::LiveSubscriber;
/// use locrelay_core::SubscriptionFilter;
///
/// # async fn example() -> locrelay_client::Result<()> {
/// let mut subscriber = LiveSubscriber::new("http://localhost:8001/api")?;
/// subscriber
///     .enable(SubscriptionFilter::users(["Adar"]).with_heartbeat(10).with_limit(100))
///     .await?;
///
/// let mut updates = subscriber.watch();
/// while updates.changed().await.is_ok() {
///     let state = updates.borrow().clone();
///     println!("{:?}: {} points", state.phase, state.points.len());
/// }
/// # Ok(())
/// # }
/// ```
pub struct LiveSubscriber {
    http: Client,
    stream_url: Url,
    strategy: Arc<dyn ReconnectStrategy>,
    state: Arc<watch::Sender<LiveState>>,
    active: Option<ActiveStream>,
    last_filter: Option<SubscriptionFilter>,
}

impl LiveSubscriber {
    /// Create a subscriber for the relay API at `base_url` (e.g. `http://host:8001/api`)
    pub fn new(base_url: &str) -> Result<Self> {
        Self::with_client(Client::builder().build()?, base_url)
    }

    /// Create a subscriber using an existing HTTP client
    pub fn with_client(http: Client, base_url: &str) -> Result<Self> {
        let mut base = Url::parse(base_url)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let stream_url = base.join(LIVE_STREAM_PATH.trim_start_matches('/'))?;

        let (state, _) = watch::channel(LiveState::default());

        Ok(Self {
            http,
            stream_url,
            strategy: Arc::new(ReconnectPolicy::default()),
            state: Arc::new(state),
            active: None,
            last_filter: None,
        })
    }

    pub fn with_policy(self, policy: ReconnectPolicy) -> Self {
        self.with_strategy(Arc::new(policy))
    }

    /// Use a custom reconnect strategy for subsequent connections
    pub fn with_strategy(mut self, strategy: Arc<dyn ReconnectStrategy>) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn stream_url(&self) -> &Url {
        &self.stream_url
    }

    /// Current snapshot
    pub fn state(&self) -> LiveState {
        self.state.borrow().clone()
    }

    /// Receiver notified on every state change
    pub fn watch(&self) -> watch::Receiver<LiveState> {
        self.state.subscribe()
    }

    /// Stream of snapshots, starting with the current one
    pub fn updates(&self) -> WatchStream<LiveState> {
        WatchStream::new(self.state.subscribe())
    }

    pub fn last_event_id(&self) -> Option<String> {
        self.state.borrow().last_event_id.clone()
    }

    /// Filter of the running stream, if any
    pub fn filter(&self) -> Option<&SubscriptionFilter> {
        self.active.as_ref().map(|active| &active.filter)
    }

    pub fn is_active(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(|active| !active.task.is_finished())
    }

    /// Take all received points, leaving the buffer empty
    pub fn drain_points(&self) -> Vec<LocationPoint> {
        let mut points = Vec::new();
        self.state
            .send_modify(|state| points = std::mem::take(&mut state.points));
        points
    }

    /// Start streaming with `filter`.
    ///
    /// The filter is validated before anything is sent. Enabling the
    /// running filter again is a no-op; a different filter replaces the
    /// running stream and clears received points.
    pub async fn enable(&mut self, filter: SubscriptionFilter) -> Result<()> {
        filter.validate()?;

        if self.state.borrow().phase == ConnectionPhase::Closed {
            debug!("Subscriber closed, ignoring enable");
            return Ok(());
        }
        if self.is_active() && self.filter() == Some(&filter) {
            return Ok(());
        }

        self.stop().await;

        let same_filter = self.last_filter.as_ref() == Some(&filter);
        let mut resume_from = None;
        self.state.send_modify(|state| {
            if same_filter {
                resume_from = state.last_event_id.clone();
            } else {
                state.points.clear();
                state.last_event_id = None;
            }
            state.phase = ConnectionPhase::Connecting;
            state.connected = false;
            state.error = None;
        });

        info!(url = %self.stream_url, ?resume_from, "Opening live stream");

        let source = EventSource::new(self.http.clone(), self.stream_url.clone(), filter.clone())
            .with_strategy(self.strategy.clone())
            .with_last_event_id(resume_from);
        let task = tokio::spawn(run(source, self.state.clone()));

        self.last_filter = Some(filter.clone());
        self.active = Some(ActiveStream { filter, task });
        Ok(())
    }

    /// Stop streaming. Received points are kept.
    pub async fn disable(&mut self) {
        self.stop().await;
        self.state.send_modify(|state| {
            if state.phase != ConnectionPhase::Closed {
                state.phase = ConnectionPhase::Idle;
            }
            state.connected = false;
            state.error = None;
        });
    }

    /// Apply UI options: enable with the derived filter, or disable
    pub async fn set_options(&mut self, options: LiveOptions) -> Result<()> {
        if options.enabled {
            self.enable(options.to_filter()).await
        } else {
            self.disable().await;
            Ok(())
        }
    }

    /// Stop streaming and mark the subscriber closed
    pub async fn close(mut self) {
        self.stop().await;
        mark_closed(&self.state);
    }

    async fn stop(&mut self) {
        if let Some(active) = self.active.take() {
            active.task.abort();
            match active.task.await {
                Err(e) if e.is_panic() => warn!("Live stream task panicked: {}", e),
                _ => debug!("Live stream stopped"),
            }
        }
    }
}

impl Drop for LiveSubscriber {
    fn drop(&mut self) {
        if let Some(active) = self.active.take() {
            active.task.abort();
        }
        mark_closed(&self.state);
    }
}

fn mark_closed(state: &watch::Sender<LiveState>) {
    state.send_modify(|state| {
        state.phase = ConnectionPhase::Closed;
        state.connected = false;
    });
}

async fn run(source: EventSource, state: Arc<watch::Sender<LiveState>>) {
    let events = source.into_stream();
    futures::pin_mut!(events);

    while let Some(event) = events.next().await {
        state.send_modify(|state| state.apply(&event));
    }

    debug!("Live stream ended");
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn frame(event: &str, id: Option<&str>, data: &str) -> SseFrame {
        SseFrame {
            event: Some(event.to_string()),
            id: id.map(str::to_string),
            data: data.to_string(),
            retry: None,
        }
    }

    fn connecting() -> LiveState {
        LiveState {
            phase: ConnectionPhase::Connecting,
            ..LiveState::default()
        }
    }

    #[test]
    fn test_points_append_and_track_id() {
        let mut state = connecting();

        state.on_frame(&frame("point", Some("1"), r#"{"user":"Adar","lat":1,"lon":2}"#));
        state.on_frame(&frame("heartbeat", None, "{}"));
        state.on_frame(&frame("point", Some("2"), r#"{"user":"Adar","lat":3,"lon":4}"#));

        assert_eq!(state.phase, ConnectionPhase::Streaming);
        assert!(state.connected);
        assert_eq!(state.points.len(), 2);
        assert_eq!(state.points[1].latitude, 3.0);
        assert_eq!(state.last_event_id.as_deref(), Some("2"));
    }

    #[test]
    fn test_heartbeat_marks_connected() {
        let mut state = connecting();
        state.on_frame(&frame("heartbeat", Some("9"), "{}"));

        assert!(state.connected);
        assert!(state.points.is_empty());
        assert_eq!(state.last_event_id.as_deref(), Some("9"));
    }

    #[test]
    fn test_malformed_point_dropped() {
        let mut state = connecting();
        state.on_frame(&frame("point", None, "{not json"));
        state.on_frame(&frame("point", None, r#"{"lat":1}"#));

        assert!(state.points.is_empty());
        assert_eq!(state.phase, ConnectionPhase::Streaming);
    }

    #[test]
    fn test_error_event_then_close_keeps_message() {
        let mut state = connecting();
        state.on_frame(&frame("error", None, r#"{"error":"API returned 401"}"#));
        state.on_transport_error(&StreamError::Closed);

        assert_eq!(state.phase, ConnectionPhase::Errored);
        assert!(!state.connected);
        assert_eq!(state.error.as_deref(), Some("API returned 401"));
    }

    #[test]
    fn test_second_error_event_keeps_first_message() {
        let mut state = connecting();
        state.on_frame(&frame("heartbeat", None, "{}"));

        state.on_frame(&frame("error", None, r#"{"error":"quota exceeded"}"#));
        state.on_frame(&frame("error", None, r#"{"error":"Upstream stream closed"}"#));

        assert_eq!(state.phase, ConnectionPhase::Errored);
        assert_eq!(state.error.as_deref(), Some("quota exceeded"));

        // A new connection reports its own errors again
        state.on_open();
        state.on_frame(&frame("error", None, r#"{"error":"API returned 401"}"#));
        assert_eq!(state.error.as_deref(), Some("API returned 401"));
    }

    #[test]
    fn test_error_without_message_uses_default() {
        let mut state = connecting();
        state.on_frame(&frame("error", None, "oops"));

        assert_eq!(state.error.as_deref(), Some("Stream error"));
    }

    #[test]
    fn test_recovery_clears_error() {
        let mut state = connecting();
        state.on_transport_error(&StreamError::Closed);
        assert_eq!(state.error.as_deref(), Some("Stream closed"));

        state.apply(&SourceEvent::Open);
        assert_eq!(state.phase, ConnectionPhase::Connecting);

        state.on_frame(&frame("heartbeat", None, "{}"));
        assert_eq!(state.phase, ConnectionPhase::Streaming);
        assert_eq!(state.error, None);
    }

    #[test]
    fn test_unknown_events_ignored() {
        let mut state = connecting();
        state.on_frame(&frame("no_change", None, "{}"));
        state.on_frame(&frame("loc", None, r#"{"lat":1,"lon":2}"#));

        assert_eq!(state, connecting());
    }

    #[test]
    fn test_closed_ignores_events() {
        let mut state = LiveState {
            phase: ConnectionPhase::Closed,
            ..LiveState::default()
        };
        state.on_frame(&frame("point", Some("1"), r#"{"lat":1,"lon":2}"#));
        state.on_transport_error(&StreamError::Closed);

        assert_eq!(state.phase, ConnectionPhase::Closed);
        assert!(state.points.is_empty());
        assert_eq!(state.last_event_id, None);
    }

    #[test]
    fn test_stream_url() {
        let with_slash = LiveSubscriber::new("http://relay.test/api/").unwrap();
        let without = LiveSubscriber::new("http://relay.test/api").unwrap();

        assert_eq!(
            with_slash.stream_url().as_str(),
            "http://relay.test/api/location/live/sse"
        );
        assert_eq!(with_slash.stream_url(), without.stream_url());
    }

    #[test]
    fn test_options_to_filter() {
        let options = LiveOptions {
            users: vec!["Adar".into()],
            heartbeat: Some(10),
            limit: Some(100),
            enabled: true,
            ..LiveOptions::default()
        };

        assert_eq!(
            options.to_filter().to_query_string(),
            "users=Adar&heartbeat=10&limit=100"
        );
    }

    #[tokio::test]
    async fn test_invalid_filter_rejected() {
        let mut subscriber = LiveSubscriber::new("http://relay.test/api").unwrap();

        let result = subscriber
            .enable(SubscriptionFilter::all().with_limit(0))
            .await;

        assert!(matches!(result, Err(crate::ClientError::InvalidFilter(_))));
        assert!(!subscriber.is_active());
        assert_eq!(subscriber.state().phase, ConnectionPhase::Idle);
    }
}
