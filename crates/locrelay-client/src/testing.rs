//! Test utilities for locrelay-client
//!
//! Provides a throwaway HTTP server and a scripted upstream location API
//! for integration tests against the relay.

use std::collections::{HashMap, VecDeque};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Json;
use bytes::Bytes;
use locrelay_core::{LIVE_STREAM_PATH, LOCATIONS_PATH, USERS_PATH};
use parking_lot::Mutex;
use tokio::net::TcpListener;

use crate::{LiveSubscriber, ReconnectPolicy, Result};

/// A test server that automatically shuts down when dropped
pub struct TestServer {
    pub addr: SocketAddr,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl TestServer {
    /// Serve an axum Router on an ephemeral port
    ///
    /// # Example
    ///
    /// ```ignore
    /// use locrelay_client::testing::TestServer;
    /// use locrelay_api::{create_router, AppState};
    ///
    /// let server = TestServer::start(create_router(state)).await?;
    /// let mut subscriber = server.subscriber()?;
    /// ```
    pub async fn start(router: axum::Router) -> Result<Self> {
        // Bind to any available port
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();

        let handle = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .ok();
        });

        Ok(Self {
            addr,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    /// Get the base URL of the test server
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url(), path)
    }

    /// Subscriber pointed at this server's `/api`, reconnecting quickly
    pub fn subscriber(&self) -> Result<LiveSubscriber> {
        Ok(LiveSubscriber::new(&self.url("/api"))?
            .with_policy(ReconnectPolicy::fixed(Duration::from_millis(50))))
    }

    /// Shutdown the server gracefully
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            handle.abort();
            let _ = handle.await;
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        // Live streams never finish on their own
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

/// Build the text of one SSE frame
pub fn sse_frame(event: &str, id: Option<&str>, data: &str) -> String {
    let mut frame = format!("event: {}\n", event);
    if let Some(id) = id {
        frame.push_str(&format!("id: {}\n", id));
    }
    for line in data.split('\n') {
        frame.push_str(&format!("data: {}\n", line));
    }
    frame.push('\n');
    frame
}

/// Build a `point` frame for `user` at (`lat`, `lon`)
pub fn point_frame(id: &str, user: &str, lat: f64, lon: f64) -> String {
    sse_frame(
        "point",
        Some(id),
        &serde_json::json!({ "user": user, "lat": lat, "lon": lon }).to_string(),
    )
}

/// What the mock upstream does with one request
#[derive(Debug, Clone)]
pub enum UpstreamScript {
    /// Send the raw body, then end the response
    Body(String),
    /// Reject with a status and a plain-text body
    Status(u16),
    /// Send `prefix`, then `template` every `interval` until the client
    /// disconnects; `{seq}` in the template is replaced by a counter
    /// starting at 1
    Endless {
        prefix: String,
        template: String,
        interval: Duration,
    },
    /// Send `prefix`, then break the connection mid-body
    Abort { prefix: String },
}

impl UpstreamScript {
    /// Send the given frames, then end the response
    pub fn frames<I, S>(frames: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::Body(frames.into_iter().map(|f| f.as_ref().to_string()).collect())
    }
}

/// Headers and query of one request seen by the mock upstream
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordedRequest {
    pub path: String,
    pub query: Option<String>,
    pub api_token: Option<String>,
    pub authorization: Option<String>,
    pub accept: Option<String>,
    pub last_event_id: Option<String>,
}

impl RecordedRequest {
    fn capture(uri: &Uri, headers: &HeaderMap) -> Self {
        let header_value = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        Self {
            path: uri.path().to_string(),
            query: uri.query().map(str::to_string),
            api_token: header_value("x-api-token"),
            authorization: header_value("authorization"),
            accept: header_value("accept"),
            last_event_id: header_value("last-event-id"),
        }
    }
}

/// Scripted stand-in for the upstream location API.
///
/// Queued scripts answer live stream requests in order; once the queue is
/// empty every request gets the fallback script. The JSON endpoints answer
/// with a fixed reply per path, or 404 when none is set.
#[derive(Debug, Clone)]
pub struct MockUpstream {
    queue: Arc<Mutex<VecDeque<UpstreamScript>>>,
    fallback: UpstreamScript,
    json: Arc<Mutex<HashMap<String, (u16, serde_json::Value)>>>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    open_streams: Arc<AtomicUsize>,
}

impl MockUpstream {
    pub fn new(fallback: UpstreamScript) -> Self {
        Self {
            queue: Arc::new(Mutex::new(VecDeque::new())),
            fallback,
            json: Arc::new(Mutex::new(HashMap::new())),
            requests: Arc::new(Mutex::new(Vec::new())),
            open_streams: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Answer the next request with `script`
    pub fn then(self, script: UpstreamScript) -> Self {
        self.queue.lock().push_back(script);
        self
    }

    /// Answer every request to `path` with `status` and a JSON body
    pub fn with_json(self, path: &str, status: u16, body: serde_json::Value) -> Self {
        self.json.lock().insert(path.to_string(), (status, body));
        self
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }

    /// Number of endless responses still being written
    pub fn open_streams(&self) -> usize {
        self.open_streams.load(Ordering::SeqCst)
    }

    /// Router serving the provider's endpoints at their upstream paths
    pub fn router(&self) -> axum::Router {
        axum::Router::new()
            .route(LIVE_STREAM_PATH, get(mock_live))
            .route(USERS_PATH, get(mock_json))
            .route(LOCATIONS_PATH, get(mock_json))
            .with_state(self.clone())
    }

    /// Serve on an ephemeral port
    pub async fn start(&self) -> Result<TestServer> {
        TestServer::start(self.router()).await
    }
}

/// Decrements the open stream count when the response body is dropped
struct OpenStream(Arc<AtomicUsize>);

impl OpenStream {
    fn new(count: Arc<AtomicUsize>) -> Self {
        count.fetch_add(1, Ordering::SeqCst);
        Self(count)
    }
}

impl Drop for OpenStream {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

async fn mock_live(
    State(upstream): State<MockUpstream>,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    upstream
        .requests
        .lock()
        .push(RecordedRequest::capture(&uri, &headers));

    let script = upstream
        .queue
        .lock()
        .pop_front()
        .unwrap_or_else(|| upstream.fallback.clone());

    match script {
        UpstreamScript::Status(code) => {
            let status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            (status, format!("upstream says {}", code)).into_response()
        }
        UpstreamScript::Body(body) => event_stream(Body::from(body)),
        UpstreamScript::Endless {
            prefix,
            template,
            interval,
        } => {
            let guard = OpenStream::new(upstream.open_streams.clone());
            let stream = async_stream::stream! {
                let _guard = guard;
                if !prefix.is_empty() {
                    yield Ok::<_, Infallible>(Bytes::from(prefix));
                }
                let mut seq: u64 = 0;
                let mut ticker = tokio::time::interval(interval);
                loop {
                    ticker.tick().await;
                    seq += 1;
                    yield Ok(Bytes::from(template.replace("{seq}", &seq.to_string())));
                }
            };
            event_stream(Body::from_stream(stream))
        }
        UpstreamScript::Abort { prefix } => {
            let stream = async_stream::stream! {
                yield Ok::<_, std::io::Error>(Bytes::from(prefix));
                tokio::time::sleep(Duration::from_millis(50)).await;
                yield Err(std::io::Error::other("upstream went away"));
            };
            event_stream(Body::from_stream(stream))
        }
    }
}

async fn mock_json(
    State(upstream): State<MockUpstream>,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    upstream
        .requests
        .lock()
        .push(RecordedRequest::capture(&uri, &headers));

    let reply = upstream.json.lock().get(uri.path()).cloned();
    match reply {
        Some((code, body)) => {
            let status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            (status, Json(body)).into_response()
        }
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

fn event_stream(body: Body) -> Response {
    (
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        body,
    )
        .into_response()
}

/// Wait for a condition with timeout
pub async fn wait_for<F, Fut>(condition: F, timeout: Duration) -> bool
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;

    while tokio::time::Instant::now() < deadline {
        if condition().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sse_frame_format() {
        assert_eq!(
            sse_frame("point", Some("7"), "{\"a\":1}"),
            "event: point\nid: 7\ndata: {\"a\":1}\n\n"
        );
        assert_eq!(
            sse_frame("heartbeat", None, "a\nb"),
            "event: heartbeat\ndata: a\ndata: b\n\n"
        );
    }

    #[tokio::test]
    async fn test_mock_upstream_scripts_in_order() {
        let upstream = MockUpstream::new(UpstreamScript::Status(503))
            .then(UpstreamScript::frames([sse_frame("heartbeat", None, "{}")]));
        let server = upstream.start().await.unwrap();
        let url = server.url("/location/live/sse?all=true");

        let first = reqwest::get(&url).await.unwrap();
        assert_eq!(first.status(), 200);
        assert_eq!(first.text().await.unwrap(), "event: heartbeat\ndata: {}\n\n");

        let second = reqwest::get(&url).await.unwrap();
        assert_eq!(second.status(), 503);

        assert_eq!(upstream.request_count(), 2);
        assert_eq!(upstream.requests()[0].path, "/location/live/sse");
        assert_eq!(upstream.requests()[0].query.as_deref(), Some("all=true"));
    }

    #[tokio::test]
    async fn test_mock_upstream_json_replies() {
        let upstream = MockUpstream::new(UpstreamScript::Status(503)).with_json(
            "/users.php",
            200,
            serde_json::json!({"status": "success"}),
        );
        let server = upstream.start().await.unwrap();

        let users = reqwest::get(server.url("/users.php?include_counts=true"))
            .await
            .unwrap();
        assert_eq!(users.status(), 200);
        assert_eq!(
            users.json::<serde_json::Value>().await.unwrap(),
            serde_json::json!({"status": "success"})
        );

        let locations = reqwest::get(server.url("/locations.php")).await.unwrap();
        assert_eq!(locations.status(), 404);

        let requests = upstream.requests();
        assert_eq!(requests[0].path, "/users.php");
        assert_eq!(requests[0].query.as_deref(), Some("include_counts=true"));
        assert_eq!(requests[1].path, "/locations.php");
    }
}
