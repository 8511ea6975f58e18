//! Live location subscriber
//!
//! Connects to the relay's `/api/location/live/sse` stream and keeps a
//! [`LiveState`] snapshot of received points, connection status and the
//! last error.
//!
//! # Example
//!
//! ```rust,no_run
//! use locrelay_client::{LiveOptions, LiveSubscriber};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut subscriber = LiveSubscriber::new("http://localhost:8001/api")?;
//!
//!     subscriber
//!         .set_options(LiveOptions {
//!             users: vec!["Adar".into()],
//!             heartbeat: Some(10),
//!             limit: Some(100),
//!             enabled: true,
//!             ..LiveOptions::default()
//!         })
//!         .await?;
//!
//!     let mut updates = subscriber.watch();
//!     updates.changed().await?;
//!     println!("{:?}", subscriber.state());
//!
//!     subscriber.close().await;
//!     Ok(())
//! }
//! ```
//!
//! # Testing
//!
//! The `testing` module provides a scripted upstream and a throwaway
//! server for integration tests:
//!
//! ```rust,ignore
//! use locrelay_client::testing::{MockUpstream, TestServer, UpstreamScript};
//!
//! let upstream = MockUpstream::new(UpstreamScript::frames([frame]));
//! let upstream_server = upstream.start().await?;
//! ```

mod error;
pub mod streaming;
mod subscriber;
pub mod testing;

pub use error::{ClientError, Result};
pub use subscriber::{ConnectionPhase, LiveOptions, LiveState, LiveSubscriber};

// Re-export streaming types for convenience
pub use streaming::{Backoff, EventSource, ReconnectPolicy, SourceEvent, StreamError};

// Re-export core types for convenience
pub use locrelay_core::{LocationPoint, SubscriptionFilter};
