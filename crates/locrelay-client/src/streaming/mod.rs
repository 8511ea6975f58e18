//! Reconnecting SSE event source
//!
//! Opens the relay's live stream, splits it into frames and reconnects
//! after failures, resuming from the last seen event id.
//!
//! # Example
//!
//! ```no_run
//! use futures::StreamExt;
//! use locrelay_client::streaming::{EventSource, ReconnectPolicy, SourceEvent};
//! use locrelay_core::SubscriptionFilter;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let url = url::Url::parse("http://localhost:8001/api/location/live/sse")?;
//! let source = EventSource::new(
//!     reqwest::Client::new(),
//!     url,
//!     SubscriptionFilter::users(["Adar"]).with_heartbeat(10),
//! )
//! .with_policy(ReconnectPolicy::default());
//!
//! let events = source.into_stream();
//! futures::pin_mut!(events);
//! while let Some(event) = events.next().await {
//!     match event {
//!         SourceEvent::Open => println!("connected"),
//!         SourceEvent::Frame(frame) => println!("{}: {}", frame.event_name(), frame.data),
//!         SourceEvent::Error(e) => eprintln!("stream error: {}", e),
//!     }
//! }
//! # Ok(())
//! # }
//! ```

mod reconnect;
mod source;
mod types;

pub use reconnect::{Backoff, ReconnectPolicy, ReconnectStrategy};
pub use source::EventSource;
pub use types::{SourceEvent, StreamError, StreamResult};
