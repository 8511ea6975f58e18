//! Data models shared by the relay and the subscriber

mod event;
mod filter;
mod point;
mod tracking;

pub use event::*;
pub use filter::*;
pub use point::*;
pub use tracking::*;
