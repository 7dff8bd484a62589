//! # Taskloom Channels
//!
//! Delivery channel implementations behind the `LiveChannel` and
//! `PushChannel` seams: an in-process topic hub for connected clients and
//! an HTTP push sender for offline ones.

pub mod live;
pub mod webpush;

pub use live::{LiveEvent, LiveHub};
pub use webpush::HttpPushChannel;
