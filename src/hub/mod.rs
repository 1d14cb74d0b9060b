//! Real-time broadcast hub with topic routing
//!
//! The hub keeps the set of live subscribers (one per WebSocket connection)
//! and fans messages out to them. A message with a topic reaches only
//! subscribers following that topic; a message without one reaches everyone.
//!
//! # Architecture
//!
//! ```text
//!          HubHandle (clone per producer / connection)
//!     register() │ unregister() │ send() │ broadcast()
//!                ▼              ▼        ▼
//!          ┌────────────── command queue ──────────────┐
//!          │                                           │
//!          │  Hub control loop (sole registry writer)  │
//!          │  subscribers: HashMap<SubscriberId,       │
//!          │    Subscriber { tx, topics }>             │
//!          └──────┬───────────────┬───────────────┬────┘
//!            try_send()      try_send()      try_send()
//!                 ▼               ▼               ▼
//!           [Subscription]  [Subscription]  [Subscription]
//!            write pump      write pump      write pump ──► WebSocket
//! ```
//!
//! # Backpressure
//!
//! Delivery never waits on a subscriber. Each one has a bounded outbound
//! buffer; if it is full when a message arrives the subscriber is evicted
//! (removed from the registry, buffer closed) rather than allowed to stall
//! fan-out to everyone else.

pub mod config;
pub mod error;
pub mod message;
pub mod store;
pub mod subscriber;

pub use config::HubConfig;
pub use error::HubError;
pub use message::Message;
pub use store::{Hub, HubHandle};
pub use subscriber::{SubscriberId, Subscription};
