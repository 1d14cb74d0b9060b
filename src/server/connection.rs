//! Per-subscriber WebSocket pumps
//!
//! Every connection runs two halves:
//!
//! - the **write pump** forwards hub payloads to the peer and sends a
//!   keepalive ping every `ping_period`; each write must finish within
//!   `write_wait`. When the hub closes the subscriber's buffer it sends a
//!   close frame and stops.
//! - the **read pump** discards inbound traffic but treats every frame,
//!   pongs included, as proof of life. If nothing arrives for `pong_wait` the
//!   peer is considered dead.
//!
//! Whichever half fails first tears the connection down and the subscriber
//! is unregistered. Failures stay local to the connection.

use std::fmt;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::hub::{HubHandle, Subscription};

/// Liveness timings for a subscriber connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Heartbeat {
    /// Deadline for each outbound write
    pub write_wait: Duration,
    /// Read deadline, refreshed by any inbound frame
    pub pong_wait: Duration,
    /// Interval between keepalive pings
    pub ping_period: Duration,
}

/// Reason a connection half stopped abnormally
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionError {
    /// A write did not complete in time
    #[error("write timed out after {0:?}")]
    WriteTimeout(Duration),
    /// Nothing was received from the peer in time
    #[error("no traffic from peer for {0:?}")]
    ReadTimeout(Duration),
    /// The transport reported an error
    #[error("transport error: {0}")]
    Transport(String),
}

/// Drive a registered subscriber's socket until it closes
///
/// Unregisters the subscriber from `hub` when done.
pub async fn serve_socket(
    socket: WebSocket,
    hub: HubHandle,
    subscription: Subscription,
    heartbeat: Heartbeat,
    shutdown: CancellationToken,
) {
    let id = subscription.id();
    let (sink, stream) = socket.split();

    // Cancelled when the writer stops or the process shuts down
    let closed = shutdown.child_token();

    tracing::debug!(subscriber = %id, topics = ?subscription.topics(), "Subscriber connected");

    let writer = tokio::spawn(write_pump(sink, subscription, heartbeat, closed.clone()));

    if let Err(e) = read_pump(stream, heartbeat.pong_wait, closed).await {
        tracing::warn!(subscriber = %id, error = %e, "Subscriber read failed");
    }

    // Closing the buffer lets the writer send its close frame and exit
    if let Err(e) = hub.unregister(id).await {
        tracing::debug!(subscriber = %id, error = %e, "Unregister after hub shutdown");
    }

    match writer.await {
        Ok(Err(e)) => tracing::warn!(subscriber = %id, error = %e, "Subscriber write failed"),
        Err(e) => tracing::error!(subscriber = %id, error = %e, "Write pump panicked"),
        Ok(Ok(())) => {}
    }

    tracing::debug!(subscriber = %id, "Subscriber disconnected");
}

/// Forward payloads from the hub to the peer, with keepalive pings
///
/// Cancels `closed` on exit so the read half stops too.
pub async fn write_pump<S>(
    mut sink: S,
    mut subscription: Subscription,
    heartbeat: Heartbeat,
    closed: CancellationToken,
) -> Result<(), ConnectionError>
where
    S: Sink<Message> + Unpin,
    S::Error: fmt::Display,
{
    let _closed = closed.drop_guard();

    let mut ticker = interval_at(Instant::now() + heartbeat.ping_period, heartbeat.ping_period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            data = subscription.recv() => match data {
                Some(data) => send_within(&mut sink, text_message(data), heartbeat.write_wait).await?,
                None => {
                    // The hub closed the buffer
                    let _ = send_within(&mut sink, Message::Close(None), heartbeat.write_wait).await;
                    return Ok(());
                }
            },
            _ = ticker.tick() => {
                send_within(&mut sink, Message::Ping(Vec::new()), heartbeat.write_wait).await?;
            }
        }
    }
}

/// Consume inbound frames until the peer closes, goes quiet for
/// `pong_wait`, or `closed` fires
pub async fn read_pump<S, E>(
    mut stream: S,
    pong_wait: Duration,
    closed: CancellationToken,
) -> Result<(), ConnectionError>
where
    S: Stream<Item = Result<Message, E>> + Unpin,
    E: fmt::Display,
{
    loop {
        let next = tokio::select! {
            _ = closed.cancelled() => return Ok(()),
            next = tokio::time::timeout(pong_wait, stream.next()) => next,
        };

        match next {
            Err(_) => return Err(ConnectionError::ReadTimeout(pong_wait)),
            Ok(None) | Ok(Some(Ok(Message::Close(_)))) => return Ok(()),
            // Any frame refreshes the deadline; payloads are not interpreted
            Ok(Some(Ok(_))) => {}
            Ok(Some(Err(e))) => return Err(ConnectionError::Transport(e.to_string())),
        }
    }
}

async fn send_within<S>(sink: &mut S, message: Message, wait: Duration) -> Result<(), ConnectionError>
where
    S: Sink<Message> + Unpin,
    S::Error: fmt::Display,
{
    match tokio::time::timeout(wait, sink.send(message)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(ConnectionError::Transport(e.to_string())),
        Err(_) => Err(ConnectionError::WriteTimeout(wait)),
    }
}

fn text_message(data: Bytes) -> Message {
    match String::from_utf8(data.to_vec()) {
        Ok(text) => Message::Text(text),
        Err(e) => Message::Binary(e.into_bytes()),
    }
}
