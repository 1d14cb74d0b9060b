//! Check-in HTTP/WebSocket server
//!
//! Wires the scan source, arbiter, default routing and broadcast hub
//! together and serves them over HTTP:
//!
//! | route                      | purpose                                        |
//! |----------------------------|------------------------------------------------|
//! | `GET /api/ws?topics=a,b`   | upgrade and subscribe to the given topics      |
//! | `GET /api/scan?topic=t`    | claim the next physical scan                   |
//! | `POST /api/sheet/:id?topic=t` | bind a member sheet to an account (topic)   |
//! | `GET /api/stats`           | scan and hub counters                          |

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncRead;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::directory::MemberDirectory;
use crate::error::Result;
use crate::hub::{Hub, HubHandle};
use crate::scan::{ClaimError, ScanArbiter, ScanSource};
use crate::stats::{HubSnapshot, ScanSnapshot, ScanStats};

use super::config::ServerConfig;
use super::connection::{serve_socket, Heartbeat};
use super::routing::{ScanRouter, SheetBindings};

/// Check-in station server
pub struct CheckinServer<D: MemberDirectory> {
    config: ServerConfig,
    directory: Arc<D>,
    bindings: Arc<SheetBindings>,
    stats: Arc<ScanStats>,
    arbiter: Arc<ScanArbiter>,
    connection_semaphore: Option<Arc<Semaphore>>,
}

impl<D: MemberDirectory> CheckinServer<D> {
    /// Create a new server with the given configuration and member directory
    pub fn new(config: ServerConfig, directory: D) -> Self {
        let stats = Arc::new(ScanStats::new());
        let arbiter = Arc::new(ScanArbiter::with_stats(config.claim_timeout, Arc::clone(&stats)));

        let connection_semaphore = if config.max_connections > 0 {
            Some(Arc::new(Semaphore::new(config.max_connections)))
        } else {
            None
        };

        Self {
            config,
            directory: Arc::new(directory),
            bindings: Arc::new(SheetBindings::new()),
            stats,
            arbiter,
            connection_semaphore,
        }
    }

    /// Account → sheet bindings used by default routing
    pub fn bindings(&self) -> &Arc<SheetBindings> {
        &self.bindings
    }

    /// The scan arbiter
    pub fn arbiter(&self) -> &Arc<ScanArbiter> {
        &self.arbiter
    }

    /// Get the bind address
    pub fn bind_addr(&self) -> SocketAddr {
        self.config.bind_addr
    }

    /// Run the server until Ctrl-C
    pub async fn run<R>(&self, source: ScanSource<R>) -> Result<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        self.run_until(source, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// Run the server with graceful shutdown
    ///
    /// When `shutdown` completes, the HTTP listener stops accepting, the scan
    /// feed and dispatcher stop, and the hub closes every subscriber.
    pub async fn run_until<R, F>(&self, source: ScanSource<R>, shutdown: F) -> Result<()>
    where
        R: AsyncRead + Unpin + Send + 'static,
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        tracing::info!(addr = %self.config.bind_addr, "Check-in server listening");

        let token = CancellationToken::new();

        let (hub, hub_task) = Hub::spawn(self.config.hub.clone(), token.clone());

        let router = Arc::new(ScanRouter::new(
            hub.clone(),
            Arc::clone(&self.directory),
            Arc::clone(&self.bindings),
            Arc::clone(&self.stats),
        ));
        let feed = source.capacity(self.config.scan_buffer).spawn(token.clone());
        let dispatcher = tokio::spawn(router.run(feed, Arc::clone(&self.arbiter), token.clone()));

        let state = AppState {
            hub,
            arbiter: Arc::clone(&self.arbiter),
            bindings: Arc::clone(&self.bindings),
            stats: Arc::clone(&self.stats),
            heartbeat: self.config.heartbeat(),
            max_message_size: self.config.max_message_size,
            connection_semaphore: self.connection_semaphore.clone(),
            shutdown: token.clone(),
        };

        let signal = {
            let token = token.clone();
            async move {
                tokio::select! {
                    _ = shutdown => tracing::info!("Shutdown signal received"),
                    _ = token.cancelled() => {}
                }
                token.cancel();
            }
        };

        let result = axum::serve(listener, routes(state))
            .with_graceful_shutdown(signal)
            .await;

        // Stop everything even if the listener failed on its own
        token.cancel();

        let feed_end = dispatcher.await;
        tracing::debug!(feed = ?feed_end, "Scan dispatcher stopped");
        if let Err(e) = hub_task.await {
            tracing::error!(error = %e, "Hub task panicked");
        }

        result?;
        Ok(())
    }
}

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) hub: HubHandle,
    pub(crate) arbiter: Arc<ScanArbiter>,
    pub(crate) bindings: Arc<SheetBindings>,
    pub(crate) stats: Arc<ScanStats>,
    pub(crate) heartbeat: Heartbeat,
    pub(crate) max_message_size: usize,
    pub(crate) connection_semaphore: Option<Arc<Semaphore>>,
    pub(crate) shutdown: CancellationToken,
}

pub(crate) fn routes(state: AppState) -> Router {
    Router::new()
        .route("/api/ws", get(ws_handler))
        .route("/api/scan", get(scan_handler))
        .route("/api/sheet/:id", post(sheet_handler))
        .route("/api/stats", get(stats_handler))
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

fn error_response(status: StatusCode, message: impl ToString) -> Response {
    let body = ErrorBody {
        error: message.to_string(),
    };
    (status, Json(body)).into_response()
}

#[derive(Debug, Default, Deserialize)]
struct WsQuery {
    #[serde(default)]
    topics: String,
}

impl WsQuery {
    fn topic_list(&self) -> Vec<String> {
        self.topics
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect()
    }
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
) -> Response {
    let permit = match &state.connection_semaphore {
        Some(sem) => match Arc::clone(sem).try_acquire_owned() {
            Ok(permit) => Some(permit),
            Err(_) => {
                tracing::warn!("Subscriber rejected: limit reached");
                return error_response(StatusCode::SERVICE_UNAVAILABLE, "too many connections");
            }
        },
        None => None,
    };

    let topics = query.topic_list();

    ws.max_message_size(state.max_message_size)
        .on_failed_upgrade(|e| tracing::warn!(error = %e, "Failed to upgrade websocket"))
        .on_upgrade(move |socket| async move {
            let _permit = permit;

            match state.hub.register(topics).await {
                Ok(subscription) => {
                    serve_socket(
                        socket,
                        state.hub.clone(),
                        subscription,
                        state.heartbeat,
                        state.shutdown.clone(),
                    )
                    .await
                }
                Err(e) => tracing::warn!(error = %e, "Subscriber not registered"),
            }
        })
}

#[derive(Debug, Default, Deserialize)]
struct TopicQuery {
    #[serde(default)]
    topic: String,
}

#[derive(Debug, Serialize)]
struct ScanResponse {
    #[serde(rename = "scanID")]
    scan_id: String,
    #[serde(rename = "sheetID")]
    sheet_id: String,
}

async fn scan_handler(State(state): State<AppState>, Query(query): Query<TopicQuery>) -> Response {
    match state.arbiter.claim_next().await {
        Ok(scan) => {
            let sheet_id = state.bindings.get(&query.topic).unwrap_or_default();
            let body = ScanResponse {
                scan_id: scan.into_string(),
                sheet_id,
            };
            Json(body).into_response()
        }
        Err(e) => {
            let status = match e {
                ClaimError::AlreadyClaimed => StatusCode::CONFLICT,
                ClaimError::Timeout(_) => StatusCode::REQUEST_TIMEOUT,
            };
            error_response(status, e)
        }
    }
}

#[derive(Debug, Serialize)]
struct SheetResponse {
    #[serde(rename = "sheetID")]
    sheet_id: String,
}

async fn sheet_handler(
    State(state): State<AppState>,
    Path(sheet_id): Path<String>,
    Query(query): Query<TopicQuery>,
) -> Response {
    if query.topic.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "missing topic");
    }

    state.bindings.bind(query.topic, sheet_id.clone());
    Json(SheetResponse { sheet_id }).into_response()
}

#[derive(Debug, Serialize)]
struct StatsResponse {
    scans: ScanSnapshot,
    hub: HubSnapshot,
}

async fn stats_handler(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        scans: state.stats.snapshot(),
        hub: state.hub.stats().snapshot(),
    })
}
