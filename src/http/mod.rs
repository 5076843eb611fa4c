//! Local observer HTTP surface.
//!
//! Read-mostly endpoints over the supervision state plus a Server-Sent
//! Events stream of notifications. Bound to loopback only.

use std::convert::Infallible;
use std::net::SocketAddr;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::get;
use axum::{Json, Router};
use futures_util::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::context::SupervisorContext;
use crate::models::notification::Notification;
use crate::supervisor::notifications::{NotificationEvent, DEFAULT_RECENT};
use crate::{AppError, Result};

const EVENT_BUFFER: usize = 64;

#[derive(Clone)]
struct HttpState {
    ctx: SupervisorContext,
    events: broadcast::Sender<NotificationEvent>,
    shutdown: CancellationToken,
}

#[derive(Debug, Deserialize)]
struct RecentQuery {
    count: Option<usize>,
}

/// Body of `GET /api/supervisor`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SupervisorStatus {
    /// Number of tracked sessions.
    pub tracked: usize,
    /// Tracked sessions whose process is alive.
    pub alive: usize,
    /// Tracked sessions whose process is gone.
    pub dead: usize,
    /// Tracked session ids, sorted.
    pub tracked_sessions: Vec<String>,
}

async fn health() -> &'static str {
    "ok"
}

async fn recent_notifications(
    State(state): State<HttpState>,
    Query(query): Query<RecentQuery>,
) -> Json<Vec<Notification>> {
    let count = query.count.unwrap_or(DEFAULT_RECENT);
    Json(state.ctx.notifications.recent(count))
}

async fn clear_notifications(State(state): State<HttpState>) -> StatusCode {
    state.ctx.notifications.clear();
    StatusCode::NO_CONTENT
}

async fn supervisor_status(State(state): State<HttpState>) -> Json<SupervisorStatus> {
    let stats = state.ctx.tracker.stats().await;
    Json(SupervisorStatus {
        tracked: stats.tracked,
        alive: stats.alive,
        dead: stats.dead,
        tracked_sessions: state.ctx.tracker.tracked_sessions().await,
    })
}

async fn event_stream(
    State(state): State<HttpState>,
) -> Sse<impl Stream<Item = std::result::Result<Event, Infallible>>> {
    let rx = state.events.subscribe();
    // Open streams must end on shutdown or graceful shutdown never completes.
    let stream = stream::unfold((rx, state.shutdown), |(mut rx, shutdown)| async move {
        loop {
            let received = tokio::select! {
                () = shutdown.cancelled() => return None,
                received = rx.recv() => received,
            };
            match received {
                Ok(event) => return Some((Ok(to_sse(&event)), (rx, shutdown))),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "event stream subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

fn to_sse(event: &NotificationEvent) -> Event {
    match event {
        NotificationEvent::Posted(notification) => Event::default()
            .event("notification")
            .data(event_data(notification)),
        NotificationEvent::Cleared => Event::default().event("cleared").data(""),
    }
}

/// JSON payload for an SSE frame; empty, with a warning, if it cannot be encoded.
fn event_data<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|err| {
        warn!(%err, "failed to serialize event stream payload");
        String::new()
    })
}

/// Build the observer router.
fn router(state: HttpState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route(
            "/api/notifications",
            get(recent_notifications).delete(clear_notifications),
        )
        .route("/api/supervisor", get(supervisor_status))
        .route("/api/events", get(event_stream))
        .with_state(state)
}

/// Bind the loopback listener for `port`; `0` picks an ephemeral port.
///
/// # Errors
///
/// Returns `AppError::Http` if the port cannot be bound.
pub async fn bind_http(port: u16) -> Result<TcpListener> {
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    TcpListener::bind(addr)
        .await
        .map_err(|err| AppError::Http(format!("failed to bind {addr}: {err}")))
}

/// Serve the observer surface on `listener` until `ct` is cancelled.
///
/// # Errors
///
/// Returns `AppError::Http` if the server fails.
pub async fn serve_http(
    listener: TcpListener,
    ctx: SupervisorContext,
    ct: CancellationToken,
) -> Result<()> {
    let (events, _) = broadcast::channel(EVENT_BUFFER);
    let forward = events.clone();
    let subscription = ctx.notifications.events().subscribe(move |event| {
        // No receivers is fine; nobody is streaming.
        let _ = forward.send(event.clone());
    });

    let notifications = std::sync::Arc::clone(&ctx.notifications);
    let app = router(HttpState {
        ctx,
        events,
        shutdown: ct.clone(),
    });

    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "observer HTTP surface listening");
    }

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move { ct.cancelled().await })
        .await
        .map_err(|err| AppError::Http(format!("server error: {err}")));

    notifications.events().unsubscribe(subscription);
    info!("observer HTTP surface shut down");
    served
}
