//! HTTP long-polling transport.
//!
//! A polling session owns one player in the [`GameHub`] and a queue that a
//! forwarder task fills from the broadcast channel. Clients drain the queue
//! with `GET /poll/{sid}`, which waits until at least one event is queued or
//! the poll window elapses.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use dashmap::DashMap;
use massclick_common::id::{prefix, prefixed_ulid};
use massclick_common::ServerEvent;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Notify};
use tokio::task::AbortHandle;
use tokio::time;

use crate::error::ApiError;
use crate::game::GameHub;
use crate::AppState;

use super::handler;

/// Maximum number of undelivered events kept per polling session.
const MAX_POLL_BUFFER: usize = 1000;

/// How often the sweeper looks for abandoned polling sessions.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(10);

/// One long-polling client.
pub struct PollSession {
    pub sid: String,
    pub player_id: String,
    queue: Mutex<VecDeque<Arc<ServerEvent>>>,
    notify: Notify,
    last_poll: Mutex<Instant>,
    closed: AtomicBool,
    forwarder: Mutex<Option<AbortHandle>>,
}

impl PollSession {
    fn new(sid: String, player_id: String) -> Self {
        Self {
            sid,
            player_id,
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            last_poll: Mutex::new(Instant::now()),
            closed: AtomicBool::new(false),
            forwarder: Mutex::new(None),
        }
    }

    /// Queue an event, evicting the oldest one if the buffer is full.
    fn push(&self, event: Arc<ServerEvent>) {
        {
            let mut queue = self.queue.lock();
            queue.push_back(event);
            while queue.len() > MAX_POLL_BUFFER {
                queue.pop_front();
            }
        }
        self.notify.notify_one();
    }

    fn touch(&self) {
        *self.last_poll.lock() = Instant::now();
    }

    fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(*self.last_poll.lock())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn shut(&self) {
        self.closed.store(true, Ordering::Release);
        if let Some(handle) = self.forwarder.lock().take() {
            handle.abort();
        }
        self.notify.notify_one();
    }

    /// Take every queued event, waiting up to `wait` for the first one.
    ///
    /// Returns `None` once the session has been closed.
    pub async fn drain(&self, wait: Duration) -> Option<Vec<Arc<ServerEvent>>> {
        self.touch();
        let deadline = time::Instant::now() + wait;
        let result = loop {
            if self.is_closed() {
                break None;
            }
            {
                let mut queue = self.queue.lock();
                if !queue.is_empty() {
                    break Some(queue.drain(..).collect());
                }
            }
            // A stale permit from an already drained push only causes one
            // extra pass through the loop.
            if time::timeout_at(deadline, self.notify.notified()).await.is_err() {
                break Some(Vec::new());
            }
        };
        self.touch();
        result
    }
}

/// All live polling sessions, keyed by sid.
pub struct PollRegistry {
    sessions: DashMap<String, Arc<PollSession>>,
}

impl PollRegistry {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    /// Join the game as a new player and start forwarding its broadcasts.
    pub fn open(&self, hub: &GameHub) -> Arc<PollSession> {
        let (player, rx) = hub.join();
        let session = Arc::new(PollSession::new(prefixed_ulid(prefix::POLL), player.id));

        let task = tokio::spawn(forward(session.clone(), rx));
        *session.forwarder.lock() = Some(task.abort_handle());

        self.sessions.insert(session.sid.clone(), session.clone());
        tracing::info!(
            sid = %session.sid,
            player_id = %session.player_id,
            transport = "polling",
            "connection established"
        );
        session
    }

    pub fn get(&self, sid: &str) -> Option<Arc<PollSession>> {
        self.sessions.get(sid).map(|entry| entry.value().clone())
    }

    /// Close a session and remove its player. Returns `false` for unknown sids.
    pub fn close(&self, sid: &str, hub: &GameHub) -> bool {
        let Some((_, session)) = self.sessions.remove(sid) else {
            return false;
        };
        session.shut();
        hub.leave(&session.player_id);
        tracing::info!(
            sid = %session.sid,
            player_id = %session.player_id,
            transport = "polling",
            "connection ended"
        );
        true
    }

    /// Close sessions that have not polled within `ttl`. Returns the number
    /// of sessions removed.
    pub fn sweep_expired(&self, ttl: Duration, hub: &GameHub) -> usize {
        let now = Instant::now();
        let expired: Vec<String> = self
            .sessions
            .iter()
            .filter(|entry| entry.value().idle_for(now) >= ttl)
            .map(|entry| entry.key().clone())
            .collect();

        let mut removed = 0;
        for sid in expired {
            tracing::debug!(sid = %sid, "polling session expired");
            if self.close(&sid, hub) {
                removed += 1;
            }
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

impl Default for PollRegistry {
    fn default() -> Self {
        Self::new()
    }
}

async fn forward(session: Arc<PollSession>, mut rx: broadcast::Receiver<Arc<ServerEvent>>) {
    loop {
        match rx.recv().await {
            Ok(event) => session.push(event),
            Err(broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!(sid = %session.sid, skipped = n, "polling session lagged behind broadcast");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Periodically close abandoned polling sessions.
pub fn spawn_sweeper(state: AppState) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = time::interval(SWEEP_INTERVAL);
        loop {
            ticker.tick().await;
            let removed = state.polls.sweep_expired(state.config.poll_session_ttl, &state.hub);
            if removed > 0 {
                tracing::info!(removed, "swept idle polling sessions");
            }
        }
    })
}

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
pub struct OpenResponse {
    pub sid: String,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/poll", post(open))
        .route("/poll/{sid}", get(poll).post(send).delete(close))
}

async fn open(State(state): State<AppState>) -> (StatusCode, Json<OpenResponse>) {
    let session = state.polls.open(&state.hub);
    (
        StatusCode::CREATED,
        Json(OpenResponse {
            sid: session.sid.clone(),
        }),
    )
}

async fn poll(
    State(state): State<AppState>,
    Path(sid): Path<String>,
) -> Result<Json<Vec<ServerEvent>>, ApiError> {
    let session = state.polls.get(&sid).ok_or_else(unknown_session)?;
    let events = session
        .drain(state.config.poll_wait)
        .await
        .ok_or_else(unknown_session)?;
    Ok(Json(events.iter().map(|e| (**e).clone()).collect()))
}

async fn send(
    State(state): State<AppState>,
    Path(sid): Path<String>,
    body: String,
) -> Result<StatusCode, ApiError> {
    let session = state.polls.get(&sid).ok_or_else(unknown_session)?;
    session.touch();
    let event = handler::decode(&body).map_err(|e| {
        tracing::debug!(sid = %sid, error = %e, "dropping malformed client message");
        ApiError::bad_request("Malformed client event")
    })?;
    handler::apply(&state.hub, &session.player_id, event);
    Ok(StatusCode::NO_CONTENT)
}

async fn close(
    State(state): State<AppState>,
    Path(sid): Path<String>,
) -> Result<StatusCode, ApiError> {
    if state.polls.close(&sid, &state.hub) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(unknown_session())
    }
}

fn unknown_session() -> ApiError {
    ApiError::not_found("Unknown polling session")
}
