//! Per-user Server-Sent Events hub
//!
//! Each open `/api/v1/events` stream owns a bounded channel registered here.
//! A heartbeat sweep drops connections whose receiver went away or that have
//! not accepted an event within the staleness window.

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use chrono::{DateTime, Utc};
use futures::stream::Stream;
use serde::Serialize;
use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::{mpsc, RwLock};
use tokio_stream::{wrappers::ReceiverStream, StreamExt};
use uuid::Uuid;

use crate::auth::CurrentEmployee;
use crate::config::EventStreamConfig;
use crate::AppState;
use ooak_shared::{AiTask, Notification};

/// Events pushed to connected browsers
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum StreamEvent {
    Connected { connection_id: Uuid, user_id: Uuid },
    Notification(Notification),
    TaskAssigned {
        task_id: Uuid,
        title: String,
        due_date: Option<DateTime<Utc>>,
    },
    Heartbeat { timestamp: DateTime<Utc> },
}

impl StreamEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::Notification(_) => "notification",
            Self::TaskAssigned { .. } => "task_assigned",
            Self::Heartbeat { .. } => "heartbeat",
        }
    }

    pub fn task_assigned(task: &AiTask) -> Self {
        Self::TaskAssigned {
            task_id: task.id,
            title: task.task_title.clone(),
            due_date: task.due_date,
        }
    }

    pub fn to_sse_event(&self) -> Result<Event, axum::Error> {
        Event::default().event(self.name()).json_data(self)
    }
}

#[derive(Debug)]
struct StreamConnection {
    user_id: Uuid,
    sender: mpsc::Sender<StreamEvent>,
    last_activity: Instant,
}

/// Counts reported by a heartbeat pass
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub delivered: usize,
    pub removed: usize,
    pub remaining: usize,
}

#[derive(Clone)]
pub struct EventHub {
    connections: Arc<RwLock<HashMap<Uuid, StreamConnection>>>,
    buffer_size: usize,
    stale_after: Duration,
}

impl EventHub {
    pub fn new(config: &EventStreamConfig) -> Self {
        Self {
            connections: Arc::new(RwLock::new(HashMap::new())),
            buffer_size: config.buffer_size.max(1),
            stale_after: config.stale_after,
        }
    }

    /// Opens a stream for `user_id`; the first event on it is `connected`.
    pub async fn register(&self, user_id: Uuid) -> (Uuid, mpsc::Receiver<StreamEvent>) {
        let connection_id = Uuid::new_v4();
        let (sender, receiver) = mpsc::channel(self.buffer_size);

        let _ = sender.try_send(StreamEvent::Connected {
            connection_id,
            user_id,
        });

        self.connections.write().await.insert(
            connection_id,
            StreamConnection {
                user_id,
                sender,
                last_activity: Instant::now(),
            },
        );

        tracing::debug!("Event stream {} opened for user {}", connection_id, user_id);
        (connection_id, receiver)
    }

    pub async fn unregister(&self, connection_id: &Uuid) {
        self.connections.write().await.remove(connection_id);
    }

    /// Delivers to every open stream of the user and returns how many took it.
    pub async fn publish(&self, user_id: Uuid, event: StreamEvent) -> usize {
        let mut connections = self.connections.write().await;
        let mut delivered = 0;
        let mut closed = Vec::new();

        for (id, conn) in connections.iter_mut().filter(|(_, c)| c.user_id == user_id) {
            match conn.sender.try_send(event.clone()) {
                Ok(()) => {
                    conn.last_activity = Instant::now();
                    delivered += 1;
                }
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!("Event stream {} is full, dropping {}", id, event.name());
                }
                Err(mpsc::error::TrySendError::Closed(_)) => closed.push(*id),
            }
        }

        for id in closed {
            connections.remove(&id);
        }

        delivered
    }

    /// Sends a heartbeat to every stream, then drops closed and stale ones.
    pub async fn heartbeat(&self) -> SweepReport {
        let event = StreamEvent::Heartbeat {
            timestamp: Utc::now(),
        };
        let mut delivered = 0;
        {
            let mut connections = self.connections.write().await;
            for conn in connections.values_mut() {
                if conn.sender.try_send(event.clone()).is_ok() {
                    conn.last_activity = Instant::now();
                    delivered += 1;
                }
            }
        }

        let mut report = self.sweep_at(Instant::now()).await;
        report.delivered = delivered;
        report
    }

    pub(crate) async fn sweep_at(&self, now: Instant) -> SweepReport {
        let mut connections = self.connections.write().await;
        let before = connections.len();
        let stale_after = self.stale_after;

        connections.retain(|id, conn| {
            let idle = now.saturating_duration_since(conn.last_activity);
            let keep = !conn.sender.is_closed() && idle <= stale_after;
            if !keep {
                tracing::debug!("Dropping event stream {} (idle {:?})", id, idle);
            }
            keep
        });

        SweepReport {
            delivered: 0,
            removed: before - connections.len(),
            remaining: connections.len(),
        }
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn connections_for(&self, user_id: Uuid) -> usize {
        self.connections
            .read()
            .await
            .values()
            .filter(|c| c.user_id == user_id)
            .count()
    }
}

/// Unregisters the connection when the response stream is dropped, i.e.
/// when the client disconnects.
struct ConnectionGuard {
    events: EventHub,
    connection_id: Uuid,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        let events = self.events.clone();
        let connection_id = self.connection_id;
        tokio::spawn(async move {
            events.unregister(&connection_id).await;
            tracing::debug!("Event stream {} closed", connection_id);
        });
    }
}

/// `GET /api/v1/events`
pub async fn event_stream(
    State(state): State<Arc<AppState>>,
    employee: CurrentEmployee,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let (connection_id, receiver) = state.events.register(employee.id()).await;
    tracing::info!(
        "Employee {} subscribed to events (stream {})",
        employee.id(),
        connection_id
    );

    let guard = ConnectionGuard {
        events: state.events.clone(),
        connection_id,
    };
    let stream = ReceiverStream::new(receiver).map(move |event| {
        let _open = &guard;
        event.to_sse_event()
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}
