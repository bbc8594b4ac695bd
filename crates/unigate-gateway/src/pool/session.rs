//! Session bookkeeping
//!
//! A session is one long-lived client-facing stream: created by
//! `initialize`, refreshed by every message it receives, and closed either
//! explicitly or by the maintenance sweep once it idles past the timeout.
//!
//! Sessions do not own backend connections. They record the backend ids they
//! have routed to, and the pool resolves those ids to live handles per call,
//! so a connection can be recycled underneath a session at any time.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use unigate_core::AuthorizationContext;

use crate::wire::ResponseEnvelope;

/// Buffered responses per attached stream before delivery applies
/// backpressure by dropping.
const STREAM_BUFFER: usize = 64;

struct StreamAttachment {
    sender: mpsc::Sender<ResponseEnvelope>,
    /// Child of the session token; cancelled when the client drops the
    /// stream, which propagates to calls dispatched while it was attached.
    guard: CancellationToken,
}

/// One client-facing session.
pub struct Session {
    pub id: Uuid,
    pub context: AuthorizationContext,
    pub created_at: DateTime<Utc>,
    last_activity: Mutex<Instant>,
    backends: Mutex<HashSet<Uuid>>,
    stream: Mutex<Option<StreamAttachment>>,
    cancel: CancellationToken,
}

impl Session {
    fn new(context: AuthorizationContext) -> Self {
        Self {
            id: Uuid::new_v4(),
            context,
            created_at: Utc::now(),
            last_activity: Mutex::new(Instant::now()),
            backends: Mutex::new(HashSet::new()),
            stream: Mutex::new(None),
            cancel: CancellationToken::new(),
        }
    }

    /// Refresh the activity timestamp. Called on every message receipt.
    pub fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_activity.lock().elapsed()
    }

    /// Record that this session routed to a backend (identity only).
    pub fn add_backend(&self, server_id: Uuid) {
        self.backends.lock().insert(server_id);
    }

    pub fn backends(&self) -> HashSet<Uuid> {
        self.backends.lock().clone()
    }

    /// Attach (or replace) the server-to-client event stream. The previous
    /// attachment, if any, is cancelled.
    pub fn attach_stream(&self) -> (mpsc::Receiver<ResponseEnvelope>, CancellationToken) {
        let (sender, receiver) = mpsc::channel(STREAM_BUFFER);
        let guard = self.cancel.child_token();
        let previous = self.stream.lock().replace(StreamAttachment {
            sender,
            guard: guard.clone(),
        });
        if let Some(previous) = previous {
            previous.guard.cancel();
        }
        (receiver, guard)
    }

    /// Deliver a response on the attached stream. Returns false when no live
    /// stream is attached; the caller falls back to direct delivery.
    pub fn deliver(&self, response: ResponseEnvelope) -> bool {
        let mut stream = self.stream.lock();
        match stream.as_ref() {
            Some(attachment) if !attachment.guard.is_cancelled() => {
                attachment.sender.try_send(response).is_ok()
            }
            Some(_) => {
                *stream = None;
                false
            }
            None => false,
        }
    }

    pub fn has_stream(&self) -> bool {
        self.stream
            .lock()
            .as_ref()
            .is_some_and(|a| !a.guard.is_cancelled())
    }

    /// Token a dispatched call should observe for cancellation: the stream
    /// guard while one is attached, the session token otherwise.
    pub fn call_token(&self) -> CancellationToken {
        self.stream
            .lock()
            .as_ref()
            .filter(|a| !a.guard.is_cancelled())
            .map(|a| a.guard.clone())
            .unwrap_or_else(|| self.cancel.clone())
    }

    fn close(&self) {
        self.cancel.cancel();
    }
}

/// Registry of live sessions, owned by the connection manager.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: DashMap<Uuid, Arc<Session>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, context: AuthorizationContext) -> Arc<Session> {
        let session = Arc::new(Session::new(context));
        info!(
            session_id = %session.id,
            organization_id = %session.context.organization_id,
            "[SessionRegistry] Session registered"
        );
        self.sessions.insert(session.id, Arc::clone(&session));
        session
    }

    pub fn get(&self, id: &Uuid) -> Option<Arc<Session>> {
        self.sessions.get(id).map(|s| Arc::clone(&s))
    }

    /// Refresh a session's activity timestamp; false if unknown.
    pub fn touch(&self, id: &Uuid) -> bool {
        match self.get(id) {
            Some(session) => {
                session.touch();
                true
            }
            None => false,
        }
    }

    /// Close and remove one session, cancelling its in-flight calls.
    pub fn close(&self, id: &Uuid) -> Option<Arc<Session>> {
        let (_, session) = self.sessions.remove(id)?;
        session.close();
        debug!(session_id = %id, "[SessionRegistry] Session closed");
        Some(session)
    }

    /// Close every session idle past the timeout; returns the closed set.
    pub fn expire_idle(&self, timeout: Duration) -> Vec<Arc<Session>> {
        let expired: Vec<Uuid> = self
            .sessions
            .iter()
            .filter(|entry| entry.value().idle_for() > timeout)
            .map(|entry| *entry.key())
            .collect();
        expired.iter().filter_map(|id| self.close(id)).collect()
    }

    /// Union of backend ids referenced by any live session.
    pub fn referenced_backends(&self) -> HashSet<Uuid> {
        let mut referenced = HashSet::new();
        for entry in self.sessions.iter() {
            referenced.extend(entry.value().backends());
        }
        referenced
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
