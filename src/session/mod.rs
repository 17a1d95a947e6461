pub mod sweeper;

use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::{broadcast, mpsc};

/// Input accepted by a session's interactive shell task.
#[derive(Debug, Clone)]
pub enum TerminalInput {
    Data(Bytes),
    Resize { cols: u32, rows: u32 },
}

/// Handles into the task that pumps a session's pty+shell channel: keystrokes
/// and resizes go in through `input`, shell output fans out through `output`.
#[derive(Debug, Clone)]
pub struct TerminalAttachment {
    pub input: mpsc::Sender<TerminalInput>,
    pub output: broadcast::Sender<Bytes>,
}

/// Where a session's connection terminates.
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub username: String,
}

/// One live session: an opaque identifier paired with exclusive ownership of
/// a persistent remote-shell connection.
///
/// `last_active` is the only field mutated after registration. It is a plain
/// atomic cell touched by every operation on the connection; concurrent
/// touches on the same session are last-write-wins by design, since
/// operations on one session are deliberately not serialized.
pub struct SessionHandle<C> {
    pub session_id: String,
    pub connection: Arc<C>,
    pub endpoint: Endpoint,
    pub created_at: DateTime<Utc>,
    pub terminal: Option<TerminalAttachment>,
    last_active_ms: AtomicI64,
    closed: AtomicBool,
}

impl<C> SessionHandle<C> {
    pub fn new(
        session_id: String,
        connection: Arc<C>,
        endpoint: Endpoint,
        terminal: Option<TerminalAttachment>,
    ) -> Self {
        let now = Utc::now();
        Self {
            session_id,
            connection,
            endpoint,
            created_at: now,
            terminal,
            last_active_ms: AtomicI64::new(now.timestamp_millis()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn touch(&self) {
        self.last_active_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    pub fn last_active(&self) -> DateTime<Utc> {
        let ms = self.last_active_ms.load(Ordering::Relaxed);
        Utc.timestamp_millis_opt(ms).single().unwrap_or_default()
    }

    pub fn idle_millis(&self) -> i64 {
        Utc::now().timestamp_millis() - self.last_active_ms.load(Ordering::Relaxed)
    }

    /// Flags the connection as torn down. A handle can linger briefly in the
    /// registry after its transport died (disconnect racing a lookup); the
    /// bridge treats a closed handle as an unusable connection.
    pub fn mark_closed(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    #[cfg(test)]
    pub(crate) fn backdate(&self, millis: i64) {
        self.last_active_ms.fetch_sub(millis, Ordering::Relaxed);
    }
}

/// Concurrent map from session identifier to live handle, shared by every
/// request handler. Constructed once at server start and passed by reference;
/// the session lifecycle handlers and the idle sweeper drive `store`/`delete`,
/// everything else only ever calls `load`.
///
/// Guards are never held across an `.await`, so a `load` observes either the
/// pre- or post-mutation map, never a partial entry.
pub struct SessionRegistry<C> {
    sessions: RwLock<HashMap<String, Arc<SessionHandle<C>>>>,
    #[cfg(test)]
    loads: std::sync::atomic::AtomicUsize,
}

impl<C> Default for SessionRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> SessionRegistry<C> {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            #[cfg(test)]
            loads: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    pub fn load(&self, session_id: &str) -> Option<Arc<SessionHandle<C>>> {
        #[cfg(test)]
        self.loads.fetch_add(1, Ordering::Relaxed);
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(session_id)
            .cloned()
    }

    /// Registers a handle under its own id. Returns `false` without replacing
    /// anything when the id is already taken; silently replacing would orphan
    /// a connection the registry owns.
    pub fn store(&self, handle: Arc<SessionHandle<C>>) -> bool {
        let mut sessions = self
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if sessions.contains_key(&handle.session_id) {
            return false;
        }
        sessions.insert(handle.session_id.clone(), handle);
        true
    }

    pub fn delete(&self, session_id: &str) -> Option<Arc<SessionHandle<C>>> {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(session_id)
    }

    pub fn list(&self) -> Vec<Arc<SessionHandle<C>>> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// How many `load` calls this registry has served.
    #[cfg(test)]
    pub(crate) fn load_count(&self) -> usize {
        self.loads.load(Ordering::Relaxed)
    }
}
