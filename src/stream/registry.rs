// =============================================================================
// Session Registry — active streaming sessions keyed by id
// =============================================================================
//
// The connection handler registers a session once its loop is running and
// deregisters it on disconnect. Deregistering aborts the session's polling
// task, so teardown does not depend on the handler reaching `stop()`.
// `shutdown_all` is used on process shutdown.
// =============================================================================

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::AbortHandle;
use tracing::info;
use uuid::Uuid;

struct Registration {
    connected_at: DateTime<Utc>,
    timeframe: watch::Receiver<String>,
    abort: AbortHandle,
}

/// Public view of one registered session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub id: Uuid,
    pub timeframe: String,
    pub connected_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<Uuid, Registration>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, id: Uuid, timeframe: watch::Receiver<String>, abort: AbortHandle) {
        let active = {
            let mut sessions = self.sessions.lock();
            sessions.insert(
                id,
                Registration {
                    connected_at: Utc::now(),
                    timeframe,
                    abort,
                },
            );
            sessions.len()
        };
        info!(session = %id, active, "session registered");
    }

    /// Remove `id` and abort its polling task. Returns whether it was present.
    pub fn deregister(&self, id: Uuid) -> bool {
        let removed = self.sessions.lock().remove(&id);
        match removed {
            Some(reg) => {
                reg.abort.abort();
                info!(session = %id, active = self.active_count(), "session deregistered");
                true
            }
            None => false,
        }
    }

    pub fn active_count(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Registered sessions, oldest first.
    pub fn list(&self) -> Vec<SessionInfo> {
        let mut out: Vec<SessionInfo> = self
            .sessions
            .lock()
            .iter()
            .map(|(id, reg)| SessionInfo {
                id: *id,
                timeframe: reg.timeframe.borrow().clone(),
                connected_at: reg.connected_at,
            })
            .collect();
        out.sort_by_key(|s| s.connected_at);
        out
    }

    /// Abort every session. Returns how many were running.
    pub fn shutdown_all(&self) -> usize {
        let drained: Vec<(Uuid, Registration)> = self.sessions.lock().drain().collect();
        for (_, reg) in &drained {
            reg.abort.abort();
        }
        if !drained.is_empty() {
            info!(count = drained.len(), "all stream sessions aborted");
        }
        drained.len()
    }
}
