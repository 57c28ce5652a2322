//! # Translation Session
//!
//! One [`Session`] exists per downstream connection and is shared (through an
//! `Arc`) by the four tasks that serve it. Its `active` flag is the only piece
//! of mutable state those tasks share; queues carry everything else.
//!
//! ## Who writes the flag:
//! - the lifecycle manager, when it begins teardown
//! - the response router, when the upstream stream fails or ends
//! - a forwarder, when the downstream sink rejects a write
//!
//! Every task reads it. Waiting on [`Session::inactive`] lets a task sleep
//! until the flag flips instead of polling it.

use crate::error::SessionError;
use std::sync::{Mutex, PoisonError};
use tokio::sync::watch;
use uuid::Uuid;

pub struct Session {
    pub id: String,
    pub source_lang: String,
    pub target_lang: String,
    active: watch::Sender<bool>,
    failure: Mutex<Option<SessionError>>,
}

impl Session {
    /// New active session for a `source → target` language pair. Tags are
    /// kept verbatim, unknown ones included.
    pub fn new(source_lang: impl Into<String>, target_lang: impl Into<String>) -> Self {
        let (active, _) = watch::channel(true);
        Self {
            id: Uuid::new_v4().to_string(),
            source_lang: source_lang.into(),
            target_lang: target_lang.into(),
            active,
            failure: Mutex::new(None),
        }
    }

    pub fn is_active(&self) -> bool {
        *self.active.borrow()
    }

    pub fn deactivate(&self) {
        self.active.send_replace(false);
    }

    /// Record why the session stopped and deactivate it.
    ///
    /// Only the first failure of a still-active session is kept: once
    /// teardown has begun, later errors are consequences, not causes.
    pub fn fail(&self, error: SessionError) {
        let was_active = self.active.send_replace(false);
        if was_active {
            let mut failure = self.failure.lock().unwrap_or_else(PoisonError::into_inner);
            failure.get_or_insert(error);
        }
    }

    pub fn failure(&self) -> Option<SessionError> {
        self.failure.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Resolves once the session is inactive (immediately if it already is).
    pub async fn inactive(&self) {
        let mut rx = self.active.subscribe();
        // The sender lives in `self`, so the channel can't close while we wait.
        let _ = rx.wait_for(|active| !*active).await;
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("source_lang", &self.source_lang)
            .field("target_lang", &self.target_lang)
            .field("active", &self.is_active())
            .finish()
    }
}
