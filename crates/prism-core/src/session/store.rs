//! Session store with per-session lanes
//!
//! Append and reset are serialized per session identifier. A task holds its
//! session's lane for the whole router run through a [`SessionLease`], so two
//! tasks never interleave turns on the same session.

use super::turn::{NewTurn, Session, Turn, TurnRole};
use crate::config::LaneMode;
use crate::error::{Error, Result};
use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info};
use uuid::Uuid;

/// Store of conversation state, shared by handle
///
/// There is no global instance. Create one and pass it to every
/// orchestrator that should see the same sessions.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: DashMap<String, Session>,
    lanes: DashMap<String, Arc<Mutex<()>>>,
}

impl SessionStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a snapshot of the session, creating it if absent
    pub fn get_or_create(&self, session_id: &str) -> Session {
        self.sessions
            .entry(session_id.to_string())
            .or_insert_with(|| {
                debug!(session_id = %session_id, "Creating session");
                Session::new(session_id)
            })
            .clone()
    }

    /// Get a snapshot of an existing session
    ///
    /// # Errors
    ///
    /// Returns `Error::UnknownSession` if absent.
    pub fn session(&self, session_id: &str) -> Result<Session> {
        self.sessions
            .get(session_id)
            .map(|s| s.clone())
            .ok_or_else(|| Error::UnknownSession(session_id.to_string()))
    }

    /// Append a turn
    ///
    /// Role sequencing is only checked through a [`SessionLease`].
    ///
    /// # Errors
    ///
    /// Returns `Error::UnknownSession` if the session is absent.
    pub fn append(&self, session_id: &str, turn: NewTurn) -> Result<Turn> {
        let mut session = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| Error::UnknownSession(session_id.to_string()))?;
        Ok(session.push(turn))
    }

    fn append_at_epoch(&self, session_id: &str, epoch: u64, turn: NewTurn) -> Result<Turn> {
        let mut session = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| Error::UnknownSession(session_id.to_string()))?;
        if session.epoch != epoch {
            return Err(Error::UnknownSession(session_id.to_string()));
        }
        Ok(session.push(turn))
    }

    /// Clear all turns, keeping the identifier valid
    ///
    /// Resetting an already empty session succeeds.
    ///
    /// # Errors
    ///
    /// Returns `Error::UnknownSession` if the identifier was never created.
    pub fn reset(&self, session_id: &str) -> Result<()> {
        let mut session = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| Error::UnknownSession(session_id.to_string()))?;
        let cleared = session.turns.len();
        session.clear();
        info!(session_id = %session_id, cleared, epoch = session.epoch, "Session reset");
        Ok(())
    }

    /// Ordered copy of the session's turns
    ///
    /// # Errors
    ///
    /// Returns `Error::UnknownSession` if absent.
    pub fn snapshot(&self, session_id: &str) -> Result<Vec<Turn>> {
        self.sessions
            .get(session_id)
            .map(|s| s.turns.clone())
            .ok_or_else(|| Error::UnknownSession(session_id.to_string()))
    }

    /// Check if a session exists
    #[must_use]
    pub fn contains(&self, session_id: &str) -> bool {
        self.sessions.contains_key(session_id)
    }

    /// Get the number of sessions
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Check if the store is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Remove sessions idle for longer than `ttl`
    ///
    /// Sessions with a task holding their lane are skipped.
    pub fn evict_idle(&self, ttl: Duration) -> usize {
        let now = Utc::now();
        let idle: Vec<String> = self
            .sessions
            .iter()
            .filter(|entry| {
                (now - entry.last_activity)
                    .to_std()
                    .map(|elapsed| elapsed > ttl)
                    .unwrap_or(false)
            })
            .map(|entry| entry.key().clone())
            .collect();

        let mut evicted = 0;
        for session_id in idle {
            let lane = self.lane(&session_id);
            let Ok(_guard) = lane.try_lock() else {
                debug!(session_id = %session_id, "Skipping eviction of busy session");
                continue;
            };
            self.sessions.remove(&session_id);
            self.lanes.remove(&session_id);
            evicted += 1;
        }

        if evicted > 0 {
            info!(evicted, "Evicted idle sessions");
        }
        evicted
    }

    fn lane(&self, session_id: &str) -> Arc<Mutex<()>> {
        self.lanes
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Acquire the session's lane for one task
    ///
    /// Creates the session if absent. In `Queue` mode this waits for the
    /// running task; in `Reject` mode it fails immediately.
    ///
    /// # Errors
    ///
    /// Returns `Error::SessionBusy` in `Reject` mode when the lane is held.
    pub async fn begin_task(self: &Arc<Self>, session_id: &str, mode: LaneMode) -> Result<SessionLease> {
        let guard = loop {
            self.get_or_create(session_id);
            let lane = self.lane(session_id);

            let guard = match mode {
                LaneMode::Queue => Arc::clone(&lane).lock_owned().await,
                LaneMode::Reject => Arc::clone(&lane)
                    .try_lock_owned()
                    .map_err(|_| Error::SessionBusy(session_id.to_string()))?,
            };

            // Eviction may have replaced the lane while we waited.
            if Arc::ptr_eq(&lane, &self.lane(session_id)) {
                break guard;
            }
        };

        let session = self.get_or_create(session_id);
        let task_id = Uuid::new_v4();
        debug!(session_id = %session_id, task_id = %task_id, epoch = session.epoch, "Lane acquired");

        Ok(SessionLease {
            store: Arc::clone(self),
            session_id: session_id.to_string(),
            task_id,
            epoch: session.epoch,
            authorized: None,
            _guard: guard,
        })
    }
}

/// Exclusive right to append turns for one task
///
/// Dropping the lease releases the session lane.
#[derive(Debug)]
pub struct SessionLease {
    store: Arc<SessionStore>,
    session_id: String,
    task_id: Uuid,
    epoch: u64,
    authorized: Option<String>,
    _guard: OwnedMutexGuard<()>,
}

impl SessionLease {
    /// Session identifier
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Task identifier assigned when the lane was acquired
    #[must_use]
    pub fn task_id(&self) -> Uuid {
        self.task_id
    }

    /// Epoch of the session when the lane was acquired
    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Record the routing decision naming `specialist_id`
    ///
    /// The next specialist-result turn must come from this specialist.
    pub fn authorize(&mut self, specialist_id: &str) {
        self.authorized = Some(specialist_id.to_string());
    }

    /// Append a turn for this task
    ///
    /// # Errors
    ///
    /// - `UnknownSession` if the session was reset or evicted since the
    ///   lease was taken
    /// - `Internal` if the turn belongs to another task, or a specialist
    ///   result arrives without a matching [`authorize`](Self::authorize)
    pub fn append(&mut self, turn: NewTurn) -> Result<Turn> {
        if turn.task_id != self.task_id {
            return Err(Error::Internal(format!(
                "turn for task {} appended under task {}",
                turn.task_id, self.task_id
            )));
        }

        if turn.role == TurnRole::SpecialistResult {
            let authorized = self.authorized.take();
            if authorized.is_none() || authorized != turn.specialist_id {
                return Err(Error::Internal(format!(
                    "specialist result from {:?} without a routing decision naming it",
                    turn.specialist_id
                )));
            }
        }

        self.store
            .append_at_epoch(&self.session_id, self.epoch, turn)
    }

    /// Update the in-flight step counter
    ///
    /// # Errors
    ///
    /// Returns `Error::UnknownSession` if the session is gone or was reset.
    pub fn set_step(&self, step: usize) -> Result<()> {
        let mut session = self
            .store
            .sessions
            .get_mut(&self.session_id)
            .ok_or_else(|| Error::UnknownSession(self.session_id.clone()))?;
        if session.epoch != self.epoch {
            return Err(Error::UnknownSession(self.session_id.clone()));
        }
        session.step_counter = step;
        Ok(())
    }

    /// Ordered copy of the session's turns
    ///
    /// # Errors
    ///
    /// Returns `Error::UnknownSession` if the session is gone.
    pub fn snapshot(&self) -> Result<Vec<Turn>> {
        self.store.snapshot(&self.session_id)
    }
}
