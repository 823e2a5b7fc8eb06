// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Project-scoped broadcast fan-out.
//!
//! The broadcaster owns the session table and the project → subscriber
//! index, so projects never hold session references. It is the single
//! linearization point per project: event order on the wire is the order
//! calls enter [`Broadcaster::send_to_project`].
//!
//! Fan-out never blocks: each delivery is a non-blocking enqueue into the
//! session's bounded queue. A session whose queue stays full past the
//! slow-client deadline is evicted and its connection closed server-side;
//! every other subscriber keeps receiving events.

use pa_core::{ClientId, ProjectId};
use pa_wire::Outbound;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Bounded outbound queue capacity per session.
pub(crate) const OUTBOUND_QUEUE_CAPACITY: usize = 100;

/// Handle to a connected session, shared between the broadcaster and the
/// session's pumps.
pub(crate) struct SessionHandle {
    pub id: ClientId,
    /// Cancelling tears down both pumps; the write pump sends the close
    /// frame first, using `close_reason`.
    pub cancel: CancellationToken,
    tx: mpsc::Sender<Outbound>,
    slow_since: Mutex<Option<Instant>>,
    close_reason: Mutex<Option<&'static str>>,
}

impl SessionHandle {
    pub fn new(id: ClientId, tx: mpsc::Sender<Outbound>, cancel: CancellationToken) -> Arc<Self> {
        Arc::new(Self {
            id,
            cancel,
            tx,
            slow_since: Mutex::new(None),
            close_reason: Mutex::new(None),
        })
    }

    /// Enqueue without blocking. Returns false once the session has been
    /// unable to drain for longer than `slow_deadline` (or is gone).
    fn try_enqueue(&self, msg: Outbound, slow_deadline: Duration) -> bool {
        match self.tx.try_send(msg) {
            Ok(()) => {
                *self.slow_since.lock() = None;
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                let mut slow = self.slow_since.lock();
                match *slow {
                    None => {
                        *slow = Some(Instant::now());
                        debug!(session = %self.id, "subscriber queue full, marking slow");
                        true
                    }
                    Some(since) if since.elapsed() < slow_deadline => true,
                    Some(_) => false,
                }
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Direct delivery for replies to this session's own requests.
    ///
    /// A reply that cannot be enqueued is dropped; broadcast-path
    /// eviction handles persistent slowness.
    pub fn deliver(&self, msg: Outbound) {
        if self.tx.try_send(msg).is_err() {
            warn!(session = %self.id, "outbound queue full, dropping reply");
        }
    }

    /// Request a server-side close with the given reason.
    pub fn close(&self, reason: &'static str) {
        *self.close_reason.lock() = Some(reason);
        self.cancel.cancel();
    }

    pub fn close_reason(&self) -> Option<&'static str> {
        *self.close_reason.lock()
    }
}

/// Session table plus project subscription index.
pub(crate) struct Broadcaster {
    slow_deadline: Duration,
    sessions: RwLock<HashMap<ClientId, Arc<SessionHandle>>>,
    subscribers: RwLock<HashMap<ProjectId, HashSet<ClientId>>>,
}

impl Broadcaster {
    pub fn new(slow_deadline: Duration) -> Self {
        Self {
            slow_deadline,
            sessions: RwLock::new(HashMap::new()),
            subscribers: RwLock::new(HashMap::new()),
        }
    }

    pub fn register(&self, handle: Arc<SessionHandle>) {
        self.sessions.write().insert(handle.id.clone(), handle);
    }

    /// Remove a session entirely. Returns the projects it subscribed to
    /// so the caller can emit `client_left` notifications.
    pub fn unregister(&self, id: &ClientId) -> Vec<ProjectId> {
        self.sessions.write().remove(id);

        let mut joined = Vec::new();
        let mut subscribers = self.subscribers.write();
        subscribers.retain(|project_id, set| {
            if set.remove(id) {
                joined.push(project_id.clone());
            }
            !set.is_empty()
        });
        joined
    }

    /// Subscribe a session to a project. Idempotent; returns whether the
    /// session was newly added.
    pub fn join(&self, project_id: &ProjectId, client: &ClientId) -> bool {
        self.subscribers
            .write()
            .entry(project_id.clone())
            .or_default()
            .insert(client.clone())
    }

    pub fn leave(&self, project_id: &ProjectId, client: &ClientId) -> bool {
        let mut subscribers = self.subscribers.write();
        match subscribers.get_mut(project_id) {
            Some(set) => {
                let removed = set.remove(client);
                if set.is_empty() {
                    subscribers.remove(project_id);
                }
                removed
            }
            None => false,
        }
    }

    pub fn is_subscribed(&self, project_id: &ProjectId, client: &ClientId) -> bool {
        self.subscribers
            .read()
            .get(project_id)
            .is_some_and(|set| set.contains(client))
    }

    /// Drop a project's subscriber set (project deletion).
    pub fn remove_project(&self, project_id: &ProjectId) {
        self.subscribers.write().remove(project_id);
    }

    pub fn session(&self, id: &ClientId) -> Option<Arc<SessionHandle>> {
        self.sessions.read().get(id).cloned()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }

    /// Fan an event out to every subscriber of a project.
    pub fn send_to_project(&self, project_id: &ProjectId, msg: &Outbound) {
        self.send_to_project_except(project_id, None, msg);
    }

    /// Fan-out skipping one session (e.g. the one that caused the event).
    pub fn send_to_project_except(
        &self,
        project_id: &ProjectId,
        except: Option<&ClientId>,
        msg: &Outbound,
    ) {
        let handles = self.subscriber_handles(project_id, except);

        for handle in handles {
            if !handle.try_enqueue(msg.clone(), self.slow_deadline) {
                warn!(session = %handle.id, project = %project_id, "evicting slow subscriber");
                handle.close("slow consumer");
                self.unregister(&handle.id);
            }
        }
    }

    /// Deliver an execution event to subscribers and, when the requester
    /// is not subscribed, directly to the requester as well.
    pub fn send_execution_event(
        &self,
        project_id: &ProjectId,
        requester: &ClientId,
        msg: &Outbound,
    ) {
        self.send_to_project(project_id, msg);
        if !self.is_subscribed(project_id, requester) {
            if let Some(handle) = self.session(requester) {
                handle.deliver(msg.clone());
            }
        }
    }

    /// Ask every session to close (server shutdown).
    pub fn close_all(&self, reason: &'static str) {
        let handles: Vec<Arc<SessionHandle>> =
            self.sessions.read().values().cloned().collect();
        for handle in handles {
            handle.close(reason);
        }
    }

    /// Snapshot subscriber handles outside the fan-out loop so a slow
    /// delivery never holds the subscription locks.
    fn subscriber_handles(
        &self,
        project_id: &ProjectId,
        except: Option<&ClientId>,
    ) -> Vec<Arc<SessionHandle>> {
        let ids: Vec<ClientId> = match self.subscribers.read().get(project_id) {
            Some(set) => set
                .iter()
                .filter(|id| except != Some(*id))
                .cloned()
                .collect(),
            None => return Vec::new(),
        };

        let sessions = self.sessions.read();
        ids.into_iter().filter_map(|id| sessions.get(&id).cloned()).collect()
    }
}

#[cfg(test)]
#[path = "broadcast_tests.rs"]
mod tests;
