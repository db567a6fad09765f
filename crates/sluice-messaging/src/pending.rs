use chrono::{DateTime, Utc};
use dashmap::DashMap;
use lru::LruCache;
use serde_json::Value;
use sluice_types::{CancelReason, MessageMethod, OperationState, RequestId};
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{Notify, OwnedSemaphorePermit, oneshot};

/// Snapshot of one outbound request as the host sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingOperation {
    pub request_id: RequestId,
    pub method: MessageMethod,
    pub state: OperationState,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// How a request ended, delivered once to whoever awaits it.
#[derive(Debug)]
pub(crate) enum Outcome {
    Succeeded(Value),
    Failed(String),
    Cancelled(CancelReason),
    TimedOut,
    ConnectionLost,
}

struct PendingSlot {
    operation: PendingOperation,
    resolver: Option<oneshot::Sender<Outcome>>,
    progress: Arc<Notify>,
    _permit: Option<OwnedSemaphorePermit>,
}

/// Ended requests, bounded to the most recent ones.
struct History {
    states: LruCache<RequestId, OperationState>,
    /// Outcomes of ended requests nobody has started awaiting yet.
    parked: LruCache<RequestId, oneshot::Receiver<Outcome>>,
}

/// Outstanding requests plus a bounded memory of the ones that already ended.
///
/// Removal from `slots` is the one terminal transition. Whoever removes the
/// slot owns the outcome; every other path sees `None`.
pub(crate) struct PendingTable {
    slots: DashMap<RequestId, PendingSlot>,
    /// Receivers of outstanding requests. Moved to `History::parked` on completion.
    waiters: DashMap<RequestId, oneshot::Receiver<Outcome>>,
    history: Mutex<History>,
}

impl PendingTable {
    pub(crate) fn new(completed_history: usize) -> Self {
        let capacity = NonZeroUsize::new(completed_history).unwrap_or(NonZeroUsize::MIN);
        Self {
            slots: DashMap::new(),
            waiters: DashMap::new(),
            history: Mutex::new(History {
                states: LruCache::new(capacity),
                parked: LruCache::new(capacity),
            }),
        }
    }

    fn history(&self) -> MutexGuard<'_, History> {
        self.history.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn insert(
        &self,
        request_id: RequestId,
        method: MessageMethod,
        permit: Option<OwnedSemaphorePermit>,
    ) -> PendingOperation {
        let (tx, rx) = oneshot::channel();
        let operation = PendingOperation {
            request_id: request_id.clone(),
            method,
            state: OperationState::Sent,
            created_at: Utc::now(),
            completed_at: None,
        };
        self.waiters.insert(request_id.clone(), rx);
        self.slots.insert(
            request_id,
            PendingSlot {
                operation: operation.clone(),
                resolver: Some(tx),
                progress: Arc::new(Notify::new()),
                _permit: permit,
            },
        );
        operation
    }

    /// Drop a request that never made it onto the wire.
    pub(crate) fn rollback(&self, request_id: &RequestId) {
        self.slots.remove(request_id);
        self.waiters.remove(request_id);
    }

    /// Move a request to a terminal state. Returns the final snapshot only to
    /// the single caller that won the transition.
    ///
    /// `outcome` is only built by the winner.
    pub(crate) fn complete(
        &self,
        request_id: &RequestId,
        state: OperationState,
        outcome: impl FnOnce() -> Outcome,
    ) -> Option<PendingOperation> {
        // Held across the removal so a losing caller always finds the winner in history.
        let mut history = self.history();
        let (_, mut slot) = self.slots.remove(request_id)?;
        slot.operation.state = state;
        slot.operation.completed_at = Some(Utc::now());
        history.states.put(request_id.clone(), state);
        if let Some((_, receiver)) = self.waiters.remove(request_id) {
            history.parked.put(request_id.clone(), receiver);
        }
        drop(history);

        if let Some(resolver) = slot.resolver.take() {
            // The awaiting side may already be gone.
            let _ = resolver.send(outcome());
        }
        Some(slot.operation)
    }

    /// Record partial progress. `None` when the request is not outstanding.
    pub(crate) fn progress(&self, request_id: &RequestId) -> Option<MessageMethod> {
        let mut slot = self.slots.get_mut(request_id)?;
        slot.operation.state = OperationState::ReceivedPartial;
        slot.progress.notify_one();
        Some(slot.operation.method)
    }

    /// Terminal state of a request that ended recently.
    pub(crate) fn completed_state(&self, request_id: &RequestId) -> Option<OperationState> {
        self.history().states.peek(request_id).copied()
    }

    pub(crate) fn take_waiter(
        &self,
        request_id: &RequestId,
    ) -> Option<(oneshot::Receiver<Outcome>, Option<Arc<Notify>>)> {
        let mut history = self.history();
        let receiver = match self.waiters.remove(request_id) {
            Some((_, receiver)) => receiver,
            None => history.parked.pop(request_id)?,
        };
        drop(history);
        let progress = self
            .slots
            .get(request_id)
            .map(|slot| slot.progress.clone());
        Some((receiver, progress))
    }

    pub(crate) fn get(&self, request_id: &RequestId) -> Option<PendingOperation> {
        self.slots.get(request_id).map(|slot| slot.operation.clone())
    }

    pub(crate) fn ids(&self) -> Vec<RequestId> {
        self.slots.iter().map(|slot| slot.key().clone()).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    #[cfg(test)]
    fn retained_outcomes(&self) -> (usize, usize) {
        (self.waiters.len(), self.history().parked.len())
    }
}
