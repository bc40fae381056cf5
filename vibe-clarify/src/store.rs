use crate::request::ClarificationRequest;
use dashmap::DashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use vibe_channels::{MessageId, UserId};

#[derive(Debug, Default)]
struct QueueState {
    entries: Vec<ClarificationRequest>,
    /// Lease id of the active driver, if one is running.
    driver: Option<u64>,
    next_lease: u64,
}

/// Shared handle to one clarifier's FIFO queue. Clones point at the same
/// queue, so a request appended through any handle is seen by the driver.
#[derive(Debug, Clone)]
pub struct ClarificationQueue {
    clarifier_id: UserId,
    state: Arc<Mutex<QueueState>>,
}

impl ClarificationQueue {
    fn new(clarifier_id: UserId) -> Self {
        Self {
            clarifier_id,
            state: Arc::new(Mutex::new(QueueState::default())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        // Critical sections never panic midway, so a poisoned state is still consistent.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn clarifier_id(&self) -> &UserId {
        &self.clarifier_id
    }

    /// Append in arrival order. Returns false (and changes nothing) when an
    /// unresolved request for the same message is already queued.
    pub fn push(&self, request: ClarificationRequest) -> bool {
        let mut state = self.lock();
        let duplicate = state
            .entries
            .iter()
            .any(|r| r.is_pending() && r.message_id == request.message_id);
        if duplicate {
            return false;
        }
        state.entries.push(request);
        true
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    /// Unresolved requests in FIFO order.
    pub fn pending(&self) -> Vec<ClarificationRequest> {
        self.lock()
            .entries
            .iter()
            .filter(|r| r.is_pending())
            .cloned()
            .collect()
    }

    /// Mark the request clarified and excise it. Returns the resolved request.
    pub fn resolve(&self, message_id: &MessageId) -> Option<ClarificationRequest> {
        let mut resolved = self.remove(message_id)?;
        resolved.is_clarified = true;
        Some(resolved)
    }

    /// Excise the request without resolving it.
    pub fn remove(&self, message_id: &MessageId) -> Option<ClarificationRequest> {
        let mut state = self.lock();
        let idx = state
            .entries
            .iter()
            .position(|r| &r.message_id == message_id)?;
        Some(state.entries.remove(idx))
    }

    pub fn is_driving(&self) -> bool {
        self.lock().driver.is_some()
    }

    /// Claim the single driver slot for this clarifier.
    pub fn try_acquire_driver(&self) -> Option<DriverLease> {
        let mut state = self.lock();
        if state.driver.is_some() {
            return None;
        }
        state.next_lease += 1;
        let id = state.next_lease;
        state.driver = Some(id);
        Some(DriverLease {
            queue: self.clone(),
            id,
            released: false,
        })
    }

    pub fn same_queue(&self, other: &ClarificationQueue) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }
}

/// Proof of being the one active driver for a clarifier. Dropping the lease
/// frees the slot, so an aborted driver never blocks the queue.
#[derive(Debug)]
pub struct DriverLease {
    queue: ClarificationQueue,
    id: u64,
    released: bool,
}

impl DriverLease {
    pub fn queue(&self) -> &ClarificationQueue {
        &self.queue
    }

    /// The unresolved set for the next round. When it is empty the driver slot
    /// is released in the same critical section, so a concurrent enqueue either
    /// lands before this check or finds the slot free and starts a new driver.
    pub fn next_pending(&mut self) -> Option<Vec<ClarificationRequest>> {
        if self.released {
            return None;
        }
        let mut state = self.queue.lock();
        state.entries.retain(ClarificationRequest::is_pending);
        if state.entries.is_empty() {
            if state.driver == Some(self.id) {
                state.driver = None;
            }
            self.released = true;
            return None;
        }
        Some(state.entries.clone())
    }
}

impl Drop for DriverLease {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let mut state = self.queue.lock();
        if state.driver == Some(self.id) {
            state.driver = None;
        }
    }
}

#[derive(Debug, Clone)]
pub struct PendingSnapshot {
    pub clarifier_id: UserId,
    pub driving: bool,
    pub pending: Vec<ClarificationRequest>,
}

impl PendingSnapshot {
    fn of(queue: &ClarificationQueue) -> Self {
        let state = queue.lock();
        Self {
            clarifier_id: queue.clarifier_id.clone(),
            driving: state.driver.is_some(),
            pending: state
                .entries
                .iter()
                .filter(|r| r.is_pending())
                .cloned()
                .collect(),
        }
    }
}

/// Clarifier id → queue. One queue object per clarifier, created lazily and
/// never removed.
#[derive(Debug, Clone, Default)]
pub struct ClarificationQueueStore {
    queues: Arc<DashMap<UserId, ClarificationQueue>>,
}

impl ClarificationQueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_queue(&self, clarifier_id: &UserId) -> ClarificationQueue {
        self.queues
            .entry(clarifier_id.clone())
            .or_insert_with(|| ClarificationQueue::new(clarifier_id.clone()))
            .value()
            .clone()
    }

    /// Pending work for one clarifier, without creating a queue.
    pub fn pending_for(&self, clarifier_id: &UserId) -> Option<PendingSnapshot> {
        let queue = self.queues.get(clarifier_id)?.value().clone();
        Some(PendingSnapshot::of(&queue))
    }

    /// Every clarifier that still has unresolved requests, ordered by id.
    pub fn snapshot(&self) -> Vec<PendingSnapshot> {
        let queues: Vec<ClarificationQueue> =
            self.queues.iter().map(|e| e.value().clone()).collect();
        let mut out: Vec<PendingSnapshot> = queues
            .iter()
            .map(PendingSnapshot::of)
            .filter(|s| !s.pending.is_empty())
            .collect();
        out.sort_by(|a, b| a.clarifier_id.cmp(&b.clarifier_id));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(message: &str) -> ClarificationRequest {
        ClarificationRequest::new(
            UserId::new("clarifier"),
            UserId::new("requester"),
            MessageId::new(message),
            format!("content of {message}"),
        )
    }

    #[test]
    fn get_queue_returns_the_same_queue_every_time() {
        let store = ClarificationQueueStore::new();
        let first = store.get_queue(&UserId::new("u"));
        let second = store.get_queue(&UserId::new("u"));
        assert!(first.same_queue(&second));
        assert!(first.is_empty());

        first.push(request("m1"));
        assert_eq!(second.len(), 1, "mutation through one handle is visible through another");
        assert!(!first.same_queue(&store.get_queue(&UserId::new("other"))));
    }

    #[test]
    fn duplicate_pending_enqueue_is_a_noop() {
        let queue = ClarificationQueueStore::new().get_queue(&UserId::new("u"));
        assert!(queue.push(request("m1")));
        assert!(!queue.push(request("m1")));
        assert_eq!(queue.len(), 1);

        queue.resolve(&MessageId::new("m1")).expect("m1 queued");
        assert!(queue.push(request("m1")), "a resolved message may be asked about again");
    }

    #[test]
    fn resolve_marks_and_excises_preserving_fifo() {
        let queue = ClarificationQueueStore::new().get_queue(&UserId::new("u"));
        for m in ["a", "b", "c"] {
            queue.push(request(m));
        }
        let resolved = queue.resolve(&MessageId::new("b")).expect("b queued");
        assert!(resolved.is_clarified);

        let order: Vec<String> = queue
            .pending()
            .into_iter()
            .map(|r| r.message_id.into_inner())
            .collect();
        assert_eq!(order, vec!["a", "c"]);
        assert!(queue.resolve(&MessageId::new("b")).is_none());
    }

    #[test]
    fn only_one_driver_and_drained_lease_frees_the_slot() {
        let queue = ClarificationQueueStore::new().get_queue(&UserId::new("u"));
        queue.push(request("m1"));

        let mut lease = queue.try_acquire_driver().expect("slot free");
        assert!(queue.try_acquire_driver().is_none());
        assert_eq!(lease.next_pending().map(|p| p.len()), Some(1));

        queue.resolve(&MessageId::new("m1"));
        assert!(lease.next_pending().is_none());
        assert!(!queue.is_driving());

        // Stale lease going away must not clobber a newer driver.
        let newer = queue.try_acquire_driver().expect("slot free again");
        drop(lease);
        assert!(queue.is_driving());
        drop(newer);
        assert!(!queue.is_driving());
    }

    #[test]
    fn snapshot_lists_only_clarifiers_with_pending_work() {
        let store = ClarificationQueueStore::new();
        store.get_queue(&UserId::new("idle"));
        let busy = store.get_queue(&UserId::new("busy"));
        busy.push(request("m1"));

        let snapshot = store.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].clarifier_id.as_str(), "busy");
        assert!(!snapshot[0].driving);
        assert!(store.pending_for(&UserId::new("nobody")).is_none());
        assert_eq!(
            store.pending_for(&UserId::new("idle")).map(|s| s.pending.len()),
            Some(0)
        );
    }
}
