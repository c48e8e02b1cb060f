// Single-flight refresh coordination
//
// At most one refresh is in flight per coordinator. Requests that hit an auth
// failure while it runs are parked on a oneshot receiver and all receive the
// same outcome when the leader resolves.

use std::sync::{Mutex, MutexGuard};
use tokio::sync::oneshot;

use super::types::RefreshOutcome;

#[derive(Default)]
struct RefreshState {
    in_progress: bool,
    waiters: Vec<oneshot::Sender<RefreshOutcome>>,
    /// Number of refreshes resolved so far
    generation: u64,
    last_outcome: Option<RefreshOutcome>,
}

/// Owns the "refresh in progress" flag and the queue of pending requests
#[derive(Default)]
pub struct RefreshCoordinator {
    state: Mutex<RefreshState>,
}

/// What a request that needs a fresh token should do next
pub enum Ticket<'a> {
    /// Perform the refresh and resolve the lease
    Lead(RefreshLease<'a>),
    /// Wait for the in-flight refresh
    Wait(oneshot::Receiver<RefreshOutcome>),
    /// A refresh finished after the caller's snapshot; use its outcome
    Settled(RefreshOutcome),
}

impl RefreshCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    // The lock is never held across an await and nothing inside it panics
    fn lock(&self) -> MutexGuard<'_, RefreshState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Generation to snapshot before sending a request
    pub fn generation(&self) -> u64 {
        self.lock().generation
    }

    pub fn is_refreshing(&self) -> bool {
        self.lock().in_progress
    }

    /// Requests currently queued behind the in-flight refresh
    pub fn pending(&self) -> usize {
        self.lock().waiters.len()
    }

    /// Join or start a refresh.
    ///
    /// `observed` is the generation the caller saw when it sent the request
    /// that failed. If a refresh has resolved since then, its outcome is
    /// returned directly instead of starting another one.
    pub fn begin(&self, observed: u64) -> Ticket<'_> {
        let mut state = self.lock();

        if state.generation > observed {
            if let Some(outcome) = state.last_outcome.clone() {
                return Ticket::Settled(outcome);
            }
        }

        if state.in_progress {
            let (tx, rx) = oneshot::channel();
            state.waiters.push(tx);
            tracing::debug!(queued = state.waiters.len(), "Refresh in flight, request queued");
            return Ticket::Wait(rx);
        }

        state.in_progress = true;
        Ticket::Lead(RefreshLease {
            coordinator: self,
            resolved: false,
        })
    }
}

/// Held by the single caller performing a refresh
pub struct RefreshLease<'a> {
    coordinator: &'a RefreshCoordinator,
    resolved: bool,
}

impl RefreshLease<'_> {
    /// Record the outcome and release every queued request. Returns how many
    /// waiters were released.
    pub fn resolve(mut self, outcome: RefreshOutcome) -> usize {
        self.resolved = true;

        let waiters = {
            let mut state = self.coordinator.lock();
            state.generation += 1;
            state.last_outcome = Some(outcome.clone());
            state.in_progress = false;
            std::mem::take(&mut state.waiters)
        };

        let released = waiters.len();
        for waiter in waiters {
            // Receiver gone means the caller stopped waiting
            let _ = waiter.send(outcome.clone());
        }
        released
    }
}

impl Drop for RefreshLease<'_> {
    fn drop(&mut self) {
        if self.resolved {
            return;
        }

        // Leader was cancelled mid-refresh. Dropping the senders wakes the
        // waiters with a RecvError and they re-enter `begin`.
        let mut state = self.coordinator.lock();
        state.in_progress = false;
        let abandoned = std::mem::take(&mut state.waiters);
        drop(state);

        tracing::warn!(
            waiters = abandoned.len(),
            "Refresh abandoned before completion"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_pending, assert_ready, task};

    fn lead(ticket: Ticket<'_>) -> RefreshLease<'_> {
        match ticket {
            Ticket::Lead(lease) => lease,
            _ => panic!("expected to lead the refresh"),
        }
    }

    fn wait(ticket: Ticket<'_>) -> oneshot::Receiver<RefreshOutcome> {
        match ticket {
            Ticket::Wait(rx) => rx,
            _ => panic!("expected to wait for the refresh"),
        }
    }

    #[test]
    fn test_first_caller_leads() {
        let coordinator = RefreshCoordinator::new();
        assert!(!coordinator.is_refreshing());

        let lease = lead(coordinator.begin(0));
        assert!(coordinator.is_refreshing());

        assert_eq!(lease.resolve(RefreshOutcome::Refreshed("t".into())), 0);
        assert!(!coordinator.is_refreshing());
        assert_eq!(coordinator.generation(), 1);
    }

    #[test]
    fn test_waiters_pend_until_resolved() {
        let coordinator = RefreshCoordinator::new();
        let lease = lead(coordinator.begin(0));

        let mut first = task::spawn(wait(coordinator.begin(0)));
        let mut second = task::spawn(wait(coordinator.begin(0)));
        assert_eq!(coordinator.pending(), 2);

        assert_pending!(first.poll());
        assert_pending!(second.poll());

        assert_eq!(lease.resolve(RefreshOutcome::Refreshed("new".into())), 2);
        assert!(first.is_woken());

        let outcome = assert_ready!(first.poll()).unwrap();
        assert_eq!(outcome, RefreshOutcome::Refreshed("new".into()));
        let outcome = assert_ready!(second.poll()).unwrap();
        assert_eq!(outcome, RefreshOutcome::Refreshed("new".into()));
        assert_eq!(coordinator.pending(), 0);
    }

    #[test]
    fn test_expired_is_broadcast() {
        let coordinator = RefreshCoordinator::new();
        let lease = lead(coordinator.begin(0));
        let mut waiter = task::spawn(wait(coordinator.begin(0)));

        lease.resolve(RefreshOutcome::Expired);
        assert_eq!(assert_ready!(waiter.poll()).unwrap(), RefreshOutcome::Expired);
    }

    #[test]
    fn test_late_failure_reuses_settled_outcome() {
        let coordinator = RefreshCoordinator::new();
        let observed = coordinator.generation();

        lead(coordinator.begin(observed)).resolve(RefreshOutcome::Refreshed("fresh".into()));

        // A request sent before that refresh reports its 401 afterwards
        match coordinator.begin(observed) {
            Ticket::Settled(outcome) => {
                assert_eq!(outcome, RefreshOutcome::Refreshed("fresh".into()))
            }
            _ => panic!("expected the settled outcome"),
        }
        assert!(!coordinator.is_refreshing());

        // A request sent with the fresh token starts a new refresh
        let lease = lead(coordinator.begin(coordinator.generation()));
        lease.resolve(RefreshOutcome::Expired);
        assert_eq!(coordinator.generation(), 2);
    }

    #[test]
    fn test_abandoned_lease_releases_waiters() {
        let coordinator = RefreshCoordinator::new();
        let lease = lead(coordinator.begin(0));
        let mut waiter = task::spawn(wait(coordinator.begin(0)));

        drop(lease);
        assert!(!coordinator.is_refreshing());
        assert!(assert_ready!(waiter.poll()).is_err());

        // Nothing resolved, so the next caller leads again
        assert_eq!(coordinator.generation(), 0);
        let _lease = lead(coordinator.begin(0));
    }
}
