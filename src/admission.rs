//! Admission controller (C5)
//!
//! A three-state mutual-exclusion gate over the backend's slot 0. At most
//! one class of workload — user traffic or warmup — may hold the slot at a
//! time, and a user request always pre-empts an in-flight warmup.

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Current occupant of slot 0.
enum AdmissionState {
    /// Nobody holds the slot.
    Idle,
    /// One or more user queries hold the slot.
    UserQuery {
        /// Number of concurrent user queries currently admitted.
        count: u32,
    },
    /// A warmup attempt holds the slot and can be cancelled.
    WarmupQuery {
        /// Handle that aborts the in-flight warmup HTTP request.
        cancel: CancellationToken,
        /// Prefix currently being warmed.
        prefix: String,
    },
}

/// Guards admission of user and warmup traffic to backend slot 0.
///
/// All transitions happen under a single mutex; the cancellation handle for
/// a pre-empted warmup is invoked while the lock is still held, closing the
/// window between observing `WarmupQuery` and the abort actually taking
/// effect.
pub struct AdmissionController {
    state: Mutex<AdmissionState>,
}

impl Default for AdmissionController {
    fn default() -> Self {
        Self::new()
    }
}

impl AdmissionController {
    /// Create a controller starting in `Idle`.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(AdmissionState::Idle),
        }
    }

    /// Admit a user query, cancelling any in-flight warmup. Always
    /// succeeds and never blocks: concurrent user queries are permitted,
    /// the backend serializes them internally.
    pub fn acquire_user(&self) -> bool {
        let mut state = self.state.lock();
        match &mut *state {
            AdmissionState::Idle => {
                *state = AdmissionState::UserQuery { count: 1 };
            }
            AdmissionState::UserQuery { count } => {
                *count += 1;
            }
            AdmissionState::WarmupQuery { cancel, .. } => {
                cancel.cancel();
                *state = AdmissionState::UserQuery { count: 1 };
            }
        }
        true
    }

    /// Release a previously-admitted user query.
    pub fn release_user(&self) {
        let mut state = self.state.lock();
        match &mut *state {
            AdmissionState::UserQuery { count } => {
                *count -= 1;
                if *count == 0 {
                    *state = AdmissionState::Idle;
                }
            }
            AdmissionState::Idle => {
                warn!("release_user called while admission controller is Idle");
            }
            AdmissionState::WarmupQuery { .. } => {
                warn!("release_user called while admission controller is WarmupQuery");
            }
        }
    }

    /// Attempt to admit a warmup of `prefix`. Non-blocking: succeeds only
    /// when the controller is strictly `Idle`.
    pub fn acquire_warmup(&self, prefix: &str, cancel: CancellationToken) -> bool {
        let mut state = self.state.lock();
        match &*state {
            AdmissionState::Idle => {
                *state = AdmissionState::WarmupQuery {
                    cancel,
                    prefix: prefix.to_string(),
                };
                true
            }
            AdmissionState::UserQuery { .. } | AdmissionState::WarmupQuery { .. } => false,
        }
    }

    /// Release a warmup admission. Called from every exit path of
    /// `warmup()`; tolerated as a no-op if a user request already
    /// pre-empted the warmup between acquire and release.
    pub fn release_warmup(&self) {
        let mut state = self.state.lock();
        if matches!(&*state, AdmissionState::WarmupQuery { .. }) {
            *state = AdmissionState::Idle;
        }
    }

    /// Whether the controller currently holds a warmup for `prefix` (for
    /// diagnostics only, not used in any admission decision).
    #[must_use]
    pub fn is_warming(&self, prefix: &str) -> bool {
        matches!(&*self.state.lock(), AdmissionState::WarmupQuery { prefix: p, .. } if p == prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_acquire_user_transitions_and_succeeds() {
        let ctrl = AdmissionController::new();
        assert!(ctrl.acquire_user());
        ctrl.release_user();
        assert!(!ctrl.is_warming("@code"));
    }

    #[test]
    fn concurrent_user_queries_are_all_admitted() {
        let ctrl = AdmissionController::new();
        assert!(ctrl.acquire_user());
        assert!(ctrl.acquire_user());
        ctrl.release_user();
        // still one outstanding user query; a warmup must still be refused.
        assert!(!ctrl.acquire_warmup("@code", CancellationToken::new()));
        ctrl.release_user();
        assert!(ctrl.acquire_warmup("@code", CancellationToken::new()));
    }

    #[test]
    fn warmup_admitted_only_when_idle() {
        let ctrl = AdmissionController::new();
        assert!(ctrl.acquire_warmup("@code", CancellationToken::new()));
        // a second warmup attempt is refused while one is in flight.
        assert!(!ctrl.acquire_warmup("@debug", CancellationToken::new()));
    }

    #[test]
    fn user_query_cancels_in_flight_warmup() {
        let ctrl = AdmissionController::new();
        let cancel = CancellationToken::new();
        assert!(ctrl.acquire_warmup("@code", cancel.clone()));
        assert!(!cancel.is_cancelled());

        assert!(ctrl.acquire_user());
        assert!(cancel.is_cancelled());
        assert!(!ctrl.is_warming("@code"));
    }

    #[test]
    fn release_warmup_from_other_state_is_tolerated() {
        let ctrl = AdmissionController::new();
        // Pre-empted: warmup never gets to call release_warmup before a
        // user request has already moved the state machine on.
        ctrl.acquire_user();
        ctrl.release_warmup();
        assert!(ctrl.acquire_warmup("@code", CancellationToken::new()));
    }

    #[test]
    fn release_warmup_returns_to_idle() {
        let ctrl = AdmissionController::new();
        ctrl.acquire_warmup("@code", CancellationToken::new());
        ctrl.release_warmup();
        assert!(ctrl.acquire_user());
    }
}
