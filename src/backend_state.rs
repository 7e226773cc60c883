//! Backend cache state tracker (C2)
//!
//! Singleton belief about which template is currently resident in the
//! backend's slot 0. Used to decide whether a save and/or restore is needed
//! before forwarding a request for a (possibly different) prefix.

use parking_lot::Mutex;

/// Tracks the prefix last accepted by the backend, driving save/restore
/// decisions for slot 0.
pub struct BackendState {
    last_prefix: Mutex<String>,
}

impl Default for BackendState {
    fn default() -> Self {
        Self::new()
    }
}

impl BackendState {
    /// Create a tracker with no template resident.
    #[must_use]
    pub fn new() -> Self {
        Self {
            last_prefix: Mutex::new(String::new()),
        }
    }

    /// The prefix believed to be resident in slot 0 (empty means none).
    #[must_use]
    pub fn last_prefix(&self) -> String {
        self.last_prefix.lock().clone()
    }

    /// Record that a request tagged with `prefix` has just been accepted by
    /// the backend.
    pub fn update(&self, prefix: &str) {
        *self.last_prefix.lock() = prefix.to_string();
    }

    /// Whether switching to `new` requires saving the outgoing template's
    /// snapshot first (only when something is resident and it differs).
    #[must_use]
    pub fn should_save(&self, new: &str) -> bool {
        let last = self.last_prefix.lock();
        !last.is_empty() && last.as_str() != new
    }

    /// Whether switching to `new` requires restoring its snapshot (only for
    /// a non-empty prefix that differs from what's resident).
    #[must_use]
    pub fn should_restore(&self, new: &str) -> bool {
        let last = self.last_prefix.lock();
        !new.is_empty() && last.as_str() != new
    }

    /// Clear the tracked state (manual operator reset; see
    /// `POST /admin/reset`). Does not touch the backend itself.
    pub fn reset(&self) {
        self.last_prefix.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn fresh_state_has_empty_prefix() {
        let state = BackendState::new();
        assert_eq!(state.last_prefix(), "");
        assert!(!state.should_save("@code"));
        assert!(state.should_restore("@code"));
    }

    #[test]
    fn should_restore_is_false_for_empty_target() {
        let state = BackendState::new();
        assert!(!state.should_restore(""));
    }

    #[test]
    fn switching_prefix_requires_save_and_restore() {
        let state = BackendState::new();
        state.update("@code");
        assert!(!state.should_save("@code"));
        assert!(!state.should_restore("@code"));

        assert!(state.should_save("@debug"));
        assert!(state.should_restore("@debug"));
    }

    #[test]
    fn repeated_update_makes_both_false() {
        let state = BackendState::new();
        state.update("@code");
        state.update("@code");
        assert!(!state.should_save("@code"));
        assert!(!state.should_restore("@code"));
    }

    #[test]
    fn switching_to_empty_prefix_requires_save_but_not_restore() {
        let state = BackendState::new();
        state.update("@code");
        assert!(state.should_save(""));
        assert!(!state.should_restore(""));
    }

    #[test]
    fn reset_clears_resident_belief() {
        let state = BackendState::new();
        state.update("@code");
        state.reset();
        assert_eq!(state.last_prefix(), "");
    }
}
