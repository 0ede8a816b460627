//! Session lifecycle state
//!
//! Tracks the lifecycle of one peer's session:
//! `Fresh -> Initializing -> Initialized -> Terminated`.
//!
//! Once `Initialized` the phase only moves forward to `Terminated`.
//! Transitions go through compare-and-swap so racing callers cannot
//! double-initialize: claiming `Initializing` has exactly one winner, and
//! a claim whose handshake fails validation is released back to `Fresh`.

use std::sync::atomic::{AtomicU8, Ordering};

/// Session lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Phase {
    /// No handshake has happened; only `initialize` and `ping` are valid
    /// under strict mode
    Fresh = 0,
    /// The initialize exchange is in flight
    Initializing = 1,
    /// Handshake complete; normal operation
    Initialized = 2,
    /// Session torn down
    Terminated = 3,
}

impl From<u8> for Phase {
    fn from(value: u8) -> Self {
        match value {
            0 => Phase::Fresh,
            1 => Phase::Initializing,
            2 => Phase::Initialized,
            _ => Phase::Terminated,
        }
    }
}

/// Atomic lifecycle phase for one peer.
pub struct SessionState {
    phase: AtomicU8,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            phase: AtomicU8::new(Phase::Fresh as u8),
        }
    }

    pub fn phase(&self) -> Phase {
        Phase::from(self.phase.load(Ordering::Acquire))
    }

    pub fn is_initialized(&self) -> bool {
        self.phase() == Phase::Initialized
    }

    /// `Fresh -> Initializing`. Returns false if the session has moved on.
    pub fn mark_initializing(&self) -> bool {
        self.phase
            .compare_exchange(
                Phase::Fresh as u8,
                Phase::Initializing as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// `Initializing -> Initialized`, also accepting `Fresh -> Initialized`
    /// for peers that complete the handshake in one step.
    pub fn mark_initialized(&self) -> bool {
        for from in [Phase::Initializing, Phase::Fresh] {
            if self
                .phase
                .compare_exchange(
                    from as u8,
                    Phase::Initialized as u8,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
            {
                return true;
            }
        }
        false
    }

    /// `Initializing -> Fresh`: release a claimed handshake whose
    /// validation failed before completing. Returns false if the phase
    /// has already moved on.
    pub fn abort_initializing(&self) -> bool {
        self.phase
            .compare_exchange(
                Phase::Initializing as u8,
                Phase::Fresh as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Terminal transition; valid from any phase, idempotent.
    pub fn mark_terminated(&self) {
        self.phase.store(Phase::Terminated as u8, Ordering::Release);
    }

    /// Whether a request method is allowed in the current phase under
    /// strict mode. Before initialization only `initialize` and `ping`
    /// pass; `ping` is always valid.
    pub fn is_request_allowed(&self, method: &str) -> bool {
        match self.phase() {
            Phase::Fresh | Phase::Initializing => matches!(method, "initialize" | "ping"),
            Phase::Initialized | Phase::Terminated => true,
        }
    }
}

impl std::fmt::Debug for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionState").field("phase", &self.phase()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lifecycle_transitions() {
        let session = SessionState::new();
        assert_eq!(session.phase(), Phase::Fresh);
        assert!(!session.is_initialized());

        assert!(session.mark_initializing());
        assert_eq!(session.phase(), Phase::Initializing);
        assert!(!session.mark_initializing());

        assert!(session.mark_initialized());
        assert!(session.is_initialized());
        assert!(!session.mark_initialized());

        session.mark_terminated();
        assert_eq!(session.phase(), Phase::Terminated);
    }

    #[test]
    fn test_one_step_initialization() {
        let session = SessionState::new();
        assert!(session.mark_initialized());
        assert!(session.is_initialized());
    }

    #[test]
    fn test_initialized_is_monotonic() {
        let session = SessionState::new();
        session.mark_initialized();
        // No transition leads back out of Initialized short of teardown.
        assert!(!session.mark_initializing());
        assert!(session.is_initialized());
    }

    #[test]
    fn test_request_gating_by_phase() {
        let session = SessionState::new();
        assert!(session.is_request_allowed("initialize"));
        assert!(session.is_request_allowed("ping"));
        assert!(!session.is_request_allowed("tools/list"));

        session.mark_initializing();
        assert!(!session.is_request_allowed("tools/list"));

        session.mark_initialized();
        assert!(session.is_request_allowed("tools/list"));
    }

    #[test]
    fn test_initializing_claim_has_one_winner() {
        let session = SessionState::new();
        assert!(session.mark_initializing());
        // A racing second claim loses.
        assert!(!session.mark_initializing());
    }

    #[test]
    fn test_abort_releases_handshake_claim() {
        let session = SessionState::new();
        assert!(session.mark_initializing());
        assert!(session.abort_initializing());
        assert_eq!(session.phase(), Phase::Fresh);

        // The claim can be taken again after an abort.
        assert!(session.mark_initializing());
        assert!(session.mark_initialized());

        // Abort is a no-op once the handshake completed.
        assert!(!session.abort_initializing());
        assert!(session.is_initialized());
    }

    #[test]
    fn test_terminate_is_idempotent() {
        let session = SessionState::new();
        session.mark_terminated();
        session.mark_terminated();
        assert_eq!(session.phase(), Phase::Terminated);
    }
}
