//! Collapses bursts of refresh requests into as few polls as possible.
//!
//! The first request runs immediately and opens a cooldown window.
//! Requests that arrive inside the window are folded into one deferred
//! run at the end of the window, which opens a fresh window of its own.
//!
//! # State Machine
//!
//! ```text
//!           request() → Run                  request() → Deferred
//!  Idle ─────────────────────► Cooling ───────────────────────► Pending
//!   ▲                            │  ▲                              │
//!   │   window elapsed           │  │   expire() → Run             │
//!   └────────────────────────────┘  └──────────────────────────────┘
//! ```
//!
//! - **Idle:** No recent run. The next request runs at once.
//! - **Cooling:** A run happened less than `cooldown` ago.
//! - **Pending:** Cooling, and at least one request is waiting for the
//!   window to close.

use std::time::Duration;

use tokio::time::Instant;

/// What the caller should do with a refresh request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshDecision {
    /// Poll now.
    Run,
    /// Folded into a later run; see [`RefreshDebouncer::deadline`].
    Deferred,
}

#[derive(Debug)]
enum State {
    Idle,
    Cooling(Instant),
    Pending(Instant),
}

#[derive(Debug)]
pub struct RefreshDebouncer {
    cooldown: Duration,
    state: State,
}

impl RefreshDebouncer {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            state: State::Idle,
        }
    }

    /// Register a refresh request.
    ///
    /// | State   | Result                                   |
    /// |---------|------------------------------------------|
    /// | Idle    | `Run`, window opens                      |
    /// | Cooling | `Deferred` until the window closes       |
    /// | Pending | `Deferred`, collapsed into the same run  |
    pub fn request(&mut self) -> RefreshDecision {
        let now = Instant::now();
        match self.state {
            State::Cooling(until) | State::Pending(until) if now < until => {
                self.state = State::Pending(until);
                RefreshDecision::Deferred
            }
            _ => {
                self.state = State::Cooling(now + self.cooldown);
                RefreshDecision::Run
            }
        }
    }

    /// When the deferred run is due, if one is waiting.
    pub fn deadline(&self) -> Option<Instant> {
        match self.state {
            State::Pending(until) => Some(until),
            _ => None,
        }
    }

    /// Called once [`deadline`](Self::deadline) has passed.
    ///
    /// Returns `Run` when a deferred request matured, which also opens a
    /// new window. Returns `Deferred` if called early or with nothing
    /// pending.
    pub fn expire(&mut self) -> RefreshDecision {
        let now = Instant::now();
        match self.state {
            State::Pending(until) if now >= until => {
                self.state = State::Cooling(now + self.cooldown);
                RefreshDecision::Run
            }
            State::Cooling(until) if now >= until => {
                self.state = State::Idle;
                RefreshDecision::Deferred
            }
            _ => RefreshDecision::Deferred,
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::time;

    use super::*;

    const COOLDOWN: Duration = Duration::from_secs(5);

    #[tokio::test(start_paused = true)]
    async fn first_request_runs_immediately() {
        let mut debouncer = RefreshDebouncer::new(COOLDOWN);
        assert_eq!(debouncer.request(), RefreshDecision::Run);
        assert_eq!(debouncer.deadline(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn burst_collapses_into_one_deferred_run() {
        let mut debouncer = RefreshDebouncer::new(COOLDOWN);
        let start = Instant::now();

        assert_eq!(debouncer.request(), RefreshDecision::Run);
        time::advance(Duration::from_millis(100)).await;
        assert_eq!(debouncer.request(), RefreshDecision::Deferred);
        assert_eq!(debouncer.request(), RefreshDecision::Deferred);
        assert_eq!(debouncer.request(), RefreshDecision::Deferred);

        assert_eq!(debouncer.deadline(), Some(start + COOLDOWN));
    }

    #[tokio::test(start_paused = true)]
    async fn deferred_run_fires_once_at_deadline() {
        let mut debouncer = RefreshDebouncer::new(COOLDOWN);
        debouncer.request();
        debouncer.request();

        time::advance(Duration::from_secs(4)).await;
        assert_eq!(debouncer.expire(), RefreshDecision::Deferred);

        time::advance(Duration::from_secs(1)).await;
        assert_eq!(debouncer.expire(), RefreshDecision::Run);
        assert_eq!(debouncer.expire(), RefreshDecision::Deferred);
        assert_eq!(debouncer.deadline(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn deferred_run_opens_new_window() {
        let mut debouncer = RefreshDebouncer::new(COOLDOWN);
        debouncer.request();
        debouncer.request();

        time::advance(COOLDOWN).await;
        assert_eq!(debouncer.expire(), RefreshDecision::Run);

        time::advance(Duration::from_secs(1)).await;
        assert_eq!(debouncer.request(), RefreshDecision::Deferred);
    }

    #[tokio::test(start_paused = true)]
    async fn request_after_quiet_period_runs_immediately() {
        let mut debouncer = RefreshDebouncer::new(COOLDOWN);
        debouncer.request();

        time::advance(COOLDOWN).await;
        assert_eq!(debouncer.request(), RefreshDecision::Run);
    }

    #[tokio::test(start_paused = true)]
    async fn expire_without_pending_returns_to_idle() {
        let mut debouncer = RefreshDebouncer::new(COOLDOWN);
        debouncer.request();

        time::advance(COOLDOWN).await;
        assert_eq!(debouncer.expire(), RefreshDecision::Deferred);
        assert_eq!(debouncer.request(), RefreshDecision::Run);
    }
}
