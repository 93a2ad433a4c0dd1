//! Step counters and cooperative cancellation for in-flight computations.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::ComputeError;

/// Total step count used while the real total is not known.
pub const UNKNOWN_TOTAL: u64 = u64::MAX;

/// Shared cancellation flag.
///
/// Cancelling is sticky. Node logic polls the token (through
/// [`Progress::check_cancelled`]) instead of relying on thread interruption.
#[derive(Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    /// A fresh, uncancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Returns `true` once cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

impl fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CancellationToken({})", self.is_cancelled())
    }
}

#[derive(Debug, Clone, Copy)]
struct Steps {
    current: u64,
    total: u64,
}

struct ProgressState {
    steps: Mutex<Steps>,
    noop: bool,
}

/// Progress of one computation invocation.
///
/// `current_steps` always stays within `[0, total_steps]`. The total starts as
/// [`UNKNOWN_TOTAL`] and can be revised in both directions, but never below
/// the steps already taken.
///
/// Cloning yields another handle to the same counter.
#[derive(Clone)]
pub struct Progress {
    state: Arc<ProgressState>,
    token: CancellationToken,
}

impl Default for Progress {
    fn default() -> Self {
        Self::new()
    }
}

impl Progress {
    /// A fresh tracker with an unknown total.
    pub fn new() -> Self {
        Self::with_token(CancellationToken::new())
    }

    /// A tracker that ignores every update and always reports `0.0`.
    pub fn noop() -> Self {
        Self {
            state: Arc::new(ProgressState {
                steps: Mutex::new(Steps {
                    current: 0,
                    total: UNKNOWN_TOTAL,
                }),
                noop: true,
            }),
            token: CancellationToken::new(),
        }
    }

    pub(crate) fn with_token(token: CancellationToken) -> Self {
        Self {
            state: Arc::new(ProgressState {
                steps: Mutex::new(Steps {
                    current: 0,
                    total: UNKNOWN_TOTAL,
                }),
                noop: false,
            }),
            token,
        }
    }

    /// Returns `true` for trackers created by [`Progress::noop`].
    pub fn is_noop(&self) -> bool {
        self.state.noop
    }

    /// Steps taken so far.
    pub fn current_steps(&self) -> u64 {
        self.state.steps.lock().current
    }

    /// Expected total steps.
    pub fn total_steps(&self) -> u64 {
        self.state.steps.lock().total
    }

    /// Revise the expected total; values below the current step count are raised to it.
    pub fn set_total_steps(&self, total: u64) {
        if self.state.noop {
            return;
        }
        let mut steps = self.state.steps.lock();
        steps.total = total.max(steps.current);
    }

    /// Set the current step count, clamped to the total.
    pub fn set_current_steps(&self, current: u64) {
        if self.state.noop {
            return;
        }
        let mut steps = self.state.steps.lock();
        steps.current = current.min(steps.total);
    }

    /// Advance by `n` steps, clamped to the total.
    pub fn advance(&self, n: u64) {
        if self.state.noop {
            return;
        }
        let mut steps = self.state.steps.lock();
        steps.current = steps.current.saturating_add(n).min(steps.total);
    }

    /// Advance by one step.
    pub fn step(&self) {
        self.advance(1);
    }

    /// Mark every step as taken. An unknown total collapses to the current count.
    pub fn complete(&self) {
        if self.state.noop {
            return;
        }
        let mut steps = self.state.steps.lock();
        if steps.total == UNKNOWN_TOTAL {
            steps.total = steps.current.max(1);
        }
        steps.current = steps.total;
    }

    /// Fractional completion in `[0.0, 1.0]`.
    pub fn fraction(&self) -> f64 {
        if self.state.noop {
            return 0.0;
        }
        let steps = *self.state.steps.lock();
        if steps.total == 0 {
            1.0
        } else {
            steps.current as f64 / steps.total as f64
        }
    }

    /// The cancellation token shared with the owning future.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Returns `true` once the owning future was cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// `Err(Cancelled)` once the owning future was cancelled; use with `?`
    /// inside long-running node logic.
    pub fn check_cancelled(&self) -> Result<(), ComputeError> {
        if self.is_cancelled() {
            Err(ComputeError::Cancelled)
        } else {
            Ok(())
        }
    }
}

impl fmt::Debug for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let steps = *self.state.steps.lock();
        f.debug_struct("Progress")
            .field("current", &steps.current)
            .field("total", &steps.total)
            .field("noop", &self.state.noop)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
