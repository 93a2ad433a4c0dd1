//! Shared, memoizing asynchronous results.
//!
//! A [`FutureResult`] resolves exactly once. Every handle observes the same
//! outcome, and continuations registered before or after resolution run
//! exactly once.

use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::dependency::Value;
use crate::error::ComputeError;
use crate::executor::Executor;
use crate::outcome::{merge_all, Outcome};
use crate::progress::Progress;

/// Where a single invocation currently is.
///
/// ```text
/// Pending -> MergingChildren -> (Failed | CheckingCancel)
/// CheckingCancel -> (Cancelled | Computing) -> (Failed | Succeeded)
/// ```
///
/// A future cancelled from outside jumps to `Cancelled` from any
/// non-terminal phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ExecutionPhase {
    Pending = 0,
    MergingChildren = 1,
    CheckingCancel = 2,
    Computing = 3,
    Succeeded = 4,
    Failed = 5,
    Cancelled = 6,
}

impl ExecutionPhase {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => ExecutionPhase::Pending,
            1 => ExecutionPhase::MergingChildren,
            2 => ExecutionPhase::CheckingCancel,
            3 => ExecutionPhase::Computing,
            4 => ExecutionPhase::Succeeded,
            5 => ExecutionPhase::Failed,
            _ => ExecutionPhase::Cancelled,
        }
    }

    /// Returns `true` for `Succeeded`, `Failed` and `Cancelled`.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExecutionPhase::Succeeded | ExecutionPhase::Failed | ExecutionPhase::Cancelled
        )
    }
}

type Callback<T> = Box<dyn FnOnce(&Outcome<Arc<T>>) + Send>;

struct Slot<T> {
    outcome: Option<Outcome<Arc<T>>>,
    callbacks: Vec<Callback<T>>,
}

/// The shared state behind every handle of one future.
pub(crate) struct Promise<T> {
    slot: Mutex<Slot<T>>,
    ready: Condvar,
    progress: Progress,
    executor: Executor,
    phase: AtomicU8,
    faulted: AtomicBool,
}

impl<T: Send + Sync + 'static> Promise<T> {
    pub(crate) fn new(executor: Executor) -> Arc<Self> {
        Arc::new(Self {
            slot: Mutex::new(Slot {
                outcome: None,
                callbacks: Vec::new(),
            }),
            ready: Condvar::new(),
            progress: Progress::new(),
            executor,
            phase: AtomicU8::new(ExecutionPhase::Pending as u8),
            faulted: AtomicBool::new(false),
        })
    }

    pub(crate) fn progress(&self) -> &Progress {
        &self.progress
    }

    pub(crate) fn executor(&self) -> &Executor {
        &self.executor
    }

    pub(crate) fn phase(&self) -> ExecutionPhase {
        ExecutionPhase::from_u8(self.phase.load(Ordering::Acquire))
    }

    /// Move to a non-terminal phase; ignored once resolved.
    pub(crate) fn set_phase(&self, phase: ExecutionPhase) {
        let _ = self
            .phase
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (!ExecutionPhase::from_u8(current).is_terminal()).then_some(phase as u8)
            });
    }

    /// Mark the result as produced by a panic; such entries are not served from caches.
    pub(crate) fn mark_faulted(&self) {
        self.faulted.store(true, Ordering::Release);
    }

    pub(crate) fn is_done(&self) -> bool {
        self.slot.lock().outcome.is_some()
    }

    /// Resolve once. Returns `false` (and drops `outcome`) if already resolved.
    pub(crate) fn resolve(&self, outcome: Outcome<Arc<T>>) -> bool {
        let callbacks = {
            let mut slot = self.slot.lock();
            if slot.outcome.is_some() {
                return false;
            }
            let phase = if outcome.is_present() {
                ExecutionPhase::Succeeded
            } else if outcome.is_cancelled() {
                ExecutionPhase::Cancelled
            } else {
                ExecutionPhase::Failed
            };
            self.phase.store(phase as u8, Ordering::Release);
            slot.outcome = Some(outcome.clone());
            std::mem::take(&mut slot.callbacks)
        };
        self.ready.notify_all();
        for callback in callbacks {
            callback(&outcome);
        }
        true
    }

    /// Run `callback` once resolved; immediately if already resolved.
    pub(crate) fn on_resolved<F>(&self, callback: F)
    where
        F: FnOnce(&Outcome<Arc<T>>) + Send + 'static,
    {
        let resolved = {
            let mut slot = self.slot.lock();
            match &slot.outcome {
                Some(outcome) => outcome.clone(),
                None => {
                    slot.callbacks.push(Box::new(callback));
                    return;
                }
            }
        };
        callback(&resolved);
    }

    fn peek(&self) -> Option<Outcome<Arc<T>>> {
        self.slot.lock().outcome.clone()
    }

    fn wait(&self) -> Outcome<Arc<T>> {
        let mut slot = self.slot.lock();
        loop {
            if let Some(outcome) = &slot.outcome {
                return outcome.clone();
            }
            self.ready.wait(&mut slot);
        }
    }

    fn wait_timeout(&self, timeout: Duration) -> Option<Outcome<Arc<T>>> {
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            return Some(self.wait());
        };
        let mut slot = self.slot.lock();
        while slot.outcome.is_none() {
            if self.ready.wait_until(&mut slot, deadline).timed_out() {
                break;
            }
        }
        slot.outcome.clone()
    }

    /// Resolve as cancelled with `reason` and raise the cancellation token.
    /// No-op on a resolved promise.
    pub(crate) fn cancel_with(&self, reason: ComputeError) -> bool {
        if self.resolve(Outcome::error(reason)) {
            self.progress.token().cancel();
            true
        } else {
            false
        }
    }
}

/// Type-erased view of a [`Promise`], used by the cache and the engine to
/// handle futures of heterogeneous value types.
pub(crate) trait ErasedFuture: Send + Sync {
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;

    fn when_resolved(&self, callback: Box<dyn FnOnce(Outcome<Value>) + Send>);

    fn is_done(&self) -> bool;

    /// Resolved as cancelled or by a panic.
    fn is_evictable(&self) -> bool;

    /// Own progress fraction, `1.0` once resolved.
    fn fraction(&self) -> f64;
}

fn erase<T: Send + Sync + 'static>(outcome: Outcome<Arc<T>>) -> Outcome<Value> {
    outcome.map(|value| value as Value)
}

impl<T: Send + Sync + 'static> ErasedFuture for Promise<T> {
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }

    fn when_resolved(&self, callback: Box<dyn FnOnce(Outcome<Value>) + Send>) {
        self.on_resolved(move |outcome| callback(erase(outcome.clone())));
    }

    fn is_done(&self) -> bool {
        Promise::is_done(self)
    }

    fn is_evictable(&self) -> bool {
        match self.peek() {
            Some(outcome) => outcome.is_cancelled() || self.faulted.load(Ordering::Acquire),
            None => false,
        }
    }

    fn fraction(&self) -> f64 {
        if Promise::is_done(self) {
            1.0
        } else {
            self.progress.fraction()
        }
    }
}

/// Collects `count` results delivered in any order and hands them to `done`
/// in index order once the last one arrives.
pub(crate) struct Join<O> {
    slots: Mutex<Vec<Option<O>>>,
    remaining: AtomicUsize,
    done: Mutex<Option<Box<dyn FnOnce(Vec<O>) + Send>>>,
}

impl<O: Send + 'static> Join<O> {
    pub(crate) fn new<F>(count: usize, done: F) -> Arc<Self>
    where
        F: FnOnce(Vec<O>) + Send + 'static,
    {
        let join = Arc::new(Self {
            slots: Mutex::new((0..count).map(|_| None).collect()),
            remaining: AtomicUsize::new(count),
            done: Mutex::new(Some(Box::new(done))),
        });
        if count == 0 {
            join.finish();
        }
        join
    }

    pub(crate) fn complete(&self, index: usize, value: O) {
        self.slots.lock()[index] = Some(value);
        if self.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.finish();
        }
    }

    fn finish(&self) {
        let values: Vec<O> = self.slots.lock().drain(..).flatten().collect();
        let done = self.done.lock().take();
        if let Some(done) = done {
            done(values);
        }
    }
}

/// Run a continuation body on the current (pool) thread and resolve `target`.
fn run_continuation<U, F>(target: &Promise<U>, body: F)
where
    U: Send + Sync + 'static,
    F: FnOnce(&Progress) -> Outcome<U>,
{
    if target.is_done() {
        return;
    }
    target.set_phase(ExecutionPhase::Computing);
    let outcome = match catch_unwind(AssertUnwindSafe(|| body(target.progress()))) {
        Ok(outcome) => outcome.map(Arc::new),
        Err(payload) => {
            target.mark_faulted();
            Outcome::error(ComputeError::from_panic(payload))
        }
    };
    target.resolve(outcome);
}

/// Handle to an asynchronously computed [`Outcome`].
///
/// Values are shared as `Arc<T>`: every handle, every cache hit and every
/// continuation sees the same allocation.
///
/// # Example
///
/// ```
/// use compute_flow::{FutureResult, Outcome};
///
/// let doubled = FutureResult::of(Outcome::ok(21)).then(|v, _progress| *v * 2);
/// assert_eq!(doubled.get().value().map(|v| **v), Some(42));
/// ```
pub struct FutureResult<T> {
    promise: Arc<Promise<T>>,
}

impl<T> Clone for FutureResult<T> {
    fn clone(&self) -> Self {
        Self {
            promise: self.promise.clone(),
        }
    }
}

impl<T: Send + Sync + 'static> FutureResult<T> {
    /// An already resolved future.
    pub fn of(outcome: Outcome<T>) -> Self {
        Self::of_shared(outcome.map(Arc::new))
    }

    /// An already resolved future over shared values.
    pub fn of_shared(outcome: Outcome<Arc<T>>) -> Self {
        let future = Self::pending();
        future.promise.resolve(outcome);
        future
    }

    /// An unresolved future on the shared executor, completed with
    /// [`complete`](Self::complete).
    pub fn pending() -> Self {
        Self::pending_on(Executor::shared())
    }

    /// An unresolved future whose continuations run on `executor`.
    pub fn pending_on(executor: Executor) -> Self {
        Self {
            promise: Promise::new(executor),
        }
    }

    /// Resolve the future. Returns `false` if it was already resolved, in
    /// which case `outcome` is discarded.
    pub fn complete(&self, outcome: Outcome<T>) -> bool {
        self.promise.resolve(outcome.map(Arc::new))
    }

    pub(crate) fn from_promise(promise: Arc<Promise<T>>) -> Self {
        Self { promise }
    }

    /// Recover a typed handle; `None` if the erased future holds another type.
    pub(crate) fn from_erased(future: Arc<dyn ErasedFuture>) -> Option<Self> {
        future
            .into_any()
            .downcast::<Promise<T>>()
            .ok()
            .map(Self::from_promise)
    }

    pub(crate) fn erased(&self) -> Arc<dyn ErasedFuture> {
        self.promise.clone()
    }

    /// Block until resolved.
    ///
    /// Failures and cancellation are reported in the outcome; this never panics.
    pub fn get(&self) -> Outcome<Arc<T>> {
        self.promise.wait()
    }

    /// Block for at most `timeout`; `None` if still unresolved.
    pub fn get_timeout(&self, timeout: Duration) -> Option<Outcome<Arc<T>>> {
        self.promise.wait_timeout(timeout)
    }

    /// The outcome if already resolved.
    pub fn try_get(&self) -> Option<Outcome<Arc<T>>> {
        self.promise.peek()
    }

    pub fn is_done(&self) -> bool {
        self.promise.is_done()
    }

    /// Returns `true` once resolved as cancelled (including timeouts).
    pub fn is_cancelled(&self) -> bool {
        self.promise
            .peek()
            .is_some_and(|outcome| outcome.is_cancelled())
    }

    /// Progress of the invocation behind this future.
    pub fn progress(&self) -> &Progress {
        self.promise.progress()
    }

    pub fn phase(&self) -> ExecutionPhase {
        self.promise.phase()
    }

    /// The executor running this future's continuations.
    pub fn executor(&self) -> &Executor {
        self.promise.executor()
    }

    /// Resolve as cancelled and signal the running logic through its
    /// progress token. A later result from that logic is discarded.
    ///
    /// Returns `false` (and does nothing) if already resolved.
    pub fn cancel(&self) -> bool {
        self.promise.cancel_with(ComputeError::Cancelled)
    }

    /// Cancel with a [`ComputeError::TimedOut`] diagnostic if still
    /// unresolved after `timeout`.
    pub fn cancel_after(&self, timeout: Duration) -> Self {
        let promise = Arc::downgrade(&self.promise);
        self.promise.executor().execute_after(timeout, move || {
            if let Some(promise) = promise.upgrade() {
                if promise.cancel_with(ComputeError::TimedOut(timeout)) {
                    tracing::debug!(?timeout, "future timed out");
                }
            }
        });
        self.clone()
    }

    /// Call `callback` with the progress after `delay`, unless resolved by then.
    pub fn peek_after<F>(&self, delay: Duration, callback: F)
    where
        F: FnOnce(&Progress) + Send + 'static,
    {
        let promise = Arc::downgrade(&self.promise);
        self.promise.executor().execute_after(delay, move || {
            if let Some(promise) = promise.upgrade() {
                if !promise.is_done()
                    && catch_unwind(AssertUnwindSafe(|| callback(promise.progress()))).is_err()
                {
                    tracing::warn!("progress callback panicked");
                }
            }
        });
    }

    /// Call `callback` with the progress every `interval` until resolved.
    pub fn peek_every<F>(&self, interval: Duration, mut callback: F)
    where
        F: FnMut(&Progress) + Send + 'static,
    {
        let promise = Arc::downgrade(&self.promise);
        self.promise
            .executor()
            .execute_every(interval, move || match promise.upgrade() {
                Some(promise) if !promise.is_done() => {
                    let tick = catch_unwind(AssertUnwindSafe(|| callback(promise.progress())));
                    if tick.is_err() {
                        tracing::warn!("progress callback panicked; stopping");
                    }
                    tick.is_ok()
                }
                _ => false,
            });
    }

    /// Continue with the whole outcome, present or not.
    ///
    /// `f` runs on the executor with a fresh [`Progress`]; a panic becomes a
    /// [`ComputeError::Panicked`] diagnostic.
    pub fn then_from_result<U, F>(&self, f: F) -> FutureResult<U>
    where
        U: Send + Sync + 'static,
        F: FnOnce(Outcome<Arc<T>>, &Progress) -> Outcome<U> + Send + 'static,
    {
        let executor = self.promise.executor().clone();
        let next = Promise::<U>::new(executor.clone());
        let target = next.clone();
        self.promise.on_resolved(move |outcome| {
            let outcome = outcome.clone();
            executor.execute(move || run_continuation(&target, |progress| f(outcome, progress)));
        });
        FutureResult { promise: next }
    }

    /// Continue with a fallible step over the value. An absent outcome
    /// skips `f` and propagates its diagnostics.
    pub fn then_result<U, F>(&self, f: F) -> FutureResult<U>
    where
        U: Send + Sync + 'static,
        F: FnOnce(Arc<T>, &Progress) -> Outcome<U> + Send + 'static,
    {
        self.then_from_result(move |outcome, progress| outcome.and_then(|value| f(value, progress)))
    }

    /// Map the value. An absent outcome skips `f` and propagates its diagnostics.
    pub fn then<U, F>(&self, f: F) -> FutureResult<U>
    where
        U: Send + Sync + 'static,
        F: FnOnce(Arc<T>, &Progress) -> U + Send + 'static,
    {
        self.then_result(move |value, progress| Outcome::ok(f(value, progress)))
    }

    /// Wait for every future and merge their outcomes (in input order) with `merger`.
    pub fn all_of<U, F>(futures: Vec<FutureResult<T>>, merger: F) -> FutureResult<U>
    where
        U: Send + Sync + 'static,
        F: FnOnce(Vec<Outcome<Arc<T>>>) -> Outcome<U> + Send + 'static,
    {
        let executor = futures
            .first()
            .map(|f| f.executor().clone())
            .unwrap_or_else(Executor::shared);
        let next = Promise::<U>::new(executor.clone());
        let target = next.clone();
        let join = Join::new(futures.len(), move |outcomes| {
            executor.execute(move || run_continuation(&target, |_| merger(outcomes)));
        });
        for (index, future) in futures.iter().enumerate() {
            let join = join.clone();
            future
                .promise
                .on_resolved(move |outcome| join.complete(index, outcome.clone()));
        }
        FutureResult { promise: next }
    }

    /// [`all_of`](Self::all_of) with the conjunctive merge: present only if
    /// every input is present, keeping every input's diagnostics.
    pub fn all_of_default(futures: Vec<FutureResult<T>>) -> FutureResult<Vec<Arc<T>>> {
        Self::all_of(futures, merge_all)
    }
}

impl<T> fmt::Debug for FutureResult<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FutureResult")
            .field(
                "phase",
                &ExecutionPhase::from_u8(self.promise.phase.load(Ordering::Acquire)),
            )
            .field("progress", &self.promise.progress)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outcome::Diagnostic;
    use std::sync::mpsc;

    const WAIT: Duration = Duration::from_secs(5);

    fn value_of<T: Copy>(outcome: &Outcome<Arc<T>>) -> Option<T> {
        outcome.value().map(|v| **v)
    }

    #[test]
    fn test_of_is_resolved() {
        let future = FutureResult::of(Outcome::ok(7));
        assert!(future.is_done());
        assert_eq!(future.phase(), ExecutionPhase::Succeeded);
        assert_eq!(value_of(&future.get()), Some(7));
    }

    #[test]
    fn test_complete_once() {
        let future = FutureResult::<u32>::pending();
        assert!(future.try_get().is_none());
        assert!(future.complete(Outcome::ok(1)));
        assert!(!future.complete(Outcome::ok(2)));
        assert_eq!(value_of(&future.get()), Some(1));
    }

    #[test]
    fn test_then_chains_and_keeps_diagnostics() {
        let source = FutureResult::of(Outcome::ok(3).with(Diagnostic::warning("source")));
        let chained = source
            .then(|v, _| *v + 1)
            .then_result(|v, _| Outcome::ok(*v * 10).with(Diagnostic::warning("step")));
        let outcome = chained.get_timeout(WAIT).unwrap();
        assert_eq!(value_of(&outcome), Some(40));
        let rendered: Vec<String> = outcome.diagnostics().iter().map(|d| d.to_string()).collect();
        assert_eq!(rendered, vec!["warning: source", "warning: step"]);
    }

    #[test]
    fn test_then_skips_on_failure() {
        let source = FutureResult::<u32>::of(Outcome::error(anyhow::anyhow!("bad input")));
        let called = Arc::new(AtomicBool::new(false));
        let flag = called.clone();
        let chained = source.then(move |v, _| {
            flag.store(true, Ordering::SeqCst);
            *v
        });
        let outcome = chained.get_timeout(WAIT).unwrap();
        assert!(!outcome.is_present());
        assert_eq!(outcome.errors().count(), 1);
        assert!(!called.load(Ordering::SeqCst));
    }

    #[test]
    fn test_then_from_result_sees_failure() {
        let source = FutureResult::<u32>::of(Outcome::error(anyhow::anyhow!("bad")));
        let recovered = source.then_from_result(|outcome, _| {
            Outcome::ok(if outcome.is_present() { 1 } else { 0 })
        });
        assert_eq!(value_of(&recovered.get_timeout(WAIT).unwrap()), Some(0));
    }

    #[test]
    fn test_continuation_panic_becomes_diagnostic() {
        let chained = FutureResult::of(Outcome::ok(1)).then(|_, _| -> u32 { panic!("kaboom") });
        let outcome = chained.get_timeout(WAIT).unwrap();
        assert!(!outcome.is_present());
        assert!(matches!(
            outcome.errors().next(),
            Some(ComputeError::Panicked { message }) if message == "kaboom"
        ));
    }

    #[test]
    fn test_all_of_orders_by_index() {
        let first = FutureResult::<u32>::pending();
        let second = FutureResult::<u32>::pending();
        let third = FutureResult::<u32>::pending();
        let all =
            FutureResult::all_of_default(vec![first.clone(), second.clone(), third.clone()]);
        third.complete(Outcome::ok(3));
        first.complete(Outcome::ok(1));
        assert!(all.get_timeout(Duration::from_millis(20)).is_none());
        second.complete(Outcome::ok(2));
        let values: Vec<u32> = all
            .get_timeout(WAIT)
            .unwrap()
            .into_value()
            .unwrap()
            .iter()
            .map(|v| **v)
            .collect();
        assert_eq!(values, vec![1, 2, 3]);
    }

    #[test]
    fn test_all_of_empty_input() {
        let all = FutureResult::<u32>::all_of_default(Vec::new());
        let outcome = all.get_timeout(WAIT).unwrap();
        assert_eq!(outcome.value().map(|v| v.len()), Some(0));
    }

    #[test]
    fn test_all_of_failure_keeps_all_diagnostics() {
        let all = FutureResult::all_of_default(vec![
            FutureResult::of(Outcome::ok(1).with(Diagnostic::warning("w"))),
            FutureResult::of(Outcome::error(anyhow::anyhow!("e"))),
        ]);
        let outcome = all.get_timeout(WAIT).unwrap();
        assert!(!outcome.is_present());
        assert_eq!(outcome.diagnostics().len(), 2);
    }

    #[test]
    fn test_cancel_pending_and_resolved() {
        let pending = FutureResult::<u32>::pending();
        assert!(pending.cancel());
        assert!(pending.is_cancelled());
        assert!(pending.progress().is_cancelled());
        assert_eq!(pending.phase(), ExecutionPhase::Cancelled);
        assert!(!pending.complete(Outcome::ok(5)));

        let resolved = FutureResult::of(Outcome::ok(5));
        assert!(!resolved.cancel());
        assert!(!resolved.is_cancelled());
        assert_eq!(value_of(&resolved.get()), Some(5));
    }

    #[test]
    fn test_cancel_after_times_out() {
        let future = FutureResult::<u32>::pending().cancel_after(Duration::from_millis(10));
        let outcome = future.get_timeout(WAIT).unwrap();
        assert!(outcome.is_cancelled());
        assert!(matches!(
            outcome.errors().next(),
            Some(ComputeError::TimedOut(_))
        ));
    }

    #[test]
    fn test_peek_every_stops_after_resolution() {
        let future = FutureResult::<u32>::pending();
        future.progress().set_total_steps(4);
        future.progress().advance(1);
        let (tx, rx) = mpsc::channel();
        future.peek_every(Duration::from_millis(5), move |progress| {
            let _ = tx.send(progress.fraction());
        });
        assert_eq!(rx.recv_timeout(WAIT).unwrap(), 0.25);
        future.complete(Outcome::ok(1));
        std::thread::sleep(Duration::from_millis(30));
        while rx.try_recv().is_ok() {}
        std::thread::sleep(Duration::from_millis(30));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_peek_after_skipped_when_resolved() {
        let future = FutureResult::of(Outcome::ok(1));
        let (tx, rx) = mpsc::channel::<()>();
        future.peek_after(Duration::from_millis(5), move |_| {
            let _ = tx.send(());
        });
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    }

    #[test]
    fn test_peek_after_sees_unresolved_progress() {
        let future = FutureResult::<u32>::pending();
        future.progress().set_total_steps(2);
        future.progress().step();
        let (tx, rx) = mpsc::channel();
        future.peek_after(Duration::from_millis(5), move |progress| {
            let _ = tx.send(progress.fraction());
        });
        assert_eq!(rx.recv_timeout(WAIT).unwrap(), 0.5);
        assert!(!future.is_done());
    }

    #[test]
    fn test_cancel_after_leaves_resolved_future_alone() {
        let future = FutureResult::of(Outcome::ok(9)).cancel_after(Duration::from_millis(5));
        std::thread::sleep(Duration::from_millis(50));
        assert!(!future.is_cancelled());
        assert!(!future.progress().is_cancelled());
        assert_eq!(future.phase(), ExecutionPhase::Succeeded);
        assert_eq!(value_of(&future.get()), Some(9));
    }
}
