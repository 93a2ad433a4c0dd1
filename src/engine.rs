//! Request execution: cache lookup, child fan-out, merge, and node logic.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use crate::cache::Cache;
use crate::computation::{CacheMode, Computation, ComputeMode, ExecutionContext};
use crate::dependency::Value;
use crate::error::ComputeError;
use crate::future::{ExecutionPhase, FutureResult, Join, Promise};
use crate::node::Node;
use crate::outcome::Outcome;
use crate::tracer::{ExecutionResult, SpanId, Tracer, TracerNodeKey};

/// Request `node` in `cache`.
///
/// Returns the cached future on a hit. Otherwise the pending future is
/// published to the cache (when allowed) before anything runs, so concurrent
/// requests for the same node share one execution. Children are requested in
/// slot order with the same `mode` and `ctx`; the node's logic runs once all
/// of them resolved, on the executor for top-level requests and on the
/// resolving thread for requests nested in another node's logic.
pub(crate) fn request<C: Computation>(
    node: &Node<C>,
    cache: &Cache,
    mode: ComputeMode,
    ctx: ExecutionContext,
) -> FutureResult<C::Output> {
    let cache = node.cache().unwrap_or(cache);
    let config = cache.configuration();
    let tracer = config.tracer().clone();
    let any = node.to_any();
    let span = tracer.new_span_id();
    let cacheable = node.behavior().cache_mode() == CacheMode::Policy;

    if mode.lookup && cacheable {
        let hit = cache.hit(&any).and_then(FutureResult::from_erased);
        tracer.on_cache_check(span, TracerNodeKey::of(&any), hit.is_some());
        if let Some(future) = hit {
            tracing::debug!(kind = any.kind(), depth = ctx.depth(), "cache hit");
            tracer.on_compute_end(span, TracerNodeKey::of(&any), ExecutionResult::CacheHit);
            return future;
        }
    }

    let promise = Promise::<C::Output>::new(config.executor().clone());
    let future = FutureResult::from_promise(promise.clone());

    if mode.write && cacheable && config.policy().should_cache(&any, &ctx) {
        match cache.insert(any.clone(), future.erased()) {
            Ok(()) => {
                tracing::debug!(kind = any.kind(), depth = ctx.depth(), "cache write");
                tracer.on_cache_write(span, TracerNodeKey::of(&any));
            }
            Err(existing) => {
                // Lost the race: share the winner's execution.
                if let Some(shared) = FutureResult::from_erased(existing) {
                    cache.count_shared_hit(&any);
                    tracing::debug!(kind = any.kind(), "joined in-flight computation");
                    tracer.on_compute_end(span, TracerNodeKey::of(&any), ExecutionResult::CacheHit);
                    return shared;
                }
            }
        }
    }

    tracer.on_compute_start(span, TracerNodeKey::of(&any));
    tracing::trace!(
        kind = any.kind(),
        children = node.children().len(),
        "requesting children"
    );
    let children: Vec<_> = node
        .children()
        .iter()
        .map(|child| child.request(cache, mode, ctx))
        .collect();

    let task = Task {
        node: node.clone(),
        promise,
        ctx,
        tracer,
        span,
    };
    // A nested request blocks a pool thread while it waits, so its subtree
    // runs on the requesting thread instead of queueing behind it.
    let inline = !ctx.is_top_level();
    let join = Join::new(children.len(), move |outcomes: Vec<Outcome<Value>>| {
        if inline {
            task.run(outcomes);
        } else {
            let executor = task.promise.executor().clone();
            executor.execute(move || task.run(outcomes));
        }
    });
    for (index, child) in children.iter().enumerate() {
        let join = join.clone();
        child.when_resolved(Box::new(move |outcome| join.complete(index, outcome)));
    }

    future
}

/// One invocation of a node's logic, run once its children resolved.
struct Task<C: Computation> {
    node: Node<C>,
    promise: Arc<Promise<C::Output>>,
    ctx: ExecutionContext,
    tracer: Arc<dyn Tracer>,
    span: SpanId,
}

impl<C: Computation> Task<C> {
    fn run(self, children: Vec<Outcome<Value>>) {
        let outcome = self.execute(children);
        let result = if !self.promise.resolve(outcome.clone()) {
            ExecutionResult::Cancelled
        } else if outcome.is_present() {
            ExecutionResult::Computed
        } else if outcome.is_cancelled() {
            ExecutionResult::Cancelled
        } else {
            ExecutionResult::Failed {
                message: outcome
                    .errors()
                    .next()
                    .map(ToString::to_string)
                    .unwrap_or_default(),
            }
        };
        tracing::trace!(kind = self.node.to_any().kind(), ?result, "node resolved");
        self.tracer
            .on_compute_end(self.span, TracerNodeKey::of(&self.node.to_any()), result);
    }

    fn execute(&self, children: Vec<Outcome<Value>>) -> Outcome<Arc<C::Output>> {
        let behavior = self.node.behavior();
        let promise = &self.promise;
        if promise.is_done() {
            return Outcome::cancelled();
        }

        promise.set_phase(ExecutionPhase::MergingChildren);
        let merged = match catch_unwind(AssertUnwindSafe(|| behavior.merge_results(children))) {
            Ok(merged) => merged,
            Err(payload) => {
                promise.mark_faulted();
                return Outcome::error(ComputeError::from_panic(payload));
            }
        };
        let (values, diagnostics) = merged.into_parts();
        let Some(values) = values else {
            return Outcome::failed(diagnostics);
        };

        promise.set_phase(ExecutionPhase::CheckingCancel);
        if promise.progress().is_cancelled() {
            return Outcome::cancelled().after(diagnostics);
        }

        promise.set_phase(ExecutionPhase::Computing);
        let computed = catch_unwind(AssertUnwindSafe(|| {
            self.ctx
                .enter(|| behavior.compute(&values, promise.progress()))
        }));
        match computed {
            Ok(outcome) => outcome.map(Arc::new).after(diagnostics),
            Err(payload) => {
                promise.mark_faulted();
                Outcome::error(ComputeError::from_panic(payload)).after(diagnostics)
            }
        }
    }
}
