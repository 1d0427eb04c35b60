use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use serde_json::json;

use crate::audit::{RouterAudit, RouterAuditEventBuilder, RouterAuditStage};
use crate::component::{ComponentHandle, RouteSnapshot, ViewRenderer};
use crate::error::{Result, RouterError};
use crate::history::{HistoryBackend, HistoryStrategy};
use crate::instruction::LoadOptions;
use crate::logging::{LogLevel, Logger, field_map};
use crate::metrics::RouterMetrics;
use crate::registry::TransitionPlan;
use crate::tree::{RouteNode, RouteTree};
use crate::url::{self, UrlParts};
use crate::viewport::{Candidate, RouteContext};

/// Lifecycle of one transition through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionPhase {
    Pending,
    GuardingUnload,
    GuardingLoad,
    Committing,
    Swapping,
    UpdatingHistory,
    Completed,
    Cancelled,
    Failed,
}

impl TransitionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::GuardingUnload => "guarding-unload",
            Self::GuardingLoad => "guarding-load",
            Self::Committing => "committing",
            Self::Swapping => "swapping",
            Self::UpdatingHistory => "updating-history",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        }
    }
}

/// Suspend once and resume on the next poll. Gives a superseding `load` a
/// window to claim the latest-intent slot between pipeline phases.
pub(crate) fn yield_now() -> YieldNow {
    YieldNow { polled: false }
}

pub(crate) struct YieldNow {
    polled: bool,
}

impl Future for YieldNow {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.polled {
            Poll::Ready(())
        } else {
            self.polled = true;
            cx.waker().wake_by_ref();
            Poll::Pending
        }
    }
}

/// Router-side state the pipeline consults between phases.
pub(crate) trait TransitionHost: Send + Sync {
    /// False once a later `load` has claimed the intent slot.
    fn still_latest(&self, transition_id: u64) -> bool;
    /// Marks the window during which a re-entrant `load` must queue.
    fn set_in_guard(&self, active: bool);
}

pub(crate) struct PipelineEnv<'a> {
    pub renderer: &'a dyn ViewRenderer,
    pub history: &'a dyn HistoryBackend,
    pub logger: Option<&'a Logger>,
    pub audit: &'a dyn RouterAudit,
    pub metrics: Option<&'a Mutex<RouterMetrics>>,
    pub default_plan: TransitionPlan,
    pub default_history: HistoryStrategy,
}

impl PipelineEnv<'_> {
    fn log_phase(&self, transition_id: u64, phase: TransitionPhase) {
        if let Some(logger) = self.logger {
            let mut fields = field_map();
            fields.insert("transition_id".to_string(), json!(transition_id));
            fields.insert("phase".to_string(), json!(phase.as_str()));
            let _ = logger.log_with_fields(
                LogLevel::Debug,
                "pipeline",
                "transition phase entered",
                fields,
            );
        }
    }

    fn audit_guard(&self, stage: RouterAuditStage, component: &str, admitted: bool) {
        let mut builder = RouterAuditEventBuilder::new(stage);
        builder.detail("component", json!(component));
        builder.detail("admitted", json!(admitted));
        self.audit.record(builder.finish());
    }

    fn record_guard_calls(&self, count: usize) {
        if count == 0 {
            return;
        }
        if let Some(metrics) = self.metrics {
            metrics
                .lock()
                .expect("metrics mutex poisoned")
                .record_guard_calls(count);
        }
    }
}

/// How a pipeline run settled; errors surface as `Err` instead.
pub(crate) enum TransitionOutcome {
    Completed { tree: RouteTree, url: UrlParts },
    /// A later load claimed the intent slot between phases.
    Superseded,
    /// A guard answered `false`; not an error.
    Rejected {
        component: String,
        hook: &'static str,
    },
}

/// One viewport slot paired between the previous and next trees.
struct ReconcileOp {
    depth: usize,
    viewport: String,
    host: Arc<RouteContext>,
    prev: Option<(ComponentHandle, RouteSnapshot)>,
    next: Option<(ComponentHandle, RouteSnapshot)>,
    plan: TransitionPlan,
}

fn registry_plan(host: &Arc<RouteContext>) -> Option<TransitionPlan> {
    if let Some(plan) = host.default_plan() {
        return Some(plan);
    }
    let mut cursor = host.parent();
    while let Some(ctx) = cursor {
        if let Some(plan) = ctx.default_plan() {
            return Some(plan);
        }
        cursor = ctx.parent();
    }
    None
}

fn detach_subtree(node: &RouteNode, host: &Arc<RouteContext>, depth: usize, ops: &mut Vec<ReconcileOp>) {
    ops.push(ReconcileOp {
        depth,
        viewport: node.viewport_name.clone(),
        host: host.clone(),
        prev: Some((node.component.clone(), node.snapshot())),
        next: None,
        plan: TransitionPlan::Replace,
    });
    for child in &node.children {
        detach_subtree(child, node.context(), depth + 1, ops);
    }
}

fn attach_subtree(node: &RouteNode, host: &Arc<RouteContext>, depth: usize, ops: &mut Vec<ReconcileOp>) {
    ops.push(ReconcileOp {
        depth,
        viewport: node.viewport_name.clone(),
        host: host.clone(),
        prev: None,
        next: Some((node.component.clone(), node.snapshot())),
        plan: TransitionPlan::Replace,
    });
    for child in &node.children {
        attach_subtree(child, node.context(), depth + 1, ops);
    }
}

/// Pair previous and next nodes per viewport, resolve each pair's plan, and
/// adopt reused instances/contexts into the next tree.
///
/// Precedence, most specific first: per-call override, per-definition plan,
/// registry/ancestor default, global default. A different component always
/// replaces; same component with identical params defaults to no work.
fn reconcile(
    prev_nodes: &[RouteNode],
    next_nodes: &mut [RouteNode],
    host: &Arc<RouteContext>,
    depth: usize,
    call_plan: Option<TransitionPlan>,
    default_plan: TransitionPlan,
    ops: &mut Vec<ReconcileOp>,
) {
    for prev in prev_nodes {
        if !next_nodes
            .iter()
            .any(|n| n.viewport_name == prev.viewport_name)
        {
            detach_subtree(prev, host, depth, ops);
        }
    }
    for next in next_nodes.iter_mut() {
        let prev = prev_nodes
            .iter()
            .find(|p| p.viewport_name == next.viewport_name);
        let candidate = host.classify(&next.viewport_name, next.component_name(), &next.params);
        let prev_snapshot = prev.map(|p| p.snapshot());
        let next_snapshot = next.snapshot();
        let configured = call_plan
            .or_else(|| {
                next.definition
                    .as_ref()
                    .and_then(|def| def.transition_plan.as_ref())
                    .map(|spec| spec.resolve(prev_snapshot.as_ref(), &next_snapshot))
            })
            .or_else(|| registry_plan(host));
        let plan = match candidate {
            Candidate::NoContent | Candidate::DifferentComponent => TransitionPlan::Replace,
            Candidate::SameComponentDifferentParams => configured.unwrap_or(default_plan),
            Candidate::SameComponentSameParams => configured.unwrap_or(TransitionPlan::None),
        };

        match (prev, plan) {
            (Some(prev), TransitionPlan::None | TransitionPlan::InvokeLifecycles) => {
                // Reuse: the next node adopts the live instance and context.
                next.component = prev.component.clone();
                next.context = prev.context.clone();
                ops.push(ReconcileOp {
                    depth,
                    viewport: next.viewport_name.clone(),
                    host: host.clone(),
                    prev: Some((prev.component.clone(), prev_snapshot.clone().unwrap_or_else(|| prev.snapshot()))),
                    next: Some((next.component.clone(), next.snapshot())),
                    plan,
                });
                let adopted = next.context.clone();
                reconcile(
                    &prev.children,
                    &mut next.children,
                    &adopted,
                    depth + 1,
                    call_plan,
                    default_plan,
                    ops,
                );
            }
            (Some(prev), TransitionPlan::Replace) => {
                ops.push(ReconcileOp {
                    depth,
                    viewport: next.viewport_name.clone(),
                    host: host.clone(),
                    prev: Some((prev.component.clone(), prev.snapshot())),
                    next: Some((next.component.clone(), next_snapshot)),
                    plan: TransitionPlan::Replace,
                });
                for child in &prev.children {
                    detach_subtree(child, prev.context(), depth + 1, ops);
                }
                for child in &next.children {
                    attach_subtree(child, next.context(), depth + 1, ops);
                }
            }
            (None, _) => {
                attach_subtree(next, host, depth, ops);
            }
        }
    }
}

fn guard_failure(handle: &ComponentHandle, hook: &'static str, err: RouterError) -> RouterError {
    match err {
        already @ RouterError::GuardFailure { .. } => already,
        other => RouterError::GuardFailure {
            component: handle.name().to_string(),
            hook,
            message: other.to_string(),
        },
    }
}

/// Drive one transition from reconciliation through the history update.
///
/// The committed tree is untouched until the caller stores the returned tree;
/// viewport agents are only mutated during the swap phase.
pub(crate) async fn run(
    env: &PipelineEnv<'_>,
    host: &dyn TransitionHost,
    transition_id: u64,
    prev: &RouteTree,
    mut next: RouteTree,
    options: &LoadOptions,
) -> Result<TransitionOutcome> {
    env.log_phase(transition_id, TransitionPhase::Pending);

    let root_ctx = prev.root.context().clone();
    let mut ops = Vec::new();
    reconcile(
        &prev.root.children,
        &mut next.root.children,
        &root_ctx,
        0,
        options.transition_plan,
        env.default_plan,
        &mut ops,
    );

    let mut guard_calls = 0usize;

    // canUnload walks the outgoing side deepest-first; plan-none slots are
    // skipped entirely.
    env.log_phase(transition_id, TransitionPhase::GuardingUnload);
    let mut unload_order: Vec<&ReconcileOp> = ops
        .iter()
        .filter(|op| op.prev.is_some() && op.plan != TransitionPlan::None)
        .collect();
    unload_order.sort_by(|a, b| b.depth.cmp(&a.depth));
    for op in unload_order {
        let Some((handle, snapshot)) = op.prev.as_ref() else {
            continue;
        };
        if !handle.capabilities().can_unload {
            continue;
        }
        guard_calls += 1;
        host.set_in_guard(true);
        let verdict = handle
            .instance()
            .can_unload(op.next.as_ref().map(|(_, s)| s), snapshot)
            .await;
        host.set_in_guard(false);
        match verdict {
            Ok(admitted) => {
                env.audit_guard(RouterAuditStage::GuardUnloadEvaluated, handle.name(), admitted);
                if !admitted {
                    env.record_guard_calls(guard_calls);
                    return Ok(TransitionOutcome::Rejected {
                        component: handle.name().to_string(),
                        hook: "can_unload",
                    });
                }
            }
            Err(err) => {
                env.audit_guard(RouterAuditStage::GuardUnloadEvaluated, handle.name(), false);
                env.record_guard_calls(guard_calls);
                return Err(guard_failure(handle, "can_unload", err));
            }
        }
    }

    yield_now().await;
    if !host.still_latest(transition_id) {
        env.record_guard_calls(guard_calls);
        return Ok(TransitionOutcome::Superseded);
    }

    // canLoad walks the incoming side shallowest-first.
    env.log_phase(transition_id, TransitionPhase::GuardingLoad);
    let mut load_order: Vec<&ReconcileOp> = ops
        .iter()
        .filter(|op| op.next.is_some() && op.plan != TransitionPlan::None)
        .collect();
    load_order.sort_by_key(|op| op.depth);
    for op in load_order {
        let Some((handle, snapshot)) = op.next.as_ref() else {
            continue;
        };
        if !handle.capabilities().can_load {
            continue;
        }
        guard_calls += 1;
        host.set_in_guard(true);
        let verdict = handle
            .instance()
            .can_load(
                &snapshot.params,
                snapshot,
                op.prev.as_ref().map(|(_, s)| s),
            )
            .await;
        host.set_in_guard(false);
        match verdict {
            Ok(admitted) => {
                env.audit_guard(RouterAuditStage::GuardLoadEvaluated, handle.name(), admitted);
                if !admitted {
                    env.record_guard_calls(guard_calls);
                    return Ok(TransitionOutcome::Rejected {
                        component: handle.name().to_string(),
                        hook: "can_load",
                    });
                }
            }
            Err(err) => {
                env.audit_guard(RouterAuditStage::GuardLoadEvaluated, handle.name(), false);
                env.record_guard_calls(guard_calls);
                return Err(guard_failure(handle, "can_load", err));
            }
        }
    }
    env.record_guard_calls(guard_calls);

    yield_now().await;
    if !host.still_latest(transition_id) {
        return Ok(TransitionOutcome::Superseded);
    }

    // Past this point the transition can no longer be superseded.
    env.log_phase(transition_id, TransitionPhase::Committing);

    env.log_phase(transition_id, TransitionPhase::Swapping);
    let mut detach_order: Vec<&ReconcileOp> = ops
        .iter()
        .filter(|op| op.prev.is_some() && op.plan == TransitionPlan::Replace)
        .collect();
    detach_order.sort_by(|a, b| b.depth.cmp(&a.depth));
    for op in detach_order {
        if let Some((_, snapshot)) = op.prev.as_ref() {
            env.renderer.detach(snapshot);
            if op.next.is_none() {
                op.host.clear_occupant(&op.viewport);
            }
        }
    }
    let mut attach_order: Vec<&ReconcileOp> = ops.iter().filter(|op| op.next.is_some()).collect();
    attach_order.sort_by_key(|op| op.depth);
    for op in attach_order {
        let Some((handle, snapshot)) = op.next.as_ref() else {
            continue;
        };
        match op.plan {
            TransitionPlan::Replace => {
                env.renderer.attach(snapshot);
                op.host
                    .set_occupant(&op.viewport, handle.clone(), snapshot.params.clone());
            }
            TransitionPlan::InvokeLifecycles => {
                if handle.capabilities().loading {
                    handle
                        .instance()
                        .loading(
                            &snapshot.params,
                            snapshot,
                            op.prev.as_ref().map(|(_, s)| s),
                        )
                        .await
                        .map_err(|err| guard_failure(handle, "loading", err))?;
                }
                op.host
                    .set_occupant(&op.viewport, handle.clone(), snapshot.params.clone());
            }
            TransitionPlan::None => {}
        }
    }
    env.audit.record(
        RouterAuditEventBuilder::new(RouterAuditStage::ViewportsSwapped).finish(),
    );

    env.log_phase(transition_id, TransitionPhase::UpdatingHistory);
    let url = url::serialize(&next)?;
    let strategy = options.history_strategy.unwrap_or(env.default_history);
    let state = json!({ "transition": transition_id, "path": url.path });
    match strategy {
        HistoryStrategy::Push => env.history.push(&url.href(), state)?,
        HistoryStrategy::Replace => env.history.replace(&url.href(), state)?,
        HistoryStrategy::None => {}
    }
    let mut history_event = RouterAuditEventBuilder::new(RouterAuditStage::HistoryUpdated);
    history_event.detail("url", json!(url.href()));
    env.audit.record(history_event.finish());

    Ok(TransitionOutcome::Completed { tree: next, url })
}
