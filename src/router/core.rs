use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use futures::channel::oneshot;
use serde_json::json;

use crate::audit::{NullRouterAudit, RouterAudit, RouterAuditEventBuilder, RouterAuditStage};
use crate::component::{NullRenderer, ViewRenderer};
use crate::error::{Result, RouterError};
use crate::history::{HistoryBackend, HistoryStrategy, InMemoryHistory};
use crate::instruction::{
    ComponentRef, LoadOptions, NavigationInput, ViewportInstruction, normalize,
};
use crate::logging::{LogLevel, Logger, field_map};
use crate::metrics::{MetricSnapshot, RouterMetrics};
use crate::pipeline::{self, PipelineEnv, TransitionHost, TransitionOutcome};
use crate::recognizer::Params;
use crate::registry::{FallbackSpec, Registry, RouteDefinition, TransitionPlan, ViewportConfig};
use crate::tree::{RouteNode, RouteTree, TreeBuilder};
use crate::url::{self, UrlParts};
use crate::viewport::{NavModelEntry, RouteContext};

/// Router construction options; collaborators default to in-process no-ops.
pub struct RouterConfig {
    pub default_transition_plan: TransitionPlan,
    pub default_history_strategy: HistoryStrategy,
    /// Viewports hosted directly by the application root.
    pub root_viewports: Vec<ViewportConfig>,
    /// Root registry fallback for unmatched instructions.
    pub fallback: Option<FallbackSpec>,
    pub logger: Option<Logger>,
    pub collect_metrics: bool,
    pub audit: Arc<dyn RouterAudit>,
    pub renderer: Arc<dyn ViewRenderer>,
    pub history: Arc<dyn HistoryBackend>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            default_transition_plan: TransitionPlan::InvokeLifecycles,
            default_history_strategy: HistoryStrategy::Push,
            root_viewports: Vec::new(),
            fallback: None,
            logger: None,
            collect_metrics: false,
            audit: Arc::new(NullRouterAudit),
            renderer: Arc::new(NullRenderer),
            history: Arc::new(InMemoryHistory::new()),
        }
    }
}

impl RouterConfig {
    pub fn with_fallback(mut self, component: impl Into<String>) -> Self {
        self.fallback = Some(FallbackSpec::Component(component.into()));
        self
    }

    pub fn with_root_viewports(mut self, viewports: Vec<ViewportConfig>) -> Self {
        self.root_viewports = viewports;
        self
    }

    pub fn with_logger(mut self, logger: Logger) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn with_metrics(mut self) -> Self {
        self.collect_metrics = true;
        self
    }
}

struct QueuedLoad {
    input: NavigationInput,
    options: LoadOptions,
    notify: oneshot::Sender<Result<bool>>,
}

struct RouterState {
    current_tree: RouteTree,
    next_id: u64,
    /// Transition id of the most recent `load`; anything older is stale.
    latest_intent: u64,
    active: Option<u64>,
    /// Set while a guard hook is being awaited; re-entrant loads queue.
    in_guard: bool,
    queued: VecDeque<QueuedLoad>,
    waiters: Vec<oneshot::Sender<()>>,
}

struct RouterInner {
    config: RouterConfig,
    root_ctx: Arc<RouteContext>,
    metrics: Option<Mutex<RouterMetrics>>,
    state: Mutex<RouterState>,
    started: Instant,
}

impl RouterInner {
    fn state(&self) -> MutexGuard<'_, RouterState> {
        self.state.lock().expect("router state mutex poisoned")
    }
}

impl TransitionHost for RouterInner {
    fn still_latest(&self, transition_id: u64) -> bool {
        self.state().latest_intent == transition_id
    }

    fn set_in_guard(&self, active: bool) {
        self.state().in_guard = active;
    }
}

enum Admission {
    Queued(oneshot::Receiver<Result<bool>>),
    Claimed {
        id: u64,
        input: NavigationInput,
        options: LoadOptions,
    },
}

/// The navigation engine aggregate. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Router {
    inner: Arc<RouterInner>,
}

impl Router {
    pub fn new(definitions: Vec<RouteDefinition>, config: RouterConfig) -> Result<Self> {
        let mut registry = Registry::with_definitions(definitions)?;
        if let Some(fallback) = config.fallback.clone() {
            registry.set_fallback(fallback);
        }
        let root_ctx = RouteContext::root(registry, &config.root_viewports);
        let metrics = config.collect_metrics.then(|| Mutex::new(RouterMetrics::new()));
        let current_tree = RouteTree::empty(root_ctx.clone());
        Ok(Self {
            inner: Arc::new(RouterInner {
                config,
                root_ctx,
                metrics,
                state: Mutex::new(RouterState {
                    current_tree,
                    next_id: 0,
                    latest_intent: 0,
                    active: None,
                    in_guard: false,
                    queued: VecDeque::new(),
                    waiters: Vec::new(),
                }),
                started: Instant::now(),
            }),
        })
    }

    /// Navigate. Resolves `Ok(true)` on commit, `Ok(false)` when cancelled by
    /// a guard or superseded by a later call; configuration and hook errors
    /// reject.
    ///
    /// Calling from inside a guard hook queues the navigation; it runs after
    /// the in-flight transition settles.
    pub async fn load(
        &self,
        input: impl Into<NavigationInput>,
        options: LoadOptions,
    ) -> Result<bool> {
        let input = input.into();
        let admission = {
            let mut state = self.inner.state();
            if state.in_guard {
                let (notify, receiver) = oneshot::channel();
                state.queued.push_back(QueuedLoad {
                    input,
                    options,
                    notify,
                });
                Admission::Queued(receiver)
            } else {
                state.next_id += 1;
                let id = state.next_id;
                state.latest_intent = id;
                Admission::Claimed { id, input, options }
            }
        };
        match admission {
            Admission::Queued(receiver) => receiver.await.unwrap_or(Ok(false)),
            Admission::Claimed { id, input, options } => {
                let result = self.drive(id, input, options).await;
                self.drain_queue().await;
                result
            }
        }
    }

    /// Re-entrant navigation for history traversal; never touches history.
    pub async fn pop(&self, path: &str) -> Result<bool> {
        self.load(
            path,
            LoadOptions::default().with_history_strategy(HistoryStrategy::None),
        )
        .await
    }

    pub async fn back(&self) -> Result<bool> {
        match self.inner.config.history.back() {
            Some(url) => self.pop(&url).await,
            None => Ok(false),
        }
    }

    pub async fn forward(&self) -> Result<bool> {
        match self.inner.config.history.forward() {
            Some(url) => self.pop(&url).await,
            None => Ok(false),
        }
    }

    pub fn is_navigating(&self) -> bool {
        self.inner.state().active.is_some()
    }

    pub fn current_tree(&self) -> RouteTree {
        self.inner.state().current_tree.clone()
    }

    pub fn current_url(&self) -> Result<UrlParts> {
        url::serialize(&self.inner.state().current_tree)
    }

    /// Root-registry navigation model, refreshed on every commit.
    pub fn nav_model(&self) -> Vec<NavModelEntry> {
        self.inner.root_ctx.nav_model()
    }

    pub fn metrics_snapshot(&self) -> Option<MetricSnapshot> {
        self.inner.metrics.as_ref().map(|metrics| {
            metrics
                .lock()
                .expect("metrics mutex poisoned")
                .snapshot(self.inner.started.elapsed())
        })
    }

    /// Containment check against the committed tree.
    ///
    /// Order-sensitive across siblings: each instruction must match at or
    /// after the position where the previous one matched, so `a+b` and `b+a`
    /// are distinct queries when the siblings sit in different viewports.
    pub fn is_active(&self, input: impl Into<NavigationInput>) -> bool {
        let Ok(normalized) = normalize(input.into()) else {
            return false;
        };
        let state = self.inner.state();
        siblings_active(
            &self.inner.root_ctx,
            &normalized.instructions,
            &state.current_tree.root.children,
        )
    }

    /// Like [`Router::is_active`], but resolved against the committed node
    /// hosting `context` instead of the root. Stale contexts (no longer part
    /// of the committed tree) report inactive.
    pub fn is_active_in(
        &self,
        input: impl Into<NavigationInput>,
        context: &Arc<RouteContext>,
    ) -> bool {
        let Ok(normalized) = normalize(input.into()) else {
            return false;
        };
        let state = self.inner.state();
        let Some(node) = find_by_context(&state.current_tree.root, context) else {
            return false;
        };
        siblings_active(context, &normalized.instructions, &node.children)
    }

    async fn drive(
        &self,
        id: u64,
        input: NavigationInput,
        options: LoadOptions,
    ) -> Result<bool> {
        loop {
            let waiter = {
                let mut state = self.inner.state();
                if state.latest_intent != id {
                    // Superseded before it even started.
                    return Ok(false);
                }
                if state.active.is_none() {
                    state.active = Some(id);
                    None
                } else {
                    let (sender, receiver) = oneshot::channel();
                    state.waiters.push(sender);
                    Some(receiver)
                }
            };
            match waiter {
                None => break,
                Some(receiver) => {
                    let _ = receiver.await;
                }
            }
        }

        let result = self.run_transition(id, input, &options).await;

        let mut state = self.inner.state();
        state.active = None;
        for waiter in state.waiters.drain(..) {
            let _ = waiter.send(());
        }
        drop(state);
        result
    }

    async fn run_transition(
        &self,
        id: u64,
        input: NavigationInput,
        options: &LoadOptions,
    ) -> Result<bool> {
        let description = input.describe();
        self.with_metrics(|metrics| metrics.record_transition());
        self.audit(RouterAuditStage::TransitionStarted, |event| {
            event.detail("transition_id", json!(id));
            event.detail("instruction", json!(description.clone()));
        });
        self.log(LogLevel::Info, "navigation started", &description, id);

        match self.execute(id, input, options).await {
            Ok(TransitionOutcome::Completed { url, .. }) => {
                self.with_metrics(|metrics| metrics.record_completed());
                self.audit(RouterAuditStage::TransitionCompleted, |event| {
                    event.detail("transition_id", json!(id));
                    event.detail("url", json!(url.href()));
                });
                self.log(LogLevel::Info, "navigation committed", &url.href(), id);
                Ok(true)
            }
            Ok(TransitionOutcome::Superseded) => {
                self.with_metrics(|metrics| metrics.record_cancelled());
                self.audit(RouterAuditStage::TransitionCancelled, |event| {
                    event.detail("transition_id", json!(id));
                    event.detail("reason", json!("superseded"));
                });
                self.log(LogLevel::Debug, "navigation superseded", &description, id);
                Ok(false)
            }
            Ok(TransitionOutcome::Rejected { component, hook }) => {
                self.with_metrics(|metrics| metrics.record_cancelled());
                self.audit(RouterAuditStage::TransitionCancelled, |event| {
                    event.detail("transition_id", json!(id));
                    event.detail("reason", json!("guard-refused"));
                    event.detail("component", json!(component.clone()));
                    event.detail("hook", json!(hook));
                });
                self.log(LogLevel::Info, "navigation refused by guard", &component, id);
                Ok(false)
            }
            Err(err) => {
                self.with_metrics(|metrics| metrics.record_failed());
                self.audit(RouterAuditStage::TransitionFailed, |event| {
                    event.detail("transition_id", json!(id));
                    event.detail("error", json!(err.to_string()));
                });
                self.log(LogLevel::Warn, "navigation failed", &err.to_string(), id);
                Err(err)
            }
        }
    }

    async fn execute(
        &self,
        id: u64,
        input: NavigationInput,
        options: &LoadOptions,
    ) -> Result<TransitionOutcome> {
        let normalized = normalize(input)?;
        let mut query = normalized.query;
        for (key, value) in &options.query_params {
            query.insert(key.clone(), value.clone());
        }
        let fragment = options.fragment.clone().or(normalized.fragment);

        let prev = self.inner.state().current_tree.clone();
        let base_ctx = options.context.as_ref().unwrap_or(&self.inner.root_ctx);
        let builder = TreeBuilder::new();
        let built = builder
            .build(base_ctx, normalized.instructions, query, fragment)
            .await?;
        let next = match &options.context {
            None => built,
            Some(ctx) => graft_subtree(&prev, ctx, built)?,
        };
        self.with_metrics(|metrics| {
            for _ in 0..builder.redirects() {
                metrics.record_redirect();
            }
            for _ in 0..builder.fallbacks() {
                metrics.record_fallback();
            }
        });

        let env = PipelineEnv {
            renderer: self.inner.config.renderer.as_ref(),
            history: self.inner.config.history.as_ref(),
            logger: self.inner.config.logger.as_ref(),
            audit: self.inner.config.audit.as_ref(),
            metrics: self.inner.metrics.as_ref(),
            default_plan: self.inner.config.default_transition_plan,
            default_history: self.inner.config.default_history_strategy,
        };
        let outcome = pipeline::run(&env, self.inner.as_ref(), id, &prev, next, options).await?;

        if let TransitionOutcome::Completed { tree, url } = outcome {
            self.inner.state().current_tree = tree.clone();
            self.refresh_nav_models(&tree);
            self.audit(RouterAuditStage::TreeCommitted, |event| {
                event.detail("transition_id", json!(id));
                event.detail("url", json!(url.href()));
            });
            return Ok(TransitionOutcome::Completed { tree, url });
        }
        Ok(outcome)
    }

    /// Replay loads queued from inside guard hooks, oldest first. Each claims
    /// the intent slot like a fresh call.
    async fn drain_queue(&self) {
        loop {
            let queued = self.inner.state().queued.pop_front();
            let Some(queued) = queued else {
                break;
            };
            let id = {
                let mut state = self.inner.state();
                state.next_id += 1;
                let id = state.next_id;
                state.latest_intent = id;
                id
            };
            self.audit(RouterAuditStage::QueuedLoadDrained, |event| {
                event.detail("transition_id", json!(id));
                event.detail("instruction", json!(queued.input.describe()));
            });
            let result = self.drive(id, queued.input, queued.options).await;
            let _ = queued.notify.send(result);
        }
    }

    fn refresh_nav_models(&self, tree: &RouteTree) {
        fn active_names(nodes: &[RouteNode]) -> Vec<String> {
            nodes
                .iter()
                .map(|node| node.definition_name().to_string())
                .collect()
        }
        fn walk(node: &RouteNode) {
            node.context().refresh_nav_model(&active_names(&node.children));
            for child in &node.children {
                walk(child);
            }
        }
        self.inner
            .root_ctx
            .refresh_nav_model(&active_names(&tree.root.children));
        for child in &tree.root.children {
            walk(child);
        }
    }

    fn with_metrics(&self, f: impl FnOnce(&mut RouterMetrics)) {
        if let Some(metrics) = &self.inner.metrics {
            f(&mut metrics.lock().expect("metrics mutex poisoned"));
        }
    }

    fn audit(
        &self,
        stage: RouterAuditStage,
        details: impl FnOnce(&mut RouterAuditEventBuilder),
    ) {
        let mut builder = RouterAuditEventBuilder::new(stage);
        details(&mut builder);
        self.inner.config.audit.record(builder.finish());
    }

    fn log(&self, level: LogLevel, message: &str, subject: &str, id: u64) {
        if let Some(logger) = &self.inner.config.logger {
            let mut fields = field_map();
            fields.insert("transition_id".to_string(), json!(id));
            fields.insert("subject".to_string(), json!(subject));
            let _ = logger.log_with_fields(level, "router", message, fields);
        }
    }
}

/// Committed node whose context is `ctx`, searched depth-first.
fn find_by_context<'a>(node: &'a RouteNode, ctx: &Arc<RouteContext>) -> Option<&'a RouteNode> {
    if Arc::ptr_eq(node.context(), ctx) {
        return Some(node);
    }
    node.children
        .iter()
        .find_map(|child| find_by_context(child, ctx))
}

/// Splice a context-scoped build result into the committed tree.
///
/// The node hosting `ctx` keeps its own identity and params; only its
/// children are replaced, so the pipeline classifies every untouched ancestor
/// as same-component-same-params and skips it.
fn graft_subtree(prev: &RouteTree, ctx: &Arc<RouteContext>, sub: RouteTree) -> Result<RouteTree> {
    fn splice(node: &mut RouteNode, ctx: &Arc<RouteContext>, payload: &mut Option<Vec<RouteNode>>) -> bool {
        if Arc::ptr_eq(node.context(), ctx) {
            if let Some(children) = payload.take() {
                node.children = children;
            }
            return true;
        }
        node.children
            .iter_mut()
            .any(|child| splice(child, ctx, payload))
    }

    let mut tree = prev.clone();
    tree.query = sub.query;
    tree.fragment = sub.fragment;
    let mut payload = Some(sub.root.children);
    if splice(&mut tree.root, ctx, &mut payload) {
        Ok(tree)
    } else {
        Err(RouterError::configuration(
            "load",
            "navigation context is not part of the committed tree",
        ))
    }
}

fn params_subset(expected: &Params, actual: &Params) -> bool {
    expected
        .iter()
        .all(|(key, value)| actual.get(key) == Some(value))
}

fn children_active(node: &RouteNode, instructions: &[ViewportInstruction]) -> bool {
    instructions.is_empty()
        || siblings_active(node.context(), instructions, &node.children)
}

fn siblings_active(
    ctx: &Arc<RouteContext>,
    instructions: &[ViewportInstruction],
    nodes: &[RouteNode],
) -> bool {
    let mut cursor = 0usize;
    for instruction in instructions {
        let found = nodes[cursor..]
            .iter()
            .position(|node| instruction_active(ctx, instruction, node));
        match found {
            Some(offset) => cursor += offset + 1,
            None => return false,
        }
    }
    true
}

fn instruction_active(
    ctx: &Arc<RouteContext>,
    instruction: &ViewportInstruction,
    node: &RouteNode,
) -> bool {
    if let Some(viewport) = &instruction.viewport {
        if *viewport != node.viewport_name {
            return false;
        }
    }
    match &instruction.component {
        ComponentRef::Path(path) => {
            let path = path.trim_matches('/');
            let Some((rec, remainder, def)) = ctx.recognize_prefix(path) else {
                return false;
            };
            if node.definition_name() != def.name() {
                return false;
            }
            if !params_subset(&rec.params, &node.params) {
                return false;
            }
            if !remainder.is_empty() {
                let rest = ViewportInstruction::path(remainder);
                if !siblings_active(node.context(), std::slice::from_ref(&rest), &node.children) {
                    return false;
                }
            }
            children_active(node, &instruction.children)
        }
        ComponentRef::Named(name) => {
            (node.definition_name() == name || node.component_name() == name)
                && params_subset(&instruction.params, &node.params)
                && children_active(node, &instruction.children)
        }
        ComponentRef::Definition(def) => {
            node.definition_name() == def.name()
                && params_subset(&instruction.params, &node.params)
                && children_active(node, &instruction.children)
        }
        ComponentRef::Source(source) => {
            node.component_name() == source.name()
                && params_subset(&instruction.params, &node.params)
                && children_active(node, &instruction.children)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::{
        Capabilities, ComponentFactory, ComponentSource, RouteComponent, RouteSnapshot,
        StaticComponent,
    };
    use crate::error::RouterError;
    use crate::history::{FailingHistory, HistoryChange};
    use crate::logging::MemorySink;
    use async_trait::async_trait;
    use futures::executor::block_on;
    use serde_json::Value;

    /// Records guard invocations as "<hook>:<name>" in call order.
    struct Recorder {
        name: String,
        log: Arc<Mutex<Vec<String>>>,
        admit: bool,
    }

    #[async_trait]
    impl RouteComponent for Recorder {
        fn name(&self) -> &str {
            &self.name
        }
        fn capabilities(&self) -> Capabilities {
            Capabilities::guards_only()
        }
        async fn can_unload(
            &self,
            _next: Option<&RouteSnapshot>,
            _current: &RouteSnapshot,
        ) -> Result<bool> {
            self.log
                .lock()
                .unwrap()
                .push(format!("can_unload:{}", self.name));
            Ok(self.admit)
        }
        async fn can_load(
            &self,
            _params: &Params,
            _next: &RouteSnapshot,
            _current: Option<&RouteSnapshot>,
        ) -> Result<bool> {
            self.log
                .lock()
                .unwrap()
                .push(format!("can_load:{}", self.name));
            Ok(self.admit)
        }
    }

    fn recorder_def(
        path: &str,
        name: &str,
        log: &Arc<Mutex<Vec<String>>>,
        admit: bool,
    ) -> RouteDefinition {
        let log = log.clone();
        let owned = name.to_string();
        RouteDefinition::for_component(path, name, move || Recorder {
            name: owned.clone(),
            log: log.clone(),
            admit,
        })
    }

    fn static_def(path: &str, name: &str) -> RouteDefinition {
        let owned = name.to_string();
        RouteDefinition::for_component(path, name, move || StaticComponent::new(owned.clone()))
    }

    fn load(router: &Router, input: &str) -> Result<bool> {
        block_on(router.load(input, LoadOptions::default()))
    }

    #[derive(Default)]
    struct EventLog(Mutex<Vec<String>>);

    impl EventLog {
        fn push(&self, entry: String) {
            self.0.lock().unwrap().push(entry);
        }
        fn entries(&self) -> Vec<String> {
            self.0.lock().unwrap().clone()
        }
    }

    struct LoggingRenderer(Arc<EventLog>);

    impl ViewRenderer for LoggingRenderer {
        fn attach(&self, node: &RouteSnapshot) {
            self.0.push(format!("attach:{}", node.component));
        }
        fn detach(&self, node: &RouteSnapshot) {
            self.0.push(format!("detach:{}", node.component));
        }
    }

    struct LoggingHistory(Arc<EventLog>);

    impl HistoryBackend for LoggingHistory {
        fn push(&self, url: &str, _state: Value) -> Result<()> {
            self.0.push(format!("push:{url}"));
            Ok(())
        }
        fn replace(&self, url: &str, _state: Value) -> Result<()> {
            self.0.push(format!("replace:{url}"));
            Ok(())
        }
        fn back(&self) -> Option<String> {
            None
        }
        fn forward(&self) -> Option<String> {
            None
        }
        fn len(&self) -> usize {
            0
        }
        fn current(&self) -> Option<(String, Value)> {
            None
        }
    }

    #[derive(Default)]
    struct CaptureAudit {
        stages: Mutex<Vec<RouterAuditStage>>,
    }

    impl RouterAudit for CaptureAudit {
        fn record(&self, event: crate::audit::RouterAuditEvent) {
            self.stages.lock().unwrap().push(event.stage);
        }
    }

    #[test]
    fn switching_roots_fires_unload_once_and_commits() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let router = Router::new(
            vec![recorder_def("a", "a", &log, true), recorder_def("b", "b", &log, true)],
            RouterConfig::default(),
        )
        .unwrap();
        assert!(load(&router, "a").unwrap());
        assert!(load(&router, "b").unwrap());
        let calls = log.lock().unwrap();
        assert_eq!(calls.iter().filter(|c| *c == "can_unload:a").count(), 1);
        drop(calls);
        let tree = router.current_tree();
        assert_eq!(tree.root.children.len(), 1);
        assert_eq!(tree.root.children[0].component_name(), "b");
    }

    #[test]
    fn unmatched_path_resolves_through_fallback() {
        let router = Router::new(
            vec![static_def("a", "a")],
            RouterConfig::default().with_fallback("a"),
        )
        .unwrap();
        assert!(load(&router, "nonexistent").unwrap());
        assert_eq!(router.current_tree().root.children[0].component_name(), "a");
    }

    #[test]
    fn siblings_attach_before_history_update() {
        let events = Arc::new(EventLog::default());
        let mut config = RouterConfig::default();
        config.renderer = Arc::new(LoggingRenderer(events.clone()));
        config.history = Arc::new(LoggingHistory(events.clone()));
        let router = Router::new(
            vec![static_def("a", "a"), static_def("b", "b")],
            config,
        )
        .unwrap();
        assert!(load(&router, "a+b").unwrap());
        assert_eq!(
            events.entries(),
            vec!["attach:a", "attach:b", "push:a+b"]
        );
        let tree = router.current_tree();
        assert_eq!(tree.root.children.len(), 2);
        assert_ne!(
            tree.root.children[0].viewport_name,
            tree.root.children[1].viewport_name
        );
    }

    #[test]
    fn named_load_generates_path_and_query_from_params() {
        let router = Router::new(vec![static_def("p/:id", "p")], RouterConfig::default()).unwrap();
        let instruction = ViewportInstruction::named("p")
            .with_param("id", "5")
            .with_param("extra", "9");
        assert!(block_on(router.load(instruction, LoadOptions::default())).unwrap());
        assert_eq!(router.current_url().unwrap().href(), "p/5?extra=9");
    }

    #[test]
    fn replace_plan_recreates_instance_per_load() {
        let router = Router::new(
            vec![static_def("a/:id", "a").with_transition_plan(TransitionPlan::Replace)],
            RouterConfig::default(),
        )
        .unwrap();
        assert!(load(&router, "a/1").unwrap());
        let first = router.current_tree().find("a").unwrap().component.instance_id();
        assert!(load(&router, "a/2").unwrap());
        let second = router.current_tree().find("a").unwrap().component.instance_id();
        assert_ne!(first, second);
    }

    #[test]
    fn later_load_supersedes_earlier() {
        let router = Router::new(
            vec![static_def("a", "a"), static_def("b", "b")],
            RouterConfig::default(),
        )
        .unwrap();
        let (first, second) = block_on(async {
            futures::join!(
                router.load("a", LoadOptions::default()),
                router.load("b", LoadOptions::default()),
            )
        });
        assert!(!first.unwrap());
        assert!(second.unwrap());
        assert_eq!(router.current_tree().root.children[0].component_name(), "b");
        assert!(!router.is_navigating());
    }

    struct GuardLoader {
        router: Arc<Mutex<Option<Router>>>,
    }

    #[async_trait]
    impl RouteComponent for GuardLoader {
        fn name(&self) -> &str {
            "gl"
        }
        fn capabilities(&self) -> Capabilities {
            Capabilities {
                can_load: true,
                ..Capabilities::default()
            }
        }
        async fn can_load(
            &self,
            _params: &Params,
            _next: &RouteSnapshot,
            _current: Option<&RouteSnapshot>,
        ) -> Result<bool> {
            let router = self.router.lock().unwrap().clone();
            if let Some(router) = router {
                // Start the nested load but do not await its settlement; it
                // queues and replays after this transition finishes.
                let mut nested = Box::pin(router.load("b", LoadOptions::default()));
                let _ = futures::poll!(nested.as_mut());
            }
            Ok(true)
        }
    }

    #[test]
    fn load_during_guard_hook_queues_until_settled() {
        let slot: Arc<Mutex<Option<Router>>> = Arc::new(Mutex::new(None));
        let captured = slot.clone();
        let defs = vec![
            RouteDefinition::for_component("gl", "gl", move || GuardLoader {
                router: captured.clone(),
            }),
            static_def("b", "b"),
        ];
        let router = Router::new(defs, RouterConfig::default()).unwrap();
        *slot.lock().unwrap() = Some(router.clone());
        assert!(load(&router, "gl").unwrap());
        // The queued load replayed after the guard transition settled.
        assert_eq!(router.current_tree().root.children[0].component_name(), "b");
    }

    #[test]
    fn history_strategies_push_replace_none() {
        let history = Arc::new(InMemoryHistory::new());
        let mut config = RouterConfig::default();
        config.history = history.clone();
        let router = Router::new(
            vec![static_def("a", "a"), static_def("b", "b"), static_def("c", "c")],
            config,
        )
        .unwrap();
        assert!(load(&router, "a").unwrap());
        assert!(block_on(router.load(
            "b",
            LoadOptions::default().with_history_strategy(HistoryStrategy::Replace),
        ))
        .unwrap());
        assert!(block_on(router.pop("c")).unwrap());
        assert_eq!(history.urls(), vec!["b"]);
        assert_eq!(
            history.take_changes(),
            vec![
                HistoryChange::Pushed("a".into()),
                HistoryChange::Replaced("b".into()),
            ]
        );
        assert_eq!(router.current_tree().root.children[0].component_name(), "c");
    }

    #[test]
    fn is_active_is_order_sensitive_across_viewports() {
        let router = Router::new(
            vec![static_def("a", "a"), static_def("b", "b")],
            RouterConfig::default(),
        )
        .unwrap();
        assert!(load(&router, "a+b").unwrap());
        assert!(router.is_active("a"));
        assert!(router.is_active("b"));
        assert!(router.is_active("a+b"));
        assert!(!router.is_active("b+a"));
        assert!(!router.is_active("c"));
    }

    #[test]
    fn is_active_checks_params_and_descendants() {
        let router = Router::new(
            vec![static_def("p/:id", "p").with_routes(vec![static_def("detail", "detail")])],
            RouterConfig::default(),
        )
        .unwrap();
        assert!(load(&router, "p/5/detail").unwrap());
        assert!(router.is_active("p/5"));
        assert!(router.is_active("p/5/detail"));
        assert!(!router.is_active("p/6"));
    }

    #[test]
    fn serialized_url_reloads_to_an_equivalent_tree() {
        let router = Router::new(
            vec![static_def("p/:id", "p").with_routes(vec![static_def("detail", "detail")])],
            RouterConfig::default(),
        )
        .unwrap();
        assert!(block_on(router.load(
            "p/5/detail",
            LoadOptions::default().with_query("x", "1").with_fragment("f"),
        ))
        .unwrap());
        let href = router.current_url().unwrap().href();
        assert_eq!(href, "p/5/detail?x=1#f");

        assert!(load(&router, &href).unwrap());
        let tree = router.current_tree();
        let parent = tree.find("p").unwrap();
        assert_eq!(parent.params.get("id").unwrap(), "5");
        assert_eq!(parent.children[0].component_name(), "detail");
        assert_eq!(router.current_url().unwrap().href(), href);
    }

    #[test]
    fn metrics_and_audit_observe_the_lifecycle() {
        let audit = Arc::new(CaptureAudit::default());
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut config = RouterConfig::default().with_metrics();
        config.audit = audit.clone();
        let router = Router::new(
            vec![static_def("a", "a"), recorder_def("r", "r", &log, false)],
            config,
        )
        .unwrap();
        assert!(load(&router, "a").unwrap());
        assert!(!load(&router, "r").unwrap());

        let snapshot = router.metrics_snapshot().unwrap();
        assert_eq!(snapshot.transitions, 2);
        assert_eq!(snapshot.completed, 1);
        assert_eq!(snapshot.cancelled, 1);
        assert_eq!(snapshot.failed, 0);

        let stages = audit.stages.lock().unwrap();
        assert!(stages.contains(&RouterAuditStage::TransitionStarted));
        assert!(stages.contains(&RouterAuditStage::TreeCommitted));
        assert!(stages.contains(&RouterAuditStage::TransitionCompleted));
        assert!(stages.contains(&RouterAuditStage::TransitionCancelled));
    }

    #[test]
    fn nav_model_marks_active_entry_after_commit() {
        let router = Router::new(
            vec![static_def("a", "a").with_title("Alpha"), static_def("b", "b")],
            RouterConfig::default(),
        )
        .unwrap();
        assert!(load(&router, "a").unwrap());
        let model = router.nav_model();
        assert_eq!(model.len(), 2);
        assert!(model[0].is_active);
        assert_eq!(model[0].title.as_deref(), Some("Alpha"));
        assert!(!model[1].is_active);
    }

    struct Exploding;

    #[async_trait]
    impl RouteComponent for Exploding {
        fn name(&self) -> &str {
            "x"
        }
        fn capabilities(&self) -> Capabilities {
            Capabilities {
                can_load: true,
                ..Capabilities::default()
            }
        }
        async fn can_load(
            &self,
            _params: &Params,
            _next: &RouteSnapshot,
            _current: Option<&RouteSnapshot>,
        ) -> Result<bool> {
            Err(RouterError::generation("x", "boom"))
        }
    }

    #[test]
    fn hook_error_fails_and_preserves_committed_tree() {
        let router = Router::new(
            vec![
                static_def("a", "a"),
                RouteDefinition::for_component("x", "x", || Exploding),
            ],
            RouterConfig::default(),
        )
        .unwrap();
        assert!(load(&router, "a").unwrap());
        let err = load(&router, "x").unwrap_err();
        assert!(matches!(err, RouterError::GuardFailure { hook: "can_load", .. }));
        assert_eq!(router.current_tree().root.children[0].component_name(), "a");
        assert_eq!(router.current_url().unwrap().href(), "a");
    }

    #[test]
    fn logger_receives_structured_events() {
        let sink = Arc::new(MemorySink::new());
        let config = RouterConfig::default().with_logger(Logger::new(sink.clone()));
        let router = Router::new(vec![static_def("a", "a")], config).unwrap();
        assert!(load(&router, "a").unwrap());
        let events = sink.drain();
        assert!(events.iter().any(|e| e.target == "router"));
        assert!(events.iter().any(|e| e.target == "pipeline"));
    }

    #[test]
    fn back_and_forward_replay_history_entries() {
        let history = Arc::new(InMemoryHistory::new());
        let mut config = RouterConfig::default();
        config.history = history.clone();
        let router = Router::new(
            vec![static_def("a", "a"), static_def("b", "b")],
            config,
        )
        .unwrap();
        assert!(load(&router, "a").unwrap());
        assert!(load(&router, "b").unwrap());
        assert!(block_on(router.back()).unwrap());
        assert_eq!(router.current_tree().root.children[0].component_name(), "a");
        assert!(block_on(router.forward()).unwrap());
        assert_eq!(router.current_tree().root.children[0].component_name(), "b");
        // Traversal itself never writes new entries.
        assert_eq!(history.urls(), vec!["a", "b"]);
    }

    #[test]
    fn context_scoped_load_swaps_only_that_subtree() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let router = Router::new(
            vec![
                recorder_def("p/:id", "p", &log, true).with_routes(vec![
                    static_def("detail", "detail"),
                    static_def("summary", "summary"),
                ]),
                static_def("b", "b"),
            ],
            RouterConfig::default(),
        )
        .unwrap();
        assert!(load(&router, "p/5/detail").unwrap());
        let ctx = router.current_tree().find("p").unwrap().context().clone();
        log.lock().unwrap().clear();

        assert!(block_on(
            router.load("summary", LoadOptions::default().with_context(ctx.clone()))
        )
        .unwrap());
        let tree = router.current_tree();
        let parent = tree.find("p").unwrap();
        assert_eq!(parent.params.get("id").unwrap(), "5");
        assert_eq!(parent.children[0].component_name(), "summary");
        // The untouched host pairs same-component-same-params; no hooks ran.
        assert!(log.lock().unwrap().is_empty());
        assert_eq!(router.current_url().unwrap().href(), "p/5/summary");
    }

    #[test]
    fn stale_context_load_is_a_configuration_error() {
        let router = Router::new(
            vec![
                static_def("p/:id", "p").with_routes(vec![static_def("detail", "detail")]),
                static_def("b", "b"),
            ],
            RouterConfig::default(),
        )
        .unwrap();
        assert!(load(&router, "p/5/detail").unwrap());
        let ctx = router.current_tree().find("p").unwrap().context().clone();

        // Navigating away replaces "p"; its context leaves the committed tree.
        assert!(load(&router, "b").unwrap());
        let err = block_on(router.load("detail", LoadOptions::default().with_context(ctx)))
            .unwrap_err();
        assert!(matches!(err, RouterError::Configuration { .. }));
        assert_eq!(router.current_tree().root.children[0].component_name(), "b");
    }

    #[test]
    fn is_active_in_resolves_against_the_given_context() {
        let router = Router::new(
            vec![static_def("p/:id", "p").with_routes(vec![
                static_def("detail", "detail"),
                static_def("summary", "summary"),
            ])],
            RouterConfig::default(),
        )
        .unwrap();
        assert!(load(&router, "p/5/detail").unwrap());
        let ctx = router.current_tree().find("p").unwrap().context().clone();

        assert!(router.is_active_in("detail", &ctx));
        assert!(!router.is_active_in("summary", &ctx));
        // Root-relative, "detail" matches nothing at the top level.
        assert!(!router.is_active("detail"));
        // A context not in the committed tree reports inactive.
        let stray = RouteContext::root(Registry::new(), &[]);
        assert!(!router.is_active_in("detail", &stray));
    }

    #[test]
    fn history_write_failure_fails_and_keeps_tree() {
        let mut config = RouterConfig::default().with_metrics();
        config.history = Arc::new(FailingHistory);
        let router = Router::new(vec![static_def("a", "a")], config).unwrap();

        let err = load(&router, "a").unwrap_err();
        assert!(matches!(err, RouterError::History(_)));
        assert!(router.current_tree().root.children.is_empty());
        assert_eq!(router.metrics_snapshot().unwrap().failed, 1);
        assert!(!router.is_navigating());
    }

    #[test]
    fn lazy_component_resolves_during_load() {
        let mut def = RouteDefinition::new("deferred");
        def.component = Some(ComponentSource::lazy("deferred", || async {
            let factory: ComponentFactory =
                Arc::new(|| Box::new(StaticComponent::new("deferred")));
            Ok(factory)
        }));
        let router = Router::new(vec![def], RouterConfig::default()).unwrap();

        assert!(load(&router, "deferred").unwrap());
        assert_eq!(
            router.current_tree().root.children[0].component_name(),
            "deferred"
        );
        assert_eq!(router.current_url().unwrap().href(), "deferred");
    }
}
