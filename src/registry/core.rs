use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::{Map, Value};

use crate::component::{ComponentSource, RouteComponent, RouteSnapshot};
use crate::error::{Result, RouterError};
use crate::recognizer::{CompiledPattern, Matcher, Recognition, compile_pattern};

/// Policy governing component reuse when a viewport's content changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionPlan {
    /// Keep the instance, call no hooks, render nothing.
    None,
    /// Keep the instance and run its `loading` hook with the new params.
    InvokeLifecycles,
    /// Discard the instance and build a fresh one.
    Replace,
}

pub type TransitionPlanFn =
    Arc<dyn Fn(Option<&RouteSnapshot>, &RouteSnapshot) -> TransitionPlan + Send + Sync>;

/// A transition plan is either a fixed policy or a function of the current
/// and next route, evaluated per node while guarding the load.
#[derive(Clone)]
pub enum PlanSpec {
    Fixed(TransitionPlan),
    Compute(TransitionPlanFn),
}

impl PlanSpec {
    pub fn resolve(&self, current: Option<&RouteSnapshot>, next: &RouteSnapshot) -> TransitionPlan {
        match self {
            Self::Fixed(plan) => *plan,
            Self::Compute(f) => f(current, next),
        }
    }
}

impl fmt::Debug for PlanSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed(plan) => f.debug_tuple("Fixed").field(plan).finish(),
            Self::Compute(_) => f.write_str("Compute(..)"),
        }
    }
}

pub type FallbackFn =
    Arc<dyn Fn(&str, Option<&RouteSnapshot>) -> BoxFuture<'static, Result<String>> + Send + Sync>;

/// Component substituted when a path segment has no matching definition.
///
/// Either a literal component/definition id or a function of the unmatched
/// instruction and the viewport's current content; functions may resolve
/// asynchronously and are awaited before the tree is considered resolved.
#[derive(Clone)]
pub enum FallbackSpec {
    Component(String),
    Compute(FallbackFn),
}

impl FallbackSpec {
    pub async fn resolve(
        &self,
        instruction: &str,
        current: Option<&RouteSnapshot>,
    ) -> Result<String> {
        match self {
            Self::Component(name) => Ok(name.clone()),
            Self::Compute(f) => f(instruction, current).await,
        }
    }
}

impl fmt::Debug for FallbackSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Component(name) => f.debug_tuple("Component").field(name).finish(),
            Self::Compute(_) => f.write_str("Compute(..)"),
        }
    }
}

/// Declared rendering slot hosted by a component.
#[derive(Debug, Clone, Default)]
pub struct ViewportConfig {
    pub name: String,
    /// Component auto-loaded when no instruction targets the slot.
    pub default_component: Option<String>,
    pub fallback: Option<FallbackSpec>,
}

impl ViewportConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_default(mut self, component: impl Into<String>) -> Self {
        self.default_component = Some(component.into());
        self
    }

    pub fn with_fallback(mut self, component: impl Into<String>) -> Self {
        self.fallback = Some(FallbackSpec::Component(component.into()));
        self
    }
}

/// One route configuration entry.
#[derive(Debug, Clone)]
pub struct RouteDefinition {
    pub id: Option<String>,
    pub paths: Vec<String>,
    pub component: Option<ComponentSource>,
    pub title: Option<String>,
    pub data: Map<String, Value>,
    pub redirect_to: Option<String>,
    pub transition_plan: Option<PlanSpec>,
    pub fallback: Option<FallbackSpec>,
    pub nav: bool,
    /// Slot this route prefers when no instruction names one.
    pub viewport: Option<String>,
    /// Static child configuration for the component's own registry.
    pub routes: Vec<RouteDefinition>,
    /// Slots the component hosts; empty means a single unnamed slot.
    pub viewports: Vec<ViewportConfig>,
}

impl RouteDefinition {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            id: None,
            paths: vec![path.into()],
            component: None,
            title: None,
            data: Map::new(),
            redirect_to: None,
            transition_plan: None,
            fallback: None,
            nav: true,
            viewport: None,
            routes: Vec::new(),
            viewports: Vec::new(),
        }
    }

    pub fn for_component<F, C>(path: impl Into<String>, name: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> C + Send + Sync + 'static,
        C: RouteComponent + 'static,
    {
        let mut def = Self::new(path);
        def.component = Some(ComponentSource::make(name, factory));
        def
    }

    pub fn redirect(path: impl Into<String>, target: impl Into<String>) -> Self {
        let mut def = Self::new(path);
        def.redirect_to = Some(target.into());
        def.nav = false;
        def
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.paths.push(path.into());
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_data(mut self, key: impl Into<String>, value: Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    pub fn with_transition_plan(mut self, plan: TransitionPlan) -> Self {
        self.transition_plan = Some(PlanSpec::Fixed(plan));
        self
    }

    pub fn with_transition_plan_fn(mut self, f: TransitionPlanFn) -> Self {
        self.transition_plan = Some(PlanSpec::Compute(f));
        self
    }

    pub fn with_fallback(mut self, component: impl Into<String>) -> Self {
        self.fallback = Some(FallbackSpec::Component(component.into()));
        self
    }

    pub fn with_fallback_fn(mut self, f: FallbackFn) -> Self {
        self.fallback = Some(FallbackSpec::Compute(f));
        self
    }

    pub fn with_nav(mut self, nav: bool) -> Self {
        self.nav = nav;
        self
    }

    pub fn with_viewport(mut self, viewport: impl Into<String>) -> Self {
        self.viewport = Some(viewport.into());
        self
    }

    pub fn with_routes(mut self, routes: Vec<RouteDefinition>) -> Self {
        self.routes = routes;
        self
    }

    pub fn with_viewports(mut self, viewports: Vec<ViewportConfig>) -> Self {
        self.viewports = viewports;
        self
    }

    /// Identifier used for lookups and diagnostics: explicit id, then
    /// component name, then the first declared path.
    pub fn name(&self) -> &str {
        if let Some(id) = &self.id {
            return id;
        }
        if let Some(component) = &self.component {
            return component.name();
        }
        self.paths.first().map(String::as_str).unwrap_or("")
    }

    pub fn primary_path(&self) -> &str {
        match self.paths.first() {
            Some(path) => path,
            None => self.name(),
        }
    }
}

/// Per-context store of route definitions feeding the recognizer.
#[derive(Debug, Default, Clone)]
pub struct Registry {
    defs: Vec<Arc<RouteDefinition>>,
    matcher: Matcher,
    fallback: Option<FallbackSpec>,
    default_plan: Option<TransitionPlan>,
    explicit_paths: HashSet<String>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_definitions(defs: Vec<RouteDefinition>) -> Result<Self> {
        let mut registry = Self::new();
        registry.register(defs)?;
        Ok(registry)
    }

    /// Build the registry a matched definition spawns for its children.
    pub fn for_definition(def: &RouteDefinition) -> Result<Self> {
        let mut registry = Self::with_definitions(def.routes.clone())?;
        registry.fallback = def.fallback.clone();
        if let Some(PlanSpec::Fixed(plan)) = &def.transition_plan {
            registry.default_plan = Some(*plan);
        }
        Ok(registry)
    }

    /// Append definitions. Two explicit definitions colliding on an identical
    /// literal path fail right here, never at navigation time.
    pub fn register(&mut self, defs: Vec<RouteDefinition>) -> Result<()> {
        for def in defs {
            if def.component.is_some() && def.redirect_to.is_some() {
                return Err(RouterError::configuration(
                    def.primary_path(),
                    "definition has both a component and a redirect target",
                ));
            }
            for path in &def.paths {
                if !self.explicit_paths.insert(path.clone()) {
                    return Err(RouterError::configuration(
                        path.clone(),
                        "duplicate literal path in registry",
                    ));
                }
            }
            self.defs.push(Arc::new(def));
        }
        self.rebuild_matcher()
    }

    fn rebuild_matcher(&mut self) -> Result<()> {
        let mut patterns: Vec<CompiledPattern> = Vec::new();
        let mut order = 0;
        for (index, def) in self.defs.iter().enumerate() {
            if def.paths.is_empty() {
                patterns.push(compile_pattern(def.name(), 1, index, order)?);
                order += 1;
            } else {
                for path in &def.paths {
                    patterns.push(compile_pattern(path, 0, index, order)?);
                    order += 1;
                }
            }
        }
        self.matcher = Matcher::new(patterns);
        Ok(())
    }

    pub fn lookup(&self, component_or_id: &str) -> Option<Arc<RouteDefinition>> {
        self.defs
            .iter()
            .find(|def| {
                def.id.as_deref() == Some(component_or_id)
                    || def
                        .component
                        .as_ref()
                        .is_some_and(|c| c.name() == component_or_id)
            })
            .cloned()
    }

    pub fn definition(&self, index: usize) -> Option<Arc<RouteDefinition>> {
        self.defs.get(index).cloned()
    }

    pub fn definitions(&self) -> impl Iterator<Item = &Arc<RouteDefinition>> {
        self.defs.iter()
    }

    /// Every registered pattern, explicit and name-derived.
    pub fn all_paths(&self) -> Vec<String> {
        self.defs
            .iter()
            .flat_map(|def| {
                if def.paths.is_empty() {
                    vec![def.name().to_string()]
                } else {
                    def.paths.clone()
                }
            })
            .collect()
    }

    pub fn recognize(&self, path: &str) -> Option<(Recognition, Arc<RouteDefinition>)> {
        let rec = self.matcher.recognize(path)?;
        let def = self.definition(rec.def_index)?;
        Some((rec, def))
    }

    pub fn recognize_prefix(
        &self,
        path: &str,
    ) -> Option<(Recognition, String, Arc<RouteDefinition>)> {
        let (rec, remainder) = self.matcher.recognize_prefix(path)?;
        let def = self.definition(rec.def_index)?;
        Some((rec, remainder, def))
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }

    pub fn fallback(&self) -> Option<&FallbackSpec> {
        self.fallback.as_ref()
    }

    pub fn set_fallback(&mut self, fallback: FallbackSpec) {
        self.fallback = Some(fallback);
    }

    pub fn default_plan(&self) -> Option<TransitionPlan> {
        self.default_plan
    }

    pub fn set_default_plan(&mut self, plan: TransitionPlan) {
        self.default_plan = Some(plan);
    }

    pub fn nav_definitions(&self) -> Vec<Arc<RouteDefinition>> {
        self.defs
            .iter()
            .filter(|def| def.nav && def.redirect_to.is_none())
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::StaticComponent;

    fn def(path: &str, name: &str) -> RouteDefinition {
        let owned = name.to_string();
        RouteDefinition::for_component(path, name, move || StaticComponent::new(owned.clone()))
    }

    #[test]
    fn duplicate_literal_path_fails_registration() {
        let mut registry = Registry::new();
        let err = registry
            .register(vec![def("a", "first"), def("a", "second")])
            .unwrap_err();
        assert!(matches!(err, RouterError::Configuration { .. }));
    }

    #[test]
    fn component_and_redirect_are_exclusive() {
        let mut bad = def("a", "a");
        bad.redirect_to = Some("b".to_string());
        let err = Registry::new().register(vec![bad]).unwrap_err();
        assert!(matches!(err, RouterError::Configuration { .. }));
    }

    #[test]
    fn lookup_by_id_and_component_name() {
        let registry = Registry::with_definitions(vec![
            def("a", "alpha").with_id("first"),
            def("b", "beta"),
        ])
        .unwrap();
        assert_eq!(registry.lookup("first").unwrap().name(), "first");
        assert_eq!(registry.lookup("beta").unwrap().primary_path(), "b");
        assert!(registry.lookup("gamma").is_none());
    }

    #[test]
    fn explicit_path_outranks_implicit_name() {
        // "beta" is implicit (derived from the component name); an explicit
        // "beta" literal on another definition must win recognition.
        let mut implicit = def("x", "beta");
        implicit.paths = Vec::new();
        let registry =
            Registry::with_definitions(vec![implicit, def("beta", "explicit-beta")]).unwrap();
        let (_, matched) = registry.recognize("beta").unwrap();
        assert_eq!(matched.name(), "explicit-beta");
    }

    #[test]
    fn multiple_patterns_compile_independently() {
        let registry =
            Registry::with_definitions(vec![def("", "home").with_path("start")]).unwrap();
        assert!(registry.recognize("").is_some());
        assert!(registry.recognize("start").is_some());
        assert_eq!(registry.all_paths(), vec!["", "start"]);
    }

    #[test]
    fn child_registry_inherits_fallback() {
        let parent = def("p", "parent")
            .with_fallback("lost")
            .with_routes(vec![def("c", "child")]);
        let child_registry = Registry::for_definition(&parent).unwrap();
        assert!(child_registry.recognize("c").is_some());
        assert!(matches!(
            child_registry.fallback(),
            Some(FallbackSpec::Component(name)) if name == "lost"
        ));
    }

    #[test]
    fn nav_definitions_skip_redirects_and_opt_outs() {
        let registry = Registry::with_definitions(vec![
            def("a", "a"),
            def("b", "b").with_nav(false),
            RouteDefinition::redirect("old", "a"),
        ])
        .unwrap();
        let nav = registry.nav_definitions();
        assert_eq!(nav.len(), 1);
        assert_eq!(nav[0].name(), "a");
    }
}
