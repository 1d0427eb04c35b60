use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use crate::component::{ComponentHandle, RouteSnapshot};
use crate::error::Result;
use crate::recognizer::{Params, Recognition};
use crate::registry::{
    FallbackSpec, Registry, RouteDefinition, TransitionPlan, ViewportConfig,
};

/// How a viewport agent classifies a candidate route node against its
/// current content. The classification drives the transition plan default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Candidate {
    /// First render for this slot.
    NoContent,
    /// Same component, identical params; defaults to plan `None`.
    SameComponentSameParams,
    /// Same component, new params; plan per configuration.
    SameComponentDifferentParams,
    /// Another component entirely; always replaced.
    DifferentComponent,
}

#[derive(Debug, Clone)]
pub(crate) struct Occupant {
    pub component: ComponentHandle,
    pub params: Params,
}

/// Stateful negotiator for one named rendering slot.
///
/// Agents survive across transitions; only the pipeline's swap phase mutates
/// their occupancy.
#[derive(Debug, Clone)]
pub struct ViewportAgent {
    pub name: String,
    pub default_component: Option<String>,
    pub fallback: Option<FallbackSpec>,
    current: Option<Occupant>,
}

impl ViewportAgent {
    pub fn from_config(config: &ViewportConfig) -> Self {
        Self {
            name: config.name.clone(),
            default_component: config.default_component.clone(),
            fallback: config.fallback.clone(),
            current: None,
        }
    }

    pub fn bare(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            default_component: None,
            fallback: None,
            current: None,
        }
    }

    pub fn classify(&self, component: &str, params: &Params) -> Candidate {
        match &self.current {
            None => Candidate::NoContent,
            Some(occupant) if occupant.component.name() != component => {
                Candidate::DifferentComponent
            }
            Some(occupant) if occupant.params == *params => Candidate::SameComponentSameParams,
            Some(_) => Candidate::SameComponentDifferentParams,
        }
    }

    pub fn current_component(&self) -> Option<&ComponentHandle> {
        self.current.as_ref().map(|occupant| &occupant.component)
    }

    pub(crate) fn set_occupant(&mut self, component: ComponentHandle, params: Params) {
        self.current = Some(Occupant { component, params });
    }

    pub(crate) fn clear_occupant(&mut self) {
        self.current = None;
    }
}

/// Navigation model entry surfaced per registry, refreshed on every commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavModelEntry {
    pub path: String,
    pub title: Option<String>,
    pub is_active: bool,
}

/// Tree node pairing a component instance with its registry and the agents
/// for the slots that component hosts.
///
/// The parent link is a weak, lookup-only back-reference; ownership flows
/// exclusively through the route tree, so dropping a committed tree tears the
/// context chain down with it.
pub struct RouteContext {
    parent: Weak<RouteContext>,
    registry: Mutex<Registry>,
    viewports: Mutex<HashMap<String, ViewportAgent>>,
    declared_order: Vec<String>,
    config_resolved: Mutex<bool>,
    nav_model: Mutex<Vec<NavModelEntry>>,
}

impl RouteContext {
    fn make(parent: Weak<RouteContext>, registry: Registry, configs: &[ViewportConfig]) -> Arc<Self> {
        let configs: Vec<ViewportConfig> = if configs.is_empty() {
            vec![ViewportConfig::new("")]
        } else {
            configs.to_vec()
        };
        let declared_order = configs.iter().map(|c| c.name.clone()).collect();
        let viewports = configs
            .iter()
            .map(|c| (c.name.clone(), ViewportAgent::from_config(c)))
            .collect();
        Arc::new(Self {
            parent,
            registry: Mutex::new(registry),
            viewports: Mutex::new(viewports),
            declared_order,
            config_resolved: Mutex::new(false),
            nav_model: Mutex::new(Vec::new()),
        })
    }

    pub fn root(registry: Registry, viewports: &[ViewportConfig]) -> Arc<Self> {
        Self::make(Weak::new(), registry, viewports)
    }

    pub fn child(
        parent: &Arc<RouteContext>,
        registry: Registry,
        viewports: &[ViewportConfig],
    ) -> Arc<Self> {
        Self::make(Arc::downgrade(parent), registry, viewports)
    }

    pub fn parent(&self) -> Option<Arc<RouteContext>> {
        self.parent.upgrade()
    }

    pub fn viewport_names(&self) -> Vec<String> {
        self.declared_order.clone()
    }

    pub fn default_component(&self, viewport: &str) -> Option<String> {
        let guard = self.viewports.lock().expect("viewport mutex poisoned");
        guard
            .get(viewport)
            .and_then(|agent| agent.default_component.clone())
    }

    pub fn agent_fallback(&self, viewport: &str) -> Option<FallbackSpec> {
        let guard = self.viewports.lock().expect("viewport mutex poisoned");
        guard.get(viewport).and_then(|agent| agent.fallback.clone())
    }

    pub fn registry_fallback(&self) -> Option<FallbackSpec> {
        self.registry
            .lock()
            .expect("registry mutex poisoned")
            .fallback()
            .cloned()
    }

    pub fn default_plan(&self) -> Option<TransitionPlan> {
        self.registry
            .lock()
            .expect("registry mutex poisoned")
            .default_plan()
    }

    pub fn lookup(&self, component_or_id: &str) -> Option<Arc<RouteDefinition>> {
        self.registry
            .lock()
            .expect("registry mutex poisoned")
            .lookup(component_or_id)
    }

    pub fn recognize(&self, path: &str) -> Option<(Recognition, Arc<RouteDefinition>)> {
        self.registry
            .lock()
            .expect("registry mutex poisoned")
            .recognize(path)
    }

    pub fn recognize_prefix(
        &self,
        path: &str,
    ) -> Option<(Recognition, String, Arc<RouteDefinition>)> {
        self.registry
            .lock()
            .expect("registry mutex poisoned")
            .recognize_prefix(path)
    }

    pub fn register(&self, defs: Vec<RouteDefinition>) -> Result<()> {
        self.registry
            .lock()
            .expect("registry mutex poisoned")
            .register(defs)
    }

    pub fn registry_is_empty(&self) -> bool {
        self.registry
            .lock()
            .expect("registry mutex poisoned")
            .is_empty()
    }

    /// Resolve the host component's lazy configuration hook once per context
    /// instance. Subsequent calls are no-ops regardless of the hook's result.
    pub async fn ensure_config(&self, component: &ComponentHandle) -> Result<()> {
        if !component.capabilities().get_route_config {
            return Ok(());
        }
        {
            let resolved = self.config_resolved.lock().expect("config mutex poisoned");
            if *resolved {
                return Ok(());
            }
        }
        let defs = component.instance().get_route_config().await?;
        let mut resolved = self.config_resolved.lock().expect("config mutex poisoned");
        if !*resolved {
            self.registry
                .lock()
                .expect("registry mutex poisoned")
                .register(defs)?;
            *resolved = true;
        }
        Ok(())
    }

    pub fn classify(&self, viewport: &str, component: &str, params: &Params) -> Candidate {
        let guard = self.viewports.lock().expect("viewport mutex poisoned");
        match guard.get(viewport) {
            Some(agent) => agent.classify(component, params),
            None => Candidate::NoContent,
        }
    }

    pub(crate) fn set_occupant(&self, viewport: &str, component: ComponentHandle, params: Params) {
        let mut guard = self.viewports.lock().expect("viewport mutex poisoned");
        guard
            .entry(viewport.to_string())
            .or_insert_with(|| ViewportAgent::bare(viewport))
            .set_occupant(component, params);
    }

    pub(crate) fn clear_occupant(&self, viewport: &str) {
        let mut guard = self.viewports.lock().expect("viewport mutex poisoned");
        if let Some(agent) = guard.get_mut(viewport) {
            agent.clear_occupant();
        }
    }

    /// Snapshot of the component currently occupying `viewport`, if any.
    pub(crate) fn occupant_snapshot(&self, viewport: &str) -> Option<RouteSnapshot> {
        let guard = self.viewports.lock().expect("viewport mutex poisoned");
        guard
            .get(viewport)
            .and_then(|agent| agent.current.as_ref())
            .map(|occupant| {
                RouteSnapshot::new(occupant.component.name(), viewport, occupant.params.clone())
            })
    }

    pub fn agent(&self, viewport: &str) -> Option<ViewportAgent> {
        let guard = self.viewports.lock().expect("viewport mutex poisoned");
        guard.get(viewport).cloned()
    }

    /// Rebuild the navigation model from this context's registry, marking
    /// entries whose definition is displayed by `active` as active.
    pub(crate) fn refresh_nav_model(&self, active: &[String]) {
        let entries: Vec<NavModelEntry> = {
            let registry = self.registry.lock().expect("registry mutex poisoned");
            registry
                .nav_definitions()
                .into_iter()
                .map(|def| NavModelEntry {
                    path: def.primary_path().to_string(),
                    title: def.title.clone(),
                    is_active: active.iter().any(|name| name == def.name()),
                })
                .collect()
        };
        *self.nav_model.lock().expect("nav model mutex poisoned") = entries;
    }

    pub fn nav_model(&self) -> Vec<NavModelEntry> {
        self.nav_model
            .lock()
            .expect("nav model mutex poisoned")
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::{ComponentHandle, StaticComponent};
    use crate::registry::RouteDefinition;

    fn handle(name: &str) -> ComponentHandle {
        ComponentHandle::new(Box::new(StaticComponent::new(name)))
    }

    fn params(pairs: &[(&str, &str)]) -> Params {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn classification_matrix() {
        let mut agent = ViewportAgent::bare("");
        assert_eq!(agent.classify("a", &Params::new()), Candidate::NoContent);

        agent.set_occupant(handle("a"), params(&[("id", "1")]));
        assert_eq!(
            agent.classify("a", &params(&[("id", "1")])),
            Candidate::SameComponentSameParams
        );
        assert_eq!(
            agent.classify("a", &params(&[("id", "2")])),
            Candidate::SameComponentDifferentParams
        );
        assert_eq!(
            agent.classify("b", &params(&[("id", "1")])),
            Candidate::DifferentComponent
        );
    }

    #[test]
    fn context_defaults_to_single_unnamed_viewport() {
        let ctx = RouteContext::root(Registry::new(), &[]);
        assert_eq!(ctx.viewport_names(), vec!["".to_string()]);
        assert!(ctx.parent().is_none());
    }

    #[test]
    fn child_holds_weak_parent_reference() {
        let root = RouteContext::root(Registry::new(), &[]);
        let child = RouteContext::child(&root, Registry::new(), &[]);
        assert!(child.parent().is_some());
        drop(root);
        assert!(child.parent().is_none());
    }

    #[test]
    fn ensure_config_memoizes_per_context() {
        use crate::component::{Capabilities, RouteComponent};
        use async_trait::async_trait;
        use std::sync::atomic::{AtomicU32, Ordering};

        static CALLS: AtomicU32 = AtomicU32::new(0);

        struct Dynamic;

        #[async_trait]
        impl RouteComponent for Dynamic {
            fn name(&self) -> &str {
                "dynamic"
            }
            fn capabilities(&self) -> Capabilities {
                Capabilities {
                    get_route_config: true,
                    ..Capabilities::default()
                }
            }
            async fn get_route_config(&self) -> crate::error::Result<Vec<RouteDefinition>> {
                CALLS.fetch_add(1, Ordering::SeqCst);
                Ok(vec![RouteDefinition::for_component("lazy", "lazy", || {
                    StaticComponent::new("lazy")
                })])
            }
        }

        let ctx = RouteContext::root(Registry::new(), &[]);
        let component = ComponentHandle::new(Box::new(Dynamic));
        futures::executor::block_on(ctx.ensure_config(&component)).unwrap();
        futures::executor::block_on(ctx.ensure_config(&component)).unwrap();
        assert_eq!(CALLS.load(Ordering::SeqCst), 1);
        assert!(ctx.lookup("lazy").is_some());
    }

    #[test]
    fn nav_model_marks_active_entries() {
        let registry = Registry::with_definitions(vec![
            RouteDefinition::for_component("a", "a", || StaticComponent::new("a"))
                .with_title("Alpha"),
            RouteDefinition::for_component("b", "b", || StaticComponent::new("b")),
        ])
        .unwrap();
        let ctx = RouteContext::root(registry, &[]);
        ctx.refresh_nav_model(&["a".to_string()]);
        let model = ctx.nav_model();
        assert_eq!(model.len(), 2);
        assert!(model[0].is_active);
        assert_eq!(model[0].title.as_deref(), Some("Alpha"));
        assert!(!model[1].is_active);
    }
}
