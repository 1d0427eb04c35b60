use std::fmt;
use std::sync::Arc;

use std::future::Future;

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;

use crate::error::Result;
use crate::recognizer::Params;
use crate::registry::RouteDefinition;

/// Which optional hooks a component actually implements.
///
/// Recorded once when the component instance is created; the pipeline only
/// invokes a hook when its flag is set, so absent hooks cost nothing per
/// transition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub can_load: bool,
    pub can_unload: bool,
    pub loading: bool,
    pub get_route_config: bool,
}

impl Capabilities {
    pub fn all() -> Self {
        Self {
            can_load: true,
            can_unload: true,
            loading: true,
            get_route_config: true,
        }
    }

    pub fn guards_only() -> Self {
        Self {
            can_load: true,
            can_unload: true,
            ..Self::default()
        }
    }
}

/// Lightweight view of a route node handed to component hooks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteSnapshot {
    pub component: String,
    pub viewport: String,
    pub params: Params,
}

impl RouteSnapshot {
    pub fn new(component: impl Into<String>, viewport: impl Into<String>, params: Params) -> Self {
        Self {
            component: component.into(),
            viewport: viewport.into(),
            params,
        }
    }
}

/// Contract implemented by routed components.
///
/// All hooks are optional: the default bodies accept everything, and a hook
/// is only ever invoked when the matching [`Capabilities`] flag is set.
#[async_trait]
pub trait RouteComponent: Send + Sync {
    fn name(&self) -> &str;

    fn capabilities(&self) -> Capabilities {
        Capabilities::default()
    }

    async fn can_unload(
        &self,
        _next: Option<&RouteSnapshot>,
        _current: &RouteSnapshot,
    ) -> Result<bool> {
        Ok(true)
    }

    async fn can_load(
        &self,
        _params: &Params,
        _next: &RouteSnapshot,
        _current: Option<&RouteSnapshot>,
    ) -> Result<bool> {
        Ok(true)
    }

    async fn loading(
        &self,
        _params: &Params,
        _next: &RouteSnapshot,
        _current: Option<&RouteSnapshot>,
    ) -> Result<()> {
        Ok(())
    }

    async fn get_route_config(&self) -> Result<Vec<RouteDefinition>> {
        Ok(Vec::new())
    }
}

/// Component with no hooks, used for purely declarative routes.
pub struct StaticComponent {
    name: String,
}

impl StaticComponent {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl RouteComponent for StaticComponent {
    fn name(&self) -> &str {
        &self.name
    }
}

/// Shared handle to one live component instance.
///
/// Identity is the `Arc` allocation: a `replace` transition plan produces a
/// handle that is not `same_instance` as its predecessor, while reuse plans
/// carry the handle across trees unchanged.
#[derive(Clone)]
pub struct ComponentHandle {
    name: String,
    capabilities: Capabilities,
    inner: Arc<dyn RouteComponent>,
}

impl ComponentHandle {
    pub fn new(component: Box<dyn RouteComponent>) -> Self {
        let name = component.name().to_string();
        let capabilities = component.capabilities();
        Self {
            name,
            capabilities,
            inner: Arc::from(component),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    pub fn instance(&self) -> &dyn RouteComponent {
        self.inner.as_ref()
    }

    pub fn same_instance(&self, other: &ComponentHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Stable identifier for the underlying allocation; useful in tests that
    /// assert instance reuse or replacement.
    pub fn instance_id(&self) -> usize {
        Arc::as_ptr(&self.inner) as *const () as usize
    }
}

impl fmt::Debug for ComponentHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentHandle")
            .field("name", &self.name)
            .field("capabilities", &self.capabilities)
            .finish()
    }
}

/// Factory producing a fresh component instance per activation.
pub type ComponentFactory = Arc<dyn Fn() -> Box<dyn RouteComponent> + Send + Sync>;

/// Deferred factory resolved on first use (module promises in the original
/// caller model).
pub type LazyComponentFactory =
    Arc<dyn Fn() -> BoxFuture<'static, Result<ComponentFactory>> + Send + Sync>;

/// How a route definition produces its component.
#[derive(Clone)]
pub enum ComponentSource {
    /// Reference to another definition by id or component name.
    Named(String),
    /// Eager factory invoked per activation.
    Make {
        name: String,
        factory: ComponentFactory,
    },
    /// Factory resolved asynchronously, then invoked per activation.
    Lazy {
        name: String,
        factory: LazyComponentFactory,
    },
}

impl ComponentSource {
    pub fn named(name: impl Into<String>) -> Self {
        Self::Named(name.into())
    }

    pub fn make<F, C>(name: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> C + Send + Sync + 'static,
        C: RouteComponent + 'static,
    {
        Self::Make {
            name: name.into(),
            factory: Arc::new(move || Box::new(factory())),
        }
    }

    /// Deferred source: the factory itself is produced asynchronously on
    /// first activation (a dynamically imported module in the caller model).
    pub fn lazy<F, Fut>(name: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ComponentFactory>> + Send + 'static,
    {
        Self::Lazy {
            name: name.into(),
            factory: Arc::new(move || factory().boxed()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Named(name) => name,
            Self::Make { name, .. } => name,
            Self::Lazy { name, .. } => name,
        }
    }

    /// Instantiate a fresh component. `Named` sources carry no factory and
    /// must be resolved through a registry lookup first.
    pub async fn instantiate(&self) -> Result<Option<ComponentHandle>> {
        match self {
            Self::Named(_) => Ok(None),
            Self::Make { factory, .. } => Ok(Some(ComponentHandle::new(factory()))),
            Self::Lazy { factory, .. } => {
                let resolved = factory().await?;
                Ok(Some(ComponentHandle::new(resolved())))
            }
        }
    }
}

impl fmt::Debug for ComponentSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Named(name) => f.debug_tuple("Named").field(name).finish(),
            Self::Make { name, .. } => f.debug_struct("Make").field("name", name).finish(),
            Self::Lazy { name, .. } => f.debug_struct("Lazy").field("name", name).finish(),
        }
    }
}

/// Rendering collaborator notified during the pipeline's swap phase.
///
/// Actual instantiation happens through [`ComponentFactory`]; this trait only
/// observes attach/detach so a UI layer can mount and unmount views.
pub trait ViewRenderer: Send + Sync {
    fn attach(&self, node: &RouteSnapshot);
    fn detach(&self, node: &RouteSnapshot);
}

/// Default no-op renderer used when no UI layer is connected.
#[derive(Debug, Default)]
pub struct NullRenderer;

impl ViewRenderer for NullRenderer {
    fn attach(&self, _node: &RouteSnapshot) {}
    fn detach(&self, _node: &RouteSnapshot) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capabilities_recorded_at_creation() {
        struct Guarded;

        #[async_trait]
        impl RouteComponent for Guarded {
            fn name(&self) -> &str {
                "guarded"
            }
            fn capabilities(&self) -> Capabilities {
                Capabilities::guards_only()
            }
        }

        let handle = ComponentHandle::new(Box::new(Guarded));
        assert!(handle.capabilities().can_load);
        assert!(handle.capabilities().can_unload);
        assert!(!handle.capabilities().loading);
    }

    #[test]
    fn fresh_instances_have_distinct_identity() {
        let source = ComponentSource::make("a", || StaticComponent::new("a"));
        let first = futures::executor::block_on(source.instantiate())
            .unwrap()
            .unwrap();
        let second = futures::executor::block_on(source.instantiate())
            .unwrap()
            .unwrap();
        assert!(!first.same_instance(&second));
        assert!(first.same_instance(&first.clone()));
    }

    #[test]
    fn lazy_source_resolves_factory_then_instantiates() {
        use std::sync::atomic::{AtomicU32, Ordering};

        static RESOLVES: AtomicU32 = AtomicU32::new(0);

        let source = ComponentSource::lazy("deferred", || async {
            RESOLVES.fetch_add(1, Ordering::SeqCst);
            let factory: ComponentFactory =
                Arc::new(|| Box::new(StaticComponent::new("deferred")));
            Ok(factory)
        });
        assert_eq!(source.name(), "deferred");

        let first = futures::executor::block_on(source.instantiate())
            .unwrap()
            .unwrap();
        let second = futures::executor::block_on(source.instantiate())
            .unwrap()
            .unwrap();
        assert_eq!(first.name(), "deferred");
        // The factory promise re-resolves per activation and each activation
        // yields a fresh instance.
        assert_eq!(RESOLVES.load(Ordering::SeqCst), 2);
        assert!(!first.same_instance(&second));
    }

    #[test]
    fn named_source_needs_registry_resolution() {
        let source = ComponentSource::named("elsewhere");
        let handle = futures::executor::block_on(source.instantiate()).unwrap();
        assert!(handle.is_none());
    }
}
