use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use futures::FutureExt;
use futures::future::BoxFuture;

use crate::component::ComponentSource;
use crate::error::{Result, RouterError};
use crate::instruction::{ComponentRef, ViewportInstruction};
use crate::recognizer::{Params, Recognition};
use crate::registry::{Registry, RouteDefinition};
use crate::url;
use crate::viewport::RouteContext;

use super::node::{RouteNode, RouteTree};

const MAX_REDIRECT_HOPS: u32 = 16;
const MAX_ALIAS_HOPS: u32 = 8;

struct ResolvedItem {
    node: RouteNode,
    /// Viewport the instruction or definition asked for; claimed later.
    desired: Option<String>,
}

/// Resolves normalized instructions into a fully materialized [`RouteTree`].
///
/// One builder handles one transition; the redirect and fallback counters it
/// accumulates feed the router's metrics after the build settles.
#[derive(Default)]
pub struct TreeBuilder {
    redirects: AtomicU32,
    fallbacks: AtomicU32,
}

impl TreeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn redirects(&self) -> u32 {
        self.redirects.load(Ordering::Relaxed)
    }

    pub fn fallbacks(&self) -> u32 {
        self.fallbacks.load(Ordering::Relaxed)
    }

    pub async fn build(
        &self,
        root_ctx: &Arc<RouteContext>,
        instructions: Vec<ViewportInstruction>,
        query: Params,
        fragment: Option<String>,
    ) -> Result<RouteTree> {
        let children = self.resolve_level(root_ctx, instructions).await?;
        let mut tree = RouteTree::empty(root_ctx.clone());
        tree.root.children = children;
        tree.query = query;
        tree.fragment = fragment;
        Ok(tree)
    }

    /// Resolve one sibling set against `ctx` and claim viewports.
    ///
    /// Claiming order: explicit claims first (a later claim on the same name
    /// replaces the earlier), then unnamed residue takes declared slots in
    /// declaration order, then default-configured slots auto-load.
    fn resolve_level<'a>(
        &'a self,
        ctx: &'a Arc<RouteContext>,
        instructions: Vec<ViewportInstruction>,
    ) -> BoxFuture<'a, Result<Vec<RouteNode>>> {
        async move {
            let mut items = Vec::new();
            for instruction in instructions {
                items.push(self.resolve_instruction(ctx, instruction).await?);
            }

            let declared = ctx.viewport_names();
            let mut claimed: Vec<(String, RouteNode)> = Vec::new();
            let mut unnamed = Vec::new();
            for item in items {
                match item.desired {
                    Some(name) => {
                        if let Some(slot) = claimed.iter_mut().find(|(n, _)| *n == name) {
                            slot.1 = item.node;
                        } else {
                            claimed.push((name, item.node));
                        }
                    }
                    None => unnamed.push(item.node),
                }
            }
            for node in unnamed {
                let free = declared
                    .iter()
                    .find(|name| !claimed.iter().any(|(n, _)| n == *name));
                let name = match free {
                    Some(name) => name.clone(),
                    None => {
                        // No declared slot left; synthesize one from the
                        // component name so siblings stay addressable.
                        let base = node.component_name().to_string();
                        let mut candidate = base.clone();
                        let mut counter = 1u32;
                        while claimed.iter().any(|(n, _)| *n == candidate) {
                            candidate = format!("{base}{counter}");
                            counter += 1;
                        }
                        candidate
                    }
                };
                claimed.push((name, node));
            }
            for name in &declared {
                if claimed.iter().any(|(n, _)| n == name) {
                    continue;
                }
                if let Some(component) = ctx.default_component(name) {
                    let item = self
                        .resolve_named(ctx, component, Params::new(), Vec::new(), None, None, 0)
                        .await?;
                    claimed.push((name.clone(), item.node));
                }
            }

            let mut nodes = Vec::new();
            for (name, mut node) in claimed {
                node.viewport_name = name;
                nodes.push(node);
            }
            Ok(nodes)
        }
        .boxed()
    }

    async fn resolve_instruction(
        &self,
        ctx: &Arc<RouteContext>,
        instruction: ViewportInstruction,
    ) -> Result<ResolvedItem> {
        let ViewportInstruction {
            component,
            params,
            viewport,
            children,
            raw_path,
        } = instruction;
        match component {
            ComponentRef::Path(path) => {
                self.resolve_path(ctx, path, params, viewport, children, raw_path)
                    .await
            }
            ComponentRef::Named(name) => {
                self.resolve_named(ctx, name, params, children, viewport, raw_path, 0)
                    .await
            }
            ComponentRef::Definition(def) => {
                url::ensure_params(&def, &params)?;
                self.materialize(ctx, def, params, viewport, children, raw_path)
                    .await
            }
            ComponentRef::Source(source) => {
                let mut def = RouteDefinition::new(source.name().to_string()).with_nav(false);
                def.component = Some(source);
                self.materialize(ctx, Arc::new(def), params, viewport, children, raw_path)
                    .await
            }
        }
    }

    /// Recognize a path, following redirects and falling back when nothing
    /// matches; the unmatched remainder recurses into the child context.
    fn resolve_path<'a>(
        &'a self,
        ctx: &'a Arc<RouteContext>,
        path: String,
        extra_params: Params,
        viewport: Option<String>,
        children: Vec<ViewportInstruction>,
        raw_path: Option<String>,
    ) -> BoxFuture<'a, Result<ResolvedItem>> {
        async move {
            let mut path = path.trim_matches('/').to_string();
            let mut hops = 0u32;
            loop {
                let Some((rec, remainder, def)) = ctx.recognize_prefix(&path) else {
                    let Some(name) = self
                        .resolve_fallback(ctx, &path, viewport.as_deref())
                        .await?
                    else {
                        return Err(RouterError::recognition(path));
                    };
                    self.fallbacks.fetch_add(1, Ordering::Relaxed);
                    return self
                        .resolve_named(ctx, name, Params::new(), Vec::new(), viewport, None, 0)
                        .await;
                };
                if let Some(target) = def.redirect_to.clone() {
                    hops += 1;
                    if hops > MAX_REDIRECT_HOPS {
                        return Err(RouterError::RedirectStructure {
                            definition: def.name().to_string(),
                            target,
                            message: "redirect loop exceeded hop limit".to_string(),
                        });
                    }
                    self.redirects.fetch_add(1, Ordering::Relaxed);
                    let substituted = apply_redirect(&def, &rec, &target)?;
                    path = join_paths(&substituted, &remainder);
                    continue;
                }
                let mut params = extra_params.clone();
                params.extend(rec.params.clone());
                let child_instructions = if remainder.is_empty() {
                    children.clone()
                } else {
                    vec![ViewportInstruction::path(remainder).with_children(children.clone())]
                };
                return self
                    .materialize(ctx, def, params, viewport, child_instructions, raw_path)
                    .await;
            }
        }
        .boxed()
    }

    async fn resolve_named(
        &self,
        ctx: &Arc<RouteContext>,
        name: String,
        params: Params,
        children: Vec<ViewportInstruction>,
        viewport: Option<String>,
        raw_path: Option<String>,
        hops: u32,
    ) -> Result<ResolvedItem> {
        let def =
            lookup_with_ancestors(ctx, &name).ok_or_else(|| RouterError::recognition(&name))?;
        if let Some(target) = def.redirect_to.clone() {
            if hops >= MAX_REDIRECT_HOPS {
                return Err(RouterError::RedirectStructure {
                    definition: def.name().to_string(),
                    target,
                    message: "redirect loop exceeded hop limit".to_string(),
                });
            }
            // A named instruction carries no matched pattern, so the target
            // must stand on its own as a literal path.
            if target
                .split('/')
                .any(|t| t.starts_with(':') || t.contains(['(', ')', '+', '*', '{']))
            {
                return Err(RouterError::RedirectStructure {
                    definition: def.name().to_string(),
                    target,
                    message: "redirect target of a named instruction must be literal".to_string(),
                });
            }
            self.redirects.fetch_add(1, Ordering::Relaxed);
            return self
                .resolve_path(ctx, target, params, viewport, children, raw_path)
                .await;
        }
        url::ensure_params(&def, &params)?;
        self.materialize(ctx, def, params, viewport, children, raw_path)
            .await
    }

    /// Viewport-level fallback first, then the context registry, then the
    /// nearest ancestor registry.
    async fn resolve_fallback(
        &self,
        ctx: &Arc<RouteContext>,
        instruction: &str,
        viewport: Option<&str>,
    ) -> Result<Option<String>> {
        let slot = viewport.unwrap_or("");
        let current = ctx.occupant_snapshot(slot);
        if let Some(spec) = ctx.agent_fallback(slot) {
            return Ok(Some(spec.resolve(instruction, current.as_ref()).await?));
        }
        if let Some(spec) = ctx.registry_fallback() {
            return Ok(Some(spec.resolve(instruction, current.as_ref()).await?));
        }
        let mut cursor = ctx.parent();
        while let Some(parent) = cursor {
            if let Some(spec) = parent.registry_fallback() {
                return Ok(Some(spec.resolve(instruction, current.as_ref()).await?));
            }
            cursor = parent.parent();
        }
        Ok(None)
    }

    /// Instantiate the definition's component, spawn its child context, and
    /// resolve its children within it.
    async fn materialize(
        &self,
        ctx: &Arc<RouteContext>,
        def: Arc<RouteDefinition>,
        params: Params,
        viewport: Option<String>,
        children: Vec<ViewportInstruction>,
        raw_path: Option<String>,
    ) -> Result<ResolvedItem> {
        let source = resolve_source(ctx, &def)?;
        let handle = source.instantiate().await?.ok_or_else(|| {
            RouterError::configuration(
                def.primary_path(),
                "component reference did not resolve to a factory",
            )
        })?;
        let child_registry = Registry::for_definition(&def)?;
        let child_ctx = RouteContext::child(ctx, child_registry, &def.viewports);
        child_ctx.ensure_config(&handle).await?;
        let child_nodes = self.resolve_level(&child_ctx, children).await?;
        let desired = viewport.or_else(|| def.viewport.clone());
        Ok(ResolvedItem {
            node: RouteNode {
                component: handle,
                params,
                viewport_name: String::new(),
                title: def.title.clone(),
                data: def.data.clone(),
                children: child_nodes,
                context: child_ctx,
                raw_path,
                definition: Some(def),
            },
            desired,
        })
    }
}

fn lookup_with_ancestors(
    ctx: &Arc<RouteContext>,
    name: &str,
) -> Option<Arc<RouteDefinition>> {
    if let Some(def) = ctx.lookup(name) {
        return Some(def);
    }
    let mut cursor = ctx.parent();
    while let Some(parent) = cursor {
        if let Some(def) = parent.lookup(name) {
            return Some(def);
        }
        cursor = parent.parent();
    }
    None
}

/// Resolve `Named` component aliases through the registry chain until a real
/// factory appears.
fn resolve_source(ctx: &Arc<RouteContext>, def: &RouteDefinition) -> Result<ComponentSource> {
    let mut source = def.component.clone().ok_or_else(|| {
        RouterError::configuration(def.primary_path(), "definition resolves to no component")
    })?;
    let mut hops = 0u32;
    while let ComponentSource::Named(name) = &source {
        hops += 1;
        if hops > MAX_ALIAS_HOPS {
            return Err(RouterError::configuration(
                def.primary_path(),
                "component alias chain too deep",
            ));
        }
        let target = lookup_with_ancestors(ctx, name).ok_or_else(|| {
            RouterError::configuration(
                def.primary_path(),
                format!("unknown component reference `{name}`"),
            )
        })?;
        source = target.component.clone().ok_or_else(|| {
            RouterError::configuration(
                def.primary_path(),
                format!("`{name}` carries no component"),
            )
        })?;
    }
    Ok(source)
}

/// Substitute a redirect target from the matched params. Anything beyond
/// literals and 1:1 `:name` renames is a structure error.
fn apply_redirect(def: &RouteDefinition, rec: &Recognition, target: &str) -> Result<String> {
    let reject = |message: &str| RouterError::RedirectStructure {
        definition: def.name().to_string(),
        target: target.to_string(),
        message: message.to_string(),
    };
    let mut out = Vec::new();
    for token in target.trim_matches('/').split('/').filter(|t| !t.is_empty()) {
        if let Some(name) = token.strip_prefix(':') {
            if name.is_empty() || name.contains(['?', '*', '(', ')', '+', '{']) {
                return Err(reject("target parameter is not a simple rename"));
            }
            match rec.params.get(name) {
                Some(value) => out.push(url::encode_segment(value)),
                None => {
                    return Err(reject("target parameter is not supplied by the matched pattern"));
                }
            }
        } else if token.contains(['(', ')', '+', '*', '?', '{']) {
            return Err(reject("target requires structure beyond a simple rename"));
        } else {
            out.push(token.to_string());
        }
    }
    Ok(out.join("/"))
}

fn join_paths(left: &str, right: &str) -> String {
    match (left.is_empty(), right.is_empty()) {
        (true, _) => right.to_string(),
        (_, true) => left.to_string(),
        _ => format!("{left}/{right}"),
    }
}
