use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::component::{ComponentHandle, RouteSnapshot, StaticComponent};
use crate::recognizer::Params;
use crate::registry::RouteDefinition;
use crate::viewport::RouteContext;

/// One resolved viewport occupant in a route tree.
///
/// Nodes own their children and their context; the context's parent link is
/// weak, so a dropped tree releases the whole context chain.
#[derive(Clone)]
pub struct RouteNode {
    pub component: ComponentHandle,
    /// `None` only for the synthetic root.
    pub definition: Option<Arc<RouteDefinition>>,
    pub params: Params,
    pub viewport_name: String,
    pub title: Option<String>,
    pub data: Map<String, Value>,
    pub children: Vec<RouteNode>,
    pub(crate) context: Arc<RouteContext>,
    /// Verbatim path for URL serialization, bypassing generation.
    pub(crate) raw_path: Option<String>,
}

impl RouteNode {
    pub fn snapshot(&self) -> RouteSnapshot {
        RouteSnapshot::new(self.component.name(), &self.viewport_name, self.params.clone())
    }

    pub fn component_name(&self) -> &str {
        self.component.name()
    }

    /// Registry identifier of the definition behind this node.
    pub fn definition_name(&self) -> &str {
        match &self.definition {
            Some(def) => def.name(),
            None => self.component.name(),
        }
    }

    pub fn context(&self) -> &Arc<RouteContext> {
        &self.context
    }

    /// Depth-first search by component name.
    pub fn find(&self, component: &str) -> Option<&RouteNode> {
        if self.component.name() == component {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(component))
    }
}

impl fmt::Debug for RouteNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteNode")
            .field("component", &self.component.name())
            .field("viewport", &self.viewport_name)
            .field("params", &self.params)
            .field("children", &self.children)
            .finish()
    }
}

/// Fully resolved hierarchy produced by the tree builder and committed by the
/// transition pipeline.
#[derive(Debug, Clone)]
pub struct RouteTree {
    pub root: RouteNode,
    pub query: Params,
    pub fragment: Option<String>,
}

impl RouteTree {
    /// Tree with an empty synthetic root hosting `root_ctx`.
    pub fn empty(root_ctx: Arc<RouteContext>) -> Self {
        Self {
            root: RouteNode {
                component: ComponentHandle::new(Box::new(StaticComponent::new(""))),
                definition: None,
                params: Params::new(),
                viewport_name: String::new(),
                title: None,
                data: Map::new(),
                children: Vec::new(),
                context: root_ctx,
                raw_path: None,
            },
            query: Params::new(),
            fragment: None,
        }
    }

    pub fn find(&self, component: &str) -> Option<&RouteNode> {
        self.root
            .children
            .iter()
            .find_map(|child| child.find(component))
    }

    /// Pre-order traversal of all non-root nodes with their depth.
    pub fn flatten(&self) -> Vec<(&RouteNode, usize)> {
        fn walk<'a>(node: &'a RouteNode, depth: usize, out: &mut Vec<(&'a RouteNode, usize)>) {
            out.push((node, depth));
            for child in &node.children {
                walk(child, depth + 1, out);
            }
        }
        let mut out = Vec::new();
        for child in &self.root.children {
            walk(child, 0, &mut out);
        }
        out
    }

    /// Titles of the active branch, shallowest first, skipping untitled nodes.
    pub fn titles(&self) -> Vec<String> {
        self.flatten()
            .into_iter()
            .filter_map(|(node, _)| node.title.clone())
            .collect()
    }
}
