use std::fmt;
use std::sync::Arc;

use crate::component::ComponentSource;
use crate::error::Result;
use crate::history::HistoryStrategy;
use crate::recognizer::Params;
use crate::registry::{RouteDefinition, TransitionPlan};
use crate::url;
use crate::viewport::RouteContext;

/// Unresolved reference to the component a viewport should display.
#[derive(Debug, Clone)]
pub enum ComponentRef {
    /// Path string still to be recognized, possibly spanning segments.
    Path(String),
    /// Definition id or component name resolved via registry lookup.
    Named(String),
    /// Inline definition supplied by the caller.
    Definition(Arc<RouteDefinition>),
    /// Direct component source (factory or deferred module).
    Source(ComponentSource),
}

impl ComponentRef {
    pub fn describe(&self) -> String {
        match self {
            Self::Path(path) => path.clone(),
            Self::Named(name) => name.clone(),
            Self::Definition(def) => def.name().to_string(),
            Self::Source(source) => source.name().to_string(),
        }
    }
}

/// Canonical unresolved navigation intent for one viewport.
#[derive(Debug, Clone)]
pub struct ViewportInstruction {
    pub component: ComponentRef,
    pub params: Params,
    pub viewport: Option<String>,
    pub children: Vec<ViewportInstruction>,
    /// Explicit raw path; when set, URL generation is bypassed entirely.
    pub raw_path: Option<String>,
}

impl ViewportInstruction {
    pub fn path(path: impl Into<String>) -> Self {
        Self {
            component: ComponentRef::Path(path.into()),
            params: Params::new(),
            viewport: None,
            children: Vec::new(),
            raw_path: None,
        }
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            component: ComponentRef::Named(name.into()),
            params: Params::new(),
            viewport: None,
            children: Vec::new(),
            raw_path: None,
        }
    }

    pub fn for_definition(def: Arc<RouteDefinition>) -> Self {
        Self {
            component: ComponentRef::Definition(def),
            params: Params::new(),
            viewport: None,
            children: Vec::new(),
            raw_path: None,
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn with_params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }

    pub fn with_viewport(mut self, viewport: impl Into<String>) -> Self {
        self.viewport = Some(viewport.into());
        self
    }

    pub fn with_children(mut self, children: Vec<ViewportInstruction>) -> Self {
        self.children = children;
        self
    }

    pub fn with_raw_path(mut self, raw: impl Into<String>) -> Self {
        self.raw_path = Some(raw.into());
        self
    }

    /// Human-readable rendering used in error payloads.
    pub fn describe(&self) -> String {
        let mut out = self.component.describe();
        if !self.params.is_empty() {
            let pairs: Vec<String> = self
                .params
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect();
            out.push('(');
            out.push_str(&pairs.join(","));
            out.push(')');
        }
        if let Some(viewport) = &self.viewport {
            out.push('@');
            out.push_str(viewport);
        }
        out
    }
}

impl fmt::Display for ViewportInstruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

/// Heterogeneous caller input accepted by `Router::load`.
#[derive(Debug, Clone)]
pub enum NavigationInput {
    /// `"a/1+b@side?x=1#frag"` style path.
    Path(String),
    /// Component name or definition id.
    Component(String),
    /// Inline definition.
    Definition(Arc<RouteDefinition>),
    /// Pre-built instruction.
    Instruction(ViewportInstruction),
    /// Sibling set resolved at the same level.
    Siblings(Vec<NavigationInput>),
}

impl NavigationInput {
    /// Human-readable rendering used in logs and audit records.
    pub fn describe(&self) -> String {
        match self {
            Self::Path(path) => path.clone(),
            Self::Component(name) => name.clone(),
            Self::Definition(def) => def.name().to_string(),
            Self::Instruction(instruction) => instruction.describe(),
            Self::Siblings(inputs) => inputs
                .iter()
                .map(NavigationInput::describe)
                .collect::<Vec<_>>()
                .join("+"),
        }
    }
}

impl From<&str> for NavigationInput {
    fn from(path: &str) -> Self {
        Self::Path(path.to_string())
    }
}

impl From<String> for NavigationInput {
    fn from(path: String) -> Self {
        Self::Path(path)
    }
}

impl From<ViewportInstruction> for NavigationInput {
    fn from(instruction: ViewportInstruction) -> Self {
        Self::Instruction(instruction)
    }
}

impl From<Vec<ViewportInstruction>> for NavigationInput {
    fn from(instructions: Vec<ViewportInstruction>) -> Self {
        Self::Siblings(instructions.into_iter().map(Into::into).collect())
    }
}

impl From<Arc<RouteDefinition>> for NavigationInput {
    fn from(def: Arc<RouteDefinition>) -> Self {
        Self::Definition(def)
    }
}

/// Per-call options accepted alongside the navigation input.
#[derive(Clone, Default)]
pub struct LoadOptions {
    pub query_params: Params,
    pub fragment: Option<String>,
    pub history_strategy: Option<HistoryStrategy>,
    pub transition_plan: Option<TransitionPlan>,
    /// Context the input resolves against; defaults to the root context.
    pub context: Option<Arc<RouteContext>>,
}

impl fmt::Debug for LoadOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadOptions")
            .field("query_params", &self.query_params)
            .field("fragment", &self.fragment)
            .field("history_strategy", &self.history_strategy)
            .field("transition_plan", &self.transition_plan)
            .field("context", &self.context.as_ref().map(|_| "RouteContext"))
            .finish()
    }
}

impl LoadOptions {
    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query_params.insert(key.into(), value.into());
        self
    }

    pub fn with_fragment(mut self, fragment: impl Into<String>) -> Self {
        self.fragment = Some(fragment.into());
        self
    }

    pub fn with_history_strategy(mut self, strategy: HistoryStrategy) -> Self {
        self.history_strategy = Some(strategy);
        self
    }

    pub fn with_transition_plan(mut self, plan: TransitionPlan) -> Self {
        self.transition_plan = Some(plan);
        self
    }

    pub fn with_context(mut self, context: Arc<RouteContext>) -> Self {
        self.context = Some(context);
        self
    }
}

/// Canonical form every `load` input normalizes into.
#[derive(Debug, Clone)]
pub struct NormalizedInput {
    pub instructions: Vec<ViewportInstruction>,
    /// Query pairs embedded in a path input; explicit options win over these.
    pub query: Params,
    pub fragment: Option<String>,
}

/// Convert heterogeneous caller input into a sibling instruction list.
pub fn normalize(input: NavigationInput) -> Result<NormalizedInput> {
    match input {
        NavigationInput::Path(path) => url::parse(&path),
        NavigationInput::Component(name) => Ok(NormalizedInput {
            instructions: vec![ViewportInstruction::named(name)],
            query: Params::new(),
            fragment: None,
        }),
        NavigationInput::Definition(def) => Ok(NormalizedInput {
            instructions: vec![ViewportInstruction::for_definition(def)],
            query: Params::new(),
            fragment: None,
        }),
        NavigationInput::Instruction(instruction) => Ok(NormalizedInput {
            instructions: vec![instruction],
            query: Params::new(),
            fragment: None,
        }),
        NavigationInput::Siblings(inputs) => {
            let mut instructions = Vec::new();
            let mut query = Params::new();
            let mut fragment = None;
            for input in inputs {
                let normalized = normalize(input)?;
                instructions.extend(normalized.instructions);
                query.extend(normalized.query);
                if fragment.is_none() {
                    fragment = normalized.fragment;
                }
            }
            Ok(NormalizedInput {
                instructions,
                query,
                fragment,
            })
        }
    }
}
