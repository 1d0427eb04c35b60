//! Wayline: a viewport-oriented navigation engine.
//!
//! Routes map URL-like paths to component hierarchies rendered into named
//! viewports. A transition runs as a cancellable pipeline: the instruction is
//! normalized, a route tree is built (following redirects and fallbacks),
//! `can_unload`/`can_load` guards are consulted, viewports swap their
//! occupants, and the resulting URL is pushed into session history. A later
//! `load` supersedes an in-flight one at the next phase boundary.
//!
//! The modules follow the RSB `MODULE_SPEC` pattern: each directory module
//! exposes its surface through `mod.rs` while the mechanics live in a private
//! `core`.

pub mod audit;
pub mod component;
pub mod error;
pub mod history;
pub mod instruction;
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod recognizer;
pub mod registry;
pub mod router;
pub mod tree;
pub mod url;
pub mod viewport;

pub use audit::{
    NullRouterAudit, RouterAudit, RouterAuditEvent, RouterAuditEventBuilder, RouterAuditStage,
};
pub use component::{
    Capabilities, ComponentFactory, ComponentHandle, ComponentSource, NullRenderer,
    RouteComponent, RouteSnapshot, StaticComponent, ViewRenderer,
};
pub use error::{Result, RouterError};
pub use history::{
    FailingHistory, HistoryBackend, HistoryChange, HistoryStrategy, InMemoryHistory,
};
pub use instruction::{ComponentRef, LoadOptions, NavigationInput, ViewportInstruction};
pub use logging::{LogEvent, LogFields, LogLevel, LogSink, Logger, LoggingError, LoggingResult};
pub use metrics::{MetricSnapshot, RouterMetrics};
pub use pipeline::TransitionPhase;
pub use recognizer::{Params, Recognition};
pub use registry::{FallbackSpec, PlanSpec, Registry, RouteDefinition, TransitionPlan, ViewportConfig};
pub use router::{Router, RouterConfig};
pub use tree::{RouteNode, RouteTree};
pub use url::UrlParts;
pub use viewport::{NavModelEntry, RouteContext};
