//! Route tree module orchestrator following the RSB module specification.
//!
//! `node` holds the resolved tree types; `builder` turns normalized
//! instructions into trees via the recognizer, redirects, and fallbacks.

mod builder;
mod node;

pub use builder::TreeBuilder;
pub use node::{RouteNode, RouteTree};
