//! Navigation instruction module orchestrator following the RSB module
//! specification.

mod core;

pub use core::{
    ComponentRef, LoadOptions, NavigationInput, NormalizedInput, ViewportInstruction, normalize,
};
