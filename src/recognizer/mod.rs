//! Path recognizer module orchestrator following the RSB module specification.
//!
//! Pattern compilation and the matching engine live in the private `core`
//! module; downstream code imports the public surface from here.

mod core;

pub use core::{
    CompiledPattern, Matcher, ParameterSpec, Params, Recognition, Segment, compile_pattern,
    decode_segment, split_path,
};

pub(crate) use core::constraint_match;
