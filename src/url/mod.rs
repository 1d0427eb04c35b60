//! URL serializer module orchestrator following the RSB module specification.
//!
//! Bidirectional codec between location strings and instruction/route trees.

mod core;

pub use core::{UrlParts, encode_segment, generate_path, parse, serialize};

pub(crate) use core::ensure_params;
