//! History collaborator module orchestrator following the RSB module
//! specification.

mod core;

pub use core::{
    FailingHistory, HistoryBackend, HistoryChange, HistoryStrategy, InMemoryHistory,
};
