use thiserror::Error;

/// Unified result type for the wayline crate.
pub type Result<T> = std::result::Result<T, RouterError>;

/// Errors surfaced by the navigation engine.
///
/// Guard *rejections* (a `can_load`/`can_unload` hook answering `false`) are
/// not errors; they cancel the transition and `load` resolves `Ok(false)`.
/// Everything in this enum is either a configuration-time failure or a
/// navigation failure that leaves the committed tree untouched.
#[derive(Debug, Error)]
pub enum RouterError {
    /// Malformed or duplicate route configuration. Fatal at registration.
    #[error("configuration error for `{path}`: {message}")]
    Configuration { path: String, message: String },

    /// No definition matched the instruction and no fallback applied.
    #[error("no route matched instruction `{instruction}`")]
    Recognition { instruction: String },

    /// A redirect target required more than a 1:1 parameter rename.
    #[error("non-simple redirect from `{definition}` to `{target}`: {message}")]
    RedirectStructure {
        definition: String,
        target: String,
        message: String,
    },

    /// Reverse URL generation could not be satisfied.
    #[error("cannot generate path for `{definition}`: {message}")]
    Generation { definition: String, message: String },

    /// A component hook raised an error (as opposed to answering `false`).
    #[error("hook `{hook}` on component `{component}` failed: {message}")]
    GuardFailure {
        component: String,
        hook: &'static str,
        message: String,
    },

    /// The history collaborator reported a failure.
    #[error("history backend error: {0}")]
    History(String),
}

impl RouterError {
    pub fn configuration(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Configuration {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn recognition(instruction: impl Into<String>) -> Self {
        Self::Recognition {
            instruction: instruction.into(),
        }
    }

    pub fn generation(definition: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Generation {
            definition: definition.into(),
            message: message.into(),
        }
    }
}
