//! Errors raised while validating and compiling actions and resolving install strategies.

use crate::core::action::Kind;
use crate::core::context::Packager;
use thiserror::Error;

/// Shorthand for results whose error is [Error].
pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can stop a host's compilation.
///
/// None of these are recoverable locally. Each one aborts compilation for its target before any
/// script is produced, and each carries enough context (kind, option key, strategy name, path) to
/// diagnose the problem without running anything again.
#[derive(Debug, Error)]
pub enum Error {
    #[error("unknown action kind: {0}")]
    UnknownKind(String),

    #[error("an action must name its kind")]
    MissingKind,

    #[error("{kind} does not recognize option `{key}`")]
    UnknownOption { kind: Kind, key: String },

    #[error("{kind} option `{key}` is invalid: {reason}")]
    InvalidOption {
        kind: Kind,
        key: String,
        reason: String,
    },

    #[error("{kind} options are malformed: {reason}")]
    MalformedOptions { kind: Kind, reason: String },

    #[error("{kind} requires option `{key}`")]
    MissingOption { kind: Kind, key: String },

    #[error("{kind} is not supported with the {packager} packager")]
    IncompatiblePackager { kind: Kind, packager: Packager },

    #[error("{kind} needs the node's address, but none is known")]
    NoEndpoint { kind: Kind },

    #[error("unknown install strategy: {0}")]
    UnknownStrategy(String),

    #[error("install strategy {strategy} requires `{key}`")]
    MissingStrategyParam { strategy: String, key: String },

    #[error("install strategy {strategy} parameter `{key}` is invalid: {reason}")]
    InvalidStrategyParam {
        strategy: String,
        key: String,
        reason: String,
    },

    #[error("install strategy {strategy} cannot be used with the {packager} packager")]
    IncompatibleStrategy { strategy: String, packager: Packager },

    #[error("no settings registered for component {0}")]
    UnknownComponent(String),

    #[error(
        "{path} was changed outside of cairn (recorded checksum {recorded}, live checksum \
        {live}); set overwrite-changes to replace it"
    )]
    ContentConflict {
        path: String,
        recorded: String,
        live: String,
    },

    #[error("could not inspect the target: {0:#}")]
    Probe(#[source] anyhow::Error),
}

/// The broad categories of [Error].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    /// Bad or unknown action kinds and options.
    Configuration,

    /// Install strategies that are missing parameters or don't fit the target.
    StrategyResolution,

    /// A managed file was modified behind our back.
    ContentConflict,

    /// A collaborator (such as the file probe) failed.
    Collaborator,
}

impl Error {
    /// Returns the [ErrorClass] of this error.
    pub fn class(&self) -> ErrorClass {
        use Error::*;
        match self {
            UnknownKind(_)
            | MissingKind
            | UnknownOption { .. }
            | InvalidOption { .. }
            | MalformedOptions { .. }
            | MissingOption { .. }
            | IncompatiblePackager { .. }
            | NoEndpoint { .. }
            | UnknownStrategy(_) => ErrorClass::Configuration,
            MissingStrategyParam { .. }
            | InvalidStrategyParam { .. }
            | IncompatibleStrategy { .. }
            | UnknownComponent(_) => ErrorClass::StrategyResolution,
            ContentConflict { .. } => ErrorClass::ContentConflict,
            Probe(_) => ErrorClass::Collaborator,
        }
    }

    pub(crate) fn invalid(kind: Kind, key: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::InvalidOption {
            kind,
            key: key.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn missing(kind: Kind, key: impl Into<String>) -> Self {
        Error::MissingOption {
            kind,
            key: key.into(),
        }
    }
}
