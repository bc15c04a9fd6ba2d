//! Error types raised by the form API.
//!
//! Validation failures are not errors; they are reported inside a
//! [`ValidationResult`](crate::form::ValidationResult). The types here cover
//! programmer and integration mistakes only.

use thiserror::Error;

/// A rule-set could not be registered.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("form name must not be empty")]
    EmptyName,

    #[error("validators must be a list")]
    NotAList,

    #[error("you must have at least one validator for the form")]
    EmptyRules,

    #[error("validator #{index} must be a dict")]
    RuleNotAnObject { index: usize },

    #[error("validator #{index} must have exactly one field name, found {count}")]
    RuleNotSingleField { index: usize, count: usize },

    #[error("validator field methods for '{field}' must be a dict")]
    SpecNotAnObject { field: String },

    #[error("rule document must map form names to validator lists")]
    DocumentNotAMapping,

    #[error("invalid rule document: {0}")]
    Yaml(#[from] serde_yml::Error),
}

/// A field value could not be converted to its declared type.
#[derive(Debug, Error)]
pub enum CoercionError {
    #[error("{0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Int(#[from] std::num::ParseIntError),

    #[error("{0}")]
    Float(#[from] std::num::ParseFloatError),

    #[error("could not convert {0} to bool")]
    Bool(String),

    #[error("could not convert {value} to {type_name}")]
    Unsupported { type_name: String, value: String },

    #[error("unknown type '{0}'")]
    UnknownType(String),
}

/// A record could not be parsed against a rule-set.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("form {0} not found in configured forms")]
    UnknownForm(String),

    #[error("could not parse {field}, error was: {source}")]
    Field {
        field: String,
        #[source]
        source: CoercionError,
    },
}

/// CSRF token manager errors.
#[derive(Debug, Error)]
pub enum CsrfError {
    #[error("CSRF manager must be created inside a Tokio runtime")]
    NoRuntime,

    #[error("failed to hash CSRF secret: {0}")]
    Hash(String),

    #[error("too many live CSRF tokens (limit {0})")]
    CapacityExceeded(usize),

    #[error("CSRF token lifetime of {0:?} is too long")]
    TtlTooLong(std::time::Duration),

    #[error("CSRF token reaper has stopped")]
    ReaperStopped,
}
