//! Wolf Forms Library
//!
//! Rule-driven validation and coercion of submitted form records, with
//! expiring CSRF tokens.

pub mod config;
pub mod error;
pub mod form;

pub use config::CsrfConfig;
pub use error::{CoercionError, ConfigurationError, CsrfError, ParseError};
pub use form::{
    CsrfManager, FieldCheck, FieldRule, FieldValidator, FormService, Record, SecretHasher,
    ValidationError, ValidationResult,
};
