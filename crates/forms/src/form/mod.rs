//! Declarative form validation.
//!
//! Forms are named lists of field rules. Each rule maps validator names to
//! parameters. The form system supports:
//! - Built-in validators (`required`, `type`, `regex_search`, `min_length`,
//!   `max_length`, `expression`) plus caller-registered ones
//! - A restricted expression language for per-field predicates
//! - Type coercion of submitted records
//! - Expiring CSRF tokens

pub mod coerce;
pub mod csrf;
pub mod expression;
mod registry;
mod service;
mod types;
pub mod validators;

pub use coerce::{coerce_record, coerce_value};
pub use csrf::{Argon2Hasher, CsrfManager, SecretHasher};
pub use registry::FormRegistry;
pub use service::{CSRF_FIELD, FormService};
pub use types::{FieldRule, Record, RuleSpec, ValidationError, ValidationResult};
pub use validators::{FieldCheck, FieldValidator, ValidatorTable};
