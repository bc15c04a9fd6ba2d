//! Form service: registration, parsing and validation.

use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{ConfigurationError, ParseError};

use super::coerce::coerce_record;
use super::csrf::CsrfManager;
use super::registry::FormRegistry;
use super::types::{FieldRule, Record, ValidationError, ValidationResult};
use super::validators::{FieldCheck, FieldValidator, ValidatorTable};

/// Record field carrying the CSRF token.
pub const CSRF_FIELD: &str = "csrf_token";

/// Token checked when the record carries none; never verifies.
const MISSING_TOKEN: &str = "!";

/// Entry point for registering forms and validating submissions.
///
/// Custom validators are attached with [`register_validator`](Self::register_validator)
/// during setup; forms may be registered at any time through `&self`.
#[derive(Debug, Default)]
pub struct FormService {
    registry: FormRegistry,
    validators: ValidatorTable,
    csrf: Option<CsrfManager>,
}

impl FormService {
    /// Create a service without CSRF support.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a service that can check CSRF tokens.
    pub fn with_csrf(csrf: CsrfManager) -> Self {
        Self {
            csrf: Some(csrf),
            ..Self::default()
        }
    }

    /// The attached CSRF manager, if any.
    pub fn csrf(&self) -> Option<&CsrfManager> {
        self.csrf.as_ref()
    }

    pub fn registry(&self) -> &FormRegistry {
        &self.registry
    }

    /// Register (or replace) a rule-set from `[{field: {validator: param}}]`.
    pub fn register(&self, name: &str, rules: Value) -> Result<(), ConfigurationError> {
        self.registry.register(name, rules)
    }

    /// Register (or replace) an already-typed rule-set.
    pub fn register_rules(
        &self,
        name: &str,
        rules: Vec<FieldRule>,
    ) -> Result<(), ConfigurationError> {
        self.registry.register_rules(name, rules)
    }

    /// Register every form in a YAML document mapping names to rule lists.
    pub fn load_yaml(&self, document: &str) -> Result<usize, ConfigurationError> {
        self.registry.load_yaml(document)
    }

    /// Attach a named validator. Replaces any validator, built-in or not,
    /// already registered under `name`.
    pub fn register_validator(
        &mut self,
        name: impl Into<String>,
        validator: impl FieldValidator + 'static,
    ) {
        self.validators.insert(name, validator);
    }

    /// Coerce a record's typed fields according to a registered form.
    pub fn parse(&self, record: &Record, form_name: &str) -> Result<Record, ParseError> {
        let rules = self
            .registry
            .get(form_name)
            .ok_or_else(|| ParseError::UnknownForm(form_name.to_string()))?;
        coerce_record(record, &rules)
    }

    /// Validate a record.
    ///
    /// `extra_rules` run before the named form's rules. An unknown form name
    /// yields a single error and nothing else is checked. With `check_csrf`,
    /// the record's `csrf_token` is verified after all field checks.
    pub fn validate(
        &self,
        record: &Record,
        form_name: Option<&str>,
        extra_rules: &[FieldRule],
        check_csrf: bool,
    ) -> ValidationResult {
        let mut result = ValidationResult::new();

        let form_rules = match form_name {
            Some(name) => match self.registry.get(name) {
                Some(rules) => rules,
                None => {
                    debug!(form = %name, "validation requested for unknown form");
                    result.fail(ValidationError::form(format!(
                        "Form: {name} not found in configured forms"
                    )));
                    return result;
                }
            },
            None => Vec::new(),
        };

        for rule in extra_rules.iter().chain(form_rules.iter()) {
            self.check_field(record, rule, &mut result);
        }

        if check_csrf && !self.verify_csrf(record) {
            result.fail(ValidationError::form("Failed to validate csrf token"));
        }

        debug!(
            form = form_name.unwrap_or("-"),
            valid = result.is_valid(),
            errors = result.errors().len(),
            "validated record"
        );
        result
    }

    /// Validate a record against a registered form only.
    pub fn validate_form(&self, record: &Record, form_name: &str) -> ValidationResult {
        self.validate(record, Some(form_name), &[], false)
    }

    fn check_field(&self, record: &Record, rule: &FieldRule, result: &mut ValidationResult) {
        for (validator, parameter) in &rule.spec {
            let check = FieldCheck {
                record,
                field: &rule.field,
                validator,
                parameter,
            };
            self.validators.dispatch(&check, result);
        }
    }

    fn verify_csrf(&self, record: &Record) -> bool {
        let Some(csrf) = &self.csrf else {
            warn!("CSRF check requested but no CSRF manager is configured");
            return false;
        };
        let token = record
            .get(CSRF_FIELD)
            .and_then(Value::as_str)
            .unwrap_or(MISSING_TOKEN);
        csrf.verify(token)
    }
}
