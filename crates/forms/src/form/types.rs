//! Rule-set, record and validation result types.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A flat, string-keyed record of submitted field values.
pub type Record = Map<String, Value>;

/// Validator name to parameter, in declaration order.
pub type RuleSpec = Map<String, Value>;

/// The rules for a single field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldRule {
    /// Field name in the record.
    pub field: String,

    /// Validators to run against the field, in order.
    pub spec: RuleSpec,
}

impl FieldRule {
    /// Create a rule for a field with an empty spec.
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            spec: RuleSpec::new(),
        }
    }

    /// Append a validator with its parameter.
    pub fn check(mut self, validator: impl Into<String>, parameter: impl Into<Value>) -> Self {
        self.spec.insert(validator.into(), parameter.into());
        self
    }

    /// Shorthand for `check("required", true)`.
    pub fn required(self) -> Self {
        self.check("required", true)
    }

    /// Shorthand for `check("type", type_name)`.
    pub fn of_type(self, type_name: &str) -> Self {
        self.check("type", type_name)
    }

    /// The declared `type`, if any.
    pub fn declared_type(&self) -> Option<&str> {
        self.spec.get("type").and_then(Value::as_str)
    }

    /// Whether the spec carries `required: true`.
    pub fn is_required(&self) -> bool {
        matches!(self.spec.get("required"), Some(Value::Bool(true)))
    }

    /// The `{field: spec}` object form accepted by [`FormRegistry::register`](super::FormRegistry::register).
    pub fn to_value(&self) -> Value {
        let mut object = Map::new();
        object.insert(self.field.clone(), Value::Object(self.spec.clone()));
        Value::Object(object)
    }
}

/// A single failed check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationError {
    /// Human-readable message.
    pub message: String,

    /// Field that failed (None for form-level errors).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field_name: Option<String>,

    /// Validator that reported the failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validator: Option<String>,

    /// Parameter the validator was configured with.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameter: Option<Value>,
}

impl ValidationError {
    /// Create a field-level error attributed to a validator.
    pub fn field(
        message: impl Into<String>,
        field_name: impl Into<String>,
        validator: impl Into<String>,
        parameter: Value,
    ) -> Self {
        Self {
            message: message.into(),
            field_name: Some(field_name.into()),
            validator: Some(validator.into()),
            parameter: Some(parameter),
        }
    }

    /// Create a form-level error.
    pub fn form(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            field_name: None,
            validator: None,
            parameter: None,
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.field_name, &self.validator) {
            (Some(field), Some(validator)) => write!(
                f,
                "{} in {field}. {validator} failed to validate using {}",
                self.message,
                self.parameter.as_ref().unwrap_or(&Value::Null)
            ),
            _ => f.write_str(&self.message),
        }
    }
}

/// Outcome of validating a record.
///
/// Errors can only be appended; once invalid, a result stays invalid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    valid: bool,
    errors: Vec<ValidationError>,
}

impl Default for ValidationResult {
    fn default() -> Self {
        Self::new()
    }
}

impl ValidationResult {
    /// A passing result with no errors.
    pub fn new() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
        }
    }

    /// Whether every check passed.
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Errors in the order they were reported.
    pub fn errors(&self) -> &[ValidationError] {
        &self.errors
    }

    /// Consume the result, returning its errors.
    pub fn into_errors(self) -> Vec<ValidationError> {
        self.errors
    }

    /// Record a failure.
    pub fn fail(&mut self, error: ValidationError) {
        self.valid = false;
        self.errors.push(error);
    }
}
