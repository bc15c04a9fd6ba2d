//! Built-in field validators and name-based dispatch.
//!
//! Every validator has the same shape: it receives the record, the field
//! being checked, the name it was invoked under and its parameter, and may
//! append failures to the running [`ValidationResult`].

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use dashmap::DashMap;
use regex::Regex;
use serde_json::Value;
use tracing::debug;

use super::expression;
use super::types::{Record, ValidationError, ValidationResult};

/// Value seen by validators for a field missing from the record.
static EMPTY: Value = Value::String(String::new());

/// Deliberately permissive address shape: `local@domain.tld`.
static EMAIL_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?i)^[a-z0-9]+(?:[._][a-z0-9]+)?@\w+\.\w{2,3}$").ok());

/// Primitive type names understood by `type`.
pub const PRIMITIVE_TYPES: &[&str] = &["str", "int", "float", "list", "dict", "bool"];

/// Pseudo-type checked by pattern rather than by JSON type.
pub const EMAIL_TYPE: &str = "email";

/// One validator invocation.
#[derive(Debug, Clone, Copy)]
pub struct FieldCheck<'a> {
    /// The record being validated.
    pub record: &'a Record,

    /// Field under validation.
    pub field: &'a str,

    /// Name the validator was invoked under.
    pub validator: &'a str,

    /// Parameter from the rule spec.
    pub parameter: &'a Value,
}

impl<'a> FieldCheck<'a> {
    /// The field's value, or the empty string if the record lacks it.
    pub fn value(&self) -> &'a Value {
        self.record.get(self.field).unwrap_or(&EMPTY)
    }

    /// Append a failure attributed to this invocation.
    pub fn fail(&self, result: &mut ValidationResult, message: impl Into<String>) {
        result.fail(ValidationError::field(
            message,
            self.field,
            self.validator,
            self.parameter.clone(),
        ));
    }
}

/// A named check that can be attached to a [`FormService`](super::FormService).
///
/// Implemented for any `Fn(&FieldCheck, &mut ValidationResult)`.
pub trait FieldValidator: Send + Sync {
    fn check(&self, check: &FieldCheck<'_>, result: &mut ValidationResult);
}

impl<F> FieldValidator for F
where
    F: Fn(&FieldCheck<'_>, &mut ValidationResult) + Send + Sync,
{
    fn check(&self, check: &FieldCheck<'_>, result: &mut ValidationResult) {
        self(check, result);
    }
}

/// Validator name to implementation.
#[derive(Clone)]
pub struct ValidatorTable {
    validators: HashMap<String, Arc<dyn FieldValidator>>,
}

impl Default for ValidatorTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ValidatorTable {
    /// A table holding the built-in validators.
    pub fn new() -> Self {
        let mut table = Self {
            validators: HashMap::new(),
        };
        table.insert("required", required);
        table.insert("type", check_type);
        table.insert("regex_search", RegexSearch::default());
        table.insert("min_length", min_length);
        table.insert("max_length", max_length);
        table.insert("expression", check_expression);
        table
    }

    /// Add or replace a validator.
    pub fn insert(&mut self, name: impl Into<String>, validator: impl FieldValidator + 'static) {
        let name = name.into();
        debug!(validator = %name, "registered validator");
        self.validators.insert(name, Arc::new(validator));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.validators.contains_key(name)
    }

    /// Run the validator named by `check.validator`, or the not-found
    /// fallback if no such validator exists.
    pub fn dispatch(&self, check: &FieldCheck<'_>, result: &mut ValidationResult) {
        match self.validators.get(check.validator) {
            Some(validator) => validator.check(check, result),
            None => not_found(check, result),
        }
    }

    /// Registered validator names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.validators.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl std::fmt::Debug for ValidatorTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidatorTable")
            .field("validators", &self.names())
            .finish()
    }
}

/// Python-style truthiness: empty strings, zero, null, false and empty
/// collections are falsy.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/// Length used by `required`, `min_length`, `max_length` and `len()`.
///
/// Characters for strings, elements for collections, characters of the
/// rendered value for numbers and booleans, zero for null.
pub fn value_len(value: &Value) -> usize {
    match value {
        Value::Null => 0,
        Value::String(s) => s.chars().count(),
        Value::Array(items) => items.len(),
        Value::Object(map) => map.len(),
        Value::Bool(_) | Value::Number(_) => value.to_string().chars().count(),
    }
}

/// Text of a value: strings as-is, everything else rendered as JSON.
pub fn value_text(value: &Value) -> std::borrow::Cow<'_, str> {
    match value {
        Value::String(s) => std::borrow::Cow::Borrowed(s.as_str()),
        Value::Null => std::borrow::Cow::Borrowed(""),
        other => std::borrow::Cow::Owned(other.to_string()),
    }
}

fn not_found(check: &FieldCheck<'_>, result: &mut ValidationResult) {
    debug!(field = %check.field, validator = %check.validator, "unknown validator");
    check.fail(
        result,
        format!("{} is not a valid validate function", check.validator),
    );
}

fn required(check: &FieldCheck<'_>, result: &mut ValidationResult) {
    if value_len(check.value()) < 1 && check.parameter == &Value::Bool(true) {
        check.fail(result, format!("{} is required", check.field));
    }
}

fn check_type(check: &FieldCheck<'_>, result: &mut ValidationResult) {
    let value = check.value();
    let Some(type_name) = check.parameter.as_str() else {
        check.fail(result, format!("{} declares a non-string type", check.field));
        return;
    };

    let matches = match type_name {
        "str" => value.is_string(),
        "int" => value.is_i64() || value.is_u64(),
        "float" => value.is_f64(),
        "list" => value.is_array(),
        "dict" => value.is_object(),
        "bool" => value.is_boolean(),
        EMAIL_TYPE => {
            let is_email = match (value.as_str(), EMAIL_RE.as_ref()) {
                (Some(text), Some(re)) => re.is_match(text),
                _ => false,
            };
            if !is_email {
                check.fail(
                    result,
                    format!("{} is not a valid email address", check.field),
                );
            }
            return;
        }
        other => {
            check.fail(
                result,
                format!("{} declares unknown type {other}", check.field),
            );
            return;
        }
    };

    if !matches {
        check.fail(result, format!("{} is not {type_name}", check.field));
    }
}

/// `regex_search` with compiled patterns cached by source.
#[derive(Debug, Default)]
pub struct RegexSearch {
    patterns: DashMap<String, Regex>,
}

impl RegexSearch {
    /// Number of distinct patterns compiled so far.
    pub fn cached(&self) -> usize {
        self.patterns.len()
    }

    fn compiled(&self, pattern: &str) -> Option<Regex> {
        if let Some(re) = self.patterns.get(pattern) {
            return Some(re.clone());
        }
        match Regex::new(pattern) {
            Ok(re) => {
                self.patterns.insert(pattern.to_string(), re.clone());
                Some(re)
            }
            Err(e) => {
                debug!(pattern = %pattern, error = %e, "invalid regex_search pattern");
                None
            }
        }
    }
}

impl FieldValidator for RegexSearch {
    fn check(&self, check: &FieldCheck<'_>, result: &mut ValidationResult) {
        let pattern = check.parameter.as_str().and_then(|p| self.compiled(p));
        let found = pattern.is_some_and(|re| re.is_match(&value_text(check.value())));
        if !found {
            check.fail(result, format!("{} failed regex search", check.field));
        }
    }
}

fn length_limit(check: &FieldCheck<'_>, result: &mut ValidationResult) -> Option<usize> {
    let limit = check
        .parameter
        .as_u64()
        .and_then(|n| usize::try_from(n).ok());
    if limit.is_none() {
        check.fail(
            result,
            format!(
                "{} has an invalid {} parameter",
                check.field, check.validator
            ),
        );
    }
    limit
}

fn min_length(check: &FieldCheck<'_>, result: &mut ValidationResult) {
    let Some(limit) = length_limit(check, result) else {
        return;
    };
    if value_len(check.value()) < limit {
        check.fail(
            result,
            format!("{} must be at least [{limit}] characters", check.field),
        );
    }
}

fn max_length(check: &FieldCheck<'_>, result: &mut ValidationResult) {
    let Some(limit) = length_limit(check, result) else {
        return;
    };
    if value_len(check.value()) > limit {
        check.fail(
            result,
            format!("{} can't be more than [{limit}] characters", check.field),
        );
    }
}

fn check_expression(check: &FieldCheck<'_>, result: &mut ValidationResult) {
    let Some(source) = check.parameter.as_str() else {
        check.fail(
            result,
            format!("{} has a non-string expression", check.field),
        );
        return;
    };

    match expression::evaluate(source, check.value()) {
        Ok(Value::Bool(false)) => {
            check.fail(
                result,
                format!("{} failed the expression [{source}]", check.field),
            );
        }
        Ok(_) => {}
        Err(e) => {
            debug!(field = %check.field, error = %e, "expression could not be evaluated");
            check.fail(
                result,
                format!("{} failed the expression [{source}]: {e}", check.field),
            );
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn run(record: Value, field: &str, validator: &str, parameter: Value) -> ValidationResult {
        let Value::Object(record) = record else {
            panic!("record must be an object");
        };
        let table = ValidatorTable::new();
        let mut result = ValidationResult::new();
        let check = FieldCheck {
            record: &record,
            field,
            validator,
            parameter: &parameter,
        };
        table.dispatch(&check, &mut result);
        result
    }

    // === required ===

    #[test]
    fn test_required_missing_field_fails() {
        let result = run(json!({"test": "test"}), "testy", "required", json!(true));
        assert!(!result.is_valid());
        assert_eq!(result.errors()[0].validator.as_deref(), Some("required"));
        assert_eq!(result.errors()[0].message, "testy is required");
    }

    #[test]
    fn test_required_false_never_fails() {
        let result = run(json!({}), "name", "required", json!(false));
        assert!(result.is_valid());
    }

    #[test]
    fn test_required_present_value_passes() {
        assert!(run(json!({"n": "x"}), "n", "required", json!(true)).is_valid());
        assert!(run(json!({"n": 0}), "n", "required", json!(true)).is_valid());
        assert!(!run(json!({"n": []}), "n", "required", json!(true)).is_valid());
    }

    // === type ===

    #[test]
    fn test_type_matching_primitives_pass() {
        let record = json!({
            "s": "string", "i": 1, "f": 1.0, "l": ["hi"], "d": {"hello": "world"}, "b": true
        });
        for (field, type_name) in [
            ("s", "str"),
            ("i", "int"),
            ("f", "float"),
            ("l", "list"),
            ("d", "dict"),
            ("b", "bool"),
        ] {
            let result = run(record.clone(), field, "type", json!(type_name));
            assert!(result.is_valid(), "{field} should be {type_name}");
        }
    }

    #[test]
    fn test_type_mismatch_fails_once() {
        for type_name in PRIMITIVE_TYPES.iter().filter(|t| **t != "str") {
            let result = run(json!({"v": "fish"}), "v", "type", json!(type_name));
            assert_eq!(result.errors().len(), 1, "type {type_name}");
            assert_eq!(result.errors()[0].message, format!("v is not {type_name}"));
        }
        let result = run(json!({"v": 1}), "v", "type", json!("str"));
        assert_eq!(result.errors().len(), 1);
    }

    #[test]
    fn test_type_email() {
        assert!(run(json!({"e": "a@b.co"}), "e", "type", json!("email")).is_valid());
        assert!(run(json!({"e": "first.last@example.com"}), "e", "type", json!("email")).is_valid());

        let result = run(json!({"e": "nope"}), "e", "type", json!("email"));
        assert_eq!(result.errors().len(), 1);
        assert_eq!(result.errors()[0].validator.as_deref(), Some("type"));
        assert_eq!(result.errors()[0].message, "e is not a valid email address");

        assert!(!run(json!({"e": "a@b.info"}), "e", "type", json!("email")).is_valid());
        assert!(!run(json!({"e": 5}), "e", "type", json!("email")).is_valid());
    }

    #[test]
    fn test_type_unknown_name_fails() {
        let result = run(json!({"v": "x"}), "v", "type", json!("decimal"));
        assert_eq!(result.errors()[0].message, "v declares unknown type decimal");
    }

    // === regex_search ===

    #[test]
    fn test_regex_search() {
        assert!(run(json!({"t": "hello"}), "t", "regex_search", json!("hello")).is_valid());
        assert!(run(json!({"t": "say hello!"}), "t", "regex_search", json!("hel+o")).is_valid());

        let result = run(json!({"t": "fish"}), "t", "regex_search", json!("hello"));
        assert_eq!(result.errors()[0].validator.as_deref(), Some("regex_search"));
    }

    #[test]
    fn test_regex_search_compiles_each_pattern_once() {
        let search = RegexSearch::default();
        let record = match json!({"a": "abc", "b": "xyz"}) {
            Value::Object(map) => map,
            _ => unreachable!(),
        };
        let pattern = json!("^[a-z]+$");
        let mut result = ValidationResult::new();

        for field in ["a", "b", "a"] {
            let check = FieldCheck {
                record: &record,
                field,
                validator: "regex_search",
                parameter: &pattern,
            };
            search.check(&check, &mut result);
        }
        assert!(result.is_valid());
        assert_eq!(search.cached(), 1);

        let bad = json!("(");
        let check = FieldCheck {
            record: &record,
            field: "a",
            validator: "regex_search",
            parameter: &bad,
        };
        search.check(&check, &mut result);
        assert!(!result.is_valid());
        assert_eq!(search.cached(), 1);
    }

    #[test]
    fn test_regex_search_invalid_pattern_fails() {
        assert!(!run(json!({"t": "x"}), "t", "regex_search", json!("(")).is_valid());
        assert!(!run(json!({"t": "x"}), "t", "regex_search", json!(3)).is_valid());
    }

    // === min_length / max_length ===

    #[test]
    fn test_min_length() {
        assert!(run(json!({"t": "a"}), "t", "min_length", json!(1)).is_valid());

        let result = run(json!({"t": ""}), "t", "min_length", json!(1));
        assert_eq!(result.errors()[0].validator.as_deref(), Some("min_length"));
        assert_eq!(result.errors()[0].message, "t must be at least [1] characters");
    }

    #[test]
    fn test_max_length() {
        assert!(run(json!({"t": "a"}), "t", "max_length", json!(1)).is_valid());

        let result = run(json!({"t": "ab"}), "t", "max_length", json!(1));
        assert_eq!(result.errors()[0].validator.as_deref(), Some("max_length"));
        assert_eq!(result.errors()[0].message, "t can't be more than [1] characters");
    }

    #[test]
    fn test_length_counts_characters() {
        assert!(run(json!({"t": "héé"}), "t", "max_length", json!(3)).is_valid());
    }

    #[test]
    fn test_length_invalid_parameter_fails() {
        let result = run(json!({"t": "a"}), "t", "min_length", json!("3"));
        assert_eq!(result.errors()[0].message, "t has an invalid min_length parameter");
        assert!(!run(json!({"t": "a"}), "t", "max_length", json!(-1)).is_valid());
    }

    // === expression ===

    #[test]
    fn test_expression() {
        let param = json!("field_value == 'a'");
        assert!(run(json!({"t": "a"}), "t", "expression", param.clone()).is_valid());

        let result = run(json!({"t": "b"}), "t", "expression", param);
        assert_eq!(result.errors()[0].validator.as_deref(), Some("expression"));
        assert_eq!(result.errors()[0].message, "t failed the expression [field_value == 'a']");
    }

    #[test]
    fn test_expression_non_boolean_result_passes() {
        assert!(run(json!({"t": 2}), "t", "expression", json!("field_value + 1")).is_valid());
    }

    #[test]
    fn test_expression_errors_fail_closed() {
        let result = run(json!({"t": "a"}), "t", "expression", json!("open('x')"));
        assert!(!result.is_valid());
        assert!(result.errors()[0].message.contains("unknown name 'open'"));
    }

    // === dispatch ===

    #[test]
    fn test_unknown_validator_falls_back() {
        let result = run(json!({"test": "test"}), "test", "fish", json!("str"));
        assert_eq!(result.errors().len(), 1);
        assert_eq!(result.errors()[0].validator.as_deref(), Some("fish"));
        assert_eq!(result.errors()[0].message, "fish is not a valid validate function");
        assert_eq!(result.errors()[0].parameter, Some(json!("str")));
    }

    #[test]
    fn test_custom_validator_dispatch() {
        let mut table = ValidatorTable::new();
        table.insert("is_groovy", |check: &FieldCheck<'_>, result: &mut ValidationResult| {
            if !value_text(check.value()).contains("groovy") {
                check.fail(result, "Value is not groovy");
            }
        });
        assert!(table.contains("is_groovy"));

        let Value::Object(record) = json!({"t": "I am cool"}) else {
            unreachable!()
        };
        let mut result = ValidationResult::new();
        table.dispatch(
            &FieldCheck {
                record: &record,
                field: "t",
                validator: "is_groovy",
                parameter: &json!(true),
            },
            &mut result,
        );
        assert_eq!(result.errors()[0].validator.as_deref(), Some("is_groovy"));
    }

    #[test]
    fn test_builtin_names() {
        assert_eq!(
            ValidatorTable::new().names(),
            ["expression", "max_length", "min_length", "regex_search", "required", "type"]
        );
    }

    #[test]
    fn test_truthy() {
        assert!(!truthy(&json!("")));
        assert!(!truthy(&json!(0)));
        assert!(!truthy(&json!(0.0)));
        assert!(!truthy(&Value::Null));
        assert!(truthy(&json!("0")));
        assert!(truthy(&json!([0])));
    }
}
