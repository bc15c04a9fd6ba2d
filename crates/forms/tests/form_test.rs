#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Form registration, parsing and validation tests.

use serde_json::{Value, json};
use wolf_forms::error::{CoercionError, ConfigurationError, ParseError};
use wolf_forms::{FieldCheck, FieldRule, FormService, ValidationResult};
use wolf_forms_test_utils::{contact_form_rules, init_test_tracing, record, valid_contact};

fn contact_service() -> FormService {
    init_test_tracing();
    let service = FormService::new();
    service.register("contact", contact_form_rules()).unwrap();
    service
}

#[test]
fn test_registration_round_trips() {
    let service = FormService::new();
    let rules = json!([
        {"name": {"required": true, "type": "str"}},
        {"tags": {}},
    ]);
    service.register("profile", rules).unwrap();

    let stored = service.registry().get("profile").unwrap();
    assert_eq!(stored.len(), 2);
    assert_eq!(stored[0].field, "name");
    assert_eq!(stored[0].to_value(), json!({"name": {"required": true, "type": "str"}}));
    assert_eq!(stored[1].field, "tags");
    assert!(stored[1].spec.is_empty());
}

#[test]
fn test_registration_shape_errors() {
    let service = FormService::new();
    let reject = |rules: Value| service.register("broken", rules).unwrap_err();

    assert!(matches!(reject(json!({"a": {}})), ConfigurationError::NotAList));
    assert!(matches!(reject(json!([])), ConfigurationError::EmptyRules));
    assert!(matches!(
        reject(json!(["a"])),
        ConfigurationError::RuleNotAnObject { index: 0 }
    ));
    assert!(matches!(
        reject(json!([{"a": {}}, {"b": {}, "c": {}}])),
        ConfigurationError::RuleNotSingleField { index: 1, count: 2 }
    ));
    assert!(matches!(
        reject(json!([{}])),
        ConfigurationError::RuleNotSingleField { index: 0, count: 0 }
    ));
    assert!(matches!(
        reject(json!([{"a": "required"}])),
        ConfigurationError::SpecNotAnObject { ref field } if field == "a"
    ));
    assert!(matches!(
        service.register("", json!([{"a": {}}])).unwrap_err(),
        ConfigurationError::EmptyName
    ));

    assert!(service.registry().get("broken").is_none());
}

#[test]
fn test_valid_submission_passes() {
    let service = contact_service();
    let result = service.validate_form(&valid_contact(), "contact");

    assert!(result.is_valid(), "errors: {:?}", result.errors());
    assert!(result.errors().is_empty());
}

#[test]
fn test_two_failures_in_field_then_validator_order() {
    let service = FormService::new();
    service
        .register(
            "signup",
            json!([
                {"username": {"required": true, "min_length": 3}},
                {"email": {"type": "email"}},
            ]),
        )
        .unwrap();

    let result = service.validate_form(
        &record(json!({"username": "al", "email": "not-an-address"})),
        "signup",
    );

    assert!(!result.is_valid());
    let errors = result.errors();
    assert_eq!(errors.len(), 2);

    assert_eq!(errors[0].message, "username must be at least [3] characters");
    assert_eq!(errors[0].field_name.as_deref(), Some("username"));
    assert_eq!(errors[0].validator.as_deref(), Some("min_length"));
    assert_eq!(errors[0].parameter, Some(json!(3)));

    assert_eq!(errors[1].message, "email is not a valid email address");
    assert_eq!(errors[1].validator.as_deref(), Some("type"));
    assert_eq!(errors[1].parameter, Some(json!("email")));
}

#[test]
fn test_built_in_messages() {
    let service = FormService::new();
    service
        .register(
            "all",
            json!([
                {"missing": {"required": true}},
                {"count": {"type": "int"}},
                {"code": {"regex_search": "^[A-Z]{3}$"}},
                {"bio": {"max_length": 4}},
                {"age": {"expression": "field_value >= 18"}},
                {"x": {"frobnicate": 1}},
            ]),
        )
        .unwrap();

    let result = service.validate_form(
        &record(json!({
            "count": "12",
            "code": "abc",
            "bio": "too long",
            "age": 12,
            "x": "y",
        })),
        "all",
    );

    let messages: Vec<&str> = result.errors().iter().map(|e| e.message.as_str()).collect();
    assert_eq!(
        messages,
        [
            "missing is required",
            "count is not int",
            "code failed regex search",
            "bio can't be more than [4] characters",
            "age failed the expression [field_value >= 18]",
            "frobnicate is not a valid validate function",
        ]
    );
    assert_eq!(result.errors()[5].validator.as_deref(), Some("frobnicate"));
}

#[test]
fn test_unknown_form_reports_single_error() {
    let service = contact_service();
    let extra = [FieldRule::new("anything").required()];

    let result = service.validate(&record(json!({})), Some("nope"), &extra, true);

    assert!(!result.is_valid());
    assert_eq!(result.errors().len(), 1);
    assert_eq!(
        result.errors()[0].message,
        "Form: nope not found in configured forms"
    );
}

#[test]
fn test_extra_rules_alone() {
    let service = FormService::new();
    let rules = [FieldRule::new("e").of_type("email")];

    let ok = service.validate(&record(json!({"e": "a@b.co"})), None, &rules, false);
    assert!(ok.is_valid());

    let bad = service.validate(&record(json!({"e": "nope"})), None, &rules, false);
    assert_eq!(bad.errors().len(), 1);
    assert_eq!(bad.errors()[0].validator.as_deref(), Some("type"));
}

#[test]
fn test_custom_validator() {
    init_test_tracing();
    let mut service = FormService::new();
    service.register_validator(
        "is_groovy",
        |check: &FieldCheck<'_>, result: &mut ValidationResult| {
            if check.value().as_str() != Some("groovy") {
                check.fail(result, format!("{} is not groovy", check.field));
            }
        },
    );
    service
        .register("mood", json!([{"feeling": {"is_groovy": true}}]))
        .unwrap();

    assert!(service
        .validate_form(&record(json!({"feeling": "groovy"})), "mood")
        .is_valid());

    let result = service.validate_form(&record(json!({"feeling": "grumpy"})), "mood");
    assert_eq!(result.errors().len(), 1);
    assert_eq!(result.errors()[0].message, "feeling is not groovy");
    assert_eq!(result.errors()[0].validator.as_deref(), Some("is_groovy"));
}

#[test]
fn test_parse_coerces_declared_types() {
    let service = FormService::new();
    service
        .register(
            "order",
            json!([
                {"items": {"type": "list"}},
                {"gift": {"type": "bool"}},
                {"quantity": {"type": "int"}},
                {"note": {"type": "str"}},
            ]),
        )
        .unwrap();

    let submitted = record(json!({
        "items": "3,4,5",
        "gift": "true",
        "quantity": "2",
        "untyped": "left alone",
    }));
    let parsed = service.parse(&submitted, "order").unwrap();

    assert_eq!(parsed["items"], json!(["3", "4", "5"]));
    assert_eq!(parsed["gift"], json!(true));
    assert_eq!(parsed["quantity"], json!(2));
    assert_eq!(parsed["untyped"], json!("left alone"));
    assert!(!parsed.contains_key("note"));
    // The input record is untouched.
    assert_eq!(submitted["items"], json!("3,4,5"));
}

#[test]
fn test_parse_rejects_bad_bool() {
    let service = FormService::new();
    service
        .register("order", json!([{"gift": {"type": "bool"}}]))
        .unwrap();

    let err = service
        .parse(&record(json!({"gift": "maybe"})), "order")
        .unwrap_err();
    match err {
        ParseError::Field { field, source } => {
            assert_eq!(field, "gift");
            assert!(matches!(source, CoercionError::Bool(ref s) if s == "maybe"));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_parse_then_validate() {
    let service = contact_service();
    let submitted = record(json!({
        "name": "Grace",
        "email": "grace@navy.mil",
        "age": "85",
        "phone": "555-0199",
    }));

    // Raw strings fail the int type check until parsed.
    assert!(!service.validate_form(&submitted, "contact").is_valid());

    let parsed = service.parse(&submitted, "contact").unwrap();
    let result = service.validate_form(&parsed, "contact");
    assert!(result.is_valid(), "errors: {:?}", result.errors());
}

#[test]
fn test_load_yaml_forms() {
    let service = FormService::new();
    let count = service
        .load_yaml(
            r"
login:
  - username:
      required: true
  - password:
      required: true
      min_length: 8
search:
  - q:
      max_length: 100
",
        )
        .unwrap();

    assert_eq!(count, 2);
    assert_eq!(service.registry().names(), ["login", "search"]);

    let result = service.validate_form(
        &record(json!({"username": "admin", "password": "short"})),
        "login",
    );
    assert_eq!(result.errors().len(), 1);
    assert_eq!(
        result.errors()[0].message,
        "password must be at least [8] characters"
    );
}

#[test]
fn test_results_serialize() {
    let service = contact_service();
    let result = service.validate(&record(json!({})), Some("unknown"), &[], false);

    let body = serde_json::to_value(&result).unwrap();
    assert_eq!(body["valid"], json!(false));
    assert_eq!(
        body["errors"][0],
        json!({"message": "Form: unknown not found in configured forms"})
    );
}
