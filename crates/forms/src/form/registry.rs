//! Named rule-set storage.

use dashmap::DashMap;
use serde_json::Value;
use tracing::debug;

use crate::error::ConfigurationError;

use super::types::FieldRule;

/// Registered rule-sets keyed by form name.
///
/// Safe for concurrent reads and inserts, though forms are normally
/// registered once at startup before request traffic begins.
#[derive(Default)]
pub struct FormRegistry {
    forms: DashMap<String, Vec<FieldRule>>,
}

impl FormRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a rule-set from its untyped `[{field: {validator: param}}]` form.
    ///
    /// Overwrites any rule-set already registered under `name`.
    pub fn register(&self, name: &str, rules: Value) -> Result<(), ConfigurationError> {
        let rules = field_rules_from_value(rules)?;
        self.register_rules(name, rules)
    }

    /// Register an already-typed rule-set.
    pub fn register_rules(
        &self,
        name: &str,
        rules: Vec<FieldRule>,
    ) -> Result<(), ConfigurationError> {
        if name.is_empty() {
            return Err(ConfigurationError::EmptyName);
        }
        if rules.is_empty() {
            return Err(ConfigurationError::EmptyRules);
        }

        debug!(form = %name, fields = rules.len(), "registered form");
        self.forms.insert(name.to_string(), rules);
        Ok(())
    }

    /// Register every rule-set in a YAML document of the shape
    /// `form_name: [{field: {validator: param}}]`.
    ///
    /// Returns the number of forms registered. Nothing is registered if any
    /// rule-set in the document is malformed.
    pub fn load_yaml(&self, document: &str) -> Result<usize, ConfigurationError> {
        let parsed: Value = serde_yml::from_str(document)?;
        let Value::Object(forms) = parsed else {
            return Err(ConfigurationError::DocumentNotAMapping);
        };

        let mut checked = Vec::with_capacity(forms.len());
        for (name, rules) in forms {
            if name.is_empty() {
                return Err(ConfigurationError::EmptyName);
            }
            checked.push((name, field_rules_from_value(rules)?));
        }

        let count = checked.len();
        for (name, rules) in checked {
            self.register_rules(&name, rules)?;
        }
        Ok(count)
    }

    /// Look up a rule-set by name.
    pub fn get(&self, name: &str) -> Option<Vec<FieldRule>> {
        self.forms.get(name).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.forms.contains_key(name)
    }

    /// Names of all registered forms, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.forms.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.forms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forms.is_empty()
    }
}

impl std::fmt::Debug for FormRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FormRegistry")
            .field("forms", &self.forms.len())
            .finish()
    }
}

/// Check the shape of an untyped rule list and convert it.
fn field_rules_from_value(rules: Value) -> Result<Vec<FieldRule>, ConfigurationError> {
    let Value::Array(entries) = rules else {
        return Err(ConfigurationError::NotAList);
    };
    if entries.is_empty() {
        return Err(ConfigurationError::EmptyRules);
    }

    entries
        .into_iter()
        .enumerate()
        .map(|(index, entry)| {
            let Value::Object(entry) = entry else {
                return Err(ConfigurationError::RuleNotAnObject { index });
            };
            if entry.len() != 1 {
                return Err(ConfigurationError::RuleNotSingleField {
                    index,
                    count: entry.len(),
                });
            }

            let Some((field, spec)) = entry.into_iter().next() else {
                return Err(ConfigurationError::RuleNotSingleField { index, count: 0 });
            };
            match spec {
                Value::Object(spec) => Ok(FieldRule { field, spec }),
                _ => Err(ConfigurationError::SpecNotAnObject { field }),
            }
        })
        .collect()
}
