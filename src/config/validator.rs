//! Configuration validation for documents.
//!
//! This module checks a document before any graph is built: declaration
//! names, duplicate declarations, module shape, and the syntax of every
//! `${...}` interpolation. Problems that only make a run fail later are
//! reported as warnings.

use serde_json::{Map, Value};
use std::collections::HashSet;
use tracing::debug;

use crate::error::{ConfigError, Result};
use crate::graph::node::{default_provider, provider_key};
use crate::graph::reference::{Reference, interpolations, reference_tokens};

use super::spec::Document;

/// Validator for configuration documents.
#[derive(Debug, Default)]
pub struct ConfigValidator {
    /// Root variables that will be supplied by the caller.
    supplied: HashSet<String>,
}

/// Validation result containing all errors found.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// List of validation errors.
    pub errors: Vec<ValidationError>,
    /// List of warnings (non-fatal issues).
    pub warnings: Vec<String>,
}

/// A single validation error.
#[derive(Debug)]
pub struct ValidationError {
    /// The field path that failed validation.
    pub field: String,
    /// The error message.
    pub message: String,
}

impl ConfigValidator {
    /// Creates a new validator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks root variables that the caller supplies values for.
    #[must_use]
    pub fn with_supplied<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.supplied.extend(names.into_iter().map(Into::into));
        self
    }

    /// Validates a document and its inline modules.
    ///
    /// # Errors
    ///
    /// Returns the first validation error if any were found.
    pub fn validate(&self, document: &Document) -> Result<ValidationResult> {
        let result = self.check(document);

        if let Some(first_error) = result.errors.first() {
            return Err(ConfigError::ValidationError {
                message: first_error.message.clone(),
                field: Some(first_error.field.clone()),
            }
            .into());
        }

        debug!("Configuration validation passed with {} warnings", result.warnings.len());
        Ok(result)
    }

    /// Collects every error and warning without failing.
    #[must_use]
    pub fn check(&self, document: &Document) -> ValidationResult {
        let mut result = ValidationResult::default();
        if document.is_empty() {
            result.warnings.push(String::from("Configuration declares nothing"));
        }
        self.validate_document(document, "", &HashSet::new(), &mut result);
        result
    }

    fn validate_document(
        &self,
        document: &Document,
        prefix: &str,
        inherited_providers: &HashSet<String>,
        result: &mut ValidationResult,
    ) {
        for (name, variable) in &document.variables {
            let field = format!("{prefix}variables.{name}");
            check_name(name, &field, result);
            if let Some(default) = &variable.default {
                check_interpolations(default, &field, result);
            } else if prefix.is_empty() && !self.supplied.contains(name) {
                result.warnings.push(format!(
                    "{field}: no default; supply it with --var {name}=... or TERRAGRAPH_VAR_{name}"
                ));
            }
        }

        let mut providers = inherited_providers.clone();
        let mut seen = HashSet::new();
        for (i, provider) in document.providers.iter().enumerate() {
            let field = format!("{prefix}providers[{i}]");
            check_name(&provider.provider_type, &format!("{field}.type"), result);
            if let Some(alias) = &provider.alias {
                check_name(alias, &format!("{field}.alias"), result);
            }
            let key = provider_key(&provider.provider_type, provider.alias.as_deref());
            if !seen.insert(key.clone()) {
                result.errors.push(ValidationError {
                    field: field.clone(),
                    message: format!("Duplicate provider: {key}"),
                });
            }
            check_map(&provider.config, &format!("{field}.config"), result);
            providers.insert(key);
        }

        let mut seen = HashSet::new();
        for (i, resource) in document.resources.iter().enumerate() {
            let field = format!("{prefix}resources[{i}]");
            check_name(&resource.resource_type, &format!("{field}.type"), result);
            check_name(&resource.name, &format!("{field}.name"), result);

            let name = format!("{}.{}", resource.resource_type, resource.name);
            if !seen.insert(name.clone()) {
                result.errors.push(ValidationError {
                    field: field.clone(),
                    message: format!("Duplicate resource: {name}"),
                });
            }

            check_map(&resource.config, &format!("{field}.config"), result);
            check_depends_on(&resource.depends_on, &field, result);
            check_provider(
                &resource.resource_type,
                resource.provider.as_deref(),
                &providers,
                &field,
                result,
            );
        }

        let mut seen = HashSet::new();
        for (i, data) in document.data.iter().enumerate() {
            let field = format!("{prefix}data[{i}]");
            check_name(&data.data_type, &format!("{field}.type"), result);
            check_name(&data.name, &format!("{field}.name"), result);

            let name = format!("data.{}.{}", data.data_type, data.name);
            if !seen.insert(name.clone()) {
                result.errors.push(ValidationError {
                    field: field.clone(),
                    message: format!("Duplicate data source: {name}"),
                });
            }

            check_map(&data.config, &format!("{field}.config"), result);
            check_depends_on(&data.depends_on, &field, result);
            check_provider(&data.data_type, data.provider.as_deref(), &providers, &field, result);
        }

        for (name, output) in &document.outputs {
            let field = format!("{prefix}outputs.{name}");
            check_name(name, &field, result);
            check_interpolations(&output.value, &field, result);
        }

        let mut seen = HashSet::new();
        for (i, module) in document.modules.iter().enumerate() {
            let field = format!("{prefix}modules[{i}]");
            check_name(&module.name, &format!("{field}.name"), result);
            if !seen.insert(module.name.as_str()) {
                result.errors.push(ValidationError {
                    field: field.clone(),
                    message: format!("Duplicate module: {}", module.name),
                });
            }
            check_map(&module.inputs, &format!("{field}.inputs"), result);

            match (&module.source, &module.body) {
                (Some(_), Some(_)) => result.errors.push(ValidationError {
                    field,
                    message: String::from("Module sets both source and body"),
                }),
                (None, None) => result.errors.push(ValidationError {
                    field,
                    message: String::from("Module needs a source or a body"),
                }),
                (None, Some(body)) => {
                    let child = format!("{prefix}module.{}.", module.name);
                    for input in module.inputs.keys() {
                        if !body.variables.contains_key(input) {
                            result.warnings.push(format!(
                                "{field}.inputs.{input}: module declares no such variable"
                            ));
                        }
                    }
                    self.validate_document(body, &child, &providers, result);
                }
                (Some(_), None) => {}
            }
        }
    }
}

/// Names must start with a letter or underscore and contain no dots.
fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    (first.is_ascii_alphabetic() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn check_name(name: &str, field: &str, result: &mut ValidationResult) {
    if !is_valid_name(name) {
        result.errors.push(ValidationError {
            field: field.to_string(),
            message: format!(
                "Name '{name}' is invalid. Must start with a letter and contain only \
                 letters, digits, '_' or '-'."
            ),
        });
    }
}

fn check_map(map: &Map<String, Value>, field: &str, result: &mut ValidationResult) {
    for (key, value) in map {
        check_interpolations(&Value::String(key.clone()), field, result);
        check_interpolations(value, &format!("{field}.{key}"), result);
    }
}

fn check_depends_on(depends_on: &[String], field: &str, result: &mut ValidationResult) {
    for (i, dep) in depends_on.iter().enumerate() {
        let ok = matches!(Reference::parse(dep), Ok(Some(r)) if r.attribute.is_empty());
        if !ok {
            result.errors.push(ValidationError {
                field: format!("{field}.depends_on[{i}]"),
                message: format!("'{dep}' is not a node name"),
            });
        }
    }
}

fn check_provider(
    type_name: &str,
    explicit: Option<&str>,
    declared: &HashSet<String>,
    field: &str,
    result: &mut ValidationResult,
) {
    if let Some(key) = explicit
        && !key.split('.').all(is_valid_name)
    {
        result.errors.push(ValidationError {
            field: format!("{field}.provider"),
            message: format!("Provider '{key}' must have the form TYPE or TYPE.ALIAS"),
        });
        return;
    }

    let key = explicit.map_or_else(|| default_provider(type_name), String::from);
    if !declared.contains(&key) {
        result.warnings.push(format!(
            "{field}: provider '{key}' is not declared in this module or its parents"
        ));
    }
}

/// Checks that every interpolation in `value` is a single bare reference.
fn check_interpolations(value: &Value, field: &str, result: &mut ValidationResult) {
    match value {
        Value::String(text) => {
            for (_, body) in interpolations(text) {
                if let Err(message) = check_expression(body) {
                    result.errors.push(ValidationError {
                        field: field.to_string(),
                        message: format!("${{{body}}}: {message}"),
                    });
                }
            }
        }
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                check_interpolations(item, &format!("{field}[{i}]"), result);
            }
        }
        Value::Object(map) => check_map(map, field, result),
        Value::Null | Value::Bool(_) | Value::Number(_) => {}
    }
}

fn check_expression(body: &str) -> std::result::Result<(), String> {
    let expression = body.trim();
    let tokens = reference_tokens(expression);
    match tokens.as_slice() {
        [token] if token == expression => match Reference::parse(token)? {
            Some(_) => Ok(()),
            None => Err(String::from("pseudo-references are not evaluated")),
        },
        _ => Err(String::from("only bare references are evaluated")),
    }
}

impl ValidationResult {
    /// Returns true if validation passed (no errors).
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns the number of errors.
    #[must_use]
    pub const fn error_count(&self) -> usize {
        self.errors.len()
    }

    /// Returns the number of warnings.
    #[must_use]
    pub const fn warning_count(&self) -> usize {
        self.warnings.len()
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigParser;

    fn check(yaml: &str) -> ValidationResult {
        let document = ConfigParser::new().parse_yaml(yaml, None).unwrap();
        ConfigValidator::new().check(&document)
    }

    #[test]
    fn test_valid_name() {
        assert!(is_valid_name("web"));
        assert!(is_valid_name("null_resource"));
        assert!(is_valid_name("web-1"));
        assert!(is_valid_name("_private"));
    }

    #[test]
    fn test_invalid_name() {
        assert!(!is_valid_name(""));
        assert!(!is_valid_name("1web"));
        assert!(!is_valid_name("a.b"));
        assert!(!is_valid_name("has space"));
    }

    #[test]
    fn test_valid_document() {
        let result = check(
            r#"
variables:
  env:
    default: dev
providers:
  - type: "null"
resources:
  - type: null_resource
    name: web
    config:
      name: "web-${var.env}"
      peers: ["${null_resource.db.id}"]
  - type: null_resource
    name: db
outputs:
  web:
    value: "${null_resource.web.id}"
"#,
        );
        assert!(result.is_valid(), "{:?}", result.errors);
        assert_eq!(result.warning_count(), 0);
    }

    #[test]
    fn test_duplicates_are_errors() {
        let result = check(
            r#"
providers:
  - type: "null"
  - type: "null"
resources:
  - type: null_resource
    name: a
  - type: null_resource
    name: a
"#,
        );
        assert_eq!(result.error_count(), 2);
        assert!(result.errors.iter().any(|e| e.message.contains("null_resource.a")));
    }

    #[test]
    fn test_expression_syntax() {
        let result = check(
            r#"
providers:
  - type: "null"
resources:
  - type: null_resource
    name: a
    config:
      upper: "${upper(var.name)}"
      short: "${web}"
      pseudo: "${self.id}"
"#,
        );
        assert_eq!(result.error_count(), 3);
        assert!(result.errors.iter().any(|e| e.field == "resources[0].config.upper"));
    }

    #[test]
    fn test_inline_module_is_checked_with_prefix() {
        let result = check(
            r#"
providers:
  - type: "null"
modules:
  - name: net
    inputs:
      cidr: "10.0.0.0/16"
      extra: 1
    body:
      variables:
        cidr: {}
      resources:
        - type: null_resource
          name: "bad.name"
"#,
        );
        assert_eq!(result.error_count(), 1);
        assert_eq!(result.errors[0].field, "module.net.resources[0].name");
        // Providers are inherited; only the unknown input is warned about.
        assert_eq!(
            result.warnings,
            vec!["modules[0].inputs.extra: module declares no such variable"]
        );
    }

    #[test]
    fn test_warnings_for_missing_defaults_and_providers() {
        let yaml = "variables:\n  size: {}\nresources:\n  - type: aws_instance\n    name: web\n";
        let document = ConfigParser::new().parse_yaml(yaml, None).unwrap();

        let result = ConfigValidator::new().validate(&document).unwrap();
        assert_eq!(result.warning_count(), 2);

        let result = ConfigValidator::new().with_supplied(["size"]).validate(&document).unwrap();
        assert_eq!(result.warning_count(), 1);
        assert!(result.warnings[0].contains("'aws'"));
    }

    #[test]
    fn test_validate_returns_first_error() {
        let document = ConfigParser::new()
            .parse_yaml("modules:\n  - name: m\n", None)
            .unwrap();
        let err = ConfigValidator::new().validate(&document).unwrap_err();
        assert!(err.to_string().contains("source or a body"));
    }
}
