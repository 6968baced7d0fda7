//! Schema Resolver
//!
//! Applies a Function's parameter contract to raw caller input. Per group:
//! caller fields outside the visible set are rejected, required fields fall
//! back to their default (or to an injected credential), unset optional
//! fields are omitted, and every supplied value is checked against its type,
//! enum and format. All per-field failures are reported together.

use chrono::{DateTime, NaiveDate};
use conduit_core::{
    AssembledArguments, FieldFormat, FieldType, FunctionParameters, ParameterField,
    ParameterGroup, ValidationError,
};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

/// A field the Credential Manager will fill in at dispatch time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InjectedField<'a> {
    pub group: ParameterGroup,
    pub name: &'a str,
}

impl<'a> InjectedField<'a> {
    pub fn new(group: ParameterGroup, name: &'a str) -> Self {
        Self { group, name }
    }

    fn satisfies(&self, group: ParameterGroup, field: &str) -> bool {
        if self.group != group {
            return false;
        }
        match group {
            ParameterGroup::Header => self.name.eq_ignore_ascii_case(field),
            _ => self.name == field,
        }
    }
}

/// Resolve caller input against a parameter contract.
///
/// `input` is an object keyed by group name (`path`, `query`, `header`,
/// `cookie`, `body`); `null` means no input.
pub fn resolve(
    parameters: &FunctionParameters,
    input: &Value,
    injected: &[InjectedField<'_>],
) -> Result<AssembledArguments, ValidationError> {
    let empty = Map::new();
    let supplied_groups = match input {
        Value::Null => &empty,
        Value::Object(map) => map,
        other => {
            return Err(ValidationError::InvalidInput {
                reason: format!("arguments must be an object, got {}", json_type(other)),
            })
        }
    };

    let mut errors = Vec::new();
    let mut assembled = AssembledArguments::new();

    for (key, value) in supplied_groups {
        let Some(group) = parse_group(key) else {
            errors.push(ValidationError::InvalidInput {
                reason: format!("unknown parameter group: {}", key),
            });
            continue;
        };
        if !value.is_object() && !value.is_null() {
            errors.push(ValidationError::InvalidType {
                field: group.as_str().to_string(),
                expected: FieldType::Object.as_str().to_string(),
            });
            continue;
        }
        // Input for a group the function does not declare has no visible fields.
        if parameters.group(group).is_none() {
            if let Some(fields) = value.as_object() {
                for name in fields.keys() {
                    errors.push(ValidationError::UnknownParameter {
                        group,
                        field: name.clone(),
                    });
                }
            }
        }
    }

    for schema in &parameters.groups {
        let group = schema.group;
        let supplied = supplied_groups
            .get(group.as_str())
            .and_then(Value::as_object)
            .unwrap_or(&empty);

        let is_injected = |name: &str| injected.iter().any(|i| i.satisfies(group, name));
        let values = resolve_fields(
            group,
            "",
            &schema.fields,
            supplied,
            &is_injected,
            &mut errors,
        );
        if !values.is_empty() {
            assembled.insert(group, values);
        }
    }

    match ValidationError::from_errors(errors) {
        Some(err) => Err(err),
        None => Ok(assembled),
    }
}

/// One level of the visible/required recursion.
fn resolve_fields(
    group: ParameterGroup,
    prefix: &str,
    fields: &[ParameterField],
    supplied: &Map<String, Value>,
    is_injected: &dyn Fn(&str) -> bool,
    errors: &mut Vec<ValidationError>,
) -> Map<String, Value> {
    for name in supplied.keys() {
        let allowed = fields.iter().any(|f| f.visible && &f.name == name);
        if !allowed {
            errors.push(ValidationError::UnknownParameter {
                group,
                field: join_path(prefix, name),
            });
        }
    }

    let mut out = Map::new();
    for field in fields {
        let path = join_path(prefix, &field.name);
        let caller_value = supplied.get(&field.name).filter(|_| field.visible);
        match (caller_value, &field.default) {
            (Some(value), _) => {
                let value = check_value(group, &path, field, value, errors);
                out.insert(field.name.clone(), value);
            }
            (None, Some(default)) => {
                out.insert(field.name.clone(), default.clone());
            }
            (None, None) => {
                // Injection only applies at the top level of a group.
                let injected = prefix.is_empty() && is_injected(&field.name);
                if field.required && !injected {
                    errors.push(ValidationError::MissingRequiredParameter {
                        group,
                        field: path,
                    });
                }
            }
        }
    }
    out
}

fn check_value(
    group: ParameterGroup,
    path: &str,
    field: &ParameterField,
    value: &Value,
    errors: &mut Vec<ValidationError>,
) -> Value {
    let qualified = format!("{}.{}", group, path);

    if !field.field_type.matches(value) {
        errors.push(ValidationError::InvalidType {
            field: qualified,
            expected: field.field_type.as_str().to_string(),
        });
        return value.clone();
    }

    if let Some(allowed) = &field.allowed_values {
        if !allowed.contains(value) {
            errors.push(ValidationError::InvalidEnum {
                field: qualified.clone(),
                allowed: allowed
                    .iter()
                    .map(Value::to_string)
                    .collect::<Vec<_>>()
                    .join(", "),
            });
        }
    }

    if let (Some(format), Some(text)) = (field.format, value.as_str()) {
        if !format_matches(format, text) {
            errors.push(ValidationError::InvalidFormat {
                field: qualified.clone(),
                format: format.as_str().to_string(),
            });
        }
    }

    match (field.field_type, value) {
        (FieldType::Object, Value::Object(map)) if !field.properties.is_empty() => {
            let nested =
                resolve_fields(group, path, &field.properties, map, &|_: &str| false, errors);
            Value::Object(nested)
        }
        (FieldType::Array, Value::Array(items)) => match &field.items {
            Some(item_contract) => Value::Array(
                items
                    .iter()
                    .enumerate()
                    .map(|(i, item)| {
                        let item_path = format!("{}[{}]", path, i);
                        check_value(group, &item_path, item_contract, item, errors)
                    })
                    .collect(),
            ),
            None => value.clone(),
        },
        _ => value.clone(),
    }
}

/// Local part of an email address.
static EMAIL_USER_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i-u)^[a-z0-9.!#$%&'*+/=?^_`{|}~-]+\z")
        .expect("fail to create a regex for the email user")
});

/// Domain part of an email address.
static EMAIL_DOMAIN_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i-u)^[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?(?:\.[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?)+$",
    )
    .expect("fail to create a regex for the email domain")
});

fn format_matches(format: FieldFormat, text: &str) -> bool {
    match format {
        FieldFormat::Email => text.split_once('@').is_some_and(|(user, domain)| {
            user.len() <= 64
                && domain.len() <= 255
                && EMAIL_USER_PATTERN.is_match(user)
                && EMAIL_DOMAIN_PATTERN.is_match(domain)
        }),
        FieldFormat::Uri => reqwest::Url::parse(text).is_ok(),
        FieldFormat::DateTime => DateTime::parse_from_rfc3339(text).is_ok(),
        FieldFormat::Date => NaiveDate::parse_from_str(text, "%Y-%m-%d").is_ok(),
        FieldFormat::Uuid => uuid::Uuid::parse_str(text).is_ok(),
    }
}

fn parse_group(name: &str) -> Option<ParameterGroup> {
    ParameterGroup::ALL.into_iter().find(|g| g.as_str() == name)
}

fn join_path(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", prefix, name)
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ============================================================================
// TESTS
// ============================================================================
