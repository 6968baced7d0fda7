//! Parameter contract types
//!
//! A Function's parameters are an explicit, ordered list of groups
//! (path, query, header, cookie, body), each holding an ordered list of
//! fields. Every field carries its own `visible` and `required` flags and an
//! optional default, so the capability boundary (what a caller may set) is a
//! plain data structure rather than a side effect of a schema validator.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

/// Where an assembled parameter is placed on the outbound request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterGroup {
    Path,
    Query,
    Header,
    Cookie,
    Body,
}

impl ParameterGroup {
    /// All groups in dispatch order.
    pub const ALL: [ParameterGroup; 5] = [
        ParameterGroup::Path,
        ParameterGroup::Query,
        ParameterGroup::Header,
        ParameterGroup::Cookie,
        ParameterGroup::Body,
    ];

    /// Wire name of the group, as used in caller input objects.
    pub fn as_str(&self) -> &'static str {
        match self {
            ParameterGroup::Path => "path",
            ParameterGroup::Query => "query",
            ParameterGroup::Header => "header",
            ParameterGroup::Cookie => "cookie",
            ParameterGroup::Body => "body",
        }
    }
}

impl std::fmt::Display for ParameterGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declared primitive or container type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Integer => "integer",
            FieldType::Number => "number",
            FieldType::Boolean => "boolean",
            FieldType::Array => "array",
            FieldType::Object => "object",
        }
    }

    /// Whether a JSON value has this type.
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            FieldType::String => value.is_string(),
            FieldType::Integer => value.is_i64() || value.is_u64(),
            FieldType::Number => value.is_number(),
            FieldType::Boolean => value.is_boolean(),
            FieldType::Array => value.is_array(),
            FieldType::Object => value.is_object(),
        }
    }
}

/// String formats checked by the Schema Resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FieldFormat {
    Email,
    Uri,
    DateTime,
    Date,
    Uuid,
}

impl FieldFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldFormat::Email => "email",
            FieldFormat::Uri => "uri",
            FieldFormat::DateTime => "date-time",
            FieldFormat::Date => "date",
            FieldFormat::Uuid => "uuid",
        }
    }
}

fn default_visible() -> bool {
    true
}

/// One field of a parameter group (or of a nested object).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterField {
    pub name: String,

    #[serde(rename = "type")]
    pub field_type: FieldType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Whether a caller may supply this field.
    #[serde(default = "default_visible")]
    pub visible: bool,

    /// Whether the field must resolve to a value before dispatch.
    #[serde(default)]
    pub required: bool,

    /// Value used when the caller omits the field.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,

    /// Allowed values, if restricted.
    #[serde(default, rename = "enum", skip_serializing_if = "Option::is_none")]
    pub allowed_values: Option<Vec<Value>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<FieldFormat>,

    /// Fields of a nested object (only meaningful for `object`).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub properties: Vec<ParameterField>,

    /// Element contract of an array (only meaningful for `array`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<ParameterField>>,
}

impl ParameterField {
    /// Create a visible, optional field with no default.
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            description: None,
            visible: true,
            required: false,
            default: None,
            allowed_values: None,
            format: None,
            properties: Vec::new(),
            items: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn with_format(mut self, format: FieldFormat) -> Self {
        self.format = Some(format);
        self
    }

    pub fn with_enum(mut self, values: Vec<Value>) -> Self {
        self.allowed_values = Some(values);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_properties(mut self, properties: Vec<ParameterField>) -> Self {
        self.properties = properties;
        self
    }

    pub fn with_items(mut self, items: ParameterField) -> Self {
        self.items = Some(Box::new(items));
        self
    }

    /// JSON-schema rendering of the caller-visible part of this field.
    pub fn visible_schema(&self) -> Value {
        let mut schema = Map::new();
        schema.insert("type".into(), json!(self.field_type.as_str()));
        if let Some(description) = &self.description {
            schema.insert("description".into(), json!(description));
        }
        if let Some(values) = &self.allowed_values {
            schema.insert("enum".into(), Value::Array(values.clone()));
        }
        if let Some(format) = &self.format {
            schema.insert("format".into(), json!(format.as_str()));
        }
        if let Some(default) = &self.default {
            schema.insert("default".into(), default.clone());
        }
        if self.field_type == FieldType::Object {
            let (properties, required) = visible_properties(&self.properties);
            schema.insert("properties".into(), Value::Object(properties));
            schema.insert("required".into(), json!(required));
            schema.insert("additionalProperties".into(), json!(false));
        }
        if let Some(items) = &self.items {
            schema.insert("items".into(), items.visible_schema());
        }
        Value::Object(schema)
    }
}

fn visible_properties(fields: &[ParameterField]) -> (Map<String, Value>, Vec<String>) {
    let mut properties = Map::new();
    let mut required = Vec::new();
    for field in fields.iter().filter(|f| f.visible) {
        properties.insert(field.name.clone(), field.visible_schema());
        if field.required && field.default.is_none() {
            required.push(field.name.clone());
        }
    }
    (properties, required)
}

/// All fields of one parameter group, in declaration order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupSchema {
    pub group: ParameterGroup,
    #[serde(default)]
    pub fields: Vec<ParameterField>,
}

impl GroupSchema {
    pub fn new(group: ParameterGroup, fields: Vec<ParameterField>) -> Self {
        Self { group, fields }
    }

    /// Names a caller may set in this group.
    pub fn visible(&self) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|f| f.visible)
            .map(|f| f.name.as_str())
            .collect()
    }

    /// Names that must resolve to a value before dispatch.
    pub fn required(&self) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|f| f.required)
            .map(|f| f.name.as_str())
            .collect()
    }

    pub fn field(&self, name: &str) -> Option<&ParameterField> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// One row of the flattened parameter contract.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParameterEntry<'a> {
    pub group: ParameterGroup,
    pub field: &'a ParameterField,
}

impl ParameterEntry<'_> {
    pub fn visible(&self) -> bool {
        self.field.visible
    }

    pub fn required(&self) -> bool {
        self.field.required
    }

    pub fn default(&self) -> Option<&Value> {
        self.field.default.as_ref()
    }
}

/// The full parameter contract of a Function.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FunctionParameters {
    pub groups: Vec<GroupSchema>,
}

impl FunctionParameters {
    pub fn new(groups: Vec<GroupSchema>) -> Self {
        Self { groups }
    }

    pub fn group(&self, group: ParameterGroup) -> Option<&GroupSchema> {
        self.groups.iter().find(|g| g.group == group)
    }

    /// Ordered (group, field, visible, required, default) rows.
    pub fn entries(&self) -> impl Iterator<Item = ParameterEntry<'_>> {
        self.groups.iter().flat_map(|g| {
            g.fields.iter().map(move |field| ParameterEntry {
                group: g.group,
                field,
            })
        })
    }

    /// JSON-schema object describing everything a caller may supply.
    ///
    /// Groups with no visible field are omitted entirely.
    pub fn visible_schema(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();
        for group in &self.groups {
            let (group_properties, group_required) = visible_properties(&group.fields);
            if group_properties.is_empty() {
                continue;
            }
            if !group_required.is_empty() {
                required.push(group.group.as_str().to_string());
            }
            properties.insert(
                group.group.as_str().to_string(),
                json!({
                    "type": "object",
                    "properties": group_properties,
                    "required": group_required,
                    "additionalProperties": false,
                }),
            );
        }
        json!({
            "type": "object",
            "properties": properties,
            "required": required,
            "additionalProperties": false,
        })
    }
}

/// Output of the Schema Resolver: one assembled object per group.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssembledArguments {
    groups: BTreeMap<ParameterGroup, Map<String, Value>>,
}

impl AssembledArguments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, group: ParameterGroup, values: Map<String, Value>) {
        self.groups.insert(group, values);
    }

    /// Assembled values of a group (empty if the group was absent).
    pub fn group(&self, group: ParameterGroup) -> Option<&Map<String, Value>> {
        self.groups.get(&group)
    }

    pub fn get(&self, group: ParameterGroup, field: &str) -> Option<&Value> {
        self.groups.get(&group).and_then(|g| g.get(field))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ParameterGroup, &Map<String, Value>)> {
        self.groups.iter()
    }

    /// Total number of assembled top-level fields.
    pub fn len(&self) -> usize {
        self.groups.values().map(Map::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Render as a single object keyed by group name.
    pub fn to_value(&self) -> Value {
        let mut out = Map::new();
        for (group, values) in &self.groups {
            out.insert(group.as_str().to_string(), Value::Object(values.clone()));
        }
        Value::Object(out)
    }
}

// ============================================================================
// TESTS
// ============================================================================
