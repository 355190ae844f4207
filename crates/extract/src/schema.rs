use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::fmt;
use std::str::FromStr;

use crate::error::SchemaError;

/// Title given to the generated JSON Schema object.
pub const SCHEMA_TITLE: &str = "ExtractSchema";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    String,
    Boolean,
    Integer,
    Float,
}

impl FieldType {
    /// JSON Schema type keyword for this field type
    pub fn json_type(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Boolean => "boolean",
            FieldType::Integer => "integer",
            FieldType::Float => "number",
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldType::String => "string",
            FieldType::Boolean => "boolean",
            FieldType::Integer => "integer",
            FieldType::Float => "float",
        };
        f.write_str(name)
    }
}

impl FromStr for FieldType {
    type Err = SchemaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "string" | "str" => Ok(FieldType::String),
            "boolean" | "bool" => Ok(FieldType::Boolean),
            "integer" | "int" => Ok(FieldType::Integer),
            "float" | "number" => Ok(FieldType::Float),
            _ => Err(SchemaError::InvalidType {
                given: s.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default = "default_required")]
    pub required: bool,
}

fn default_required() -> bool {
    true
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            required: true,
        }
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }
}

/// Compiled, immutable view of a schema ready to send to the extraction service.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SchemaContract {
    fields: Vec<FieldSpec>,
}

impl SchemaContract {
    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    /// Render as a JSON Schema object describing the expected payload
    pub fn to_json_schema(&self) -> Value {
        let mut properties = Map::new();
        for field in &self.fields {
            properties.insert(
                field.name.clone(),
                json!({
                    "title": title_case(&field.name),
                    "type": field.field_type.json_type(),
                }),
            );
        }

        let required: Vec<&str> = self
            .fields
            .iter()
            .filter(|f| f.required)
            .map(|f| f.name.as_str())
            .collect();

        json!({
            "title": SCHEMA_TITLE,
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }
}

/// "company_mission" -> "Company Mission"
fn title_case(name: &str) -> String {
    name.split(|c: char| c == '_' || c == '-' || c.is_whitespace())
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Ordered, user-edited list of fields.
#[derive(Debug, Clone, Default)]
pub struct SchemaBuilder {
    fields: Vec<FieldSpec>,
    max_fields: Option<usize>,
}

impl SchemaBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder that refuses to grow past `max_fields` entries
    pub fn with_limit(max_fields: usize) -> Self {
        Self {
            fields: Vec::new(),
            max_fields: Some(max_fields),
        }
    }

    pub fn max_fields(&self) -> Option<usize> {
        self.max_fields
    }

    /// Add a field whose type is given by name ("string", "int", ...)
    pub fn add_field(
        &mut self,
        name: &str,
        field_type: &str,
        required: bool,
    ) -> Result<(), SchemaError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(SchemaError::EmptyName);
        }
        let field_type = field_type.parse::<FieldType>()?;

        self.add(FieldSpec {
            name: name.to_string(),
            field_type,
            required,
        })
    }

    pub fn add(&mut self, mut spec: FieldSpec) -> Result<(), SchemaError> {
        spec.name = spec.name.trim().to_string();
        if spec.name.is_empty() {
            return Err(SchemaError::EmptyName);
        }
        if self.contains(&spec.name) {
            return Err(SchemaError::DuplicateField { name: spec.name });
        }
        if let Some(limit) = self.max_fields {
            if self.fields.len() >= limit {
                return Err(SchemaError::TooManyFields { limit });
            }
        }

        tracing::debug!(field = %spec.name, field_type = %spec.field_type, "Schema field added");
        self.fields.push(spec);
        Ok(())
    }

    pub fn remove_field(&mut self, name: &str) {
        let name = name.trim();
        self.fields.retain(|f| f.name != name);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.iter().any(|f| f.name == name)
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn clear(&mut self) {
        self.fields.clear();
    }

    /// `None` when no fields are defined, meaning the service infers the structure
    pub fn compile(&self) -> Option<SchemaContract> {
        if self.fields.is_empty() {
            return None;
        }
        Some(SchemaContract {
            fields: self.fields.clone(),
        })
    }

    pub fn compile_required(&self) -> Result<SchemaContract, SchemaError> {
        self.compile().ok_or(SchemaError::EmptySchema)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SchemaBuilder {
        let mut builder = SchemaBuilder::new();
        builder.add_field("company_mission", "str", true).unwrap();
        builder.add_field("is_open_source", "bool", false).unwrap();
        builder.add_field("employees", "int", true).unwrap();
        builder.add_field("price", "float", true).unwrap();
        builder
    }

    #[test]
    fn test_compile_preserves_insertion_order() {
        let builder = sample();
        let contract = builder.compile().unwrap();

        let names: Vec<&str> = contract.field_names().collect();
        assert_eq!(names, vec!["company_mission", "is_open_source", "employees", "price"]);
        assert_eq!(contract.fields(), builder.fields());
    }

    #[test]
    fn test_duplicate_field_leaves_builder_unchanged() {
        let mut builder = sample();
        let before = builder.fields().to_vec();

        let err = builder.add_field("employees", "float", false).unwrap_err();
        assert_eq!(err, SchemaError::DuplicateField { name: "employees".to_string() });
        assert_eq!(builder.fields(), before.as_slice());
    }

    #[test]
    fn test_invalid_type_and_blank_name() {
        let mut builder = SchemaBuilder::new();

        assert_eq!(
            builder.add_field("when", "date", true).unwrap_err(),
            SchemaError::InvalidType { given: "date".to_string() }
        );
        assert_eq!(builder.add_field("   ", "str", true).unwrap_err(), SchemaError::EmptyName);
        assert!(builder.is_empty());
    }

    #[test]
    fn test_names_are_trimmed() {
        let mut builder = SchemaBuilder::new();
        builder.add_field("  title ", "String", true).unwrap();

        assert!(builder.contains("title"));
        assert!(matches!(
            builder.add_field("title", "str", true),
            Err(SchemaError::DuplicateField { .. })
        ));
    }

    #[test]
    fn test_field_limit() {
        let mut builder = SchemaBuilder::with_limit(2);
        builder.add_field("a", "str", true).unwrap();
        builder.add_field("b", "str", true).unwrap();

        assert_eq!(
            builder.add_field("c", "str", true).unwrap_err(),
            SchemaError::TooManyFields { limit: 2 }
        );
        assert_eq!(builder.len(), 2);
    }

    #[test]
    fn test_remove_field() {
        let mut builder = sample();
        builder.remove_field("employees");
        builder.remove_field("not_there");

        let names: Vec<&str> = builder.fields().iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["company_mission", "is_open_source", "price"]);
    }

    #[test]
    fn test_empty_schema() {
        let builder = SchemaBuilder::new();

        assert!(builder.compile().is_none());
        assert_eq!(builder.compile_required().unwrap_err(), SchemaError::EmptySchema);
    }

    #[test]
    fn test_json_schema() {
        let schema = sample().compile().unwrap().to_json_schema();

        assert_eq!(schema["title"], "ExtractSchema");
        assert_eq!(schema["type"], "object");
        assert_eq!(schema["properties"]["company_mission"]["title"], "Company Mission");
        assert_eq!(schema["properties"]["company_mission"]["type"], "string");
        assert_eq!(schema["properties"]["is_open_source"]["type"], "boolean");
        assert_eq!(schema["properties"]["employees"]["type"], "integer");
        assert_eq!(schema["properties"]["price"]["type"], "number");
        assert_eq!(schema["required"], json!(["company_mission", "employees", "price"]));
    }

    #[test]
    fn test_field_spec_deserialize_defaults_required() {
        let spec: FieldSpec = serde_json::from_str(r#"{"name": "title", "type": "string"}"#).unwrap();
        assert!(spec.required);
        assert_eq!(spec.field_type, FieldType::String);
    }
}
