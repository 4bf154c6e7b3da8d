//! Event Schema Registry (§4.6, §3): named+versioned event shapes and
//! payload validation.

use std::collections::HashMap;
use std::sync::RwLock;

use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    String,
    Int,
    Float,
    Bool,
    Datetime,
    Array,
    Object,
    Enum,
}

#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub name: String,
    pub field_type: FieldType,
    pub required: bool,
    pub enum_values: Option<Vec<String>>,
    pub default: Option<Value>,
}

impl FieldSpec {
    pub fn required(name: &str, field_type: FieldType) -> Self {
        Self {
            name: name.to_string(),
            field_type,
            required: true,
            enum_values: None,
            default: None,
        }
    }

    pub fn optional(name: &str, field_type: FieldType) -> Self {
        Self {
            required: false,
            ..Self::required(name, field_type)
        }
    }

    pub fn enum_field(name: &str, values: &[&str], required: bool) -> Self {
        Self {
            name: name.to_string(),
            field_type: FieldType::Enum,
            required,
            enum_values: Some(values.iter().map(|s| s.to_string()).collect()),
            default: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventSchema {
    pub name: String,
    pub version: u32,
    pub fields: Vec<FieldSpec>,
    pub additional_properties: bool,
}

impl EventSchema {
    pub fn new(name: impl Into<String>, version: u32, fields: Vec<FieldSpec>) -> Self {
        Self {
            name: name.into(),
            version,
            fields,
            additional_properties: false,
        }
    }

    pub fn allow_additional_properties(mut self) -> Self {
        self.additional_properties = true;
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

fn type_matches(field_type: FieldType, value: &Value, enum_values: &Option<Vec<String>>) -> bool {
    match field_type {
        FieldType::String => value.is_string(),
        FieldType::Int => value.is_i64() || value.is_u64(),
        FieldType::Float => value.is_f64() || value.is_i64() || value.is_u64(),
        FieldType::Bool => value.is_boolean(),
        FieldType::Datetime => value
            .as_str()
            .map(|s| chrono::DateTime::parse_from_rfc3339(s).is_ok())
            .unwrap_or(false),
        FieldType::Array => value.is_array(),
        FieldType::Object => value.is_object(),
        FieldType::Enum => value
            .as_str()
            .map(|s| enum_values.as_ref().map(|v| v.iter().any(|e| e == s)).unwrap_or(false))
            .unwrap_or(false),
    }
}

/// Schemas registered under `(name, version)`; old versions are retained
/// until explicitly retired (§3).
pub struct SchemaRegistry {
    // name -> (version -> schema); "current" is the highest retained version.
    schemas: RwLock<HashMap<String, HashMap<u32, EventSchema>>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self {
            schemas: RwLock::new(HashMap::new()),
        }
    }

    pub fn register(&self, schema: EventSchema) {
        let mut schemas = self.schemas.write().unwrap();
        schemas
            .entry(schema.name.clone())
            .or_default()
            .insert(schema.version, schema);
    }

    pub fn retire(&self, name: &str, version: u32) {
        let mut schemas = self.schemas.write().unwrap();
        if let Some(versions) = schemas.get_mut(name) {
            versions.remove(&version);
        }
    }

    fn current_version(&self, name: &str) -> Option<u32> {
        let schemas = self.schemas.read().unwrap();
        schemas.get(name)?.keys().copied().max()
    }

    /// Validates a payload against the registered schema for
    /// `(event_type, current_version)`.
    pub fn validate(&self, event_type: &str, payload: &Value) -> ValidationResult {
        let schemas = self.schemas.read().unwrap();
        let Some(versions) = schemas.get(event_type) else {
            return ValidationResult {
                valid: false,
                errors: vec![format!("no schema registered for '{event_type}'")],
                warnings: vec![],
            };
        };
        let Some(version) = versions.keys().max() else {
            return ValidationResult {
                valid: false,
                errors: vec![format!("schema '{event_type}' has no retained versions")],
                warnings: vec![],
            };
        };
        let schema = &versions[version];

        let mut errors = Vec::new();
        let warnings = Vec::new();
        let Some(obj) = payload.as_object() else {
            return ValidationResult {
                valid: false,
                errors: vec!["payload must be a JSON object".to_string()],
                warnings,
            };
        };

        for field in &schema.fields {
            match obj.get(&field.name) {
                Some(value) => {
                    if !type_matches(field.field_type, value, &field.enum_values) {
                        errors.push(format!(
                            "field '{}' has wrong type or invalid enum value",
                            field.name
                        ));
                    }
                }
                None if field.required => {
                    errors.push(format!("missing required field '{}'", field.name));
                }
                None => {}
            }
        }

        if !schema.additional_properties {
            let known: Vec<&str> = schema.fields.iter().map(|f| f.name.as_str()).collect();
            for key in obj.keys() {
                if !known.contains(&key.as_str()) {
                    errors.push(format!("unexpected field '{key}'"));
                }
            }
        }

        ValidationResult {
            valid: errors.is_empty(),
            errors,
            warnings,
        }
    }
}

impl Default for SchemaRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// The canonical events named in §4.6, each with a minimal v1 schema.
/// Registered once at process start before the bus is served.
pub fn register_canonical_schemas(registry: &SchemaRegistry) {
    registry.register(
        EventSchema::new(
            "job.created",
            1,
            vec![
                FieldSpec::required("job_id", FieldType::String),
                FieldSpec::required("job_type", FieldType::String),
            ],
        )
        .allow_additional_properties(),
    );
    registry.register(
        EventSchema::new(
            "job.started",
            1,
            vec![FieldSpec::required("job_id", FieldType::String)],
        ),
    );
    registry.register(
        EventSchema::new(
            "job.completed",
            1,
            vec![FieldSpec::required("job_id", FieldType::String)],
        )
        .allow_additional_properties(),
    );
    registry.register(
        EventSchema::new(
            "job.failed",
            1,
            vec![
                FieldSpec::required("job_id", FieldType::String),
                FieldSpec::required("error_code", FieldType::String),
            ],
        )
        .allow_additional_properties(),
    );
    registry.register(
        EventSchema::new(
            "job.cancelled",
            1,
            vec![FieldSpec::required("job_id", FieldType::String)],
        ),
    );
    registry.register(
        EventSchema::new(
            "quality.alert",
            1,
            vec![
                FieldSpec::required("job_id", FieldType::String),
                FieldSpec::required("severity", FieldType::String),
            ],
        )
        .allow_additional_properties(),
    );
    registry.register(
        EventSchema::new(
            "billing.usage",
            1,
            vec![
                FieldSpec::required("tenant_id", FieldType::String),
                FieldSpec::required("metric", FieldType::String),
                FieldSpec::required("amount", FieldType::Float),
            ],
        ),
    );
    registry.register(
        EventSchema::new(
            "lineage.edge",
            1,
            vec![
                FieldSpec::required("from_node", FieldType::String),
                FieldSpec::required("to_node", FieldType::String),
                FieldSpec::required("relation", FieldType::String),
            ],
        ),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// Scenario 6 (§8): invalid event rejected, well-formed accepted.
    #[test]
    fn validates_required_int_field() {
        let registry = SchemaRegistry::new();
        registry.register(EventSchema::new(
            "job.started",
            1,
            vec![FieldSpec::required("job_id", FieldType::Int)],
        ));

        let missing = registry.validate("job.started", &json!({}));
        assert!(!missing.valid);

        let ok = registry.validate("job.started", &json!({"job_id": 42}));
        assert!(ok.valid, "{:?}", ok.errors);
    }

    #[test]
    fn unknown_fields_rejected_unless_additional_properties_allowed() {
        let registry = SchemaRegistry::new();
        registry.register(EventSchema::new(
            "strict.event",
            1,
            vec![FieldSpec::required("a", FieldType::String)],
        ));
        let result = registry.validate("strict.event", &json!({"a": "x", "b": "extra"}));
        assert!(!result.valid);

        registry.register(
            EventSchema::new("loose.event", 1, vec![FieldSpec::required("a", FieldType::String)])
                .allow_additional_properties(),
        );
        let result = registry.validate("loose.event", &json!({"a": "x", "b": "extra"}));
        assert!(result.valid);
    }

    #[test]
    fn enum_field_rejects_out_of_set_value() {
        let registry = SchemaRegistry::new();
        registry.register(EventSchema::new(
            "status.changed",
            1,
            vec![FieldSpec::enum_field("status", &["queued", "running"], true)],
        ));
        assert!(!registry
            .validate("status.changed", &json!({"status": "unknown"}))
            .valid);
        assert!(registry
            .validate("status.changed", &json!({"status": "queued"}))
            .valid);
    }

    #[test]
    fn retired_version_is_no_longer_current() {
        let registry = SchemaRegistry::new();
        registry.register(EventSchema::new("v.event", 1, vec![]));
        registry.register(EventSchema::new(
            "v.event",
            2,
            vec![FieldSpec::required("x", FieldType::String)],
        ));
        assert_eq!(registry.current_version("v.event"), Some(2));
        registry.retire("v.event", 2);
        assert_eq!(registry.current_version("v.event"), Some(1));
    }

    #[test]
    fn canonical_schemas_register_without_panicking() {
        let registry = SchemaRegistry::new();
        register_canonical_schemas(&registry);
        assert!(registry
            .validate("job.created", &json!({"job_id": "01AA", "job_type": "analyze"}))
            .valid);
    }
}
