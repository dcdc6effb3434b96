//! SF-003: Descriptor, form-field and config types.
//!
//! `ApplicationDescriptor` is the mutable scratch object an evaluation fills
//! in; `ApplicationConfig` is the immutable, serializable result handed to
//! the API layer.

use super::store::ParameterStore;
use super::value::Value;
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Descriptor
// ============================================================================

/// In-memory result of evaluating one definition file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApplicationDescriptor {
    /// Canonical display name
    pub name: String,

    /// Declared implementation class (e.g. `FastqcApp`)
    pub class_name: String,

    /// Grouping tag such as "QC"
    pub analysis_category: String,

    /// Free text, may contain HTML
    pub description: String,

    /// Columns the input dataset must provide
    pub required_columns: Vec<String>,

    /// Parameters rendered as form fields
    pub required_params: Vec<String>,

    /// Environment modules (informational)
    pub modules: Vec<String>,

    /// Tags propagated to the output dataset
    pub inherit_tags: Vec<String>,

    /// Columns propagated to the output dataset
    pub inherit_columns: Vec<String>,

    /// Defaults and metadata written by the definition
    pub params: ParameterStore,
}

impl ApplicationDescriptor {
    pub fn new() -> Self {
        Self::default()
    }
}

// ============================================================================
// Form fields
// ============================================================================

/// UI widget kind inferred from a parameter's default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Text,
    Boolean,
    Select,
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Boolean => write!(f, "boolean"),
            Self::Select => write!(f, "select"),
        }
    }
}

/// One form field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub name: String,

    #[serde(rename = "type")]
    pub field_type: FieldType,

    /// Choices; only present for `select`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<Value>>,

    pub default_value: Value,

    /// Only present when the definition annotated the parameter
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

// ============================================================================
// Application config
// ============================================================================

/// Parsed application, ready for serialization.
///
/// Fields are read-only once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationConfig {
    name: String,
    class_name: String,
    #[serde(rename = "category")]
    analysis_category: String,
    description: String,
    required_columns: Vec<String>,
    required_params: Vec<String>,
    form_fields: Vec<FieldDescriptor>,
    modules: Vec<String>,
    inherit_tags: Vec<String>,
    inherit_columns: Vec<String>,
}

impl ApplicationConfig {
    /// Assemble a config from a descriptor's metadata and extracted fields.
    pub(crate) fn assemble(descriptor: &ApplicationDescriptor, form_fields: Vec<FieldDescriptor>) -> Self {
        Self {
            name: descriptor.name.clone(),
            class_name: descriptor.class_name.clone(),
            analysis_category: descriptor.analysis_category.clone(),
            description: descriptor.description.clone(),
            required_columns: descriptor.required_columns.clone(),
            required_params: descriptor.required_params.clone(),
            form_fields,
            modules: descriptor.modules.clone(),
            inherit_tags: descriptor.inherit_tags.clone(),
            inherit_columns: descriptor.inherit_columns.clone(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn class_name(&self) -> &str {
        &self.class_name
    }

    pub fn analysis_category(&self) -> &str {
        &self.analysis_category
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn required_columns(&self) -> &[String] {
        &self.required_columns
    }

    pub fn required_params(&self) -> &[String] {
        &self.required_params
    }

    pub fn form_fields(&self) -> &[FieldDescriptor] {
        &self.form_fields
    }

    /// Look up a form field by parameter name.
    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.form_fields.iter().find(|f| f.name == name)
    }

    pub fn modules(&self) -> &[String] {
        &self.modules
    }

    pub fn inherit_tags(&self) -> &[String] {
        &self.inherit_tags
    }

    pub fn inherit_columns(&self) -> &[String] {
        &self.inherit_columns
    }
}

// ============================================================================
// Definition files
// ============================================================================

/// On-disk flavour of a definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DefinitionFormat {
    /// Declarative YAML (`FooApp.yaml`)
    Declarative,
    /// Legacy SUSHI script (`FooApp.rb`)
    Script,
}

impl fmt::Display for DefinitionFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Declarative => write!(f, "yaml"),
            Self::Script => write!(f, "script"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_descriptor() -> ApplicationDescriptor {
        ApplicationDescriptor {
            name: "Fastqc".to_string(),
            class_name: "FastqcApp".to_string(),
            analysis_category: "QC".to_string(),
            description: "reads QC".to_string(),
            required_columns: vec!["Name".to_string(), "Read1".to_string()],
            required_params: vec!["ram".to_string()],
            modules: vec!["QC/FastQC".to_string()],
            inherit_tags: vec![],
            inherit_columns: vec!["Order Id".to_string()],
            params: ParameterStore::new(),
        }
    }

    #[test]
    fn test_sf003_config_json_shape() {
        let field = FieldDescriptor {
            name: "ram".to_string(),
            field_type: FieldType::Text,
            options: None,
            default_value: Value::Int(15),
            description: Some("GB".to_string()),
        };
        let config = ApplicationConfig::assemble(&sample_descriptor(), vec![field]);
        let json = serde_json::to_value(&config).unwrap();
        let keys: Vec<_> = json.as_object().unwrap().keys().cloned().collect();
        assert!(keys.contains(&"category".to_string()));
        assert!(!keys.contains(&"analysis_category".to_string()));
        assert_eq!(json["form_fields"][0]["type"], "text");
        assert_eq!(json["form_fields"][0]["default_value"], 15);
        assert_eq!(json["form_fields"][0]["description"], "GB");
        assert!(json["form_fields"][0].get("options").is_none());
    }

    #[test]
    fn test_sf003_field_without_description_omits_key() {
        let field = FieldDescriptor {
            name: "paired".to_string(),
            field_type: FieldType::Boolean,
            options: None,
            default_value: Value::Bool(false),
            description: None,
        };
        let json = serde_json::to_string(&field).unwrap();
        assert_eq!(json, r#"{"name":"paired","type":"boolean","default_value":false}"#);
    }

    #[test]
    fn test_sf003_config_roundtrip() {
        let config = ApplicationConfig::assemble(&sample_descriptor(), vec![]);
        let json = serde_json::to_string(&config).unwrap();
        let back: ApplicationConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
        assert_eq!(back.analysis_category(), "QC");
    }

    #[test]
    fn test_sf003_field_type_display() {
        assert_eq!(FieldType::Select.to_string(), "select");
        assert_eq!(DefinitionFormat::Script.to_string(), "script");
    }
}
