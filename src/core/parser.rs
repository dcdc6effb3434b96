//! SF-007: Declarative definitions — YAML parsing and validation.
//!
//! New definitions are plain data instead of scripts:
//!
//! ```yaml
//! name: CountQC
//! class_name: CountQCApp
//! category: QC
//! required_columns: [Name, Count]
//! required_params: [cores, ram, normMethod]
//! params:
//!   cores: [8, 1, 2, 4]
//!   ram: 16
//!   normMethod: [logMean, none]
//! param_meta:
//!   ram:
//!     description: GB
//! modules: [Dev/R]
//! ```
//!
//! Validation checks structural constraints:
//! - `class_name` must not be empty
//! - `required_params` must not contain duplicates
//! - parameter values must be plain data (no YAML tags, string map keys)

use super::types::ApplicationDescriptor;
use super::value::Value;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Validation error.
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// A declarative application definition as written on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DefinitionFile {
    /// Display name; falls back to the file-derived name when empty
    #[serde(default)]
    pub name: String,

    pub class_name: String,

    #[serde(default, alias = "analysis_category")]
    pub category: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub required_columns: Vec<String>,

    #[serde(default)]
    pub required_params: Vec<String>,

    /// Parameter defaults (order-preserving)
    #[serde(default)]
    pub params: IndexMap<String, serde_yaml_ng::Value>,

    /// Per-parameter annotations, e.g. `ram: { description: GB }`
    #[serde(default)]
    pub param_meta: IndexMap<String, IndexMap<String, String>>,

    #[serde(default)]
    pub modules: Vec<String>,

    #[serde(default)]
    pub inherit_tags: Vec<String>,

    #[serde(default)]
    pub inherit_columns: Vec<String>,
}

/// Parse a declarative definition from a YAML string.
pub fn parse_definition(yaml: &str) -> Result<DefinitionFile, String> {
    serde_yaml_ng::from_str(yaml).map_err(|e| format!("YAML parse error: {}", e))
}

/// Validate a parsed definition. Returns a list of errors (empty = valid).
pub fn validate_definition(def: &DefinitionFile) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if def.class_name.trim().is_empty() {
        errors.push(ValidationError {
            message: "class_name must not be empty".to_string(),
        });
    }

    let mut seen = HashSet::new();
    for param in &def.required_params {
        if !seen.insert(param.as_str()) {
            errors.push(ValidationError {
                message: format!("required_params lists '{}' more than once", param),
            });
        }
    }

    for (key, value) in &def.params {
        if let Err(e) = Value::try_from(value.clone()) {
            errors.push(ValidationError {
                message: format!("param '{}': {}", key, e),
            });
        }
    }

    errors
}

/// Build a descriptor from a validated definition.
///
/// `fallback_name` is used when the file leaves `name` empty.
pub fn into_descriptor(def: DefinitionFile, fallback_name: &str) -> Result<ApplicationDescriptor, String> {
    let mut app = ApplicationDescriptor::new();
    app.name = if def.name.is_empty() {
        fallback_name.to_string()
    } else {
        def.name
    };
    app.class_name = def.class_name;
    app.analysis_category = def.category;
    app.description = def.description;
    app.required_columns = def.required_columns;
    app.required_params = def.required_params;
    app.modules = def.modules;
    app.inherit_tags = def.inherit_tags;
    app.inherit_columns = def.inherit_columns;

    for (key, yaml) in def.params {
        let value = Value::try_from(yaml).map_err(|e| format!("param '{}': {}", key, e))?;
        app.params.set_value(key, value);
    }
    for (key, meta) in def.param_meta {
        for (meta_key, meta_value) in meta {
            app.params.set_metadata(key.clone(), meta_key, meta_value);
        }
    }

    Ok(app)
}

/// Parse, validate and convert in one step.
pub fn load_definition(yaml: &str, fallback_name: &str) -> Result<ApplicationDescriptor, String> {
    let def = parse_definition(yaml)?;
    let errors = validate_definition(&def);
    if !errors.is_empty() {
        let joined: Vec<String> = errors.iter().map(ToString::to_string).collect();
        return Err(joined.join("; "));
    }
    into_descriptor(def, fallback_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    const COUNT_QC: &str = r#"
name: CountQC
class_name: CountQCApp
category: QC
description: Quality control after counting reads
required_columns: [Name, Count]
required_params: [cores, ram, normMethod, runGO]
params:
  cores: [8, 1, 2, 4]
  ram: 16
  normMethod: [logMean, none]
  runGO: true
param_meta:
  ram:
    description: GB
modules: [Dev/R]
inherit_tags: [Factor, B-Fabric]
"#;

    #[test]
    fn test_sf007_parse_valid() {
        let def = parse_definition(COUNT_QC).unwrap();
        assert_eq!(def.class_name, "CountQCApp");
        let errors = validate_definition(&def);
        assert!(errors.is_empty(), "unexpected errors: {:?}", errors.iter().map(|e| &e.message).collect::<Vec<_>>());
    }

    #[test]
    fn test_sf007_into_descriptor() {
        let app = load_definition(COUNT_QC, "CountQC").unwrap();
        assert_eq!(app.name, "CountQC");
        assert_eq!(app.analysis_category, "QC");
        assert_eq!(app.params.get("ram"), Some(&Value::Int(16)));
        assert_eq!(app.params.metadata("ram", "description"), Some("GB"));
        let keys: Vec<_> = app.params.keys().collect();
        assert_eq!(keys, vec!["cores", "ram", "normMethod", "runGO"]);
        assert_eq!(app.inherit_tags, vec!["Factor", "B-Fabric"]);
    }

    #[test]
    fn test_sf007_fallback_name() {
        let app = load_definition("class_name: XApp\n", "X").unwrap();
        assert_eq!(app.name, "X");
        assert!(app.params.is_empty());
    }

    #[test]
    fn test_sf007_missing_class_name() {
        let result = parse_definition("name: X\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_sf007_empty_class_name() {
        let def = parse_definition("class_name: ''\n").unwrap();
        let errors = validate_definition(&def);
        assert!(errors.iter().any(|e| e.message.contains("class_name")));
    }

    #[test]
    fn test_sf007_duplicate_required_param() {
        let def = parse_definition("class_name: XApp\nrequired_params: [ram, ram]\n").unwrap();
        let errors = validate_definition(&def);
        assert!(errors.iter().any(|e| e.message.contains("more than once")));
    }

    #[test]
    fn test_sf007_unknown_key_rejected() {
        let result = parse_definition("class_name: XApp\ncommands: rm -rf /\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_sf007_tagged_value_rejected() {
        let err = load_definition("class_name: XApp\nparams:\n  x: !cmd ls\n", "X").unwrap_err();
        assert!(err.contains("tag"));
    }

    #[test]
    fn test_sf007_invalid_yaml() {
        assert!(parse_definition("not: [valid: yaml: {{").is_err());
    }
}
