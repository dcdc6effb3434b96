//! SF-008: Schema extraction — descriptor to form fields.
//!
//! Type inference rules, applied per required parameter:
//! - array of scalars → `select`, options as written, default = first option
//! - boolean → `boolean`
//! - anything else → `text`, default = the value itself
//!
//! Parameters listed in `required_params` but never given a value are
//! skipped. Extraction cannot fail.

use super::store::ParameterStore;
use super::types::{ApplicationConfig, ApplicationDescriptor, FieldDescriptor, FieldType};
use super::value::Value;

/// Metadata key carrying a field's help text.
pub const DESCRIPTION_KEY: &str = "description";

/// Build the config for a descriptor and its parameter store.
pub fn extract(descriptor: &ApplicationDescriptor, store: &ParameterStore) -> ApplicationConfig {
    let fields = descriptor
        .required_params
        .iter()
        .filter_map(|name| {
            let value = store.get(name)?;
            let description = store.metadata(name, DESCRIPTION_KEY).map(str::to_string);
            Some(infer_field(name, value, description))
        })
        .collect();
    ApplicationConfig::assemble(descriptor, fields)
}

/// Infer one form field from a parameter default.
pub fn infer_field(name: &str, value: &Value, description: Option<String>) -> FieldDescriptor {
    let (field_type, options, default_value) = match value {
        Value::List(items) if items.iter().all(Value::is_scalar) => (
            FieldType::Select,
            Some(items.clone()),
            items.first().cloned().unwrap_or(Value::Nil),
        ),
        Value::Bool(b) => (FieldType::Boolean, None, Value::Bool(*b)),
        other => (FieldType::Text, None, other.clone()),
    };
    FieldDescriptor {
        name: name.to_string(),
        field_type,
        options,
        default_value,
        description,
    }
}
