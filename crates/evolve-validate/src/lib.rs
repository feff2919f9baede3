#![warn(missing_docs)]
//! Schema validation for `output/result.json`, in strict or loose
//! (coercing) mode.
//!
//! Rather than accepting an arbitrary runtime-reflected type (Design
//! Notes: "dynamic schema input"), callers implement [`SchemaDescriptor`]
//! once per accepted shape (a `schemars`-derived Rust type, or a raw JSON
//! Schema document) and get a uniform `validate` entry point.

use evolve_core::ValidationMode;
use evolve_error::{EvolveError, Result};
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Something that can describe itself as a JSON Schema document.
///
/// Implemented once for "a `schemars`-derived Rust type" and once for "a
/// raw JSON Schema value handed to us by the caller"; no runtime
/// reflection is performed on arbitrary types.
pub trait SchemaDescriptor {
    /// Produce the JSON Schema document this descriptor represents.
    fn describe(&self) -> Value;
}

/// A descriptor backed by a `schemars::JsonSchema` Rust type.
pub struct TypedSchema<T> {
    _marker: std::marker::PhantomData<T>,
}

impl<T> Default for TypedSchema<T> {
    fn default() -> Self {
        TypedSchema { _marker: std::marker::PhantomData }
    }
}

impl<T: schemars::JsonSchema> SchemaDescriptor for TypedSchema<T> {
    fn describe(&self) -> Value {
        let schema = schemars::schema_for!(T);
        serde_json::to_value(schema).unwrap_or(Value::Null)
    }
}

/// A descriptor backed by a raw JSON Schema document supplied by the
/// caller.
pub struct RawSchema(pub Value);

impl SchemaDescriptor for RawSchema {
    fn describe(&self) -> Value {
        self.0.clone()
    }
}

/// Validate `raw` (the textual contents of `output/result.json`) against
/// `schema`, deserializing into `T` on success.
///
/// In [`ValidationMode::Strict`], type mismatches fail outright. In
/// [`ValidationMode::Loose`], primitive coercion (string → number, string →
/// bool, string → date) is attempted before validation.
pub fn validate<T: DeserializeOwned>(
    raw: &str,
    schema: &dyn SchemaDescriptor,
    mode: ValidationMode,
) -> Result<T> {
    let mut value: Value = serde_json::from_str(raw)
        .map_err(|e| EvolveError::SchemaValidationError(format!("invalid JSON: {e}")))?;

    if mode == ValidationMode::Loose {
        coerce_in_place(&mut value, &schema.describe());
    }

    let compiled = jsonschema::validator_for(&schema.describe())
        .map_err(|e| EvolveError::SchemaValidationError(format!("invalid schema: {e}")))?;

    let errors: Vec<String> = compiled.iter_errors(&value).map(|e| e.to_string()).collect();
    if !errors.is_empty() {
        return Err(EvolveError::SchemaValidationError(errors.join("; ")));
    }

    serde_json::from_value(value).map_err(|e| EvolveError::SchemaValidationError(format!("{e}")))
}

/// Walk `value` against `schema`'s declared property types, coercing
/// string-typed leaves into numbers/booleans/dates where the schema
/// expects them. Conservative: leaves anything it doesn't recognise
/// untouched so the subsequent strict validation pass reports it.
fn coerce_in_place(value: &mut Value, schema: &Value) {
    let Some(schema_obj) = schema.as_object() else { return };

    match value {
        Value::Object(map) => {
            let Some(props) = schema_obj.get("properties").and_then(Value::as_object) else { return };
            for (key, sub_schema) in props {
                if let Some(field) = map.get_mut(key.as_str()) {
                    coerce_leaf(field, sub_schema);
                    coerce_in_place(field, sub_schema);
                }
            }
        }
        Value::Array(items) => {
            if let Some(item_schema) = schema_obj.get("items") {
                for item in items.iter_mut() {
                    coerce_leaf(item, item_schema);
                    coerce_in_place(item, item_schema);
                }
            }
        }
        _ => {}
    }
}

fn coerce_leaf(value: &mut Value, schema: &Value) {
    let Some(expected_type) = schema.get("type").and_then(Value::as_str) else { return };
    let Value::String(s) = value else { return };

    match expected_type {
        "number" | "integer" => {
            if let Ok(n) = s.parse::<f64>() {
                *value = serde_json::json!(n);
            }
        }
        "boolean" => match s.as_str() {
            "true" => *value = Value::Bool(true),
            "false" => *value = Value::Bool(false),
            _ => {}
        },
        _ => {}
    }
}
