//! A small JSON schema with type coercion.
//!
//! Only what planner and checker output needs: objects with required and
//! optional fields, arrays with length bounds, strings, bounded numbers and
//! integers, booleans, and string enums. Validation returns a coerced copy of
//! the input so `"85"` becomes `85` for a number field and `"Analyze"` becomes
//! `"analyze"` for an enum field.

use serde_json::{Map, Number, Value};

/// Expected shape of a JSON value.
#[derive(Debug, Clone, PartialEq)]
pub enum Schema {
    Object(Vec<Field>),
    Array {
        items: Box<Schema>,
        min_items: Option<usize>,
        max_items: Option<usize>,
    },
    String {
        non_empty: bool,
    },
    Number {
        min: Option<f64>,
        max: Option<f64>,
    },
    Integer {
        min: Option<i64>,
        max: Option<i64>,
    },
    Boolean,
    Enum(Vec<String>),
}

/// A named property of an object schema.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub schema: Schema,
    pub required: bool,
}

impl Field {
    pub fn required(name: impl Into<String>, schema: Schema) -> Self {
        Self {
            name: name.into(),
            schema,
            required: true,
        }
    }

    pub fn optional(name: impl Into<String>, schema: Schema) -> Self {
        Self {
            name: name.into(),
            schema,
            required: false,
        }
    }
}

impl Schema {
    pub fn string() -> Self {
        Schema::String { non_empty: false }
    }

    pub fn non_empty_string() -> Self {
        Schema::String { non_empty: true }
    }

    pub fn number(min: f64, max: f64) -> Self {
        Schema::Number {
            min: Some(min),
            max: Some(max),
        }
    }

    pub fn integer() -> Self {
        Schema::Integer {
            min: None,
            max: None,
        }
    }

    pub fn positive_integer() -> Self {
        Schema::Integer {
            min: Some(1),
            max: None,
        }
    }

    pub fn array(items: Schema) -> Self {
        Schema::Array {
            items: Box::new(items),
            min_items: None,
            max_items: None,
        }
    }

    pub fn bounded_array(items: Schema, min_items: usize, max_items: usize) -> Self {
        Schema::Array {
            items: Box::new(items),
            min_items: Some(min_items),
            max_items: Some(max_items),
        }
    }

    pub fn one_of<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Schema::Enum(values.into_iter().map(Into::into).collect())
    }

    /// Compact human-readable description, used in repair prompts.
    pub fn describe(&self) -> String {
        match self {
            Schema::Object(fields) => {
                let inner: Vec<String> = fields
                    .iter()
                    .map(|f| {
                        format!(
                            "\"{}\"{}: {}",
                            f.name,
                            if f.required { "" } else { "?" },
                            f.schema.describe()
                        )
                    })
                    .collect();
                format!("{{{}}}", inner.join(", "))
            }
            Schema::Array {
                items,
                min_items,
                max_items,
            } => {
                let bounds = match (min_items, max_items) {
                    (Some(min), Some(max)) => format!(" ({}-{} items)", min, max),
                    (Some(min), None) => format!(" (at least {} items)", min),
                    (None, Some(max)) => format!(" (at most {} items)", max),
                    (None, None) => String::new(),
                };
                format!("[{}]{}", items.describe(), bounds)
            }
            Schema::String { .. } => "string".to_string(),
            Schema::Number { min, max } => range_label("number", *min, *max),
            Schema::Integer { min, max } => {
                range_label("integer", min.map(|v| v as f64), max.map(|v| v as f64))
            }
            Schema::Boolean => "boolean".to_string(),
            Schema::Enum(values) => values
                .iter()
                .map(|v| format!("\"{}\"", v))
                .collect::<Vec<_>>()
                .join(" | "),
        }
    }
}

fn range_label(kind: &str, min: Option<f64>, max: Option<f64>) -> String {
    match (min, max) {
        (Some(min), Some(max)) => format!("{} {}..{}", kind, min, max),
        (Some(min), None) => format!("{} >= {}", kind, min),
        (None, Some(max)) => format!("{} <= {}", kind, max),
        (None, None) => kind.to_string(),
    }
}

/// Validate `value` against `schema`, returning the coerced value or a message
/// naming the offending path.
pub fn validate_value(value: &Value, schema: &Schema) -> Result<Value, String> {
    validate_at(value, schema, "$")
}

fn validate_at(value: &Value, schema: &Schema, path: &str) -> Result<Value, String> {
    match schema {
        Schema::Object(fields) => {
            let object = value
                .as_object()
                .ok_or_else(|| format!("{}: expected object, got {}", path, type_name(value)))?;
            let mut out = Map::new();
            for field in fields {
                let child_path = format!("{}.{}", path, field.name);
                match object.get(&field.name) {
                    Some(Value::Null) | None => {
                        if field.required {
                            return Err(format!("{}: required field is missing", child_path));
                        }
                    }
                    Some(child) => {
                        out.insert(
                            field.name.clone(),
                            validate_at(child, &field.schema, &child_path)?,
                        );
                    }
                }
            }
            Ok(Value::Object(out))
        }
        Schema::Array {
            items,
            min_items,
            max_items,
        } => {
            let array = value
                .as_array()
                .ok_or_else(|| format!("{}: expected array, got {}", path, type_name(value)))?;
            if let Some(min) = min_items {
                if array.len() < *min {
                    return Err(format!(
                        "{}: expected at least {} items, got {}",
                        path,
                        min,
                        array.len()
                    ));
                }
            }
            if let Some(max) = max_items {
                if array.len() > *max {
                    return Err(format!(
                        "{}: expected at most {} items, got {}",
                        path,
                        max,
                        array.len()
                    ));
                }
            }
            array
                .iter()
                .enumerate()
                .map(|(i, item)| validate_at(item, items, &format!("{}[{}]", path, i)))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array)
        }
        Schema::String { non_empty } => {
            let s = match value {
                Value::String(s) => s.clone(),
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                other => {
                    return Err(format!(
                        "{}: expected string, got {}",
                        path,
                        type_name(other)
                    ))
                }
            };
            if *non_empty && s.trim().is_empty() {
                return Err(format!("{}: must not be empty", path));
            }
            Ok(Value::String(s))
        }
        Schema::Number { min, max } => {
            let n = as_f64(value)
                .ok_or_else(|| format!("{}: expected number, got {}", path, type_name(value)))?;
            if let Some(min) = min {
                if n < *min {
                    return Err(format!("{}: {} is below minimum {}", path, n, min));
                }
            }
            if let Some(max) = max {
                if n > *max {
                    return Err(format!("{}: {} is above maximum {}", path, n, max));
                }
            }
            Number::from_f64(n)
                .map(Value::Number)
                .ok_or_else(|| format!("{}: {} is not a finite number", path, n))
        }
        Schema::Integer { min, max } => {
            let n = as_f64(value)
                .filter(|n| n.fract() == 0.0)
                .map(|n| n as i64)
                .ok_or_else(|| format!("{}: expected integer, got {}", path, value))?;
            if let Some(min) = min {
                if n < *min {
                    return Err(format!("{}: {} is below minimum {}", path, n, min));
                }
            }
            if let Some(max) = max {
                if n > *max {
                    return Err(format!("{}: {} is above maximum {}", path, n, max));
                }
            }
            Ok(Value::from(n))
        }
        Schema::Boolean => match value {
            Value::Bool(b) => Ok(Value::Bool(*b)),
            Value::String(s) if s.eq_ignore_ascii_case("true") => Ok(Value::Bool(true)),
            Value::String(s) if s.eq_ignore_ascii_case("false") => Ok(Value::Bool(false)),
            other => Err(format!(
                "{}: expected boolean, got {}",
                path,
                type_name(other)
            )),
        },
        Schema::Enum(allowed) => {
            let raw = value
                .as_str()
                .ok_or_else(|| format!("{}: expected string, got {}", path, type_name(value)))?;
            let normalized = raw.trim().to_lowercase().replace([' ', '-'], "_");
            allowed
                .iter()
                .find(|a| a.to_lowercase() == normalized)
                .map(|a| Value::String(a.clone()))
                .ok_or_else(|| {
                    format!(
                        "{}: \"{}\" is not one of {}",
                        path,
                        raw,
                        allowed.join(", ")
                    )
                })
        }
    }
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().trim_end_matches('%').trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|n| n.is_finite())
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
