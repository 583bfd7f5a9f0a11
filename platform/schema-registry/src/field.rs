use super::Shape;
use serde_json::Value;

/// The JSON type a field must hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    String,
    Integer,
    Float,
    Bool,
    Object,
    Array,
}

impl FieldType {
    fn matches(self, value: &Value) -> bool {
        match self {
            FieldType::String => value.is_string(),
            FieldType::Integer => value.is_i64() || value.is_u64(),
            FieldType::Float => value.is_number(),
            FieldType::Bool => value.is_boolean(),
            FieldType::Object => value.is_object(),
            FieldType::Array => value.is_array(),
        }
    }
}

/// One field's validation rule within a [`Shape`].
#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub field_type: FieldType,
    pub required: bool,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub enum_values: Option<Vec<String>>,
}

impl FieldSpec {
    pub fn required(field_type: FieldType) -> Self {
        Self {
            field_type,
            required: true,
            min: None,
            max: None,
            enum_values: None,
        }
    }

    pub fn optional(field_type: FieldType) -> Self {
        Self {
            field_type,
            required: false,
            min: None,
            max: None,
            enum_values: None,
        }
    }

    pub fn with_bounds(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.min = min;
        self.max = max;
        self
    }

    pub fn with_enum(mut self, values: Vec<String>) -> Self {
        self.enum_values = Some(values);
        self
    }

    fn validate(&self, field_name: &str, value: Option<&Value>) -> Result<(), String> {
        let value = match value {
            Some(v) if !v.is_null() => v,
            Some(_) | None => {
                return if self.required {
                    Err(format!("missing required field '{field_name}'"))
                } else {
                    Ok(())
                }
            }
        };

        if !self.field_type.matches(value) {
            return Err(format!(
                "field '{field_name}' has wrong type: expected {:?}",
                self.field_type
            ));
        }

        if let Some(num) = value.as_f64() {
            if let Some(min) = self.min {
                if num < min {
                    return Err(format!("field '{field_name}' below minimum {min}"));
                }
            }
            if let Some(max) = self.max {
                if num > max {
                    return Err(format!("field '{field_name}' above maximum {max}"));
                }
            }
        }

        if let (Some(allowed), Some(s)) = (&self.enum_values, value.as_str()) {
            if !allowed.iter().any(|a| a == s) {
                return Err(format!(
                    "field '{field_name}' value '{s}' not in allowed set {allowed:?}"
                ));
            }
        }

        Ok(())
    }
}

/// Validate `payload` against `shape`, requiring it to be a JSON object and
/// every declared field to pass its [`FieldSpec`].
pub(crate) fn validate_shape(shape: &Shape, payload: &Value) -> Result<(), String> {
    let obj = payload
        .as_object()
        .ok_or_else(|| "payload is not a JSON object".to_string())?;

    for (field_name, spec) in shape {
        spec.validate(field_name, obj.get(field_name))?;
    }

    Ok(())
}
