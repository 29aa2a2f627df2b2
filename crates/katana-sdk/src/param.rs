use std::fmt;

use katana_payload::{wire_map, FieldNames, PathDocument, Value};

use crate::error::{Result, SdkError};

/// Declared type of a parameter value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParamType {
    Null,
    Boolean,
    Integer,
    Float,
    #[default]
    String,
    Binary,
    Array,
    Object,
}

impl ParamType {
    /// Parse a wire type name. Unknown names are treated as `string`.
    pub fn from_name(name: &str) -> Self {
        match name {
            "null" => ParamType::Null,
            "boolean" => ParamType::Boolean,
            "integer" => ParamType::Integer,
            "float" => ParamType::Float,
            "binary" => ParamType::Binary,
            "array" => ParamType::Array,
            "object" => ParamType::Object,
            _ => ParamType::String,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ParamType::Null => "null",
            ParamType::Boolean => "boolean",
            ParamType::Integer => "integer",
            ParamType::Float => "float",
            ParamType::String => "string",
            ParamType::Binary => "binary",
            ParamType::Array => "array",
            ParamType::Object => "object",
        }
    }

    /// Type a value travels as when none is declared.
    pub fn infer(value: &Value) -> Self {
        match value {
            Value::Null => ParamType::Null,
            Value::Bool(_) => ParamType::Boolean,
            Value::Int(_) => ParamType::Integer,
            Value::Float(_) | Value::Decimal(_) => ParamType::Float,
            Value::String(_) | Value::Binary(_) | Value::DateTime(_) | Value::Date(_) => {
                ParamType::String
            }
            Value::Array(_) => ParamType::Array,
            Value::Map(_) => ParamType::Object,
        }
    }

    /// Whether `value` may be sent with this declared type.
    pub fn accepts(self, value: &Value) -> bool {
        match self {
            ParamType::Binary => matches!(value, Value::Binary(_) | Value::String(_)),
            other => other == ParamType::infer(value),
        }
    }
}

impl fmt::Display for ParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named action parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    name: String,
    value: Value,
    param_type: ParamType,
    exists: bool,
}

impl Param {
    /// A parameter with its type inferred from the value.
    pub fn new(name: impl Into<String>, value: impl Into<Value>) -> Self {
        let value = value.into();
        Self {
            name: name.into(),
            param_type: ParamType::infer(&value),
            value,
            exists: true,
        }
    }

    /// A parameter with an explicit type, checked against the value.
    pub fn typed(name: impl Into<String>, value: impl Into<Value>, param_type: ParamType) -> Result<Self> {
        let name = name.into();
        let value = value.into();
        if !param_type.accepts(&value) {
            return Err(SdkError::invalid(format!(
                "Invalid type for parameter \"{name}\": expected {param_type}, got {}",
                ParamType::infer(&value)
            )));
        }
        Ok(Self {
            name,
            value,
            param_type,
            exists: true,
        })
    }

    /// Placeholder returned for parameters the request does not carry.
    pub fn missing(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Value::from(""),
            param_type: ParamType::String,
            exists: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn param_type(&self) -> ParamType {
        self.param_type
    }

    pub fn exists(&self) -> bool {
        self.exists
    }

    pub fn copy_with_name(&self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..self.clone()
        }
    }

    pub fn copy_with_value(&self, value: impl Into<Value>) -> Self {
        let value = value.into();
        Self {
            param_type: ParamType::infer(&value),
            value,
            ..self.clone()
        }
    }

    pub fn copy_with_type(&self, param_type: ParamType) -> Self {
        Self {
            param_type,
            ..self.clone()
        }
    }

    /// Wire form: `{name, value, type}`.
    pub fn to_value(&self, names: Option<&FieldNames>) -> Value {
        wire_map(
            names,
            [
                ("name", Value::from(self.name.as_str())),
                ("value", self.value.clone()),
                ("type", Value::from(self.param_type.as_str())),
            ],
        )
    }

    /// Read the wire form. The name is required; a missing type is inferred.
    pub fn from_value(value: &Value, names: Option<&FieldNames>) -> Result<Self> {
        let doc = PathDocument::from_value(value.clone(), names.cloned())?;
        let name = doc
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| SdkError::invalid("parameter without a name"))?;
        let value = doc.get("value").cloned().unwrap_or_default();
        let param_type = match doc.get("type").and_then(Value::as_str) {
            Some(type_name) => ParamType::from_name(type_name),
            None => ParamType::infer(&value),
        };
        Ok(Self {
            name: name.to_string(),
            value,
            param_type,
            exists: true,
        })
    }
}
