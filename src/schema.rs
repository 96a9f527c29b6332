//! Declared parameter schemas for module actions.
//!
//! Every action a module exposes is described by an [`ActionSpec`]. The same
//! descriptor is served to clients through `capabilities` and used to
//! validate incoming params before the module sees them.

use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{Map, Value};

use crate::module::ModuleError;

/// Accepted parameter types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamKind {
    Str,
    Int,
    Float,
    Bool,
    /// Rows of 0/1 cells.
    Grid,
    List,
    Object,
}

impl ParamKind {
    fn expected(self) -> &'static str {
        match self {
            ParamKind::Str => "a string",
            ParamKind::Int => "an integer",
            ParamKind::Float => "a number",
            ParamKind::Bool => "a boolean",
            ParamKind::Grid => "a grid of 0/1 rows",
            ParamKind::List => "a list",
            ParamKind::Object => "an object",
        }
    }

    /// Normalizes `value` to this kind, accepting the lenient spellings
    /// clients commonly send (numeric strings, 0/1 booleans).
    fn coerce(self, value: &Value) -> Option<Value> {
        match (self, value) {
            (ParamKind::Str, Value::String(_)) => Some(value.clone()),
            (ParamKind::Str, Value::Number(n)) => Some(Value::String(n.to_string())),
            (ParamKind::Str, Value::Bool(b)) => Some(Value::String(b.to_string())),
            (ParamKind::Int, Value::Number(n)) => n
                .as_i64()
                .or_else(|| {
                    n.as_f64()
                        .filter(|f| f.is_finite() && f.fract() == 0.0)
                        .map(|f| f as i64)
                })
                .map(Value::from),
            (ParamKind::Int, Value::String(s)) => s.trim().parse::<i64>().ok().map(Value::from),
            (ParamKind::Float, Value::Number(n)) => n.as_f64().map(Value::from),
            (ParamKind::Float, Value::String(s)) => s
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|f| f.is_finite())
                .map(Value::from),
            (ParamKind::Bool, Value::Bool(_)) => Some(value.clone()),
            (ParamKind::Bool, Value::Number(n)) => match n.as_i64() {
                Some(0) => Some(Value::Bool(false)),
                Some(1) => Some(Value::Bool(true)),
                _ => None,
            },
            (ParamKind::Bool, Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => Some(Value::Bool(true)),
                "false" | "0" | "no" | "off" => Some(Value::Bool(false)),
                _ => None,
            },
            (ParamKind::Grid, Value::Array(rows)) if rows.iter().all(is_grid_row) => {
                Some(value.clone())
            }
            (ParamKind::List, Value::Array(_)) | (ParamKind::Object, Value::Object(_)) => {
                Some(value.clone())
            }
            _ => None,
        }
    }
}

fn is_grid_row(row: &Value) -> bool {
    row.as_array().is_some_and(|cells| {
        cells
            .iter()
            .all(|c| c.is_boolean() || matches!(c.as_i64(), Some(0 | 1)))
    })
}

/// Schema of a single parameter.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParamSpec {
    #[serde(rename = "type")]
    pub kind: ParamKind,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<&'static str>,
}

impl ParamSpec {
    pub fn required(kind: ParamKind) -> Self {
        Self {
            kind,
            required: true,
            default: None,
            options: None,
            min: None,
            max: None,
            description: None,
        }
    }

    /// Optional parameter without a default; the module decides.
    pub fn optional(kind: ParamKind) -> Self {
        Self {
            required: false,
            ..Self::required(kind)
        }
    }

    /// Optional parameter filled with `default` when absent.
    pub fn with_default(kind: ParamKind, default: impl Into<Value>) -> Self {
        Self {
            default: Some(default.into()),
            ..Self::optional(kind)
        }
    }

    pub fn options<I, V>(mut self, options: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.options = Some(options.into_iter().map(Into::into).collect());
        self
    }

    pub fn range(mut self, min: f64, max: f64) -> Self {
        self.min = Some(min);
        self.max = Some(max);
        self
    }

    pub fn at_least(mut self, min: f64) -> Self {
        self.min = Some(min);
        self
    }

    pub fn describe(mut self, description: &'static str) -> Self {
        self.description = Some(description);
        self
    }

    fn check(&self, name: &str, raw: &Value) -> Result<Value, ModuleError> {
        let value = self
            .kind
            .coerce(raw)
            .ok_or_else(|| invalid(name, format!("must be {}", self.kind.expected())))?;

        if let Some(options) = &self.options {
            if !options.contains(&value) {
                return Err(invalid(
                    name,
                    format!("must be one of {}", Value::Array(options.clone())),
                ));
            }
        }

        if let Some(reason) = value.as_f64().and_then(|n| self.out_of_bounds(n)) {
            return Err(invalid(name, reason));
        }

        Ok(value)
    }

    fn out_of_bounds(&self, n: f64) -> Option<String> {
        match (self.min, self.max) {
            (Some(min), Some(max)) if n < min || n > max => {
                Some(format!("must be between {min} and {max}"))
            }
            (Some(min), None) if n < min => Some(format!("must be at least {min}")),
            (None, Some(max)) if n > max => Some(format!("must be at most {max}")),
            _ => None,
        }
    }
}

fn invalid(name: &str, reason: impl Into<String>) -> ModuleError {
    ModuleError::InvalidParam {
        name: name.to_string(),
        reason: reason.into(),
    }
}

/// Descriptor of one module action.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionSpec {
    pub action: &'static str,
    pub description: &'static str,
    pub params: BTreeMap<&'static str, ParamSpec>,
}

impl ActionSpec {
    pub fn new(action: &'static str, description: &'static str) -> Self {
        Self {
            action,
            description,
            params: BTreeMap::new(),
        }
    }

    pub fn param(mut self, name: &'static str, spec: ParamSpec) -> Self {
        self.params.insert(name, spec);
        self
    }

    /// Checks `raw` against the declared params and fills in defaults.
    /// Params the action does not declare are passed through untouched.
    pub fn validate(&self, raw: &Map<String, Value>) -> Result<Params, ModuleError> {
        let mut normalized = raw.clone();
        for (&name, spec) in &self.params {
            match raw.get(name).filter(|v| !v.is_null()) {
                Some(value) => {
                    normalized.insert(name.to_string(), spec.check(name, value)?);
                }
                None if spec.required => return Err(ModuleError::MissingParam(name.to_string())),
                None => {
                    normalized.remove(name);
                    if let Some(default) = &spec.default {
                        normalized.insert(name.to_string(), default.clone());
                    }
                }
            }
        }
        Ok(Params(normalized))
    }
}

/// Looks up `action` in `specs` and validates `raw` against it.
pub fn validate(
    specs: &[ActionSpec],
    module: &str,
    action: &str,
    raw: &Map<String, Value>,
) -> Result<Params, ModuleError> {
    specs
        .iter()
        .find(|spec| spec.action == action)
        .ok_or_else(|| ModuleError::UnknownAction {
            module: module.to_string(),
            action: action.to_string(),
        })?
        .validate(raw)
}

/// Validated parameter set handed to module handlers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params(Map<String, Value>);

impl From<Map<String, Value>> for Params {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl Params {
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key).filter(|v| !v.is_null())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    fn require(&self, key: &str) -> Result<&Value, ModuleError> {
        self.get(key)
            .ok_or_else(|| ModuleError::MissingParam(key.to_string()))
    }

    pub fn str(&self, key: &str) -> Result<&str, ModuleError> {
        self.require(key)?
            .as_str()
            .ok_or_else(|| invalid(key, "must be a string"))
    }

    pub fn str_or<'a>(&'a self, key: &str, default: &'a str) -> Result<&'a str, ModuleError> {
        if self.contains(key) {
            self.str(key)
        } else {
            Ok(default)
        }
    }

    pub fn int(&self, key: &str) -> Result<i64, ModuleError> {
        self.require(key)?
            .as_i64()
            .ok_or_else(|| invalid(key, "must be an integer"))
    }

    pub fn int_or(&self, key: &str, default: i64) -> Result<i64, ModuleError> {
        if self.contains(key) {
            self.int(key)
        } else {
            Ok(default)
        }
    }

    pub fn float(&self, key: &str) -> Result<f64, ModuleError> {
        self.require(key)?
            .as_f64()
            .ok_or_else(|| invalid(key, "must be a number"))
    }

    pub fn float_or(&self, key: &str, default: f64) -> Result<f64, ModuleError> {
        if self.contains(key) {
            self.float(key)
        } else {
            Ok(default)
        }
    }

    pub fn bool(&self, key: &str) -> Result<bool, ModuleError> {
        self.require(key)?
            .as_bool()
            .ok_or_else(|| invalid(key, "must be a boolean"))
    }

    pub fn bool_or(&self, key: &str, default: bool) -> Result<bool, ModuleError> {
        if self.contains(key) {
            self.bool(key)
        } else {
            Ok(default)
        }
    }

    pub fn list(&self, key: &str) -> Result<&Vec<Value>, ModuleError> {
        self.require(key)?
            .as_array()
            .ok_or_else(|| invalid(key, "must be a list"))
    }
}
