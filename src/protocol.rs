//! Wire types for the local command channel.
//!
//! A request is one JSON object. Its shape selects the route:
//!
//! ```json
//! {"module": "face", "action": "expression", "params": {"name": "happy"}}
//! {"action": "ping"}
//! {"module": "totem", "action": "express", "params": {"emotion": "happy"}}
//! {"batch": [{"action": "ping"}, {"module": "lcd", "action": "clear"}]}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Reserved module name for actions spanning several modules.
pub const COMPOUND_MODULE: &str = "totem";

/// Envelope decoding failures. Reported to the caller verbatim.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Command must be a JSON object")]
    NotAnObject,

    #[error("'batch' must be a list of commands")]
    BatchNotList,

    #[error("Field '{field}' must be {expected}")]
    FieldType {
        field: &'static str,
        expected: &'static str,
    },

    #[error("Missing 'action'")]
    MissingAction,
}

/// One decoded request.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    /// Entries are decoded lazily so one malformed entry only fails its own slot.
    Batch(Vec<Value>),
    System {
        action: String,
        params: Map<String, Value>,
    },
    Compound {
        action: String,
        params: Map<String, Value>,
    },
    Module {
        module: String,
        action: String,
        params: Map<String, Value>,
    },
}

impl Envelope {
    pub fn parse(raw: &str) -> Result<Self, ProtocolError> {
        Self::from_value(serde_json::from_str(raw)?)
    }

    pub fn from_value(value: Value) -> Result<Self, ProtocolError> {
        let Value::Object(mut object) = value else {
            return Err(ProtocolError::NotAnObject);
        };

        if let Some(batch) = object.remove("batch") {
            return match batch {
                Value::Array(items) => Ok(Self::Batch(items)),
                _ => Err(ProtocolError::BatchNotList),
            };
        }

        let action = match object.remove("action") {
            Some(Value::String(action)) => action,
            Some(_) => {
                return Err(ProtocolError::FieldType {
                    field: "action",
                    expected: "a string",
                });
            }
            None => return Err(ProtocolError::MissingAction),
        };

        let params = match object.remove("params") {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(params)) => params,
            Some(_) => {
                return Err(ProtocolError::FieldType {
                    field: "params",
                    expected: "an object",
                });
            }
        };

        match object.remove("module") {
            None | Some(Value::Null) => Ok(Self::System { action, params }),
            Some(Value::String(module)) if module == COMPOUND_MODULE => {
                Ok(Self::Compound { action, params })
            }
            Some(Value::String(module)) => Ok(Self::Module {
                module,
                action,
                params,
            }),
            Some(_) => Err(ProtocolError::FieldType {
                field: "module",
                expected: "a string",
            }),
        }
    }
}

/// Reply to one envelope. Batches carry their sub-responses in `results`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<Vec<Response>>,
}

impl Response {
    pub fn ok(data: impl Into<Value>) -> Self {
        Self {
            ok: true,
            data: Some(data.into()),
            error: None,
            results: None,
        }
    }

    pub fn ok_empty() -> Self {
        Self {
            ok: true,
            data: None,
            error: None,
            results: None,
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(message.into()),
            results: None,
        }
    }

    /// Aggregate of sub-responses; `ok` is their logical AND.
    pub fn batch(results: Vec<Response>) -> Self {
        Self {
            ok: results.iter().all(|r| r.ok),
            data: None,
            error: None,
            results: Some(results),
        }
    }
}

impl From<ProtocolError> for Response {
    fn from(e: ProtocolError) -> Self {
        Self::err(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn parse_module_command() {
        let env = Envelope::parse(r#"{"module":"face","action":"expression","params":{"name":"happy"}}"#)
            .unwrap();
        match env {
            Envelope::Module {
                module,
                action,
                params,
            } => {
                assert_eq!(module, "face");
                assert_eq!(action, "expression");
                assert_eq!(params.get("name"), Some(&json!("happy")));
            }
            other => panic!("unexpected envelope: {other:?}"),
        }
    }

    #[test]
    fn parse_system_command_without_params() {
        let env = Envelope::parse(r#"{"action":"ping"}"#).unwrap();
        assert_eq!(
            env,
            Envelope::System {
                action: "ping".into(),
                params: Map::new()
            }
        );
    }

    #[test]
    fn null_module_and_params_mean_system() {
        let env = Envelope::parse(r#"{"module":null,"action":"status","params":null}"#).unwrap();
        assert!(matches!(env, Envelope::System { .. }));
    }

    #[test]
    fn reserved_module_routes_to_compound() {
        let env = Envelope::parse(r#"{"module":"totem","action":"express"}"#).unwrap();
        assert!(matches!(env, Envelope::Compound { action, .. } if action == "express"));
    }

    #[test]
    fn batch_wins_over_other_fields() {
        let env = Envelope::parse(r#"{"batch":[{"action":"ping"}, 3],"action":"status"}"#).unwrap();
        assert_eq!(env, Envelope::Batch(vec![json!({"action":"ping"}), json!(3)]));
    }

    #[test]
    fn malformed_envelopes_are_rejected() {
        let cases = [
            (r#"{"action":"ping""#, "Invalid JSON"),
            ("[1,2]", "Command must be a JSON object"),
            (r#"{"batch":{}}"#, "'batch' must be a list"),
            (r#"{"module":"face"}"#, "Missing 'action'"),
            (r#"{"action":7}"#, "Field 'action' must be a string"),
            (r#"{"action":"x","params":[1]}"#, "Field 'params' must be an object"),
            (r#"{"module":1,"action":"x"}"#, "Field 'module' must be a string"),
        ];
        for (raw, expected) in cases {
            let err = Envelope::parse(raw).unwrap_err().to_string();
            assert!(err.starts_with(expected), "{raw}: {err}");
        }
    }

    #[test]
    fn response_serialization_omits_empty_fields() {
        assert_eq!(
            serde_json::to_value(Response::ok(json!({"pong": true}))).unwrap(),
            json!({"ok": true, "data": {"pong": true}})
        );
        assert_eq!(
            serde_json::to_value(Response::ok_empty()).unwrap(),
            json!({"ok": true})
        );
        assert_eq!(
            serde_json::to_value(Response::err("nope")).unwrap(),
            json!({"ok": false, "error": "nope"})
        );
    }

    #[test]
    fn batch_ok_is_conjunction() {
        assert!(Response::batch(vec![]).ok);
        assert!(Response::batch(vec![Response::ok_empty(), Response::ok(1)]).ok);
        assert!(!Response::batch(vec![Response::ok_empty(), Response::err("x")]).ok);
    }
}
