//! The contract every hardware peripheral implements.

use std::panic::{AssertUnwindSafe, catch_unwind};

use log::error;
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::{
    event::EventSink,
    protocol::Response,
    schema::{self, ActionSpec, Params},
};

/// Failures surfaced by module actions. The `Display` text is what the
/// client sees in `error`.
#[derive(Debug, Error)]
pub enum ModuleError {
    #[error("Unknown {module} action '{action}'")]
    UnknownAction { module: String, action: String },

    #[error("Missing required param '{0}'")]
    MissingParam(String),

    #[error("Param '{name}' {reason}")]
    InvalidParam { name: String, reason: String },

    #[error("{0}")]
    Invalid(String),

    #[error("{0} is not initialized")]
    NotInitialized(&'static str),

    #[error("hardware error: {0}")]
    Hardware(#[from] std::io::Error),
}

impl From<ModuleError> for Response {
    fn from(e: ModuleError) -> Self {
        Response::err(e.to_string())
    }
}

impl Response {
    /// `Value::Null` maps to a data-less success.
    pub fn from_result(result: Result<Value, ModuleError>) -> Self {
        match result {
            Ok(Value::Null) => Response::ok_empty(),
            Ok(data) => Response::ok(data),
            Err(e) => e.into(),
        }
    }
}

/// A driver for one peripheral.
///
/// Instances are created without touching hardware. The registry calls
/// [`attach`](Self::attach) and then [`init`](Self::init) exactly once, and
/// [`cleanup`](Self::cleanup) exactly once at the end of the module's life.
/// `handle_command` is only ever called under the daemon-wide module lock;
/// `state` and `capabilities` may be called at any time.
pub trait HardwareModule: Send + Sync {
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    /// Wires the event upcall. Called before `init`.
    fn attach(&self, _events: EventSink) {}

    /// Acquires the hardware resource.
    fn init(&self) -> anyhow::Result<()>;

    /// Releases the hardware resource. Failures are logged, never returned.
    fn cleanup(&self);

    /// Executes one validated action. Faults become error responses.
    fn handle_command(&self, action: &str, params: &Params) -> Response;

    fn state(&self) -> Result<Value, ModuleError>;

    /// Static action descriptors. Must not touch hardware.
    fn capabilities(&self) -> Vec<ActionSpec>;
}

/// Entry of the `list()` view of the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleInfo {
    pub name: &'static str,
    pub description: &'static str,
}

/// Validates `params` against the module's schema and runs the action,
/// containing any panic inside the module.
///
/// Callers must hold the module lock.
pub fn invoke(module: &dyn HardwareModule, action: &str, params: &Map<String, Value>) -> Response {
    let params = match schema::validate(&module.capabilities(), module.name(), action, params) {
        Ok(params) => params,
        Err(e) => return e.into(),
    };

    match catch_unwind(AssertUnwindSafe(|| module.handle_command(action, &params))) {
        Ok(response) => response,
        Err(_) => {
            error!("Module '{}' panicked while handling '{}'", module.name(), action);
            Response::err(format!("{} failed while handling '{action}'", module.name()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ParamKind, ParamSpec};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Mutex;

    struct Dimmer {
        level: Mutex<i64>,
    }

    impl HardwareModule for Dimmer {
        fn name(&self) -> &'static str {
            "dimmer"
        }

        fn description(&self) -> &'static str {
            "Test dimmer"
        }

        fn init(&self) -> anyhow::Result<()> {
            Ok(())
        }

        fn cleanup(&self) {}

        fn handle_command(&self, action: &str, params: &Params) -> Response {
            match action {
                "set" => Response::from_result(params.int("level").map(|level| {
                    *self.level.lock().unwrap() = level;
                    Value::Null
                })),
                "explode" => panic!("boom"),
                _ => Response::err("unreachable"),
            }
        }

        fn state(&self) -> Result<Value, ModuleError> {
            Ok(json!({"level": *self.level.lock().unwrap()}))
        }

        fn capabilities(&self) -> Vec<ActionSpec> {
            vec![
                ActionSpec::new("set", "Set level")
                    .param("level", ParamSpec::required(ParamKind::Int).range(0.0, 10.0)),
                ActionSpec::new("explode", "Panics"),
            ]
        }
    }

    fn dimmer() -> Dimmer {
        Dimmer {
            level: Mutex::new(0),
        }
    }

    #[test]
    fn invoke_runs_valid_command() {
        let module = dimmer();
        let response = invoke(&module, "set", json!({"level": 4}).as_object().unwrap());
        assert_eq!(response, Response::ok_empty());
        assert_eq!(module.state().unwrap(), json!({"level": 4}));
    }

    #[test]
    fn invalid_params_never_reach_module() {
        let module = dimmer();
        let response = invoke(&module, "set", json!({"level": 11}).as_object().unwrap());
        assert!(!response.ok);
        assert_eq!(module.state().unwrap(), json!({"level": 0}));
    }

    #[test]
    fn unknown_action_is_reported() {
        let response = invoke(&dimmer(), "fade", &Map::new());
        assert_eq!(response, Response::err("Unknown dimmer action 'fade'"));
    }

    #[test]
    fn panics_become_error_responses() {
        let response = invoke(&dimmer(), "explode", &Map::new());
        assert_eq!(response, Response::err("dimmer failed while handling 'explode'"));
    }

    #[test]
    fn module_errors_convert_to_responses() {
        let response = Response::from_result(Err(ModuleError::NotInitialized("face")));
        assert_eq!(response, Response::err("face is not initialized"));
        assert_eq!(Response::from_result(Ok(json!(1))), Response::ok(1));
    }
}
