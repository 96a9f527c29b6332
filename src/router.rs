//! Routing of decoded envelopes to system actions, compound actions and
//! modules.

use std::{
    panic::{AssertUnwindSafe, catch_unwind},
    sync::Arc,
    time::Duration,
};

use futures::{FutureExt, future::BoxFuture};
use log::{debug, error, warn};
use serde_json::{Map, Value, json};
use tokio_util::sync::CancellationToken;

use crate::{
    app_context::AppState,
    compound::{self, Expression},
    module::{ModuleError, invoke},
    protocol::{Envelope, Response},
    schema::{self, ActionSpec, ParamKind, ParamSpec},
};

/// Module name used in errors about built-in actions.
const SYSTEM: &str = "system";
const COMPOUND: &str = "compound";

fn system_specs() -> Vec<ActionSpec> {
    vec![
        ActionSpec::new("ping", "Liveness check"),
        ActionSpec::new("status", "State snapshot of every module"),
        ActionSpec::new("capabilities", "Action descriptors of every module"),
        ActionSpec::new("events", "Read queued sensor events").param(
            "peek",
            ParamSpec::with_default(ParamKind::Bool, false)
                .describe("Leave the events in the queue"),
        ),
    ]
}

#[derive(Clone)]
pub struct CommandRouter {
    state: Arc<AppState>,
}

impl CommandRouter {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    /// Handles one raw request. Never fails; every problem becomes an error
    /// response.
    pub async fn handle_raw(&self, raw: &str) -> Response {
        match Envelope::parse(raw) {
            Ok(envelope) => self.dispatch(envelope).await,
            Err(e) => e.into(),
        }
    }

    /// Routes an already parsed JSON value. Boxed because batches recurse.
    pub fn route(&self, value: Value) -> BoxFuture<'_, Response> {
        async move {
            match Envelope::from_value(value) {
                Ok(envelope) => self.dispatch(envelope).await,
                Err(e) => e.into(),
            }
        }
        .boxed()
    }

    async fn dispatch(&self, envelope: Envelope) -> Response {
        match envelope {
            Envelope::Batch(items) => {
                let mut results = Vec::with_capacity(items.len());
                for item in items {
                    results.push(self.route(item).await);
                }
                Response::batch(results)
            }
            Envelope::System { action, params } => self.system(&action, &params),
            Envelope::Compound { action, params } => self.compound(&action, &params).await,
            Envelope::Module {
                module,
                action,
                params,
            } => self.module(&module, action, params).await,
        }
    }

    fn system(&self, action: &str, params: &Map<String, Value>) -> Response {
        let params = match schema::validate(&system_specs(), SYSTEM, action, params) {
            Ok(params) => params,
            Err(e) => return e.into(),
        };

        match action {
            "ping" => Response::ok(json!({ "pong": true })),
            "status" => Response::ok(self.status()),
            "capabilities" => Response::ok(self.capabilities()),
            "events" => {
                let peek = match params.bool_or("peek", false) {
                    Ok(peek) => peek,
                    Err(e) => return e.into(),
                };
                let events = self.state.events.queue().take(peek);
                let count = events.len();
                Response::ok(json!({ "events": events, "count": count }))
            }
            other => ModuleError::UnknownAction {
                module: SYSTEM.into(),
                action: other.into(),
            }
            .into(),
        }
    }

    /// Per-module state; a failing module reports `{"error": ...}` in its slot.
    fn status(&self) -> Value {
        let mut snapshot = Map::new();
        for module in self.state.registry.iter() {
            let entry = match catch_unwind(AssertUnwindSafe(|| module.state())) {
                Ok(Ok(state)) => state,
                Ok(Err(e)) => json!({ "error": e.to_string() }),
                Err(_) => {
                    error!("State snapshot of '{}' panicked", module.name());
                    json!({ "error": "state snapshot failed" })
                }
            };
            snapshot.insert(module.name().to_string(), entry);
        }
        Value::Object(snapshot)
    }

    fn capabilities(&self) -> Value {
        let mut all = Map::new();
        for module in self.state.registry.iter() {
            let actions = match catch_unwind(AssertUnwindSafe(|| module.capabilities())) {
                Ok(actions) => actions,
                Err(_) => {
                    error!("Capability listing of '{}' panicked", module.name());
                    Vec::new()
                }
            };
            all.insert(
                module.name().to_string(),
                json!({ "description": module.description(), "actions": actions }),
            );
        }
        Value::Object(all)
    }

    async fn compound(&self, action: &str, params: &Map<String, Value>) -> Response {
        let params = match schema::validate(&compound::action_specs(), COMPOUND, action, params) {
            Ok(params) => params,
            Err(e) => return e.into(),
        };

        // "express" is the only compound action.
        let (emotion, message, duration) = match (
            params.str_or("emotion", "neutral"),
            params.str_or("message", ""),
            params.float_or("duration", 0.0),
        ) {
            (Ok(emotion), Ok(message), Ok(duration)) => {
                (emotion.to_string(), message.to_string(), duration)
            }
            (Err(e), _, _) | (_, Err(e), _) | (_, _, Err(e)) => return e.into(),
        };

        let expression = Expression::from_message(&emotion, &message);
        let registry = Arc::clone(&self.state.registry);
        let hold = (duration > 0.0).then(|| self.state.expression_hold.arm());
        if hold.is_none() {
            self.state.expression_hold.cancel();
        }

        match self
            .state
            .module_lock
            .call(move || compound::express(&registry, &expression))
            .await
        {
            Ok(results) => {
                if let Some(hold) = hold {
                    let after = Duration::try_from_secs_f64(duration).unwrap_or(Duration::MAX);
                    self.schedule_revert(hold, after);
                }
                compound::summarize(&emotion, &message, duration, &results)
            }
            Err(e) => {
                error!("Compound action '{action}' aborted: {e}");
                Response::err(format!("{COMPOUND} action '{action}' failed"))
            }
        }
    }

    /// Reverts the display after `after` unless `hold` is cancelled first.
    fn schedule_revert(&self, hold: CancellationToken, after: Duration) {
        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            tokio::select! {
                _ = hold.cancelled() => return,
                _ = tokio::time::sleep(after) => {}
            }
            let registry = Arc::clone(&state.registry);
            match state
                .module_lock
                .call(move || compound::revert(&registry, &hold))
                .await
            {
                Ok(Some(response)) if !response.ok => {
                    warn!("Expression revert failed: {:?}", response.error)
                }
                Ok(Some(_)) => debug!("Expression hold expired"),
                Ok(None) => {}
                Err(e) => error!("Expression revert aborted: {e}"),
            }
        });
    }

    async fn module(&self, name: &str, action: String, params: Map<String, Value>) -> Response {
        let Some(module) = self.state.registry.get(name) else {
            return Response::err(format!(
                "Unknown module '{name}'. Available: {:?}",
                self.state.registry.names()
            ));
        };

        if name == compound::DISPLAY_MODULE {
            self.state.expression_hold.cancel();
        }

        debug!("Dispatching {name}.{action}");
        match self
            .state
            .module_lock
            .call(move || invoke(module.as_ref(), &action, &params))
            .await
        {
            Ok(response) => response,
            Err(e) => {
                error!("Module '{name}' call aborted: {e}");
                Response::err(format!("{name} command failed"))
            }
        }
    }
}
