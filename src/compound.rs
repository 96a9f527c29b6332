//! Actions that coordinate several modules in one step.

use std::sync::{Mutex, MutexGuard};

use serde_json::{Map, Value, json};
use tokio_util::sync::CancellationToken;

use crate::{
    module::invoke,
    protocol::Response,
    registry::ModuleRegistry,
    schema::{ActionSpec, ParamKind, ParamSpec},
};

/// Module showing expressions.
pub const DISPLAY_MODULE: &str = "face";
/// Module showing text.
pub const TEXT_MODULE: &str = "lcd";
/// Characters per text line.
pub const TEXT_WIDTH: usize = 16;
/// Expression shown once a timed hold runs out.
pub const RESTING_EMOTION: &str = "neutral";

pub fn action_specs() -> Vec<ActionSpec> {
    vec![
        ActionSpec::new(
            "express",
            "Set a face expression and an LCD message together",
        )
        .param(
            "emotion",
            ParamSpec::with_default(ParamKind::Str, "neutral").describe("Expression name"),
        )
        .param(
            "message",
            ParamSpec::with_default(ParamKind::Str, "")
                .describe("Up to 32 characters, wrapped over two lines"),
        )
        .param(
            "duration",
            ParamSpec::with_default(ParamKind::Float, 0.0)
                .at_least(0.0)
                .describe("Seconds to hold the expression (0 = indefinitely)"),
        ),
    ]
}

/// What to show on the display and text modules.
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    pub emotion: String,
    pub line1: String,
    pub line2: String,
    pub align: Option<&'static str>,
}

impl Expression {
    /// Splits `message` into two lines of [`TEXT_WIDTH`] characters.
    /// Anything past the second line is dropped.
    pub fn from_message(emotion: &str, message: &str) -> Self {
        let line1 = message.chars().take(TEXT_WIDTH).collect();
        let line2 = message.chars().skip(TEXT_WIDTH).take(TEXT_WIDTH).collect();
        Self {
            emotion: emotion.to_string(),
            line1,
            line2,
            align: None,
        }
    }

    fn has_text(&self) -> bool {
        !self.line1.is_empty() || !self.line2.is_empty()
    }

    fn text_params(&self) -> Map<String, Value> {
        let mut params = Map::new();
        params.insert("line1".into(), Value::from(self.line1.as_str()));
        params.insert("line2".into(), Value::from(self.line2.as_str()));
        if let Some(align) = self.align {
            params.insert("align".into(), Value::from(align));
        }
        params
    }
}

/// Applies `expression` to whichever of the two modules are live. Each step
/// is independent; missing modules are skipped.
///
/// Callers must hold the module lock for the whole call.
pub fn express(registry: &ModuleRegistry, expression: &Expression) -> Vec<Response> {
    let mut results = Vec::with_capacity(2);

    if let Some(face) = registry.get(DISPLAY_MODULE) {
        let mut params = Map::new();
        params.insert("name".into(), Value::from(expression.emotion.as_str()));
        results.push(invoke(face.as_ref(), "expression", &params));
    }

    if expression.has_text() {
        if let Some(lcd) = registry.get(TEXT_MODULE) {
            results.push(invoke(lcd.as_ref(), "write", &expression.text_params()));
        }
    }

    results
}

/// Puts the display back to [`RESTING_EMOTION`] unless `hold` was
/// cancelled in the meantime. Returns `None` when nothing was sent.
///
/// Callers must hold the module lock for the whole call.
pub fn revert(registry: &ModuleRegistry, hold: &CancellationToken) -> Option<Response> {
    if hold.is_cancelled() {
        return None;
    }
    let face = registry.get(DISPLAY_MODULE)?;
    let mut params = Map::new();
    params.insert("name".into(), Value::from(RESTING_EMOTION));
    Some(invoke(face.as_ref(), "expression", &params))
}

/// The single pending revert of a timed expression.
///
/// Arming a new hold or writing to the display directly cancels whatever
/// revert was still waiting.
#[derive(Debug, Default)]
pub struct ExpressionHold {
    pending: Mutex<Option<CancellationToken>>,
}

impl ExpressionHold {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancels the pending revert and returns the token for a new one.
    pub fn arm(&self) -> CancellationToken {
        let token = CancellationToken::new();
        if let Some(previous) = self.slot().replace(token.clone()) {
            previous.cancel();
        }
        token
    }

    pub fn cancel(&self) {
        if let Some(previous) = self.slot().take() {
            previous.cancel();
        }
    }

    fn slot(&self) -> MutexGuard<'_, Option<CancellationToken>> {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Summary response for the `express` action: the request echoed back when
/// every step succeeded, otherwise the first failing step's error.
pub fn summarize(emotion: &str, message: &str, duration: f64, results: &[Response]) -> Response {
    match results.iter().find(|r| !r.ok) {
        Some(failed) => Response::err(
            failed
                .error
                .clone()
                .unwrap_or_else(|| "express step failed".to_string()),
        ),
        None => Response::ok(json!({
            "emotion": emotion,
            "message": message,
            "duration": duration,
        })),
    }
}
