//! Instrumented modules shared by unit tests.

use std::{
    sync::{
        Arc, Mutex, OnceLock,
        atomic::{AtomicUsize, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use serde_json::{Map, Value, json};

use crate::{
    app_context::AppState,
    config::Config,
    event::{EventHub, EventSink},
    module::{HardwareModule, ModuleError},
    protocol::Response,
    registry::{ModuleFactory, ModuleRegistry},
    schema::{ActionSpec, ParamKind, ParamSpec, Params},
};

#[derive(Debug, Clone)]
pub struct Call {
    pub action: String,
    pub params: Map<String, Value>,
    pub entered: Instant,
    pub exited: Instant,
}

/// Module that records every call with entry and exit times.
pub struct StubModule {
    name: &'static str,
    fail_init: bool,
    fail_state: bool,
    delay: Duration,
    inits: AtomicUsize,
    cleanups: AtomicUsize,
    calls: Mutex<Vec<Call>>,
    sink: OnceLock<EventSink>,
}

impl StubModule {
    fn build(name: &'static str) -> Self {
        Self {
            name,
            fail_init: false,
            fail_state: false,
            delay: Duration::ZERO,
            inits: AtomicUsize::new(0),
            cleanups: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
            sink: OnceLock::new(),
        }
    }

    pub fn new(name: &'static str) -> Arc<Self> {
        Arc::new(Self::build(name))
    }

    pub fn failing_init(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            fail_init: true,
            ..Self::build(name)
        })
    }

    pub fn failing_state(name: &'static str) -> Arc<Self> {
        Arc::new(Self {
            fail_state: true,
            ..Self::build(name)
        })
    }

    /// Every command sleeps for `delay` inside `handle_command`.
    pub fn slow(name: &'static str, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            ..Self::build(name)
        })
    }

    pub fn inits(&self) -> usize {
        self.inits.load(Ordering::SeqCst)
    }

    pub fn cleanups(&self) -> usize {
        self.cleanups.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn actions(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.action).collect()
    }

    pub fn sink(&self) -> Option<&EventSink> {
        self.sink.get()
    }
}

impl HardwareModule for StubModule {
    fn name(&self) -> &'static str {
        self.name
    }

    fn description(&self) -> &'static str {
        "stub module"
    }

    fn attach(&self, events: EventSink) {
        let _ = self.sink.set(events);
    }

    fn init(&self) -> anyhow::Result<()> {
        self.inits.fetch_add(1, Ordering::SeqCst);
        if self.fail_init {
            anyhow::bail!("{} hardware missing", self.name);
        }
        Ok(())
    }

    fn cleanup(&self) {
        self.cleanups.fetch_add(1, Ordering::SeqCst);
    }

    fn handle_command(&self, action: &str, params: &Params) -> Response {
        let entered = Instant::now();
        thread::sleep(self.delay);
        let response = match action {
            "fail" => Response::err("stub failure"),
            "panic" => panic!("stub panic"),
            _ => Response::ok(Value::Object(params.as_map().clone())),
        };
        self.calls.lock().unwrap().push(Call {
            action: action.to_string(),
            params: params.as_map().clone(),
            entered,
            exited: Instant::now(),
        });
        response
    }

    fn state(&self) -> Result<Value, ModuleError> {
        if self.fail_state {
            return Err(ModuleError::Invalid("sensor offline".into()));
        }
        Ok(json!({ "calls": self.calls.lock().unwrap().len() }))
    }

    fn capabilities(&self) -> Vec<ActionSpec> {
        vec![
            ActionSpec::new("echo", "Returns its params"),
            ActionSpec::new("fail", "Always fails"),
            ActionSpec::new("panic", "Always panics"),
            ActionSpec::new("expression", "Records an expression")
                .param("name", ParamSpec::required(ParamKind::Str)),
            ActionSpec::new("write", "Records two lines")
                .param("line1", ParamSpec::with_default(ParamKind::Str, ""))
                .param("line2", ParamSpec::with_default(ParamKind::Str, ""))
                .param("align", ParamSpec::with_default(ParamKind::Str, "left")),
        ]
    }
}

/// State with the given modules initialized.
pub fn app_state<I>(config: Config, modules: I) -> Arc<AppState>
where
    I: IntoIterator<Item = Arc<dyn HardwareModule>>,
{
    let events = EventHub::new(config.events.capacity, config.events.triggers.clone());
    let mut registry = ModuleRegistry::discover(modules.into_iter().map(ModuleFactory::ready));
    registry.initialize(&events);
    Arc::new(AppState::new(Arc::new(config), registry, events))
}
