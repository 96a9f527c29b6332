//! Capacitive touch pad (TTP223, active high).

pub mod pin;
pub mod tracker;

use std::{
    sync::{Arc, Mutex, MutexGuard, OnceLock},
    time::{Duration, Instant},
};

use chrono::Local;
use log::{debug, info, warn};
use serde_json::{Value, json};

use crate::{
    config::{TouchBackend, TouchConfig},
    effect::{EffectSlot, StopSignal},
    event::EventSink,
    module::{HardwareModule, ModuleError},
    protocol::Response,
    schema::{ActionSpec, ParamKind, ParamSpec, Params},
};

use pin::{InputPin, SysfsPin, VirtualPin};
use tracker::Tracker;

const NAME: &str = "touch";

type SharedPin = Arc<Mutex<Box<dyn InputPin>>>;
type SharedTracker = Arc<Mutex<Tracker>>;

pub struct TouchModule {
    pin_number: u32,
    pin: SharedPin,
    tracker: SharedTracker,
    events: OnceLock<EventSink>,
    poll: Duration,
    poller: EffectSlot,
}

impl TouchModule {
    pub fn new(
        pin_number: u32,
        pin: Box<dyn InputPin>,
        debounce: Duration,
        poll: Duration,
        join_timeout: Duration,
    ) -> Self {
        Self {
            pin_number,
            pin: Arc::new(Mutex::new(pin)),
            tracker: Arc::new(Mutex::new(Tracker::new(debounce))),
            events: OnceLock::new(),
            poll,
            poller: EffectSlot::new(NAME, join_timeout),
        }
    }

    pub fn from_config(config: &TouchConfig, join_timeout: Duration) -> Self {
        let pin: Box<dyn InputPin> = match config.backend {
            TouchBackend::Virtual => Box::new(VirtualPin::default()),
            TouchBackend::Sysfs => Box::new(SysfsPin::new(config.pin)),
        };
        Self::new(
            config.pin,
            pin,
            Duration::from_millis(config.debounce_ms),
            Duration::from_millis(config.poll_ms),
            join_timeout,
        )
    }

    fn tracker(&self) -> MutexGuard<'_, Tracker> {
        lock(&self.tracker)
    }

    fn snapshot(&self) -> Value {
        let tracker = self.tracker();
        json!({
            "is_touched": tracker.is_touched,
            "touch_count": tracker.touch_count,
            "last_touch_time": tracker.last_touch_time,
            "last_release_time": tracker.last_release_time,
            "pin": self.pin_number,
            "debounce_ms": tracker.debounce.as_millis() as u64,
        })
    }

    fn run(&self, action: &str, params: &Params) -> Result<Value, ModuleError> {
        match action {
            "read" => Ok(self.snapshot()),
            "config" => {
                let mut tracker = self.tracker();
                if params.contains("debounce_ms") {
                    tracker.debounce = Duration::from_millis(params.int("debounce_ms")? as u64);
                }
                Ok(json!({ "debounce_ms": tracker.debounce.as_millis() as u64 }))
            }
            "reset" => {
                self.tracker().reset();
                Ok(json!({ "touch_count": 0 }))
            }
            _ => Err(ModuleError::UnknownAction {
                module: NAME.into(),
                action: action.into(),
            }),
        }
    }
}

fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn unix_now() -> f64 {
    Local::now().timestamp_millis() as f64 / 1000.0
}

/// Samples the pin every `poll` and reports debounced transitions.
fn poll_pin(
    pin: &Mutex<Box<dyn InputPin>>,
    tracker: &Mutex<Tracker>,
    events: Option<&EventSink>,
    pin_number: u32,
    poll: Duration,
    stop: &StopSignal,
) {
    let mut failing = false;
    while !stop.wait_timeout(poll) {
        let level = match lock(pin).read() {
            Ok(level) => level,
            Err(e) => {
                if !failing {
                    warn!("Touch pin {pin_number} unreadable: {e}");
                    failing = true;
                }
                continue;
            }
        };
        if std::mem::take(&mut failing) {
            info!("Touch pin {pin_number} readable again");
        }

        let Some(transition) = lock(tracker).sample(level, Instant::now(), unix_now()) else {
            continue;
        };
        match events {
            Some(events) => {
                events.emit(transition.kind(), transition.to_event_data(pin_number))
            }
            None => debug!("touch {} with no event sink attached", transition.kind()),
        }
    }
}

impl HardwareModule for TouchModule {
    fn name(&self) -> &'static str {
        NAME
    }

    fn description(&self) -> &'static str {
        "Capacitive touch pad reporting touch and release events"
    }

    fn attach(&self, events: EventSink) {
        if self.events.set(events).is_err() {
            warn!("touch event sink attached twice, keeping the first");
        }
    }

    fn init(&self) -> anyhow::Result<()> {
        lock(&self.pin).open()?;

        let pin = Arc::clone(&self.pin);
        let tracker = Arc::clone(&self.tracker);
        let events = self.events.get().cloned();
        let (pin_number, poll) = (self.pin_number, self.poll);
        self.poller.start("poll", move |stop| {
            poll_pin(&pin, &tracker, events.as_ref(), pin_number, poll, &stop)
        })?;

        info!("Touch pad ready on GPIO {pin_number}");
        Ok(())
    }

    fn cleanup(&self) {
        self.poller.stop();
        if let Err(e) = lock(&self.pin).close() {
            warn!("Failed to release GPIO {}: {e}", self.pin_number);
        }
    }

    fn handle_command(&self, action: &str, params: &Params) -> Response {
        Response::from_result(self.run(action, params))
    }

    fn state(&self) -> Result<Value, ModuleError> {
        Ok(self.snapshot())
    }

    fn capabilities(&self) -> Vec<ActionSpec> {
        vec![
            ActionSpec::new("read", "Current touch state"),
            ActionSpec::new("config", "Change the debounce window").param(
                "debounce_ms",
                ParamSpec::optional(ParamKind::Int)
                    .range(50.0, 2000.0)
                    .describe("Minimum milliseconds between accepted edges"),
            ),
            ActionSpec::new("reset", "Reset the touch counter"),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{event::EventHub, module::invoke};
    use pretty_assertions::assert_eq;
    use std::thread;

    fn touch(pin: &VirtualPin, hub: &Arc<EventHub>) -> TouchModule {
        let module = TouchModule::new(
            17,
            Box::new(pin.clone()),
            Duration::from_millis(50),
            Duration::from_millis(5),
            Duration::from_secs(1),
        );
        module.attach(hub.sink(NAME));
        module.init().unwrap();
        module
    }

    fn call(module: &TouchModule, action: &str, params: Value) -> Response {
        invoke(module, action, params.as_object().unwrap())
    }

    #[test]
    fn touch_and_release_emit_events() {
        let hub = EventHub::new(10, ["touched"]);
        let pin = VirtualPin::default();
        let module = touch(&pin, &hub);

        pin.set(true);
        thread::sleep(Duration::from_millis(100));
        let state = module.state().unwrap();
        assert_eq!(state["is_touched"], true);
        assert_eq!(state["touch_count"], 1);

        pin.set(false);
        thread::sleep(Duration::from_millis(100));
        module.cleanup();

        let events = hub.queue().drain();
        let kinds: Vec<_> = events.iter().map(|e| e.kind.as_str()).collect();
        assert_eq!(kinds, vec!["touched", "released"]);
        assert_eq!(events[0].module, "touch");
        assert_eq!(events[0].data["pin"], 17);
        assert_eq!(events[1].data["touch_count"], 1);
        assert!(events[1].data["duration_ms"].as_u64().unwrap() >= 50);
        assert!(module.state().unwrap()["last_release_time"].is_f64());
    }

    #[test]
    fn config_changes_debounce() {
        let hub = EventHub::new(10, ["touched"]);
        let module = touch(&VirtualPin::default(), &hub);

        assert_eq!(
            call(&module, "config", json!({"debounce_ms": 300})),
            Response::ok(json!({"debounce_ms": 300}))
        );
        assert_eq!(
            call(&module, "config", json!({})),
            Response::ok(json!({"debounce_ms": 300}))
        );
        assert_eq!(module.state().unwrap()["debounce_ms"], 300);
        assert!(!call(&module, "config", json!({"debounce_ms": 10})).ok);
        module.cleanup();
    }

    #[test]
    fn reset_clears_counter() {
        let hub = EventHub::new(10, ["touched"]);
        let pin = VirtualPin::default();
        let module = touch(&pin, &hub);
        pin.set(true);
        thread::sleep(Duration::from_millis(50));

        assert_eq!(
            call(&module, "reset", json!({})),
            Response::ok(json!({"touch_count": 0}))
        );
        let read = call(&module, "read", json!({}));
        assert_eq!(read.data.unwrap()["touch_count"], 0);
        module.cleanup();
    }

    #[test]
    fn cleanup_stops_polling() {
        let hub = EventHub::new(10, ["touched"]);
        let pin = VirtualPin::default();
        let module = touch(&pin, &hub);
        module.cleanup();

        pin.set(true);
        thread::sleep(Duration::from_millis(50));
        assert!(hub.queue().is_empty());
        assert_eq!(module.state().unwrap()["is_touched"], false);
    }
}
