//! Touch state machine fed with raw pin samples.

use std::time::{Duration, Instant};

use serde_json::{Value, json};

#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Touched {
        touch_count: u64,
        timestamp: f64,
    },
    Released {
        touch_count: u64,
        duration_ms: Option<u64>,
        timestamp: f64,
    },
}

impl Transition {
    pub fn kind(&self) -> &'static str {
        match self {
            Transition::Touched { .. } => "touched",
            Transition::Released { .. } => "released",
        }
    }

    pub fn to_event_data(&self, pin: u32) -> Value {
        match *self {
            Transition::Touched {
                touch_count,
                timestamp,
            } => json!({
                "pin": pin,
                "touch_count": touch_count,
                "timestamp": timestamp,
            }),
            Transition::Released {
                touch_count,
                duration_ms,
                timestamp,
            } => json!({
                "pin": pin,
                "touch_count": touch_count,
                "duration_ms": duration_ms,
                "timestamp": timestamp,
            }),
        }
    }
}

/// Debounced touch/release tracking. A level change is accepted only once
/// `debounce` has passed since the previous accepted change.
#[derive(Debug, Clone)]
pub struct Tracker {
    pub is_touched: bool,
    pub touch_count: u64,
    pub last_touch_time: Option<f64>,
    pub last_release_time: Option<f64>,
    pub debounce: Duration,
    touched_at: Option<Instant>,
    last_edge: Option<Instant>,
}

impl Tracker {
    pub fn new(debounce: Duration) -> Self {
        Self {
            is_touched: false,
            touch_count: 0,
            last_touch_time: None,
            last_release_time: None,
            debounce,
            touched_at: None,
            last_edge: None,
        }
    }

    /// Feeds one sample taken at `now` (monotonic) / `wall` (unix seconds).
    pub fn sample(&mut self, level: bool, now: Instant, wall: f64) -> Option<Transition> {
        if level == self.is_touched {
            return None;
        }
        if self
            .last_edge
            .is_some_and(|edge| now.saturating_duration_since(edge) < self.debounce)
        {
            return None;
        }
        self.last_edge = Some(now);
        self.is_touched = level;

        if level {
            self.touch_count += 1;
            self.last_touch_time = Some(wall);
            self.touched_at = Some(now);
            Some(Transition::Touched {
                touch_count: self.touch_count,
                timestamp: wall,
            })
        } else {
            self.last_release_time = Some(wall);
            let duration_ms = self
                .touched_at
                .take()
                .map(|at| now.saturating_duration_since(at).as_millis() as u64);
            Some(Transition::Released {
                touch_count: self.touch_count,
                duration_ms,
                timestamp: wall,
            })
        }
    }

    pub fn reset(&mut self) {
        self.touch_count = 0;
    }
}
