//! Cancellable background effects (animations, scrolling, playback, polling).
//!
//! Each module owns one [`EffectSlot`]. Starting an effect first stops the
//! one already running and waits for its thread to finish, bounded by the
//! slot's join timeout. A worker that overstays the timeout is detached and
//! logged; the new effect starts anyway.

use std::{
    sync::{
        Arc, Mutex, MutexGuard,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use event_listener::{Event, Listener};
use log::{debug, warn};

/// One-shot flag a worker can sleep on.
#[derive(Clone)]
pub struct StopSignal(Arc<SignalInner>);

struct SignalInner {
    raised: AtomicBool,
    wake: Event,
}

impl StopSignal {
    pub fn new() -> Self {
        Self(Arc::new(SignalInner {
            raised: AtomicBool::new(false),
            wake: Event::new(),
        }))
    }

    pub fn raise(&self) {
        if !self.0.raised.swap(true, Ordering::SeqCst) {
            self.0.wake.notify(usize::MAX);
        }
    }

    pub fn is_raised(&self) -> bool {
        self.0.raised.load(Ordering::SeqCst)
    }

    /// Sleeps for `timeout` or until raised. Returns `true` if raised.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.is_raised() {
                return true;
            }
            let listener = self.0.wake.listen();
            if self.is_raised() {
                return true;
            }
            if listener.wait_deadline(deadline).is_none() {
                return self.is_raised();
            }
        }
    }
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for StopSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("StopSignal").field(&self.is_raised()).finish()
    }
}

/// Raises the finished flag however the worker exits, panics included.
struct FinishGuard(StopSignal);

impl Drop for FinishGuard {
    fn drop(&mut self) {
        self.0.raise();
    }
}

struct RunningEffect {
    label: String,
    stop: StopSignal,
    finished: StopSignal,
    handle: JoinHandle<()>,
}

/// Holder of at most one running background worker.
pub struct EffectSlot {
    owner: &'static str,
    join_timeout: Duration,
    running: Mutex<Option<RunningEffect>>,
}

impl EffectSlot {
    pub fn new(owner: &'static str, join_timeout: Duration) -> Self {
        Self {
            owner,
            join_timeout,
            running: Mutex::new(None),
        }
    }

    /// Stops the current effect, then runs `effect` on a fresh thread.
    pub fn start<F>(&self, label: impl Into<String>, effect: F) -> std::io::Result<()>
    where
        F: FnOnce(StopSignal) + Send + 'static,
    {
        let label = label.into();
        let mut running = self.lock();
        if let Some(previous) = running.take() {
            self.halt(previous);
        }

        let stop = StopSignal::new();
        let finished = StopSignal::new();
        let worker_stop = stop.clone();
        let guard = FinishGuard(finished.clone());

        let handle = thread::Builder::new()
            .name(format!("{}-{}", self.owner, label))
            .spawn(move || {
                let _guard = guard;
                effect(worker_stop);
            })?;

        debug!("{} effect '{}' started", self.owner, label);
        *running = Some(RunningEffect {
            label,
            stop,
            finished,
            handle,
        });
        Ok(())
    }

    /// Stops the current effect. Returns its label if it was still running.
    pub fn stop(&self) -> Option<String> {
        let previous = self.lock().take()?;
        let was_active = !previous.finished.is_raised();
        let label = previous.label.clone();
        self.halt(previous);
        was_active.then_some(label)
    }

    /// Label of the effect that is still running, if any.
    pub fn current(&self) -> Option<String> {
        self.lock()
            .as_ref()
            .filter(|effect| !effect.finished.is_raised())
            .map(|effect| effect.label.clone())
    }

    pub fn is_running(&self) -> bool {
        self.current().is_some()
    }

    fn halt(&self, effect: RunningEffect) {
        effect.stop.raise();
        if effect.finished.wait_timeout(self.join_timeout) {
            if effect.handle.join().is_err() {
                warn!("{} effect '{}' panicked", self.owner, effect.label);
            }
        } else {
            warn!(
                "{} effect '{}' did not stop within {:?}, detaching it",
                self.owner, effect.label, self.join_timeout
            );
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<RunningEffect>> {
        self.running
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for EffectSlot {
    fn drop(&mut self) {
        if let Some(effect) = self.lock().take() {
            effect.stop.raise();
        }
    }
}
