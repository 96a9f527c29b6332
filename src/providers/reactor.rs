//! Reacts to trigger events: a local expression, then a rate-limited
//! notification to the external agent.

use std::{sync::Arc, time::Instant};

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use log::{info, warn};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;

use crate::{
    app_context::AppState,
    compound::{self, Expression},
    event::Event,
    notify::{Cooldown, Notifier},
    providers::traits::ServiceProvider,
    task_manager::TaskManager,
};

/// Non-critical: without it the daemon still serves commands and queues
/// events.
pub struct EventReactorServiceProvider {
    state: Arc<AppState>,
    notifier: Option<Arc<dyn Notifier>>,
}

impl EventReactorServiceProvider {
    pub fn new(state: Arc<AppState>, notifier: Option<Arc<dyn Notifier>>) -> Self {
        Self { state, notifier }
    }
}

#[async_trait]
impl ServiceProvider for EventReactorServiceProvider {
    async fn start(&self, task_manager: &mut TaskManager) -> Result<()> {
        let events = self
            .state
            .events
            .take_reactions()
            .ok_or_else(|| anyhow!("event reactor already started"))?;
        let reactor = Reactor::new(Arc::clone(&self.state), self.notifier.clone());

        task_manager.spawn_task(self.name(), move |cancel_token| {
            run_reactor(reactor, events, cancel_token)
        });
        Ok(())
    }

    fn name(&self) -> &'static str {
        "EventReactor"
    }

    fn priority(&self) -> i32 {
        5
    }
}

async fn run_reactor(
    mut reactor: Reactor,
    mut events: UnboundedReceiver<Event>,
    cancel_token: CancellationToken,
) -> Result<()> {
    loop {
        tokio::select! {
            () = cancel_token.cancelled() => {
                info!("Event reactor cancelled");
                break;
            }
            event = events.recv() => match event {
                Some(event) => reactor.react(&event).await,
                None => {
                    info!("Event channel closed, reactor stopping");
                    break;
                }
            }
        }
    }
    Ok(())
}

/// Reaction state for one daemon: the notification cooldown per event type.
pub struct Reactor {
    state: Arc<AppState>,
    notifier: Option<Arc<dyn Notifier>>,
    cooldown: Cooldown,
}

impl Reactor {
    pub fn new(state: Arc<AppState>, notifier: Option<Arc<dyn Notifier>>) -> Self {
        let cooldown = Cooldown::new(state.config.events.cooldown());
        Self {
            state,
            notifier,
            cooldown,
        }
    }

    /// The local reaction runs for every trigger unless configured to share
    /// the cooldown. The notification always honours it.
    pub async fn react(&mut self, event: &Event) {
        let now = Instant::now();
        let due = self.cooldown.try_acquire(&event.kind, now);

        if due || !self.state.config.events.reaction_respects_cooldown {
            self.express().await;
        }

        if !due {
            info!(
                "[skip] {} cooldown ({:.1}s left)",
                event.kind,
                self.cooldown.remaining(&event.kind, now).as_secs_f64()
            );
            return;
        }
        if let Some(notifier) = &self.notifier {
            notifier.notify(event);
        }
    }

    async fn express(&self) {
        let reaction = &self.state.config.events.reaction;
        let expression = Expression {
            emotion: reaction.expression.clone(),
            line1: reaction.line1.clone(),
            line2: reaction.line2.clone(),
            align: Some("center"),
        };
        let registry = Arc::clone(&self.state.registry);
        self.state.expression_hold.cancel();

        match self
            .state
            .module_lock
            .call(move || compound::express(&registry, &expression))
            .await
        {
            Ok(results) => {
                for error in results.into_iter().filter_map(|r| r.error) {
                    warn!("Reaction step failed: {error}");
                }
            }
            Err(e) => warn!("Reaction aborted: {e}"),
        }
    }
}
