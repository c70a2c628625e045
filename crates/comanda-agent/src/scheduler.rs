//! Per-user debounce scheduler.
//!
//! Bursts of messages from one user are coalesced into a single [`Turn`]
//! once the user has been quiet for the debounce window. A new burst
//! cancels any execution for that user that has not committed yet; its
//! messages are put back at the front of the buffer so the next turn covers
//! them.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::channel::Channel;
use crate::config::OrchestratorConfig;
use crate::conversation::Turn;
use crate::pipeline::{TurnControl, TurnRunner};

/// What happened to an inbound message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Buffered; a turn will run after the debounce window
    Scheduled,
    /// Dropped by the rate limiter
    RateLimited,
    /// The scheduler has been stopped
    Stopped,
}

/// Snapshot of scheduler activity
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diagnostics {
    /// Debounce timers plus running executions
    pub active_tasks: usize,
    /// Buffered message count per user, for users with pending messages
    pub pending: BTreeMap<String, usize>,
}

struct InFlight {
    generation: u64,
    control: TurnControl,
    messages: Vec<String>,
}

#[derive(Default)]
struct UserSlot {
    pending: Vec<String>,
    timer: Option<CancellationToken>,
    /// Bumped on every accepted message; only the latest timer may fire
    generation: u64,
    in_flight: Option<InFlight>,
    last_seen: Option<Instant>,
}

impl UserSlot {
    /// Nothing buffered or running, and the rate-limit window has passed
    fn is_idle(&self, now: Instant, min_interval: Duration) -> bool {
        self.pending.is_empty()
            && self.timer.is_none()
            && self.in_flight.is_none()
            && self
                .last_seen
                .is_none_or(|last| now.duration_since(last) >= min_interval)
    }
}

struct Inner {
    runner: Arc<dyn TurnRunner>,
    channel: Arc<dyn Channel>,
    slots: DashMap<String, UserSlot>,
    debounce: Duration,
    min_interval: Duration,
    send_timeout: Duration,
    apology: String,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

/// Entry point for inbound messages. Cloning is cheap.
#[derive(Clone)]
pub struct DebounceScheduler {
    inner: Arc<Inner>,
}

impl DebounceScheduler {
    pub fn new(runner: Arc<dyn TurnRunner>, channel: Arc<dyn Channel>, config: &OrchestratorConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                runner,
                channel,
                slots: DashMap::new(),
                debounce: config.debounce(),
                min_interval: config.min_message_interval(),
                send_timeout: config.send_timeout(),
                apology: config.apology_message.clone(),
                shutdown: CancellationToken::new(),
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Buffer a message and (re)start the user's debounce timer
    pub fn on_message(&self, user_id: &str, text: impl Into<String>) -> Disposition {
        let inner = &self.inner;
        if inner.shutdown.is_cancelled() {
            return Disposition::Stopped;
        }
        let now = Instant::now();

        let (generation, timer) = {
            let mut slot = inner.slots.entry(user_id.to_string()).or_default();
            if let Some(last) = slot.last_seen {
                if now.duration_since(last) < inner.min_interval {
                    tracing::debug!(user_id = %user_id, "Message dropped by rate limiter");
                    return Disposition::RateLimited;
                }
            }
            slot.last_seen = Some(now);

            if let Some(timer) = slot.timer.take() {
                timer.cancel();
            }
            let superseded = slot
                .in_flight
                .as_ref()
                .is_some_and(|in_flight| in_flight.control.supersede());
            if superseded {
                if let Some(in_flight) = slot.in_flight.take() {
                    tracing::info!(user_id = %user_id, "New messages arrived, cancelling running turn");
                    let mut messages = in_flight.messages;
                    messages.append(&mut slot.pending);
                    slot.pending = messages;
                }
            } else if slot.in_flight.is_some() {
                tracing::debug!(user_id = %user_id, "Running turn already committed, its reply stands");
            }
            slot.pending.push(text.into());

            slot.generation += 1;
            let timer = inner.shutdown.child_token();
            slot.timer = Some(timer.clone());
            (slot.generation, timer)
        };

        let handle = tokio::spawn(fire(Arc::clone(inner), user_id.to_string(), generation, timer));
        let mut tasks = inner.tasks.lock();
        tasks.retain(|h| !h.is_finished());
        tasks.push(handle);

        Disposition::Scheduled
    }

    /// Cancel every timer and running turn, then wait for the tasks to exit.
    /// Later messages are rejected.
    pub async fn stop(&self) {
        tracing::info!("Stopping scheduler");
        self.inner.shutdown.cancel();
        let handles: Vec<_> = std::mem::take(&mut *self.inner.tasks.lock());
        futures::future::join_all(handles).await;
        for mut slot in self.inner.slots.iter_mut() {
            slot.timer = None;
            slot.in_flight = None;
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Wait until no timer or execution is left
    pub async fn drain(&self) {
        loop {
            let handles: Vec<_> = std::mem::take(&mut *self.inner.tasks.lock());
            if handles.is_empty() {
                return;
            }
            futures::future::join_all(handles).await;
        }
    }

    pub fn diagnostics(&self) -> Diagnostics {
        let mut diagnostics = Diagnostics::default();
        for slot in self.inner.slots.iter() {
            diagnostics.active_tasks +=
                usize::from(slot.timer.is_some()) + usize::from(slot.in_flight.is_some());
            if !slot.pending.is_empty() {
                diagnostics
                    .pending
                    .insert(slot.key().clone(), slot.pending.len());
            }
        }
        diagnostics
    }
}

/// Debounce timer that becomes the turn execution once it fires
async fn fire(inner: Arc<Inner>, user_id: String, generation: u64, timer: CancellationToken) {
    tokio::select! {
        _ = timer.cancelled() => return,
        _ = tokio::time::sleep(inner.debounce) => {}
    }

    let (messages, control) = {
        let Some(mut slot) = inner.slots.get_mut(&user_id) else {
            return;
        };
        if slot.generation != generation {
            return;
        }
        slot.timer = None;
        if slot.pending.is_empty() {
            return;
        }
        let messages = std::mem::take(&mut slot.pending);
        let control = TurnControl::new(inner.shutdown.child_token());
        slot.in_flight = Some(InFlight {
            generation,
            control: control.clone(),
            messages: messages.clone(),
        });
        (messages, control)
    };

    tracing::info!(user_id = %user_id, message_count = messages.len(), "Debounce window closed, starting turn");
    let result = inner
        .runner
        .run_turn(Turn::new(&user_id, messages), control.clone())
        .await;

    // Untouched: no message arrived for this user since the turn started
    let untouched = match inner.slots.get_mut(&user_id) {
        Some(mut slot) => {
            if slot.in_flight.as_ref().is_some_and(|f| f.generation == generation) {
                slot.in_flight = None;
            }
            slot.generation == generation
        }
        None => false,
    };

    match result {
        Ok(()) => tracing::debug!(user_id = %user_id, "Turn completed"),
        Err(e) if e.is_cancelled() || control.is_cancelled() => {
            tracing::info!(user_id = %user_id, "Turn cancelled: {}", e);
        }
        Err(e) => {
            tracing::error!(user_id = %user_id, "Turn failed, sending apology: {}", e);
            if untouched {
                if let Some(mut slot) = inner.slots.get_mut(&user_id) {
                    slot.pending.clear();
                    if let Some(timer) = slot.timer.take() {
                        timer.cancel();
                    }
                }
            }
            let send = inner.channel.send(&user_id, &inner.apology);
            match tokio::time::timeout(inner.send_timeout, send).await {
                Ok(true) => {}
                Ok(false) => tracing::warn!(user_id = %user_id, "Apology was not delivered"),
                Err(_) => tracing::warn!(user_id = %user_id, "Apology send timed out"),
            }
        }
    }

    let now = Instant::now();
    if inner
        .slots
        .remove_if(&user_id, |_, slot| slot.is_idle(now, inner.min_interval))
        .is_some()
    {
        tracing::debug!(user_id = %user_id, "Released idle user slot");
    }
}
