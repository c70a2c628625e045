//! Turn pipeline: splitter → dispatcher loop → composer → commit → send

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::channel::Channel;
use crate::composer::ResponseComposer;
use crate::config::OrchestratorConfig;
use crate::conversation::{ConversationState, Turn, TurnContext};
use crate::dispatcher::FragmentDispatcher;
use crate::error::{Error, Result};
use crate::events::TurnEvent;
use crate::memory::{ConversationMessage, MemoryLog};
use crate::service::ModelService;
use crate::splitter::IntentSplitter;
use crate::tool::ToolCatalog;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Running,
    Committed,
    Superseded,
}

/// Cancellation and commit point of one turn execution.
///
/// The runner calls [`TurnControl::try_commit`] right before it persists
/// anything; the scheduler calls [`TurnControl::supersede`] when newer
/// messages arrive. Exactly one of them wins.
#[derive(Debug, Clone)]
pub struct TurnControl {
    cancel: CancellationToken,
    phase: Arc<Mutex<Phase>>,
}

impl TurnControl {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            phase: Arc::new(Mutex::new(Phase::Running)),
        }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Claim the commit point. False when the turn was superseded or cancelled first.
    pub fn try_commit(&self) -> bool {
        let mut phase = self.phase.lock();
        if *phase == Phase::Superseded || self.cancel.is_cancelled() {
            return false;
        }
        *phase = Phase::Committed;
        true
    }

    /// Cancel the turn unless it already committed.
    /// Returns true when the turn will leave no trace.
    pub fn supersede(&self) -> bool {
        let mut phase = self.phase.lock();
        if *phase == Phase::Committed {
            return false;
        }
        *phase = Phase::Superseded;
        self.cancel.cancel();
        true
    }

    pub fn is_committed(&self) -> bool {
        *self.phase.lock() == Phase::Committed
    }
}

impl From<CancellationToken> for TurnControl {
    fn from(cancel: CancellationToken) -> Self {
        Self::new(cancel)
    }
}

/// Something that can process one coalesced turn
#[async_trait]
pub trait TurnRunner: Send + Sync {
    async fn run_turn(&self, turn: Turn, control: TurnControl) -> Result<()>;
}

/// Runs turns end to end and owns the per-user conversation state
pub struct Pipeline {
    splitter: IntentSplitter,
    dispatcher: FragmentDispatcher,
    composer: ResponseComposer,
    memory: Arc<MemoryLog>,
    channel: Arc<dyn Channel>,
    states: DashMap<String, ConversationState>,
    event_tx: broadcast::Sender<TurnEvent>,
    history_window: usize,
    send_timeout: Duration,
}

impl Pipeline {
    pub fn new(
        model: Arc<dyn ModelService>,
        tools: Arc<ToolCatalog>,
        channel: Arc<dyn Channel>,
        memory: Arc<MemoryLog>,
        config: &OrchestratorConfig,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        Self {
            splitter: IntentSplitter::new(Arc::clone(&model)),
            dispatcher: FragmentDispatcher::new(
                Arc::clone(&model),
                tools,
                config.customizations.clone(),
                config.tool_timeout(),
                event_tx.clone(),
            ),
            composer: ResponseComposer::new(model),
            memory,
            channel,
            states: DashMap::new(),
            event_tx,
            history_window: config.history_window,
            send_timeout: config.send_timeout(),
        }
    }

    /// Subscribe to turn events
    pub fn subscribe(&self) -> broadcast::Receiver<TurnEvent> {
        self.event_tx.subscribe()
    }

    /// Committed state for a user, if any turn has completed
    pub fn state(&self, user_id: &str) -> Option<ConversationState> {
        self.states.get(user_id).map(|s| s.clone())
    }

    pub fn memory(&self) -> &Arc<MemoryLog> {
        &self.memory
    }

    fn emit(&self, event: TurnEvent) {
        let _ = self.event_tx.send(event);
    }

    async fn execute(&self, turn: Turn, control: &TurnControl) -> Result<()> {
        let cancel = control.token();
        let user_id = turn.user_id.clone();
        self.channel.typing_indicator(&user_id).await;

        let state = self
            .states
            .get(&user_id)
            .map(|s| s.clone())
            .unwrap_or_else(|| ConversationState::new(&user_id));
        let ctx = TurnContext {
            history: self.memory.recent(&user_id, self.history_window),
            turn,
            state,
        };

        let split = self.splitter.split(&ctx, cancel).await?;
        self.emit(TurnEvent::FragmentsSplit {
            user_id: user_id.clone(),
            fragments: split.fragments.clone(),
        });

        let mut working = ctx.state.clone();
        working.steps = split.steps;
        let mut notes = Vec::new();
        let mut queue: VecDeque<_> = split.fragments.into();

        while let Some(fragment) = queue.pop_front() {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            self.emit(TurnEvent::FragmentStart {
                user_id: user_id.clone(),
                fragment: fragment.clone(),
            });
            let (tool_calls, failed) = match self
                .dispatcher
                .process(&fragment, &user_id, &working, cancel)
                .await
            {
                Ok(outcome) => {
                    outcome.apply(&mut working);
                    notes.extend(outcome.notes.iter().cloned());
                    (outcome.tool_calls, false)
                }
                Err(e) if e.is_cancelled() => return Err(e),
                Err(e) => {
                    tracing::warn!(
                        user_id = %user_id,
                        intent = %fragment.intent,
                        "Fragment failed, state unchanged: {}",
                        e
                    );
                    (0, true)
                }
            };
            self.emit(TurnEvent::FragmentEnd {
                user_id: user_id.clone(),
                fragment,
                tool_calls,
                failed,
            });
        }

        let reply = self.composer.compose(&ctx, &working, &notes, cancel).await?;

        // Nothing below awaits before the commit, so a superseded turn leaves no trace
        if !control.try_commit() {
            return Err(Error::Cancelled);
        }
        self.commit(&ctx, working, &reply);

        let sent = tokio::time::timeout(self.send_timeout, self.channel.send(&user_id, &reply))
            .await
            .map_err(|_| Error::Timeout {
                operation: "send",
                after: self.send_timeout,
            })?;
        if !sent {
            return Err(Error::Channel(format!("reply to {} was not delivered", user_id)));
        }
        self.emit(TurnEvent::ReplySent {
            user_id,
            text: reply,
        });
        Ok(())
    }

    fn commit(&self, ctx: &TurnContext, state: ConversationState, reply: &str) {
        let user_id = ctx.user_id();
        self.memory
            .append(user_id, ConversationMessage::human(ctx.turn.body()));
        self.memory
            .append(user_id, ConversationMessage::assistant(reply));

        let customer = &state.customer;
        self.memory.update_context(
            user_id,
            "customer_id",
            serde_json::Value::String(customer.customer_id.clone()),
        );
        if let Some(ref name) = customer.name {
            self.memory
                .update_context(user_id, "name", serde_json::Value::String(name.clone()));
        }
        if let Some(ref address) = customer.address {
            self.memory
                .update_context(user_id, "address", serde_json::Value::String(address.clone()));
        }

        self.states.insert(user_id.to_string(), state);
    }
}

#[async_trait]
impl TurnRunner for Pipeline {
    async fn run_turn(&self, turn: Turn, control: TurnControl) -> Result<()> {
        let user_id = turn.user_id.clone();
        self.emit(TurnEvent::TurnStart {
            user_id: user_id.clone(),
            message_count: turn.raw_messages.len(),
        });

        let result = self.execute(turn, &control).await;
        match result {
            Err(ref e) if e.is_cancelled() => {
                tracing::info!(user_id = %user_id, "Turn cancelled before commit");
                self.emit(TurnEvent::TurnCancelled { user_id });
            }
            Err(ref e) => {
                tracing::error!(user_id = %user_id, "Turn failed: {}", e);
                self.emit(TurnEvent::TurnFailed {
                    user_id,
                    message: e.to_string(),
                });
            }
            Ok(()) => {}
        }
        result
    }
}
