//! Intent splitter: one classification call per turn, producing ordered fragments

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::conversation::TurnContext;
use crate::error::Result;
use crate::intent::{Intent, IntentFragment, parse_fragments};
use crate::service::ModelService;
use crate::steps::{Step, StepTracker};

/// Splitter output: the fragment queue and the tracker the orchestrator adopts
#[derive(Debug, Clone)]
pub struct Split {
    pub fragments: Vec<IntentFragment>,
    pub steps: StepTracker,
}

pub struct IntentSplitter {
    model: Arc<dyn ModelService>,
}

impl IntentSplitter {
    pub fn new(model: Arc<dyn ModelService>) -> Self {
        Self { model }
    }

    /// Classify the turn into fragments.
    ///
    /// Service and parse failures yield an empty queue; cancellation is
    /// returned as an error.
    pub async fn split(&self, ctx: &TurnContext, cancel: &CancellationToken) -> Result<Split> {
        let text = ctx.turn.body();
        let raw = match self
            .model
            .classify(&text, &ctx.history_text(), &ctx.state.summary(), cancel)
            .await
        {
            Ok(raw) => raw,
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => {
                tracing::warn!(user_id = %ctx.user_id(), "Intent classification failed: {}", e);
                return Ok(Split {
                    fragments: Vec::new(),
                    steps: ctx.state.steps.clone(),
                });
            }
        };

        let fragments = match parse_fragments(&raw, &text) {
            Ok(fragments) => fragments,
            Err(e) => {
                tracing::warn!(
                    user_id = %ctx.user_id(),
                    raw = %raw,
                    "Could not parse classifier output: {}",
                    e
                );
                Vec::new()
            }
        };

        let fragments: Vec<IntentFragment> = fragments
            .into_iter()
            .map(|mut fragment| {
                if let Intent::Unrecognized(ref label) = fragment.intent {
                    tracing::debug!(label = %label, "Unknown intent folded into general");
                    fragment.intent = Intent::General;
                }
                fragment
            })
            .collect();

        let steps = apply_fragment_rules(&ctx.state.steps, &fragments);
        tracing::debug!(
            user_id = %ctx.user_id(),
            count = fragments.len(),
            "Turn split into fragments"
        );
        Ok(Split { fragments, steps })
    }
}

/// Step updates implied by the classified fragments alone.
/// Only moves steps forward; reopening after a modification is the dispatcher's job.
pub fn apply_fragment_rules(steps: &StepTracker, fragments: &[IntentFragment]) -> StepTracker {
    let mut steps = steps.clone();
    for fragment in fragments {
        match fragment.intent {
            Intent::Greeting => steps.complete(Step::Greeting),
            Intent::SelectProducts | Intent::CustomizeProduct => {
                steps.start(Step::CreateOrder);
                steps.start(Step::SelectProducts);
            }
            ref intent => steps.start(intent.step()),
        }
    }
    steps
}
