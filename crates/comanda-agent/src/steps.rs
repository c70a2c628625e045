//! Funnel progress tracking and next-action resolution

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A step of the ordering funnel
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Greeting,
    PersonalInfo,
    Address,
    MenuBrowse,
    CreateOrder,
    SelectProducts,
    Confirm,
    Finalize,
    General,
}

impl Step {
    pub const ALL: [Step; 9] = [
        Step::Greeting,
        Step::PersonalInfo,
        Step::Address,
        Step::MenuBrowse,
        Step::CreateOrder,
        Step::SelectProducts,
        Step::Confirm,
        Step::Finalize,
        Step::General,
    ];

    /// Steps that must be done before the order can be paid, in priority order
    pub const REQUIRED: [Step; 7] = [
        Step::Greeting,
        Step::PersonalInfo,
        Step::Address,
        Step::CreateOrder,
        Step::SelectProducts,
        Step::Confirm,
        Step::Finalize,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Step::Greeting => "greeting",
            Step::PersonalInfo => "personal_info",
            Step::Address => "address",
            Step::MenuBrowse => "menu_browse",
            Step::CreateOrder => "create_order",
            Step::SelectProducts => "select_products",
            Step::Confirm => "confirm",
            Step::Finalize => "finalize",
            Step::General => "general",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress of a single step
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum StepStatus {
    #[default]
    NotStarted = 0,
    InProgress = 1,
    Done = 2,
}

/// Per-conversation map of step → status.
///
/// Fragment processing only moves steps forward; [`StepTracker::reopen`] is
/// the single way back and is reserved for explicit modify intents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepTracker {
    statuses: BTreeMap<Step, StepStatus>,
}

impl Default for StepTracker {
    fn default() -> Self {
        Self {
            statuses: Step::ALL
                .iter()
                .map(|s| (*s, StepStatus::NotStarted))
                .collect(),
        }
    }
}

impl StepTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self, step: Step) -> StepStatus {
        self.statuses.get(&step).copied().unwrap_or_default()
    }

    pub fn is_done(&self, step: Step) -> bool {
        self.status(step) == StepStatus::Done
    }

    /// Move a step forward. Never lowers a status.
    pub fn advance(&mut self, step: Step, status: StepStatus) {
        let current = self.status(step);
        if status > current {
            self.statuses.insert(step, status);
        }
    }

    /// Mark a step as started unless it is already further along
    pub fn start(&mut self, step: Step) {
        self.advance(step, StepStatus::InProgress);
    }

    pub fn complete(&mut self, step: Step) {
        self.advance(step, StepStatus::Done);
    }

    /// Explicitly set a step back, used only by modify intents
    pub fn reopen(&mut self, step: Step, status: StepStatus) {
        self.statuses.insert(step, status);
    }

    /// Reset the order steps for a customer ordering again after a finalized order
    pub fn begin_new_order(&mut self) {
        for step in [Step::CreateOrder, Step::SelectProducts, Step::Confirm, Step::Finalize] {
            self.statuses.insert(step, StepStatus::NotStarted);
        }
    }

    pub fn completed(&self) -> Vec<Step> {
        self.with_status(StepStatus::Done)
    }

    pub fn in_progress(&self) -> Vec<Step> {
        self.with_status(StepStatus::InProgress)
    }

    fn with_status(&self, status: StepStatus) -> Vec<Step> {
        self.statuses
            .iter()
            .filter(|(_, s)| **s == status)
            .map(|(step, _)| *step)
            .collect()
    }

    /// The next step the conversation should move toward, or `None` when
    /// every required step is done.
    pub fn next_incomplete(&self, order_item_count: usize) -> Option<Step> {
        next_incomplete(self, order_item_count)
    }
}

/// Resolve the next incomplete step.
///
/// Observed order state overrides tracked status for `select_products`: an
/// order with items has products selected whatever the tracker says.
pub fn next_incomplete(steps: &StepTracker, order_item_count: usize) -> Option<Step> {
    let has_items = order_item_count > 0;

    for step in Step::REQUIRED {
        let status = steps.status(step);
        match step {
            Step::CreateOrder => {
                if !has_items && status == StepStatus::NotStarted {
                    return Some(Step::CreateOrder);
                }
                // InProgress: the order is being created, keep waiting
            }
            Step::SelectProducts => {
                if has_items {
                    continue;
                }
                if !steps.is_done(Step::CreateOrder) {
                    return Some(Step::CreateOrder);
                }
                if status != StepStatus::Done {
                    return Some(Step::SelectProducts);
                }
            }
            Step::Confirm => {
                if status == StepStatus::Done {
                    continue;
                }
                if has_items && steps.is_done(Step::SelectProducts) {
                    return Some(Step::Confirm);
                }
                return Some(Step::SelectProducts);
            }
            _ => {
                if status != StepStatus::Done {
                    return Some(step);
                }
            }
        }
    }
    None
}
