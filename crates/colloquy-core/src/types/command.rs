//! Classified command types - the classifier boundary
//!
//! The external classifier turns raw user text into a ClassifiedCommand.
//! The core never sees raw text beyond what rides along in the variants;
//! routing is an exhaustive match over this closed enum.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use super::ConversationPhase;

/// A named slot value extracted from the user's utterance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotAssignment {
    /// Slot name
    pub name: String,
    /// New value
    pub value: Value,
    /// Value being replaced, when the classifier detected one
    #[serde(default)]
    pub previous_value: Option<Value>,
}

impl SlotAssignment {
    /// Create an assignment without a previous value
    pub fn new(name: impl Into<String>, value: Value) -> Self {
        Self {
            name: name.into(),
            value,
            previous_value: None,
        }
    }

    /// Attach the value this assignment replaces
    pub fn with_previous(mut self, previous: Value) -> Self {
        self.previous_value = Some(previous);
        self
    }
}

/// The user's answer to a confirmation prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationAnswer {
    Yes,
    No,
    /// Could not be read as yes or no
    Unclear,
}

/// Classifier output - one structured command per user turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum ClassifiedCommand {
    /// One or more slot values supplied in a single utterance
    SlotValues { slots: Vec<SlotAssignment> },
    /// The user is fixing a value the system got wrong
    Correction { slot: SlotAssignment },
    /// The user is changing a value they previously gave
    Modification { slot: SlotAssignment },
    /// Answer to an outstanding confirmation prompt
    ConfirmationAnswer { answer: ConfirmationAnswer },
    /// The user wants to start (or switch to) a different flow
    IntentChange {
        flow_name: String,
        #[serde(default)]
        slots: Vec<SlotAssignment>,
    },
    /// Off-task utterance that must not disturb the active flow
    Digression { utterance: String },
    /// The user asks why a slot is being collected
    Clarification {
        #[serde(default)]
        target_slot: Option<String>,
    },
    /// Abandon the active flow
    Cancellation,
    /// Nothing actionable; carry on where we were
    Continuation,
}

impl ClassifiedCommand {
    /// Short label for structured logging
    pub fn kind_label(&self) -> &'static str {
        match self {
            ClassifiedCommand::SlotValues { .. } => "slot_values",
            ClassifiedCommand::Correction { .. } => "correction",
            ClassifiedCommand::Modification { .. } => "modification",
            ClassifiedCommand::ConfirmationAnswer { .. } => "confirmation_answer",
            ClassifiedCommand::IntentChange { .. } => "intent_change",
            ClassifiedCommand::Digression { .. } => "digression",
            ClassifiedCommand::Clarification { .. } => "clarification",
            ClassifiedCommand::Cancellation => "cancellation",
            ClassifiedCommand::Continuation => "continuation",
        }
    }
}

/// Name and description of a registered flow, for the classifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowSummary {
    pub name: String,
    pub description: String,
}

/// Read-only view of the conversation handed to the classifier
///
/// Everything the classifier may condition on lives here; it never
/// receives the TurnState itself.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationSnapshot {
    /// Name of the active flow, if any
    pub active_flow: Option<String>,
    /// Slot names the active flow still expects
    pub expected_slots: Vec<String>,
    /// Slots already filled for the active flow
    pub filled_slots: HashMap<String, Value>,
    /// The slot currently being prompted for
    pub awaited_slot: Option<String>,
    /// Current conversation phase
    pub phase: ConversationPhase,
    /// Flows the engine can start
    pub available_flows: Vec<FlowSummary>,
    /// Action names the engine can execute
    pub available_actions: Vec<String>,
}
