//! Per-conversation turn state
//!
//! TurnState is the full state carried between turns: the flow stack,
//! slot storage, conversation phase, the slot being awaited, transient
//! markers, idempotency marks, and the pending task the engine emitted
//! when it last suspended.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};

use crate::errors::EngineError;

use super::{ClassifiedCommand, ConversationPhase, FlowInstance, FlowStack, InstanceId, SlotStore};

/// Short-lived markers cleared at the start of every new turn
///
/// Used for things like "last correction target"; nothing here survives
/// past the next routing decision.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransientFlags {
    flags: HashMap<String, Value>,
}

impl TransientFlags {
    /// Set a marker
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.flags.insert(key.into(), value);
    }

    /// Read a marker
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.flags.get(key)
    }

    /// Read a marker as a string
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.flags.get(key).and_then(|v| v.as_str())
    }

    /// Remove a marker
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.flags.remove(key)
    }

    /// Drop every marker
    pub fn clear(&mut self) {
        self.flags.clear();
    }

    /// Returns true when no markers are set
    pub fn is_empty(&self) -> bool {
        self.flags.is_empty()
    }
}

/// The single suspension signal the engine emits per turn
///
/// Created by step execution, consumed by the caller boundary, cleared
/// at the very start of the next turn's routing decision.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "task", rename_all = "snake_case")]
pub enum PendingTask {
    /// Nothing outstanding; the turn completed
    #[default]
    None,
    /// Waiting for the named slot
    Collect { slot: String, prompt: String },
    /// Waiting for a yes/no answer
    Confirm { prompt: String },
    /// An informational message was sent
    Inform { message: String, wait_for_ack: bool },
}

impl PendingTask {
    /// Returns true when no suspension is outstanding
    pub fn is_none(&self) -> bool {
        matches!(self, PendingTask::None)
    }
}

/// What kind of outbound message this is, for the transport layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// A request for a slot value
    Prompt,
    /// A confirmation question
    Confirmation,
    /// Informational output
    Info,
    /// An answer to a digression or clarification
    Answer,
    /// A generic user-facing error notice
    Error,
}

/// One outbound message produced during a turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    pub kind: MessageKind,
    pub text: String,
}

impl OutboundMessage {
    pub fn prompt(text: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Prompt,
            text: text.into(),
        }
    }

    pub fn confirmation(text: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Confirmation,
            text: text.into(),
        }
    }

    pub fn info(text: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Info,
            text: text.into(),
        }
    }

    pub fn answer(text: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Answer,
            text: text.into(),
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Error,
            text: text.into(),
        }
    }
}

/// Everything returned to the caller after one turn
#[derive(Debug, Clone, PartialEq)]
pub struct TurnOutcome {
    /// Ordered outbound messages for the transport layer
    pub messages: Vec<OutboundMessage>,
    /// The suspension point, if the turn did not complete
    pub pending: PendingTask,
    /// Phase the conversation ended the turn in
    pub phase: ConversationPhase,
}

/// Full per-conversation state carried between turns
///
/// Invariants:
/// - `awaited_slot` is only ever set while `phase == WaitingForSlot`
///   (checked transitions clear it when leaving that phase)
/// - every instance id on `flow_stack` has a `slot_store` entry
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnState {
    /// LIFO stack of active/paused flow instances
    pub flow_stack: FlowStack,
    /// Per-instance slot storage
    pub slot_store: SlotStore,
    /// Current routing state
    pub phase: ConversationPhase,
    /// The slot the system is explicitly waiting for
    pub awaited_slot: Option<String>,
    /// Short-lived markers, cleared every turn
    pub transient: TransientFlags,
    /// Number of turns processed for this conversation
    pub turn_count: u64,
    /// Per-instance step ids whose observable effect already ran this
    /// pause/resume cycle (idempotent re-entry)
    #[serde(default)]
    pub executed_step_marks: HashMap<InstanceId, HashSet<String>>,
    /// The suspension signal from the last turn
    #[serde(default)]
    pub pending: PendingTask,
    /// The command this turn is routing, replaced every turn
    #[serde(default)]
    pub last_command: Option<ClassifiedCommand>,
    /// Archived finished instances, oldest first, bounded by config
    #[serde(default)]
    pub completed_history: VecDeque<FlowInstance>,
}

impl TurnState {
    /// Create the state for a brand new conversation
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset the per-turn scratch state at the start of routing:
    /// transient flags and the consumed pending task go, the turn
    /// counter advances.
    pub fn begin_turn(&mut self) {
        self.transient.clear();
        self.pending = PendingTask::None;
        self.turn_count += 1;
    }

    /// Move to `next` if the transition table allows it.
    ///
    /// Leaving `WaitingForSlot` clears `awaited_slot` so the invariant
    /// between the two can never drift.
    pub fn transition(&mut self, next: ConversationPhase) -> Result<(), EngineError> {
        if !self.phase.can_transition_to(next) {
            return Err(EngineError::InvalidPhaseTransition {
                from: self.phase,
                to: next,
            });
        }
        if next != ConversationPhase::WaitingForSlot {
            self.awaited_slot = None;
        }
        self.phase = next;
        Ok(())
    }

    /// Enter `WaitingForSlot` for the named slot
    pub fn set_waiting(&mut self, slot: impl Into<String>) -> Result<(), EngineError> {
        self.transition(ConversationPhase::WaitingForSlot)?;
        self.awaited_slot = Some(slot.into());
        Ok(())
    }

    /// Record that a step's observable effect ran; returns false when
    /// the mark was already present (re-entry)
    pub fn mark_executed(&mut self, instance_id: &str, step_id: &str) -> bool {
        self.executed_step_marks
            .entry(instance_id.to_string())
            .or_default()
            .insert(step_id.to_string())
    }

    /// Check whether a step's effect already ran this cycle
    pub fn is_executed(&self, instance_id: &str, step_id: &str) -> bool {
        self.executed_step_marks
            .get(instance_id)
            .is_some_and(|marks| marks.contains(step_id))
    }

    /// Remove a single step mark (a revisited step becomes re-runnable)
    pub fn clear_mark(&mut self, instance_id: &str, step_id: &str) {
        if let Some(marks) = self.executed_step_marks.get_mut(instance_id) {
            marks.remove(step_id);
        }
    }

    /// Drop every mark for an instance (on pop, or on a new loop pass)
    pub fn clear_marks(&mut self, instance_id: &str) {
        self.executed_step_marks.remove(instance_id);
    }
}
