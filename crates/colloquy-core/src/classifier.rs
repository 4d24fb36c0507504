//! Classifier boundary
//!
//! The engine never interprets raw text itself; an external classifier
//! turns each user message into a ClassifiedCommand, conditioned on a
//! read-only snapshot of the conversation. How classification happens
//! is entirely the implementation's business.

use async_trait::async_trait;
use thiserror::Error;

use crate::definition::{CompiledStep, FlowRegistry};
use crate::executor::ActionRegistry;
use crate::types::{ClassifiedCommand, ConversationSnapshot, TurnState};

/// Classification failure, reported by the external implementation
#[derive(Debug, Error)]
#[error("classification failed: {0}")]
pub struct ClassifyError(pub String);

/// Turns raw user text into a structured command
#[async_trait]
pub trait Classifier: Send + Sync {
    /// Classify one user message against the conversation snapshot
    async fn classify(
        &self,
        message: &str,
        snapshot: &ConversationSnapshot,
    ) -> Result<ClassifiedCommand, ClassifyError>;
}

/// Build the read-only view the classifier is allowed to see.
pub fn snapshot(
    state: &TurnState,
    flows: &FlowRegistry,
    actions: &ActionRegistry,
) -> ConversationSnapshot {
    let mut snapshot = ConversationSnapshot {
        active_flow: None,
        expected_slots: Vec::new(),
        filled_slots: Default::default(),
        awaited_slot: state.awaited_slot.clone(),
        phase: state.phase,
        available_flows: flows.summaries(),
        available_actions: actions.names(),
    };

    if let Some(instance) = state.flow_stack.top() {
        snapshot.active_flow = Some(instance.flow_name.clone());
        snapshot.filled_slots = state.slot_store.filled(&instance.instance_id);
        if let Some(flow) = flows.get(&instance.flow_name) {
            snapshot.expected_slots = flow
                .steps()
                .iter()
                .filter_map(|step| match step {
                    CompiledStep::Collect { slot, .. } => Some(slot.clone()),
                    _ => None,
                })
                .filter(|slot| !state.slot_store.is_filled(&instance.instance_id, slot))
                .collect();
        }
    }

    snapshot
}
