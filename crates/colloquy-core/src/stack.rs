//! Flow stack manager
//!
//! Owns the push/pop/pause/resume discipline over the flow stack and
//! the per-instance slot storage. Pushing pauses the displaced top;
//! popping archives the finished instance into a bounded history and
//! resumes the revealed top.

use serde_json::Value;
use std::collections::HashMap;

use crate::errors::EngineError;
use crate::types::{FlowInstance, FlowState, InstanceId, TurnState};

/// Terminal result recorded when a flow is popped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowResult {
    Completed,
    Cancelled,
}

impl From<FlowResult> for FlowState {
    fn from(result: FlowResult) -> Self {
        match result {
            FlowResult::Completed => FlowState::Completed,
            FlowResult::Cancelled => FlowState::Cancelled,
        }
    }
}

/// Manages the LIFO stack of flow instances inside a TurnState
#[derive(Debug, Clone)]
pub struct FlowStackManager {
    max_depth: usize,
    max_history: usize,
}

impl FlowStackManager {
    /// Create a manager with the configured depth and history bounds
    pub fn new(max_depth: usize, max_history: usize) -> Self {
        Self {
            max_depth: max_depth.max(1),
            max_history,
        }
    }

    /// Configured maximum stack depth
    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Push a new flow instance, pausing the current top.
    ///
    /// Rejected with `StackLimitExceeded` beyond the depth bound; the
    /// state is left untouched in that case.
    pub fn push(
        &self,
        state: &mut TurnState,
        flow_name: &str,
        initial_slots: HashMap<String, Value>,
    ) -> Result<InstanceId, EngineError> {
        let depth = state.flow_stack.depth();
        if depth >= self.max_depth {
            return Err(EngineError::StackLimitExceeded {
                depth,
                max: self.max_depth,
            });
        }

        if let Some(top) = state.flow_stack.top_mut() {
            top.pause(format!("interrupted by flow '{flow_name}'"));
        }

        let instance = FlowInstance::new(flow_name);
        let instance_id = instance.instance_id.clone();
        state.slot_store.create(instance_id.clone(), initial_slots);
        state.flow_stack.push(instance);

        tracing::debug!(
            flow = flow_name,
            instance_id = %instance_id,
            depth = state.flow_stack.depth(),
            "flow pushed"
        );
        Ok(instance_id)
    }

    /// Pop the top instance, archiving it with the given result.
    ///
    /// No-op on an empty stack. The revealed top, if any, is resumed.
    /// Returns the archived instance.
    pub fn pop(
        &self,
        state: &mut TurnState,
        outputs: HashMap<String, Value>,
        result: FlowResult,
    ) -> Option<FlowInstance> {
        let mut instance = state.flow_stack.pop()?;
        instance.finish(result.into(), outputs);
        instance.current_step = None;

        state.slot_store.remove(&instance.instance_id);
        state.clear_marks(&instance.instance_id);

        state.completed_history.push_back(instance.clone());
        self.prune(state, self.max_history);

        if let Some(top) = state.flow_stack.top_mut() {
            top.resume();
        }

        tracing::debug!(
            flow = %instance.flow_name,
            instance_id = %instance.instance_id,
            result = ?result,
            depth = state.flow_stack.depth(),
            "flow popped"
        );
        Some(instance)
    }

    /// The instance currently driving the conversation
    pub fn active_instance<'a>(&self, state: &'a TurnState) -> Option<&'a FlowInstance> {
        state.flow_stack.top()
    }

    /// Read a slot of the active instance
    pub fn get_slot<'a>(&self, state: &'a TurnState, name: &str) -> Option<&'a Value> {
        let instance = state.flow_stack.top()?;
        state.slot_store.get(&instance.instance_id, name)
    }

    /// Write a slot of the active instance; returns the previous value.
    ///
    /// Fails with `NoActiveFlow` when the stack is empty.
    pub fn set_slot(
        &self,
        state: &mut TurnState,
        name: impl Into<String>,
        value: Value,
    ) -> Result<Option<Value>, EngineError> {
        let instance_id = state
            .flow_stack
            .top()
            .map(|i| i.instance_id.clone())
            .ok_or(EngineError::NoActiveFlow)?;
        Ok(state.slot_store.set(&instance_id, name, value))
    }

    /// Trim the completed-flow history to `max_history` entries,
    /// dropping the oldest first
    pub fn prune(&self, state: &mut TurnState, max_history: usize) {
        while state.completed_history.len() > max_history {
            state.completed_history.pop_front();
        }
    }
}
