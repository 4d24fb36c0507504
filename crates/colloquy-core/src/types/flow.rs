//! Flow instance, flow stack, and per-instance slot storage
//!
//! A FlowInstance is one running (or paused) invocation of a flow
//! definition. Instances live on a LIFO stack: pushing a new flow
//! pauses the current top, popping resumes it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Type alias for flow instance IDs
pub type InstanceId = String;

/// Flow instance lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowState {
    /// Currently driving the conversation (always the stack top)
    Active,
    /// Displaced by a flow pushed above it
    Paused,
    /// Ran to the end of its step list
    Completed,
    /// Cancelled by the user before completing
    Cancelled,
}

impl FlowState {
    /// Check if the instance is in a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, FlowState::Completed | FlowState::Cancelled)
    }
}

/// One running or paused invocation of a flow definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowInstance {
    /// Unique identifier for this invocation
    pub instance_id: InstanceId,
    /// Name of the flow definition being run
    pub flow_name: String,
    /// Current lifecycle state
    pub state: FlowState,
    /// Index into the compiled step list, None once archived
    pub current_step: Option<usize>,
    /// Creation timestamp
    pub started_at: DateTime<Utc>,
    /// When the instance was last paused
    pub paused_at: Option<DateTime<Utc>>,
    /// When the instance completed or was cancelled
    pub completed_at: Option<DateTime<Utc>>,
    /// Why the instance was paused (e.g. which flow interrupted it)
    pub pause_reason: Option<String>,
    /// Outputs accumulated from action steps, returned on completion
    #[serde(default)]
    pub outputs: HashMap<String, Value>,
    /// Unclear-confirmation retry counter, scoped to this instance
    #[serde(default)]
    pub confirm_retries: u32,
    /// Confirmation prompt generated on first entry, preserved verbatim
    /// across re-entries until the confirm step is left
    #[serde(default)]
    pub confirm_message: Option<String>,
}

impl FlowInstance {
    /// Create a new active instance positioned on the first step
    pub fn new(flow_name: impl Into<String>) -> Self {
        Self {
            instance_id: uuid::Uuid::new_v4().to_string(),
            flow_name: flow_name.into(),
            state: FlowState::Active,
            current_step: Some(0),
            started_at: Utc::now(),
            paused_at: None,
            completed_at: None,
            pause_reason: None,
            outputs: HashMap::new(),
            confirm_retries: 0,
            confirm_message: None,
        }
    }

    /// Pause the instance, recording when and why
    pub fn pause(&mut self, reason: impl Into<String>) {
        self.state = FlowState::Paused;
        self.paused_at = Some(Utc::now());
        self.pause_reason = Some(reason.into());
    }

    /// Resume the instance, clearing the pause stamps
    pub fn resume(&mut self) {
        self.state = FlowState::Active;
        self.paused_at = None;
        self.pause_reason = None;
    }

    /// Archive the instance as completed or cancelled
    pub fn finish(&mut self, state: FlowState, outputs: HashMap<String, Value>) {
        debug_assert!(state.is_terminal());
        self.state = state;
        self.completed_at = Some(Utc::now());
        self.outputs.extend(outputs);
    }
}

/// LIFO stack of flow instances
///
/// Invariant: at most one instance is `Active`, and it is always the
/// top. Depth limits are enforced by the stack manager, not here.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlowStack {
    instances: Vec<FlowInstance>,
}

impl FlowStack {
    /// Create an empty stack
    pub fn new() -> Self {
        Self::default()
    }

    /// Current stack depth
    pub fn depth(&self) -> usize {
        self.instances.len()
    }

    /// Returns true when no flow is running
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// The instance currently driving the conversation
    pub fn top(&self) -> Option<&FlowInstance> {
        self.instances.last()
    }

    /// Mutable access to the top instance
    pub fn top_mut(&mut self) -> Option<&mut FlowInstance> {
        self.instances.last_mut()
    }

    /// Append an instance (depth checks are the stack manager's job)
    pub fn push(&mut self, instance: FlowInstance) {
        self.instances.push(instance);
    }

    /// Remove and return the top instance
    pub fn pop(&mut self) -> Option<FlowInstance> {
        self.instances.pop()
    }

    /// Iterate bottom-up over all instances
    pub fn iter(&self) -> impl Iterator<Item = &FlowInstance> {
        self.instances.iter()
    }
}

/// Per-instance slot storage
///
/// One entry is created per push and deleted per pop. Slot values are
/// opaque to the core; only presence and equality matter here.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SlotStore {
    slots: HashMap<InstanceId, HashMap<String, Value>>,
}

impl SlotStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the entry for a freshly pushed instance
    pub fn create(&mut self, instance_id: impl Into<InstanceId>, initial: HashMap<String, Value>) {
        self.slots.insert(instance_id.into(), initial);
    }

    /// Drop the entry for a popped instance
    pub fn remove(&mut self, instance_id: &str) -> Option<HashMap<String, Value>> {
        self.slots.remove(instance_id)
    }

    /// Returns true when the instance has an entry
    pub fn has_entry(&self, instance_id: &str) -> bool {
        self.slots.contains_key(instance_id)
    }

    /// Look up a slot value for an instance
    pub fn get(&self, instance_id: &str, name: &str) -> Option<&Value> {
        self.slots.get(instance_id).and_then(|m| m.get(name))
    }

    /// Set a slot value for an instance; returns the previous value
    pub fn set(
        &mut self,
        instance_id: &str,
        name: impl Into<String>,
        value: Value,
    ) -> Option<Value> {
        self.slots
            .entry(instance_id.to_string())
            .or_default()
            .insert(name.into(), value)
    }

    /// Remove a single slot from an instance's entry
    pub fn clear_slot(&mut self, instance_id: &str, name: &str) -> Option<Value> {
        self.slots.get_mut(instance_id).and_then(|m| m.remove(name))
    }

    /// Returns true when the slot is present and non-null
    pub fn is_filled(&self, instance_id: &str, name: &str) -> bool {
        self.get(instance_id, name).is_some_and(|v| !v.is_null())
    }

    /// All filled slots of an instance
    pub fn filled(&self, instance_id: &str) -> HashMap<String, Value> {
        self.slots.get(instance_id).cloned().unwrap_or_default()
    }
}
