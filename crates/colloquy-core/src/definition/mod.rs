//! Flow and step definitions
//!
//! A FlowDefinition is the static, author-facing description of a task:
//! an ordered list of steps. Definitions are compiled once into a
//! CompiledFlow (see `compile`) before any conversation runs them; loop
//! constructs only exist at this level and are expanded away by the
//! compiler.

mod compile;

pub use compile::{compile_flow, CompileError, CompiledFlow, CompiledStep};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::types::FlowSummary;

/// Step type - distinguishes control semantics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    /// Ask for and wait on a slot value
    Collect,
    /// Ask the user to confirm the collected values
    Confirm,
    /// Conditional jump on a slot guard
    Branch,
    /// Invoke an external action
    Action,
    /// Send a message to the user
    Emit,
    /// Repeat a body of steps until a guard is satisfied
    Loop,
    /// Unconditional jump to a named step
    Jump,
}

/// Slot guard used by branch and loop steps
///
/// Satisfied when the slot is present and non-null, and additionally
/// equal to `equals` when one is given.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchGuard {
    pub slot: String,
    #[serde(default)]
    pub equals: Option<Value>,
}

impl BranchGuard {
    /// Guard on slot presence
    pub fn present(slot: impl Into<String>) -> Self {
        Self {
            slot: slot.into(),
            equals: None,
        }
    }

    /// Guard on slot equality
    pub fn equals(slot: impl Into<String>, value: Value) -> Self {
        Self {
            slot: slot.into(),
            equals: Some(value),
        }
    }

    /// Evaluate the guard against an instance's filled slots
    pub fn is_satisfied(&self, slots: &HashMap<String, Value>) -> bool {
        match slots.get(&self.slot) {
            None => false,
            Some(value) if value.is_null() => false,
            Some(value) => match &self.equals {
                Some(expected) => value == expected,
                None => true,
            },
        }
    }
}

/// A single step in a flow definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDef {
    /// Unique identifier within the flow
    pub id: String,
    /// Step type for control flow semantics
    pub kind: StepKind,
    /// Slot collected by a collect step
    #[serde(default)]
    pub slot: Option<String>,
    /// Prompt for a collect step, or template for a confirm step;
    /// `{slot}` placeholders are interpolated from current values
    #[serde(default)]
    pub prompt: Option<String>,
    /// Why this step needs its input; sourced by clarifications
    #[serde(default)]
    pub description: Option<String>,
    /// Slots a confirm step summarizes; also the re-entry candidates
    /// when the user answers "no"
    #[serde(default)]
    pub required_slots: Vec<String>,
    /// Action name for an action step
    #[serde(default)]
    pub action: Option<String>,
    /// Message for an emit step
    #[serde(default)]
    pub message: Option<String>,
    /// Whether an emit step suspends until the user acknowledges
    #[serde(default)]
    pub wait_for_ack: bool,
    /// Guard for branch and loop steps
    #[serde(default)]
    pub guard: Option<BranchGuard>,
    /// Branch target when the guard holds; the reserved name "end"
    /// jumps past the last step
    #[serde(default)]
    pub then_target: Option<String>,
    /// Branch target when the guard fails; falls through when absent
    #[serde(default)]
    pub else_target: Option<String>,
    /// Jump target
    #[serde(default)]
    pub target: Option<String>,
    /// Loop body
    #[serde(default)]
    pub body: Vec<StepDef>,
}

impl StepDef {
    fn base(id: impl Into<String>, kind: StepKind) -> Self {
        Self {
            id: id.into(),
            kind,
            slot: None,
            prompt: None,
            description: None,
            required_slots: Vec::new(),
            action: None,
            message: None,
            wait_for_ack: false,
            guard: None,
            then_target: None,
            else_target: None,
            target: None,
            body: Vec::new(),
        }
    }

    /// Create a collect step
    pub fn collect(
        id: impl Into<String>,
        slot: impl Into<String>,
        prompt: impl Into<String>,
    ) -> Self {
        let mut step = Self::base(id, StepKind::Collect);
        step.slot = Some(slot.into());
        step.prompt = Some(prompt.into());
        step
    }

    /// Create a confirm step with a prompt template
    pub fn confirm(id: impl Into<String>, template: impl Into<String>) -> Self {
        let mut step = Self::base(id, StepKind::Confirm);
        step.prompt = Some(template.into());
        step
    }

    /// Create a branch step
    pub fn branch(id: impl Into<String>, guard: BranchGuard, then_target: impl Into<String>) -> Self {
        let mut step = Self::base(id, StepKind::Branch);
        step.guard = Some(guard);
        step.then_target = Some(then_target.into());
        step
    }

    /// Create an action step
    pub fn action(id: impl Into<String>, action: impl Into<String>) -> Self {
        let mut step = Self::base(id, StepKind::Action);
        step.action = Some(action.into());
        step
    }

    /// Create an emit step
    pub fn emit(id: impl Into<String>, message: impl Into<String>) -> Self {
        let mut step = Self::base(id, StepKind::Emit);
        step.message = Some(message.into());
        step
    }

    /// Create a jump step
    pub fn jump(id: impl Into<String>, target: impl Into<String>) -> Self {
        let mut step = Self::base(id, StepKind::Jump);
        step.target = Some(target.into());
        step
    }

    /// Create a loop step repeating `body` until `guard` is satisfied
    pub fn loop_until(id: impl Into<String>, guard: BranchGuard, body: Vec<StepDef>) -> Self {
        let mut step = Self::base(id, StepKind::Loop);
        step.guard = Some(guard);
        step.body = body;
        step
    }

    /// Attach a description (clarification source)
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Declare the slots a confirm step covers
    pub fn with_required_slots(mut self, slots: Vec<String>) -> Self {
        self.required_slots = slots;
        self
    }

    /// Make an emit step suspend until acknowledged
    pub fn with_wait_for_ack(mut self) -> Self {
        self.wait_for_ack = true;
        self
    }

    /// Attach an else-target to a branch step
    pub fn with_else_target(mut self, target: impl Into<String>) -> Self {
        self.else_target = Some(target.into());
        self
    }
}

/// A named, multi-step task definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowDefinition {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub steps: Vec<StepDef>,
}

impl FlowDefinition {
    /// Create a flow definition
    pub fn new(name: impl Into<String>, steps: Vec<StepDef>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            steps,
        }
    }

    /// Attach a description (shown to the classifier)
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Registry of compiled flows, immutable once the engine starts
///
/// Built once at startup and read concurrently by every conversation;
/// compilation never mutates the registered definition.
#[derive(Debug, Default)]
pub struct FlowRegistry {
    flows: HashMap<String, Arc<CompiledFlow>>,
}

impl FlowRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile and register a flow definition.
    ///
    /// Duplicate registration overwrites with a logged warning.
    pub fn register(&mut self, definition: FlowDefinition) -> Result<(), CompileError> {
        let compiled = compile_flow(&definition)?;
        if self
            .flows
            .insert(definition.name.clone(), Arc::new(compiled))
            .is_some()
        {
            tracing::warn!(flow = %definition.name, "flow re-registered, overwriting");
        }
        Ok(())
    }

    /// Look up a compiled flow by name
    pub fn get(&self, name: &str) -> Option<Arc<CompiledFlow>> {
        self.flows.get(name).cloned()
    }

    /// All registered flow names
    pub fn names(&self) -> Vec<String> {
        self.flows.keys().cloned().collect()
    }

    /// Name + description pairs for the classifier snapshot
    pub fn summaries(&self) -> Vec<FlowSummary> {
        self.flows
            .values()
            .map(|flow| FlowSummary {
                name: flow.name.clone(),
                description: flow.description.clone(),
            })
            .collect()
    }
}
