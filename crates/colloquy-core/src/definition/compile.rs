//! Flow compilation - validation plus loop expansion
//!
//! `compile_flow` turns a FlowDefinition into a CompiledFlow whose step
//! enum has no loop variant: a loop becomes a guard branch, the body,
//! and a jump back to the guard. The input is cloned up front, so
//! repeated or concurrent compilation of a shared definition is
//! side-effect free.

use std::collections::HashMap;
use thiserror::Error;

use super::{BranchGuard, FlowDefinition, StepDef, StepKind};

/// Reserved target name jumping past the last step of the flow
const END_TARGET: &str = "end";

/// Errors raised while compiling a flow definition
#[derive(Debug, Clone, Error)]
pub enum CompileError {
    #[error("flow '{0}' has no steps")]
    EmptyFlow(String),

    #[error("flow '{flow}' has duplicate step id '{step}'")]
    DuplicateStepId { flow: String, step: String },

    #[error("flow '{flow}' step '{step}' targets unknown step '{target}'")]
    UnknownTarget {
        flow: String,
        step: String,
        target: String,
    },

    #[error("flow '{flow}' step '{step}' is missing required field '{field}'")]
    MissingField {
        flow: String,
        step: String,
        field: String,
    },
}

/// An executable step - closed set, no loop variant
///
/// Branch and jump targets are resolved indices; an index equal to the
/// flow length means "flow complete".
#[derive(Debug, Clone, PartialEq)]
pub enum CompiledStep {
    Collect {
        id: String,
        slot: String,
        prompt: Option<String>,
        description: Option<String>,
    },
    Confirm {
        id: String,
        template: String,
        required_slots: Vec<String>,
        description: Option<String>,
    },
    Branch {
        id: String,
        guard: BranchGuard,
        on_true: usize,
        on_false: usize,
    },
    Action {
        id: String,
        action: String,
    },
    Emit {
        id: String,
        message: String,
        wait_for_ack: bool,
    },
    Jump {
        id: String,
        target: usize,
    },
}

impl CompiledStep {
    /// The step's id
    pub fn id(&self) -> &str {
        match self {
            CompiledStep::Collect { id, .. }
            | CompiledStep::Confirm { id, .. }
            | CompiledStep::Branch { id, .. }
            | CompiledStep::Action { id, .. }
            | CompiledStep::Emit { id, .. }
            | CompiledStep::Jump { id, .. } => id,
        }
    }

    /// Short label for structured logging
    pub fn kind_label(&self) -> &'static str {
        match self {
            CompiledStep::Collect { .. } => "collect",
            CompiledStep::Confirm { .. } => "confirm",
            CompiledStep::Branch { .. } => "branch",
            CompiledStep::Action { .. } => "action",
            CompiledStep::Emit { .. } => "emit",
            CompiledStep::Jump { .. } => "jump",
        }
    }
}

/// A validated, loop-free flow ready for the step executor
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledFlow {
    pub name: String,
    pub description: String,
    steps: Vec<CompiledStep>,
}

impl CompiledFlow {
    /// Number of executable steps
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Returns true when the flow has no steps (never produced by
    /// `compile_flow`; kept for completeness)
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// The step at `index`, when in bounds
    pub fn step(&self, index: usize) -> Option<&CompiledStep> {
        self.steps.get(index)
    }

    /// All steps in execution order
    pub fn steps(&self) -> &[CompiledStep] {
        &self.steps
    }

    /// Index of the step with the given id
    pub fn step_index(&self, id: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.id() == id)
    }

    /// Index of the first collect step for `slot`
    pub fn collect_index_for_slot(&self, slot: &str) -> Option<usize> {
        self.steps.iter().position(
            |s| matches!(s, CompiledStep::Collect { slot: name, .. } if name == slot),
        )
    }

    /// Index of the first collect step in the flow
    pub fn first_collect_index(&self) -> Option<usize> {
        self.steps
            .iter()
            .position(|s| matches!(s, CompiledStep::Collect { .. }))
    }
}

/// Symbolic target used while flattening, resolved to an index later
#[derive(Debug, Clone)]
enum TargetRef {
    /// The next step in flattened order
    Next,
    /// Past the last step (flow complete)
    End,
    /// A named step
    Id(String),
}

#[derive(Debug)]
struct FlatStep {
    id: String,
    payload: FlatPayload,
}

#[derive(Debug)]
enum FlatPayload {
    Collect {
        slot: String,
        prompt: Option<String>,
        description: Option<String>,
    },
    Confirm {
        template: String,
        required_slots: Vec<String>,
        description: Option<String>,
    },
    Branch {
        guard: BranchGuard,
        on_true: TargetRef,
        on_false: TargetRef,
    },
    Action {
        action: String,
    },
    Emit {
        message: String,
        wait_for_ack: bool,
    },
    Jump {
        target: TargetRef,
    },
}

/// Compile a flow definition into its executable form.
///
/// Pure transform: the definition is deep-copied before any work, so a
/// definition shared across worker threads can be compiled repeatedly
/// and concurrently.
pub fn compile_flow(definition: &FlowDefinition) -> Result<CompiledFlow, CompileError> {
    let definition = definition.clone();
    if definition.steps.is_empty() {
        return Err(CompileError::EmptyFlow(definition.name));
    }

    let mut flat = Vec::new();
    let mut aliases = HashMap::new();
    flatten_sequence(
        &definition.name,
        &definition.steps,
        &TargetRef::End,
        &mut flat,
        &mut aliases,
    )?;

    let mut index_of = HashMap::new();
    for (index, step) in flat.iter().enumerate() {
        if index_of.insert(step.id.clone(), index).is_some() {
            return Err(CompileError::DuplicateStepId {
                flow: definition.name,
                step: step.id.clone(),
            });
        }
    }

    let end = flat.len();
    let mut steps = Vec::with_capacity(end);
    for (index, step) in flat.into_iter().enumerate() {
        let resolve = |target: &TargetRef| -> Result<usize, CompileError> {
            resolve_target(
                target,
                index,
                end,
                &index_of,
                &aliases,
                &definition.name,
                &step.id,
            )
        };

        let compiled = match &step.payload {
            FlatPayload::Collect {
                slot,
                prompt,
                description,
            } => CompiledStep::Collect {
                id: step.id.clone(),
                slot: slot.clone(),
                prompt: prompt.clone(),
                description: description.clone(),
            },
            FlatPayload::Confirm {
                template,
                required_slots,
                description,
            } => CompiledStep::Confirm {
                id: step.id.clone(),
                template: template.clone(),
                required_slots: required_slots.clone(),
                description: description.clone(),
            },
            FlatPayload::Branch {
                guard,
                on_true,
                on_false,
            } => CompiledStep::Branch {
                id: step.id.clone(),
                guard: guard.clone(),
                on_true: resolve(on_true)?,
                on_false: resolve(on_false)?,
            },
            FlatPayload::Action { action } => CompiledStep::Action {
                id: step.id.clone(),
                action: action.clone(),
            },
            FlatPayload::Emit {
                message,
                wait_for_ack,
            } => CompiledStep::Emit {
                id: step.id.clone(),
                message: message.clone(),
                wait_for_ack: *wait_for_ack,
            },
            FlatPayload::Jump { target } => CompiledStep::Jump {
                id: step.id.clone(),
                target: resolve(target)?,
            },
        };
        steps.push(compiled);
    }

    Ok(CompiledFlow {
        name: definition.name,
        description: definition.description,
        steps,
    })
}

fn resolve_target(
    target: &TargetRef,
    own_index: usize,
    end: usize,
    index_of: &HashMap<String, usize>,
    aliases: &HashMap<String, String>,
    flow: &str,
    step: &str,
) -> Result<usize, CompileError> {
    match target {
        TargetRef::Next => Ok(own_index + 1),
        TargetRef::End => Ok(end),
        TargetRef::Id(name) => {
            if let Some(index) = index_of.get(name) {
                return Ok(*index);
            }
            if let Some(alias) = aliases.get(name) {
                if let Some(index) = index_of.get(alias) {
                    return Ok(*index);
                }
            }
            if name == END_TARGET {
                return Ok(end);
            }
            Err(CompileError::UnknownTarget {
                flow: flow.to_string(),
                step: step.to_string(),
                target: name.clone(),
            })
        }
    }
}

fn flatten_sequence(
    flow: &str,
    steps: &[StepDef],
    after: &TargetRef,
    flat: &mut Vec<FlatStep>,
    aliases: &mut HashMap<String, String>,
) -> Result<(), CompileError> {
    for (index, step) in steps.iter().enumerate() {
        let following = match steps.get(index + 1) {
            Some(next) => TargetRef::Id(first_id(next)),
            None => after.clone(),
        };
        flatten_step(flow, step, &following, flat, aliases)?;
    }
    Ok(())
}

fn flatten_step(
    flow: &str,
    step: &StepDef,
    following: &TargetRef,
    flat: &mut Vec<FlatStep>,
    aliases: &mut HashMap<String, String>,
) -> Result<(), CompileError> {
    let missing = |field: &str| CompileError::MissingField {
        flow: flow.to_string(),
        step: step.id.clone(),
        field: field.to_string(),
    };

    match step.kind {
        StepKind::Collect => {
            let slot = step.slot.clone().ok_or_else(|| missing("slot"))?;
            flat.push(FlatStep {
                id: step.id.clone(),
                payload: FlatPayload::Collect {
                    slot,
                    prompt: step.prompt.clone(),
                    description: step.description.clone(),
                },
            });
        }
        StepKind::Confirm => {
            let template = step.prompt.clone().ok_or_else(|| missing("prompt"))?;
            flat.push(FlatStep {
                id: step.id.clone(),
                payload: FlatPayload::Confirm {
                    template,
                    required_slots: step.required_slots.clone(),
                    description: step.description.clone(),
                },
            });
        }
        StepKind::Branch => {
            let guard = step.guard.clone().ok_or_else(|| missing("guard"))?;
            let then_target = step
                .then_target
                .clone()
                .ok_or_else(|| missing("then_target"))?;
            let on_false = match &step.else_target {
                Some(target) => TargetRef::Id(target.clone()),
                None => TargetRef::Next,
            };
            flat.push(FlatStep {
                id: step.id.clone(),
                payload: FlatPayload::Branch {
                    guard,
                    on_true: TargetRef::Id(then_target),
                    on_false,
                },
            });
        }
        StepKind::Action => {
            let action = step.action.clone().ok_or_else(|| missing("action"))?;
            flat.push(FlatStep {
                id: step.id.clone(),
                payload: FlatPayload::Action { action },
            });
        }
        StepKind::Emit => {
            let message = step.message.clone().ok_or_else(|| missing("message"))?;
            flat.push(FlatStep {
                id: step.id.clone(),
                payload: FlatPayload::Emit {
                    message,
                    wait_for_ack: step.wait_for_ack,
                },
            });
        }
        StepKind::Jump => {
            let target = step.target.clone().ok_or_else(|| missing("target"))?;
            flat.push(FlatStep {
                id: step.id.clone(),
                payload: FlatPayload::Jump {
                    target: TargetRef::Id(target),
                },
            });
        }
        StepKind::Loop => {
            let guard = step.guard.clone().ok_or_else(|| missing("guard"))?;
            if step.body.is_empty() {
                return Err(missing("body"));
            }

            let check_id = format!("{}.check", step.id);
            let repeat_id = format!("{}.repeat", step.id);
            aliases.insert(step.id.clone(), check_id.clone());

            // exit when the guard holds, otherwise fall into the body
            flat.push(FlatStep {
                id: check_id.clone(),
                payload: FlatPayload::Branch {
                    guard,
                    on_true: following.clone(),
                    on_false: TargetRef::Next,
                },
            });
            flatten_sequence(
                flow,
                &step.body,
                &TargetRef::Id(repeat_id.clone()),
                flat,
                aliases,
            )?;
            flat.push(FlatStep {
                id: repeat_id,
                payload: FlatPayload::Jump {
                    target: TargetRef::Id(check_id),
                },
            });
        }
    }
    Ok(())
}

fn first_id(step: &StepDef) -> String {
    match step.kind {
        StepKind::Loop => format!("{}.check", step.id),
        _ => step.id.clone(),
    }
}
