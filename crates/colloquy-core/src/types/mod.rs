//! Core type definitions for Colloquy
//!
//! This module contains the fundamental types used throughout the engine:
//! - ClassifiedCommand: structured classifier output
//! - ConversationPhase: turn-routing state machine states
//! - FlowInstance / FlowStack / SlotStore: the task stack and its storage
//! - TurnState / PendingTask: per-conversation state and the suspension signal

mod command;
mod flow;
mod phase;
mod turn;

pub use command::{
    ClassifiedCommand, ConfirmationAnswer, ConversationSnapshot, FlowSummary, SlotAssignment,
};
pub use flow::{FlowInstance, FlowStack, FlowState, InstanceId, SlotStore};
pub use phase::ConversationPhase;
pub use turn::{
    MessageKind, OutboundMessage, PendingTask, TransientFlags, TurnOutcome, TurnState,
};
