//! # Colloquy Runtime
//!
//! Wires the deterministic core to its external collaborators: the
//! classifier, the action registry, and the turn-state store. One
//! `DialogueEngine` serves many conversations concurrently; each
//! conversation's turns are strictly sequential.

mod engine;

pub use engine::{engine_limits, DialogueEngine, RuntimeError};
