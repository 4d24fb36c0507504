//! Persistence boundary
//!
//! The engine reads and writes one TurnState per conversation key per
//! turn. Backends only have to provide atomic read-modify-write per
//! key; their format and location are their own business.
//!
//! Note: implementations live in the colloquy-stores crate.

use async_trait::async_trait;
use thiserror::Error;

use crate::types::TurnState;

/// Store error types
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Conversation not found: {0}")]
    NotFound(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Per-conversation turn state persistence
#[async_trait]
pub trait TurnStateStore: Send + Sync {
    /// Load the state for a conversation key, if any
    async fn load(&self, conversation_id: &str) -> Result<Option<TurnState>, StoreError>;

    /// Persist the state for a conversation key
    async fn save(&self, conversation_id: &str, state: &TurnState) -> Result<(), StoreError>;

    /// Drop a conversation's state; returns whether anything was removed
    async fn delete(&self, conversation_id: &str) -> Result<bool, StoreError>;
}
