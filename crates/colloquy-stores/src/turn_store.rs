//! TurnStateStore in-memory implementation.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;

use colloquy_core::store::{StoreError, TurnStateStore};
use colloquy_core::types::TurnState;

const DEFAULT_IN_MEMORY_CONVERSATION_LIMIT: usize = 5_000;

/// In-memory implementation for development and testing.
///
/// Each save replaces the whole entry under its conversation key while
/// holding the write lock, which gives the atomic per-key
/// read-modify-write the engine requires.
pub struct InMemoryTurnStateStore {
    states: RwLock<HashMap<String, TurnState>>,
    order: RwLock<VecDeque<String>>,
    max_conversations: usize,
}

impl InMemoryTurnStateStore {
    /// Create a new in-memory store.
    pub fn new() -> Self {
        Self::with_max_conversations(DEFAULT_IN_MEMORY_CONVERSATION_LIMIT)
    }

    /// Create a new in-memory store with a hard capacity limit.
    pub fn with_max_conversations(max_conversations: usize) -> Self {
        Self {
            states: RwLock::new(HashMap::new()),
            order: RwLock::new(VecDeque::new()),
            max_conversations: max_conversations.max(1),
        }
    }

    fn touch_order(order: &mut VecDeque<String>, conversation_id: &str) {
        order.retain(|id| id != conversation_id);
        order.push_back(conversation_id.to_string());
    }
}

impl Default for InMemoryTurnStateStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TurnStateStore for InMemoryTurnStateStore {
    async fn load(&self, conversation_id: &str) -> Result<Option<TurnState>, StoreError> {
        let states = self
            .states
            .read()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        Ok(states.get(conversation_id).cloned())
    }

    async fn save(&self, conversation_id: &str, state: &TurnState) -> Result<(), StoreError> {
        let mut states = self
            .states
            .write()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        let mut order = self
            .order
            .write()
            .map_err(|e| StoreError::Internal(e.to_string()))?;

        if !states.contains_key(conversation_id) && states.len() >= self.max_conversations {
            if let Some(oldest_id) = order.pop_front() {
                states.remove(&oldest_id);
            }
        }
        states.insert(conversation_id.to_string(), state.clone());
        Self::touch_order(&mut order, conversation_id);
        Ok(())
    }

    async fn delete(&self, conversation_id: &str) -> Result<bool, StoreError> {
        let mut states = self
            .states
            .write()
            .map_err(|e| StoreError::Internal(e.to_string()))?;
        let removed = states.remove(conversation_id).is_some();
        if removed {
            let mut order = self
                .order
                .write()
                .map_err(|e| StoreError::Internal(e.to_string()))?;
            order.retain(|id| id != conversation_id);
        }
        Ok(removed)
    }
}
