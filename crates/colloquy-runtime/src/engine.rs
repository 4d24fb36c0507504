//! Dialogue engine - the per-turn pipeline
//!
//! One pass per external input: load state, classify, route, persist.
//! The turn boundary is also the error boundary: a turn never crashes
//! the process, and internal error detail never reaches the user.

use std::sync::Arc;
use tokio::sync::RwLock;

use colloquy_core::classifier::{self, Classifier, ClassifyError};
use colloquy_core::definition::FlowRegistry;
use colloquy_core::errors::{EngineError, GENERIC_ERROR_TEXT};
use colloquy_core::executor::{ActionHandler, ActionRegistry};
use colloquy_core::router::{EngineLimits, TurnRouter};
use colloquy_core::store::{StoreError, TurnStateStore};
use colloquy_core::types::{
    ClassifiedCommand, ConversationPhase, OutboundMessage, PendingTask, TurnOutcome, TurnState,
};
use colloquy_config::ColloquyConfig;

/// Errors crossing the runtime boundary (storage, classification).
/// Engine-core errors never surface here; they are recovered per turn.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("classifier error: {0}")]
    Classify(#[from] ClassifyError),
}

/// Map file configuration onto the core's engine limits
pub fn engine_limits(config: &ColloquyConfig) -> EngineLimits {
    EngineLimits {
        max_stack_depth: config.engine.max_stack_depth,
        max_confirm_retries: config.engine.max_confirm_retries,
        step_ceiling: config.engine.step_ceiling,
        max_completed_history: config.engine.max_completed_history,
    }
}

/// The engine - classifier + flows + actions + state store, one turn at a time
pub struct DialogueEngine {
    flows: Arc<FlowRegistry>,
    actions: Arc<RwLock<ActionRegistry>>,
    classifier: Arc<dyn Classifier>,
    store: Arc<dyn TurnStateStore>,
    router: TurnRouter,
}

impl DialogueEngine {
    /// Create an engine with default limits
    pub fn new(
        flows: Arc<FlowRegistry>,
        actions: Arc<RwLock<ActionRegistry>>,
        classifier: Arc<dyn Classifier>,
        store: Arc<dyn TurnStateStore>,
    ) -> Self {
        Self::with_limits(flows, actions, classifier, store, EngineLimits::default())
    }

    /// Create an engine with explicit limits
    pub fn with_limits(
        flows: Arc<FlowRegistry>,
        actions: Arc<RwLock<ActionRegistry>>,
        classifier: Arc<dyn Classifier>,
        store: Arc<dyn TurnStateStore>,
        limits: EngineLimits,
    ) -> Self {
        Self {
            flows,
            actions,
            classifier,
            store,
            router: TurnRouter::new(limits),
        }
    }

    /// Register an action handler after startup
    pub async fn register_action(&self, handler: Arc<dyn ActionHandler>) {
        self.actions.write().await.register(handler);
    }

    /// The flow registry this engine serves
    pub fn flows(&self) -> &FlowRegistry {
        &self.flows
    }

    /// Process one user message end-to-end for a conversation key:
    /// load -> classify -> route -> save.
    pub async fn handle_message(
        &self,
        conversation_id: &str,
        message: &str,
    ) -> Result<TurnOutcome, RuntimeError> {
        let mut state = self
            .store
            .load(conversation_id)
            .await?
            .unwrap_or_default();

        let snapshot = {
            let actions = self.actions.read().await;
            classifier::snapshot(&state, &self.flows, &actions)
        };
        let command = self.classifier.classify(message, &snapshot).await?;
        tracing::info!(
            conversation_id,
            command = command.kind_label(),
            turn = state.turn_count + 1,
            "turn started"
        );

        let outcome = self.handle_command(&mut state, command).await;
        self.store.save(conversation_id, &state).await?;
        Ok(outcome)
    }

    /// Route one already-classified command against a turn state. This
    /// is the error boundary: core failures degrade or surface the
    /// error phase, they never propagate.
    pub async fn handle_command(
        &self,
        state: &mut TurnState,
        command: ClassifiedCommand,
    ) -> TurnOutcome {
        match self
            .router
            .route(state, &self.flows, &self.actions, command)
            .await
        {
            Ok(messages) => TurnOutcome {
                messages,
                pending: state.pending.clone(),
                phase: state.phase,
            },
            Err(err) => recover(state, err),
        }
    }
}

/// Turn-boundary recovery. Degraded conditions keep the state at the
/// last good step; everything else moves the conversation to the error
/// phase. Either way the user sees only the generic message.
fn recover(state: &mut TurnState, err: EngineError) -> TurnOutcome {
    if err.is_recoverable() {
        tracing::warn!(error = %err, phase = %state.phase, "turn degraded, halting at last good step");
        TurnOutcome {
            messages: vec![OutboundMessage::info(GENERIC_ERROR_TEXT)],
            pending: state.pending.clone(),
            phase: state.phase,
        }
    } else {
        tracing::error!(error = %err, phase = %state.phase, "turn failed, entering error phase");
        // the table allows error from every phase
        let _ = state.transition(ConversationPhase::Error);
        state.pending = PendingTask::None;
        TurnOutcome {
            messages: vec![OutboundMessage::error(GENERIC_ERROR_TEXT)],
            pending: PendingTask::None,
            phase: state.phase,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use colloquy_core::definition::{FlowDefinition, StepDef};
    use colloquy_core::types::ConversationSnapshot;
    use colloquy_stores::InMemoryTurnStateStore;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays a scripted command sequence, one per classify call.
    struct ScriptedClassifier {
        script: Mutex<VecDeque<ClassifiedCommand>>,
    }

    impl ScriptedClassifier {
        fn new(commands: Vec<ClassifiedCommand>) -> Self {
            Self {
                script: Mutex::new(commands.into()),
            }
        }
    }

    #[async_trait]
    impl Classifier for ScriptedClassifier {
        async fn classify(
            &self,
            _message: &str,
            _snapshot: &ConversationSnapshot,
        ) -> Result<ClassifiedCommand, ClassifyError> {
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| ClassifyError("script exhausted".to_string()))
        }
    }

    fn engine(commands: Vec<ClassifiedCommand>) -> DialogueEngine {
        let mut flows = FlowRegistry::new();
        flows
            .register(FlowDefinition::new(
                "echo",
                vec![StepDef::collect("text", "text", "Say something.")],
            ))
            .unwrap();
        DialogueEngine::new(
            Arc::new(flows),
            Arc::new(RwLock::new(ActionRegistry::new())),
            Arc::new(ScriptedClassifier::new(commands)),
            Arc::new(InMemoryTurnStateStore::new()),
        )
    }

    #[test]
    fn test_handle_message_persists_state_between_turns() {
        tokio_test::block_on(async {
            let engine = engine(vec![
                ClassifiedCommand::IntentChange {
                    flow_name: "echo".to_string(),
                    slots: Vec::new(),
                },
                ClassifiedCommand::Continuation,
            ]);

            let first = engine.handle_message("conv-1", "run echo").await.unwrap();
            assert_eq!(first.phase, ConversationPhase::WaitingForSlot);

            // the second turn sees the state the first one saved
            let second = engine.handle_message("conv-1", "hm").await.unwrap();
            assert_eq!(second.phase, ConversationPhase::WaitingForSlot);
            assert!(matches!(
                second.pending,
                PendingTask::Collect { ref slot, .. } if slot == "text"
            ));
        });
    }

    #[test]
    fn test_classifier_failure_propagates_as_runtime_error() {
        tokio_test::block_on(async {
            let engine = engine(Vec::new());
            let err = engine.handle_message("conv-1", "hello").await.unwrap_err();
            assert!(matches!(err, RuntimeError::Classify(_)));
        });
    }

    #[test]
    fn test_unrecoverable_error_enters_error_phase_with_generic_text() {
        let mut state = TurnState::new();
        let outcome = recover(&mut state, EngineError::NoActiveFlow);
        assert_eq!(state.phase, ConversationPhase::Error);
        assert_eq!(outcome.messages[0].text, GENERIC_ERROR_TEXT);
        assert!(outcome.pending.is_none());
    }
}
