//! End-to-end booking conversation against the full engine pipeline:
//! classify -> route -> execute -> persist, across several turns.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::RwLock;

use colloquy_core::classifier::{Classifier, ClassifyError};
use colloquy_core::definition::{FlowDefinition, FlowRegistry, StepDef};
use colloquy_core::executor::{ActionHandler, ActionOutcome, ActionRegistry};
use colloquy_core::types::{
    ClassifiedCommand, ConfirmationAnswer, ConversationPhase, ConversationSnapshot, MessageKind,
    PendingTask, SlotAssignment,
};
use colloquy_runtime::DialogueEngine;
use colloquy_stores::InMemoryTurnStateStore;

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

struct RecordingAction {
    calls: Arc<Mutex<Vec<std::collections::HashMap<String, Value>>>>,
}

#[async_trait]
impl ActionHandler for RecordingAction {
    fn name(&self) -> &str {
        "search_flights"
    }

    fn description(&self) -> &str {
        "Search for matching flights"
    }

    async fn execute(
        &self,
        slots: std::collections::HashMap<String, Value>,
    ) -> ActionOutcome {
        self.calls.lock().unwrap().push(slots);
        ActionOutcome::success_with_one("results", json!(["IB1234"]))
    }
}

fn booking_flows() -> FlowRegistry {
    let mut flows = FlowRegistry::new();
    flows
        .register(
            FlowDefinition::new(
                "book_flight",
                vec![
                    StepDef::collect("origin", "origin", "Where are you flying from?")
                        .with_description("The departure city sets which airports I search."),
                    StepDef::collect("destination", "destination", "Where are you flying to?"),
                    StepDef::collect("date", "date", "When do you want to travel?"),
                    StepDef::confirm(
                        "confirm",
                        "Book a flight from {origin} to {destination} on {date}?",
                    )
                    .with_required_slots(vec![
                        "origin".to_string(),
                        "destination".to_string(),
                        "date".to_string(),
                    ]),
                    StepDef::action("search", "search_flights"),
                ],
            )
            .with_description("Book a flight between two cities"),
        )
        .unwrap();
    flows
        .register(
            FlowDefinition::new(
                "weather",
                vec![StepDef::emit("report", "Expect clear skies.")],
            )
            .with_description("Report the weather"),
        )
        .unwrap();
    flows
}

fn engine_with(
    commands: Vec<ClassifiedCommand>,
) -> (DialogueEngine, Arc<Mutex<Vec<std::collections::HashMap<String, Value>>>>) {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let mut actions = ActionRegistry::new();
    actions.register(Arc::new(RecordingAction {
        calls: calls.clone(),
    }));

    let engine = DialogueEngine::new(
        Arc::new(booking_flows()),
        Arc::new(RwLock::new(actions)),
        Arc::new(ScriptedClassifier::new(commands)),
        Arc::new(InMemoryTurnStateStore::new()),
    );
    (engine, calls)
}

fn slot(name: &str, value: Value) -> SlotAssignment {
    SlotAssignment::new(name, value)
}

#[test]
fn test_booking_conversation_end_to_end() {
    tokio_test::block_on(async {
        let (engine, calls) = engine_with(vec![
            ClassifiedCommand::IntentChange {
                flow_name: "book_flight".to_string(),
                slots: Vec::new(),
            },
            ClassifiedCommand::SlotValues {
                slots: vec![
                    slot("origin", json!("Madrid")),
                    slot("destination", json!("Barcelona")),
                ],
            },
            ClassifiedCommand::SlotValues {
                slots: vec![slot("date", json!("2025-12-25"))],
            },
            ClassifiedCommand::Correction {
                slot: slot("destination", json!("Seville")).with_previous(json!("Barcelona")),
            },
            ClassifiedCommand::ConfirmationAnswer {
                answer: ConfirmationAnswer::Yes,
            },
            ClassifiedCommand::Continuation,
        ]);

        let start = engine.handle_message("c1", "I want to book a flight").await.unwrap();
        assert_eq!(start.phase, ConversationPhase::WaitingForSlot);
        assert!(matches!(
            start.pending,
            PendingTask::Collect { ref slot, .. } if slot == "origin"
        ));

        // one turn supplying two slots skips both satisfied collects
        let turn1 = engine
            .handle_message("c1", "from Madrid to Barcelona")
            .await
            .unwrap();
        assert_eq!(turn1.phase, ConversationPhase::WaitingForSlot);
        assert!(matches!(
            turn1.pending,
            PendingTask::Collect { ref slot, .. } if slot == "date"
        ));

        let turn2 = engine.handle_message("c1", "on christmas day").await.unwrap();
        assert_eq!(turn2.phase, ConversationPhase::Confirming);
        let prompt = &turn2.messages.last().unwrap().text;
        assert!(prompt.contains("Madrid"));
        assert!(prompt.contains("Barcelona"));
        assert!(prompt.contains("2025-12-25"));

        // mid-confirmation correction regenerates the prompt in place
        let turn3 = engine
            .handle_message("c1", "actually make that Seville")
            .await
            .unwrap();
        assert_eq!(turn3.phase, ConversationPhase::Confirming);
        let prompt = &turn3.messages.last().unwrap().text;
        assert!(prompt.contains("Seville"));
        assert!(!prompt.contains("Barcelona"));

        let turn4 = engine.handle_message("c1", "yes").await.unwrap();
        assert_eq!(turn4.phase, ConversationPhase::ReadyForAction);
        assert!(calls.lock().unwrap().is_empty());

        // the next nudge runs the action exactly once with the corrected slot
        let turn5 = engine.handle_message("c1", "go ahead").await.unwrap();
        assert_eq!(turn5.phase, ConversationPhase::Idle);
        let recorded = calls.lock().unwrap();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].get("destination"), Some(&json!("Seville")));
        assert_eq!(recorded[0].get("origin"), Some(&json!("Madrid")));
    });
}

#[test]
fn test_digression_and_clarification_leave_the_task_where_it_was() {
    tokio_test::block_on(async {
        let (engine, _) = engine_with(vec![
            ClassifiedCommand::IntentChange {
                flow_name: "book_flight".to_string(),
                slots: vec![slot("origin", json!("Madrid"))],
            },
            ClassifiedCommand::Digression {
                utterance: "do you like jazz?".to_string(),
            },
            ClassifiedCommand::Clarification { target_slot: None },
        ]);

        let start = engine.handle_message("c1", "book a flight from Madrid").await.unwrap();
        assert!(matches!(
            start.pending,
            PendingTask::Collect { ref slot, .. } if slot == "destination"
        ));

        let digression = engine.handle_message("c1", "do you like jazz?").await.unwrap();
        assert_eq!(digression.phase, ConversationPhase::WaitingForSlot);
        assert!(matches!(
            digression.pending,
            PendingTask::Collect { ref slot, .. } if slot == "destination"
        ));
        assert!(digression
            .messages
            .iter()
            .any(|m| m.kind == MessageKind::Answer));
        assert!(digression
            .messages
            .iter()
            .any(|m| m.text == "Where are you flying to?"));

        let clarification = engine.handle_message("c1", "why do you ask?").await.unwrap();
        assert_eq!(clarification.phase, ConversationPhase::WaitingForSlot);
        assert!(matches!(
            clarification.pending,
            PendingTask::Collect { ref slot, .. } if slot == "destination"
        ));
    });
}

#[test]
fn test_nested_flow_interrupts_and_hands_control_back() {
    tokio_test::block_on(async {
        let (engine, _) = engine_with(vec![
            ClassifiedCommand::IntentChange {
                flow_name: "book_flight".to_string(),
                slots: vec![slot("origin", json!("Madrid"))],
            },
            ClassifiedCommand::IntentChange {
                flow_name: "weather".to_string(),
                slots: Vec::new(),
            },
            ClassifiedCommand::SlotValues {
                slots: vec![slot("destination", json!("Oslo"))],
            },
        ]);

        engine.handle_message("c1", "book a flight from Madrid").await.unwrap();

        // the weather flow runs to completion and the booking resumes
        let interrupted = engine.handle_message("c1", "what's the weather?").await.unwrap();
        assert!(interrupted
            .messages
            .iter()
            .any(|m| m.text == "Expect clear skies."));
        assert_eq!(interrupted.phase, ConversationPhase::WaitingForSlot);
        assert!(matches!(
            interrupted.pending,
            PendingTask::Collect { ref slot, .. } if slot == "destination"
        ));

        let resumed = engine.handle_message("c1", "to Oslo").await.unwrap();
        assert!(matches!(
            resumed.pending,
            PendingTask::Collect { ref slot, .. } if slot == "date"
        ));
    });
}

#[test]
fn test_unclear_confirmations_hit_the_retry_bound() {
    tokio_test::block_on(async {
        let unclear = ClassifiedCommand::ConfirmationAnswer {
            answer: ConfirmationAnswer::Unclear,
        };
        let (engine, calls) = engine_with(vec![
            ClassifiedCommand::IntentChange {
                flow_name: "book_flight".to_string(),
                slots: vec![
                    slot("origin", json!("Madrid")),
                    slot("destination", json!("Barcelona")),
                    slot("date", json!("2025-12-25")),
                ],
            },
            unclear.clone(),
            unclear.clone(),
            unclear,
        ]);

        let start = engine.handle_message("c1", "book it all").await.unwrap();
        assert_eq!(start.phase, ConversationPhase::Confirming);

        let first = engine.handle_message("c1", "hmm").await.unwrap();
        assert_eq!(first.phase, ConversationPhase::Confirming);
        let second = engine.handle_message("c1", "maybe?").await.unwrap();
        assert_eq!(second.phase, ConversationPhase::Confirming);

        let third = engine.handle_message("c1", "perhaps").await.unwrap();
        assert_eq!(third.phase, ConversationPhase::Error);
        assert!(calls.lock().unwrap().is_empty());
    });
}

#[test]
fn test_cancellation_returns_to_the_interrupted_flow() {
    tokio_test::block_on(async {
        let (engine, _) = engine_with(vec![
            ClassifiedCommand::IntentChange {
                flow_name: "book_flight".to_string(),
                slots: vec![slot("origin", json!("Madrid"))],
            },
            ClassifiedCommand::IntentChange {
                flow_name: "book_flight".to_string(),
                slots: Vec::new(),
            },
            ClassifiedCommand::Cancellation,
        ]);

        engine.handle_message("c1", "book a flight").await.unwrap();
        let nested = engine.handle_message("c1", "book another flight").await.unwrap();
        assert!(matches!(
            nested.pending,
            PendingTask::Collect { ref slot, .. } if slot == "origin"
        ));

        let cancelled = engine.handle_message("c1", "forget that one").await.unwrap();
        assert_eq!(cancelled.phase, ConversationPhase::WaitingForSlot);
        assert!(matches!(
            cancelled.pending,
            PendingTask::Collect { ref slot, .. } if slot == "destination"
        ));
    });
}
