use super::*;
use crate::config::LaneMode;
use crate::error::Error;
use crate::invoker::{SpecialistOutput, SpecialistRequest, CONTEXT_MARKER};
use crate::registry::{
    ArtifactRequirement, CapabilityDescriptor, Modality, Specialist, SpecialistFault,
};
use crate::session::{FailureKind, SessionStore};
use chrono::Utc;
use std::sync::atomic::{AtomicUsize, Ordering};
use uuid::Uuid;

struct Echo {
    descriptor: CapabilityDescriptor,
    fail_first: usize,
    calls: AtomicUsize,
}

impl Echo {
    fn new(descriptor: CapabilityDescriptor) -> Self {
        Self {
            descriptor,
            fail_first: 0,
            calls: AtomicUsize::new(0),
        }
    }

    fn failing(descriptor: CapabilityDescriptor, fail_first: usize) -> Self {
        Self {
            fail_first,
            ..Self::new(descriptor)
        }
    }
}

#[async_trait::async_trait]
impl Specialist for Echo {
    fn descriptor(&self) -> &CapabilityDescriptor {
        &self.descriptor
    }

    async fn invoke(
        &self,
        request: SpecialistRequest,
    ) -> std::result::Result<SpecialistOutput, SpecialistFault> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.fail_first {
            return Err(SpecialistFault::Failed(anyhow::anyhow!("backend down")));
        }
        let (instruction, context) = request.split_context();
        Ok(SpecialistOutput::text(format!(
            "{}({}{})",
            self.descriptor.id,
            instruction,
            context.map(|c| format!(" | {}", c)).unwrap_or_default()
        )))
    }
}

fn document() -> CapabilityDescriptor {
    CapabilityDescriptor::new("document", "Extract text from documents")
        .with_modalities([Modality::Document, Modality::Image])
        .with_artifact(ArtifactRequirement::Required)
        .with_keywords(["extract text", "extract", "ocr", "invoice", "analyze"])
}

fn vision() -> CapabilityDescriptor {
    CapabilityDescriptor::new("vision", "Analyze image properties")
        .with_modalities([Modality::Image])
        .with_artifact(ArtifactRequirement::Required)
        .with_keywords(["colors", "quality", "analyze"])
}

fn qa() -> CapabilityDescriptor {
    CapabilityDescriptor::new("qa", "Answer questions about text")
        .with_keywords(["summarize", "summary", "what is", "how much"])
}

fn registry(specialists: Vec<Arc<dyn Specialist>>) -> Arc<SpecialistRegistry> {
    let mut registry = SpecialistRegistry::new();
    for specialist in specialists {
        registry.register(specialist).unwrap();
    }
    Arc::new(registry)
}

fn standard_registry() -> Arc<SpecialistRegistry> {
    registry(vec![
        Arc::new(Echo::new(document())),
        Arc::new(Echo::new(vision())),
        Arc::new(Echo::new(qa())),
    ])
}

fn table() -> RoutingTable {
    RoutingTable::new(&[document(), vision(), qa()]).unwrap()
}

fn pdf() -> ArtifactRef {
    ArtifactRef::new("scan.pdf").with_media_type("application/pdf")
}

fn png() -> ArtifactRef {
    ArtifactRef::new("cat.png").with_media_type("image/png")
}

fn result_turn(task_id: Uuid, seq: u64, specialist: &str, failure: Option<FailureKind>, content: &str) -> Turn {
    Turn {
        seq,
        task_id,
        role: TurnRole::SpecialistResult,
        content: content.to_string(),
        artifact: None,
        specialist_id: Some(specialist.to_string()),
        failure,
        created_at: Utc::now(),
    }
}

fn final_turn(content: &str) -> Turn {
    Turn {
        seq: 1,
        task_id: Uuid::new_v4(),
        role: TurnRole::FinalAnswer,
        content: content.to_string(),
        artifact: None,
        specialist_id: None,
        failure: None,
        created_at: Utc::now(),
    }
}

fn plan(steps: &[(&str, &str)], artifact: Option<ArtifactRef>) -> Plan {
    Plan {
        task_id: Uuid::new_v4(),
        steps: steps
            .iter()
            .map(|(id, instruction)| PlannedStep::new(*id, *instruction))
            .collect(),
        artifact,
        prior_answer: None,
    }
}

fn expect_invoke(decision: RoutingDecision) -> InvokeStep {
    match decision {
        RoutingDecision::Invoke(step) => step,
        other => panic!("expected invoke, got {other:?}"),
    }
}

fn expect_final(decision: RoutingDecision) -> FinalAnswer {
    match decision {
        RoutingDecision::FinalAnswer(answer) => answer,
        other => panic!("expected final answer, got {other:?}"),
    }
}

// --- classify ---

#[test]
fn test_split_clauses() {
    assert_eq!(
        routing::split_clauses("Extract the text, and then summarize it."),
        vec!["Extract the text", "summarize it"]
    );
    assert_eq!(routing::split_clauses("give me a tl;dr"), vec!["give me a tl;dr"]);
}

#[test]
fn test_no_match_asks_for_clarification() {
    let classification = classify("hello there", None, &[], &table());
    match classification {
        Classification::Clarify(text) => {
            assert!(text.contains("document"));
            assert!(text.contains("qa"));
        }
        other => panic!("unexpected: {other:?}"),
    }
}

#[test]
fn test_single_specialist() {
    let artifact = png();
    let classification = classify("check the quality", Some(&artifact), &[], &table());
    assert_eq!(
        classification,
        Classification::Invoke(PlannedStep::new("vision", "check the quality"))
    );
}

#[test]
fn test_compound_task_becomes_sequence() {
    let artifact = pdf();
    let classification = classify(
        "extract text from this file and then summarize it",
        Some(&artifact),
        &[],
        &table(),
    );
    assert_eq!(
        classification,
        Classification::InvokeSequence(vec![
            PlannedStep::new("document", "extract text from this file"),
            PlannedStep::new("qa", "summarize it"),
        ])
    );
}

#[test]
fn test_consecutive_clauses_merge() {
    let artifact = pdf();
    let classification = classify("extract text and ocr the footer", Some(&artifact), &[], &table());
    assert_eq!(
        classification,
        Classification::Invoke(PlannedStep::new("document", "extract text and ocr the footer"))
    );
}

#[test]
fn test_tie_broken_by_narrowest_modality() {
    let artifact = png();
    let classification = classify("analyze it", Some(&artifact), &[], &table());
    assert_eq!(
        classification,
        Classification::Invoke(PlannedStep::new("vision", "analyze it"))
    );

    // Stated modality in the text wins over having no artifact.
    let classification = classify("analyze this pdf", None, &[], &table());
    assert_eq!(
        classification,
        Classification::Invoke(PlannedStep::new("document", "analyze this pdf"))
    );
}

#[test]
fn test_unresolved_tie_asks_instead_of_guessing() {
    let classification = classify("analyze it", None, &[], &table());
    match classification {
        Classification::Clarify(text) => {
            assert!(text.contains("document or vision"));
        }
        other => panic!("unexpected: {other:?}"),
    }
}

#[test]
fn test_context_consumer_reads_artifact_first() {
    let artifact = pdf();
    let classification = classify("how much is due", Some(&artifact), &[], &table());
    assert_eq!(
        classification,
        Classification::InvokeSequence(vec![
            PlannedStep::new("document", "how much is due"),
            PlannedStep::new("qa", "how much is due"),
        ])
    );
}

#[test]
fn test_direct_answer_from_history() {
    let history = vec![final_turn("Vendor: ACME Corp\nTotal due: $42.00")];
    let classification = classify("remind me who the vendor was", None, &history, &table());
    match classification {
        Classification::Direct(text) => {
            assert!(text.contains("ACME Corp"));
            assert!(!text.contains("$42.00"));
        }
        other => panic!("unexpected: {other:?}"),
    }
}

#[test]
fn test_single_shared_word_is_not_a_direct_answer() {
    let history = vec![final_turn("document: extracted text")];
    let classification = classify("send this text to Bob", None, &history, &table());
    assert!(matches!(classification, Classification::Clarify(_)), "{classification:?}");
}

#[test]
fn test_keywords_match_whole_words() {
    let faces = CapabilityDescriptor::new("video", "Read faces")
        .with_modalities([Modality::LiveFrame])
        .with_keywords(["face", "table", "c++"]);
    let table = RoutingTable::new(&[faces]).unwrap();

    assert_eq!(table.score("video", "is there a face here"), 1);
    assert_eq!(table.score("video", "open facebook"), 0);
    assert_eq!(table.score("video", "charge the tablet"), 0);
    assert_eq!(table.score("video", "read the table"), 1);
    assert_eq!(table.score("video", "explain c++ templates"), 1);
    assert_eq!(table.score("ghost", "face"), 0);
}

#[test]
fn test_stated_modality_needs_whole_nouns() {
    use super::routing::stated_modality;

    assert_eq!(stated_modality("format the answer"), None);
    assert_eq!(stated_modality("filter the list"), None);
    assert_eq!(stated_modality("make it lively"), None);
    assert_eq!(stated_modality("compare these invoices"), Some(Modality::Document));
    assert_eq!(stated_modality("look at the photos"), Some(Modality::Image));
    assert_eq!(stated_modality("check the live stream"), Some(Modality::LiveFrame));
}

// --- next_decision ---

#[test]
fn test_first_decision_invokes_first_step() {
    let registry = standard_registry();
    let plan = plan(&[("document", "extract"), ("qa", "summarize")], Some(pdf()));
    let step = expect_invoke(next_decision(&plan, &[], &registry, &table(), &RoutingPolicy::default()).unwrap());
    assert_eq!(step.step, 0);
    assert_eq!(step.attempt, 1);
    assert_eq!(step.specialist_id, "document");
    assert_eq!(step.sub_task, "extract");
    assert_eq!(step.artifact, Some(pdf()));
}

#[test]
fn test_second_step_gets_previous_output_without_artifact() {
    let registry = standard_registry();
    let plan = plan(&[("document", "extract"), ("qa", "summarize")], Some(pdf()));
    let turns = vec![result_turn(plan.task_id, 2, "document", None, "page text")];

    let step = expect_invoke(next_decision(&plan, &turns, &registry, &table(), &RoutingPolicy::default()).unwrap());
    assert_eq!(step.step, 1);
    assert_eq!(step.specialist_id, "qa");
    assert_eq!(step.sub_task, format!("summarize{}page text", CONTEXT_MARKER));
    assert!(step.artifact.is_none());
}

#[test]
fn test_all_steps_done_completes_with_last_output() {
    let registry = standard_registry();
    let plan = plan(&[("document", "extract"), ("qa", "summarize")], Some(pdf()));
    let turns = vec![
        result_turn(plan.task_id, 2, "document", None, "page text"),
        result_turn(plan.task_id, 3, "qa", None, "short summary"),
    ];

    let answer = expect_final(next_decision(&plan, &turns, &registry, &table(), &RoutingPolicy::default()).unwrap());
    assert_eq!(answer.status, FinalStatus::Completed);
    assert_eq!(answer.text, "short summary");
    assert_eq!(answer.specialists, vec!["document", "qa"]);
    assert_eq!(answer.invocations, 2);
}

#[test]
fn test_failure_falls_back_to_same_modality() {
    let registry = standard_registry();
    let plan = plan(&[("vision", "analyze quality")], Some(png()));
    let turns = vec![result_turn(
        plan.task_id,
        2,
        "vision",
        Some(FailureKind::Timeout),
        "timed out",
    )];

    let step = expect_invoke(next_decision(&plan, &turns, &registry, &table(), &RoutingPolicy::default()).unwrap());
    assert_eq!(step.specialist_id, "document");
    assert_eq!(step.attempt, 1);
}

#[test]
fn test_fallback_skips_specialist_without_matching_keywords() {
    let registry = standard_registry();
    let plan = plan(&[("document", "extract text from this screenshot")], Some(png()));
    let mut turns = vec![result_turn(
        plan.task_id,
        2,
        "document",
        Some(FailureKind::InvocationError),
        "ocr backend down",
    )];

    // vision handles images but knows nothing about extracting text
    let step = expect_invoke(next_decision(&plan, &turns, &registry, &table(), &RoutingPolicy::default()).unwrap());
    assert_eq!(step.specialist_id, "document");
    assert_eq!(step.attempt, 2);

    turns.push(result_turn(
        plan.task_id,
        3,
        "document",
        Some(FailureKind::InvocationError),
        "ocr backend down",
    ));
    let answer = expect_final(next_decision(&plan, &turns, &registry, &table(), &RoutingPolicy::default()).unwrap());
    assert_eq!(answer.status, FinalStatus::Degraded);
    assert!(answer.specialists.is_empty());
}

#[test]
fn test_failure_retries_without_fallback() {
    let registry = standard_registry();
    let policy = RoutingPolicy {
        allow_fallback: false,
        ..RoutingPolicy::default()
    };
    let plan = plan(&[("vision", "check quality")], Some(png()));
    let mut turns = vec![result_turn(
        plan.task_id,
        2,
        "vision",
        Some(FailureKind::InvocationError),
        "502",
    )];

    let step = expect_invoke(next_decision(&plan, &turns, &registry, &table(), &policy).unwrap());
    assert_eq!(step.specialist_id, "vision");
    assert_eq!(step.attempt, 2);

    turns.push(result_turn(
        plan.task_id,
        3,
        "vision",
        Some(FailureKind::InvocationError),
        "502",
    ));
    let answer = expect_final(next_decision(&plan, &turns, &registry, &table(), &policy).unwrap());
    assert_eq!(answer.status, FinalStatus::Degraded);
    assert!(answer.text.contains("502"));
}

#[test]
fn test_invalid_input_is_not_retried() {
    let registry = standard_registry();
    let plan = plan(&[("document", "extract")], None);
    let turns = vec![result_turn(
        plan.task_id,
        2,
        "document",
        Some(FailureKind::InvalidInput),
        "an artifact is required",
    )];

    let answer = expect_final(next_decision(&plan, &turns, &registry, &table(), &RoutingPolicy::default()).unwrap());
    assert_eq!(answer.status, FinalStatus::Degraded);
    assert!(answer.specialists.is_empty());
}

#[test]
fn test_standalone_consumer_gets_prior_answer() {
    let registry = standard_registry();
    let mut plan = plan(&[("qa", "summarize that")], None);
    plan.prior_answer = Some("earlier invoice text".to_string());

    let step = expect_invoke(next_decision(&plan, &[], &registry, &table(), &RoutingPolicy::default()).unwrap());
    assert_eq!(
        step.sub_task,
        format!("summarize that{}earlier invoice text", CONTEXT_MARKER)
    );
}

#[test]
fn test_unknown_planned_specialist() {
    let registry = standard_registry();
    let plan = plan(&[("ghost", "boo")], None);
    let err = next_decision(&plan, &[], &registry, &table(), &RoutingPolicy::default()).unwrap_err();
    assert!(matches!(err, Error::UnknownSpecialist(_)));
}

// --- Router::run ---

#[tokio::test]
async fn test_run_chain_records_turns_in_order() {
    let router = Router::new(standard_registry(), RoutingPolicy::default()).unwrap();
    let store = Arc::new(SessionStore::new());
    let mut lease = store.begin_task("s1", LaneMode::Queue).await.unwrap();

    let answer = router
        .run(
            &mut lease,
            "extract text and summarize it",
            Some(pdf()),
            &Emitter::silent(),
        )
        .await
        .unwrap();

    assert_eq!(answer.status, FinalStatus::Completed);
    assert_eq!(answer.specialists, vec!["document", "qa"]);
    assert_eq!(answer.text, "qa(summarize it | document(extract text))");

    let roles: Vec<TurnRole> = store.snapshot("s1").unwrap().iter().map(|t| t.role).collect();
    assert_eq!(
        roles,
        vec![
            TurnRole::User,
            TurnRole::SpecialistResult,
            TurnRole::SpecialistResult,
            TurnRole::FinalAnswer
        ]
    );
    assert_eq!(store.session("s1").unwrap().step_counter, 0);
}

#[tokio::test]
async fn test_run_clarifies_without_invoking() {
    let router = Router::new(standard_registry(), RoutingPolicy::default()).unwrap();
    let store = Arc::new(SessionStore::new());
    let mut lease = store.begin_task("s1", LaneMode::Queue).await.unwrap();

    let answer = router
        .run(&mut lease, "good morning", None, &Emitter::silent())
        .await
        .unwrap();
    assert_eq!(answer.status, FinalStatus::Clarification);
    assert_eq!(answer.invocations, 0);
    assert_eq!(store.snapshot("s1").unwrap().len(), 2);
}

#[tokio::test]
async fn test_run_retries_then_succeeds() {
    let registry = registry(vec![Arc::new(Echo::failing(qa(), 1))]);
    let router = Router::new(registry, RoutingPolicy::default()).unwrap();
    let store = Arc::new(SessionStore::new());
    let mut lease = store.begin_task("s1", LaneMode::Queue).await.unwrap();

    let answer = router
        .run(&mut lease, "what is the plan", None, &Emitter::silent())
        .await
        .unwrap();
    assert_eq!(answer.status, FinalStatus::Completed);
    assert_eq!(answer.invocations, 2);

    let turns = store.snapshot("s1").unwrap();
    assert_eq!(turns[1].failure, Some(FailureKind::InvocationError));
    assert!(turns[1].content.contains("backend down"));
    assert!(turns[2].is_success());
}

#[tokio::test]
async fn test_run_degrades_instead_of_answering_with_unrelated_specialist() {
    let registry = registry(vec![
        Arc::new(Echo::failing(document(), usize::MAX)),
        Arc::new(Echo::new(vision())),
        Arc::new(Echo::new(qa())),
    ]);
    let router = Router::new(registry, RoutingPolicy::default()).unwrap();
    let store = Arc::new(SessionStore::new());
    let mut lease = store.begin_task("s1", LaneMode::Queue).await.unwrap();

    let answer = router
        .run(
            &mut lease,
            "extract text from this screenshot",
            Some(png()),
            &Emitter::silent(),
        )
        .await
        .unwrap();
    assert_eq!(answer.status, FinalStatus::Degraded);
    assert_eq!(answer.invocations, 2);

    let invoked: Vec<_> = store
        .snapshot("s1")
        .unwrap()
        .into_iter()
        .filter_map(|t| t.specialist_id)
        .collect();
    assert_eq!(invoked, vec!["document", "document"]);
}

#[tokio::test]
async fn test_run_stops_at_step_budget() {
    let registry = registry(vec![Arc::new(Echo::failing(qa(), usize::MAX))]);
    let policy = RoutingPolicy {
        step_budget: 1,
        max_attempts_per_step: 5,
        allow_fallback: true,
    };
    let router = Router::new(registry, policy).unwrap();
    let store = Arc::new(SessionStore::new());
    let mut lease = store.begin_task("s1", LaneMode::Queue).await.unwrap();

    let answer = router
        .run(&mut lease, "summarize this", None, &Emitter::silent())
        .await
        .unwrap();
    assert_eq!(answer.status, FinalStatus::BudgetExhausted);
    assert_eq!(answer.invocations, 1);
    assert!(answer.text.contains("not fully completed"));
}

#[tokio::test]
async fn test_run_cancelled_before_next_invoke() {
    let router = Router::new(standard_registry(), RoutingPolicy::default()).unwrap();
    let store = Arc::new(SessionStore::new());
    let mut lease = store.begin_task("s1", LaneMode::Queue).await.unwrap();
    let emitter = Emitter::silent();
    emitter.cancellation().cancel();

    let answer = router
        .run(&mut lease, "summarize this", None, &emitter)
        .await
        .unwrap();
    assert_eq!(answer.status, FinalStatus::Cancelled);
    assert_eq!(answer.invocations, 0);
}
