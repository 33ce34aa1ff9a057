//! End-to-end dispatch properties

mod common;

use common::*;
use futures::StreamExt;
use prism_core::{
    DispatchConfig, DispatchEvent, Error, FailureKind, FinalStatus, LaneMode, SessionStore,
    TurnRole,
};
use std::sync::Arc;
use std::time::Duration;

fn assert_contiguous(turns: &[prism_core::Turn]) {
    for (index, turn) in turns.iter().enumerate() {
        assert_eq!(turn.seq, index as u64 + 1, "turn {turn:?}");
    }
}

#[tokio::test]
async fn sequence_numbers_are_contiguous_across_tasks() {
    let orchestrator = standard();
    orchestrator
        .chat("s1", "extract text and summarize it", Some(pdf()))
        .await
        .unwrap();
    orchestrator.chat("s1", "hello", None).await.unwrap();
    orchestrator
        .chat("s1", "what is the total", None)
        .await
        .unwrap();

    let turns = orchestrator.history("s1").unwrap();
    assert!(turns.len() >= 8);
    assert_contiguous(&turns);
}

#[tokio::test]
async fn two_specialist_chain_records_two_results_then_final() {
    let orchestrator = standard();
    let answer = orchestrator
        .chat("s1", "extract text and summarize it", Some(pdf()))
        .await
        .unwrap();

    assert_eq!(answer.status, FinalStatus::Completed);
    assert_eq!(answer.specialists, vec!["document", "qa"]);
    assert_eq!(answer.text, "summarize it <- document: extracted text");

    let turns = orchestrator.history("s1").unwrap();
    let roles: Vec<_> = turns.iter().map(|t| t.role).collect();
    assert_eq!(
        roles,
        vec![
            TurnRole::User,
            TurnRole::SpecialistResult,
            TurnRole::SpecialistResult,
            TurnRole::FinalAnswer,
        ]
    );
    assert_eq!(turns[1].specialist_id.as_deref(), Some("document"));
    assert_eq!(turns[2].specialist_id.as_deref(), Some("qa"));
    assert_eq!(turns[0].artifact, Some(pdf()));
}

#[tokio::test]
async fn unmatched_task_clarifies_without_invoking() {
    let qa = Arc::new(Scripted::new(qa()));
    let orchestrator = orchestrator(DispatchConfig::default(), vec![qa.clone()]);

    let mut stream = orchestrator.stream("s1", "book me a flight", None);
    let first = stream.next().await.unwrap();
    match first {
        DispatchEvent::Final { answer, .. } => {
            assert_eq!(answer.status, FinalStatus::Clarification);
            assert_eq!(answer.invocations, 0);
        }
        other => panic!("expected a clarifying final answer, got {other:?}"),
    }
    assert!(stream.next().await.is_none());
    assert_eq!(qa.calls(), 0);
}

#[tokio::test]
async fn one_shared_word_with_history_is_not_a_direct_answer() {
    let orchestrator = standard();
    let first = orchestrator
        .chat("s1", "extract text", Some(pdf()))
        .await
        .unwrap();
    assert_eq!(first.text, "document: extracted text");

    let answer = orchestrator
        .chat("s1", "send this text to Bob", None)
        .await
        .unwrap();
    assert_eq!(answer.status, FinalStatus::Clarification);
    assert_eq!(answer.invocations, 0);
}

#[tokio::test]
async fn reset_twice_succeeds_and_leaves_history_empty() {
    let orchestrator = standard();
    orchestrator.chat("s1", "what is up", None).await.unwrap();

    orchestrator.reset("s1").unwrap();
    orchestrator.reset("s1").unwrap();
    assert!(orchestrator.history("s1").unwrap().is_empty());

    assert!(matches!(
        orchestrator.reset("ghost"),
        Err(Error::UnknownSession(_))
    ));
}

#[tokio::test]
async fn invocations_never_exceed_step_budget() {
    for budget in 1..=4 {
        let failing = Arc::new(Scripted::new(qa()).failing_first(usize::MAX));
        let config = DispatchConfig::new()
            .with_step_budget(budget)
            .with_max_attempts(10);
        let orchestrator = orchestrator(config, vec![failing.clone()]);

        let answer = orchestrator
            .chat("s1", "summarize the meeting", None)
            .await
            .unwrap();
        assert_eq!(answer.status, FinalStatus::BudgetExhausted);
        assert_eq!(failing.calls(), budget);

        let results = orchestrator
            .history("s1")
            .unwrap()
            .iter()
            .filter(|t| t.role == TurnRole::SpecialistResult)
            .count();
        assert_eq!(results, budget);
    }
}

#[tokio::test]
async fn timeout_is_recorded_and_task_still_finishes() {
    let slow = Scripted::new(video().with_timeout(Duration::from_millis(30)))
        .with_delay(Duration::from_secs(5));
    let orchestrator = orchestrator(DispatchConfig::default(), vec![Arc::new(slow)]);

    let answer = tokio::time::timeout(
        Duration::from_secs(3),
        orchestrator.chat("s1", "how many faces are in this frame", Some(frame())),
    )
    .await
    .expect("router must not hang")
    .unwrap();

    assert_eq!(answer.status, FinalStatus::Degraded);
    let turns = orchestrator.history("s1").unwrap();
    let failures: Vec<_> = turns
        .iter()
        .filter(|t| t.role == TurnRole::SpecialistResult)
        .map(|t| t.failure)
        .collect();
    assert_eq!(failures, vec![Some(FailureKind::Timeout); 2]);
    assert!(turns[1].content.contains("timed out"));
    assert_eq!(turns.last().unwrap().role, TurnRole::FinalAnswer);
}

#[tokio::test]
async fn stream_and_chat_describe_the_same_invocations() {
    let chat = standard();
    chat.chat("s1", "extract text and summarize it", Some(pdf()))
        .await
        .unwrap();
    let chat_order: Vec<String> = chat
        .history("s1")
        .unwrap()
        .iter()
        .filter_map(|t| t.specialist_id.clone())
        .collect();

    let streaming = standard();
    let events: Vec<DispatchEvent> = streaming
        .stream("s1", "extract text and summarize it", Some(pdf()))
        .collect()
        .await;

    let started: Vec<String> = events
        .iter()
        .filter_map(|e| match e {
            DispatchEvent::InvokeStarted { specialist_id, .. } => Some(specialist_id.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(started, chat_order);

    // Started/result pairs in state-machine order, then exactly one final.
    assert_eq!(events.len(), 5);
    assert!(matches!(events[0], DispatchEvent::InvokeStarted { step: 1, .. }));
    assert!(matches!(events[1], DispatchEvent::InvokeResult { step: 1, success: true, .. }));
    assert!(matches!(events[2], DispatchEvent::InvokeStarted { step: 2, .. }));
    assert!(matches!(events[3], DispatchEvent::InvokeResult { step: 2, .. }));
    assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
    assert!(events[4].is_terminal());

    // Turn sequence numbers in the events point at the recorded turns.
    let turns = streaming.history("s1").unwrap();
    if let DispatchEvent::InvokeResult { turn_seq, .. } = &events[3] {
        assert_eq!(turns[*turn_seq as usize - 1].specialist_id.as_deref(), Some("qa"));
    }
}

#[tokio::test]
async fn stream_errors_end_in_failed_final() {
    let orchestrator = orchestrator(
        DispatchConfig::default().with_lane_mode(LaneMode::Reject),
        vec![Arc::new(
            Scripted::new(qa()).with_delay(Duration::from_millis(200)),
        )],
    );

    let busy = {
        let orchestrator = orchestrator.clone();
        tokio::spawn(async move { orchestrator.chat("s1", "summarize it", None).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let events: Vec<DispatchEvent> = orchestrator
        .stream("s1", "summarize it", None)
        .collect()
        .await;
    assert_eq!(events.len(), 1);
    match &events[0] {
        DispatchEvent::Final { answer, .. } => {
            assert_eq!(answer.status, FinalStatus::Failed);
            assert!(answer.text.contains("busy"));
        }
        other => panic!("unexpected event {other:?}"),
    }

    assert!(busy.await.unwrap().is_ok());
}

#[tokio::test]
async fn dropping_a_stream_stops_before_the_next_invoke() {
    let document = Arc::new(Scripted::new(document()).with_delay(Duration::from_millis(100)));
    let qa = Arc::new(Scripted::new(qa()));
    let orchestrator = orchestrator(
        DispatchConfig::default(),
        vec![document.clone(), qa.clone()],
    );

    let mut stream = orchestrator.stream("s1", "extract text and summarize it", Some(pdf()));
    let first = stream.next().await.unwrap();
    assert!(matches!(first, DispatchEvent::InvokeStarted { step: 1, .. }));
    drop(stream);

    // The in-flight call completes; nothing new starts.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(document.calls(), 1);
    assert_eq!(qa.calls(), 0);

    let turns = orchestrator.history("s1").unwrap();
    let last = turns.last().unwrap();
    assert_eq!(last.role, TurnRole::FinalAnswer);
    assert!(last.content.contains("cancelled"));
    assert_contiguous(&turns);
}

#[tokio::test]
async fn unpolled_stream_does_nothing() {
    let qa = Arc::new(Scripted::new(qa()));
    let orchestrator = orchestrator(DispatchConfig::default(), vec![qa.clone()]);

    let stream = orchestrator.stream("s1", "summarize it", None);
    tokio::time::sleep(Duration::from_millis(20)).await;
    drop(stream);

    assert_eq!(qa.calls(), 0);
    assert!(orchestrator.history("s1").is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_tasks_on_one_session_do_not_interleave() {
    let qa = Scripted::new(qa())
        .with_delay(Duration::from_millis(5))
        .failing_first(3);
    let orchestrator = orchestrator(DispatchConfig::default(), vec![Arc::new(qa)]);

    let mut handles = Vec::new();
    for i in 0..12 {
        let orchestrator = orchestrator.clone();
        handles.push(tokio::spawn(async move {
            orchestrator
                .chat("shared", &format!("summarize note {i}"), None)
                .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let turns = orchestrator.history("shared").unwrap();
    assert_contiguous(&turns);

    // Each task's turns form one unbroken run.
    let mut seen = std::collections::HashSet::new();
    let mut previous = None;
    for turn in &turns {
        if previous != Some(turn.task_id) {
            assert!(seen.insert(turn.task_id), "task {} interleaved", turn.task_id);
            previous = Some(turn.task_id);
        }
    }
    assert_eq!(seen.len(), 12);
}

#[tokio::test]
async fn shared_store_is_visible_to_both_orchestrators() {
    let store = Arc::new(SessionStore::new());
    let first = prism_core::Orchestrator::builder()
        .session_store(Arc::clone(&store))
        .register(Arc::new(Scripted::new(qa())))
        .unwrap()
        .build()
        .unwrap();
    let second = prism_core::Orchestrator::builder()
        .session_store(Arc::clone(&store))
        .register(Arc::new(Scripted::new(qa())))
        .unwrap()
        .build()
        .unwrap();

    first.chat("s1", "summarize it", None).await.unwrap();
    second.chat("s1", "summarize it again", None).await.unwrap();

    let turns = store.snapshot("s1").unwrap();
    assert_eq!(turns.len(), 6);
    assert_contiguous(&turns);
}
