//! Integration tests for playing lessons end to end.
//!
//! Lessons come from the JSON fixtures through the file content provider;
//! progress goes to an in-memory store so failures can be injected.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use lesson_engine::memory::MemoryProgressStore;
use lesson_engine::{
    AdvanceOutcome, AnswerOutcome, Correctness, EngineConfig, EngineError, EngineEvent,
    EventBroadcaster, IgnoredReason, LearnerProfile, LessonRunner, LessonStatus, PairOutcome,
    Phase, Response, StepKind, StoreOp,
};
use lesson_store::{FileContentProvider, JsonProgressStore};
use tokio::sync::broadcast::Receiver;
use tokio::time::timeout;

/// Path to the test fixtures directory.
fn fixture_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures")
}

fn fixture_config() -> EngineConfig {
    let mut config =
        EngineConfig::load_from_dir(&fixture_path()).expect("Failed to load fixture config");
    config.content_dir = fixture_path().join("lessons").display().to_string();
    config
}

/// One learner's view of the engine.
struct Harness {
    config: EngineConfig,
    content: FileContentProvider,
    store: Arc<MemoryProgressStore>,
    events: EventBroadcaster,
}

impl Harness {
    fn new() -> Self {
        let config = fixture_config();
        Self {
            content: FileContentProvider::new(&config.content_dir),
            config,
            store: Arc::new(MemoryProgressStore::new()),
            events: EventBroadcaster::new(256),
        }
    }

    async fn with_streak(self, streak: u32) -> Self {
        let profile = LearnerProfile {
            current_streak: streak,
            longest_streak: streak,
            last_activity_date: Some(Utc::now().date_naive()),
            ..LearnerProfile::default()
        };
        self.store.set_profile("ada", profile).await;
        self
    }

    async fn start(&self, lesson_id: &str) -> LessonRunner {
        LessonRunner::start(
            &self.config,
            &self.content,
            self.store.clone(),
            self.events.clone(),
            "ada",
            lesson_id,
        )
        .await
        .expect("Failed to start lesson")
    }
}

/// Answers the current multiple choice step and moves on.
async fn choose(runner: &LessonRunner, option: usize) -> AnswerOutcome {
    let outcome = runner.submit_answer(Response::Choice(option)).await;
    if runner.snapshot().await.phase == Phase::InProgress {
        runner.advance().await;
    }
    outcome
}

/// Plays the basics lesson, answering step `i` correctly unless it is in
/// `wrong`.
async fn play_basics(runner: &LessonRunner, wrong: &[usize]) {
    for index in 0..5 {
        if runner.snapshot().await.phase != Phase::InProgress {
            return;
        }
        let option = if wrong.contains(&index) { 0 } else { 1 };
        choose(runner, option).await;
    }
}

async fn next_completion(rx: &mut Receiver<EngineEvent>) -> lesson_engine::CompletionResult {
    loop {
        let event = timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("Timeout waiting for completion")
            .expect("Event channel closed");
        if let EngineEvent::CompletionReady { result, .. } = event {
            return result;
        }
    }
}

// ============================================================================
// Scoring scenarios
// ============================================================================

#[tokio::test]
async fn test_perfect_run_celebrates_with_perfect_bonus() {
    let harness = Harness::new().with_streak(0).await;
    let runner = harness.start("basics").await;

    play_basics(&runner, &[]).await;

    let snapshot = runner.snapshot().await;
    assert_eq!(snapshot.phase, Phase::Celebrating);
    assert_eq!(snapshot.score, 5);
    assert_eq!(snapshot.lives, 3);

    let report = runner.wait_for_completion().await.expect("No completion");
    assert!(report.result.is_perfect);
    assert_eq!(report.result.bonus_xp, 10);
    assert_eq!(report.result.total_xp, 30);
}

#[tokio::test]
async fn test_one_wrong_answer_costs_a_life_and_the_perfect_bonus() {
    let harness = Harness::new().with_streak(0).await;
    let runner = harness.start("basics").await;

    play_basics(&runner, &[2]).await;

    let snapshot = runner.snapshot().await;
    assert_eq!(snapshot.phase, Phase::Celebrating);
    assert_eq!(snapshot.score, 4);
    assert_eq!(snapshot.lives, 2);

    let report = runner.wait_for_completion().await.expect("No completion");
    assert!(!report.result.is_perfect);
    assert_eq!(report.result.perfect_bonus, 0);
    assert_eq!(report.result.bonus_xp, 0);
}

#[tokio::test]
async fn test_three_wrong_answers_end_the_lesson() {
    let harness = Harness::new();
    let runner = harness.start("basics").await;

    assert!(matches!(choose(&runner, 0).await, AnswerOutcome::Judged { lives: 2, .. }));
    assert!(matches!(choose(&runner, 0).await, AnswerOutcome::Judged { lives: 1, .. }));
    assert!(matches!(
        choose(&runner, 0).await,
        AnswerOutcome::Judged {
            lives: 0,
            game_over: true,
            ..
        }
    ));

    let snapshot = runner.snapshot().await;
    assert_eq!(snapshot.phase, Phase::GameOver);
    assert_eq!(snapshot.current_step_index, 2);
    assert_eq!(snapshot.score, 0);
    assert_eq!(snapshot.lives, 0);

    // Steps 4 and 5 are never entered.
    assert!(matches!(
        runner.advance().await,
        AdvanceOutcome::Ignored {
            reason: IgnoredReason::NotInProgress
        }
    ));
    assert!(runner.wait_for_completion().await.is_none());
    assert_eq!(harness.store.calls(StoreOp::ReadProfile).await, 0);
}

#[tokio::test]
async fn test_long_streak_bonus_is_capped() {
    let harness = Harness::new().with_streak(10).await;
    let runner = harness.start("basics").await;

    play_basics(&runner, &[]).await;

    let result = runner.wait_for_completion().await.expect("No completion").result;
    assert_eq!(result.streak_bonus, 50);
    assert_eq!(result.bonus_xp, 60);
    assert_eq!(result.total_xp, 80);
}

#[tokio::test]
async fn test_retry_after_game_over_starts_over() {
    let harness = Harness::new();
    let runner = harness.start("basics").await;
    play_basics(&runner, &[0, 1, 2]).await;
    assert_eq!(runner.snapshot().await.phase, Phase::GameOver);

    assert_eq!(runner.retry().await, Some(2));

    let snapshot = runner.snapshot().await;
    assert_eq!(snapshot.phase, Phase::InProgress);
    assert_eq!(snapshot.attempt, 2);
    assert_eq!(snapshot.current_step_index, 0);
    assert_eq!(snapshot.lives, 3);
    assert_eq!(snapshot.score, 0);
    assert!(snapshot.answered_steps.is_empty());

    play_basics(&runner, &[]).await;
    assert_eq!(runner.snapshot().await.phase, Phase::Celebrating);
}

#[tokio::test]
async fn test_profile_read_failure_still_publishes_completion() {
    let harness = Harness::new().with_streak(4).await;
    harness.store.set_failing(StoreOp::ReadProfile, true).await;
    let mut rx = harness.events.subscribe();
    let runner = harness.start("basics").await;

    play_basics(&runner, &[]).await;

    let result = next_completion(&mut rx).await;
    assert_eq!(result.new_streak, 1);
    assert!(!result.leveled_up);
    assert_eq!(result.total_xp, 20);

    let report = runner.wait_for_completion().await.expect("No completion");
    assert!(!report.profile_read);
    assert!(report.progress_saved);
    assert!(!report.profile_saved);

    let record = harness
        .store
        .lesson_record("ada", "basics")
        .await
        .expect("Lesson record missing");
    assert_eq!(record.status, LessonStatus::Completed);
    assert_eq!(record.score, 5);
    assert_eq!(harness.store.calls(StoreOp::WriteProfile).await, 0);
}

// ============================================================================
// Mixed lesson
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_tour_lesson_plays_every_step_kind() {
    let harness = Harness::new();
    let mut rx = harness.events.subscribe();
    let runner = harness.start("tour").await;

    // Content unlocks on its own after the exposure delay.
    assert!(!runner.snapshot().await.can_continue);
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(runner.snapshot().await.can_continue);
    assert!(matches!(runner.advance().await, AdvanceOutcome::Moved { index: 1, .. }));

    assert!(matches!(
        runner.submit_answer(Response::Boolean(false)).await,
        AnswerOutcome::Judged {
            correctness: Correctness::Correct,
            ..
        }
    ));
    runner.advance().await;

    assert!(matches!(
        runner.submit_answer(Response::Text("  PrintLn  ".into())).await,
        AnswerOutcome::Judged {
            correctness: Correctness::Correct,
            ..
        }
    ));
    runner.advance().await;

    assert_eq!(runner.attempt_pair(0, 2).await, PairOutcome::Wrong);
    assert_eq!(runner.attempt_pair(1, 1).await, PairOutcome::Matched { remaining: 2 });
    assert_eq!(runner.attempt_pair(0, 0).await, PairOutcome::Matched { remaining: 1 });
    assert_eq!(
        runner.attempt_pair(2, 2).await,
        PairOutcome::Completed {
            correctness: Correctness::Correct
        }
    );
    assert_eq!(runner.snapshot().await.lives, 3);
    runner.advance().await;

    assert!(!runner.report_playback(30.0, 60.0).await);
    assert!(runner.report_playback(50.0, 60.0).await);
    runner.advance().await;

    let snapshot = runner.snapshot().await;
    assert_eq!(snapshot.step.as_ref().map(|s| s.step_type), Some(StepKind::Reflection));
    assert_eq!(
        runner.submit_answer(Response::Text("too short".into())).await,
        AnswerOutcome::NotReady
    );
    assert!(matches!(
        runner
            .submit_answer(Response::Text("the borrow checker, mostly".into()))
            .await,
        AnswerOutcome::Judged {
            correctness: Correctness::NotApplicable,
            ..
        }
    ));
    assert!(matches!(
        runner.advance().await,
        AdvanceOutcome::Completed {
            score: 3,
            total_steps: 6
        }
    ));

    // Passive and open steps never score, so this run is not perfect.
    let report = runner.wait_for_completion().await.expect("No completion");
    assert!(!report.result.is_perfect);
    assert_eq!(report.result.total_xp, 15 + report.result.streak_bonus);

    let mut saw_flash = false;
    while let Ok(event) = rx.try_recv() {
        if let EngineEvent::PairRejected { flash_ms, .. } = event {
            assert_eq!(flash_ms, 100);
            saw_flash = true;
        }
    }
    assert!(saw_flash, "Expected a pair_rejected event");
}

#[tokio::test]
async fn test_malformed_step_is_answerable_without_judgement() {
    let harness = Harness::new();
    let runner = harness.start("broken").await;

    assert!(matches!(
        runner.submit_answer(Response::Choice(0)).await,
        AnswerOutcome::Judged {
            correctness: Correctness::NotApplicable,
            lives: 3,
            ..
        }
    ));
    runner.advance().await;
    assert!(matches!(
        runner.submit_answer(Response::Boolean(true)).await,
        AnswerOutcome::Judged {
            correctness: Correctness::Correct,
            ..
        }
    ));
}

#[tokio::test]
async fn test_unknown_lesson_fails_to_start() {
    let harness = Harness::new();
    let err = LessonRunner::start(
        &harness.config,
        &harness.content,
        harness.store.clone(),
        harness.events.clone(),
        "ada",
        "missing",
    )
    .await
    .expect_err("Lesson should not exist");
    assert!(matches!(err, EngineError::ContentNotFound { .. }));
}

// ============================================================================
// File-backed progress
// ============================================================================

#[tokio::test]
async fn test_completion_persists_to_json_store() {
    let dir = tempfile::TempDir::new().expect("Failed to create temp dir");
    let harness = Harness::new();
    let store = Arc::new(JsonProgressStore::new(dir.path()));
    let runner = LessonRunner::start(
        &harness.config,
        &harness.content,
        store.clone(),
        harness.events.clone(),
        "ada",
        "basics",
    )
    .await
    .expect("Failed to start lesson");

    play_basics(&runner, &[]).await;
    let report = runner.wait_for_completion().await.expect("No completion");
    assert!(report.progress_saved && report.profile_saved);

    let doc = store.load("ada").await.expect("Failed to load document");
    assert_eq!(doc.profile.total_xp, report.result.total_xp);
    assert_eq!(doc.profile.current_streak, 1);
    assert_eq!(doc.profile.lessons_completed, 1);
    assert_eq!(doc.lessons["basics"].xp_earned, report.result.total_xp);
}
