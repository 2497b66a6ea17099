//! Terminal player for a single lesson.

use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;
use std::sync::Arc;

use lesson_engine::{
    AdvanceOutcome, AnswerOutcome, EngineConfig, EngineEvent, EventBroadcaster, Feedback,
    IgnoredReason, LessonRunner, PairOutcome, Phase, Response, SessionSnapshot, StepKind,
};
use lesson_store::{FileContentProvider, JsonProgressStore};
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::broadcast::Receiver;

type Input = Lines<BufReader<Stdin>>;

/// Plays `lesson_id` for `user_id` on stdin/stdout. Returns `true` if the
/// lesson was completed.
pub async fn run(config: EngineConfig, lesson_id: &str, user_id: &str) -> anyhow::Result<bool> {
    config.validate()?;

    let content = FileContentProvider::new(&config.content_dir);
    let store = Arc::new(JsonProgressStore::new(&config.progress_dir));
    let events = EventBroadcaster::new(config.event_capacity);
    let mut unlocks = events.subscribe();

    let runner =
        LessonRunner::start(&config, &content, store, events, user_id, lesson_id).await?;
    let mut input = BufReader::new(tokio::io::stdin()).lines();

    let snapshot = runner.snapshot().await;
    println!(
        "Lesson '{}' ({} steps, {} lives)",
        snapshot.lesson_id, snapshot.total_steps, snapshot.max_lives
    );

    loop {
        let snapshot = runner.snapshot().await;
        match snapshot.phase {
            Phase::Celebrating => {
                print_reward(&runner).await;
                runner.exit().await;
                return Ok(true);
            }
            Phase::GameOver => {
                println!();
                println!("Out of lives! Score: {}/{}", snapshot.score, snapshot.total_steps);
                let again = prompt(&mut input, "Try again? [y/N]").await?;
                if matches!(again.as_deref().map(str::trim), Some("y" | "Y" | "yes")) {
                    runner.retry().await;
                    continue;
                }
                runner.exit().await;
                return Ok(false);
            }
            Phase::InProgress => {}
        }

        if snapshot.can_continue {
            if let AdvanceOutcome::Moved { index, .. } = runner.advance().await {
                println!();
                println!("--- Step {}/{} ---", index + 1, snapshot.total_steps);
            }
            continue;
        }

        let Some(step) = snapshot.step.as_ref() else {
            runner.exit().await;
            return Ok(false);
        };
        print_step(&snapshot);

        let keep_going = match step.step_type {
            StepKind::Content | StepKind::CodeSnippet => {
                println!("(reading...)");
                wait_for_unlock(&mut unlocks, &runner).await;
                true
            }
            StepKind::Video => {
                println!("(watching...)");
                runner.report_playback(1.0, 1.0).await;
                true
            }
            StepKind::MatchPairs => match_pairs(&runner, &mut input).await?,
            kind => answer(&runner, &mut input, kind).await?,
        };

        if !keep_going {
            runner.exit().await;
            return Ok(false);
        }
    }
}

async fn prompt(input: &mut Input, text: &str) -> anyhow::Result<Option<String>> {
    println!("{text}");
    Ok(input.next_line().await?)
}

async fn wait_for_unlock(events: &mut Receiver<EngineEvent>, runner: &LessonRunner) {
    loop {
        match events.recv().await {
            Ok(event @ EngineEvent::StepUnlocked { .. })
                if event.session_id() == Some(runner.id()) =>
            {
                if runner.snapshot().await.can_continue {
                    return;
                }
            }
            Ok(_) => {}
            Err(RecvError::Lagged(_)) => {
                if runner.snapshot().await.can_continue {
                    return;
                }
            }
            Err(RecvError::Closed) => return,
        }
    }
}

/// Reads responses until one is judged. Returns `false` on end of input.
async fn answer(runner: &LessonRunner, input: &mut Input, kind: StepKind) -> anyhow::Result<bool> {
    loop {
        let Some(line) = prompt(input, hint(kind)).await? else {
            return Ok(false);
        };
        let response = match parse_response(kind, &line) {
            Ok(response) => response,
            Err(message) => {
                println!("  {message}");
                continue;
            }
        };
        match runner.submit_answer(response).await {
            AnswerOutcome::Judged { .. } => {
                print_feedback(&runner.snapshot().await);
                return Ok(true);
            }
            AnswerOutcome::NotReady => println!("  Not ready to check yet."),
            AnswerOutcome::Rejected { expected, .. } => {
                println!("  That is not an answer for a {expected} step.");
            }
            AnswerOutcome::Ignored { .. } => return Ok(true),
        }
    }
}

/// Reads `left right` pairs until all are matched. Returns `false` on end
/// of input.
async fn match_pairs(runner: &LessonRunner, input: &mut Input) -> anyhow::Result<bool> {
    loop {
        let Some(line) = prompt(input, hint(StepKind::MatchPairs)).await? else {
            return Ok(false);
        };
        let Ok(&[left, right]) = parse_list::<usize>(&line).as_deref() else {
            println!("  Enter two indices: LEFT RIGHT");
            continue;
        };
        if play_pair(runner, left, right).await {
            print_feedback(&runner.snapshot().await);
            return Ok(true);
        }
    }
}

/// Tries one association. Returns `true` once the step has been answered.
///
/// A step whose pairs could not be decoded refuses pair-by-pair play, so the
/// association is submitted as the whole (unscored) answer instead.
async fn play_pair(runner: &LessonRunner, left: usize, right: usize) -> bool {
    match runner.attempt_pair(left, right).await {
        PairOutcome::Matched { remaining } => {
            println!("  Match! {remaining} to go.");
            false
        }
        PairOutcome::Wrong => {
            println!("  Not a pair.");
            false
        }
        PairOutcome::Completed { .. } => true,
        PairOutcome::Ignored {
            reason: IgnoredReason::WrongStepKind,
        } => {
            let response = Response::Pairs(BTreeMap::from([(left, right)]));
            matches!(
                runner.submit_answer(response).await,
                AnswerOutcome::Judged { .. }
            )
        }
        PairOutcome::Ignored { reason } => {
            println!("  Ignored ({reason}).");
            false
        }
    }
}

fn hint(kind: StepKind) -> &'static str {
    match kind {
        StepKind::MultipleChoice => "Option number:",
        StepKind::TrueFalse => "true or false:",
        StepKind::FillBlank => "Your answer:",
        StepKind::WordBank => "Words for each blank, separated by commas:",
        StepKind::MatchPairs => "Pair as LEFT RIGHT:",
        StepKind::Slider => "Value:",
        StepKind::Ordering => "Item indices in order, separated by commas:",
        StepKind::ImageChoice => "Image id:",
        StepKind::Highlight => "Word indices, separated by commas:",
        StepKind::CategorySort => "Assignments as item=category, separated by commas:",
        StepKind::SpotError => "Line numbers, separated by commas:",
        StepKind::Reflection => "Your thoughts:",
        StepKind::Content | StepKind::Video | StepKind::CodeSnippet => "",
    }
}

/// Turns a line of terminal input into a response for `kind`.
pub fn parse_response(kind: StepKind, line: &str) -> Result<Response, String> {
    let line = line.trim();
    match kind {
        StepKind::MultipleChoice => line
            .parse::<usize>()
            .map(Response::Choice)
            .map_err(|_| "Enter an option number".to_string()),
        StepKind::TrueFalse => match line.to_ascii_lowercase().as_str() {
            "t" | "true" | "y" | "yes" => Ok(Response::Boolean(true)),
            "f" | "false" | "n" | "no" => Ok(Response::Boolean(false)),
            _ => Err("Enter true or false".to_string()),
        },
        StepKind::FillBlank | StepKind::Reflection => Ok(Response::Text(line.to_string())),
        StepKind::WordBank => Ok(Response::Words(
            line.split(',')
                .map(str::trim)
                .map(|w| (!w.is_empty()).then(|| w.to_string()))
                .collect(),
        )),
        StepKind::Slider => line
            .parse::<f64>()
            .map(Response::Number)
            .map_err(|_| "Enter a number".to_string()),
        StepKind::Ordering => parse_list(line).map(Response::Order),
        StepKind::ImageChoice => Ok(Response::ImageId(line.to_string())),
        StepKind::Highlight => {
            parse_list(line).map(|v| Response::Indices(v.into_iter().collect::<BTreeSet<_>>()))
        }
        StepKind::SpotError => {
            parse_list(line).map(|v| Response::Lines(v.into_iter().collect::<BTreeSet<_>>()))
        }
        StepKind::CategorySort => {
            let mut assignment = BTreeMap::new();
            for part in line.split(',').filter(|p| !p.trim().is_empty()) {
                let (item, category) = part
                    .split_once('=')
                    .ok_or_else(|| format!("Expected item=category, got '{}'", part.trim()))?;
                assignment.insert(item.trim().to_string(), category.trim().to_string());
            }
            Ok(Response::Assignment(assignment))
        }
        StepKind::MatchPairs => parse_list::<usize>(line).and_then(|v| match v.as_slice() {
            [left, right] => Ok(Response::Pairs(BTreeMap::from([(*left, *right)]))),
            _ => Err("Enter two indices".to_string()),
        }),
        StepKind::Content | StepKind::Video | StepKind::CodeSnippet => {
            Err("This step takes no answer".to_string())
        }
    }
}

fn parse_list<T: FromStr>(line: &str) -> Result<Vec<T>, String> {
    line.split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<T>().map_err(|_| format!("'{s}' is not a valid number")))
        .collect()
}

fn print_step(snapshot: &SessionSnapshot) {
    let Some(step) = &snapshot.step else { return };
    println!();
    println!(
        "[{}] lives: {}  score: {}",
        step.step_type, snapshot.lives, snapshot.score
    );
    match serde_json::to_string_pretty(&step.content) {
        Ok(text) => println!("{text}"),
        Err(_) => println!("{}", step.content),
    }
}

fn print_feedback(snapshot: &SessionSnapshot) {
    match snapshot.feedback {
        Feedback::Correct => println!("  Correct!"),
        Feedback::Incorrect => println!("  Incorrect. Lives left: {}", snapshot.lives),
        Feedback::None => println!("  Noted."),
    }
    if let Some(explanation) = snapshot.step.as_ref().and_then(|s| s.explanation.as_deref()) {
        println!("  {explanation}");
    }
}

async fn print_reward(runner: &LessonRunner) {
    let snapshot = runner.snapshot().await;
    println!();
    println!("=== Lesson complete ===");
    println!("Score: {}/{}", snapshot.score, snapshot.total_steps);
    let Some(report) = runner.wait_for_completion().await else {
        return;
    };
    let result = report.result;
    println!("XP: {} base + {} bonus = {}", result.base_xp, result.bonus_xp, result.total_xp);
    if result.is_perfect {
        println!("Perfect lesson! (+{} XP)", result.perfect_bonus);
    }
    println!("Streak: {} day(s) (+{} XP)", result.new_streak, result.streak_bonus);
    if let Some(level) = result.new_level {
        println!("Level up! You reached level {level}");
    }
    if !report.progress_saved || !report.profile_saved {
        println!("(progress could not be fully saved)");
    }
}
