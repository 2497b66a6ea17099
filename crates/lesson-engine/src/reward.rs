//! Reward calculation.
//!
//! Everything here is pure: the caller supplies the learner's prior profile
//! values and today's date, and gets back a [`CompletionResult`].

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// XP granted per day of streak.
pub const STREAK_XP_PER_DAY: u64 = 10;

/// Cap on the streak bonus.
pub const STREAK_BONUS_CAP: u64 = 50;

/// Minimum accumulated XP for levels 1 through 8.
pub const LEVEL_THRESHOLDS: [u64; 8] = [0, 100, 250, 500, 1000, 2000, 3500, 5000];

/// Everything the calculator needs to know about a finished attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewardInput {
    /// The lesson's base XP.
    pub base_xp_reward: u32,
    /// Steps judged correct.
    pub score: usize,
    /// All steps in the lesson, passive and open ones included.
    pub total_steps: usize,
    /// Streak stored on the profile before this lesson.
    pub prior_streak: u32,
    /// Longest streak stored on the profile before this lesson.
    pub prior_longest_streak: u32,
    /// Day of the learner's previous activity, if any.
    pub last_activity_date: Option<NaiveDate>,
    /// XP accumulated before this lesson.
    pub prior_total_xp: u64,
    /// The day the lesson was completed.
    pub today: NaiveDate,
}

/// The reward for a completed lesson.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionResult {
    /// The lesson's base XP.
    pub base_xp: u64,
    /// Perfect bonus plus streak bonus.
    pub bonus_xp: u64,
    /// `base_xp + bonus_xp`.
    pub total_xp: u64,
    /// Whether every step counted toward the score.
    pub is_perfect: bool,
    /// Bonus for a perfect lesson.
    pub perfect_bonus: u64,
    /// Bonus for the streak.
    pub streak_bonus: u64,
    /// Streak after this lesson.
    pub new_streak: u32,
    /// Longest streak after this lesson.
    pub longest_streak: u32,
    /// Whether the accumulated XP crossed into a higher level.
    pub leveled_up: bool,
    /// The new level, present exactly when `leveled_up` is set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_level: Option<u8>,
}

/// Computes the reward for a completed lesson.
///
/// ```
/// use chrono::NaiveDate;
/// use lesson_engine::reward::{compute_reward, RewardInput};
///
/// let today = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
/// let result = compute_reward(&RewardInput {
///     base_xp_reward: 20,
///     score: 5,
///     total_steps: 5,
///     prior_streak: 10,
///     prior_longest_streak: 10,
///     last_activity_date: today.pred_opt(),
///     prior_total_xp: 0,
///     today,
/// });
/// assert_eq!(result.bonus_xp, 60);
/// assert_eq!(result.total_xp, 80);
/// ```
pub fn compute_reward(input: &RewardInput) -> CompletionResult {
    let base_xp = u64::from(input.base_xp_reward);
    let is_perfect = input.score == input.total_steps;
    // round(base * 0.5), halves rounding up
    let perfect_bonus = if is_perfect { (base_xp + 1) / 2 } else { 0 };

    let new_streak = next_streak(input.prior_streak, input.last_activity_date, input.today);
    let longest_streak = input.prior_longest_streak.max(new_streak);
    let streak_bonus = streak_bonus(new_streak);

    let bonus_xp = perfect_bonus + streak_bonus;
    let total_xp = base_xp + bonus_xp;

    let before = level_for_xp(input.prior_total_xp);
    let after = level_for_xp(input.prior_total_xp.saturating_add(total_xp));
    let leveled_up = after > before;

    CompletionResult {
        base_xp,
        bonus_xp,
        total_xp,
        is_perfect,
        perfect_bonus,
        streak_bonus,
        new_streak,
        longest_streak,
        leveled_up,
        new_level: leveled_up.then_some(after),
    }
}

/// The reward used when the learner's profile could not be read.
///
/// Computed from an empty baseline (no streak, no prior activity), with no
/// bonus XP and no level-up, so nothing is claimed that the stored profile
/// might contradict.
pub fn fallback_reward(
    base_xp_reward: u32,
    score: usize,
    total_steps: usize,
    today: NaiveDate,
) -> CompletionResult {
    let baseline = compute_reward(&RewardInput {
        base_xp_reward,
        score,
        total_steps,
        prior_streak: 0,
        prior_longest_streak: 0,
        last_activity_date: None,
        prior_total_xp: 0,
        today,
    });

    CompletionResult {
        bonus_xp: 0,
        total_xp: baseline.base_xp,
        perfect_bonus: 0,
        streak_bonus: 0,
        leveled_up: false,
        new_level: None,
        ..baseline
    }
}

/// The streak after activity on `today`.
///
/// Same day keeps the streak, the next day extends it, any gap restarts it
/// at 1.
pub fn next_streak(prior_streak: u32, last_activity: Option<NaiveDate>, today: NaiveDate) -> u32 {
    match last_activity {
        Some(last) if last == today => prior_streak,
        Some(last) if Some(last) == today.pred_opt() => prior_streak.saturating_add(1),
        _ => 1,
    }
}

/// Streak bonus: 10 XP per day, capped at 50.
pub fn streak_bonus(streak: u32) -> u64 {
    (u64::from(streak) * STREAK_XP_PER_DAY).min(STREAK_BONUS_CAP)
}

/// The level (1 to 8) for an amount of accumulated XP.
pub fn level_for_xp(xp: u64) -> u8 {
    let reached = LEVEL_THRESHOLDS.iter().filter(|min| xp >= **min).count();
    u8::try_from(reached).unwrap_or(u8::MAX).max(1)
}

/// The XP range of a level, as `(min, max)`; the top level has no max.
pub fn level_bounds(level: u8) -> Option<(u64, Option<u64>)> {
    let index = usize::from(level).checked_sub(1)?;
    let min = *LEVEL_THRESHOLDS.get(index)?;
    Some((min, LEVEL_THRESHOLDS.get(index + 1).copied()))
}
