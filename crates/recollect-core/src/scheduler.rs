//! Interval scheduling for task components.
//!
//! Pure arithmetic: the same inputs always produce the same due time, on
//! every store, so replicas that replay the same events agree exactly.
//! Intermediate products are IEEE-754 doubles floored back to whole
//! milliseconds. Sums saturate at `i64::MAX` rather than wrapping.

use crate::{event::RepetitionOutcome, task::TaskComponentState};

const MILLIS_PER_DAY: i64 = 1000 * 60 * 60 * 24;

/// Delay before a forgotten component comes due again.
pub const FORGOTTEN_RETRY_MILLIS: i64 = 1000 * 60 * 10;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SchedulerConfig {
  pub interval_growth_factor:         f64,
  pub initial_review_interval_millis: i64,
}

impl Default for SchedulerConfig {
  fn default() -> Self {
    Self {
      interval_growth_factor:         2.3,
      initial_review_interval_millis: 5 * MILLIS_PER_DAY,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerOutput {
  pub due_timestamp_millis: i64,
  pub interval_millis:      i64,
}

impl SchedulerConfig {
  /// Schedule a component after a review at `review_timestamp_millis`.
  pub fn next_state(
    &self,
    state: &TaskComponentState,
    review_timestamp_millis: i64,
    outcome: RepetitionOutcome,
  ) -> SchedulerOutput {
    let growth = self.interval_growth_factor;
    let initial = self.initial_review_interval_millis;
    let grow = |millis: i64| (millis as f64 * growth).floor() as i64;

    let current_interval = state.interval_millis;
    let last_reviewed = state
      .last_repetition_timestamp_millis
      .unwrap_or(state.created_at_timestamp_millis);
    let elapsed = review_timestamp_millis.saturating_sub(last_reviewed).max(0);

    let interval_millis = match outcome {
      RepetitionOutcome::Remembered | RepetitionOutcome::Skipped => {
        // Reviewed early: don't shrink an interval the user has already
        // earned.
        if elapsed < current_interval {
          current_interval.max(initial).max(grow(elapsed))
        } else {
          initial.max(grow(elapsed))
        }
      }
      RepetitionOutcome::Forgotten => {
        if current_interval < initial {
          current_interval
        } else {
          initial.max((current_interval as f64 / growth).floor() as i64)
        }
      }
    };

    let due_timestamp_millis = match outcome {
      RepetitionOutcome::Forgotten => {
        review_timestamp_millis.saturating_add(FORGOTTEN_RETRY_MILLIS)
      }
      RepetitionOutcome::Remembered | RepetitionOutcome::Skipped => {
        review_timestamp_millis
          .saturating_add(jitter_millis(review_timestamp_millis))
          .saturating_add(interval_millis)
      }
    };

    SchedulerOutput { due_timestamp_millis, interval_millis }
  }
}

/// Spread reviews out deterministically so batches don't all come due at
/// once. Bounded by 600 000 ms.
pub fn jitter_millis(review_timestamp_millis: i64) -> i64 {
  (review_timestamp_millis % 1000) * 600
}

/// [`SchedulerConfig::next_state`] with the default configuration.
pub fn next_state(
  state: &TaskComponentState,
  review_timestamp_millis: i64,
  outcome: RepetitionOutcome,
) -> SchedulerOutput {
  SchedulerConfig::default().next_state(state, review_timestamp_millis, outcome)
}
