use chrono::{DateTime, Utc};

use crate::models::SessionRecord;

use super::types::{format_focus_time, MetricsSnapshot};

/// Folds one user's records for the day into a [`MetricsSnapshot`].
///
/// Completed sessions contribute their recorded duration. Unfinished sessions
/// contribute whole minutes elapsed between their start and `now`; a start in
/// the future counts as zero. Anything else is counted in `session_count` only.
pub fn compute_metrics(records: &[SessionRecord], now: DateTime<Utc>) -> MetricsSnapshot {
    let mut total_minutes: u64 = 0;
    let mut completed_count = 0;
    let mut ongoing_count = 0;
    let mut interruption_count = 0;

    for record in records {
        interruption_count += record.interruptions.len();

        match (record.completed, record.duration, record.start_time) {
            (true, Some(duration), _) => {
                total_minutes += u64::from(duration);
                completed_count += 1;
            }
            (_, _, Some(start_time)) if record.is_ongoing() => {
                total_minutes += elapsed_minutes(start_time, now);
                ongoing_count += 1;
            }
            _ => {}
        }
    }

    MetricsSnapshot {
        total_minutes,
        display_value: format_focus_time(total_minutes),
        session_count: records.len(),
        completed_count,
        ongoing_count,
        interruption_count,
        computed_at: now,
    }
}

fn elapsed_minutes(start_time: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    let seconds = (now - start_time).num_seconds().max(0);
    (seconds / 60) as u64
}
