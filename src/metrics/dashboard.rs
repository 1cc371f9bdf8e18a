use serde::{Deserialize, Serialize};

use crate::{models::UserProfile, settings::DashboardSettings};

use super::types::MetricsSnapshot;

/// Everything the dashboard's stats cards display.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    pub focus_score: u32,
    pub todays_minutes: u64,
    pub todays_focus: String,
    pub interruptions: usize,
    pub streak: u32,
    pub daily_goal_hours: u32,
    pub goal_progress_percent: u32,
    pub peak_performance_time: String,
}

pub fn build_dashboard(
    profile: Option<&UserProfile>,
    metrics: &MetricsSnapshot,
    defaults: &DashboardSettings,
) -> DashboardStats {
    let daily_goal_hours = profile
        .and_then(|p| p.daily_goal_hours)
        .unwrap_or(defaults.default_daily_goal_hours);
    let peak_performance_time = profile
        .and_then(|p| p.peak_performance_time.clone())
        .unwrap_or_else(|| defaults.default_peak_performance_time.clone());

    DashboardStats {
        focus_score: profile.map(|p| p.focus_score).unwrap_or(0),
        todays_minutes: metrics.total_minutes,
        todays_focus: metrics.display_value.clone(),
        interruptions: metrics.interruption_count,
        streak: profile.map(|p| p.current_streak).unwrap_or(0),
        daily_goal_hours,
        goal_progress_percent: goal_progress_percent(metrics.total_minutes, daily_goal_hours),
        peak_performance_time,
    }
}

/// Share of the daily goal reached, rounded to the nearest percent.
/// Not capped at 100; a zero goal reports 0.
pub fn goal_progress_percent(total_minutes: u64, daily_goal_hours: u32) -> u32 {
    let goal_minutes = u64::from(daily_goal_hours) * 60;
    if goal_minutes == 0 {
        return 0;
    }
    let percent = (total_minutes as f64 / goal_minutes as f64 * 100.0).round();
    percent.min(u32::MAX as f64) as u32
}
