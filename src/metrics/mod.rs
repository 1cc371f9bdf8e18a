mod calculator;
mod dashboard;
mod types;

pub use calculator::compute_metrics;
pub use dashboard::{build_dashboard, goal_progress_percent, DashboardStats};
pub use types::{format_focus_time, FocusUpdate, MetricsSnapshot};
