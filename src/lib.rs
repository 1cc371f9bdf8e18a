pub mod db;
pub mod error;
pub mod identity;
pub mod metrics;
pub mod models;
pub mod settings;
pub mod store;
pub mod tracker;
mod utils;

pub use error::FocusError;
pub use identity::{require_user_id, IdentityProvider, StaticIdentity};
pub use metrics::{compute_metrics, DashboardStats, FocusUpdate, MetricsSnapshot};
pub use models::{Interruption, SessionRecord, UserProfile};
pub use settings::{DashboardSettings, SettingsStore};
pub use store::{MemoryStore, RecordStore, SqliteSessionStore, TodayQuery};
pub use tracker::{LiveFocusTracker, SubscriptionHandle};

/// Initializes `env_logger` from `RUST_LOG`, at `Info` by default or `Debug`
/// when `FOCUSPULSE_DEBUG` is set. Safe to call more than once.
pub fn init_logging() {
    let debug_mode = std::env::var("FOCUSPULSE_DEBUG")
        .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
        .unwrap_or(false);

    let level = if debug_mode {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };

    let _ = env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .try_init();

    log::debug!("FocusPulse logging initialized");
}
