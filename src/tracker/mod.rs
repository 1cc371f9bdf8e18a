pub mod controller;
pub mod handle;

pub use controller::{Clock, LiveFocusTracker, TrackerBuilder};
pub use handle::SubscriptionHandle;
