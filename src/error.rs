use thiserror::Error;

/// Failures surfaced by the tracker and by record stores.
///
/// Values are cloneable so a feed error can be handed to a subscriber as data
/// instead of being raised.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FocusError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("record store unavailable: {0}")]
    UpstreamUnavailable(String),
}

impl FocusError {
    pub fn upstream(err: anyhow::Error) -> Self {
        FocusError::UpstreamUnavailable(format!("{err:#}"))
    }
}

pub(crate) fn validate_user_id(user_id: &str) -> Result<&str, FocusError> {
    if user_id.trim().is_empty() {
        return Err(FocusError::InvalidArgument("user id is required".into()));
    }
    Ok(user_id)
}
