use crate::error::FocusError;

/// Whoever knows which user is signed in. Only the opaque id is consumed.
pub trait IdentityProvider: Send + Sync {
    fn current_user_id(&self) -> Option<String>;
}

/// Fixed identity, for embedding where sign-in happens elsewhere.
#[derive(Debug, Clone, Default)]
pub struct StaticIdentity(Option<String>);

impl StaticIdentity {
    pub fn signed_in(user_id: impl Into<String>) -> Self {
        Self(Some(user_id.into()))
    }

    pub fn signed_out() -> Self {
        Self(None)
    }
}

impl IdentityProvider for StaticIdentity {
    fn current_user_id(&self) -> Option<String> {
        self.0.clone()
    }
}

pub fn require_user_id(identity: &dyn IdentityProvider) -> Result<String, FocusError> {
    identity
        .current_user_id()
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| FocusError::InvalidArgument("no signed-in user".into()))
}
