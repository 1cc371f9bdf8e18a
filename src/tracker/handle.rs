use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Identifies one live subscription. Repeated subscribes for an active user
/// hand back clones of the same handle.
#[derive(Debug, Clone)]
pub struct SubscriptionHandle {
    id: Uuid,
    user_id: Arc<str>,
    token: CancellationToken,
}

impl SubscriptionHandle {
    pub(crate) fn new(user_id: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: Arc::from(user_id),
            token: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// False once the subscription has been cancelled.
    pub fn is_active(&self) -> bool {
        !self.token.is_cancelled()
    }

    pub(crate) fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl PartialEq for SubscriptionHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for SubscriptionHandle {}
