//! Tags change records with the subscriptions that would be alerted.

use crate::models::{ChangeRecord, Subscription};
use crate::repository::{Storage, StorageError};

#[derive(Debug, Clone, Default)]
pub struct SubscriptionMatcher {
    subscriptions: Vec<Subscription>,
}

impl SubscriptionMatcher {
    pub fn new(subscriptions: Vec<Subscription>) -> Self {
        Self { subscriptions }
    }

    pub async fn load(storage: &dyn Storage) -> Result<Self, StorageError> {
        Ok(Self::new(storage.get_subscriptions().await?))
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    /// Fill `change.subscription_ids`.
    pub fn tag(&self, change: &mut ChangeRecord) {
        change.subscription_ids = self
            .subscriptions
            .iter()
            .filter(|s| s.matches(change))
            .map(|s| s.id)
            .collect();
    }
}
