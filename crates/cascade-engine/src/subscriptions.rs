//! Subscription manager
//!
//! Validates callback topic names and tracks subscription delivery
//! status. Validation results are cached in-process; the cache can be
//! cleared for tests.

use std::sync::Arc;
use std::sync::LazyLock;

use dashmap::DashMap;
use regex::Regex;
use tracing::{debug, warn};
use uuid::Uuid;

use cascade_core::DeliveryStatus;
use cascade_storage::{PipelineStore, StoreError};

/// A topic name starts with a letter or underscore and continues with
/// letters, digits, underscores, dots or hyphens.
static TOPIC_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_.\-]*$").expect("topic pattern"));

/// Manages execution subscriptions and callback topic validation
#[derive(Clone)]
pub struct SubscriptionManager {
    store: Arc<dyn PipelineStore>,
    validation_cache: Arc<DashMap<String, bool>>,
}

impl SubscriptionManager {
    pub fn new(store: Arc<dyn PipelineStore>) -> Self {
        Self {
            store,
            validation_cache: Arc::new(DashMap::new()),
        }
    }

    /// Whether a topic name is valid; results are cached
    pub fn is_valid_topic(&self, topic: &str) -> bool {
        if let Some(cached) = self.validation_cache.get(topic) {
            return *cached;
        }
        let valid = !topic.is_empty() && TOPIC_RE.is_match(topic);
        self.validation_cache.insert(topic.to_string(), valid);
        valid
    }

    /// Partition topics into (valid, invalid)
    pub fn validate_topics(&self, topics: &[String]) -> (Vec<String>, Vec<String>) {
        let mut valid = vec![];
        let mut invalid = vec![];
        for topic in topics {
            if self.is_valid_topic(topic) {
                valid.push(topic.clone());
            } else {
                invalid.push(topic.clone());
            }
        }
        (valid, invalid)
    }

    /// Drop all cached validation results (for tests)
    pub fn clear_topic_cache(&self) {
        self.validation_cache.clear();
    }

    /// Create `active` subscriptions for the valid topics, returning the
    /// created ids. Invalid topics are filtered with a warning; empty or
    /// all-invalid input returns an empty list.
    pub async fn create_subscriptions(
        &self,
        execution_id: Uuid,
        topics: &[String],
    ) -> Result<Vec<Uuid>, StoreError> {
        let (valid, invalid) = self.validate_topics(topics);
        if !invalid.is_empty() {
            warn!(
                %execution_id,
                invalid = ?invalid,
                "dropping invalid callback topics"
            );
        }
        if valid.is_empty() {
            return Ok(vec![]);
        }

        let created = self
            .store
            .insert_subscriptions(execution_id, &valid, None)
            .await?;

        debug!(%execution_id, count = created.len(), "created subscriptions");
        Ok(created.into_iter().map(|s| s.id).collect())
    }

    /// Topics with an active subscription for this execution
    pub async fn get_active_topics(&self, execution_id: Uuid) -> Result<Vec<String>, StoreError> {
        self.store.get_active_topics(execution_id).await
    }

    pub async fn mark_delivery_success(&self, subscription_id: Uuid) -> Result<(), StoreError> {
        self.store
            .set_delivery_status(subscription_id, DeliveryStatus::Active)
            .await
    }

    pub async fn mark_delivery_failed(
        &self,
        subscription_id: Uuid,
        reason: &str,
    ) -> Result<(), StoreError> {
        warn!(%subscription_id, reason, "subscription delivery failed");
        self.store
            .set_delivery_status(subscription_id, DeliveryStatus::Failed)
            .await
    }

    pub async fn expire_subscription(&self, subscription_id: Uuid) -> Result<(), StoreError> {
        self.store
            .set_delivery_status(subscription_id, DeliveryStatus::Expired)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cascade_storage::{MemoryStore, NewExecution};
    use serde_json::json;

    fn manager() -> (SubscriptionManager, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (SubscriptionManager::new(store.clone()), store)
    }

    #[test]
    fn test_topic_validation_rules() {
        let (manager, _) = manager();

        for topic in ["myTopic", "topic1", "my-topic", "my_topic", "org.service.events"] {
            assert!(manager.is_valid_topic(topic), "{topic} should be valid");
        }
        for topic in ["", "123topic", "topic@name", "topic#123", "topic space", "-leading"] {
            assert!(!manager.is_valid_topic(topic), "{topic} should be invalid");
        }
    }

    #[test]
    fn test_validation_is_cache_transparent() {
        let (manager, _) = manager();
        let topics = vec![
            "good.topic".to_string(),
            "".to_string(),
            "9bad".to_string(),
        ];

        let first = manager.validate_topics(&topics);
        manager.clear_topic_cache();
        let second = manager.validate_topics(&topics);

        assert_eq!(first, second);
        assert_eq!(first.0, vec!["good.topic".to_string()]);
        assert_eq!(first.1.len(), 2);
    }

    #[tokio::test]
    async fn test_create_subscriptions_filters_invalid() {
        let (manager, store) = manager();
        let execution = store
            .create_execution(NewExecution::new(json!({}), "tester"))
            .await
            .unwrap();

        let ids = manager
            .create_subscriptions(
                execution.id,
                &[
                    "alerts".to_string(),
                    "bad topic".to_string(),
                    "audit.events".to_string(),
                ],
            )
            .await
            .unwrap();
        assert_eq!(ids.len(), 2);

        let topics = manager.get_active_topics(execution.id).await.unwrap();
        assert_eq!(topics, vec!["alerts".to_string(), "audit.events".to_string()]);
    }

    #[tokio::test]
    async fn test_empty_topic_list_is_not_an_error() {
        let (manager, store) = manager();
        let execution = store
            .create_execution(NewExecution::new(json!({}), "tester"))
            .await
            .unwrap();

        let ids = manager.create_subscriptions(execution.id, &[]).await.unwrap();
        assert!(ids.is_empty());

        // All-invalid input behaves the same way
        let ids = manager
            .create_subscriptions(execution.id, &["!!!".to_string()])
            .await
            .unwrap();
        assert!(ids.is_empty());
    }

    #[tokio::test]
    async fn test_delivery_status_transitions() {
        let (manager, store) = manager();
        let execution = store
            .create_execution(NewExecution::new(json!({}), "tester"))
            .await
            .unwrap();
        let ids = manager
            .create_subscriptions(execution.id, &["alerts".to_string()])
            .await
            .unwrap();

        manager
            .mark_delivery_failed(ids[0], "endpoint unreachable")
            .await
            .unwrap();
        assert!(manager.get_active_topics(execution.id).await.unwrap().is_empty());

        manager.mark_delivery_success(ids[0]).await.unwrap();
        assert_eq!(
            manager.get_active_topics(execution.id).await.unwrap(),
            vec!["alerts".to_string()]
        );

        manager.expire_subscription(ids[0]).await.unwrap();
        assert!(manager.get_active_topics(execution.id).await.unwrap().is_empty());
    }
}
