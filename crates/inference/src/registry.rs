//! Thread-safe provider registry and health-record store.
//!
//! The registry owns the only two pieces of shared mutable state in the
//! subsystem: the provider map and the health map. Writes are always
//! whole-record replacements so readers never observe a torn update, and the
//! two maps are kept consistent: registering a provider seeds its health
//! record, removing a provider destroys it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::provider::{Provider, ProviderUpdate};

/// Health state for one provider, replaced wholesale on every write.
///
/// Staleness is tolerable by design: health is a soft routing hint, not a
/// lock. A record marked unhealthy by a failed request is corrected by the
/// next successful periodic probe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderHealth {
    pub provider_id: String,
    pub is_healthy: bool,
    pub last_check: SystemTime,
    pub response_time: Duration,
    pub error: Option<String>,
}

impl ProviderHealth {
    /// Initial record seeded at registration time. Optimistic: a provider
    /// that has never been probed is selectable until proven otherwise.
    pub fn initial(provider_id: &str) -> Self {
        Self {
            provider_id: provider_id.to_string(),
            is_healthy: true,
            last_check: SystemTime::now(),
            response_time: Duration::ZERO,
            error: None,
        }
    }

    pub fn healthy(provider_id: &str, response_time: Duration) -> Self {
        Self {
            provider_id: provider_id.to_string(),
            is_healthy: true,
            last_check: SystemTime::now(),
            response_time,
            error: None,
        }
    }

    pub fn unhealthy(provider_id: &str, response_time: Duration, error: String) -> Self {
        Self {
            provider_id: provider_id.to_string(),
            is_healthy: false,
            last_check: SystemTime::now(),
            response_time,
            error: Some(error),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProviderRegistry {
    providers: Arc<RwLock<HashMap<String, Provider>>>,
    health: Arc<RwLock<HashMap<String, ProviderHealth>>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a provider by id. Replacing re-seeds the health
    /// record, since the new definition may point somewhere else entirely.
    pub async fn register(&self, provider: Provider) -> Result<()> {
        provider.validate()?;

        let id = provider.id.clone();
        debug!(provider = %id, priority = provider.priority, "registering provider");

        self.providers.write().await.insert(id.clone(), provider);
        self.health
            .write()
            .await
            .insert(id.clone(), ProviderHealth::initial(&id));

        info!(provider = %id, "provider registered");
        Ok(())
    }

    /// Delete a provider and its health record. No-op for unknown ids.
    pub async fn remove(&self, id: &str) {
        if self.providers.write().await.remove(id).is_some() {
            info!(provider = %id, "provider removed");
        }
        self.health.write().await.remove(id);
    }

    /// Merge fields into an existing record and revalidate the result.
    pub async fn update(&self, id: &str, update: ProviderUpdate) -> Result<Provider> {
        let current = self
            .get(id)
            .await
            .ok_or_else(|| Error::NotFound(id.to_string()))?;

        let merged = update.apply_to(current);
        merged.validate()?;

        self.providers
            .write()
            .await
            .insert(id.to_string(), merged.clone());
        debug!(provider = %id, "provider updated");
        Ok(merged)
    }

    /// Replace the whole provider set atomically, re-seeding health records.
    pub async fn replace_all(&self, providers: Vec<Provider>) -> Result<()> {
        for provider in &providers {
            provider.validate()?;
        }

        let mut provider_map = HashMap::with_capacity(providers.len());
        let mut health_map = HashMap::with_capacity(providers.len());
        for provider in providers {
            health_map.insert(provider.id.clone(), ProviderHealth::initial(&provider.id));
            provider_map.insert(provider.id.clone(), provider);
        }

        *self.providers.write().await = provider_map;
        *self.health.write().await = health_map;
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Option<Provider> {
        self.providers.read().await.get(id).cloned()
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.providers.read().await.contains_key(id)
    }

    /// Snapshot of registered providers, optionally filtered to enabled ones,
    /// in stable registration-independent order (sorted by id for
    /// determinism; callers that care about priority sort themselves).
    pub async fn list(&self, only_enabled: bool) -> Vec<Provider> {
        let mut providers: Vec<Provider> = self
            .providers
            .read()
            .await
            .values()
            .filter(|p| !only_enabled || p.enabled)
            .cloned()
            .collect();
        providers.sort_by(|a, b| a.id.cmp(&b.id));
        providers
    }

    pub async fn health_of(&self, id: &str) -> Option<ProviderHealth> {
        self.health.read().await.get(id).cloned()
    }

    pub async fn health_snapshot(&self) -> HashMap<String, ProviderHealth> {
        self.health.read().await.clone()
    }

    /// Store a probe result. Dropped silently if the provider was removed
    /// while the probe was in flight, preserving the one-record-per-provider
    /// invariant.
    pub async fn store_health(&self, record: ProviderHealth) {
        if !self.contains(&record.provider_id).await {
            return;
        }
        self.health
            .write()
            .await
            .insert(record.provider_id.clone(), record);
    }

    /// Pessimistic marking used by the orchestrator on request failure.
    pub async fn mark_unhealthy(&self, id: &str, error: String) {
        debug!(provider = %id, error = %error, "marking provider unhealthy");
        self.store_health(ProviderHealth::unhealthy(id, Duration::ZERO, error))
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ProviderKind;

    fn local(id: &str) -> Provider {
        Provider::new(id, id, ProviderKind::LocalServer, "http://localhost:1234")
    }

    #[tokio::test]
    async fn register_then_list_includes_provider_once() {
        let registry = ProviderRegistry::new();
        registry.register(local("a")).await.unwrap();

        let listed = registry.list(true).await;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, "a");
    }

    #[tokio::test]
    async fn registering_same_id_replaces() {
        let registry = ProviderRegistry::new();
        registry.register(local("a").with_priority(1)).await.unwrap();
        registry.register(local("a").with_priority(2)).await.unwrap();

        let listed = registry.list(false).await;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].priority, 2);
    }

    #[tokio::test]
    async fn register_seeds_health_and_remove_destroys_it() {
        let registry = ProviderRegistry::new();
        registry.register(local("a")).await.unwrap();

        let health = registry.health_of("a").await.unwrap();
        assert!(health.is_healthy);
        assert!(health.error.is_none());

        registry.remove("a").await;
        assert!(registry.health_of("a").await.is_none());
        assert!(registry.get("a").await.is_none());
    }

    #[tokio::test]
    async fn remove_unknown_is_a_noop() {
        let registry = ProviderRegistry::new();
        registry.remove("ghost").await;
    }

    #[tokio::test]
    async fn update_unknown_fails_with_not_found() {
        let registry = ProviderRegistry::new();
        let err = registry
            .update("ghost", ProviderUpdate::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn update_merges_and_revalidates() {
        let registry = ProviderRegistry::new();
        registry.register(local("a")).await.unwrap();

        let updated = registry
            .update(
                "a",
                ProviderUpdate {
                    priority: Some(7),
                    ..ProviderUpdate::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.priority, 7);

        // Invalid merge result is rejected and the stored record keeps its
        // previous shape.
        let err = registry
            .update(
                "a",
                ProviderUpdate {
                    endpoint: Some("not a url".to_string()),
                    ..ProviderUpdate::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(registry.get("a").await.unwrap().endpoint, "http://localhost:1234");
    }

    #[tokio::test]
    async fn list_enabled_filters_disabled_providers() {
        let registry = ProviderRegistry::new();
        registry.register(local("a")).await.unwrap();
        registry.register(local("b").disabled()).await.unwrap();

        assert_eq!(registry.list(true).await.len(), 1);
        assert_eq!(registry.list(false).await.len(), 2);
    }

    #[tokio::test]
    async fn invalid_provider_is_not_registered() {
        let registry = ProviderRegistry::new();
        let bad = Provider::new("x", "X", ProviderKind::OpenAi, "https://api.openai.com");
        assert!(registry.register(bad).await.is_err());
        assert!(registry.list(false).await.is_empty());
        assert!(registry.health_of("x").await.is_none());
    }

    #[tokio::test]
    async fn stale_probe_result_for_removed_provider_is_dropped() {
        let registry = ProviderRegistry::new();
        registry.register(local("a")).await.unwrap();
        registry.remove("a").await;

        registry
            .store_health(ProviderHealth::healthy("a", Duration::from_millis(5)))
            .await;
        assert!(registry.health_of("a").await.is_none());
    }

    #[tokio::test]
    async fn replace_all_swaps_provider_set() {
        let registry = ProviderRegistry::new();
        registry.register(local("a")).await.unwrap();

        registry
            .replace_all(vec![local("b"), local("c")])
            .await
            .unwrap();

        assert!(registry.get("a").await.is_none());
        assert!(registry.health_of("a").await.is_none());
        assert_eq!(registry.list(false).await.len(), 2);
        assert!(registry.health_of("b").await.is_some());
    }
}
