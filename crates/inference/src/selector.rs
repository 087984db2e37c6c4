//! Load-balancing provider selection.
//!
//! Strategies operate on an immutable snapshot of the provider pool and the
//! health map; the only strategy-owned state is the round-robin cursor, which
//! survives policy switches so flipping the configured policy never resets
//! provider state.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::config::LoadBalancingPolicy;
use crate::error::{Error, Result};
use crate::provider::Provider;
use crate::registry::ProviderHealth;

/// Snapshot handed to a strategy: enabled providers plus current health.
#[derive(Debug, Clone)]
pub struct SelectionContext {
    pub providers: Vec<Provider>,
    pub health: HashMap<String, ProviderHealth>,
}

impl SelectionContext {
    /// A provider is a candidate unless its record explicitly says
    /// unhealthy. A missing record is transient (the registry seeds one at
    /// registration) and does not veto selection.
    fn is_selectable(&self, provider: &Provider) -> bool {
        self.health
            .get(&provider.id)
            .map_or(true, |h| h.is_healthy)
    }

    fn response_time(&self, provider: &Provider) -> Duration {
        self.health
            .get(&provider.id)
            .map_or(Duration::MAX, |h| h.response_time)
    }
}

#[async_trait]
pub trait SelectionStrategy: Send + Sync {
    /// Pick the next provider to try, or fail with
    /// [`Error::NoHealthyProvider`] when no candidate remains.
    async fn select(&self, ctx: &SelectionContext) -> Result<Provider>;

    fn name(&self) -> &'static str;
}

/// Ascending `priority`, stable for ties, first candidate wins.
#[derive(Debug, Default)]
pub struct PriorityStrategy;

#[async_trait]
impl SelectionStrategy for PriorityStrategy {
    async fn select(&self, ctx: &SelectionContext) -> Result<Provider> {
        let mut ordered: Vec<&Provider> = ctx.providers.iter().collect();
        // sort is stable, so equal priorities keep their original order.
        ordered.sort_by_key(|p| p.priority);

        ordered
            .into_iter()
            .find(|p| ctx.is_selectable(p))
            .cloned()
            .ok_or(Error::NoHealthyProvider)
    }

    fn name(&self) -> &'static str {
        "priority"
    }
}

/// Cursor over the currently healthy subset, advanced modulo its size.
#[derive(Debug, Default)]
pub struct RoundRobinStrategy {
    cursor: AtomicUsize,
}

#[async_trait]
impl SelectionStrategy for RoundRobinStrategy {
    async fn select(&self, ctx: &SelectionContext) -> Result<Provider> {
        let healthy: Vec<&Provider> = ctx
            .providers
            .iter()
            .filter(|p| ctx.is_selectable(p))
            .collect();

        if healthy.is_empty() {
            return Err(Error::NoHealthyProvider);
        }

        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % healthy.len();
        Ok(healthy[index].clone())
    }

    fn name(&self) -> &'static str {
        "round-robin"
    }
}

/// Healthy provider with the lowest recorded response time; ties go to the
/// first one encountered.
#[derive(Debug, Default)]
pub struct HealthBasedStrategy;

#[async_trait]
impl SelectionStrategy for HealthBasedStrategy {
    async fn select(&self, ctx: &SelectionContext) -> Result<Provider> {
        let mut best: Option<(&Provider, Duration)> = None;

        for provider in ctx.providers.iter().filter(|p| ctx.is_selectable(p)) {
            let response_time = ctx.response_time(provider);
            match best {
                Some((_, fastest)) if response_time >= fastest => {}
                _ => best = Some((provider, response_time)),
            }
        }

        best.map(|(p, _)| p.clone()).ok_or(Error::NoHealthyProvider)
    }

    fn name(&self) -> &'static str {
        "health-based"
    }
}

/// Owns one instance of every strategy and dispatches on the policy value
/// read from configuration at call time.
#[derive(Debug, Default)]
pub struct ProviderSelector {
    priority: PriorityStrategy,
    round_robin: RoundRobinStrategy,
    health_based: HealthBasedStrategy,
}

impl ProviderSelector {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn select(
        &self,
        policy: LoadBalancingPolicy,
        ctx: &SelectionContext,
    ) -> Result<Provider> {
        let strategy: &dyn SelectionStrategy = match policy {
            LoadBalancingPolicy::Priority => &self.priority,
            LoadBalancingPolicy::RoundRobin => &self.round_robin,
            LoadBalancingPolicy::HealthBased => &self.health_based,
        };

        let selected = strategy.select(ctx).await?;
        debug!(
            strategy = strategy.name(),
            provider = %selected.id,
            "selected provider"
        );
        Ok(selected)
    }
}
