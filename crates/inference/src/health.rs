//! Periodic provider health monitoring.
//!
//! One background task probes every enabled provider each cycle. Probes for
//! sibling providers run concurrently so one slow endpoint cannot delay the
//! rest, and probe failures never propagate to request callers: they only
//! update health records. This is the authority that heals a provider the
//! orchestrator pessimistically marked unhealthy.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use reqwest::Client;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::provider::{HealthCheckSpec, ProbeMethod, Provider};
use crate::registry::{ProviderHealth, ProviderRegistry};

/// Timeout for the default probe when a provider defines no descriptor.
const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_millis(5_000);

#[derive(Debug)]
pub struct HealthMonitor {
    registry: ProviderRegistry,
    client: Client,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl HealthMonitor {
    pub fn new(registry: ProviderRegistry, client: Client) -> Arc<Self> {
        Arc::new(Self {
            registry,
            client,
            task: Mutex::new(None),
        })
    }

    /// Start the periodic probe loop. Idempotent: a second start while the
    /// loop is running is a no-op, never a duplicate timer.
    pub async fn start(&self, check_interval: Duration) {
        let mut task = self.task.lock().await;
        if task.is_some() {
            debug!("health monitoring already running");
            return;
        }

        info!(interval_ms = check_interval.as_millis() as u64, "starting health monitoring");

        let registry = self.registry.clone();
        let client = self.client.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = interval(check_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick of a tokio interval fires immediately; consume
            // it so the first cycle runs one interval after start.
            ticker.tick().await;

            loop {
                ticker.tick().await;
                run_cycle(&registry, &client).await;
            }
        });

        *task = Some(handle);
    }

    /// Stop the probe loop. Idempotent: stopping an idle monitor is a no-op.
    pub async fn stop(&self) {
        if let Some(handle) = self.task.lock().await.take() {
            handle.abort();
            info!("health monitoring stopped");
        }
    }

    pub async fn is_running(&self) -> bool {
        self.task.lock().await.is_some()
    }

    /// Probe a single provider immediately, outside the periodic cycle, and
    /// return the resulting record. The record is also stored if the
    /// provider is registered, so interactive "test provider" actions update
    /// the shared snapshot right away.
    pub async fn test_once(&self, provider: &Provider) -> ProviderHealth {
        let record = probe(&self.client, provider).await;
        self.registry.store_health(record.clone()).await;
        record
    }
}

/// One monitoring cycle: probe every enabled provider concurrently and store
/// the results. Independent failures do not affect sibling probes.
async fn run_cycle(registry: &ProviderRegistry, client: &Client) {
    let providers = registry.list(true).await;
    if providers.is_empty() {
        return;
    }

    debug!(count = providers.len(), "running health check cycle");
    let probes = providers.iter().map(|p| probe(client, p));
    for record in join_all(probes).await {
        registry.store_health(record).await;
    }
}

async fn probe(client: &Client, provider: &Provider) -> ProviderHealth {
    let started = Instant::now();

    let result = match &provider.health_check {
        Some(spec) => probe_with_descriptor(client, provider, spec).await,
        None => probe_default(client, provider).await,
    };

    let elapsed = started.elapsed();
    match result {
        Ok(()) => {
            debug!(provider = %provider.id, elapsed_ms = elapsed.as_millis() as u64, "probe succeeded");
            ProviderHealth::healthy(&provider.id, elapsed)
        }
        Err(message) => {
            warn!(provider = %provider.id, error = %message, "probe failed");
            ProviderHealth::unhealthy(&provider.id, elapsed, message)
        }
    }
}

/// Issue the exact request the provider's descriptor asks for and compare
/// the observed status against the expected one.
async fn probe_with_descriptor(
    client: &Client,
    provider: &Provider,
    spec: &HealthCheckSpec,
) -> Result<(), String> {
    let url = provider.url_for(&spec.path);
    let mut request = match spec.method {
        ProbeMethod::Get => client.get(&url),
        ProbeMethod::Post => client.post(&url),
    };
    if let Some(api_key) = &provider.api_key {
        request = request.bearer_auth(api_key);
    }

    match timeout(spec.timeout(), request.send()).await {
        Ok(Ok(response)) => {
            let status = response.status().as_u16();
            if status == spec.expected_status {
                Ok(())
            } else {
                Err(format!(
                    "unexpected status {status} (expected {})",
                    spec.expected_status
                ))
            }
        }
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err(format!("health check timed out after {}ms", spec.timeout_ms)),
    }
}

/// Default lightweight probe: any successful response from `/health` counts.
async fn probe_default(client: &Client, provider: &Provider) -> Result<(), String> {
    let url = provider.url_for("/health");
    let mut request = client.get(&url);
    if let Some(api_key) = &provider.api_key {
        request = request.bearer_auth(api_key);
    }

    match timeout(DEFAULT_PROBE_TIMEOUT, request.send()).await {
        Ok(Ok(response)) if response.status().is_success() => Ok(()),
        Ok(Ok(response)) => Err(format!("unexpected status {}", response.status().as_u16())),
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err(format!(
            "health check timed out after {}ms",
            DEFAULT_PROBE_TIMEOUT.as_millis()
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ProviderKind;
    use mockito::Server;

    fn local(id: &str, endpoint: &str) -> Provider {
        Provider::new(id, id, ProviderKind::LocalServer, endpoint)
    }

    #[tokio::test]
    async fn test_once_uses_custom_descriptor() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/v1/models")
            .with_status(200)
            .create_async()
            .await;

        let registry = ProviderRegistry::new();
        let provider = local("p", &server.url())
            .with_health_check(HealthCheckSpec::get("/v1/models", 200));
        registry.register(provider.clone()).await.unwrap();

        let monitor = HealthMonitor::new(registry.clone(), Client::new());
        let record = monitor.test_once(&provider).await;

        assert!(record.is_healthy);
        assert!(record.error.is_none());
        assert!(registry.health_of("p").await.unwrap().is_healthy);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn status_mismatch_marks_unhealthy() {
        let mut server = Server::new_async().await;
        server
            .mock("GET", "/v1/models")
            .with_status(500)
            .create_async()
            .await;

        let provider = local("p", &server.url())
            .with_health_check(HealthCheckSpec::get("/v1/models", 200));
        let monitor = HealthMonitor::new(ProviderRegistry::new(), Client::new());

        let record = monitor.test_once(&provider).await;
        assert!(!record.is_healthy);
        assert!(record.error.unwrap().contains("unexpected status 500"));
    }

    #[tokio::test]
    async fn expected_non_success_status_counts_as_healthy() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/invoke")
            .with_status(400)
            .create_async()
            .await;

        let provider = local("p", &server.url()).with_health_check(HealthCheckSpec {
            path: "/invoke".to_string(),
            method: ProbeMethod::Post,
            expected_status: 400,
            timeout_ms: 5_000,
        });
        let monitor = HealthMonitor::new(ProviderRegistry::new(), Client::new());

        assert!(monitor.test_once(&provider).await.is_healthy);
    }

    #[tokio::test]
    async fn default_probe_hits_health_endpoint() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/health")
            .with_status(200)
            .create_async()
            .await;

        let provider = local("p", &server.url());
        let monitor = HealthMonitor::new(ProviderRegistry::new(), Client::new());

        assert!(monitor.test_once(&provider).await.is_healthy);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn unreachable_endpoint_records_the_error() {
        // Nothing listens on this port.
        let provider = local("p", "http://127.0.0.1:1");
        let monitor = HealthMonitor::new(ProviderRegistry::new(), Client::new());

        let record = monitor.test_once(&provider).await;
        assert!(!record.is_healthy);
        assert!(record.error.is_some());
    }

    #[tokio::test]
    async fn start_and_stop_are_idempotent() {
        let monitor = HealthMonitor::new(ProviderRegistry::new(), Client::new());

        monitor.start(Duration::from_secs(60)).await;
        monitor.start(Duration::from_secs(60)).await;
        assert!(monitor.is_running().await);

        monitor.stop().await;
        assert!(!monitor.is_running().await);
        monitor.stop().await;
        assert!(!monitor.is_running().await);
    }

    #[tokio::test]
    async fn periodic_cycle_probes_enabled_providers() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/health")
            .with_status(200)
            .expect_at_least(1)
            .create_async()
            .await;

        let registry = ProviderRegistry::new();
        registry.register(local("p", &server.url())).await.unwrap();
        // A failed request leaves the provider marked unhealthy; the next
        // cycle corrects it.
        registry.mark_unhealthy("p", "request failed".to_string()).await;

        let monitor = HealthMonitor::new(registry.clone(), Client::new());
        monitor.start(Duration::from_millis(20)).await;
        tokio::time::sleep(Duration::from_millis(120)).await;
        monitor.stop().await;

        let record = registry.health_of("p").await.unwrap();
        assert!(record.is_healthy);
        assert!(record.error.is_none());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn disabled_providers_are_not_probed() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/health")
            .with_status(200)
            .expect(0)
            .create_async()
            .await;

        let registry = ProviderRegistry::new();
        registry
            .register(local("p", &server.url()).disabled())
            .await
            .unwrap();

        let monitor = HealthMonitor::new(registry.clone(), Client::new());
        monitor.start(Duration::from_millis(20)).await;
        tokio::time::sleep(Duration::from_millis(80)).await;
        monitor.stop().await;

        mock.assert_async().await;
    }
}
