//! Request orchestration: selection, dispatch, retry and failover.
//!
//! `CloudInferenceService` is the public entry point of the crate. Each
//! completion call runs a bounded attempt loop: select a provider under the
//! configured policy, dispatch, and on failure mark the provider unhealthy
//! and move on. Selection re-runs every attempt against fresh health state,
//! so consecutive attempts naturally fail over to the next candidate. Only
//! the terminal error of an exhausted loop reaches the caller.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use futures::StreamExt;
use reqwest::Client;
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::adapter;
use crate::config::{providers_from_env, InferenceConfig, InferenceConfigUpdate};
use crate::error::{Error, Result};
use crate::health::HealthMonitor;
use crate::provider::{Provider, ProviderUpdate};
use crate::registry::{ProviderHealth, ProviderRegistry};
use crate::selector::{ProviderSelector, SelectionContext};
use crate::sse::SseDecoder;
use crate::types::{
    ChatCompletionRequest, ChatCompletionResponse, Choice, ResponseMessage, Role, StreamChunk,
    Usage,
};

const CHAT_COMPLETIONS_PATH: &str = "/v1/chat/completions";

#[derive(Debug)]
pub struct CloudInferenceService {
    config: Arc<RwLock<InferenceConfig>>,
    registry: ProviderRegistry,
    selector: ProviderSelector,
    monitor: Arc<HealthMonitor>,
    client: Client,
}

impl CloudInferenceService {
    /// Build a service over the given provider pool. Fails if any provider
    /// definition is invalid; starts background health monitoring when the
    /// configuration enables it.
    pub async fn new(config: InferenceConfig, providers: Vec<Provider>) -> Result<Self> {
        let registry = ProviderRegistry::new();
        for provider in providers {
            registry.register(provider).await?;
        }

        let client = Client::new();
        let monitor = HealthMonitor::new(registry.clone(), client.clone());
        if config.enable_health_monitoring {
            monitor.start(config.health_check_interval).await;
        }

        info!(
            providers = registry.list(false).await.len(),
            policy = ?config.load_balancing,
            "inference service initialized"
        );

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            registry,
            selector: ProviderSelector::new(),
            monitor,
            client,
        })
    }

    /// Build a service from providers discovered in the environment.
    pub async fn from_env(config: InferenceConfig) -> Result<Self> {
        Self::new(config, providers_from_env()).await
    }

    /// Run one completion request through the retry/failover loop.
    pub async fn complete(&self, request: ChatCompletionRequest) -> Result<ChatCompletionResponse> {
        self.complete_inner(&request, None).await
    }

    /// Streaming variant: `on_chunk` is invoked for every decoded delta, and
    /// the accumulated result is returned as a regular response once the
    /// stream finishes.
    pub async fn complete_streaming(
        &self,
        request: ChatCompletionRequest,
        mut on_chunk: impl FnMut(&StreamChunk) + Send,
    ) -> Result<ChatCompletionResponse> {
        self.complete_inner(&request, Some(&mut on_chunk)).await
    }

    async fn complete_inner(
        &self,
        request: &ChatCompletionRequest,
        mut on_chunk: Option<&mut (dyn FnMut(&StreamChunk) + Send)>,
    ) -> Result<ChatCompletionResponse> {
        let cfg = self.config.read().await.clone();
        let attempts = cfg.retry_attempts.max(1);
        let mut last_error: Option<Error> = None;

        for attempt in 1..=attempts {
            let ctx = SelectionContext {
                providers: self.registry.list(true).await,
                health: self.registry.health_snapshot().await,
            };

            match self.selector.select(cfg.load_balancing, &ctx).await {
                Ok(provider) => {
                    debug!(attempt, provider = %provider.id, "dispatching completion request");

                    let outcome = match on_chunk.as_deref_mut() {
                        Some(callback) => {
                            self.execute_streaming(&provider, request, cfg.timeout, callback)
                                .await
                        }
                        None => self.execute_buffered(&provider, request, cfg.timeout).await,
                    };

                    match outcome {
                        Ok(response) => {
                            info!(provider = %provider.id, attempt, "completion succeeded");
                            return Ok(response);
                        }
                        Err(err) => {
                            warn!(
                                provider = %provider.id,
                                attempt,
                                error = %err,
                                "completion attempt failed"
                            );
                            self.registry
                                .mark_unhealthy(&provider.id, err.to_string())
                                .await;
                            last_error = Some(err);
                        }
                    }
                }
                Err(err) => {
                    warn!(attempt, "no provider available for attempt");
                    // A per-provider failure from an earlier attempt is more
                    // informative than the generic exhaustion error.
                    if last_error.is_none() {
                        last_error = Some(err);
                    }
                }
            }

            if attempt < attempts {
                sleep(cfg.retry_delay).await;
            }
        }

        Err(last_error.unwrap_or(Error::NoHealthyProvider))
    }

    async fn execute_buffered(
        &self,
        provider: &Provider,
        request: &ChatCompletionRequest,
        budget: Duration,
    ) -> Result<ChatCompletionResponse> {
        let body = adapter::shape_request(provider, request)?;
        let response = self.dispatch(provider, body, budget).await?;

        let raw: Value = response
            .json()
            .await
            .map_err(|e| Error::MalformedResponse(e.to_string()))?;
        adapter::normalize_response(provider, raw)
    }

    async fn execute_streaming(
        &self,
        provider: &Provider,
        request: &ChatCompletionRequest,
        budget: Duration,
        on_chunk: &mut (dyn FnMut(&StreamChunk) + Send),
    ) -> Result<ChatCompletionResponse> {
        let mut body = adapter::shape_request(provider, request)?;
        body["stream"] = json!(true);
        let response = self.dispatch(provider, body, budget).await?;

        let mut stream = response.bytes_stream();
        let mut decoder = SseDecoder::new();
        let mut content = String::new();
        let mut role: Option<Role> = None;
        let mut finish_reason: Option<String> = None;
        let mut model: Option<String> = None;

        while !decoder.is_done() {
            // The per-request budget applies between chunks, so a stalled
            // stream fails over like any other transport error.
            let item = timeout(budget, stream.next()).await.map_err(|_| {
                Error::provider_request(
                    &provider.id,
                    format!("stream stalled for {}ms", budget.as_millis()),
                )
            })?;

            let Some(bytes) = item else {
                break;
            };
            let bytes = bytes.map_err(|e| Error::provider_request(&provider.id, e.to_string()))?;

            for chunk in decoder.feed(&bytes)? {
                if let Some(choice) = chunk.choices.first() {
                    if let Some(r) = choice.delta.role {
                        role = Some(r);
                    }
                    if let Some(text) = &choice.delta.content {
                        content.push_str(text);
                    }
                    if let Some(reason) = &choice.finish_reason {
                        finish_reason = Some(reason.clone());
                    }
                }
                if model.is_none() && !chunk.model.is_empty() {
                    model = Some(chunk.model.clone());
                }
                on_chunk(&chunk);
            }
        }

        Ok(ChatCompletionResponse {
            id: format!("chatcmpl-{}", Uuid::new_v4()),
            object: "chat.completion".to_string(),
            created: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0),
            model: model
                .or_else(|| request.model.clone())
                .unwrap_or_default(),
            choices: vec![Choice {
                index: 0,
                message: ResponseMessage {
                    role: role.unwrap_or(Role::Assistant),
                    content: Some(content),
                    tool_calls: None,
                },
                finish_reason: finish_reason.unwrap_or_else(|| "stop".to_string()),
            }],
            usage: Usage::default(),
            provider: Some(provider.name.clone()),
        })
    }

    /// Send the shaped body and return the response after the status check.
    async fn dispatch(
        &self,
        provider: &Provider,
        body: Value,
        budget: Duration,
    ) -> Result<reqwest::Response> {
        let url = provider.url_for(CHAT_COMPLETIONS_PATH);
        let mut outbound = self.client.post(&url).json(&body);
        if let Some(api_key) = &provider.api_key {
            outbound = outbound.bearer_auth(api_key);
        }

        let response = timeout(budget, outbound.send())
            .await
            .map_err(|_| {
                Error::provider_request(
                    &provider.id,
                    format!("request timed out after {}ms", budget.as_millis()),
                )
            })?
            .map_err(|e| Error::provider_request(&provider.id, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::provider_request(
                &provider.id,
                format!("HTTP {}: {}", status.as_u16(), text),
            ));
        }

        Ok(response)
    }

    // ---- management surface ----------------------------------------------

    pub async fn providers(&self) -> Vec<Provider> {
        self.registry.list(false).await
    }

    pub async fn health_status(&self) -> HashMap<String, ProviderHealth> {
        self.registry.health_snapshot().await
    }

    pub async fn add_provider(&self, provider: Provider) -> Result<()> {
        self.registry.register(provider).await
    }

    pub async fn remove_provider(&self, id: &str) {
        self.registry.remove(id).await;
    }

    pub async fn update_provider(&self, id: &str, update: ProviderUpdate) -> Result<Provider> {
        self.registry.update(id, update).await
    }

    /// Probe one provider immediately and return the fresh record.
    pub async fn test_provider(&self, id: &str) -> Result<ProviderHealth> {
        let provider = self
            .registry
            .get(id)
            .await
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        Ok(self.monitor.test_once(&provider).await)
    }

    pub async fn config(&self) -> InferenceConfig {
        self.config.read().await.clone()
    }

    /// Apply a partial configuration update. A provider list in the update
    /// replaces the whole pool; monitoring is started, retimed or stopped to
    /// match the resulting configuration.
    pub async fn update_config(&self, update: InferenceConfigUpdate) -> Result<()> {
        if let Some(providers) = &update.providers {
            self.registry.replace_all(providers.clone()).await?;
        }

        let monitoring_changed =
            update.enable_health_monitoring.is_some() || update.health_check_interval.is_some();

        let (enabled, interval) = {
            let mut cfg = self.config.write().await;
            update.apply_to(&mut cfg);
            (cfg.enable_health_monitoring, cfg.health_check_interval)
        };

        if enabled {
            if monitoring_changed {
                self.monitor.stop().await;
            }
            self.monitor.start(interval).await;
        } else {
            self.monitor.stop().await;
        }

        Ok(())
    }

    /// Stop background monitoring. Safe to call more than once.
    pub async fn shutdown(&self) {
        self.monitor.stop().await;
        info!("inference service shut down");
    }
}
