//! Service configuration and environment-based provider discovery.

use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::info;

use crate::provider::{HealthCheckSpec, ProbeMethod, Provider, ProviderKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LoadBalancingPolicy {
    #[default]
    Priority,
    RoundRobin,
    HealthBased,
}

/// Settings for the routing service. Providers themselves live in the
/// registry; this object only carries policy and timing knobs.
#[derive(Debug, Clone)]
pub struct InferenceConfig {
    pub load_balancing: LoadBalancingPolicy,
    /// Total attempt budget per `complete` call, including the first try.
    pub retry_attempts: u32,
    /// Pause between consecutive attempts.
    pub retry_delay: Duration,
    /// Timeout applied to each outbound inference call.
    pub timeout: Duration,
    pub enable_health_monitoring: bool,
    pub health_check_interval: Duration,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            load_balancing: LoadBalancingPolicy::Priority,
            retry_attempts: 3,
            retry_delay: Duration::from_millis(1_000),
            timeout: Duration::from_millis(30_000),
            enable_health_monitoring: true,
            health_check_interval: Duration::from_millis(30_000),
        }
    }
}

/// Partial configuration update; unset fields keep their current values.
#[derive(Debug, Clone, Default)]
pub struct InferenceConfigUpdate {
    pub load_balancing: Option<LoadBalancingPolicy>,
    pub retry_attempts: Option<u32>,
    pub retry_delay: Option<Duration>,
    pub timeout: Option<Duration>,
    pub enable_health_monitoring: Option<bool>,
    pub health_check_interval: Option<Duration>,
    /// When set, replaces the whole provider pool.
    pub providers: Option<Vec<Provider>>,
}

impl InferenceConfigUpdate {
    pub(crate) fn apply_to(&self, config: &mut InferenceConfig) {
        if let Some(policy) = self.load_balancing {
            config.load_balancing = policy;
        }
        if let Some(attempts) = self.retry_attempts {
            config.retry_attempts = attempts;
        }
        if let Some(delay) = self.retry_delay {
            config.retry_delay = delay;
        }
        if let Some(timeout) = self.timeout {
            config.timeout = timeout;
        }
        if let Some(enabled) = self.enable_health_monitoring {
            config.enable_health_monitoring = enabled;
        }
        if let Some(interval) = self.health_check_interval {
            config.health_check_interval = interval;
        }
    }
}

/// Discover provider records from environment variables.
///
/// Each configured vendor gets the priorities and probe descriptors the
/// hosted deployments use; an empty environment yields an empty list, which
/// is not an error (the caller may add providers at runtime instead).
pub fn providers_from_env() -> Vec<Provider> {
    dotenv::dotenv().ok();

    let mut providers = Vec::new();

    if let Ok(url) = env::var("LOCAL_LLM_URL") {
        providers.push(
            Provider::new("local", "Local Server", ProviderKind::LocalServer, &url)
                .with_priority(0)
                .with_health_check(HealthCheckSpec::get("/v1/models", 200)),
        );
        info!("discovered local inference server from environment");
    }

    if let Ok(api_key) = env::var("OPENAI_API_KEY") {
        let endpoint =
            env::var("OPENAI_ENDPOINT").unwrap_or_else(|_| "https://api.openai.com".to_string());
        providers.push(
            Provider::new("openai", "OpenAI", ProviderKind::OpenAi, &endpoint)
                .with_api_key(&api_key)
                .with_priority(1)
                .with_health_check(HealthCheckSpec::get("/v1/models", 200)),
        );
        info!("discovered OpenAI provider from environment");
    }

    if let (Ok(api_key), Ok(endpoint)) = (env::var("AZURE_API_KEY"), env::var("AZURE_ENDPOINT")) {
        let mut config = Map::new();
        config.insert(
            "apiVersion".to_string(),
            json!(env::var("AZURE_API_VERSION")
                .unwrap_or_else(|_| "2024-02-15-preview".to_string())),
        );
        providers.push(
            Provider::new("azure", "Azure OpenAI", ProviderKind::Azure, &endpoint)
                .with_api_key(&api_key)
                .with_priority(2)
                .with_config(config)
                .with_health_check(HealthCheckSpec::get("/openai/deployments", 200)),
        );
        info!("discovered Azure OpenAI provider from environment");
    }

    if let (Ok(access_key), Ok(region)) =
        (env::var("AWS_ACCESS_KEY_ID"), env::var("BEDROCK_REGION"))
    {
        let mut config = Map::new();
        config.insert("region".to_string(), json!(region));
        if let Ok(model_id) = env::var("BEDROCK_MODEL_ID") {
            config.insert("modelId".to_string(), json!(model_id));
        }
        let endpoint = format!("https://bedrock-runtime.{region}.amazonaws.com");
        providers.push(
            Provider::new("bedrock", "AWS Bedrock", ProviderKind::Bedrock, &endpoint)
                .with_api_key(&access_key)
                .with_priority(3)
                // Bedrock answers 400 to an empty invoke, which still proves
                // the endpoint is reachable.
                .with_health_check(HealthCheckSpec {
                    path: "/invoke".to_string(),
                    method: ProbeMethod::Post,
                    expected_status: 400,
                    timeout_ms: 5_000,
                }),
        );
        info!("discovered AWS Bedrock provider from environment");
    }

    if let Ok(api_key) = env::var("GOOGLE_API_KEY") {
        let endpoint = env::var("GOOGLE_ENDPOINT")
            .unwrap_or_else(|_| "https://generativelanguage.googleapis.com".to_string());
        providers.push(
            Provider::new("google", "Google AI", ProviderKind::Google, &endpoint)
                .with_api_key(&api_key)
                .with_priority(4)
                .with_health_check(HealthCheckSpec::get("/v1/models", 200)),
        );
        info!("discovered Google AI provider from environment");
    }

    if let Ok(endpoints) = env::var("CUSTOM_ENDPOINTS") {
        let keys: Vec<String> = env::var("CUSTOM_API_KEYS")
            .map(|v| v.split(',').map(str::to_string).collect())
            .unwrap_or_default();

        for (index, endpoint) in endpoints
            .split(',')
            .map(str::trim)
            .filter(|e| !e.is_empty())
            .enumerate()
        {
            let id = format!("custom-{index}");
            let mut provider = Provider::new(
                &id,
                &format!("Custom Endpoint {}", index + 1),
                ProviderKind::Custom,
                endpoint,
            )
            .with_priority(5 + index as i32)
            .with_health_check(HealthCheckSpec::get("/health", 200));
            if let Some(key) = keys.get(index).filter(|k| !k.is_empty()) {
                provider = provider.with_api_key(key);
            }
            providers.push(provider);
        }
        info!(count = providers.len(), "discovered custom endpoints from environment");
    }

    providers
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const ALL_VARS: &[&str] = &[
        "LOCAL_LLM_URL",
        "OPENAI_API_KEY",
        "OPENAI_ENDPOINT",
        "AZURE_API_KEY",
        "AZURE_ENDPOINT",
        "AZURE_API_VERSION",
        "AWS_ACCESS_KEY_ID",
        "BEDROCK_REGION",
        "BEDROCK_MODEL_ID",
        "GOOGLE_API_KEY",
        "GOOGLE_ENDPOINT",
        "CUSTOM_ENDPOINTS",
        "CUSTOM_API_KEYS",
    ];

    fn clear_env() {
        for var in ALL_VARS {
            env::remove_var(var);
        }
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = InferenceConfig::default();
        assert_eq!(config.load_balancing, LoadBalancingPolicy::Priority);
        assert_eq!(config.retry_attempts, 3);
        assert_eq!(config.retry_delay, Duration::from_millis(1_000));
        assert_eq!(config.timeout, Duration::from_millis(30_000));
        assert!(config.enable_health_monitoring);
        assert_eq!(config.health_check_interval, Duration::from_millis(30_000));
    }

    #[test]
    fn policy_parses_from_kebab_case() {
        for (text, policy) in [
            ("\"priority\"", LoadBalancingPolicy::Priority),
            ("\"round-robin\"", LoadBalancingPolicy::RoundRobin),
            ("\"health-based\"", LoadBalancingPolicy::HealthBased),
        ] {
            let parsed: LoadBalancingPolicy = serde_json::from_str(text).unwrap();
            assert_eq!(parsed, policy);
        }
    }

    #[test]
    fn update_applies_only_set_fields() {
        let mut config = InferenceConfig::default();
        let update = InferenceConfigUpdate {
            load_balancing: Some(LoadBalancingPolicy::RoundRobin),
            retry_attempts: Some(5),
            ..InferenceConfigUpdate::default()
        };

        update.apply_to(&mut config);
        assert_eq!(config.load_balancing, LoadBalancingPolicy::RoundRobin);
        assert_eq!(config.retry_attempts, 5);
        assert_eq!(config.retry_delay, Duration::from_millis(1_000));
    }

    #[test]
    #[serial]
    fn empty_environment_yields_no_providers() {
        clear_env();
        assert!(providers_from_env().is_empty());
    }

    #[test]
    #[serial]
    fn openai_and_azure_are_discovered_with_expected_priorities() {
        clear_env();
        env::set_var("OPENAI_API_KEY", "sk-test");
        env::set_var("AZURE_API_KEY", "az-test");
        env::set_var("AZURE_ENDPOINT", "https://example.openai.azure.com");

        let providers = providers_from_env();
        clear_env();

        assert_eq!(providers.len(), 2);
        let openai = providers.iter().find(|p| p.id == "openai").unwrap();
        assert_eq!(openai.priority, 1);
        assert_eq!(openai.endpoint, "https://api.openai.com");
        assert!(openai.health_check.is_some());

        let azure = providers.iter().find(|p| p.id == "azure").unwrap();
        assert_eq!(azure.kind, ProviderKind::Azure);
        assert_eq!(
            azure.config_value("apiVersion").unwrap(),
            "2024-02-15-preview"
        );
    }

    #[test]
    #[serial]
    fn custom_endpoints_pair_with_their_keys() {
        clear_env();
        env::set_var("CUSTOM_ENDPOINTS", "http://one.example.com,http://two.example.com");
        env::set_var("CUSTOM_API_KEYS", "key-one");

        let providers = providers_from_env();
        clear_env();

        assert_eq!(providers.len(), 2);
        assert_eq!(providers[0].api_key.as_deref(), Some("key-one"));
        assert!(providers[1].api_key.is_none());
        assert_eq!(providers[1].priority, 6);
    }

    #[test]
    #[serial]
    fn bedrock_probe_expects_the_documented_status() {
        clear_env();
        env::set_var("AWS_ACCESS_KEY_ID", "AKIATEST");
        env::set_var("BEDROCK_REGION", "us-east-1");

        let providers = providers_from_env();
        clear_env();

        let bedrock = providers.iter().find(|p| p.id == "bedrock").unwrap();
        assert_eq!(
            bedrock.endpoint,
            "https://bedrock-runtime.us-east-1.amazonaws.com"
        );
        let probe = bedrock.health_check.as_ref().unwrap();
        assert_eq!(probe.expected_status, 400);
        assert_eq!(probe.method, ProbeMethod::Post);
    }
}
