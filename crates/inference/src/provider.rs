//! Provider records: identity and connection facts for one inference backend.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Closed set of backend flavors the request adapter knows how to shape for.
///
/// Unrecognized kind strings decode to [`ProviderKind::Unknown`] instead of
/// failing; the adapter passes requests for such providers through unchanged
/// and logs a warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProviderKind {
    #[serde(rename = "local-server")]
    LocalServer,
    #[serde(rename = "openai")]
    OpenAi,
    #[serde(rename = "azure")]
    Azure,
    #[serde(rename = "bedrock")]
    Bedrock,
    #[serde(rename = "google")]
    Google,
    #[serde(rename = "custom")]
    Custom,
    #[serde(rename = "unknown", other)]
    Unknown,
}

impl ProviderKind {
    /// Hosted vendor APIs cannot be called without a credential.
    pub fn requires_credential(&self) -> bool {
        matches!(
            self,
            ProviderKind::OpenAi | ProviderKind::Azure | ProviderKind::Bedrock | ProviderKind::Google
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProbeMethod {
    #[serde(rename = "GET")]
    Get,
    #[serde(rename = "POST")]
    Post,
}

/// Describes the exact probe the health monitor issues for a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckSpec {
    pub path: String,
    pub method: ProbeMethod,
    pub expected_status: u16,
    pub timeout_ms: u64,
}

impl HealthCheckSpec {
    pub fn get(path: &str, expected_status: u16) -> Self {
        Self {
            path: path.to_string(),
            method: ProbeMethod::Get,
            expected_status,
            timeout_ms: 5_000,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Identity and connection facts for one inference backend.
///
/// Records are treated as immutable once stored: updates go through the
/// registry, which validates and replaces the whole record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Provider {
    pub id: String,
    pub name: String,
    pub kind: ProviderKind,
    /// Base endpoint URL; paths like `/v1/chat/completions` are joined onto it.
    pub endpoint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Provider-specific configuration bag (API version, region, model id, ...).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<Map<String, Value>>,
    /// Lower number = higher priority.
    pub priority: i32,
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub health_check: Option<HealthCheckSpec>,
}

impl Provider {
    pub fn new(id: &str, name: &str, kind: ProviderKind, endpoint: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            kind,
            endpoint: endpoint.to_string(),
            api_key: None,
            config: None,
            priority: 100,
            enabled: true,
            health_check: None,
        }
    }

    pub fn with_api_key(mut self, api_key: &str) -> Self {
        self.api_key = Some(api_key.to_string());
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_config(mut self, config: Map<String, Value>) -> Self {
        self.config = Some(config);
        self
    }

    pub fn with_health_check(mut self, health_check: HealthCheckSpec) -> Self {
        self.health_check = Some(health_check);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Validate the record before it enters the registry.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(Error::Validation("provider id must not be empty".to_string()));
        }
        if self.name.trim().is_empty() {
            return Err(Error::Validation(format!(
                "provider '{}' is missing a display name",
                self.id
            )));
        }
        validate_endpoint(&self.id, &self.endpoint)?;
        if self.kind.requires_credential() && self.api_key.as_deref().map_or(true, str::is_empty) {
            return Err(Error::Validation(format!(
                "provider '{}' requires an API key",
                self.id
            )));
        }
        Ok(())
    }

    /// Join a request path onto the base endpoint.
    pub fn url_for(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.endpoint.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    /// Look up a key in the provider-specific config bag.
    pub fn config_value(&self, key: &str) -> Option<&Value> {
        self.config.as_ref().and_then(|c| c.get(key))
    }
}

fn validate_endpoint(id: &str, endpoint: &str) -> Result<()> {
    let rest = endpoint
        .strip_prefix("https://")
        .or_else(|| endpoint.strip_prefix("http://"));

    let host = match rest {
        Some(rest) => rest.split('/').next().unwrap_or(""),
        None => "",
    };

    if host.is_empty() || host.contains(char::is_whitespace) {
        return Err(Error::Validation(format!(
            "provider '{id}' has a malformed endpoint URL: '{endpoint}'"
        )));
    }
    Ok(())
}

/// Partial update applied to an existing provider record. Unset fields keep
/// their current values; the merged record is revalidated before it replaces
/// the old one.
#[derive(Debug, Clone, Default)]
pub struct ProviderUpdate {
    pub name: Option<String>,
    pub kind: Option<ProviderKind>,
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub config: Option<Map<String, Value>>,
    pub priority: Option<i32>,
    pub enabled: Option<bool>,
    pub health_check: Option<HealthCheckSpec>,
}

impl ProviderUpdate {
    pub(crate) fn apply_to(self, mut provider: Provider) -> Provider {
        if let Some(name) = self.name {
            provider.name = name;
        }
        if let Some(kind) = self.kind {
            provider.kind = kind;
        }
        if let Some(endpoint) = self.endpoint {
            provider.endpoint = endpoint;
        }
        if let Some(api_key) = self.api_key {
            provider.api_key = Some(api_key);
        }
        if let Some(config) = self.config {
            provider.config = Some(config);
        }
        if let Some(priority) = self.priority {
            provider.priority = priority;
        }
        if let Some(enabled) = self.enabled {
            provider.enabled = enabled;
        }
        if let Some(health_check) = self.health_check {
            provider.health_check = Some(health_check);
        }
        provider
    }
}
