//! Per-vendor request shaping and response normalization.
//!
//! Every provider in this system is OpenAI-compatible at the core; the
//! differences are envelope fields injected from the provider's config bag.
//! Shaping is pure and keyed on [`ProviderKind`]; normalization is structural
//! validation plus provider attribution, not transformation.

use serde_json::{json, Value};
use tracing::warn;

use crate::error::{Error, Result};
use crate::provider::{Provider, ProviderKind};
use crate::types::{ChatCompletionRequest, ChatCompletionResponse};

const DEFAULT_AZURE_API_VERSION: &str = "2024-02-15-preview";

/// Translate a canonical request into the wire shape the provider expects.
pub fn shape_request(provider: &Provider, request: &ChatCompletionRequest) -> Result<Value> {
    let mut body = match serde_json::to_value(request) {
        Ok(Value::Object(map)) => map,
        Ok(_) | Err(_) => {
            return Err(Error::Validation(
                "chat request did not serialize to a JSON object".to_string(),
            ))
        }
    };

    match provider.kind {
        // Already canonical OpenAI-style shape.
        ProviderKind::LocalServer | ProviderKind::OpenAi => {}

        ProviderKind::Azure => {
            let api_version = provider
                .config_value("apiVersion")
                .cloned()
                .unwrap_or_else(|| json!(DEFAULT_AZURE_API_VERSION));
            body.insert("api_version".to_string(), api_version);
        }

        ProviderKind::Bedrock => {
            let model_id = provider
                .config_value("modelId")
                .cloned()
                .or_else(|| request.model.clone().map(Value::String));
            if let Some(model_id) = model_id {
                body.insert("modelId".to_string(), model_id);
            }
            let inference_config = provider
                .config_value("inferenceConfig")
                .cloned()
                .unwrap_or_else(|| json!({}));
            body.insert("inferenceConfig".to_string(), inference_config);
        }

        ProviderKind::Google => {
            let generation_config = provider
                .config_value("generationConfig")
                .cloned()
                .unwrap_or_else(|| json!({}));
            body.insert("generationConfig".to_string(), generation_config);
        }

        ProviderKind::Custom => {
            // customFormat may override any canonical field.
            if let Some(Value::Object(custom)) = provider.config_value("customFormat") {
                for (key, value) in custom {
                    body.insert(key.clone(), value.clone());
                }
            }
        }

        ProviderKind::Unknown => {
            warn!(
                provider = %provider.id,
                "unknown provider kind, passing request through unchanged"
            );
        }
    }

    Ok(Value::Object(body))
}

/// Validate the raw provider response and attach the producing provider's
/// display name. Stable under repeated application.
pub fn normalize_response(provider: &Provider, raw: Value) -> Result<ChatCompletionResponse> {
    if raw.get("choices").and_then(Value::as_array).is_none() {
        return Err(Error::MalformedResponse(format!(
            "response from '{}' is missing the 'choices' array",
            provider.name
        )));
    }

    let mut response: ChatCompletionResponse = serde_json::from_value(raw)
        .map_err(|e| Error::MalformedResponse(e.to_string()))?;
    response.provider = Some(provider.name.clone());
    Ok(response)
}
