//! Multi-provider inference routing.
//!
//! This crate routes OpenAI-compatible chat-completion requests across a
//! pool of cloud and local providers. It keeps a registry of provider
//! definitions with live health records, selects a provider per request
//! under a configurable load-balancing policy, shapes the request for the
//! target vendor, and retries across providers until the attempt budget is
//! exhausted. Both buffered and streaming completions go through the same
//! failover loop.
//!
//! Entry point is [`CloudInferenceService`]:
//!
//! ```no_run
//! use inference::{ChatCompletionRequest, ChatMessage, CloudInferenceService, InferenceConfig};
//!
//! # async fn run() -> inference::Result<()> {
//! let service = CloudInferenceService::from_env(InferenceConfig::default()).await?;
//! let response = service
//!     .complete(ChatCompletionRequest::new(vec![ChatMessage::user("hello")]))
//!     .await?;
//! println!("{}", response.content().unwrap_or_default());
//! # Ok(())
//! # }
//! ```

pub mod adapter;
pub mod config;
pub mod error;
pub mod health;
pub mod provider;
pub mod registry;
pub mod selector;
pub mod service;
pub mod sse;
pub mod types;

pub use config::{providers_from_env, InferenceConfig, InferenceConfigUpdate, LoadBalancingPolicy};
pub use error::{Error, Result};
pub use provider::{HealthCheckSpec, ProbeMethod, Provider, ProviderKind, ProviderUpdate};
pub use registry::{ProviderHealth, ProviderRegistry};
pub use service::CloudInferenceService;
pub use types::{
    ChatCompletionRequest, ChatCompletionResponse, ChatMessage, Choice, Delta, FunctionCall,
    FunctionSpec, ResponseMessage, Role, StreamChoice, StreamChunk, ToolCall, ToolSpec, Usage,
};
