//! Error taxonomy for the inference routing subsystem.
//!
//! Every failure surfaced to callers is one of these variants, so callers can
//! match on the kind instead of parsing message strings. Intermediate
//! per-attempt failures are recorded into provider health state and never
//! raised directly; only the terminal error of an exhausted retry loop
//! escapes `CloudInferenceService::complete`.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// A provider definition failed validation on register/update.
    #[error("invalid provider definition: {0}")]
    Validation(String),

    /// An operation referenced a provider id that is not registered.
    #[error("provider not found: {0}")]
    NotFound(String),

    /// Selection ran out of candidates: the enabled set is empty or every
    /// member is marked unhealthy.
    #[error("no healthy providers available")]
    NoHealthyProvider,

    /// Transport-level or HTTP-level failure from a specific provider.
    /// Timeouts are reported through this variant as well.
    #[error("request to provider '{provider}' failed: {message}")]
    ProviderRequest { provider: String, message: String },

    /// The provider answered, but the body is missing the required
    /// chat-completion shape.
    #[error("malformed provider response: {0}")]
    MalformedResponse(String),

    /// A `data:` line in an event stream could not be decoded.
    #[error("stream decode error: {0}")]
    StreamDecode(String),
}

impl Error {
    pub(crate) fn provider_request(provider: &str, message: impl Into<String>) -> Self {
        Self::ProviderRequest {
            provider: provider.to_string(),
            message: message.into(),
        }
    }
}
