use async_trait::async_trait;

use crate::error::AppError;
use crate::governance::entities::ProviderConfig;
use crate::models::usage::CanonicalUsage;

/// Stand-in for the real per-provider outbound adapters (out of scope here).
/// Implementors translate the gateway's request body into a provider call
/// and report back either a single completed response or a stream of raw
/// provider chunks for the ingress handler to feed into the accumulator.
#[async_trait]
pub trait ProviderDispatch: Send + Sync {
    async fn dispatch(&self, provider_config: &ProviderConfig, request_body: &serde_json::Value) -> Result<DispatchOutcome, AppError>;
}

pub enum DispatchOutcome {
    Complete { body: serde_json::Value, usage: CanonicalUsage },
    Streaming { request_id: String },
}

/// Default dispatcher wired in when no real provider adapter is configured.
/// Every call fails closed with `NotImplemented` rather than silently
/// fabricating a response.
pub struct UnimplementedDispatch;

#[async_trait]
impl ProviderDispatch for UnimplementedDispatch {
    async fn dispatch(&self, provider_config: &ProviderConfig, _request_body: &serde_json::Value) -> Result<DispatchOutcome, AppError> {
        Err(AppError::NotImplemented(format!(
            "no provider adapter configured to dispatch to {}",
            provider_config.provider
        )))
    }
}
