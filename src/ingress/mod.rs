pub mod dispatch;

use std::sync::Arc;

use actix_web::{post, web, HttpRequest, HttpResponse};
use tracing::warn;

use crate::accumulator::Accumulator;
use crate::error::{AppError, AppResult};
use crate::governance::{admit, commit_usage, MemoryPlane};
use crate::runtime::PricingCalculator;

use dispatch::{DispatchOutcome, ProviderDispatch};

/// Recognized virtual-key header formats, checked in this order.
fn extract_vk_value(req: &HttpRequest) -> Option<String> {
    if let Some(v) = req.headers().get("x-bf-vk").and_then(|v| v.to_str().ok()) {
        return Some(v.to_string());
    }
    if let Some(v) = req.headers().get("authorization").and_then(|v| v.to_str().ok()) {
        if let Some(token) = v.strip_prefix("Bearer ") {
            return Some(token.to_string());
        }
    }
    if let Some(v) = req.headers().get("x-api-key").and_then(|v| v.to_str().ok()) {
        return Some(v.to_string());
    }
    if let Some(v) = req.headers().get("x-goog-api-key").and_then(|v| v.to_str().ok()) {
        return Some(v.to_string());
    }
    None
}

/// Minimal inference ingress: resolves the caller through governance,
/// dispatches through the injected provider adapter, and for a streaming
/// outcome registers the request with the accumulator so subsequent chunk
/// ingests (driven by the provider adapter's own stream loop, not shown
/// here) can be assembled and finalized exactly once.
#[post("/chat/completions")]
pub async fn chat_completions(
    req: HttpRequest,
    body: web::Json<serde_json::Value>,
    memory: web::Data<Arc<MemoryPlane>>,
    accumulator: web::Data<Arc<Accumulator>>,
    dispatcher: web::Data<Arc<dyn ProviderDispatch>>,
    pricing: web::Data<Arc<dyn PricingCalculator>>,
) -> AppResult<HttpResponse> {
    let vk_value = extract_vk_value(&req).ok_or_else(|| AppError::Auth("missing virtual key header".into()))?;
    let model = body
        .get("model")
        .and_then(|v| v.as_str())
        .ok_or_else(|| AppError::BadRequest("request body missing \"model\"".into()))?
        .to_string();

    let grant = admit(&memory, &vk_value, &model).await?;

    match dispatcher.dispatch(&grant.provider_config, &body).await? {
        DispatchOutcome::Complete { body, usage } => {
            commit_usage(&memory, &grant, &**pricing, &usage);
            Ok(HttpResponse::Ok().json(body))
        }
        DispatchOutcome::Streaming { request_id } => {
            accumulator.create(&request_id, None);
            warn!(%request_id, "streaming dispatch registered; chunk ingest loop is provider-adapter responsibility");
            Ok(HttpResponse::Ok().json(serde_json::json!({ "request_id": request_id, "streaming": true })))
        }
    }
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(chat_completions);
}
