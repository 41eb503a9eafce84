use std::sync::Arc;

use bigdecimal::ToPrimitive;
use chrono::Utc;
use tracing::error;

use crate::models::usage::CanonicalUsage;
use crate::runtime::PricingCalculator;

use super::admission::AdmissionGrant;
use super::memory::MemoryPlane;

/// Applies post-hoc usage to every budget and token rate limit in the
/// admission chain. Never returns an error to the caller: a commit failure
/// here must not unwind the response that already reached the client, so
/// every step logs and moves on to the next entity rather than bailing out.
pub fn commit_usage(memory: &Arc<MemoryPlane>, grant: &AdmissionGrant, pricing: &dyn PricingCalculator, usage: &CanonicalUsage) {
    let cost = match pricing.cost(usage) {
        Ok(cost) => cost.to_f64().unwrap_or(0.0),
        Err(e) => {
            error!(error = %e, "failed to price usage, committing zero cost");
            0.0
        }
    };

    for budget_id in &grant.budget_ids {
        let Some(handle) = memory.budget(*budget_id) else { continue };
        let mut guard = match handle.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.apply_lazy_reset(Utc::now());
        guard.current_usage += cost;
    }

    for rate_limit_id in &grant.rate_limit_ids {
        let Some(handle) = memory.rate_limit(*rate_limit_id) else { continue };
        let mut guard = match handle.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(token_side) = guard.token.as_mut() {
            token_side.apply_lazy_reset(Utc::now());
            token_side.usage += usage.total_tokens();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::governance::entities::{Budget, RateLimit, RateLimitSide};
    use crate::governance::events::SyncEvent;
    use serde_json::json;
    use uuid::Uuid;

    struct FixedPricing(serde_json::Value);
    impl PricingCalculator for FixedPricing {
        fn pricing_info(&self) -> &serde_json::Value {
            &self.0
        }
    }

    #[test]
    fn commit_increments_budget_and_token_usage() {
        let memory = Arc::new(MemoryPlane::new());
        let budget = Budget {
            id: Uuid::new_v4(),
            max_limit: 100.0,
            reset_duration: "30d".into(),
            current_usage: 0.0,
            last_reset: Utc::now(),
        };
        memory.apply(SyncEvent::BudgetUpsert(budget.clone()));

        let rate_limit = RateLimit {
            id: Uuid::new_v4(),
            token: Some(RateLimitSide { max: 10_000, reset_duration: "1h".into(), usage: 0, last_reset: Utc::now() }),
            request: None,
        };
        memory.apply(SyncEvent::RateLimitUpsert(rate_limit.clone()));

        let grant = AdmissionGrant {
            virtual_key_id: Uuid::new_v4(),
            provider_config: crate::governance::entities::ProviderConfig {
                id: Uuid::new_v4(),
                provider: "openai".into(),
                weight: 1.0,
                allowed_models: Default::default(),
                budget_id: None,
                rate_limit_id: None,
            },
            budget_ids: vec![budget.id],
            rate_limit_ids: vec![rate_limit.id],
        };

        let pricing = FixedPricing(json!({
            "input_per_million": 1_000_000.0,
            "output_per_million": 1_000_000.0,
        }));
        let usage = CanonicalUsage { prompt_tokens: 1, completion_tokens: 1, cache_read_tokens: 0, cache_write_tokens: 0 };

        commit_usage(&memory, &grant, &pricing, &usage);

        let budget_handle = memory.budget(budget.id).unwrap();
        assert_eq!(budget_handle.lock().unwrap().current_usage, 2.0);

        let rl_handle = memory.rate_limit(rate_limit.id).unwrap();
        assert_eq!(rl_handle.lock().unwrap().token.as_ref().unwrap().usage, 2);
    }
}
