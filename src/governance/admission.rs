use std::sync::Arc;

use chrono::Utc;

use crate::error::{AdmissionDenialKind, AppError, AppResult};

use super::entities::{Budget, ProviderConfig, RateLimit, RateLimitSide, VirtualKey};
use super::memory::MemoryPlane;
use super::store::select_provider_config;

/// Everything an inference request needs to carry forward once admission
/// succeeds: which provider config to dispatch through and the full chain
/// of entities whose counters `commit` must touch afterwards.
pub struct AdmissionGrant {
    pub virtual_key_id: uuid::Uuid,
    pub provider_config: ProviderConfig,
    pub budget_ids: Vec<uuid::Uuid>,
    pub rate_limit_ids: Vec<uuid::Uuid>,
}

/// Resolves the caller's key, selects a provider config for `model`, and
/// walks the ProviderConfig -> VirtualKey -> Team -> Customer chain
/// checking activity, budget headroom, and both rate-limit sides. Request
/// counting is pre-hoc (incremented here, inside the check); token and
/// cost accounting is post-hoc and happens in `commit` once usage is
/// known.
pub async fn admit(memory: &Arc<MemoryPlane>, key_value: &str, model: &str) -> AppResult<AdmissionGrant> {
    let vk_handle = memory
        .virtual_key_by_value(key_value)
        .ok_or_else(|| AppError::Auth("virtual key not recognized".into()))?;

    let (vk_snapshot, provider_config) = {
        let vk: VirtualKey = lock_clone(&vk_handle);
        if !vk.is_active {
            return Err(AppError::AdmissionDenied(AdmissionDenialKind::Inactive, "virtual key is inactive".into()));
        }
        let provider_config = select_provider_config(&vk.provider_configs, model)
            .cloned()
            .ok_or_else(|| {
                AppError::AdmissionDenied(AdmissionDenialKind::NoProviderForModel, format!("no provider serves model {model}"))
            })?;
        (vk, provider_config)
    };

    let mut budget_ids = Vec::new();
    let mut rate_limit_ids = Vec::new();

    if let Some(id) = provider_config.budget_id {
        check_budget(memory, id)?;
        budget_ids.push(id);
    }
    if let Some(id) = provider_config.rate_limit_id {
        check_and_reserve_rate_limit(memory, id)?;
        rate_limit_ids.push(id);
    }

    if let Some(id) = vk_snapshot.budget_id {
        check_budget(memory, id)?;
        budget_ids.push(id);
    }
    if let Some(id) = vk_snapshot.rate_limit_id {
        check_and_reserve_rate_limit(memory, id)?;
        rate_limit_ids.push(id);
    }

    if let Some(team_id) = vk_snapshot.team_id {
        if let Some(team_handle) = memory.team(team_id) {
            let team = lock_clone(&team_handle);
            if let Some(id) = team.budget_id {
                check_budget(memory, id)?;
                budget_ids.push(id);
            }
            if let Some(customer_id) = team.customer_id {
                if let Some(customer_handle) = memory.customer(customer_id) {
                    let customer = lock_clone(&customer_handle);
                    if let Some(id) = customer.budget_id {
                        check_budget(memory, id)?;
                        budget_ids.push(id);
                    }
                }
            }
        }
    }

    if let Some(customer_id) = vk_snapshot.customer_id {
        if let Some(customer_handle) = memory.customer(customer_id) {
            let customer = lock_clone(&customer_handle);
            if let Some(id) = customer.budget_id {
                check_budget(memory, id)?;
                budget_ids.push(id);
            }
        }
    }

    Ok(AdmissionGrant {
        virtual_key_id: vk_snapshot.id,
        provider_config,
        budget_ids: dedup(budget_ids),
        rate_limit_ids: dedup(rate_limit_ids),
    })
}

fn dedup(mut ids: Vec<uuid::Uuid>) -> Vec<uuid::Uuid> {
    ids.sort();
    ids.dedup();
    ids
}

fn lock_clone<T: Clone>(handle: &std::sync::Mutex<T>) -> T {
    match handle.lock() {
        Ok(guard) => guard.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    }
}

fn check_budget(memory: &Arc<MemoryPlane>, id: uuid::Uuid) -> AppResult<()> {
    let handle = match memory.budget(id) {
        Some(handle) => handle,
        None => return Ok(()),
    };
    let mut guard = match handle.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    apply_and_check_budget(&mut guard)
}

fn apply_and_check_budget(budget: &mut Budget) -> AppResult<()> {
    budget.apply_lazy_reset(Utc::now());
    if budget.has_headroom() {
        Ok(())
    } else {
        Err(AppError::AdmissionDenied(AdmissionDenialKind::Budget, format!("budget {} exhausted", budget.id)))
    }
}

/// Request-count admission is pre-hoc: the reservation happens here, under
/// the rate limit's own lock, so two concurrent admissions never both pass
/// a limit with exactly one slot left.
fn check_and_reserve_rate_limit(memory: &Arc<MemoryPlane>, id: uuid::Uuid) -> AppResult<()> {
    let handle = match memory.rate_limit(id) {
        Some(handle) => handle,
        None => return Ok(()),
    };
    let mut guard = match handle.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    reserve_request_slot(&mut guard)
}

fn reserve_request_slot(rate_limit: &mut RateLimit) -> AppResult<()> {
    let now = Utc::now();
    if let Some(token) = rate_limit.token.as_mut() {
        token.apply_lazy_reset(now);
        if !token.has_headroom() {
            return Err(AppError::AdmissionDenied(AdmissionDenialKind::TokenRate, format!("rate limit {} token budget exhausted", rate_limit.id)));
        }
    }
    if let Some(request) = rate_limit.request.as_mut() {
        request.apply_lazy_reset(now);
        if !request.has_headroom() {
            return Err(AppError::AdmissionDenied(AdmissionDenialKind::RequestRate, format!("rate limit {} request budget exhausted", rate_limit.id)));
        }
        request.usage += 1;
    }
    Ok(())
}

/// Bootstraps a fresh `RateLimitSide` stamped with the current time, used
/// when constructing default limits from configuration rather than a
/// durable-store row.
pub fn fresh_rate_limit_side(max: u64, reset_duration: impl Into<String>) -> RateLimitSide {
    RateLimitSide {
        max,
        reset_duration: reset_duration.into(),
        usage: 0,
        last_reset: Utc::now(),
    }
}
