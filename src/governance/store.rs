use async_trait::async_trait;
use uuid::Uuid;

use crate::error::AppError;

use super::entities::{Budget, Customer, ProviderConfig, RateLimit, Team, VirtualKey};

/// Durable-store contract. Every write is authoritative here first, then
/// publishes a `SyncEvent` that the reconciler folds into the memory plane
/// — the backend behind this trait is deliberately out of scope; what
/// matters to the rest of the engine is that this contract exists and that
/// both implementations emit the same event stream.
#[async_trait]
pub trait GovernanceStore: Send + Sync {
    async fn create_virtual_key(&self, vk: VirtualKey) -> Result<VirtualKey, AppError>;
    async fn update_virtual_key(&self, vk: VirtualKey) -> Result<VirtualKey, AppError>;
    async fn delete_virtual_key(&self, id: Uuid) -> Result<(), AppError>;
    async fn get_virtual_key(&self, id: Uuid) -> Result<Option<VirtualKey>, AppError>;
    async fn list_virtual_keys(&self) -> Result<Vec<VirtualKey>, AppError>;

    async fn create_team(&self, team: Team) -> Result<Team, AppError>;
    async fn update_team(&self, team: Team) -> Result<Team, AppError>;
    async fn delete_team(&self, id: Uuid) -> Result<Vec<Uuid>, AppError>;
    async fn get_team(&self, id: Uuid) -> Result<Option<Team>, AppError>;
    async fn list_teams(&self) -> Result<Vec<Team>, AppError>;

    async fn create_customer(&self, customer: Customer) -> Result<Customer, AppError>;
    async fn update_customer(&self, customer: Customer) -> Result<Customer, AppError>;
    async fn delete_customer(&self, id: Uuid) -> Result<Vec<Uuid>, AppError>;
    async fn get_customer(&self, id: Uuid) -> Result<Option<Customer>, AppError>;
    async fn list_customers(&self) -> Result<Vec<Customer>, AppError>;

    async fn upsert_budget(&self, budget: Budget) -> Result<Budget, AppError>;
    async fn get_budget(&self, id: Uuid) -> Result<Option<Budget>, AppError>;
    async fn list_budgets(&self) -> Result<Vec<Budget>, AppError>;

    async fn upsert_rate_limit(&self, rate_limit: RateLimit) -> Result<RateLimit, AppError>;
    async fn get_rate_limit(&self, id: Uuid) -> Result<Option<RateLimit>, AppError>;
    async fn list_rate_limits(&self) -> Result<Vec<RateLimit>, AppError>;
}

/// Weighted-random selection over the provider configs that can serve
/// `model`, restricted to an explicit `provider/` prefix if the caller
/// supplied one.
pub fn select_provider_config<'a>(
    configs: &'a [ProviderConfig],
    model: &str,
) -> Option<&'a ProviderConfig> {
    let (explicit_provider, bare_model) = match model.split_once('/') {
        Some((provider, rest)) => (Some(provider), rest),
        None => (None, model),
    };

    let candidates: Vec<&ProviderConfig> = configs
        .iter()
        .filter(|c| explicit_provider.map(|p| p == c.provider).unwrap_or(true))
        .filter(|c| c.serves_model(bare_model))
        .collect();

    if candidates.is_empty() {
        return None;
    }

    let total_weight: f64 = candidates.iter().map(|c| c.weight.max(0.0)).sum();
    if total_weight <= 0.0 {
        return candidates.first().copied();
    }

    let mut pick = rand::random::<f64>() * total_weight;
    for candidate in &candidates {
        pick -= candidate.weight.max(0.0);
        if pick <= 0.0 {
            return Some(candidate);
        }
    }
    candidates.last().copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn config(provider: &str, weight: f64, models: &[&str]) -> ProviderConfig {
        ProviderConfig {
            id: Uuid::new_v4(),
            provider: provider.to_string(),
            weight,
            allowed_models: models.iter().map(|m| m.to_string()).collect::<HashSet<_>>(),
            budget_id: None,
            rate_limit_id: None,
        }
    }

    #[test]
    fn explicit_provider_prefix_restricts_selection() {
        let configs = vec![config("openai", 1.0, &[]), config("anthropic", 1.0, &[])];
        let selected = select_provider_config(&configs, "anthropic/claude-3").unwrap();
        assert_eq!(selected.provider, "anthropic");
    }

    #[test]
    fn empty_allowed_models_is_wildcard() {
        let configs = vec![config("openai", 1.0, &[])];
        assert!(select_provider_config(&configs, "gpt-4").is_some());
    }

    #[test]
    fn no_matching_provider_returns_none() {
        let configs = vec![config("openai", 1.0, &["gpt-4"])];
        assert!(select_provider_config(&configs, "claude-3").is_none());
    }
}
