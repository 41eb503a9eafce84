use std::sync::{Arc, Mutex, MutexGuard};

use uuid::Uuid;

use crate::runtime::{record_assertion_failure, KeyedMap};

use super::entities::{Budget, Customer, ProviderConfig, RateLimit, RateLimitSide, Team, VirtualKey};
use super::events::SyncEvent;

/// Merges an incoming rate-limit side's config fields into the existing one
/// in place, preserving `usage`/`last_reset`. A side that didn't exist
/// before is adopted wholesale; a side dropped from the incoming row is
/// removed rather than left stale.
fn merge_rate_limit_side(existing: &mut Option<RateLimitSide>, incoming: Option<RateLimitSide>) {
    match (existing.as_mut(), incoming) {
        (Some(existing_side), Some(incoming_side)) => {
            existing_side.max = incoming_side.max;
            existing_side.reset_duration = incoming_side.reset_duration;
        }
        (_, incoming) => *existing = incoming,
    }
}

/// Locks `entity`, recovering from poisoning the same way the accumulator's
/// per-request mutex does: a panic under one entity's lock must not take
/// down admission checks for every other key sharing that entity.
fn lock_recovering<'a, T>(entity: &'a Mutex<T>) -> MutexGuard<'a, T> {
    match entity.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            record_assertion_failure("governance entity mutex poisoned");
            poisoned.into_inner()
        }
    }
}

/// Hot read path for admission checks. Populated exclusively by the
/// reconciler applying `SyncEvent`s — nothing else is allowed to write
/// here, which is what makes the single-writer property hold.
pub struct MemoryPlane {
    virtual_keys: KeyedMap<Uuid, Arc<Mutex<VirtualKey>>>,
    virtual_keys_by_value: KeyedMap<String, Uuid>,
    teams: KeyedMap<Uuid, Arc<Mutex<Team>>>,
    customers: KeyedMap<Uuid, Arc<Mutex<Customer>>>,
    budgets: KeyedMap<Uuid, Arc<Mutex<Budget>>>,
    rate_limits: KeyedMap<Uuid, Arc<Mutex<RateLimit>>>,
}

impl MemoryPlane {
    pub fn new() -> Self {
        Self {
            virtual_keys: KeyedMap::new(),
            virtual_keys_by_value: KeyedMap::new(),
            teams: KeyedMap::new(),
            customers: KeyedMap::new(),
            budgets: KeyedMap::new(),
            rate_limits: KeyedMap::new(),
        }
    }

    pub fn virtual_key_by_id(&self, id: Uuid) -> Option<Arc<Mutex<VirtualKey>>> {
        self.virtual_keys.get_cloned(&id)
    }

    pub fn virtual_key_by_value(&self, value: &str) -> Option<Arc<Mutex<VirtualKey>>> {
        let id = self.virtual_keys_by_value.get_cloned(&value.to_string())?;
        self.virtual_key_by_id(id)
    }

    pub fn team(&self, id: Uuid) -> Option<Arc<Mutex<Team>>> {
        self.teams.get_cloned(&id)
    }

    pub fn customer(&self, id: Uuid) -> Option<Arc<Mutex<Customer>>> {
        self.customers.get_cloned(&id)
    }

    pub fn budget(&self, id: Uuid) -> Option<Arc<Mutex<Budget>>> {
        self.budgets.get_cloned(&id)
    }

    pub fn rate_limit(&self, id: Uuid) -> Option<Arc<Mutex<RateLimit>>> {
        self.rate_limits.get_cloned(&id)
    }

    pub fn budgets_iter(&self) -> dashmap::iter::Iter<'_, Uuid, Arc<Mutex<Budget>>> {
        self.budgets.iter()
    }

    pub fn rate_limits_iter(&self) -> dashmap::iter::Iter<'_, Uuid, Arc<Mutex<RateLimit>>> {
        self.rate_limits.iter()
    }

    pub fn iter_virtual_keys(&self) -> impl Iterator<Item = Arc<Mutex<VirtualKey>>> + '_ {
        self.virtual_keys.iter().map(|e| e.value().clone())
    }

    pub fn iter_teams(&self) -> impl Iterator<Item = Arc<Mutex<Team>>> + '_ {
        self.teams.iter().map(|e| e.value().clone())
    }

    pub fn iter_customers(&self) -> impl Iterator<Item = Arc<Mutex<Customer>>> + '_ {
        self.customers.iter().map(|e| e.value().clone())
    }

    /// Applies a single durable-store event. Upserts of configuration rows
    /// preserve existing runtime counters in place rather than replacing
    /// the shared `Arc<Mutex<_>>`, so admission checks already holding a
    /// clone see the update without re-resolving.
    pub fn apply(&self, event: SyncEvent) {
        match event {
            SyncEvent::VirtualKeyUpsert(vk) => {
                self.virtual_keys_by_value.insert(vk.value.clone(), vk.id);
                if let Some(existing) = self.virtual_keys.get_cloned(&vk.id) {
                    *lock_recovering(&existing) = vk;
                } else {
                    self.virtual_keys.insert(vk.id, Arc::new(Mutex::new(vk)));
                }
            }
            SyncEvent::VirtualKeyDelete(id) => {
                if let Some((_, vk)) = self.virtual_keys.remove(&id) {
                    let vk = lock_recovering(&vk);
                    self.virtual_keys_by_value.remove(&vk.value);
                    if let Some(budget_id) = vk.budget_id {
                        self.budgets.remove(&budget_id);
                    }
                    for provider_config in &vk.provider_configs {
                        if let Some(budget_id) = provider_config.budget_id {
                            self.budgets.remove(&budget_id);
                        }
                    }
                }
            }
            SyncEvent::TeamUpsert(team) => {
                if let Some(existing) = self.teams.get_cloned(&team.id) {
                    *lock_recovering(&existing) = team;
                } else {
                    self.teams.insert(team.id, Arc::new(Mutex::new(team)));
                }
            }
            SyncEvent::TeamDelete(id) => {
                // A Budget has exactly one owner, so the team's own Budget
                // goes with it rather than lingering as an orphan.
                if let Some((_, team)) = self.teams.remove(&id) {
                    if let Some(budget_id) = lock_recovering(&team).budget_id {
                        self.budgets.remove(&budget_id);
                    }
                }
                self.virtual_keys.retain(|_, vk| {
                    let mut vk = lock_recovering(vk);
                    if vk.team_id == Some(id) {
                        vk.team_id = None;
                    }
                    true
                });
            }
            SyncEvent::CustomerUpsert(customer) => {
                if let Some(existing) = self.customers.get_cloned(&customer.id) {
                    *lock_recovering(&existing) = customer;
                } else {
                    self.customers.insert(customer.id, Arc::new(Mutex::new(customer)));
                }
            }
            SyncEvent::CustomerDelete(id) => {
                if let Some((_, customer)) = self.customers.remove(&id) {
                    if let Some(budget_id) = lock_recovering(&customer).budget_id {
                        self.budgets.remove(&budget_id);
                    }
                }
                self.virtual_keys.retain(|_, vk| {
                    let mut vk = lock_recovering(vk);
                    if vk.customer_id == Some(id) {
                        vk.customer_id = None;
                    }
                    true
                });
            }
            SyncEvent::BudgetUpsert(budget) => {
                if let Some(existing) = self.budgets.get_cloned(&budget.id) {
                    let mut guard = lock_recovering(&existing);
                    guard.max_limit = budget.max_limit;
                    guard.reset_duration = budget.reset_duration;
                } else {
                    self.budgets.insert(budget.id, Arc::new(Mutex::new(budget)));
                }
            }
            SyncEvent::BudgetDelete(id) => {
                self.budgets.remove(&id);
            }
            SyncEvent::RateLimitUpsert(rate_limit) => {
                if let Some(existing) = self.rate_limits.get_cloned(&rate_limit.id) {
                    let mut guard = lock_recovering(&existing);
                    merge_rate_limit_side(&mut guard.token, rate_limit.token);
                    merge_rate_limit_side(&mut guard.request, rate_limit.request);
                } else {
                    self.rate_limits.insert(rate_limit.id, Arc::new(Mutex::new(rate_limit)));
                }
            }
            SyncEvent::RateLimitDelete(id) => {
                self.rate_limits.remove(&id);
            }
        }
    }
}

impl Default for MemoryPlane {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn budget(current_usage: f64) -> Budget {
        Budget {
            id: Uuid::new_v4(),
            max_limit: 100.0,
            reset_duration: "30d".into(),
            current_usage,
            last_reset: Utc::now(),
        }
    }

    #[test]
    fn budget_upsert_preserves_current_usage_on_config_change() {
        let plane = MemoryPlane::new();
        let original = budget(42.0);
        plane.apply(SyncEvent::BudgetUpsert(original.clone()));

        let mut updated = original.clone();
        updated.max_limit = 500.0;
        updated.current_usage = 0.0;
        plane.apply(SyncEvent::BudgetUpsert(updated));

        let stored = plane.budget(original.id).unwrap();
        let guard = stored.lock().unwrap();
        assert_eq!(guard.max_limit, 500.0);
        assert_eq!(guard.current_usage, 42.0);
    }

    #[test]
    fn rate_limit_upsert_preserves_usage_on_config_change() {
        let plane = MemoryPlane::new();
        let original = RateLimit {
            id: Uuid::new_v4(),
            token: Some(RateLimitSide { max: 1000, reset_duration: "60s".into(), usage: 400, last_reset: Utc::now() }),
            request: Some(RateLimitSide { max: 5, reset_duration: "15s".into(), usage: 5, last_reset: Utc::now() }),
        };
        plane.apply(SyncEvent::RateLimitUpsert(original.clone()));

        let mut updated = original.clone();
        updated.token.as_mut().unwrap().max = 2000;
        updated.token.as_mut().unwrap().usage = 0;
        updated.request.as_mut().unwrap().max = 10;
        updated.request.as_mut().unwrap().usage = 0;
        plane.apply(SyncEvent::RateLimitUpsert(updated));

        let stored = plane.rate_limit(original.id).unwrap();
        let guard = stored.lock().unwrap();
        assert_eq!(guard.token.as_ref().unwrap().max, 2000);
        assert_eq!(guard.token.as_ref().unwrap().usage, 400);
        assert_eq!(guard.request.as_ref().unwrap().max, 10);
        assert_eq!(guard.request.as_ref().unwrap().usage, 5);
    }

    #[test]
    fn team_delete_orphans_virtual_key_team_id() {
        let plane = MemoryPlane::new();
        let team_id = Uuid::new_v4();
        let vk = VirtualKey {
            id: Uuid::new_v4(),
            value: "vk".into(),
            name: "n".into(),
            is_active: true,
            team_id: Some(team_id),
            customer_id: None,
            budget_id: None,
            rate_limit_id: None,
            provider_configs: vec![],
        };
        plane.apply(SyncEvent::VirtualKeyUpsert(vk.clone()));
        plane.apply(SyncEvent::TeamDelete(team_id));

        let stored = plane.virtual_key_by_id(vk.id).unwrap();
        assert_eq!(stored.lock().unwrap().team_id, None);
    }

    #[test]
    fn team_delete_drops_its_own_budget_but_leaves_others() {
        let plane = MemoryPlane::new();
        let owned = budget(10.0);
        let unrelated = budget(20.0);
        plane.apply(SyncEvent::BudgetUpsert(owned.clone()));
        plane.apply(SyncEvent::BudgetUpsert(unrelated.clone()));

        let team = Team { id: Uuid::new_v4(), name: "t".into(), customer_id: None, budget_id: Some(owned.id) };
        plane.apply(SyncEvent::TeamUpsert(team.clone()));
        plane.apply(SyncEvent::TeamDelete(team.id));

        assert!(plane.budget(owned.id).is_none());
        assert!(plane.budget(unrelated.id).is_some());
    }

    #[test]
    fn virtual_key_delete_drops_its_own_and_provider_config_budgets() {
        let plane = MemoryPlane::new();
        let own = budget(1.0);
        let provider_budget = budget(2.0);
        let unrelated = budget(3.0);
        plane.apply(SyncEvent::BudgetUpsert(own.clone()));
        plane.apply(SyncEvent::BudgetUpsert(provider_budget.clone()));
        plane.apply(SyncEvent::BudgetUpsert(unrelated.clone()));

        let vk = VirtualKey {
            id: Uuid::new_v4(),
            value: "vk-with-budgets".into(),
            name: "n".into(),
            is_active: true,
            team_id: None,
            customer_id: None,
            budget_id: Some(own.id),
            rate_limit_id: None,
            provider_configs: vec![ProviderConfig {
                id: Uuid::new_v4(),
                provider: "openai".into(),
                weight: 1.0,
                allowed_models: Default::default(),
                budget_id: Some(provider_budget.id),
                rate_limit_id: None,
            }],
        };
        plane.apply(SyncEvent::VirtualKeyUpsert(vk.clone()));
        plane.apply(SyncEvent::VirtualKeyDelete(vk.id));

        assert!(plane.virtual_key_by_id(vk.id).is_none());
        assert!(plane.virtual_key_by_value("vk-with-budgets").is_none());
        assert!(plane.budget(own.id).is_none());
        assert!(plane.budget(provider_budget.id).is_none());
        assert!(plane.budget(unrelated.id).is_some());
    }

    #[test]
    fn lookup_by_value_resolves_to_same_entry_as_by_id() {
        let plane = MemoryPlane::new();
        let vk = VirtualKey {
            id: Uuid::new_v4(),
            value: "sk-abc".into(),
            name: "n".into(),
            is_active: true,
            team_id: None,
            customer_id: None,
            budget_id: None,
            rate_limit_id: None,
            provider_configs: vec![],
        };
        plane.apply(SyncEvent::VirtualKeyUpsert(vk.clone()));
        let by_value = plane.virtual_key_by_value("sk-abc").unwrap();
        assert_eq!(by_value.lock().unwrap().id, vk.id);
    }
}
