use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::mpsc::Sender;
use tracing::warn;
use uuid::Uuid;

use crate::error::AppError;

use super::entities::{Budget, Customer, RateLimit, Team, VirtualKey};
use super::events::SyncEvent;
use super::store::GovernanceStore;

/// Durable store backed by process memory. Used when no `DATABASE_URL` is
/// configured, and by the test suite — the write path is identical to the
/// Postgres-backed store except durability is traded away.
pub struct InMemoryStore {
    virtual_keys: DashMap<Uuid, VirtualKey>,
    teams: DashMap<Uuid, Team>,
    customers: DashMap<Uuid, Customer>,
    budgets: DashMap<Uuid, Budget>,
    rate_limits: DashMap<Uuid, RateLimit>,
    events: Sender<SyncEvent>,
}

impl InMemoryStore {
    pub fn new(events: Sender<SyncEvent>) -> Self {
        Self {
            virtual_keys: DashMap::new(),
            teams: DashMap::new(),
            customers: DashMap::new(),
            budgets: DashMap::new(),
            rate_limits: DashMap::new(),
            events,
        }
    }

    fn publish(&self, event: SyncEvent) {
        // A full queue means the reconciler is falling behind; dropping the
        // event here would silently desync the memory plane, so log loudly
        // rather than block the write path on a slow consumer.
        if let Err(e) = self.events.try_send(event) {
            warn!(error = %e, "governance sync event queue full, memory plane may be stale");
        }
    }
}

#[async_trait]
impl GovernanceStore for InMemoryStore {
    async fn create_virtual_key(&self, vk: VirtualKey) -> Result<VirtualKey, AppError> {
        self.virtual_keys.insert(vk.id, vk.clone());
        self.publish(SyncEvent::VirtualKeyUpsert(vk.clone()));
        Ok(vk)
    }

    async fn update_virtual_key(&self, vk: VirtualKey) -> Result<VirtualKey, AppError> {
        if !self.virtual_keys.contains_key(&vk.id) {
            return Err(AppError::NotFound(format!("virtual key {} not found", vk.id)));
        }
        self.virtual_keys.insert(vk.id, vk.clone());
        self.publish(SyncEvent::VirtualKeyUpsert(vk.clone()));
        Ok(vk)
    }

    async fn delete_virtual_key(&self, id: Uuid) -> Result<(), AppError> {
        self.virtual_keys
            .remove(&id)
            .ok_or_else(|| AppError::NotFound(format!("virtual key {} not found", id)))?;
        self.publish(SyncEvent::VirtualKeyDelete(id));
        Ok(())
    }

    async fn get_virtual_key(&self, id: Uuid) -> Result<Option<VirtualKey>, AppError> {
        Ok(self.virtual_keys.get(&id).map(|e| e.value().clone()))
    }

    async fn list_virtual_keys(&self) -> Result<Vec<VirtualKey>, AppError> {
        Ok(self.virtual_keys.iter().map(|e| e.value().clone()).collect())
    }

    async fn create_team(&self, team: Team) -> Result<Team, AppError> {
        self.teams.insert(team.id, team.clone());
        self.publish(SyncEvent::TeamUpsert(team.clone()));
        Ok(team)
    }

    async fn update_team(&self, team: Team) -> Result<Team, AppError> {
        if !self.teams.contains_key(&team.id) {
            return Err(AppError::NotFound(format!("team {} not found", team.id)));
        }
        self.teams.insert(team.id, team.clone());
        self.publish(SyncEvent::TeamUpsert(team.clone()));
        Ok(team)
    }

    async fn delete_team(&self, id: Uuid) -> Result<Vec<Uuid>, AppError> {
        self.teams
            .remove(&id)
            .ok_or_else(|| AppError::NotFound(format!("team {} not found", id)))?;

        let orphaned: Vec<Uuid> = self
            .virtual_keys
            .iter()
            .filter(|e| e.value().team_id == Some(id))
            .map(|e| *e.key())
            .collect();
        for vk_id in &orphaned {
            if let Some(mut entry) = self.virtual_keys.get_mut(vk_id) {
                entry.team_id = None;
            }
        }

        self.publish(SyncEvent::TeamDelete(id));
        Ok(orphaned)
    }

    async fn get_team(&self, id: Uuid) -> Result<Option<Team>, AppError> {
        Ok(self.teams.get(&id).map(|e| e.value().clone()))
    }

    async fn list_teams(&self) -> Result<Vec<Team>, AppError> {
        Ok(self.teams.iter().map(|e| e.value().clone()).collect())
    }

    async fn create_customer(&self, customer: Customer) -> Result<Customer, AppError> {
        self.customers.insert(customer.id, customer.clone());
        self.publish(SyncEvent::CustomerUpsert(customer.clone()));
        Ok(customer)
    }

    async fn update_customer(&self, customer: Customer) -> Result<Customer, AppError> {
        if !self.customers.contains_key(&customer.id) {
            return Err(AppError::NotFound(format!("customer {} not found", customer.id)));
        }
        self.customers.insert(customer.id, customer.clone());
        self.publish(SyncEvent::CustomerUpsert(customer.clone()));
        Ok(customer)
    }

    async fn delete_customer(&self, id: Uuid) -> Result<Vec<Uuid>, AppError> {
        self.customers
            .remove(&id)
            .ok_or_else(|| AppError::NotFound(format!("customer {} not found", id)))?;

        let orphaned: Vec<Uuid> = self
            .virtual_keys
            .iter()
            .filter(|e| e.value().customer_id == Some(id))
            .map(|e| *e.key())
            .collect();
        for vk_id in &orphaned {
            if let Some(mut entry) = self.virtual_keys.get_mut(vk_id) {
                entry.customer_id = None;
            }
        }

        self.publish(SyncEvent::CustomerDelete(id));
        Ok(orphaned)
    }

    async fn get_customer(&self, id: Uuid) -> Result<Option<Customer>, AppError> {
        Ok(self.customers.get(&id).map(|e| e.value().clone()))
    }

    async fn list_customers(&self) -> Result<Vec<Customer>, AppError> {
        Ok(self.customers.iter().map(|e| e.value().clone()).collect())
    }

    async fn upsert_budget(&self, budget: Budget) -> Result<Budget, AppError> {
        self.budgets.insert(budget.id, budget.clone());
        self.publish(SyncEvent::BudgetUpsert(budget.clone()));
        Ok(budget)
    }

    async fn get_budget(&self, id: Uuid) -> Result<Option<Budget>, AppError> {
        Ok(self.budgets.get(&id).map(|e| e.value().clone()))
    }

    async fn list_budgets(&self) -> Result<Vec<Budget>, AppError> {
        Ok(self.budgets.iter().map(|e| e.value().clone()).collect())
    }

    async fn upsert_rate_limit(&self, rate_limit: RateLimit) -> Result<RateLimit, AppError> {
        self.rate_limits.insert(rate_limit.id, rate_limit.clone());
        self.publish(SyncEvent::RateLimitUpsert(rate_limit.clone()));
        Ok(rate_limit)
    }

    async fn get_rate_limit(&self, id: Uuid) -> Result<Option<RateLimit>, AppError> {
        Ok(self.rate_limits.get(&id).map(|e| e.value().clone()))
    }

    async fn list_rate_limits(&self) -> Result<Vec<RateLimit>, AppError> {
        Ok(self.rate_limits.iter().map(|e| e.value().clone()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn store() -> (InMemoryStore, tokio::sync::mpsc::Receiver<SyncEvent>) {
        let (tx, rx) = tokio::sync::mpsc::channel(16);
        (InMemoryStore::new(tx), rx)
    }

    fn vk(team_id: Option<Uuid>) -> VirtualKey {
        VirtualKey {
            id: Uuid::new_v4(),
            value: "vk-test".into(),
            name: "test".into(),
            is_active: true,
            team_id,
            customer_id: None,
            budget_id: None,
            rate_limit_id: None,
            provider_configs: vec![],
        }
    }

    #[tokio::test]
    async fn deleting_team_orphans_referencing_virtual_keys() {
        let (store, mut rx) = store();
        let team = Team {
            id: Uuid::new_v4(),
            name: "t".into(),
            customer_id: None,
            budget_id: None,
        };
        store.create_team(team.clone()).await.unwrap();
        let key = store.create_virtual_key(vk(Some(team.id))).await.unwrap();

        let orphaned = store.delete_team(team.id).await.unwrap();
        assert_eq!(orphaned, vec![key.id]);

        let reloaded = store.get_virtual_key(key.id).await.unwrap().unwrap();
        assert_eq!(reloaded.team_id, None);

        while let Ok(event) = rx.try_recv() {
            if let SyncEvent::TeamDelete(id) = event {
                assert_eq!(id, team.id);
            }
        }
    }

    #[tokio::test]
    async fn update_unknown_budget_still_succeeds_as_upsert() {
        let (store, _rx) = store();
        let budget = Budget {
            id: Uuid::new_v4(),
            max_limit: 100.0,
            reset_duration: "30d".into(),
            current_usage: 0.0,
            last_reset: Utc::now(),
        };
        let result = store.upsert_budget(budget.clone()).await.unwrap();
        assert_eq!(result.id, budget.id);
    }
}
