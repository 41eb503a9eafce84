use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres, query, query_as};
use tokio::sync::mpsc::Sender;
use tracing::{instrument, warn};
use uuid::Uuid;

use crate::error::{AppError, AppResult};

use super::entities::{Budget, Customer, ProviderConfig, RateLimit, RateLimitSide, Team, VirtualKey};
use super::events::SyncEvent;
use super::store::GovernanceStore;

#[derive(sqlx::FromRow)]
struct VirtualKeyRow {
    id: Uuid,
    value: String,
    name: String,
    is_active: bool,
    team_id: Option<Uuid>,
    customer_id: Option<Uuid>,
    budget_id: Option<Uuid>,
    rate_limit_id: Option<Uuid>,
}

#[derive(sqlx::FromRow)]
struct ProviderConfigRow {
    id: Uuid,
    virtual_key_id: Uuid,
    provider: String,
    weight: f64,
    allowed_models: serde_json::Value,
    budget_id: Option<Uuid>,
    rate_limit_id: Option<Uuid>,
}

impl ProviderConfigRow {
    fn into_config(self) -> ProviderConfig {
        let allowed_models = self
            .allowed_models
            .as_array()
            .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_string)).collect::<HashSet<_>>())
            .unwrap_or_default();
        ProviderConfig {
            id: self.id,
            provider: self.provider,
            weight: self.weight,
            allowed_models,
            budget_id: self.budget_id,
            rate_limit_id: self.rate_limit_id,
        }
    }
}

#[derive(sqlx::FromRow)]
struct TeamRow {
    id: Uuid,
    name: String,
    customer_id: Option<Uuid>,
    budget_id: Option<Uuid>,
}

#[derive(sqlx::FromRow)]
struct CustomerRow {
    id: Uuid,
    name: String,
    budget_id: Option<Uuid>,
}

#[derive(sqlx::FromRow)]
struct BudgetRow {
    id: Uuid,
    max_limit: f64,
    reset_duration: String,
    current_usage: f64,
    last_reset: DateTime<Utc>,
}

impl From<BudgetRow> for Budget {
    fn from(row: BudgetRow) -> Self {
        Budget {
            id: row.id,
            max_limit: row.max_limit,
            reset_duration: row.reset_duration,
            current_usage: row.current_usage,
            last_reset: row.last_reset,
        }
    }
}

#[derive(sqlx::FromRow)]
struct RateLimitRow {
    id: Uuid,
    token_max: Option<i64>,
    token_reset_duration: Option<String>,
    token_usage: Option<i64>,
    token_last_reset: Option<DateTime<Utc>>,
    request_max: Option<i64>,
    request_reset_duration: Option<String>,
    request_usage: Option<i64>,
    request_last_reset: Option<DateTime<Utc>>,
}

impl From<RateLimitRow> for RateLimit {
    fn from(row: RateLimitRow) -> Self {
        let token = match (row.token_max, row.token_reset_duration, row.token_last_reset) {
            (Some(max), Some(reset_duration), Some(last_reset)) => Some(RateLimitSide {
                max: max as u64,
                reset_duration,
                usage: row.token_usage.unwrap_or(0) as u64,
                last_reset,
            }),
            _ => None,
        };
        let request = match (row.request_max, row.request_reset_duration, row.request_last_reset) {
            (Some(max), Some(reset_duration), Some(last_reset)) => Some(RateLimitSide {
                max: max as u64,
                reset_duration,
                usage: row.request_usage.unwrap_or(0) as u64,
                last_reset,
            }),
            _ => None,
        };
        RateLimit { id: row.id, token, request }
    }
}

/// Durable store backed by Postgres. Every write commits in a transaction
/// and publishes its `SyncEvent` only after the commit succeeds, so the
/// reconciler never applies a change the durable store ultimately rolled
/// back.
pub struct PostgresStore {
    pool: Arc<Pool<Postgres>>,
    events: Sender<SyncEvent>,
}

impl PostgresStore {
    pub fn new(pool: Arc<Pool<Postgres>>, events: Sender<SyncEvent>) -> Self {
        Self { pool, events }
    }

    fn publish(&self, event: SyncEvent) {
        if let Err(e) = self.events.try_send(event) {
            warn!(error = %e, "governance sync event queue full, memory plane may be stale");
        }
    }

    async fn load_virtual_key(&self, row: VirtualKeyRow) -> AppResult<VirtualKey> {
        let provider_rows = query_as::<_, ProviderConfigRow>(
            "SELECT id, virtual_key_id, provider, weight, allowed_models, budget_id, rate_limit_id \
             FROM provider_configs WHERE virtual_key_id = $1",
        )
        .bind(row.id)
        .fetch_all(&*self.pool)
        .await?;

        Ok(VirtualKey {
            id: row.id,
            value: row.value,
            name: row.name,
            is_active: row.is_active,
            team_id: row.team_id,
            customer_id: row.customer_id,
            budget_id: row.budget_id,
            rate_limit_id: row.rate_limit_id,
            provider_configs: provider_rows.into_iter().map(ProviderConfigRow::into_config).collect(),
        })
    }
}

#[async_trait]
impl GovernanceStore for PostgresStore {
    #[instrument(skip(self, vk))]
    async fn create_virtual_key(&self, vk: VirtualKey) -> AppResult<VirtualKey> {
        let mut tx = self.pool.begin().await?;

        let row = query_as::<_, VirtualKeyRow>(
            r#"
            INSERT INTO virtual_keys (id, value, name, is_active, team_id, customer_id, budget_id, rate_limit_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING id, value, name, is_active, team_id, customer_id, budget_id, rate_limit_id
            "#,
        )
        .bind(vk.id)
        .bind(&vk.value)
        .bind(&vk.name)
        .bind(vk.is_active)
        .bind(vk.team_id)
        .bind(vk.customer_id)
        .bind(vk.budget_id)
        .bind(vk.rate_limit_id)
        .fetch_one(&mut *tx)
        .await?;

        for config in &vk.provider_configs {
            query(
                r#"
                INSERT INTO provider_configs (id, virtual_key_id, provider, weight, allowed_models, budget_id, rate_limit_id)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(config.id)
            .bind(row.id)
            .bind(&config.provider)
            .bind(config.weight)
            .bind(serde_json::to_value(&config.allowed_models).map_err(AppError::from)?)
            .bind(config.budget_id)
            .bind(config.rate_limit_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        let created = self.load_virtual_key(row).await?;
        self.publish(SyncEvent::VirtualKeyUpsert(created.clone()));
        Ok(created)
    }

    #[instrument(skip(self, vk))]
    async fn update_virtual_key(&self, vk: VirtualKey) -> AppResult<VirtualKey> {
        let mut tx = self.pool.begin().await?;

        let row = query_as::<_, VirtualKeyRow>(
            r#"
            UPDATE virtual_keys SET value = $2, name = $3, is_active = $4, team_id = $5,
                customer_id = $6, budget_id = $7, rate_limit_id = $8
            WHERE id = $1
            RETURNING id, value, name, is_active, team_id, customer_id, budget_id, rate_limit_id
            "#,
        )
        .bind(vk.id)
        .bind(&vk.value)
        .bind(&vk.name)
        .bind(vk.is_active)
        .bind(vk.team_id)
        .bind(vk.customer_id)
        .bind(vk.budget_id)
        .bind(vk.rate_limit_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("virtual key {} not found", vk.id)))?;

        query("DELETE FROM provider_configs WHERE virtual_key_id = $1")
            .bind(row.id)
            .execute(&mut *tx)
            .await?;

        for config in &vk.provider_configs {
            query(
                r#"
                INSERT INTO provider_configs (id, virtual_key_id, provider, weight, allowed_models, budget_id, rate_limit_id)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(config.id)
            .bind(row.id)
            .bind(&config.provider)
            .bind(config.weight)
            .bind(serde_json::to_value(&config.allowed_models).map_err(AppError::from)?)
            .bind(config.budget_id)
            .bind(config.rate_limit_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        let updated = self.load_virtual_key(row).await?;
        self.publish(SyncEvent::VirtualKeyUpsert(updated.clone()));
        Ok(updated)
    }

    #[instrument(skip(self))]
    async fn delete_virtual_key(&self, id: Uuid) -> AppResult<()> {
        let result = query("DELETE FROM virtual_keys WHERE id = $1").bind(id).execute(&*self.pool).await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("virtual key {} not found", id)));
        }
        self.publish(SyncEvent::VirtualKeyDelete(id));
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_virtual_key(&self, id: Uuid) -> AppResult<Option<VirtualKey>> {
        let row = query_as::<_, VirtualKeyRow>(
            "SELECT id, value, name, is_active, team_id, customer_id, budget_id, rate_limit_id \
             FROM virtual_keys WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&*self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(self.load_virtual_key(row).await?)),
            None => Ok(None),
        }
    }

    #[instrument(skip(self))]
    async fn list_virtual_keys(&self) -> AppResult<Vec<VirtualKey>> {
        let rows = query_as::<_, VirtualKeyRow>(
            "SELECT id, value, name, is_active, team_id, customer_id, budget_id, rate_limit_id \
             FROM virtual_keys ORDER BY name",
        )
        .fetch_all(&*self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(self.load_virtual_key(row).await?);
        }
        Ok(out)
    }

    #[instrument(skip(self, team))]
    async fn create_team(&self, team: Team) -> AppResult<Team> {
        let row = query_as::<_, TeamRow>(
            "INSERT INTO teams (id, name, customer_id, budget_id) VALUES ($1, $2, $3, $4) \
             RETURNING id, name, customer_id, budget_id",
        )
        .bind(team.id)
        .bind(&team.name)
        .bind(team.customer_id)
        .bind(team.budget_id)
        .fetch_one(&*self.pool)
        .await?;

        let created = Team { id: row.id, name: row.name, customer_id: row.customer_id, budget_id: row.budget_id };
        self.publish(SyncEvent::TeamUpsert(created.clone()));
        Ok(created)
    }

    #[instrument(skip(self, team))]
    async fn update_team(&self, team: Team) -> AppResult<Team> {
        let row = query_as::<_, TeamRow>(
            "UPDATE teams SET name = $2, customer_id = $3, budget_id = $4 WHERE id = $1 \
             RETURNING id, name, customer_id, budget_id",
        )
        .bind(team.id)
        .bind(&team.name)
        .bind(team.customer_id)
        .bind(team.budget_id)
        .fetch_optional(&*self.pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("team {} not found", team.id)))?;

        let updated = Team { id: row.id, name: row.name, customer_id: row.customer_id, budget_id: row.budget_id };
        self.publish(SyncEvent::TeamUpsert(updated.clone()));
        Ok(updated)
    }

    #[instrument(skip(self))]
    async fn delete_team(&self, id: Uuid) -> AppResult<Vec<Uuid>> {
        let mut tx = self.pool.begin().await?;

        let result = query("DELETE FROM teams WHERE id = $1").bind(id).execute(&mut *tx).await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("team {} not found", id)));
        }

        let orphaned: Vec<(Uuid,)> = query_as("UPDATE virtual_keys SET team_id = NULL WHERE team_id = $1 RETURNING id")
            .bind(id)
            .fetch_all(&mut *tx)
            .await?;

        tx.commit().await?;
        self.publish(SyncEvent::TeamDelete(id));
        Ok(orphaned.into_iter().map(|(id,)| id).collect())
    }

    #[instrument(skip(self))]
    async fn get_team(&self, id: Uuid) -> AppResult<Option<Team>> {
        let row = query_as::<_, TeamRow>("SELECT id, name, customer_id, budget_id FROM teams WHERE id = $1")
            .bind(id)
            .fetch_optional(&*self.pool)
            .await?;
        Ok(row.map(|row| Team { id: row.id, name: row.name, customer_id: row.customer_id, budget_id: row.budget_id }))
    }

    #[instrument(skip(self))]
    async fn list_teams(&self) -> AppResult<Vec<Team>> {
        let rows = query_as::<_, TeamRow>("SELECT id, name, customer_id, budget_id FROM teams ORDER BY name")
            .fetch_all(&*self.pool)
            .await?;
        Ok(rows.into_iter().map(|row| Team { id: row.id, name: row.name, customer_id: row.customer_id, budget_id: row.budget_id }).collect())
    }

    #[instrument(skip(self, customer))]
    async fn create_customer(&self, customer: Customer) -> AppResult<Customer> {
        let row = query_as::<_, CustomerRow>(
            "INSERT INTO customers (id, name, budget_id) VALUES ($1, $2, $3) RETURNING id, name, budget_id",
        )
        .bind(customer.id)
        .bind(&customer.name)
        .bind(customer.budget_id)
        .fetch_one(&*self.pool)
        .await?;

        let created = Customer { id: row.id, name: row.name, budget_id: row.budget_id };
        self.publish(SyncEvent::CustomerUpsert(created.clone()));
        Ok(created)
    }

    #[instrument(skip(self, customer))]
    async fn update_customer(&self, customer: Customer) -> AppResult<Customer> {
        let row = query_as::<_, CustomerRow>(
            "UPDATE customers SET name = $2, budget_id = $3 WHERE id = $1 RETURNING id, name, budget_id",
        )
        .bind(customer.id)
        .bind(&customer.name)
        .bind(customer.budget_id)
        .fetch_optional(&*self.pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("customer {} not found", customer.id)))?;

        let updated = Customer { id: row.id, name: row.name, budget_id: row.budget_id };
        self.publish(SyncEvent::CustomerUpsert(updated.clone()));
        Ok(updated)
    }

    #[instrument(skip(self))]
    async fn delete_customer(&self, id: Uuid) -> AppResult<Vec<Uuid>> {
        let mut tx = self.pool.begin().await?;

        let result = query("DELETE FROM customers WHERE id = $1").bind(id).execute(&mut *tx).await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("customer {} not found", id)));
        }

        let orphaned: Vec<(Uuid,)> = query_as("UPDATE virtual_keys SET customer_id = NULL WHERE customer_id = $1 RETURNING id")
            .bind(id)
            .fetch_all(&mut *tx)
            .await?;

        tx.commit().await?;
        self.publish(SyncEvent::CustomerDelete(id));
        Ok(orphaned.into_iter().map(|(id,)| id).collect())
    }

    #[instrument(skip(self))]
    async fn get_customer(&self, id: Uuid) -> AppResult<Option<Customer>> {
        let row = query_as::<_, CustomerRow>("SELECT id, name, budget_id FROM customers WHERE id = $1")
            .bind(id)
            .fetch_optional(&*self.pool)
            .await?;
        Ok(row.map(|row| Customer { id: row.id, name: row.name, budget_id: row.budget_id }))
    }

    #[instrument(skip(self))]
    async fn list_customers(&self) -> AppResult<Vec<Customer>> {
        let rows = query_as::<_, CustomerRow>("SELECT id, name, budget_id FROM customers ORDER BY name")
            .fetch_all(&*self.pool)
            .await?;
        Ok(rows.into_iter().map(|row| Customer { id: row.id, name: row.name, budget_id: row.budget_id }).collect())
    }

    #[instrument(skip(self, budget))]
    async fn upsert_budget(&self, budget: Budget) -> AppResult<Budget> {
        let row = query_as::<_, BudgetRow>(
            r#"
            INSERT INTO budgets (id, max_limit, reset_duration, current_usage, last_reset)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO UPDATE SET max_limit = EXCLUDED.max_limit, reset_duration = EXCLUDED.reset_duration
            RETURNING id, max_limit, reset_duration, current_usage, last_reset
            "#,
        )
        .bind(budget.id)
        .bind(budget.max_limit)
        .bind(&budget.reset_duration)
        .bind(budget.current_usage)
        .bind(budget.last_reset)
        .fetch_one(&*self.pool)
        .await?;

        let upserted: Budget = row.into();
        self.publish(SyncEvent::BudgetUpsert(upserted.clone()));
        Ok(upserted)
    }

    #[instrument(skip(self))]
    async fn get_budget(&self, id: Uuid) -> AppResult<Option<Budget>> {
        let row = query_as::<_, BudgetRow>(
            "SELECT id, max_limit, reset_duration, current_usage, last_reset FROM budgets WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&*self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    #[instrument(skip(self))]
    async fn list_budgets(&self) -> AppResult<Vec<Budget>> {
        let rows = query_as::<_, BudgetRow>("SELECT id, max_limit, reset_duration, current_usage, last_reset FROM budgets")
            .fetch_all(&*self.pool)
            .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    #[instrument(skip(self, rate_limit))]
    async fn upsert_rate_limit(&self, rate_limit: RateLimit) -> AppResult<RateLimit> {
        let row = query_as::<_, RateLimitRow>(
            r#"
            INSERT INTO rate_limits (
                id, token_max, token_reset_duration, token_usage, token_last_reset,
                request_max, request_reset_duration, request_usage, request_last_reset
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (id) DO UPDATE SET
                token_max = EXCLUDED.token_max, token_reset_duration = EXCLUDED.token_reset_duration,
                request_max = EXCLUDED.request_max, request_reset_duration = EXCLUDED.request_reset_duration
            RETURNING id, token_max, token_reset_duration, token_usage, token_last_reset,
                      request_max, request_reset_duration, request_usage, request_last_reset
            "#,
        )
        .bind(rate_limit.id)
        .bind(rate_limit.token.as_ref().map(|t| t.max as i64))
        .bind(rate_limit.token.as_ref().map(|t| t.reset_duration.clone()))
        .bind(rate_limit.token.as_ref().map(|t| t.usage as i64))
        .bind(rate_limit.token.as_ref().map(|t| t.last_reset))
        .bind(rate_limit.request.as_ref().map(|r| r.max as i64))
        .bind(rate_limit.request.as_ref().map(|r| r.reset_duration.clone()))
        .bind(rate_limit.request.as_ref().map(|r| r.usage as i64))
        .bind(rate_limit.request.as_ref().map(|r| r.last_reset))
        .fetch_one(&*self.pool)
        .await?;

        let upserted: RateLimit = row.into();
        self.publish(SyncEvent::RateLimitUpsert(upserted.clone()));
        Ok(upserted)
    }

    #[instrument(skip(self))]
    async fn get_rate_limit(&self, id: Uuid) -> AppResult<Option<RateLimit>> {
        let row = query_as::<_, RateLimitRow>(
            r#"
            SELECT id, token_max, token_reset_duration, token_usage, token_last_reset,
                   request_max, request_reset_duration, request_usage, request_last_reset
            FROM rate_limits WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&*self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    #[instrument(skip(self))]
    async fn list_rate_limits(&self) -> AppResult<Vec<RateLimit>> {
        let rows = query_as::<_, RateLimitRow>(
            r#"
            SELECT id, token_max, token_reset_duration, token_usage, token_last_reset,
                   request_max, request_reset_duration, request_usage, request_last_reset
            FROM rate_limits
            "#,
        )
        .fetch_all(&*self.pool)
        .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }
}
