use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub id: Uuid,
    pub provider: String,
    pub weight: f64,
    pub allowed_models: HashSet<String>,
    pub budget_id: Option<Uuid>,
    pub rate_limit_id: Option<Uuid>,
}

impl ProviderConfig {
    pub fn serves_model(&self, model: &str) -> bool {
        self.allowed_models.is_empty() || self.allowed_models.contains(model)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VirtualKey {
    pub id: Uuid,
    pub value: String,
    pub name: String,
    pub is_active: bool,
    pub team_id: Option<Uuid>,
    pub customer_id: Option<Uuid>,
    pub budget_id: Option<Uuid>,
    pub rate_limit_id: Option<Uuid>,
    pub provider_configs: Vec<ProviderConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Team {
    pub id: Uuid,
    pub name: String,
    pub customer_id: Option<Uuid>,
    pub budget_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Customer {
    pub id: Uuid,
    pub name: String,
    pub budget_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Budget {
    pub id: Uuid,
    pub max_limit: f64,
    pub reset_duration: String,
    pub current_usage: f64,
    pub last_reset: DateTime<Utc>,
}

impl Budget {
    pub fn reset_duration_parsed(&self) -> Duration {
        crate::models::duration::GatewayDuration::parse(&self.reset_duration)
            .unwrap_or(Duration::from_secs(30 * 24 * 60 * 60))
    }

    /// Applies the lazy-reset rule: if the window has elapsed, zero the
    /// usage counter and move `last_reset` forward. No-op otherwise.
    pub fn apply_lazy_reset(&mut self, now: DateTime<Utc>) {
        let window = self.reset_duration_parsed();
        if let Ok(elapsed) = (now - self.last_reset).to_std() {
            if elapsed >= window {
                self.current_usage = 0.0;
                self.last_reset = now;
            }
        }
    }

    pub fn has_headroom(&self) -> bool {
        self.current_usage < self.max_limit
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitSide {
    pub max: u64,
    pub reset_duration: String,
    pub usage: u64,
    pub last_reset: DateTime<Utc>,
}

impl RateLimitSide {
    pub fn reset_duration_parsed(&self) -> Duration {
        crate::models::duration::GatewayDuration::parse(&self.reset_duration)
            .unwrap_or(Duration::from_secs(60))
    }

    pub fn apply_lazy_reset(&mut self, now: DateTime<Utc>) {
        let window = self.reset_duration_parsed();
        if let Ok(elapsed) = (now - self.last_reset).to_std() {
            if elapsed >= window {
                self.usage = 0;
                self.last_reset = now;
            }
        }
    }

    pub fn has_headroom(&self) -> bool {
        self.usage < self.max
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimit {
    pub id: Uuid,
    pub token: Option<RateLimitSide>,
    pub request: Option<RateLimitSide>,
}
