use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use serde_json::json;
use uuid::Uuid;

use gateway_core::error::{AdmissionDenialKind, AppError};
use gateway_core::governance::entities::{Budget, ProviderConfig, RateLimit, RateLimitSide, Team, VirtualKey};
use gateway_core::governance::events::SyncEvent;
use gateway_core::governance::{admit, commit_usage, GovernanceStore, InMemoryStore, MemoryPlane};
use gateway_core::models::usage::CanonicalUsage;
use gateway_core::runtime::StaticPricing;

/// Builds an `InMemoryStore` wired to a memory plane, plus a drain function
/// that applies every event currently queued. Tests call `drain` after each
/// store write instead of running the real reconciler task, so assertions
/// never race a background tokio task.
struct Harness {
    store: InMemoryStore,
    memory: Arc<MemoryPlane>,
    events: tokio::sync::mpsc::Receiver<SyncEvent>,
}

impl Harness {
    fn new() -> Self {
        let (tx, events) = tokio::sync::mpsc::channel(64);
        Self {
            store: InMemoryStore::new(tx),
            memory: Arc::new(MemoryPlane::new()),
            events,
        }
    }

    fn drain(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            self.memory.apply(event);
        }
    }
}

fn provider_config(budget_id: Option<Uuid>, rate_limit_id: Option<Uuid>) -> ProviderConfig {
    ProviderConfig {
        id: Uuid::new_v4(),
        provider: "openai".into(),
        weight: 1.0,
        allowed_models: Default::default(),
        budget_id,
        rate_limit_id,
    }
}

fn virtual_key(value: &str, provider_configs: Vec<ProviderConfig>) -> VirtualKey {
    VirtualKey {
        id: Uuid::new_v4(),
        value: value.into(),
        name: value.into(),
        is_active: true,
        team_id: None,
        customer_id: None,
        budget_id: None,
        rate_limit_id: None,
        provider_configs,
    }
}

fn admission_denial_kind(err: &AppError) -> AdmissionDenialKind {
    match err {
        AppError::AdmissionDenied(kind, _) => *kind,
        other => panic!("expected admission denial, got {other:?}"),
    }
}

/// Four requests of ~$0.004 against a $0.01 budget: the first three succeed
/// (cumulative usage only exceeds the limit after the third commits), the
/// fourth is rejected on the pre-hoc check. Accounting is post-hoc, so a
/// request already in flight is never rolled back after it completes.
#[tokio::test]
async fn budget_admits_until_cumulative_usage_crosses_the_limit() {
    let mut h = Harness::new();

    let budget = Budget {
        id: Uuid::new_v4(),
        max_limit: 0.01,
        reset_duration: "30d".into(),
        current_usage: 0.0,
        last_reset: Utc::now(),
    };
    h.store.upsert_budget(budget.clone()).await.unwrap();
    h.drain();

    let vk = virtual_key("sk-budget-test", vec![provider_config(Some(budget.id), None)]);
    h.store.create_virtual_key(vk.clone()).await.unwrap();
    h.drain();

    let pricing = StaticPricing::new(json!({
        "input_per_million": 1.0,
        "output_per_million": 1.0,
    }));
    // 4000 completion tokens at $1/million = $0.004, with zero prompt tokens
    // so only the output leg of the cost calculation applies.
    let usage = CanonicalUsage { prompt_tokens: 0, completion_tokens: 4000, cache_read_tokens: 0, cache_write_tokens: 0 };

    for attempt in 1..=3 {
        let grant = admit(&h.memory, "sk-budget-test", "gpt-4").await
            .unwrap_or_else(|e| panic!("request {attempt} should have been admitted, got {e}"));
        commit_usage(&h.memory, &grant, &pricing, &usage);
    }

    let rejection = admit(&h.memory, "sk-budget-test", "gpt-4").await.unwrap_err();
    assert_eq!(admission_denial_kind(&rejection), AdmissionDenialKind::Budget);

    let stored = h.memory.budget(budget.id).unwrap();
    let current_usage = stored.lock().unwrap().current_usage;
    assert!((current_usage - 0.012).abs() < 1e-9);
}

/// Updating a budget's `max_limit` through the durable store must not reset
/// the runtime `current_usage` counter the memory plane is tracking, even
/// though the write itself only carries the new config fields.
#[tokio::test]
async fn budget_config_update_preserves_accrued_usage() {
    let mut h = Harness::new();

    let budget = Budget {
        id: Uuid::new_v4(),
        max_limit: 10.0,
        reset_duration: "30d".into(),
        current_usage: 0.0,
        last_reset: Utc::now(),
    };
    h.store.upsert_budget(budget.clone()).await.unwrap();
    h.drain();

    let vk = virtual_key("sk-preserve-test", vec![provider_config(Some(budget.id), None)]);
    h.store.create_virtual_key(vk.clone()).await.unwrap();
    h.drain();

    let pricing = StaticPricing::new(json!({
        "input_per_million": 1.0,
        "output_per_million": 1.0,
    }));
    let usage = CanonicalUsage { prompt_tokens: 0, completion_tokens: 9_000_000, cache_read_tokens: 0, cache_write_tokens: 0 };

    let grant = admit(&h.memory, "sk-preserve-test", "gpt-4").await.unwrap();
    commit_usage(&h.memory, &grant, &pricing, &usage);

    let accrued = h.memory.budget(budget.id).unwrap().lock().unwrap().current_usage;
    assert!((accrued - 9.0).abs() < 1e-9);

    // Operator halves the limit. The PUT body naturally carries whatever
    // current_usage the durable store already has on file for this row
    // (still 0.0, since the store was never told about the commit above).
    let mut tightened = budget.clone();
    tightened.max_limit = 5.0;
    h.store.upsert_budget(tightened).await.unwrap();
    h.drain();

    let after_update = h.memory.budget(budget.id).unwrap();
    {
        let guard = after_update.lock().unwrap();
        assert_eq!(guard.max_limit, 5.0);
        assert!((guard.current_usage - 9.0).abs() < 1e-9, "usage must survive a config-only update");
    }

    let rejection = admit(&h.memory, "sk-preserve-test", "gpt-4").await.unwrap_err();
    assert_eq!(admission_denial_kind(&rejection), AdmissionDenialKind::Budget);
}

/// Deleting a team orphans its virtual keys (team_id cleared) rather than
/// leaving them dangling, and the team's own budget drops out of the
/// memory-plane view while the virtual key's own budget keeps it usable.
#[tokio::test]
async fn team_delete_orphans_virtual_key_and_drops_team_budget() {
    let mut h = Harness::new();

    let team_budget = Budget {
        id: Uuid::new_v4(),
        max_limit: 50.0,
        reset_duration: "30d".into(),
        current_usage: 0.0,
        last_reset: Utc::now(),
    };
    h.store.upsert_budget(team_budget.clone()).await.unwrap();
    h.drain();

    let team = Team { id: Uuid::new_v4(), name: "platform".into(), customer_id: None, budget_id: Some(team_budget.id) };
    h.store.create_team(team.clone()).await.unwrap();
    h.drain();

    let vk_budget = Budget {
        id: Uuid::new_v4(),
        max_limit: 50.0,
        reset_duration: "30d".into(),
        current_usage: 0.0,
        last_reset: Utc::now(),
    };
    h.store.upsert_budget(vk_budget.clone()).await.unwrap();
    h.drain();

    let mut vk = virtual_key("sk-team-cascade", vec![provider_config(None, None)]);
    vk.team_id = Some(team.id);
    vk.budget_id = Some(vk_budget.id);
    h.store.create_virtual_key(vk.clone()).await.unwrap();
    h.drain();

    h.store.delete_team(team.id).await.unwrap();
    h.drain();

    let resolved_vk = h.memory.virtual_key_by_value("sk-team-cascade").unwrap();
    assert_eq!(resolved_vk.lock().unwrap().team_id, None);

    // the team's budget row survives in the durable store (delete_team never
    // touches the row itself) but is gone from the memory plane, since the
    // team was its exclusive owner.
    let listed_budgets = h.store.list_budgets().await.unwrap();
    assert!(listed_budgets.iter().any(|b| b.id == team_budget.id));
    assert!(h.memory.budget(team_budget.id).is_none());
    assert!(h.memory.team(team.id).is_none());

    // The virtual key's own budget keeps it admissible after the cascade.
    admit(&h.memory, "sk-team-cascade", "gpt-4").await.unwrap();
}

/// A request-rate limit of 1/15s admits the first request, rejects a second
/// in the same window, and admits again once the window has elapsed.
#[tokio::test]
async fn rate_limit_resets_after_window_elapses() {
    let mut h = Harness::new();

    let rate_limit = RateLimit {
        id: Uuid::new_v4(),
        token: None,
        request: Some(RateLimitSide {
            max: 1,
            reset_duration: "15s".into(),
            usage: 0,
            last_reset: Utc::now(),
        }),
    };
    h.store.upsert_rate_limit(rate_limit.clone()).await.unwrap();
    h.drain();

    let vk = virtual_key("sk-rate-test", vec![provider_config(None, Some(rate_limit.id))]);
    h.store.create_virtual_key(vk.clone()).await.unwrap();
    h.drain();

    admit(&h.memory, "sk-rate-test", "gpt-4").await.unwrap();

    let rejection = admit(&h.memory, "sk-rate-test", "gpt-4").await.unwrap_err();
    assert_eq!(admission_denial_kind(&rejection), AdmissionDenialKind::RequestRate);

    // Simulate the window elapsing rather than sleeping 16s in a test.
    {
        let handle = h.memory.rate_limit(rate_limit.id).unwrap();
        let mut guard = handle.lock().unwrap();
        guard.request.as_mut().unwrap().last_reset = Utc::now() - ChronoDuration::seconds(16);
    }

    admit(&h.memory, "sk-rate-test", "gpt-4").await.unwrap();

    let usage_after_reset = h.memory.rate_limit(rate_limit.id).unwrap().lock().unwrap().request.as_ref().unwrap().usage;
    assert_eq!(usage_after_reset, 1);
}

/// Deleting a virtual key drops its own budget and every one of its
/// provider configs' budgets from the memory plane, but a rate limit
/// referenced only through the deleted key is left as an acceptable orphan.
#[tokio::test]
async fn virtual_key_delete_drops_its_budgets_but_leaves_rate_limit_orphaned() {
    let mut h = Harness::new();

    let vk_budget = Budget {
        id: Uuid::new_v4(),
        max_limit: 10.0,
        reset_duration: "30d".into(),
        current_usage: 0.0,
        last_reset: Utc::now(),
    };
    let provider_budget = Budget {
        id: Uuid::new_v4(),
        max_limit: 20.0,
        reset_duration: "30d".into(),
        current_usage: 0.0,
        last_reset: Utc::now(),
    };
    h.store.upsert_budget(vk_budget.clone()).await.unwrap();
    h.store.upsert_budget(provider_budget.clone()).await.unwrap();
    h.drain();

    let rate_limit = RateLimit {
        id: Uuid::new_v4(),
        token: None,
        request: Some(RateLimitSide { max: 5, reset_duration: "60s".into(), usage: 0, last_reset: Utc::now() }),
    };
    h.store.upsert_rate_limit(rate_limit.clone()).await.unwrap();
    h.drain();

    let mut vk = virtual_key("sk-vk-cascade", vec![provider_config(Some(provider_budget.id), Some(rate_limit.id))]);
    vk.budget_id = Some(vk_budget.id);
    h.store.create_virtual_key(vk.clone()).await.unwrap();
    h.drain();

    h.store.delete_virtual_key(vk.id).await.unwrap();
    h.drain();

    assert!(h.memory.virtual_key_by_value("sk-vk-cascade").is_none());
    assert!(h.memory.budget(vk_budget.id).is_none());
    assert!(h.memory.budget(provider_budget.id).is_none());
    // Orphaned rate limits are acceptable and remain queryable.
    assert!(h.memory.rate_limit(rate_limit.id).is_some());
}
