use uuid::Uuid;

use super::entities::{Budget, Customer, RateLimit, Team, VirtualKey};

/// Typed change published by a store write, applied to the memory plane by
/// the single-writer reconciler. Upserts carry the full configuration row;
/// the reconciler is responsible for preserving runtime-only fields
/// (`current_usage`, `last_reset`) rather than blindly overwriting.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    VirtualKeyUpsert(VirtualKey),
    VirtualKeyDelete(Uuid),
    TeamUpsert(Team),
    TeamDelete(Uuid),
    CustomerUpsert(Customer),
    CustomerDelete(Uuid),
    BudgetUpsert(Budget),
    BudgetDelete(Uuid),
    RateLimitUpsert(RateLimit),
    RateLimitDelete(Uuid),
}
