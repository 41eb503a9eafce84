use std::sync::{Arc, Mutex};

use actix_web::{delete, get, post, put, web, HttpResponse};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppResult;

use super::entities::{Budget, Customer, RateLimit, Team, VirtualKey};
use super::memory::MemoryPlane;
use super::store::GovernanceStore;

pub type StoreHandle = Arc<dyn GovernanceStore>;

#[derive(Deserialize)]
pub struct MemorySourceQuery {
    #[serde(default)]
    pub from_memory: bool,
}

fn clone_locked<T: Clone>(handle: &Mutex<T>) -> T {
    match handle.lock() {
        Ok(guard) => guard.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    }
}

#[post("/virtual-keys")]
pub async fn create_virtual_key(store: web::Data<StoreHandle>, body: web::Json<VirtualKey>) -> AppResult<HttpResponse> {
    let created = store.create_virtual_key(body.into_inner()).await?;
    Ok(HttpResponse::Created().json(created))
}

#[put("/virtual-keys/{id}")]
pub async fn update_virtual_key(
    store: web::Data<StoreHandle>,
    path: web::Path<Uuid>,
    body: web::Json<VirtualKey>,
) -> AppResult<HttpResponse> {
    let mut vk = body.into_inner();
    vk.id = path.into_inner();
    let updated = store.update_virtual_key(vk).await?;
    Ok(HttpResponse::Ok().json(updated))
}

#[delete("/virtual-keys/{id}")]
pub async fn delete_virtual_key(store: web::Data<StoreHandle>, path: web::Path<Uuid>) -> AppResult<HttpResponse> {
    store.delete_virtual_key(path.into_inner()).await?;
    Ok(HttpResponse::NoContent().finish())
}

#[get("/virtual-keys")]
pub async fn list_virtual_keys(
    store: web::Data<StoreHandle>,
    memory: web::Data<Arc<MemoryPlane>>,
    query: web::Query<MemorySourceQuery>,
) -> AppResult<HttpResponse> {
    if query.from_memory {
        let keys: Vec<VirtualKey> = memory.iter_virtual_keys().map(|h| clone_locked(&h)).collect();
        Ok(HttpResponse::Ok().json(keys))
    } else {
        let keys = store.list_virtual_keys().await?;
        Ok(HttpResponse::Ok().json(keys))
    }
}

#[post("/teams")]
pub async fn create_team(store: web::Data<StoreHandle>, body: web::Json<Team>) -> AppResult<HttpResponse> {
    let created = store.create_team(body.into_inner()).await?;
    Ok(HttpResponse::Created().json(created))
}

#[put("/teams/{id}")]
pub async fn update_team(
    store: web::Data<StoreHandle>,
    path: web::Path<Uuid>,
    body: web::Json<Team>,
) -> AppResult<HttpResponse> {
    let mut team = body.into_inner();
    team.id = path.into_inner();
    let updated = store.update_team(team).await?;
    Ok(HttpResponse::Ok().json(updated))
}

#[delete("/teams/{id}")]
pub async fn delete_team(store: web::Data<StoreHandle>, path: web::Path<Uuid>) -> AppResult<HttpResponse> {
    let orphaned_virtual_keys = store.delete_team(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "orphaned_virtual_keys": orphaned_virtual_keys })))
}

#[get("/teams")]
pub async fn list_teams(
    store: web::Data<StoreHandle>,
    memory: web::Data<Arc<MemoryPlane>>,
    query: web::Query<MemorySourceQuery>,
) -> AppResult<HttpResponse> {
    if query.from_memory {
        let teams: Vec<Team> = memory.iter_teams().map(|h| clone_locked(&h)).collect();
        Ok(HttpResponse::Ok().json(teams))
    } else {
        let teams = store.list_teams().await?;
        Ok(HttpResponse::Ok().json(teams))
    }
}

#[post("/customers")]
pub async fn create_customer(store: web::Data<StoreHandle>, body: web::Json<Customer>) -> AppResult<HttpResponse> {
    let created = store.create_customer(body.into_inner()).await?;
    Ok(HttpResponse::Created().json(created))
}

#[put("/customers/{id}")]
pub async fn update_customer(
    store: web::Data<StoreHandle>,
    path: web::Path<Uuid>,
    body: web::Json<Customer>,
) -> AppResult<HttpResponse> {
    let mut customer = body.into_inner();
    customer.id = path.into_inner();
    let updated = store.update_customer(customer).await?;
    Ok(HttpResponse::Ok().json(updated))
}

#[delete("/customers/{id}")]
pub async fn delete_customer(store: web::Data<StoreHandle>, path: web::Path<Uuid>) -> AppResult<HttpResponse> {
    let orphaned_virtual_keys = store.delete_customer(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "orphaned_virtual_keys": orphaned_virtual_keys })))
}

#[get("/customers")]
pub async fn list_customers(
    store: web::Data<StoreHandle>,
    memory: web::Data<Arc<MemoryPlane>>,
    query: web::Query<MemorySourceQuery>,
) -> AppResult<HttpResponse> {
    if query.from_memory {
        let customers: Vec<Customer> = memory.iter_customers().map(|h| clone_locked(&h)).collect();
        Ok(HttpResponse::Ok().json(customers))
    } else {
        let customers = store.list_customers().await?;
        Ok(HttpResponse::Ok().json(customers))
    }
}

#[get("/budgets")]
pub async fn list_budgets(
    store: web::Data<StoreHandle>,
    memory: web::Data<Arc<MemoryPlane>>,
    query: web::Query<MemorySourceQuery>,
) -> AppResult<HttpResponse> {
    if query.from_memory {
        let budgets: Vec<Budget> = memory.budgets_iter().map(|e| clone_locked(e.value())).collect();
        Ok(HttpResponse::Ok().json(budgets))
    } else {
        let budgets = store.list_budgets().await?;
        Ok(HttpResponse::Ok().json(budgets))
    }
}

#[put("/budgets/{id}")]
pub async fn upsert_budget(
    store: web::Data<StoreHandle>,
    path: web::Path<Uuid>,
    body: web::Json<Budget>,
) -> AppResult<HttpResponse> {
    let mut budget = body.into_inner();
    budget.id = path.into_inner();
    let upserted = store.upsert_budget(budget).await?;
    Ok(HttpResponse::Ok().json(upserted))
}

#[get("/rate-limits")]
pub async fn list_rate_limits(
    store: web::Data<StoreHandle>,
    memory: web::Data<Arc<MemoryPlane>>,
    query: web::Query<MemorySourceQuery>,
) -> AppResult<HttpResponse> {
    if query.from_memory {
        let rate_limits: Vec<RateLimit> = memory.rate_limits_iter().map(|e| clone_locked(e.value())).collect();
        Ok(HttpResponse::Ok().json(rate_limits))
    } else {
        let rate_limits = store.list_rate_limits().await?;
        Ok(HttpResponse::Ok().json(rate_limits))
    }
}

#[put("/rate-limits/{id}")]
pub async fn upsert_rate_limit(
    store: web::Data<StoreHandle>,
    path: web::Path<Uuid>,
    body: web::Json<RateLimit>,
) -> AppResult<HttpResponse> {
    let mut rate_limit = body.into_inner();
    rate_limit.id = path.into_inner();
    let upserted = store.upsert_rate_limit(rate_limit).await?;
    Ok(HttpResponse::Ok().json(upserted))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/governance")
            .service(create_virtual_key)
            .service(update_virtual_key)
            .service(delete_virtual_key)
            .service(list_virtual_keys)
            .service(create_team)
            .service(update_team)
            .service(delete_team)
            .service(list_teams)
            .service(create_customer)
            .service(update_customer)
            .service(delete_customer)
            .service(list_customers)
            .service(list_budgets)
            .service(upsert_budget)
            .service(list_rate_limits)
            .service(upsert_rate_limit),
    );
}
