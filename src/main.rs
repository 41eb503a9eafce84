use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;

use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpResponse, HttpServer};
use dotenv::dotenv;
use sqlx::postgres::PgPoolOptions;
use tracing::{error, info};

use gateway_core::accumulator::Accumulator;
use gateway_core::config::AppSettings;
use gateway_core::governance::{GovernanceEngine, InMemoryStore, PostgresStore};
use gateway_core::ingress::dispatch::{ProviderDispatch, UnimplementedDispatch};
use gateway_core::routes::configure_api_routes;
use gateway_core::runtime::{PricingCalculator, StaticPricing};

async fn health_check() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({ "status": "ok" }))
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt::init();

    let app_settings = match AppSettings::from_env() {
        Ok(settings) => settings,
        Err(e) => {
            error!(error = %e, "failed to load application settings from environment");
            std::process::exit(1);
        }
    };

    let reset_tick_interval = Duration::from_secs(app_settings.governance.reset_tick_interval_secs);
    let queue_capacity = app_settings.governance.reconciler_queue_capacity;

    let governance = match &app_settings.database.url {
        Some(database_url) => {
            let pool = match PgPoolOptions::new()
                .max_connections(app_settings.database.max_connections)
                .connect(database_url)
                .await
            {
                Ok(pool) => Arc::new(pool),
                Err(e) => {
                    error!(error = %e, "failed to connect to governance database");
                    std::process::exit(1);
                }
            };
            info!("governance store backed by postgres");
            GovernanceEngine::start(
                move |events| Arc::new(PostgresStore::new(pool, events)),
                reset_tick_interval,
                queue_capacity,
            )
        }
        None => {
            info!("no DATABASE_URL set, governance store backed by process memory");
            GovernanceEngine::start(
                |events| Arc::new(InMemoryStore::new(events)),
                reset_tick_interval,
                queue_capacity,
            )
        }
    };
    let governance = Arc::new(governance);

    let accumulator = Accumulator::new(app_settings.accumulator.pool_prewarm_size);
    accumulator.start_sweeper(
        Duration::from_secs(app_settings.accumulator.sweep_interval_secs),
        Duration::from_secs(app_settings.accumulator.entry_ttl_secs),
    );

    let pricing: Arc<dyn PricingCalculator> = Arc::new(StaticPricing::from_env());
    let dispatcher: Arc<dyn ProviderDispatch> = Arc::new(UnimplementedDispatch);

    let host = app_settings.server.host.clone();
    let port = app_settings.server.port;
    let listener = TcpListener::bind(format!("{}:{}", host, port))?;
    info!(%host, port, "starting server");

    let cors_origins = app_settings.server.cors_origins.clone();

    HttpServer::new(move || {
        let mut cors = Cors::default().supports_credentials();
        if cors_origins.iter().any(|o| o == "*") {
            cors = cors.allow_any_origin();
        } else {
            for origin in &cors_origins {
                cors = cors.allowed_origin(origin);
            }
        }
        cors = cors.allow_any_method().allow_any_header();

        App::new()
            .wrap(Logger::default())
            .wrap(cors)
            .app_data(web::Data::new(governance.memory.clone()))
            .app_data(web::Data::new(governance.store.clone()))
            .app_data(web::Data::new(accumulator.clone()))
            .app_data(web::Data::new(pricing.clone()))
            .app_data(web::Data::new(dispatcher.clone()))
            .service(web::resource("/health").route(web::get().to(health_check)))
            .configure(configure_api_routes)
    })
    .listen(listener)?
    .run()
    .await
}
