use std::sync::Arc;

use tidepay::api::{create_router, AppState};
use tidepay::config::Config;
use tidepay::db::{init_db, Repository};
use tidepay::events::AuditLogger;
use tidepay::ledger::{LedgerWriter, SubscriptionService};
use tidepay::processor::FortisGateway;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    let pool = match init_db(&config.database_path).await {
        Ok(pool) => pool,
        Err(e) => {
            eprintln!("Database initialization failed: {}", e);
            std::process::exit(1);
        }
    };
    let repo = Arc::new(Repository::new(pool));

    let gateway = match FortisGateway::new(&config) {
        Ok(gateway) => Arc::new(gateway),
        Err(e) => {
            eprintln!("Processor client initialization failed: {}", e);
            std::process::exit(1);
        }
    };

    let audit = AuditLogger::spawn(repo.clone());
    let writer = Arc::new(LedgerWriter::new(
        repo.clone(),
        gateway,
        config.fee_schedule(),
        audit.clone(),
    ));
    let subscriptions = Arc::new(SubscriptionService::new(
        repo.clone(),
        writer.clone(),
        audit,
    ));

    let app = create_router(AppState {
        repo,
        writer,
        subscriptions,
    });

    let addr = format!("0.0.0.0:{}", config.port);
    info!("Listening on {}", addr);

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            eprintln!("Failed to bind {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    if let Err(e) = axum::serve(listener, app).await {
        eprintln!("Server error: {}", e);
        std::process::exit(1);
    }
}
