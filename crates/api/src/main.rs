use std::sync::Arc;

use api::middleware::{AuthState, OidcVerifier};
use api::routes::build_router;
use api::AppState;
use axum::Router;
use config::{LoggingConfig, Settings};
use database::Database;
use services::broker::CredentialBroker;
use services::clients::{AwsStsProvider, ClientCache};
use services::crawl::CrawlService;
use services::events::EventService;
use services::index::EsSearchIndex;
use services::resolver::WorkspaceResolver;
use services::shares::ShareService;
use tower_http::cors::CorsLayer;

#[tokio::main]
async fn main() {
    let settings = Settings::load().unwrap_or_else(|e| {
        eprintln!("Failed to load configuration: {e}");
        std::process::exit(1);
    });

    init_tracing(&settings.logging);
    tracing::debug!("Config loaded for {}", settings.public_name);

    let database = Arc::new(Database::from_config(&settings).await.unwrap_or_else(|e| {
        tracing::error!("Database initialization failed: {e}");
        std::process::exit(1);
    }));
    if let Err(e) = database.run_migrations().await {
        tracing::error!("Migrations failed: {e}");
        std::process::exit(1);
    }

    let search = Arc::new(EsSearchIndex::new(&settings.es_nodes).unwrap_or_else(|e| {
        tracing::error!("Search engine initialization failed: {e}");
        std::process::exit(1);
    }));

    let clients = Arc::new(ClientCache::new());
    let sts = Arc::new(AwsStsProvider::new(clients.clone()));
    let resolver = Arc::new(WorkspaceResolver::new(
        database.users.clone(),
        database.workspaces.clone(),
    ));
    let broker = Arc::new(CredentialBroker::new(
        database.workspaces.clone(),
        database.shares.clone(),
        database.tokens.clone(),
        sts,
        resolver.clone(),
    ));
    let shares = Arc::new(ShareService::new(
        database.users.clone(),
        database.workspaces.clone(),
        database.shares.clone(),
        database.tokens.clone(),
        resolver.clone(),
    ));
    let crawl = Arc::new(CrawlService::new(
        database.workspaces.clone(),
        database.shares.clone(),
        database.crawls.clone(),
        database.root_indexes.clone(),
        search.clone(),
    ));
    let events = Arc::new(EventService::new(
        database.roots.clone(),
        database.workspaces.clone(),
        database.shares.clone(),
        database.root_indexes.clone(),
        search.clone(),
    ));

    let settings = Arc::new(settings);
    let oidc = Arc::new(OidcVerifier::new(settings.oidc.clone()));
    let auth_state = AuthState::new(database.clone(), oidc);

    let state = AppState {
        settings: settings.clone(),
        db: database,
        clients,
        resolver,
        broker,
        shares,
        crawl,
        events,
        search,
    };

    let app = Router::new()
        .nest("/api", build_router(state, auth_state))
        .layer(CorsLayer::permissive());

    let bind_address = format!("{}:{}", settings.server.host, settings.server.port);
    let listener = tokio::net::TcpListener::bind(&bind_address).await.unwrap();
    tracing::info!(address = %bind_address, "Server started successfully");
    axum::serve(listener, app).await.unwrap();
}

fn init_tracing(logging: &LoggingConfig) {
    match logging.format.as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .json()
                .with_env_filter(logging.level.clone())
                .init();
        }
        "compact" => {
            tracing_subscriber::fmt()
                .compact()
                .with_env_filter(logging.level.clone())
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .pretty()
                .with_env_filter(logging.level.clone())
                .init();
        }
    }
}
