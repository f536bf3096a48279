pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;

use std::sync::Arc;

use database::Database;
use services::broker::CredentialBroker;
use services::clients::ClientCache;
use services::crawl::CrawlService;
use services::events::EventService;
use services::index::EsSearchIndex;
use services::resolver::WorkspaceResolver;
use services::shares::ShareService;

/// Everything handlers need, instantiated once at process start and
/// passed by reference.
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<config::Settings>,
    pub db: Arc<Database>,
    pub clients: Arc<ClientCache>,
    pub resolver: Arc<WorkspaceResolver>,
    pub broker: Arc<CredentialBroker>,
    pub shares: Arc<ShareService>,
    pub crawl: Arc<CrawlService>,
    pub events: Arc<EventService>,
    pub search: Arc<EsSearchIndex>,
}
