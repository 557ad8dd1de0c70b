//! Engine wiring and the serve loop.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

use gatehouse_auth::cache::ExpiringCache;
use gatehouse_auth::ciba::{
    CibaFlowController, CibaNotifier, CibaValidator, HttpCallbackTransport, HttpUriListFetcher,
};
use gatehouse_auth::error::AuthError;
use gatehouse_auth::events::{DynEventSink, TracingEventSink};
use gatehouse_auth::grant::GrantRegistry;
use gatehouse_auth::http::{HttpState, router};
use gatehouse_auth::notificator::{ExpId, ExpirationListener, ExpirationNotificator};
use gatehouse_auth::token::TokenService;
use gatehouse_auth::types::{DynClientDirectory, InMemoryClientDirectory};
use gatehouse_config::AppConfig;
use gatehouse_storage::{DynEntryStore, InMemoryEntryStore};

/// Long-lived engine components the binary owns.
///
/// [`init`](Self::init) wires everything and starts the background loops;
/// [`shutdown`](Self::shutdown) stops them after the listener drains.
pub struct AppState {
    router: axum::Router,
    cache: Arc<ExpiringCache<ExpId, ()>>,
    notificator: Arc<ExpirationNotificator>,
}

impl AppState {
    /// Wires the engine from the loaded configuration and starts the
    /// expiring cache and the expiration notificator.
    pub fn init(config: &AppConfig) -> Result<Self, AuthError> {
        let store: DynEntryStore = Arc::new(InMemoryEntryStore::new());
        let registry = Arc::new(GrantRegistry::new(Arc::clone(&store)));
        let clients: DynClientDirectory = Arc::new(InMemoryClientDirectory::new());
        let events: DynEventSink = Arc::new(TracingEventSink);

        let tokens = Arc::new(TokenService::new(
            Arc::clone(&registry),
            Arc::clone(&clients),
            config.tokens.clone(),
            config.server.issuer.clone(),
        ));

        let fetcher = HttpUriListFetcher::new(config.ciba.callback_timeout)?;
        let transport = HttpCallbackTransport::new(config.ciba.callback_timeout)?;
        let ciba = Arc::new(CibaFlowController::new(
            Arc::clone(&store),
            Arc::clone(&clients),
            Arc::clone(&tokens),
            CibaValidator::new(Arc::new(fetcher), config.ciba.clone()),
            CibaNotifier::new(Arc::new(transport)),
            Arc::clone(&events),
            config.ciba.clone(),
        ));

        let listener = ExpirationListener::new(
            Arc::clone(&store),
            Arc::clone(&registry),
            Arc::clone(&ciba),
            events,
        );
        let cache = Arc::new(ExpiringCache::new(
            config.cache.max_size,
            Duration::from_millis(config.cache.sweep_interval_ms),
            Arc::new(listener),
        ));
        cache.start();

        let notificator = Arc::new(ExpirationNotificator::new(
            store,
            Arc::clone(&cache),
            config.notificator.clone(),
        ));
        notificator.start();

        let router = router(HttpState {
            tokens,
            ciba,
            clientinfo_enabled: config.server.clientinfo_enabled,
        });

        Ok(Self {
            router,
            cache,
            notificator,
        })
    }

    /// Stops the background loops and waits for them to finish.
    pub async fn shutdown(&self) {
        self.notificator.shutdown().await;
        self.cache.shutdown().await;
        info!("Background tasks stopped");
    }
}

/// Binds the configured address and serves until ctrl-c.
pub async fn run(config: &AppConfig, state: &AppState) -> std::io::Result<()> {
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(address = %addr, issuer = %config.server.issuer, "Gatehouse listening");

    axum::serve(listener, state.router.clone())
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "Failed to install ctrl-c handler");
    }
    info!("Shutdown signal received");
}
