//! Shared wiring for handler tests.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use gatehouse_config::{CibaConfig, TokenConfig};
use gatehouse_storage::{DynEntryStore, InMemoryEntryStore};

use crate::ciba::{
    CallbackTransport, CibaFlowController, CibaNotifier, CibaValidator, UriListFetcher,
};
use crate::error::AuthResult;
use crate::events::TracingEventSink;
use crate::grant::{Grant, GrantRegistry};
use crate::http::HttpState;
use crate::token::TokenService;
use crate::types::{Client, GrantType, InMemoryClientDirectory};

struct StubFetcher;

#[async_trait]
impl UriListFetcher for StubFetcher {
    async fn fetch_uri_list(&self, _uri: &str) -> AuthResult<Vec<String>> {
        Ok(vec![])
    }
}

struct StubTransport;

#[async_trait]
impl CallbackTransport for StubTransport {
    async fn post_json(
        &self,
        _endpoint: &str,
        _bearer: &str,
        _body: serde_json::Value,
    ) -> AuthResult<u16> {
        Ok(200)
    }
}

/// In-memory engine wired for handler tests: one registered client
/// ("app-1") with a code-flow registration.
pub async fn engine(clientinfo_enabled: bool) -> (HttpState, Arc<TokenService>) {
    let store: DynEntryStore = Arc::new(InMemoryEntryStore::new());
    let registry = Arc::new(GrantRegistry::new(Arc::clone(&store)));

    let mut client = Client::new("app-1", "Test App");
    client.redirect_uris = vec!["https://app.example.com/cb".to_string()];
    client.grant_types.push(GrantType::Ciba);
    let directory = InMemoryClientDirectory::new();
    directory.insert(client).await;
    let clients: Arc<InMemoryClientDirectory> = Arc::new(directory);

    let tokens = Arc::new(TokenService::new(
        registry,
        Arc::clone(&clients) as _,
        TokenConfig::default(),
        "https://op.example.com",
    ));
    let ciba = Arc::new(CibaFlowController::new(
        store,
        clients as _,
        Arc::clone(&tokens),
        CibaValidator::new(Arc::new(StubFetcher), CibaConfig::default()),
        CibaNotifier::new(Arc::new(StubTransport) as _),
        Arc::new(TracingEventSink),
        CibaConfig::default(),
    ));

    let state = HttpState {
        tokens: Arc::clone(&tokens),
        ciba,
        clientinfo_enabled,
    };
    (state, tokens)
}

fn seeded_grant() -> Grant {
    let scopes: BTreeSet<String> = ["openid".to_string(), "profile".to_string()].into();
    Grant::new(
        "app-1",
        GrantType::AuthorizationCode,
        Some("user-1".to_string()),
        scopes,
    )
    .with_redirect_uri("https://app.example.com/cb")
    .with_auth_time(time::OffsetDateTime::now_utc())
}

/// Creates a grant and issues an access token, returning its value.
pub async fn seeded_access_token(state: &HttpState) -> String {
    let grant = seeded_grant();
    let grant_id = grant.grant_id;
    state.tokens.registry().create_grant(grant).await.unwrap();
    state
        .tokens
        .issue_access_token(
            grant_id,
            vec!["openid".to_string(), "profile".to_string()],
        )
        .await
        .unwrap()
        .data
        .value
}

/// Creates a code-flow grant, returning the unconsumed code value.
pub async fn seeded_code_grant(state: &HttpState) -> String {
    let grant = seeded_grant().with_code(Duration::from_secs(600));
    let code = grant.code.as_ref().unwrap().value.clone();
    state.tokens.registry().create_grant(grant).await.unwrap();
    code
}
