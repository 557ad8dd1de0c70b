//! Client lookup seam.
//!
//! Registration CRUD lives outside the engine; the engine only needs to
//! resolve a `client_id` to its registered metadata. Production wiring can
//! back this with any registry; tests and the default server use the
//! in-memory implementation.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::AuthError;
use crate::types::client::Client;

/// Resolves registered client metadata.
#[async_trait]
pub trait ClientDirectory: Send + Sync {
    /// Finds a client by identifier. Unknown clients are `None`, not an
    /// error.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing registry fails.
    async fn find_client(&self, client_id: &str) -> Result<Option<Client>, AuthError>;
}

/// Shared trait object for client resolution.
pub type DynClientDirectory = Arc<dyn ClientDirectory>;

/// In-memory client directory.
#[derive(Default)]
pub struct InMemoryClientDirectory {
    clients: RwLock<HashMap<String, Client>>,
}

impl InMemoryClientDirectory {
    /// Creates an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers or replaces a client.
    pub async fn insert(&self, client: Client) {
        self.clients
            .write()
            .await
            .insert(client.client_id.clone(), client);
    }
}

#[async_trait]
impl ClientDirectory for InMemoryClientDirectory {
    async fn find_client(&self, client_id: &str) -> Result<Option<Client>, AuthError> {
        Ok(self.clients.read().await.get(client_id).cloned())
    }
}
