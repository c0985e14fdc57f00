use std::sync::Arc;

use tracing::{error, warn};

use parley_db::Database;
use parley_types::models::Identity;

use crate::config::ChatConfig;
use crate::error::ChatError;
use crate::permissions::PermissionMatrix;
use crate::registry::ConnectionRegistry;

/// The chat core: everything a connection task, a REST handler or one of
/// the background loops needs, behind one cheaply cloneable handle.
///
/// Operations are spread over several modules:
/// `pipeline` (conversations, messages, fan-out), `signals` (presence,
/// typing, read receipts), `sweeper` and `heartbeat`.
#[derive(Clone)]
pub struct ChatService {
    inner: Arc<ServiceInner>,
}

struct ServiceInner {
    db: Arc<Database>,
    registry: ConnectionRegistry,
    permissions: PermissionMatrix,
    config: ChatConfig,
}

impl ChatService {
    /// Builds the service and loads the permission matrix from the store.
    pub fn new(db: Arc<Database>, config: ChatConfig) -> anyhow::Result<Self> {
        let permissions = PermissionMatrix::from_rules(db.load_permissions()?);
        let registry = ConnectionRegistry::new(config.outbound_buffer);

        Ok(Self {
            inner: Arc::new(ServiceInner {
                db,
                registry,
                permissions,
                config,
            }),
        })
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.inner.registry
    }

    pub fn permissions(&self) -> &PermissionMatrix {
        &self.inner.permissions
    }

    pub fn config(&self) -> &ChatConfig {
        &self.inner.config
    }

    /// Run a blocking store call off the async runtime.
    pub(crate) async fn db<F, T>(&self, f: F) -> Result<T, ChatError>
    where
        F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.inner.db.clone();
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| {
                error!("spawn_blocking join error: {}", e);
                ChatError::Persistence(anyhow::anyhow!("store task failed: {}", e))
            })?
            .map_err(|e| {
                error!("Store error: {:#}", e);
                ChatError::Persistence(e)
            })
    }

    /// Record a verified identity in the tenant's user directory. A user id
    /// already owned by another tenant is refused.
    pub async fn touch_identity(&self, identity: &Identity) -> Result<(), ChatError> {
        let record = identity.clone();
        let accepted = self
            .db(move |db| db.upsert_user(&record, chrono::Utc::now()))
            .await?;
        if !accepted {
            warn!(
                "{} ({}) presented tenant {} but is registered elsewhere",
                identity.username, identity.user_id, identity.tenant_id
            );
            return Err(ChatError::AuthFailure);
        }
        Ok(())
    }
}
