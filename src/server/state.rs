//! Application state shared across handlers.

use crate::access::{self, AccessDecision, SUBSCRIPTION_MODE_KEY, SettingsReader};
use crate::auth::AuthService;
use crate::config::Config;
use crate::db::{Database, now_timestamp};
use crate::error::Result;
use crate::storage::ArtifactStore;
use std::sync::Arc;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<Config>,
    /// Database connection.
    pub db: Database,
    /// Authentication service.
    pub auth: Arc<AuthService>,
    /// Artifact file storage.
    pub store: Arc<ArtifactStore>,
}

impl AppState {
    /// Create new application state.
    pub fn new(config: Config, db: Database, auth: AuthService, store: ArtifactStore) -> Self {
        Self {
            config: Arc::new(config),
            db,
            auth: Arc::new(auth),
            store: Arc::new(store),
        }
    }

    /// Classify the caller for a page-list read. Reads the subscription-mode
    /// flag and the caller's latest subscription row fresh on every call;
    /// both can change between requests.
    pub fn evaluate_access(&self, caller_id: Option<&str>) -> Result<AccessDecision> {
        let mode_enabled = self.db.get_bool(SUBSCRIPTION_MODE_KEY)?;

        let subscription = match caller_id {
            Some(id) if mode_enabled => self.db.get_latest_subscription(id)?,
            _ => None,
        };

        Ok(access::evaluate(
            mode_enabled,
            caller_id,
            subscription.as_ref(),
            now_timestamp(),
        ))
    }
}
