pub mod controller;
pub mod state;

use async_trait::async_trait;
use serde_json::Value;

use crate::api::ApiError;
use crate::models::RemoteSession;

pub use controller::{CaptureSources, SessionSynchronizer, SyncSettings};
pub use state::{reconcile, SyncPhase, Transition};

/// Backend operations the synchronizer depends on.
#[async_trait]
pub trait SessionApi: Send + Sync {
    /// The active session, or `None` when the server reports none.
    async fn current_session(&self) -> Result<Option<RemoteSession>, ApiError>;

    /// Raw allowlist entries; malformed ones are dropped by `RuleSet::from_wire`.
    async fn active_rules(&self) -> Result<Vec<Value>, ApiError>;

    async fn reauthenticate(&self) -> Result<(), ApiError>;

    async fn stop_session(&self) -> Result<(), ApiError>;
}
