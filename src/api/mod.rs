use async_trait::async_trait;
use serde_json::Value;

use crate::core::errors::FetchError;
use crate::core::session::Session;

pub mod client;

pub use client::HttpBackend;

/// Read endpoints of the scan platform that the dashboard pipeline consumes.
///
/// Records come back raw; shaping them is the normalizer's job. Scope
/// enforcement happens server-side, so each method maps to exactly one
/// endpoint and the caller decides which one applies.
#[async_trait]
pub trait Backend: Send + Sync {
    /// `GET /tasks`: the caller's own tasks.
    async fn list_own_tasks(&self, session: &Session) -> Result<Vec<Value>, FetchError>;

    /// `GET /admin/tasks`: every user's tasks.
    async fn list_all_tasks(&self, session: &Session) -> Result<Vec<Value>, FetchError>;

    /// `GET /admin/results`: every finding in the system.
    async fn list_all_findings(&self, session: &Session) -> Result<Vec<Value>, FetchError>;

    /// `GET /results/task/{id}`: findings of one task.
    async fn list_task_findings(&self, session: &Session, task_id: u64) -> Result<Vec<Value>, FetchError>;
}
