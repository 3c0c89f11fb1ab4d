//! Contract with the orchestration service: request/response shapes and the
//! seams the controller talks through.

pub mod http;
pub mod push;

use crate::error::RemoteError;
use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeSet;
use std::fmt;

pub use http::HttpRemote;
pub use push::{PushChannel, PushEvent, PushMessage, PushSubscription, SsePushChannel};

/// Treat an explicit `null` like a missing field.
pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Deploy,
    Add,
    Remove,
    Delete,
}

impl ActionKind {
    pub fn endpoint(&self) -> &'static str {
        match self {
            Self::Deploy => "/platform/deploy",
            Self::Add => "/platform/add",
            Self::Remove => "/platform/remove",
            Self::Delete => "/platform/delete",
        }
    }

    /// Status text shown while the start call is in flight.
    pub fn starting_text(&self) -> &'static str {
        match self {
            Self::Deploy => "Deploying platform...",
            Self::Add => "Adding applications...",
            Self::Remove => "Removing applications...",
            Self::Delete => "Deleting entire platform...",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Deploy => "Deploy",
            Self::Add => "Add",
            Self::Remove => "Remove",
            Self::Delete => "Delete",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeployBody {
    pub apps: Vec<String>,
    pub branch: String,
    pub namespace: String,
    pub user_email: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct AppsBody {
    pub apps: Vec<String>,
    pub branch: String,
    pub namespace: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeleteBody {
    pub branch: String,
    pub namespace: String,
}

/// One of the four start calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationRequest {
    Deploy(DeployBody),
    Add(AppsBody),
    Remove(AppsBody),
    Delete(DeleteBody),
}

impl OperationRequest {
    pub fn kind(&self) -> ActionKind {
        match self {
            Self::Deploy(_) => ActionKind::Deploy,
            Self::Add(_) => ActionKind::Add,
            Self::Remove(_) => ActionKind::Remove,
            Self::Delete(_) => ActionKind::Delete,
        }
    }

    pub fn body(&self) -> serde_json::Result<serde_json::Value> {
        match self {
            Self::Deploy(b) => serde_json::to_value(b),
            Self::Add(b) | Self::Remove(b) => serde_json::to_value(b),
            Self::Delete(b) => serde_json::to_value(b),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct StartResponse {
    pub operation: String,
    #[serde(default)]
    pub namespace_name: Option<String>,
    #[serde(default)]
    pub added: Option<Vec<String>>,
    #[serde(default)]
    pub removed: Option<Vec<String>>,
}

impl StartResponse {
    /// Status text once the backend accepted the operation.
    pub fn accepted_text(&self, kind: ActionKind) -> String {
        match kind {
            ActionKind::Deploy => format!(
                "Platform deployment started. Operation: {}",
                self.operation
            ),
            ActionKind::Add => format!(
                "Adding apps: {}. Operation: {}",
                self.added.as_deref().unwrap_or_default().join(", "),
                self.operation
            ),
            ActionKind::Remove => format!(
                "Removing apps: {}. Operation: {}",
                self.removed.as_deref().unwrap_or_default().join(", "),
                self.operation
            ),
            ActionKind::Delete => format!(
                "Platform deletion started. Operation: {}",
                self.operation
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RemoteStep {
    #[serde(default, deserialize_with = "null_as_default")]
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub status: String,
}

/// Body of `GET /status?operation=<id>`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct StatusResponse {
    #[serde(default, deserialize_with = "null_as_default")]
    pub done: bool,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub steps: Option<Vec<RemoteStep>>,
    #[serde(default)]
    pub events: Option<Vec<String>>,
    /// Locator of the full build log, not the log text itself.
    #[serde(default)]
    pub logs: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformRecord {
    #[serde(default, deserialize_with = "null_as_default")]
    pub id: String,
    #[serde(rename = "namespace_name", default, deserialize_with = "null_as_default")]
    pub namespace: String,
    #[serde(rename = "deployed_apps", default, deserialize_with = "null_as_default")]
    pub deployed_application_ids: BTreeSet<String>,
    #[serde(rename = "user_email", default, deserialize_with = "null_as_default")]
    pub owner_email: String,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(rename = "last_modified", default)]
    pub last_modified_at: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub status: String,
}

impl PlatformRecord {
    /// Namespace to target next; the backend sometimes only fills `id`.
    pub fn effective_namespace(&self) -> &str {
        if self.namespace.trim().is_empty() {
            &self.id
        } else {
            &self.namespace
        }
    }
}

#[async_trait]
pub trait RemoteService: Send + Sync {
    async fn start_operation(
        &self,
        request: &OperationRequest,
    ) -> Result<StartResponse, RemoteError>;

    async fn operation_status(&self, operation_id: &str) -> Result<StatusResponse, RemoteError>;

    /// `None` asks for the caller's default platform.
    async fn platform(&self, namespace: Option<&str>) -> Result<PlatformRecord, RemoteError>;

    async fn platforms(&self) -> Result<Vec<PlatformRecord>, RemoteError>;
}
