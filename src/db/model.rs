//! Database entity and view models used by repositories.
//!
//! Keep these structs focused on the data returned by queries. Business logic
//! should live in higher layers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A tracked social-media account.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handle {
    pub id: i64,
    /// Canonical form: lowercase, no leading '@'.
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A subscriber endpoint (chat) that receives notifications.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Watcher {
    pub id: i64,
    pub chat_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A handle together with every watcher subscribed to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandleWithWatchers {
    #[serde(flatten)]
    pub handle: Handle,
    pub watchers: Vec<Watcher>,
}

/// A watcher together with every handle it is subscribed to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherWithHandles {
    #[serde(flatten)]
    pub watcher: Watcher,
    pub handles: Vec<Handle>,
}
