//! Client contract for a room's replicated key-value namespace.
//!
//! Every participant in a collaborative session talks to the same shared
//! tree through a [`RoomStore`] handle. The store is the only arbiter of
//! concurrent writes: a create-only [`RoomStore::set`] succeeds for exactly
//! one writer room-wide and reports a [`StoreError::Collision`] to the rest.

mod memory;
mod path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;

pub use memory::{MemoryRoom, MemoryRoomServer};
pub use path::KeyPath;

/// Participant as known to the session platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantIdentity {
    pub id: String,
    #[serde(default)]
    pub display_name: String,
}

impl ParticipantIdentity {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
        }
    }
}

/// Metadata describing who wrote a value and where.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteContext {
    pub key: KeyPath,
    pub user_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetOptions {
    pub overwrite: bool,
}

impl SetOptions {
    /// Conditional create: fail with a collision if the key already holds a value.
    pub fn create_only() -> Self {
        Self { overwrite: false }
    }
}

impl Default for SetOptions {
    fn default() -> Self {
        Self { overwrite: true }
    }
}

/// Result of a read. `context` names the last writer of the exact key, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub value: Option<Value>,
    pub context: Option<WriteContext>,
}

/// One write observed through a subscription.
#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    pub key: KeyPath,
    pub value: Value,
    pub context: WriteContext,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

/// Live registration for writes at one key.
///
/// The handle stays registered until it is passed back to
/// [`RoomStore::unsubscribe`]; dropping the receiver alone only stops delivery.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    key: KeyPath,
    receiver: mpsc::UnboundedReceiver<Change>,
}

impl Subscription {
    pub fn new(
        id: SubscriptionId,
        key: KeyPath,
        receiver: mpsc::UnboundedReceiver<Change>,
    ) -> Self {
        Self { id, key, receiver }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn key(&self) -> &KeyPath {
        &self.key
    }

    /// Next change in write order; `None` once the store released the subscription.
    pub async fn recv(&mut self) -> Option<Change> {
        self.receiver.recv().await
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum StoreError {
    #[error("key {key} already holds a value written by {}", .context.user_id)]
    Collision { key: KeyPath, context: WriteContext },
    #[error("invalid key: {0}")]
    InvalidKey(String),
    #[error("store transport error: {0}")]
    Transport(String),
    #[error("store connection closed")]
    Closed,
}

impl StoreError {
    pub fn is_collision(&self) -> bool {
        matches!(self, StoreError::Collision { .. })
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait RoomStore: Send + Sync {
    /// Identity of the participant this handle writes as.
    async fn identity(&self) -> StoreResult<ParticipantIdentity>;

    async fn get(&self, key: &KeyPath) -> StoreResult<Entry>;

    async fn set(&self, key: &KeyPath, value: Value, options: SetOptions)
        -> StoreResult<WriteContext>;

    async fn subscribe(&self, key: &KeyPath) -> StoreResult<Subscription>;

    async fn unsubscribe(&self, id: SubscriptionId) -> StoreResult<()>;
}
