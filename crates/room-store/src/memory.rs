use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::{
    Change, Entry, KeyPath, ParticipantIdentity, RoomStore, SetOptions, StoreError, StoreResult,
    Subscription, SubscriptionId, WriteContext,
};

#[derive(Debug)]
enum Fault {
    Identity(String),
    Get(KeyPath),
    Set(KeyPath),
}

struct Subscriber {
    key: KeyPath,
    sender: mpsc::UnboundedSender<Change>,
}

struct RoomState {
    tree: Value,
    writers: HashMap<KeyPath, String>,
    subscribers: HashMap<SubscriptionId, Subscriber>,
    next_subscription: u64,
    faults: Vec<(Fault, StoreError)>,
}

impl Default for RoomState {
    fn default() -> Self {
        Self {
            tree: Value::Object(Map::new()),
            writers: HashMap::new(),
            subscribers: HashMap::new(),
            next_subscription: 1,
            faults: Vec::new(),
        }
    }
}

impl RoomState {
    fn take_fault(&mut self, matches: impl Fn(&Fault) -> bool) -> Option<StoreError> {
        let index = self.faults.iter().position(|(fault, _)| matches(fault))?;
        Some(self.faults.remove(index).1)
    }

    fn value_at(&self, key: &KeyPath) -> Option<&Value> {
        let mut node = &self.tree;
        for segment in key.segments() {
            node = node.as_object()?.get(segment)?;
        }
        (!node.is_null()).then_some(node)
    }

    /// Last writer of `key`, falling back to whoever wrote an enclosing key.
    fn writer_of(&self, key: &KeyPath) -> Option<WriteContext> {
        let segments: Vec<&str> = key.segments().collect();
        for depth in (0..=segments.len()).rev() {
            let candidate = if depth == 0 {
                KeyPath::root()
            } else {
                KeyPath::new(format!("/{}", segments[..depth].join("/"))).ok()?
            };
            if let Some(user_id) = self.writers.get(&candidate) {
                return Some(WriteContext {
                    key: candidate,
                    user_id: user_id.clone(),
                });
            }
        }
        None
    }

    fn write(&mut self, key: &KeyPath, value: Value, user_id: &str) {
        let segments: Vec<&str> = key.segments().collect();
        match segments.split_last() {
            None => self.tree = value,
            Some((last, parents)) => {
                let mut node = &mut self.tree;
                for segment in parents {
                    node = child_object(node).entry(*segment).or_insert(Value::Null);
                }
                child_object(node).insert((*last).to_string(), value);
            }
        }

        let nested_prefix = if key.is_root() {
            "/".to_string()
        } else {
            format!("{key}/")
        };
        self.writers
            .retain(|path, _| !path.as_str().starts_with(&nested_prefix));
        self.writers.insert(key.clone(), user_id.to_string());
    }

    fn notify(&mut self, change: &Change) {
        self.subscribers.retain(|id, subscriber| {
            if subscriber.key != change.key {
                return true;
            }
            let delivered = subscriber.sender.send(change.clone()).is_ok();
            if !delivered {
                trace!(target = "room_store", subscription = id.0, "dropping closed subscriber");
            }
            delivered
        });
    }
}

fn child_object(node: &mut Value) -> &mut Map<String, Value> {
    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    match node {
        Value::Object(map) => map,
        _ => unreachable!("node was just replaced with an object"),
    }
}

/// In-memory replicated room shared by every joined participant.
///
/// All participant handles operate on one tree guarded by a single lock, so
/// create-only writes are atomic room-wide.
#[derive(Clone, Default)]
pub struct MemoryRoomServer {
    state: Arc<Mutex<RoomState>>,
}

impl MemoryRoomServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connects a participant; writes through the handle are attributed to `identity`.
    pub fn join(&self, identity: ParticipantIdentity) -> MemoryRoom {
        debug!(target = "room_store", participant = %identity.id, "participant joined room");
        MemoryRoom {
            server: self.clone(),
            identity,
        }
    }

    pub fn value(&self, key: &KeyPath) -> Option<Value> {
        self.state.lock().value_at(key).cloned()
    }

    pub fn last_writer(&self, key: &KeyPath) -> Option<String> {
        self.state.lock().writers.get(key).cloned()
    }

    pub fn subscriber_count(&self, key: &KeyPath) -> usize {
        self.state
            .lock()
            .subscribers
            .values()
            .filter(|subscriber| &subscriber.key == key)
            .count()
    }

    /// Fails the next identity lookup made by `user_id`.
    pub fn fail_next_identity(&self, user_id: impl Into<String>, error: StoreError) {
        self.state
            .lock()
            .faults
            .push((Fault::Identity(user_id.into()), error));
    }

    /// Fails the next read of exactly `key`, whoever performs it.
    pub fn fail_next_get(&self, key: &KeyPath, error: StoreError) {
        self.state.lock().faults.push((Fault::Get(key.clone()), error));
    }

    /// Fails the next write of exactly `key`, whoever performs it.
    pub fn fail_next_set(&self, key: &KeyPath, error: StoreError) {
        self.state.lock().faults.push((Fault::Set(key.clone()), error));
    }
}

/// One participant's connection to a [`MemoryRoomServer`].
#[derive(Clone)]
pub struct MemoryRoom {
    server: MemoryRoomServer,
    identity: ParticipantIdentity,
}

impl MemoryRoom {
    pub fn server(&self) -> &MemoryRoomServer {
        &self.server
    }
}

#[async_trait]
impl RoomStore for MemoryRoom {
    async fn identity(&self) -> StoreResult<ParticipantIdentity> {
        let mut state = self.server.state.lock();
        let user_id = self.identity.id.as_str();
        if let Some(err) =
            state.take_fault(|fault| matches!(fault, Fault::Identity(id) if id == user_id))
        {
            return Err(err);
        }
        Ok(self.identity.clone())
    }

    async fn get(&self, key: &KeyPath) -> StoreResult<Entry> {
        let mut state = self.server.state.lock();
        if let Some(err) = state.take_fault(|fault| matches!(fault, Fault::Get(k) if k == key)) {
            return Err(err);
        }
        Ok(Entry {
            value: state.value_at(key).cloned(),
            context: state.writer_of(key),
        })
    }

    async fn set(
        &self,
        key: &KeyPath,
        value: Value,
        options: SetOptions,
    ) -> StoreResult<WriteContext> {
        let mut state = self.server.state.lock();
        if let Some(err) = state.take_fault(|fault| matches!(fault, Fault::Set(k) if k == key)) {
            return Err(err);
        }
        if !options.overwrite && state.value_at(key).is_some() {
            let context = state.writer_of(key).unwrap_or_else(|| WriteContext {
                key: key.clone(),
                user_id: String::new(),
            });
            debug!(
                target = "room_store",
                key = %key,
                writer = %self.identity.id,
                holder = %context.user_id,
                "create-only write collided"
            );
            return Err(StoreError::Collision {
                key: key.clone(),
                context,
            });
        }

        state.write(key, value.clone(), &self.identity.id);
        let context = WriteContext {
            key: key.clone(),
            user_id: self.identity.id.clone(),
        };
        trace!(target = "room_store", key = %key, writer = %context.user_id, "value written");
        state.notify(&Change {
            key: key.clone(),
            value,
            context: context.clone(),
        });
        Ok(context)
    }

    async fn subscribe(&self, key: &KeyPath) -> StoreResult<Subscription> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let mut state = self.server.state.lock();
        let id = SubscriptionId(state.next_subscription);
        state.next_subscription += 1;
        state.subscribers.insert(
            id,
            Subscriber {
                key: key.clone(),
                sender,
            },
        );
        Ok(Subscription::new(id, key.clone(), receiver))
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> StoreResult<()> {
        self.server.state.lock().subscribers.remove(&id);
        Ok(())
    }
}
