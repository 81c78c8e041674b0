use std::sync::Arc;

use parking_lot::Mutex;
use room_store::{
    KeyPath, ParticipantIdentity, RoomStore, SetOptions, StoreError, SubscriptionId,
};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::listener::VersionListener;
use crate::origin::is_cross_origin;
use crate::snapshot::NamespaceSnapshot;
use crate::{Document, FatalError, FollowConfig, FollowError, Namespace};

/// Where a coordinator is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowerPhase {
    Uninitialized,
    /// Fetching room state and running the leader or follower protocol.
    Bootstrapping,
    /// Sent to the agreed url; the next page load starts over with a new coordinator.
    CatchingUp,
    /// In sync and listening for version changes.
    Subscribed,
    TornDown,
}

struct ActiveListener {
    subscription: SubscriptionId,
    task: JoinHandle<()>,
}

struct FollowerState {
    phase: FollowerPhase,
    participant: Option<ParticipantIdentity>,
    room_version: u64,
    listener: Option<ActiveListener>,
}

/// Room state gathered by bootstrap and handed to the leader or follower protocol.
struct Bootstrap {
    participant: ParticipantIdentity,
    participant_key: KeyPath,
    snapshot: NamespaceSnapshot,
}

impl Bootstrap {
    fn agreed_url(&self, version: u64) -> Result<&str, FollowError> {
        self.snapshot.url_at(version).ok_or_else(|| {
            FollowError::MalformedSnapshot(format!("no url recorded for version {version}"))
        })
    }
}

/// Keeps one participant's page on the url the room agreed on.
///
/// A participant whose recorded version matches the room's arrived by its
/// own navigation and publishes its page as the next version. Everyone else
/// is sent to the agreed page, then listens for later versions.
pub struct UrlFollower {
    room: Arc<dyn RoomStore>,
    document: Arc<dyn Document>,
    namespace: Namespace,
    state: Mutex<FollowerState>,
    fatal_tx: mpsc::UnboundedSender<FatalError>,
    fatal_rx: Mutex<Option<mpsc::UnboundedReceiver<FatalError>>>,
}

impl UrlFollower {
    pub fn new(
        room: Arc<dyn RoomStore>,
        document: Arc<dyn Document>,
        config: &FollowConfig,
    ) -> Result<Self, FollowError> {
        let namespace = config.namespace()?;
        let (fatal_tx, fatal_rx) = mpsc::unbounded_channel();
        Ok(Self {
            room,
            document,
            namespace,
            state: Mutex::new(FollowerState {
                phase: FollowerPhase::Uninitialized,
                participant: None,
                room_version: 0,
                listener: None,
            }),
            fatal_tx,
            fatal_rx: Mutex::new(Some(fatal_rx)),
        })
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    pub fn phase(&self) -> FollowerPhase {
        self.state.lock().phase
    }

    /// Identity fetched during bootstrap, once it passed validation.
    pub fn participant(&self) -> Option<ParticipantIdentity> {
        self.state.lock().participant.clone()
    }

    /// Receiver for listener failures. Only the first caller gets it.
    pub fn take_fatal_errors(&self) -> Option<mpsc::UnboundedReceiver<FatalError>> {
        self.fatal_rx.lock().take()
    }

    pub fn room_version(&self) -> Result<u64, FollowError> {
        let state = self.state.lock();
        if state.phase != FollowerPhase::Subscribed {
            return Err(FollowError::NotInitialized);
        }
        Ok(state.room_version)
    }

    pub async fn initialize(&self) -> Result<(), FollowError> {
        {
            let mut state = self.state.lock();
            match state.phase {
                FollowerPhase::Uninitialized | FollowerPhase::TornDown => {
                    state.phase = FollowerPhase::Bootstrapping;
                }
                _ => return Err(FollowError::AlreadyInitialized),
            }
        }
        debug!(target = "url_follow", namespace = %self.namespace.root(), "bootstrapping");

        let result = self.bootstrap().await;
        if let Err(err) = &result {
            warn!(target = "url_follow", error = %err, "url follower initialization failed");
            self.state.lock().phase = FollowerPhase::Uninitialized;
        }
        result
    }

    pub async fn destroy(&self) -> Result<(), FollowError> {
        let listener = {
            let mut state = self.state.lock();
            if state.phase != FollowerPhase::Subscribed {
                return Err(FollowError::NotInitialized);
            }
            state.phase = FollowerPhase::TornDown;
            state.listener.take()
        };
        if let Some(listener) = listener {
            listener.task.abort();
            self.room.unsubscribe(listener.subscription).await?;
        }
        debug!(target = "url_follow", "url follower torn down");
        Ok(())
    }

    async fn bootstrap(&self) -> Result<(), FollowError> {
        let (participant, entry) =
            tokio::try_join!(self.room.identity(), self.room.get(self.namespace.root()))?;

        if participant.id.trim().is_empty() {
            return Err(FollowError::MissingParticipantId);
        }
        let participant_key = self.namespace.participant_version(&participant.id)?;
        let mut snapshot = NamespaceSnapshot::from_value(entry.value)?;
        snapshot.seed(&participant.id, &self.document.location());

        let bootstrap = Bootstrap {
            participant,
            participant_key,
            snapshot,
        };
        let room_version = bootstrap.snapshot.version();
        let room_url = bootstrap.agreed_url(room_version)?;
        if is_cross_origin(&self.document.location(), room_url) {
            return Err(FollowError::CrossOriginDenied {
                url: room_url.to_string(),
            });
        }

        {
            let mut state = self.state.lock();
            state.participant = Some(bootstrap.participant.clone());
            state.room_version = room_version;
        }

        if bootstrap.snapshot.participant_version(&bootstrap.participant.id) == Some(room_version)
        {
            self.lead(&bootstrap).await
        } else {
            self.follow(&bootstrap).await
        }
    }

    async fn lead(&self, bootstrap: &Bootstrap) -> Result<(), FollowError> {
        let participant_id = bootstrap.participant.id.as_str();
        let previous = bootstrap.snapshot.version();
        let new_version = previous + 1;
        let location = self.document.location();

        let url_key = self.namespace.url_for(new_version)?;
        match self
            .room
            .set(&url_key, Value::String(location.clone()), SetOptions::create_only())
            .await
        {
            Ok(_) => {}
            Err(StoreError::Collision { context, .. }) if context.user_id != participant_id => {
                let agreed = bootstrap.agreed_url(previous)?;
                info!(
                    target = "url_follow",
                    participant = %participant_id,
                    winner = %context.user_id,
                    version = new_version,
                    url = %agreed,
                    "lost leadership race; following previous room url"
                );
                self.document.navigate(agreed);
                self.state.lock().phase = FollowerPhase::CatchingUp;
                return Ok(());
            }
            Err(StoreError::Collision { .. }) => {
                debug!(
                    target = "url_follow",
                    participant = %participant_id,
                    version = new_version,
                    "version url already written by this participant"
                );
            }
            Err(err) => return Err(err.into()),
        }

        // The room pointer must land before the personal one.
        self.room
            .set(self.namespace.version(), json!(new_version), SetOptions::default())
            .await?;
        self.room
            .set(&bootstrap.participant_key, json!(new_version), SetOptions::default())
            .await?;

        info!(
            target = "url_follow",
            participant = %participant_id,
            version = new_version,
            url = %location,
            "leading room"
        );
        self.subscribe(participant_id, new_version).await
    }

    async fn follow(&self, bootstrap: &Bootstrap) -> Result<(), FollowError> {
        let participant_id = bootstrap.participant.id.as_str();
        let version = bootstrap.snapshot.version();
        let agreed = bootstrap.agreed_url(version)?;

        if self.document.location() != agreed {
            info!(
                target = "url_follow",
                participant = %participant_id,
                version,
                url = %agreed,
                "behind the room; navigating to agreed url"
            );
            self.document.navigate(agreed);
            self.state.lock().phase = FollowerPhase::CatchingUp;
            return Ok(());
        }

        self.room
            .set(&bootstrap.participant_key, json!(version), SetOptions::default())
            .await?;
        info!(target = "url_follow", participant = %participant_id, version, "following room");
        self.subscribe(participant_id, version).await
    }

    async fn subscribe(&self, participant_id: &str, room_version: u64) -> Result<(), FollowError> {
        let subscription = self.room.subscribe(self.namespace.version()).await?;
        let listener = VersionListener::new(
            self.room.clone(),
            self.document.clone(),
            self.namespace.clone(),
            participant_id,
        );
        let id = subscription.id();
        let task = tokio::spawn(listener.run(subscription, self.fatal_tx.clone()));

        let mut state = self.state.lock();
        state.room_version = room_version;
        state.listener = Some(ActiveListener {
            subscription: id,
            task,
        });
        state.phase = FollowerPhase::Subscribed;
        Ok(())
    }
}

impl Drop for UrlFollower {
    fn drop(&mut self) {
        if let Some(listener) = self.state.get_mut().listener.take() {
            warn!(
                target = "url_follow",
                subscription = listener.subscription.0,
                "url follower dropped without destroy; stopping listener"
            );
            listener.task.abort();
        }
    }
}
