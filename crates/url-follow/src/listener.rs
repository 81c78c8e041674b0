use std::sync::Arc;

use room_store::{RoomStore, Subscription, WriteContext};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::origin::is_cross_origin;
use crate::{Document, FatalError, Namespace};

/// What the listener did about one version-pointer write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenerOutcome {
    /// Written by this participant; nothing to catch up on.
    IgnoredSelf,
    /// Announced url is the current one, so the page was reloaded in place.
    Reloaded { version: u64 },
    Navigated { version: u64, url: String },
}

/// Reacts to room version changes made by other participants.
#[derive(Clone)]
pub struct VersionListener {
    room: Arc<dyn RoomStore>,
    document: Arc<dyn Document>,
    namespace: Namespace,
    participant_id: String,
}

impl VersionListener {
    pub fn new(
        room: Arc<dyn RoomStore>,
        document: Arc<dyn Document>,
        namespace: Namespace,
        participant_id: impl Into<String>,
    ) -> Self {
        Self {
            room,
            document,
            namespace,
            participant_id: participant_id.into(),
        }
    }

    pub async fn handle_change(
        &self,
        value: &Value,
        context: &WriteContext,
    ) -> Result<ListenerOutcome, FatalError> {
        if context.user_id == self.participant_id {
            return Ok(ListenerOutcome::IgnoredSelf);
        }

        let version = value
            .as_u64()
            .ok_or_else(|| FatalError::MalformedVersion(value.clone()))?;
        let url_key = self
            .namespace
            .url_for(version)
            .map_err(|_| FatalError::MalformedVersion(value.clone()))?;
        let entry = self
            .room
            .get(&url_key)
            .await
            .map_err(|source| FatalError::Store { version, source })?;
        let Some(Value::String(url)) = entry.value else {
            return Err(FatalError::MissingUrl { version });
        };

        let current = self.document.location();
        if is_cross_origin(&current, &url) {
            return Err(FatalError::CrossOrigin { url });
        }

        if url == current {
            info!(
                target = "url_follow",
                participant = %self.participant_id,
                leader = %context.user_id,
                version,
                "room moved to the current url; reloading"
            );
            self.document.reload();
            Ok(ListenerOutcome::Reloaded { version })
        } else {
            info!(
                target = "url_follow",
                participant = %self.participant_id,
                leader = %context.user_id,
                version,
                url = %url,
                "following room to new url"
            );
            self.document.navigate(&url);
            Ok(ListenerOutcome::Navigated { version, url })
        }
    }

    /// Drains `subscription` in write order until it closes or a fatal error occurs.
    pub(crate) async fn run(
        self,
        mut subscription: Subscription,
        fatal: mpsc::UnboundedSender<FatalError>,
    ) {
        while let Some(change) = subscription.recv().await {
            match self.handle_change(&change.value, &change.context).await {
                Ok(outcome) => debug!(
                    target = "url_follow",
                    participant = %self.participant_id,
                    ?outcome,
                    "room version change handled"
                ),
                Err(err) => {
                    error!(
                        target = "url_follow",
                        participant = %self.participant_id,
                        writer = %change.context.user_id,
                        error = %err,
                        "room version listener failed; session cannot continue"
                    );
                    let _ = fatal.send(err);
                    return;
                }
            }
        }
        debug!(
            target = "url_follow",
            participant = %self.participant_id,
            subscription = subscription.id().0,
            "room version subscription closed"
        );
    }
}
