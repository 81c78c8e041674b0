use room_store::StoreError;
use thiserror::Error;

/// Failures reported to the caller of [`UrlFollower`](crate::UrlFollower) operations.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum FollowError {
    #[error("url follower is already initialized")]
    AlreadyInitialized,
    #[error("url follower is not yet initialized")]
    NotInitialized,
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("participant identity is missing an id")]
    MissingParticipantId,
    #[error("malformed namespace snapshot: {0}")]
    MalformedSnapshot(String),
    #[error("cross-domain initialization denied for {url}")]
    CrossOriginDenied { url: String },
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl FollowError {
    /// Call-site mistakes, as opposed to runtime or store failures.
    pub fn is_misuse(&self) -> bool {
        matches!(
            self,
            FollowError::AlreadyInitialized
                | FollowError::NotInitialized
                | FollowError::InvalidArgument(_)
        )
    }
}

/// Conditions that end a participant's session from inside the change listener.
///
/// The listener has no caller to return to, so these travel on the channel
/// handed out by [`UrlFollower::take_fatal_errors`](crate::UrlFollower::take_fatal_errors).
#[derive(Debug, Clone, Error, PartialEq)]
pub enum FatalError {
    #[error("unauthorized cross-domain request made to {url}")]
    CrossOrigin { url: String },
    #[error("announced room version {0} is not a version number")]
    MalformedVersion(serde_json::Value),
    #[error("no url recorded for room version {version}")]
    MissingUrl { version: u64 },
    #[error("failed to read url for room version {version}: {source}")]
    Store { version: u64, source: StoreError },
}
