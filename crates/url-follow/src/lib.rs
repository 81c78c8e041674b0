//! URL following for collaborative sessions.
//!
//! Participants in one room converge on the same page. Each room keeps a
//! versioned history of agreed urls in its shared namespace:
//!
//! - `<ns>/version`: the agreed version, advanced only by a leader
//! - `<ns>/url/<n>`: the url agreed at version `n`, created exactly once
//! - `<ns>/participants/<id>/version`: the last version a participant acknowledged
//!
//! A participant whose acknowledged version equals the room version got to
//! its page on its own and publishes it as the next version; the create-only
//! write of `url/<n>` decides races between simultaneous leaders. Everyone
//! else is sent to the agreed url and then follows later versions through a
//! listener on the version pointer.

mod config;
mod document;
mod error;
mod follower;
mod listener;
mod namespace;
pub mod origin;
mod snapshot;

pub use config::{FollowConfig, DEFAULT_NAMESPACE};
pub use document::{Document, DocumentEvent, RecordingDocument};
pub use error::{FatalError, FollowError};
pub use follower::{FollowerPhase, UrlFollower};
pub use listener::{ListenerOutcome, VersionListener};
pub use namespace::Namespace;
pub use snapshot::{NamespaceSnapshot, ParticipantRecord};
