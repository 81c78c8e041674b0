use room_store::{KeyPath, StoreError};

use crate::FollowError;

/// Locations the coordinator reads and writes inside a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Namespace {
    root: KeyPath,
    urls: KeyPath,
    version: KeyPath,
    participants: KeyPath,
}

impl Namespace {
    pub fn new(prefix: &str) -> Result<Self, FollowError> {
        let invalid =
            |err: StoreError| FollowError::InvalidArgument(format!("namespace '{prefix}': {err}"));
        let root = KeyPath::new(prefix).map_err(invalid)?;
        if root.is_root() {
            return Err(FollowError::InvalidArgument(
                "namespace must not be the room root".into(),
            ));
        }
        Ok(Self {
            urls: root.key("url").map_err(invalid)?,
            version: root.key("version").map_err(invalid)?,
            participants: root.key("participants").map_err(invalid)?,
            root,
        })
    }

    pub fn root(&self) -> &KeyPath {
        &self.root
    }

    pub fn urls(&self) -> &KeyPath {
        &self.urls
    }

    /// Room-wide pointer to the agreed version.
    pub fn version(&self) -> &KeyPath {
        &self.version
    }

    pub fn url_for(&self, version: u64) -> Result<KeyPath, FollowError> {
        self.urls
            .key(version.to_string())
            .map_err(|err| FollowError::InvalidArgument(err.to_string()))
    }

    pub fn participant_version(&self, participant_id: &str) -> Result<KeyPath, FollowError> {
        if participant_id.is_empty() || participant_id.contains('/') {
            return Err(FollowError::InvalidArgument(format!(
                "participant id '{participant_id}' cannot be used as a key"
            )));
        }
        self.participants
            .key(format!("{participant_id}/version"))
            .map_err(|err| FollowError::InvalidArgument(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_all_locations_from_the_prefix() {
        let ns = Namespace::new("/widgets/url-follow").unwrap();
        assert_eq!(ns.root().as_str(), "/widgets/url-follow");
        assert_eq!(ns.urls().as_str(), "/widgets/url-follow/url");
        assert_eq!(ns.version().as_str(), "/widgets/url-follow/version");
        assert_eq!(ns.url_for(7).unwrap().as_str(), "/widgets/url-follow/url/7");
        assert_eq!(
            ns.participant_version("u1").unwrap().as_str(),
            "/widgets/url-follow/participants/u1/version"
        );
    }

    #[test]
    fn rejects_unusable_prefixes() {
        for prefix in ["", "relative/ns", "/", "/a//b"] {
            let err = Namespace::new(prefix).unwrap_err();
            assert!(err.is_misuse(), "{prefix:?} gave {err:?}");
        }
    }

    #[test]
    fn rejects_ids_that_escape_their_slot() {
        let ns = Namespace::new("/ns").unwrap();
        assert!(ns.participant_version("a/b").is_err());
        assert!(ns.participant_version("").is_err());
    }
}
