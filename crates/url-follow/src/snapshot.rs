use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::FollowError;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
}

/// Shared state of one namespace as read in a single fetch.
///
/// Every field is optional on the wire: a namespace nobody has used yet reads
/// as nothing at all, and [`seed`](Self::seed) fills the gaps locally.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceSnapshot {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<BTreeMap<u64, String>>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub participants: BTreeMap<String, ParticipantRecord>,
}

impl NamespaceSnapshot {
    pub fn from_value(value: Option<Value>) -> Result<Self, FollowError> {
        match value {
            None | Some(Value::Null) => Ok(Self::default()),
            Some(value @ Value::Object(_)) => serde_json::from_value(value)
                .map_err(|err| FollowError::MalformedSnapshot(err.to_string())),
            Some(other) => Err(FollowError::MalformedSnapshot(format!(
                "expected an object, found {other}"
            ))),
        }
    }

    /// First-use setup. Fills in version 0, a version-0 url of `location` and
    /// a version-0 record for `participant_id`, keeping anything already present.
    ///
    /// Gaps are filled entry by entry: a leader may already have created
    /// `url/1` without having moved the version pointer yet.
    pub fn seed(&mut self, participant_id: &str, location: &str) {
        if *self.version.get_or_insert(0) == 0 {
            self.url
                .get_or_insert_with(BTreeMap::new)
                .entry(0)
                .or_insert_with(|| location.to_string());
        }
        self.participants
            .entry(participant_id.to_string())
            .or_default()
            .version
            .get_or_insert(0);
    }

    pub fn version(&self) -> u64 {
        self.version.unwrap_or(0)
    }

    pub fn url_at(&self, version: u64) -> Option<&str> {
        self.url.as_ref()?.get(&version).map(String::as_str)
    }

    pub fn participant_version(&self, participant_id: &str) -> Option<u64> {
        self.participants.get(participant_id)?.version
    }
}
