use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{StoreError, StoreResult};

/// Absolute, `/`-separated location inside a room's shared key space.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct KeyPath(String);

impl KeyPath {
    pub fn root() -> Self {
        Self("/".into())
    }

    pub fn new(path: impl AsRef<str>) -> StoreResult<Self> {
        let raw = path.as_ref().trim();
        if !raw.starts_with('/') {
            return Err(StoreError::InvalidKey(format!(
                "key '{raw}' must be absolute"
            )));
        }
        let trimmed = raw.trim_end_matches('/');
        if trimmed.is_empty() {
            return Ok(Self::root());
        }
        if trimmed[1..].split('/').any(str::is_empty) {
            return Err(StoreError::InvalidKey(format!(
                "key '{raw}' contains an empty segment"
            )));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Derives a child location. `name` may span several segments (`a/b`).
    pub fn key(&self, name: impl AsRef<str>) -> StoreResult<Self> {
        let name = name.as_ref().trim_matches('/');
        if name.is_empty() {
            return Err(StoreError::InvalidKey(format!(
                "empty child name under '{}'",
                self.0
            )));
        }
        if self.is_root() {
            Self::new(format!("/{name}"))
        } else {
            Self::new(format!("{}/{name}", self.0))
        }
    }

    pub fn is_root(&self) -> bool {
        self.0 == "/"
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|segment| !segment.is_empty())
    }

    /// Last segment, `None` for the root.
    pub fn name(&self) -> Option<&str> {
        self.segments().last()
    }
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for KeyPath {
    type Error = StoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<KeyPath> for String {
    fn from(value: KeyPath) -> Self {
        value.0
    }
}
