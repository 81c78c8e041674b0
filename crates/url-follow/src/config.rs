use std::env;

use crate::{FollowError, Namespace};

pub const DEFAULT_NAMESPACE: &str = "/widgets/url-follow";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FollowConfig {
    pub namespace: String,
}

impl FollowConfig {
    pub fn from_env() -> Result<Self, FollowError> {
        let namespace = env::var("URL_FOLLOW_NAMESPACE")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string());
        let config = Self { namespace };
        config.namespace()?;
        Ok(config)
    }

    pub fn with_namespace(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
        }
    }

    pub fn namespace(&self) -> Result<Namespace, FollowError> {
        Namespace::new(&self.namespace)
    }
}

impl Default for FollowConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
        }
    }
}
