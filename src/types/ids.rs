use uuid::Uuid;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque identity of one relay process, used as the leader lock value.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstanceId(pub String);

impl InstanceId {
    pub fn new() -> Self {
        InstanceId(Uuid::new_v4().to_string())
    }

    pub fn from_string(s: &str) -> Self {
        InstanceId(s.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for InstanceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
