use serde::{Deserialize, Serialize};

use super::Id;

/// A user profile as the service serializes it. `base64pfp` is a data-URL
/// string when present; the service omits the field for users without an
/// avatar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    #[serde(rename = "ID")]
    pub id: Id,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base64pfp: Option<String>,
}

impl UserProfile {
    pub fn new(id: impl Into<Id>, username: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            username: username.into(),
            base64pfp: None,
        }
    }
}
