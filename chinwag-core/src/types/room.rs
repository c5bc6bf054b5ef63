use serde::{Deserialize, Serialize};

use super::Id;

/// Summary of a chat room as listed by `GET /api/rooms`. The cover image is
/// not part of the listing payload; it is fetched lazily per room and stored
/// here as a data-URL string once resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomSummary {
    #[serde(rename = "ID")]
    pub id: Id,
    pub name: String,
    pub author_id: Id,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base64image: Option<String>,
}

impl RoomSummary {
    pub fn new(id: impl Into<Id>, name: impl Into<String>, author_id: impl Into<Id>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            author_id: author_id.into(),
            base64image: None,
        }
    }
}

/// A partial room as carried by `chatroom_update` pushes: only `ID` is
/// guaranteed, every other field is present when (and only when) it changed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomPatch {
    #[serde(rename = "ID")]
    pub id: Id,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_id: Option<Id>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base64image: Option<String>,
}

impl From<RoomSummary> for RoomPatch {
    fn from(room: RoomSummary) -> Self {
        Self {
            id: room.id,
            name: Some(room.name),
            author_id: Some(room.author_id),
            base64image: room.base64image,
        }
    }
}
