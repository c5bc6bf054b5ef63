//! The push-event protocol carried over the realtime socket.
//!
//! Every inbound frame is a UTF-8 JSON object. The service tags pushes with
//! an `event_type` field; a frame *without* that field is a chat message for
//! the room the connection is currently joined to. That implicit rule is made
//! explicit here: classification always yields a named [`ServerEvent`]
//! variant, and tags this client does not know land in
//! [`ServerEvent::Unsupported`] so newer servers never break the read loop.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{ChatMessage, Id, RoomPatch};

#[derive(Debug, Error)]
pub enum EventParseError {
    #[error("frame is not valid UTF-8")]
    NotUtf8,
    #[error("frame is not a JSON object: {0}")]
    Json(#[from] serde_json::Error),
}

/// A classified inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    /// Untagged frame: a message for the active room.
    ChatMessage(ChatMessage),
    /// `chatroom_update`: partial room data to merge into the directory.
    RoomUpdate(RoomPatch),
    /// `chatroom_delete`
    RoomDelete { id: Id },
    /// `pfp_update`: another user changed their avatar.
    PfpUpdate { id: Id, base64pfp: String },
    /// `user_delete`: account removed, cascade over rooms and messages.
    UserDelete { id: Id },
    /// `chatroom_err`: transient complaint about a submitted message.
    RoomError { content: String },
    /// `attachment_upload`: the server assigned `id` to our pending send and
    /// is ready to receive the staged file for it.
    AttachmentUpload { id: Id, room_id: Id },
    /// `attachment_complete`: the file for message `id` is stored.
    AttachmentComplete { id: Id, mime_type: Option<String> },
    /// `message_delete`
    MessageDelete { id: Id },
    /// A tag newer than this client. Logged and dropped by the dispatcher.
    Unsupported { event_type: String },
}

impl ServerEvent {
    /// Classify a raw frame. Fails only on non-UTF-8 data, non-JSON data, or
    /// a recognized tag with a malformed payload; unknown tags succeed as
    /// [`ServerEvent::Unsupported`].
    pub fn parse_frame(raw: &[u8]) -> Result<Self, EventParseError> {
        let text = std::str::from_utf8(raw).map_err(|_| EventParseError::NotUtf8)?;
        Self::parse(text)
    }

    pub fn parse(text: &str) -> Result<Self, EventParseError> {
        #[derive(Deserialize)]
        struct TagProbe {
            #[serde(default)]
            event_type: Option<String>,
        }

        let tag = serde_json::from_str::<TagProbe>(text)?.event_type;
        let event = match tag.as_deref() {
            None => Self::ChatMessage(serde_json::from_str(text)?),
            Some("chatroom_update") => Self::RoomUpdate(serde_json::from_str(text)?),
            Some("chatroom_delete") => {
                let IdPayload { id } = serde_json::from_str(text)?;
                Self::RoomDelete { id }
            }
            Some("pfp_update") => {
                let PfpPayload { id, base64pfp } = serde_json::from_str(text)?;
                Self::PfpUpdate { id, base64pfp }
            }
            Some("user_delete") => {
                let IdPayload { id } = serde_json::from_str(text)?;
                Self::UserDelete { id }
            }
            Some("chatroom_err") => {
                let ErrPayload { content } = serde_json::from_str(text)?;
                Self::RoomError { content }
            }
            Some("attachment_upload") => {
                let UploadPayload { id, room_id } = serde_json::from_str(text)?;
                Self::AttachmentUpload { id, room_id }
            }
            Some("attachment_complete") => {
                let CompletePayload { id, mime_type } = serde_json::from_str(text)?;
                Self::AttachmentComplete { id, mime_type }
            }
            Some("message_delete") => {
                let IdPayload { id } = serde_json::from_str(text)?;
                Self::MessageDelete { id }
            }
            Some(other) => Self::Unsupported {
                event_type: other.to_string(),
            },
        };
        Ok(event)
    }
}

/// The only frame a client ever writes: a message for the joined room. The
/// server assigns the id and fans the message out to everyone else in the
/// room; the sender does not get an echo.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutboundMessage {
    pub content: String,
    pub has_attachment: bool,
}

impl OutboundMessage {
    pub fn to_frame(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[derive(Deserialize)]
struct IdPayload {
    #[serde(rename = "ID")]
    id: Id,
}

#[derive(Deserialize)]
struct PfpPayload {
    #[serde(rename = "ID")]
    id: Id,
    base64pfp: String,
}

#[derive(Deserialize)]
struct ErrPayload {
    content: String,
}

#[derive(Deserialize)]
struct UploadPayload {
    #[serde(rename = "ID")]
    id: Id,
    room_id: Id,
}

#[derive(Deserialize)]
struct CompletePayload {
    #[serde(rename = "ID")]
    id: Id,
    #[serde(default)]
    mime_type: Option<String>,
}
