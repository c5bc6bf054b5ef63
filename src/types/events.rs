use std::sync::Arc;
use tokio::sync::broadcast;

use crate::types::{ChatMessage, Id, RoomSummary, UserProfile};

// The size of the broadcast channel buffer.
const CHANNEL_CAPACITY: usize = 100;

/// The realtime connection is up and dispatching events.
#[derive(Debug, Clone)]
pub struct Connected;

/// The realtime connection is gone, expectedly or not.
#[derive(Debug, Clone)]
pub struct Disconnected;

/// A session was established (login, register or startup refresh).
#[derive(Debug, Clone)]
pub struct LoggedIn {
    pub user: UserProfile,
}

/// The session ended: logout, account deletion, or a failed refresh.
#[derive(Debug, Clone)]
pub struct LoggedOut;

#[derive(Debug, Clone)]
pub struct MessageRemoved {
    pub id: Id,
}

#[derive(Debug, Clone)]
pub struct RoomRemoved {
    pub id: Id,
}

/// Why the joined room was closed underneath the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomClosedReason {
    /// We left it ourselves.
    Left,
    /// The room was deleted server-side.
    Deleted,
    /// The room's owner deleted their account.
    AuthorDeleted,
    /// The realtime connection went away; membership died with it.
    ConnectionLost,
}

/// The active room is no longer joined; a UI should navigate away.
#[derive(Debug, Clone)]
pub struct RoomClosed {
    pub room_id: Id,
    pub reason: RoomClosedReason,
}

#[derive(Debug, Clone)]
pub struct UserRemoved {
    pub id: Id,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachmentState {
    /// Server granted the message id; the file is being uploaded.
    Uploading,
    /// Stored server-side and fetchable.
    Stored { mime_type: Option<String> },
    /// The upload was abandoned; the message text stands alone.
    Failed,
}

#[derive(Debug, Clone)]
pub struct AttachmentUpdate {
    pub message_id: Id,
    pub state: AttachmentState,
}

/// A dismissible complaint, e.g. the server refusing one message.
#[derive(Debug, Clone)]
pub struct TransientError {
    pub message: String,
}

/// A failure the user must acknowledge, e.g. an oversized file.
#[derive(Debug, Clone)]
pub struct BlockingError {
    pub message: String,
}

// Macro to generate EventBus fields and constructor
macro_rules! define_event_bus {
    ($(($field:ident, $type:ty)),* $(,)?) => {
        /// Typed event bus that provides separate broadcast channels for each event type.
        /// Subscribers pick the channels they care about; lagging subscribers
        /// miss events rather than blocking the dispatcher.
        #[derive(Debug)]
        pub struct EventBus {
            $(
                pub $field: broadcast::Sender<$type>,
            )*
        }

        impl EventBus {
            pub fn new() -> Self {
                Self {
                    $(
                        $field: broadcast::channel(CHANNEL_CAPACITY).0,
                    )*
                }
            }
        }
    };
}

// Define the EventBus structure and implementation using the macro
define_event_bus! {
    // Connection and session events
    (connected, Arc<Connected>),
    (disconnected, Arc<Disconnected>),
    (logged_in, Arc<LoggedIn>),
    (logged_out, Arc<LoggedOut>),

    // Active-room events
    (message, Arc<ChatMessage>),
    (message_removed, Arc<MessageRemoved>),
    (attachment_update, Arc<AttachmentUpdate>),
    (room_closed, Arc<RoomClosed>),

    // Directory events
    (room_updated, Arc<RoomSummary>),
    (room_removed, Arc<RoomRemoved>),
    (user_updated, Arc<UserProfile>),
    (user_removed, Arc<UserRemoved>),

    // Error surfacing
    (transient_error, Arc<TransientError>),
    (blocking_error, Arc<BlockingError>),
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
