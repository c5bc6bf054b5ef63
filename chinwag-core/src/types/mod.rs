pub mod message;
pub mod room;
pub mod user;

pub use message::{ChatMessage, new_provisional_id};
pub use room::{RoomPatch, RoomSummary};
pub use user::UserProfile;

/// Opaque server-issued identifier (24-hex object id in practice). The
/// client only ever compares these for equality.
pub type Id = String;
