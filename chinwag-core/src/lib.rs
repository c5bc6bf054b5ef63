pub mod chatlog;
pub mod events;
pub mod net;
pub mod rooms;
pub mod types;
pub mod users;
