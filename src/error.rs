use thiserror::Error;

pub use chinwag_core::events::EventParseError;

/// Failure talking to the REST surface.
#[derive(Debug, Error)]
pub enum ApiError {
    /// 401/403: bad credentials, no session, or the session expired
    /// mid-flight.
    #[error("not authorized: {0}")]
    Auth(String),
    /// Rejected locally before any request went out.
    #[error("{0}")]
    Validation(String),
    /// Non-success status with the server's own message, `"Error: "` prefix
    /// already stripped.
    #[error("server rejected request ({status}): {message}")]
    Server { status: u16, message: String },
    #[error("http error: {0}")]
    Http(#[from] anyhow::Error),
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("client is not connected")]
    NotConnected,
    #[error("client is already connected")]
    AlreadyConnected,
    #[error("client is not logged in")]
    NotLoggedIn,
    #[error("no room is joined")]
    NotInRoom,
    #[error("api error: {0}")]
    Api(#[from] ApiError),
    #[error("transport error: {0}")]
    Transport(#[from] anyhow::Error),
}
