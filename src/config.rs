use std::time::Duration;

/// Tunables for one client instance. Defaults mirror the production
/// service: credentials live 120 s and are refreshed at half that, presence
/// references get a 30 s grace before eviction, and the server caps
/// attachments at 20 MiB, messages at 200 chars and room names at 24.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// REST base, e.g. `http://localhost:8080`.
    pub base_url: String,
    /// WebSocket endpoint. Derived from `base_url` when empty.
    pub ws_url: String,
    pub session_refresh_interval: Duration,
    pub presence_grace: Duration,
    pub presence_sweep_interval: Duration,
    pub max_attachment_bytes: usize,
    pub max_message_chars: usize,
    pub max_room_name_chars: usize,
    /// Reopen the socket after an unexpected drop. Off by default: events
    /// missed while offline are gone and collections can go stale, so the
    /// caller must opt in knowingly.
    pub auto_reconnect: bool,
    pub reconnect_max_delay: Duration,
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    /// The socket URL, deriving `ws(s)://…/ws/conn` from `base_url` when no
    /// explicit override is set.
    pub fn websocket_url(&self) -> String {
        if !self.ws_url.is_empty() {
            return self.ws_url.clone();
        }
        let scheme_swapped = if let Some(rest) = self.base_url.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = self.base_url.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            format!("ws://{}", self.base_url)
        };
        format!("{}/ws/conn", scheme_swapped.trim_end_matches('/'))
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            ws_url: String::new(),
            session_refresh_interval: Duration::from_secs(60),
            presence_grace: Duration::from_secs(30),
            presence_sweep_interval: Duration::from_secs(5),
            max_attachment_bytes: 20 * 1024 * 1024,
            max_message_chars: 200,
            max_room_name_chars: 24,
            auto_reconnect: false,
            reconnect_max_delay: Duration::from_secs(30),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn websocket_url_tracks_base_scheme() {
        let mut cfg = ClientConfig::new("https://chat.example.com");
        assert_eq!(cfg.websocket_url(), "wss://chat.example.com/ws/conn");
        cfg.base_url = "http://localhost:8080/".into();
        assert_eq!(cfg.websocket_url(), "ws://localhost:8080/ws/conn");
    }

    #[test]
    fn explicit_ws_url_wins() {
        let mut cfg = ClientConfig::new("http://a");
        cfg.ws_url = "ws://b/ws/conn".into();
        assert_eq!(cfg.websocket_url(), "ws://b/ws/conn");
    }
}
