use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use super::Id;

/// One row of the active room's message log.
///
/// `id` is the server-issued message id once known. A message appended
/// optimistically on send starts out under a provisional id (random, same
/// shape as a server id) which is rewritten when the server grants the
/// authoritative one during the attachment handshake. Messages pushed by an
/// older service revision may carry no id at all.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(rename = "ID", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Id>,
    pub uid: Id,
    pub content: String,
    /// Stored as a mongo datetime server-side; arrives as epoch millis from
    /// the REST surface and as RFC 3339 from some push frames. Absent on
    /// frames from older service revisions, in which case it is stamped on
    /// receipt.
    #[serde(default = "Utc::now", deserialize_with = "de_timestamp")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub has_attachment: bool,
    #[serde(default)]
    pub attachment_pending: bool,
    /// Mime type reported by `attachment_complete`; used to decide between
    /// inline image rendering and a download link.
    #[serde(rename = "mime_type", default, skip_serializing_if = "Option::is_none")]
    pub attachment_mime: Option<String>,
    /// Set when the binary upload failed after the message was sent. The
    /// pending flag stays true in that case; there is no retry. Never on the
    /// wire.
    #[serde(skip)]
    pub attachment_failed: bool,
}

fn de_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Millis(i64),
        Text(String),
    }

    Ok(match Option::<Raw>::deserialize(deserializer)? {
        Some(Raw::Millis(ms)) => DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or_else(Utc::now),
        Some(Raw::Text(s)) => DateTime::parse_from_rfc3339(&s)
            .map(|t| t.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
        None => Utc::now(),
    })
}

impl ChatMessage {
    /// An optimistic local entry for a just-sent message, stamped now and
    /// keyed by a fresh provisional id.
    pub fn provisional(uid: impl Into<Id>, content: impl Into<String>, has_attachment: bool) -> Self {
        Self {
            id: Some(new_provisional_id()),
            uid: uid.into(),
            content: content.into(),
            timestamp: Utc::now(),
            has_attachment,
            attachment_pending: has_attachment,
            attachment_mime: None,
            attachment_failed: false,
        }
    }
}

/// Random 24-hex id, the same shape as the server's object ids. Purely a
/// client-side placeholder; the server never sees it.
pub fn new_provisional_id() -> Id {
    let mut raw = [0u8; 12];
    rand::rng().fill_bytes(&mut raw);
    hex::encode(raw)
}
