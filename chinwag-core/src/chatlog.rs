//! Message log for the joined room.
//!
//! Seeded from the join response, then appended to in socket arrival order.
//! Messages sent with an attachment start life under a locally-minted
//! provisional id; when the server grants the real id (the upload go-ahead)
//! the log rewrites that one entry in place, so later `attachment_complete`
//! and `message_delete` pushes land on it by id like any other message.

use crate::types::{ChatMessage, Id};

#[derive(Debug, Default, Clone)]
pub struct MessageLog {
    messages: Vec<ChatMessage>,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the history that came with a room join.
    pub fn seed(&mut self, messages: Vec<ChatMessage>) {
        self.messages = messages;
    }

    pub fn append(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    pub fn get(&self, id: &str) -> Option<&ChatMessage> {
        self.messages.iter().find(|m| m.id.as_deref() == Some(id))
    }

    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.messages.len();
        self.messages.retain(|m| m.id.as_deref() != Some(id));
        self.messages.len() != before
    }

    /// Drop every message written by `uid`, returning what went so callers
    /// can announce each removal.
    pub fn remove_by_author(&mut self, uid: &str) -> Vec<ChatMessage> {
        let mut removed = Vec::new();
        self.messages.retain(|m| {
            if m.uid == uid {
                removed.push(m.clone());
                false
            } else {
                true
            }
        });
        removed
    }

    /// Rewrite our newest pending-attachment message to carry the id the
    /// server just granted. Only messages authored by `uid` are candidates;
    /// other people's uploads are also pending in this log and must not be
    /// touched. Returns the provisional id that was replaced.
    pub fn adopt_server_id(&mut self, uid: &str, server_id: &str) -> Option<Id> {
        let message = self
            .messages
            .iter_mut()
            .rev()
            .find(|m| m.uid == uid && m.attachment_pending && m.id.as_deref() != Some(server_id))?;
        message.id.replace(server_id.to_string())
    }

    /// Flip a message from pending to stored. Returns false for unknown ids.
    pub fn complete_attachment(&mut self, id: &str, mime: Option<String>) -> bool {
        match self.messages.iter_mut().find(|m| m.id.as_deref() == Some(id)) {
            Some(message) => {
                message.attachment_pending = false;
                message.attachment_mime = mime;
                true
            }
            None => false,
        }
    }

    /// Mark an upload as abandoned. The text stays and the pending flag too,
    /// matching the server document that will never get its file.
    pub fn fail_attachment(&mut self, id: &str) -> bool {
        match self.messages.iter_mut().find(|m| m.id.as_deref() == Some(id)) {
            Some(message) => {
                message.attachment_failed = true;
                true
            }
            None => false,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChatMessage> {
        self.messages.iter()
    }

    pub fn last(&self) -> Option<&ChatMessage> {
        self.messages.last()
    }

    pub fn snapshot(&self) -> Vec<ChatMessage> {
        self.messages.clone()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adoption_targets_our_newest_pending_message() {
        let mut log = MessageLog::new();
        // someone else's upload is still pending with a real id
        let mut theirs = ChatMessage::provisional("U2", "their file", true);
        theirs.id = Some("64000000000000000000beef".into());
        log.append(theirs);
        log.append(ChatMessage::provisional("U1", "plain", false));
        let ours = ChatMessage::provisional("U1", "my file", true);
        let provisional = ours.id.clone().unwrap();
        log.append(ours);

        let replaced = log.adopt_server_id("U1", "64000000000000000000cafe");
        assert_eq!(replaced, Some(provisional));
        assert!(log.get("64000000000000000000cafe").is_some());
        // the other user's pending message kept its id
        assert!(log.get("64000000000000000000beef").is_some());
    }

    #[test]
    fn adoption_without_a_candidate_is_a_noop() {
        let mut log = MessageLog::new();
        log.append(ChatMessage::provisional("U1", "plain", false));
        assert_eq!(log.adopt_server_id("U1", "64000000000000000000cafe"), None);
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn complete_clears_pending_and_records_mime() {
        let mut log = MessageLog::new();
        let mut msg = ChatMessage::provisional("U1", "pic", true);
        msg.id = Some("M1".into());
        log.append(msg);

        assert!(log.complete_attachment("M1", Some("image/png".into())));
        let m = log.get("M1").unwrap();
        assert!(!m.attachment_pending);
        assert!(m.has_attachment);
        assert_eq!(m.attachment_mime.as_deref(), Some("image/png"));

        assert!(!log.complete_attachment("M9", None));
    }

    #[test]
    fn failure_keeps_the_text_and_the_pending_flag() {
        let mut log = MessageLog::new();
        let mut msg = ChatMessage::provisional("U1", "pic", true);
        msg.id = Some("M1".into());
        log.append(msg);

        assert!(log.fail_attachment("M1"));
        let m = log.get("M1").unwrap();
        assert_eq!(m.content, "pic");
        assert!(m.attachment_failed);
        assert!(m.attachment_pending);
    }

    #[test]
    fn author_cascade_reports_removals() {
        let mut log = MessageLog::new();
        for (uid, text) in [("U1", "a"), ("U2", "b"), ("U1", "c")] {
            log.append(ChatMessage::provisional(uid, text, false));
        }
        let removed = log.remove_by_author("U1");
        assert_eq!(removed.len(), 2);
        assert!(removed.iter().all(|m| m.uid == "U1"));
        assert_eq!(log.len(), 1);
        assert_eq!(log.last().unwrap().uid, "U2");
    }

    #[test]
    fn seed_replaces_previous_room_history() {
        let mut log = MessageLog::new();
        log.append(ChatMessage::provisional("U1", "old room", false));
        log.seed(vec![ChatMessage::provisional("U2", "new room", false)]);
        assert_eq!(log.len(), 1);
        assert_eq!(log.last().unwrap().content, "new room");
    }
}
