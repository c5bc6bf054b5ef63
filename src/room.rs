//! Room directory operations, the active room session, and the send path.
//!
//! The server excludes the caller from its own update fan-out, so every
//! mutating call here applies its result to local state directly; pushes
//! cover everyone else.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use log::{debug, info, warn};

use crate::client::{ActiveRoom, Client, StagedAttachment};
use crate::error::{ApiError, ClientError};
use crate::events::OutboundMessage;
use crate::types::events::{
    AttachmentState, AttachmentUpdate, BlockingError, RoomClosed, RoomClosedReason, RoomRemoved,
    TransientError,
};
use crate::types::{ChatMessage, Id, RoomPatch, RoomSummary};

impl Client {
    // --- directory ---

    /// Refetch the room directory, replacing the local copy. Honors the
    /// own-rooms filter.
    pub async fn refresh_rooms(&self) -> Result<Vec<RoomSummary>, ClientError> {
        let own = self.own_rooms_only.load(Ordering::Relaxed);
        let list = self.api.list_rooms(own).await?;
        self.rooms.write().await.replace_all(list.clone());
        Ok(list)
    }

    pub async fn rooms(&self) -> Vec<RoomSummary> {
        self.rooms.read().await.snapshot()
    }

    pub async fn room(&self, id: &str) -> Option<RoomSummary> {
        self.rooms.read().await.get(id).cloned()
    }

    /// Fetch a room's cover image and fold it into the directory entry as a
    /// data URL. Rooms without an image resolve to None.
    pub async fn fetch_room_image(&self, id: &str) -> Result<Option<String>, ClientError> {
        let image = self.api.room_image(id).await?;
        if let Some(image) = &image {
            let mut rooms = self.rooms.write().await;
            rooms.merge(RoomPatch {
                id: id.to_string(),
                base64image: Some(image.clone()),
                ..Default::default()
            });
            let merged = rooms.get(id).cloned();
            drop(rooms);
            if let Some(room) = merged {
                let _ = self.event_bus.room_updated.send(Arc::new(room));
            }
        }
        Ok(image)
    }

    pub async fn create_room(&self, name: &str) -> Result<RoomSummary, ClientError> {
        let name = self.validate_room_name(name)?;
        let room = self.api.create_room(name).await?;
        self.rooms.write().await.merge(room.clone().into());
        let _ = self.event_bus.room_updated.send(Arc::new(room.clone()));
        Ok(room)
    }

    pub async fn rename_room(&self, id: &str, name: &str) -> Result<RoomSummary, ClientError> {
        let name = self.validate_room_name(name)?;
        let room = self.api.rename_room(id, name).await?;
        self.rooms.write().await.merge(room.clone().into());
        let _ = self.event_bus.room_updated.send(Arc::new(room.clone()));
        Ok(room)
    }

    pub async fn delete_room(&self, id: &str) -> Result<(), ClientError> {
        self.api.delete_room(id).await?;
        if self.rooms.write().await.remove(id).is_some() {
            let _ = self
                .event_bus
                .room_removed
                .send(Arc::new(RoomRemoved { id: id.to_string() }));
        }
        if self.active_room_id().await.as_deref() == Some(id) {
            self.close_active_room(RoomClosedReason::Deleted).await;
        }
        Ok(())
    }

    pub async fn set_room_image(
        &self,
        id: &str,
        data: &[u8],
        filename: &str,
        mime: &str,
    ) -> Result<(), ClientError> {
        if data.len() > self.config.max_attachment_bytes {
            return Err(self.reject_oversized_file().into());
        }
        self.api.set_room_image(id, data, filename, mime).await?;
        self.fetch_room_image(id).await?;
        Ok(())
    }

    fn validate_room_name<'a>(&self, name: &'a str) -> Result<&'a str, ClientError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ApiError::Validation("Room name cannot be empty".into()).into());
        }
        if name.chars().count() > self.config.max_room_name_chars {
            return Err(ApiError::Validation(format!(
                "Room name too long. Max {} characters",
                self.config.max_room_name_chars
            ))
            .into());
        }
        Ok(name)
    }

    // --- room session ---

    /// Join a room: the server re-homes this connection's membership and
    /// returns the room document, whose message history seeds the log.
    /// Any previously joined room is closed first.
    pub async fn join_room(self: &Arc<Self>, id: &str) -> Result<(), ClientError> {
        if !self.is_connected() {
            return Err(ClientError::NotConnected);
        }
        if self.active_room_id().await.is_some() {
            self.close_active_room(RoomClosedReason::Left).await;
        }

        let joined = self.api.join_room(id).await?;
        info!(
            target: "Client",
            "Joined room {} with {} messages of history", joined.id, joined.messages.len()
        );

        let mut authors: HashSet<Id> = HashSet::new();
        for message in &joined.messages {
            self.take_user_ref(&message.uid).await;
            authors.insert(message.uid.clone());
        }
        self.chatlog.write().await.seed(joined.messages);
        *self.active_room.write().await = Some(ActiveRoom {
            id: joined.id,
            author_id: joined.author_id,
        });
        for author in authors {
            self.spawn_ensure_cached(author);
        }
        Ok(())
    }

    /// Leave the active room. The leave call can fail without blocking the
    /// local close; the failure is surfaced on the bus instead.
    pub async fn leave_room(&self) -> Result<(), ClientError> {
        let Some(room_id) = self.active_room_id().await else {
            return Err(ClientError::NotInRoom);
        };
        if let Err(e) = self.api.leave_room(&room_id).await {
            warn!(target: "Client", "Leave call for room {room_id} failed: {e}");
            let _ = self
                .event_bus
                .transient_error
                .send(Arc::new(TransientError { message: e.to_string() }));
        }
        self.close_active_room(RoomClosedReason::Left).await;
        Ok(())
    }

    /// Fold up the active room session: drop the log, release the profile
    /// references its messages held, and discard any staged file.
    pub(crate) async fn close_active_room(&self, reason: RoomClosedReason) {
        let Some(room) = self.active_room.write().await.take() else {
            return;
        };

        let authors: Vec<Id> = {
            let mut chatlog = self.chatlog.write().await;
            let authors = chatlog.iter().map(|m| m.uid.clone()).collect();
            chatlog.clear();
            authors
        };
        for author in &authors {
            self.release_user_ref(author).await;
        }
        self.staged_attachment.lock().await.take();

        info!(target: "Client", "Closed room {} ({:?})", room.id, reason);
        let _ = self.event_bus.room_closed.send(Arc::new(RoomClosed {
            room_id: room.id,
            reason,
        }));
    }

    /// The active room's message log, oldest first.
    pub async fn messages(&self) -> Vec<ChatMessage> {
        self.chatlog.read().await.snapshot()
    }

    // --- send path ---

    /// Send a text message to the active room. The message is appended
    /// locally right away with a provisional id; the server does not echo it
    /// back to this connection.
    pub async fn send_message(&self, content: &str) -> Result<(), ClientError> {
        let content = self.validate_message(content)?;
        let user = self.current_user().ok_or(ClientError::NotLoggedIn)?;
        if self.active_room.read().await.is_none() {
            return Err(ClientError::NotInRoom);
        }

        let frame = OutboundMessage {
            content: content.to_string(),
            has_attachment: false,
        }
        .to_frame()
        .map_err(|e| ClientError::Transport(e.into()))?;
        self.send_frame(frame.as_bytes()).await?;

        let message = ChatMessage::provisional(user.id, content.to_string(), false);
        self.chatlog.write().await.append(message.clone());
        let _ = self.event_bus.message.send(Arc::new(message));
        Ok(())
    }

    /// Send a message with a file attached. The file is only staged here;
    /// the actual upload runs once the server grants an id for it via the
    /// `attachment_upload` push. Oversized files are rejected before
    /// anything touches the network.
    pub async fn send_message_with_attachment(
        &self,
        content: &str,
        filename: &str,
        mime: &str,
        data: Vec<u8>,
    ) -> Result<(), ClientError> {
        if data.len() > self.config.max_attachment_bytes {
            return Err(self.reject_oversized_file().into());
        }
        let content = self.validate_message(content)?;
        let user = self.current_user().ok_or(ClientError::NotLoggedIn)?;
        let Some(room_id) = self.active_room_id().await else {
            return Err(ClientError::NotInRoom);
        };

        let message = ChatMessage::provisional(user.id, content.to_string(), true);
        let provisional_id = message.id.clone().unwrap_or_default();

        // Stage before the frame goes out so the grant can never beat the
        // file into place.
        {
            let mut staged = self.staged_attachment.lock().await;
            if staged.is_some() {
                warn!(target: "Client", "Replacing a previously staged file that never got its upload grant");
            }
            *staged = Some(StagedAttachment {
                room_id,
                provisional_id,
                filename: filename.to_string(),
                mime: mime.to_string(),
                data,
            });
        }

        let frame = OutboundMessage {
            content: content.to_string(),
            has_attachment: true,
        }
        .to_frame()
        .map_err(|e| ClientError::Transport(e.into()))?;
        if let Err(e) = self.send_frame(frame.as_bytes()).await {
            self.staged_attachment.lock().await.take();
            return Err(e);
        }

        self.chatlog.write().await.append(message.clone());
        let _ = self.event_bus.message.send(Arc::new(message));
        Ok(())
    }

    fn validate_message<'a>(&self, content: &'a str) -> Result<&'a str, ClientError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(ApiError::Validation("You cannot submit an empty message".into()).into());
        }
        if content.chars().count() > self.config.max_message_chars {
            return Err(ApiError::Validation(format!(
                "Message too long. Max {} characters",
                self.config.max_message_chars
            ))
            .into());
        }
        Ok(content)
    }

    fn reject_oversized_file(&self) -> ApiError {
        let message = format!(
            "File too large. Max {}mb.",
            self.config.max_attachment_bytes / (1024 * 1024)
        );
        let _ = self
            .event_bus
            .blocking_error
            .send(Arc::new(BlockingError { message: message.clone() }));
        ApiError::Validation(message)
    }

    /// `attachment_upload` push: the server accepted the message and granted
    /// the id to upload the staged file under.
    pub(crate) async fn handle_upload_grant(self: &Arc<Self>, id: Id, room_id: Id) {
        let Some(user) = self.current_user() else {
            warn!(target: "Client/Dispatch", "Upload grant for {id} with no session, dropping");
            return;
        };

        if let Some(old_id) = self.chatlog.write().await.adopt_server_id(&user.id, &id) {
            debug!(target: "Client/Dispatch", "Provisional message {old_id} is now {id}");
        }

        let Some(staged) = self.staged_attachment.lock().await.take() else {
            warn!(target: "Client/Dispatch", "Upload grant for {id} but no file is staged");
            self.chatlog.write().await.fail_attachment(&id);
            let _ = self.event_bus.attachment_update.send(Arc::new(AttachmentUpdate {
                message_id: id,
                state: AttachmentState::Failed,
            }));
            return;
        };
        if staged.room_id != room_id {
            debug!(
                target: "Client/Dispatch",
                "Grant names room {room_id}, file was staged for {}", staged.room_id
            );
        }

        let _ = self.event_bus.attachment_update.send(Arc::new(AttachmentUpdate {
            message_id: id.clone(),
            state: AttachmentState::Uploading,
        }));

        // The upload can be slow; it must not hold up the dispatcher. On
        // success the server pushes `attachment_complete` to everyone in the
        // room, this connection included, which finalizes the message.
        let client = self.clone();
        tokio::spawn(async move {
            if let Err(e) = client
                .api
                .upload_attachment(&room_id, &id, &staged.data, &staged.filename, &staged.mime)
                .await
            {
                warn!(target: "Client", "Attachment upload for {id} failed: {e}");
                client.chatlog.write().await.fail_attachment(&id);
                let _ = client.event_bus.attachment_update.send(Arc::new(AttachmentUpdate {
                    message_id: id.clone(),
                    state: AttachmentState::Failed,
                }));
                let _ = client.event_bus.blocking_error.send(Arc::new(BlockingError {
                    message: format!("Attachment upload failed: {e}"),
                }));
            }
        });
    }
}
