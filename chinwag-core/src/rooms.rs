//! Insertion-ordered directory of the rooms the signed-in user can see.
//!
//! The REST list seeds it, `chatroom_update` pushes merge into it, and
//! `chatroom_delete` / `user_delete` prune it. Order is the order rooms were
//! first learned about, which is what the service's own list endpoint
//! returns, so a UI can render the directory as-is.

use crate::types::{Id, RoomPatch, RoomSummary};

#[derive(Debug, Default, Clone)]
pub struct RoomDirectory {
    rooms: Vec<RoomSummary>,
}

impl RoomDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop everything and install a fresh snapshot, e.g. from the list
    /// endpoint after (re)connecting.
    pub fn replace_all(&mut self, rooms: Vec<RoomSummary>) {
        self.rooms = rooms;
    }

    pub fn get(&self, id: &str) -> Option<&RoomSummary> {
        self.rooms.iter().find(|r| r.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// Apply a partial update. A known id has only the patch's present
    /// fields overwritten; an unknown id is appended as a new room built
    /// from whatever the patch carries.
    pub fn merge(&mut self, patch: RoomPatch) {
        match self.rooms.iter_mut().find(|r| r.id == patch.id) {
            Some(room) => {
                if let Some(name) = patch.name {
                    room.name = name;
                }
                if let Some(author_id) = patch.author_id {
                    room.author_id = author_id;
                }
                if let Some(image) = patch.base64image {
                    room.base64image = Some(image);
                }
            }
            None => self.rooms.push(RoomSummary {
                id: patch.id,
                name: patch.name.unwrap_or_default(),
                author_id: patch.author_id.unwrap_or_default(),
                base64image: patch.base64image,
            }),
        }
    }

    /// Remove one room. Returns it if it was present.
    pub fn remove(&mut self, id: &str) -> Option<RoomSummary> {
        let pos = self.rooms.iter().position(|r| r.id == id)?;
        Some(self.rooms.remove(pos))
    }

    /// Remove every room owned by `author_id`, returning the removed ids so
    /// the caller can tell whether the active room was among them.
    pub fn remove_by_author(&mut self, author_id: &str) -> Vec<Id> {
        let mut removed = Vec::new();
        self.rooms.retain(|r| {
            if r.author_id == author_id {
                removed.push(r.id.clone());
                false
            } else {
                true
            }
        });
        removed
    }

    pub fn iter(&self) -> impl Iterator<Item = &RoomSummary> {
        self.rooms.iter()
    }

    pub fn snapshot(&self) -> Vec<RoomSummary> {
        self.rooms.clone()
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }
}
