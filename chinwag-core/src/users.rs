//! Profile cache with reference-counted visibility.
//!
//! A profile stays cached while anything on screen still refers to it: each
//! loaded message holds one reference on its author, so the same id can be
//! referenced many times over. When the last reference goes the profile is
//! not dropped immediately but scheduled for eviction, so hopping out of a
//! room and straight back in does not refetch everyone. A periodic [`sweep`]
//! purges profiles whose grace deadline has passed while their count stayed
//! at zero.
//!
//! [`sweep`]: UserDirectory::sweep

use std::collections::HashMap;
use std::time::Instant;

use crate::types::{Id, UserProfile};

#[derive(Debug, Default)]
pub struct UserDirectory {
    profiles: HashMap<Id, UserProfile>,
    visible: HashMap<Id, usize>,
    evict_at: HashMap<Id, Instant>,
}

impl UserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install or replace a fetched profile. Does not touch visibility.
    pub fn insert(&mut self, profile: UserProfile) {
        self.profiles.insert(profile.id.clone(), profile);
    }

    pub fn get(&self, id: &str) -> Option<&UserProfile> {
        self.profiles.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.profiles.contains_key(id)
    }

    /// Apply a pushed avatar change. Profiles are only patched, never
    /// created, from pushes; returns false for an id we don't cache.
    pub fn set_avatar(&mut self, id: &str, base64pfp: String) -> bool {
        match self.profiles.get_mut(id) {
            Some(profile) => {
                profile.base64pfp = Some(base64pfp);
                true
            }
            None => false,
        }
    }

    /// Take one visibility reference. Cancels any scheduled eviction.
    pub fn enter_view(&mut self, id: &str) {
        self.evict_at.remove(id);
        *self.visible.entry(id.to_string()).or_insert(0) += 1;
    }

    /// Release one visibility reference. When the count reaches zero the
    /// profile is kept until `deadline`, then becomes sweepable. Unbalanced
    /// releases saturate at zero rather than underflow.
    pub fn leave_view(&mut self, id: &str, deadline: Instant) {
        let now_zero = match self.visible.get_mut(id) {
            Some(count) => {
                *count = count.saturating_sub(1);
                *count == 0
            }
            None => true,
        };
        if now_zero {
            self.visible.remove(id);
            self.evict_at.insert(id.to_string(), deadline);
        }
    }

    pub fn visible_count(&self, id: &str) -> usize {
        self.visible.get(id).copied().unwrap_or(0)
    }

    /// Drop a user outright, references or not. Used for `user_delete`.
    pub fn remove(&mut self, id: &str) -> Option<UserProfile> {
        self.visible.remove(id);
        self.evict_at.remove(id);
        self.profiles.remove(id)
    }

    /// Purge every profile whose eviction deadline has passed while nothing
    /// was looking at it. Returns the purged ids.
    pub fn sweep(&mut self, now: Instant) -> Vec<Id> {
        let due: Vec<Id> = self
            .evict_at
            .iter()
            .filter(|(id, deadline)| **deadline <= now && self.visible_count(id) == 0)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &due {
            self.evict_at.remove(id);
            self.profiles.remove(id);
        }
        due
    }

    pub fn clear(&mut self) {
        self.profiles.clear();
        self.visible.clear();
        self.evict_at.clear();
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}
