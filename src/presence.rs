//! Profile cache lifecycle: fetch-on-demand, visibility refs, timed eviction.
//!
//! Every message held in the active room's log takes one visibility
//! reference on its author; the reference is released when the message goes
//! away (deleted, or the room closed). A profile whose last reference is
//! released lingers for a grace period before the sweep purges it, so
//! leaving a room and coming straight back does not refetch everyone.
//!
//! The signed-in user is special: their profile lives in the session, never
//! in the cache, and they neither take nor hold references.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Instant;

use log::{debug, warn};

use crate::client::Client;
use crate::error::ClientError;
use crate::types::{Id, UserProfile};

impl Client {
    /// Look up a cached profile. The current identity resolves from the live
    /// session without touching the cache.
    pub async fn user(&self, id: &str) -> Option<UserProfile> {
        if let Some(current) = self.current_user() {
            if current.id == id {
                return Some(current);
            }
        }
        self.users.read().await.get(id).cloned()
    }

    /// Fetch and cache a profile unless it is already cached (or it is the
    /// current identity, which never caches). `force` refetches a cached one.
    ///
    /// A response that lands after the connection turned over, or after the
    /// last thing referencing the profile went away, is discarded rather
    /// than allowed to revive evicted state.
    pub async fn ensure_cached(&self, id: &str, force: bool) -> Result<(), ClientError> {
        if self.current_user().map(|u| u.id).as_deref() == Some(id) {
            return Ok(());
        }
        if !force && self.users.read().await.contains(id) {
            return Ok(());
        }

        let generation = self.connection_generation.load(Ordering::SeqCst);
        let profile = self.api.get_user(id).await?;

        if self.connection_generation.load(Ordering::SeqCst) != generation {
            debug!(target: "Client/Presence", "Discarding profile fetch for {id}: connection turned over");
            return Ok(());
        }
        let mut users = self.users.write().await;
        if users.visible_count(id) == 0 && !users.contains(id) {
            debug!(target: "Client/Presence", "Discarding profile fetch for {id}: no longer referenced");
            return Ok(());
        }
        users.insert(profile.clone());
        drop(users);

        let _ = self.event_bus.user_updated.send(Arc::new(profile));
        Ok(())
    }

    pub(crate) fn spawn_ensure_cached(self: &Arc<Self>, id: Id) {
        let client = self.clone();
        tokio::spawn(async move {
            if let Err(e) = client.ensure_cached(&id, false).await {
                warn!(target: "Client/Presence", "Could not fetch profile for {id}: {e}");
            }
        });
    }

    /// Take one visibility reference for `id`. No-op for the current
    /// identity.
    pub(crate) async fn take_user_ref(&self, id: &str) {
        if self.current_user().map(|u| u.id).as_deref() == Some(id) {
            return;
        }
        self.users.write().await.enter_view(id);
    }

    /// Release one visibility reference for `id`, starting the eviction
    /// grace period if it was the last. No-op for the current identity.
    pub(crate) async fn release_user_ref(&self, id: &str) {
        if self.current_user().map(|u| u.id).as_deref() == Some(id) {
            return;
        }
        let deadline = Instant::now() + self.config.presence_grace;
        self.users.write().await.leave_view(id, deadline);
    }

    /// Periodically purge profiles whose grace period ran out with nothing
    /// referencing them.
    pub(crate) async fn presence_sweep_loop(self: &Arc<Self>) {
        let mut interval = tokio::time::interval(self.config.presence_sweep_interval);
        loop {
            tokio::select! {
                biased;
                _ = self.shutdown_notifier.notified() => break,
                _ = interval.tick() => {
                    if !self.is_running.load(Ordering::Relaxed) {
                        break;
                    }
                    let purged = self.users.write().await.sweep(Instant::now());
                    if !purged.is_empty() {
                        debug!(
                            target: "Client/Presence",
                            "Evicted {} idle profile(s) from the cache", purged.len()
                        );
                    }
                }
            }
        }
        debug!(target: "Client/Presence", "Presence sweep loop stopped");
    }
}
