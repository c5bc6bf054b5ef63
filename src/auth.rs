//! Session lifecycle: login, register, refresh, logout, account deletion.
//!
//! The session is a watch channel carrying `Option<UserProfile>`; the
//! connection supervisor subscribes to it and opens or closes the socket as
//! the session comes and goes. Refresh is fail-closed: any failure drops the
//! session, whatever the cause, and the supervisor tears the connection down.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use log::{debug, info, warn};
use tokio::sync::watch;

use crate::client::Client;
use crate::error::ClientError;
use crate::types::UserProfile;
use crate::types::events::{LoggedIn, LoggedOut};

impl Client {
    pub async fn login(&self, username: &str, password: &str) -> Result<UserProfile, ClientError> {
        let profile = self.api.login(username, password).await?;
        info!(target: "Client/Session", "Logged in as {} ({})", profile.username, profile.id);
        self.set_session(Some(profile.clone()));
        Ok(profile)
    }

    pub async fn register(&self, username: &str, password: &str) -> Result<UserProfile, ClientError> {
        let profile = self.api.register(username, password).await?;
        info!(target: "Client/Session", "Registered as {} ({})", profile.username, profile.id);
        self.set_session(Some(profile.clone()));
        Ok(profile)
    }

    /// End the session. The local session is dropped even when the server
    /// call fails; the cookie is gone either way.
    pub async fn logout(&self) -> Result<(), ClientError> {
        let result = self.api.logout().await;
        self.set_session(None);
        result.map_err(Into::into)
    }

    /// Delete the account server-side, then drop the session. Other clients
    /// learn about it through the `user_delete` push.
    pub async fn delete_account(&self) -> Result<(), ClientError> {
        self.api.delete_account().await?;
        info!(target: "Client/Session", "Account deleted");
        self.set_session(None);
        Ok(())
    }

    pub fn current_user(&self) -> Option<UserProfile> {
        self.session.borrow().clone()
    }

    pub fn is_logged_in(&self) -> bool {
        self.session.borrow().is_some()
    }

    /// Observe session transitions. The supervisor uses this; so can a UI.
    pub fn subscribe_session(&self) -> watch::Receiver<Option<UserProfile>> {
        self.session.subscribe()
    }

    /// Try to restore or extend the session from the cookie. Returns whether
    /// a session is live afterwards. Failure while a session exists drops it.
    pub(crate) async fn try_refresh(&self) -> bool {
        match self.api.refresh().await {
            Ok(profile) => {
                debug!(target: "Client/Session", "Session refreshed for {}", profile.username);
                self.set_session(Some(profile));
                true
            }
            Err(e) => {
                if self.is_logged_in() {
                    warn!(target: "Client/Session", "Session refresh failed, dropping session: {e}");
                    self.set_session(None);
                } else {
                    debug!(target: "Client/Session", "No session to restore: {e}");
                }
                false
            }
        }
    }

    /// Periodic refresh, at half the server's credential lifetime. Exits on
    /// shutdown.
    pub(crate) async fn refresh_loop(&self) {
        let mut interval = tokio::time::interval(self.config.session_refresh_interval);
        // the startup refresh already ran; skip the immediate tick
        interval.tick().await;
        loop {
            tokio::select! {
                biased;
                _ = self.shutdown_notifier.notified() => {
                    debug!(target: "Client/Session", "Shutdown signaled, exiting refresh loop");
                    return;
                }
                _ = interval.tick() => {
                    if !self.is_running.load(Ordering::Relaxed) {
                        return;
                    }
                    if self.is_logged_in() {
                        self.try_refresh().await;
                    }
                }
            }
        }
    }

    /// Publish a session transition and emit the matching bus event.
    pub(crate) fn set_session(&self, user: Option<UserProfile>) {
        let previous = self.session.borrow().clone();
        if previous == user {
            return;
        }
        self.session.send_replace(user.clone());

        match (previous, user) {
            (prev, Some(next)) if prev.as_ref().map(|p| &p.id) != Some(&next.id) => {
                let _ = self
                    .event_bus
                    .logged_in
                    .send(Arc::new(LoggedIn { user: next }));
            }
            (Some(_), Some(next)) => {
                // same account, updated profile data
                let _ = self.event_bus.user_updated.send(Arc::new(next));
            }
            (Some(_), None) => {
                let _ = self.event_bus.logged_out.send(Arc::new(LoggedOut));
            }
            // `(None, Some(_))` always matches the guarded arm above; this
            // arm exists only to satisfy exhaustiveness.
            (None, _) => {}
        }
    }
}
