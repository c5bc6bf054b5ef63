use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use anyhow::Result;
use log::{debug, error, info, warn};
use tokio::sync::{Mutex, Notify, RwLock, mpsc, watch};
use tokio::time::{Duration, sleep};

use crate::api::ApiClient;
use crate::chatlog::MessageLog;
use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::events::ServerEvent;
use crate::net::{HttpClient, Transport, TransportEvent, TransportFactory};
use crate::rooms::RoomDirectory;
use crate::types::events::{
    AttachmentState, AttachmentUpdate, Connected, Disconnected, EventBus, MessageRemoved,
    RoomClosedReason, RoomRemoved, TransientError, UserRemoved,
};
use crate::types::{Id, UserProfile};
use crate::users::UserDirectory;

/// The room the connection is currently joined to. One at a time; the server
/// ties membership to the socket.
#[derive(Debug, Clone)]
pub(crate) struct ActiveRoom {
    pub id: Id,
    pub author_id: Id,
}

/// A file selected for the next message, waiting for the server to grant a
/// message id to upload it under.
pub(crate) struct StagedAttachment {
    pub room_id: Id,
    pub provisional_id: Id,
    pub filename: String,
    pub mime: String,
    pub data: Vec<u8>,
}

/// How one pass of the event loop ended.
enum LoopExit {
    /// `shutdown`/`disconnect` was requested.
    Shutdown,
    /// The session went away or switched identity; reconnect on next session.
    SessionEnded,
    /// The transport closed after we asked it to.
    Expected,
    /// The transport dropped on its own.
    TransportLost,
}

pub struct Client {
    pub(crate) config: ClientConfig,
    pub api: Arc<ApiClient>,
    pub event_bus: EventBus,

    pub(crate) session: watch::Sender<Option<UserProfile>>,

    pub(crate) rooms: RwLock<RoomDirectory>,
    pub(crate) users: RwLock<UserDirectory>,
    pub(crate) chatlog: RwLock<MessageLog>,
    pub(crate) active_room: RwLock<Option<ActiveRoom>>,
    pub(crate) staged_attachment: Mutex<Option<StagedAttachment>>,

    pub(crate) transport: Mutex<Option<Arc<dyn Transport>>>,
    pub(crate) transport_events: Mutex<Option<mpsc::Receiver<TransportEvent>>>,
    pub(crate) transport_factory: Arc<dyn TransportFactory>,

    pub(crate) is_connecting: AtomicBool,
    pub(crate) is_running: AtomicBool,
    pub(crate) connected: AtomicBool,
    pub(crate) expected_disconnect: AtomicBool,
    pub(crate) shutdown_notifier: Notify,

    /// Incremented on each new connection. Used to discard responses of
    /// profile fetches started under a previous connection.
    pub(crate) connection_generation: AtomicU64,

    pub enable_auto_reconnect: AtomicBool,
    pub(crate) auto_reconnect_errors: AtomicU32,
    pub last_successful_connect: Mutex<Option<chrono::DateTime<chrono::Utc>>>,

    /// When set, the room directory mirrors `/api/rooms?own=true` and pushed
    /// updates for other people's rooms are not merged in.
    pub(crate) own_rooms_only: AtomicBool,
}

impl Client {
    pub fn new(
        config: ClientConfig,
        transport_factory: Arc<dyn TransportFactory>,
        http_client: Arc<dyn HttpClient>,
    ) -> Arc<Self> {
        let api = Arc::new(ApiClient::new(http_client, config.base_url.clone()));
        let (session, _) = watch::channel(None);
        let auto_reconnect = config.auto_reconnect;

        Arc::new(Self {
            config,
            api,
            event_bus: EventBus::new(),
            session,
            rooms: RwLock::new(RoomDirectory::new()),
            users: RwLock::new(UserDirectory::new()),
            chatlog: RwLock::new(MessageLog::new()),
            active_room: RwLock::new(None),
            staged_attachment: Mutex::new(None),
            transport: Mutex::new(None),
            transport_events: Mutex::new(None),
            transport_factory,
            is_connecting: AtomicBool::new(false),
            is_running: AtomicBool::new(false),
            connected: AtomicBool::new(false),
            expected_disconnect: AtomicBool::new(false),
            shutdown_notifier: Notify::new(),
            connection_generation: AtomicU64::new(0),
            enable_auto_reconnect: AtomicBool::new(auto_reconnect),
            auto_reconnect_errors: AtomicU32::new(0),
            last_successful_connect: Mutex::new(None),
            own_rooms_only: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Filter the room directory to rooms the user authored. Takes effect on
    /// the next directory refresh and gates which pushed updates merge.
    pub fn set_own_rooms_only(&self, enabled: bool) {
        self.own_rooms_only.store(enabled, Ordering::Relaxed);
    }

    pub fn set_auto_reconnect(&self, enabled: bool) {
        self.enable_auto_reconnect.store(enabled, Ordering::Relaxed);
    }

    /// Drive the client: restore the session from a leftover cookie, keep it
    /// refreshed, and keep the realtime connection matched to it. Returns
    /// when `shutdown` is called, or after a connection loss when
    /// auto-reconnect is off.
    pub async fn run(self: &Arc<Self>) {
        if self.is_running.swap(true, Ordering::SeqCst) {
            warn!(target: "Client", "Client `run` method called while already running.");
            return;
        }

        // Startup refresh: a cookie from a previous process may still be
        // valid. Failure just means starting logged out.
        self.try_refresh().await;

        let refresh_client = self.clone();
        tokio::spawn(async move { refresh_client.refresh_loop().await });
        let sweep_client = self.clone();
        tokio::spawn(async move { sweep_client.presence_sweep_loop().await });

        let mut session_rx = self.session.subscribe();

        'supervisor: while self.is_running.load(Ordering::Relaxed) {
            // Wait for a session to connect under.
            let user = loop {
                if let Some(user) = session_rx.borrow_and_update().clone() {
                    break user;
                }
                tokio::select! {
                    biased;
                    _ = self.shutdown_notifier.notified() => break 'supervisor,
                    changed = session_rx.changed() => {
                        if changed.is_err() {
                            break 'supervisor;
                        }
                    }
                }
            };

            self.expected_disconnect.store(false, Ordering::Relaxed);

            if let Err(e) = self.connect().await {
                error!(target: "Client", "Failed to connect: {e:#}");
                if !self.wait_before_reconnect(&mut session_rx).await {
                    break 'supervisor;
                }
                continue;
            }

            self.auto_reconnect_errors.store(0, Ordering::Relaxed);
            *self.last_successful_connect.lock().await = Some(chrono::Utc::now());

            // Seed the directory for this connection; pushes keep it current
            // from here on.
            if let Err(e) = self.refresh_rooms().await {
                warn!(target: "Client", "Initial room list fetch failed: {e}");
            }

            let exit = self.read_events_loop(&mut session_rx, &user).await;
            self.cleanup_connection_state().await;
            let _ = self.event_bus.disconnected.send(Arc::new(Disconnected));

            match exit {
                LoopExit::Shutdown => break 'supervisor,
                LoopExit::Expected => {
                    debug!(target: "Client", "Event loop exited gracefully (expected disconnect).");
                    if !self.is_running.load(Ordering::Relaxed) {
                        break 'supervisor;
                    }
                }
                LoopExit::SessionEnded => {
                    debug!(target: "Client", "Connection closed with its session.");
                }
                LoopExit::TransportLost => {
                    if !self.enable_auto_reconnect.load(Ordering::Relaxed) {
                        info!(target: "Client", "Auto-reconnect disabled, shutting down.");
                        self.is_running.store(false, Ordering::Relaxed);
                        break 'supervisor;
                    }
                    if !self.wait_before_reconnect(&mut session_rx).await {
                        break 'supervisor;
                    }
                }
            }
        }
        info!(target: "Client", "Client run loop has shut down.");
    }

    /// Back off before the next attempt. Events pushed while the socket was
    /// down are gone; the post-connect directory refresh papers over rooms
    /// but not messages. Returns false when the supervisor should stop.
    async fn wait_before_reconnect(
        &self,
        session_rx: &mut watch::Receiver<Option<UserProfile>>,
    ) -> bool {
        if !self.enable_auto_reconnect.load(Ordering::Relaxed) {
            // Hold until the session changes (a fresh login retries).
            tokio::select! {
                biased;
                _ = self.shutdown_notifier.notified() => return false,
                changed = session_rx.changed() => return changed.is_ok(),
            }
        }

        let error_count = self.auto_reconnect_errors.fetch_add(1, Ordering::SeqCst);
        let delay_secs =
            u64::from(error_count * 2).min(self.config.reconnect_max_delay.as_secs());
        let delay = Duration::from_secs(delay_secs);
        info!(
            target: "Client",
            "Will attempt to reconnect in {:?} (attempt {})",
            delay,
            error_count + 1
        );
        tokio::select! {
            biased;
            _ = self.shutdown_notifier.notified() => false,
            _ = sleep(delay) => true,
        }
    }

    /// Open the realtime connection for the current session.
    pub async fn connect(self: &Arc<Self>) -> Result<(), anyhow::Error> {
        if self.is_connecting.swap(true, Ordering::SeqCst) {
            return Err(ClientError::AlreadyConnected.into());
        }

        let _guard = scopeguard::guard((), |_| {
            self.is_connecting.store(false, Ordering::Relaxed);
        });

        if self.is_connected() {
            return Err(ClientError::AlreadyConnected.into());
        }

        let token = self
            .api
            .cookies
            .get()
            .ok_or(ClientError::NotLoggedIn)?;

        let (transport, transport_events) = self.transport_factory.create_transport(&token).await?;

        self.connection_generation.fetch_add(1, Ordering::SeqCst);
        *self.transport.lock().await = Some(transport);
        *self.transport_events.lock().await = Some(transport_events);
        self.connected.store(true, Ordering::Relaxed);

        let _ = self.event_bus.connected.send(Arc::new(Connected));
        info!(target: "Client", "Realtime connection established");
        Ok(())
    }

    /// Stop the client: close the socket and end the run loop and its
    /// background tasks. The session itself is untouched; call `logout` to
    /// end it.
    pub async fn disconnect(&self) {
        info!(target: "Client", "Disconnecting client intentionally.");
        self.expected_disconnect.store(true, Ordering::Relaxed);
        self.is_running.store(false, Ordering::Relaxed);
        self.shutdown_notifier.notify_waiters();

        if let Some(transport) = self.transport.lock().await.as_ref() {
            transport.disconnect().await;
        }
        self.cleanup_connection_state().await;
    }

    pub(crate) async fn close_transport(&self) {
        if let Some(transport) = self.transport.lock().await.as_ref() {
            transport.disconnect().await;
        }
    }

    async fn cleanup_connection_state(&self) {
        self.connected.store(false, Ordering::Relaxed);
        *self.transport.lock().await = None;
        *self.transport_events.lock().await = None;
        self.staged_attachment.lock().await.take();
        // Membership is tied to the socket server-side; the active room does
        // not survive it.
        self.close_active_room(RoomClosedReason::ConnectionLost).await;
    }

    /// Hand one frame to the transport.
    pub(crate) async fn send_frame(&self, data: &[u8]) -> Result<(), ClientError> {
        let transport = self
            .transport
            .lock()
            .await
            .clone()
            .ok_or(ClientError::NotConnected)?;
        transport.send(data).await.map_err(ClientError::Transport)
    }

    /// Pump transport events, applying frames in arrival order, until the
    /// connection or the session ends. `connected_user` is the identity the
    /// socket was opened under; a session switching to a different account
    /// closes it.
    async fn read_events_loop(
        self: &Arc<Self>,
        session_rx: &mut watch::Receiver<Option<UserProfile>>,
        connected_user: &UserProfile,
    ) -> LoopExit {
        info!(target: "Client", "Starting event processing loop...");

        let mut rx_guard = self.transport_events.lock().await;
        let Some(mut transport_events) = rx_guard.take() else {
            error!(target: "Client", "Cannot start event loop: not connected");
            return LoopExit::TransportLost;
        };
        drop(rx_guard);

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown_notifier.notified() => {
                    info!(target: "Client", "Shutdown signaled in event loop. Exiting.");
                    return LoopExit::Shutdown;
                }
                changed = session_rx.changed() => {
                    if changed.is_err() {
                        return LoopExit::Shutdown;
                    }
                    let next = session_rx.borrow_and_update().clone();
                    match next {
                        Some(user) if user.id == connected_user.id => {
                            // same account, refreshed credentials or profile
                        }
                        _ => {
                            info!(target: "Client", "Session ended, closing realtime connection.");
                            self.expected_disconnect.store(true, Ordering::Relaxed);
                            self.close_transport().await;
                            return LoopExit::SessionEnded;
                        }
                    }
                }
                event = transport_events.recv() => {
                    match event {
                        Some(TransportEvent::DataReceived(data)) => {
                            // Reducers run inline: frames must apply in
                            // arrival order.
                            self.handle_frame(&data).await;
                        }
                        Some(TransportEvent::Connected) => {
                            debug!(target: "Client", "Transport connected event received");
                        }
                        Some(TransportEvent::Disconnected) | None => {
                            if self.expected_disconnect.load(Ordering::Relaxed) {
                                info!(target: "Client", "Transport disconnected as expected.");
                                return LoopExit::Expected;
                            }
                            info!(target: "Client", "Transport disconnected unexpectedly.");
                            return LoopExit::TransportLost;
                        }
                    }
                }
            }
        }
    }

    pub(crate) async fn handle_frame(self: &Arc<Self>, data: &[u8]) {
        let event = match ServerEvent::parse_frame(data) {
            Ok(event) => event,
            Err(e) => {
                warn!(target: "Client/Dispatch", "Dropping malformed frame: {e}");
                return;
            }
        };
        self.apply_event(event).await;
    }

    pub(crate) async fn apply_event(self: &Arc<Self>, event: ServerEvent) {
        match event {
            ServerEvent::ChatMessage(message) => {
                if self.active_room.read().await.is_none() {
                    debug!(target: "Client/Dispatch", "Dropping chat message with no active room");
                    return;
                }
                let author = message.uid.clone();
                self.take_user_ref(&author).await;
                self.chatlog.write().await.append(message.clone());
                let _ = self.event_bus.message.send(Arc::new(message));
                self.spawn_ensure_cached(author);
            }

            ServerEvent::RoomUpdate(patch) => {
                if self.own_rooms_only.load(Ordering::Relaxed) {
                    let own_id = self.current_user().map(|u| u.id);
                    if patch.author_id.is_none() || patch.author_id != own_id {
                        debug!(
                            target: "Client/Dispatch",
                            "Ignoring update for foreign room {} in own-rooms mode", patch.id
                        );
                        return;
                    }
                }
                let mut rooms = self.rooms.write().await;
                rooms.merge(patch.clone());
                let merged = rooms.get(&patch.id).cloned();
                drop(rooms);
                if let Some(room) = merged {
                    let _ = self.event_bus.room_updated.send(Arc::new(room));
                }
            }

            ServerEvent::RoomDelete { id } => {
                if self.rooms.write().await.remove(&id).is_some() {
                    let _ = self
                        .event_bus
                        .room_removed
                        .send(Arc::new(RoomRemoved { id: id.clone() }));
                }
                if self.active_room_id().await.as_deref() == Some(id.as_str()) {
                    // no leave call; the room is already gone server-side
                    self.close_active_room(RoomClosedReason::Deleted).await;
                }
            }

            ServerEvent::PfpUpdate { id, base64pfp } => {
                let mut users = self.users.write().await;
                if users.set_avatar(&id, base64pfp) {
                    let profile = users.get(&id).cloned();
                    drop(users);
                    if let Some(profile) = profile {
                        let _ = self.event_bus.user_updated.send(Arc::new(profile));
                    }
                } else {
                    debug!(target: "Client/Dispatch", "Avatar update for uncached user {id}");
                }
            }

            ServerEvent::UserDelete { id } => {
                self.apply_user_delete(&id).await;
            }

            ServerEvent::RoomError { content } => {
                warn!(target: "Client/Dispatch", "Server rejected a message: {content}");
                let _ = self
                    .event_bus
                    .transient_error
                    .send(Arc::new(TransientError { message: content }));
            }

            ServerEvent::AttachmentUpload { id, room_id } => {
                self.handle_upload_grant(id, room_id).await;
            }

            ServerEvent::AttachmentComplete { id, mime_type } => {
                let done = self
                    .chatlog
                    .write()
                    .await
                    .complete_attachment(&id, mime_type.clone());
                if done {
                    let _ = self.event_bus.attachment_update.send(Arc::new(AttachmentUpdate {
                        message_id: id,
                        state: AttachmentState::Stored { mime_type },
                    }));
                }
            }

            ServerEvent::MessageDelete { id } => {
                let mut chatlog = self.chatlog.write().await;
                let author = chatlog.get(&id).map(|m| m.uid.clone());
                let removed = chatlog.remove(&id);
                drop(chatlog);
                if removed {
                    if let Some(author) = author {
                        self.release_user_ref(&author).await;
                    }
                    let _ = self
                        .event_bus
                        .message_removed
                        .send(Arc::new(MessageRemoved { id }));
                }
            }

            ServerEvent::Unsupported { event_type } => {
                debug!(target: "Client/Dispatch", "Ignoring unsupported event type '{event_type}'");
            }
        }
    }

    /// `user_delete`: the account and everything it authored vanish at once.
    async fn apply_user_delete(self: &Arc<Self>, id: &str) {
        info!(target: "Client/Dispatch", "User {id} deleted, cascading");

        if self.users.write().await.remove(id).is_some() {
            let _ = self
                .event_bus
                .user_removed
                .send(Arc::new(UserRemoved { id: id.to_string() }));
        }

        let removed_rooms = self.rooms.write().await.remove_by_author(id);
        for room_id in &removed_rooms {
            let _ = self
                .event_bus
                .room_removed
                .send(Arc::new(RoomRemoved { id: room_id.clone() }));
        }

        let removed_messages = self.chatlog.write().await.remove_by_author(id);
        for message in removed_messages {
            if let Some(message_id) = message.id {
                let _ = self
                    .event_bus
                    .message_removed
                    .send(Arc::new(MessageRemoved { id: message_id }));
            }
        }

        let close_active = {
            let active = self.active_room.read().await;
            active.as_ref().is_some_and(|room| {
                room.author_id == id || removed_rooms.iter().any(|r| *r == room.id)
            })
        };
        if close_active {
            self.close_active_room(RoomClosedReason::AuthorDeleted).await;
        }

        // Our own account deleted elsewhere: the session is dead too.
        if self.current_user().map(|u| u.id).as_deref() == Some(id) {
            info!(target: "Client/Session", "Own account was deleted, dropping session");
            self.set_session(None);
        }
    }

    /// Id of the currently joined room, if any.
    pub async fn active_room_id(&self) -> Option<Id> {
        self.active_room.read().await.as_ref().map(|r| r.id.clone())
    }
}
