use std::path::Path;
use std::sync::Arc;

use chrono::Local;
use clap::Parser;
use log::{error, info, warn};
use tokio::io::{AsyncBufReadExt, BufReader};

use chinwag::client::Client;
use chinwag::config::ClientConfig;
use chinwag::http::UreqHttpClient;
use chinwag::socket::WebSocketTransportFactory;
use chinwag::types::events::AttachmentState;

/// Terminal client for the chinwag chat service.
///
/// Signs in, keeps the realtime connection alive, and turns stdin lines
/// into messages. Lines starting with '/' are commands; `/help` lists them.
#[derive(Parser, Debug)]
#[command(name = "chinwag", version)]
struct Args {
    /// Base URL of the chat server
    #[arg(long, default_value = "http://localhost:8080")]
    server: String,

    /// Account name to sign in with
    #[arg(short, long)]
    username: String,

    /// Account password
    #[arg(short, long)]
    password: String,

    /// Create the account instead of signing in
    #[arg(long)]
    register: bool,

    /// Join this room right after connecting
    #[arg(long)]
    room: Option<String>,

    /// Show only rooms this account created
    #[arg(long)]
    own_rooms: bool,

    /// Reconnect with backoff when the connection drops
    #[arg(long)]
    auto_reconnect: bool,
}

fn main() {
    let args = Args::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format(|buf, record| {
            use std::io::Write;
            writeln!(
                buf,
                "{} [{:<5}] [{}] - {}",
                Local::now().format("%H:%M:%S"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("Failed to build tokio runtime");

    rt.block_on(async {
        let mut config = ClientConfig::new(args.server.clone());
        config.auto_reconnect = args.auto_reconnect;

        let transport_factory = Arc::new(WebSocketTransportFactory::new(config.websocket_url()));
        let http_client = Arc::new(UreqHttpClient::new());
        let client = Client::new(config, transport_factory, http_client);
        client.set_own_rooms_only(args.own_rooms);

        let printer = tokio::spawn(print_events(client.clone()));

        let mut connected_rx = client.event_bus.connected.subscribe();
        let run_client = client.clone();
        let run_handle = tokio::spawn(async move { run_client.run().await });

        let signin = if args.register {
            client.register(&args.username, &args.password).await
        } else {
            client.login(&args.username, &args.password).await
        };
        let profile = match signin {
            Ok(profile) => profile,
            Err(e) => {
                error!("Could not sign in: {e}");
                client.disconnect().await;
                let _ = run_handle.await;
                printer.abort();
                return;
            }
        };
        info!("Signed in as {}", profile.username);

        if connected_rx.recv().await.is_err() {
            error!("Client stopped before the connection came up");
            return;
        }

        if let Some(room_id) = &args.room {
            join_and_print(&client, room_id).await;
        }

        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        info!("Ready. Type a message, or /help for commands.");
        while let Ok(Some(line)) = lines.next_line().await {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if !line.starts_with('/') {
                if let Err(e) = client.send_message(line).await {
                    warn!("Send failed: {e}");
                }
                continue;
            }
            let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
            match command {
                "/help" => print_help(),
                "/rooms" => match client.refresh_rooms().await {
                    Ok(rooms) => {
                        for room in rooms {
                            info!("{}  {}", room.id, room.name);
                        }
                    }
                    Err(e) => warn!("Could not list rooms: {e}"),
                },
                "/create" => match client.create_room(rest).await {
                    Ok(room) => info!("Created room {} ({})", room.name, room.id),
                    Err(e) => warn!("Create failed: {e}"),
                },
                "/rename" => {
                    let (id, name) = rest.split_once(' ').unwrap_or((rest, ""));
                    match client.rename_room(id, name).await {
                        Ok(room) => info!("Room {} is now '{}'", room.id, room.name),
                        Err(e) => warn!("Rename failed: {e}"),
                    }
                }
                "/delete" => match client.delete_room(rest).await {
                    Ok(()) => info!("Deleted room {rest}"),
                    Err(e) => warn!("Delete failed: {e}"),
                },
                "/join" => join_and_print(&client, rest).await,
                "/leave" => {
                    if let Err(e) = client.leave_room().await {
                        warn!("Leave failed: {e}");
                    }
                }
                "/attach" => {
                    let (path, text) = rest.split_once(' ').unwrap_or((rest, ""));
                    send_attachment(&client, path, text).await;
                }
                "/logout" => {
                    if let Err(e) = client.logout().await {
                        warn!("Logout call failed: {e}");
                    }
                    break;
                }
                "/quit" => break,
                other => warn!("Unknown command {other}; /help lists commands"),
            }
        }

        client.disconnect().await;
        let _ = run_handle.await;
        printer.abort();
        info!("Bye");
    });
}

fn print_help() {
    info!("Commands:");
    info!("  /rooms                 list rooms");
    info!("  /create <name>         create a room");
    info!("  /rename <id> <name>    rename a room you own");
    info!("  /delete <id>           delete a room you own");
    info!("  /join <id>             join a room");
    info!("  /leave                 leave the current room");
    info!("  /attach <path> <text>  send a message with a file attached");
    info!("  /logout                sign out and quit");
    info!("  /quit                  quit");
}

async fn join_and_print(client: &Arc<Client>, room_id: &str) {
    if let Err(e) = client.join_room(room_id).await {
        warn!("Could not join {room_id}: {e}");
        return;
    }
    for message in client.messages().await {
        let name = display_name(client, &message.uid).await;
        info!(target: "Chat", "<{name}> {}", message.content);
    }
}

async fn send_attachment(client: &Arc<Client>, path: &str, text: &str) {
    let data = match tokio::fs::read(path).await {
        Ok(data) => data,
        Err(e) => {
            warn!("Could not read {path}: {e}");
            return;
        }
    };
    let filename = Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "file".to_string());
    let mime = mime_for(&filename);
    if let Err(e) = client
        .send_message_with_attachment(text, &filename, mime, data)
        .await
    {
        warn!("Attachment send failed: {e}");
    }
}

fn mime_for(filename: &str) -> &'static str {
    match filename.rsplit_once('.').map(|(_, ext)| ext) {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("pdf") => "application/pdf",
        Some("txt") => "text/plain",
        _ => "application/octet-stream",
    }
}

async fn display_name(client: &Arc<Client>, uid: &str) -> String {
    match client.user(uid).await {
        Some(profile) => profile.username,
        None => uid.to_string(),
    }
}

async fn print_events(client: Arc<Client>) {
    let mut message = client.event_bus.message.subscribe();
    let mut room_updated = client.event_bus.room_updated.subscribe();
    let mut room_removed = client.event_bus.room_removed.subscribe();
    let mut room_closed = client.event_bus.room_closed.subscribe();
    let mut attachment = client.event_bus.attachment_update.subscribe();
    let mut transient = client.event_bus.transient_error.subscribe();
    let mut blocking = client.event_bus.blocking_error.subscribe();
    let mut logged_out = client.event_bus.logged_out.subscribe();

    loop {
        tokio::select! {
            Ok(m) = message.recv() => {
                let name = display_name(&client, &m.uid).await;
                info!(target: "Chat", "<{name}> {}", m.content);
            }
            Ok(r) = room_updated.recv() => {
                info!(target: "Chat", "Room '{}' updated", r.name);
            }
            Ok(r) = room_removed.recv() => {
                info!(target: "Chat", "Room {} is gone", r.id);
            }
            Ok(c) = room_closed.recv() => {
                info!(target: "Chat", "Left room {} ({:?})", c.room_id, c.reason);
            }
            Ok(a) = attachment.recv() => {
                match &a.state {
                    AttachmentState::Uploading => {
                        info!(target: "Chat", "Uploading attachment for message {}", a.message_id);
                    }
                    AttachmentState::Stored { mime_type } => {
                        info!(
                            target: "Chat",
                            "Attachment for message {} stored ({})",
                            a.message_id,
                            mime_type.as_deref().unwrap_or("unknown type")
                        );
                    }
                    AttachmentState::Failed => {
                        warn!(target: "Chat", "Attachment for message {} failed", a.message_id);
                    }
                }
            }
            Ok(e) = transient.recv() => {
                warn!(target: "Chat", "{}", e.message);
            }
            Ok(e) = blocking.recv() => {
                error!(target: "Chat", "{}", e.message);
            }
            Ok(_) = logged_out.recv() => {
                info!(target: "Chat", "Session ended");
            }
            else => break,
        }
    }
}
