//! Connection acceptance and per-connection reader/writer task split.
//! Generalizes the teacher's `handlers/client.rs::handle_client` (spawn one
//! reader + one writer task per socket, hand off over `mpsc`) onto the
//! `WorldModel`/`Dispatcher` pair instead of `ServerState`/`UserState`.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use irc_proto::Message;
use log::{debug, info, warn};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Notify, mpsc};

use crate::config::Config;
use crate::errors::SessionError;
use crate::session::{Dispatcher, DispatchOutcome, SessionCtx};
use crate::world::WorldModel;

pub struct ServerLoop {
    pub world: Arc<WorldModel>,
    pub config: Arc<Config>,
}

impl ServerLoop {
    pub async fn run(self) -> std::io::Result<()> {
        let addr = format!("{}:{}", self.config.bind_address, self.config.port);
        let listener = TcpListener::bind(&addr).await?;
        info!("irc-muster-server listening on {addr}");
        self.serve(listener).await
    }

    /// Runs the accept loop against an already-bound listener. Split out
    /// from [`ServerLoop::run`] so tests can bind to `127.0.0.1:0` and read
    /// back the OS-assigned port before serving.
    pub async fn serve(self, listener: TcpListener) -> std::io::Result<()> {
        loop {
            let (socket, peer_addr) = listener.accept().await?;
            if self.world.session_count() >= self.config.max_clients {
                debug!("rejecting {peer_addr}: at capacity ({})", self.config.max_clients);
                drop(socket);
                continue;
            }
            let world = self.world.clone();
            let config = self.config.clone();
            tokio::spawn(async move {
                handle_connection(socket, peer_addr, world, config).await;
            });
        }
    }
}

async fn handle_connection(
    socket: TcpStream,
    addr: std::net::SocketAddr,
    world: Arc<WorldModel>,
    config: Arc<Config>,
) {
    info!("client connected: {addr}");
    let _ = socket.set_nodelay(true);

    let (tx_outbound, rx_outbound) = mpsc::channel::<Message>(config.outbound_queue_size);
    let session = world.connect(addr, tx_outbound);
    let client_id = session.id;

    let (read_half, write_half) = tokio::io::split(socket);

    // Shared between the two tasks so the writer's idle-timeout detection
    // can actually stop the reader, which otherwise stays parked on
    // `read_line` forever for a silently-idle-but-still-open socket.
    let disconnect = Arc::new(Notify::new());
    let fatal: Arc<Mutex<Option<SessionError>>> = Arc::new(Mutex::new(None));

    let writer_world = world.clone();
    let writer_handle = tokio::spawn(writer_task(
        write_half,
        rx_outbound,
        writer_world,
        client_id,
        config.ping_frequency_ms,
        config.idle_timeout_ms,
        disconnect.clone(),
        fatal.clone(),
    ));

    let read_err = reader_task(read_half, world.clone(), client_id, config.clone(), disconnect).await;

    writer_handle.abort();
    let reason = read_err
        .or_else(|| fatal.lock().unwrap().take())
        .map(|e| e.quit_reason())
        .unwrap_or_else(|| "Connection closed".to_string());
    let outcome = world.quit(client_id, &reason).await;
    debug!("client {client_id} ({addr}) disconnected, quit hostmask {}", outcome.hostmask);
}

/// Drives the read half until the client disconnects, sends QUIT, or the
/// writer signals a fatal idle timeout via `disconnect`. Returns the
/// [`SessionError`] that ended the session, if the reader itself observed
/// one (a timeout detected by the writer is reported via the caller's
/// `fatal` slot instead, since this function never sees it directly).
async fn reader_task(
    read_half: tokio::io::ReadHalf<TcpStream>,
    world: Arc<WorldModel>,
    client_id: u64,
    config: Arc<Config>,
    disconnect: Arc<Notify>,
) -> Option<SessionError> {
    let mut reader = BufReader::new(read_half);
    let mut line = String::new();
    let dispatcher = Dispatcher {
        world: world.clone(),
        oper_name: config.oper_name.clone(),
        oper_password: config.oper_password.clone(),
        motd: config.motd.clone(),
        network_name: config.network_name.clone(),
    };
    let mut ctx = SessionCtx::new(client_id);

    loop {
        line.clear();
        let read_result = tokio::select! {
            result = reader.read_line(&mut line) => result,
            _ = disconnect.notified() => {
                debug!("client {client_id} idle-timed out, reader cancelled by writer");
                return None;
            }
        };
        match read_result {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                warn!("client {client_id} read error: {e}");
                return Some(SessionError::Io(e));
            }
        }

        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed.is_empty() {
            continue;
        }

        let msg = match Message::decode(trimmed) {
            Ok(m) => m,
            Err(e) => {
                debug!("client {client_id} sent malformed line: {e}");
                continue;
            }
        };

        if let Some(session) = world.get(client_id) {
            session.touch().await;
        }

        match dispatcher.dispatch(&mut ctx, msg).await {
            DispatchOutcome::Continue => {}
            DispatchOutcome::Quit(reason) => {
                if let Some(session) = world.get(client_id) {
                    session
                        .send(Message::new("ERROR", vec![format!("Closing Link: {reason}")]))
                        .await;
                }
                break;
            }
        }
    }
    None
}

async fn writer_task(
    mut write_half: tokio::io::WriteHalf<TcpStream>,
    mut rx_outbound: mpsc::Receiver<Message>,
    world: Arc<WorldModel>,
    client_id: u64,
    ping_frequency_ms: u64,
    idle_timeout_ms: u64,
    disconnect: Arc<Notify>,
    fatal: Arc<Mutex<Option<SessionError>>>,
) {
    let mut ticker = tokio::time::interval(Duration::from_millis(ping_frequency_ms.max(1_000)));
    ticker.tick().await;

    loop {
        tokio::select! {
            maybe_msg = rx_outbound.recv() => {
                match maybe_msg {
                    Some(msg) => {
                        if let Err(e) = write_half.write_all(msg.encode().as_bytes()).await {
                            warn!("client {client_id} write error: {e}");
                            *fatal.lock().unwrap() = Some(SessionError::Io(e));
                            disconnect.notify_waiters();
                            break;
                        }
                    }
                    None => break,
                }
            }
            _ = ticker.tick() => {
                let Some(session) = world.get(client_id) else { break };
                let idle = session.last_activity.read().await.elapsed();
                if idle >= Duration::from_millis(idle_timeout_ms) {
                    let _ = write_half
                        .write_all(Message::new("ERROR", vec!["Closing Link: Ping timeout".to_string()]).encode().as_bytes())
                        .await;
                    *fatal.lock().unwrap() = Some(SessionError::Timeout);
                    disconnect.notify_waiters();
                    break;
                }
                let token = format!("{client_id:x}");
                *session.ping_token.write().await = Some(token.clone());
                if write_half
                    .write_all(Message::new("PING", vec![token]).encode().as_bytes())
                    .await
                    .is_err()
                {
                    break;
                }
            }
        }
    }
    let _ = write_half.shutdown().await;
}
