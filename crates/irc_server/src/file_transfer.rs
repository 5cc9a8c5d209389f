//! DCC rendezvous service: a length-prefixed, opcode-tagged binary protocol
//! spoken over its own TCP listener, independent of the IRC connection.
//! Generalizes the teacher's reader/writer task split
//! (`handlers/client.rs::handle_client`) to a raw binary frame reader
//! instead of a line-buffered text reader, and its `ServerState.channels`
//! `DashMap` pattern to a `DashMap<Token, Arc<Pipe>>` pairing table.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use log::{debug, info, warn};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Notify, mpsc};
use tokio::time::timeout;

pub type Token = [u8; 16];

const OP_HELLO: u8 = 0x01;
const OP_DATA: u8 = 0x02;
const OP_EOF: u8 = 0x03;
const OP_ACK: u8 = 0x04;
const OP_ERROR: u8 = 0x7F;

const PROTOCOL_VERSION: u8 = 1;
const ROLE_SENDER: u8 = 1;
const ROLE_RECEIVER: u8 = 2;

const MAX_CHUNK_LEN: usize = 64 * 1024;
const PIPE_QUEUE_DEPTH: usize = 16;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TransferError {
    #[error("no HELLO received")]
    NoHello,
    #[error("unsupported protocol version")]
    UnknownVersion,
    #[error("unknown role")]
    UnknownRole,
    #[error("unknown opcode")]
    UnknownOp,
    #[error("malformed frame")]
    BadFraming,
    #[error("idle timeout")]
    Timeout,
    #[error("broken pipe")]
    BrokenPipe,
    #[error("a sender is already attached to this token")]
    MultipleSenders,
    #[error("a receiver is already attached to this token")]
    MultipleReceivers,
}

impl TransferError {
    pub fn code(self) -> u16 {
        match self {
            TransferError::NoHello => 1,
            TransferError::UnknownVersion => 2,
            TransferError::UnknownRole => 3,
            TransferError::UnknownOp => 4,
            TransferError::BadFraming => 5,
            TransferError::Timeout => 6,
            TransferError::BrokenPipe => 7,
            TransferError::MultipleSenders => 8,
            TransferError::MultipleReceivers => 9,
        }
    }
}

/// One chunk relayed through a [`Pipe`], or a control signal. `Broken`
/// carries the error that ended one side early so the other side can report
/// the same failure to its own peer instead of reading a bare channel close
/// and assuming a clean EOF.
enum PipeMsg {
    Data(Bytes),
    Eof,
    Broken(TransferError),
}

/// One rendezvous point for a DCC transfer, keyed by the token carried in
/// both sides' HELLO frames. `sender_attached`/`receiver_attached` are
/// compare-and-set gates: a second attempt to bind an already-bound role is
/// rejected with MULTIPLE_SENDERS/MULTIPLE_RECEIVERS rather than silently
/// replacing the existing peer.
///
/// `tx`/`rx` each sit behind a `Mutex<Option<..>>` so a connection whose own
/// side errors out can take and drop (or use) its half explicitly: dropping
/// `rx` makes the sender's next `tx.send()` fail immediately instead of
/// filling the bounded queue and blocking forever, and sending
/// `PipeMsg::Broken` through `tx` wakes a receiver parked on `rx.recv()`
/// instead of leaving it there until the universe ends.
pub struct Pipe {
    sender_attached: AtomicBool,
    receiver_attached: AtomicBool,
    tx: tokio::sync::Mutex<Option<mpsc::Sender<PipeMsg>>>,
    rx: tokio::sync::Mutex<Option<mpsc::Receiver<PipeMsg>>>,
    both_ready: Notify,
}

impl Pipe {
    fn new() -> Arc<Self> {
        let (tx, rx) = mpsc::channel(PIPE_QUEUE_DEPTH);
        Arc::new(Pipe {
            sender_attached: AtomicBool::new(false),
            receiver_attached: AtomicBool::new(false),
            tx: tokio::sync::Mutex::new(Some(tx)),
            rx: tokio::sync::Mutex::new(Some(rx)),
            both_ready: Notify::new(),
        })
    }

    fn attach(&self, role: u8) -> Result<(), TransferError> {
        match role {
            ROLE_SENDER => {
                if self.sender_attached.swap(true, Ordering::AcqRel) {
                    return Err(TransferError::MultipleSenders);
                }
            }
            ROLE_RECEIVER => {
                if self.receiver_attached.swap(true, Ordering::AcqRel) {
                    return Err(TransferError::MultipleReceivers);
                }
            }
            _ => return Err(TransferError::UnknownRole),
        }
        if self.sender_attached.load(Ordering::Acquire) && self.receiver_attached.load(Ordering::Acquire) {
            self.both_ready.notify_waiters();
        }
        Ok(())
    }

    fn both_attached(&self) -> bool {
        self.sender_attached.load(Ordering::Acquire) && self.receiver_attached.load(Ordering::Acquire)
    }
}

pub struct FileTransferService {
    pipes: DashMap<Token, Arc<Pipe>>,
    idle_timeout: Duration,
}

impl FileTransferService {
    pub fn new(idle_timeout_secs: u64) -> Arc<Self> {
        Arc::new(FileTransferService {
            pipes: DashMap::new(),
            idle_timeout: Duration::from_secs(idle_timeout_secs),
        })
    }

    pub async fn run(self: Arc<Self>, bind_address: &str, port: u16) -> std::io::Result<()> {
        let addr = format!("{bind_address}:{port}");
        let listener = TcpListener::bind(&addr).await?;
        info!("FileTransferService listening on {addr}");
        self.serve(listener).await
    }

    /// Runs the accept loop against an already-bound listener, so tests can
    /// bind `127.0.0.1:0` and read back the OS-assigned port.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> std::io::Result<()> {
        loop {
            let (socket, peer) = listener.accept().await?;
            let service = self.clone();
            tokio::spawn(async move {
                if let Err(e) = service.handle_connection(socket).await {
                    debug!("DCC connection from {peer} ended: {e}");
                }
            });
        }
    }

    fn get_or_create_pipe(&self, token: Token) -> Arc<Pipe> {
        self.pipes.entry(token).or_insert_with(Pipe::new).clone()
    }

    fn remove_pipe(&self, token: &Token) {
        self.pipes.remove(token);
    }

    async fn handle_connection(&self, mut socket: TcpStream) -> Result<(), TransferError> {
        let (role, token, filename, declared_size) = match read_hello(&mut socket, self.idle_timeout).await {
            Ok(hello) => hello,
            Err(e) => {
                let _ = write_error(&mut socket, e).await;
                return Err(e);
            }
        };
        debug!("DCC HELLO role={role} token={token:02x?} filename={filename} size={declared_size}");

        let pipe = self.get_or_create_pipe(token);
        // Registered before `attach()` so a `notify_waiters()` racing with
        // this task's own subscription is never missed (Notify's documented
        // "notified before polled" guarantee).
        let notified = pipe.both_ready.notified();
        if let Err(e) = pipe.attach(role) {
            let _ = write_error(&mut socket, e).await;
            return Err(e);
        }

        if !pipe.both_attached() {
            if timeout(self.idle_timeout, notified).await.is_err() {
                self.remove_pipe(&token);
                let _ = write_error(&mut socket, TransferError::Timeout).await;
                return Err(TransferError::Timeout);
            }
        }

        let result = if role == ROLE_SENDER {
            self.run_sender(&mut socket, &pipe).await
        } else {
            self.run_receiver(&mut socket, &pipe).await
        };

        if let Err(e) = &result {
            let _ = write_error(&mut socket, *e).await;
            // Unblock whichever side of the pipe is still waiting on us
            // instead of leaving it parked forever.
            if role == ROLE_SENDER {
                if let Some(tx) = pipe.tx.lock().await.take() {
                    let _ = tx.send(PipeMsg::Broken(*e)).await;
                }
            } else {
                *pipe.rx.lock().await = None;
            }
        }
        self.remove_pipe(&token);
        result
    }

    async fn run_sender(&self, socket: &mut TcpStream, pipe: &Arc<Pipe>) -> Result<(), TransferError> {
        let tx = pipe.tx.lock().await.clone().ok_or(TransferError::BrokenPipe)?;
        let mut total: u64 = 0;
        loop {
            let frame = timeout(self.idle_timeout, read_length_prefixed_frame(socket))
                .await
                .map_err(|_| TransferError::Timeout)?
                .map_err(|_| TransferError::BadFraming)?;
            match frame.first().copied() {
                Some(OP_DATA) => {
                    if frame.len() < 5 {
                        return Err(TransferError::BadFraming);
                    }
                    let chunk_len = u32::from_be_bytes(frame[1..5].try_into().unwrap()) as usize;
                    let chunk = &frame[5..];
                    if chunk_len > MAX_CHUNK_LEN || chunk.len() != chunk_len {
                        return Err(TransferError::BadFraming);
                    }
                    total += chunk_len as u64;
                    tx.send(PipeMsg::Data(Bytes::copy_from_slice(chunk)))
                        .await
                        .map_err(|_| TransferError::BrokenPipe)?;
                }
                Some(OP_EOF) => {
                    let _ = tx.send(PipeMsg::Eof).await;
                    break;
                }
                _ => return Err(TransferError::UnknownOp),
            }
        }
        let ack = read_final_ack(socket, self.idle_timeout).await?;
        if ack != total {
            debug!("sender-reported total {total} != receiver ACK {ack}");
        }
        Ok(())
    }

    async fn run_receiver(&self, socket: &mut TcpStream, pipe: &Arc<Pipe>) -> Result<(), TransferError> {
        let mut rx_guard = pipe.rx.lock().await;
        let rx = rx_guard.as_mut().ok_or(TransferError::BrokenPipe)?;
        let mut total: u64 = 0;
        loop {
            match rx.recv().await {
                Some(PipeMsg::Data(chunk)) => {
                    write_data_frame(socket, &chunk).await.map_err(|_| TransferError::BrokenPipe)?;
                    total += chunk.len() as u64;
                }
                Some(PipeMsg::Eof) | None => break,
                Some(PipeMsg::Broken(e)) => return Err(e),
            }
        }
        write_frame(socket, OP_EOF, &[]).await.map_err(|_| TransferError::BrokenPipe)?;
        write_frame(socket, OP_ACK, &total.to_be_bytes()).await.map_err(|_| TransferError::BrokenPipe)?;
        Ok(())
    }
}

async fn read_hello(socket: &mut TcpStream, idle_timeout: Duration) -> Result<(u8, Token, String, u64), TransferError> {
    let frame = timeout(idle_timeout, read_length_prefixed_frame(socket))
        .await
        .map_err(|_| TransferError::Timeout)?
        .map_err(|_| TransferError::BadFraming)?;

    if frame.first().copied() != Some(OP_HELLO) {
        return Err(TransferError::NoHello);
    }
    let body = &frame[1..];
    if body.len() < 1 + 1 + 16 + 2 + 8 {
        return Err(TransferError::BadFraming);
    }
    let version = body[0];
    if version != PROTOCOL_VERSION {
        return Err(TransferError::UnknownVersion);
    }
    let role = body[1];
    if role != ROLE_SENDER && role != ROLE_RECEIVER {
        return Err(TransferError::UnknownRole);
    }
    let mut token = [0u8; 16];
    token.copy_from_slice(&body[2..18]);
    let name_len = u16::from_be_bytes([body[18], body[19]]) as usize;
    if body.len() < 20 + name_len + 8 {
        return Err(TransferError::BadFraming);
    }
    let filename = String::from_utf8(body[20..20 + name_len].to_vec()).map_err(|_| TransferError::BadFraming)?;
    let size_offset = 20 + name_len;
    let declared_size = u64::from_be_bytes(body[size_offset..size_offset + 8].try_into().unwrap());

    Ok((role, token, filename, declared_size))
}

/// Reads the generic `len(u32) | opcode(u8) | payload` envelope and returns
/// `opcode || payload` as one buffer for the caller to interpret.
async fn read_length_prefixed_frame(socket: &mut TcpStream) -> std::io::Result<Vec<u8>> {
    let len = socket.read_u32().await? as usize;
    if len == 0 || len > 1 + MAX_CHUNK_LEN + 64 {
        return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "frame too large"));
    }
    let mut buf = vec![0u8; len];
    socket.read_exact(&mut buf).await?;
    Ok(buf)
}

async fn read_final_ack(socket: &mut TcpStream, idle_timeout: Duration) -> Result<u64, TransferError> {
    let frame = timeout(idle_timeout, read_length_prefixed_frame(socket))
        .await
        .map_err(|_| TransferError::Timeout)?
        .map_err(|_| TransferError::BadFraming)?;
    if frame.first().copied() != Some(OP_ACK) || frame.len() < 9 {
        return Err(TransferError::BadFraming);
    }
    Ok(u64::from_be_bytes(frame[1..9].try_into().unwrap()))
}

async fn write_frame(socket: &mut TcpStream, opcode: u8, payload: &[u8]) -> std::io::Result<()> {
    let len = (1 + payload.len()) as u32;
    socket.write_u32(len).await?;
    socket.write_u8(opcode).await?;
    socket.write_all(payload).await
}

async fn write_data_frame(socket: &mut TcpStream, chunk: &Bytes) -> std::io::Result<()> {
    let mut payload = Vec::with_capacity(4 + chunk.len());
    payload.extend_from_slice(&(chunk.len() as u32).to_be_bytes());
    payload.extend_from_slice(chunk);
    write_frame(socket, OP_DATA, &payload).await
}

async fn write_error(socket: &mut TcpStream, err: TransferError) -> std::io::Result<()> {
    warn!("DCC transfer error: {err}");
    write_frame(socket, OP_ERROR, &err.code().to_be_bytes()).await
}
