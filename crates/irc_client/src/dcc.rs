//! DCC SEND initiation. Speaks the same length-prefixed, opcode-tagged
//! binary protocol as `irc_server::file_transfer` (opcode constants and
//! frame shapes are duplicated here rather than shared, since they are wire
//! contract, not behavior, and `irc_client` does not depend on `irc_server`).
//!
//! The offered file flows through the server's own `FileTransferService`
//! rather than a direct peer-to-peer socket: this client connects out to
//! the server's file-transfer port as SENDER with a fresh token, and
//! announces that token (plus the server's address/port) to the peer over
//! CTCP so the peer's client can connect as RECEIVER to the same service.

use std::net::Ipv4Addr;
use std::path::Path;

use rand::RngCore;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::client::ClientCore;
use crate::config::ClientConfig;
use crate::errors::ClientError;

const OP_HELLO: u8 = 0x01;
const OP_DATA: u8 = 0x02;
const OP_EOF: u8 = 0x03;
const OP_ACK: u8 = 0x04;

const PROTOCOL_VERSION: u8 = 1;
const ROLE_SENDER: u8 = 1;
const CHUNK_LEN: usize = 32 * 1024;

const CTCP_DELIM: char = '\x01';

pub async fn offer_send(
    core: &ClientCore,
    target: &str,
    file_path: &Path,
    config: &ClientConfig,
) -> Result<(), ClientError> {
    let metadata = tokio::fs::metadata(file_path)
        .await
        .map_err(|e| ClientError::File(e.to_string()))?;
    let size = metadata.len();
    let filename = file_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("transfer.bin")
        .to_string();

    let mut token = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut token);

    let service_host = config.hostname.clone();
    let service_port = config.dcc_service_port;
    let public_addr = config.my_address.unwrap_or(Ipv4Addr::LOCALHOST);

    let token_hex = token.iter().map(|b| format!("{b:02x}")).collect::<String>();
    let announcement = format!(
        "{CTCP_DELIM}DCC SEND {filename} {} {service_port} {size} {token_hex}{CTCP_DELIM}",
        u32::from(public_addr)
    );
    core.privmsg(target, &announcement).await;

    let mut socket = TcpStream::connect((service_host.as_str(), service_port))
        .await
        .map_err(ClientError::Io)?;
    let _ = socket.set_nodelay(true);

    send_hello(&mut socket, ROLE_SENDER, &token, &filename, size).await?;

    let mut file = File::open(file_path).await.map_err(|e| ClientError::File(e.to_string()))?;
    let mut buf = vec![0u8; CHUNK_LEN];
    let mut sent: u64 = 0;
    loop {
        let n = file.read(&mut buf).await.map_err(|e| ClientError::File(e.to_string()))?;
        if n == 0 {
            break;
        }
        write_data_frame(&mut socket, &buf[..n]).await?;
        sent += n as u64;
    }
    write_frame(&mut socket, OP_EOF, &[]).await?;

    let ack = read_ack(&mut socket).await?;
    if ack != sent {
        return Err(ClientError::DccFailed(format!(
            "sent {sent} bytes but receiver acknowledged {ack}"
        )));
    }
    Ok(())
}

async fn send_hello(
    socket: &mut TcpStream,
    role: u8,
    token: &[u8; 16],
    filename: &str,
    declared_size: u64,
) -> Result<(), ClientError> {
    let name_bytes = filename.as_bytes();
    let mut body = Vec::with_capacity(1 + 1 + 16 + 2 + name_bytes.len() + 8);
    body.push(PROTOCOL_VERSION);
    body.push(role);
    body.extend_from_slice(token);
    body.extend_from_slice(&(name_bytes.len() as u16).to_be_bytes());
    body.extend_from_slice(name_bytes);
    body.extend_from_slice(&declared_size.to_be_bytes());
    write_frame(socket, OP_HELLO, &body).await
}

async fn write_frame(socket: &mut TcpStream, opcode: u8, payload: &[u8]) -> Result<(), ClientError> {
    let len = (1 + payload.len()) as u32;
    socket.write_u32(len).await.map_err(ClientError::Io)?;
    socket.write_u8(opcode).await.map_err(ClientError::Io)?;
    socket.write_all(payload).await.map_err(ClientError::Io)
}

async fn write_data_frame(socket: &mut TcpStream, chunk: &[u8]) -> Result<(), ClientError> {
    let mut payload = Vec::with_capacity(4 + chunk.len());
    payload.extend_from_slice(&(chunk.len() as u32).to_be_bytes());
    payload.extend_from_slice(chunk);
    write_frame(socket, OP_DATA, &payload).await
}

async fn read_ack(socket: &mut TcpStream) -> Result<u64, ClientError> {
    let len = socket.read_u32().await.map_err(ClientError::Io)? as usize;
    if len < 9 {
        return Err(ClientError::DccFailed("malformed ACK frame".to_string()));
    }
    let mut buf = vec![0u8; len];
    socket.read_exact(&mut buf).await.map_err(ClientError::Io)?;
    if buf[0] != OP_ACK {
        return Err(ClientError::DccFailed(format!("expected ACK, got opcode {:#04x}", buf[0])));
    }
    Ok(u64::from_be_bytes(buf[1..9].try_into().unwrap()))
}
