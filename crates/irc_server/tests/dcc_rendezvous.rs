//! End-to-end DCC rendezvous scenario: a SENDER and a RECEIVER each dial the
//! service independently with the same token and the server pairs them,
//! mirroring `irc_client::dcc::offer_send`'s wire behavior without going
//! through a real IRC session.

use std::sync::Arc;
use std::time::Duration;

use irc_server::file_transfer::FileTransferService;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

const OP_HELLO: u8 = 0x01;
const OP_DATA: u8 = 0x02;
const OP_EOF: u8 = 0x03;
const OP_ACK: u8 = 0x04;

const PROTOCOL_VERSION: u8 = 1;
const ROLE_SENDER: u8 = 1;
const ROLE_RECEIVER: u8 = 2;

async fn spawn_service() -> std::net::SocketAddr {
    let service = FileTransferService::new(5);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = service.serve(listener).await;
    });
    addr
}

async fn write_frame(socket: &mut TcpStream, opcode: u8, payload: &[u8]) {
    let len = (1 + payload.len()) as u32;
    socket.write_u32(len).await.unwrap();
    socket.write_u8(opcode).await.unwrap();
    socket.write_all(payload).await.unwrap();
}

async fn read_frame(socket: &mut TcpStream) -> Vec<u8> {
    let len = socket.read_u32().await.unwrap() as usize;
    let mut buf = vec![0u8; len];
    socket.read_exact(&mut buf).await.unwrap();
    buf
}

async fn send_hello(socket: &mut TcpStream, role: u8, token: [u8; 16], filename: &str, size: u64) {
    let mut body = Vec::new();
    body.push(PROTOCOL_VERSION);
    body.push(role);
    body.extend_from_slice(&token);
    body.extend_from_slice(&(filename.len() as u16).to_be_bytes());
    body.extend_from_slice(filename.as_bytes());
    body.extend_from_slice(&size.to_be_bytes());
    write_frame(socket, OP_HELLO, &body).await;
}

#[tokio::test]
async fn sender_and_receiver_rendezvous_and_transfer_file() {
    let addr = spawn_service().await;
    let token = [0x42u8; 16];
    let payload = b"the quick brown fox jumps over the lazy dog".to_vec();

    let mut sender = TcpStream::connect(addr).await.unwrap();
    let mut receiver = TcpStream::connect(addr).await.unwrap();

    send_hello(&mut sender, ROLE_SENDER, token, "fox.txt", payload.len() as u64).await;
    send_hello(&mut receiver, ROLE_RECEIVER, token, "fox.txt", payload.len() as u64).await;

    let mut data_body = Vec::new();
    data_body.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    data_body.extend_from_slice(&payload);
    write_frame(&mut sender, OP_DATA, &data_body).await;
    write_frame(&mut sender, OP_EOF, &[]).await;

    let eof = read_frame(&mut receiver).await;
    assert_eq!(eof.first().copied(), Some(OP_EOF));

    let ack = read_frame(&mut receiver).await;
    assert_eq!(ack.first().copied(), Some(OP_ACK));
    let total = u64::from_be_bytes(ack[1..9].try_into().unwrap());
    assert_eq!(total, payload.len() as u64);

    let sender_ack = tokio::time::timeout(Duration::from_secs(2), read_frame(&mut sender))
        .await
        .expect("sender never received its ACK");
    assert_eq!(sender_ack.first().copied(), Some(OP_ACK));
}

#[tokio::test]
async fn second_sender_on_same_token_is_rejected() {
    let addr = spawn_service().await;
    let token = [0x7eu8; 16];

    let mut first_sender = TcpStream::connect(addr).await.unwrap();
    send_hello(&mut first_sender, ROLE_SENDER, token, "f.bin", 0).await;

    let mut second_sender = TcpStream::connect(addr).await.unwrap();
    send_hello(&mut second_sender, ROLE_SENDER, token, "f.bin", 0).await;

    let frame = tokio::time::timeout(Duration::from_secs(2), read_frame(&mut second_sender))
        .await
        .expect("expected an ERROR frame for the duplicate sender");
    assert_eq!(frame.first().copied(), Some(0x7Fu8));
}

#[tokio::test]
async fn sender_protocol_error_reaches_receiver_as_broken_pipe() {
    let addr = spawn_service().await;
    let token = [0x99u8; 16];

    let mut sender = TcpStream::connect(addr).await.unwrap();
    let mut receiver = TcpStream::connect(addr).await.unwrap();

    send_hello(&mut sender, ROLE_SENDER, token, "f.bin", 0).await;
    send_hello(&mut receiver, ROLE_RECEIVER, token, "f.bin", 0).await;

    // A DATA frame with an opcode the sender's own read loop rejects as
    // unknown, so `run_sender` errors out without ever reaching OP_EOF.
    write_frame(&mut sender, 0x55, &[]).await;

    // The receiver must see the sender's failure promptly, not hang forever
    // waiting on a pipe whose other half died without signaling it.
    let frame = tokio::time::timeout(Duration::from_secs(2), read_frame(&mut receiver))
        .await
        .expect("receiver never learned the sender's side broke");
    assert_eq!(frame.first().copied(), Some(0x7Fu8));
}
