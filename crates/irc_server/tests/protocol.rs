//! End-to-end protocol scenarios driven over raw `TcpStream`s, the same way
//! `src/bin/irc_client_tests.rs` drives the server without a real client UI.

use std::sync::Arc;
use std::time::Duration;

use irc_proto::{CaseMapping, ChanModeSpec};
use irc_server::config::Config;
use irc_server::server::ServerLoop;
use irc_server::world::WorldModel;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

async fn spawn_server() -> std::net::SocketAddr {
    let mut config = Config::default();
    config.ping_frequency_ms = 60_000;
    config.idle_timeout_ms = 120_000;
    let config = Arc::new(config);
    let world = Arc::new(WorldModel::new(
        config.server_name.clone(),
        config.casemapping,
        ChanModeSpec::parse("beI,k,l,imnpst"),
        config.max_nick_len,
        config.max_channel_name_len,
        config.max_topic_len,
        config.password.clone(),
        config.whowas_history_len,
    ));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = ServerLoop { world, config };
    tokio::spawn(async move {
        let _ = server.serve(listener).await;
    });
    addr
}

async fn connect(addr: std::net::SocketAddr) -> (BufReader<tokio::net::tcp::OwnedReadHalf>, tokio::net::tcp::OwnedWriteHalf) {
    let stream = TcpStream::connect(addr).await.unwrap();
    let (read, write) = stream.into_split();
    (BufReader::new(read), write)
}

async fn send_line(write: &mut tokio::net::tcp::OwnedWriteHalf, line: &str) {
    write.write_all(format!("{line}\r\n").as_bytes()).await.unwrap();
}

async fn read_line(read: &mut BufReader<tokio::net::tcp::OwnedReadHalf>) -> String {
    let mut line = String::new();
    tokio::time::timeout(Duration::from_secs(2), read.read_line(&mut line))
        .await
        .expect("timed out waiting for a line")
        .unwrap();
    line.trim_end_matches(['\r', '\n']).to_string()
}

async fn read_until_code(read: &mut BufReader<tokio::net::tcp::OwnedReadHalf>, code: &str) -> String {
    loop {
        let line = read_line(read).await;
        if line.split(' ').nth(1) == Some(code) {
            return line;
        }
    }
}

async fn register(addr: std::net::SocketAddr, nick: &str) -> (BufReader<tokio::net::tcp::OwnedReadHalf>, tokio::net::tcp::OwnedWriteHalf) {
    let (mut read, mut write) = connect(addr).await;
    send_line(&mut write, &format!("NICK {nick}")).await;
    send_line(&mut write, &format!("USER {nick} 0 * :{nick} Realname")).await;
    // Drain the whole welcome burst (001-004, ISUPPORT 005 lines, the
    // 375/372/376 MOTD block) so later reads see only post-registration
    // traffic, not leftover burst lines.
    read_until_code(&mut read, "376").await;
    (read, write)
}

#[tokio::test]
async fn registration_sends_welcome_burst() {
    let addr = spawn_server().await;
    let (mut read, mut write) = connect(addr).await;
    send_line(&mut write, "NICK alice").await;
    send_line(&mut write, "USER alice 0 * :Alice Example").await;

    let welcome = read_until_code(&mut read, "001").await;
    assert!(welcome.contains("alice"));
    for code in ["002", "003", "004"] {
        let line = read_line(&mut read).await;
        assert_eq!(line.split(' ').nth(1), Some(code));
    }
}

#[tokio::test]
async fn motd_is_rendered_as_375_372_376() {
    let addr = spawn_server().await;
    let (mut read, mut write) = connect(addr).await;
    send_line(&mut write, "NICK alice").await;
    send_line(&mut write, "USER alice 0 * :Alice Example").await;

    read_until_code(&mut read, "004").await;
    // Drain ISUPPORT 005 lines until the MOTD block starts.
    let start = read_until_code(&mut read, "375").await;
    assert!(start.contains("irc-muster"));
    let body = read_until_code(&mut read, "372").await;
    assert!(body.contains("Welcome to irc-muster"));
    let end = read_line(&mut read).await;
    assert!(end.contains(" 376 "));
}

#[tokio::test]
async fn join_creates_channel_with_initial_mode_and_names() {
    let addr = spawn_server().await;
    let (mut read, mut write) = register(addr, "alice").await;

    send_line(&mut write, "JOIN #room").await;
    let join_echo = read_line(&mut read).await;
    assert!(join_echo.contains("JOIN #room"));

    let mode_line = read_line(&mut read).await;
    assert!(mode_line.contains("MODE #room +nt"));

    let names_line = read_until_code(&mut read, "353").await;
    assert!(names_line.contains("@alice"));
    let end_names = read_line(&mut read).await;
    assert!(end_names.contains(" 366 "));
}

#[tokio::test]
async fn privmsg_fans_out_without_self_echo() {
    let addr = spawn_server().await;
    let (mut a_read, mut a_write) = register(addr, "alice").await;
    let (mut b_read, mut b_write) = register(addr, "bob").await;

    send_line(&mut a_write, "JOIN #room").await;
    read_line(&mut a_read).await; // own JOIN echo
    read_line(&mut a_read).await; // MODE +nt
    read_until_code(&mut a_read, "366").await;

    send_line(&mut b_write, "JOIN #room").await;
    // bob sees his own JOIN, then names
    read_line(&mut b_read).await;
    read_until_code(&mut b_read, "366").await;
    // alice sees bob's JOIN
    let alice_sees_join = read_line(&mut a_read).await;
    assert!(alice_sees_join.contains("bob") && alice_sees_join.contains("JOIN"));

    send_line(&mut a_write, "PRIVMSG #room :hello room").await;
    let bob_sees = read_line(&mut b_read).await;
    assert!(bob_sees.contains("PRIVMSG #room :hello room"));

    // alice must not see her own PRIVMSG echoed back: the very next line on
    // her socket must be the PONG answering her own PING, not a PRIVMSG.
    send_line(&mut a_write, "PING :probe").await;
    let next = read_line(&mut a_read).await;
    assert!(next.contains("PONG :probe"), "unexpected line: {next}");
}

#[tokio::test]
async fn casemapped_nickname_collision_is_rejected() {
    let addr = spawn_server().await;
    let (_r1, _w1) = register(addr, "Alice").await;

    // Default casemapping is rfc1459: plain ASCII case folding still applies,
    // so a same-letters/different-case nick collides with the registered one.
    let (mut read, mut write) = connect(addr).await;
    send_line(&mut write, "NICK ALICE").await;
    send_line(&mut write, "USER x 0 * :X").await;
    let line = read_until_code(&mut read, "433").await;
    assert!(line.contains("433"));
}

#[tokio::test]
async fn mode_list_query_returns_367_then_368() {
    let addr = spawn_server().await;
    let (mut read, mut write) = register(addr, "alice").await;
    send_line(&mut write, "JOIN #room").await;
    read_line(&mut read).await;
    read_line(&mut read).await;
    read_until_code(&mut read, "366").await;

    send_line(&mut write, "MODE #room +b baddie!*@*").await;
    read_line(&mut read).await; // MODE echo

    send_line(&mut write, "MODE #room +b").await;
    let ban_entry = read_until_code(&mut read, "367").await;
    assert!(ban_entry.contains("baddie"));
    let end = read_line(&mut read).await;
    assert!(end.contains(" 368 "));
}

#[tokio::test]
async fn registration_waits_for_cap_end() {
    let addr = spawn_server().await;
    let (mut read, mut write) = connect(addr).await;

    send_line(&mut write, "CAP LS 302").await;
    let cap_ls = read_line(&mut read).await;
    assert!(cap_ls.contains("CAP") && cap_ls.contains("LS"));

    send_line(&mut write, "NICK alice").await;
    send_line(&mut write, "USER alice 0 * :Alice Example").await;

    // NICK/USER have both arrived, but CAP negotiation is still open, so no
    // welcome burst should show up yet. Prove it by racing a short timeout
    // against 001 instead of blocking on read_until_code forever.
    let mut probe = String::new();
    let saw_welcome_early = tokio::time::timeout(Duration::from_millis(200), read.read_line(&mut probe)).await.is_ok();
    assert!(!saw_welcome_early, "registration completed before CAP END: {probe}");

    send_line(&mut write, "CAP END").await;
    let welcome = read_until_code(&mut read, "001").await;
    assert!(welcome.contains("alice"));
}
