//! `ClientCore`: connection lifecycle and command dispatch surface.
//!
//! Mirrors `irc_server::server.rs`'s reader/writer task split (one task
//! owns the read half and turns lines into [`Message`]s, one task owns the
//! write half and drains an `mpsc` outbound queue) but runs it client-side
//! against a single server connection instead of per-accepted-socket.
//!
//! Incoming messages are handed to a [`ClientEventSink`] rather than parsed
//! here: the terminal UI that renders them is an external collaborator this
//! crate does not implement.

use std::sync::Arc;

use irc_proto::Message;
use log::{debug, warn};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{RwLock, mpsc};
use tokio::task::JoinHandle;

use crate::config::ClientConfig;
use crate::errors::ClientError;

/// Callback surface for events arriving from the server. Implemented by
/// whatever presents them to a human (a TUI, a test harness, a bot) — this
/// crate ships no implementation beyond [`NullEventSink`].
pub trait ClientEventSink: Send + Sync {
    fn on_connected(&self) {}
    fn on_message(&self, msg: &Message);
    fn on_disconnected(&self, reason: &str) {
        let _ = reason;
    }
}

/// Discards everything. Useful as a placeholder in tests or headless
/// invocations (e.g. a DCC-only run) that don't render server traffic.
pub struct NullEventSink;

impl ClientEventSink for NullEventSink {
    fn on_message(&self, _msg: &Message) {}
}

/// A live connection to one server. Cloning is cheap; all clones share the
/// same outbound queue and nick cache.
#[derive(Clone)]
pub struct ClientCore {
    tx_outbound: mpsc::Sender<Message>,
    nick: Arc<RwLock<String>>,
}

impl ClientCore {
    /// Connects, sends the registration burst (PASS/NICK/USER), and spawns
    /// the reader/writer tasks. Returns once the TCP handshake completes;
    /// registration success/failure arrives asynchronously through `sink`.
    pub async fn connect(
        config: &ClientConfig,
        sink: Arc<dyn ClientEventSink>,
    ) -> Result<(Self, JoinHandle<()>, JoinHandle<()>), ClientError> {
        let stream = TcpStream::connect((config.hostname.as_str(), config.port)).await?;
        let _ = stream.set_nodelay(true);
        let (read_half, write_half) = tokio::io::split(stream);

        let (tx_outbound, rx_outbound) = mpsc::channel::<Message>(256);
        let nick = Arc::new(RwLock::new(config.nick.clone()));

        let writer_handle = tokio::spawn(writer_task(write_half, rx_outbound));

        let core = ClientCore {
            tx_outbound: tx_outbound.clone(),
            nick: nick.clone(),
        };

        if let Some(pass) = &config.server_password {
            core.send(Message::new("PASS", vec![pass.clone()])).await;
        }
        core.send(Message::new("NICK", vec![config.nick.clone()])).await;
        core.send(Message::new(
            "USER",
            vec![
                config.nick.clone(),
                "0".to_string(),
                "*".to_string(),
                config.realname.clone(),
            ],
        ))
        .await;
        if let Some(channel) = &config.channel {
            core.join(channel).await;
        }

        let reader_handle = tokio::spawn(reader_task(
            read_half,
            tx_outbound.clone(),
            nick.clone(),
            sink.clone(),
            config.ctcp_client_info.clone(),
        ));

        sink.on_connected();

        Ok((core, reader_handle, writer_handle))
    }

    pub async fn send(&self, msg: Message) {
        if self.tx_outbound.send(msg).await.is_err() {
            debug!("outbound queue closed, message dropped");
        }
    }

    pub async fn current_nick(&self) -> String {
        self.nick.read().await.clone()
    }

    pub async fn join(&self, channel: &str) {
        self.send(Message::new("JOIN", vec![channel.to_string()])).await;
    }

    pub async fn part(&self, channel: &str, reason: Option<&str>) {
        let mut params = vec![channel.to_string()];
        if let Some(r) = reason {
            params.push(r.to_string());
        }
        self.send(Message::new("PART", params)).await;
    }

    pub async fn privmsg(&self, target: &str, text: &str) {
        self.send(Message::new("PRIVMSG", vec![target.to_string(), text.to_string()]))
            .await;
    }

    pub async fn notice(&self, target: &str, text: &str) {
        self.send(Message::new("NOTICE", vec![target.to_string(), text.to_string()]))
            .await;
    }

    pub async fn nick(&self, new_nick: &str) {
        self.send(Message::new("NICK", vec![new_nick.to_string()])).await;
    }

    pub async fn topic(&self, channel: &str, new_topic: Option<&str>) {
        let mut params = vec![channel.to_string()];
        if let Some(t) = new_topic {
            params.push(t.to_string());
        }
        self.send(Message::new("TOPIC", params)).await;
    }

    pub async fn mode(&self, target: &str, modeline: &[&str]) {
        let mut params = vec![target.to_string()];
        params.extend(modeline.iter().map(|s| s.to_string()));
        self.send(Message::new("MODE", params)).await;
    }

    pub async fn names(&self, channel: &str) {
        self.send(Message::new("NAMES", vec![channel.to_string()])).await;
    }

    pub async fn list(&self) {
        self.send(Message::new("LIST", vec![])).await;
    }

    pub async fn whois(&self, nick: &str) {
        self.send(Message::new("WHOIS", vec![nick.to_string()])).await;
    }

    pub async fn quit(&self, reason: Option<&str>) {
        let params = reason.map(|r| vec![r.to_string()]).unwrap_or_default();
        self.send(Message::new("QUIT", params)).await;
    }

    /// Issues a CTCP DCC SEND offer to `target` and returns once the
    /// transfer either completes or fails. See [`crate::dcc::offer_send`]
    /// for the wire-level mechanics.
    pub async fn dcc_send(
        &self,
        target: &str,
        file_path: &std::path::Path,
        config: &ClientConfig,
    ) -> Result<(), ClientError> {
        crate::dcc::offer_send(self, target, file_path, config).await
    }
}

async fn reader_task(
    read_half: tokio::io::ReadHalf<TcpStream>,
    tx_outbound: mpsc::Sender<Message>,
    nick: Arc<RwLock<String>>,
    sink: Arc<dyn ClientEventSink>,
    ctcp_client_info: String,
) {
    let mut reader = BufReader::new(read_half);
    let mut line = String::new();

    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => {
                sink.on_disconnected("connection closed by peer");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                warn!("read error: {e}");
                sink.on_disconnected(&e.to_string());
                break;
            }
        }

        let trimmed = line.trim_end_matches(['\r', '\n']);
        if trimmed.is_empty() {
            continue;
        }

        let msg = match Message::decode(trimmed) {
            Ok(m) => m,
            Err(e) => {
                debug!("malformed line from server: {e}");
                continue;
            }
        };

        match msg.command.as_str() {
            "PING" => {
                let _ = tx_outbound.send(Message::new("PONG", msg.params.clone())).await;
                continue;
            }
            "001" => {
                if let Some(confirmed) = msg.params.first() {
                    *nick.write().await = confirmed.clone();
                }
            }
            "NICK" => {
                let current = nick.read().await.clone();
                let renamed_us = msg
                    .source
                    .as_deref()
                    .map(|s| s.split('!').next().unwrap_or(s))
                    .is_some_and(|old| old.eq_ignore_ascii_case(&current));
                if renamed_us {
                    if let Some(new_nick) = msg.params.first() {
                        *nick.write().await = new_nick.clone();
                    }
                }
            }
            "PRIVMSG" | "NOTICE" if is_ctcp(&msg) => {
                handle_ctcp(&msg, &tx_outbound, &ctcp_client_info).await;
                continue;
            }
            _ => {}
        }

        sink.on_message(&msg);
    }
}

async fn writer_task(
    mut write_half: tokio::io::WriteHalf<TcpStream>,
    mut rx_outbound: mpsc::Receiver<Message>,
) {
    while let Some(msg) = rx_outbound.recv().await {
        if let Err(e) = write_half.write_all(msg.encode().as_bytes()).await {
            warn!("write error: {e}");
            break;
        }
    }
    let _ = write_half.shutdown().await;
}

const CTCP_DELIM: char = '\x01';

fn is_ctcp(msg: &Message) -> bool {
    msg.params
        .last()
        .is_some_and(|p| p.starts_with(CTCP_DELIM) && p.ends_with(CTCP_DELIM) && p.len() >= 2)
}

async fn handle_ctcp(msg: &Message, tx_outbound: &mpsc::Sender<Message>, client_info: &str) {
    let Some(payload) = msg.params.last() else { return };
    let inner = payload.trim_matches(CTCP_DELIM);
    let mut parts = inner.splitn(2, ' ');
    let verb = parts.next().unwrap_or("");
    let Some(reply_to) = msg.source.as_deref().and_then(|s| s.split('!').next()) else {
        return;
    };

    if msg.command != "PRIVMSG" {
        return;
    }

    let reply = match verb {
        "PING" => parts.next().map(|arg| format!("{CTCP_DELIM}PING {arg}{CTCP_DELIM}")),
        "VERSION" => Some(format!("{CTCP_DELIM}VERSION irc-muster-client{CTCP_DELIM}")),
        "CLIENTINFO" => Some(format!("{CTCP_DELIM}CLIENTINFO {client_info}{CTCP_DELIM}")),
        "TIME" => Some(format!(
            "{CTCP_DELIM}TIME {}{CTCP_DELIM}",
            humantime_like_now()
        )),
        _ => None,
    };

    if let Some(reply) = reply {
        let _ = tx_outbound
            .send(Message::new("NOTICE", vec![reply_to.to_string(), reply]))
            .await;
    }
}

/// A deliberately coarse timestamp: CTCP TIME has no mandated format and
/// nothing downstream parses it back.
fn humantime_like_now() -> String {
    "unavailable".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctcp(verb_and_args: &str) -> Message {
        Message::new("PRIVMSG", vec!["me".to_string(), format!("{CTCP_DELIM}{verb_and_args}{CTCP_DELIM}")])
            .with_source("friend!u@h".to_string())
    }

    #[test]
    fn recognizes_ctcp_framed_trailing_param() {
        let msg = ctcp("VERSION");
        assert!(is_ctcp(&msg));
        assert!(!is_ctcp(&Message::new("PRIVMSG", vec!["me".to_string(), "plain text".to_string()])));
    }

    #[tokio::test]
    async fn version_query_replies_with_notice() {
        let (tx, mut rx) = mpsc::channel(4);
        handle_ctcp(&ctcp("VERSION"), &tx, "PING VERSION").await;
        let reply = rx.recv().await.expect("expected a NOTICE reply");
        assert_eq!(reply.command, "NOTICE");
        assert_eq!(reply.params[0], "friend");
        assert_eq!(reply.params[1], format!("{CTCP_DELIM}VERSION irc-muster-client{CTCP_DELIM}"));
    }

    #[tokio::test]
    async fn clientinfo_query_echoes_configured_list() {
        let (tx, mut rx) = mpsc::channel(4);
        handle_ctcp(&ctcp("CLIENTINFO"), &tx, "PING VERSION TIME").await;
        let reply = rx.recv().await.expect("expected a NOTICE reply");
        assert_eq!(reply.params[1], format!("{CTCP_DELIM}CLIENTINFO PING VERSION TIME{CTCP_DELIM}"));
    }

    #[tokio::test]
    async fn unknown_ctcp_verb_gets_no_reply() {
        let (tx, mut rx) = mpsc::channel(4);
        handle_ctcp(&ctcp("FOOBAR"), &tx, "PING VERSION").await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn ctcp_over_notice_is_not_answered() {
        let (tx, mut rx) = mpsc::channel(4);
        let msg = Message::new("NOTICE", vec!["me".to_string(), format!("{CTCP_DELIM}VERSION{CTCP_DELIM}")])
            .with_source("friend!u@h".to_string());
        handle_ctcp(&msg, &tx, "PING VERSION").await;
        assert!(rx.try_recv().is_err());
    }
}
