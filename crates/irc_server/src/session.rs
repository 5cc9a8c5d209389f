//! Per-connection state machine and verb dispatch table. Generalizes the
//! teacher's implicit two-phase split (`pre_registration.rs` CAP
//! negotiation + `registration.rs` PASS/NICK/USER) and its waterfall
//! `handlers/request.rs::handle_request` into one explicit state struct and
//! a single table-driven `dispatch`, per spec.md §9's guidance to replace
//! "try parser A, then B, then C" with a verb→handler table.

use std::sync::Arc;

use irc_proto::{Message, Numeric, ProtocolError};

use crate::world::WorldModel;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connected,
    CapNegotiating,
    AwaitingNick,
    AwaitingUser,
    Registered,
    Quitting,
}

/// Mutable per-connection FSM state. Owned exclusively by one connection's
/// reader task, so no synchronization is needed here even though
/// `WorldModel` itself is shared (matches spec.md §9's "strictly sequential
/// per-session read→dispatch").
pub struct SessionCtx {
    pub id: u64,
    pub state: SessionState,
    pending_nick: Option<String>,
    pending_user: Option<(String, String)>,
    pending_pass: Option<String>,
}

impl SessionCtx {
    pub fn new(id: u64) -> Self {
        SessionCtx {
            id,
            state: SessionState::Connected,
            pending_nick: None,
            pending_user: None,
            pending_pass: None,
        }
    }

    fn recompute_phase(&mut self) {
        if self.state == SessionState::Registered
            || self.state == SessionState::Quitting
            || self.state == SessionState::CapNegotiating
        {
            return;
        }
        self.state = match (&self.pending_nick, &self.pending_user) {
            (None, _) => SessionState::AwaitingNick,
            (Some(_), None) => SessionState::AwaitingUser,
            (Some(_), Some(_)) => SessionState::AwaitingUser,
        };
    }
}

/// Verbs permitted before registration completes, per spec.md §4.4.
const PRE_REGISTRATION_ALLOWED: &[&str] = &["PING", "PONG", "CAP", "PASS", "NICK", "USER", "QUIT"];

pub struct Dispatcher {
    pub world: Arc<WorldModel>,
    pub oper_name: Option<String>,
    pub oper_password: Option<String>,
    pub motd: Vec<String>,
    pub network_name: String,
}

/// What the reader loop should do after processing one line.
pub enum DispatchOutcome {
    Continue,
    Quit(String),
}

impl Dispatcher {
    pub async fn dispatch(&self, ctx: &mut SessionCtx, msg: Message) -> DispatchOutcome {
        let command = msg.command.to_ascii_uppercase();

        if ctx.state != SessionState::Registered
            && ctx.state != SessionState::Quitting
            && !PRE_REGISTRATION_ALLOWED.contains(&command.as_str())
        {
            self.reply_err(ctx.id, ProtocolError::NotRegistered).await;
            return DispatchOutcome::Continue;
        }

        match command.as_str() {
            "CAP" => self.handle_cap(ctx, &msg).await,
            "PASS" => {
                ctx.pending_pass = msg.params.first().cloned();
                DispatchOutcome::Continue
            }
            "NICK" => self.handle_nick(ctx, &msg).await,
            "USER" => self.handle_user(ctx, &msg).await,
            "PING" => {
                if let Some(token) = msg.params.first() {
                    if let Some(session) = self.world.get(ctx.id) {
                        session.send(Message::new("PONG", vec![token.clone()])).await;
                    }
                }
                DispatchOutcome::Continue
            }
            "PONG" => {
                if let Some(token) = msg.params.first() {
                    if let Some(session) = self.world.get(ctx.id) {
                        let mut slot = session.ping_token.write().await;
                        if slot.as_deref() == Some(token.as_str()) {
                            *slot = None;
                        }
                    }
                }
                DispatchOutcome::Continue
            }
            "QUIT" => {
                let reason = msg.params.first().cloned().unwrap_or_else(|| "Client quit".to_string());
                DispatchOutcome::Quit(reason)
            }
            "JOIN" => self.handle_join(ctx, &msg).await,
            "PART" => self.handle_part(ctx, &msg).await,
            "TOPIC" => self.handle_topic(ctx, &msg).await,
            "NAMES" => self.handle_names(ctx, &msg).await,
            "LIST" => self.handle_list(ctx, &msg).await,
            "INVITE" => self.handle_invite(ctx, &msg).await,
            "KICK" => self.handle_kick(ctx, &msg).await,
            "MODE" => self.handle_mode(ctx, &msg).await,
            "PRIVMSG" => self.handle_privmsg(ctx, &msg, false).await,
            "NOTICE" => self.handle_privmsg(ctx, &msg, true).await,
            "WHO" => self.handle_who(ctx, &msg).await,
            "WHOIS" => self.handle_whois(ctx, &msg).await,
            "WHOWAS" => self.handle_whowas(ctx, &msg).await,
            "AWAY" => self.handle_away(ctx, &msg).await,
            "OPER" => self.handle_oper(ctx, &msg).await,
            "MOTD" => {
                self.send_motd(ctx.id).await;
                DispatchOutcome::Continue
            }
            other => {
                self.reply_err(ctx.id, ProtocolError::UnknownCommand(other.to_string())).await;
                DispatchOutcome::Continue
            }
        }
    }

    async fn current_nick(&self, id: u64) -> String {
        match self.world.get(id) {
            Some(s) => s.nick.read().await.clone().unwrap_or_else(|| "*".to_string()),
            None => "*".to_string(),
        }
    }

    async fn reply(&self, id: u64, numeric: Numeric, middle_params: Vec<String>) {
        if let Some(session) = self.world.get(id) {
            let target = self.current_nick(id).await;
            session
                .send(numeric.into_message(&self.world.server_name, &target, middle_params))
                .await;
        }
    }

    async fn reply_err(&self, id: u64, err: ProtocolError) {
        self.reply(id, err.into_numeric(), Vec::new()).await;
    }

    async fn handle_cap(&self, ctx: &mut SessionCtx, msg: &Message) -> DispatchOutcome {
        let sub = msg.params.first().map(|s| s.to_ascii_uppercase()).unwrap_or_default();
        let nick = self.current_nick(ctx.id).await;
        if let Some(session) = self.world.get(ctx.id) {
            match sub.as_str() {
                "LS" => {
                    ctx.state = SessionState::CapNegotiating;
                    session
                        .send(Message::new("CAP", vec![nick, "LS".to_string(), String::new()]))
                        .await;
                }
                "REQ" => {
                    let requested = msg.params.get(1).cloned().unwrap_or_default();
                    session
                        .send(Message::new("CAP", vec![nick, "ACK".to_string(), requested]))
                        .await;
                }
                "END" => {
                    if ctx.state == SessionState::CapNegotiating {
                        // Leave CapNegotiating so recompute_phase (and any
                        // registration attempt NICK/USER already queued up)
                        // can proceed.
                        ctx.state = SessionState::Connected;
                        self.maybe_complete_registration(ctx).await;
                        return DispatchOutcome::Continue;
                    }
                }
                _ => {}
            }
        }
        DispatchOutcome::Continue
    }

    async fn handle_nick(&self, ctx: &mut SessionCtx, msg: &Message) -> DispatchOutcome {
        let Some(nick) = msg.params.first() else {
            self.reply_err(ctx.id, ProtocolError::NeedMoreParams("NICK".to_string())).await;
            return DispatchOutcome::Continue;
        };

        if ctx.state == SessionState::Registered {
            if let Err(e) = self.world.change_nick(ctx.id, nick).await {
                self.reply_err(ctx.id, e).await;
            }
        } else {
            ctx.pending_nick = Some(nick.clone());
            self.maybe_complete_registration(ctx).await;
        }
        DispatchOutcome::Continue
    }

    async fn handle_user(&self, ctx: &mut SessionCtx, msg: &Message) -> DispatchOutcome {
        if msg.params.len() < 4 {
            self.reply_err(ctx.id, ProtocolError::NeedMoreParams("USER".to_string())).await;
            return DispatchOutcome::Continue;
        }
        if ctx.state == SessionState::Registered {
            self.reply_err(ctx.id, ProtocolError::AlreadyRegistered).await;
            return DispatchOutcome::Continue;
        }
        let user = msg.params[0].clone();
        let realname = msg.params[3].clone();
        ctx.pending_user = Some((user, realname));
        self.maybe_complete_registration(ctx).await;
        DispatchOutcome::Continue
    }

    async fn maybe_complete_registration(&self, ctx: &mut SessionCtx) {
        if ctx.state == SessionState::CapNegotiating {
            // NICK/USER have arrived but CAP negotiation hasn't reached END
            // yet; registration must wait for it per spec.md §4.4.
            return;
        }
        ctx.recompute_phase();
        let (Some(nick), Some((user, realname))) = (ctx.pending_nick.clone(), ctx.pending_user.clone()) else {
            return;
        };
        match self
            .world
            .register(ctx.id, &nick, &user, &realname, ctx.pending_pass.as_deref())
            .await
        {
            Ok(()) => {
                ctx.state = SessionState::Registered;
                self.send_welcome_burst(ctx.id, &nick, &user).await;
            }
            Err(e) => {
                ctx.pending_nick = None;
                self.reply_err(ctx.id, e).await;
            }
        }
    }

    async fn send_welcome_burst(&self, id: u64, nick: &str, user: &str) {
        let Some(session) = self.world.get(id) else { return };
        let host = session.addr.ip().to_string();
        self.reply(
            id,
            Numeric::RplWelcome {
                nick: nick.to_string(),
                user: user.to_string(),
                host,
            },
            Vec::new(),
        )
        .await;
        self.reply(
            id,
            Numeric::RplYourHost {
                servername: self.world.server_name.clone(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            Vec::new(),
        )
        .await;
        self.reply(
            id,
            Numeric::RplCreated {
                date: "this session".to_string(),
            },
            Vec::new(),
        )
        .await;
        self.reply(
            id,
            Numeric::RplMyInfo {
                servername: self.world.server_name.clone(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                user_modes: "aiorsw".to_string(),
                chan_modes: "beIklmnostv".to_string(),
            },
            Vec::new(),
        )
        .await;
        self.send_isupport(id).await;
        self.send_motd(id).await;
    }

    async fn send_isupport(&self, id: u64) {
        let mut isupport = irc_proto::ISupport::defaults();
        isupport.set("NETWORK", self.network_name.clone());
        for line in isupport.token_lines() {
            if let Some(session) = self.world.get(id) {
                let nick = self.current_nick(id).await;
                let mut params = vec![nick];
                params.extend(line);
                params.push("are supported by this server".to_string());
                session
                    .send(Message::new("005", params).with_source(self.world.server_name.clone()))
                    .await;
            }
        }
    }

    async fn send_motd(&self, id: u64) {
        if self.motd.is_empty() {
            self.reply(id, Numeric::ErrNoMotd {}, Vec::new()).await;
            return;
        }
        self.reply(
            id,
            Numeric::RplMotdStart {
                servername: self.world.server_name.clone(),
            },
            Vec::new(),
        )
        .await;
        for line in &self.motd {
            self.reply(id, Numeric::RplMotd { line: line.clone() }, Vec::new()).await;
        }
        self.reply(id, Numeric::RplEndOfMotd {}, Vec::new()).await;
    }

    async fn handle_join(&self, ctx: &mut SessionCtx, msg: &Message) -> DispatchOutcome {
        let Some(channels) = msg.params.first() else {
            self.reply_err(ctx.id, ProtocolError::NeedMoreParams("JOIN".to_string())).await;
            return DispatchOutcome::Continue;
        };
        let keys: Vec<&str> = msg.params.get(1).map(|k| k.split(',').collect()).unwrap_or_default();
        for (i, channel_name) in channels.split(',').enumerate() {
            let key = keys.get(i).copied();
            match self.world.join(ctx.id, channel_name, key).await {
                Ok(outcome) => {
                    if outcome.created {
                        if let Some(session) = self.world.get(ctx.id) {
                            session
                                .send(
                                    Message::new("MODE", vec![channel_name.to_string(), "+nt".to_string()])
                                        .with_source(self.world.server_name.clone()),
                                )
                                .await;
                        }
                    }
                    self.send_topic_and_names(ctx.id, channel_name).await;
                }
                Err(e) => self.reply_err(ctx.id, e).await,
            }
        }
        DispatchOutcome::Continue
    }

    async fn send_topic_and_names(&self, id: u64, channel_name: &str) {
        match self.world.topic(id, channel_name, None).await {
            Ok(outcome) => match outcome.topic {
                Some(t) => {
                    self.reply(id, Numeric::RplTopic { channel: channel_name.to_string(), topic: t.text }, vec![channel_name.to_string()])
                        .await
                }
                None => {
                    self.reply(id, Numeric::RplNoTopic { channel: channel_name.to_string() }, vec![channel_name.to_string()])
                        .await
                }
            },
            Err(_) => {}
        }
        if let Ok(names) = self.world.names(channel_name).await {
            let rendered: Vec<String> = names
                .into_iter()
                .map(|(nick, rank)| format!("{}{nick}", rank.prefix_symbol()))
                .collect();
            self.reply(
                id,
                Numeric::RplNamReply {
                    symbol: "=".to_string(),
                    channel: channel_name.to_string(),
                    names: rendered,
                },
                vec!["=".to_string(), channel_name.to_string()],
            )
            .await;
            self.reply(
                id,
                Numeric::RplEndOfNames { channel: channel_name.to_string() },
                vec![channel_name.to_string()],
            )
            .await;
        }
    }

    async fn handle_part(&self, ctx: &mut SessionCtx, msg: &Message) -> DispatchOutcome {
        let Some(channels) = msg.params.first() else {
            self.reply_err(ctx.id, ProtocolError::NeedMoreParams("PART".to_string())).await;
            return DispatchOutcome::Continue;
        };
        let reason = msg.params.get(1).map(|s| s.as_str());
        for channel_name in channels.split(',') {
            if let Err(e) = self.world.part(ctx.id, channel_name, reason).await {
                self.reply_err(ctx.id, e).await;
            }
        }
        DispatchOutcome::Continue
    }

    async fn handle_topic(&self, ctx: &mut SessionCtx, msg: &Message) -> DispatchOutcome {
        let Some(channel) = msg.params.first() else {
            self.reply_err(ctx.id, ProtocolError::NeedMoreParams("TOPIC".to_string())).await;
            return DispatchOutcome::Continue;
        };
        let new_topic = msg.params.get(1).map(|s| s.as_str());
        match self.world.topic(ctx.id, channel, new_topic).await {
            Ok(outcome) => {
                if new_topic.is_none() {
                    match outcome.topic {
                        Some(t) => self.reply(ctx.id, Numeric::RplTopic { channel: channel.clone(), topic: t.text }, vec![channel.clone()]).await,
                        None => self.reply(ctx.id, Numeric::RplNoTopic { channel: channel.clone() }, vec![channel.clone()]).await,
                    }
                }
            }
            Err(e) => self.reply_err(ctx.id, e).await,
        }
        DispatchOutcome::Continue
    }

    async fn handle_names(&self, ctx: &mut SessionCtx, msg: &Message) -> DispatchOutcome {
        if let Some(channel) = msg.params.first() {
            self.send_topic_and_names(ctx.id, channel).await;
        }
        DispatchOutcome::Continue
    }

    async fn handle_list(&self, ctx: &mut SessionCtx, msg: &Message) -> DispatchOutcome {
        let pattern = msg.params.first().map(|s| s.as_str());
        for (name, count, topic) in self.world.list(ctx.id, pattern) {
            self.reply(
                ctx.id,
                Numeric::RplList {
                    channel: name.clone(),
                    visible: count as u32,
                    topic,
                },
                vec![name, count.to_string()],
            )
            .await;
        }
        self.reply(ctx.id, Numeric::RplListEnd {}, Vec::new()).await;
        DispatchOutcome::Continue
    }

    async fn handle_invite(&self, ctx: &mut SessionCtx, msg: &Message) -> DispatchOutcome {
        if msg.params.len() < 2 {
            self.reply_err(ctx.id, ProtocolError::NeedMoreParams("INVITE".to_string())).await;
            return DispatchOutcome::Continue;
        }
        match self.world.invite(ctx.id, &msg.params[0], &msg.params[1]).await {
            Ok(_) => {
                self.reply(
                    ctx.id,
                    Numeric::RplInviting {
                        channel: msg.params[1].clone(),
                        nick: msg.params[0].clone(),
                    },
                    vec![msg.params[0].clone()],
                )
                .await;
            }
            Err(e) => self.reply_err(ctx.id, e).await,
        }
        DispatchOutcome::Continue
    }

    async fn handle_kick(&self, ctx: &mut SessionCtx, msg: &Message) -> DispatchOutcome {
        if msg.params.len() < 2 {
            self.reply_err(ctx.id, ProtocolError::NeedMoreParams("KICK".to_string())).await;
            return DispatchOutcome::Continue;
        }
        let reason = msg.params.get(2).map(|s| s.as_str());
        if let Err(e) = self.world.kick(ctx.id, &msg.params[0], &msg.params[1], reason).await {
            self.reply_err(ctx.id, e).await;
        }
        DispatchOutcome::Continue
    }

    async fn handle_mode(&self, ctx: &mut SessionCtx, msg: &Message) -> DispatchOutcome {
        let Some(target) = msg.params.first() else {
            self.reply_err(ctx.id, ProtocolError::NeedMoreParams("MODE".to_string())).await;
            return DispatchOutcome::Continue;
        };
        let modestring = msg.params.get(1).map(|s| s.as_str());
        let args: Vec<String> = msg.params.get(2..).map(|s| s.to_vec()).unwrap_or_default();
        match self.world.mode(ctx.id, target, modestring, &args).await {
            Ok(outcome) => {
                if let Some((letter, list)) = outcome.list_reply {
                    let (reply, end_reply): (fn(String, String) -> Numeric, Numeric) = match letter {
                        'b' => (
                            |channel, mask| Numeric::RplBanList { channel, mask },
                            Numeric::RplEndOfBanList { channel: target.clone() },
                        ),
                        'e' => (
                            |channel, mask| Numeric::RplExceptList { channel, mask },
                            Numeric::RplEndOfExceptList { channel: target.clone() },
                        ),
                        _ => (
                            |channel, mask| Numeric::RplInviteList { channel, mask },
                            Numeric::RplEndOfInviteList { channel: target.clone() },
                        ),
                    };
                    for mask in list {
                        self.reply(ctx.id, reply(target.clone(), mask), vec![target.clone()]).await;
                    }
                    self.reply(ctx.id, end_reply, vec![target.clone()]).await;
                } else if modestring.is_none() {
                    if let Some(chan) = &outcome.channel {
                        let modes = chan.modes.read().await;
                        let (letters, mode_args) = modes.render();
                        self.reply(
                            ctx.id,
                            Numeric::RplChannelModeIs {
                                channel: target.clone(),
                                modes: letters,
                                mode_params: mode_args.join(" "),
                            },
                            vec![target.clone()],
                        )
                        .await;
                    }
                }
            }
            Err(e) => self.reply_err(ctx.id, e).await,
        }
        DispatchOutcome::Continue
    }

    async fn handle_privmsg(&self, ctx: &mut SessionCtx, msg: &Message, is_notice: bool) -> DispatchOutcome {
        if msg.params.len() < 2 {
            if !is_notice {
                self.reply_err(ctx.id, ProtocolError::NeedMoreParams(if is_notice { "NOTICE" } else { "PRIVMSG" }.to_string())).await;
            }
            return DispatchOutcome::Continue;
        }
        match self.world.privmsg(ctx.id, &msg.params[0], &msg.params[1], is_notice).await {
            Ok(_) => {}
            Err(e) => {
                if !is_notice {
                    self.reply_err(ctx.id, e).await;
                }
            }
        }
        DispatchOutcome::Continue
    }

    async fn handle_who(&self, ctx: &mut SessionCtx, msg: &Message) -> DispatchOutcome {
        let mask = msg.params.first().cloned().unwrap_or_else(|| "*".to_string());
        for member in self.world.who(&mask).await {
            let nick = member.nick.read().await.clone().unwrap_or_default();
            let user = member.user.read().await.clone().unwrap_or_default();
            let realname = member.realname.read().await.clone().unwrap_or_default();
            self.reply(
                ctx.id,
                Numeric::RplWhoReply {
                    channel: "*".to_string(),
                    user: user.clone(),
                    host: member.addr.ip().to_string(),
                    server: self.world.server_name.clone(),
                    nick: nick.clone(),
                    flags: "H".to_string(),
                    hopcount: 0,
                    realname,
                },
                vec!["*".to_string(), user, member.addr.ip().to_string(), self.world.server_name.clone(), nick, "H".to_string()],
            )
            .await;
        }
        self.reply(ctx.id, Numeric::RplEndOfWho { mask }, Vec::new()).await;
        DispatchOutcome::Continue
    }

    async fn handle_whois(&self, ctx: &mut SessionCtx, msg: &Message) -> DispatchOutcome {
        let Some(nick) = msg.params.first() else {
            self.reply_err(ctx.id, ProtocolError::NeedMoreParams("WHOIS".to_string())).await;
            return DispatchOutcome::Continue;
        };
        match self.world.whois(nick).await {
            Ok(info) => {
                self.reply(
                    ctx.id,
                    Numeric::RplWhoisUser {
                        nick: info.nick.clone(),
                        user: info.user.clone(),
                        host: info.host.clone(),
                        realname: info.realname,
                    },
                    vec![info.nick.clone(), info.user, info.host],
                )
                .await;
                if !info.channels.is_empty() {
                    self.reply(
                        ctx.id,
                        Numeric::RplWhoisChannels {
                            nick: info.nick.clone(),
                            channels: info.channels,
                        },
                        vec![info.nick.clone()],
                    )
                    .await;
                }
                self.reply(ctx.id, Numeric::RplEndOfWhois { nick: info.nick }, Vec::new()).await;
            }
            Err(e) => self.reply_err(ctx.id, e).await,
        }
        DispatchOutcome::Continue
    }

    async fn handle_whowas(&self, ctx: &mut SessionCtx, msg: &Message) -> DispatchOutcome {
        let Some(nick) = msg.params.first() else {
            self.reply_err(ctx.id, ProtocolError::NeedMoreParams("WHOWAS".to_string())).await;
            return DispatchOutcome::Continue;
        };
        let records = self.world.whowas(nick).await;
        for record in &records {
            self.reply(
                ctx.id,
                Numeric::RplWhoWasUser {
                    nick: record.nick.clone(),
                    user: record.user.clone(),
                    host: record.host.clone(),
                    realname: record.realname.clone(),
                },
                vec![record.nick.clone(), record.user.clone(), record.host.clone(), "*".to_string()],
            )
            .await;
        }
        if records.is_empty() {
            self.reply_err(ctx.id, ProtocolError::NoSuchNick(nick.clone())).await;
        }
        self.reply(ctx.id, Numeric::RplEndOfWhoWas { nick: nick.clone() }, Vec::new()).await;
        DispatchOutcome::Continue
    }

    async fn handle_away(&self, ctx: &mut SessionCtx, msg: &Message) -> DispatchOutcome {
        if let Some(session) = self.world.get(ctx.id) {
            *session.away.write().await = msg.params.first().cloned();
        }
        DispatchOutcome::Continue
    }

    async fn handle_oper(&self, ctx: &mut SessionCtx, msg: &Message) -> DispatchOutcome {
        if msg.params.len() < 2 {
            self.reply_err(ctx.id, ProtocolError::NeedMoreParams("OPER".to_string())).await;
            return DispatchOutcome::Continue;
        }
        let (Some(want_name), Some(want_password)) = (&self.oper_name, &self.oper_password) else {
            self.reply_err(ctx.id, ProtocolError::NoOperHost).await;
            return DispatchOutcome::Continue;
        };
        if &msg.params[0] != want_name || &msg.params[1] != want_password {
            self.reply_err(ctx.id, ProtocolError::PasswdMismatch).await;
            return DispatchOutcome::Continue;
        }
        if let Some(session) = self.world.get(ctx.id) {
            session.operator.store(true, std::sync::atomic::Ordering::Release);
        }
        self.reply(ctx.id, Numeric::RplYoureOper {}, Vec::new()).await;
        DispatchOutcome::Continue
    }
}
