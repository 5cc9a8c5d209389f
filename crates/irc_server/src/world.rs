//! Authoritative in-memory state: clients, channels, the nickname index,
//! and WHOWAS history. Generalizes the teacher's two incompatible partial
//! drafts of this idea (`server_state.rs`/`state.rs`,
//! `channels_models.rs`/`channels.rs`, `user_state.rs`/`users.rs`) into one
//! canonical model, built the way spec.md §9 asks: handles (`ClientId`,
//! folded channel name) indexed into `DashMap`s rather than a pointer graph.

use std::collections::{HashSet, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use dashmap::{DashMap, DashSet};
use irc_proto::{CaseMapping, ChanModeSpec, Message, ProtocolError, Sign, mode::parse_mode_changes};
use tokio::sync::{RwLock, mpsc};

pub type ClientId = u64;

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Member privilege rank within a channel, ordered to match PREFIX
/// `(qaohv)~&@%+` (owner highest, none lowest).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MemberRank {
    None,
    Voice,
    HalfOp,
    Op,
    Admin,
    Owner,
}

impl MemberRank {
    pub fn prefix_symbol(self) -> &'static str {
        match self {
            MemberRank::Owner => "~",
            MemberRank::Admin => "&",
            MemberRank::Op => "@",
            MemberRank::HalfOp => "%",
            MemberRank::Voice => "+",
            MemberRank::None => "",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChannelModeFlags {
    pub invite_only: bool,
    pub moderated: bool,
    pub secret: bool,
    pub protected: bool, // topic lock, +t
    pub no_external_messages: bool,
    pub key: Option<String>,
    pub limit: Option<usize>,
}

impl Default for ChannelModeFlags {
    fn default() -> Self {
        ChannelModeFlags {
            invite_only: false,
            moderated: false,
            secret: false,
            protected: true,
            no_external_messages: true,
            key: None,
            limit: None,
        }
    }
}

impl ChannelModeFlags {
    /// Renders as `+nt` style, canonical order `iklmnst`.
    pub fn render(&self) -> (String, Vec<String>) {
        let mut letters = String::new();
        let mut args = Vec::new();
        if self.invite_only {
            letters.push('i');
        }
        if let Some(k) = &self.key {
            letters.push('k');
            args.push(k.clone());
        }
        if let Some(l) = self.limit {
            letters.push('l');
            args.push(l.to_string());
        }
        if self.moderated {
            letters.push('m');
        }
        if self.no_external_messages {
            letters.push('n');
        }
        if self.secret {
            letters.push('s');
        }
        if self.protected {
            letters.push('t');
        }
        (format!("+{letters}"), args)
    }
}

#[derive(Debug, Clone)]
pub struct TopicInfo {
    pub text: String,
    pub set_by: ClientId,
    pub set_at: u64,
}

#[derive(Debug)]
pub struct Channel {
    pub name: String,
    pub created_at: u64,
    pub topic: RwLock<Option<TopicInfo>>,
    pub modes: RwLock<ChannelModeFlags>,
    pub members: DashMap<ClientId, MemberRank>,
    pub ban_list: DashSet<String>,
    pub except_list: DashSet<String>,
    pub invex_list: DashSet<String>,
    pub invited: DashSet<String>,
}

impl Channel {
    fn new(name: String) -> Self {
        Channel {
            name,
            created_at: unix_now(),
            topic: RwLock::new(None),
            modes: RwLock::new(ChannelModeFlags::default()),
            members: DashMap::new(),
            ban_list: DashSet::new(),
            except_list: DashSet::new(),
            invex_list: DashSet::new(),
            invited: DashSet::new(),
        }
    }
}

#[derive(Debug)]
pub struct ClientSession {
    pub id: ClientId,
    pub addr: SocketAddr,
    pub nick: RwLock<Option<String>>,
    pub user: RwLock<Option<String>>,
    pub realname: RwLock<Option<String>>,
    pub away: RwLock<Option<String>>,
    pub registered: AtomicBool,
    pub operator: AtomicBool,
    pub last_activity: RwLock<Instant>,
    pub ping_token: RwLock<Option<String>>,
    pub modes: RwLock<HashSet<char>>,
    pub member_of: DashSet<String>,
    pub tx_outbound: mpsc::Sender<Message>,
}

impl ClientSession {
    pub async fn hostmask(&self) -> String {
        let nick = self.nick.read().await.clone().unwrap_or_else(|| "*".to_string());
        let user = self.user.read().await.clone().unwrap_or_else(|| "*".to_string());
        format!("{nick}!{user}@{}", self.addr.ip())
    }

    pub async fn send(&self, msg: Message) {
        let _ = self.tx_outbound.send(msg).await;
    }

    pub async fn touch(&self) {
        *self.last_activity.write().await = Instant::now();
    }
}

#[derive(Debug, Clone)]
pub struct WhowasRecord {
    pub nick: String,
    pub user: String,
    pub host: String,
    pub realname: String,
    pub ts: u64,
}

/// Outcome of a successful JOIN: the channel, member list for NAMES, and
/// whether the channel was newly created (affects whether an initial
/// `MODE +nt` must be emitted).
pub struct JoinOutcome {
    pub channel: Arc<Channel>,
    pub created: bool,
    pub hostmask: String,
}

pub struct PartOutcome {
    pub channel: Arc<Channel>,
    pub hostmask: String,
    pub destroyed: bool,
}

pub struct KickOutcome {
    pub channel: Arc<Channel>,
    pub target_id: ClientId,
    pub target_nick: String,
    pub destroyed: bool,
}

pub struct QuitOutcome {
    pub hostmask: String,
    pub channels: Vec<Arc<Channel>>,
}

pub enum DeliveryTarget {
    Channel(Arc<Channel>),
    Client(Arc<ClientSession>),
}

pub struct ModeOutcome {
    pub channel: Option<Arc<Channel>>,
    pub applied: Vec<irc_proto::ModeChange>,
    pub list_reply: Option<(char, Vec<String>)>,
}

pub struct TopicOutcome {
    pub channel: Arc<Channel>,
    pub topic: Option<TopicInfo>,
    pub changed: bool,
}

pub struct WhoisInfo {
    pub nick: String,
    pub user: String,
    pub host: String,
    pub realname: String,
    pub channels: Vec<String>,
    pub operator: bool,
}

pub struct WorldModel {
    pub server_name: String,
    pub casemapping: CaseMapping,
    pub chan_mode_spec: ChanModeSpec,
    pub max_nick_len: usize,
    pub max_channel_name_len: usize,
    pub max_topic_len: usize,
    pub server_password: Option<String>,
    pub whowas_history_len: usize,

    clients: DashMap<ClientId, Arc<ClientSession>>,
    channels: DashMap<String, Arc<Channel>>,
    nick_index: DashMap<String, ClientId>,
    whowas: RwLock<VecDeque<WhowasRecord>>,
    next_client_id: AtomicU64,
}

impl WorldModel {
    pub fn new(
        server_name: String,
        casemapping: CaseMapping,
        chan_mode_spec: ChanModeSpec,
        max_nick_len: usize,
        max_channel_name_len: usize,
        max_topic_len: usize,
        server_password: Option<String>,
        whowas_history_len: usize,
    ) -> Self {
        WorldModel {
            server_name,
            casemapping,
            chan_mode_spec,
            max_nick_len,
            max_channel_name_len,
            max_topic_len,
            server_password,
            whowas_history_len,
            clients: DashMap::new(),
            channels: DashMap::new(),
            nick_index: DashMap::new(),
            whowas: RwLock::new(VecDeque::new()),
            next_client_id: AtomicU64::new(1),
        }
    }

    fn fold_nick(&self, nick: &str) -> String {
        self.casemapping.normalize_nick(nick)
    }

    fn fold_channel(&self, name: &str) -> String {
        self.casemapping.normalize_channel(name)
    }

    /// Delivers `msg` to every current member of `chan`'s own outbound
    /// queue, skipping `exclude` if given. Channels have no independent
    /// subscriber list; membership in `chan.members` is the fan-out list.
    async fn deliver_to_channel(&self, chan: &Channel, msg: Message, exclude: Option<ClientId>) {
        for entry in chan.members.iter() {
            let member_id = *entry.key();
            if Some(member_id) == exclude {
                continue;
            }
            if let Some(member) = self.get(member_id) {
                member.send(msg.clone()).await;
            }
        }
    }

    pub fn connect(&self, addr: SocketAddr, tx_outbound: mpsc::Sender<Message>) -> Arc<ClientSession> {
        let id = self.next_client_id.fetch_add(1, Ordering::Relaxed);
        let session = Arc::new(ClientSession {
            id,
            addr,
            nick: RwLock::new(None),
            user: RwLock::new(None),
            realname: RwLock::new(None),
            away: RwLock::new(None),
            registered: AtomicBool::new(false),
            operator: AtomicBool::new(false),
            last_activity: RwLock::new(Instant::now()),
            ping_token: RwLock::new(None),
            modes: RwLock::new(HashSet::new()),
            member_of: DashSet::new(),
            tx_outbound,
        });
        self.clients.insert(id, session.clone());
        session
    }

    pub fn get(&self, id: ClientId) -> Option<Arc<ClientSession>> {
        self.clients.get(&id).map(|e| e.clone())
    }

    /// Number of connections currently tracked, including ones still mid
    /// registration. Used by the accept loop to enforce `Config::max_clients`.
    pub fn session_count(&self) -> usize {
        self.clients.len()
    }

    pub fn find_by_nick(&self, nick: &str) -> Option<Arc<ClientSession>> {
        let folded = self.fold_nick(nick);
        let id = *self.nick_index.get(&folded)?;
        self.get(id)
    }

    pub async fn register(
        &self,
        id: ClientId,
        nick: &str,
        user: &str,
        realname: &str,
        password: Option<&str>,
    ) -> Result<(), ProtocolError> {
        if let Some(required) = &self.server_password {
            if password != Some(required.as_str()) {
                return Err(ProtocolError::PasswdMismatch);
            }
        }
        if !irc_proto::is_valid_nickname(nick, self.max_nick_len) {
            return Err(ProtocolError::ErroneousNickname(nick.to_string()));
        }
        let folded = self.fold_nick(nick);
        if self.nick_index.contains_key(&folded) {
            return Err(ProtocolError::NicknameInUse(nick.to_string()));
        }
        let session = self.get(id).expect("session must exist before register");
        self.nick_index.insert(folded, id);
        *session.nick.write().await = Some(nick.to_string());
        *session.user.write().await = Some(user.to_string());
        *session.realname.write().await = Some(realname.to_string());
        session.registered.store(true, Ordering::Release);
        Ok(())
    }

    pub async fn change_nick(&self, id: ClientId, new_nick: &str) -> Result<(String, String), ProtocolError> {
        if !irc_proto::is_valid_nickname(new_nick, self.max_nick_len) {
            return Err(ProtocolError::ErroneousNickname(new_nick.to_string()));
        }
        let session = self.get(id).ok_or_else(|| ProtocolError::NotRegistered)?;
        let folded_new = self.fold_nick(new_nick);
        if let Some(existing) = self.nick_index.get(&folded_new) {
            if *existing != id {
                return Err(ProtocolError::NicknameInUse(new_nick.to_string()));
            }
        }
        let old_nick = session.nick.read().await.clone().unwrap_or_default();
        let folded_old = self.fold_nick(&old_nick);
        let hostmask = session.hostmask().await;

        self.nick_index.remove(&folded_old);
        self.nick_index.insert(folded_new, id);
        *session.nick.write().await = Some(new_nick.to_string());

        if !old_nick.is_empty() {
            let user = session.user.read().await.clone().unwrap_or_default();
            let realname = session.realname.read().await.clone().unwrap_or_default();
            let mut history = self.whowas.write().await;
            history.push_front(WhowasRecord {
                nick: old_nick.clone(),
                user,
                host: session.addr.ip().to_string(),
                realname,
                ts: unix_now(),
            });
            history.truncate(self.whowas_history_len);
        }

        let nick_msg = Message::new("NICK", vec![new_nick.to_string()]).with_source(hostmask.clone());
        session.send(nick_msg.clone()).await;
        for folded in session.member_of.iter().map(|e| e.clone()).collect::<Vec<_>>() {
            if let Some(chan) = self.channels.get(&folded).map(|e| e.clone()) {
                self.deliver_to_channel(&chan, nick_msg.clone(), Some(id)).await;
            }
        }

        Ok((old_nick, hostmask))
    }

    fn get_or_create_channel(&self, name: &str) -> (Arc<Channel>, bool) {
        let folded = self.fold_channel(name);
        if let Some(chan) = self.channels.get(&folded) {
            return (chan.clone(), false);
        }
        let chan = Arc::new(Channel::new(name.to_string()));
        self.channels.insert(folded, chan.clone());
        (chan, true)
    }

    pub fn find_channel(&self, name: &str) -> Option<Arc<Channel>> {
        self.channels.get(&self.fold_channel(name)).map(|e| e.clone())
    }

    pub async fn join(
        &self,
        id: ClientId,
        channel_name: &str,
        key: Option<&str>,
    ) -> Result<JoinOutcome, ProtocolError> {
        let session = self.get(id).ok_or(ProtocolError::NotRegistered)?;
        if !irc_proto::is_valid_channel_name(channel_name, "#&", self.max_channel_name_len) {
            return Err(ProtocolError::NoSuchChannel(channel_name.to_string()));
        }
        let (chan, created) = self.get_or_create_channel(channel_name);
        let hostmask = session.hostmask().await;

        if !created {
            let modes = chan.modes.read().await;
            let mask = hostmask.clone();
            if chan.ban_list.iter().any(|b| mask_matches(&b, &mask)) && !chan.except_list.iter().any(|b| mask_matches(&b, &mask)) {
                return Err(ProtocolError::BannedFromChan(channel_name.to_string()));
            }
            if modes.invite_only {
                let folded_nick = self.fold_nick(&session.nick.read().await.clone().unwrap_or_default());
                if !chan.invited.contains(&folded_nick) && !chan.invex_list.iter().any(|b| mask_matches(&b, &mask)) {
                    return Err(ProtocolError::InviteOnlyChan(channel_name.to_string()));
                }
            }
            if let Some(want) = &modes.key {
                if key != Some(want.as_str()) {
                    return Err(ProtocolError::BadChannelKey(channel_name.to_string()));
                }
            }
            if let Some(limit) = modes.limit {
                if chan.members.len() >= limit {
                    return Err(ProtocolError::ChannelIsFull(channel_name.to_string()));
                }
            }
        }

        let rank = if created { MemberRank::Op } else { MemberRank::None };
        chan.members.insert(id, rank);
        session.member_of.insert(self.fold_channel(channel_name));
        let folded_nick = self.fold_nick(&session.nick.read().await.clone().unwrap_or_default());
        chan.invited.remove(&folded_nick);

        let join_msg = Message::new("JOIN", vec![chan.name.clone()]).with_source(hostmask.clone());
        self.deliver_to_channel(&chan, join_msg, None).await;

        Ok(JoinOutcome {
            channel: chan,
            created,
            hostmask,
        })
    }

    pub async fn part(
        &self,
        id: ClientId,
        channel_name: &str,
        reason: Option<&str>,
    ) -> Result<PartOutcome, ProtocolError> {
        let session = self.get(id).ok_or(ProtocolError::NotRegistered)?;
        let chan = self
            .find_channel(channel_name)
            .ok_or_else(|| ProtocolError::NoSuchChannel(channel_name.to_string()))?;
        if chan.members.remove(&id).is_none() {
            return Err(ProtocolError::NotOnChannel(channel_name.to_string()));
        }
        session.member_of.remove(&self.fold_channel(channel_name));
        let hostmask = session.hostmask().await;

        let mut params = vec![chan.name.clone()];
        if let Some(r) = reason {
            params.push(r.to_string());
        }
        let part_msg = Message::new("PART", params).with_source(hostmask.clone());
        self.deliver_to_channel(&chan, part_msg.clone(), None).await;
        session.send(part_msg).await;

        let destroyed = chan.members.is_empty();
        if destroyed {
            self.channels.remove(&self.fold_channel(channel_name));
        }

        Ok(PartOutcome {
            channel: chan,
            hostmask,
            destroyed,
        })
    }

    pub async fn kick(
        &self,
        op_id: ClientId,
        channel_name: &str,
        target_nick: &str,
        reason: Option<&str>,
    ) -> Result<KickOutcome, ProtocolError> {
        let op = self.get(op_id).ok_or(ProtocolError::NotRegistered)?;
        let chan = self
            .find_channel(channel_name)
            .ok_or_else(|| ProtocolError::NoSuchChannel(channel_name.to_string()))?;
        let op_rank = chan.members.get(&op_id).map(|r| *r).unwrap_or(MemberRank::None);
        if op_rank < MemberRank::HalfOp {
            return Err(ProtocolError::ChanOPrivsNeeded(channel_name.to_string()));
        }
        let target = self
            .find_by_nick(target_nick)
            .ok_or_else(|| ProtocolError::NoSuchNick(target_nick.to_string()))?;
        if chan.members.remove(&target.id).is_none() {
            return Err(ProtocolError::NotOnChannel(channel_name.to_string()));
        }
        target.member_of.remove(&self.fold_channel(channel_name));

        let hostmask = op.hostmask().await;
        let mut params = vec![chan.name.clone(), target_nick.to_string()];
        if let Some(r) = reason {
            params.push(r.to_string());
        }
        let kick_msg = Message::new("KICK", params).with_source(hostmask);
        self.deliver_to_channel(&chan, kick_msg.clone(), None).await;
        target.send(kick_msg).await;

        let destroyed = chan.members.is_empty();
        if destroyed {
            self.channels.remove(&self.fold_channel(channel_name));
        }

        Ok(KickOutcome {
            channel: chan,
            target_id: target.id,
            target_nick: target_nick.to_string(),
            destroyed,
        })
    }

    pub async fn quit(&self, id: ClientId, reason: &str) -> QuitOutcome {
        let session = match self.get(id) {
            Some(s) => s,
            None => {
                return QuitOutcome {
                    hostmask: "*!*@*".to_string(),
                    channels: Vec::new(),
                };
            }
        };
        let hostmask = session.hostmask().await;
        let mut channels = Vec::new();
        for folded in session.member_of.iter().map(|e| e.clone()).collect::<Vec<_>>() {
            if let Some(chan) = self.channels.get(&folded).map(|e| e.clone()) {
                chan.members.remove(&id);
                let quit_msg = Message::new("QUIT", vec![reason.to_string()]).with_source(hostmask.clone());
                self.deliver_to_channel(&chan, quit_msg, None).await;
                if chan.members.is_empty() {
                    self.channels.remove(&folded);
                } else {
                    channels.push(chan);
                }
            }
        }
        if let Some(nick) = session.nick.read().await.clone() {
            self.nick_index.remove(&self.fold_nick(&nick));
        }
        self.clients.remove(&id);
        QuitOutcome { hostmask, channels }
    }

    pub async fn privmsg(
        &self,
        id: ClientId,
        target: &str,
        text: &str,
        is_notice: bool,
    ) -> Result<(DeliveryTarget, String), ProtocolError> {
        let session = self.get(id).ok_or(ProtocolError::NotRegistered)?;
        let hostmask = session.hostmask().await;
        let msg = Message::new(
            if is_notice { "NOTICE" } else { "PRIVMSG" },
            vec![target.to_string(), text.to_string()],
        )
        .with_source(hostmask.clone());

        if target.starts_with(['#', '&']) {
            let chan = self.find_channel(target).ok_or_else(|| {
                if is_notice {
                    ProtocolError::NoSuchChannel(target.to_string())
                } else {
                    ProtocolError::CannotSendToChan(target.to_string())
                }
            })?;
            let is_member = chan.members.contains_key(&id);
            let modes = chan.modes.read().await;
            if modes.no_external_messages && !is_member {
                return Err(ProtocolError::CannotSendToChan(target.to_string()));
            }
            if modes.moderated {
                let rank = chan.members.get(&id).map(|r| *r).unwrap_or(MemberRank::None);
                if rank < MemberRank::Voice {
                    return Err(ProtocolError::CannotSendToChan(target.to_string()));
                }
            }
            for entry in chan.members.iter() {
                if *entry.key() != id {
                    if let Some(member) = self.get(*entry.key()) {
                        member.send(msg.clone()).await;
                    }
                }
            }
            Ok((DeliveryTarget::Channel(chan), hostmask))
        } else {
            let recipient = self
                .find_by_nick(target)
                .ok_or_else(|| ProtocolError::NoSuchNick(target.to_string()))?;
            recipient.send(msg).await;
            Ok((DeliveryTarget::Client(recipient), hostmask))
        }
    }

    pub async fn mode(
        &self,
        id: ClientId,
        target: &str,
        modestring: Option<&str>,
        args: &[String],
    ) -> Result<ModeOutcome, ProtocolError> {
        if target.starts_with(['#', '&']) {
            self.channel_mode(id, target, modestring, args).await
        } else {
            self.user_mode(id, target, modestring).await
        }
    }

    async fn user_mode(
        &self,
        id: ClientId,
        target_nick: &str,
        modestring: Option<&str>,
    ) -> Result<ModeOutcome, ProtocolError> {
        let session = self.get(id).ok_or(ProtocolError::NotRegistered)?;
        let self_nick = session.nick.read().await.clone().unwrap_or_default();
        if self.fold_nick(&self_nick) != self.fold_nick(target_nick) {
            return Err(ProtocolError::UsersDontMatch);
        }
        let Some(modestring) = modestring else {
            return Ok(ModeOutcome {
                channel: None,
                applied: Vec::new(),
                list_reply: None,
            });
        };
        const KNOWN_USER_MODES: &str = "aiorsw";
        let mut modes = session.modes.write().await;
        let mut sign = Sign::Plus;
        for c in modestring.chars() {
            match c {
                '+' => sign = Sign::Plus,
                '-' => sign = Sign::Minus,
                m if KNOWN_USER_MODES.contains(m) => match sign {
                    Sign::Plus => {
                        modes.insert(m);
                    }
                    Sign::Minus => {
                        modes.remove(&m);
                    }
                },
                _ => return Err(ProtocolError::UModeUnknownFlag),
            }
        }
        Ok(ModeOutcome {
            channel: None,
            applied: Vec::new(),
            list_reply: None,
        })
    }

    async fn channel_mode(
        &self,
        id: ClientId,
        channel_name: &str,
        modestring: Option<&str>,
        args: &[String],
    ) -> Result<ModeOutcome, ProtocolError> {
        let chan = self
            .find_channel(channel_name)
            .ok_or_else(|| ProtocolError::NoSuchChannel(channel_name.to_string()))?;
        if modestring.is_none() {
            return Ok(ModeOutcome {
                channel: Some(chan.clone()),
                applied: Vec::new(),
                list_reply: None,
            });
        }
        let modestring = modestring.unwrap();

        let changes = parse_mode_changes(modestring, args, &self.chan_mode_spec)
            .map_err(|e| match e {
                irc_proto::mode::ModeParseError::UnknownLetter(c) => ProtocolError::UnknownMode(c),
                irc_proto::mode::ModeParseError::MissingArgument(_) => {
                    ProtocolError::NeedMoreParams("MODE".to_string())
                }
            })?;

        // A bare list-mode query (no arg) is answered with the list, not applied.
        if changes.len() == 1 && matches!(changes[0].letter, 'b' | 'e' | 'I') && changes[0].arg.is_none() {
            let letter = changes[0].letter;
            let list: Vec<String> = match letter {
                'b' => chan.ban_list.iter().map(|e| e.clone()).collect(),
                'e' => chan.except_list.iter().map(|e| e.clone()).collect(),
                'I' => chan.invex_list.iter().map(|e| e.clone()).collect(),
                _ => unreachable!(),
            };
            return Ok(ModeOutcome {
                channel: Some(chan),
                applied: Vec::new(),
                list_reply: Some((letter, list)),
            });
        }

        let rank = chan.members.get(&id).map(|r| *r).unwrap_or(MemberRank::None);
        for change in &changes {
            let required = match change.letter {
                'v' => MemberRank::HalfOp,
                'h' | 'b' | 'e' | 'I' | 'k' | 'l' | 'i' | 'm' | 's' | 't' | 'n' => MemberRank::Op,
                'o' | 'a' | 'q' => MemberRank::Admin,
                _ => MemberRank::Op,
            };
            if rank < required {
                return Err(ProtocolError::ChanOPrivsNeeded(channel_name.to_string()));
            }
        }

        for change in &changes {
            match change.letter {
                'i' => chan.modes.write().await.invite_only = change.sign == Sign::Plus,
                'm' => chan.modes.write().await.moderated = change.sign == Sign::Plus,
                'n' => chan.modes.write().await.no_external_messages = change.sign == Sign::Plus,
                's' => chan.modes.write().await.secret = change.sign == Sign::Plus,
                't' => chan.modes.write().await.protected = change.sign == Sign::Plus,
                'k' => {
                    chan.modes.write().await.key = if change.sign == Sign::Plus {
                        change.arg.clone()
                    } else {
                        None
                    }
                }
                'l' => {
                    chan.modes.write().await.limit = if change.sign == Sign::Plus {
                        change.arg.as_ref().and_then(|a| a.parse().ok())
                    } else {
                        None
                    }
                }
                'b' => {
                    if let Some(mask) = &change.arg {
                        if change.sign == Sign::Plus {
                            chan.ban_list.insert(mask.clone());
                        } else {
                            chan.ban_list.remove(mask);
                        }
                    }
                }
                'e' => {
                    if let Some(mask) = &change.arg {
                        if change.sign == Sign::Plus {
                            chan.except_list.insert(mask.clone());
                        } else {
                            chan.except_list.remove(mask);
                        }
                    }
                }
                'I' => {
                    if let Some(mask) = &change.arg {
                        if change.sign == Sign::Plus {
                            chan.invex_list.insert(mask.clone());
                        } else {
                            chan.invex_list.remove(mask);
                        }
                    }
                }
                'o' | 'h' | 'v' | 'a' | 'q' => {
                    if let Some(who) = &change.arg {
                        if let Some(member) = self.find_by_nick(who) {
                            let new_rank = match change.letter {
                                'q' => MemberRank::Owner,
                                'a' => MemberRank::Admin,
                                'o' => MemberRank::Op,
                                'h' => MemberRank::HalfOp,
                                'v' => MemberRank::Voice,
                                _ => unreachable!(),
                            };
                            chan.members.insert(
                                member.id,
                                if change.sign == Sign::Plus {
                                    new_rank
                                } else {
                                    MemberRank::None
                                },
                            );
                        }
                    }
                }
                _ => {}
            }
        }

        let session = self.get(id).ok_or(ProtocolError::NotRegistered)?;
        let hostmask = session.hostmask().await;
        let mut params = vec![chan.name.clone(), modestring.to_string()];
        params.extend_from_slice(args);
        let mode_msg = Message::new("MODE", params).with_source(hostmask);
        self.deliver_to_channel(&chan, mode_msg, None).await;

        Ok(ModeOutcome {
            channel: Some(chan),
            applied: changes,
            list_reply: None,
        })
    }

    pub async fn topic(
        &self,
        id: ClientId,
        channel_name: &str,
        new_topic: Option<&str>,
    ) -> Result<TopicOutcome, ProtocolError> {
        let chan = self
            .find_channel(channel_name)
            .ok_or_else(|| ProtocolError::NoSuchChannel(channel_name.to_string()))?;
        let Some(text) = new_topic else {
            let topic = chan.topic.read().await.clone();
            return Ok(TopicOutcome {
                channel: chan,
                topic,
                changed: false,
            });
        };

        let rank = chan.members.get(&id).map(|r| *r).unwrap_or(MemberRank::None);
        let protected = chan.modes.read().await.protected;
        if protected && rank < MemberRank::Op {
            return Err(ProtocolError::ChanOPrivsNeeded(channel_name.to_string()));
        }

        let text: String = text.chars().take(self.max_topic_len).collect();
        let info = TopicInfo {
            text: text.clone(),
            set_by: id,
            set_at: unix_now(),
        };
        *chan.topic.write().await = Some(info.clone());

        let session = self.get(id).ok_or(ProtocolError::NotRegistered)?;
        let hostmask = session.hostmask().await;
        let topic_msg = Message::new("TOPIC", vec![chan.name.clone(), text]).with_source(hostmask);
        self.deliver_to_channel(&chan, topic_msg, None).await;

        Ok(TopicOutcome {
            channel: chan,
            topic: Some(info),
            changed: true,
        })
    }

    pub async fn names(&self, channel_name: &str) -> Result<Vec<(String, MemberRank)>, ProtocolError> {
        let chan = self
            .find_channel(channel_name)
            .ok_or_else(|| ProtocolError::NoSuchChannel(channel_name.to_string()))?;
        let mut out = Vec::new();
        for entry in chan.members.iter() {
            if let Some(member) = self.get(*entry.key()) {
                let nick = member.nick.read().await.clone().unwrap_or_default();
                out.push((nick, *entry.value()));
            }
        }
        out.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        Ok(out)
    }

    pub fn list(&self, requester: ClientId, pattern: Option<&str>) -> Vec<(String, usize, String)> {
        let mut out = Vec::new();
        for entry in self.channels.iter() {
            let chan = entry.value();
            if let Some(pat) = pattern {
                if !chan.name.eq_ignore_ascii_case(pat) {
                    continue;
                }
            }
            out.push(chan.clone());
        }
        let mut rendered = Vec::new();
        for chan in out {
            let is_member = chan.members.contains_key(&requester);
            // Visibility check happens synchronously on a best-effort snapshot;
            // `secret` is read via try_read to avoid an async fn here.
            let secret = chan.modes.try_read().map(|m| m.secret).unwrap_or(false);
            if secret && !is_member {
                continue;
            }
            let topic = chan
                .topic
                .try_read()
                .ok()
                .and_then(|t| t.clone())
                .map(|t| t.text)
                .unwrap_or_default();
            rendered.push((chan.name.clone(), chan.members.len(), topic));
        }
        rendered
    }

    pub async fn who(&self, mask: &str) -> Vec<Arc<ClientSession>> {
        let mut out = Vec::new();
        for entry in self.clients.iter() {
            let session = entry.value().clone();
            let nick = session.nick.read().await.clone().unwrap_or_default();
            if mask == "*" || nick.eq_ignore_ascii_case(mask) {
                out.push(session);
            }
        }
        out
    }

    pub async fn whois(&self, nick: &str) -> Result<WhoisInfo, ProtocolError> {
        let session = self
            .find_by_nick(nick)
            .ok_or_else(|| ProtocolError::NoSuchNick(nick.to_string()))?;
        let channels = session.member_of.iter().map(|e| e.clone()).collect();
        Ok(WhoisInfo {
            nick: session.nick.read().await.clone().unwrap_or_default(),
            user: session.user.read().await.clone().unwrap_or_default(),
            host: session.addr.ip().to_string(),
            realname: session.realname.read().await.clone().unwrap_or_default(),
            channels,
            operator: session.operator.load(Ordering::Acquire),
        })
    }

    pub async fn whowas(&self, nick: &str) -> Vec<WhowasRecord> {
        let folded = self.fold_nick(nick);
        let history = self.whowas.read().await;
        history
            .iter()
            .filter(|r| self.fold_nick(&r.nick) == folded)
            .cloned()
            .collect()
    }

    pub async fn invite(
        &self,
        op_id: ClientId,
        target_nick: &str,
        channel_name: &str,
    ) -> Result<Arc<ClientSession>, ProtocolError> {
        let chan = self
            .find_channel(channel_name)
            .ok_or_else(|| ProtocolError::NoSuchChannel(channel_name.to_string()))?;
        let op_rank = chan.members.get(&op_id).map(|r| *r).unwrap_or(MemberRank::None);
        if op_rank < MemberRank::HalfOp {
            return Err(ProtocolError::ChanOPrivsNeeded(channel_name.to_string()));
        }
        let target = self
            .find_by_nick(target_nick)
            .ok_or_else(|| ProtocolError::NoSuchNick(target_nick.to_string()))?;
        chan.invited.insert(self.fold_nick(target_nick));
        target
            .send(Message::new("INVITE", vec![target_nick.to_string(), chan.name.clone()]))
            .await;
        Ok(target)
    }
}

/// Minimal glob-style mask matcher for `nick!user@host` patterns with `*`/`?`.
fn mask_matches(pattern: &str, mask: &str) -> bool {
    fn glob(pattern: &[u8], text: &[u8]) -> bool {
        match (pattern.first(), text.first()) {
            (None, None) => true,
            (Some(b'*'), _) => {
                glob(&pattern[1..], text) || (!text.is_empty() && glob(pattern, &text[1..]))
            }
            (Some(b'?'), Some(_)) => glob(&pattern[1..], &text[1..]),
            (Some(p), Some(t)) if p.eq_ignore_ascii_case(t) => glob(&pattern[1..], &text[1..]),
            _ => false,
        }
    }
    glob(pattern.as_bytes(), mask.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use irc_proto::ChanModeSpec;
    use std::net::{IpAddr, Ipv4Addr};

    fn world() -> WorldModel {
        WorldModel::new(
            "irc.test".to_string(),
            CaseMapping::Rfc1459,
            ChanModeSpec::parse("beI,k,l,imnpst"),
            9,
            50,
            390,
            None,
            200,
        )
    }

    fn addr() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 12345)
    }

    async fn connect_and_register(w: &WorldModel, nick: &str) -> ClientId {
        let (tx, _rx) = mpsc::channel(32);
        let session = w.connect(addr(), tx);
        w.register(session.id, nick, "user", "Real Name", None).await.unwrap();
        session.id
    }

    #[tokio::test]
    async fn register_then_duplicate_nick_rejected() {
        let w = world();
        connect_and_register(&w, "alice").await;
        let (tx, _rx) = mpsc::channel(32);
        let second = w.connect(addr(), tx);
        let err = w.register(second.id, "Alice", "user", "r", None).await.unwrap_err();
        assert_eq!(err, ProtocolError::NicknameInUse("Alice".to_string()));
    }

    #[tokio::test]
    async fn join_creates_channel_and_grants_op() {
        let w = world();
        let id = connect_and_register(&w, "alice").await;
        let outcome = w.join(id, "#room", None).await.unwrap();
        assert!(outcome.created);
        let names = w.names("#room").await.unwrap();
        assert_eq!(names, vec![("alice".to_string(), MemberRank::Op)]);
    }

    #[tokio::test]
    async fn part_last_member_destroys_channel() {
        let w = world();
        let id = connect_and_register(&w, "alice").await;
        w.join(id, "#room", None).await.unwrap();
        let outcome = w.part(id, "#room", None).await.unwrap();
        assert!(outcome.destroyed);
        assert!(w.find_channel("#room").is_none());
    }

    #[tokio::test]
    async fn channel_limit_blocks_join_when_full() {
        let w = world();
        let alice = connect_and_register(&w, "alice").await;
        w.join(alice, "#room", None).await.unwrap();
        w.channel_mode(alice, "#room", Some("+l"), &["0".to_string()])
            .await
            .unwrap();
        let bob = connect_and_register(&w, "bob").await;
        let err = w.join(bob, "#room", None).await.unwrap_err();
        assert_eq!(err, ProtocolError::ChannelIsFull("#room".to_string()));
    }

    #[tokio::test]
    async fn key_protected_channel_requires_matching_key() {
        let w = world();
        let alice = connect_and_register(&w, "alice").await;
        w.join(alice, "#room", None).await.unwrap();
        w.channel_mode(alice, "#room", Some("+k"), &["secret".to_string()])
            .await
            .unwrap();
        let bob = connect_and_register(&w, "bob").await;
        let err = w.join(bob, "#room", Some("wrong")).await.unwrap_err();
        assert_eq!(err, ProtocolError::BadChannelKey("#room".to_string()));
        w.join(bob, "#room", Some("secret")).await.unwrap();
    }
}
