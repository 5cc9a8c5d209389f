//! Numeric reply catalogue.
//!
//! Generalizes the teacher's `IrcReply`/`constants.rs` pair
//! (`irc_server/src/replies.rs`) into one crate-level enum that owns its
//! formatted text rather than borrowing it, since replies here cross
//! `tokio::sync::mpsc` channel boundaries into a writer task and can't carry
//! a borrow from the handler that produced them.

use crate::message::Message;

macro_rules! numerics {
    ($($variant:ident($code:expr) { $($field:ident : $ty:ty),* $(,)? } => $body:block),* $(,)?) => {
        #[derive(Debug, Clone, PartialEq, Eq)]
        pub enum Numeric {
            $($variant { $($field: $ty),* }),*
        }

        impl Numeric {
            pub fn code(&self) -> u16 {
                match self {
                    $(Numeric::$variant { .. } => $code),*
                }
            }

            /// Renders the human-readable trailing text (without the leading
            /// `:server code target` prefix).
            pub fn text(&self) -> String {
                match self {
                    $(Numeric::$variant { $($field),* } => $body),*
                }
            }
        }
    };
}

impl Numeric {
    /// Builds the full server-to-client [`Message`]: `:server CODE target ...text`.
    ///
    /// `target` is normally the client's current nickname (or `*` before
    /// registration). Numerics whose text already embeds structured
    /// params (NAMES, WHO, MODE list replies) still route through here;
    /// `middle_params` supplies any space-separated params that precede the
    /// trailing `:text` segment (e.g. the channel name for RPL_NOTOPIC).
    pub fn into_message(self, server_name: &str, target: &str, middle_params: Vec<String>) -> Message {
        let code = self.code();
        let text = self.text();
        let mut params = vec![target.to_string()];
        params.extend(middle_params);
        params.push(text);
        Message::new(format!("{code:03}"), params).with_source(server_name.to_string())
    }
}

numerics! {
    RplWelcome(1) { nick: String, user: String, host: String } => {
        format!("Welcome to the Internet Relay Network {nick}!{user}@{host}")
    },
    RplYourHost(2) { servername: String, version: String } => {
        format!("Your host is {servername}, running version {version}")
    },
    RplCreated(3) { date: String } => {
        format!("This server was created {date}")
    },
    RplMyInfo(4) { servername: String, version: String, user_modes: String, chan_modes: String } => {
        format!("{servername} {version} {user_modes} {chan_modes}")
    },
    RplUModeIs(221) { modes: String } => { modes.clone() },
    RplNoTopic(331) { channel: String } => { let _ = channel; "No topic is set".to_string() },
    RplTopic(332) { channel: String, topic: String } => { let _ = channel; topic.clone() },
    RplNamReply(353) { symbol: String, channel: String, names: Vec<String> } => {
        let _ = (symbol, channel);
        names.join(" ")
    },
    RplEndOfNames(366) { channel: String } => { let _ = channel; "End of /NAMES list".to_string() },
    RplList(322) { channel: String, visible: u32, topic: String } => {
        let _ = (channel, visible);
        topic.clone()
    },
    RplListEnd(323) {} => { "End of /LIST".to_string() },
    RplWhoReply(352) { channel: String, user: String, host: String, server: String, nick: String, flags: String, hopcount: u32, realname: String } => {
        let _ = (channel, user, host, server, nick, flags);
        format!("{hopcount} {realname}")
    },
    RplEndOfWho(315) { mask: String } => { let _ = mask; "End of /WHO list".to_string() },
    RplWhoisUser(311) { nick: String, user: String, host: String, realname: String } => {
        let _ = (nick, user, host);
        realname.clone()
    },
    RplWhoisServer(312) { nick: String, server: String, server_info: String } => {
        let _ = (nick, server);
        server_info.clone()
    },
    RplWhoisIdle(317) { nick: String, idle_secs: u64, signon: u64 } => {
        let _ = (nick, idle_secs, signon);
        "seconds idle, signon time".to_string()
    },
    RplEndOfWhois(318) { nick: String } => { let _ = nick; "End of /WHOIS list".to_string() },
    RplWhoisChannels(319) { nick: String, channels: Vec<String> } => {
        let _ = nick;
        channels.join(" ")
    },
    RplWhoWasUser(314) { nick: String, user: String, host: String, realname: String } => {
        let _ = (nick, user, host);
        realname.clone()
    },
    RplEndOfWhoWas(369) { nick: String } => { let _ = nick; "End of WHOWAS".to_string() },
    RplChannelModeIs(324) { channel: String, modes: String, mode_params: String } => {
        let _ = channel;
        format!("{modes} {mode_params}").trim().to_string()
    },
    RplBanList(367) { channel: String, mask: String } => { let _ = channel; mask.clone() },
    RplEndOfBanList(368) { channel: String } => { let _ = channel; "End of channel ban list".to_string() },
    RplInviting(341) { channel: String, nick: String } => { let _ = channel; nick.clone() },
    RplInviteList(346) { channel: String, mask: String } => { let _ = channel; mask.clone() },
    RplEndOfInviteList(347) { channel: String } => { let _ = channel; "End of channel invite list".to_string() },
    RplExceptList(348) { channel: String, mask: String } => { let _ = channel; mask.clone() },
    RplEndOfExceptList(349) { channel: String } => { let _ = channel; "End of channel exception list".to_string() },
    RplYoureOper(381) {} => { "You are now an IRC operator".to_string() },
    RplMotdStart(375) { servername: String } => { format!("- {servername} Message of the day - ") },
    RplMotd(372) { line: String } => { format!("- {line}") },
    RplEndOfMotd(376) {} => { "End of /MOTD command".to_string() },
    ErrNoMotd(422) {} => { "MOTD File is missing".to_string() },
    ErrNoSuchNick(401) { nick: String } => { format!("{nick} :No such nick/channel") },
    ErrNoSuchChannel(403) { channel: String } => { format!("{channel} :No such channel") },
    ErrCannotSendToChan(404) { channel: String } => { format!("{channel} :Cannot send to channel") },
    ErrUnknownCommand(421) { command: String } => { format!("{command} :Unknown command") },
    ErrNoNicknameGiven(431) {} => { "No nickname given".to_string() },
    ErrErroneousNickname(432) { nick: String } => { format!("{nick} :Erroneous nickname") },
    ErrNicknameInUse(433) { nick: String } => { format!("{nick} :Nickname is already in use") },
    ErrNotOnChannel(442) { channel: String } => { format!("{channel} :You're not on that channel") },
    ErrNotRegistered(451) {} => { "You have not registered".to_string() },
    ErrNeedMoreParams(461) { command: String } => { format!("{command} :Not enough parameters") },
    ErrAlreadyRegistered(462) {} => { "You may not reregister".to_string() },
    ErrPasswdMismatch(464) {} => { "Password incorrect".to_string() },
    ErrChannelIsFull(471) { channel: String } => { format!("{channel} :Cannot join channel (+l)") },
    ErrUnknownMode(472) { modechar: char } => { format!("{modechar} :is unknown mode char to me") },
    ErrInviteOnlyChan(473) { channel: String } => { format!("{channel} :Cannot join channel (+i)") },
    ErrBannedFromChan(474) { channel: String } => { format!("{channel} :Cannot join channel (+b)") },
    ErrBadChannelKey(475) { channel: String } => { format!("{channel} :Cannot join channel (+k)") },
    ErrChanOPrivsNeeded(482) { channel: String } => { format!("{channel} :You're not channel operator") },
    ErrUModeUnknownFlag(501) {} => { "Unknown MODE flag".to_string() },
    ErrUsersDontMatch(502) {} => { "Cannot change mode for other users".to_string() },
    ErrNoOperHost(491) {} => { "No O-lines for your host".to_string() },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn welcome_renders_expected_code_and_text() {
        let n = Numeric::RplWelcome {
            nick: "alice".into(),
            user: "a".into(),
            host: "h".into(),
        };
        assert_eq!(n.code(), 1);
        assert_eq!(n.text(), "Welcome to the Internet Relay Network alice!a@h");
    }

    #[test]
    fn into_message_carries_target_and_middle_params() {
        let n = Numeric::RplNoTopic {
            channel: "#x".into(),
        };
        let m = n.into_message("irc.example", "alice", vec!["#x".to_string()]);
        assert_eq!(m.command, "331");
        assert_eq!(m.source.as_deref(), Some("irc.example"));
        assert_eq!(m.params, vec!["alice", "#x", "No topic is set"]);
    }

    #[test]
    fn error_numeric_embeds_subject_in_text() {
        let n = Numeric::ErrNicknameInUse {
            nick: "bob".into(),
        };
        assert_eq!(n.code(), 433);
        assert!(n.text().contains("bob"));
    }

    #[test]
    fn need_more_params_names_the_command() {
        let n = Numeric::ErrNeedMoreParams {
            command: "JOIN".into(),
        };
        assert_eq!(n.text(), "JOIN :Not enough parameters");
    }
}
