//! Protocol errors: client misuse that is answered with a numeric reply and
//! never terminates the session. Generalizes the teacher's `IrcError`
//! (`irc_server/src/errors.rs`), which only covered two ad-hoc parsing
//! variants, into the full set WorldModel operations can raise.

use crate::numeric::Numeric;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("no such nick: {0}")]
    NoSuchNick(String),
    #[error("no such channel: {0}")]
    NoSuchChannel(String),
    #[error("cannot send to channel: {0}")]
    CannotSendToChan(String),
    #[error("not registered")]
    NotRegistered,
    #[error("nickname in use: {0}")]
    NicknameInUse(String),
    #[error("erroneous nickname: {0}")]
    ErroneousNickname(String),
    #[error("passwd mismatch")]
    PasswdMismatch,
    #[error("already registered")]
    AlreadyRegistered,
    #[error("need more params: {0}")]
    NeedMoreParams(String),
    #[error("unknown command: {0}")]
    UnknownCommand(String),
    #[error("banned from chan: {0}")]
    BannedFromChan(String),
    #[error("invite only chan: {0}")]
    InviteOnlyChan(String),
    #[error("bad channel key: {0}")]
    BadChannelKey(String),
    #[error("channel is full: {0}")]
    ChannelIsFull(String),
    #[error("chan o-priv needed: {0}")]
    ChanOPrivsNeeded(String),
    #[error("not on channel: {0}")]
    NotOnChannel(String),
    #[error("unknown mode char: {0}")]
    UnknownMode(char),
    #[error("users don't match")]
    UsersDontMatch,
    #[error("unknown user mode flag")]
    UModeUnknownFlag,
    #[error("no O-lines for your host")]
    NoOperHost,
}

impl ProtocolError {
    /// Converts to the numeric reply that answers this error on the wire.
    pub fn into_numeric(self) -> Numeric {
        match self {
            ProtocolError::NoSuchNick(nick) => Numeric::ErrNoSuchNick { nick },
            ProtocolError::NoSuchChannel(channel) => Numeric::ErrNoSuchChannel { channel },
            ProtocolError::CannotSendToChan(channel) => Numeric::ErrCannotSendToChan { channel },
            ProtocolError::NotRegistered => Numeric::ErrNotRegistered {},
            ProtocolError::NicknameInUse(nick) => Numeric::ErrNicknameInUse { nick },
            ProtocolError::ErroneousNickname(nick) => Numeric::ErrErroneousNickname { nick },
            ProtocolError::PasswdMismatch => Numeric::ErrPasswdMismatch {},
            ProtocolError::AlreadyRegistered => Numeric::ErrAlreadyRegistered {},
            ProtocolError::NeedMoreParams(command) => Numeric::ErrNeedMoreParams { command },
            ProtocolError::UnknownCommand(command) => Numeric::ErrUnknownCommand { command },
            ProtocolError::BannedFromChan(channel) => Numeric::ErrBannedFromChan { channel },
            ProtocolError::InviteOnlyChan(channel) => Numeric::ErrInviteOnlyChan { channel },
            ProtocolError::BadChannelKey(channel) => Numeric::ErrBadChannelKey { channel },
            ProtocolError::ChannelIsFull(channel) => Numeric::ErrChannelIsFull { channel },
            ProtocolError::ChanOPrivsNeeded(channel) => Numeric::ErrChanOPrivsNeeded { channel },
            ProtocolError::NotOnChannel(channel) => Numeric::ErrNotOnChannel { channel },
            ProtocolError::UnknownMode(modechar) => Numeric::ErrUnknownMode { modechar },
            ProtocolError::UsersDontMatch => Numeric::ErrUsersDontMatch {},
            ProtocolError::UModeUnknownFlag => Numeric::ErrUModeUnknownFlag {},
            ProtocolError::NoOperHost => Numeric::ErrNoOperHost {},
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nickname_in_use_maps_to_433() {
        let err = ProtocolError::NicknameInUse("bob".to_string());
        assert_eq!(err.into_numeric().code(), 433);
    }

    #[test]
    fn chan_o_privs_needed_maps_to_482() {
        let err = ProtocolError::ChanOPrivsNeeded("#room".to_string());
        assert_eq!(err.into_numeric().code(), 482);
    }
}
