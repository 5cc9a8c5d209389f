//! Shared, I/O-free IRC wire protocol: casefolding, message codec,
//! mode-string grammar, ISUPPORT table, and numeric reply catalogue.
//!
//! `irc_server` and `irc_client` both depend on this crate so the two sides
//! of the protocol can never disagree about how a line is framed or a
//! nickname is compared.

pub mod casefold;
pub mod error;
pub mod isupport;
pub mod message;
pub mod mode;
pub mod numeric;
pub mod valid;

pub use casefold::CaseMapping;
pub use error::ProtocolError;
pub use isupport::ISupport;
pub use message::{CodecError, Message, Tag};
pub use mode::{ArgPolicy, ChanModeSpec, ModeChange, ModeParseError, Sign};
pub use numeric::Numeric;
pub use valid::{is_valid_channel_name, is_valid_nickname};
