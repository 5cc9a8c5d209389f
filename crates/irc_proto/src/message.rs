//! Wire codec for IRC messages.
//!
//! Grammar (simplified Modern IRC):
//!
//! ```text
//! message    =  [ '@' tags SP ] [ ':' source SP ] command { SP middle } [ SP ':' trailing ] crlf
//! tags       =  tag *( ';' tag )
//! tag        =  key [ '=' escaped-value ]
//! source     =  servername / ( nick [ [ '!' user ] '@' host ] )
//! command    =  1*letter / 3digit
//! middle     =  nospcrlfcl *( ':' / nospcrlfcl )
//! trailing   =  *( ':' / ' ' / nospcrlfcl )
//! nospcrlfcl =  %x01-09 / %x0B-0C / %x0E-1F / %x21-39 / %x3B-FF
//! crlf       =  %x0D %x0A
//! ```
//!
//! A message carries at most 15 parameters (14 middles plus one trailing).
//! Lines are framed with CRLF on output; a lone LF is accepted leniently on
//! input. Lines longer than 512 bytes (excluding tags) are truncated to 512
//! bytes, CRLF included, before being sent.

use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::{tag, take_while, take_while1, take_while_m_n},
    character::complete::char,
    combinator::{map, opt, recognize},
    multi::{many0, many_m_n, separated_list1},
    sequence::{pair, preceded, terminated},
};
use thiserror::Error;

/// Hard line cap from RFC 1459 §2.3, excluding IRCv3 tags.
pub const MAX_LINE_LEN: usize = 512;
/// Maximum number of parameters (14 middles + 1 trailing).
pub const MAX_PARAMS: usize = 15;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("empty message")]
    Empty,
    #[error("malformed message: {0}")]
    Malformed(String),
}

/// One IRCv3 message tag. `value` is `None` for a bare `key` (no `=`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    pub key: String,
    pub value: Option<String>,
}

/// A fully decoded IRC line: optional tags, optional source prefix, a
/// command verb (or 3-digit numeric, stored uppercased / as digits), and up
/// to 15 parameters. The last parameter may have contained spaces (it was
/// introduced with `:` on the wire) but that distinction does not need to
/// survive decoding — re-encoding re-derives which parameter needs the `:`
/// prefix from whether it contains a space or starts with `:`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Message {
    pub tags: Vec<Tag>,
    pub source: Option<String>,
    pub command: String,
    pub params: Vec<String>,
}

impl Message {
    pub fn new(command: impl Into<String>, params: Vec<String>) -> Self {
        Message {
            tags: Vec::new(),
            source: None,
            command: command.into(),
            params,
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Decodes a single line (without its trailing CRLF/LF). Tolerates a
    /// trailing `\r` left over from lenient LF-only splitting.
    pub fn decode(line: &str) -> Result<Self, CodecError> {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.is_empty() {
            return Err(CodecError::Empty);
        }
        match message_parser(line) {
            Ok((rest, msg)) if rest.is_empty() => Ok(msg),
            Ok((rest, _)) => Err(CodecError::Malformed(format!(
                "trailing unparsed input: {rest:?}"
            ))),
            Err(e) => Err(CodecError::Malformed(e.to_string())),
        }
    }

    /// Encodes this message into a single CRLF-terminated wire line,
    /// truncating to [`MAX_LINE_LEN`] bytes (CRLF included) if needed. Tags
    /// are not counted against that cap.
    pub fn encode(&self) -> String {
        let mut out = String::new();
        if !self.tags.is_empty() {
            out.push('@');
            for (i, t) in self.tags.iter().enumerate() {
                if i > 0 {
                    out.push(';');
                }
                out.push_str(&escape_tag_value(&t.key));
                if let Some(v) = &t.value {
                    out.push('=');
                    out.push_str(&escape_tag_value(v));
                }
            }
            out.push(' ');
        }
        let tag_prefix_len = out.len();
        if let Some(src) = &self.source {
            out.push(':');
            out.push_str(src);
            out.push(' ');
        }
        out.push_str(&self.command);
        for (i, p) in self.params.iter().enumerate() {
            out.push(' ');
            let is_last = i == self.params.len() - 1;
            if is_last && (p.is_empty() || p.contains(' ') || p.starts_with(':')) {
                out.push(':');
            }
            out.push_str(p);
        }

        // Truncate the non-tag portion to MAX_LINE_LEN bytes including CRLF.
        let body_budget = MAX_LINE_LEN.saturating_sub(2);
        let body = &out[tag_prefix_len..];
        if body.len() > body_budget {
            let mut cut = body_budget;
            while !body.is_char_boundary(cut) {
                cut -= 1;
            }
            out.truncate(tag_prefix_len + cut);
        }
        out.push_str("\r\n");
        out
    }
}

fn escape_tag_value(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            ';' => out.push_str("\\:"),
            ' ' => out.push_str("\\s"),
            '\\' => out.push_str("\\\\"),
            '\r' => out.push_str("\\r"),
            '\n' => out.push_str("\\n"),
            other => out.push(other),
        }
    }
    out
}

/// Unknown escapes decode as the literal character following the backslash,
/// per spec.
fn unescape_tag_value(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some(':') => out.push(';'),
                Some('s') => out.push(' '),
                Some('\\') => out.push('\\'),
                Some('r') => out.push('\r'),
                Some('n') => out.push('\n'),
                Some(other) => out.push(other),
                None => {}
            }
        } else {
            out.push(c);
        }
    }
    out
}

fn is_nospcrlfcl(c: char) -> bool {
    matches!(c as u32, 0x01..=0x09 | 0x0B..=0x0C | 0x0E..=0x1F | 0x21..=0x39 | 0x3B..=0xFF)
}

fn middle_parser(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        take_while1(is_nospcrlfcl),
        many0(alt((tag(":"), take_while1(is_nospcrlfcl)))),
    ))
    .parse(input)
}

fn trailing_parser(input: &str) -> IResult<&str, &str> {
    take_while(|c: char| c == ':' || c == ' ' || is_nospcrlfcl(c)).parse(input)
}

fn tag_key_parser(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c != '=' && c != ';' && c != ' ').parse(input)
}

fn tag_value_parser(input: &str) -> IResult<&str, &str> {
    take_while(|c: char| c != ';' && c != ' ').parse(input)
}

fn one_tag_parser(input: &str) -> IResult<&str, Tag> {
    let (rem, (key, value)) =
        (tag_key_parser, opt(preceded(char('='), tag_value_parser))).parse(input)?;
    Ok((
        rem,
        Tag {
            key: key.to_string(),
            value: value.map(unescape_tag_value),
        },
    ))
}

fn tags_parser(input: &str) -> IResult<&str, Vec<Tag>> {
    preceded(
        char('@'),
        terminated(separated_list1(char(';'), one_tag_parser), char(' ')),
    )
    .parse(input)
}

fn nick_or_server_char(c: char) -> bool {
    c != ' ' && c != '\0' && c != '\r' && c != '\n'
}

fn source_parser(input: &str) -> IResult<&str, &str> {
    preceded(
        char(':'),
        terminated(take_while1(nick_or_server_char), char(' ')),
    )
    .parse(input)
}

fn numeric_command_parser(input: &str) -> IResult<&str, &str> {
    recognize(take_while_m_n(3, 3, |c: char| c.is_ascii_digit())).parse(input)
}

fn word_command_parser(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_ascii_alphabetic()).parse(input)
}

fn command_parser(input: &str) -> IResult<&str, &str> {
    alt((numeric_command_parser, word_command_parser)).parse(input)
}

fn params_parser(input: &str) -> IResult<&str, Vec<String>> {
    let mut params: Vec<String> = Vec::new();
    let mut rest = input;
    // Up to 14 middle params.
    let (r, middles) = many_m_n(
        0,
        MAX_PARAMS - 1,
        preceded(char(' '), middle_parser),
    )
    .parse(rest)?;
    rest = r;
    params.extend(middles.into_iter().map(str::to_string));

    let (r, trailing) = opt(preceded(pair(char(' '), char(':')), trailing_parser)).parse(rest)?;
    rest = r;
    if let Some(t) = trailing {
        params.push(t.to_string());
    }
    Ok((rest, params))
}

fn message_parser(input: &str) -> IResult<&str, Message> {
    map(
        (
            opt(tags_parser),
            opt(source_parser),
            command_parser,
            params_parser,
        ),
        |(tags, source, command, params)| Message {
            tags: tags.unwrap_or_default(),
            source: source.map(str::to_string),
            command: command.to_uppercase(),
            params,
        },
    )
    .parse(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_simple_privmsg() {
        let msg = Message::decode("PRIVMSG #room :hi there").unwrap();
        assert_eq!(msg.command, "PRIVMSG");
        assert_eq!(msg.params, vec!["#room".to_string(), "hi there".to_string()]);
        assert!(msg.source.is_none());
    }

    #[test]
    fn decode_with_source_and_numeric() {
        let msg = Message::decode(":irc.example.com 001 alice :Welcome").unwrap();
        assert_eq!(msg.source.as_deref(), Some("irc.example.com"));
        assert_eq!(msg.command, "001");
        assert_eq!(msg.params, vec!["alice".to_string(), "Welcome".to_string()]);
    }

    #[test]
    fn decode_with_tags() {
        let msg = Message::decode("@id=123;time=now :nick!user@host JOIN #chan").unwrap();
        assert_eq!(msg.tags.len(), 2);
        assert_eq!(msg.tags[0].key, "id");
        assert_eq!(msg.tags[0].value.as_deref(), Some("123"));
        assert_eq!(msg.command, "JOIN");
    }

    #[test]
    fn decode_unknown_escape_as_literal() {
        let msg = Message::decode("@foo=a\\xb :s PING :t").unwrap();
        assert_eq!(msg.tags[0].value.as_deref(), Some("axb"));
    }

    #[test]
    fn lone_lf_accepted_leniently() {
        // decode() receives the line already split; CRs get stripped here.
        let msg = Message::decode("PING :tok\r").unwrap();
        assert_eq!(msg.command, "PING");
    }

    #[test]
    fn rejects_empty() {
        assert_eq!(Message::decode(""), Err(CodecError::Empty));
    }

    #[test]
    fn rejects_too_many_middles_without_trailing() {
        // 15 middle params (no trailing) would exceed the 14-middle cap;
        // the parser stops after 14 and leaves input unconsumed -> malformed.
        let too_many: Vec<String> = (0..15).map(|i| format!("p{i}")).collect();
        let line = format!("CMD {}", too_many.join(" "));
        assert!(Message::decode(&line).is_err());
    }

    #[test]
    fn encode_roundtrip_basic() {
        let msg = Message::new("PRIVMSG", vec!["#room".to_string(), "hi there".to_string()])
            .with_source("nick!user@host");
        let wire = msg.encode();
        assert_eq!(wire, ":nick!user@host PRIVMSG #room :hi there\r\n");
        let decoded = Message::decode(wire.trim_end_matches("\r\n")).unwrap();
        assert_eq!(decoded.command, msg.command);
        assert_eq!(decoded.params, msg.params);
        assert_eq!(decoded.source, msg.source);
    }

    #[test]
    fn codec_roundtrip_property_like() {
        let cases = vec![
            Message::new("NICK", vec!["alice".to_string()]),
            Message::new("JOIN", vec!["#room".to_string()]),
            Message::new("MODE", vec!["#room".to_string(), "+b".to_string()]),
            Message::new("353", vec!["alice".to_string(), "=".to_string(), "#room".to_string(), "@alice bob".to_string()]),
        ];
        for m in cases {
            let wire = m.encode();
            let decoded = Message::decode(wire.trim_end_matches("\r\n")).unwrap();
            assert_eq!(decoded.command, m.command);
            assert_eq!(decoded.params, m.params);
        }
    }

    #[test]
    fn overlong_line_truncated_to_512_including_crlf() {
        let huge = "x".repeat(600);
        let msg = Message::new("PRIVMSG", vec!["#room".to_string(), huge]);
        let wire = msg.encode();
        assert_eq!(wire.len(), MAX_LINE_LEN);
        assert!(wire.ends_with("\r\n"));
    }

    #[test]
    fn trailing_empty_param_gets_colon() {
        let msg = Message::new("TOPIC", vec!["#room".to_string(), String::new()]);
        assert_eq!(msg.encode(), "TOPIC #room :\r\n");
    }
}
