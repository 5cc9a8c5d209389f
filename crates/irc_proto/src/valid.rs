//! Nickname/channel syntax validation, shared by server registration and
//! client-side pre-flight checks. Mirrors the predicate-function style of
//! the teacher's `parsers.rs` (`is_channel_mode`, `is_nick_char`, ...).

const NICK_FIRST: &str = "[]\\`_^{|}";
const NICK_REST_EXTRA: &str = "[]\\`_^{|}-";

fn is_nick_first_char(c: char) -> bool {
    c.is_ascii_alphabetic() || NICK_FIRST.contains(c)
}

fn is_nick_rest_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || NICK_REST_EXTRA.contains(c)
}

/// Validates a nickname against `[A-Za-z\[\]\\`_^{|}][A-Za-z0-9\[\]\\`_^{|}-]*`,
/// bounded to `max_len` characters (ISUPPORT `NICKLEN`).
pub fn is_valid_nickname(nick: &str, max_len: usize) -> bool {
    if nick.is_empty() || nick.chars().count() > max_len {
        return false;
    }
    let mut chars = nick.chars();
    match chars.next() {
        Some(c) if is_nick_first_char(c) => {}
        _ => return false,
    }
    chars.all(is_nick_rest_char)
}

/// Validates a channel name: sigil in `#&+!` followed by at least one byte,
/// bounded to `max_len` characters (ISUPPORT `CHANNELLEN`), and containing
/// none of the wire-forbidden bytes (space, comma, control chars, `:`).
pub fn is_valid_channel_name(name: &str, chantypes: &str, max_len: usize) -> bool {
    if name.chars().count() < 2 || name.chars().count() > max_len {
        return false;
    }
    let mut chars = name.chars();
    let sigil = chars.next().unwrap();
    if !chantypes.contains(sigil) {
        return false;
    }
    chars.all(|c| !c.is_control() && c != ' ' && c != ',' && c != ':')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_nick_is_valid() {
        assert!(is_valid_nickname("alice", 9));
    }

    #[test]
    fn ten_char_nick_rejected_at_len_9() {
        assert!(!is_valid_nickname("alicealice", 9));
    }

    #[test]
    fn nick_with_digit_first_char_rejected() {
        assert!(!is_valid_nickname("1alice", 9));
    }

    #[test]
    fn nick_with_special_first_char_accepted() {
        assert!(is_valid_nickname("[alice]", 9));
    }

    #[test]
    fn channel_name_needs_sigil_and_body() {
        assert!(is_valid_channel_name("#room", "#&", 50));
        assert!(!is_valid_channel_name("room", "#&", 50));
        assert!(!is_valid_channel_name("#", "#&", 50));
    }
}
