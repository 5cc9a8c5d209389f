//! Byte-table-driven nickname/channel casefolding.
//!
//! Three mappings are supported, matching the `CASEMAPPING` values a real
//! network advertises: `ascii`, `rfc1459`, and `rfc1459-strict`. Folding is
//! pure, allocation-bounded (one output byte per input byte) and
//! idempotent: `fold(fold(x)) == fold(x)`.

/// Which ISUPPORT `CASEMAPPING` table to use when comparing nicknames and
/// channel names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CaseMapping {
    Ascii,
    Rfc1459,
    Rfc1459Strict,
}

impl CaseMapping {
    /// Parses the value of an ISUPPORT `CASEMAPPING=...` token. Returns
    /// `None` for unknown mapping names.
    pub fn from_isupport_str(s: &str) -> Option<Self> {
        match s {
            "ascii" => Some(Self::Ascii),
            "rfc1459" => Some(Self::Rfc1459),
            "rfc1459-strict" => Some(Self::Rfc1459Strict),
            _ => None,
        }
    }

    pub fn as_isupport_str(self) -> &'static str {
        match self {
            Self::Ascii => "ascii",
            Self::Rfc1459 => "rfc1459",
            Self::Rfc1459Strict => "rfc1459-strict",
        }
    }

    fn fold_byte(self, b: u8) -> u8 {
        if b.is_ascii_uppercase() {
            return b.to_ascii_lowercase();
        }
        match self {
            Self::Ascii => b,
            Self::Rfc1459 => match b {
                b'[' => b'{',
                b']' => b'}',
                b'\\' => b'|',
                b'~' => b'^',
                _ => b,
            },
            Self::Rfc1459Strict => match b {
                b'[' => b'{',
                b']' => b'}',
                b'\\' => b'|',
                _ => b,
            },
        }
    }

    /// Folds a nickname: every byte is mapped per the table. Bytes `>= 128`
    /// (non-ASCII) pass through unchanged.
    pub fn normalize_nick(self, s: &str) -> String {
        s.bytes().map(|b| self.fold_byte(b) as char).collect()
    }

    /// Folds a channel name: the first byte (the sigil `#`/`&`/`+`/`!`) is
    /// preserved verbatim; the remainder is folded.
    pub fn normalize_channel(self, s: &str) -> String {
        let mut chars = s.chars();
        match chars.next() {
            Some(sigil) => {
                let rest: String = chars
                    .map(|c| {
                        if c.is_ascii() {
                            self.fold_byte(c as u8) as char
                        } else {
                            c
                        }
                    })
                    .collect();
                let mut out = String::with_capacity(s.len());
                out.push(sigil);
                out.push_str(&rest);
                out
            }
            None => String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii_only_lowercases() {
        assert_eq!(CaseMapping::Ascii.normalize_nick("Alice[Bot]"), "alice[bot]");
    }

    #[test]
    fn rfc1459_maps_brackets_and_tilde() {
        let folded = CaseMapping::Rfc1459.normalize_nick("Alice[]\\~");
        assert_eq!(folded, "alice{}|^");
    }

    #[test]
    fn rfc1459_strict_leaves_tilde() {
        let folded = CaseMapping::Rfc1459Strict.normalize_nick("Alice~");
        assert_eq!(folded, "alice~");
    }

    #[test]
    fn channel_sigil_preserved() {
        assert_eq!(CaseMapping::Rfc1459.normalize_channel("#FooBar"), "#foobar");
        assert_eq!(CaseMapping::Rfc1459.normalize_channel("&Hi[]"), "&hi{}");
    }

    #[test]
    fn idempotent_for_all_mappings() {
        let inputs = ["Alice[]\\~", "#Test{Channel}", "plain"];
        for mapping in [
            CaseMapping::Ascii,
            CaseMapping::Rfc1459,
            CaseMapping::Rfc1459Strict,
        ] {
            for input in inputs {
                let once = mapping.normalize_nick(input);
                let twice = mapping.normalize_nick(&once);
                assert_eq!(once, twice, "not idempotent for {mapping:?} / {input}");
            }
        }
    }

    #[test]
    fn high_bytes_pass_through() {
        assert_eq!(CaseMapping::Ascii.normalize_nick("café"), "café");
    }

    #[test]
    fn unknown_mapping_name_is_none() {
        assert!(CaseMapping::from_isupport_str("utf8").is_none());
    }
}
