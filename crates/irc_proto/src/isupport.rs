//! RPL_ISUPPORT (numeric 005) feature advertisement.
//!
//! Recognised keys drive protocol behavior elsewhere (`CASEMAPPING`,
//! `CHANMODES`, `PREFIX`, `CHANTYPES`, length limits, `EXCEPTS`, `INVEX`,
//! `STATUSMSG`); everything else is an opaque flat string the server merely
//! echoes back, matching spec.md's framing of ISUPPORT as "a flat key to
//! string map".

use std::collections::BTreeMap;

/// Maximum number of `KEY=VALUE` tokens packed onto one 005 line before
/// Modern IRC numerics wrap to a continuation line.
const TOKENS_PER_LINE: usize = 13;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ISupport {
    // BTreeMap keeps iteration order stable (and tests deterministic);
    // insertion order is not semantically meaningful for ISUPPORT.
    entries: BTreeMap<String, Option<String>>,
}

impl ISupport {
    pub fn new() -> Self {
        ISupport {
            entries: BTreeMap::new(),
        }
    }

    /// Default feature table from spec.md §6.
    pub fn defaults() -> Self {
        let mut s = Self::new();
        s.set("CASEMAPPING", "rfc1459");
        s.set("CHANTYPES", "#&");
        s.set("PREFIX", "(qaohv)~&@%+");
        s.set("CHANMODES", "beI,k,l,imnpst");
        s.set("NICKLEN", "9");
        s.set("CHANNELLEN", "50");
        s.set("TOPICLEN", "390");
        s.set("EXCEPTS", "e");
        s.set("INVEX", "I");
        s
    }

    pub fn set(&mut self, key: &str, value: impl Into<String>) -> &mut Self {
        self.entries.insert(key.to_string(), Some(value.into()));
        self
    }

    pub fn set_flag(&mut self, key: &str) -> &mut Self {
        self.entries.insert(key.to_string(), None);
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).and_then(|v| v.as_deref())
    }

    pub fn has(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Renders the full 005 token set, wrapped into lines of at most
    /// [`TOKENS_PER_LINE`] tokens each, in the caller-supplied order
    /// (`entries` is a BTreeMap so this is alphabetical — stable across
    /// runs, which is what the boundary tests rely on).
    pub fn tokens(&self) -> Vec<String> {
        self.entries
            .iter()
            .map(|(k, v)| match v {
                Some(val) => format!("{k}={val}"),
                None => k.clone(),
            })
            .collect()
    }

    pub fn token_lines(&self) -> Vec<Vec<String>> {
        self.tokens()
            .chunks(TOKENS_PER_LINE)
            .map(|c| c.to_vec())
            .collect()
    }
}

impl Default for ISupport {
    fn default() -> Self {
        Self::defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_table() {
        let isupport = ISupport::defaults();
        assert_eq!(isupport.get("CASEMAPPING"), Some("rfc1459"));
        assert_eq!(isupport.get("CHANTYPES"), Some("#&"));
        assert_eq!(isupport.get("PREFIX"), Some("(qaohv)~&@%+"));
        assert_eq!(isupport.get("CHANMODES"), Some("beI,k,l,imnpst"));
        assert_eq!(isupport.get("NICKLEN"), Some("9"));
        assert_eq!(isupport.get("EXCEPTS"), Some("e"));
        assert_eq!(isupport.get("INVEX"), Some("I"));
    }

    #[test]
    fn flag_without_value_renders_bare() {
        let mut isupport = ISupport::new();
        isupport.set_flag("SAFELIST");
        assert_eq!(isupport.tokens(), vec!["SAFELIST".to_string()]);
    }

    #[test]
    fn wraps_long_token_sets() {
        let mut isupport = ISupport::new();
        for i in 0..20 {
            isupport.set(&format!("KEY{i}"), "v");
        }
        let lines = isupport.token_lines();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].len(), TOKENS_PER_LINE);
    }
}
