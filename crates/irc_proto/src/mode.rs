//! Channel/user mode string grammar: alternating `+`/`-` sign followed by
//! one or more letters, with arguments consumed left-to-right for modes
//! that take one. Generalizes the teacher's `is_channel_mode`/
//! `valid_mode_channel_parser` (`channel_ops.rs`), which parsed the sign
//! groups but did not thread mode arguments through.

use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sign {
    Plus,
    Minus,
}

/// Whether a mode letter takes a parameter, per the ISUPPORT `CHANMODES`
/// classes `A,B,C,D`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgPolicy {
    /// Class A: list mode (ban/except/invex) — takes an argument on both
    /// set and unset; querying with no argument lists the set instead.
    List,
    /// Class B: always takes an argument, set or unset (e.g. channel key).
    Always,
    /// Class C: takes an argument only when being set (e.g. user limit).
    OnSet,
    /// Class D: never takes an argument (e.g. `i`, `m`, `n`, `s`, `t`).
    Never,
}

/// A parsed `CHANMODES=A,B,C,D` declaration, plus any extra single-letter
/// modes (from `EXCEPTS`/`INVEX`) folded into class A.
#[derive(Debug, Clone)]
pub struct ChanModeSpec {
    policies: HashMap<char, ArgPolicy>,
}

impl ChanModeSpec {
    /// Parses a `CHANMODES=beI,k,l,imnpst` style value.
    pub fn parse(chanmodes: &str) -> Self {
        let mut policies = HashMap::new();
        let classes: Vec<&str> = chanmodes.split(',').collect();
        let assign = |policies: &mut HashMap<char, ArgPolicy>, letters: &str, policy: ArgPolicy| {
            for c in letters.chars() {
                policies.insert(c, policy);
            }
        };
        if let Some(a) = classes.first() {
            assign(&mut policies, a, ArgPolicy::List);
        }
        if let Some(b) = classes.get(1) {
            assign(&mut policies, b, ArgPolicy::Always);
        }
        if let Some(c) = classes.get(2) {
            assign(&mut policies, c, ArgPolicy::OnSet);
        }
        if let Some(d) = classes.get(3) {
            assign(&mut policies, d, ArgPolicy::Never);
        }
        ChanModeSpec { policies }
    }

    pub fn with_prefix_modes(mut self, prefix_modes: &str) -> Self {
        // Member-rank modes (o/v/h/...) always take an argument, like class B.
        for c in prefix_modes.chars() {
            self.policies.entry(c).or_insert(ArgPolicy::Always);
        }
        self
    }

    pub fn policy_of(&self, letter: char) -> Option<ArgPolicy> {
        self.policies.get(&letter).copied()
    }
}

/// One decoded `(+|-)letter [arg]` unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModeChange {
    pub sign: Sign,
    pub letter: char,
    pub arg: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModeParseError {
    #[error("unknown mode letter '{0}'")]
    UnknownLetter(char),
    #[error("missing argument for mode '{0}'")]
    MissingArgument(char),
}

/// Parses a full mode-change command body (e.g. `+o-v alice bob` already
/// split into `"+o-v"` and `["alice", "bob"]`) into an ordered list of
/// [`ModeChange`]s, consuming `args` left to right. A class-A (list) mode
/// queried with no argument left still yields a `ModeChange` with
/// `arg: None` — the caller interprets that as "list the bans" rather than
/// an error.
pub fn parse_mode_changes(
    modestring: &str,
    args: &[String],
    spec: &ChanModeSpec,
) -> Result<Vec<ModeChange>, ModeParseError> {
    let mut changes = Vec::new();
    let mut sign = Sign::Plus;
    let mut args = args.iter();

    for c in modestring.chars() {
        match c {
            '+' => sign = Sign::Plus,
            '-' => sign = Sign::Minus,
            letter => {
                let policy = spec
                    .policy_of(letter)
                    .ok_or(ModeParseError::UnknownLetter(letter))?;
                let takes_arg = match policy {
                    ArgPolicy::Never => false,
                    ArgPolicy::Always => true,
                    ArgPolicy::OnSet => sign == Sign::Plus,
                    ArgPolicy::List => true,
                };
                let arg = if takes_arg {
                    match args.next() {
                        Some(a) => Some(a.clone()),
                        None if policy == ArgPolicy::List => None,
                        None => return Err(ModeParseError::MissingArgument(letter)),
                    }
                } else {
                    None
                };
                changes.push(ModeChange { sign, letter, arg });
            }
        }
    }
    Ok(changes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> ChanModeSpec {
        ChanModeSpec::parse("beI,k,l,imnpst")
    }

    #[test]
    fn list_mode_with_no_args_queries() {
        let changes = parse_mode_changes("+b", &[], &spec()).unwrap();
        assert_eq!(
            changes,
            vec![ModeChange {
                sign: Sign::Plus,
                letter: 'b',
                arg: None
            }]
        );
    }

    #[test]
    fn key_and_limit_consume_args_in_order() {
        let args = vec!["secret".to_string(), "42".to_string()];
        let changes = parse_mode_changes("+kl", &args, &spec()).unwrap();
        assert_eq!(changes[0].arg.as_deref(), Some("secret"));
        assert_eq!(changes[1].arg.as_deref(), Some("42"));
    }

    #[test]
    fn limit_unset_takes_no_arg() {
        let changes = parse_mode_changes("-l", &[], &spec()).unwrap();
        assert_eq!(changes[0].arg, None);
    }

    #[test]
    fn key_unset_still_requires_arg() {
        // class B (always) requires an arg on unset too.
        let err = parse_mode_changes("-k", &[], &spec()).unwrap_err();
        assert_eq!(err, ModeParseError::MissingArgument('k'));
    }

    #[test]
    fn mixed_sign_groups() {
        let changes = parse_mode_changes("+i-m+t", &[], &spec()).unwrap();
        assert_eq!(changes.len(), 3);
        assert_eq!(changes[0].sign, Sign::Plus);
        assert_eq!(changes[1].sign, Sign::Minus);
        assert_eq!(changes[2].sign, Sign::Plus);
    }

    #[test]
    fn unknown_letter_rejected() {
        assert_eq!(
            parse_mode_changes("+z", &[], &spec()).unwrap_err(),
            ModeParseError::UnknownLetter('z')
        );
    }
}
