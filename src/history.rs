//! Password history: parsing, building and reuse checks.
//!
//! A stored entry is `time#syntax-oid#length#bytes`. The trailing bytes are
//! opaque and may contain `#`, so the length field alone decides where the
//! value ends.

use crate::scheme::PasswordSchemes;
use crate::state::{Attr, Mutation};
use crate::time::parse_seconds;

/// Syntax identifier recorded for octet-string password values.
pub const OCTET_STRING_SYNTAX: &str = "1.3.6.1.4.1.1466.115.121.1.40";

/// One parsed history value.
#[derive(Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub time: i64,
    pub syntax: String,
    pub password: Vec<u8>,
    /// The stored value, used to delete it later.
    pub raw: Vec<u8>,
}

impl std::fmt::Debug for HistoryEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoryEntry")
            .field("time", &self.time)
            .field("syntax", &self.syntax)
            .field("len", &self.password.len())
            .finish()
    }
}

impl HistoryEntry {
    /// Parses one stored value. Returns `None` when any field is missing or
    /// the declared length does not match the trailing bytes exactly.
    pub fn parse(raw: &[u8]) -> Option<Self> {
        let mut fields = raw.splitn(4, |&b| b == b'#');
        let time = std::str::from_utf8(fields.next()?).ok()?;
        let syntax = std::str::from_utf8(fields.next()?).ok()?;
        let len = std::str::from_utf8(fields.next()?).ok()?;
        let password = fields.next()?;

        let time = parse_seconds(time)?;
        let len: usize = len.trim().parse().ok()?;
        if password.len() != len {
            return None;
        }
        Some(Self {
            time,
            syntax: syntax.to_string(),
            password: password.to_vec(),
            raw: raw.to_vec(),
        })
    }

    /// Encodes a stored password value as a history value.
    pub fn encode(timestamp: &str, password: &[u8]) -> Vec<u8> {
        let mut out = format!("{}#{}#{}#", timestamp, OCTET_STRING_SYNTAX, password.len()).into_bytes();
        out.extend_from_slice(password);
        out
    }
}

/// Parsed history, ascending by time. Entries sharing a timestamp keep
/// their stored order; malformed values are skipped.
pub fn build(stored: &[Vec<u8>]) -> Vec<HistoryEntry> {
    let mut list: Vec<HistoryEntry> = stored
        .iter()
        .filter_map(|raw| {
            let parsed = HistoryEntry::parse(raw);
            #[cfg(feature = "tracing")]
            {
                if parsed.is_none() {
                    tracing::debug!("skipping malformed password history value");
                }
            }
            parsed
        })
        .collect();
    list.sort_by_key(|e| e.time);
    list
}

/// Why a candidate was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reuse {
    /// Same as the current password.
    Current,
    /// Same as a retained history entry.
    History,
}

impl Reuse {
    pub fn message(self) -> &'static str {
        match self {
            Reuse::Current => "Password is not being changed from existing value",
            Reuse::History => "Password is in history of old passwords",
        }
    }
}

/// Checks `candidate` against the current password and the newest
/// `in_history` entries of `list`.
///
/// Entries older than the retained window (`list.len() - in_history` of
/// them, when history shrank) are not consulted.
pub fn check_reuse(
    schemes: &dyn PasswordSchemes,
    list: &[HistoryEntry],
    in_history: u32,
    current: &[Vec<u8>],
    candidate: &[u8],
) -> Result<(), Reuse> {
    if in_history == 0 {
        return Ok(());
    }
    if current.iter().any(|c| schemes.verify(c, candidate)) {
        return Err(Reuse::Current);
    }
    let hskip = list.len().saturating_sub(in_history as usize);
    if list[hskip..]
        .iter()
        .any(|e| schemes.verify(&e.password, candidate))
    {
        return Err(Reuse::History);
    }
    Ok(())
}

/// Mutations that retire `current` into history on a password change.
///
/// Deletes the oldest `len - in_history + 1` entries when the list is
/// already full, then adds the outgoing password. With `in_history == 0`
/// the whole attribute is dropped if present.
pub fn rotate(
    list: &[HistoryEntry],
    stored_count: usize,
    in_history: u32,
    current: Option<&[u8]>,
    timestamp: &str,
) -> Vec<Mutation> {
    let mut mutations = Vec::new();
    if in_history == 0 {
        if stored_count > 0 {
            mutations.push(Mutation::Delete { attr: Attr::History });
        }
        return mutations;
    }
    let limit = in_history as usize;
    if list.len() >= limit {
        let excess = list.len() - limit + 1;
        mutations.push(Mutation::DeleteValues {
            attr: Attr::History,
            values: list[..excess].iter().map(|e| e.raw.clone()).collect(),
        });
    }
    match current {
        Some(pw) => mutations.push(Mutation::Add {
            attr: Attr::History,
            values: vec![HistoryEntry::encode(timestamp, pw)],
        }),
        None => {
            #[cfg(feature = "tracing")]
            tracing::debug!("no current password to record in history");
        }
    }
    mutations
}
