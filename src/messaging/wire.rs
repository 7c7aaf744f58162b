//! Text wire format shared by sender, receiver and simulator. All datagrams are UTF-8 with
//!  `:` separated fields and no escaping:
//!
//! ```ascii
//! data fragment:    <session>:<total length>:<payload char>:<index>
//! acknowledgment:   <session>:[<slot>, <slot>, ...]
//! ```
//!
//! A slot is either `'c'` (a received character, quotes included) or `None` for a position
//!  that was not received yet. The acknowledgment is a snapshot of the receiver's complete
//!  reassembly buffer for the session rather than an ack for a single fragment.

use std::fmt::Write;
use anyhow::{anyhow, bail};

/// Scopes one in-flight message on the sender side
pub type SessionId = u32;

pub const MIN_SESSION_ID: SessionId = 1;
pub const MAX_SESSION_ID: SessionId = 1000;

pub const MIN_MESSAGE_LEN: usize = 1;
pub const MAX_MESSAGE_LEN: usize = 20;

/// Upper bound for incoming datagrams: 20 slots of at most 4 UTF-8 bytes plus quoting and
///  separators stay far below this.
pub const MAX_DATAGRAM_SIZE: usize = 1024;

const EMPTY_SLOT: &str = "None";


#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct Fragment {
    pub session: SessionId,
    pub total_length: u32,
    pub payload: char,
    pub index: u32,
}
impl Fragment {
    pub fn ser(&self) -> String {
        format!("{}:{}:{}:{}", self.session, self.total_length, self.payload, self.index)
    }

    /// Session and total length are read from the front and the index from the back, so the
    ///  payload character may itself be a `:`.
    pub fn try_deser(buf: &[u8]) -> anyhow::Result<Fragment> {
        let s = std::str::from_utf8(buf)?;

        let mut parts = s.splitn(3, ':');
        let session = parts.next().ok_or_else(|| anyhow!("missing session"))?;
        let total_length = parts.next().ok_or_else(|| anyhow!("missing total length"))?;
        let rest = parts.next().ok_or_else(|| anyhow!("missing payload and index"))?;

        let (payload, index) = rest.rsplit_once(':')
            .ok_or_else(|| anyhow!("missing index"))?;

        let mut payload_chars = payload.chars();
        let payload = match (payload_chars.next(), payload_chars.next()) {
            (Some(c), None) => c,
            _ => bail!("payload must be exactly one character, was {:?}", payload),
        };

        Ok(Fragment {
            session: session.parse()?,
            total_length: total_length.parse()?,
            payload,
            index: index.parse()?,
        })
    }
}

/// Splits a message into one fragment per character
pub fn fragment_message(session: SessionId, message: &[char]) -> Vec<Fragment> {
    let total_length = message.len() as u32;
    message.iter()
        .enumerate()
        .map(|(index, &payload)| Fragment {
            session,
            total_length,
            payload,
            index: index as u32,
        })
        .collect()
}

pub fn validate_message_len(message: &str) -> anyhow::Result<Vec<char>> {
    let chars = message.chars().collect::<Vec<_>>();
    if chars.len() < MIN_MESSAGE_LEN || chars.len() > MAX_MESSAGE_LEN {
        bail!("message length must be between {} and {} inclusive, was {}", MIN_MESSAGE_LEN, MAX_MESSAGE_LEN, chars.len());
    }
    Ok(chars)
}


#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Ack {
    pub session: SessionId,
    pub slots: Vec<Option<char>>,
}
impl Ack {
    pub fn ser(&self) -> String {
        format!("{}:{}", self.session, render_slots(&self.slots))
    }

    /// Errors from this function are errors in the ack's framing (not UTF-8, no separator,
    ///  non-numeric session). The returned slot text is parsed separately by [parse_slots]
    ///  because a bad slot list is tolerated where bad framing is not.
    pub fn try_split_frame(buf: &[u8]) -> anyhow::Result<(SessionId, &str)> {
        let s = std::str::from_utf8(buf)?;
        let (session, slots) = s.split_once(':')
            .ok_or_else(|| anyhow!("acknowledgment without session separator: {:?}", s))?;
        let session = session.parse()
            .map_err(|e| anyhow!("acknowledgment with invalid session {:?}: {}", session, e))?;
        Ok((session, slots))
    }

    pub fn try_deser(buf: &[u8]) -> anyhow::Result<Ack> {
        let (session, slots) = Self::try_split_frame(buf)?;
        Ok(Ack {
            session,
            slots: parse_slots(slots)?,
        })
    }
}

pub fn render_slots(slots: &[Option<char>]) -> String {
    let mut result = String::with_capacity(2 + slots.len() * 5);
    result.push('[');
    for (i, slot) in slots.iter().enumerate() {
        if i > 0 {
            result.push_str(", ");
        }
        match slot {
            Some(c) => { let _ = write!(result, "'{}'", c); }
            None => result.push_str(EMPTY_SLOT),
        }
    }
    result.push(']');
    result
}

pub fn parse_slots(s: &str) -> anyhow::Result<Vec<Option<char>>> {
    let inner = s.strip_prefix('[')
        .and_then(|s| s.strip_suffix(']'))
        .ok_or_else(|| anyhow!("slot list must be enclosed in brackets: {:?}", s))?;

    let mut result = Vec::new();
    let mut rest = inner;
    while !rest.is_empty() {
        if !result.is_empty() {
            rest = rest.strip_prefix(", ")
                .filter(|r| !r.is_empty())
                .ok_or_else(|| anyhow!("expected ', ' between slots: {:?}", s))?;
        }

        if let Some(after) = rest.strip_prefix(EMPTY_SLOT) {
            result.push(None);
            rest = after;
            continue;
        }

        let mut chars = rest.chars();
        match (chars.next(), chars.next(), chars.next()) {
            (Some('\''), Some(c), Some('\'')) => {
                result.push(Some(c));
                rest = chars.as_str();
            }
            _ => bail!("invalid slot in {:?}", s),
        }
    }
    Ok(result)
}
