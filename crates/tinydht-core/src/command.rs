//! Protocol commands and datagram framing.
//!
//! Every datagram is `[1-byte command][payload]`. The command vocabulary is
//! closed; anything else is rejected as `UnknownCommand`.
//!
//! PEERS and KEYS carry JSON arrays of strings (socket addresses, hex keys).
//! A list that would not fit one datagram is split across several datagrams
//! of the same command; receivers merge additively so the split is invisible.

use std::fmt;

use crate::wire::{Key, Value, WireError, MAX_DATAGRAM};

/// Control byte at the front of every datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Command {
    /// Announce self and ask for state. Answered by the next broadcast pass.
    Hello = 0x00,
    /// Ask the receiver to drop the sender from its peer table.
    Goodbye = 0x01,
    /// Full list of peers known to the sender.
    Peers = 0x02,
    /// Keys the sender already holds.
    Keys = 0x03,
    /// One VALUE record.
    Value = 0xFF,
}

impl TryFrom<u8> for Command {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(Command::Hello),
            0x01 => Ok(Command::Goodbye),
            0x02 => Ok(Command::Peers),
            0x03 => Ok(Command::Keys),
            0xFF => Ok(Command::Value),
            other => Err(WireError::UnknownCommand(other)),
        }
    }
}

impl From<Command> for u8 {
    fn from(c: Command) -> u8 {
        c as u8
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Command::Hello => "HELLO",
            Command::Goodbye => "GOODBYE",
            Command::Peers => "PEERS",
            Command::Keys => "KEYS",
            Command::Value => "VALUE",
        };
        f.write_str(text)
    }
}

// ── Framing ───────────────────────────────────────────────────────────────────

/// Split a datagram into its command and the opaque payload.
pub fn split_frame(datagram: &[u8]) -> Result<(Command, &[u8]), WireError> {
    let (&first, payload) = datagram.split_first().ok_or(WireError::EmptyDatagram)?;
    Ok((Command::try_from(first)?, payload))
}

/// Prefix a payload with its command byte.
pub fn frame(command: Command, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + payload.len());
    out.push(u8::from(command));
    out.extend_from_slice(payload);
    out
}

// ── Messages ──────────────────────────────────────────────────────────────────

/// A fully parsed datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Hello,
    Goodbye,
    Peers(Vec<String>),
    Keys(Vec<Key>),
    Value(Value),
}

impl Message {
    pub fn command(&self) -> Command {
        match self {
            Message::Hello => Command::Hello,
            Message::Goodbye => Command::Goodbye,
            Message::Peers(_) => Command::Peers,
            Message::Keys(_) => Command::Keys,
            Message::Value(_) => Command::Value,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        match self {
            Message::Hello | Message::Goodbye => frame(self.command(), &[]),
            Message::Peers(peers) => frame(Command::Peers, &encode_peers(peers)),
            Message::Keys(keys) => frame(Command::Keys, &encode_keys(keys)),
            Message::Value(value) => frame(Command::Value, &value.encode()),
        }
    }

    pub fn decode(datagram: &[u8]) -> Result<Self, WireError> {
        let (command, payload) = split_frame(datagram)?;
        Self::from_payload(command, payload)
    }

    /// Parse the payload of an already split frame.
    /// HELLO and GOODBYE ignore any payload bytes.
    pub fn from_payload(command: Command, payload: &[u8]) -> Result<Self, WireError> {
        match command {
            Command::Hello => Ok(Message::Hello),
            Command::Goodbye => Ok(Message::Goodbye),
            Command::Peers => decode_peers(payload).map(Message::Peers),
            Command::Keys => decode_keys(payload).map(Message::Keys),
            Command::Value => Value::decode(payload).map(Message::Value),
        }
    }
}

// ── List payloads ─────────────────────────────────────────────────────────────

pub fn encode_peers(peers: &[String]) -> Vec<u8> {
    serde_json::Value::from(peers.to_vec()).to_string().into_bytes()
}

pub fn decode_peers(payload: &[u8]) -> Result<Vec<String>, WireError> {
    serde_json::from_slice(payload).map_err(|e| WireError::MalformedList {
        kind: "PEERS",
        reason: e.to_string(),
    })
}

pub fn encode_keys(keys: &[Key]) -> Vec<u8> {
    let hex: Vec<String> = keys.iter().map(Key::to_hex).collect();
    serde_json::Value::from(hex).to_string().into_bytes()
}

pub fn decode_keys(payload: &[u8]) -> Result<Vec<Key>, WireError> {
    let hex: Vec<String> = serde_json::from_slice(payload).map_err(|e| WireError::MalformedList {
        kind: "KEYS",
        reason: e.to_string(),
    })?;
    hex.iter()
        .map(|s| {
            Key::from_hex(s).map_err(|e| WireError::MalformedList {
                kind: "KEYS",
                reason: e.to_string(),
            })
        })
        .collect()
}

/// PEERS messages covering `peers`, each fitting one datagram.
/// Always yields at least one message, so an empty list is still announced.
pub fn peers_messages(peers: &[String]) -> Vec<Message> {
    batches(peers, |p| json_string_len(p))
        .into_iter()
        .map(|b| Message::Peers(b.to_vec()))
        .collect()
}

/// KEYS messages covering `keys`, each fitting one datagram.
/// Always yields at least one message.
pub fn keys_messages(keys: &[Key]) -> Vec<Message> {
    // 128 hex chars plus two quotes
    batches(keys, |_| 2 * crate::wire::KEY_LEN + 2)
        .into_iter()
        .map(|b| Message::Keys(b.to_vec()))
        .collect()
}

fn json_string_len(s: &str) -> usize {
    serde_json::Value::from(s).to_string().len()
}

/// Greedy split of a JSON array into slices whose framed size stays within
/// `MAX_DATAGRAM`. `item_len` is the encoded length of one element.
fn batches<T>(items: &[T], item_len: impl Fn(&T) -> usize) -> Vec<&[T]> {
    // command byte + brackets
    const OVERHEAD: usize = 3;

    let mut out = Vec::new();
    let mut start = 0;
    let mut size = OVERHEAD;
    for (i, item) in items.iter().enumerate() {
        // separator comma for every element but the first in a batch
        let len = item_len(item) + usize::from(i > start);
        if size + len > MAX_DATAGRAM && i > start {
            out.push(&items[start..i]);
            start = i;
            size = OVERHEAD + item_len(item);
        } else {
            size += len;
        }
    }
    out.push(&items[start..]);
    out
}
