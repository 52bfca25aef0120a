//! tinydht wire format: the VALUE record and the content-addressed key.
//!
//! A VALUE record is a fixed 80-byte header followed by the raw payload:
//!
//!   expires:i64-be(8) || payload_len:u64-be(8) || hash(64) || payload
//!
//! The header is a zerocopy struct built from big-endian field types, so it
//! has no padding and no alignment requirement. There is no unsafe code in
//! this module.
//!
//! A `Value` can only be obtained through `Value::new` (which computes the
//! hash) or `Value::decode` (which verifies it). Holding a `Value` therefore
//! means `hash == content_hash(payload)`.

use std::fmt;
use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use static_assertions::assert_eq_size;
use zerocopy::byteorder::{BigEndian, I64, U64};
use zerocopy::{AsBytes, FromBytes, FromZeroes};

// ── Constants ─────────────────────────────────────────────────────────────────

/// Length of a content key in bytes (512-bit digest).
pub const KEY_LEN: usize = 64;

/// Length of the fixed VALUE record header.
pub const RECORD_HEADER_LEN: usize = 80;

/// Largest UDP payload we ever put on the wire (IPv4 limit).
pub const MAX_DATAGRAM: usize = 65_507;

/// Receive buffer size. Anything larger than a datagram can carry is fine.
pub const RECV_BUFFER_LEN: usize = 65_535;

/// Largest value payload that still fits in one VALUE datagram
/// (one command byte plus the record header).
pub const MAX_PAYLOAD: usize = MAX_DATAGRAM - 1 - RECORD_HEADER_LEN;

/// Well-known rendezvous port. The first node on a host to bind it becomes
/// the bootstrap point for the others.
pub const DEFAULT_PORT: u16 = 9092;

/// Default interval between two broadcast passes.
pub const BROADCAST_INTERVAL_MS: u64 = 2_000;

/// Peers not heard from within this window are pruned by the next pass.
pub const PEER_TTL_SECS: u64 = 60;

/// Lifetime given to values inserted locally.
pub const VALUE_TTL_SECS: u64 = 24 * 3600;

/// Deadline for a single outbound datagram.
pub const SEND_TIMEOUT_MS: u64 = 500;

// ── Key ───────────────────────────────────────────────────────────────────────

/// Content key: a 512-bit BLAKE3 digest (extended output) of a payload.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key(pub [u8; KEY_LEN]);

impl Key {
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    /// Lowercase hex form, 128 characters. This is the form carried in KEYS.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, WireError> {
        let bytes = hex::decode(s).map_err(|e| WireError::InvalidKey(e.to_string()))?;
        let arr: [u8; KEY_LEN] = bytes
            .try_into()
            .map_err(|b: Vec<u8>| WireError::InvalidKey(format!("expected {KEY_LEN} bytes, got {}", b.len())))?;
        Ok(Key(arr))
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({}..)", hex::encode(&self.0[..8]))
    }
}

impl FromStr for Key {
    type Err = WireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Key::from_hex(s)
    }
}

/// Hash a payload into its content key.
pub fn content_hash(payload: &[u8]) -> Key {
    let mut out = [0u8; KEY_LEN];
    let mut hasher = blake3::Hasher::new();
    hasher.update(payload);
    hasher.finalize_xof().fill(&mut out);
    Key(out)
}

// ── Record header ─────────────────────────────────────────────────────────────

/// Fixed header of a VALUE record. Wire size: 80 bytes.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes)]
#[repr(C)]
pub struct RecordHeader {
    /// Absolute expiry, Unix seconds.
    pub expires: I64<BigEndian>,

    /// Number of payload bytes following the header. Must equal the actual
    /// remaining length of the record.
    pub payload_len: U64<BigEndian>,

    /// Content key of the payload. Verified on decode.
    pub hash: [u8; KEY_LEN],
}

// Compile-time size guard. If this fails, the wire format has silently changed.
assert_eq_size!(RecordHeader, [u8; RECORD_HEADER_LEN]);

// ── Value ─────────────────────────────────────────────────────────────────────

/// A content-addressed, expiring value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Value {
    hash: Key,
    expires: SystemTime,
    payload: Vec<u8>,
}

impl Value {
    /// Build a value from a payload, computing its key.
    ///
    /// `expires` is truncated to whole seconds, the precision of the wire.
    pub fn new(payload: impl Into<Vec<u8>>, expires: SystemTime) -> Result<Self, WireError> {
        let payload = payload.into();
        if payload.len() > MAX_PAYLOAD {
            return Err(WireError::PayloadTooLarge(payload.len()));
        }
        let secs = unix_secs(expires);
        let expires = from_unix_secs(secs).ok_or(WireError::ExpiryOutOfRange(secs))?;
        Ok(Self {
            hash: content_hash(&payload),
            expires,
            payload,
        })
    }

    pub fn hash(&self) -> &Key {
        &self.hash
    }

    pub fn expires(&self) -> SystemTime {
        self.expires
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// True once the deadline lies strictly before `now`.
    pub fn is_expired(&self, now: SystemTime) -> bool {
        self.expires < now
    }

    /// Serialize into a VALUE record.
    pub fn encode(&self) -> Vec<u8> {
        let header = RecordHeader {
            expires: I64::new(unix_secs(self.expires)),
            payload_len: U64::new(self.payload.len() as u64),
            hash: self.hash.0,
        };
        let mut out = Vec::with_capacity(RECORD_HEADER_LEN + self.payload.len());
        out.extend_from_slice(header.as_bytes());
        out.extend_from_slice(&self.payload);
        out
    }

    /// Parse and verify a VALUE record. The payload runs to the end of `bytes`.
    pub fn decode(bytes: &[u8]) -> Result<Self, WireError> {
        let header =
            RecordHeader::read_from_prefix(bytes).ok_or(WireError::RecordTooShort(bytes.len()))?;
        let payload = &bytes[RECORD_HEADER_LEN..];

        let declared = header.payload_len.get();
        if declared != payload.len() as u64 {
            return Err(WireError::LengthMismatch {
                declared,
                actual: payload.len(),
            });
        }

        let hash = Key(header.hash);
        if content_hash(payload) != hash {
            return Err(WireError::HashMismatch);
        }

        let secs = header.expires.get();
        let expires = from_unix_secs(secs).ok_or(WireError::ExpiryOutOfRange(secs))?;

        Ok(Self {
            hash,
            expires,
            payload: payload.to_vec(),
        })
    }
}

// ── Time helpers ──────────────────────────────────────────────────────────────

/// Unix seconds, floored (times before the epoch round towards -inf).
pub fn unix_secs(t: SystemTime) -> i64 {
    match t.duration_since(UNIX_EPOCH) {
        Ok(d) => i64::try_from(d.as_secs()).unwrap_or(i64::MAX),
        Err(e) => {
            let d = e.duration();
            let whole = i64::try_from(d.as_secs()).unwrap_or(i64::MAX);
            if d.subsec_nanos() > 0 {
                -whole.saturating_add(1)
            } else {
                -whole
            }
        }
    }
}

/// Inverse of `unix_secs`. None if the platform clock cannot represent it.
pub fn from_unix_secs(secs: i64) -> Option<SystemTime> {
    if secs >= 0 {
        UNIX_EPOCH.checked_add(Duration::from_secs(secs as u64))
    } else {
        UNIX_EPOCH.checked_sub(Duration::from_secs(secs.unsigned_abs()))
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors that can arise when interpreting wire-format data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("malformed record: {0} bytes, header alone needs {RECORD_HEADER_LEN}")]
    RecordTooShort(usize),

    #[error("malformed record: declared payload length {declared} but {actual} bytes follow")]
    LengthMismatch { declared: u64, actual: usize },

    #[error("hash mismatch for received payload")]
    HashMismatch,

    #[error("malformed record: expiry {0} is not representable")]
    ExpiryOutOfRange(i64),

    #[error("payload length {0} exceeds maximum {}", MAX_PAYLOAD)]
    PayloadTooLarge(usize),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("unknown command byte: 0x{0:02x}")]
    UnknownCommand(u8),

    #[error("empty datagram")]
    EmptyDatagram,

    #[error("malformed {kind} list: {reason}")]
    MalformedList { kind: &'static str, reason: String },
}

impl WireError {
    /// True for the structural record failures (as opposed to integrity).
    pub fn is_malformed_record(&self) -> bool {
        matches!(
            self,
            WireError::RecordTooShort(_)
                | WireError::LengthMismatch { .. }
                | WireError::ExpiryOutOfRange(_)
        )
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
