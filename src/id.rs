//! Collision-resistant, sortable identifiers for candidates and sessions.
//!
//! An allocated id looks like
//! `node_018f3a2b4c5d_a1b2c3_0f1e2d_000042_9c8b7a6f`:
//!
//! ```text
//! <kind>_<unix ms, 12 hex>_<machine tag, 6 hex>_<process tag, 6 hex>_<sequence, 6+ dec>_<random, 8 hex>
//! ```
//!
//! Ids of one kind sort by allocation time. Uniqueness does not depend on
//! any shared service: timestamp, sequence and random bits jointly
//! disambiguate, even after the sequence wraps.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;
use std::time::Duration;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use tracing::debug;
use tracing::warn;

use crate::config::AllocatorConfig;

/// Longest id accepted on the external-id path.
pub const MAX_EXTERNAL_ID_LEN: usize = 200;

const TAG_MASK: u32 = 0x00ff_ffff;

/// What an identifier names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IdKind {
    Node,
    Edge,
    Graph,
    Session,
}

impl IdKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdKind::Node => "node",
            IdKind::Edge => "edge",
            IdKind::Graph => "graph",
            IdKind::Session => "session",
        }
    }
}

impl fmt::Display for IdKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IdKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "node" => Ok(IdKind::Node),
            "edge" => Ok(IdKind::Edge),
            "graph" => Ok(IdKind::Graph),
            "session" => Ok(IdKind::Session),
            _ => Err(()),
        }
    }
}

/// Fields recovered from an allocator-produced id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdDetails {
    pub kind: IdKind,
    pub timestamp_ms: u64,
    pub machine_tag: u32,
    pub process_tag: u32,
    pub sequence: u32,
    pub random: u32,
}

impl IdDetails {
    /// Time elapsed between allocation and `now`; zero if the id is from the future.
    pub fn age(&self, now: SystemTime) -> Duration {
        let now_ms = now
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Duration::from_millis(now_ms.saturating_sub(self.timestamp_ms))
    }
}

/// Outcome of [`validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdValidation {
    pub valid: bool,
    /// Present only for ids produced by an allocator.
    pub kind: Option<IdKind>,
    pub details: Option<IdDetails>,
}

/// Produces unique identifiers without coordination.
///
/// Safe to share between threads: the sequence is advanced with a
/// compare-and-swap loop, never a plain read-modify-write.
#[derive(Debug)]
pub struct IdentifierAllocator {
    machine_tag: u32,
    process_tag: u32,
    sequence: AtomicU32,
    sequence_bound: u32,
}

impl IdentifierAllocator {
    pub fn new(config: AllocatorConfig) -> Self {
        assert!(config.sequence_bound > 0, "ALLOCATOR: sequence_bound must be positive");

        let machine_tag = config.machine_tag.map(|t| t & TAG_MASK).unwrap_or_else(host_tag);
        let process_tag = process_tag();
        debug!(machine_tag, process_tag, "identifier allocator ready");

        Self {
            machine_tag,
            process_tag,
            sequence: AtomicU32::new(0),
            sequence_bound: config.sequence_bound,
        }
    }

    /// Allocates a fresh identifier of the given kind.
    pub fn allocate(&self, kind: IdKind) -> String {
        let timestamp_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        let sequence = self.next_sequence();
        let random: u32 = rand::random();

        format!(
            "{kind}_{timestamp_ms:012x}_{:06x}_{:06x}_{sequence:06}_{random:08x}",
            self.machine_tag, self.process_tag
        )
    }

    pub fn machine_tag(&self) -> u32 {
        self.machine_tag
    }

    pub fn process_tag(&self) -> u32 {
        self.process_tag
    }

    fn next_sequence(&self) -> u32 {
        let bound = self.sequence_bound;
        // The closure always returns Some, so both arms carry the previous value.
        match self
            .sequence
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |s| Some((s + 1) % bound))
        {
            Ok(prev) | Err(prev) => prev,
        }
    }
}

impl Default for IdentifierAllocator {
    fn default() -> Self {
        Self::new(AllocatorConfig::default())
    }
}

/// Checks an id, recovering embedded fields when the allocator produced it.
///
/// Ids from elsewhere are accepted if they are 1 to 200 characters of
/// `[A-Za-z0-9_.-]`.
pub fn validate(id: &str) -> IdValidation {
    if let Some(details) = parse(id) {
        return IdValidation {
            valid: true,
            kind: Some(details.kind),
            details: Some(details),
        };
    }

    IdValidation {
        valid: is_external_id(id),
        kind: None,
        details: None,
    }
}

/// Returns every occurrence of an id after its first.
///
/// `["a", "b", "a"]` yields `["a"]`; `["a", "a", "a"]` yields `["a", "a"]`.
pub fn detect_collisions<I, S>(ids: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = HashSet::new();
    let mut duplicates = Vec::new();
    for id in ids {
        let id = id.as_ref();
        if !seen.insert(id.to_owned()) {
            duplicates.push(id.to_owned());
        }
    }
    duplicates
}

fn is_external_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_EXTERNAL_ID_LEN
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'))
}

fn parse(id: &str) -> Option<IdDetails> {
    let mut parts = id.split('_');
    let kind = parts.next()?.parse().ok()?;
    let timestamp_ms = hex_field(parts.next()?, 12)?;
    let machine_tag = hex_field(parts.next()?, 6)? as u32;
    let process_tag = hex_field(parts.next()?, 6)? as u32;

    let seq = parts.next()?;
    if seq.len() < 6 || !seq.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let sequence = seq.parse().ok()?;

    let random = hex_field(parts.next()?, 8)? as u32;
    if parts.next().is_some() {
        return None;
    }

    Some(IdDetails {
        kind,
        timestamp_ms,
        machine_tag,
        process_tag,
        sequence,
        random,
    })
}

fn hex_field(s: &str, width: usize) -> Option<u64> {
    if s.len() != width || !s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
        return None;
    }
    u64::from_str_radix(s, 16).ok()
}

fn host_tag() -> u32 {
    match hostname::get() {
        Ok(name) => fnv1a(name.to_string_lossy().as_bytes()) & TAG_MASK,
        Err(e) => {
            warn!(error = %e, "host name unavailable, using random machine tag");
            rand::random::<u32>() & TAG_MASK
        }
    }
}

fn process_tag() -> u32 {
    let started = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    let mut bytes = [0u8; 8];
    bytes[..4].copy_from_slice(&std::process::id().to_le_bytes());
    bytes[4..].copy_from_slice(&started.to_le_bytes());
    fnv1a(&bytes) & TAG_MASK
}

fn fnv1a(bytes: &[u8]) -> u32 {
    let mut hash: u32 = 0x811c_9dc5;
    for b in bytes {
        hash ^= u32::from(*b);
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}
