//! Vector clocks for item versioning.
//!
//! A vector clock maps node ids to monotonically non-decreasing tick
//! counters. Two clocks compare as `Equal`, `Before`, `After` or
//! `Concurrent`; concurrency is the conflict signal surfaced to readers.
//!
//! # Byte encoding
//!
//! ```text
//! u32 BE  entry count
//! repeated, ascending by id:
//!   u32 BE  id length
//!   [u8]    id (UTF-8)
//!   u64 BE  tick
//! ```
//!
//! Entries are written in ascending id order, so value-equal clocks encode
//! to identical bytes regardless of how they were built.

use crate::core::error::{FredError, FredResult};
use bytes::{Buf, BufMut, BytesMut};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

/// Causal relation between two vector clocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClockOrdering {
    /// Identical counters.
    Equal,
    /// Left happened before right (right dominates).
    Before,
    /// Left happened after right (left dominates).
    After,
    /// Neither dominates.
    Concurrent,
}

impl ClockOrdering {
    /// Check if the two versions conflict.
    pub fn is_concurrent(&self) -> bool {
        matches!(self, Self::Concurrent)
    }
}

/// A vector clock.
///
/// Missing entries count as zero when comparing, so `{"A":0}` and `{}`
/// compare `Equal` even though they are not structurally identical.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VectorClock {
    entries: BTreeMap<String, u64>,
}

impl VectorClock {
    /// Create an empty clock.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a clock from `(id, tick)` pairs. Later duplicates win.
    pub fn from_entries<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (S, u64)>,
        S: Into<String>,
    {
        Self {
            entries: entries.into_iter().map(|(id, t)| (id.into(), t)).collect(),
        }
    }

    /// Get the tick for a node (zero if absent).
    pub fn get(&self, id: &str) -> u64 {
        self.entries.get(id).copied().unwrap_or(0)
    }

    /// Set the tick for a node.
    pub fn set(&mut self, id: impl Into<String>, ticks: u64) {
        self.entries.insert(id.into(), ticks);
    }

    /// Increment the tick for a node and return the new value.
    pub fn tick(&mut self, id: &str) -> u64 {
        let entry = self.entries.entry(id.to_string()).or_insert(0);
        *entry = entry.saturating_add(1);
        *entry
    }

    /// Merge another clock into this one (componentwise maximum).
    pub fn merge(&mut self, other: &VectorClock) {
        for (id, &ticks) in &other.entries {
            let entry = self.entries.entry(id.clone()).or_insert(0);
            if ticks > *entry {
                *entry = ticks;
            }
        }
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the clock has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate entries in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.entries.iter().map(|(id, t)| (id.as_str(), *t))
    }

    /// Compare this clock against another.
    pub fn compare(&self, other: &VectorClock) -> ClockOrdering {
        let mut less = false;
        let mut greater = false;

        let ids = self.entries.keys().chain(other.entries.keys());
        for id in ids {
            match self.get(id).cmp(&other.get(id)) {
                Ordering::Less => less = true,
                Ordering::Greater => greater = true,
                Ordering::Equal => {}
            }
            if less && greater {
                return ClockOrdering::Concurrent;
            }
        }

        match (less, greater) {
            (false, false) => ClockOrdering::Equal,
            (true, false) => ClockOrdering::Before,
            (false, true) => ClockOrdering::After,
            (true, true) => ClockOrdering::Concurrent,
        }
    }

    /// Check if this clock is at or after `other` in causal order.
    pub fn dominates(&self, other: &VectorClock) -> bool {
        matches!(
            self.compare(other),
            ClockOrdering::After | ClockOrdering::Equal
        )
    }

    /// Encode to the canonical byte form.
    pub fn encode(&self) -> Vec<u8> {
        let size = 4 + self
            .entries
            .keys()
            .map(|id| 4 + id.len() + 8)
            .sum::<usize>();
        let mut buf = BytesMut::with_capacity(size);

        buf.put_u32(self.entries.len() as u32);
        for (id, ticks) in &self.entries {
            buf.put_u32(id.len() as u32);
            buf.put_slice(id.as_bytes());
            buf.put_u64(*ticks);
        }

        buf.to_vec()
    }

    /// Decode from the canonical byte form.
    ///
    /// Rejects truncated input, trailing bytes, invalid UTF-8 and entries
    /// that are duplicated or not in ascending order.
    pub fn decode(data: &[u8]) -> FredResult<Self> {
        let mut buf = data;

        if buf.remaining() < 4 {
            return Err(FredError::decode("vector clock: missing entry count"));
        }
        let count = buf.get_u32() as usize;

        let mut entries = BTreeMap::new();
        let mut last: Option<String> = None;

        for index in 0..count {
            if buf.remaining() < 4 {
                return Err(FredError::decode(format!(
                    "vector clock: entry {} truncated before id length",
                    index
                )));
            }
            let id_len = buf.get_u32() as usize;

            if buf.remaining() < id_len + 8 {
                return Err(FredError::decode(format!(
                    "vector clock: entry {} truncated (id length {})",
                    index, id_len
                )));
            }

            let id = std::str::from_utf8(&buf[..id_len])
                .map_err(|e| FredError::decode(format!("vector clock: invalid id: {}", e)))?
                .to_string();
            buf.advance(id_len);
            let ticks = buf.get_u64();

            if let Some(prev) = &last {
                if prev.as_str() >= id.as_str() {
                    return Err(FredError::decode(format!(
                        "vector clock: entry {:?} out of order after {:?}",
                        id, prev
                    )));
                }
            }

            last = Some(id.clone());
            entries.insert(id, ticks);
        }

        if buf.has_remaining() {
            return Err(FredError::decode(format!(
                "vector clock: {} trailing bytes",
                buf.remaining()
            )));
        }

        Ok(Self { entries })
    }

    /// Deterministic human-readable form: `{"A":1, "B":40}`.
    pub fn canonical_string(&self) -> String {
        let body = self
            .entries
            .iter()
            .map(|(id, ticks)| format!("\"{}\":{}", id, ticks))
            .collect::<Vec<_>>()
            .join(", ");
        format!("{{{}}}", body)
    }
}

impl fmt::Display for VectorClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical_string())
    }
}

impl<S: Into<String>> FromIterator<(S, u64)> for VectorClock {
    fn from_iter<T: IntoIterator<Item = (S, u64)>>(iter: T) -> Self {
        Self::from_entries(iter)
    }
}
