// Copyright (C) 2025 Category Labs, Inc.
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

use std::fmt;

use crate::{
    generation::{Generation, TimestampedGeneration},
    prelude::*,
};

/// Requested byte window of an object. Each variant corresponds to one HTTP
/// `Range` header form.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ByteRange {
    /// The whole object; no `Range` header is sent.
    #[default]
    Full,
    /// `[start, end)` — `Range: bytes=start-(end-1)`.
    Bounded { start: u64, end: u64 },
    /// `[start, ..)` — `Range: bytes=start-`.
    From { start: u64 },
    /// The last `length` bytes — `Range: bytes=-length`.
    Suffix { length: u64 },
}

impl ByteRange {
    /// Structural validation, applied before any request is issued.
    pub fn check(&self) -> KvResult<()> {
        match *self {
            ByteRange::Bounded { start, end } if end <= start => Err(KvError::invalid_argument(
                format!("empty or inverted byte range [{start}, {end})"),
            )),
            ByteRange::Suffix { length: 0 } => {
                Err(KvError::invalid_argument("zero-length suffix byte range"))
            }
            _ => Ok(()),
        }
    }

    /// The `Range` header value, or `None` when the request covers the whole
    /// object.
    pub fn header_value(&self) -> Option<String> {
        match *self {
            ByteRange::Full | ByteRange::From { start: 0 } => None,
            ByteRange::Bounded { start, end } => Some(format!("bytes={}-{}", start, end - 1)),
            ByteRange::From { start } => Some(format!("bytes={start}-")),
            ByteRange::Suffix { length } => Some(format!("bytes=-{length}")),
        }
    }

    /// Resolves the request against a known object size into a concrete
    /// `[start, end)` window.
    pub fn resolve(&self, size: u64) -> KvResult<(u64, u64)> {
        let out_of_range = || {
            KvError::OutOfRange(format!(
                "byte range {self} exceeds object of size {size}"
            ))
        };
        match *self {
            ByteRange::Full => Ok((0, size)),
            ByteRange::Bounded { start, end } => {
                if start <= end && end <= size {
                    Ok((start, end))
                } else {
                    Err(out_of_range())
                }
            }
            ByteRange::From { start } => {
                if start <= size {
                    Ok((start, size))
                } else {
                    Err(out_of_range())
                }
            }
            ByteRange::Suffix { length } => Ok((size.saturating_sub(length), size)),
        }
    }

    /// The absolute offset the server must honor, when one was requested.
    pub fn requested_start(&self) -> Option<u64> {
        match *self {
            ByteRange::Bounded { start, .. } | ByteRange::From { start } => Some(start),
            _ => None,
        }
    }

    /// The exact response length implied by the request, when determinable.
    pub fn requested_len(&self) -> Option<u64> {
        match *self {
            ByteRange::Bounded { start, end } => Some(end - start),
            ByteRange::Suffix { length } => Some(length),
            _ => None,
        }
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            ByteRange::Full => write!(f, "[0, ?)"),
            ByteRange::Bounded { start, end } => write!(f, "[{start}, {end})"),
            ByteRange::From { start } => write!(f, "[{start}, ?)"),
            ByteRange::Suffix { length } => write!(f, "[-{length}]"),
        }
    }
}

/// Half-open key interval `[inclusive_min, exclusive_max)`. An empty
/// `exclusive_max` means unbounded above.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyRange {
    pub inclusive_min: String,
    pub exclusive_max: String,
}

impl KeyRange {
    pub fn new(inclusive_min: impl Into<String>, exclusive_max: impl Into<String>) -> Self {
        Self {
            inclusive_min: inclusive_min.into(),
            exclusive_max: exclusive_max.into(),
        }
    }

    /// The full key space.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        !self.exclusive_max.is_empty() && self.inclusive_min >= self.exclusive_max
    }

    pub fn contains(&self, key: &str) -> bool {
        key >= self.inclusive_min.as_str()
            && (self.exclusive_max.is_empty() || key < self.exclusive_max.as_str())
    }
}

#[derive(Debug, Clone, Default)]
pub struct ReadOptions {
    pub byte_range: ByteRange,
    /// Read only if the current generation equals this one.
    pub if_equal: Generation,
    /// Read only if the current generation differs from this one.
    pub if_not_equal: Generation,
    /// Accepted for interface compatibility; S3 responses are always
    /// authoritative, so the driver does not consult it.
    pub staleness_bound: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
pub struct WriteOptions {
    /// `Unknown` writes unconditionally; `NoValue` requires the object to be
    /// absent; `Value` requires the current generation to match.
    pub if_equal: Generation,
}

#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    pub range: KeyRange,
    /// Number of leading bytes stripped from each key before emission.
    pub strip_prefix_length: usize,
    /// Accepted for interface compatibility; not consulted.
    pub staleness_bound: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadState {
    /// A precondition did not hold; nothing is known about the value.
    Unspecified,
    /// The object is absent.
    Missing,
    /// The object exists and `value` holds the (possibly range-limited)
    /// payload.
    Value,
}

#[derive(Debug, Clone)]
pub struct ReadResult {
    pub state: ReadState,
    pub value: Option<Bytes>,
    pub stamp: TimestampedGeneration,
}

impl ReadResult {
    pub fn missing(time: DateTime<Utc>) -> Self {
        Self {
            state: ReadState::Missing,
            value: None,
            stamp: TimestampedGeneration::no_value(time),
        }
    }

    pub fn unspecified(generation: Generation, time: DateTime<Utc>) -> Self {
        Self {
            state: ReadState::Unspecified,
            value: None,
            stamp: TimestampedGeneration::new(generation, time),
        }
    }

    pub fn value(value: Bytes, stamp: TimestampedGeneration) -> Self {
        Self {
            state: ReadState::Value,
            value: Some(value),
            stamp,
        }
    }
}
