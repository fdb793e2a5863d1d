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

use crate::prelude::*;

/// An empty etag which should not collide with an actual payload hash.
pub const EMPTY_ETAG: &str = "\"\"";

/// Opaque version token for an object. Maps 1:1 to the S3 ETag plus two
/// sentinels.
///
/// As an input condition, `Unknown` means "don't care" (unconditional) and
/// `NoValue` means "the object must not exist". As an output, `Unknown`
/// means the precondition did not hold and `NoValue` means the object is
/// absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Generation {
    #[default]
    Unknown,
    NoValue,
    Value(String),
}

impl Generation {
    pub fn from_etag(etag: impl Into<String>) -> Self {
        Generation::Value(etag.into())
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Generation::Unknown)
    }

    pub fn is_no_value(&self) -> bool {
        matches!(self, Generation::NoValue)
    }

    /// Precondition header encoding: `Unknown` omits the header, `NoValue`
    /// sends the empty etag, `Value` sends the etag itself.
    pub fn header_value(&self) -> Option<&str> {
        match self {
            Generation::Unknown => None,
            Generation::NoValue => Some(EMPTY_ETAG),
            Generation::Value(etag) => Some(etag),
        }
    }

    /// Reads the generation off a response's `ETag` header.
    pub fn from_response_headers(headers: &HashMap<String, String>) -> KvResult<Self> {
        headers
            .get("etag")
            .map(|etag| Generation::Value(etag.clone()))
            .ok_or_else(|| {
                KvError::MalformedResponse("no etag in response headers".to_string())
            })
    }
}

/// A generation plus the wall-clock instant at which it was observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimestampedGeneration {
    pub generation: Generation,
    pub time: DateTime<Utc>,
}

impl TimestampedGeneration {
    pub fn new(generation: Generation, time: DateTime<Utc>) -> Self {
        Self { generation, time }
    }

    /// The "precondition did not hold" result.
    pub fn unknown(time: DateTime<Utc>) -> Self {
        Self::new(Generation::Unknown, time)
    }

    /// The "object is absent" result.
    pub fn no_value(time: DateTime<Utc>) -> Self {
        Self::new(Generation::NoValue, time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_encoding() {
        assert_eq!(Generation::Unknown.header_value(), None);
        assert_eq!(Generation::NoValue.header_value(), Some("\"\""));
        assert_eq!(
            Generation::from_etag("\"abc123\"").header_value(),
            Some("\"abc123\"")
        );
    }

    #[test]
    fn generation_from_headers() {
        let mut headers = HashMap::new();
        headers.insert("etag".to_string(), "\"deadbeef\"".to_string());
        assert_eq!(
            Generation::from_response_headers(&headers).unwrap(),
            Generation::from_etag("\"deadbeef\"")
        );

        let empty = HashMap::new();
        assert!(Generation::from_response_headers(&empty).is_err());
    }
}
