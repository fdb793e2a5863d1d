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

//! S3-backed key-value store driver.
//!
//! Read, Write, Delete, List and DeleteRange operations are turned into
//! rate-limited, admission-gated, SigV4-signed HTTP requests against an
//! S3-compatible object store. Responses are mapped back into key-value
//! semantics: each object carries an opaque [`Generation`] (its ETag plus
//! two sentinels), and conditional reads and writes are expressed through
//! HTTP preconditions. S3 has no native conditional PUT/DELETE, so
//! conditional mutations are emulated with an advisory HEAD probe.

pub mod auth;
pub mod driver;
pub mod errors;
pub mod generation;
pub mod http;
pub mod limit;
pub mod metrics;
pub mod prelude;
pub mod retry;
pub mod types;
pub mod validate;
pub mod xml;

pub use driver::{
    list::ListReceiver, RateLimitConfig, S3Config, S3Driver,
};
pub use errors::{CredentialError, KvError, KvResult, TransportError};
pub use generation::{Generation, TimestampedGeneration};
pub use http::{HttpRequest, HttpResponse, HttpTransport};
pub use metrics::Metrics;
pub use retry::RetryConfig;
pub use types::{
    ByteRange, KeyRange, ListOptions, ReadOptions, ReadResult, ReadState, WriteOptions,
};
