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

use std::{sync::Arc, time::Duration};

use opentelemetry::{
    global,
    metrics::{Counter, Histogram},
};

pub struct MetricNames;

impl MetricNames {
    pub const READS: &'static str = "s3_read";
    pub const WRITES: &'static str = "s3_write";
    pub const LISTS: &'static str = "s3_list";
    pub const DELETE_RANGES: &'static str = "s3_delete_range";
    pub const RETRIES: &'static str = "s3_retries";
    pub const BYTES_READ: &'static str = "s3_bytes_read";
    pub const BYTES_WRITTEN: &'static str = "s3_bytes_written";
    pub const READ_LATENCY_MS: &'static str = "s3_read_latency_ms";
    pub const WRITE_LATENCY_MS: &'static str = "s3_write_latency_ms";
}

/// Cloneable handle on the driver's instrument set. `Metrics::none()` is a
/// no-op handle for tests and tools that don't export telemetry.
#[derive(Clone)]
pub struct Metrics {
    inner: Option<Arc<Instruments>>,
}

struct Instruments {
    reads: Counter<u64>,
    writes: Counter<u64>,
    lists: Counter<u64>,
    delete_ranges: Counter<u64>,
    retries: Counter<u64>,
    bytes_read: Counter<u64>,
    bytes_written: Counter<u64>,
    read_latency_ms: Histogram<f64>,
    write_latency_ms: Histogram<f64>,
}

impl Metrics {
    pub fn new() -> Self {
        let meter = global::meter("s3kv");
        Self {
            inner: Some(Arc::new(Instruments {
                reads: meter
                    .u64_counter(MetricNames::READS)
                    .with_description("Read calls")
                    .build(),
                writes: meter
                    .u64_counter(MetricNames::WRITES)
                    .with_description("Write and delete calls")
                    .build(),
                lists: meter
                    .u64_counter(MetricNames::LISTS)
                    .with_description("List calls")
                    .build(),
                delete_ranges: meter
                    .u64_counter(MetricNames::DELETE_RANGES)
                    .with_description("DeleteRange calls")
                    .build(),
                retries: meter
                    .u64_counter(MetricNames::RETRIES)
                    .with_description("Retried requests, all operations")
                    .build(),
                bytes_read: meter
                    .u64_counter(MetricNames::BYTES_READ)
                    .with_description("Response payload bytes read")
                    .build(),
                bytes_written: meter
                    .u64_counter(MetricNames::BYTES_WRITTEN)
                    .with_description("Request payload bytes written")
                    .build(),
                read_latency_ms: meter
                    .f64_histogram(MetricNames::READ_LATENCY_MS)
                    .with_description("Read latency (ms)")
                    .build(),
                write_latency_ms: meter
                    .f64_histogram(MetricNames::WRITE_LATENCY_MS)
                    .with_description("Write latency (ms)")
                    .build(),
            })),
        }
    }

    pub fn none() -> Self {
        Self { inner: None }
    }

    pub(crate) fn inc_reads(&self) {
        if let Some(inner) = &self.inner {
            inner.reads.add(1, &[]);
        }
    }

    pub(crate) fn inc_writes(&self) {
        if let Some(inner) = &self.inner {
            inner.writes.add(1, &[]);
        }
    }

    pub(crate) fn inc_lists(&self) {
        if let Some(inner) = &self.inner {
            inner.lists.add(1, &[]);
        }
    }

    pub(crate) fn inc_delete_ranges(&self) {
        if let Some(inner) = &self.inner {
            inner.delete_ranges.add(1, &[]);
        }
    }

    pub(crate) fn inc_retries(&self) {
        if let Some(inner) = &self.inner {
            inner.retries.add(1, &[]);
        }
    }

    pub(crate) fn add_bytes_read(&self, n: u64) {
        if let Some(inner) = &self.inner {
            inner.bytes_read.add(n, &[]);
        }
    }

    pub(crate) fn add_bytes_written(&self, n: u64) {
        if let Some(inner) = &self.inner {
            inner.bytes_written.add(n, &[]);
        }
    }

    pub(crate) fn observe_read_latency(&self, elapsed: Duration) {
        if let Some(inner) = &self.inner {
            inner.read_latency_ms.record(elapsed.as_millis() as f64, &[]);
        }
    }

    pub(crate) fn observe_write_latency(&self, elapsed: Duration) {
        if let Some(inner) = &self.inner {
            inner
                .write_latency_ms
                .record(elapsed.as_millis() as f64, &[]);
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
