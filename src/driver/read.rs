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

use crate::{
    auth::sigv4::{RequestBuilder, EMPTY_PAYLOAD_SHA256},
    driver::S3Driver,
    generation::{Generation, TimestampedGeneration},
    http::HttpResponse,
    prelude::*,
    types::{ReadOptions, ReadResult},
};

/// Satisfies one `S3Driver::read` call: a single GET with optional range and
/// generation preconditions, retried through the shared backoff policy.
pub(crate) struct ReadTask {
    driver: S3Driver,
    read_url: String,
    options: ReadOptions,
    attempt: u32,
}

impl ReadTask {
    pub(crate) fn new(driver: S3Driver, read_url: String, options: ReadOptions) -> Self {
        Self {
            driver,
            read_url,
            options,
            attempt: 0,
        }
    }

    pub(crate) async fn run(mut self) -> KvResult<ReadResult> {
        self.driver.inner.read_limiter.admit().await;
        let _permit = self.driver.inner.admission.admit().await;
        loop {
            let status = match self.issue().await {
                // 412/404/304 carry key-value meaning and are classified
                // outside the retry loop
                Ok((response, start_time, started))
                    if matches!(response.status, 304 | 404 | 412) || response.is_success() =>
                {
                    return self.finish(response, start_time, started)
                }
                Ok((response, _, _)) => response.to_status_error(),
                Err(error) => error,
            };
            if !status.is_retriable() {
                return Err(status);
            }
            let attempt = self.attempt;
            self.attempt += 1;
            self.driver.backoff_and_retry(status, attempt).await?;
        }
    }

    /// Issues one GET. The returned timestamp is captured immediately before
    /// the request goes out and becomes the result's `stamp.time`.
    async fn issue(&self) -> KvResult<(HttpResponse, DateTime<Utc>, Instant)> {
        let credentials = self.driver.inner.credentials.get().await?;

        let mut builder = RequestBuilder::new("GET", self.read_url.clone());
        if let Some(etag) = self.options.if_not_equal.header_value() {
            builder = builder.header("if-none-match", etag);
        }
        if let Some(etag) = self.options.if_equal.header_value() {
            builder = builder.header("if-match", etag);
        }
        if let Some(range) = self.options.byte_range.header_value() {
            builder = builder.header("range", &range);
        }

        let start_time = Utc::now();
        let started = Instant::now();
        let request = builder
            .maybe_requester_payer(self.driver.inner.config.requester_pays)
            .build(
                &self.driver.inner.host,
                credentials.as_ref(),
                &self.driver.inner.aws_region,
                EMPTY_PAYLOAD_SHA256,
                start_time,
            )?;

        trace!(url = %self.read_url, "read request");
        let response = self.driver.inner.transport.issue(request).await?;
        Ok((response, start_time, started))
    }

    fn finish(
        &self,
        response: HttpResponse,
        start_time: DateTime<Utc>,
        started: Instant,
    ) -> KvResult<ReadResult> {
        let metrics = &self.driver.inner.metrics;
        metrics.add_bytes_read(response.body.len() as u64);
        metrics.observe_read_latency(started.elapsed());

        match response.status {
            204 | 404 => return Ok(ReadResult::missing(start_time)),
            412 => return Ok(ReadResult::unspecified(Generation::Unknown, start_time)),
            // not modified: echo the caller's generation back
            304 => {
                return Ok(ReadResult::unspecified(
                    self.options.if_not_equal.clone(),
                    start_time,
                ))
            }
            _ => {}
        }

        let payload = response.body.clone();
        let payload_size = payload.len() as u64;
        let value = if response.status != 206 {
            // the server returned the entire object; carve out the requested
            // window ourselves
            let (begin, end) = self.options.byte_range.resolve(payload_size)?;
            payload.slice(begin as usize..end as usize)
        } else {
            let content_range = response.header("content-range").ok_or_else(|| {
                KvError::MalformedResponse("206 response without Content-Range header".to_string())
            })?;
            let (range_start, _, _) = parse_content_range(content_range)?;
            let start_mismatch = self
                .options
                .byte_range
                .requested_start()
                .is_some_and(|start| start != range_start);
            let size_mismatch = self
                .options
                .byte_range
                .requested_len()
                .is_some_and(|len| len != payload_size);
            if start_mismatch || size_mismatch {
                return Err(KvError::OutOfRange(format!(
                    "requested byte range {} was not satisfied by response of size {payload_size}",
                    self.options.byte_range
                )));
            }
            payload
        };

        let generation = Generation::from_response_headers(&response.headers)?;
        Ok(ReadResult::value(
            value,
            TimestampedGeneration::new(generation, start_time),
        ))
    }
}

/// Parses `Content-Range: bytes <start>-<end>/<total>`, where `<total>` may
/// be `*`.
fn parse_content_range(value: &str) -> KvResult<(u64, u64, Option<u64>)> {
    let malformed = || KvError::MalformedResponse(format!("malformed Content-Range {value:?}"));
    let rest = value.strip_prefix("bytes ").ok_or_else(malformed)?;
    let (range, total) = rest.split_once('/').ok_or_else(malformed)?;
    let (start, end) = range.split_once('-').ok_or_else(malformed)?;
    let start = start.parse().map_err(|_| malformed())?;
    let end = end.parse().map_err(|_| malformed())?;
    let total = match total {
        "*" => None,
        t => Some(t.parse().map_err(|_| malformed())?),
    };
    Ok((start, end, total))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_range_parsing() {
        assert_eq!(
            parse_content_range("bytes 100-199/500").unwrap(),
            (100, 199, Some(500))
        );
        assert_eq!(
            parse_content_range("bytes 0-0/*").unwrap(),
            (0, 0, None)
        );
        for bad in [
            "100-199/500",
            "bytes 100-199",
            "bytes a-b/c",
            "bytes 100/500",
            "",
        ] {
            assert!(parse_content_range(bad).is_err(), "{bad:?} should fail");
        }
    }
}
