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
    auth::{
        sigv4::{payload_sha256, RequestBuilder, EMPTY_PAYLOAD_SHA256},
        Credentials,
    },
    driver::S3Driver,
    generation::{Generation, TimestampedGeneration},
    prelude::*,
    types::WriteOptions,
};

enum Outcome {
    Done(TimestampedGeneration),
    Retry(KvError),
}

/// Satisfies one `S3Driver::write` call with a value present. S3 has no
/// conditional PUT keyed on ETag match, so a conditional write first probes
/// the precondition with a HEAD; the probe is advisory and does not close
/// the window between check and mutation.
pub(crate) struct WriteTask {
    driver: S3Driver,
    encoded_key: String,
    value: Bytes,
    options: WriteOptions,
    attempt: u32,
}

impl WriteTask {
    pub(crate) fn new(
        driver: S3Driver,
        encoded_key: String,
        value: Bytes,
        options: WriteOptions,
    ) -> Self {
        Self {
            driver,
            encoded_key,
            value,
            options,
            attempt: 0,
        }
    }

    pub(crate) async fn run(mut self) -> KvResult<TimestampedGeneration> {
        self.driver.inner.write_limiter.admit().await;
        let _permit = self.driver.inner.admission.admit().await;
        loop {
            match self.attempt_once().await? {
                Outcome::Done(result) => return Ok(result),
                Outcome::Retry(status) => {
                    let attempt = self.attempt;
                    self.attempt += 1;
                    self.driver.backoff_and_retry(status, attempt).await?;
                }
            }
        }
    }

    /// One full attempt: optional HEAD probe, then the PUT. Retriable PUT
    /// failures restart from the probe.
    async fn attempt_once(&self) -> KvResult<Outcome> {
        let credentials = self.driver.inner.credentials.get().await?;
        let upload_url = self.driver.object_url(&self.encoded_key);

        if let Some(etag) = self.options.if_equal.header_value() {
            let now = Utc::now();
            let request = RequestBuilder::new("HEAD", upload_url.clone())
                .header("if-match", etag)
                .maybe_requester_payer(self.driver.inner.config.requester_pays)
                .build(
                    &self.driver.inner.host,
                    credentials.as_ref(),
                    &self.driver.inner.aws_region,
                    EMPTY_PAYLOAD_SHA256,
                    now,
                )?;
            trace!(url = %upload_url, "write precondition probe");
            let response = self.driver.inner.transport.issue(request).await?;
            match response.status {
                304 | 412 => {
                    return Ok(Outcome::Done(TimestampedGeneration::unknown(Utc::now())))
                }
                404 => {
                    if !self.options.if_equal.is_no_value() {
                        return Ok(Outcome::Done(TimestampedGeneration::unknown(Utc::now())));
                    }
                    // absence is exactly what if_equal = NoValue requires
                }
                status if (200..300).contains(&status) => {
                    if self.options.if_equal.is_no_value() {
                        // the object exists, violating must-not-exist
                        return Ok(Outcome::Done(TimestampedGeneration::unknown(Utc::now())));
                    }
                }
                _ => return Err(response.to_status_error()),
            }
        }

        self.put(upload_url, credentials.as_ref()).await
    }

    async fn put(&self, upload_url: String, credentials: Option<&Credentials>) -> KvResult<Outcome> {
        let start_time = Utc::now();
        let started = Instant::now();
        let content_sha256 = payload_sha256(&self.value);
        let request = RequestBuilder::new("PUT", upload_url.clone())
            .header("content-type", "application/octet-stream")
            .header("content-length", &self.value.len().to_string())
            .maybe_requester_payer(self.driver.inner.config.requester_pays)
            .body(self.value.clone())
            .build(
                &self.driver.inner.host,
                credentials,
                &self.driver.inner.aws_region,
                &content_sha256,
                start_time,
            )?;
        trace!(url = %upload_url, size = self.value.len(), "put request");

        let response = match self.driver.inner.transport.issue(request).await {
            Ok(response) => response,
            Err(error) => return Ok(Outcome::Retry(error.into())),
        };

        if response.status == 404 && !self.options.if_equal.is_unknown() {
            // the object went away between the probe and the PUT
            return Ok(Outcome::Done(TimestampedGeneration::unknown(start_time)));
        }
        if !response.is_success() {
            let status = response.to_status_error();
            return if status.is_retriable() {
                Ok(Outcome::Retry(status))
            } else {
                Err(status)
            };
        }

        let metrics = &self.driver.inner.metrics;
        metrics.observe_write_latency(started.elapsed());
        metrics.add_bytes_written(self.value.len() as u64);
        let generation = Generation::from_response_headers(&response.headers)?;
        Ok(Outcome::Done(TimestampedGeneration::new(
            generation, start_time,
        )))
    }
}

/// Satisfies one `S3Driver::write` call with no value: a DELETE, with the
/// same advisory HEAD probe for conditional deletes.
pub(crate) struct DeleteTask {
    driver: S3Driver,
    resource: String,
    options: WriteOptions,
    attempt: u32,
}

impl DeleteTask {
    pub(crate) fn new(driver: S3Driver, resource: String, options: WriteOptions) -> Self {
        Self {
            driver,
            resource,
            options,
            attempt: 0,
        }
    }

    pub(crate) async fn run(mut self) -> KvResult<TimestampedGeneration> {
        self.driver.inner.write_limiter.admit().await;
        let _permit = self.driver.inner.admission.admit().await;
        loop {
            match self.attempt_once().await? {
                Outcome::Done(result) => return Ok(result),
                Outcome::Retry(status) => {
                    let attempt = self.attempt;
                    self.attempt += 1;
                    self.driver.backoff_and_retry(status, attempt).await?;
                }
            }
        }
    }

    async fn attempt_once(&self) -> KvResult<Outcome> {
        let credentials = self.driver.inner.credentials.get().await?;

        if let Some(etag) = self.options.if_equal.header_value() {
            let now = Utc::now();
            let request = RequestBuilder::new("HEAD", self.resource.clone())
                .header("if-match", etag)
                .maybe_requester_payer(self.driver.inner.config.requester_pays)
                .build(
                    &self.driver.inner.host,
                    credentials.as_ref(),
                    &self.driver.inner.aws_region,
                    EMPTY_PAYLOAD_SHA256,
                    now,
                )?;
            trace!(url = %self.resource, "delete precondition probe");
            let response = self.driver.inner.transport.issue(request).await?;
            match response.status {
                304 | 412 => {
                    return Ok(Outcome::Done(TimestampedGeneration::unknown(Utc::now())))
                }
                404 => {
                    if !self.options.if_equal.is_no_value() {
                        return Ok(Outcome::Done(TimestampedGeneration::unknown(Utc::now())));
                    }
                    // already absent, which is the desired end state
                }
                status if (200..300).contains(&status) => {
                    if self.options.if_equal.is_no_value() {
                        // the object exists, violating must-not-exist
                        return Ok(Outcome::Done(TimestampedGeneration::unknown(Utc::now())));
                    }
                }
                _ => return Err(response.to_status_error()),
            }
        }

        let start_time = Utc::now();
        let request = RequestBuilder::new("DELETE", self.resource.clone())
            .maybe_requester_payer(self.driver.inner.config.requester_pays)
            .build(
                &self.driver.inner.host,
                credentials.as_ref(),
                &self.driver.inner.aws_region,
                EMPTY_PAYLOAD_SHA256,
                start_time,
            )?;
        trace!(url = %self.resource, "delete request");

        let response = match self.driver.inner.transport.issue(request).await {
            Ok(response) => response,
            Err(error) => return Ok(Outcome::Retry(error.into())),
        };

        // 404 counts as success for deletes
        if response.status != 404 && !response.is_success() {
            let status = response.to_status_error();
            return if status.is_retriable() {
                Ok(Outcome::Retry(status))
            } else {
                Err(status)
            };
        }

        let generation = if response.status == 404
            && !self.options.if_equal.is_unknown()
            && !self.options.if_equal.is_no_value()
        {
            // a concrete generation was required but the object is gone
            Generation::Unknown
        } else {
            Generation::NoValue
        };
        Ok(Outcome::Done(TimestampedGeneration::new(
            generation, start_time,
        )))
    }
}
