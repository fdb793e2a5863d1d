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

use std::sync::atomic::{AtomicBool, Ordering};

use crate::{
    auth::sigv4::{RequestBuilder, EMPTY_PAYLOAD_SHA256},
    driver::S3Driver,
    http::HttpResponse,
    prelude::*,
    types::ListOptions,
    xml,
};

/// Push consumer of a listing stream.
///
/// Lifecycle: `set_starting` once, `set_value` zero or more times in listing
/// order, then exactly one of `set_done` / `set_error`, then `set_stopping`
/// once. The cancel callback handed to `set_starting` may be invoked from
/// any thread; the listing stops at the next check point and finishes with
/// `set_done`.
pub trait ListReceiver: Send + 'static {
    fn set_starting(&mut self, cancel: Box<dyn Fn() + Send + Sync>);
    fn set_value(&mut self, key: String);
    fn set_done(&mut self);
    fn set_error(&mut self, error: KvError);
    fn set_stopping(&mut self);
}

enum Page {
    /// More pages follow; the continuation token has been recorded.
    Continue,
    Done,
    Cancelled,
    Retry(KvError),
}

/// Drives one `S3Driver::list` call: paginated ListObjectsV2 requests whose
/// keys are filtered against the requested range and pushed to the receiver.
pub(crate) struct ListTask<R: ListReceiver> {
    driver: S3Driver,
    options: ListOptions,
    receiver: R,
    resource: String,
    continuation_token: Option<String>,
    attempt: u32,
    cancelled: Arc<AtomicBool>,
}

impl<R: ListReceiver> ListTask<R> {
    pub(crate) fn new(driver: S3Driver, options: ListOptions, receiver: R) -> Self {
        let resource = format!("{}/", driver.endpoint());
        Self {
            driver,
            options,
            receiver,
            resource,
            continuation_token: None,
            attempt: 0,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    pub(crate) async fn run(mut self) {
        self.driver.inner.read_limiter.admit().await;
        let _permit = self.driver.inner.admission.admit().await;

        let cancelled = self.cancelled.clone();
        self.receiver
            .set_starting(Box::new(move || cancelled.store(true, Ordering::Relaxed)));

        loop {
            match self.fetch_page().await {
                Ok(Page::Continue) => {}
                Ok(Page::Done) | Ok(Page::Cancelled) => {
                    self.receiver.set_done();
                    break;
                }
                Ok(Page::Retry(status)) => {
                    let attempt = self.attempt;
                    self.attempt += 1;
                    if let Err(error) = self.driver.backoff_and_retry(status, attempt).await {
                        self.receiver.set_error(error);
                        break;
                    }
                }
                Err(error) => {
                    self.receiver.set_error(error);
                    break;
                }
            }
        }
        self.receiver.set_stopping();
    }

    async fn fetch_page(&mut self) -> KvResult<Page> {
        if self.is_cancelled() {
            return Ok(Page::Cancelled);
        }

        let mut builder =
            RequestBuilder::new("GET", self.resource.clone()).query_param("list-type", "2");
        let prefix = self.query_prefix();
        if !prefix.is_empty() {
            builder = builder.query_param("prefix", prefix);
        }
        if let Some(token) = &self.continuation_token {
            builder = builder.query_param("continuation-token", token);
        }

        let credentials = self.driver.inner.credentials.get().await?;
        let start_time = Utc::now();
        let request = builder
            .maybe_requester_payer(self.driver.inner.config.requester_pays)
            .build(
                &self.driver.inner.host,
                credentials.as_ref(),
                &self.driver.inner.aws_region,
                EMPTY_PAYLOAD_SHA256,
                start_time,
            )?;
        trace!(url = %self.resource, token = ?self.continuation_token, "list request");

        let response = match self.driver.inner.transport.issue(request).await {
            Ok(response) => response,
            Err(error) => return Ok(Page::Retry(error.into())),
        };
        if !response.is_success() {
            let status = response.to_status_error();
            return if status.is_retriable() {
                Ok(Page::Retry(status))
            } else {
                Err(status)
            };
        }
        self.parse_page(&response)
    }

    /// The `prefix` query parameter: the range's lower bound, truncated to
    /// the strip length. Emission filtering still uses the full range.
    fn query_prefix(&self) -> &str {
        let min = self.options.range.inclusive_min.as_str();
        if self.options.strip_prefix_length == 0 || min.len() <= self.options.strip_prefix_length {
            return min;
        }
        let mut cut = self.options.strip_prefix_length;
        while cut > 0 && !min.is_char_boundary(cut) {
            cut -= 1;
        }
        &min[..cut]
    }

    fn strip(&self, key: &str) -> String {
        let n = self.options.strip_prefix_length;
        if n > 0 && key.len() >= n && key.is_char_boundary(n) {
            key[n..].to_string()
        } else {
            key.to_string()
        }
    }

    fn parse_page(&mut self, response: &HttpResponse) -> KvResult<Page> {
        let payload = std::str::from_utf8(&response.body).map_err(|_| {
            KvError::MalformedResponse("list response is not valid UTF-8".to_string())
        })?;

        let start = xml::find_tag(payload, "<ListBucketResult", 0)?;
        let (key_count, mut pos) = xml::get_tag(payload, "<KeyCount>", "</KeyCount>", start)?;
        let key_count: usize = key_count
            .trim()
            .parse()
            .map_err(|_| KvError::MalformedResponse(format!("malformed KeyCount {key_count:?}")))?;

        for _ in 0..key_count {
            if self.is_cancelled() {
                return Ok(Page::Cancelled);
            }
            let contents = xml::find_tag(payload, "<Contents>", pos)?;
            let (key, next) = xml::get_tag(payload, "<Key>", "</Key>", contents)?;
            pos = next;
            if self.options.range.contains(key) {
                let stripped = self.strip(key);
                self.receiver.set_value(stripped);
            }
        }

        // page accepted; the retry budget starts over
        self.attempt = 0;

        let (truncated, _) = xml::get_tag(payload, "<IsTruncated>", "</IsTruncated>", start)?;
        if truncated == "true" {
            let (token, _) = xml::get_tag(
                payload,
                "<NextContinuationToken>",
                "</NextContinuationToken>",
                start,
            )?;
            self.continuation_token = Some(token.to_string());
            Ok(Page::Continue)
        } else {
            self.continuation_token = None;
            Ok(Page::Done)
        }
    }
}
