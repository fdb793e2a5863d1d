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

pub mod delete_range;
pub mod list;
mod read;
mod write;

use std::num::NonZeroU32;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::{
    auth::{CredentialCache, CredentialProvider},
    generation::TimestampedGeneration,
    http::{HttpRequest, HttpTransport, ReqwestTransport},
    limit::{AdmissionQueue, NoRateLimiter, RateLimiter, TokenBucketLimiter},
    metrics::Metrics,
    prelude::*,
    retry::{self, RetryConfig},
    types::{KeyRange, ListOptions, ReadOptions, ReadResult, WriteOptions},
    validate::{is_valid_bucket_name, is_valid_object_key, s3_url, uri_encode_key},
};

use self::list::{ListReceiver, ListTask};

const DOT_AMAZONAWS_COM: &str = ".amazonaws.com";
const BUCKET_REGION_HEADER: &str = "x-amz-bucket-region";

/// Requests-per-second quotas, applied separately to read-side operations
/// (Read, List) and write-side operations (Write, Delete).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub read_per_second: u32,
    pub write_per_second: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct S3Config {
    pub bucket: String,
    #[serde(default)]
    pub requester_pays: bool,
    /// Full base URL overriding the default virtual-host endpoint.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Host header / signing host; derived from the endpoint when unset.
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default = "default_profile")]
    pub profile: String,
    /// Signing region. When unset (and no endpoint is given), the region is
    /// discovered with a HEAD against the global virtual-host URL.
    #[serde(default)]
    pub aws_region: Option<String>,
    /// Cap on concurrently in-flight requests.
    #[serde(default = "default_request_concurrency")]
    pub request_concurrency: usize,
    #[serde(default)]
    pub rate_limit: Option<RateLimitConfig>,
    #[serde(default)]
    pub retries: RetryConfig,
}

fn default_profile() -> String {
    "default".to_string()
}

fn default_request_concurrency() -> usize {
    32
}

impl S3Config {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            requester_pays: false,
            endpoint: None,
            host: None,
            profile: default_profile(),
            aws_region: None,
            request_concurrency: default_request_concurrency(),
            rate_limit: None,
            retries: RetryConfig::default(),
        }
    }
}

struct DriverInner {
    config: S3Config,
    endpoint: String,
    host: String,
    aws_region: String,
    transport: Arc<dyn HttpTransport>,
    credentials: CredentialCache,
    read_limiter: Arc<dyn RateLimiter>,
    write_limiter: Arc<dyn RateLimiter>,
    admission: AdmissionQueue,
    metrics: Metrics,
}

/// Handle on one opened bucket. Cheap to clone; every running task holds a
/// clone for its whole lifetime, so the driver outlives all of its tasks.
#[derive(Clone)]
pub struct S3Driver {
    inner: Arc<DriverInner>,
}

impl std::fmt::Debug for S3Driver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Driver").finish_non_exhaustive()
    }
}

impl S3Driver {
    /// Opens the bucket with the production transport and metric sinks.
    pub async fn open(config: S3Config) -> KvResult<Self> {
        Self::open_with(config, Arc::new(ReqwestTransport::new()), Metrics::new()).await
    }

    /// Opens the bucket with an injected transport, resolving credentials
    /// through the profile chain.
    pub async fn open_with(
        config: S3Config,
        transport: Arc<dyn HttpTransport>,
        metrics: Metrics,
    ) -> KvResult<Self> {
        let credentials = CredentialCache::new(config.profile.clone());
        Self::open_impl(config, transport, credentials, metrics).await
    }

    /// Opens the bucket with a fixed credential provider, bypassing the
    /// profile chain.
    pub async fn open_with_credentials(
        config: S3Config,
        transport: Arc<dyn HttpTransport>,
        provider: Arc<dyn CredentialProvider>,
        metrics: Metrics,
    ) -> KvResult<Self> {
        let credentials = CredentialCache::with_provider(provider);
        Self::open_impl(config, transport, credentials, metrics).await
    }

    async fn open_impl(
        config: S3Config,
        transport: Arc<dyn HttpTransport>,
        credentials: CredentialCache,
        metrics: Metrics,
    ) -> KvResult<Self> {
        if !is_valid_bucket_name(&config.bucket) {
            return Err(KvError::invalid_argument(format!(
                "invalid S3 bucket name: {:?}",
                config.bucket
            )));
        }
        if config.request_concurrency == 0 {
            return Err(KvError::invalid_argument(
                "request_concurrency must be positive",
            ));
        }

        let (endpoint, host, aws_region) =
            Self::resolve_endpoint(&config, transport.as_ref()).await?;
        info!(endpoint = %endpoint, "S3 driver using endpoint");

        let (read_limiter, write_limiter): (Arc<dyn RateLimiter>, Arc<dyn RateLimiter>) =
            match &config.rate_limit {
                Some(limits) => {
                    let read = NonZeroU32::new(limits.read_per_second).ok_or_else(|| {
                        KvError::invalid_argument("read rate limit must be positive")
                    })?;
                    let write = NonZeroU32::new(limits.write_per_second).ok_or_else(|| {
                        KvError::invalid_argument("write rate limit must be positive")
                    })?;
                    (
                        Arc::new(TokenBucketLimiter::per_second(read)),
                        Arc::new(TokenBucketLimiter::per_second(write)),
                    )
                }
                None => (Arc::new(NoRateLimiter), Arc::new(NoRateLimiter)),
            };
        let admission = AdmissionQueue::new(config.request_concurrency);

        Ok(Self {
            inner: Arc::new(DriverInner {
                endpoint,
                host,
                aws_region,
                transport,
                credentials,
                read_limiter,
                write_limiter,
                admission,
                metrics,
                config,
            }),
        })
    }

    async fn resolve_endpoint(
        config: &S3Config,
        transport: &dyn HttpTransport,
    ) -> KvResult<(String, String, String)> {
        if let Some(endpoint) = &config.endpoint {
            let parsed = Url::parse(endpoint).map_err(|e| {
                KvError::invalid_argument(format!("invalid endpoint {endpoint:?}: {e}"))
            })?;
            if parsed.scheme() != "http" && parsed.scheme() != "https" {
                return Err(KvError::invalid_argument(format!(
                    "endpoint {endpoint} has invalid scheme {}, should be http(s)",
                    parsed.scheme()
                )));
            }
            if parsed.query().is_some() {
                return Err(KvError::invalid_argument(format!(
                    "query in endpoint unsupported: {endpoint}"
                )));
            }
            if parsed.fragment().is_some() {
                return Err(KvError::invalid_argument(format!(
                    "fragment in endpoint unsupported: {endpoint}"
                )));
            }
            let authority = parsed
                .host_str()
                .ok_or_else(|| {
                    KvError::invalid_argument(format!("endpoint {endpoint} has no host"))
                })?
                .to_string();
            let authority = match parsed.port() {
                Some(port) => format!("{authority}:{port}"),
                None => authority,
            };
            let host = config.host.clone().unwrap_or(authority);
            let region = config.aws_region.clone().unwrap_or_default();
            return Ok((endpoint.trim_end_matches('/').to_string(), host, region));
        }

        if let Some(region) = config.aws_region.clone().filter(|r| !r.is_empty()) {
            let host = format!("{}.s3.{}{}", config.bucket, region, DOT_AMAZONAWS_COM);
            return Ok((format!("https://{host}"), host, region));
        }

        // no endpoint and no region: ask AWS which region holds the bucket
        let probe_url = format!("https://{}.s3{}", config.bucket, DOT_AMAZONAWS_COM);
        let request = HttpRequest {
            method: "HEAD",
            url: probe_url,
            headers: Vec::new(),
            body: Bytes::new(),
        };
        let response = transport.issue(request).await.map_err(KvError::from)?;
        let Some(region) = response.header(BUCKET_REGION_HEADER) else {
            return Err(KvError::failed_precondition(format!(
                "bucket {} does not exist",
                config.bucket
            )));
        };
        let region = region.to_string();
        let host = format!("{}.s3.{}{}", config.bucket, region, DOT_AMAZONAWS_COM);
        Ok((format!("https://{host}"), host, region))
    }

    pub fn bucket_name(&self) -> &str {
        &self.inner.config.bucket
    }

    pub fn endpoint(&self) -> &str {
        &self.inner.endpoint
    }

    pub fn aws_region(&self) -> &str {
        &self.inner.aws_region
    }

    pub fn is_aws_endpoint(&self) -> bool {
        self.inner.endpoint.ends_with(DOT_AMAZONAWS_COM)
    }

    /// The canonical `s3://` URL for a key in this bucket.
    pub fn to_url(&self, key: &str) -> String {
        s3_url(&self.inner.config.bucket, key)
    }

    pub(crate) fn object_url(&self, encoded_key: &str) -> String {
        format!("{}/{}", self.inner.endpoint, encoded_key)
    }

    /// Reads a key, optionally restricted to a byte range and guarded by
    /// generation preconditions. Precondition failures are not errors; they
    /// come back as `ReadState::Unspecified`.
    pub async fn read(&self, key: &str, options: ReadOptions) -> KvResult<ReadResult> {
        self.inner.metrics.inc_reads();
        if !is_valid_object_key(key) {
            return Err(KvError::invalid_argument("invalid S3 object name"));
        }
        options.byte_range.check()?;
        let read_url = self.object_url(&uri_encode_key(key));
        read::ReadTask::new(self.clone(), read_url, options).run().await
    }

    /// Writes a key (`value = Some`) or deletes it (`value = None`),
    /// optionally conditioned on the current generation. A violated
    /// precondition comes back as `Generation::Unknown`, not as an error.
    pub async fn write(
        &self,
        key: &str,
        value: Option<Bytes>,
        options: WriteOptions,
    ) -> KvResult<TimestampedGeneration> {
        self.inner.metrics.inc_writes();
        if !is_valid_object_key(key) {
            return Err(KvError::invalid_argument("invalid S3 object name"));
        }
        let encoded_key = uri_encode_key(key);
        match value {
            Some(value) => {
                write::WriteTask::new(self.clone(), encoded_key, value, options)
                    .run()
                    .await
            }
            None => {
                let resource = self.object_url(&encoded_key);
                write::DeleteTask::new(self.clone(), resource, options)
                    .run()
                    .await
            }
        }
    }

    /// Deletes one key; shorthand for `write(key, None, options)`.
    pub async fn delete(
        &self,
        key: &str,
        options: WriteOptions,
    ) -> KvResult<TimestampedGeneration> {
        self.write(key, None, options).await
    }

    /// Streams the keys in `options.range` into `receiver`, in lexicographic
    /// order, across however many list pages it takes. Must be called from
    /// within a Tokio runtime.
    pub fn list<R: ListReceiver>(&self, options: ListOptions, mut receiver: R) {
        self.inner.metrics.inc_lists();
        if options.range.is_empty() {
            receiver.set_starting(Box::new(|| {}));
            receiver.set_done();
            receiver.set_stopping();
            return;
        }
        let task = ListTask::new(self.clone(), options, receiver);
        tokio::spawn(task.run());
    }

    /// Deletes every key in `range` by listing it and fanning the keys out
    /// to unconditional deletes.
    pub async fn delete_range(&self, range: KeyRange) -> KvResult<()> {
        self.inner.metrics.inc_delete_ranges();
        if range.is_empty() {
            return Ok(());
        }
        delete_range::delete_range_impl(self, range).await
    }

    /// Applies the shared retry policy after a failed attempt: sleeps for
    /// the backoff delay, or fails with `Aborted` once the budget is spent.
    pub(crate) async fn backoff_and_retry(&self, status: KvError, attempt: u32) -> KvResult<()> {
        let retries = &self.inner.config.retries;
        if attempt >= retries.max_retries {
            return Err(KvError::aborted(attempt, status));
        }
        self.inner.metrics.inc_retries();
        let delay =
            retry::backoff_for_attempt(attempt, retries.initial_delay(), retries.max_delay());
        warn!(attempt, delay_ms = delay.as_millis() as u64, error = %status, "retrying after backoff");
        tokio::time::sleep(delay).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let config = S3Config::new("bucket");
        assert_eq!(config.profile, "default");
        assert!(!config.requester_pays);
        assert_eq!(config.request_concurrency, 32);
        assert!(config.rate_limit.is_none());
        assert_eq!(config.retries.max_retries, 32);
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let config: S3Config = serde_json::from_str(r#"{"bucket":"my-bucket"}"#).unwrap();
        assert_eq!(config.bucket, "my-bucket");
        assert_eq!(config.profile, "default");
        assert_eq!(config.retries, RetryConfig::default());

        let config: S3Config = serde_json::from_str(
            r#"{
                "bucket": "my-bucket",
                "requester_pays": true,
                "endpoint": "http://localhost:9000",
                "aws_region": "eu-west-1",
                "rate_limit": {"read_per_second": 100, "write_per_second": 50},
                "retries": {"max_retries": 5, "initial_delay_ms": 10, "max_delay_ms": 100}
            }"#,
        )
        .unwrap();
        assert!(config.requester_pays);
        assert_eq!(config.endpoint.as_deref(), Some("http://localhost:9000"));
        assert_eq!(config.rate_limit.unwrap().read_per_second, 100);
        assert_eq!(config.retries.max_retries, 5);
    }
}
