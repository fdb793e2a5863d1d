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

use std::num::NonZeroU32;

use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::prelude::*;

/// Request-pacing capability. Distinct from the admission queue, which caps
/// in-flight requests rather than request rate.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Waits until the limiter admits one request.
    async fn admit(&self);
}

/// Pass-through limiter used when no rate limit is configured.
#[derive(Debug, Default)]
pub struct NoRateLimiter;

#[async_trait]
impl RateLimiter for NoRateLimiter {
    async fn admit(&self) {}
}

/// Token-bucket limiter over a requests-per-second quota.
pub struct TokenBucketLimiter {
    limiter: DefaultDirectRateLimiter,
}

impl TokenBucketLimiter {
    pub fn per_second(rate: NonZeroU32) -> Self {
        Self {
            limiter: governor::RateLimiter::direct(Quota::per_second(rate)),
        }
    }
}

#[async_trait]
impl RateLimiter for TokenBucketLimiter {
    async fn admit(&self) {
        self.limiter.until_ready().await;
    }
}

/// Bounded in-flight gate. A task holds its [`AdmissionPermit`] for the
/// whole of its network activity; dropping the permit releases the slot.
#[derive(Clone)]
pub struct AdmissionQueue {
    permits: Arc<Semaphore>,
}

impl AdmissionQueue {
    pub fn new(limit: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(limit)),
        }
    }

    pub async fn admit(&self) -> AdmissionPermit {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .expect("admission queue semaphore is never closed");
        AdmissionPermit { _permit: permit }
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}

pub struct AdmissionPermit {
    _permit: OwnedSemaphorePermit,
}
