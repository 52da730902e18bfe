//! Admission control: bounded, non-blocking concurrency pools per operation class.
//!
//! Upload and Download share the transfer pool, List has its own listing pool,
//! and everything else runs unrestricted. A request that finds its pool full
//! is rejected immediately instead of queueing.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, RwLock, RwLockWriteGuard};

use serde::{Deserialize, Serialize};
use stashconf::AdmissionConfig;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

pub const DEFAULT_TRANSFER_LIMIT: usize = 10;
pub const DEFAULT_LISTING_LIMIT: usize = 100;

/// Which admission pool an operation draws from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationClass {
    Transfer,
    Listing,
    Unrestricted,
}

impl OperationClass {
    pub fn classify(operation: &str) -> Self {
        match operation {
            "Upload" | "Download" => OperationClass::Transfer,
            "List" => OperationClass::Listing,
            _ => OperationClass::Unrestricted,
        }
    }
}

impl fmt::Display for OperationClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OperationClass::Transfer => "Upload/Download",
            OperationClass::Listing => "List",
            OperationClass::Unrestricted => "unrestricted",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdmissionError {
    #[error("too many concurrent {class} requests (limit {limit})")]
    TooManyConcurrentRequests { class: OperationClass, limit: usize },

    #[error("request cancelled before admission")]
    Cancelled,
}

#[derive(Debug, Default)]
struct PoolCounters {
    active: usize,
    total: u64,
}

#[derive(Debug, Default)]
struct Counters {
    transfer: PoolCounters,
    listing: PoolCounters,
}

impl Counters {
    fn pool_mut(&mut self, class: OperationClass) -> Option<&mut PoolCounters> {
        match class {
            OperationClass::Transfer => Some(&mut self.transfer),
            OperationClass::Listing => Some(&mut self.listing),
            OperationClass::Unrestricted => None,
        }
    }
}

fn write_counters(counters: &RwLock<Counters>) -> RwLockWriteGuard<'_, Counters> {
    // Counter updates can't panic mid-way, so a poisoned lock still holds
    // consistent numbers.
    counters.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Point-in-time admission statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConcurrencySnapshot {
    pub transfer_active: usize,
    pub listing_active: usize,
    pub transfer_total: u64,
    pub listing_total: u64,
    pub transfer_limit: usize,
    pub listing_limit: usize,
}

impl fmt::Display for ConcurrencySnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Upload/Download: {}/{} active, {} total | List: {}/{} active, {} total",
            self.transfer_active,
            self.transfer_limit,
            self.transfer_total,
            self.listing_active,
            self.listing_limit,
            self.listing_total,
        )
    }
}

/// Holds an admission slot. Dropping it releases the slot.
#[derive(Debug)]
pub struct AdmissionPermit {
    class: OperationClass,
    counters: Option<Arc<RwLock<Counters>>>,
    // Released after the counters are updated in Drop, so `active` never
    // reads above the limit.
    _permit: Option<OwnedSemaphorePermit>,
}

impl AdmissionPermit {
    fn unrestricted() -> Self {
        Self {
            class: OperationClass::Unrestricted,
            counters: None,
            _permit: None,
        }
    }

    pub fn class(&self) -> OperationClass {
        self.class
    }
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        if let Some(counters) = self.counters.take() {
            let mut counters = write_counters(&counters);
            if let Some(pool) = counters.pool_mut(self.class) {
                pool.active = pool.active.saturating_sub(1);
            }
        }
    }
}

/// Per-server admission pools and their statistics.
#[derive(Debug, Clone)]
pub struct AdmissionController {
    transfer: Arc<Semaphore>,
    listing: Arc<Semaphore>,
    transfer_limit: usize,
    listing_limit: usize,
    counters: Arc<RwLock<Counters>>,
}

impl Default for AdmissionController {
    fn default() -> Self {
        Self::new(DEFAULT_TRANSFER_LIMIT, DEFAULT_LISTING_LIMIT)
    }
}

impl AdmissionController {
    pub fn new(transfer_limit: usize, listing_limit: usize) -> Self {
        Self {
            transfer: Arc::new(Semaphore::new(transfer_limit)),
            listing: Arc::new(Semaphore::new(listing_limit)),
            transfer_limit,
            listing_limit,
            counters: Arc::new(RwLock::new(Counters::default())),
        }
    }

    pub fn from_config(config: &AdmissionConfig) -> Self {
        Self::new(config.transfer_limit, config.listing_limit)
    }

    /// Take a slot for `class` without waiting.
    ///
    /// A free slot always wins. With the pool full, a fired `cancel` reports
    /// `Cancelled`, otherwise the caller is told the pool is exhausted.
    pub fn try_admit(
        &self,
        class: OperationClass,
        cancel: &CancellationToken,
    ) -> Result<AdmissionPermit, AdmissionError> {
        let (semaphore, limit) = match class {
            OperationClass::Transfer => (&self.transfer, self.transfer_limit),
            OperationClass::Listing => (&self.listing, self.listing_limit),
            OperationClass::Unrestricted => return Ok(AdmissionPermit::unrestricted()),
        };

        match semaphore.clone().try_acquire_owned() {
            Ok(permit) => {
                let mut counters = write_counters(&self.counters);
                if let Some(pool) = counters.pool_mut(class) {
                    pool.active += 1;
                    pool.total += 1;
                }
                Ok(AdmissionPermit {
                    class,
                    counters: Some(self.counters.clone()),
                    _permit: Some(permit),
                })
            }
            Err(_) if cancel.is_cancelled() => {
                tracing::debug!(admission.class = %class, "Cancelled while pool full");
                Err(AdmissionError::Cancelled)
            }
            Err(_) => {
                tracing::debug!(admission.class = %class, admission.limit = limit, "Rejected: pool full");
                Err(AdmissionError::TooManyConcurrentRequests { class, limit })
            }
        }
    }

    /// Run `body` while holding a slot for `class`.
    ///
    /// The slot is released however `body` ends: success, error, panic, or
    /// the returned future being dropped.
    pub async fn admit<F, T, E>(
        &self,
        class: OperationClass,
        cancel: &CancellationToken,
        body: F,
    ) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: From<AdmissionError>,
    {
        let _permit = self.try_admit(class, cancel)?;
        body.await
    }

    pub fn stats(&self) -> ConcurrencySnapshot {
        let counters = self
            .counters
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        ConcurrencySnapshot {
            transfer_active: counters.transfer.active,
            listing_active: counters.listing.active,
            transfer_total: counters.transfer.total,
            listing_total: counters.listing.total,
            transfer_limit: self.transfer_limit,
            listing_limit: self.listing_limit,
        }
    }
}
