//! Local disk usage accounting.
//!
//! The counter is split in two: `committed` tracks the sum of `size_bytes`
//! over locally present images, `in_flight` the reservations of writes that
//! have not yet committed. It is never recomputed from the filesystem on the
//! request path; reconciliation resets the committed part from metadata.

use crate::metrics;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default, Clone, Copy)]
struct Usage {
    committed: u64,
    in_flight: u64,
}

impl Usage {
    fn total(&self) -> u64 {
        self.committed.saturating_add(self.in_flight)
    }
}

#[derive(Debug, Default)]
pub struct UsageAccountant {
    usage: Mutex<Usage>,
    // Mirror of `usage.total()` for lock-free reads.
    used: AtomicU64,
}

impl UsageAccountant {
    pub fn new(initial: u64) -> Self {
        metrics::LOCAL_USAGE_BYTES.set(gauge_value(initial));
        Self {
            usage: Mutex::new(Usage {
                committed: initial,
                in_flight: 0,
            }),
            used: AtomicU64::new(initial),
        }
    }

    /// Bytes currently accounted for, reservations included.
    pub fn current(&self) -> u64 {
        self.used.load(Ordering::Acquire)
    }

    /// Bytes held by reservations that have not committed.
    pub fn in_flight(&self) -> u64 {
        self.lock().in_flight
    }

    /// Reserve `size` bytes if the result stays within `limit`.
    ///
    /// On failure returns the usage observed at the time of the check.
    pub fn try_reserve(self: &Arc<Self>, size: u64, limit: Option<u64>) -> Result<Reservation, u64> {
        let mut usage = self.lock();
        let used = usage.total();
        let next = used.checked_add(size).ok_or(used)?;
        if let Some(limit) = limit
            && next > limit
        {
            return Err(used);
        }
        usage.in_flight += size;
        self.publish(&usage);
        drop(usage);

        Ok(Reservation {
            accountant: Arc::clone(self),
            size,
            committed: false,
        })
    }

    /// Return `size` committed bytes to the pool.
    pub fn release(&self, size: u64) {
        let mut usage = self.lock();
        usage.committed = usage.committed.saturating_sub(size);
        self.publish(&usage);
    }

    /// Overwrite the committed total with a freshly computed one. Bytes held
    /// by open reservations stay accounted.
    pub fn reset(&self, committed: u64) {
        let mut usage = self.lock();
        usage.committed = committed;
        self.publish(&usage);
    }

    fn settle(&self, size: u64, keep: bool) {
        let mut usage = self.lock();
        usage.in_flight = usage.in_flight.saturating_sub(size);
        if keep {
            usage.committed = usage.committed.saturating_add(size);
        }
        self.publish(&usage);
    }

    fn lock(&self) -> MutexGuard<'_, Usage> {
        self.usage.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, usage: &Usage) {
        let total = usage.total();
        self.used.store(total, Ordering::Release);
        metrics::LOCAL_USAGE_BYTES.set(gauge_value(total));
    }
}

fn gauge_value(bytes: u64) -> i64 {
    i64::try_from(bytes).unwrap_or(i64::MAX)
}

/// Bytes held against the usage counter.
///
/// Dropping an uncommitted reservation releases it, so a failed or
/// abandoned write never leaks accounted space.
#[derive(Debug)]
#[must_use = "dropping a reservation releases it"]
pub struct Reservation {
    accountant: Arc<UsageAccountant>,
    size: u64,
    committed: bool,
}

impl Reservation {
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Keep the bytes accounted; they now belong to a locally present image.
    pub fn commit(mut self) {
        self.committed = true;
        self.accountant.settle(self.size, true);
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if !self.committed {
            self.accountant.settle(self.size, false);
        }
    }
}
