//! Prometheus metrics for the image cache.

use prometheus::{
    HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
};
use std::sync::{LazyLock, Once};

/// Global Prometheus registry for all metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// Write path
pub static IMAGES_STORED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "picvault_images_stored_total",
        "Total number of images written to the local tier",
    )
    .expect("metric creation failed")
});

pub static BYTES_STORED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "picvault_bytes_stored_total",
        "Total bytes written to the local tier by Put",
    )
    .expect("metric creation failed")
});

// Read path
pub static CACHE_HITS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new("picvault_cache_hits_total", "Reads served, by tier"),
        &["tier"],
    )
    .expect("metric creation failed")
});

pub static CACHE_MISSES: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "picvault_cache_misses_total",
        "Reads that found no servable copy",
    )
    .expect("metric creation failed")
});

pub static REPOPULATIONS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "picvault_local_repopulations_total",
            "Local repopulation attempts after a remote read, by outcome",
        ),
        &["outcome"],
    )
    .expect("metric creation failed")
});

pub static CHECKSUM_MISMATCHES: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "picvault_remote_checksum_mismatches_total",
        "Remote reads rejected because the bytes did not match the stored checksum",
    )
    .expect("metric creation failed")
});

// Archival
pub static ARCHIVE_UPLOADS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "picvault_archive_uploads_total",
            "Archive upload attempts, by outcome",
        ),
        &["outcome"],
    )
    .expect("metric creation failed")
});

pub static ARCHIVE_QUEUE_DEPTH: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "picvault_archive_queue_depth",
        "Archive jobs waiting for a worker",
    )
    .expect("metric creation failed")
});

// Eviction
pub static EVICTIONS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "picvault_evictions_total",
            "Local copies removed, by reason",
        ),
        &["reason"],
    )
    .expect("metric creation failed")
});

pub static BYTES_EVICTED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "picvault_bytes_evicted_total",
            "Local bytes released, by reason",
        ),
        &["reason"],
    )
    .expect("metric creation failed")
});

pub static RECORDS_PURGED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "picvault_records_purged_total",
        "Metadata records removed by the retention sweep",
    )
    .expect("metric creation failed")
});

pub static LOCAL_USAGE_BYTES: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "picvault_local_usage_bytes",
        "Bytes accounted to the local tier",
    )
    .expect("metric creation failed")
});

pub static SWEEP_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "picvault_sweep_duration_seconds",
            "Janitor sweep duration by sweep type",
        )
        .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 300.0]),
        &["sweep"],
    )
    .expect("metric creation failed")
});

/// Guard to ensure metrics are only registered once.
static REGISTER_ONCE: Once = Once::new();

/// Register all metrics with the global registry.
///
/// Idempotent, so tests and embedders may call it freely.
pub fn register_metrics() {
    REGISTER_ONCE.call_once(|| {
        REGISTRY
            .register(Box::new(IMAGES_STORED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(BYTES_STORED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(CACHE_HITS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(CACHE_MISSES.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(REPOPULATIONS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(CHECKSUM_MISMATCHES.clone()))
            .expect("metric registration failed");

        REGISTRY
            .register(Box::new(ARCHIVE_UPLOADS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(ARCHIVE_QUEUE_DEPTH.clone()))
            .expect("metric registration failed");

        REGISTRY
            .register(Box::new(EVICTIONS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(BYTES_EVICTED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(RECORDS_PURGED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(LOCAL_USAGE_BYTES.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(SWEEP_DURATION.clone()))
            .expect("metric registration failed");
    });
}

/// Record an archive upload outcome.
pub fn record_archive_outcome(outcome: &str) {
    ARCHIVE_UPLOADS.with_label_values(&[outcome]).inc();
}

/// Record a local eviction.
pub fn record_eviction(reason: &str, bytes: u64) {
    EVICTIONS.with_label_values(&[reason]).inc();
    BYTES_EVICTED.with_label_values(&[reason]).inc_by(bytes);
}
