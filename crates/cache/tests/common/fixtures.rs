use bytes::Bytes;
use picvault_core::RetryPolicy;
use picvault_core::config::CachePolicy;

const PNG_MAGIC: &[u8] = b"\x89PNG\r\n\x1a\n";

/// A `len`-byte PNG-looking payload. `seed` varies the body so images differ.
#[allow(dead_code)]
pub fn png_bytes(len: usize, seed: u8) -> Bytes {
    let mut data = Vec::with_capacity(len);
    data.extend_from_slice(&PNG_MAGIC[..PNG_MAGIC.len().min(len)]);
    let mut i = 0u8;
    while data.len() < len {
        data.push(seed.wrapping_add(i));
        i = i.wrapping_add(1);
    }
    Bytes::from(data)
}

/// Policy used by most tests: one hour TTL, one day retention, no size cap,
/// three attempts starting at one second.
#[allow(dead_code)]
pub fn test_policy() -> CachePolicy {
    CachePolicy {
        local_ttl_hours: 1,
        metadata_retention_days: 1,
        retry: RetryPolicy {
            max_attempts: 3,
            initial_delay_ms: 1_000,
            backoff_factor: 2.0,
            max_delay_ms: 60_000,
        },
        ..CachePolicy::default()
    }
}
