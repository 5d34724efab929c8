//! Centralized default constants for reverie.
//!
//! **This module is the single source of truth** for all shared default
//! values. Other crates reference these constants instead of defining their
//! own magic numbers.

// =============================================================================
// POLLING
// =============================================================================

/// Seconds between poll cycles over the outstanding handle set.
pub const POLL_INTERVAL_SECS: u64 = 10;

/// Wall-clock deadline for the entire poll phase (1 hour).
pub const BATCH_DEADLINE_SECS: u64 = 3600;

// =============================================================================
// SUBMISSION
// =============================================================================

/// Maximum concurrent submission processes. Each submission is a blocking
/// out-of-process call, so the pool size is fixed regardless of batch size.
pub const SUBMIT_MAX_CONCURRENT: usize = 10;

/// Timeout for a single submission command invocation.
pub const SUBMIT_TIMEOUT_SECS: u64 = 120;

// =============================================================================
// RESULT STORE
// =============================================================================

/// Default Redis connection URL.
pub const REDIS_URL: &str = "redis://localhost:6379";

/// Key prefix used by the queue for job records.
pub const RESULT_KEY_PREFIX: &str = "bull";

/// Hash field holding the completion payload once a job finishes.
pub const RESULT_FIELD: &str = "returnvalue";

// =============================================================================
// FINGERPRINTS
// =============================================================================

/// Hex characters kept from the SHA-256 digest for a job fingerprint.
pub const FINGERPRINT_WIDTH: usize = 16;

/// Marker wrapping a fingerprint inside clip metadata: `[bfp:<hex>]`.
pub const FINGERPRINT_MARKER: &str = "bfp";

// =============================================================================
// ARTIFACT TRANSFER
// =============================================================================

/// Timeout for downloading a finished artifact.
pub const DOWNLOAD_TIMEOUT_SECS: u64 = 300;

/// Page size when listing playlist items for the dedup ledger.
pub const LEDGER_PAGE_SIZE: i64 = 100;
