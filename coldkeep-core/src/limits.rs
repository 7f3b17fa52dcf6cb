//! System limits and defaults.
//!
//! Following `TigerStyle`: put limits on everything.
//! Every buffer, batch and control loop has an explicit maximum.

/// Leaf size of the archival tree hash (1 MiB).
pub const TREE_HASH_CHUNK_BYTES: usize = 1024 * 1024;

/// Size of a single read from a capture stream.
pub const STREAM_CHUNK_BYTES: usize = 64 * 1024;

/// Default in-memory buffer per fan-out branch.
pub const FANOUT_BUFFER_BYTES_DEFAULT: usize = 4 * 1024 * 1024;

/// Part size for streaming multipart uploads to the hot tier.
///
/// S3 requires every part except the last to be at least 5 MiB.
pub const MULTIPART_PART_BYTES: usize = 8 * 1024 * 1024;

/// Maximum number of keys removed by one batch delete request.
pub const DELETE_BATCH_MAX: usize = 1000;

/// Default upper bound on capacity monitor passes.
pub const MONITOR_ITERATIONS_MAX_DEFAULT: u32 = 10;

/// Default pause between capacity monitor passes, in seconds.
pub const MONITOR_PAUSE_SECS_DEFAULT: u64 = 5;

/// File name prefix of scratch files staged for cold-tier uploads.
pub const SCRATCH_PREFIX: &str = "coldkeep-scratch-";

/// Age after which an untouched scratch file is considered abandoned, in
/// seconds. Younger files may belong to a concurrent invocation.
pub const SCRATCH_STALE_AFTER_SECS: u64 = 24 * 60 * 60;

/// Default number of archive bytes compressed by the sample estimator.
pub const SAMPLE_BYTES_DEFAULT: u64 = 64 * 1024 * 1024;

/// Archive header overhead added per file by the heuristic estimator.
pub const ARCHIVE_HEADER_BYTES_PER_FILE: u64 = 512;

/// Number of bytes in one gigabyte, as used for cost figures.
pub const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;
