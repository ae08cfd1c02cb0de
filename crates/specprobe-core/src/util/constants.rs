
/// Cache line size (64 bytes) for x86_64
pub const CL_SIZE: usize = 64;

/// Number of logical slots in the observable array
pub const OBSERVABLE_SIZE: usize = 256;
/// Distance between two logical slots, in `u32` elements (16 KiB)
pub const OBSERVABLE_STRIDE: usize = 4096;

/// Number of `u32` elements in the flush buffer (8 MB)
pub const FLUSH_SIZE: usize = 2_000_000;
/// Index after which the flush sweep starts the secondary touch
pub const FLUSH_OFFSET: usize = 4096;

/// Size of the unrestricted region of the data store
pub const UNRESTRICTED_SIZE: usize = 10;
/// Size of the restricted region of the data store
pub const RESTRICTED_SIZE: usize = 10;

/// Number of lowest-latency slots surfaced by a report
pub const LOWEST_K: usize = 3;
