//! Process-wide performance tuning
//!
//! Small set of global knobs consulted by the multiplication engine. All of
//! them are atomics: loads on the hot path are relaxed, stores are
//! sequentially consistent, so the knobs are safe to read and modify from
//! any thread at any time. Each knob has a get/set/reset triple; none of
//! them affects results, only performance.

#![forbid(unsafe_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Rejected tuning values.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TuningError {
    /// Multiplication block size outside the accepted window.
    #[error("invalid multiplication block size {0} (accepted range [{MIN_BLOCK_SIZE}, {MAX_BLOCK_SIZE}])")]
    BadBlockSize(usize),
    /// Zero is not a usable thread count.
    #[error("thread count must be at least 1")]
    BadThreadCount,
    /// Zero is not a usable work threshold.
    #[error("minimum work per thread must be at least 1")]
    BadMinWork,
}

/// Smallest accepted multiplication block size.
pub const MIN_BLOCK_SIZE: usize = 16;
/// Largest accepted multiplication block size.
pub const MAX_BLOCK_SIZE: usize = 4096;

const DEFAULT_BLOCK_SIZE: usize = 256;
const DEFAULT_THREAD_COUNT: usize = 1;
const DEFAULT_MIN_WORK_PER_THREAD: usize = 50_000;

static MULT_BLOCK_SIZE: AtomicUsize = AtomicUsize::new(DEFAULT_BLOCK_SIZE);
static THREAD_COUNT: AtomicUsize = AtomicUsize::new(DEFAULT_THREAD_COUNT);
static MIN_WORK_PER_THREAD: AtomicUsize = AtomicUsize::new(DEFAULT_MIN_WORK_PER_THREAD);
static PARALLEL_MEMORY_SET: AtomicBool = AtomicBool::new(true);
static THREAD_BINDING: AtomicBool = AtomicBool::new(false);

/// Block size used by the cache-blocked multiplication loops.
///
/// Larger blocks have less loop overhead, smaller blocks keep the working
/// set of term pointers and destination buckets hotter. Default 256.
#[inline]
pub fn get_multiplication_block_size() -> usize {
    MULT_BLOCK_SIZE.load(Ordering::Relaxed)
}

/// Set the multiplication block size; accepted range `[16, 4096]`.
pub fn set_multiplication_block_size(size: usize) -> Result<(), TuningError> {
    if !(MIN_BLOCK_SIZE..=MAX_BLOCK_SIZE).contains(&size) {
        return Err(TuningError::BadBlockSize(size));
    }
    MULT_BLOCK_SIZE.store(size, Ordering::SeqCst);
    Ok(())
}

/// Restore the default multiplication block size.
pub fn reset_multiplication_block_size() {
    MULT_BLOCK_SIZE.store(DEFAULT_BLOCK_SIZE, Ordering::SeqCst);
}

/// Number of worker threads a single multiplication may fan out to.
#[inline]
pub fn get_thread_count() -> usize {
    THREAD_COUNT.load(Ordering::Relaxed)
}

/// Set the multiplication thread count (at least 1).
pub fn set_thread_count(n: usize) -> Result<(), TuningError> {
    if n == 0 {
        return Err(TuningError::BadThreadCount);
    }
    THREAD_COUNT.store(n, Ordering::SeqCst);
    Ok(())
}

/// Restore the default (single-threaded) thread count.
pub fn reset_thread_count() {
    THREAD_COUNT.store(DEFAULT_THREAD_COUNT, Ordering::SeqCst);
}

/// Minimum number of term-by-term products each worker must receive before
/// a multiplication is split across threads at all.
#[inline]
pub fn get_min_work_per_thread() -> usize {
    MIN_WORK_PER_THREAD.load(Ordering::Relaxed)
}

/// Set the minimum work-per-thread threshold (at least 1).
pub fn set_min_work_per_thread(n: usize) -> Result<(), TuningError> {
    if n == 0 {
        return Err(TuningError::BadMinWork);
    }
    MIN_WORK_PER_THREAD.store(n, Ordering::SeqCst);
    Ok(())
}

/// Restore the default work-per-thread threshold.
pub fn reset_min_work_per_thread() {
    MIN_WORK_PER_THREAD.store(DEFAULT_MIN_WORK_PER_THREAD, Ordering::SeqCst);
}

/// Whether large fresh bucket arrays are zero-initialised by several threads.
///
/// Helps on machines with multiple memory buses, can hurt on small ones.
/// Default on.
#[inline]
pub fn get_parallel_memory_set() -> bool {
    PARALLEL_MEMORY_SET.load(Ordering::Relaxed)
}

/// Toggle parallel initialisation of large memory areas.
pub fn set_parallel_memory_set(flag: bool) {
    PARALLEL_MEMORY_SET.store(flag, Ordering::SeqCst);
}

/// Restore the default parallel-memory-set flag.
pub fn reset_parallel_memory_set() {
    PARALLEL_MEMORY_SET.store(true, Ordering::SeqCst);
}

/// Advisory thread-to-core binding flag. Stored and queryable process-wide;
/// honoured only by thread pools that support pinning.
#[inline]
pub fn get_thread_binding() -> bool {
    THREAD_BINDING.load(Ordering::Relaxed)
}

/// Set the advisory thread-binding flag.
pub fn set_thread_binding(flag: bool) {
    THREAD_BINDING.store(flag, Ordering::SeqCst);
}

/// Restore the default thread-binding flag.
pub fn reset_thread_binding() {
    THREAD_BINDING.store(false, Ordering::SeqCst);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_size_window() {
        assert_eq!(get_multiplication_block_size(), 256);
        assert!(set_multiplication_block_size(15).is_err());
        assert!(set_multiplication_block_size(4097).is_err());
        set_multiplication_block_size(16).unwrap();
        assert_eq!(get_multiplication_block_size(), 16);
        set_multiplication_block_size(4096).unwrap();
        assert_eq!(get_multiplication_block_size(), 4096);
        reset_multiplication_block_size();
        assert_eq!(get_multiplication_block_size(), 256);
    }

    #[test]
    fn thread_count_and_min_work() {
        assert!(set_thread_count(0).is_err());
        set_thread_count(4).unwrap();
        assert_eq!(get_thread_count(), 4);
        reset_thread_count();
        assert_eq!(get_thread_count(), 1);

        assert!(set_min_work_per_thread(0).is_err());
        set_min_work_per_thread(10).unwrap();
        assert_eq!(get_min_work_per_thread(), 10);
        reset_min_work_per_thread();
    }

    #[test]
    fn boolean_flags() {
        assert!(get_parallel_memory_set());
        set_parallel_memory_set(false);
        assert!(!get_parallel_memory_set());
        reset_parallel_memory_set();

        assert!(!get_thread_binding());
        set_thread_binding(true);
        assert!(get_thread_binding());
        reset_thread_binding();
    }
}
