//! Parallel-for hook.
//!
//! There is no worker pool: a region runs its body on the calling thread.
//! A process-wide flag marks an active region so a nested `parallel_for`
//! never tries to fan out again and simply runs inline.

use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};

use log::trace;

static IN_PARALLEL_REGION: AtomicBool = AtomicBool::new(false);

struct RegionGuard;

impl Drop for RegionGuard {
    fn drop(&mut self) {
        IN_PARALLEL_REGION.store(false, Ordering::Release);
    }
}

/// Whether some thread is currently inside a [`parallel_for`] region.
pub fn in_parallel_region() -> bool {
    IN_PARALLEL_REGION.load(Ordering::Acquire)
}

/// Runs `body` over `range`, handing it stripes of indices.
pub fn parallel_for<F>(range: Range<usize>, mut body: F)
where
    F: FnMut(Range<usize>),
{
    if range.is_empty() {
        return;
    }
    if IN_PARALLEL_REGION.swap(true, Ordering::AcqRel) {
        trace!("nested parallel region over {range:?} runs inline");
        body(range);
        return;
    }
    let _guard = RegionGuard;
    body(range);
}

#[cfg(test)]
mod tests {
    use super::parallel_for;

    #[test]
    fn runs_every_index_once() {
        let mut seen = vec![0u32; 10];
        parallel_for(0..10, |r| {
            for i in r {
                seen[i] += 1;
            }
        });
        assert!(seen.iter().all(|&n| n == 1));
    }

    #[test]
    fn nested_regions_run_inline() {
        let mut inner_calls = 0;
        parallel_for(0..3, |outer| {
            for _ in outer {
                parallel_for(0..2, |r| inner_calls += r.len());
            }
        });
        assert_eq!(inner_calls, 6);
    }

    #[test]
    fn empty_range_skips_body() {
        parallel_for(0..0, |_| panic!("body must not run"));
    }
}
