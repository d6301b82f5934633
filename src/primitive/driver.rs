//! Execution driver: split the flat element range across workers and call
//! the kernel once per partition.
//!
//! Partitions are whole 64-byte grains (`64 / sizeof(elem)` elements), so the
//! split does not depend on the kernel's vector length. Pointers cross the
//! rayon boundary as addresses; every worker touches a disjoint range.

use std::ops::Range;

use rayon::prelude::*;

use crate::compiler::{JitKernel, KernelArgs};
use crate::types::{DType, JitResult};

/// Driver-side partition granularity in bytes.
pub const GRAIN_BYTES: usize = 64;

/// Split `n` work items over `team` workers; returns worker `tid`'s range.
///
/// The first `n - (ceil(n/team) - 1) * team` workers take one item more than
/// the rest.
pub fn balance211(n: usize, team: usize, tid: usize) -> (usize, usize) {
    if team <= 1 || n == 0 {
        return (0, n);
    }
    let n1 = n.div_ceil(team);
    let n2 = n1 - 1;
    let t1 = n - n2 * team;
    let start = if tid <= t1 { tid * n1 } else { t1 * n1 + (tid - t1) * n2 };
    let len = if tid < t1 { n1 } else { n2 };
    (start, start + len)
}

/// Elements per partition grain for `dtype`.
pub fn grain_elems(dtype: DType) -> usize {
    GRAIN_BYTES / dtype.size_bytes()
}

/// Element range of worker `ithr`, clamped to `nelems`.
pub fn partition(nelems: usize, dtype: DType, nthr: usize, ithr: usize) -> Range<usize> {
    let grain = grain_elems(dtype);
    let (start, end) = balance211(nelems.div_ceil(grain), nthr, ithr);
    (start * grain).min(nelems)..(end * grain).min(nelems)
}

/// Base addresses of one execution, already advanced by each tensor's
/// `offset0`.
#[derive(Debug, Clone, Copy)]
pub struct Bases {
    pub src: usize,
    pub dst: usize,
    /// Zero for forward.
    pub diff_dst: usize,
}

/// Run `kernel` over `nelems` elements starting at `bases` using `nthr`
/// partitions.
///
/// # Safety
/// Every base must address at least `nelems` valid elements of `dtype`;
/// `dst` must be writable. `dst` may alias `src` or `diff_dst` exactly.
pub unsafe fn run(kernel: &JitKernel, bases: Bases, nelems: usize, dtype: DType, nthr: usize) -> JitResult<()> {
    if nelems == 0 {
        return Ok(());
    }
    let nthr = nthr.max(1);
    let esize = dtype.size_bytes();

    let call = |ithr: usize| -> JitResult<()> {
        let r = partition(nelems, dtype, nthr, ithr);
        if r.is_empty() {
            return Ok(());
        }
        let at = |base: usize| -> usize {
            if base == 0 {
                0
            } else {
                base + r.start * esize
            }
        };
        let args = KernelArgs {
            src: at(bases.src) as *const _,
            dst: at(bases.dst) as *mut _,
            diff_dst: at(bases.diff_dst) as *const _,
            work_amount: r.len(),
        };
        // SAFETY: the range lies inside the caller-validated buffers and
        // partitions are disjoint.
        unsafe { kernel.call(&args) }
    };

    if nthr == 1 {
        log::trace!("eltwise driver: {nelems} elements on the calling thread");
        return call(0);
    }
    log::trace!("eltwise driver: {nelems} elements over {nthr} partitions");
    (0..nthr).into_par_iter().try_for_each(call)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_balance211_covers_range() {
        for n in [0usize, 1, 5, 16, 17, 100] {
            for team in 1..9 {
                let mut next = 0;
                for tid in 0..team {
                    let (s, e) = balance211(n, team, tid);
                    assert_eq!(s, next, "n={n} team={team} tid={tid}");
                    assert!(e >= s);
                    next = e;
                }
                assert_eq!(next, n);
            }
        }
    }

    #[test]
    fn test_balance211_sizes() {
        // 10 items over 4 workers: 3,3,2,2
        let sizes: Vec<usize> = (0..4)
            .map(|t| {
                let (s, e) = balance211(10, 4, t);
                e - s
            })
            .collect();
        assert_eq!(sizes, vec![3, 3, 2, 2]);
    }

    #[test]
    fn test_partition_grain_and_clamp() {
        assert_eq!(grain_elems(DType::F32), 16);
        assert_eq!(grain_elems(DType::BF16), 32);
        // 1000 f32 = 63 grains over 7 workers: 9 each
        assert_eq!(partition(1000, DType::F32, 7, 0), 0..144);
        assert_eq!(partition(1000, DType::F32, 7, 6), 864..1000);
        // more workers than grains leaves trailing partitions empty
        assert!(partition(20, DType::F32, 4, 3).is_empty());
        assert_eq!(partition(20, DType::F32, 4, 1), 16..20);
    }
}
