use std::ptr;

use dm_core::{Element, Error, Mat, PlaneIter, Result, validate_mask};
use log::trace;

/// Extrema of an array and where they were first seen.
///
/// `min_idx`/`max_idx` hold one index per axis, or `None` when no element was
/// selected (empty array or all-zero mask); the values are `0.0` then.
#[derive(Debug, Clone, PartialEq)]
pub struct MinMaxIdx {
    pub min_val: f64,
    pub max_val: f64,
    pub min_idx: Option<Vec<usize>>,
    pub max_idx: Option<Vec<usize>>,
}

/// Running extrema; offsets are 1-based flat indices, 0 meaning "not seen".
#[derive(Debug, Clone, Copy)]
struct ScanState {
    min: f64,
    max: f64,
    min_ofs: usize,
    max_ofs: usize,
}

type ScanFn = unsafe fn(src: *const u8, mask: *const u8, len: usize, start: usize, st: &mut ScanState);

unsafe fn scan<T: Element>(src: *const u8, mask: *const u8, len: usize, start: usize, st: &mut ScanState) {
    let src = src.cast::<T>();
    for i in 0..len {
        // SAFETY: `len` values (and `len` mask bytes when non-null).
        unsafe {
            if !mask.is_null() && *mask.add(i) == 0 {
                continue;
            }
            let v = src.add(i).read().to_f64();
            if v < st.min || (st.min_ofs == 0 && v == st.min) {
                st.min = v;
                st.min_ofs = start + i + 1;
            }
            if v > st.max || (st.max_ofs == 0 && v == st.max) {
                st.max = v;
                st.max_ofs = start + i + 1;
            }
        }
    }
}

static SCAN_TABLE: [ScanFn; 8] = [
    scan::<u8>,
    scan::<i8>,
    scan::<u16>,
    scan::<i16>,
    scan::<u32>,
    scan::<i32>,
    scan::<f32>,
    scan::<f64>,
];

fn seed<T: Element>() -> ScanState {
    ScanState {
        min: T::UPPER_BOUND.to_f64(),
        max: T::LOWER_BOUND.to_f64(),
        min_ofs: 0,
        max_ofs: 0,
    }
}

fn run_scan(src: &Mat, mask: Option<&Mat>) -> Result<ScanState> {
    let mut st = dm_core::with_depth!(src.depth(), T => seed::<T>());
    if src.is_empty() {
        return Ok(st);
    }
    let kernel = SCAN_TABLE[src.depth().index()];
    let cn = src.channels();
    let mut ops = vec![src];
    if let Some(m) = mask {
        ops.push(m);
    }
    let it = PlaneIter::new(&ops)?;
    let len = it.plane_len() * cn;
    trace!("min/max scan over {} planes of {len} values", it.plane_count());
    for plane in it {
        let pm = if mask.is_some() { plane.ptr(1).cast_const() } else { ptr::null() };
        // SAFETY: each plane holds `len` values and, with a mask (single
        // channel source only), `len` mask bytes.
        unsafe { kernel(plane.ptr(0), pm, len, plane.index * len, &mut st) };
    }
    Ok(st)
}

fn unravel(flat: usize, shape: &[usize]) -> Vec<usize> {
    let mut idx = vec![0; shape.len()];
    let mut rest = flat;
    for axis in (0..shape.len()).rev() {
        idx[axis] = rest % shape[axis];
        rest /= shape[axis];
    }
    idx
}

/// Smallest and largest value of a single-channel array and their first
/// positions in row-major order.
pub fn min_max_idx(src: &Mat, mask: Option<&Mat>) -> Result<MinMaxIdx> {
    if src.channels() != 1 {
        return Err(Error::TypeMismatch);
    }
    if let Some(m) = mask {
        validate_mask(src, m)?;
    }
    let st = run_scan(src, mask)?;
    let (min_val, min_idx) = match st.min_ofs {
        0 => (0.0, None),
        ofs => (st.min, Some(unravel(ofs - 1, src.size()))),
    };
    let (max_val, max_idx) = match st.max_ofs {
        0 => (0.0, None),
        ofs => (st.max, Some(unravel(ofs - 1, src.size()))),
    };
    Ok(MinMaxIdx {
        min_val,
        max_val,
        min_idx,
        max_idx,
    })
}

/// Extrema over every channel value. A mask needs a single-channel source.
pub fn min_max_val(src: &Mat, mask: Option<&Mat>) -> Result<(f64, f64)> {
    if let Some(m) = mask {
        if src.channels() != 1 {
            return Err(Error::TypeMismatch);
        }
        validate_mask(src, m)?;
    }
    let st = run_scan(src, mask)?;
    if st.min_ofs == 0 {
        return Ok((0.0, 0.0));
    }
    Ok((st.min, st.max))
}
