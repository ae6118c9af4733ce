use std::ptr;

use dm_core::{Error, Mat, Result};
use log::trace;

/// Which axes a [`flip`] reverses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlipMode {
    /// Reverse the row order (around the horizontal axis).
    Vertical,
    /// Reverse every row (around the vertical axis).
    Horizontal,
    Both,
}

impl FlipMode {
    /// Integer convention: `0` vertical, positive horizontal, negative both.
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => Self::Vertical,
            c if c > 0 => Self::Horizontal,
            _ => Self::Both,
        }
    }
}

impl From<i32> for FlipMode {
    fn from(code: i32) -> Self {
        Self::from_code(code)
    }
}

struct Layout {
    rows: usize,
    cols: usize,
    esz: usize,
}

/// Mirrors a 1-D or 2-D array into `dst`.
///
/// `dst` may be `src` itself (or a shallow clone of it); overlapping but
/// different views are staged through a copy. A singleton axis turns the
/// flip along it into a plain copy.
pub fn flip(src: &Mat, dst: &mut Mat, mode: impl Into<FlipMode>) -> Result<()> {
    let mode = mode.into();
    if src.dims() > 2 {
        return Err(Error::Unsupported("flip requires a 1-D or 2-D array"));
    }
    if src.is_empty() {
        dst.release();
        return Ok(());
    }
    dst.create(src.size(), src.mat_type())?;
    let tmp;
    let src = if src.overlaps(dst) && !src.same_view(dst) {
        tmp = src.try_copy()?;
        &tmp
    } else {
        src
    };

    let lay = Layout {
        rows: src.rows(),
        cols: src.cols(),
        esz: src.elem_size(),
    };
    let (sstep, dstep) = (src.step(0), dst.step(0));
    let (sp, dp) = (src.as_ptr(), dst.as_mut_ptr());
    trace!("flip {mode:?} over {}x{} of {}", lay.rows, lay.cols, src.mat_type());

    // SAFETY: both pointers address `rows` rows of `cols * esz` bytes at
    // their respective strides; the helpers stage every row they read.
    unsafe {
        match mode {
            FlipMode::Vertical if lay.rows == 1 => copy_rows(sp, sstep, dp, dstep, &lay),
            FlipMode::Horizontal if lay.cols == 1 => copy_rows(sp, sstep, dp, dstep, &lay),
            FlipMode::Vertical => flip_rows(sp, sstep, dp, dstep, &lay),
            FlipMode::Horizontal => flip_cols(sp, sstep, dp, dstep, &lay),
            FlipMode::Both => {
                if lay.rows == 1 {
                    copy_rows(sp, sstep, dp, dstep, &lay);
                } else {
                    flip_rows(sp, sstep, dp, dstep, &lay);
                }
                if lay.cols > 1 {
                    flip_cols(dp, dstep, dp, dstep, &lay);
                }
            }
        }
    }
    Ok(())
}

unsafe fn copy_rows(src: *const u8, sstep: usize, dst: *mut u8, dstep: usize, lay: &Layout) {
    if ptr::eq(src, dst) {
        return;
    }
    let bytes = lay.cols * lay.esz;
    for y in 0..lay.rows {
        // SAFETY: distinct, non-overlapping arrays (checked by the caller).
        unsafe { ptr::copy_nonoverlapping(src.add(y * sstep), dst.add(y * dstep), bytes) };
    }
}

/// Swaps rows `i` and `rows - 1 - i` pairwise through two staging rows, so
/// it also works in place.
unsafe fn flip_rows(src: *const u8, sstep: usize, dst: *mut u8, dstep: usize, lay: &Layout) {
    let bytes = lay.cols * lay.esz;
    let mut top = vec![0u8; bytes];
    let mut bottom = vec![0u8; bytes];
    for i in 0..lay.rows.div_ceil(2) {
        let j = lay.rows - 1 - i;
        // SAFETY: rows `i` and `j` are in bounds; staging rows are separate
        // allocations.
        unsafe {
            ptr::copy_nonoverlapping(src.add(i * sstep), top.as_mut_ptr(), bytes);
            ptr::copy_nonoverlapping(src.add(j * sstep), bottom.as_mut_ptr(), bytes);
            ptr::copy_nonoverlapping(bottom.as_ptr(), dst.add(i * dstep), bytes);
            ptr::copy_nonoverlapping(top.as_ptr(), dst.add(j * dstep), bytes);
        }
    }
}

unsafe fn flip_cols(src: *const u8, sstep: usize, dst: *mut u8, dstep: usize, lay: &Layout) {
    let bytes = lay.cols * lay.esz;
    let mut row = vec![0u8; bytes];
    for y in 0..lay.rows {
        // SAFETY: row `y` is in bounds; `row` is a separate allocation.
        unsafe { ptr::copy_nonoverlapping(src.add(y * sstep), row.as_mut_ptr(), bytes) };
        let out = unsafe { dst.add(y * dstep) };
        for (k, elem) in row.chunks_exact(lay.esz).rev().enumerate() {
            // SAFETY: `k < cols`.
            unsafe { ptr::copy_nonoverlapping(elem.as_ptr(), out.add(k * lay.esz), lay.esz) };
        }
    }
}
