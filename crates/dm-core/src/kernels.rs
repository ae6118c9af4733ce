//! Per-type kernels and the tables that select them at run time.
//!
//! Every kernel works on one contiguous run of values addressed by raw
//! pointers, because source and destination may alias (in-place convert,
//! overlapping copies). Lengths are counts of scalars (elements times
//! channels) for the convert kernels and counts of elements for the masked
//! copies.

use std::ptr;

use crate::{Depth, Element, saturate_cast};

/// Converts `len` scalars from the source depth to the destination depth.
pub type ConvertFn = unsafe fn(src: *const u8, dst: *mut u8, len: usize);

/// Computes `dst = saturate(src * alpha + beta)` over `len` scalars.
pub type ConvertScaleFn = unsafe fn(src: *const u8, dst: *mut u8, len: usize, alpha: f64, beta: f64);

/// Copies the `len` elements of `esz` bytes whose mask byte is non-zero.
pub type CopyMaskFn = unsafe fn(src: *const u8, mask: *const u8, dst: *mut u8, len: usize, esz: usize);

unsafe fn convert_cast<S: Element, D: Element>(src: *const u8, dst: *mut u8, len: usize) {
    let src = src.cast::<S>();
    let dst = dst.cast::<D>();
    for i in 0..len {
        // SAFETY: caller provides `len` readable `S` and writable `D`; index i
        // is read before it is written.
        unsafe { dst.add(i).write(saturate_cast(src.add(i).read())) };
    }
}

/// Identity conversion: a raw copy in units of `U`.
unsafe fn copy_units<U: Copy>(src: *const u8, dst: *mut u8, len: usize) {
    // SAFETY: caller provides `len` units at both ends; `ptr::copy` tolerates
    // overlap.
    unsafe { ptr::copy(src.cast::<U>(), dst.cast::<U>(), len) };
}

unsafe fn convert_scale<S: Element, D: Element>(
    src: *const u8,
    dst: *mut u8,
    len: usize,
    alpha: f64,
    beta: f64,
) {
    let src = src.cast::<S>();
    let dst = dst.cast::<D>();
    if S::DEPTH == Depth::F64 || D::DEPTH == Depth::F64 {
        for i in 0..len {
            // SAFETY: see `convert_cast`.
            unsafe {
                let v = src.add(i).read().to_f64();
                dst.add(i).write(D::from_f64(v * alpha + beta));
            }
        }
    } else {
        let (a, b) = (alpha as f32, beta as f32);
        for i in 0..len {
            // SAFETY: see `convert_cast`.
            unsafe {
                let v = src.add(i).read().to_f32();
                dst.add(i).write(D::from_f32(v * a + b));
            }
        }
    }
}

macro_rules! table_row {
    ($f:ident, $fty:ty, $s:ty) => {
        [
            $f::<$s, u8> as $fty,
            $f::<$s, i8> as $fty,
            $f::<$s, u16> as $fty,
            $f::<$s, i16> as $fty,
            $f::<$s, u32> as $fty,
            $f::<$s, i32> as $fty,
            $f::<$s, f32> as $fty,
            $f::<$s, f64> as $fty,
        ]
    };
}

macro_rules! table {
    ($f:ident, $fty:ty) => {
        [
            table_row!($f, $fty, u8),
            table_row!($f, $fty, i8),
            table_row!($f, $fty, u16),
            table_row!($f, $fty, i16),
            table_row!($f, $fty, u32),
            table_row!($f, $fty, i32),
            table_row!($f, $fty, f32),
            table_row!($f, $fty, f64),
        ]
    };
}

/// `[source depth][destination depth]`; the diagonal copies raw units of
/// the depth's width instead of casting.
static CONVERT_TABLE: [[ConvertFn; 8]; 8] = {
    let mut t = table!(convert_cast, ConvertFn);
    t[Depth::U8.index()][Depth::U8.index()] = copy_units::<u8>;
    t[Depth::I8.index()][Depth::I8.index()] = copy_units::<u8>;
    t[Depth::U16.index()][Depth::U16.index()] = copy_units::<u16>;
    t[Depth::I16.index()][Depth::I16.index()] = copy_units::<u16>;
    t[Depth::U32.index()][Depth::U32.index()] = copy_units::<u32>;
    t[Depth::I32.index()][Depth::I32.index()] = copy_units::<u32>;
    t[Depth::F32.index()][Depth::F32.index()] = copy_units::<u32>;
    t[Depth::F64.index()][Depth::F64.index()] = copy_units::<u64>;
    t
};

static CONVERT_SCALE_TABLE: [[ConvertScaleFn; 8]; 8] = table!(convert_scale, ConvertScaleFn);

pub fn convert_fn(src: Depth, dst: Depth) -> ConvertFn {
    CONVERT_TABLE[src.index()][dst.index()]
}

pub fn convert_scale_fn(src: Depth, dst: Depth) -> ConvertScaleFn {
    CONVERT_SCALE_TABLE[src.index()][dst.index()]
}

unsafe fn copy_mask_fixed<const N: usize>(
    src: *const u8,
    mask: *const u8,
    dst: *mut u8,
    len: usize,
    _esz: usize,
) {
    let src = src.cast::<[u8; N]>();
    let dst = dst.cast::<[u8; N]>();
    for i in 0..len {
        // SAFETY: caller provides `len` mask bytes and `len` elements of `N`
        // bytes at both ends.
        unsafe {
            if *mask.add(i) != 0 {
                dst.add(i).write_unaligned(src.add(i).read_unaligned());
            }
        }
    }
}

unsafe fn copy_mask_any(src: *const u8, mask: *const u8, dst: *mut u8, len: usize, esz: usize) {
    for i in 0..len {
        // SAFETY: caller provides `len` mask bytes and `len * esz` bytes at
        // both ends.
        unsafe {
            if *mask.add(i) != 0 {
                ptr::copy(src.add(i * esz), dst.add(i * esz), esz);
            }
        }
    }
}

/// Masked-copy kernel for elements of `esz` bytes.
pub fn copy_mask_fn(esz: usize) -> CopyMaskFn {
    match esz {
        1 => copy_mask_fixed::<1>,
        2 => copy_mask_fixed::<2>,
        3 => copy_mask_fixed::<3>,
        4 => copy_mask_fixed::<4>,
        6 => copy_mask_fixed::<6>,
        8 => copy_mask_fixed::<8>,
        12 => copy_mask_fixed::<12>,
        16 => copy_mask_fixed::<16>,
        24 => copy_mask_fixed::<24>,
        32 => copy_mask_fixed::<32>,
        _ => copy_mask_any,
    }
}

/// Fills `dst` with `count` back-to-back copies of `pattern`.
///
/// # Safety
/// `dst` must be writable for `count * pattern.len()` bytes.
pub unsafe fn fill_pattern(dst: *mut u8, pattern: &[u8], count: usize) {
    let n = pattern.len();
    for i in 0..count {
        // SAFETY: element `i` lies inside the caller's range.
        unsafe { ptr::copy_nonoverlapping(pattern.as_ptr(), dst.add(i * n), n) };
    }
}
