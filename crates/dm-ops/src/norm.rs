//! Norms, Hamming distances and normalization.

use std::ptr;

use dm_core::{Depth, Element, Error, Mat, MaskKind, PlaneIter, Result, validate_mask};
use log::trace;

use crate::min_max_val;

/// Norm computed by [`norm`] and [`norm_diff`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NormType {
    /// Largest absolute value.
    Inf,
    /// Sum of absolute values.
    L1,
    /// Euclidean norm.
    L2,
    /// Squared Euclidean norm.
    L2Sqr,
    /// Set bits of 8-bit data.
    Hamming,
    /// Non-zero 2-bit cells of 8-bit data.
    Hamming2,
}

/// Target of [`normalize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NormKind {
    /// Map the value range linearly onto `[min(alpha, beta), max(alpha, beta)]`.
    MinMax,
    /// Scale so the respective norm equals `alpha`.
    Inf,
    L1,
    L2,
}

#[derive(Debug, Default, Clone, Copy)]
struct NormAcc {
    inf: f64,
    l1: f64,
    l2sqr: f64,
}

impl NormAcc {
    fn get(self, kind: NormType) -> f64 {
        match kind {
            NormType::Inf => self.inf,
            NormType::L1 => self.l1,
            NormType::L2 => self.l2sqr.sqrt(),
            NormType::L2Sqr | NormType::Hamming | NormType::Hamming2 => self.l2sqr,
        }
    }
}

/// `b` and `mask` may be null. Every `per_mask` consecutive values share one
/// mask byte.
type NormFn =
    unsafe fn(a: *const u8, b: *const u8, mask: *const u8, len: usize, per_mask: usize, acc: &mut NormAcc);

unsafe fn norm_kernel<T: Element>(
    a: *const u8,
    b: *const u8,
    mask: *const u8,
    len: usize,
    per_mask: usize,
    acc: &mut NormAcc,
) {
    let (a, b) = (a.cast::<T>(), b.cast::<T>());
    for i in 0..len {
        // SAFETY: `len` values at `a` (and `b`), `len / per_mask` mask bytes.
        unsafe {
            if !mask.is_null() && *mask.add(i / per_mask) == 0 {
                continue;
            }
            let mut v = a.add(i).read().to_f64();
            if !b.is_null() {
                v -= b.add(i).read().to_f64();
            }
            let v = v.abs();
            acc.inf = acc.inf.max(v);
            acc.l1 += v;
            acc.l2sqr += v * v;
        }
    }
}

static NORM_TABLE: [NormFn; 8] = [
    norm_kernel::<u8>,
    norm_kernel::<i8>,
    norm_kernel::<u16>,
    norm_kernel::<i16>,
    norm_kernel::<u32>,
    norm_kernel::<i32>,
    norm_kernel::<f32>,
    norm_kernel::<f64>,
];

fn accumulate(a: &Mat, b: Option<&Mat>, mask: Option<&Mat>) -> Result<NormAcc> {
    let mut acc = NormAcc::default();
    let per_mask = match mask {
        Some(m) => match validate_mask(a, m)? {
            MaskKind::PerElement => a.channels(),
            MaskKind::PerChannel => 1,
        },
        None => 1,
    };
    if a.is_empty() {
        return Ok(acc);
    }
    let kernel = NORM_TABLE[a.depth().index()];
    let mut ops = vec![a];
    ops.extend(b);
    ops.extend(mask);
    let it = PlaneIter::new(&ops)?;
    let len = it.plane_len() * a.channels();
    for plane in it {
        let pb = if b.is_some() { plane.ptr(1).cast_const() } else { ptr::null() };
        let pm = if mask.is_some() { plane.ptr(ops.len() - 1).cast_const() } else { ptr::null() };
        // SAFETY: each plane holds `len` values per array operand and
        // `len / per_mask` mask bytes.
        unsafe { kernel(plane.ptr(0), pb, pm, len, per_mask, &mut acc) };
    }
    Ok(acc)
}

fn popcount_cells(byte: u8, cell_size: usize) -> u32 {
    match cell_size {
        1 => byte.count_ones(),
        2 => ((byte | (byte >> 1)) & 0x55).count_ones(),
        _ => ((byte | (byte >> 1) | (byte >> 2) | (byte >> 3)) & 0x11).count_ones(),
    }
}

/// Counts the non-zero `cell_size`-bit cells of `a` (or of `a ^ b`).
///
/// Any depth is accepted; the bytes are what is counted. `cell_size` must be
/// 1, 2 or 4.
pub fn norm_hamming(a: &Mat, b: Option<&Mat>, cell_size: usize) -> Result<u64> {
    if !matches!(cell_size, 1 | 2 | 4) {
        return Err(Error::Unsupported("hamming cell size must be 1, 2 or 4"));
    }
    if let Some(b) = b {
        if b.size() != a.size() {
            return Err(Error::ShapeMismatch);
        }
        if b.mat_type() != a.mat_type() {
            return Err(Error::TypeMismatch);
        }
    }
    if a.is_empty() {
        return Ok(0);
    }
    let mut ops = vec![a];
    ops.extend(b);
    let it = PlaneIter::new(&ops)?;
    let bytes = it.plane_len() * a.elem_size();
    let mut total = 0u64;
    for plane in it {
        // SAFETY: each plane holds `bytes` readable bytes per operand.
        let pa = unsafe { std::slice::from_raw_parts(plane.ptr(0).cast_const(), bytes) };
        total += match b {
            None => pa.iter().map(|&x| popcount_cells(x, cell_size) as u64).sum::<u64>(),
            Some(_) => {
                // SAFETY: as above.
                let pb = unsafe { std::slice::from_raw_parts(plane.ptr(1).cast_const(), bytes) };
                pa.iter()
                    .zip(pb)
                    .map(|(&x, &y)| popcount_cells(x ^ y, cell_size) as u64)
                    .sum::<u64>()
            }
        };
    }
    Ok(total)
}

fn hamming_norm(a: &Mat, b: Option<&Mat>, kind: NormType, mask: Option<&Mat>) -> Result<f64> {
    if a.depth() != Depth::U8 {
        return Err(Error::TypeMismatch);
    }
    let cell = if kind == NormType::Hamming { 1 } else { 2 };
    let Some(mask) = mask else {
        return norm_hamming(a, b, cell).map(|n| n as f64);
    };
    let mut ma = Mat::new();
    a.copy_to_masked(&mut ma, mask)?;
    let mb = match b {
        Some(b) => {
            let mut mb = Mat::new();
            b.copy_to_masked(&mut mb, mask)?;
            Some(mb)
        }
        None => None,
    };
    norm_hamming(&ma, mb.as_ref(), cell).map(|n| n as f64)
}

/// Norm of `src` over the elements selected by `mask`.
pub fn norm(src: &Mat, kind: NormType, mask: Option<&Mat>) -> Result<f64> {
    if matches!(kind, NormType::Hamming | NormType::Hamming2) {
        return hamming_norm(src, None, kind, mask);
    }
    Ok(accumulate(src, None, mask)?.get(kind))
}

/// Norm of `a - b`.
pub fn norm_diff(a: &Mat, b: &Mat, kind: NormType, mask: Option<&Mat>) -> Result<f64> {
    if a.size() != b.size() {
        return Err(Error::ShapeMismatch);
    }
    if a.mat_type() != b.mat_type() {
        return Err(Error::TypeMismatch);
    }
    if matches!(kind, NormType::Hamming | NormType::Hamming2) {
        return hamming_norm(a, Some(b), kind, mask);
    }
    Ok(accumulate(a, Some(b), mask)?.get(kind))
}

/// Rescales `src` into `dst` (depth `depth`, or `src`'s), either onto a value
/// range or to a target norm. With a mask only the selected elements of
/// `dst` are written, and the statistics come from them alone.
pub fn normalize(
    src: &Mat,
    dst: &mut Mat,
    alpha: f64,
    beta: f64,
    kind: NormKind,
    depth: Option<Depth>,
    mask: Option<&Mat>,
) -> Result<()> {
    let (scale, shift) = match kind {
        NormKind::MinMax => {
            let (smin, smax) = min_max_val(src, mask)?;
            let (dmin, dmax) = (alpha.min(beta), alpha.max(beta));
            let range = smax - smin;
            let scale = if range > f64::EPSILON { (dmax - dmin) / range } else { 0.0 };
            (scale, dmin - smin * scale)
        }
        NormKind::Inf | NormKind::L1 | NormKind::L2 => {
            let n = norm(src, norm_type(kind), mask)?;
            let scale = if n > f64::EPSILON { alpha / n } else { 0.0 };
            (scale, 0.0)
        }
    };
    trace!("normalize {kind:?}: scale {scale}, shift {shift}");

    let Some(mask) = mask else {
        return src.convert_to(dst, depth, scale, shift);
    };
    let mut tmp = Mat::new();
    src.convert_to(&mut tmp, depth, scale, shift)?;
    dst.create(src.size(), tmp.mat_type())?;
    tmp.copy_to_masked(dst, mask)
}

fn norm_type(kind: NormKind) -> NormType {
    match kind {
        NormKind::Inf => NormType::Inf,
        NormKind::L1 => NormType::L1,
        NormKind::MinMax | NormKind::L2 => NormType::L2,
    }
}

#[cfg(test)]
mod tests {
    use super::{NormKind, NormType, norm, norm_diff, norm_hamming, normalize};
    use dm_core::{Depth, Error, Mat, MatType};

    #[test]
    fn hamming_counts_cells() {
        let a = Mat::from_slice(&[1], 1, &[0b1111_0000u8]).expect("valid data");
        let b = Mat::from_slice(&[1], 1, &[0u8]).expect("valid data");
        assert_eq!(norm_hamming(&a, Some(&b), 1).expect("cell 1"), 4);
        assert_eq!(norm_hamming(&a, None, 2).expect("cell 2"), 2);
        assert_eq!(norm_hamming(&a, None, 4).expect("cell 4"), 1);
        assert!(matches!(
            norm_hamming(&a, None, 3).expect_err("bad cell"),
            Error::Unsupported(_)
        ));
        assert_eq!(norm(&a, NormType::Hamming, None).expect("u8"), 4.0);
        assert_eq!(norm(&a, NormType::Hamming2, None).expect("u8"), 2.0);
    }

    #[test]
    fn classic_norms() {
        let m = Mat::from_slice(&[1, 3], 1, &[3.0f32, -4.0, 0.0]).expect("valid data");
        assert_eq!(norm(&m, NormType::Inf, None).expect("inf"), 4.0);
        assert_eq!(norm(&m, NormType::L1, None).expect("l1"), 7.0);
        assert_eq!(norm(&m, NormType::L2, None).expect("l2"), 5.0);
        assert_eq!(norm(&m, NormType::L2Sqr, None).expect("l2sqr"), 25.0);
    }

    #[test]
    fn masked_and_difference_norms() {
        let a = Mat::from_slice(&[2, 2], 1, &[1u8, 10, 100, 200]).expect("valid data");
        let b = Mat::from_slice(&[2, 2], 1, &[2u8, 10, 50, 255]).expect("valid data");
        let mask = Mat::from_slice(&[2, 2], 1, &[1u8, 1, 0, 1]).expect("mask");
        assert_eq!(norm_diff(&a, &b, NormType::L1, None).expect("l1"), 106.0);
        assert_eq!(norm_diff(&a, &b, NormType::Inf, Some(&mask)).expect("inf"), 55.0);
        assert_eq!(norm(&a, NormType::L1, Some(&mask)).expect("masked"), 211.0);

        let c = Mat::zeros(&[2, 2], MatType::I16C1).expect("allocates");
        assert_eq!(norm_diff(&a, &c, NormType::L1, None).expect_err("types"), Error::TypeMismatch);
        let f = Mat::zeros(&[2, 2], MatType::F32C1).expect("allocates");
        assert_eq!(norm(&f, NormType::Hamming, None).expect_err("u8 only"), Error::TypeMismatch);
    }

    #[test]
    fn normalize_min_max_and_l2() {
        let src = Mat::from_slice(&[4], 1, &[10u8, 20, 30, 50]).expect("valid data");
        let mut dst = Mat::new();
        normalize(&src, &mut dst, 0.0, 1.0, NormKind::MinMax, Some(Depth::F32), None).expect("minmax");
        assert_eq!(dst.to_vec::<f32>().expect("f32"), vec![0.0, 0.25, 0.5, 1.0]);

        let v = Mat::from_slice(&[2], 1, &[3.0f64, 4.0]).expect("valid data");
        normalize(&v, &mut dst, 1.0, 0.0, NormKind::L2, None, None).expect("l2");
        let out = dst.to_vec::<f64>().expect("f64");
        assert!((out[0] - 0.6).abs() < 1e-12 && (out[1] - 0.8).abs() < 1e-12);
    }

    #[test]
    fn normalize_with_mask_writes_selected_only() {
        let src = Mat::from_slice(&[4], 1, &[0u8, 100, 200, 50]).expect("valid data");
        let mask = Mat::from_slice(&[4], 1, &[1u8, 1, 0, 1]).expect("mask");
        let mut dst = Mat::from_slice(&[4], 1, &[7u8, 7, 7, 7]).expect("valid data");
        normalize(&src, &mut dst, 0.0, 200.0, NormKind::MinMax, None, Some(&mask)).expect("masked");
        assert_eq!(dst.to_vec::<u8>().expect("u8"), vec![0, 200, 7, 100]);
    }
}
