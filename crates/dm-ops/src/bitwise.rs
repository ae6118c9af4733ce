//! Bitwise logic on the raw bytes of arrays.
//!
//! The declared depth is irrelevant: every operand is viewed as bytes, so
//! `bitwise_not` on `f32` data flips the IEEE bits. The second operand is
//! either an array of the same type and shape or a scalar, given directly or
//! as a small array shaped `1x1` (with the first operand's channel count),
//! `1xcn` or `cnx1`.

use dm_core::kernels::{copy_mask_fn, fill_pattern};
use dm_core::{Depth, Error, Mat, MaskKind, PlaneIter, Result, Scalar, block_len, validate_mask};
use log::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BitOp {
    And,
    Or,
    Xor,
    /// Unary; the second operand is ignored.
    Not,
}

type BitFn = unsafe fn(a: *const u8, b: *const u8, dst: *mut u8, len: usize);

macro_rules! bit_kernel {
    ($name:ident, |$x:ident, $y:ident| $e:expr) => {
        unsafe fn $name(a: *const u8, b: *const u8, dst: *mut u8, len: usize) {
            for i in 0..len {
                // SAFETY: `len` bytes at every pointer; byte `i` of each input
                // is read before byte `i` of `dst` is written.
                unsafe {
                    let ($x, $y) = (a.add(i).read(), b.add(i).read());
                    dst.add(i).write($e);
                }
            }
        }
    };
}

bit_kernel!(and_bytes, |x, y| x & y);
bit_kernel!(or_bytes, |x, y| x | y);
bit_kernel!(xor_bytes, |x, y| x ^ y);
bit_kernel!(not_bytes, |x, _y| !x);

static BIT_KERNELS: [BitFn; 4] = [and_bytes, or_bytes, xor_bytes, not_bytes];

enum Rhs<'a> {
    Array(&'a Mat),
    Pattern(Vec<u8>),
}

pub fn bitwise_and(a: &Mat, b: &Mat, dst: &mut Mat, mask: Option<&Mat>) -> Result<()> {
    binary_op(BitOp::And, a, b, dst, mask)
}

pub fn bitwise_or(a: &Mat, b: &Mat, dst: &mut Mat, mask: Option<&Mat>) -> Result<()> {
    binary_op(BitOp::Or, a, b, dst, mask)
}

pub fn bitwise_xor(a: &Mat, b: &Mat, dst: &mut Mat, mask: Option<&Mat>) -> Result<()> {
    binary_op(BitOp::Xor, a, b, dst, mask)
}

pub fn bitwise_not(src: &Mat, dst: &mut Mat, mask: Option<&Mat>) -> Result<()> {
    run(BitOp::Not, src, Rhs::Array(src), dst, mask)
}

/// `a op value`, with `value` saturated to `a`'s type first.
pub fn bitwise_scalar(op: BitOp, a: &Mat, value: Scalar, dst: &mut Mat, mask: Option<&Mat>) -> Result<()> {
    let raw = value.to_raw(a.mat_type())?;
    run(op, a, Rhs::Pattern(raw), dst, mask)
}

fn binary_op(op: BitOp, a: &Mat, b: &Mat, dst: &mut Mat, mask: Option<&Mat>) -> Result<()> {
    if a.size() == b.size() {
        if a.mat_type() != b.mat_type() {
            return Err(Error::TypeMismatch);
        }
        return run(op, a, Rhs::Array(b), dst, mask);
    }
    if let Some(value) = scalar_operand(b, a)? {
        return run(op, a, Rhs::Pattern(value.to_raw(a.mat_type())?), dst, mask);
    }
    // And, or and xor commute.
    if let Some(value) = scalar_operand(a, b)? {
        return run(op, b, Rhs::Pattern(value.to_raw(b.mat_type())?), dst, mask);
    }
    Err(Error::SizeMismatch {
        expected: a.total() * a.elem_size(),
        actual: b.total() * b.elem_size(),
    })
}

/// Reads `s` as a scalar for `arr` when its shape says it is one.
fn scalar_operand(s: &Mat, arr: &Mat) -> Result<Option<Scalar>> {
    let cn = arr.channels();
    let shaped = s.dims() <= 2
        && !s.is_empty()
        && ((s.total() == 1 && s.channels() == cn)
            || (s.channels() == 1 && s.total() == cn && (s.rows() == 1 || s.cols() == 1)));
    if !shaped {
        return Ok(None);
    }
    let mut wide = Mat::new();
    s.convert_to(&mut wide, Some(Depth::F64), 1.0, 0.0)?;
    Scalar::from_slice(&wide.to_vec::<f64>()?).map(Some)
}

fn run(op: BitOp, a: &Mat, rhs: Rhs<'_>, dst: &mut Mat, mask: Option<&Mat>) -> Result<()> {
    let kind = match mask {
        Some(m) => Some(validate_mask(a, m)?),
        None => None,
    };
    if a.is_empty() {
        dst.release();
        return Ok(());
    }
    let unary_alias = matches!(rhs, Rhs::Array(b) if b.same_view(a));
    dst.create(a.size(), a.mat_type())?;

    let a_tmp;
    let a = if a.overlaps(dst) && !a.same_view(dst) {
        a_tmp = a.try_copy()?;
        &a_tmp
    } else {
        a
    };
    let b_tmp;
    let b = match &rhs {
        Rhs::Array(_) if unary_alias => Some(a),
        Rhs::Array(b) if b.overlaps(dst) && !b.same_view(dst) => {
            b_tmp = b.try_copy()?;
            Some(&b_tmp)
        }
        Rhs::Array(b) => Some(*b),
        Rhs::Pattern(_) => None,
    };

    let esz = a.elem_size();
    let ab = a.reinterpret_bytes()?;
    let db = dst.reinterpret_bytes()?;
    let bb = b.map(Mat::reinterpret_bytes).transpose()?;
    let mut ops: Vec<&Mat> = vec![&ab, &db];
    if let Some(bb) = &bb {
        ops.push(bb);
    }
    if let Some(m) = mask {
        ops.push(m);
    }
    let it = PlaneIter::new(&ops)?;
    let kernel = BIT_KERNELS[op as usize];
    trace!("bitwise {op:?} over {} planes of {} bytes", it.plane_count(), it.plane_len() * esz);

    let blk = block_len(it.plane_len(), esz);
    let pattern = match &rhs {
        Rhs::Pattern(raw) => {
            let mut block = vec![0u8; blk * esz];
            // SAFETY: `block` holds `blk` elements.
            unsafe { fill_pattern(block.as_mut_ptr(), raw, blk) };
            Some(block)
        }
        Rhs::Array(_) => None,
    };

    let (Some(mask_kind), Some(_)) = (kind, mask) else {
        for plane in it {
            let (pa, pd) = (plane.ptr(0), plane.ptr(1));
            match &pattern {
                None => {
                    // SAFETY: every operand holds `len * esz` bytes per plane.
                    unsafe { kernel(pa, plane.ptr(2), pd, plane.len * esz) };
                }
                Some(block) => {
                    let mut done = 0;
                    while done < plane.len {
                        let n = blk.min(plane.len - done);
                        // SAFETY: `n` elements remain; the pattern block holds
                        // at least `n`.
                        unsafe { kernel(pa.add(done * esz), block.as_ptr(), pd.add(done * esz), n * esz) };
                        done += n;
                    }
                }
            }
        }
        return Ok(());
    };

    let (unit, per_elem) = match mask_kind {
        MaskKind::PerElement => (esz, 1),
        MaskKind::PerChannel => (a.elem_size1(), a.channels()),
    };
    let copy = copy_mask_fn(unit);
    let mask_idx = ops.len() - 1;
    let mut staged = vec![0u8; blk * esz];
    for plane in it {
        let (pa, pd, pm) = (plane.ptr(0), plane.ptr(1), plane.ptr(mask_idx));
        let mut done = 0;
        while done < plane.len {
            let n = blk.min(plane.len - done);
            let pb = match &pattern {
                None => plane.ptr(2).cast_const(),
                Some(block) => block.as_ptr(),
            };
            let pb_off = if pattern.is_some() { 0 } else { done * esz };
            // SAFETY: `n` elements remain in this plane; `staged` is a separate
            // block of `blk >= n` elements.
            unsafe {
                kernel(pa.add(done * esz), pb.add(pb_off), staged.as_mut_ptr(), n * esz);
                copy(staged.as_ptr(), pm.add(done * per_elem), pd.add(done * esz), n * per_elem, unit);
            }
            done += n;
        }
    }
    Ok(())
}
