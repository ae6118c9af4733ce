//! Lock-step iteration over several arrays as contiguous planes.
//!
//! All operands must have exactly the same shape. Trailing axes that are
//! contiguous in every operand are collapsed into one run (a "plane"); the
//! remaining leading axes are enumerated row-major. Kernels then only ever
//! see `plane_len` packed elements per operand, whatever the dimensionality
//! or padding of the inputs.

use smallvec::SmallVec;

use crate::mat::Dims;
use crate::{Error, Mat, Result};

/// Most operands one iterator can drive.
pub const MAX_OPERANDS: usize = 32;

/// Elements per block for kernels that stage a scalar or mask in a buffer.
pub const BLOCK_SIZE: usize = 1024;

/// Block length for a plane of `plane_len` elements of `elem_size` bytes:
/// at most [`BLOCK_SIZE`], and small enough that the block's byte count fits
/// in an `i32`.
pub fn block_len(plane_len: usize, elem_size: usize) -> usize {
    let cap = i32::MAX as usize / elem_size.max(1);
    plane_len.min(BLOCK_SIZE).min(cap)
}

/// One contiguous run shared by all operands.
#[derive(Debug, Clone)]
pub struct Plane {
    pub index: usize,
    pub len: usize,
    ptrs: SmallVec<[*mut u8; 4]>,
}

impl Plane {
    /// First byte of this plane in operand `k`.
    pub fn ptr(&self, k: usize) -> *mut u8 {
        self.ptrs[k]
    }
}

#[derive(Debug)]
pub struct PlaneIter<'a> {
    arrays: SmallVec<[&'a Mat; 4]>,
    outer: Dims,
    plane_len: usize,
    nplanes: usize,
    pos: usize,
}

impl<'a> PlaneIter<'a> {
    pub fn new(arrays: &[&'a Mat]) -> Result<Self> {
        if arrays.is_empty() || arrays.len() > MAX_OPERANDS {
            return Err(Error::TooManyOperands {
                count: arrays.len(),
            });
        }
        let shape = arrays[0].size();
        if arrays.iter().any(|a| a.size() != shape) {
            return Err(Error::ShapeMismatch);
        }

        let total = arrays[0].total();
        if total == 0 || arrays.iter().any(|a| a.is_empty()) {
            return Ok(Self {
                arrays: arrays.iter().copied().collect(),
                outer: Dims::new(),
                plane_len: 0,
                nplanes: 0,
                pos: 0,
            });
        }

        let d = shape.len();
        let mut split = d - 1;
        let mut len = shape[d - 1];
        while split > 0 {
            let i = split;
            // `len` packed elements already form one run in every operand.
            let contiguous = arrays
                .iter()
                .all(|a| shape[i - 1] == 1 || a.step(i - 1) == a.elem_size() * len);
            if !contiguous {
                break;
            }
            len *= shape[i - 1];
            split -= 1;
        }

        let outer: Dims = shape[..split].iter().copied().collect();
        let nplanes = outer.iter().product();
        Ok(Self {
            arrays: arrays.iter().copied().collect(),
            outer,
            plane_len: len,
            nplanes,
            pos: 0,
        })
    }

    pub fn plane_count(&self) -> usize {
        self.nplanes
    }

    /// Elements per plane, common to all operands.
    pub fn plane_len(&self) -> usize {
        self.plane_len
    }

    pub fn operands(&self) -> usize {
        self.arrays.len()
    }

    /// Plane `index` in row-major order over the non-collapsed axes.
    pub fn plane(&self, index: usize) -> Plane {
        assert!(index < self.nplanes, "plane index out of range");
        let mut ptrs: SmallVec<[*mut u8; 4]> = SmallVec::new();
        for a in &self.arrays {
            let mut rest = index;
            let mut off = 0;
            for axis in (0..self.outer.len()).rev() {
                let i = rest % self.outer[axis];
                rest /= self.outer[axis];
                off += i * a.step(axis);
            }
            // SAFETY: `off` addresses the first element of an in-bounds run.
            ptrs.push(unsafe { a.raw_data().add(off) });
        }
        Plane {
            index,
            len: self.plane_len,
            ptrs,
        }
    }
}

impl Iterator for PlaneIter<'_> {
    type Item = Plane;

    fn next(&mut self) -> Option<Plane> {
        if self.pos >= self.nplanes {
            return None;
        }
        let plane = self.plane(self.pos);
        self.pos += 1;
        Some(plane)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.nplanes - self.pos;
        (left, Some(left))
    }
}

impl ExactSizeIterator for PlaneIter<'_> {}

#[cfg(test)]
mod tests {
    use super::{BLOCK_SIZE, PlaneIter, block_len};
    use crate::{Error, Mat, MatType, Rect};

    #[test]
    fn packed_operands_collapse_to_one_plane() {
        let a = Mat::zeros(&[3, 4, 5], MatType::U8C1).expect("allocates");
        let b = Mat::zeros(&[3, 4, 5], MatType::F64C1).expect("allocates");
        let it = PlaneIter::new(&[&a, &b]).expect("same shape");
        assert_eq!(it.plane_count(), 1);
        assert_eq!(it.plane_len(), 60);
    }

    #[test]
    fn padded_operand_limits_collapse() {
        let parent = Mat::zeros(&[4, 6], MatType::U8C1).expect("allocates");
        let roi = parent.roi(Rect::new(1, 1, 4, 3)).expect("in bounds");
        let packed = Mat::zeros(&[3, 4], MatType::I32C1).expect("allocates");
        let it = PlaneIter::new(&[&roi, &packed]).expect("same shape");
        assert_eq!(it.plane_count(), 3);
        assert_eq!(it.plane_len(), 4);

        let planes: Vec<_> = it.collect();
        assert_eq!(planes.len(), 3);
        assert_eq!(planes[2].ptr(0) as usize - parent.as_ptr() as usize, 3 * 6 + 1);
        assert_eq!(planes[2].ptr(1) as usize - packed.as_ptr() as usize, 2 * 16);
    }

    #[test]
    fn nd_planes_enumerate_row_major() {
        let m = Mat::zeros(&[2, 3, 4, 5], MatType::U8C1).expect("allocates");
        let v = m.slice(&[0..2, 0..3, 0..4, 1..4]).expect("in bounds");
        let it = PlaneIter::new(&[&v]).expect("one operand");
        assert_eq!(it.plane_count(), 24);
        assert_eq!(it.plane_len(), 3);
        let p = it.plane(5);
        // index 5 -> (0, 1, 1)
        assert_eq!(p.ptr(0) as usize - m.as_ptr() as usize, 20 + 5 + 1);
    }

    #[test]
    fn singleton_axes_do_not_block_collapse() {
        let m = Mat::zeros(&[3, 8], MatType::U8C1).expect("allocates");
        let row = m.row(1).expect("row");
        let it = PlaneIter::new(&[&row]).expect("one operand");
        assert_eq!(it.plane_count(), 1);
        assert_eq!(it.plane_len(), 8);
    }

    #[test]
    fn singleton_middle_axis_does_not_hide_padding() {
        let m = Mat::zeros(&[2, 1, 6], MatType::U8C1).expect("allocates");
        let v = m.slice(&[0..2, 0..1, 0..4]).expect("in bounds");
        let it = PlaneIter::new(&[&v]).expect("one operand");
        assert_eq!(it.plane_count(), 2);
        assert_eq!(it.plane_len(), 4);
        assert_eq!(it.plane(1).ptr(0) as usize - m.as_ptr() as usize, 6);

        let w = Mat::zeros(&[3, 1, 1, 5], MatType::U16C1).expect("allocates");
        let packed = w.slice(&[0..2, 0..1, 0..1, 0..5]).expect("in bounds");
        let it = PlaneIter::new(&[&packed]).expect("one operand");
        assert_eq!(it.plane_count(), 1);
        assert_eq!(it.plane_len(), 10);

        let x = Mat::zeros(&[2, 1, 1, 6], MatType::U16C1).expect("allocates");
        let padded = x.slice(&[0..2, 0..1, 0..1, 0..5]).expect("in bounds");
        let it = PlaneIter::new(&[&packed, &padded]).expect("same shape");
        assert_eq!(it.plane_count(), 2);
        assert_eq!(it.plane_len(), 5);
    }

    #[test]
    fn rejects_mismatched_shapes_and_operand_count() {
        let a = Mat::zeros(&[2, 2], MatType::U8C1).expect("allocates");
        let b = Mat::zeros(&[2, 3], MatType::U8C1).expect("allocates");
        assert_eq!(PlaneIter::new(&[&a, &b]).expect_err("shape"), Error::ShapeMismatch);
        assert!(matches!(
            PlaneIter::new(&[]).expect_err("empty"),
            Error::TooManyOperands { count: 0 }
        ));
        let many = vec![&a; 33];
        assert!(PlaneIter::new(&many).is_err());
    }

    #[test]
    fn empty_operands_have_no_planes() {
        let a = Mat::new();
        let it = PlaneIter::new(&[&a]).expect("empty is fine");
        assert_eq!(it.plane_count(), 0);
    }

    #[test]
    fn block_len_caps() {
        assert_eq!(block_len(10, 4), 10);
        assert_eq!(block_len(5000, 4), BLOCK_SIZE);
        assert_eq!(block_len(5000, i32::MAX as usize / 100), 100);
    }
}
