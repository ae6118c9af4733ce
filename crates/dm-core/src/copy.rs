//! Copy, fill and type conversion on [`Mat`].

use std::ptr;

use log::trace;

use crate::kernels::{convert_fn, convert_scale_fn, copy_mask_fn, fill_pattern};
use crate::{Depth, Error, Mat, PlaneIter, Result, Scalar, block_len, parallel_for};

/// How a mask lines up with the array it gates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaskKind {
    /// One mask byte per element.
    PerElement,
    /// One mask byte per channel value.
    PerChannel,
}

/// Checks that `mask` is 8-bit, has the shape of `src`, and has either one
/// channel or as many channels as `src`.
pub fn validate_mask(src: &Mat, mask: &Mat) -> Result<MaskKind> {
    if mask.depth() != Depth::U8 || mask.size() != src.size() {
        return Err(Error::BadMask);
    }
    match mask.channels() {
        1 => Ok(MaskKind::PerElement),
        cn if cn == src.channels() => Ok(MaskKind::PerChannel),
        _ => Err(Error::BadMask),
    }
}

impl Mat {
    /// Copies into `dst`.
    ///
    /// When `dst` already has this array's shape and channel count but a
    /// different depth, the values are converted into `dst`'s depth.
    /// Otherwise `dst` is (re)created with this array's type and receives a
    /// byte copy. Copying an array onto itself is a no-op.
    pub fn copy_to(&self, dst: &mut Mat) -> Result<()> {
        if !self.is_empty()
            && !dst.is_empty()
            && dst.size() == self.size()
            && dst.channels() == self.channels()
            && dst.depth() != self.depth()
        {
            let depth = dst.depth();
            return self.convert_to(dst, Some(depth), 1.0, 0.0);
        }
        self.copy_raw_to(dst)
    }

    pub(crate) fn copy_raw_to(&self, dst: &mut Mat) -> Result<()> {
        if self.is_empty() {
            dst.release();
            return Ok(());
        }
        dst.create(self.size(), self.mat_type())?;
        if self.same_view(dst) {
            trace!("copy onto the same view skipped");
            return Ok(());
        }
        if self.overlaps(dst) {
            let tmp = self.try_copy()?;
            return tmp.copy_raw_to(dst);
        }

        let it = PlaneIter::new(&[self, dst])?;
        let bytes = it.plane_len() * self.elem_size();
        for plane in it {
            // SAFETY: both operands hold `bytes` contiguous bytes per plane and
            // do not overlap.
            unsafe { ptr::copy_nonoverlapping(plane.ptr(0), plane.ptr(1), bytes) };
        }
        Ok(())
    }

    /// Copies the elements whose mask value is non-zero.
    ///
    /// Unselected elements keep whatever `dst` held; a freshly created `dst`
    /// starts zero-filled.
    pub fn copy_to_masked(&self, dst: &mut Mat, mask: &Mat) -> Result<()> {
        let kind = validate_mask(self, mask)?;
        if self.is_empty() {
            dst.release();
            return Ok(());
        }
        dst.create(self.size(), self.mat_type())?;
        if self.same_view(dst) {
            return Ok(());
        }
        let tmp;
        let src = if self.overlaps(dst) {
            tmp = self.try_copy()?;
            &tmp
        } else {
            self
        };

        let (unit, per_elem) = match kind {
            MaskKind::PerElement => (src.elem_size(), 1),
            MaskKind::PerChannel => (src.elem_size1(), src.channels()),
        };
        let kernel = copy_mask_fn(unit);
        let it = PlaneIter::new(&[src, mask, dst])?;
        let len = it.plane_len() * per_elem;
        for plane in it {
            // SAFETY: each plane holds `len` units of `unit` bytes in src and
            // dst and `len` mask bytes.
            unsafe { kernel(plane.ptr(0), plane.ptr(1), plane.ptr(2), len, unit) };
        }
        Ok(())
    }

    /// Sets every element (or every masked element) to `value`, saturated to
    /// this array's depth.
    pub fn set_to(&mut self, value: Scalar, mask: Option<&Mat>) -> Result<()> {
        let kind = match mask {
            Some(m) => Some(validate_mask(self, m)?),
            None => None,
        };
        let raw = value.to_raw(self.mat_type())?;
        if self.is_empty() {
            return Ok(());
        }
        let esz = self.elem_size();

        let (Some(mask), Some(kind)) = (mask, kind) else {
            let it = PlaneIter::new(&[&*self])?;
            let bytes = it.plane_len() * esz;
            let cn = self.channels();
            if value.0[..cn].iter().all(|&v| v == 0.0) {
                trace!("set_to: zero fill over {} planes", it.plane_count());
                for plane in it {
                    // SAFETY: each plane holds `bytes` writable bytes.
                    unsafe { ptr::write_bytes(plane.ptr(0), 0, bytes) };
                }
                return Ok(());
            }
            if self.elem_size1() == 1 && raw.iter().all(|&b| b == raw[0]) {
                trace!("set_to: byte fill over {} planes", it.plane_count());
                for plane in it {
                    // SAFETY: each plane holds `bytes` writable bytes.
                    unsafe { ptr::write_bytes(plane.ptr(0), raw[0], bytes) };
                }
                return Ok(());
            }
            let blk = block_len(it.plane_len(), esz);
            let mut block = vec![0u8; blk * esz];
            // SAFETY: `block` holds `blk` elements.
            unsafe { fill_pattern(block.as_mut_ptr(), &raw, blk) };
            for plane in it {
                let mut done = 0;
                while done < plane.len {
                    let n = blk.min(plane.len - done);
                    // SAFETY: `n` elements remain in this plane; the staging
                    // block is a separate allocation.
                    unsafe {
                        ptr::copy_nonoverlapping(block.as_ptr(), plane.ptr(0).add(done * esz), n * esz)
                    };
                    done += n;
                }
            }
            return Ok(());
        };

        let (unit, per_elem) = match kind {
            MaskKind::PerElement => (esz, 1),
            MaskKind::PerChannel => (self.elem_size1(), self.channels()),
        };
        let kernel = copy_mask_fn(unit);
        let it = PlaneIter::new(&[&*self, mask])?;
        let blk = block_len(it.plane_len(), esz);
        let mut block = vec![0u8; blk * esz];
        // SAFETY: `block` holds `blk` elements.
        unsafe { fill_pattern(block.as_mut_ptr(), &raw, blk) };
        for plane in it {
            let mut done = 0;
            while done < plane.len {
                let n = blk.min(plane.len - done);
                // SAFETY: `n` elements remain in this plane, i.e. `n * per_elem`
                // units and mask bytes.
                unsafe {
                    kernel(
                        block.as_ptr(),
                        plane.ptr(1).add(done * per_elem),
                        plane.ptr(0).add(done * esz),
                        n * per_elem,
                        unit,
                    )
                };
                done += n;
            }
        }
        Ok(())
    }

    /// Writes `saturate(self * alpha + beta)` into `dst` with depth `depth`
    /// (this array's depth for `None`), keeping the channel count.
    ///
    /// The arithmetic runs in `f32` unless either depth is `f64`. With
    /// `alpha == 1`, `beta == 0` and an unchanged depth this is a plain copy.
    pub fn convert_to(&self, dst: &mut Mat, depth: Option<Depth>, alpha: f64, beta: f64) -> Result<()> {
        let ddepth = depth.unwrap_or(self.depth());
        let identity = (alpha - 1.0).abs() < f64::EPSILON && beta.abs() < f64::EPSILON;
        if self.is_empty() {
            dst.release();
            return Ok(());
        }
        if identity && ddepth == self.depth() {
            return self.copy_raw_to(dst);
        }

        let dtype = self.mat_type().with_depth(ddepth);
        dst.create(self.size(), dtype)?;
        let tmp;
        let src = if self.overlaps(dst) && !self.same_view(dst) {
            tmp = self.try_copy()?;
            &tmp
        } else {
            self
        };

        let it = PlaneIter::new(&[src, dst])?;
        let len = it.plane_len() * self.channels();
        trace!(
            "convert {} -> {} over {} planes (identity scale: {identity})",
            src.depth(),
            ddepth,
            it.plane_count()
        );
        if identity {
            let kernel = convert_fn(src.depth(), ddepth);
            parallel_for(0..it.plane_count(), |planes| {
                for k in planes {
                    let p = it.plane(k);
                    // SAFETY: `len` values per plane on both sides; in-place
                    // only for the same view, where index i is read first.
                    unsafe { kernel(p.ptr(0), p.ptr(1), len) };
                }
            });
        } else {
            let kernel = convert_scale_fn(src.depth(), ddepth);
            parallel_for(0..it.plane_count(), |planes| {
                for k in planes {
                    let p = it.plane(k);
                    // SAFETY: as above.
                    unsafe { kernel(p.ptr(0), p.ptr(1), len, alpha, beta) };
                }
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{MaskKind, validate_mask};
    use crate::{Depth, Error, Mat, MatType, Rect, Scalar};

    #[test]
    fn masked_copy_keeps_unselected_destination_values() {
        let src = Mat::new_with_scalar(&[2, 4], MatType::U8C1, Scalar::all(7.0)).expect("src");
        let mut dst = Mat::new_with_scalar(&[2, 4], MatType::U8C1, Scalar::all(9.0)).expect("dst");
        let mask = Mat::from_slice(&[2, 4], 1, &[1u8, 0, 1, 0, 1, 0, 1, 0]).expect("mask");
        src.copy_to_masked(&mut dst, &mask).expect("valid mask");
        assert_eq!(dst.to_vec::<u8>().expect("u8"), vec![7, 9, 7, 9, 7, 9, 7, 9]);
    }

    #[test]
    fn masked_copy_into_fresh_destination_is_zero_elsewhere() {
        let src = Mat::from_slice(&[1, 3], 2, &[1i16, 2, 3, 4, 5, 6]).expect("src");
        let mask = Mat::from_slice(&[1, 3], 1, &[0u8, 1, 0]).expect("mask");
        let mut dst = Mat::new();
        src.copy_to_masked(&mut dst, &mask).expect("valid mask");
        assert_eq!(dst.to_vec::<i16>().expect("i16"), vec![0, 0, 3, 4, 0, 0]);

        let per_channel = Mat::from_slice(&[1, 3], 2, &[1u8, 0, 0, 1, 0, 0]).expect("mask");
        let mut dst = Mat::new();
        src.copy_to_masked(&mut dst, &per_channel).expect("valid mask");
        assert_eq!(dst.to_vec::<i16>().expect("i16"), vec![1, 0, 0, 4, 0, 0]);
    }

    #[test]
    fn mask_validation() {
        let src = Mat::zeros(&[2, 2], MatType::U8C3).expect("src");
        let ok = Mat::zeros(&[2, 2], MatType::U8C1).expect("mask");
        assert_eq!(validate_mask(&src, &ok).expect("ok"), MaskKind::PerElement);
        let wrong_depth = Mat::zeros(&[2, 2], MatType::F32C1).expect("mask");
        assert_eq!(validate_mask(&src, &wrong_depth).expect_err("depth"), Error::BadMask);
        let wrong_shape = Mat::zeros(&[2, 3], MatType::U8C1).expect("mask");
        let mut dst = Mat::new();
        assert_eq!(
            src.copy_to_masked(&mut dst, &wrong_shape).expect_err("shape"),
            Error::BadMask
        );
        assert!(dst.is_empty(), "no mutation after a failed precondition");
    }

    #[test]
    fn copy_into_roi_writes_parent() {
        let mut parent = Mat::zeros(&[3, 3], MatType::U8C1).expect("parent");
        let patch = Mat::new_with_scalar(&[2, 2], MatType::U8C1, Scalar::all(5.0)).expect("patch");
        let mut roi = parent.roi(Rect::new(1, 1, 2, 2)).expect("roi");
        patch.copy_to(&mut roi).expect("same shape");
        assert_eq!(
            parent.to_vec::<u8>().expect("u8"),
            vec![0, 0, 0, 0, 5, 5, 0, 5, 5]
        );
        parent.set_to(Scalar::all(1.0), None).expect("fill");
        assert_eq!(roi.at::<u8>(&[0, 0]).expect("in bounds"), 1);
    }

    #[test]
    fn copy_between_overlapping_views() {
        let parent = Mat::from_slice(&[1, 6], 1, &[1u8, 2, 3, 4, 5, 6]).expect("parent");
        let a = parent.roi(Rect::new(0, 0, 4, 1)).expect("roi");
        let mut b = parent.roi(Rect::new(2, 0, 4, 1)).expect("roi");
        a.copy_to(&mut b).expect("same shape");
        assert_eq!(parent.to_vec::<u8>().expect("u8"), vec![1, 2, 1, 2, 3, 4]);

        let alias = parent.clone();
        let mut same = parent.clone();
        alias.copy_to(&mut same).expect("self copy");
        assert_eq!(parent.to_vec::<u8>().expect("u8"), vec![1, 2, 1, 2, 3, 4]);
    }

    #[test]
    fn copy_to_converts_into_existing_depth() {
        let src = Mat::from_slice(&[3], 1, &[300i32, -10, 42]).expect("src");
        let mut dst = Mat::zeros(&[3], MatType::U8C1).expect("dst");
        src.copy_to(&mut dst).expect("convert");
        assert_eq!(dst.to_vec::<u8>().expect("u8"), vec![255, 0, 42]);
    }

    #[test]
    fn convert_identity_matches_copy() {
        let src = Mat::from_slice(&[2, 3], 1, &[1.25f32, -2.5, 3.0, f32::MAX, 0.0, -0.0])
            .expect("src");
        let mut a = Mat::new();
        let mut b = Mat::new();
        src.convert_to(&mut a, None, 1.0, 0.0).expect("convert");
        src.copy_to(&mut b).expect("copy");
        let bits = |m: &Mat| -> Vec<u32> {
            m.to_vec::<f32>().expect("f32").iter().map(|v| v.to_bits()).collect()
        };
        assert_eq!(bits(&a), bits(&b));
        assert_ne!(a.as_ptr(), src.as_ptr());
    }

    #[test]
    fn convert_scale_saturates_and_rounds() {
        let src = Mat::from_slice(&[4], 1, &[0u8, 100, 200, 255]).expect("src");
        let mut dst = Mat::new();
        src.convert_to(&mut dst, Some(Depth::I8), 0.5, -64.0).expect("convert");
        assert_eq!(dst.to_vec::<i8>().expect("i8"), vec![-64, -14, 36, 64]);

        let mut f = Mat::new();
        src.convert_to(&mut f, Some(Depth::F64), 1.0 / 255.0, 0.0).expect("convert");
        let v = f.to_vec::<f64>().expect("f64");
        assert!((v[3] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn convert_in_place_on_same_view() {
        let mut m = Mat::from_slice(&[2, 2], 1, &[1.0f32, 2.0, 3.0, 4.0]).expect("src");
        let src = m.clone();
        src.convert_to(&mut m, None, 2.0, 1.0).expect("in place");
        assert_eq!(m.to_vec::<f32>().expect("f32"), vec![3.0, 5.0, 7.0, 9.0]);
        assert_eq!(src.as_ptr(), m.as_ptr());
    }

    #[test]
    fn convert_from_non_continuous_roi() {
        let parent = Mat::from_slice(&[3, 3], 1, &[1u16, 2, 3, 4, 5, 6, 7, 8, 9]).expect("src");
        let roi = parent.roi(Rect::new(1, 1, 2, 2)).expect("roi");
        let mut dst = Mat::new();
        roi.convert_to(&mut dst, Some(Depth::F32), 1.0, 0.0).expect("convert");
        assert!(dst.is_continuous());
        assert_eq!(dst.to_vec::<f32>().expect("f32"), vec![5.0, 6.0, 8.0, 9.0]);
    }

    #[test]
    fn set_to_paths() {
        let mut m = Mat::zeros(&[2, 3], MatType::new(Depth::I16, 3).expect("type")).expect("m");
        m.set_to(Scalar::new(1.0, -2.0, 70000.0, 0.0), None).expect("fill");
        assert_eq!(m.pixel::<i16>(&[1, 2]).expect("px"), vec![1, -2, i16::MAX]);

        let mut bytes = Mat::zeros(&[5, 3], MatType::U8C3).expect("m");
        bytes.set_to(Scalar::all(300.0), None).expect("fill");
        assert!(bytes.to_vec::<u8>().expect("u8").iter().all(|&v| v == 255));
        bytes.set_to(Scalar::default(), None).expect("zero");
        assert!(bytes.to_vec::<u8>().expect("u8").iter().all(|&v| v == 0));

        let mut wide = Mat::zeros(&[1, 3000], MatType::F32C1).expect("m");
        wide.set_to(Scalar::from(0.5), None).expect("blocked fill");
        assert!(wide.to_vec::<f32>().expect("f32").iter().all(|&v| v == 0.5));
    }

    #[test]
    fn set_to_with_mask() {
        let mut m = Mat::zeros(&[2, 2], MatType::F32C1).expect("m");
        let mask = Mat::from_slice(&[2, 2], 1, &[0u8, 1, 1, 0]).expect("mask");
        m.set_to(Scalar::from(3.5), Some(&mask)).expect("masked fill");
        assert_eq!(m.to_vec::<f32>().expect("f32"), vec![0.0, 3.5, 3.5, 0.0]);

        let bad = Mat::zeros(&[2, 2], MatType::U8C4).expect("mask");
        let mut rgb = Mat::zeros(&[2, 2], MatType::U8C3).expect("m");
        assert_eq!(
            rgb.set_to(Scalar::all(1.0), Some(&bad)).expect_err("mask channels"),
            Error::BadMask
        );
    }
}
