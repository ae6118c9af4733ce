use std::ptr;

use dm_core::{BorderType, Error, Mat, Padding, Result, Scalar, border_interpolate, parallel_for};
use log::trace;

/// Border policy for [`copy_make_border`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Border {
    pub kind: BorderType,
    /// Fill value for [`BorderType::Constant`].
    pub value: Scalar,
    /// Ignore pixels of the parent when the source is a ROI.
    pub isolated: bool,
}

impl Border {
    pub fn new(kind: BorderType) -> Self {
        Self {
            kind,
            value: Scalar::default(),
            isolated: false,
        }
    }

    pub fn constant(value: Scalar) -> Self {
        Self {
            value,
            ..Self::new(BorderType::Constant)
        }
    }

    pub fn isolated(self) -> Self {
        Self {
            isolated: true,
            ..self
        }
    }
}

impl Default for Border {
    fn default() -> Self {
        Self::new(BorderType::Constant)
    }
}

/// Pads a 1-D or 2-D array by `pad` on each side.
///
/// A 1-D source is treated as a single column. When `src` is a ROI and the
/// border is not isolated, the parent's pixels around it fill as much of the
/// border as they can; the rest is interpolated (or filled for constant
/// borders).
pub fn copy_make_border(src: &Mat, dst: &mut Mat, pad: Padding, border: &Border) -> Result<()> {
    if src.dims() > 2 {
        return Err(Error::Unsupported("copy_make_border requires a 1-D or 2-D array"));
    }
    if src.dims() == 0 {
        dst.release();
        return Ok(());
    }
    let fill = match border.kind {
        BorderType::Constant => Some(border.value.to_raw(src.mat_type())?),
        _ => None,
    };
    if fill.is_none() && src.is_empty() {
        return Err(Error::Unsupported("cannot interpolate a border around an empty array"));
    }

    let mut pad = pad;
    let grown;
    let mut src = src;
    if !border.isolated && src.dims() == 2 && src.is_submatrix() {
        let (whole, ofs) = src.locate_roi()?;
        let top = pad.top.min(ofs.y);
        let left = pad.left.min(ofs.x);
        let bottom = pad.bottom.min(whole.height - ofs.y - src.rows());
        let right = pad.right.min(whole.width - ofs.x - src.cols());
        if top + bottom + left + right > 0 {
            let mut view = src.clone();
            view.adjust_roi(top as isize, bottom as isize, left as isize, right as isize)?;
            trace!("border: took {top}/{bottom}/{left}/{right} from the parent");
            pad = Padding::new(pad.top - top, pad.bottom - bottom, pad.left - left, pad.right - right);
            grown = view;
            src = &grown;
        }
    }

    let (rows, cols) = (src.rows(), src.cols());
    let drows = rows + pad.top + pad.bottom;
    let dcols = cols + pad.left + pad.right;
    dst.create(&[drows, dcols], src.mat_type())?;
    let staged;
    if src.overlaps(dst) {
        staged = src.try_copy()?;
        src = &staged;
    }

    let esz = src.elem_size();
    let (sstep, dstep) = (src.step(0), dst.step(0));
    let sp = src.as_ptr();
    let dp = dst.as_mut_ptr();

    if let Some(raw) = fill {
        dst.set_to(border.value, None)?;
        debug_assert_eq!(raw.len(), esz);
        if rows == 0 || cols == 0 {
            return Ok(());
        }
        parallel_for(0..rows, |ys| {
            for y in ys {
                // SAFETY: source row `y` and the interior of destination row
                // `y + top` are in bounds and do not overlap.
                unsafe {
                    ptr::copy_nonoverlapping(
                        sp.add(y * sstep),
                        dp.add((y + pad.top) * dstep + pad.left * esz),
                        cols * esz,
                    )
                };
            }
        });
        return Ok(());
    }

    let kind = border.kind;
    let mut xmap = Vec::with_capacity(pad.left + pad.right);
    for x in 0..pad.left {
        xmap.push(border_interpolate(x as isize - pad.left as isize, cols, kind).ok_or(Error::OutOfBounds)?);
    }
    for x in 0..pad.right {
        xmap.push(border_interpolate((cols + x) as isize, cols, kind).ok_or(Error::OutOfBounds)?);
    }
    let mut ymap = Vec::with_capacity(drows);
    for y in 0..drows {
        ymap.push(border_interpolate(y as isize - pad.top as isize, rows, kind).ok_or(Error::OutOfBounds)?);
    }

    trace!("border {kind:?}: {rows}x{cols} -> {drows}x{dcols}");
    parallel_for(0..drows, |ys| {
        for y in ys {
            // SAFETY: `ymap[y] < rows` and every `xmap` entry is `< cols`;
            // destination row `y` holds `dcols` elements; the arrays do not
            // overlap.
            unsafe {
                let s = sp.add(ymap[y] * sstep);
                let d = dp.add(y * dstep);
                ptr::copy_nonoverlapping(s, d.add(pad.left * esz), cols * esz);
                for (x, &sx) in xmap[..pad.left].iter().enumerate() {
                    ptr::copy_nonoverlapping(s.add(sx * esz), d.add(x * esz), esz);
                }
                for (x, &sx) in xmap[pad.left..].iter().enumerate() {
                    ptr::copy_nonoverlapping(s.add(sx * esz), d.add((pad.left + cols + x) * esz), esz);
                }
            }
        }
    });
    Ok(())
}
