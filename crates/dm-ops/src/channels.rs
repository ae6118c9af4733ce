use dm_core::{Error, Mat, MatType, PlaneIter, Result};
use log::trace;

/// Destinations driven by one plane iterator during [`split`].
const SPLIT_GROUP: usize = 4;

/// Copies `count` channels of `len` elements between interleaved layouts:
/// channel `src_off + k` of a `src_cn`-channel run goes to channel
/// `dst_off + k` of a `dst_cn`-channel run.
type ChannelCopyFn = unsafe fn(
    src: *const u8,
    src_cn: usize,
    src_off: usize,
    dst: *mut u8,
    dst_cn: usize,
    dst_off: usize,
    count: usize,
    len: usize,
);

#[allow(clippy::too_many_arguments)]
unsafe fn copy_channels<U: Copy>(
    src: *const u8,
    src_cn: usize,
    src_off: usize,
    dst: *mut u8,
    dst_cn: usize,
    dst_off: usize,
    count: usize,
    len: usize,
) {
    let (src, dst) = (src.cast::<U>(), dst.cast::<U>());
    for i in 0..len {
        for k in 0..count {
            // SAFETY: caller provides `len` elements of `src_cn` and `dst_cn`
            // units; `off + k` stays below the channel count.
            unsafe {
                let v = src.add(i * src_cn + src_off + k).read();
                dst.add(i * dst_cn + dst_off + k).write(v);
            }
        }
    }
}

/// Kernel for channels of `elem_size1` bytes.
fn channel_copy_fn(elem_size1: usize) -> ChannelCopyFn {
    match elem_size1 {
        1 => copy_channels::<u8>,
        2 => copy_channels::<u16>,
        4 => copy_channels::<u32>,
        _ => copy_channels::<u64>,
    }
}

/// Splits a multi-channel array into one single-channel array per channel.
///
/// `dst.len()` must equal the channel count. Each destination is
/// (re)created with the source's shape and depth.
pub fn split(src: &Mat, dst: &mut [Mat]) -> Result<()> {
    let cn = src.channels();
    if dst.len() != cn {
        return Err(Error::SizeMismatch {
            expected: cn,
            actual: dst.len(),
        });
    }
    if src.is_empty() {
        dst.iter_mut().for_each(Mat::release);
        return Ok(());
    }
    let dtype = MatType::new(src.depth(), 1)?;
    for d in dst.iter_mut() {
        d.create(src.size(), dtype)?;
    }
    let tmp;
    let src = if dst.iter().any(|d| d.overlaps(src)) {
        tmp = src.try_copy()?;
        &tmp
    } else {
        src
    };

    let kernel = channel_copy_fn(src.elem_size1());
    for (g, group) in dst.chunks(SPLIT_GROUP).enumerate() {
        let mut ops: Vec<&Mat> = Vec::with_capacity(group.len() + 1);
        ops.push(src);
        ops.extend(group.iter());
        let it = PlaneIter::new(&ops)?;
        trace!("split group {g}: {} planes of {}", it.plane_count(), it.plane_len());
        for plane in it {
            for k in 0..group.len() {
                // SAFETY: each plane holds `len` elements of `cn` channels in
                // `src` and `len` single values in every destination.
                unsafe {
                    kernel(plane.ptr(0), cn, g * SPLIT_GROUP + k, plane.ptr(k + 1), 1, 0, 1, plane.len)
                };
            }
        }
    }
    Ok(())
}

/// [`split`] into freshly allocated arrays.
pub fn split_to_vec(src: &Mat) -> Result<Vec<Mat>> {
    let mut out: Vec<Mat> = (0..src.channels()).map(|_| Mat::new()).collect();
    split(src, &mut out)?;
    Ok(out)
}

/// Interleaves `src` into one array whose channel count is the sum of the
/// inputs'. All inputs must share shape and depth.
pub fn merge(src: &[Mat], dst: &mut Mat) -> Result<()> {
    let Some(first) = src.first() else {
        return Err(Error::SizeMismatch {
            expected: 1,
            actual: 0,
        });
    };
    for s in &src[1..] {
        if s.size() != first.size() {
            return Err(Error::ShapeMismatch);
        }
        if s.depth() != first.depth() {
            return Err(Error::TypeMismatch);
        }
    }
    let cn: usize = src.iter().map(Mat::channels).sum();
    let dtype = MatType::new(first.depth(), cn)?;
    if first.is_empty() {
        dst.release();
        return Ok(());
    }
    dst.create(first.size(), dtype)?;

    let kernel = channel_copy_fn(first.elem_size1());
    let mut offset = 0;
    for s in src {
        let tmp;
        let s = if s.overlaps(dst) {
            tmp = s.try_copy()?;
            &tmp
        } else {
            s
        };
        let scn = s.channels();
        let it = PlaneIter::new(&[s, &*dst])?;
        for plane in it {
            // SAFETY: `len` elements of `scn` channels in `s` and `cn`
            // channels in `dst`; `offset + scn <= cn`.
            unsafe { kernel(plane.ptr(0), scn, 0, plane.ptr(1), cn, offset, scn, plane.len) };
        }
        offset += scn;
    }
    Ok(())
}
