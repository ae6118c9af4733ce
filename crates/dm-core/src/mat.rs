use std::fmt;
use std::ops::Range;
use std::ptr::{self, NonNull};
use std::sync::Arc;

use smallvec::SmallVec;

use crate::{
    Allocator, BufferRef, Depth, Element, Error, MatType, PlaneIter, Point, Rect, Result,
    SharedBuffer, Size, default_allocator,
};

/// Largest supported dimensionality.
pub const MAX_DIMS: usize = 32;

pub(crate) type Dims = SmallVec<[usize; 4]>;

/// Strided N-dimensional array over a shared buffer.
///
/// `Clone` is shallow: the clone aliases the same bytes and bumps the
/// buffer's owner count. Writes through one alias are visible through all of
/// them; use [`Mat::try_copy`] for an independent copy. The last axis is
/// always tightly packed (its stride equals the element size); outer axes may
/// carry padding, which is how ROI views over a larger parent are expressed.
///
/// Because clones share bytes without synchronization, `Mat` is neither
/// `Send` nor `Sync`. Hand another thread an owned copy of the data instead.
///
/// ```compile_fail
/// fn needs_send<T: Send>(_: T) {}
/// needs_send(dm_core::Mat::new());
/// ```
pub struct Mat {
    mtype: MatType,
    size: Dims,
    step: Dims,
    data: *mut u8,
    datastart: *mut u8,
    dataend: *const u8,
    buf: Option<BufferRef>,
    allocator: Option<Arc<dyn Allocator>>,
    continuous: bool,
    submatrix: bool,
}

fn check_dims(dims: usize) -> Result<()> {
    if dims == 0 || dims > MAX_DIMS {
        return Err(Error::TooManyDims { dims });
    }
    Ok(())
}

/// Row-major strides for a packed layout and the total byte count.
fn packed_steps(size: &[usize], esz: usize) -> Result<(Dims, usize)> {
    let mut step: Dims = SmallVec::from_elem(0, size.len());
    let mut acc = esz;
    for i in (0..size.len()).rev() {
        step[i] = acc;
        acc = acc
            .checked_mul(size[i])
            .ok_or(Error::OutOfMemory { requested: usize::MAX })?;
    }
    Ok((step, acc))
}

/// Bytes from the first element to the end of the last one.
fn span_bytes(size: &[usize], step: &[usize], esz: usize) -> usize {
    if size.is_empty() || size.contains(&0) {
        return 0;
    }
    size.iter()
        .zip(step)
        .map(|(&s, &st)| (s - 1) * st)
        .sum::<usize>()
        + esz
}

fn is_continuous_layout(size: &[usize], step: &[usize], esz: usize) -> bool {
    if size.contains(&0) {
        return true;
    }
    let mut expected = esz;
    for i in (0..size.len()).rev() {
        if size[i] > 1 && step[i] != expected {
            return false;
        }
        expected *= size[i];
    }
    true
}

impl Mat {
    /// An empty array with no storage.
    pub fn new() -> Self {
        Self {
            mtype: MatType::U8C1,
            size: Dims::new(),
            step: Dims::new(),
            data: ptr::null_mut(),
            datastart: ptr::null_mut(),
            dataend: ptr::null(),
            buf: None,
            allocator: None,
            continuous: true,
            submatrix: false,
        }
    }

    /// An empty array that allocates from `allocator` instead of the
    /// process-wide default.
    pub fn new_in(allocator: Arc<dyn Allocator>) -> Self {
        Self {
            allocator: Some(allocator),
            ..Self::new()
        }
    }

    /// Allocates a zero-filled array.
    pub fn zeros(shape: &[usize], mtype: MatType) -> Result<Self> {
        let mut m = Self::new();
        m.create(shape, mtype)?;
        Ok(m)
    }

    /// Allocates an array filled with `value`.
    pub fn new_with_scalar(shape: &[usize], mtype: MatType, value: crate::Scalar) -> Result<Self> {
        let mut m = Self::zeros(shape, mtype)?;
        m.set_to(value, None)?;
        Ok(m)
    }

    /// Copies `data` (row-major, channels interleaved) into a new array.
    pub fn from_slice<T: Element>(shape: &[usize], channels: usize, data: &[T]) -> Result<Self> {
        check_dims(shape.len())?;
        let mtype = MatType::new(T::DEPTH, channels)?;
        let expected = shape
            .iter()
            .try_fold(channels, |acc, &s| acc.checked_mul(s))
            .ok_or(Error::SizeMismatch {
                expected: usize::MAX,
                actual: data.len(),
            })?;
        if data.len() != expected {
            return Err(Error::SizeMismatch {
                expected,
                actual: data.len(),
            });
        }

        let m = Self::zeros(shape, mtype)?;
        if expected > 0 {
            // SAFETY: `m` is packed and holds exactly `expected` values of `T`.
            unsafe {
                ptr::copy_nonoverlapping(data.as_ptr(), m.data.cast::<T>(), expected);
            }
        }
        Ok(m)
    }

    /// Collaborator entry point: a `rows x cols` image whose channels are
    /// `elem_size1` bytes wide (1 -> u8, 2 -> u16, 4 -> f32, 8 -> f64).
    pub fn create_image(
        rows: usize,
        cols: usize,
        channels: usize,
        elem_size1: usize,
    ) -> Result<Self> {
        let depth = match elem_size1 {
            1 => Depth::U8,
            2 => Depth::U16,
            4 => Depth::F32,
            8 => Depth::F64,
            _ => return Err(Error::Unsupported("element byte size must be 1, 2, 4 or 8")),
        };
        Self::zeros(&[rows, cols], MatType::new(depth, channels)?)
    }

    /// Builds an array over caller-owned memory.
    ///
    /// `steps` gives the byte stride of every axis but the last, which is
    /// always packed; `None` means a packed layout. The memory is wrapped in a
    /// user-memory buffer that is never freed.
    ///
    /// # Safety
    /// `data` must be valid for reads and writes over the whole span implied
    /// by `shape` and `steps` for as long as the returned array or any view of
    /// it lives.
    pub unsafe fn from_raw_parts(
        shape: &[usize],
        mtype: MatType,
        data: NonNull<u8>,
        steps: Option<&[usize]>,
    ) -> Result<Self> {
        check_dims(shape.len())?;
        let esz = mtype.elem_size();
        let step: Dims = match steps {
            None => packed_steps(shape, esz)?.0,
            Some(s) => {
                if s.len() + 1 != shape.len() {
                    return Err(Error::InvalidStride);
                }
                let mut st: Dims = s.iter().copied().collect();
                st.push(esz);
                st
            }
        };
        for i in 0..shape.len() - 1 {
            let min_step = step[i + 1]
                .checked_mul(shape[i + 1])
                .ok_or(Error::InvalidStride)?;
            if step[i] % mtype.elem_size1() != 0 || step[i] < min_step {
                return Err(Error::InvalidStride);
            }
        }
        if data.as_ptr() as usize % mtype.elem_size1() != 0 {
            return Err(Error::InvalidStride);
        }

        let span = span_bytes(shape, &step, esz);
        // SAFETY: the caller guarantees `span` bytes at `data` stay valid.
        let buf = unsafe { SharedBuffer::wrap_user_memory(data, span) };
        let mut m = Self {
            mtype,
            size: shape.iter().copied().collect(),
            step,
            data: data.as_ptr(),
            datastart: data.as_ptr(),
            // SAFETY: one past the end of the caller's span.
            dataend: unsafe { data.as_ptr().add(span) },
            buf: Some(buf),
            ..Self::new()
        };
        m.update_flags();
        Ok(m)
    }

    /// (Re)allocates storage for `shape` and `mtype`.
    ///
    /// Existing storage is kept when the shape and type already match, even
    /// when `self` is a view into a larger parent, so writing into a
    /// correctly-sized ROI fills the parent. Fresh storage is zero-filled.
    pub fn create(&mut self, shape: &[usize], mtype: MatType) -> Result<()> {
        check_dims(shape.len())?;
        if !self.data.is_null() && self.mtype == mtype && self.size.as_slice() == shape {
            return Ok(());
        }

        let (step, bytes) = packed_steps(shape, mtype.elem_size())?;
        let buf = if bytes > 0 {
            let allocator = self.allocator.clone().unwrap_or_else(default_allocator);
            Some(SharedBuffer::allocate(allocator, bytes)?)
        } else {
            None
        };

        self.release();
        self.mtype = mtype;
        self.size = shape.iter().copied().collect();
        self.step = step;
        if let Some(buf) = buf {
            self.data = buf.as_ptr();
            self.datastart = self.data;
            // SAFETY: the block holds at least `bytes` bytes.
            self.dataend = unsafe { self.data.add(bytes) };
            self.buf = Some(buf);
        }
        self.update_flags();
        Ok(())
    }

    pub fn create_same_size(&mut self, other: &Mat, mtype: MatType) -> Result<()> {
        if other.dims() == 0 {
            self.release();
            return Ok(());
        }
        self.create(other.size(), mtype)
    }

    /// Drops this array's claim on its buffer. Other aliases keep theirs.
    pub fn release(&mut self) {
        self.buf = None;
        self.data = ptr::null_mut();
        self.datastart = ptr::null_mut();
        self.dataend = ptr::null();
        self.size.clear();
        self.step.clear();
        self.continuous = true;
        self.submatrix = false;
    }

    /// Deep copy into fresh packed storage.
    pub fn try_copy(&self) -> Result<Mat> {
        let mut out = Mat::new();
        out.allocator = self.allocator.clone();
        self.copy_raw_to(&mut out)?;
        Ok(out)
    }

    pub fn dims(&self) -> usize {
        self.size.len()
    }

    /// Extent of every axis.
    pub fn size(&self) -> &[usize] {
        &self.size
    }

    /// Byte stride of every axis.
    pub fn steps(&self) -> &[usize] {
        &self.step
    }

    /// Byte stride of `axis`.
    ///
    /// # Panics
    ///
    /// Panics if `axis >= self.dims()`.
    pub fn step(&self, axis: usize) -> usize {
        self.step[axis]
    }

    /// Extent of axis 0.
    pub fn rows(&self) -> usize {
        self.size.first().copied().unwrap_or(0)
    }

    /// Extent of axis 1; 1 for one-dimensional arrays.
    pub fn cols(&self) -> usize {
        match self.size.len() {
            0 => 0,
            1 => 1,
            _ => self.size[1],
        }
    }

    pub fn size_2d(&self) -> Size {
        Size::new(self.cols(), self.rows())
    }

    pub fn mat_type(&self) -> MatType {
        self.mtype
    }

    pub fn depth(&self) -> Depth {
        self.mtype.depth()
    }

    pub fn channels(&self) -> usize {
        self.mtype.channels()
    }

    pub fn elem_size(&self) -> usize {
        self.mtype.elem_size()
    }

    pub fn elem_size1(&self) -> usize {
        self.mtype.elem_size1()
    }

    /// Number of elements (not channels).
    pub fn total(&self) -> usize {
        if self.size.is_empty() {
            return 0;
        }
        self.size.iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_null() || self.total() == 0
    }

    pub fn is_continuous(&self) -> bool {
        self.continuous
    }

    pub fn is_submatrix(&self) -> bool {
        self.submatrix
    }

    /// Byte offset of the first element from the start of the buffer.
    pub fn offset(&self) -> usize {
        (self.data as usize).saturating_sub(self.datastart as usize)
    }

    pub fn buffer(&self) -> Option<&BufferRef> {
        self.buf.as_ref()
    }

    /// Owner count of the backing buffer, 0 without one.
    pub fn owner_refs(&self) -> usize {
        self.buf.as_ref().map_or(0, |b| b.owner_refs())
    }

    /// Mapped-view count of the backing buffer, 0 without one.
    pub fn view_refs(&self) -> usize {
        self.buf.as_ref().map_or(0, |b| b.view_refs())
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.data
    }

    pub fn as_mut_ptr(&mut self) -> *mut u8 {
        self.data
    }

    pub(crate) fn raw_data(&self) -> *mut u8 {
        self.data
    }

    /// Address of the element at `idx`.
    pub fn ptr(&self, idx: &[usize]) -> Result<*const u8> {
        self.offset_of(idx).map(|off| {
            // SAFETY: `offset_of` only returns in-bounds offsets.
            unsafe { self.data.add(off).cast_const() }
        })
    }

    pub fn ptr_mut(&mut self, idx: &[usize]) -> Result<*mut u8> {
        self.offset_of(idx).map(|off| {
            // SAFETY: `offset_of` only returns in-bounds offsets.
            unsafe { self.data.add(off) }
        })
    }

    /// Start of row `y` of a 2-D array; advance by [`Mat::step`]`(0)` bytes
    /// per row.
    pub fn row_ptr(&self, y: usize) -> Result<*mut u8> {
        if self.dims() != 2 || y >= self.rows() || self.data.is_null() {
            return Err(Error::OutOfBounds);
        }
        // SAFETY: `y` is in bounds.
        Ok(unsafe { self.data.add(y * self.step[0]) })
    }

    fn offset_of(&self, idx: &[usize]) -> Result<usize> {
        if idx.len() != self.dims() || self.is_empty() {
            return Err(Error::OutOfBounds);
        }
        let mut off = 0;
        for ((&i, &s), &st) in idx.iter().zip(&self.size).zip(&self.step) {
            if i >= s {
                return Err(Error::OutOfBounds);
            }
            off += i * st;
        }
        Ok(off)
    }

    fn check_element<T: Element>(&self) -> Result<()> {
        if T::DEPTH != self.depth() {
            return Err(Error::TypeMismatch);
        }
        Ok(())
    }

    /// Value of a single-channel element.
    pub fn at<T: Element>(&self, idx: &[usize]) -> Result<T> {
        self.check_element::<T>()?;
        if self.channels() != 1 {
            return Err(Error::TypeMismatch);
        }
        let p = self.ptr(idx)?;
        // SAFETY: `p` addresses one in-bounds, aligned `T`.
        Ok(unsafe { p.cast::<T>().read() })
    }

    /// All channels of the element at `idx`.
    pub fn pixel<T: Element>(&self, idx: &[usize]) -> Result<Vec<T>> {
        self.check_element::<T>()?;
        let p = self.ptr(idx)?.cast::<T>();
        // SAFETY: the element holds `channels` consecutive values of `T`.
        Ok((0..self.channels())
            .map(|c| unsafe { p.add(c).read() })
            .collect())
    }

    pub fn set_at<T: Element>(&mut self, idx: &[usize], value: T) -> Result<()> {
        self.check_element::<T>()?;
        if self.channels() != 1 {
            return Err(Error::TypeMismatch);
        }
        let p = self.ptr_mut(idx)?;
        // SAFETY: `p` addresses one in-bounds, aligned `T`.
        unsafe { p.cast::<T>().write(value) };
        Ok(())
    }

    /// Copies every value out in row-major order, channels interleaved.
    pub fn to_vec<T: Element>(&self) -> Result<Vec<T>> {
        self.check_element::<T>()?;
        let mut out = Vec::with_capacity(self.total() * self.channels());
        if self.is_empty() {
            return Ok(out);
        }
        let it = PlaneIter::new(&[self])?;
        let n = it.plane_len() * self.channels();
        for plane in it {
            let p = plane.ptr(0).cast::<T>().cast_const();
            // SAFETY: each plane holds `n` contiguous values of `T`.
            out.extend_from_slice(unsafe { std::slice::from_raw_parts(p, n) });
        }
        Ok(out)
    }

    /// View over the ranges `ranges[axis]` of every axis.
    pub fn slice(&self, ranges: &[Range<usize>]) -> Result<Mat> {
        if ranges.len() != self.dims() {
            return Err(Error::ShapeMismatch);
        }
        let mut off = 0;
        let mut partial = false;
        for ((r, &s), &st) in ranges.iter().zip(&self.size).zip(&self.step) {
            if r.start > r.end || r.end > s {
                return Err(Error::OutOfBounds);
            }
            partial |= r.start != 0 || r.end != s;
            off += r.start * st;
        }

        let mut view = self.clone();
        view.size = ranges.iter().map(|r| r.end - r.start).collect();
        if !self.data.is_null() {
            // SAFETY: `off` addresses an element inside the parent view.
            view.data = unsafe { self.data.add(off) };
        }
        view.submatrix = self.submatrix || partial;
        view.update_flags();
        Ok(view)
    }

    /// 2-D region of interest.
    pub fn roi(&self, rect: Rect) -> Result<Mat> {
        if self.dims() != 2 {
            return Err(Error::Unsupported("roi requires a 2-D array"));
        }
        if !rect.fits_in(self.size_2d()) {
            return Err(Error::OutOfBounds);
        }
        self.slice(&[rect.y..rect.y + rect.height, rect.x..rect.x + rect.width])
    }

    pub fn row_range(&self, rows: Range<usize>) -> Result<Mat> {
        let mut ranges: Vec<Range<usize>> = self.size.iter().map(|&s| 0..s).collect();
        let first = ranges.first_mut().ok_or(Error::OutOfBounds)?;
        *first = rows;
        self.slice(&ranges)
    }

    pub fn row(&self, y: usize) -> Result<Mat> {
        self.row_range(y..y + 1)
    }

    pub fn col(&self, x: usize) -> Result<Mat> {
        if self.dims() != 2 {
            return Err(Error::Unsupported("col requires a 2-D array"));
        }
        self.slice(&[0..self.rows(), x..x + 1])
    }

    /// Size of the parent this 2-D view was cut from, and this view's
    /// top-left corner inside it.
    pub fn locate_roi(&self) -> Result<(Size, Point)> {
        if self.dims() != 2 {
            return Err(Error::Unsupported("locate_roi requires a 2-D array"));
        }
        if self.data.is_null() {
            return Ok((Size::default(), Point::default()));
        }
        // A packed array with zero columns has no row stride to divide by.
        if self.step[0] == 0 {
            return Ok((Size::new(self.cols(), self.rows()), Point::default()));
        }
        let esz = self.elem_size();
        let step0 = self.step[0];
        let delta1 = self.data as usize - self.datastart as usize;
        let delta2 = self.dataend as usize - self.datastart as usize;

        let ofs = if delta1 == 0 {
            Point::default()
        } else {
            let y = delta1 / step0;
            Point {
                x: (delta1 - y * step0) / esz,
                y,
            }
        };
        let min_step = (ofs.x + self.cols()) * esz;
        let height = (delta2.saturating_sub(min_step) / step0 + 1).max(ofs.y + self.rows());
        let width = (delta2.saturating_sub(step0 * (height - 1)) / esz).max(ofs.x + self.cols());
        Ok((Size::new(width, height), ofs))
    }

    /// Moves the edges of a 2-D view outwards (positive) or inwards
    /// (negative), clamped to the parent's extent.
    pub fn adjust_roi(&mut self, top: isize, bottom: isize, left: isize, right: isize) -> Result<()> {
        let (whole, ofs) = self.locate_roi()?;
        if self.data.is_null() {
            return Ok(());
        }
        let (wh, ww) = (whole.height as isize, whole.width as isize);
        let (oy, ox) = (ofs.y as isize, ofs.x as isize);

        let row1 = (oy - top).clamp(0, wh);
        let row2 = (oy + self.rows() as isize + bottom).clamp(row1, wh);
        let col1 = (ox - left).clamp(0, ww);
        let col2 = (ox + self.cols() as isize + right).clamp(col1, ww);

        let delta = (row1 - oy) * self.step[0] as isize + (col1 - ox) * self.elem_size() as isize;
        // SAFETY: the new origin lies inside the parent's addressable span.
        self.data = unsafe { self.data.offset(delta) };
        self.size[0] = (row2 - row1) as usize;
        self.size[1] = (col2 - col1) as usize;
        self.submatrix = self.size[0] < whole.height || self.size[1] < whole.width;
        self.update_flags();
        Ok(())
    }

    /// Same bytes viewed as 8-bit with one channel per byte of the element.
    pub fn reinterpret_bytes(&self) -> Result<Mat> {
        let mut view = self.clone();
        view.mtype = MatType::new(Depth::U8, self.elem_size())?;
        view.update_flags();
        Ok(view)
    }

    /// Whether the bytes addressed by `self` and `other` intersect.
    pub fn overlaps(&self, other: &Mat) -> bool {
        if self.is_empty() || other.is_empty() {
            return false;
        }
        let a0 = self.data as usize;
        let a1 = a0 + span_bytes(&self.size, &self.step, self.elem_size());
        let b0 = other.data as usize;
        let b1 = b0 + span_bytes(&other.size, &other.step, other.elem_size());
        a0 < b1 && b0 < a1
    }

    /// Same first element, type and layout.
    pub fn same_view(&self, other: &Mat) -> bool {
        self.data == other.data
            && self.mtype == other.mtype
            && self.size == other.size
            && self.step == other.step
    }

    fn update_flags(&mut self) {
        self.continuous = is_continuous_layout(&self.size, &self.step, self.elem_size());
    }
}

impl Default for Mat {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for Mat {
    fn clone(&self) -> Self {
        Self {
            mtype: self.mtype,
            size: self.size.clone(),
            step: self.step.clone(),
            data: self.data,
            datastart: self.datastart,
            dataend: self.dataend,
            buf: self.buf.clone(),
            allocator: self.allocator.clone(),
            continuous: self.continuous,
            submatrix: self.submatrix,
        }
    }
}

impl fmt::Debug for Mat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mat")
            .field("type", &self.mtype)
            .field("size", &self.size.as_slice())
            .field("step", &self.step.as_slice())
            .field("offset", &self.offset())
            .field("continuous", &self.continuous)
            .field("submatrix", &self.submatrix)
            .field("owner_refs", &self.owner_refs())
            .finish()
    }
}
