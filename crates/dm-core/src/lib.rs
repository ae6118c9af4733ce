//! Strided N-dimensional arrays over reference-counted shared storage.
//!
//! ## Arrays and Views
//! A [`Mat`] is a shape, per-axis byte strides, an element type
//! ([`MatType`]: one of eight [`Depth`]s times a channel count) and a handle
//! to a [`SharedBuffer`]. Views (ROIs, slices, rows) alias the parent's
//! buffer and keep it alive; the buffer is freed when its last owner and its
//! last mapping are gone. The last axis is always packed; padding between
//! rows is what makes a view non-continuous.
//!
//! ## Plane Iteration
//! Element-wise algorithms run over a [`PlaneIter`], which collapses the
//! trailing axes that are contiguous in every operand into one run and walks
//! the rest in row-major order. Kernels see flat runs regardless of
//! dimensionality.
//!
//! ## Saturation
//! All conversions clamp to the destination range; float-to-integer
//! conversions round to nearest, ties to even.

mod allocator;
mod border;
mod buffer;
mod copy;
mod depth;
mod error;
mod geom;
mod iter;
pub mod kernels;
mod mat;
mod parallel;
mod scalar;

pub use allocator::{
    Allocator, DEFAULT_ALIGNMENT, SystemAllocator, align_size, default_allocator,
    set_default_allocator,
};
pub use border::{BorderType, border_interpolate};
pub use buffer::{BufferRef, MapGuard, SharedBuffer};
pub use copy::{MaskKind, validate_mask};
pub use depth::{CN_MAX, Depth, Element, MatType, Wide, saturate_cast};
pub use error::{Error, Result};
pub use geom::{Padding, Point, Rect, Size};
pub use iter::{BLOCK_SIZE, MAX_OPERANDS, Plane, PlaneIter, block_len};
pub use mat::{MAX_DIMS, Mat};
pub use parallel::{in_parallel_region, parallel_for};
pub use scalar::Scalar;
