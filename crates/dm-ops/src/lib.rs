//! Element-wise and reduction algorithms over [`dm_core::Mat`].
//!
//! Every algorithm validates its operands before touching memory, builds a
//! [`dm_core::PlaneIter`] over them and drives a kernel picked from a
//! per-depth (or per-element-size) table across the planes.
//!
//! Aliasing policy:
//! - `dst` may be the same view as an input; kernels then run in place.
//! - A `dst` that only partially overlaps an input gets that input copied
//!   first.

mod bitwise;
mod channels;
mod flip;
mod make_border;
mod minmax;
mod norm;

pub use bitwise::{BitOp, bitwise_and, bitwise_not, bitwise_or, bitwise_scalar, bitwise_xor};
pub use channels::{merge, split, split_to_vec};
pub use flip::{FlipMode, flip};
pub use make_border::{Border, copy_make_border};
pub use minmax::{MinMaxIdx, min_max_idx, min_max_val};
pub use norm::{NormKind, NormType, norm, norm_diff, norm_hamming, normalize};
