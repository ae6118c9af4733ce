use std::ptr::NonNull;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use dm_core::{Allocator, BorderType, Depth, Mat, MatType, Padding, Rect, Result, Scalar, SystemAllocator};
use dm_ops::{Border, FlipMode, bitwise_not, copy_make_border, flip, min_max_idx, norm_hamming};
use proptest::prelude::*;

#[derive(Debug, Default)]
struct Tally {
    allocs: AtomicUsize,
    frees: AtomicUsize,
    inner: SystemAllocator,
}

impl Allocator for Tally {
    fn allocate(&self, size: usize) -> Result<NonNull<u8>> {
        self.allocs.fetch_add(1, Ordering::SeqCst);
        self.inner.allocate(size)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, size: usize) {
        self.frees.fetch_add(1, Ordering::SeqCst);
        // SAFETY: forwarded from the caller.
        unsafe { self.inner.deallocate(ptr, size) };
    }
}

#[test]
fn identity_convert_equals_copy_bytes() {
    let src = Mat::from_slice(&[2, 3], 2, &[1i16, -2, 300, -400, 5, 6, 7, 8, 9, 10, 11, 12])
        .expect("valid data");
    let mut converted = Mat::new();
    let mut copied = Mat::new();
    src.convert_to(&mut converted, None, 1.0, 0.0).expect("convert");
    src.copy_to(&mut copied).expect("copy");
    assert_eq!(
        converted.reinterpret_bytes().expect("bytes").to_vec::<u8>().expect("u8"),
        copied.reinterpret_bytes().expect("bytes").to_vec::<u8>().expect("u8")
    );
}

#[test]
fn i32_to_u8_saturates() {
    let src = Mat::from_slice(&[2], 1, &[300i32, -10]).expect("valid data");
    let mut dst = Mat::new();
    src.convert_to(&mut dst, Some(Depth::U8), 1.0, 0.0).expect("convert");
    assert_eq!(dst.to_vec::<u8>().expect("u8"), vec![255, 0]);
}

#[test]
fn view_refcount_and_single_free() {
    let alloc = Arc::new(Tally::default());
    let mut parent = Mat::new_in(alloc.clone());
    parent.create(&[8, 8], MatType::F32C1).expect("allocates");
    assert_eq!(parent.owner_refs(), 1);

    let view = parent.roi(Rect::new(2, 2, 4, 4)).expect("roi");
    assert_eq!(parent.owner_refs(), 2);
    drop(view);
    assert_eq!(parent.owner_refs(), 1);

    let view = parent.row(3).expect("row");
    drop(parent);
    assert_eq!(alloc.frees.load(Ordering::SeqCst), 0, "view keeps the buffer alive");
    drop(view);
    assert_eq!(alloc.allocs.load(Ordering::SeqCst), 1);
    assert_eq!(alloc.frees.load(Ordering::SeqCst), 1);
}

#[test]
fn masked_copy_alternating() {
    let src = Mat::new_with_scalar(&[2, 4], MatType::U8C1, Scalar::all(7.0)).expect("src");
    let mut dst = Mat::new_with_scalar(&[2, 4], MatType::U8C1, Scalar::all(9.0)).expect("dst");
    let mask = Mat::from_slice(&[2, 4], 1, &[1u8, 0, 1, 0, 1, 0, 1, 0])
        .expect("mask");
    src.copy_to_masked(&mut dst, &mask).expect("copy");
    assert_eq!(dst.size(), &[2, 4]);
    assert_eq!(dst.to_vec::<u8>().expect("u8"), vec![7, 9, 7, 9, 7, 9, 7, 9]);
}

#[test]
fn min_max_tie_break() {
    let m = Mat::from_slice(&[3], 1, &[5i32, 5, 5]).expect("valid data");
    let r = min_max_idx(&m, None).expect("single channel");
    assert_eq!((r.min_val, r.max_val), (5.0, 5.0));
    assert_eq!(r.min_idx, Some(vec![0]));
    assert_eq!(r.max_idx, Some(vec![0]));
}

#[test]
fn replicate_border_row() {
    let src = Mat::from_slice(&[1, 3], 1, &[1u8, 2, 3]).expect("valid data");
    let mut dst = Mat::new();
    copy_make_border(&src, &mut dst, Padding::new(0, 0, 2, 2), &Border::new(BorderType::Replicate))
        .expect("border");
    assert_eq!(dst.to_vec::<u8>().expect("u8"), vec![1, 1, 1, 2, 3, 3, 3]);
}

#[test]
fn flip_modes() {
    let src = Mat::from_slice(&[2, 2], 1, &[1u8, 2, 3, 4]).expect("valid data");
    let mut dst = Mat::new();
    for (mode, expected) in [(0, [3, 4, 1, 2]), (1, [2, 1, 4, 3]), (-1, [4, 3, 2, 1])] {
        flip(&src, &mut dst, mode).expect("flip");
        assert_eq!(dst.to_vec::<u8>().expect("u8"), expected.to_vec(), "mode {mode}");
    }
}

#[test]
fn hamming_popcount() {
    let a = Mat::from_slice(&[1], 1, &[0b1111_0000u8]).expect("valid data");
    let b = Mat::from_slice(&[1], 1, &[0u8]).expect("valid data");
    assert_eq!(norm_hamming(&a, Some(&b), 1).expect("cell 1"), 4);
}

#[test]
fn singleton_middle_axis_view_skips_row_padding() {
    let mut data: Vec<u8> = (0..12).collect();
    data[4] = 200;
    data[5] = 201;
    let parent = Mat::from_slice(&[2, 1, 6], 1, &data).expect("valid data");
    let view = parent.slice(&[0..2, 0..1, 0..4]).expect("in bounds");

    let r = min_max_idx(&view, None).expect("single channel");
    assert_eq!((r.min_val, r.max_val), (0.0, 9.0));
    assert_eq!(r.max_idx, Some(vec![1, 0, 3]));

    let mut inverted = Mat::new();
    bitwise_not(&view, &mut inverted, None).expect("not");
    assert_eq!(inverted.size(), &[2, 1, 4]);
    assert_eq!(
        inverted.to_vec::<u8>().expect("u8"),
        vec![255, 254, 253, 252, 249, 248, 247, 246]
    );
}

proptest! {
    /// Flipping twice with the same mode restores the input.
    #[test]
    fn flip_is_an_involution(
        rows in 1usize..9,
        cols in 1usize..9,
        mode in -2i32..3,
        seed in any::<u32>(),
    ) {
        let data: Vec<u32> = (0..(rows * cols) as u32).map(|v| v.wrapping_mul(seed | 1)).collect();
        let src = Mat::from_slice(&[rows, cols], 1, &data).expect("valid data");
        let mut once = Mat::new();
        let mut twice = Mat::new();
        flip(&src, &mut once, FlipMode::from(mode)).expect("flip");
        flip(&once, &mut twice, mode).expect("flip back");
        prop_assert_eq!(twice.to_vec::<u32>().expect("u32"), data);
    }

    /// Every border kind keeps the source intact in the interior.
    #[test]
    fn border_interior_is_source(
        rows in 1usize..6,
        cols in 1usize..6,
        top in 0usize..4,
        left in 0usize..4,
        code in 0i32..5,
    ) {
        let data: Vec<u8> = (0..(rows * cols) as u8).collect();
        let src = Mat::from_slice(&[rows, cols], 1, &data).expect("valid data");
        let kind = BorderType::try_from(code).expect("known code");
        let mut dst = Mat::new();
        copy_make_border(&src, &mut dst, Padding::new(top, 1, left, 2), &Border::new(kind))
            .expect("border");
        prop_assert_eq!(dst.size(), &[rows + top + 1, cols + left + 2]);
        let inner = dst.roi(Rect::new(left, top, cols, rows)).expect("interior");
        prop_assert_eq!(inner.to_vec::<u8>().expect("u8"), data);
    }
}
