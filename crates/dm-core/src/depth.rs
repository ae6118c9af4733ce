use core::fmt;

use crate::{Error, Result};

/// Upper bound on channels per element. Only the raw-byte paths go past 4.
pub const CN_MAX: usize = 512;

/// Scalar numeric representation of one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Depth {
    U8 = 0,
    I8 = 1,
    U16 = 2,
    I16 = 3,
    U32 = 4,
    I32 = 5,
    F32 = 6,
    F64 = 7,
}

impl Depth {
    pub const ALL: [Depth; 8] = [
        Depth::U8,
        Depth::I8,
        Depth::U16,
        Depth::I16,
        Depth::U32,
        Depth::I32,
        Depth::F32,
        Depth::F64,
    ];

    /// Size of one channel in bytes.
    #[inline]
    pub const fn size(self) -> usize {
        match self {
            Depth::U8 | Depth::I8 => 1,
            Depth::U16 | Depth::I16 => 2,
            Depth::U32 | Depth::I32 | Depth::F32 => 4,
            Depth::F64 => 8,
        }
    }

    /// Row/column index into the per-depth dispatch tables.
    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    #[inline]
    pub const fn is_float(self) -> bool {
        matches!(self, Depth::F32 | Depth::F64)
    }

    pub const fn name(self) -> &'static str {
        match self {
            Depth::U8 => "u8",
            Depth::I8 => "i8",
            Depth::U16 => "u16",
            Depth::I16 => "i16",
            Depth::U32 => "u32",
            Depth::I32 => "i32",
            Depth::F32 => "f32",
            Depth::F64 => "f64",
        }
    }
}

impl fmt::Display for Depth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Element type: a depth combined with a channel count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MatType {
    depth: Depth,
    channels: u16,
}

impl MatType {
    pub const U8C1: MatType = MatType::raw(Depth::U8, 1);
    pub const U8C3: MatType = MatType::raw(Depth::U8, 3);
    pub const U8C4: MatType = MatType::raw(Depth::U8, 4);
    pub const U16C1: MatType = MatType::raw(Depth::U16, 1);
    pub const I16C1: MatType = MatType::raw(Depth::I16, 1);
    pub const I32C1: MatType = MatType::raw(Depth::I32, 1);
    pub const F32C1: MatType = MatType::raw(Depth::F32, 1);
    pub const F32C3: MatType = MatType::raw(Depth::F32, 3);
    pub const F64C1: MatType = MatType::raw(Depth::F64, 1);

    const fn raw(depth: Depth, channels: u16) -> Self {
        Self { depth, channels }
    }

    pub fn new(depth: Depth, channels: usize) -> Result<Self> {
        if channels == 0 || channels > CN_MAX {
            return Err(Error::Unsupported("channel count must be in 1..=512"));
        }
        Ok(Self {
            depth,
            channels: channels as u16,
        })
    }

    #[inline]
    pub const fn depth(self) -> Depth {
        self.depth
    }

    #[inline]
    pub const fn channels(self) -> usize {
        self.channels as usize
    }

    /// Bytes per channel.
    #[inline]
    pub const fn elem_size1(self) -> usize {
        self.depth.size()
    }

    /// Bytes per element (all channels).
    #[inline]
    pub const fn elem_size(self) -> usize {
        self.depth.size() * self.channels as usize
    }

    pub const fn with_depth(self, depth: Depth) -> Self {
        Self {
            depth,
            channels: self.channels,
        }
    }
}

impl fmt::Display for MatType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.depth, self.channels)
    }
}

/// Intermediate representation for saturating conversions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Wide {
    Int(i64),
    Float(f64),
}

/// A plain numeric channel type that can live in a [`crate::Mat`].
pub trait Element: Copy + Default + PartialOrd + fmt::Debug + Send + Sync + 'static {
    const DEPTH: Depth;
    /// Smallest value; negative infinity for floats.
    const LOWER_BOUND: Self;
    /// Largest value; positive infinity for floats.
    const UPPER_BOUND: Self;

    fn widen(self) -> Wide;

    /// Clamps to the representable range; floats round to nearest (ties to even).
    fn saturate(v: Wide) -> Self;

    fn to_f32(self) -> f32;
    fn from_f32(v: f32) -> Self;

    #[inline]
    fn to_f64(self) -> f64 {
        match self.widen() {
            Wide::Int(i) => i as f64,
            Wide::Float(f) => f,
        }
    }

    #[inline]
    fn from_f64(v: f64) -> Self {
        Self::saturate(Wide::Float(v))
    }
}

/// Saturating numeric cast between any two element types.
#[inline]
pub fn saturate_cast<S: Element, D: Element>(v: S) -> D {
    D::saturate(v.widen())
}

macro_rules! impl_int_element {
    ($t:ty, $depth:ident) => {
        impl Element for $t {
            const DEPTH: Depth = Depth::$depth;
            const LOWER_BOUND: Self = <$t>::MIN;
            const UPPER_BOUND: Self = <$t>::MAX;

            #[inline]
            fn widen(self) -> Wide {
                Wide::Int(self as i64)
            }

            #[inline]
            fn saturate(v: Wide) -> Self {
                match v {
                    Wide::Int(i) => i.clamp(<$t>::MIN as i64, <$t>::MAX as i64) as $t,
                    // `as` from float saturates and maps NaN to zero.
                    Wide::Float(f) => f.round_ties_even() as $t,
                }
            }

            #[inline]
            fn to_f32(self) -> f32 {
                self as f32
            }

            #[inline]
            fn from_f32(v: f32) -> Self {
                v.round_ties_even() as $t
            }
        }
    };
}

macro_rules! impl_float_element {
    ($t:ty, $depth:ident) => {
        impl Element for $t {
            const DEPTH: Depth = Depth::$depth;
            const LOWER_BOUND: Self = <$t>::NEG_INFINITY;
            const UPPER_BOUND: Self = <$t>::INFINITY;

            #[inline]
            fn widen(self) -> Wide {
                Wide::Float(self as f64)
            }

            #[inline]
            fn saturate(v: Wide) -> Self {
                match v {
                    Wide::Int(i) => i as $t,
                    Wide::Float(f) => f as $t,
                }
            }

            #[inline]
            fn to_f32(self) -> f32 {
                self as f32
            }

            #[inline]
            fn from_f32(v: f32) -> Self {
                v as $t
            }
        }
    };
}

impl_int_element!(u8, U8);
impl_int_element!(i8, I8);
impl_int_element!(u16, U16);
impl_int_element!(i16, I16);
impl_int_element!(u32, U32);
impl_int_element!(i32, I32);
impl_float_element!(f32, F32);
impl_float_element!(f64, F64);

/// Invokes `$body` with `$t` bound to the Rust type of `$depth`.
#[macro_export]
macro_rules! with_depth {
    ($depth:expr, $t:ident => $body:expr) => {
        match $depth {
            $crate::Depth::U8 => {
                type $t = u8;
                $body
            }
            $crate::Depth::I8 => {
                type $t = i8;
                $body
            }
            $crate::Depth::U16 => {
                type $t = u16;
                $body
            }
            $crate::Depth::I16 => {
                type $t = i16;
                $body
            }
            $crate::Depth::U32 => {
                type $t = u32;
                $body
            }
            $crate::Depth::I32 => {
                type $t = i32;
                $body
            }
            $crate::Depth::F32 => {
                type $t = f32;
                $body
            }
            $crate::Depth::F64 => {
                type $t = f64;
                $body
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::{Depth, Element, MatType, saturate_cast};

    #[test]
    fn saturates_i32_into_u8() {
        assert_eq!(saturate_cast::<i32, u8>(300), 255);
        assert_eq!(saturate_cast::<i32, u8>(-10), 0);
        assert_eq!(saturate_cast::<i32, u8>(17), 17);
    }

    #[test]
    fn float_to_int_rounds_to_nearest_even() {
        assert_eq!(saturate_cast::<f32, i16>(2.5), 2);
        assert_eq!(saturate_cast::<f32, i16>(3.5), 4);
        assert_eq!(saturate_cast::<f64, i8>(-1.6), -2);
        assert_eq!(saturate_cast::<f64, u16>(1.0e9), u16::MAX);
        assert_eq!(saturate_cast::<f64, i32>(f64::NAN), 0);
    }

    #[test]
    fn u32_keeps_full_range() {
        assert_eq!(saturate_cast::<u32, i32>(u32::MAX), i32::MAX);
        assert_eq!(saturate_cast::<i32, u32>(-1), 0);
        assert_eq!(saturate_cast::<u32, f64>(u32::MAX), u32::MAX as f64);
    }

    #[test]
    fn mat_type_sizes() {
        let t = MatType::new(Depth::I16, 3).expect("valid type");
        assert_eq!(t.elem_size1(), 2);
        assert_eq!(t.elem_size(), 6);
        assert_eq!(t.to_string(), "i16x3");
        assert!(MatType::new(Depth::U8, 0).is_err());
        assert_eq!(MatType::F32C1.with_depth(Depth::U8), MatType::U8C1);
    }

    #[test]
    fn depth_tags_match_types() {
        assert_eq!(<u32 as Element>::DEPTH, Depth::U32);
        assert_eq!(<f64 as Element>::UPPER_BOUND, f64::INFINITY);
        assert_eq!(<i8 as Element>::LOWER_BOUND, i8::MIN);
        let sizes: Vec<usize> = Depth::ALL.iter().map(|d| d.size()).collect();
        assert_eq!(sizes, vec![1, 1, 2, 2, 4, 4, 4, 8]);
    }
}
