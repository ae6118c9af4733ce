use crate::{Element, Error, MatType, Result, with_depth};

/// Up to four numeric components broadcast across an array's channels.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Scalar(pub [f64; 4]);

impl Scalar {
    pub const fn new(v0: f64, v1: f64, v2: f64, v3: f64) -> Self {
        Self([v0, v1, v2, v3])
    }

    /// Same value in every component.
    pub const fn all(v: f64) -> Self {
        Self([v; 4])
    }

    pub fn from_slice(values: &[f64]) -> Result<Self> {
        if values.len() > 4 {
            return Err(Error::BadScalar);
        }
        let mut out = [0.0; 4];
        out[..values.len()].copy_from_slice(values);
        Ok(Self(out))
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|&v| v == 0.0)
    }

    /// Encodes the first `channels` components as one element of `mtype`,
    /// with saturation, in native byte order.
    pub fn to_raw(&self, mtype: MatType) -> Result<Vec<u8>> {
        let cn = mtype.channels();
        if cn > 4 {
            return Err(Error::BadScalar);
        }
        let mut out = Vec::with_capacity(mtype.elem_size());
        with_depth!(mtype.depth(), T => {
            for &v in &self.0[..cn] {
                out.extend_from_slice(&encode::<T>(T::from_f64(v)));
            }
        });
        Ok(out)
    }
}

impl From<f64> for Scalar {
    fn from(v: f64) -> Self {
        Self([v, 0.0, 0.0, 0.0])
    }
}

impl From<[f64; 4]> for Scalar {
    fn from(v: [f64; 4]) -> Self {
        Self(v)
    }
}

fn encode<T: Element>(v: T) -> Vec<u8> {
    let mut bytes = vec![0u8; size_of::<T>()];
    // SAFETY: `bytes` holds exactly `size_of::<T>()` bytes and `T` is a plain
    // numeric type with no padding.
    unsafe { bytes.as_mut_ptr().cast::<T>().write_unaligned(v) };
    bytes
}
