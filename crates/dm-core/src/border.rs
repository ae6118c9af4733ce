use crate::Error;

/// How coordinates outside `[0, len)` map back into range.
///
/// With `len = 5` and `abcde` as the row:
/// - `Replicate`: `aaa|abcde|eee`
/// - `Reflect`: `cba|abcde|edc`
/// - `Reflect101`: `dcb|abcde|dcb` (edge not repeated)
/// - `Wrap`: `cde|abcde|abc`
/// - `Constant`: no mapping, the caller substitutes a fill value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BorderType {
    Constant,
    Replicate,
    Reflect,
    Wrap,
    Reflect101,
}

impl TryFrom<i32> for BorderType {
    type Error = Error;

    fn try_from(code: i32) -> Result<Self, Error> {
        match code {
            0 => Ok(Self::Constant),
            1 => Ok(Self::Replicate),
            2 => Ok(Self::Reflect),
            3 => Ok(Self::Wrap),
            4 => Ok(Self::Reflect101),
            _ => Err(Error::Unsupported("unknown border type")),
        }
    }
}

/// Maps coordinate `p` into `[0, len)`; `None` means "use the fill value"
/// (constant borders, or nothing to map into when `len == 0`).
pub fn border_interpolate(p: isize, len: usize, border: BorderType) -> Option<usize> {
    if len == 0 {
        return None;
    }
    if p >= 0 && (p as usize) < len {
        return Some(p as usize);
    }
    let n = len as isize;
    match border {
        BorderType::Constant => None,
        BorderType::Replicate => Some(if p < 0 { 0 } else { len - 1 }),
        BorderType::Wrap => Some(p.rem_euclid(n) as usize),
        BorderType::Reflect => {
            let r = p.rem_euclid(2 * n);
            let m = if r < n { r } else { 2 * n - 1 - r };
            Some(m as usize)
        }
        BorderType::Reflect101 => {
            if len == 1 {
                return Some(0);
            }
            let period = 2 * n - 2;
            let r = p.rem_euclid(period);
            let m = if r < n { r } else { period - r };
            Some(m as usize)
        }
    }
}
