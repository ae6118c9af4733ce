use core::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The allocator could not provide `requested` bytes.
    OutOfMemory { requested: usize },
    SizeMismatch { expected: usize, actual: usize },
    ShapeMismatch,
    TypeMismatch,
    BadMask,
    BadScalar,
    OutOfBounds,
    InvalidStride,
    TooManyDims { dims: usize },
    TooManyOperands { count: usize },
    Unsupported(&'static str),
    AllocatorAlreadySet,
}

pub type Result<T> = core::result::Result<T, Error>;

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfMemory { requested } => {
                write!(f, "out of memory: failed to allocate {requested} bytes")
            }
            Self::SizeMismatch { expected, actual } => {
                write!(f, "size mismatch: expected {expected}, got {actual}")
            }
            Self::ShapeMismatch => write!(f, "operand shapes do not match"),
            Self::TypeMismatch => write!(f, "operand element types do not match"),
            Self::BadMask => write!(f, "mask must be 8-bit with matching shape and channels"),
            Self::BadScalar => write!(f, "scalar operand has the wrong number of components"),
            Self::OutOfBounds => write!(f, "out of bounds"),
            Self::InvalidStride => write!(f, "invalid stride"),
            Self::TooManyDims { dims } => write!(f, "too many dimensions: {dims}"),
            Self::TooManyOperands { count } => {
                write!(f, "too many operands for one iteration: {count}")
            }
            Self::Unsupported(what) => write!(f, "unsupported: {what}"),
            Self::AllocatorAlreadySet => {
                write!(f, "default allocator was already installed")
            }
        }
    }
}

impl std::error::Error for Error {}
