use core::ops::Add;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct Point {
    pub x: usize,
    pub y: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct Size {
    pub width: usize,
    pub height: usize,
}

impl Size {
    pub fn new(width: usize, height: usize) -> Self {
        Self { width, height }
    }

    pub fn area(self) -> usize {
        self.width * self.height
    }
}

/// Axis-aligned pixel rectangle, `(x, y)` is the top-left corner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct Rect {
    pub x: usize,
    pub y: usize,
    pub width: usize,
    pub height: usize,
}

impl Rect {
    pub fn new(x: usize, y: usize, width: usize, height: usize) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn origin(self) -> Point {
        Point {
            x: self.x,
            y: self.y,
        }
    }

    pub fn size(self) -> Size {
        Size::new(self.width, self.height)
    }

    /// Whether the rectangle lies inside `[0, bounds.width) x [0, bounds.height)`.
    pub fn fits_in(self, bounds: Size) -> bool {
        self.x <= bounds.width
            && self.y <= bounds.height
            && self.width <= bounds.width - self.x
            && self.height <= bounds.height - self.y
    }
}

impl Add<Size> for Point {
    type Output = Point;

    fn add(self, rhs: Size) -> Self::Output {
        Point {
            x: self.x + rhs.width,
            y: self.y + rhs.height,
        }
    }
}

/// Widths of the four borders added around a 2-D array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Padding {
    pub top: usize,
    pub bottom: usize,
    pub left: usize,
    pub right: usize,
}

impl Padding {
    pub fn new(top: usize, bottom: usize, left: usize, right: usize) -> Self {
        Self {
            top,
            bottom,
            left,
            right,
        }
    }

    pub fn uniform(width: usize) -> Self {
        Self::new(width, width, width, width)
    }

    /// Rejects negative widths coming from signed callers.
    pub fn try_from_signed(top: i64, bottom: i64, left: i64, right: i64) -> Option<Self> {
        Some(Self::new(
            usize::try_from(top).ok()?,
            usize::try_from(bottom).ok()?,
            usize::try_from(left).ok()?,
            usize::try_from(right).ok()?,
        ))
    }
}
