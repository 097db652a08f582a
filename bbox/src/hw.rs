use crate::common::*;

/// Height and width of an image or a rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HW<T> {
    pub(crate) h: T,
    pub(crate) w: T,
}

impl<T> HW<T> {
    pub fn try_cast<U>(self) -> Option<HW<U>>
    where
        T: ToPrimitive,
        U: NumCast,
    {
        Some(HW {
            h: U::from(self.h)?,
            w: U::from(self.w)?,
        })
    }
}

impl<T> HW<T>
where
    T: Num + PartialOrd + Copy,
{
    pub fn try_from_hw([h, w]: [T; 2]) -> Result<Self> {
        let zero = T::zero();
        ensure!(
            h >= zero && w >= zero,
            "height and width must be non-negative"
        );
        Ok(Self { h, w })
    }

    pub fn h(&self) -> T {
        self.h
    }

    pub fn w(&self) -> T {
        self.w
    }

    pub fn hw(&self) -> [T; 2] {
        [self.h, self.w]
    }

    pub fn area(&self) -> T {
        self.h * self.w
    }
}

impl HW<usize> {
    pub fn new(h: usize, w: usize) -> Self {
        Self { h, w }
    }

    /// Size of a map downsampled by `factor`, rounding up.
    pub fn ceil_div(&self, factor: usize) -> Self {
        debug_assert!(factor > 0);
        Self {
            h: (self.h + factor - 1) / factor,
            w: (self.w + factor - 1) / factor,
        }
    }

    /// Smallest size not less than `self` whose sides are multiples of `unit`.
    pub fn round_up_to(&self, unit: usize) -> Self {
        debug_assert!(unit > 0);
        Self {
            h: (self.h + unit - 1) / unit * unit,
            w: (self.w + unit - 1) / unit * unit,
        }
    }

    pub fn max(&self, other: &Self) -> Self {
        Self {
            h: self.h.max(other.h),
            w: self.w.max(other.w),
        }
    }
}
