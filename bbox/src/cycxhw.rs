use crate::{common::*, Rect, Transform, TLBR};

/// Rectangle stored as center and size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CyCxHW<T> {
    pub(crate) cy: T,
    pub(crate) cx: T,
    pub(crate) h: T,
    pub(crate) w: T,
}

impl<T> CyCxHW<T>
where
    T: Copy + Num + PartialOrd,
{
    pub fn transform(&self, transform: &Transform<T>) -> Self {
        let zero = T::zero();
        let abs = |value: T| if value < zero { zero - value } else { value };

        CyCxHW {
            cy: self.cy * transform.sy + transform.ty,
            cx: self.cx * transform.sx + transform.tx,
            h: self.h * abs(transform.sy),
            w: self.w * abs(transform.sx),
        }
    }
}

impl<T> Rect for CyCxHW<T>
where
    T: Copy + Num + PartialOrd,
{
    type Type = T;

    fn t(&self) -> T {
        let two = T::one() + T::one();
        self.cy - self.h / two
    }

    fn l(&self) -> T {
        let two = T::one() + T::one();
        self.cx - self.w / two
    }

    fn b(&self) -> T {
        let two = T::one() + T::one();
        self.cy + self.h / two
    }

    fn r(&self) -> T {
        let two = T::one() + T::one();
        self.cx + self.w / two
    }

    fn cy(&self) -> T {
        self.cy
    }

    fn cx(&self) -> T {
        self.cx
    }

    fn h(&self) -> T {
        self.h
    }

    fn w(&self) -> T {
        self.w
    }

    fn try_from_tlbr(tlbr: [T; 4]) -> Result<Self> {
        let rect = TLBR::try_from_tlbr(tlbr)?;
        Ok((&rect).into())
    }

    fn try_from_tlhw([t, l, h, w]: [T; 4]) -> Result<Self> {
        Self::try_from_tlbr([t, l, t + h, l + w])
    }

    fn try_from_cycxhw([cy, cx, h, w]: [T; 4]) -> Result<Self> {
        let zero = T::zero();
        ensure!(h >= zero && w >= zero, "h and w must be non-negative");
        Ok(Self { cy, cx, h, w })
    }
}

impl<T> From<&TLBR<T>> for CyCxHW<T>
where
    T: Copy + Num + PartialOrd,
{
    fn from(from: &TLBR<T>) -> Self {
        CyCxHW {
            cy: from.cy(),
            cx: from.cx(),
            h: from.h(),
            w: from.w(),
        }
    }
}

impl<T> From<TLBR<T>> for CyCxHW<T>
where
    T: Copy + Num + PartialOrd,
{
    fn from(from: TLBR<T>) -> Self {
        (&from).into()
    }
}
