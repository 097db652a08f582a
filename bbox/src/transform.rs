use crate::{common::*, CyCxHW, Rect, HW, TLBR};

/// Per-axis affine map `y' = y * sy + ty`, `x' = x * sx + tx`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Transform<T> {
    pub sy: T,
    pub sx: T,
    pub ty: T,
    pub tx: T,
}

impl<T> Transform<T>
where
    T: Copy + Num + PartialOrd,
{
    pub fn identity() -> Self {
        Self {
            sy: T::one(),
            sx: T::one(),
            ty: T::zero(),
            tx: T::zero(),
        }
    }

    /// The transform mapping `src` onto `tgt`.
    pub fn from_rects<R>(src: &R, tgt: &R) -> Self
    where
        R: Rect<Type = T>,
    {
        let sy = tgt.h() / src.h();
        let sx = tgt.w() / src.w();
        let ty = tgt.t() - src.t() * sy;
        let tx = tgt.l() - src.l() * sx;
        Self { sy, sx, ty, tx }
    }

    /// Stretches an image of `src` size to `tgt` size.
    pub fn from_sizes(src: &HW<T>, tgt: &HW<T>) -> Self {
        let zero = T::zero();
        let src = TLBR {
            t: zero,
            l: zero,
            b: src.h(),
            r: src.w(),
        };
        let tgt = TLBR {
            t: zero,
            l: zero,
            b: tgt.h(),
            r: tgt.w(),
        };
        Self::from_rects(&src, &tgt)
    }

    pub fn scale(factor: T) -> Self {
        Self {
            sy: factor,
            sx: factor,
            ty: T::zero(),
            tx: T::zero(),
        }
    }

    pub fn translate(ty: T, tx: T) -> Self {
        Self {
            sy: T::one(),
            sx: T::one(),
            ty,
            tx,
        }
    }

    /// Mirrors an image of the given width along its vertical axis.
    pub fn flip_horizontal(width: T) -> Self {
        Self {
            sy: T::one(),
            sx: T::zero() - T::one(),
            ty: T::zero(),
            tx: width,
        }
    }
}

impl<T> Transform<T>
where
    T: Copy + Num + Neg<Output = T>,
{
    pub fn inverse(&self) -> Self {
        Self {
            sy: T::one() / self.sy,
            sx: T::one() / self.sx,
            ty: -self.ty / self.sy,
            tx: -self.tx / self.sx,
        }
    }
}

impl<T> Mul<&TLBR<T>> for &Transform<T>
where
    T: Copy + Num + PartialOrd,
{
    type Output = TLBR<T>;

    fn mul(self, rhs: &TLBR<T>) -> Self::Output {
        rhs.transform(self)
    }
}

impl<T> Mul<&CyCxHW<T>> for &Transform<T>
where
    T: Copy + Num + PartialOrd,
{
    type Output = CyCxHW<T>;

    fn mul(self, rhs: &CyCxHW<T>) -> Self::Output {
        rhs.transform(self)
    }
}

/// `(a * b)` applies `b` first, then `a`.
impl<T> Mul<&Transform<T>> for &Transform<T>
where
    T: Copy + Num,
{
    type Output = Transform<T>;

    fn mul(self, rhs: &Transform<T>) -> Self::Output {
        Transform {
            sy: self.sy * rhs.sy,
            sx: self.sx * rhs.sx,
            ty: rhs.ty * self.sy + self.ty,
            tx: rhs.tx * self.sx + self.tx,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RectNum;

    #[test]
    fn inverse_of_inverse() {
        let orig = Transform {
            sy: 2.0,
            sx: 4.0,
            ty: 1.0,
            tx: -3.0,
        };
        assert_eq!(orig.inverse().inverse(), orig);
    }

    #[test]
    fn resize_between_sizes() {
        let src = HW::try_from_hw([80.0, 80.0]).unwrap();
        let tgt = HW::try_from_hw([20.0, 40.0]).unwrap();
        let transform = Transform::from_sizes(&src, &tgt);
        assert_eq!(
            transform,
            Transform {
                sy: 0.25,
                sx: 0.5,
                ty: 0.0,
                tx: 0.0,
            }
        );
    }

    #[test]
    fn flip_keeps_box_normalized() {
        let rect = TLBR::try_from_tlbr([2.0, 1.0, 4.0, 3.0]).unwrap();
        let flipped = &Transform::flip_horizontal(10.0) * &rect;
        assert_eq!(flipped.tlbr(), [2.0, 7.0, 4.0, 9.0]);

        let twice = &Transform::flip_horizontal(10.0) * &flipped;
        assert_eq!(twice, rect);
    }

    #[test]
    fn composition_order() {
        let scale = Transform::scale(2.0);
        let shift = Transform::translate(-1.0, -3.0);
        let rect = TLBR::try_from_tlbr([1.0, 2.0, 3.0, 4.0]).unwrap();

        let composed = &(&shift * &scale) * &rect;
        let stepwise = &shift * &(&scale * &rect);
        assert_eq!(composed, stepwise);
        assert_eq!(composed.tlbr(), [1.0, 1.0, 5.0, 5.0]);
    }
}
