use crate::{common::*, CyCxHW, Rect, Transform};

/// Rectangle stored as top, left, bottom and right coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "[T; 4]", into = "[T; 4]")]
#[serde(bound(
    serialize = "T: Serialize + Copy",
    deserialize = "T: Deserialize<'de> + Num + PartialOrd + Copy"
))]
pub struct TLBR<T> {
    pub(crate) t: T,
    pub(crate) l: T,
    pub(crate) b: T,
    pub(crate) r: T,
}

impl<T> TLBR<T> {
    pub fn try_cast<V>(self) -> Option<TLBR<V>>
    where
        T: ToPrimitive,
        V: NumCast,
    {
        Some(TLBR {
            t: V::from(self.t)?,
            l: V::from(self.l)?,
            b: V::from(self.b)?,
            r: V::from(self.r)?,
        })
    }
}

impl<T> TLBR<T>
where
    T: Copy + Num + PartialOrd,
{
    /// Applies the transform. The result stays normalized if a scale is negative.
    pub fn transform(&self, transform: &Transform<T>) -> Self {
        let t = self.t * transform.sy + transform.ty;
        let b = self.b * transform.sy + transform.ty;
        let l = self.l * transform.sx + transform.tx;
        let r = self.r * transform.sx + transform.tx;
        let (t, b) = if t <= b { (t, b) } else { (b, t) };
        let (l, r) = if l <= r { (l, r) } else { (r, l) };
        TLBR { t, l, b, r }
    }
}

impl<T> Rect for TLBR<T>
where
    T: Copy + Num + PartialOrd,
{
    type Type = T;

    fn t(&self) -> T {
        self.t
    }

    fn l(&self) -> T {
        self.l
    }

    fn b(&self) -> T {
        self.b
    }

    fn r(&self) -> T {
        self.r
    }

    fn cy(&self) -> T {
        let two = T::one() + T::one();
        (self.t + self.b) / two
    }

    fn cx(&self) -> T {
        let two = T::one() + T::one();
        (self.l + self.r) / two
    }

    fn h(&self) -> T {
        self.b - self.t
    }

    fn w(&self) -> T {
        self.r - self.l
    }

    fn try_from_tlbr([t, l, b, r]: [T; 4]) -> Result<Self> {
        ensure!(b >= t && r >= l, "b >= t and r >= l must hold");
        Ok(Self { t, l, b, r })
    }

    fn try_from_tlhw([t, l, h, w]: [T; 4]) -> Result<Self> {
        Self::try_from_tlbr([t, l, t + h, l + w])
    }

    fn try_from_cycxhw([cy, cx, h, w]: [T; 4]) -> Result<Self> {
        let zero = T::zero();
        ensure!(h >= zero && w >= zero, "h and w must be non-negative");
        let two = T::one() + T::one();
        Ok(Self {
            t: cy - h / two,
            l: cx - w / two,
            b: cy + h / two,
            r: cx + w / two,
        })
    }
}

impl<T> TryFrom<[T; 4]> for TLBR<T>
where
    T: Copy + Num + PartialOrd,
{
    type Error = anyhow::Error;

    fn try_from(tlbr: [T; 4]) -> Result<Self, Self::Error> {
        Self::try_from_tlbr(tlbr)
    }
}

impl<T> From<TLBR<T>> for [T; 4] {
    fn from(rect: TLBR<T>) -> Self {
        let TLBR { t, l, b, r } = rect;
        [t, l, b, r]
    }
}

impl<T> From<&CyCxHW<T>> for TLBR<T>
where
    T: Copy + Num,
{
    fn from(from: &CyCxHW<T>) -> Self {
        let two = T::one() + T::one();
        let CyCxHW { cy, cx, h, w } = *from;
        Self {
            t: cy - h / two,
            l: cx - w / two,
            b: cy + h / two,
            r: cx + w / two,
        }
    }
}

impl<T> From<CyCxHW<T>> for TLBR<T>
where
    T: Copy + Num,
{
    fn from(from: CyCxHW<T>) -> Self {
        (&from).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RectNum;

    #[test]
    fn reject_inverted_box() {
        assert!(TLBR::try_from_tlbr([5.0, 0.0, 1.0, 1.0]).is_err());
        assert!(TLBR::try_from_cycxhw([0.0, 0.0, -1.0, 1.0]).is_err());
    }

    #[test]
    fn deserialize_from_array() {
        let rect: TLBR<f64> = serde_json::from_str("[1.0, 2.0, 3.0, 4.0]").unwrap();
        assert_eq!(rect.tlbr(), [1.0, 2.0, 3.0, 4.0]);
        assert!(serde_json::from_str::<TLBR<f64>>("[3.0, 2.0, 1.0, 4.0]").is_err());
    }
}
