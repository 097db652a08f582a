//! Class-labeled rectangles.

use bbox::{prelude::*, Transform, HW, TLBR};
use noisy_float::prelude::*;
use num_traits::Float;
use serde::{Deserialize, Serialize};
use std::ops::Mul;

/// An object annotation in pixel units with a zero-based class index.
pub type PixelLabel = Label<TLBR<R64>, usize>;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Label<R, C> {
    pub rect: R,
    pub class: C,
}

impl<R, C> Label<R, C> {
    pub fn map_rect<S, F>(self, f: F) -> Label<S, C>
    where
        F: FnOnce(R) -> S,
    {
        let Self { rect, class } = self;
        Label {
            rect: f(rect),
            class,
        }
    }
}

impl<T, C> Label<TLBR<T>, C>
where
    T: Float,
    C: Clone,
{
    /// Clips the label to an image of the given size.
    ///
    /// The label is dropped when less than `min_visible_ratio` of its area
    /// lies inside the image.
    pub fn clip_to(&self, size: &HW<T>, min_visible_ratio: T) -> Option<Self> {
        let area = self.rect.area();
        let clipped = self.rect.clip_to(size)?;
        if area > T::zero() && clipped.area() / area < min_visible_ratio {
            return None;
        }
        Some(Label {
            rect: clipped,
            class: self.class.clone(),
        })
    }
}

impl<'a, T, C> Mul<&'a Label<TLBR<T>, C>> for &'a Transform<T>
where
    T: Copy + num_traits::Num + PartialOrd,
    C: Clone,
{
    type Output = Label<TLBR<T>, C>;

    fn mul(self, rhs: &'a Label<TLBR<T>, C>) -> Self::Output {
        Label {
            rect: self * &rhs.rect,
            class: rhs.class.clone(),
        }
    }
}
