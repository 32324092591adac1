use serde::{Deserialize, Serialize};

/// A half-open texel rectangle `[left, right) x [top, bottom)`.
///
/// Reversed or zero-sized rectangles are allowed and treated as empty by every helper.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Rect {
    pub const EMPTY: Rect = Rect::new(0, 0, 0, 0);

    pub const fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    /// Rectangle anchored at the origin.
    pub const fn from_size(width: i32, height: i32) -> Self {
        Self::new(0, 0, width, height)
    }

    pub fn width(&self) -> i32 {
        (self.right - self.left).max(0)
    }

    pub fn height(&self) -> i32 {
        (self.bottom - self.top).max(0)
    }

    pub fn area(&self) -> i64 {
        i64::from(self.width()) * i64::from(self.height())
    }

    pub fn is_empty(&self) -> bool {
        self.left >= self.right || self.top >= self.bottom
    }

    /// Intersection, normalised to [`Rect::EMPTY`] when the rectangles do not overlap.
    pub fn intersect(&self, other: &Rect) -> Rect {
        let r = Rect::new(
            self.left.max(other.left),
            self.top.max(other.top),
            self.right.min(other.right),
            self.bottom.min(other.bottom),
        );
        if r.is_empty() {
            Rect::EMPTY
        } else {
            r
        }
    }

    pub fn intersects(&self, other: &Rect) -> bool {
        !self.intersect(other).is_empty()
    }

    /// Bounding box of both rectangles. Empty inputs are ignored.
    pub fn union(&self, other: &Rect) -> Rect {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        Rect::new(
            self.left.min(other.left),
            self.top.min(other.top),
            self.right.max(other.right),
            self.bottom.max(other.bottom),
        )
    }

    /// Whether `other` lies entirely inside `self`. The empty rectangle is inside everything.
    pub fn contains(&self, other: &Rect) -> bool {
        if other.is_empty() {
            return true;
        }
        self.left <= other.left
            && self.top <= other.top
            && self.right >= other.right
            && self.bottom >= other.bottom
    }

    pub fn translate(&self, dx: i32, dy: i32) -> Rect {
        Rect::new(
            self.left + dx,
            self.top + dy,
            self.right + dx,
            self.bottom + dy,
        )
    }

    /// Scales to upscaled texture space, rounding outwards.
    pub fn scale(&self, scale: f32) -> Rect {
        Rect::new(
            (self.left as f32 * scale).floor() as i32,
            (self.top as f32 * scale).floor() as i32,
            (self.right as f32 * scale).ceil() as i32,
            (self.bottom as f32 * scale).ceil() as i32,
        )
    }

    /// Grows the rectangle outwards to multiples of `w` x `h`.
    pub fn align_outwards(&self, w: i32, h: i32) -> Rect {
        debug_assert!(w > 0 && h > 0);
        Rect::new(
            self.left.div_euclid(w) * w,
            self.top.div_euclid(h) * h,
            (self.right + w - 1).div_euclid(w) * w,
            (self.bottom + h - 1).div_euclid(h) * h,
        )
    }

    /// Removes `hole` and keeps the largest axis-aligned remainder.
    ///
    /// A hole strictly inside the rectangle leaves four candidate strips; only the biggest
    /// survives, so the result is always a subset of the exact difference.
    pub fn subtract(&self, hole: &Rect) -> Rect {
        let cut = self.intersect(hole);
        if cut.is_empty() {
            return *self;
        }

        let strips = [
            Rect::new(self.left, self.top, self.right, cut.top),
            Rect::new(self.left, cut.bottom, self.right, self.bottom),
            Rect::new(self.left, self.top, cut.left, self.bottom),
            Rect::new(cut.right, self.top, self.right, self.bottom),
        ];
        strips
            .into_iter()
            .filter(|r| !r.is_empty())
            .max_by_key(Rect::area)
            .unwrap_or(Rect::EMPTY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intersect_normalises_disjoint_rects() {
        let a = Rect::new(0, 0, 10, 10);
        let b = Rect::new(20, 20, 30, 30);
        assert_eq!(a.intersect(&b), Rect::EMPTY);
        assert!(!a.intersects(&b));
        assert_eq!(a.intersect(&Rect::new(5, 5, 15, 15)), Rect::new(5, 5, 10, 10));
    }

    #[test]
    fn union_ignores_empty() {
        let a = Rect::new(4, 4, 8, 8);
        assert_eq!(a.union(&Rect::EMPTY), a);
        assert_eq!(Rect::EMPTY.union(&a), a);
        assert_eq!(a.union(&Rect::new(0, 10, 2, 12)), Rect::new(0, 4, 8, 12));
    }

    #[test]
    fn subtract_keeps_largest_strip() {
        let r = Rect::from_size(640, 448);
        // Lower half written: the top half remains.
        assert_eq!(r.subtract(&Rect::new(0, 224, 640, 448)), Rect::new(0, 0, 640, 224));
        // Hole fully covering the rect.
        assert_eq!(r.subtract(&Rect::new(-1, -1, 700, 500)), Rect::EMPTY);
        // Hole in the middle keeps the biggest of the four strips.
        assert_eq!(
            r.subtract(&Rect::new(100, 10, 200, 400)),
            Rect::new(200, 0, 640, 448)
        );
    }

    #[test]
    fn align_outwards_handles_negative_origins() {
        let r = Rect::new(-3, 5, 9, 17);
        assert_eq!(r.align_outwards(8, 8), Rect::new(-8, 0, 16, 24));
    }

    #[test]
    fn scale_rounds_outwards() {
        let r = Rect::new(1, 1, 3, 3);
        assert_eq!(r.scale(1.5), Rect::new(1, 1, 5, 5));
    }
}
