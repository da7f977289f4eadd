use glam::Vec2;

/// Axis-aligned rectangle in cell space.
///
/// Used for quadtree node footprints and for the always-resident region
/// around an observer. Edges are shared, not overlapping: two rectangles
/// that only touch along an edge do not [`overlap`](Self::overlaps).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Rect {
    pub min: Vec2,
    pub max: Vec2,
}

impl Rect {
    /// An empty rectangle; overlaps nothing and contains nothing.
    pub const EMPTY: Rect = Rect {
        min: Vec2::ZERO,
        max: Vec2::ZERO,
    };

    /// Create a rectangle from two corners, sorting components.
    pub fn new(a: Vec2, b: Vec2) -> Self {
        Self {
            min: a.min(b),
            max: a.max(b),
        }
    }

    /// Square footprint of side `size` centered on `center`.
    pub fn from_center_size(center: Vec2, size: f32) -> Self {
        let half = Vec2::splat(size * 0.5);
        Self::new(center - half, center + half)
    }

    /// Rectangle covering whole cells `[min_x, max_x) x [min_y, max_y)`.
    pub fn from_cells(min_x: i32, min_y: i32, max_x: i32, max_y: i32) -> Self {
        Self::new(
            Vec2::new(min_x as f32, min_y as f32),
            Vec2::new(max_x as f32, max_y as f32),
        )
    }

    pub fn width(&self) -> f32 {
        self.max.x - self.min.x
    }

    pub fn height(&self) -> f32 {
        self.max.y - self.min.y
    }

    pub fn center(&self) -> Vec2 {
        (self.min + self.max) * 0.5
    }

    /// True when the rectangle has no area.
    pub fn is_empty(&self) -> bool {
        self.width() <= 0.0 || self.height() <= 0.0
    }

    /// True when the two rectangles share a region of positive area.
    pub fn overlaps(&self, other: &Rect) -> bool {
        self.min.x.max(other.min.x) < self.max.x.min(other.max.x)
            && self.min.y.max(other.min.y) < self.max.y.min(other.max.y)
    }

    /// True when the two rectangles overlap or touch along an edge or corner.
    pub fn touches(&self, other: &Rect) -> bool {
        self.min.x <= other.max.x
            && self.max.x >= other.min.x
            && self.min.y <= other.max.y
            && self.max.y >= other.min.y
    }

    /// True when `other` lies entirely inside `self` (edges inclusive).
    pub fn contains_rect(&self, other: &Rect) -> bool {
        other.min.cmpge(self.min).all() && other.max.cmple(self.max).all()
    }

    /// Strict interior test: points on the edge are not contained.
    pub fn contains_point(&self, p: Vec2) -> bool {
        p.x > self.min.x && p.x < self.max.x && p.y > self.min.y && p.y < self.max.y
    }

    /// True when `self` overlaps `other` without being contained in it,
    /// i.e. the boundary of `other` cuts through `self`.
    pub fn straddles(&self, other: &Rect) -> bool {
        self.overlaps(other) && !other.contains_rect(self)
    }

    /// Area of the rectangle (zero when empty).
    pub fn area(&self) -> f32 {
        self.width().max(0.0) * self.height().max(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edge_sharing_is_not_overlap() {
        let a = Rect::from_cells(0, 0, 1, 1);
        let b = Rect::from_cells(1, 0, 2, 1);
        assert!(!a.overlaps(&b));
        assert!(a.touches(&b));
    }

    #[test]
    fn test_straddles_boundary() {
        let region = Rect::from_cells(3, 3, 5, 5);
        let node = Rect::from_cells(2, 2, 4, 4);
        assert!(node.straddles(&region));

        let inside = Rect::from_cells(3, 3, 4, 4);
        assert!(!inside.straddles(&region));

        let outside = Rect::from_cells(0, 0, 2, 2);
        assert!(!outside.straddles(&region));

        // A node enclosing the whole region still has the boundary running through it.
        let root = Rect::from_cells(0, 0, 8, 8);
        assert!(root.straddles(&region));
    }

    #[test]
    fn test_from_center_size() {
        let r = Rect::from_center_size(Vec2::new(4.0, 4.0), 8.0);
        assert_eq!(r, Rect::from_cells(0, 0, 8, 8));
        assert_eq!(r.area(), 64.0);
        assert_eq!(r.center(), Vec2::new(4.0, 4.0));
    }

    #[test]
    fn test_empty_overlaps_nothing() {
        let r = Rect::from_cells(0, 0, 8, 8);
        assert!(Rect::EMPTY.is_empty());
        assert!(!Rect::EMPTY.overlaps(&r));
        assert!(!r.straddles(&Rect::EMPTY));
    }

    #[test]
    fn test_contains_point_is_strict() {
        let r = Rect::from_cells(0, 0, 2, 2);
        assert!(r.contains_point(Vec2::new(1.0, 1.0)));
        assert!(!r.contains_point(Vec2::new(0.0, 1.0)));
    }
}
