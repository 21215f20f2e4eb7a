//! Spatial index for point-set registration and map windowing.
//!
//! Partitions 3-D space using a recursive **Octree** so that registration
//! can answer "which reference point is closest to this query point?" in
//! roughly logarithmic time. [`Aabb`] doubles as the map manager's window
//! box.
//!
//! # Key types
//!
//! | Type | Role |
//! |------|------|
//! | [`Aabb`]     | An axis-aligned bounding box.                          |
//! | [`Octree`]   | Spatial index; insert points, nearest-neighbour query. |
//!
//! # Example
//!
//! ```rust
//! use nalgebra::Point3;
//! use strider_perception::octree::{Aabb, Octree};
//!
//! let bounds = Aabb::new(Point3::new(-10.0, -10.0, -10.0),
//!                        Point3::new( 10.0,  10.0,  10.0));
//! let mut tree = Octree::new(bounds, 8);
//!
//! tree.insert(Point3::new(1.0, 2.0, 3.0));
//! tree.insert(Point3::new(-4.0, 0.0, 0.0));
//!
//! let (nearest, dist_sq) = tree.nearest(&Point3::new(1.0, 2.0, 2.5), 1.0).unwrap();
//! assert_eq!(nearest, Point3::new(1.0, 2.0, 3.0));
//! assert!((dist_sq - 0.25).abs() < 1e-12);
//! ```

use nalgebra::Point3;

// ────────────────────────────────────────────────────────────────────────────
// Aabb
// ────────────────────────────────────────────────────────────────────────────

/// Axis-aligned box, inclusive on every face.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Point3<f64>,
    pub max: Point3<f64>,
}

impl Aabb {
    /// Box spanned by two opposite corners, in any order.
    pub fn new(a: Point3<f64>, b: Point3<f64>) -> Self {
        Self {
            min: a.inf(&b),
            max: a.sup(&b),
        }
    }

    /// Cube of edge `size` centred on `centre`.
    pub fn centred(centre: Point3<f64>, size: f64) -> Self {
        let half = size.abs() * 0.5;
        Self::new(
            Point3::new(centre.x - half, centre.y - half, centre.z - half),
            Point3::new(centre.x + half, centre.y + half, centre.z + half),
        )
    }

    /// Smallest box enclosing every point, or `None` for an empty slice.
    pub fn enclosing(points: &[Point3<f64>]) -> Option<Self> {
        let (first, rest) = points.split_first()?;
        let (min, max) = rest
            .iter()
            .fold((*first, *first), |(min, max), p| (min.inf(p), max.sup(p)));
        Some(Self { min, max })
    }

    pub fn centre(&self) -> Point3<f64> {
        nalgebra::center(&self.min, &self.max)
    }

    pub fn contains_point(&self, p: &Point3<f64>) -> bool {
        p.x >= self.min.x
            && p.x <= self.max.x
            && p.y >= self.min.y
            && p.y <= self.max.y
            && p.z >= self.min.z
            && p.z <= self.max.z
    }

    /// Squared distance from `p` to the closest point of the box (zero when
    /// inside).
    pub fn distance_squared(&self, p: &Point3<f64>) -> f64 {
        let clamped = p.sup(&self.min).inf(&self.max);
        (p - clamped).norm_squared()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Octree
// ────────────────────────────────────────────────────────────────────────────

const DEFAULT_MAX_DEPTH: usize = 10;

/// Point octree used as a nearest-neighbour index.
///
/// A leaf splits into eight octants once it holds more than `capacity`
/// points, unless it already sits at `max_depth`; coincident points would
/// otherwise split forever.
#[derive(Debug)]
pub struct Octree {
    root: Node,
    capacity: usize,
    max_depth: usize,
    len: usize,
}

impl Octree {
    pub fn new(bounds: Aabb, capacity: usize) -> Self {
        Self::with_max_depth(bounds, capacity, DEFAULT_MAX_DEPTH)
    }

    pub fn with_max_depth(bounds: Aabb, capacity: usize, max_depth: usize) -> Self {
        Self {
            root: Node::leaf(bounds),
            capacity: capacity.max(1),
            max_depth,
            len: 0,
        }
    }

    /// Index `points` under a root that tightly encloses them; `None` for an
    /// empty slice.
    pub fn from_points(points: &[Point3<f64>], capacity: usize) -> Option<Self> {
        let mut tree = Self::new(Aabb::enclosing(points)?, capacity);
        points.iter().for_each(|p| tree.insert(*p));
        Some(tree)
    }

    /// Add `point`. Points outside the root box are dropped.
    pub fn insert(&mut self, point: Point3<f64>) {
        if self.root.bounds.contains_point(&point) {
            self.root.insert(point, self.capacity, self.max_depth);
            self.len += 1;
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Closest stored point to `query` no farther than `max_distance`,
    /// together with its squared distance.
    pub fn nearest(&self, query: &Point3<f64>, max_distance: f64) -> Option<(Point3<f64>, f64)> {
        let mut best = None;
        let mut radius_sq = max_distance * max_distance;
        self.root.nearest(query, &mut best, &mut radius_sq);
        best
    }
}

#[derive(Debug)]
struct Node {
    bounds: Aabb,
    /// Empty once the node has children.
    points: Vec<Point3<f64>>,
    children: Option<Box<[Node; 8]>>,
}

impl Node {
    fn leaf(bounds: Aabb) -> Self {
        Self {
            bounds,
            points: Vec::new(),
            children: None,
        }
    }

    /// Octant of `p` relative to the node centre: bit 0 is x, bit 1 y,
    /// bit 2 z.
    fn octant_of(&self, p: &Point3<f64>) -> usize {
        let c = self.bounds.centre();
        usize::from(p.x >= c.x) | usize::from(p.y >= c.y) << 1 | usize::from(p.z >= c.z) << 2
    }

    fn octant_bounds(&self, octant: usize) -> Aabb {
        let (lo, hi, c) = (self.bounds.min, self.bounds.max, self.bounds.centre());
        let pick = |bit: usize, axis: usize| {
            if octant & bit == 0 {
                (lo[axis], c[axis])
            } else {
                (c[axis], hi[axis])
            }
        };
        let (x, y, z) = (pick(1, 0), pick(2, 1), pick(4, 2));
        Aabb::new(Point3::new(x.0, y.0, z.0), Point3::new(x.1, y.1, z.1))
    }

    fn insert(&mut self, point: Point3<f64>, capacity: usize, depth_left: usize) {
        let octant = self.octant_of(&point);
        if let Some(children) = self.children.as_mut() {
            children[octant].insert(point, capacity, depth_left.saturating_sub(1));
            return;
        }
        self.points.push(point);
        if self.points.len() > capacity && depth_left > 0 {
            self.split(capacity, depth_left);
        }
    }

    fn split(&mut self, capacity: usize, depth_left: usize) {
        let mut children: Box<[Node; 8]> = Box::new(std::array::from_fn(|i| Node::leaf(self.octant_bounds(i))));
        for p in std::mem::take(&mut self.points) {
            let octant = self.octant_of(&p);
            children[octant].insert(p, capacity, depth_left - 1);
        }
        self.children = Some(children);
    }

    fn nearest(&self, query: &Point3<f64>, best: &mut Option<(Point3<f64>, f64)>, radius_sq: &mut f64) {
        if self.bounds.distance_squared(query) > *radius_sq {
            return;
        }
        let Some(children) = &self.children else {
            for p in &self.points {
                let d = (p - query).norm_squared();
                if d <= *radius_sq && best.is_none_or(|(_, b)| d < b) {
                    *best = Some((*p, d));
                    *radius_sq = d;
                }
            }
            return;
        };
        // Closest octants first so the search radius shrinks early.
        let mut order: [(f64, usize); 8] = std::array::from_fn(|i| (children[i].bounds.distance_squared(query), i));
        order.sort_by(|a, b| a.0.total_cmp(&b.0));
        for (_, i) in order {
            children[i].nearest(query, best, radius_sq);
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_tree(capacity: usize) -> Octree {
        Octree::new(
            Aabb::new(Point3::new(0.0, 0.0, 0.0), Point3::new(1.0, 1.0, 1.0)),
            capacity,
        )
    }

    fn brute_force_nearest(points: &[Point3<f64>], q: &Point3<f64>) -> f64 {
        points
            .iter()
            .map(|p| (p - q).norm_squared())
            .fold(f64::INFINITY, f64::min)
    }

    // ── Aabb ────────────────────────────────────────────────────────────────

    #[test]
    fn aabb_contains_boundary_point() {
        let b = Aabb::new(Point3::new(0.0, 0.0, 0.0), Point3::new(1.0, 1.0, 1.0));
        assert!(b.contains_point(&Point3::new(0.0, 0.0, 0.0)));
        assert!(b.contains_point(&Point3::new(1.0, 1.0, 1.0)));
        assert!(!b.contains_point(&Point3::new(2.0, 0.0, 0.0)));
    }

    #[test]
    fn aabb_normalises_min_max() {
        let b = Aabb::new(Point3::new(2.0, 2.0, 2.0), Point3::new(0.0, 0.0, 0.0));
        assert_eq!(b.min, Point3::new(0.0, 0.0, 0.0));
        assert_eq!(b.max, Point3::new(2.0, 2.0, 2.0));
    }

    #[test]
    fn aabb_centred_and_enclosing() {
        let b = Aabb::centred(Point3::new(1.0, 1.0, 1.0), 4.0);
        assert_eq!(b.min, Point3::new(-1.0, -1.0, -1.0));
        assert_eq!(b.max, Point3::new(3.0, 3.0, 3.0));

        let e = Aabb::enclosing(&[Point3::new(1.0, -2.0, 0.0), Point3::new(-1.0, 3.0, 0.5)]).unwrap();
        assert_eq!(e.min, Point3::new(-1.0, -2.0, 0.0));
        assert_eq!(e.max, Point3::new(1.0, 3.0, 0.5));
        assert!(Aabb::enclosing(&[]).is_none());
    }

    #[test]
    fn aabb_distance_is_zero_inside() {
        let b = Aabb::new(Point3::new(0.0, 0.0, 0.0), Point3::new(1.0, 1.0, 1.0));
        assert_eq!(b.distance_squared(&Point3::new(0.5, 0.5, 0.5)), 0.0);
        assert!((b.distance_squared(&Point3::new(3.0, 0.5, 0.5)) - 4.0).abs() < 1e-12);
    }

    // ── Octree ──────────────────────────────────────────────────────────────

    #[test]
    fn empty_tree_has_no_nearest() {
        let tree = unit_tree(4);
        assert!(tree.is_empty());
        assert!(tree.nearest(&Point3::new(0.5, 0.5, 0.5), 10.0).is_none());
    }

    #[test]
    fn insert_outside_bounds_is_ignored() {
        let mut tree = unit_tree(4);
        tree.insert(Point3::new(5.0, 5.0, 5.0));
        assert!(tree.is_empty());
    }

    #[test]
    fn subdivision_preserves_all_points() {
        let mut tree = unit_tree(2);
        let pts: Vec<Point3<f64>> = (0..50)
            .map(|i| {
                let t = i as f64 / 50.0;
                Point3::new(t, (t * 7.0).fract(), (t * 13.0).fract())
            })
            .collect();
        for p in &pts {
            tree.insert(*p);
        }
        assert_eq!(tree.len(), pts.len());
    }

    #[test]
    fn insert_after_split_reaches_children() {
        let mut tree = unit_tree(1);
        tree.insert(Point3::new(0.1, 0.1, 0.1));
        tree.insert(Point3::new(0.9, 0.9, 0.9));
        tree.insert(Point3::new(0.8, 0.2, 0.7));
        assert_eq!(tree.len(), 3);
        let (p, d) = tree.nearest(&Point3::new(0.8, 0.2, 0.6), 1.0).unwrap();
        assert_eq!(p, Point3::new(0.8, 0.2, 0.7));
        assert!((d - 0.01).abs() < 1e-12);
    }

    #[test]
    fn nearest_matches_brute_force() {
        let pts: Vec<Point3<f64>> = (0..200)
            .map(|i| {
                let t = i as f64;
                Point3::new((t * 0.37).sin() * 5.0, (t * 0.11).cos() * 5.0, (t * 0.05).sin())
            })
            .collect();
        let tree = Octree::from_points(&pts, 4).unwrap();
        for q in [
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(4.0, -3.0, 0.5),
            Point3::new(-5.0, 5.0, -1.0),
        ] {
            let (_, d) = tree.nearest(&q, 100.0).unwrap();
            assert!((d - brute_force_nearest(&pts, &q)).abs() < 1e-12);
        }
    }

    #[test]
    fn nearest_respects_max_distance() {
        let tree = Octree::from_points(&[Point3::new(0.0, 0.0, 0.0)], 4).unwrap();
        assert!(tree.nearest(&Point3::new(2.0, 0.0, 0.0), 1.0).is_none());
        assert!(tree.nearest(&Point3::new(0.5, 0.0, 0.0), 1.0).is_some());
    }

    #[test]
    fn duplicate_points_stop_at_max_depth() {
        let mut tree = Octree::with_max_depth(
            Aabb::new(Point3::new(0.0, 0.0, 0.0), Point3::new(1.0, 1.0, 1.0)),
            1,
            3,
        );
        for _ in 0..10 {
            tree.insert(Point3::new(0.5, 0.5, 0.5));
        }
        assert_eq!(tree.len(), 10);
    }
}
