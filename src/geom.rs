use super::traits::Containment;

use cgmath::{Point3, Vector3};
use cgmath::prelude::*;

#[cfg(not(feature="f64"))]
pub type Real = f32;

#[cfg(feature="f64")]
pub type Real = f64;

/// The box type stored by the index
pub type Aabb = Bounds<Point3<Real>>;

/// An axis-aligned bounding box
///
/// This is the only shape the index understands; items, query regions and tree nodes are all
/// described by one.
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature="serialize", derive(Serialize, Deserialize))]
pub struct Bounds<Point> {
    pub min: Point,
    pub max: Point
}

impl<Point> Bounds<Point>
where
    Point: EuclideanSpace + Copy
{
    pub fn new(min: Point, max: Point) -> Self {
        Self{min, max}
    }
}

impl<S> Bounds<Point3<S>>
where
    S: num_traits::NumCast + Copy
{
    /// Converts to another scalar type; `None` if a coordinate does not fit
    pub fn cast<T: num_traits::NumCast>(self) -> Option<Bounds<Point3<T>>> {
        Some(Bounds{min: self.min.cast()?, max: self.max.cast()?})
    }
}

impl<S> Bounds<Point3<S>>
where
    S: cgmath::BaseFloat
{
    /// Inverted bounds which intersect nothing and enclose nothing
    pub fn empty() -> Self {
        let inf = S::infinity();
        Bounds{
            min: Point3::new(inf, inf, inf),
            max: Point3::new(-inf, -inf, -inf)}
    }

    pub fn from_point(point: Point3<S>) -> Self {
        Bounds{min: point, max: point}
    }

    /// The smallest bounds enclosing every point; empty if `points` is
    pub fn from_points(points: &[Point3<S>]) -> Self {
        points.iter().fold(Self::empty(), |bounds, &point| bounds.merge_point(point))
    }

    pub fn is_empty(self) -> bool {
        self.min.x > self.max.x ||
        self.min.y > self.max.y ||
        self.min.z > self.max.z
    }

    pub fn merge_point(self, point: Point3<S>) -> Self {
        Bounds{
            min: Point3::new(
                self.min.x.min(point.x),
                self.min.y.min(point.y),
                self.min.z.min(point.z)),
            max: Point3::new(
                self.max.x.max(point.x),
                self.max.y.max(point.y),
                self.max.z.max(point.z))}
    }

    pub fn merge(self, other: Self) -> Self {
        self.merge_point(other.min).merge_point(other.max)
    }

    /// Grows every face outward by `margin`
    pub fn grow_by(self, margin: S) -> Self {
        Bounds{
            min: Point3::new(self.min.x - margin, self.min.y - margin, self.min.z - margin),
            max: Point3::new(self.max.x + margin, self.max.y + margin, self.max.z + margin)}
    }

    /// Overlap test; touching faces count as overlapping
    pub fn intersects(self, other: Self) -> bool {
        self.min.x <= other.max.x && self.max.x >= other.min.x &&
        self.min.y <= other.max.y && self.max.y >= other.min.y &&
        self.min.z <= other.max.z && self.max.z >= other.min.z
    }

    /// Inclusive enclosure test (see `Containment` for the strict variant)
    pub fn covers(self, other: Self) -> bool {
        self.min.x <= other.min.x && self.max.x >= other.max.x &&
        self.min.y <= other.min.y && self.max.y >= other.max.y &&
        self.min.z <= other.min.z && self.max.z >= other.max.z
    }

    pub fn contains_point(self, point: Point3<S>) -> bool {
        self.min.x <= point.x && point.x <= self.max.x &&
        self.min.y <= point.y && point.y <= self.max.y &&
        self.min.z <= point.z && point.z <= self.max.z
    }

    /// Slab test against the segment `from..=to`
    pub fn intersects_segment(self, from: Point3<S>, to: Point3<S>) -> bool {
        if self.is_empty() {
            return false;
        }

        let delta = to - from;
        let mut t_min = S::zero();
        let mut t_max = S::one();
        for axis in 0..3 {
            let origin = from[axis];
            let lo = self.min[axis];
            let hi = self.max[axis];
            if delta[axis].abs() <= S::epsilon() {
                if origin < lo || origin > hi {
                    return false;
                }
                continue;
            }

            let inv = S::one() / delta[axis];
            let mut t0 = (lo - origin) * inv;
            let mut t1 = (hi - origin) * inv;
            if t0 > t1 {
                std::mem::swap(&mut t0, &mut t1);
            }
            t_min = t_min.max(t0);
            t_max = t_max.min(t1);
            if t_min > t_max {
                return false;
            }
        }
        true
    }

    /// Conservative box/hull test
    ///
    /// Rejects the box if it lies entirely outside one of the hull's planes, or if it misses the
    /// bounds of the hull's vertices.  Boxes near hull edges may pass without truly overlapping.
    pub fn intersects_hull(self, hull: &ConvexHull<S>) -> bool {
        if self.is_empty() {
            return false;
        }

        for plane in hull.planes {
            let inner = Point3::new(
                if plane.normal.x > S::zero() { self.min.x } else { self.max.x },
                if plane.normal.y > S::zero() { self.min.y } else { self.max.y },
                if plane.normal.z > S::zero() { self.min.z } else { self.max.z });
            if plane.distance_to(inner) > S::zero() {
                return false;
            }
        }

        hull.points.is_empty() || self.intersects(Bounds::from_points(hull.points))
    }

    pub fn surface_area(self) -> S {
        let size = self.max - self.min;
        let two = S::one() + S::one();
        two * (size.x * size.y + size.y * size.z + size.z * size.x)
    }

    /// Length of the diagonal, zero for empty bounds
    pub fn diagonal(self) -> S {
        if self.is_empty() {
            S::zero()
        } else {
            (self.max - self.min).magnitude()
        }
    }
}

impl<T> Containment for Bounds<Point3<T>>
where
    T: cgmath::BaseNum
{
    fn contains(self, other: Bounds<Point3<T>>) -> bool {
        self.min.x <= other.min.x &&
        self.min.y <= other.min.y &&
        self.min.z <= other.min.z &&
        self.max.x >  other.max.x &&
        self.max.y >  other.max.y &&
        self.max.z >  other.max.z
    }
}

/// A plane `normal . p = d`; points with positive distance are outside
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature="serialize", derive(Serialize, Deserialize))]
pub struct Plane<S> {
    pub normal: Vector3<S>,
    pub d: S
}

impl<S> Plane<S>
where
    S: cgmath::BaseFloat
{
    pub fn new(normal: Vector3<S>, d: S) -> Self {
        Self{normal, d}
    }

    /// A plane through `point` facing along `normal` (which is normalized)
    pub fn from_point_normal(point: Point3<S>, normal: Vector3<S>) -> Self {
        let normal = normal.normalize();
        Self{normal, d: normal.dot(point.to_vec())}
    }

    pub fn distance_to(&self, point: Point3<S>) -> S {
        self.normal.dot(point.to_vec()) - self.d
    }
}

/// A convex volume as a set of bounding planes plus the vertices they produce
#[derive(Copy, Clone, Debug)]
pub struct ConvexHull<'a, S> {
    pub planes: &'a [Plane<S>],
    pub points: &'a [Point3<S>]
}

/// Vertices of the convex volume bounded by `planes`
///
/// Every intersection of three planes which lies inside all others is a vertex.  Returns an
/// empty set when the planes do not enclose anything.
pub fn convex_hull_points<S>(planes: &[Plane<S>]) -> Vec<Point3<S>>
where
    S: cgmath::BaseFloat
{
    let tolerance = S::epsilon().sqrt();
    let mut points: Vec<Point3<S>> = Vec::new();

    let n = planes.len();
    for i in 0..n {
        for j in (i + 1)..n {
            for k in (j + 1)..n {
                let (a, b, c) = (&planes[i], &planes[j], &planes[k]);
                let bc = b.normal.cross(c.normal);
                let denom = a.normal.dot(bc);
                if denom.abs() <= tolerance {
                    continue;
                }

                let ca = c.normal.cross(a.normal);
                let ab = a.normal.cross(b.normal);
                let point = Point3::from_vec((bc * a.d + ca * b.d + ab * c.d) / denom);

                if planes.iter().any(|plane| plane.distance_to(point) > tolerance) {
                    continue;
                }
                if points.iter().any(|&other| (other - point).magnitude2() <= tolerance * tolerance) {
                    continue;
                }
                points.push(point);
            }
        }
    }
    points
}
