use serde::de::{self, Deserializer};
use serde::ser::{SerializeStruct, Serializer};
use serde::{Deserialize, Serialize};

use crate::rtree::{SpatialError, SpatialResult};

/// Axis index of the x coordinate.
pub const AXIS_X: usize = 0;
/// Axis index of the y coordinate.
pub const AXIS_Y: usize = 1;
/// Axis index of the z coordinate of a [`STBox`].
pub const AXIS_Z: usize = 2;
/// Axis index of the time span of a [`STBox`].
pub const AXIS_T: usize = 3;

/// An axis-aligned box in `D` dimensions, stored as one closed
/// `[min, max]` interval per axis.
///
/// Boxes are plain values: every operation below is pure and runs in O(D).
/// The index never mutates a box once it has been stored.
///
/// # Examples
///
/// ```rust
/// use trtree::{BoundingBox, Rect};
///
/// let a = Rect::xy(0.0, 0.0, 1.0, 1.0);
/// let b = Rect::xy(0.5, 0.5, 2.0, 2.0);
/// assert!(a.overlaps(&b));
/// assert_eq!(a.union(&b), BoundingBox::new([0.0, 0.0], [2.0, 2.0]));
/// ```
#[derive(Clone, Copy, PartialEq, Debug)]
pub struct BoundingBox<const D: usize> {
    /// Lower bound of every axis
    pub min: [f64; D],
    /// Upper bound of every axis
    pub max: [f64; D],
}

/// A planar rectangle.
pub type Rect = BoundingBox<2>;

/// A spatiotemporal box over the axes x, y, z and t.
///
/// Time is carried as microseconds since the epoch in an `f64`, which keeps
/// every axis comparable with the same interval arithmetic.
pub type STBox = BoundingBox<4>;

impl<const D: usize> BoundingBox<D> {
    /// Creates a box from its corners without validating them.
    pub fn new(min: [f64; D], max: [f64; D]) -> Self {
        Self { min, max }
    }

    /// Creates a box, rejecting corners with `min > max` or NaN on any axis.
    pub fn try_new(min: [f64; D], max: [f64; D]) -> SpatialResult<Self> {
        let bbox = Self { min, max };
        bbox.validate()?;
        Ok(bbox)
    }

    /// Creates a degenerate box covering a single point.
    pub fn point(coords: [f64; D]) -> Self {
        Self {
            min: coords,
            max: coords,
        }
    }

    /// Returns an error naming the first axis whose interval is malformed.
    pub fn validate(&self) -> SpatialResult<()> {
        for axis in 0..D {
            let (lo, hi) = (self.min[axis], self.max[axis]);
            if lo.is_nan() || hi.is_nan() {
                return Err(SpatialError::InvalidArgument(format!(
                    "box {} has NaN on axis {}",
                    self, axis
                )));
            }
            if lo > hi {
                return Err(SpatialError::InvalidArgument(format!(
                    "box {} has min > max on axis {}",
                    self, axis
                )));
            }
        }
        Ok(())
    }

    /// Checks that `min <= max` holds on every axis.
    pub fn is_valid(&self) -> bool {
        (0..D).all(|axis| self.min[axis] <= self.max[axis])
    }

    /// Extent of the box along one axis.
    #[inline]
    pub fn extent(&self, axis: usize) -> f64 {
        self.max[axis] - self.min[axis]
    }

    /// Midpoint of the box along one axis.
    #[inline]
    pub fn center(&self, axis: usize) -> f64 {
        (self.min[axis] + self.max[axis]) / 2.0
    }

    /// Product of the per-axis extents.
    pub fn area(&self) -> f64 {
        (0..D).map(|axis| self.extent(axis)).product()
    }

    /// Sum of the per-axis extents.
    pub fn margin(&self) -> f64 {
        (0..D).map(|axis| self.extent(axis)).sum()
    }

    /// True iff every axis interval intersects the corresponding interval of
    /// `other`. Intervals are closed, so touching boxes overlap.
    #[inline]
    pub fn overlaps(&self, other: &Self) -> bool {
        (0..D).all(|axis| self.min[axis] <= other.max[axis] && other.min[axis] <= self.max[axis])
    }

    /// True iff `other` lies entirely inside this box.
    #[inline]
    pub fn contains(&self, other: &Self) -> bool {
        (0..D).all(|axis| self.min[axis] <= other.min[axis] && other.max[axis] <= self.max[axis])
    }

    /// Smallest box containing both boxes.
    pub fn union(&self, other: &Self) -> Self {
        let mut merged = *self;
        merged.expand(other);
        merged
    }

    /// Grows this box in place so that it also covers `other`.
    #[inline]
    pub fn expand(&mut self, other: &Self) {
        for axis in 0..D {
            self.min[axis] = self.min[axis].min(other.min[axis]);
            self.max[axis] = self.max[axis].max(other.max[axis]);
        }
    }

    /// Area that would be added to this box by growing it to include `other`.
    pub fn enlargement(&self, other: &Self) -> f64 {
        self.union(other).area() - self.area()
    }

    /// Minimal box containing every input, or `None` for an empty input.
    pub fn compute_mbr<'a, I>(boxes: I) -> Option<Self>
    where
        I: IntoIterator<Item = &'a Self>,
    {
        let mut iter = boxes.into_iter();
        let mut mbr = *iter.next()?;
        for bbox in iter {
            mbr.expand(bbox);
        }
        Some(mbr)
    }
}

impl Rect {
    /// Creates a planar rectangle from its corner coordinates.
    pub fn xy(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self::new([min_x, min_y], [max_x, max_y])
    }
}

impl STBox {
    /// Creates a spatiotemporal box with all four extents.
    pub fn xyzt(min: [f64; 3], max: [f64; 3], t_start: f64, t_end: f64) -> Self {
        Self::new([min[0], min[1], min[2], t_start], [max[0], max[1], max[2], t_end])
    }

    /// Creates a spatiotemporal box without a z extent.
    ///
    /// The z axis collapses to `[0, 0]`, so such boxes always overlap on z.
    pub fn xyt(min_x: f64, min_y: f64, max_x: f64, max_y: f64, t_start: f64, t_end: f64) -> Self {
        Self::new([min_x, min_y, 0.0, t_start], [max_x, max_y, 0.0, t_end])
    }

    /// Time span of the box as `(start, end)`.
    pub fn period(&self) -> (f64, f64) {
        (self.min[AXIS_T], self.max[AXIS_T])
    }
}

impl<const D: usize> std::fmt::Display for BoundingBox<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "BoundingBox({:?}, {:?})", self.min, self.max)
    }
}

impl<const D: usize> Serialize for BoundingBox<D> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("BoundingBox", 2)?;
        state.serialize_field("min", &self.min[..])?;
        state.serialize_field("max", &self.max[..])?;
        state.end()
    }
}

#[derive(Deserialize)]
#[serde(rename = "BoundingBox")]
struct RawBoundingBox {
    min: Vec<f64>,
    max: Vec<f64>,
}

fn to_axes<const D: usize, E: de::Error>(coords: Vec<f64>) -> Result<[f64; D], E> {
    let len = coords.len();
    coords
        .try_into()
        .map_err(|_| E::invalid_length(len, &format!("{} coordinates", D).as_str()))
}

impl<'de, const D: usize> Deserialize<'de> for BoundingBox<D> {
    fn deserialize<De: Deserializer<'de>>(deserializer: De) -> Result<Self, De::Error> {
        let raw = RawBoundingBox::deserialize(deserializer)?;
        Ok(Self {
            min: to_axes(raw.min)?,
            max: to_axes(raw.max)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_and_point() {
        let bbox = Rect::xy(1.0, 2.0, 3.0, 4.0);
        assert_eq!(bbox.min, [1.0, 2.0]);
        assert_eq!(bbox.max, [3.0, 4.0]);

        let p = BoundingBox::point([5.0, 6.0, 7.0]);
        assert_eq!(p.min, p.max);
        assert_eq!(p.area(), 0.0);
    }

    #[test]
    fn test_try_new_rejects_inverted_axis() {
        let err = BoundingBox::try_new([0.0, 5.0], [1.0, 4.0]).unwrap_err();
        assert!(matches!(err, SpatialError::InvalidArgument(_)));
        assert!(err.to_string().contains("axis 1"));

        assert!(BoundingBox::try_new([f64::NAN, 0.0], [1.0, 1.0]).is_err());
        assert!(BoundingBox::try_new([0.0, 0.0], [0.0, 0.0]).is_ok());
    }

    #[test]
    fn test_area_margin_extent() {
        let bbox = Rect::xy(0.0, 0.0, 10.0, 5.0);
        assert_eq!(bbox.extent(AXIS_X), 10.0);
        assert_eq!(bbox.extent(AXIS_Y), 5.0);
        assert_eq!(bbox.area(), 50.0);
        assert_eq!(bbox.margin(), 15.0);

        let cube = BoundingBox::new([0.0; 3], [2.0; 3]);
        assert_eq!(cube.area(), 8.0);
    }

    #[test]
    fn test_overlaps_closed_intervals() {
        let a = Rect::xy(0.0, 0.0, 10.0, 10.0);
        let b = Rect::xy(5.0, 5.0, 15.0, 15.0);
        let c = Rect::xy(20.0, 20.0, 30.0, 30.0);
        let touching = Rect::xy(10.0, 10.0, 20.0, 20.0);

        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));
        assert!(!a.overlaps(&c));
        assert!(a.overlaps(&touching));
        assert!(a.overlaps(&a));
    }

    #[test]
    fn test_overlaps_requires_every_axis() {
        let a = STBox::xyt(0.0, 0.0, 1.0, 1.0, 100.0, 200.0);
        let same_space_later = STBox::xyt(0.0, 0.0, 1.0, 1.0, 300.0, 400.0);
        let same_space_during = STBox::xyt(0.5, 0.5, 0.7, 0.7, 150.0, 160.0);

        assert!(!a.overlaps(&same_space_later));
        assert!(a.overlaps(&same_space_during));
        assert!(a.contains(&same_space_during));
        assert_eq!(a.period(), (100.0, 200.0));

        let above = STBox::xyzt([0.0, 0.0, 5.0], [1.0, 1.0, 6.0], 100.0, 200.0);
        assert!(!a.overlaps(&above));
        assert_eq!(above.extent(AXIS_Z), 1.0);
    }

    #[test]
    fn test_contains() {
        let outer = Rect::xy(0.0, 0.0, 10.0, 10.0);
        let inner = Rect::xy(2.0, 2.0, 8.0, 8.0);
        let partial = Rect::xy(5.0, 5.0, 15.0, 15.0);

        assert!(outer.contains(&inner));
        assert!(outer.contains(&outer));
        assert!(!outer.contains(&partial));
        assert!(!inner.contains(&outer));
    }

    #[test]
    fn test_union_and_enlargement() {
        let a = Rect::xy(0.0, 0.0, 2.0, 2.0);
        let b = Rect::xy(1.0, 1.0, 4.0, 3.0);

        assert_eq!(a.union(&b), Rect::xy(0.0, 0.0, 4.0, 3.0));
        assert_eq!(a.enlargement(&b), 12.0 - 4.0);
        assert_eq!(a.enlargement(&Rect::xy(0.5, 0.5, 1.0, 1.0)), 0.0);
    }

    #[test]
    fn test_compute_mbr() {
        let boxes = vec![
            Rect::xy(0.0, 0.0, 1.0, 1.0),
            Rect::xy(5.0, -2.0, 6.0, 0.0),
            Rect::xy(-1.0, 3.0, 0.0, 4.0),
        ];
        let mbr = BoundingBox::compute_mbr(&boxes).unwrap();
        assert_eq!(mbr, Rect::xy(-1.0, -2.0, 6.0, 4.0));
        for bbox in &boxes {
            assert!(mbr.contains(bbox));
        }

        let empty: Vec<Rect> = Vec::new();
        assert!(BoundingBox::compute_mbr(&empty).is_none());
    }

    #[test]
    fn test_display() {
        let bbox = Rect::xy(1.0, 2.0, 3.0, 4.0);
        assert_eq!(format!("{}", bbox), "BoundingBox([1.0, 2.0], [3.0, 4.0])");
    }

    #[test]
    fn test_serialization() {
        let bbox = STBox::xyt(1.5, 2.5, 3.5, 4.5, 10.0, 20.0);
        let json = serde_json::to_string(&bbox).unwrap();
        assert!(json.contains("\"min\""));
        let decoded: STBox = serde_json::from_str(&json).unwrap();
        assert_eq!(bbox, decoded);
    }

    #[test]
    fn test_deserialize_wrong_dimension_fails() {
        let json = r#"{"min":[0.0,0.0,0.0],"max":[1.0,1.0,1.0]}"#;
        assert!(serde_json::from_str::<Rect>(json).is_err());
    }
}
