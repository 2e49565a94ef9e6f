//! Core point types shared by the kpcn crates.

use core::ops::{Add, Mul, Sub};

use crate::error::{CoreError, Result};

/// A 3D point with named fields.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point3 {
    /// X coordinate.
    pub x: f32,
    /// Y coordinate.
    pub y: f32,
    /// Z coordinate.
    pub z: f32,
}

impl Point3 {
    /// Create a new Point3.
    #[inline]
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Convert to an array.
    #[inline]
    pub const fn as_array(&self) -> [f32; 3] {
        [self.x, self.y, self.z]
    }

    /// Dot product with another point (treating both as vectors).
    #[inline]
    pub fn dot(self, other: Self) -> f32 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    /// Squared length of the vector.
    #[inline]
    pub fn length_squared(self) -> f32 {
        self.dot(self)
    }

    /// Squared Euclidean distance to another point.
    #[inline]
    pub fn distance_squared(self, other: Self) -> f32 {
        (self - other).length_squared()
    }
}

impl From<[f32; 3]> for Point3 {
    #[inline]
    fn from(arr: [f32; 3]) -> Self {
        Self {
            x: arr[0],
            y: arr[1],
            z: arr[2],
        }
    }
}

impl From<Point3> for [f32; 3] {
    #[inline]
    fn from(p: Point3) -> Self {
        p.as_array()
    }
}

impl Add for Point3 {
    type Output = Self;

    #[inline]
    fn add(self, other: Self) -> Self {
        Self {
            x: self.x + other.x,
            y: self.y + other.y,
            z: self.z + other.z,
        }
    }
}

impl Sub for Point3 {
    type Output = Self;

    #[inline]
    fn sub(self, other: Self) -> Self {
        Self {
            x: self.x - other.x,
            y: self.y - other.y,
            z: self.z - other.z,
        }
    }
}

impl Mul<f32> for Point3 {
    type Output = Self;

    #[inline]
    fn mul(self, scalar: f32) -> Self {
        Self {
            x: self.x * scalar,
            y: self.y * scalar,
            z: self.z * scalar,
        }
    }
}

/// An owned set of points, e.g. one ground-truth cloud of a gallery.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PointSet {
    points: Vec<Point3>,
}

impl PointSet {
    /// Create a point set from points.
    pub fn new(points: Vec<Point3>) -> Self {
        Self { points }
    }

    /// Build a point set from a flat `[x0, y0, z0, x1, ...]` buffer.
    pub fn from_flat(values: &[f32]) -> Result<Self> {
        if values.len() % 3 != 0 {
            return Err(CoreError::InvalidPointData {
                expected: values.len() - values.len() % 3,
                got: values.len(),
            });
        }
        let points = values
            .chunks_exact(3)
            .map(|c| Point3::new(c[0], c[1], c[2]))
            .collect();
        Ok(Self { points })
    }

    /// Flatten to `[x0, y0, z0, x1, ...]`.
    pub fn to_flat(&self) -> Vec<f32> {
        self.points.iter().flat_map(|p| p.as_array()).collect()
    }

    /// Borrow the points.
    pub fn points(&self) -> &[Point3] {
        &self.points
    }

    /// Number of points.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

impl From<Vec<Point3>> for PointSet {
    fn from(points: Vec<Point3>) -> Self {
        Self::new(points)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_arithmetic() {
        let a = Point3::new(1.0, 2.0, 3.0);
        let b = Point3::new(0.5, 0.5, 0.5);
        assert_eq!(a - b, Point3::new(0.5, 1.5, 2.5));
        assert_eq!(a + b, Point3::new(1.5, 2.5, 3.5));
        assert!((a.distance_squared(b) - 8.75).abs() < 1e-6);
    }

    #[test]
    fn test_point_set_flat() {
        let set = PointSet::from_flat(&[0.0, 1.0, 2.0, 3.0, 4.0, 5.0]).unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set.points()[1], Point3::new(3.0, 4.0, 5.0));
        assert_eq!(set.to_flat(), vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);
    }

    #[test]
    fn test_point_set_rejects_partial_point() {
        let err = PointSet::from_flat(&[0.0, 1.0, 2.0, 3.0]).unwrap_err();
        assert_eq!(
            err,
            CoreError::InvalidPointData {
                expected: 3,
                got: 4
            }
        );
    }
}
