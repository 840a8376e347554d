//! Logical coordinate space primitives.

use std::cmp;
use std::ops::{Add, AddAssign, Sub};

use weir_wm::Rect;

/// Point in logical coordinates.
#[derive(Default, PartialEq, Copy, Clone, Debug)]
pub struct Point<T = i32> {
    pub x: T,
    pub y: T,
}

impl<T> From<(T, T)> for Point<T> {
    fn from((x, y): (T, T)) -> Self {
        Self { x, y }
    }
}

impl<T: Add<Output = T>> Add for Point<T> {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self { x: self.x + rhs.x, y: self.y + rhs.y }
    }
}

impl<T: AddAssign> AddAssign for Point<T> {
    fn add_assign(&mut self, rhs: Self) {
        self.x += rhs.x;
        self.y += rhs.y;
    }
}

impl<T: Sub<Output = T>> Sub for Point<T> {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self { x: self.x - rhs.x, y: self.y - rhs.y }
    }
}

impl Point<i32> {
    pub fn to_f64(self) -> Point<f64> {
        Point { x: self.x as f64, y: self.y as f64 }
    }
}

impl Point<f64> {
    pub fn to_i32_round(self) -> Point<i32> {
        Point { x: self.x.round() as i32, y: self.y.round() as i32 }
    }
}

/// Size in logical coordinates.
#[derive(Default, PartialEq, Copy, Clone, Debug)]
pub struct Size<T = i32> {
    pub w: T,
    pub h: T,
}

impl<T> From<(T, T)> for Size<T> {
    fn from((w, h): (T, T)) -> Self {
        Self { w, h }
    }
}

impl Size<i32> {
    pub fn to_f64(self) -> Size<f64> {
        Size { w: self.w as f64, h: self.h as f64 }
    }
}

/// Rectangle in logical coordinates.
#[derive(Default, PartialEq, Copy, Clone, Debug)]
pub struct Rectangle<T = i32> {
    pub loc: Point<T>,
    pub size: Size<T>,
}

impl<T> Rectangle<T> {
    pub fn new(loc: Point<T>, size: Size<T>) -> Self {
        Self { loc, size }
    }
}

impl<T: Default> Rectangle<T> {
    /// Rectangle at the origin.
    pub fn from_size(size: Size<T>) -> Self {
        Self { loc: Point::default(), size }
    }
}

impl Rectangle<i32> {
    pub fn to_f64(self) -> Rectangle<f64> {
        Rectangle { loc: self.loc.to_f64(), size: self.size.to_f64() }
    }

    pub fn contains(&self, point: Point<f64>) -> bool {
        self.to_f64().contains(point)
    }
}

impl Rectangle<f64> {
    pub fn contains(&self, point: Point<f64>) -> bool {
        point.x >= self.loc.x
            && point.y >= self.loc.y
            && point.x < self.loc.x + self.size.w
            && point.y < self.loc.y + self.size.h
    }

    /// Clamp a point to the rectangle's bounds.
    pub fn clamp(&self, mut point: Point<f64>) -> Point<f64> {
        point.x = point.x.clamp(self.loc.x, self.loc.x + self.size.w - 1.);
        point.y = point.y.clamp(self.loc.y, self.loc.y + self.size.h - 1.);
        point
    }
}

impl From<Rect> for Rectangle<i32> {
    fn from(rect: Rect) -> Self {
        Self { loc: Point::from((rect.x, rect.y)), size: Size::from((rect.width, rect.height)) }
    }
}

impl From<Rectangle<i32>> for Rect {
    fn from(rectangle: Rectangle<i32>) -> Self {
        Self {
            x: rectangle.loc.x,
            y: rectangle.loc.y,
            width: rectangle.size.w,
            height: rectangle.size.h,
        }
    }
}

/// Componentwise helpers for 2D vectors.
pub trait Vector: Sized {
    /// Scale the vector by a scaling factor.
    fn scale(&self, scale: f64) -> Self;

    /// Compare and return the smaller of each individual dimensions.
    fn min(&self, other: impl Into<Self>) -> Self;

    /// Compare and return the bigger of each individual dimensions.
    fn max(&self, other: impl Into<Self>) -> Self;
}

/// Helper trait for converting into a 2D vector.
pub trait IntoVector {
    fn as_vector(&self) -> (i32, i32);
}

impl IntoVector for Point<i32> {
    fn as_vector(&self) -> (i32, i32) {
        (self.x, self.y)
    }
}

impl IntoVector for Size<i32> {
    fn as_vector(&self) -> (i32, i32) {
        (self.w, self.h)
    }
}

impl<T> Vector for T
where
    T: IntoVector,
    T: From<(i32, i32)>,
{
    fn scale(&self, scale: f64) -> Self {
        let tuple = self.as_vector();
        Self::from((
            (tuple.0 as f64 * scale).round() as i32,
            (tuple.1 as f64 * scale).round() as i32,
        ))
    }

    fn min(&self, other: impl Into<Self>) -> Self {
        let tuple = self.as_vector();
        let other = other.into().as_vector();
        Self::from((cmp::min(tuple.0, other.0), cmp::min(tuple.1, other.1)))
    }

    fn max(&self, other: impl Into<Self>) -> Self {
        let tuple = self.as_vector();
        let other = other.into().as_vector();
        Self::from((cmp::max(tuple.0, other.0), cmp::max(tuple.1, other.1)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rectangle_contains() {
        let rect = Rectangle::new(Point::from((10, 10)), Size::from((20, 20)));
        assert!(rect.contains(Point::from((10., 10.))));
        assert!(rect.contains(Point::from((29.9, 29.9))));
        assert!(!rect.contains(Point::from((30., 30.))));
        assert!(!rect.contains(Point::from((9.9, 15.))));
    }

    #[test]
    fn vector_scale_rounds() {
        assert_eq!(Size::from((1920, 1080)).scale(0.5), Size::from((960, 540)));
        assert_eq!(Point::from((3, 3)).scale(1.5), Point::from((5, 5)));
    }

    #[test]
    fn clamp_to_bounds() {
        let rect = Rectangle::new(Point::from((0., 0.)), Size::from((100., 50.)));
        let clamped = rect.clamp(Point::from((120., -5.)));
        assert_eq!(clamped, Point::from((99., 0.)));
    }
}
