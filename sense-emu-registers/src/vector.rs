//! Three-component vector used by the IMU world model
//!
//! All operations are pure and return a new vector. Arithmetic with another
//! vector is element-wise; arithmetic with a scalar applies to every
//! component.

use std::fmt;
use std::ops::{Add, Div, Mul, Neg, Sub};

/// A 3-dimensional vector
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vector3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vector3 {
    pub const ZERO: Vector3 = Vector3::new(0.0, 0.0, 0.0);
    pub const X: Vector3 = Vector3::new(1.0, 0.0, 0.0);
    pub const Y: Vector3 = Vector3::new(0.0, 1.0, 0.0);
    pub const Z: Vector3 = Vector3::new(0.0, 0.0, 1.0);

    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn to_array(self) -> [f64; 3] {
        [self.x, self.y, self.z]
    }

    /// Apply `f` to every component
    pub fn map<F: Fn(f64) -> f64>(self, f: F) -> Self {
        Self::new(f(self.x), f(self.y), f(self.z))
    }

    pub fn dot(self, other: Vector3) -> f64 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    pub fn cross(self, other: Vector3) -> Vector3 {
        Vector3::new(
            self.y * other.z - self.z * other.y,
            self.z * other.x - self.x * other.z,
            self.x * other.y - self.y * other.x,
        )
    }

    pub fn magnitude(self) -> f64 {
        self.dot(self).sqrt()
    }

    /// Vector of length one in the same direction
    ///
    /// A zero vector has no direction and is returned unchanged.
    pub fn unit(self) -> Vector3 {
        let m = self.magnitude();
        if m == 0.0 {
            self
        } else {
            self / m
        }
    }

    pub fn distance_to(self, other: Vector3) -> f64 {
        (other - self).magnitude()
    }

    /// Angle between the two vectors in degrees
    pub fn angle_between(self, other: Vector3) -> f64 {
        self.unit().dot(other.unit()).clamp(-1.0, 1.0).acos().to_degrees()
    }

    /// Scalar projection of this vector onto `other`
    pub fn project(self, other: Vector3) -> f64 {
        self.dot(other.unit())
    }

    /// Rotate by `angle` degrees about the axis `about` through the origin
    pub fn rotate(self, angle: f64, about: Vector3) -> Vector3 {
        let (sin, cos) = angle.to_radians().sin_cos();
        let Vector3 { x, y, z } = self;
        let Vector3 { x: u, y: v, z: w } = about.unit();
        let d = u * x + v * y + w * z;
        Vector3::new(
            u * d * (1.0 - cos) + x * cos + (-w * y + v * z) * sin,
            v * d * (1.0 - cos) + y * cos + (w * x - u * z) * sin,
            w * d * (1.0 - cos) + z * cos + (-v * x + u * y) * sin,
        )
    }

    /// Rotate by `angle` degrees about the line through `origin` in the
    /// direction `about`
    pub fn rotate_about_line(self, angle: f64, about: Vector3, origin: Vector3) -> Vector3 {
        (self - origin).rotate(angle, about) + origin
    }
}

impl From<[f64; 3]> for Vector3 {
    fn from([x, y, z]: [f64; 3]) -> Self {
        Self::new(x, y, z)
    }
}

impl From<(f64, f64, f64)> for Vector3 {
    fn from((x, y, z): (f64, f64, f64)) -> Self {
        Self::new(x, y, z)
    }
}

impl fmt::Display for Vector3 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{}", self.x, self.y, self.z)
    }
}

macro_rules! elementwise_op {
    ($trait:ident, $method:ident, $op:tt) => {
        impl $trait for Vector3 {
            type Output = Vector3;

            fn $method(self, rhs: Vector3) -> Vector3 {
                Vector3::new(self.x $op rhs.x, self.y $op rhs.y, self.z $op rhs.z)
            }
        }

        impl $trait<f64> for Vector3 {
            type Output = Vector3;

            fn $method(self, rhs: f64) -> Vector3 {
                Vector3::new(self.x $op rhs, self.y $op rhs, self.z $op rhs)
            }
        }
    };
}

elementwise_op!(Add, add, +);
elementwise_op!(Sub, sub, -);
elementwise_op!(Mul, mul, *);
elementwise_op!(Div, div, /);

impl Mul<Vector3> for f64 {
    type Output = Vector3;

    fn mul(self, rhs: Vector3) -> Vector3 {
        rhs * self
    }
}

impl Neg for Vector3 {
    type Output = Vector3;

    fn neg(self) -> Vector3 {
        Vector3::new(-self.x, -self.y, -self.z)
    }
}
