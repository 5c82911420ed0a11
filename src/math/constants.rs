/* Copyright 2020 @Yuchen Wong */

pub type Float = f64;
pub type Int = i32;
pub type UInt = u32;

pub type Vector2f = nalgebra::Vector2<Float>;
pub type Vector3f = nalgebra::Vector3<Float>;
pub type Matrix2f = nalgebra::Matrix2<Float>;
pub type Matrix3f = nalgebra::Matrix3<Float>;

pub const EPSILON: Float = 1e-4;
pub const PI: Float = std::f64::consts::PI;
pub const INV_PI: Float = 1.0 / PI;
pub const FLOAT_MAX: Float = f64::MAX;
pub const FLOAT_MIN: Float = -f64::MAX;
