// Copyright 2020 @TwoCookingMice

use super::constants::{ EPSILON, FLOAT_MAX, Float, Vector3f };

pub struct Ray3f {
    origin: Vector3f,
    dir: Vector3f,
    pub min_t: Float,
    pub max_t: Float
}

impl Ray3f {
    pub fn new(o: Vector3f, d: Vector3f,
               min_t: Option<Float>, max_t: Option<Float>) -> Self {
        Self { origin: o, dir: d,
               min_t: min_t.unwrap_or(EPSILON),
               max_t: max_t.unwrap_or(FLOAT_MAX) }
    }

    pub fn origin(&self) -> Vector3f {
        self.origin
    }

    pub fn dir(&self) -> Vector3f {
        self.dir
    }

    pub fn at(&self, t: Float) -> Vector3f {
        self.origin + self.dir * t
    }

    pub fn test_segment(&self, t: Float) -> bool {
        t >= self.min_t && t <= self.max_t
    }
}

/* Tests for Ray */

#[cfg(test)]
mod tests {
    use super::{ Ray3f, Vector3f };

    #[test]
    fn test_ray3f() {
        let o = Vector3f::new(0.0, 0.0, 0.0);
        let d = Vector3f::new(0.0, 0.0, 1.0);
        let ray = Ray3f::new(o, d, Some(0.0), Some(10.0));
        assert_eq!(o, ray.origin());

        let v = ray.at(2.0);
        assert!((v[2] - 2.0).abs() < 1e-12);

        assert!(ray.test_segment(5.0));
        assert!(!ray.test_segment(10.5));
    }
}
