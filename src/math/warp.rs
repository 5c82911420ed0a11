// Copyright @yucwang 2023

use super::constants::{ INV_PI, PI, Float, Vector2f, Vector3f };

pub fn sample_uniform_disk_concentric(u: &Vector2f) -> Vector2f {
    let r1: Float = 2.0 * u.x - 1.0;
    let r2: Float = 2.0 * u.y - 1.0;

    let phi: Float;
    let r:   Float;

    if r1 == 0. && r2 == 0. {
        r = 0.0;
        phi = 0.0;
    } else if r1 * r1 > r2 * r2 {
        r = r1;
        phi = (PI / 4.0) * (r2 / r1);
    } else {
        r = r2;
        phi = (PI / 2.0) - (r1 / r2) * (PI / 4.0);
    }

    let (sin_phi, cos_phi) = phi.sin_cos();

    Vector2f::new(r * cos_phi, r * sin_phi)
}

pub fn sample_cosine_hemisphere(u: &Vector2f) -> Vector3f {
    let p = sample_uniform_disk_concentric(u);
    let z = (1. - p.x * p.x - p.y * p.y).max(0.0).sqrt();

    Vector3f::new(p.x, p.y, z)
}

// PDF with respect to the projected solid angle measure.
pub fn sample_cosine_hemisphere_pdf_proj() -> Float {
    INV_PI
}

pub fn sample_uniform_sphere(u: &Vector2f) -> Vector3f {
    let z: Float = 1.0 - 2.0 * u.x;
    let r: Float = (1.0 - z * z).max(0.0).sqrt();
    let phi: Float = 2.0 * PI * u.y;

    Vector3f::new(r * phi.cos(), r * phi.sin(), z)
}

pub fn sample_uniform_sphere_pdf() -> Float {
    INV_PI * 0.25
}

pub fn sample_uniform_triangle(u: &Vector2f) -> Vector2f {
    let s = u.x.max(0.0).sqrt();
    Vector2f::new(1.0 - s, u.y * s)
}

/* Tests for warp functions */

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::rng::LcgRng;

    #[test]
    fn test_concentric_disk_in_unit_disk() {
        let mut rng = LcgRng::new(7);
        for _ in 0..1000 {
            let p = sample_uniform_disk_concentric(&rng.next_2d());
            assert!(p.x * p.x + p.y * p.y <= 1.0 + 1e-9);
        }
    }

    #[test]
    fn test_cosine_hemisphere_upper() {
        let mut rng = LcgRng::new(11);
        for _ in 0..1000 {
            let d = sample_cosine_hemisphere(&rng.next_2d());
            assert!(d.z >= 0.0);
            assert!((d.norm() - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_uniform_sphere_unit_length() {
        let mut rng = LcgRng::new(13);
        let mut mean = Vector3f::zeros();
        for _ in 0..4000 {
            let d = sample_uniform_sphere(&rng.next_2d());
            assert!((d.norm() - 1.0).abs() < 1e-9);
            mean += d;
        }
        mean /= 4000.0;
        // Uniform directions average out to the origin.
        assert!(mean.norm() < 0.05);
    }

    #[test]
    fn test_uniform_triangle_barycentric() {
        let mut rng = LcgRng::new(17);
        for _ in 0..1000 {
            let b = sample_uniform_triangle(&rng.next_2d());
            assert!(b.x >= 0.0 && b.y >= 0.0);
            assert!(b.x + b.y <= 1.0 + 1e-9);
        }
    }
}
