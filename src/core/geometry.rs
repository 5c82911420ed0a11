// Copyright @yucwang 2026

use crate::math::constants::{ Float, Matrix3f, Vector2f, Vector3f };

// Builds two vectors completing `a` to an orthonormal frame.
pub fn orthonormal_basis(a: &Vector3f) -> (Vector3f, Vector3f) {
    let c = if a.x.abs() > a.y.abs() {
        Vector3f::new(a.z, 0.0, -a.x).normalize()
    } else {
        Vector3f::new(0.0, a.z, -a.y).normalize()
    };
    let b = c.cross(a).normalize();
    (b, c)
}

// Local differential geometry at a surface point. `degenerated` marks
// point-like geometries (point lights, pinhole eyes) that carry no frame.
#[derive(Debug, Clone, Copy)]
pub struct SurfaceGeometry {
    pub degenerated: bool,
    pub p: Vector3f,
    pub sn: Vector3f,
    pub gn: Vector3f,
    pub dpdu: Vector3f,
    pub dpdv: Vector3f,
    pub dndu: Vector3f,
    pub dndv: Vector3f,
    pub uv: Vector2f,
    pub to_local: Matrix3f,
    pub to_world: Matrix3f,
}

impl Default for SurfaceGeometry {
    fn default() -> Self {
        Self {
            degenerated: false,
            p: Vector3f::zeros(),
            sn: Vector3f::zeros(),
            gn: Vector3f::zeros(),
            dpdu: Vector3f::zeros(),
            dpdv: Vector3f::zeros(),
            dndu: Vector3f::zeros(),
            dndv: Vector3f::zeros(),
            uv: Vector2f::zeros(),
            to_local: Matrix3f::identity(),
            to_world: Matrix3f::identity(),
        }
    }
}

impl SurfaceGeometry {
    pub fn compute_tangent_space(&mut self) {
        let (dpdu, dpdv) = orthonormal_basis(&self.sn);
        self.dpdu = dpdu;
        self.dpdv = dpdv;
        self.to_world = Matrix3f::from_columns(&[self.dpdu, self.dpdv, self.sn]);
        self.to_local = self.to_world.transpose();
    }

    pub fn to_local(&self, v: &Vector3f) -> Vector3f {
        self.to_local * v
    }

    pub fn to_world(&self, v: &Vector3f) -> Vector3f {
        self.to_world * v
    }
}

// G(x, y) = |cos(theta_x) * cos(theta_y)| / |x - y|^2, degenerate endpoints
// contribute no cosine.
pub fn geometry_term(geom1: &SurfaceGeometry, geom2: &SurfaceGeometry) -> Float {
    let mut p1p2 = geom2.p - geom1.p;
    let p1p2_l2 = p1p2.dot(&p1p2);
    if p1p2_l2 <= 0.0 {
        return 0.0;
    }
    let p1p2_l = p1p2_l2.sqrt();
    p1p2 /= p1p2_l;
    let mut t = 1.0;
    if !geom1.degenerated {
        t *= geom1.sn.dot(&p1p2).abs();
    }
    if !geom2.degenerated {
        t *= geom2.sn.dot(&(-p1p2)).abs();
    }
    t / p1p2_l2
}

/* Tests for surface geometry */

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_orthonormal_basis() {
        let dirs = [
            Vector3f::new(0.0, 0.0, 1.0),
            Vector3f::new(1.0, 0.0, 0.0),
            Vector3f::new(0.3, -0.5, 0.8).normalize(),
        ];
        for n in dirs {
            let (b, c) = orthonormal_basis(&n);
            assert!((b.norm() - 1.0).abs() < 1e-9);
            assert!((c.norm() - 1.0).abs() < 1e-9);
            assert!(b.dot(&n).abs() < 1e-9);
            assert!(c.dot(&n).abs() < 1e-9);
            assert!(b.dot(&c).abs() < 1e-9);
        }
    }

    #[test]
    fn test_tangent_space_roundtrip() {
        let mut geom = SurfaceGeometry::default();
        geom.sn = Vector3f::new(0.2, 0.4, 0.6).normalize();
        geom.gn = geom.sn;
        geom.compute_tangent_space();

        let v = Vector3f::new(0.1, -0.7, 0.3);
        let back = geom.to_world(&geom.to_local(&v));
        assert!((back - v).norm() < 1e-9);

        // Shading normal maps to local +z.
        let local_n = geom.to_local(&geom.sn);
        assert!((local_n - Vector3f::new(0.0, 0.0, 1.0)).norm() < 1e-9);
    }

    #[test]
    fn test_geometry_term() {
        let mut g1 = SurfaceGeometry::default();
        g1.p = Vector3f::zeros();
        g1.sn = Vector3f::new(0.0, 0.0, 1.0);

        let mut g2 = SurfaceGeometry::default();
        g2.p = Vector3f::new(0.0, 0.0, 2.0);
        g2.sn = Vector3f::new(0.0, 0.0, -1.0);

        // Facing patches at distance 2: G = 1 / 4.
        assert!((geometry_term(&g1, &g2) - 0.25).abs() < 1e-12);

        // Degenerate endpoint drops its cosine.
        g1.degenerated = true;
        assert!((geometry_term(&g1, &g2) - 0.25).abs() < 1e-12);
    }
}
