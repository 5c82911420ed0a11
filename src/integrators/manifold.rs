// Copyright @yucwang 2026

use crate::core::path::{ Path, PathVertex };
use crate::core::primitive::PrimitiveType;
use crate::core::scene::Scene;
use crate::math::constants::{ Float, Matrix2f, Vector2f, Vector3f };
use crate::math::ray::Ray3f;

use nalgebra::DMatrix;

const MAX_BETA: Float = 100.0;
const BETA_GROWTH: Float = 1.7;
const WALK_EPS: Float = 1e-5;
const MAX_ITER: usize = 30;

// 2x2 blocks of the half-vector constraint Jacobian at one interior vertex:
// derivatives with respect to the previous (a), current (b) and next (c)
// vertex, expressed in the local tangent planes.
pub struct VertexConstraintJacobian {
    pub a: Matrix2f,
    pub b: Matrix2f,
    pub c: Matrix2f,
}

pub type ConstraintJacobian = Vec<VertexConstraintJacobian>;

pub fn compute_constraint_jacobian(path: &Path, nabla_c: &mut ConstraintJacobian) {
    nabla_c.clear();
    let n = path.vertices.len();
    for i in 1..(n - 1) {
        let x = &path.vertices[i].geom;
        let xp = &path.vertices[i - 1].geom;
        let xn = &path.vertices[i + 1].geom;

        let wi_full = xp.p - x.p;
        let wo_full = xn.p - x.p;
        let wi = wi_full.normalize();
        let wo = wo_full.normalize();
        let h = (wi + wo).normalize();

        let inv_wi_l = 1.0 / wi_full.norm();
        let inv_wo_l = 1.0 / wo_full.norm();
        let inv_h_l = 1.0 / (wi + wo).norm();

        let dot_h_n = x.sn.dot(&h);
        let dot_h_dndu = x.dndu.dot(&h);
        let dot_h_dndv = x.dndv.dot(&h);
        let dot_u_n = x.dpdu.dot(&x.sn);
        let dot_v_n = x.dpdv.dot(&x.sn);

        let s = x.dpdu - dot_u_n * x.sn;
        let t = x.dpdv - dot_v_n * x.sn;

        let div_inv_wi_l_h_l = inv_wi_l * inv_h_l;
        let div_inv_wo_l_h_l = inv_wo_l * inv_h_l;

        // Derivative with respect to x_{i-1}
        let a = {
            let tu = (xp.dpdu - wi * wi.dot(&xp.dpdu)) * div_inv_wi_l_h_l;
            let tv = (xp.dpdv - wi * wi.dot(&xp.dpdv)) * div_inv_wi_l_h_l;
            let dhdu = tu - h * tu.dot(&h);
            let dhdv = tv - h * tv.dot(&h);
            Matrix2f::new(dhdu.dot(&s), dhdv.dot(&s),
                          dhdu.dot(&t), dhdv.dot(&t))
        };

        // Derivative with respect to x_i
        let b = {
            let tu = -x.dpdu * (div_inv_wi_l_h_l + div_inv_wo_l_h_l)
                + wi * (wi.dot(&x.dpdu) * div_inv_wi_l_h_l)
                + wo * (wo.dot(&x.dpdu) * div_inv_wo_l_h_l);
            let tv = -x.dpdv * (div_inv_wi_l_h_l + div_inv_wo_l_h_l)
                + wi * (wi.dot(&x.dpdv) * div_inv_wi_l_h_l)
                + wo * (wo.dot(&x.dpdv) * div_inv_wo_l_h_l);
            let dhdu = tu - h * tu.dot(&h);
            let dhdv = tv - h * tv.dot(&h);
            Matrix2f::new(
                dhdu.dot(&s) - x.dpdu.dot(&x.dndu) * dot_h_n - dot_u_n * dot_h_dndu,
                dhdv.dot(&s) - x.dpdu.dot(&x.dndv) * dot_h_n - dot_u_n * dot_h_dndv,
                dhdu.dot(&t) - x.dpdv.dot(&x.dndu) * dot_h_n - dot_v_n * dot_h_dndu,
                dhdv.dot(&t) - x.dpdv.dot(&x.dndv) * dot_h_n - dot_v_n * dot_h_dndv)
        };

        // Derivative with respect to x_{i+1}
        let c = {
            let tu = (xn.dpdu - wo * wo.dot(&xn.dpdu)) * div_inv_wo_l_h_l;
            let tv = (xn.dpdv - wo * wo.dot(&xn.dpdv)) * div_inv_wo_l_h_l;
            let dhdu = tu - h * tu.dot(&h);
            let dhdv = tv - h * tv.dot(&h);
            Matrix2f::new(dhdu.dot(&s), dhdv.dot(&s),
                          dhdu.dot(&t), dhdv.dot(&t))
        };

        nabla_c.push(VertexConstraintJacobian { a, b, c });
    }
}

// |det(P_2 A^-1 B_n)| of the specular-chain transfer, via the dense
// block-tridiagonal matrix.
pub fn compute_constraint_jacobian_determinant(nabla_c: &ConstraintJacobian) -> Float {
    let n = nabla_c.len();
    let mut a = DMatrix::<Float>::zeros(2 * n, 2 * n);
    for i in 0..n {
        if i > 0 {
            write_block(&mut a, 2 * i, 2 * (i - 1), &nabla_c[i].a);
        }
        write_block(&mut a, 2 * i, 2 * i, &nabla_c[i].b);
        if i < n - 1 {
            write_block(&mut a, 2 * i, 2 * (i + 1), &nabla_c[i].c);
        }
    }

    let Some(inv_a) = a.try_inverse() else {
        return 0.0;
    };

    let inv_a_0_n = Matrix2f::new(inv_a[(0, 2 * n - 2)], inv_a[(0, 2 * n - 1)],
                                  inv_a[(1, 2 * n - 2)], inv_a[(1, 2 * n - 1)]);
    let b_n = nabla_c[n - 1].c;
    (inv_a_0_n * b_n).determinant().abs()
}

fn write_block(m: &mut DMatrix<Float>, row: usize, col: usize, block: &Matrix2f) {
    for r in 0..2 {
        for c in 0..2 {
            m[(row + r, col + c)] = block[(r, c)];
        }
    }
}

// Solves the block-tridiagonal system (diagonal B_i, upper C_i, lower A_i)
// by block LU with forward/back substitution.
pub fn solve_block_linear_eq(nabla_c: &ConstraintJacobian, v: &[Vector2f])
    -> Option<Vec<Vector2f>> {
    let n = nabla_c.len();
    debug_assert_eq!(v.len(), n);

    let mut l = vec![Matrix2f::zeros(); n];
    let mut u = vec![Matrix2f::zeros(); n];
    u[0] = nabla_c[0].b;
    for i in 1..n {
        l[i] = nabla_c[i].a * u[i - 1].try_inverse()?;
        u[i] = nabla_c[i].b - l[i] * nabla_c[i - 1].c;
    }

    let mut vp = vec![Vector2f::zeros(); n];
    vp[0] = v[0];
    for i in 1..n {
        vp[i] = v[i] - l[i] * vp[i - 1];
    }

    let mut w = vec![Vector2f::zeros(); n];
    w[n - 1] = u[n - 1].try_inverse()? * vp[n - 1];
    for i in (0..(n - 1)).rev() {
        w[i] = u[i].try_inverse()? * (vp[i] - nabla_c[i].c * w[i + 1]);
    }

    Some(w)
}

// Newton-style walk moving the end of a specular chain onto `target` while
// keeping the half-vector constraints satisfied. The step scale is halved
// on rejection and grown on acceptance; a step is accepted only when it
// strictly reduces the distance to the target and the chain stays specular.
pub fn walk_manifold(scene: &Scene, seed_path: &Path, target: Vector3f,
                     out_path: &mut Path) -> bool {
    let n = seed_path.vertices.len();

    let mut curr = Path::new();
    curr.vertices.extend_from_slice(&seed_path.vertices);

    let mut nabla_c = ConstraintJacobian::new();
    compute_constraint_jacobian(&curr, &mut nabla_c);

    let mut l_max: Float = 0.0;
    for x in &curr.vertices {
        l_max = l_max.max(x.geom.p.norm());
    }

    let mut iter = 0;
    let mut beta = MAX_BETA;
    let mut converged = false;

    loop {
        if iter >= MAX_ITER {
            break;
        }
        iter += 1;

        if (curr.vertices[n - 1].geom.p - target).norm() < WALK_EPS * l_max {
            converged = true;
            break;
        }

        // Movement of the first specular vertex in its tangent plane
        let p = {
            let xn = curr.vertices[n - 1].geom.p;
            let end_geom = &curr.vertices[n - 1].geom;
            let d = target - xn;
            let v_end = nabla_c[n - 3].c
                * Vector2f::new(end_geom.dpdu.dot(&d), end_geom.dpdv.dot(&d));

            let mut v = vec![Vector2f::zeros(); n - 2];
            v[n - 3] = v_end;
            let Some(w) = solve_block_linear_eq(&nabla_c, &v) else {
                beta *= 0.5;
                continue;
            };

            let x2 = curr.vertices[1].geom.p;
            let w_end = w[n - 3];
            x2 - beta * (curr.vertices[1].geom.dpdu * w_end.x
                         + curr.vertices[1].geom.dpdv * w_end.y)
        };

        // Re-cast the specular chain toward the displaced vertex
        let mut fail = false;
        let mut next = Path::new();
        next.vertices.push(curr.vertices[0]);

        for i in 0..(n - 1) {
            let v = next.vertices[i];
            let wo = if i == 0 {
                (p - curr.vertices[0].geom.p).normalize()
            } else {
                let vp = next.vertices[i - 1];
                let wi = (vp.geom.p - v.geom.p).normalize();
                match scene.primitive(v.prim).sample_direction(
                    &Vector2f::zeros(), 0.0, v.ty, &v.geom, &wi) {
                    Some(wo) => wo,
                    None => {
                        fail = true;
                        break;
                    }
                }
            };

            let ray = Ray3f::new(v.geom.p, wo, None, None);
            let Some(isect) = scene.intersect(&ray) else {
                fail = true;
                break;
            };

            let hit_ty = scene.primitive(isect.prim).ty;
            if i < n - 2 && !hit_ty.contains(PrimitiveType::S) {
                fail = true;
                break;
            }

            next.vertices.push(PathVertex {
                ty: hit_ty.without(PrimitiveType::EMITTER),
                geom: isect.geom,
                prim: isect.prim,
            });
        }

        if !fail {
            if next.vertices.len() != curr.vertices.len() {
                fail = true;
            } else if !next.vertices[next.vertices.len() - 1].ty.contains(PrimitiveType::D) {
                fail = true;
            } else {
                let d = (curr.vertices[n - 1].geom.p - target).norm_squared();
                let dn = (next.vertices[n - 1].geom.p - target).norm_squared();
                if dn >= d {
                    fail = true;
                }
            }
        }

        if fail {
            beta *= 0.5;
        } else {
            beta = MAX_BETA.min(beta * BETA_GROWTH);
            curr = next;
        }
    }

    out_path.vertices.clear();
    out_path.vertices.extend_from_slice(&curr.vertices);
    debug_assert_eq!(seed_path.vertices.len(), out_path.vertices.len());

    converged
}

/* Tests for the manifold machinery */

#[cfg(test)]
mod tests {
    use super::*;

    fn diag2(a: Float, b: Float) -> Matrix2f {
        Matrix2f::new(a, 0.0, 0.0, b)
    }

    #[test]
    fn test_block_solve_matches_dense() {
        // Three-block tridiagonal system with known blocks.
        let nabla_c = vec![
            VertexConstraintJacobian {
                a: Matrix2f::zeros(),
                b: Matrix2f::new(4.0, 1.0, 0.5, 3.0),
                c: diag2(1.0, 0.5),
            },
            VertexConstraintJacobian {
                a: diag2(0.25, 0.75),
                b: Matrix2f::new(5.0, -1.0, 0.0, 4.0),
                c: Matrix2f::new(0.5, 0.25, -0.25, 1.0),
            },
            VertexConstraintJacobian {
                a: Matrix2f::new(1.0, 0.0, 0.5, 0.5),
                b: Matrix2f::new(6.0, 0.5, -0.5, 5.0),
                c: diag2(1.0, 1.0),
            },
        ];
        let v = vec![
            Vector2f::new(1.0, 2.0),
            Vector2f::new(-1.0, 0.5),
            Vector2f::new(0.25, -0.75),
        ];

        let w = solve_block_linear_eq(&nabla_c, &v).expect("solvable");

        // Assemble the dense system and check the residual.
        let n = nabla_c.len();
        let mut a = DMatrix::<Float>::zeros(2 * n, 2 * n);
        for i in 0..n {
            if i > 0 {
                super::write_block(&mut a, 2 * i, 2 * (i - 1), &nabla_c[i].a);
            }
            super::write_block(&mut a, 2 * i, 2 * i, &nabla_c[i].b);
            if i < n - 1 {
                super::write_block(&mut a, 2 * i, 2 * (i + 1), &nabla_c[i].c);
            }
        }
        let mut x = DMatrix::<Float>::zeros(2 * n, 1);
        for i in 0..n {
            x[(2 * i, 0)] = w[i].x;
            x[(2 * i + 1, 0)] = w[i].y;
        }
        let mut rhs = DMatrix::<Float>::zeros(2 * n, 1);
        for i in 0..n {
            rhs[(2 * i, 0)] = v[i].x;
            rhs[(2 * i + 1, 0)] = v[i].y;
        }

        let residual = &a * &x - rhs;
        assert!(residual.norm() < 1e-9, "residual {}", residual.norm());
    }

    #[test]
    fn test_singular_diagonal_rejected() {
        let nabla_c = vec![VertexConstraintJacobian {
            a: Matrix2f::zeros(),
            b: Matrix2f::zeros(),
            c: Matrix2f::zeros(),
        }];
        assert!(solve_block_linear_eq(&nabla_c, &[Vector2f::new(1.0, 0.0)]).is_none());
    }
}
