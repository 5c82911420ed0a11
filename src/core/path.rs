// Copyright @yucwang 2026

use crate::core::geometry::{ geometry_term, SurfaceGeometry };
use crate::core::primitive::{ PrimitiveType, TransportDirection };
use crate::core::rng::LcgRng;
use crate::core::scene::Scene;
use crate::math::constants::{ Float, Vector2f, Vector3f };
use crate::math::ray::Ray3f;
use crate::math::spectrum::RGBSpectrum;

pub const RR_PROB: Float = 0.5;

// A path vertex: local geometry, the scene primitive it lives on (arena
// index), and the interpretation the path assigns to that primitive.
#[derive(Clone, Copy)]
pub struct PathVertex {
    pub ty: PrimitiveType,
    pub geom: SurfaceGeometry,
    pub prim: usize,
}

// Variable-length vertex sequence. For a fullpath of length n formed by
// connection (s, t) with s + t = n, vertices 0..s-1 come from the L-subpath
// and s..n-1 from the reversed E-subpath.
pub struct Path {
    pub vertices: Vec<PathVertex>,
}

impl Path {
    pub fn new() -> Self {
        Self { vertices: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    // Random-walk subpath sampling from an emitter (L) or the sensor (E).
    // Russian roulette with survival RR_PROB applies after the first vertex;
    // a failed coin still appends the sampled vertex before stopping.
    pub fn sample_subpath(&mut self, scene: &Scene, rng: &mut LcgRng,
                          trans_dir: TransportDirection, max_path_vertices: i32) {
        self.vertices.clear();
        let mut step = 0;
        while max_path_vertices == -1 || step < max_path_vertices {
            if step == 0 {
                let ty = if trans_dir == TransportDirection::LE {
                    PrimitiveType::L
                } else {
                    PrimitiveType::E
                };
                let Some(emitter) = scene.sample_emitter(ty, rng.next_f64()) else {
                    return;
                };
                let Some(geom) = scene.primitive(emitter).sample_position(&rng.next_2d()) else {
                    return;
                };
                self.vertices.push(PathVertex { ty, geom, prim: emitter });
            } else {
                let pv = self.vertices[self.vertices.len() - 1];
                let ppv = if self.vertices.len() > 1 {
                    Some(self.vertices[self.vertices.len() - 2])
                } else {
                    None
                };

                let wi = match ppv {
                    Some(ppv) => (ppv.geom.p - pv.geom.p).normalize(),
                    None => Vector3f::zeros(),
                };
                let prim = scene.primitive(pv.prim);
                let Some(wo) = prim.sample_direction(&rng.next_2d(), rng.next_f64(),
                                                     pv.ty, &pv.geom, &wi) else {
                    break;
                };
                let f = prim.evaluate_direction(&pv.geom, pv.ty, &wi, &wo, trans_dir, true);
                if f.is_black() {
                    break;
                }

                let ray = Ray3f::new(pv.geom.p, wo, None, None);
                let Some(isect) = scene.intersect(&ray) else {
                    break;
                };

                let v = PathVertex {
                    ty: scene.primitive(isect.prim).ty.without(PrimitiveType::EMITTER),
                    geom: isect.geom,
                    prim: isect.prim,
                };

                // Path termination
                if rng.next_f64() > RR_PROB {
                    self.vertices.push(v);
                    break;
                }

                self.vertices.push(v);
            }
            step += 1;
        }
    }

    // Builds the fullpath for strategy (s, t). Fails when the required
    // endpoint kind is missing or the connecting edge is occluded.
    pub fn connect(&mut self, scene: &Scene, s: usize, t: usize,
                   subpath_l: &Path, subpath_e: &Path) -> bool {
        debug_assert!(s > 0 || t > 0);

        self.vertices.clear();

        if s == 0 && t > 0 {
            if !scene.primitive(subpath_e.vertices[t - 1].prim).ty.contains(PrimitiveType::L) {
                return false;
            }
            for i in (0..t).rev() {
                self.vertices.push(subpath_e.vertices[i]);
            }
            self.vertices[0].ty = PrimitiveType::L;
        } else if s > 0 && t == 0 {
            if !scene.primitive(subpath_l.vertices[s - 1].prim).ty.contains(PrimitiveType::E) {
                return false;
            }
            for i in 0..s {
                self.vertices.push(subpath_l.vertices[i]);
            }
            let last = self.vertices.len() - 1;
            self.vertices[last].ty = PrimitiveType::E;
        } else {
            if !scene.visible(&subpath_l.vertices[s - 1].geom.p,
                              &subpath_e.vertices[t - 1].geom.p) {
                return false;
            }
            for i in 0..s {
                self.vertices.push(subpath_l.vertices[i]);
            }
            for i in (0..t).rev() {
                self.vertices.push(subpath_e.vertices[i]);
            }
        }

        true
    }

    // MIS-weighted contribution of strategy s.
    pub fn evaluate_contribution(&self, scene: &Scene, s: usize) -> RGBSpectrum {
        let c_star = self.evaluate_unweight_contribution(scene, s);
        if c_star.is_black() {
            RGBSpectrum::default()
        } else {
            c_star * self.evaluate_mis_weight(scene, s)
        }
    }

    // Russian-roulette survival probability accumulated over the interior
    // vertices of both subpaths.
    pub fn selection_prob(&self, s: usize) -> Float {
        let n = self.vertices.len();
        let t = n - s;
        let mut selection_prob = 1.0;
        let mut i = 1;
        while i + 1 < s {
            selection_prob *= RR_PROB;
            i += 1;
        }
        let mut i = t as i64 - 2;
        while i >= 1 {
            selection_prob *= RR_PROB;
            i -= 1;
        }
        selection_prob
    }

    pub fn raster_position(&self, scene: &Scene) -> Option<Vector2f> {
        let v = &self.vertices[self.vertices.len() - 1];
        let v_prev = &self.vertices[self.vertices.len() - 2];
        scene.primitive(v.prim)
            .raster_position(&(v_prev.geom.p - v.geom.p).normalize(), &v.geom)
    }

    // BSDF/emission product and geometry term across the connecting edge of
    // strategy s; the endpoint cases use non-degenerate evaluation.
    pub fn evaluate_cst(&self, scene: &Scene, s: usize) -> RGBSpectrum {
        let n = self.vertices.len();
        let t = n - s;

        if s == 0 && t > 0 {
            let v = &self.vertices[0];
            let v_next = &self.vertices[1];
            let prim = scene.primitive(v.prim);
            return prim.evaluate_position(&v.geom, false)
                * prim.evaluate_direction(&v.geom, v.ty, &Vector3f::zeros(),
                                          &(v_next.geom.p - v.geom.p).normalize(),
                                          TransportDirection::EL, false);
        }

        if s > 0 && t == 0 {
            let v = &self.vertices[n - 1];
            let v_prev = &self.vertices[n - 2];
            let prim = scene.primitive(v.prim);
            return prim.evaluate_position(&v.geom, false)
                * prim.evaluate_direction(&v.geom, v.ty, &Vector3f::zeros(),
                                          &(v_prev.geom.p - v.geom.p).normalize(),
                                          TransportDirection::LE, false);
        }

        if s > 0 && t > 0 {
            let v_l = &self.vertices[s - 1];
            let v_e = &self.vertices[s];
            let wi_l = if s >= 2 {
                (self.vertices[s - 2].geom.p - v_l.geom.p).normalize()
            } else {
                Vector3f::zeros()
            };
            let wi_e = if s + 1 < n {
                (self.vertices[s + 1].geom.p - v_e.geom.p).normalize()
            } else {
                Vector3f::zeros()
            };
            let fs_l = scene.primitive(v_l.prim).evaluate_direction(
                &v_l.geom, v_l.ty, &wi_l, &(v_e.geom.p - v_l.geom.p).normalize(),
                TransportDirection::LE, false);
            let fs_e = scene.primitive(v_e.prim).evaluate_direction(
                &v_e.geom, v_e.ty, &wi_e, &(v_l.geom.p - v_e.geom.p).normalize(),
                TransportDirection::EL, false);
            let g = geometry_term(&v_l.geom, &v_e.geom);
            return fs_l * fs_e * g;
        }

        RGBSpectrum::default()
    }

    // alpha_L * c_{s,t} * alpha_E: importance accumulated per unit density
    // along each subpath times the connection term.
    pub fn evaluate_unweight_contribution(&self, scene: &Scene, s: usize) -> RGBSpectrum {
        let n = self.vertices.len();
        let t = n - s;

        let local_contrb = |f: RGBSpectrum, p: Float| -> RGBSpectrum {
            debug_assert!(p != 0.0 || f.is_black());
            if f.is_black() {
                RGBSpectrum::default()
            } else {
                f / p
            }
        };

        // alpha_L
        let mut alpha_l = RGBSpectrum::splat(1.0);
        if s > 0 {
            let v = &self.vertices[0];
            let prim = scene.primitive(v.prim);
            alpha_l = local_contrb(
                prim.evaluate_position(&v.geom, true),
                prim.evaluate_position_pdf(&v.geom, true) * scene.evaluate_emitter_pdf(v.prim));
            for i in 0..(s - 1) {
                let v = &self.vertices[i];
                let v_next = &self.vertices[i + 1];
                let wi = if i >= 1 {
                    (self.vertices[i - 1].geom.p - v.geom.p).normalize()
                } else {
                    Vector3f::zeros()
                };
                let wo = (v_next.geom.p - v.geom.p).normalize();
                let prim = scene.primitive(v.prim);
                alpha_l *= local_contrb(
                    prim.evaluate_direction(&v.geom, v.ty, &wi, &wo, TransportDirection::LE, true),
                    prim.evaluate_direction_pdf(&v.geom, v.ty, &wi, &wo, true));
            }
        }
        if alpha_l.is_black() {
            return RGBSpectrum::default();
        }

        // alpha_E
        let mut alpha_e = RGBSpectrum::splat(1.0);
        if t > 0 {
            let v = &self.vertices[n - 1];
            let prim = scene.primitive(v.prim);
            alpha_e = local_contrb(
                prim.evaluate_position(&v.geom, true),
                prim.evaluate_position_pdf(&v.geom, true) * scene.evaluate_emitter_pdf(v.prim));
            let mut i = n - 1;
            while i > s {
                let v = &self.vertices[i];
                let v_prev = &self.vertices[i - 1];
                let wi = if i + 1 < n {
                    (self.vertices[i + 1].geom.p - v.geom.p).normalize()
                } else {
                    Vector3f::zeros()
                };
                let wo = (v_prev.geom.p - v.geom.p).normalize();
                let prim = scene.primitive(v.prim);
                alpha_e *= local_contrb(
                    prim.evaluate_direction(&v.geom, v.ty, &wi, &wo, TransportDirection::EL, true),
                    prim.evaluate_direction_pdf(&v.geom, v.ty, &wi, &wo, true));
                i -= 1;
            }
        }
        if alpha_e.is_black() {
            return RGBSpectrum::default();
        }

        let cst = self.evaluate_cst(scene, s);
        if cst.is_black() {
            return RGBSpectrum::default();
        }

        alpha_l * cst * alpha_e
    }

    // Power-heuristic (beta = 2) MIS weight for strategy s, evaluated with
    // running p_i/p_s ratios stepped outward from i = s. Strategies whose
    // connection term vanishes are skipped and the ratio chain resumes from
    // a direct PDF evaluation; a chain value that hits zero or overflows is
    // likewise re-seeded so the sum matches the direct per-strategy one.
    pub fn evaluate_mis_weight(&self, scene: &Scene, s: usize) -> Float {
        let n = self.vertices.len();
        let ps = self.evaluate_pdf(scene, s);
        debug_assert!(ps > 0.0);

        let mut inv_weight = 1.0;

        // Strategies s-1 down to 0
        let mut pi_div_ps = 1.0;
        let mut chain_broken = false;
        let mut i = s as i64 - 1;
        while i >= 0 {
            if self.evaluate_cst(scene, i as usize).is_black() {
                chain_broken = true;
                i -= 1;
                continue;
            }

            if chain_broken {
                pi_div_ps = self.evaluate_pdf(scene, i as usize) / ps;
                chain_broken = false;
            } else {
                pi_div_ps *= 1.0 / self.evaluate_pdf_ratio(scene, i as usize);
            }

            if pi_div_ps <= 0.0 || !pi_div_ps.is_finite() {
                chain_broken = true;
                i -= 1;
                continue;
            }

            inv_weight += pi_div_ps * pi_div_ps;
            i -= 1;
        }

        // Strategies s+1 up to n
        let mut pi_div_ps = 1.0;
        let mut chain_broken = false;
        for i in s..n {
            if self.evaluate_cst(scene, i + 1).is_black() {
                chain_broken = true;
                continue;
            }

            if chain_broken {
                pi_div_ps = self.evaluate_pdf(scene, i + 1) / ps;
                chain_broken = false;
            } else {
                pi_div_ps *= self.evaluate_pdf_ratio(scene, i);
            }

            if pi_div_ps <= 0.0 || !pi_div_ps.is_finite() {
                chain_broken = true;
                continue;
            }

            inv_weight += pi_div_ps * pi_div_ps;
        }

        1.0 / inv_weight
    }

    // p_{i+1}/p_i expressed through the per-vertex area densities around
    // vertex i, with specialised endpoint ratios.
    pub fn evaluate_pdf_ratio(&self, scene: &Scene, i: usize) -> Float {
        let n = self.vertices.len();

        if i == 0 {
            let x0 = &self.vertices[0];
            let x1 = &self.vertices[1];
            let wi1 = if n > 2 {
                (self.vertices[2].geom.p - x1.geom.p).normalize()
            } else {
                Vector3f::zeros()
            };
            let g = geometry_term(&x0.geom, &x1.geom);
            let p_a_x0 = scene.primitive(x0.prim).evaluate_position_pdf(&x0.geom, true)
                * scene.evaluate_emitter_pdf(x0.prim);
            let p_d_x1_x0 = scene.primitive(x1.prim).evaluate_direction_pdf(
                &x1.geom, x1.ty, &wi1, &(x0.geom.p - x1.geom.p).normalize(), true);
            return p_a_x0 / p_d_x1_x0 / g;
        }

        if i == n - 1 {
            let xn = &self.vertices[n - 1];
            let xn2 = &self.vertices[n - 2];
            let wi2 = if n > 2 {
                (self.vertices[n - 3].geom.p - xn2.geom.p).normalize()
            } else {
                Vector3f::zeros()
            };
            let g = geometry_term(&xn.geom, &xn2.geom);
            let p_a_xn = scene.primitive(xn.prim).evaluate_position_pdf(&xn.geom, true)
                * scene.evaluate_emitter_pdf(xn.prim);
            let p_d_xn2_xn = scene.primitive(xn2.prim).evaluate_direction_pdf(
                &xn2.geom, xn2.ty, &wi2, &(xn.geom.p - xn2.geom.p).normalize(), true);
            return p_d_xn2_xn * g / p_a_xn;
        }

        let xi = &self.vertices[i];
        let xin = &self.vertices[i + 1];
        let xip = &self.vertices[i - 1];
        let wi_p = if i >= 2 {
            (self.vertices[i - 2].geom.p - xip.geom.p).normalize()
        } else {
            Vector3f::zeros()
        };
        let wi_n = if i + 2 < n {
            (self.vertices[i + 2].geom.p - xin.geom.p).normalize()
        } else {
            Vector3f::zeros()
        };
        let g_xip_xi = geometry_term(&xip.geom, &xi.geom);
        let g_xin_xi = geometry_term(&xin.geom, &xi.geom);
        let p_d_xip_xi = scene.primitive(xip.prim).evaluate_direction_pdf(
            &xip.geom, xip.ty, &wi_p, &(xi.geom.p - xip.geom.p).normalize(), true);
        let p_d_xin_xi = scene.primitive(xin.prim).evaluate_direction_pdf(
            &xin.geom, xin.ty, &wi_n, &(xi.geom.p - xin.geom.p).normalize(), true);
        p_d_xip_xi * g_xip_xi / p_d_xin_xi / g_xin_xi
    }

    // Probability density that strategy s generates this vertex sequence.
    // Zero iff the connection term of the strategy vanishes.
    pub fn evaluate_pdf(&self, scene: &Scene, s: usize) -> Float {
        if self.evaluate_cst(scene, s).is_black() {
            return 0.0;
        }

        let mut pdf = 1.0;
        let n = self.vertices.len();
        let t = n - s;
        if s > 0 {
            let v0 = &self.vertices[0];
            pdf *= scene.primitive(v0.prim).evaluate_position_pdf(&v0.geom, true)
                * scene.evaluate_emitter_pdf(v0.prim);
            for i in 0..(s - 1) {
                let vi = &self.vertices[i];
                let vin = &self.vertices[i + 1];
                let wi = if i >= 1 {
                    (self.vertices[i - 1].geom.p - vi.geom.p).normalize()
                } else {
                    Vector3f::zeros()
                };
                pdf *= scene.primitive(vi.prim).evaluate_direction_pdf(
                    &vi.geom, vi.ty, &wi, &(vin.geom.p - vi.geom.p).normalize(), true);
                pdf *= geometry_term(&vi.geom, &vin.geom);
            }
        }
        if t > 0 {
            let vn = &self.vertices[n - 1];
            pdf *= scene.primitive(vn.prim).evaluate_position_pdf(&vn.geom, true)
                * scene.evaluate_emitter_pdf(vn.prim);
            let mut i = n - 1;
            while i >= s + 1 {
                let vi = &self.vertices[i];
                let vip = &self.vertices[i - 1];
                let wi = if i + 1 < n {
                    (self.vertices[i + 1].geom.p - vi.geom.p).normalize()
                } else {
                    Vector3f::zeros()
                };
                pdf *= scene.primitive(vi.prim).evaluate_direction_pdf(
                    &vi.geom, vi.ty, &wi, &(vip.geom.p - vi.geom.p).normalize(), true);
                pdf *= geometry_term(&vi.geom, &vip.geom);
                i -= 1;
            }
        }

        pdf
    }
}

/* Tests for the path algebra */
