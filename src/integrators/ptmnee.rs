// Copyright @yucwang 2026

use crate::core::geometry::geometry_term;
use crate::core::integrator::{ Context, Integrator, RenderParams };
use crate::core::path::{ Path, PathVertex };
use crate::core::primitive::{ PrimitiveType, TransportDirection };
use crate::core::rng::LcgRng;
use crate::core::scene::Scene;
use crate::integrators::manifold::{
    compute_constraint_jacobian,
    compute_constraint_jacobian_determinant,
    walk_manifold,
    ConstraintJacobian,
};
use crate::math::bitmap::pixel_index;
use crate::math::constants::{ EPSILON, Float, Vector2f, Vector3f };
use crate::math::ray::Ray3f;
use crate::math::spectrum::RGBSpectrum;

// Path tracing with manifold next-event estimation: light connections are
// pushed through chains of specular vertices by a manifold walk; without
// specular occluders this reduces to ordinary NEE.
pub struct PathTracerMnee;

impl Integrator for PathTracerMnee {
    fn name(&self) -> &'static str {
        "ptmnee"
    }

    fn process_sample(&self, scene: &Scene, params: &RenderParams, ctx: &mut Context) {
        let mut path = Path::new();

        let mut step = 0;
        while params.max_num_vertices == -1 || step < params.max_num_vertices - 1 {
            if step == 0 {
                let Some(e_idx) = scene.sample_emitter(PrimitiveType::E, ctx.rng.next_f64()) else {
                    return;
                };
                let Some(geom) = scene.primitive(e_idx).sample_position(&ctx.rng.next_2d()) else {
                    return;
                };
                path.vertices.push(PathVertex { ty: PrimitiveType::E, geom, prim: e_idx });
            } else {
                let pv = path.vertices[path.vertices.len() - 1];
                let ppv = if path.vertices.len() > 1 {
                    Some(path.vertices[path.vertices.len() - 2])
                } else {
                    None
                };

                let wi = match ppv {
                    Some(ppv) => (ppv.geom.p - pv.geom.p).normalize(),
                    None => Vector3f::zeros(),
                };
                let Some(wo) = scene.primitive(pv.prim).sample_direction(
                    &ctx.rng.next_2d(), ctx.rng.next_f64(), pv.ty, &pv.geom, &wi) else {
                    break;
                };

                let ray = Ray3f::new(pv.geom.p, wo, None, None);
                let Some(isect) = scene.intersect(&ray) else {
                    break;
                };

                path.vertices.push(PathVertex {
                    ty: scene.primitive(isect.prim).ty.without(PrimitiveType::EMITTER),
                    geom: isect.geom,
                    prim: isect.prim,
                });
            }
            step += 1;

            // Connect to a light from diffuse surfaces and the sensor vertex
            let last_ty = path.vertices[path.vertices.len() - 1].ty;
            if !last_ty.contains(PrimitiveType::D | PrimitiveType::E) {
                continue;
            }

            let Some(seed_path) = sample_seed_path(scene, &mut ctx.rng, &path) else {
                continue;
            };

            if seed_path.len() > 1
                && params.max_num_vertices != -1
                && (path.len() + seed_path.len() - 1) as i32 > params.max_num_vertices {
                continue;
            }

            if seed_path.len() == 1 {
                // No specular occluder: plain next-event estimation
                let mut eval_path = Path::new();
                eval_path.vertices.extend_from_slice(&path.vertices);
                eval_path.vertices.push(seed_path.vertices[0]);
                eval_path.vertices.reverse();

                let c = eval_path.evaluate_unweight_contribution(scene, 1);
                if !c.is_black() {
                    if let Some(raster) = eval_path.raster_position(scene) {
                        ctx.film.splat(pixel_index(&raster, params.width, params.height),
                                       c.to_vector());
                    }
                }
            } else {
                // Manifold walk toward the walk endpoint, then the reverse
                // walk to verify the mapping is a bijection.
                let target = path.vertices[path.vertices.len() - 1].geom.p;
                let mut opt_path = Path::new();
                if !walk_manifold(scene, &seed_path, target, &mut opt_path) {
                    continue;
                }
                let mut rev_path = Path::new();
                let rev_target = seed_path.vertices[seed_path.len() - 1].geom.p;
                if !walk_manifold(scene, &opt_path, rev_target, &mut rev_path) {
                    continue;
                }

                let c = evaluate_mnee_contribution(scene, &path, &opt_path);
                if c.is_black() {
                    continue;
                }

                // Pixel from the sensor end of the walk
                let v_e = &path.vertices[0];
                let wo_e = if path.len() >= 2 {
                    (path.vertices[1].geom.p - v_e.geom.p).normalize()
                } else {
                    (opt_path.vertices[opt_path.len() - 2].geom.p - v_e.geom.p).normalize()
                };
                let Some(raster) = scene.primitive(v_e.prim)
                    .raster_position(&wo_e, &v_e.geom) else {
                    continue;
                };
                ctx.film.splat(pixel_index(&raster, params.width, params.height),
                               c.to_vector());
            }
        }
    }
}

// Chains deterministic specular bounces from a sampled light point toward
// the walk endpoint. Returns a single-vertex path when no specular surface
// intervenes (the NEE case), None when the chain cannot be seeded.
fn sample_seed_path(scene: &Scene, rng: &mut LcgRng, path: &Path) -> Option<Path> {
    let l_idx = scene.sample_emitter(PrimitiveType::L, rng.next_f64())?;
    let geom_l = scene.primitive(l_idx).sample_position(&rng.next_2d())?;
    let v_l = PathVertex { ty: PrimitiveType::L, geom: geom_l, prim: l_idx };

    // Count specular surfaces between the endpoint and the light point
    let endpoint = path.vertices[path.vertices.len() - 1].geom.p;
    let mut count_s = 0;
    let mut curr_p = endpoint;
    loop {
        let to_l = v_l.geom.p - curr_p;
        let dist = to_l.norm();
        if dist <= 0.0 {
            break;
        }
        let ray = Ray3f::new(curr_p, to_l / dist, Some(EPSILON), Some((1.0 - EPSILON) * dist));
        let Some(isect) = scene.intersect(&ray) else {
            break;
        };
        if !scene.primitive(isect.prim).ty.contains(PrimitiveType::S) {
            return None;
        }
        count_s += 1;
        curr_p = isect.geom.p;
    }

    let mut seed_path = Path::new();
    seed_path.vertices.push(v_l);
    if count_s == 0 {
        return Some(seed_path);
    }

    // Project onto the specular manifold: fixed initial direction, then
    // deterministic reflections/refractions until a diffuse terminus.
    for i in 0..=count_s {
        let pv = seed_path.vertices[seed_path.vertices.len() - 1];
        let ppv = if seed_path.vertices.len() > 1 {
            Some(seed_path.vertices[seed_path.vertices.len() - 2])
        } else {
            None
        };

        let wo = match ppv {
            Some(ppv) => {
                debug_assert_eq!(pv.ty, PrimitiveType::S);
                let wi = (ppv.geom.p - pv.geom.p).normalize();
                scene.primitive(pv.prim).sample_direction(
                    &Vector2f::zeros(), 0.0, pv.ty, &pv.geom, &wi)?
            }
            None => (endpoint - v_l.geom.p).normalize(),
        };

        let ray = Ray3f::new(pv.geom.p, wo, None, None);
        let isect = scene.intersect(&ray)?;

        let hit_ty = scene.primitive(isect.prim).ty;
        if i == count_s {
            if !hit_ty.contains(PrimitiveType::D) {
                return None;
            }
        } else if !hit_ty.contains(PrimitiveType::S) {
            return None;
        }

        seed_path.vertices.push(PathVertex {
            ty: hit_ty.without(PrimitiveType::EMITTER),
            geom: isect.geom,
            prim: isect.prim,
        });
    }

    debug_assert_eq!(seed_path.len(), count_s + 2);
    Some(seed_path)
}

// Contribution of the converged chain: sensor-side throughput, the BSDFs
// along the specular chain, the light terms, and the specular-chain
// Jacobian with the opening geometry term. No Russian roulette applies to
// the connection.
fn evaluate_mnee_contribution(scene: &Scene, path: &Path, opt_path: &Path) -> RGBSpectrum {
    let local_contrb = |f: RGBSpectrum, p: Float| -> RGBSpectrum {
        debug_assert!(p != 0.0 || f.is_black());
        if f.is_black() {
            RGBSpectrum::default()
        } else {
            f / p
        }
    };

    // Importance per unit density along the sensor-side walk
    let mut throughput_e = {
        let v = &path.vertices[0];
        let prim = scene.primitive(v.prim);
        local_contrb(prim.evaluate_position(&v.geom, true),
                     prim.evaluate_position_pdf(&v.geom, true)
                     * scene.evaluate_emitter_pdf(v.prim))
    };
    for i in 0..(path.vertices.len() - 1) {
        let v = &path.vertices[i];
        let v_next = &path.vertices[i + 1];
        let wi = if i >= 1 {
            (path.vertices[i - 1].geom.p - v.geom.p).normalize()
        } else {
            Vector3f::zeros()
        };
        let wo = (v_next.geom.p - v.geom.p).normalize();
        let prim = scene.primitive(v.prim);
        throughput_e *= local_contrb(
            prim.evaluate_direction(&v.geom, v.ty, &wi, &wo, TransportDirection::EL, true),
            prim.evaluate_direction_pdf(&v.geom, v.ty, &wi, &wo, true));
    }
    if throughput_e.is_black() {
        return RGBSpectrum::default();
    }

    // BSDF product along the specular chain
    let n = opt_path.vertices.len();
    let mut fs_chain = RGBSpectrum::splat(1.0);
    let mut i = n as i64 - 2;
    while i >= 1 {
        let v = &opt_path.vertices[i as usize];
        let vp = &opt_path.vertices[i as usize + 1];
        let vn = &opt_path.vertices[i as usize - 1];
        fs_chain *= scene.primitive(v.prim).evaluate_direction(
            &v.geom, v.ty,
            &(vp.geom.p - v.geom.p).normalize(),
            &(vn.geom.p - v.geom.p).normalize(),
            TransportDirection::EL, true);
        i -= 1;
    }

    // BSDF at the walk endpoint toward the last specular vertex
    let fs_e = {
        let v_e = &path.vertices[path.vertices.len() - 1];
        let wi = if path.vertices.len() >= 2 {
            (path.vertices[path.vertices.len() - 2].geom.p - v_e.geom.p).normalize()
        } else {
            Vector3f::zeros()
        };
        let v_en = &opt_path.vertices[n - 2];
        scene.primitive(v_e.prim).evaluate_direction(
            &v_e.geom, v_e.ty, &wi,
            &(v_en.geom.p - v_e.geom.p).normalize(),
            TransportDirection::EL, true)
    };

    // Light terms
    let v_l = &opt_path.vertices[0];
    let l_prim = scene.primitive(v_l.prim);
    let fs_l = l_prim.evaluate_direction(
        &v_l.geom, v_l.ty, &Vector3f::zeros(),
        &(opt_path.vertices[1].geom.p - v_l.geom.p).normalize(),
        TransportDirection::LE, true);
    let le_p = l_prim.evaluate_position(&v_l.geom, true);

    // Specular-chain Jacobian and the opening geometry term
    let mut nabla_c = ConstraintJacobian::new();
    compute_constraint_jacobian(opt_path, &mut nabla_c);
    let det = compute_constraint_jacobian_determinant(&nabla_c);
    let j = det * geometry_term(&opt_path.vertices[0].geom, &opt_path.vertices[1].geom);

    let pdf_l = scene.evaluate_emitter_pdf(v_l.prim);
    let pdf_pl = l_prim.evaluate_position_pdf(&v_l.geom, true);
    debug_assert!(pdf_l > 0.0 && pdf_pl > 0.0);

    throughput_e * fs_e * fs_chain * fs_l * le_p * (j / pdf_l / pdf_pl)
}
