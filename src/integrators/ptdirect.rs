// Copyright @yucwang 2026

use crate::core::geometry::geometry_term;
use crate::core::integrator::{ max_vertices_reached, Context, Integrator, RenderParams };
use crate::core::path::RR_PROB;
use crate::core::primitive::{ PrimitiveType, TransportDirection };
use crate::core::scene::Scene;
use crate::math::bitmap::pixel_index;
use crate::math::constants::Vector3f;
use crate::math::ray::Ray3f;

// Path tracing with next-event estimation. Only the explicit light
// connection is accumulated per bounce; emission met by the sampled bounce
// itself is not, so connections killed by a zero BSDF (specular chains) are
// lost rather than double-counted.
pub struct PathTracerDirect;

impl Integrator for PathTracerDirect {
    fn name(&self) -> &'static str {
        "ptdirect"
    }

    fn process_sample(&self, scene: &Scene, params: &RenderParams, ctx: &mut Context) {
        let Some(e_idx) = scene.sample_emitter(PrimitiveType::E, ctx.rng.next_f64()) else {
            return;
        };
        let pdf_e = scene.evaluate_emitter_pdf(e_idx);
        let e = scene.primitive(e_idx);
        let Some(geom_e) = e.sample_position(&ctx.rng.next_2d()) else {
            return;
        };
        let pdf_pe = e.evaluate_position_pdf(&geom_e, true);
        debug_assert!(pdf_e > 0.0 && pdf_pe > 0.0);

        let mut throughput = e.evaluate_position(&geom_e, true) / pdf_pe / pdf_e;
        let mut prim_idx = e_idx;
        let mut ty = PrimitiveType::E;
        let mut geom = geom_e;
        let mut wi = Vector3f::zeros();
        let mut pixel: Option<usize> = None;
        let mut num_vertices = 1;

        loop {
            if max_vertices_reached(num_vertices, params.max_num_vertices) {
                break;
            }

            let prim = scene.primitive(prim_idx);

            // Direct light sampling
            if let Some(l_idx) = scene.sample_emitter(PrimitiveType::L, ctx.rng.next_f64()) {
                let pdf_l = scene.evaluate_emitter_pdf(l_idx);
                let light = scene.primitive(l_idx);
                if let Some(geom_l) = light.sample_position(&ctx.rng.next_2d()) {
                    let pdf_pl = light.evaluate_position_pdf(&geom_l, true);
                    debug_assert!(pdf_l > 0.0 && pdf_pl > 0.0);

                    let pp_l = (geom_l.p - geom.p).normalize();
                    let fs_e = prim.evaluate_direction(&geom, ty, &wi, &pp_l,
                                                       TransportDirection::EL, false);
                    let fs_l = light.evaluate_direction(&geom_l, PrimitiveType::L,
                                                        &Vector3f::zeros(), &(-pp_l),
                                                        TransportDirection::LE, false);
                    let g = geometry_term(&geom, &geom_l);
                    let v = if scene.visible(&geom.p, &geom_l.p) { 1.0 } else { 0.0 };
                    let le_p = light.evaluate_position(&geom_l, true);
                    let c = throughput * fs_e * fs_l * le_p * (g * v / pdf_l / pdf_pl);

                    if !c.is_black() {
                        // Recompute the pixel when connecting straight from
                        // the sensor vertex.
                        let index = if ty == PrimitiveType::E {
                            prim.raster_position(&pp_l, &geom)
                                .map(|raster| pixel_index(&raster, params.width, params.height))
                        } else {
                            pixel
                        };
                        if let Some(px) = index {
                            ctx.film.splat(px, c.to_vector());
                        }
                    }
                }
            }

            // Sample the next direction
            let Some(wo) = prim.sample_direction(&ctx.rng.next_2d(), ctx.rng.next_f64(),
                                                 ty, &geom, &wi) else {
                break;
            };
            let pdf_d = prim.evaluate_direction_pdf(&geom, ty, &wi, &wo, true);

            if ty == PrimitiveType::E {
                let Some(raster) = prim.raster_position(&wo, &geom) else {
                    break;
                };
                pixel = Some(pixel_index(&raster, params.width, params.height));
            }

            let fs = prim.evaluate_direction(&geom, ty, &wi, &wo,
                                             TransportDirection::EL, true);
            if fs.is_black() || pdf_d <= 0.0 {
                break;
            }
            throughput *= fs / pdf_d;

            let ray = Ray3f::new(geom.p, wo, None, None);
            let Some(isect) = scene.intersect(&ray) else {
                break;
            };

            if ctx.rng.next_f64() > RR_PROB {
                break;
            }
            throughput /= RR_PROB;

            geom = isect.geom;
            ty = scene.primitive(isect.prim).ty.without(PrimitiveType::EMITTER);
            prim_idx = isect.prim;
            wi = -wo;
            num_vertices += 1;
        }
    }
}
