// Copyright @yucwang 2026

use crate::core::geometry::geometry_term;
use crate::core::integrator::{ max_vertices_reached, Context, Integrator, RenderParams };
use crate::core::path::RR_PROB;
use crate::core::primitive::{ PrimitiveType, TransportDirection };
use crate::core::scene::Scene;
use crate::math::bitmap::pixel_index;
use crate::math::constants::Vector3f;
use crate::math::ray::Ray3f;

// Light tracing with an explicit sensor connection before every bounce.
pub struct LightTracerDirect;

impl Integrator for LightTracerDirect {
    fn name(&self) -> &'static str {
        "ltdirect"
    }

    fn process_sample(&self, scene: &Scene, params: &RenderParams, ctx: &mut Context) {
        let Some(l_idx) = scene.sample_emitter(PrimitiveType::L, ctx.rng.next_f64()) else {
            return;
        };
        let pdf_l = scene.evaluate_emitter_pdf(l_idx);
        let light = scene.primitive(l_idx);
        let Some(geom_l) = light.sample_position(&ctx.rng.next_2d()) else {
            return;
        };
        let pdf_pl = light.evaluate_position_pdf(&geom_l, true);
        debug_assert!(pdf_l > 0.0 && pdf_pl > 0.0);

        let mut throughput = light.evaluate_position(&geom_l, true) / pdf_pl / pdf_l;
        let mut prim_idx = l_idx;
        let mut ty = PrimitiveType::L;
        let mut geom = geom_l;
        let mut wi = Vector3f::zeros();
        let mut num_vertices = 1;

        loop {
            if max_vertices_reached(num_vertices, params.max_num_vertices) {
                break;
            }

            let prim = scene.primitive(prim_idx);

            // Direct sensor sampling
            if let Some(e_idx) = scene.sample_emitter(PrimitiveType::E, ctx.rng.next_f64()) {
                let pdf_e = scene.evaluate_emitter_pdf(e_idx);
                let sensor = scene.primitive(e_idx);
                if let Some(geom_e) = sensor.sample_position(&ctx.rng.next_2d()) {
                    let pdf_pe = sensor.evaluate_position_pdf(&geom_e, true);
                    debug_assert!(pdf_e > 0.0 && pdf_pe > 0.0);

                    let pp_e = (geom_e.p - geom.p).normalize();
                    let fs_l = prim.evaluate_direction(&geom, ty, &wi, &pp_e,
                                                       TransportDirection::LE, false);
                    let fs_e = sensor.evaluate_direction(&geom_e, PrimitiveType::E,
                                                         &Vector3f::zeros(), &(-pp_e),
                                                         TransportDirection::EL, false);
                    let g = geometry_term(&geom, &geom_e);
                    let v = if scene.visible(&geom.p, &geom_e.p) { 1.0 } else { 0.0 };
                    let we_p = sensor.evaluate_position(&geom_e, true);
                    let c = throughput * fs_l * fs_e * we_p * (g * v / pdf_e / pdf_pe);

                    if !c.is_black() {
                        if let Some(raster) = sensor.raster_position(&(-pp_e), &geom_e) {
                            let px = pixel_index(&raster, params.width, params.height);
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

            let fs = prim.evaluate_direction(&geom, ty, &wi, &wo,
                                             TransportDirection::LE, true);
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
