// Copyright @yucwang 2026

use crate::core::integrator::{ max_vertices_reached, Context, Integrator, RenderParams };
use crate::core::path::RR_PROB;
use crate::core::primitive::{ PrimitiveType, TransportDirection };
use crate::core::scene::Scene;
use crate::math::bitmap::pixel_index;
use crate::math::constants::Vector3f;
use crate::math::ray::Ray3f;

// Adjoint walk from a light; importance is collected whenever a bounce
// lands on a sensor surface.
pub struct LightTracer;

impl Integrator for LightTracer {
    fn name(&self) -> &'static str {
        "lt"
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

            // Hit a sensor surface: project and splat
            let hit_prim = scene.primitive(isect.prim);
            if hit_prim.ty.contains(PrimitiveType::E) {
                let Some(raster) = hit_prim.raster_position(&(-wo), &isect.geom) else {
                    break;
                };

                let px = pixel_index(&raster, params.width, params.height);
                let c = throughput
                    * hit_prim.evaluate_direction(&isect.geom, PrimitiveType::E,
                                                  &Vector3f::zeros(), &(-wo),
                                                  TransportDirection::LE, false)
                    * hit_prim.evaluate_position(&isect.geom, false);
                if !c.is_black() {
                    ctx.film.splat(px, c.to_vector());
                }
            }

            if ctx.rng.next_f64() > RR_PROB {
                break;
            }
            throughput /= RR_PROB;

            geom = isect.geom;
            ty = hit_prim.ty.without(PrimitiveType::EMITTER);
            prim_idx = isect.prim;
            wi = -wo;
            num_vertices += 1;
        }
    }
}
