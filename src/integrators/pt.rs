// Copyright @yucwang 2026

use crate::core::integrator::{ max_vertices_reached, Context, Integrator, RenderParams };
use crate::core::path::RR_PROB;
use crate::core::primitive::{ PrimitiveType, TransportDirection };
use crate::core::scene::Scene;
use crate::math::bitmap::pixel_index;
use crate::math::constants::Vector3f;
use crate::math::ray::Ray3f;

// Unidirectional path tracing from the sensor; radiance is collected only
// when a sampled bounce lands on a light surface.
pub struct PathTracer;

impl Integrator for PathTracer {
    fn name(&self) -> &'static str {
        "pt"
    }

    fn process_sample(&self, scene: &Scene, params: &RenderParams, ctx: &mut Context) {
        // Sample the sensor and a position on it
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
            let Some(wo) = prim.sample_direction(&ctx.rng.next_2d(), ctx.rng.next_f64(),
                                                 ty, &geom, &wi) else {
                break;
            };
            let pdf_d = prim.evaluate_direction_pdf(&geom, ty, &wi, &wo, true);

            // The pixel is fixed by the initial sensor direction and reused
            // for the rest of the walk.
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

            // Hit a light: accumulate emission
            let hit_prim = scene.primitive(isect.prim);
            if hit_prim.ty.contains(PrimitiveType::L) {
                if let Some(px) = pixel {
                    let c = throughput
                        * hit_prim.evaluate_direction(&isect.geom, PrimitiveType::L,
                                                      &Vector3f::zeros(), &(-wo),
                                                      TransportDirection::EL, false)
                        * hit_prim.evaluate_position(&isect.geom, false);
                    if !c.is_black() {
                        ctx.film.splat(px, c.to_vector());
                    }
                }
            }

            // Path termination
            if ctx.rng.next_f64() > RR_PROB {
                break;
            }
            throughput /= RR_PROB;

            geom = isect.geom;
            prim_idx = isect.prim;
            ty = hit_prim.ty.without(PrimitiveType::EMITTER);
            wi = -wo;
            num_vertices += 1;
        }
    }
}
