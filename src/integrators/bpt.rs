// Copyright @yucwang 2026

use crate::core::integrator::{ Context, Integrator, RenderParams };
use crate::core::primitive::TransportDirection;
use crate::core::scene::Scene;
use crate::math::bitmap::pixel_index;

// Bidirectional path tracing: every (s, t) connection of the two subpaths
// is evaluated with power-heuristic MIS weights.
pub struct BidirPathTracer;

impl Integrator for BidirPathTracer {
    fn name(&self) -> &'static str {
        "bpt"
    }

    fn process_sample(&self, scene: &Scene, params: &RenderParams, ctx: &mut Context) {
        ctx.subpath_l.sample_subpath(scene, &mut ctx.rng, TransportDirection::LE,
                                     params.max_num_vertices);
        ctx.subpath_e.sample_subpath(scene, &mut ctx.rng, TransportDirection::EL,
                                     params.max_num_vertices);

        let n_l = ctx.subpath_l.len();
        let n_e = ctx.subpath_e.len();
        for n in 2..=(n_l + n_e) {
            if params.max_num_vertices != -1 && n as i32 > params.max_num_vertices {
                continue;
            }

            let min_s = n.saturating_sub(n_e);
            let max_s = n_l.min(n);
            for s in min_s..=max_s {
                let t = n - s;
                if !ctx.path.connect(scene, s, t, &ctx.subpath_l, &ctx.subpath_e) {
                    continue;
                }

                let c = ctx.path.evaluate_contribution(scene, s)
                    / ctx.path.selection_prob(s);
                if c.is_black() {
                    continue;
                }

                let Some(raster) = ctx.path.raster_position(scene) else {
                    continue;
                };
                ctx.film.splat(pixel_index(&raster, params.width, params.height),
                               c.to_vector());
            }
        }
    }
}
