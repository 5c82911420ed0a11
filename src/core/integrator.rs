// Copyright @yucwang 2026

use crate::core::path::Path;
use crate::core::rng::LcgRng;
use crate::core::scene::Scene;
use crate::math::bitmap::Bitmap;
use crate::math::constants::Int;

// Parameters shared by all estimators for one render.
#[derive(Clone)]
pub struct RenderParams {
    pub width: usize,
    pub height: usize,
    pub max_num_vertices: Int,
}

// Thread-local state owned by one worker: its id, RNG stream, film slice
// and scratch path storage reused across samples.
pub struct Context {
    pub id: usize,
    pub rng: LcgRng,
    pub film: Bitmap,
    pub processed_samples: i64,
    pub subpath_l: Path,
    pub subpath_e: Path,
    pub path: Path,
}

impl Context {
    pub fn new(id: usize, seed: u64, width: usize, height: usize) -> Self {
        Self {
            id,
            rng: LcgRng::new(seed),
            film: Bitmap::new(width, height),
            processed_samples: 0,
            subpath_l: Path::new(),
            subpath_e: Path::new(),
            path: Path::new(),
        }
    }
}

// One call processes exactly one sample: the estimator splats every recorded
// event into the context film and returns.
pub trait Integrator: Send + Sync {
    fn name(&self) -> &'static str;
    fn process_sample(&self, scene: &Scene, params: &RenderParams, ctx: &mut Context);
}

pub fn create_integrator(name: &str) -> Option<Box<dyn Integrator>> {
    match name {
        "pt" => Some(Box::new(crate::integrators::pt::PathTracer)),
        "ptdirect" => Some(Box::new(crate::integrators::ptdirect::PathTracerDirect)),
        "lt" => Some(Box::new(crate::integrators::lt::LightTracer)),
        "ltdirect" => Some(Box::new(crate::integrators::ltdirect::LightTracerDirect)),
        "bpt" => Some(Box::new(crate::integrators::bpt::BidirPathTracer)),
        "ptmnee" => Some(Box::new(crate::integrators::ptmnee::PathTracerMnee)),
        _ => None,
    }
}

pub fn max_vertices_reached(num_vertices: Int, max_num_vertices: Int) -> bool {
    max_num_vertices != -1 && num_vertices >= max_num_vertices
}
