// Copyright @yucwang 2026

use crate::core::integrator::{ Context, Integrator, RenderParams };
use crate::core::rng::LcgRng;
use crate::core::scene::Scene;
use crate::io::image_utils::save_image;
use crate::math::bitmap::Bitmap;
use crate::math::constants::Float;

use indicatif::{ ProgressBar, ProgressStyle };
use std::sync::atomic::{ AtomicBool, AtomicI64, AtomicUsize, Ordering };
use std::sync::{ Mutex, MutexGuard };
use std::thread;
use std::time::{ Duration, Instant, SystemTime, UNIX_EPOCH };

pub use super::renderer::Renderer;

pub struct SampleRendererSettings {
    pub width: usize,
    pub height: usize,
    pub num_samples: i64,
    pub render_time: Float,
    pub max_num_vertices: i32,
    pub num_threads: i32,
    pub grain_size: i64,
    pub progress_update_interval: i64,
    pub progress_image_update_interval: Float,
    pub progress_image_update_format: String,
    pub seed: Option<u64>,
}

impl Default for SampleRendererSettings {
    fn default() -> Self {
        Self {
            width: 0,
            height: 0,
            num_samples: 10000000,
            render_time: -1.0,
            max_num_vertices: -1,
            num_threads: 0,
            grain_size: 10000,
            progress_update_interval: 100000,
            progress_image_update_interval: -1.0,
            progress_image_update_format: String::from("progress/{{count}}.png"),
            seed: None,
        }
    }
}

// Data-parallel sample driver: the logical sample stream is split into
// grains pulled by worker threads; each worker owns a context (id, RNG,
// film) and merges its film into a per-thread slot at grain boundaries so
// periodic reduction never blocks in-flight sampling.
pub struct SampleRenderer {
    integrator: Box<dyn Integrator>,
    settings: SampleRendererSettings,
}

fn lock_or_recover<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl Renderer for SampleRenderer {
    fn render(&self, scene: &Scene) -> Bitmap {
        let settings = &self.settings;
        let width = settings.width;
        let height = settings.height;
        let params = RenderParams {
            width,
            height,
            max_num_vertices: settings.max_num_vertices,
        };

        let num_threads = self.resolve_num_threads();
        log::info!("Number of threads: {}", num_threads);
        log::info!("Grain size: {}", settings.grain_size);

        let master_seed = settings.seed.unwrap_or_else(|| {
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_nanos() as u64)
                .unwrap_or(1)
        });

        let sample_mode = settings.render_time < 0.0;
        let grain_size = settings.grain_size.max(1);
        let total_grains = if sample_mode {
            (settings.num_samples + grain_size - 1) / grain_size
        } else {
            i64::MAX
        };

        let master_rng = Mutex::new(LcgRng::new(master_seed));
        let thread_id_counter = Mutex::new(0usize);
        let next_grain = AtomicI64::new(0);
        let processed_samples = AtomicI64::new(0);
        let done = AtomicBool::new(false);
        let active_workers = AtomicUsize::new(num_threads);
        let film_slots: Vec<Mutex<Bitmap>> =
            (0..num_threads).map(|_| Mutex::new(Bitmap::new(width, height))).collect();

        let progress = if sample_mode {
            ProgressBar::new(settings.num_samples.max(0) as u64)
        } else {
            ProgressBar::new(settings.render_time.ceil().max(0.0) as u64)
        };
        progress.set_style(
            ProgressStyle::with_template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len}")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );

        let render_start = Instant::now();
        let integrator = self.integrator.as_ref();

        thread::scope(|scope| {
            let params = &params;
            let master_rng = &master_rng;
            let thread_id_counter = &thread_id_counter;
            let next_grain = &next_grain;
            let processed_samples = &processed_samples;
            let done = &done;
            let active_workers = &active_workers;
            let film_slots = &film_slots;
            let progress_ref = &progress;

            for _ in 0..num_threads {
                scope.spawn(move || {
                    let id = {
                        let mut counter = lock_or_recover(thread_id_counter);
                        let id = *counter;
                        *counter += 1;
                        id
                    };
                    let seed = lock_or_recover(master_rng).next_u64();
                    let mut ctx = Context::new(id, seed, width, height);

                    loop {
                        if done.load(Ordering::Relaxed) {
                            break;
                        }

                        let samples_this_grain = if sample_mode {
                            let grain = next_grain.fetch_add(1, Ordering::Relaxed);
                            if grain >= total_grains {
                                break;
                            }
                            grain_size.min(settings.num_samples - grain * grain_size)
                        } else {
                            grain_size
                        };

                        for _ in 0..samples_this_grain {
                            integrator.process_sample(scene, params, &mut ctx);
                            ctx.processed_samples += 1;
                            // Promote local counts in batches to limit contention.
                            if ctx.processed_samples >= settings.progress_update_interval {
                                let total = processed_samples
                                    .fetch_add(ctx.processed_samples, Ordering::Relaxed)
                                    + ctx.processed_samples;
                                ctx.processed_samples = 0;
                                if sample_mode {
                                    progress_ref.set_position(total.max(0) as u64);
                                }
                            }
                        }

                        let total = processed_samples
                            .fetch_add(ctx.processed_samples, Ordering::Relaxed)
                            + ctx.processed_samples;
                        ctx.processed_samples = 0;
                        if sample_mode {
                            progress_ref.set_position(total.max(0) as u64);
                        }

                        // Publish this grain's film; the flusher reads slots only.
                        {
                            let mut slot = lock_or_recover(&film_slots[id]);
                            slot.accumulate(&ctx.film);
                        }
                        ctx.film.clear();

                        if !sample_mode
                            && render_start.elapsed().as_secs_f64() > settings.render_time {
                            done.store(true, Ordering::Relaxed);
                        }
                    }

                    active_workers.fetch_sub(1, Ordering::Relaxed);
                });
            }

            // Coordinating loop: progress display in time mode and periodic
            // progress-image flushes; never blocks the workers.
            let mut image_count: u64 = 0;
            let mut last_flush = Instant::now();
            while active_workers.load(Ordering::Relaxed) > 0 {
                thread::sleep(Duration::from_millis(100));

                if !sample_mode {
                    let elapsed = render_start.elapsed().as_secs_f64();
                    progress_ref.set_position(elapsed.min(settings.render_time.max(0.0)) as u64);
                }

                if settings.progress_image_update_interval > 0.0
                    && last_flush.elapsed().as_secs_f64() > settings.progress_image_update_interval {
                    let film = reduce_films(film_slots, width, height,
                                            processed_samples.load(Ordering::Relaxed));
                    image_count += 1;
                    let path = settings.progress_image_update_format
                        .replace("{{count}}", &format!("{:010}", image_count));
                    log::info!("Saving progress image: {}", path);
                    if let Err(err) = save_image(&path, &film) {
                        log::warn!("Failed to save progress image {}: {}", path, err);
                    }
                    last_flush = Instant::now();
                }
            }
        });

        progress.finish_and_clear();
        let total = processed_samples.load(Ordering::Relaxed);
        log::info!("# of samples: {}", total);

        reduce_films(&film_slots, width, height, total)
    }
}

impl SampleRenderer {
    pub fn new(integrator: Box<dyn Integrator>, settings: SampleRendererSettings) -> Self {
        Self { integrator, settings }
    }

    fn resolve_num_threads(&self) -> usize {
        let cores = thread::available_parallelism().map(|n| n.get()).unwrap_or(1) as i32;
        let requested = if self.settings.num_threads > 0 {
            self.settings.num_threads
        } else {
            cores + self.settings.num_threads
        };
        requested.max(1) as usize
    }
}

// Associative reduction of the per-thread slots, rescaled to per-pixel
// radiance by (W * H) / processed.
fn reduce_films(film_slots: &[Mutex<Bitmap>], width: usize, height: usize,
                processed: i64) -> Bitmap {
    let mut film = Bitmap::new(width, height);
    for slot in film_slots {
        let slot = lock_or_recover(slot);
        film.accumulate(&slot);
    }
    if processed > 0 {
        film.scale((width * height) as Float / processed as Float);
    }
    film
}

/* Tests for the sample driver and the estimator suite */

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::integrator::create_integrator;
    use crate::core::primitive::Bsdf;
    use crate::core::scene::testutil::{ quad_mesh, SceneBuilder };
    use crate::math::constants::{ Vector3f, PI };
    use crate::math::spectrum::RGBSpectrum;

    fn render_named(scene: &Scene, name: &str, width: usize, height: usize,
                    num_samples: i64, max_num_vertices: i32, seed: u64) -> Bitmap {
        let renderer = SampleRenderer::new(
            create_integrator(name).expect("known renderer"),
            SampleRendererSettings {
                width,
                height,
                num_samples,
                max_num_vertices,
                num_threads: 2,
                grain_size: 1000,
                progress_update_interval: 100000,
                seed: Some(seed),
                ..SampleRendererSettings::default()
            });
        renderer.render(scene)
    }

    // Closed-ish diffuse box lit by a ceiling quad.
    fn diffuse_box() -> Scene {
        let half = 2.0;
        let floor = quad_mesh(
            Vector3f::new(-half, -half, 0.0),
            Vector3f::new(half, -half, 0.0),
            Vector3f::new(half, half, 0.0),
            Vector3f::new(-half, half, 0.0),
        );
        let ceiling = quad_mesh(
            Vector3f::new(-half, -half, 4.0),
            Vector3f::new(-half, half, 4.0),
            Vector3f::new(half, half, 4.0),
            Vector3f::new(half, -half, 4.0),
        );
        let back = quad_mesh(
            Vector3f::new(-half, half, 0.0),
            Vector3f::new(half, half, 0.0),
            Vector3f::new(half, half, 4.0),
            Vector3f::new(-half, half, 4.0),
        );
        let light = quad_mesh(
            Vector3f::new(-0.5, -0.5, 3.99),
            Vector3f::new(-0.5, 0.5, 3.99),
            Vector3f::new(0.5, 0.5, 3.99),
            Vector3f::new(0.5, -0.5, 3.99),
        );

        SceneBuilder::new()
            .pinhole(Vector3f::new(0.0, -7.0, 2.0), Vector3f::new(0.0, 0.0, 2.0),
                     Vector3f::new(0.0, 0.0, 1.0), 50.0, 1.0)
            .area_light(light, RGBSpectrum::splat(20.0))
            .diffuse_mesh(floor, RGBSpectrum::new(0.725, 0.71, 0.68))
            .diffuse_mesh(ceiling, RGBSpectrum::new(0.725, 0.71, 0.68))
            .diffuse_mesh(back, RGBSpectrum::new(0.725, 0.71, 0.68))
            .build()
    }

    // Reproducibility holds per worker, so pin the driver to one thread;
    // grain scheduling across racing workers is timing-dependent.
    #[test]
    fn test_fixed_seed_reproducible() {
        let scene = diffuse_box();
        let render = || {
            let renderer = SampleRenderer::new(
                create_integrator("pt").expect("known renderer"),
                SampleRendererSettings {
                    width: 4,
                    height: 4,
                    num_samples: 4000,
                    max_num_vertices: 8,
                    num_threads: 1,
                    grain_size: 500,
                    seed: Some(7),
                    ..SampleRendererSettings::default()
                });
            renderer.render(&scene)
        };
        let a = render();
        let b = render();
        for (x, y) in a.data().iter().zip(b.data().iter()) {
            assert_eq!(x, y);
        }
    }

    #[test]
    fn test_pt_and_ptdirect_agree() {
        let scene = diffuse_box();
        let a = render_named(&scene, "pt", 4, 4, 300000, 8, 11).mean();
        let b = render_named(&scene, "ptdirect", 4, 4, 150000, 8, 13).mean();

        assert!(a.y > 0.0 && b.y > 0.0);
        let rel = (a.y - b.y).abs() / b.y;
        assert!(rel < 0.15, "pt {} vs ptdirect {} rel {}", a.y, b.y, rel);
    }

    #[test]
    fn test_bpt_agrees_with_ptdirect() {
        let scene = diffuse_box();
        let a = render_named(&scene, "bpt", 4, 4, 60000, 6, 17).mean();
        let b = render_named(&scene, "ptdirect", 4, 4, 120000, 6, 19).mean();

        assert!(a.y > 0.0 && b.y > 0.0);
        let rel = (a.y - b.y).abs() / b.y;
        assert!(rel < 0.15, "bpt {} vs ptdirect {} rel {}", a.y, b.y, rel);
    }

    #[test]
    fn test_lt_variants_agree_with_ptdirect() {
        let scene = diffuse_box();
        let reference = render_named(&scene, "ptdirect", 4, 4, 150000, 6, 23).mean();
        let lt = render_named(&scene, "ltdirect", 4, 4, 300000, 6, 29).mean();

        assert!(lt.y > 0.0);
        let rel = (lt.y - reference.y).abs() / reference.y;
        assert!(rel < 0.2, "ltdirect {} vs ptdirect {} rel {}", lt.y, reference.y, rel);
    }

    #[test]
    fn test_mnee_reduces_to_nee_without_specular() {
        let scene = diffuse_box();
        let nee = render_named(&scene, "ptdirect", 4, 4, 120000, 3, 31).mean();
        let mnee = render_named(&scene, "ptmnee", 4, 4, 120000, 3, 37).mean();

        assert!(nee.y > 0.0 && mnee.y > 0.0);
        let rel = (mnee.y - nee.y).abs() / nee.y;
        assert!(rel < 0.15, "ptmnee {} vs ptdirect {} rel {}", mnee.y, nee.y, rel);
    }

    // Directional light onto a flat diffuse plane: the rendered radiance is
    // Le * cos(theta) * R / pi for the visible plane.
    #[test]
    fn test_directional_light_irradiance() {
        let plane = quad_mesh(
            Vector3f::new(-3.0, -3.0, 0.0),
            Vector3f::new(3.0, -3.0, 0.0),
            Vector3f::new(3.0, 3.0, 0.0),
            Vector3f::new(-3.0, 3.0, 0.0),
        );

        let scene = SceneBuilder::new()
            .pinhole(Vector3f::new(0.0, 0.0, 5.0), Vector3f::new(0.0, 0.0, 0.0),
                     Vector3f::new(0.0, 1.0, 0.0), 30.0, 1.0)
            .directional_light(Vector3f::new(0.0, 0.0, -1.0), RGBSpectrum::splat(2.0))
            .diffuse_mesh(plane, RGBSpectrum::splat(0.5))
            .build();

        // Delta-direction lights only contribute through sampled light
        // subpaths, so render with bpt.
        let film = render_named(&scene, "bpt", 4, 4, 400000, 4, 41);
        let center = film[(2, 2)];

        // Le * cos(0) * R / pi
        let expected = 2.0 * 0.5 / PI;
        let rel = (center.y - expected).abs() / expected;
        assert!(rel < 0.1, "got {} expected {} rel {}", center.y, expected, rel);
    }

    // A wide refractive slab shields the visible part of the receiver from
    // the point light, so every direct connection must be found by the
    // manifold walk through the interface. The light sits far to the side:
    // connections are oblique and the half-vector stays well conditioned.
    #[test]
    fn test_mnee_connects_through_refractive_slab() {
        let receiver = quad_mesh(
            Vector3f::new(-4.0, -4.0, 0.0),
            Vector3f::new(4.0, -4.0, 0.0),
            Vector3f::new(4.0, 4.0, 0.0),
            Vector3f::new(-4.0, 4.0, 0.0),
        );
        let slab = quad_mesh(
            Vector3f::new(-5.0, -5.0, 2.0),
            Vector3f::new(5.0, -5.0, 2.0),
            Vector3f::new(5.0, 5.0, 2.0),
            Vector3f::new(-5.0, 5.0, 2.0),
        );

        let scene = SceneBuilder::new()
            // The camera stays below the slab plane, so only the light
            // connection crosses the interface.
            .pinhole(Vector3f::new(0.0, -5.0, 0.5), Vector3f::new(-0.5, 0.0, 0.0),
                     Vector3f::new(0.0, 0.0, 1.0), 25.0, 1.0)
            .point_light(Vector3f::new(6.0, 0.0, 4.0), RGBSpectrum::splat(60.0))
            .diffuse_mesh(receiver, RGBSpectrum::splat(0.6))
            .specular_mesh(slab, Bsdf::SpecularRefraction {
                tint: RGBSpectrum::splat(1.0),
                eta1: 1.0,
                eta2: 1.5,
            })
            .build();

        let film = render_named(&scene, "ptmnee", 4, 4, 40000, 5, 43);
        let mean = film.mean();
        assert!(mean.x.is_finite() && mean.y.is_finite() && mean.z.is_finite());
        // The receiver in view is lit only through the manifold connection.
        assert!(mean.y > 1e-3, "mean luminance {}", mean.y);
    }
}
