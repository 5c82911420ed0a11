// Copyright @yucwang 2026

use genoise::core::integrator::create_integrator;
use genoise::core::scene_loader::load_scene;
use genoise::io::image_utils::save_image;
use genoise::math::constants::Float;
use genoise::renderers::sampler::{ Renderer, SampleRenderer, SampleRendererSettings };

use std::env;
use std::process::exit;
use std::str::FromStr;

fn usage(program: &str) -> ! {
    eprintln!("Usage: {} <renderer> <scene> <result> <width> <height> [options]", program);
    eprintln!();
    eprintln!("Renderers: pt ptdirect lt ltdirect bpt ptmnee");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --num-samples <n>                    Number of samples (default 10000000)");
    eprintln!("  --max-num-vertices <n>               Maximum number of vertices (-1: unbounded)");
    eprintln!("  --num-threads <n>                    Number of threads (<= 0: added to core count)");
    eprintln!("  --grain-size <n>                     Samples per grain (default 10000)");
    eprintln!("  --progress-update-interval <n>       Progress update interval (default 100000)");
    eprintln!("  --render-time <seconds>              Render time budget (-1: use sample count)");
    eprintln!("  --progress-image-update-interval <s> Progress image interval (-1: disable)");
    eprintln!("  --progress-image-update-format <fmt> Progress image path, {{{{count}}}} expands");
    exit(1);
}

fn parse_value<T: FromStr>(args: &[String], i: &mut usize, flag: &str) -> T {
    *i += 1;
    let Some(raw) = args.get(*i) else {
        log::error!("Missing value for {}", flag);
        exit(1);
    };
    match raw.parse() {
        Ok(value) => value,
        Err(_) => {
            log::error!("Invalid value for {}: {}", flag, raw);
            exit(1);
        }
    }
}

fn main() {
    env::set_var("RUST_LOG", "info");
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 6 {
        usage(args.get(0).map(String::as_str).unwrap_or("genoise"));
    }

    let renderer_name = &args[1];
    let scene_path = &args[2];
    let result_path = &args[3];
    let width: usize = match args[4].parse() {
        Ok(v) => v,
        Err(_) => {
            log::error!("Invalid width: {}", args[4]);
            exit(1);
        }
    };
    let height: usize = match args[5].parse() {
        Ok(v) => v,
        Err(_) => {
            log::error!("Invalid height: {}", args[5]);
            exit(1);
        }
    };
    if width == 0 || height == 0 {
        log::error!("Image dimensions must be positive");
        exit(1);
    }

    let mut settings = SampleRendererSettings {
        width,
        height,
        ..SampleRendererSettings::default()
    };

    let mut i = 6;
    while i < args.len() {
        match args[i].as_str() {
            "--num-samples" => {
                settings.num_samples = parse_value(&args, &mut i, "--num-samples");
            }
            "--max-num-vertices" => {
                settings.max_num_vertices = parse_value(&args, &mut i, "--max-num-vertices");
            }
            "--num-threads" => {
                settings.num_threads = parse_value(&args, &mut i, "--num-threads");
            }
            "--grain-size" => {
                settings.grain_size = parse_value(&args, &mut i, "--grain-size");
            }
            "--progress-update-interval" => {
                settings.progress_update_interval =
                    parse_value(&args, &mut i, "--progress-update-interval");
            }
            "--render-time" => {
                settings.render_time = parse_value(&args, &mut i, "--render-time");
            }
            "--progress-image-update-interval" => {
                settings.progress_image_update_interval =
                    parse_value(&args, &mut i, "--progress-image-update-interval");
            }
            "--progress-image-update-format" => {
                settings.progress_image_update_format =
                    parse_value(&args, &mut i, "--progress-image-update-format");
            }
            unknown => {
                log::error!("Unknown option: {}", unknown);
                exit(1);
            }
        }
        i += 1;
    }

    let Some(integrator) = create_integrator(renderer_name) else {
        log::error!("Unknown renderer: {}", renderer_name);
        exit(1);
    };

    log::info!("genoise");
    log::info!("Loading scene: {}", scene_path);
    let aspect = width as Float / height as Float;
    let scene = match load_scene(scene_path, aspect) {
        Ok(scene) => scene,
        Err(err) => {
            log::error!("Failed to load scene: {}", err);
            exit(1);
        }
    };

    log::info!("Rendering with {}", renderer_name);
    let renderer = SampleRenderer::new(integrator, settings);
    let film = renderer.render(&scene);

    log::info!("Saving rendered image: {}", result_path);
    if let Err(err) = save_image(result_path, &film) {
        log::error!("Failed to save image: {}", err);
        exit(1);
    }
}
