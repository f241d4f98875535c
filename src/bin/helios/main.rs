//! Helios CLI - headless renders and build info.

use helios::rt::integrators::{create_integrator, integrator_names};
use helios::rt::{IntegratorState, RtContext, StopMode};
use helios::scene::Scene;
use helios::util::{linear_to_srgb, RenderSettings, UVec2, Vec4};

use anyhow::{bail, Context};
use std::env;
use std::path::Path;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::{Duration, Instant};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Verbosity level (thread-safe)
const LOG_QUIET: u8 = 0;
const LOG_INFO: u8 = 1;
const LOG_DEBUG: u8 = 2;
const LOG_TRACE: u8 = 3;

static LOG_LEVEL: AtomicU8 = AtomicU8::new(LOG_INFO);

#[inline]
fn log_level() -> u8 {
    LOG_LEVEL.load(Ordering::Relaxed)
}

#[inline]
fn set_log_level(level: u8) {
    LOG_LEVEL.store(level, Ordering::Relaxed);
}

macro_rules! info {
    ($($arg:tt)*) => {
        if log_level() >= LOG_INFO {
            println!("[INFO] {}", format!($($arg)*));
        }
    };
}

macro_rules! debug {
    ($($arg:tt)*) => {
        if log_level() >= LOG_DEBUG {
            println!("[DEBUG] {}", format!($($arg)*));
        }
    };
}

fn main() {
    let args: Vec<String> = env::args().collect();

    // Parse global flags
    let mut filtered_args: Vec<&str> = Vec::new();
    for arg in &args[1..] {
        match arg.as_str() {
            "-v" | "--verbose" => set_log_level(LOG_DEBUG),
            "-vv" | "--trace" => set_log_level(LOG_TRACE),
            "-q" | "--quiet" => set_log_level(LOG_QUIET),
            _ => filtered_args.push(arg),
        }
    }

    init_tracing();

    if filtered_args.is_empty() {
        print_usage(&args[0]);
        return;
    }

    let result = match filtered_args[0] {
        "render" | "r" => {
            if filtered_args.len() < 2 {
                eprintln!("Usage: {} render <out.(exr|png)> [options]", args[0]);
                std::process::exit(1);
            }
            cmd_render(&filtered_args[1..], false)
        }
        "preview" | "p" => {
            if filtered_args.len() < 2 {
                eprintln!("Usage: {} preview <out.(exr|png)> [options]", args[0]);
                std::process::exit(1);
            }
            cmd_render(&filtered_args[1..], true)
        }
        "info" | "i" => cmd_info(),
        "help" | "h" | "-h" | "--help" => {
            print_usage(&args[0]);
            Ok(())
        }
        _ => {
            eprintln!("Unknown command: {}", filtered_args[0]);
            print_usage(&args[0]);
            std::process::exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

/// Library diagnostics go through `tracing`; `RUST_LOG` wins, otherwise the
/// CLI verbosity flags pick the filter.
fn init_tracing() {
    let default = match log_level() {
        LOG_QUIET => "error",
        LOG_INFO => "warn",
        LOG_DEBUG => "helios=debug,warn",
        _ => "helios=trace,debug",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

fn print_usage(prog: &str) {
    println!("Helios - progressive physically-based renderer");
    println!();
    println!("Usage: {} [options] <command> [args]", prog);
    println!();
    println!("Commands:");
    println!("  r, render <out>   Render headless and write the image");
    println!("  p, preview <out>  Short interactive-style preview, then wait-stop");
    println!("  i, info           Version, build stamp, integrators, GPU");
    println!("  h, help           Show this help");
    println!();
    println!("Render options:");
    println!("  --integrator NAME  atmosphere | light-tracer | gpu-path");
    println!("  --size WxH         Output resolution (default 1280x720)");
    println!("  --spp N            Samples per pixel");
    println!("  --threads N        Worker threads (0 = all cores)");
    println!("  --exposure F       Exposure applied to PNG output");
    println!("  --config FILE      JSON settings file (flags override it)");
    println!();
    println!("Options:");
    println!("  -v, --verbose  Debug output");
    println!("  -vv, --trace   Trace output (very verbose)");
    println!("  -q, --quiet    Suppress output");
}

/// Settings from the optional config file, overridden by flags.
fn parse_settings(args: &[&str]) -> anyhow::Result<RenderSettings> {
    let mut settings = RenderSettings::default();

    // Config file first so every flag can override it
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if *arg == "--config" {
            let path = iter.next().context("--config needs a file path")?;
            settings = RenderSettings::load(path)
                .with_context(|| format!("loading settings from {}", path))?;
        }
    }

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match *arg {
            "--integrator" => {
                settings.integrator = iter
                    .next()
                    .context("--integrator needs a name")?
                    .to_string();
            }
            "--size" => {
                let spec = iter.next().context("--size needs WxH")?;
                let (w, h) = spec
                    .split_once('x')
                    .with_context(|| format!("bad size {:?}, expected WxH", spec))?;
                settings.width = w.parse().with_context(|| format!("bad width {:?}", w))?;
                settings.height = h.parse().with_context(|| format!("bad height {:?}", h))?;
            }
            "--spp" => {
                settings.samples = iter
                    .next()
                    .context("--spp needs a count")?
                    .parse()
                    .context("bad sample count")?;
            }
            "--threads" => {
                settings.threads = iter
                    .next()
                    .context("--threads needs a count")?
                    .parse()
                    .context("bad thread count")?;
            }
            "--exposure" => {
                settings.exposure = iter
                    .next()
                    .context("--exposure needs a value")?
                    .parse()
                    .context("bad exposure")?;
            }
            "--config" => {
                iter.next();
            }
            other if other.starts_with("--") => bail!("unknown option {}", other),
            _ => {} // positional, handled by the caller
        }
    }
    settings.validate()?;
    Ok(settings)
}

fn cmd_render(args: &[&str], preview: bool) -> anyhow::Result<()> {
    let out_path = args[0];
    let settings = parse_settings(&args[1..])?;

    let ctx = RtContext::with_threads(settings.threads);
    // The atmosphere integrator wants open sky; the others want emitters.
    let scene = if settings.integrator == "atmosphere" {
        Scene::sky()
    } else {
        Scene::cornell()
    };
    ctx.set_scene(scene);

    let mut integrator = create_integrator(&settings.integrator, ctx.clone())
        .with_context(|| format!("creating integrator {:?}", settings.integrator))?;
    if !integrator.can_run() {
        bail!("integrator {:?} cannot run on this host", integrator.name());
    }

    let mut options = integrator.options();
    options.set_integer("samples", settings.samples, 1, u32::MAX);
    for (name, value) in &settings.options {
        if !options.apply(name, value) {
            debug!("option {:?} not recognized by {}", name, integrator.name());
        }
    }

    integrator.set_output_size(UVec2::new(settings.width, settings.height));
    info!(
        "{} {}x{}, {} spp, {} threads",
        integrator.name(),
        settings.width,
        settings.height,
        settings.samples,
        ctx.scheduler().thread_count()
    );

    let started = Instant::now();
    if preview {
        integrator.preview(&options);
        // A bounded interactive burst, then drain through the wait path.
        let mut last_status = Instant::now();
        for _ in 0..200 {
            if integrator.state() == IntegratorState::Stopped {
                break;
            }
            integrator.update();
            if last_status.elapsed() > Duration::from_millis(500) {
                info!("{}", integrator.status());
                last_status = Instant::now();
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        integrator.stop(StopMode::WaitForCompletion);
        while integrator.state() != IntegratorState::Stopped {
            integrator.update();
            std::thread::sleep(Duration::from_millis(5));
        }
    } else {
        integrator.run(&options);
        if integrator.state() == IntegratorState::Stopped {
            bail!("render failed to start: {}", integrator.status());
        }
        let mut last_status = Instant::now();
        while integrator.state() != IntegratorState::Stopped {
            integrator.update();
            if last_status.elapsed() > Duration::from_millis(500) {
                info!("{}", integrator.status());
                last_status = Instant::now();
            }
            std::thread::sleep(Duration::from_millis(2));
        }
    }
    info!(
        "finished in {:.2} s ({})",
        started.elapsed().as_secs_f32(),
        integrator.status()
    );

    let image = integrator.get_camera_image(true).to_vec();
    write_image(
        out_path,
        &image,
        UVec2::new(settings.width, settings.height),
        settings.exposure,
    )?;
    info!("wrote {}", out_path);
    Ok(())
}

fn cmd_info() -> anyhow::Result<()> {
    println!("helios {}", env!("CARGO_PKG_VERSION"));
    println!(
        "Built: {} {}",
        env!("HELIOS_BUILD_DATE"),
        env!("HELIOS_BUILD_TIME")
    );
    println!();
    println!("Integrators:");
    for name in integrator_names() {
        println!("  {}", name);
    }
    println!();
    let ctx = RtContext::new();
    println!("Worker threads: {}", ctx.scheduler().thread_count());
    let gpu = match helios::gpu::create_wgpu_device() {
        Some(_) => "present",
        None => "unavailable",
    };
    println!("GPU device: {}", gpu);
    Ok(())
}

/// EXR keeps linear radiance; PNG gets exposure plus the sRGB transfer.
fn write_image(path: &str, pixels: &[Vec4], size: UVec2, exposure: f32) -> anyhow::Result<()> {
    let ext = Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();
    match ext.as_str() {
        "exr" => {
            let mut raw = Vec::with_capacity(pixels.len() * 4);
            for p in pixels {
                raw.extend_from_slice(&[p.x, p.y, p.z, 1.0]);
            }
            let img = image::Rgba32FImage::from_raw(size.x, size.y, raw)
                .context("pixel count does not match output size")?;
            image::DynamicImage::ImageRgba32F(img)
                .save(path)
                .with_context(|| format!("writing {}", path))?;
        }
        "png" => {
            let mut raw = Vec::with_capacity(pixels.len() * 4);
            for p in pixels {
                for c in [p.x, p.y, p.z] {
                    let v = linear_to_srgb((c * exposure).clamp(0.0, 1.0));
                    raw.push((v * 255.0 + 0.5) as u8);
                }
                raw.push(255);
            }
            image::RgbaImage::from_raw(size.x, size.y, raw)
                .context("pixel count does not match output size")?
                .save(path)
                .with_context(|| format!("writing {}", path))?;
        }
        other => bail!("unsupported output format {:?} (use .exr or .png)", other),
    }
    Ok(())
}
