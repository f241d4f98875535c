//! Light-tracing integrator.
//!
//! Traces photons outward from the scene's emitters and splats every
//! camera-visible bounce into a per-pass film through NDC
//! [`Film::atomic_add`] — workers land on arbitrary pixels, so this is the
//! film's contention path by design. On pass completion the pass film is
//! folded into both the light image and the camera image with the running
//! mean rule and cleared for the next pass.

use super::Pcg32;
use crate::film::Film;
use crate::rt::{
    DebugInfo, ImageSnapshot, Integrator, IntegratorState, RtContext, StopMode, TaskHandle,
};
use crate::scene::Scene;
use crate::util::{Options, UVec2, Vec3, Vec4};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Instant;

const PREVIEW_PASSES: u32 = 4;
/// Splat brightness normalization; folds the pinhole importance constants
/// the demo does not carry explicitly.
const SPLAT_SCALE: f32 = 0.35;

/// CPU photon splatting integrator.
pub struct CpuLightTracer {
    ctx: RtContext,
    state: IntegratorState,
    options: Options,
    output_size: UVec2,
    camera_film: Arc<RwLock<Film>>,
    light_film: Arc<RwLock<Film>>,
    /// Scratch target the workers splat into; cleared every pass.
    pass_film: Arc<RwLock<Film>>,
    camera_snapshot: ImageSnapshot,
    light_snapshot: ImageSnapshot,
    task: Option<TaskHandle>,
    scene: Option<Arc<Scene>>,
    pass: u32,
    target_passes: u32,
    started: Instant,
    completed_in: Option<f32>,
}

impl CpuLightTracer {
    pub fn new(ctx: RtContext) -> Self {
        let mut options = Options::new();
        options.set_integer("photons per pass", 100_000, 1_000, 10_000_000);
        options.set_integer("max bounces", 4, 1, 8);
        options.set_integer("samples", 64, 1, 4096);

        Self {
            ctx,
            state: IntegratorState::Stopped,
            options,
            output_size: UVec2::new(1280, 720),
            camera_film: Arc::new(RwLock::new(Film::new())),
            light_film: Arc::new(RwLock::new(Film::new())),
            pass_film: Arc::new(RwLock::new(Film::new())),
            camera_snapshot: ImageSnapshot::new(),
            light_snapshot: ImageSnapshot::new(),
            task: None,
            scene: None,
            pass: 0,
            target_passes: 0,
            started: Instant::now(),
            completed_in: None,
        }
    }

    fn cancel_task(&mut self) {
        if let Some(task) = self.task.take() {
            task.cancel();
        }
    }

    fn start(&mut self, options: &Options, preview: bool) {
        if !self.state.is_editable() {
            tracing::warn!(state = %self.state, "start ignored outside an editable state");
            return;
        }
        if !self.can_run() {
            tracing::warn!("start ignored: no scene bound");
            return;
        }
        self.options = options.clone();
        self.cancel_task();
        self.scene = self.ctx.scene();

        let threads = self.ctx.scheduler().thread_count();
        for film in [&self.camera_film, &self.light_film, &self.pass_film] {
            let mut film = film.write();
            if film.dimensions() != self.output_size || film.thread_count() != threads {
                film.resize(self.output_size, threads);
            } else {
                film.clear();
            }
        }

        self.pass = 0;
        self.target_passes = if preview {
            PREVIEW_PASSES
        } else {
            self.options.get_integer("samples", 64)
        };
        self.started = Instant::now();
        self.completed_in = None;
        self.state = if preview {
            IntegratorState::Preview
        } else {
            IntegratorState::Running
        };
        tracing::info!(
            passes = self.target_passes,
            photons = self.options.get_integer("photons per pass", 100_000),
            size = ?self.output_size,
            "light tracer started"
        );
        self.dispatch_pass();
    }

    fn dispatch_pass(&mut self) {
        let Some(scene) = self.scene.clone() else {
            return;
        };
        let film = Arc::clone(&self.pass_film);
        let threads = self.ctx.scheduler().thread_count();
        let photons = self.options.get_integer("photons per pass", 100_000);
        let max_bounces = self.options.get_integer("max bounces", 4);
        let pass = self.pass;
        let per_unit = photons.div_ceil(threads);

        self.task = Some(self.ctx.scheduler().schedule(threads, move |task| {
            let film = film.read();
            let dims = film.dimensions();
            if dims.x == 0 || dims.y == 0 {
                return;
            }
            let aspect = dims.x as f32 / dims.y as f32;
            // Splats spread over the film, so the per-photon weight carries
            // the pixel count.
            let weight = SPLAT_SCALE * (dims.x * dims.y) as f32 / photons as f32;
            let mut rng = Pcg32::new(
                (pass as u64) << 20 | task.unit as u64,
                task.unit as u64 + 1,
            );

            for _ in 0..per_unit {
                if task.is_cancelled() {
                    return;
                }
                trace_photon(&scene, &film, aspect, weight, max_bounces, task.unit, &mut rng);
            }
        }));
    }

    fn collect_pass(&mut self) -> bool {
        match &self.task {
            Some(task) if task.is_complete() => {
                self.task = None;
                let t = 1.0 / (self.pass + 1) as f32;
                let pass_film = self.pass_film.read();
                pass_film.flush_to(&self.light_film.read(), t);
                pass_film.flush_to(&self.camera_film.read(), t);
                pass_film.clear();
                self.pass += 1;
                true
            }
            _ => false,
        }
    }

    fn finish(&mut self) {
        self.completed_in = Some(self.started.elapsed().as_secs_f32());
        self.state = IntegratorState::Stopped;
        tracing::info!(
            passes = self.pass,
            seconds = self.completed_in.unwrap_or(0.0),
            "light tracer finished"
        );
    }
}

impl Integrator for CpuLightTracer {
    fn name(&self) -> &'static str {
        "light-tracer"
    }

    fn options(&self) -> Options {
        self.options.clone()
    }

    fn update_options(&mut self, options: &Options) {
        if !self.state.is_editable() {
            tracing::debug!(state = %self.state, "update_options rejected");
            return;
        }
        self.options = options.clone();
        if self.state == IntegratorState::Preview {
            let opts = self.options.clone();
            self.cancel_task();
            self.state = IntegratorState::Stopped;
            self.start(&opts, true);
        }
    }

    fn state(&self) -> IntegratorState {
        self.state
    }

    fn can_run(&self) -> bool {
        // Photons need somewhere to start from.
        self.ctx
            .scene()
            .is_some_and(|s| !s.emitters().is_empty())
    }

    fn set_output_size(&mut self, size: UVec2) {
        if !self.state.is_editable() {
            tracing::debug!(state = %self.state, "set_output_size rejected");
            return;
        }
        self.cancel_task();
        self.output_size = size;
        // Image queries between here and the next start already see the new
        // dimensions.
        let threads = self.ctx.scheduler().thread_count();
        for film in [&self.camera_film, &self.light_film, &self.pass_film] {
            let mut film = film.write();
            if film.dimensions() != size {
                film.resize(size, threads);
            }
        }
        if self.state == IntegratorState::Preview {
            let opts = self.options.clone();
            self.state = IntegratorState::Stopped;
            self.start(&opts, true);
        }
    }

    fn preview(&mut self, options: &Options) {
        if self.state == IntegratorState::Preview {
            self.cancel_task();
            self.state = IntegratorState::Stopped;
        }
        self.start(options, true);
    }

    fn run(&mut self, options: &Options) {
        if self.state == IntegratorState::Preview {
            self.cancel_task();
            self.state = IntegratorState::Stopped;
        }
        self.start(options, false);
    }

    fn stop(&mut self, mode: StopMode) {
        if self.state == IntegratorState::Stopped {
            return;
        }
        match mode {
            StopMode::Immediate => {
                self.cancel_task();
                self.state = IntegratorState::Stopped;
                self.completed_in = None;
            }
            StopMode::WaitForCompletion => {
                self.state = IntegratorState::WaitingForCompletion;
            }
        }
    }

    fn update(&mut self) {
        match self.state {
            IntegratorState::Stopped => {}
            IntegratorState::Preview | IntegratorState::Running => {
                if !self.collect_pass() {
                    return;
                }
                if self.pass >= self.target_passes {
                    if self.state == IntegratorState::Running {
                        self.finish();
                    }
                } else {
                    self.dispatch_pass();
                }
            }
            IntegratorState::WaitingForCompletion => match &self.task {
                Some(task) if !task.is_complete() => {}
                Some(_) => {
                    self.collect_pass();
                    self.finish();
                }
                None => self.finish(),
            },
        }
    }

    fn get_camera_image(&mut self, force_update: bool) -> &[Vec4] {
        self.camera_snapshot.get(&self.camera_film.read(), force_update)
    }

    fn get_light_image(&mut self, force_update: bool) -> &[Vec4] {
        self.light_snapshot.get(&self.light_film.read(), force_update)
    }

    fn have_updated_light_image(&self) -> bool {
        true
    }

    fn status(&self) -> String {
        match self.completed_in {
            Some(seconds) => format!("{} passes (done in {:.1} s)", self.pass, seconds),
            None => format!("{} passes", self.pass),
        }
    }

    fn debug_info(&self) -> Vec<DebugInfo> {
        vec![
            DebugInfo::new("pass", self.pass),
            DebugInfo::new(
                "photons per pass",
                self.options.get_integer("photons per pass", 0),
            ),
            DebugInfo::new("workers", self.ctx.scheduler().thread_count()),
        ]
    }
}

/// Traces one photon from an emitter and splats every camera-visible bounce.
fn trace_photon(
    scene: &Scene,
    film: &Film,
    aspect: f32,
    weight: f32,
    max_bounces: u32,
    thread_id: u32,
    rng: &mut Pcg32,
) {
    let u = Vec3::new(rng.next_f32(), rng.next_f32(), rng.next_f32());
    let Some(emitter) = scene.sample_emitter(u) else {
        return;
    };

    let mut flux = emitter.emission * (weight / emitter.pdf_area.max(1e-8));
    let mut origin = emitter.position + emitter.normal * 1e-4;
    let mut dir = cosine_hemisphere(emitter.normal, rng);
    let camera = scene.camera();

    for bounce in 0..max_bounces {
        let Some(hit) = scene.intersect(origin, dir, f32::MAX) else {
            return;
        };
        let albedo = scene.materials()[hit.material as usize].albedo;

        // Connect this bounce to the camera.
        if let Some(ndc) = camera.project(hit.point, aspect) {
            let to_cam = camera.position - hit.point;
            let dist = to_cam.length();
            let dir_cam = to_cam / dist;
            let cos_hit = hit.normal.dot(dir_cam);
            if cos_hit > 0.0
                && !scene.occluded(hit.point + hit.normal * 1e-4, dir_cam, dist - 1e-3)
            {
                let splat =
                    flux * albedo * (std::f32::consts::FRAC_1_PI * cos_hit / (dist * dist));
                film.atomic_add(splat.extend(1.0), ndc, thread_id);
            }
        }

        flux *= albedo;
        // Russian roulette once the photon has bounced a couple of times.
        if bounce >= 2 {
            let survive = flux.max_element().clamp(0.05, 0.95);
            if rng.next_f32() > survive {
                return;
            }
            flux /= survive;
        }
        origin = hit.point + hit.normal * 1e-4;
        dir = cosine_hemisphere(hit.normal, rng);
    }
}

/// Cosine-weighted direction around `normal`.
fn cosine_hemisphere(normal: Vec3, rng: &mut Pcg32) -> Vec3 {
    let r = rng.next_f32().sqrt();
    let phi = rng.next_f32() * std::f32::consts::TAU;
    let x = r * phi.cos();
    let y = r * phi.sin();
    let z = (1.0 - r * r).max(0.0).sqrt();

    // Branchless-ish orthonormal basis around the normal.
    let sign = 1.0f32.copysign(normal.z);
    let a = -1.0 / (sign + normal.z);
    let b = normal.x * normal.y * a;
    let tangent = Vec3::new(1.0 + sign * normal.x * normal.x * a, sign * b, -sign * normal.x);
    let bitangent = Vec3::new(b, sign + normal.y * normal.y * a, -normal.y);
    (tangent * x + bitangent * y + normal * z).normalize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_hemisphere_stays_above_surface() {
        let mut rng = Pcg32::new(7, 0);
        for i in 0..256 {
            let normal = Vec3::new(
                (i as f32 * 0.37).sin(),
                (i as f32 * 0.73).cos(),
                (i as f32 * 0.11).sin() + 1.1,
            )
            .normalize();
            let d = cosine_hemisphere(normal, &mut rng);
            assert!(d.dot(normal) >= 0.0, "sample below surface for {normal:?}");
            assert!((d.length() - 1.0).abs() < 1e-4);
        }
    }

    #[test]
    fn test_can_run_requires_an_emitter() {
        let ctx = RtContext::with_threads(1);
        let tracer = CpuLightTracer::new(ctx.clone());
        assert!(!tracer.can_run(), "no scene bound");

        ctx.set_scene(Scene::sky());
        assert!(!tracer.can_run(), "sky scene has no area emitters");

        ctx.set_scene(Scene::cornell());
        assert!(tracer.can_run());
    }
}
