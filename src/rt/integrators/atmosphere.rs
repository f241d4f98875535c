//! Single-scattering atmosphere integrator.
//!
//! Raymarches Rayleigh and Mie inscatter along camera rays; rays that hit
//! scene geometry get a Lambert shade lit by the attenuated sun plus sky
//! ambient. Each pass is one scheduler unit per worker; unit `i` walks the
//! film's partition `i` of the pixel sequence, so no two workers ever touch
//! the same pixel and [`Film::accumulate`] with `t = 1/(n+1)` is exclusive
//! per pixel by construction.

use super::Pcg32;
use crate::film::Film;
use crate::rt::{
    DebugInfo, ImageSnapshot, Integrator, IntegratorState, RtContext, StopMode, TaskHandle,
};
use crate::scene::Scene;
use crate::util::{Options, UVec2, Vec2, Vec3, Vec4};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Instant;

const PREVIEW_SPP: u32 = 8;

const PLANET_RADIUS: f32 = 6.371e6;
const ATMOSPHERE_RADIUS: f32 = 6.471e6;
const RAYLEIGH_SCALE_HEIGHT: f32 = 8.0e3;
const MIE_SCALE_HEIGHT: f32 = 1.2e3;
const BETA_RAYLEIGH: Vec3 = Vec3::new(5.802e-6, 13.558e-6, 33.1e-6);
const BETA_MIE: f32 = 3.996e-6;
const MIE_G: f32 = 0.76;
const SUN_IRRADIANCE: f32 = 22.0;
const VIEW_STEPS: u32 = 16;
const LIGHT_STEPS: u32 = 8;

/// CPU sky integrator.
pub struct CpuAtmosphere {
    ctx: RtContext,
    state: IntegratorState,
    options: Options,
    output_size: UVec2,
    camera_film: Arc<RwLock<Film>>,
    /// Present for the polymorphic contract; this integrator never writes it.
    light_film: Arc<RwLock<Film>>,
    camera_snapshot: ImageSnapshot,
    light_snapshot: ImageSnapshot,
    task: Option<TaskHandle>,
    /// Scene pinned at pass start; a mid-render rebind must not move
    /// geometry under running workers.
    scene: Option<Arc<Scene>>,
    iteration: u32,
    target_iterations: u32,
    started: Instant,
    completed_in: Option<f32>,
}

impl CpuAtmosphere {
    pub fn new(ctx: RtContext) -> Self {
        let mut options = Options::new();
        options.set_float("sun elevation", 22.0, -5.0, 90.0);
        options.set_float("sun azimuth", 145.0, 0.0, 360.0);
        options.set_float("turbidity", 2.5, 1.0, 10.0);
        options.set_integer("samples", 64, 1, 65536);

        Self {
            ctx,
            state: IntegratorState::Stopped,
            options,
            output_size: UVec2::new(1280, 720),
            camera_film: Arc::new(RwLock::new(Film::new())),
            light_film: Arc::new(RwLock::new(Film::new())),
            camera_snapshot: ImageSnapshot::new(),
            light_snapshot: ImageSnapshot::new(),
            task: None,
            scene: None,
            iteration: 0,
            target_iterations: 0,
            started: Instant::now(),
            completed_in: None,
        }
    }

    fn sun_direction(&self) -> Vec3 {
        let elevation = self.options.get_float("sun elevation", 22.0).to_radians();
        let azimuth = self.options.get_float("sun azimuth", 145.0).to_radians();
        Vec3::new(
            elevation.cos() * azimuth.sin(),
            elevation.sin(),
            -elevation.cos() * azimuth.cos(),
        )
        .normalize()
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
        {
            let mut film = self.camera_film.write();
            if film.dimensions() != self.output_size || film.thread_count() != threads {
                film.resize(self.output_size, threads);
            } else {
                film.clear();
            }
        }
        {
            let mut film = self.light_film.write();
            if film.dimensions() != self.output_size {
                film.resize(self.output_size, threads);
            }
        }

        self.iteration = 0;
        self.target_iterations = if preview {
            PREVIEW_SPP
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
            target = self.target_iterations,
            size = ?self.output_size,
            preview,
            "atmosphere render started"
        );
        self.dispatch_pass();
    }

    fn dispatch_pass(&mut self) {
        let Some(scene) = self.scene.clone() else {
            return;
        };
        let film = Arc::clone(&self.camera_film);
        let sun_dir = self.sun_direction();
        let turbidity = self.options.get_float("turbidity", 2.5);
        let iteration = self.iteration;
        let threads = self.ctx.scheduler().thread_count();

        self.task = Some(self.ctx.scheduler().schedule(threads, move |task| {
            let film = film.read();
            let dims = film.dimensions();
            if dims.x == 0 || dims.y == 0 {
                return;
            }
            let aspect = dims.x as f32 / dims.y as f32;
            let t = 1.0 / (iteration + 1) as f32;
            let mut rng = Pcg32::new(iteration as u64 + 1, task.unit as u64);

            for slot in film.thread_range(task.unit) {
                if task.is_cancelled() {
                    return;
                }
                let pixel = film.pixel_at(slot);
                let coord = UVec2::new(pixel % dims.x, pixel / dims.x);
                let uv = Vec2::new(
                    (coord.x as f32 + rng.next_f32()) / dims.x as f32,
                    (coord.y as f32 + rng.next_f32()) / dims.y as f32,
                );
                let (origin, dir) = scene.camera().ray(uv, aspect);
                let radiance = shade(&scene, origin, dir, sun_dir, turbidity);
                film.accumulate(radiance.extend(1.0), coord, t);
            }
        }));
    }

    /// Retires a finished pass; true when one was retired.
    fn collect_pass(&mut self) -> bool {
        match &self.task {
            Some(task) if task.is_complete() => {
                self.task = None;
                self.iteration += 1;
                self.camera_film.read().mark_dirty();
                true
            }
            _ => false,
        }
    }

    fn finish(&mut self) {
        self.completed_in = Some(self.started.elapsed().as_secs_f32());
        self.state = IntegratorState::Stopped;
        tracing::info!(
            spp = self.iteration,
            seconds = self.completed_in.unwrap_or(0.0),
            "atmosphere render finished"
        );
    }
}

impl Integrator for CpuAtmosphere {
    fn name(&self) -> &'static str {
        "atmosphere"
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
            // Restart the preview so the new parameters show up.
            let opts = self.options.clone();
            self.state = IntegratorState::Stopped;
            self.start(&opts, true);
        }
    }

    fn state(&self) -> IntegratorState {
        self.state
    }

    fn can_run(&self) -> bool {
        self.ctx.has_scene()
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
        if self.camera_film.read().dimensions() != size {
            self.camera_film.write().resize(size, threads);
            self.light_film.write().resize(size, threads);
        }
        if self.state == IntegratorState::Preview {
            let opts = self.options.clone();
            self.state = IntegratorState::Stopped;
            self.start(&opts, true);
        }
    }

    fn preview(&mut self, options: &Options) {
        // A preview restart from Preview is legal; drop the old pass first.
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
                if self.iteration >= self.target_iterations {
                    if self.state == IntegratorState::Running {
                        self.finish();
                    }
                    // Preview idles at its sample cap.
                } else {
                    self.dispatch_pass();
                }
            }
            IntegratorState::WaitingForCompletion => {
                match &self.task {
                    Some(task) if !task.is_complete() => {}
                    Some(_) => {
                        self.collect_pass();
                        self.finish();
                    }
                    None => self.finish(),
                }
            }
        }
    }

    fn get_camera_image(&mut self, force_update: bool) -> &[Vec4] {
        self.camera_snapshot.get(&self.camera_film.read(), force_update)
    }

    fn get_light_image(&mut self, force_update: bool) -> &[Vec4] {
        self.light_snapshot.get(&self.light_film.read(), force_update)
    }

    fn status(&self) -> String {
        match self.completed_in {
            Some(seconds) => format!("{} spp (done in {:.1} s)", self.iteration, seconds),
            None => format!("{} spp", self.iteration),
        }
    }

    fn debug_info(&self) -> Vec<DebugInfo> {
        vec![
            DebugInfo::new("iteration", self.iteration),
            DebugInfo::new("workers", self.ctx.scheduler().thread_count()),
            DebugInfo::new(
                "scene",
                self.scene.as_ref().map_or("-", |s| s.name),
            ),
        ]
    }
}

/// One camera-ray estimate: geometry shade or sky inscatter.
fn shade(scene: &Scene, origin: Vec3, dir: Vec3, sun_dir: Vec3, turbidity: f32) -> Vec3 {
    match scene.intersect(origin, dir, f32::MAX) {
        Some(hit) => {
            let albedo = scene.materials()[hit.material as usize].albedo;
            let cos_sun = hit.normal.dot(sun_dir).max(0.0);
            let shadow_origin = hit.point + hit.normal * 1e-3;
            let direct = if cos_sun > 0.0 && !scene.occluded(shadow_origin, sun_dir, 1.0e7) {
                sun_transmittance(sun_dir, turbidity) * SUN_IRRADIANCE * cos_sun
            } else {
                Vec3::ZERO
            };
            // Hemisphere ambient from one sky sample along the normal.
            let ambient = sky_radiance(hit.normal, sun_dir, turbidity) * 0.5;
            albedo * (direct + ambient) * std::f32::consts::FRAC_1_PI
        }
        None => sky_radiance(dir, sun_dir, turbidity),
    }
}

/// Optical depth (rayleigh, mie) along a ray from `pos` to the top of the
/// atmosphere.
fn optical_depth(pos: Vec3, dir: Vec3, steps: u32) -> Vec2 {
    let t_exit = atmosphere_exit(pos, dir);
    let step = t_exit / steps as f32;
    let mut depth = Vec2::ZERO;
    let mut t = 0.5 * step;
    for _ in 0..steps {
        let h = (pos + dir * t).length() - PLANET_RADIUS;
        depth.x += (-h / RAYLEIGH_SCALE_HEIGHT).exp() * step;
        depth.y += (-h / MIE_SCALE_HEIGHT).exp() * step;
        t += step;
    }
    depth
}

/// Distance to the atmosphere shell from a point inside it.
fn atmosphere_exit(pos: Vec3, dir: Vec3) -> f32 {
    let b = pos.dot(dir);
    let c = pos.length_squared() - ATMOSPHERE_RADIUS * ATMOSPHERE_RADIUS;
    let disc = b * b - c;
    if disc <= 0.0 {
        return 0.0;
    }
    (-b + disc.sqrt()).max(0.0)
}

fn extinction(depth: Vec2, turbidity: f32) -> Vec3 {
    let mie = BETA_MIE * turbidity;
    (-(BETA_RAYLEIGH * depth.x + Vec3::splat(mie * 1.1 * depth.y))).exp()
}

/// Transmittance from the ground to the sun.
fn sun_transmittance(sun_dir: Vec3, turbidity: f32) -> Vec3 {
    let pos = Vec3::new(0.0, PLANET_RADIUS + 2.0, 0.0);
    extinction(optical_depth(pos, sun_dir, LIGHT_STEPS), turbidity)
}

/// Single-scattering sky inscatter along `dir` from eye level.
fn sky_radiance(dir: Vec3, sun_dir: Vec3, turbidity: f32) -> Vec3 {
    let pos = Vec3::new(0.0, PLANET_RADIUS + 2.0, 0.0);
    let t_exit = atmosphere_exit(pos, dir);
    if t_exit <= 0.0 {
        return Vec3::ZERO;
    }

    let mu = dir.dot(sun_dir);
    let phase_r = 3.0 / (16.0 * std::f32::consts::PI) * (1.0 + mu * mu);
    let g2 = MIE_G * MIE_G;
    let phase_m = 3.0 / (8.0 * std::f32::consts::PI) * ((1.0 - g2) * (1.0 + mu * mu))
        / ((2.0 + g2) * (1.0 + g2 - 2.0 * MIE_G * mu).powf(1.5));

    let beta_mie = BETA_MIE * turbidity;
    let step = t_exit / VIEW_STEPS as f32;
    let mut sum_r = Vec3::ZERO;
    let mut sum_m = Vec3::ZERO;
    let mut view_depth = Vec2::ZERO;
    let mut t = 0.5 * step;

    for _ in 0..VIEW_STEPS {
        let sample = pos + dir * t;
        let h = sample.length() - PLANET_RADIUS;
        let density = Vec2::new(
            (-h / RAYLEIGH_SCALE_HEIGHT).exp() * step,
            (-h / MIE_SCALE_HEIGHT).exp() * step,
        );
        view_depth += density;

        let trans = extinction(view_depth + optical_depth(sample, sun_dir, LIGHT_STEPS), turbidity);
        sum_r += trans * density.x;
        sum_m += trans * density.y;
        t += step;
    }

    let mut radiance =
        SUN_IRRADIANCE * (sum_r * BETA_RAYLEIGH * phase_r + sum_m * beta_mie * phase_m);

    // Sun disk, attenuated by the full view path.
    if mu > 0.999_96 {
        radiance += SUN_IRRADIANCE * 100.0 * extinction(view_depth, turbidity);
    }
    radiance
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sun() -> Vec3 {
        Vec3::new(0.3, 0.6, -0.5).normalize()
    }

    #[test]
    fn test_sky_is_finite_and_positive() {
        for i in 0..16 {
            let a = i as f32 / 16.0 * std::f32::consts::TAU;
            let dir = Vec3::new(a.cos() * 0.8, 0.3, a.sin() * 0.8).normalize();
            let c = sky_radiance(dir, sun(), 2.5);
            assert!(c.is_finite(), "direction {dir:?} produced {c:?}");
            assert!(c.min_element() >= 0.0);
        }
    }

    #[test]
    fn test_sky_brightens_toward_the_sun() {
        let sun_dir = sun();
        let near = sky_radiance(
            (sun_dir + Vec3::new(0.05, 0.0, 0.0)).normalize(),
            sun_dir,
            2.5,
        );
        let away = sky_radiance(Vec3::new(-sun_dir.x, 0.3, -sun_dir.z).normalize(), sun_dir, 2.5);
        assert!(near.length() > away.length());
    }

    #[test]
    fn test_horizon_redder_than_zenith() {
        let sun_dir = Vec3::new(0.0, 0.05, -1.0).normalize();
        let horizon = sky_radiance(Vec3::new(0.0, 0.01, -1.0).normalize(), sun_dir, 2.5);
        let zenith = sky_radiance(Vec3::Y, sun_dir, 2.5);
        // Rayleigh scatters blue out of long paths.
        let ratio_h = horizon.x / horizon.z.max(1e-6);
        let ratio_z = zenith.x / zenith.z.max(1e-6);
        assert!(ratio_h > ratio_z);
    }

    #[test]
    fn test_status_strings() {
        let ctx = RtContext::with_threads(1);
        let mut it = CpuAtmosphere::new(ctx);
        assert_eq!(it.status(), "0 spp");
        it.iteration = 12;
        it.completed_in = Some(3.25);
        assert!(it.status().starts_with("12 spp (done in 3.2"));
    }
}
