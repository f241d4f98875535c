//! GPU path-tracing integrator.
//!
//! The full [`GpuDevice`] client: uploads demo geometry, builds an
//! acceleration structure, compiles its WGSL kernel, and per `update()`
//! launches one progressive sample pass and reads the accumulation region
//! back into the camera film. GPU work happens synchronously inside
//! `update()`, so nothing is ever outstanding between polls and
//! `WaitingForCompletion` resolves on the next one.

use crate::film::Film;
use crate::gpu::{
    create_wgpu_device, AccelDescriptor, AccelHandle, BufferDescriptor, BufferHandle,
    DevicePointer, GpuDevice, PipelineDescriptor, PipelineHandle,
};
use crate::rt::{
    DebugInfo, ImageSnapshot, Integrator, IntegratorState, RtContext, StopMode,
};
use crate::scene::Scene;
use crate::util::{Options, UVec2, Vec4};
use bytemuck::{Pod, Zeroable};
use std::sync::Arc;
use std::time::Instant;

const PATH_TRACE_WGSL: &str = include_str!("path_trace.wgsl");
const PREVIEW_SPP: u32 = 16;

/// Kernel parameter block; layout mirrored by `path_trace.wgsl`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct TraceParams {
    cam_pos: [f32; 3],
    frame: u32,
    cam_forward: [f32; 3],
    accum_ptr: u32,
    cam_right: [f32; 3],
    accel_ptr: u32,
    cam_up: [f32; 3],
    shading_ptr: u32,
    tan_half_fov: f32,
    aspect: f32,
    width: u32,
    height: u32,
    max_depth: u32,
    _pad: [u32; 3],
}

/// Wavefront-style progressive path tracer over a [`GpuDevice`].
pub struct GpuPathTracer {
    ctx: RtContext,
    state: IntegratorState,
    options: Options,
    output_size: UVec2,
    device: Option<Box<dyn GpuDevice>>,
    camera_film: Film,
    light_film: Film,
    camera_snapshot: ImageSnapshot,
    light_snapshot: ImageSnapshot,
    scene: Option<Arc<Scene>>,

    vertex_buffer: BufferHandle,
    index_buffer: BufferHandle,
    shading_buffer: BufferHandle,
    accum_buffer: BufferHandle,
    denoised_buffer: BufferHandle,
    accel: AccelHandle,
    pipeline: PipelineHandle,
    params_ptr: DevicePointer,

    frame: u32,
    target_frames: u32,
    failed_launches: u32,
    readback: Vec<u8>,
    started: Instant,
    completed_in: Option<f32>,
    last_error: Option<&'static str>,
}

impl GpuPathTracer {
    pub fn new(ctx: RtContext) -> Self {
        let mut options = Options::new();
        options.set_integer("samples", 256, 1, 65536);
        options.set_integer("max bounces", 6, 1, 16);
        options.set_boolean("denoise", true);

        let device = create_wgpu_device();
        if device.is_none() {
            tracing::info!("gpu-path unavailable: no device");
        }

        Self {
            ctx,
            state: IntegratorState::Stopped,
            options,
            output_size: UVec2::new(1280, 720),
            device,
            camera_film: Film::new(),
            light_film: Film::new(),
            camera_snapshot: ImageSnapshot::new(),
            light_snapshot: ImageSnapshot::new(),
            scene: None,
            vertex_buffer: BufferHandle::INVALID,
            index_buffer: BufferHandle::INVALID,
            shading_buffer: BufferHandle::INVALID,
            accum_buffer: BufferHandle::INVALID,
            denoised_buffer: BufferHandle::INVALID,
            accel: AccelHandle::INVALID,
            pipeline: PipelineHandle::INVALID,
            params_ptr: 0,
            frame: 0,
            target_frames: 0,
            failed_launches: 0,
            readback: Vec::new(),
            started: Instant::now(),
            completed_in: None,
            last_error: None,
        }
    }

    fn release_resources(&mut self) {
        let Some(device) = self.device.as_mut() else {
            return;
        };
        for handle in [
            &mut self.vertex_buffer,
            &mut self.index_buffer,
            &mut self.shading_buffer,
            &mut self.accum_buffer,
            &mut self.denoised_buffer,
        ] {
            if handle.is_valid() {
                device.destroy_buffer(*handle);
                *handle = BufferHandle::INVALID;
            }
        }
        if self.accel.is_valid() {
            device.destroy_acceleration_structure(self.accel);
            self.accel = AccelHandle::INVALID;
        }
        // The pipeline survives across renders through the device's content
        // cache; destroying it here would only force a recompile.
    }

    /// Uploads geometry and shading, builds the acceleration structure, and
    /// compiles the kernel. False leaves everything released.
    fn prepare_gpu(&mut self, scene: &Scene) -> bool {
        self.release_resources();
        let Some(device) = self.device.as_mut() else {
            return false;
        };

        let positions = scene.packed_positions();
        let indices = scene.packed_indices();
        let shading = scene.packed_shading();

        self.vertex_buffer =
            device.create_buffer(&BufferDescriptor::with_data(bytemuck::cast_slice(&positions)));
        self.index_buffer =
            device.create_buffer(&BufferDescriptor::with_data(bytemuck::cast_slice(&indices)));
        self.shading_buffer =
            device.create_buffer(&BufferDescriptor::with_data(bytemuck::cast_slice(&shading)));
        let pixel_bytes = (self.output_size.x as u64) * (self.output_size.y as u64) * 16;
        self.accum_buffer = device.create_buffer(&BufferDescriptor::sized(pixel_bytes));

        if !(self.vertex_buffer.is_valid()
            && self.index_buffer.is_valid()
            && self.shading_buffer.is_valid()
            && self.accum_buffer.is_valid())
        {
            self.last_error = Some("GPU buffer allocation failed");
            self.release_resources();
            return false;
        }
        device.clear_buffer(self.accum_buffer);

        self.accel = device.create_acceleration_structure(&AccelDescriptor {
            vertex_buffer: self.vertex_buffer,
            vertex_stride: 16,
            vertex_count: scene.triangle_count() * 3,
            index_buffer: self.index_buffer,
            index_stride: 4,
            triangle_count: scene.triangle_count(),
        });
        if !self.accel.is_valid() {
            self.last_error = Some("acceleration structure build failed");
            self.release_resources();
            return false;
        }

        self.pipeline = device.create_pipeline(&PipelineDescriptor {
            name: "path_trace",
            data: PATH_TRACE_WGSL.as_bytes(),
            entry_points: &["trace"],
            force_recompile: false,
        });
        if !self.pipeline.is_valid() {
            self.last_error = Some("kernel compilation failed");
            self.release_resources();
            return false;
        }
        true
    }

    fn start(&mut self, options: &Options, preview: bool) {
        if !self.state.is_editable() {
            tracing::warn!(state = %self.state, "start ignored outside an editable state");
            return;
        }
        if !self.can_run() {
            tracing::warn!("start ignored: no scene or no device");
            return;
        }
        self.options = options.clone();
        self.last_error = None;
        let scene = match self.ctx.scene() {
            Some(scene) => scene,
            None => return,
        };

        self.camera_film.resize(self.output_size, 1);
        self.light_film.resize(self.output_size, 1);
        self.readback =
            vec![0u8; (self.output_size.x as usize) * (self.output_size.y as usize) * 16];

        if !self.prepare_gpu(&scene) {
            tracing::warn!(error = self.last_error, "GPU setup failed, staying stopped");
            return;
        }
        self.scene = Some(scene);
        self.frame = 0;
        self.failed_launches = 0;
        self.target_frames = if preview {
            PREVIEW_SPP
        } else {
            self.options.get_integer("samples", 256)
        };
        self.started = Instant::now();
        self.completed_in = None;
        self.state = if preview {
            IntegratorState::Preview
        } else {
            IntegratorState::Running
        };
        tracing::info!(
            target = self.target_frames,
            size = ?self.output_size,
            preview,
            "gpu path tracer started"
        );
    }

    /// One kernel launch plus readback; false when the frame was skipped.
    fn render_frame(&mut self) -> bool {
        let Some(scene) = self.scene.clone() else {
            return false;
        };
        let dims = self.output_size;
        let aspect = dims.x as f32 / dims.y.max(1) as f32;
        let camera = scene.camera();
        let forward = (camera.target - camera.position).normalize();
        let right = forward.cross(camera.up).normalize();
        let up = right.cross(forward);

        let Some(device) = self.device.as_mut() else {
            return false;
        };
        let params = TraceParams {
            cam_pos: camera.position.to_array(),
            frame: self.frame + 1,
            cam_forward: forward.to_array(),
            accum_ptr: device.get_buffer_device_pointer(self.accum_buffer) as u32,
            cam_right: right.to_array(),
            accel_ptr: device.get_acceleration_structure_device_pointer(self.accel) as u32,
            cam_up: up.to_array(),
            shading_ptr: device.get_buffer_device_pointer(self.shading_buffer) as u32,
            tan_half_fov: (camera.fov_y.to_radians() * 0.5).tan(),
            aspect,
            width: dims.x,
            height: dims.y,
            max_depth: self.options.get_integer("max bounces", 6),
            _pad: [0; 3],
        };

        let ptr = device.upload_to_shared_buffer(self.params_ptr, bytemuck::bytes_of(&params));
        if ptr == 0 {
            return false;
        }
        self.params_ptr = ptr;

        if !device.launch(
            self.pipeline,
            "trace",
            dims.x,
            dims.y,
            ptr,
            std::mem::size_of::<TraceParams>() as u64,
        ) {
            return false;
        }
        self.frame += 1;

        if !device.copy_from_buffer(self.accum_buffer, &mut self.readback, 0) {
            return false;
        }
        write_image(&self.camera_film, &self.readback);
        true
    }

    /// Optional denoise pass over the finished accumulation.
    fn denoise_result(&mut self) {
        if !self.options.get_boolean("denoise", true) {
            return;
        }
        let dims = self.output_size;
        let Some(device) = self.device.as_mut() else {
            return;
        };
        if !self.denoised_buffer.is_valid() {
            self.denoised_buffer =
                device.create_buffer(&BufferDescriptor::sized(self.readback.len() as u64));
        }
        if !self.denoised_buffer.is_valid() || !device.setup_denoiser(dims.x, dims.y) {
            self.last_error = Some("denoiser unavailable");
            return;
        }
        let input = device.get_buffer_device_pointer(self.accum_buffer);
        let output = device.get_buffer_device_pointer(self.denoised_buffer);
        if !device.denoise(input, output) {
            self.last_error = Some("denoise dispatch failed");
            return;
        }
        if device.copy_from_buffer(self.denoised_buffer, &mut self.readback, 0) {
            write_image(&self.camera_film, &self.readback);
        }
    }

    fn finish(&mut self) {
        self.completed_in = Some(self.started.elapsed().as_secs_f32());
        self.state = IntegratorState::Stopped;
        tracing::info!(
            spp = self.frame,
            seconds = self.completed_in.unwrap_or(0.0),
            "gpu path tracer finished"
        );
    }
}

impl Integrator for GpuPathTracer {
    fn name(&self) -> &'static str {
        "gpu-path"
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
    }

    fn state(&self) -> IntegratorState {
        self.state
    }

    fn can_run(&self) -> bool {
        self.ctx.has_scene()
            && self
                .device
                .as_ref()
                .is_some_and(|d| d.rendering_enabled())
    }

    fn set_output_size(&mut self, size: UVec2) {
        if !self.state.is_editable() {
            tracing::debug!(state = %self.state, "set_output_size rejected");
            return;
        }
        self.output_size = size;
        // Image queries between here and the next start already see the new
        // dimensions.
        if self.camera_film.dimensions() != size {
            self.camera_film.resize(size, 1);
            self.light_film.resize(size, 1);
        }
    }

    fn preview(&mut self, options: &Options) {
        if self.state == IntegratorState::Preview {
            self.state = IntegratorState::Stopped;
        }
        self.start(options, true);
    }

    fn run(&mut self, options: &Options) {
        if self.state == IntegratorState::Preview {
            self.state = IntegratorState::Stopped;
        }
        self.start(options, false);
    }

    fn stop(&mut self, mode: StopMode) {
        if self.state == IntegratorState::Stopped {
            return;
        }
        match mode {
            // A dispatched kernel is not preemptible, but between updates
            // nothing is in flight, so immediate really is immediate.
            StopMode::Immediate => {
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
                if self.frame >= self.target_frames {
                    // Preview idles at its cap; Running finishes below.
                    if self.state == IntegratorState::Running {
                        self.denoise_result();
                        self.finish();
                    }
                    return;
                }
                if self.render_frame() {
                    self.failed_launches = 0;
                    if self.frame >= self.target_frames && self.state == IntegratorState::Running {
                        self.denoise_result();
                        self.finish();
                    }
                } else {
                    self.failed_launches += 1;
                    self.last_error = Some("GPU frame skipped");
                    if self.failed_launches >= 3 {
                        tracing::warn!("repeated launch failures, stopping render");
                        self.last_error = Some("GPU dispatch failed");
                        self.finish();
                    }
                }
            }
            IntegratorState::WaitingForCompletion => self.finish(),
        }
    }

    fn get_camera_image(&mut self, force_update: bool) -> &[Vec4] {
        self.camera_snapshot.get(&self.camera_film, force_update)
    }

    fn get_light_image(&mut self, force_update: bool) -> &[Vec4] {
        self.light_snapshot.get(&self.light_film, force_update)
    }

    fn status(&self) -> String {
        if let Some(error) = self.last_error {
            return format!("{} spp ({})", self.frame, error);
        }
        match self.completed_in {
            Some(seconds) => format!("{} spp (done in {:.1} s)", self.frame, seconds),
            None => format!("{} spp", self.frame),
        }
    }

    fn debug_info(&self) -> Vec<DebugInfo> {
        vec![
            DebugInfo::new("frame", self.frame),
            DebugInfo::new("device", self.device.is_some()),
            DebugInfo::new("pipeline", self.pipeline.is_valid()),
            DebugInfo::new("accel", self.accel.is_valid()),
        ]
    }
}

impl Drop for GpuPathTracer {
    fn drop(&mut self) {
        self.release_resources();
    }
}

/// Stores the device's running-mean accumulation into the film.
fn write_image(film: &Film, raw: &[u8]) {
    let dims = film.dimensions();
    let values: &[[f32; 4]] = bytemuck::cast_slice(raw);
    for y in 0..dims.y {
        for x in 0..dims.x {
            let v = values[(y * dims.x + x) as usize];
            film.accumulate(Vec4::from_array(v), UVec2::new(x, y), 1.0);
        }
    }
    film.mark_dirty();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trace_params_layout_matches_kernel() {
        // The WGSL side reads these fields by byte offset.
        assert_eq!(std::mem::size_of::<TraceParams>(), 96);
        assert_eq!(std::mem::offset_of!(TraceParams, frame), 12);
        assert_eq!(std::mem::offset_of!(TraceParams, accum_ptr), 28);
        assert_eq!(std::mem::offset_of!(TraceParams, accel_ptr), 44);
        assert_eq!(std::mem::offset_of!(TraceParams, shading_ptr), 60);
        assert_eq!(std::mem::offset_of!(TraceParams, tan_half_fov), 64);
        assert_eq!(std::mem::offset_of!(TraceParams, width), 72);
        assert_eq!(std::mem::offset_of!(TraceParams, max_depth), 80);
    }
}
