//! wgpu compute back end.
//!
//! Every allocation lives inside one storage buffer (the heap); a
//! [`DevicePointer`] is a byte offset into it. Kernels see two bindings: the
//! heap as `array<u32>` and a small uniform carrying the parameter pointer
//! and grid size. That keeps the dispatch ABI identical for every pipeline,
//! so one bind group serves all of them.
//!
//! All failure at this boundary is sentinel handles and `false` returns;
//! wgpu validation errors are caught with error scopes instead of the
//! default panic hook.

use super::{
    AccelDescriptor, AccelHandle, BufferDescriptor, BufferHandle, DevicePointer, GpuDevice,
    HeapAllocator, HeapBlock, PipelineDescriptor, PipelineHandle, SlotTable,
};
use crate::accel::{build_bvh, Aabb};
use crate::rt::TaskScheduler;
use crate::util::Vec3;
use bytemuck::{Pod, Zeroable};
use smallvec::SmallVec;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

/// Device heap size; fits the default `max_storage_buffer_binding_size`.
const HEAP_SIZE: u64 = 128 << 20;

/// Must match `@workgroup_size` in every kernel.
const WORKGROUP_SIZE: u32 = 8;

const DENOISE_WGSL: &str = include_str!("denoise.wgsl");

/// Grid/parameter uniform bound at `@binding(1)` of every dispatch.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct LaunchUniform {
    params_ptr: u32,
    params_size: u32,
    dim_x: u32,
    dim_y: u32,
}

/// Packed triangle for kernel-side intersection; `v0.w` carries the original
/// primitive index as bits.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct GpuTriangle {
    v0: [f32; 4],
    v1: [f32; 4],
    v2: [f32; 4],
}

/// Acceleration-structure header, the block a kernel starts traversal from.
#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct AccelHeader {
    nodes_ptr: u32,
    node_count: u32,
    triangles_ptr: u32,
    triangle_count: u32,
}

struct PipelineEntry {
    name: String,
    pipelines: HashMap<String, wgpu::ComputePipeline>,
}

struct AccelResource {
    header: HeapBlock,
    nodes: HeapBlock,
    triangles: HeapBlock,
}

struct Denoiser {
    pipeline: PipelineHandle,
    dim_x: u32,
    dim_y: u32,
    params_ptr: DevicePointer,
}

/// Creates the wgpu device, or `None` when no usable adapter exists (or GPU
/// use is disabled via `HELIOS_NO_GPU`).
pub fn create_wgpu_device() -> Option<Box<dyn GpuDevice>> {
    if std::env::var_os("HELIOS_NO_GPU").is_some() {
        tracing::info!("GPU disabled by HELIOS_NO_GPU");
        return None;
    }
    let device = WgpuDevice::new()?;
    Some(Box::new(device))
}

pub struct WgpuDevice {
    device: wgpu::Device,
    queue: wgpu::Queue,
    heap: wgpu::Buffer,
    allocator: HeapAllocator,
    buffers: SlotTable<HeapBlock>,
    pipelines: SlotTable<PipelineEntry>,
    accels: SlotTable<AccelResource>,
    /// Content-hash compilation cache.
    pipeline_cache: HashMap<u64, PipelineHandle>,
    /// Shared staging allocations, keyed by the pointer handed to callers.
    shared: HashMap<DevicePointer, HeapBlock>,
    bind_group: wgpu::BindGroup,
    pipeline_layout: wgpu::PipelineLayout,
    uniform: wgpu::Buffer,
    denoiser: Option<Denoiser>,
    rendering_enabled: bool,
}

impl WgpuDevice {
    fn new() -> Option<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());
        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .map_err(|e| tracing::warn!(error = %e, "no GPU adapter"))
        .ok()?;

        let info = adapter.get_info();
        tracing::info!(name = %info.name, backend = ?info.backend, "GPU adapter selected");

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("helios_device"),
            ..Default::default()
        }))
        .map_err(|e| tracing::warn!(error = %e, "device creation failed"))
        .ok()?;

        let heap = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("helios_heap"),
            size: HEAP_SIZE,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_DST
                | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });

        let uniform = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("helios_launch_uniform"),
            size: std::mem::size_of::<LaunchUniform>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("helios_heap_layout"),
            entries: &[
                // @binding(0) the heap
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Storage { read_only: false },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                // @binding(1) launch uniform
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("helios_heap_bind_group"),
            layout: &bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: heap.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: uniform.as_entire_binding(),
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("helios_pipeline_layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        Some(Self {
            device,
            queue,
            heap,
            allocator: HeapAllocator::new(HEAP_SIZE),
            buffers: SlotTable::new(),
            pipelines: SlotTable::new(),
            accels: SlotTable::new(),
            pipeline_cache: HashMap::new(),
            shared: HashMap::new(),
            bind_group,
            pipeline_layout,
            uniform,
            denoiser: None,
            rendering_enabled: std::env::var("HELIOS_GPU_RENDERING")
                .map_or(true, |v| v != "0"),
        })
    }

    fn buffer_block(&self, handle: BufferHandle) -> Option<HeapBlock> {
        if !handle.is_valid() {
            return None;
        }
        let (index, generation) = handle.parts();
        self.buffers.get(index, generation).copied()
    }

    /// Synchronous heap readback through a transient staging buffer.
    fn read_heap(&self, offset: u64, dst: &mut [u8]) -> bool {
        if dst.is_empty() {
            return true;
        }
        // Copy sizes must be 4-aligned; blocks are 256-aligned so padding is
        // always in range.
        let copy_size = (dst.len() as u64).next_multiple_of(4);
        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("helios_readback"),
            size: copy_size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("helios_readback_copy"),
            });
        encoder.copy_buffer_to_buffer(&self.heap, offset, &staging, 0, copy_size);
        self.queue.submit(Some(encoder.finish()));

        let (tx, rx) = std::sync::mpsc::channel();
        staging.slice(..).map_async(wgpu::MapMode::Read, move |res| {
            let _ = tx.send(res);
        });
        if self.device.poll(wgpu::PollType::wait_indefinitely()).is_err() {
            tracing::warn!("device poll failed during readback");
            return false;
        }
        match rx.recv() {
            Ok(Ok(())) => {
                let view = staging.slice(..).get_mapped_range();
                dst.copy_from_slice(&view[..dst.len()]);
                true
            }
            _ => {
                tracing::warn!("readback mapping failed");
                false
            }
        }
    }

    /// Cache key over source bytes and the entry-point list. Two descriptors
    /// can share one source while exposing different entries, so the source
    /// alone is not enough.
    fn hash_descriptor(desc: &PipelineDescriptor) -> u64 {
        let mut hasher = DefaultHasher::new();
        desc.data.hash(&mut hasher);
        for entry in desc.entry_points {
            entry.hash(&mut hasher);
        }
        hasher.finish()
    }

    /// Compiles a module and one compute pipeline per entry point inside a
    /// validation error scope.
    #[tracing::instrument(skip_all, fields(name = desc.name))]
    fn compile(&mut self, desc: &PipelineDescriptor) -> Option<PipelineEntry> {
        let source = match std::str::from_utf8(desc.data) {
            Ok(s) => s,
            Err(_) => {
                tracing::warn!(name = desc.name, "kernel source is not UTF-8");
                return None;
            }
        };

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = self
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: Some(desc.name),
                source: wgpu::ShaderSource::Wgsl(source.into()),
            });

        let mut pipelines = HashMap::new();
        for &entry in desc.entry_points {
            let pipeline = self
                .device
                .create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                    label: Some(&format!("{}::{}", desc.name, entry)),
                    layout: Some(&self.pipeline_layout),
                    module: &module,
                    entry_point: Some(entry),
                    compilation_options: Default::default(),
                    cache: None,
                });
            pipelines.insert(entry.to_string(), pipeline);
        }

        if let Some(error) = pollster::block_on(self.device.pop_error_scope()) {
            tracing::warn!(name = desc.name, %error, "kernel compilation failed");
            return None;
        }
        Some(PipelineEntry {
            name: desc.name.to_string(),
            pipelines,
        })
    }

    /// One validation-scoped submit; true when wgpu accepted it.
    fn submit_checked(&self, encoder: wgpu::CommandEncoder) -> bool {
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        self.queue.submit(Some(encoder.finish()));
        match pollster::block_on(self.device.pop_error_scope()) {
            None => true,
            Some(error) => {
                tracing::warn!(%error, "dispatch rejected");
                false
            }
        }
    }
}

impl GpuDevice for WgpuDevice {
    fn create_buffer(&mut self, desc: &BufferDescriptor) -> BufferHandle {
        let size = desc.data.map_or(desc.size, |d| d.len() as u64);
        let Some(block) = self.allocator.allocate(size) else {
            tracing::warn!(size, "heap exhausted");
            return BufferHandle::INVALID;
        };
        if let Some(data) = desc.data {
            if !data.is_empty() {
                self.queue.write_buffer(&self.heap, block.offset, data);
            }
        }
        let (index, generation) = self.buffers.insert(block);
        BufferHandle::new(index, generation)
    }

    fn destroy_buffer(&mut self, handle: BufferHandle) {
        if !handle.is_valid() {
            return;
        }
        let (index, generation) = handle.parts();
        if let Some(block) = self.buffers.remove(index, generation) {
            self.allocator.free(block);
        }
    }

    fn get_buffer_device_pointer(&self, handle: BufferHandle) -> DevicePointer {
        self.buffer_block(handle).map_or(0, |b| b.offset)
    }

    fn upload_to_shared_buffer(&mut self, ptr: DevicePointer, data: &[u8]) -> DevicePointer {
        let block = match self.shared.get(&ptr) {
            Some(block) if data.len() as u64 <= block.size => *block,
            Some(&old) => {
                // Outgrown; move to a bigger block.
                self.shared.remove(&ptr);
                self.allocator.free(old);
                let Some(block) = self.allocator.allocate(data.len() as u64) else {
                    return 0;
                };
                self.shared.insert(block.offset, block);
                block
            }
            None if ptr == 0 => {
                let Some(block) = self.allocator.allocate(data.len() as u64) else {
                    return 0;
                };
                self.shared.insert(block.offset, block);
                block
            }
            None => {
                tracing::warn!(ptr, "unknown shared-buffer pointer");
                return 0;
            }
        };
        if !data.is_empty() {
            self.queue.write_buffer(&self.heap, block.offset, data);
        }
        block.offset
    }

    fn copy_to_buffer(&mut self, handle: BufferHandle, data: &[u8], offset: u64) -> DevicePointer {
        let Some(block) = self.buffer_block(handle) else {
            return 0;
        };
        if offset + data.len() as u64 > block.size {
            tracing::warn!(offset, len = data.len(), size = block.size, "write out of range");
            return 0;
        }
        if !data.is_empty() {
            self.queue.write_buffer(&self.heap, block.offset + offset, data);
        }
        block.offset + offset
    }

    fn copy_from_buffer(&mut self, handle: BufferHandle, dst: &mut [u8], offset: u64) -> bool {
        let Some(block) = self.buffer_block(handle) else {
            return false;
        };
        if offset + dst.len() as u64 > block.size {
            return false;
        }
        self.read_heap(block.offset + offset, dst)
    }

    fn clear_buffer(&mut self, handle: BufferHandle) -> bool {
        let Some(block) = self.buffer_block(handle) else {
            return false;
        };
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("helios_clear"),
            });
        encoder.clear_buffer(&self.heap, block.offset, Some(block.size));
        self.queue.submit(Some(encoder.finish()));
        true
    }

    fn create_pipeline(&mut self, desc: &PipelineDescriptor) -> PipelineHandle {
        let hash = Self::hash_descriptor(desc);
        if !desc.force_recompile {
            if let Some(&cached) = self.pipeline_cache.get(&hash) {
                tracing::debug!(name = desc.name, "pipeline cache hit");
                return cached;
            }
        }
        let Some(entry) = self.compile(desc) else {
            return PipelineHandle::INVALID;
        };
        tracing::info!(
            name = desc.name,
            entry_points = entry.pipelines.len(),
            "pipeline compiled"
        );
        let (index, generation) = self.pipelines.insert(entry);
        let handle = PipelineHandle::new(index, generation);
        self.pipeline_cache.insert(hash, handle);
        handle
    }

    fn create_pipeline_from_file(&mut self, path: &Path, force_recompile: bool) -> PipelineHandle {
        let data = match std::fs::read(path) {
            Ok(data) => data,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "kernel file read failed");
                return PipelineHandle::INVALID;
            }
        };
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("kernel");
        let entry_points = default_entry_points(&data);
        self.create_pipeline(&PipelineDescriptor {
            name,
            data: &data,
            entry_points: &entry_points,
            force_recompile,
        })
    }

    fn create_pipeline_from_files(
        &mut self,
        scheduler: &TaskScheduler,
        paths: &[PathBuf],
        force_recompile: bool,
    ) -> Vec<PipelineHandle> {
        // File loading fans out on the pool; compilation stays on this
        // thread since the device is not reentrant by contract.
        let sources: std::sync::Arc<parking_lot::Mutex<Vec<Option<Vec<u8>>>>> =
            std::sync::Arc::new(parking_lot::Mutex::new(vec![None; paths.len()]));
        let paths_owned: std::sync::Arc<Vec<PathBuf>> = std::sync::Arc::new(paths.to_vec());

        let handle = {
            let sources = std::sync::Arc::clone(&sources);
            let paths = std::sync::Arc::clone(&paths_owned);
            scheduler.schedule(paths_owned.len() as u32, move |task| {
                let path = &paths[task.unit as usize];
                match std::fs::read(path) {
                    Ok(data) => sources.lock()[task.unit as usize] = Some(data),
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "kernel file read failed")
                    }
                }
            })
        };
        while !handle.is_complete() {
            std::thread::yield_now();
        }

        let sources = sources.lock();
        paths
            .iter()
            .zip(sources.iter())
            .map(|(path, source)| match source {
                Some(data) => {
                    let name = path
                        .file_stem()
                        .and_then(|s| s.to_str())
                        .unwrap_or("kernel");
                    self.create_pipeline(&PipelineDescriptor {
                        name,
                        data,
                        entry_points: &default_entry_points(data),
                        force_recompile,
                    })
                }
                None => PipelineHandle::INVALID,
            })
            .collect()
    }

    fn destroy_pipeline(&mut self, handle: PipelineHandle) {
        if !handle.is_valid() {
            return;
        }
        let (index, generation) = handle.parts();
        if self.pipelines.remove(index, generation).is_some() {
            self.pipeline_cache.retain(|_, &mut h| h != handle);
        }
    }

    fn create_acceleration_structure(&mut self, desc: &AccelDescriptor) -> AccelHandle {
        if !accel_layout_is_well_formed(desc) {
            tracing::warn!(
                vertex_stride = desc.vertex_stride,
                index_stride = desc.index_stride,
                "malformed acceleration structure layout rejected"
            );
            return AccelHandle::INVALID;
        }
        let Some(vertex_block) = self.buffer_block(desc.vertex_buffer) else {
            return AccelHandle::INVALID;
        };
        let Some(index_block) = self.buffer_block(desc.index_buffer) else {
            return AccelHandle::INVALID;
        };
        let vertex_bytes = desc.vertex_stride * desc.vertex_count as u64;
        let index_bytes = desc.index_stride * desc.triangle_count as u64 * 3;
        if vertex_bytes > vertex_block.size || index_bytes > index_block.size {
            tracing::warn!("acceleration structure descriptor exceeds its buffers");
            return AccelHandle::INVALID;
        }

        // The build runs on the host over data read back from the heap; the
        // heap is the source of truth, not whatever the caller uploaded.
        let mut raw_vertices = vec![0u8; vertex_bytes as usize];
        let mut raw_indices = vec![0u8; index_bytes as usize];
        if !self.read_heap(vertex_block.offset, &mut raw_vertices)
            || !self.read_heap(index_block.offset, &mut raw_indices)
        {
            return AccelHandle::INVALID;
        }

        let position_at = |i: u32| -> Vec3 {
            let at = (i as u64 * desc.vertex_stride) as usize;
            let x = f32::from_le_bytes(raw_vertices[at..at + 4].try_into().unwrap());
            let y = f32::from_le_bytes(raw_vertices[at + 4..at + 8].try_into().unwrap());
            let z = f32::from_le_bytes(raw_vertices[at + 8..at + 12].try_into().unwrap());
            Vec3::new(x, y, z)
        };
        let index_at = |i: u32| -> u32 {
            let at = (i as u64 * desc.index_stride) as usize;
            u32::from_le_bytes(raw_indices[at..at + 4].try_into().unwrap())
        };

        let mut corners = Vec::with_capacity(desc.triangle_count as usize);
        let mut bounds = Vec::with_capacity(desc.triangle_count as usize);
        for tri in 0..desc.triangle_count {
            let (i0, i1, i2) = (index_at(tri * 3), index_at(tri * 3 + 1), index_at(tri * 3 + 2));
            if i0.max(i1).max(i2) >= desc.vertex_count {
                tracing::warn!(tri, "index out of range, structure rejected");
                return AccelHandle::INVALID;
            }
            let (v0, v1, v2) = (position_at(i0), position_at(i1), position_at(i2));
            corners.push((v0, v1, v2));
            bounds.push(Aabb::from_triangle(v0, v1, v2));
        }

        let bvh = build_bvh(&bounds);

        // Leaves index triangles contiguously, so pack them in BVH order and
        // keep the original primitive id in v0.w for shading lookups.
        let packed: Vec<GpuTriangle> = bvh
            .order
            .iter()
            .map(|&prim| {
                let (v0, v1, v2) = corners[prim as usize];
                GpuTriangle {
                    v0: [v0.x, v0.y, v0.z, f32::from_bits(prim)],
                    v1: [v1.x, v1.y, v1.z, 0.0],
                    v2: [v2.x, v2.y, v2.z, 0.0],
                }
            })
            .collect();

        let node_bytes: &[u8] = bytemuck::cast_slice(&bvh.nodes);
        let tri_bytes: &[u8] = bytemuck::cast_slice(&packed);

        let Some(nodes) = self.allocator.allocate(node_bytes.len() as u64) else {
            return AccelHandle::INVALID;
        };
        let Some(triangles) = self.allocator.allocate(tri_bytes.len().max(1) as u64) else {
            self.allocator.free(nodes);
            return AccelHandle::INVALID;
        };
        let Some(header) = self
            .allocator
            .allocate(std::mem::size_of::<AccelHeader>() as u64)
        else {
            self.allocator.free(nodes);
            self.allocator.free(triangles);
            return AccelHandle::INVALID;
        };

        self.queue.write_buffer(&self.heap, nodes.offset, node_bytes);
        if !tri_bytes.is_empty() {
            self.queue.write_buffer(&self.heap, triangles.offset, tri_bytes);
        }
        self.queue.write_buffer(
            &self.heap,
            header.offset,
            bytemuck::bytes_of(&AccelHeader {
                nodes_ptr: nodes.offset as u32,
                node_count: bvh.nodes.len() as u32,
                triangles_ptr: triangles.offset as u32,
                triangle_count: packed.len() as u32,
            }),
        );

        tracing::debug!(
            triangles = packed.len(),
            nodes = bvh.nodes.len(),
            "acceleration structure built"
        );
        let (index, generation) = self.accels.insert(AccelResource {
            header,
            nodes,
            triangles,
        });
        AccelHandle::new(index, generation)
    }

    fn get_acceleration_structure_device_pointer(&self, handle: AccelHandle) -> DevicePointer {
        if !handle.is_valid() {
            return 0;
        }
        let (index, generation) = handle.parts();
        self.accels
            .get(index, generation)
            .map_or(0, |a| a.header.offset)
    }

    fn destroy_acceleration_structure(&mut self, handle: AccelHandle) {
        if !handle.is_valid() {
            return;
        }
        let (index, generation) = handle.parts();
        if let Some(res) = self.accels.remove(index, generation) {
            self.allocator.free(res.header);
            self.allocator.free(res.nodes);
            self.allocator.free(res.triangles);
        }
    }

    fn launch(
        &mut self,
        pipeline: PipelineHandle,
        function: &str,
        dim_x: u32,
        dim_y: u32,
        params_ptr: DevicePointer,
        params_size: u64,
    ) -> bool {
        if !pipeline.is_valid() || dim_x == 0 || dim_y == 0 {
            return false;
        }
        let (index, generation) = pipeline.parts();
        let Some(entry) = self.pipelines.get(index, generation) else {
            return false;
        };
        let Some(compute) = entry.pipelines.get(function) else {
            tracing::warn!(name = entry.name, function, "unknown entry point");
            return false;
        };

        self.queue.write_buffer(
            &self.uniform,
            0,
            bytemuck::bytes_of(&LaunchUniform {
                params_ptr: params_ptr as u32,
                params_size: params_size as u32,
                dim_x,
                dim_y,
            }),
        );

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("helios_launch"),
            });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(function),
                timestamp_writes: None,
            });
            pass.set_pipeline(compute);
            pass.set_bind_group(0, &self.bind_group, &[]);
            pass.dispatch_workgroups(
                dim_x.div_ceil(WORKGROUP_SIZE),
                dim_y.div_ceil(WORKGROUP_SIZE),
                1,
            );
        }
        self.submit_checked(encoder)
    }

    fn setup_denoiser(&mut self, dim_x: u32, dim_y: u32) -> bool {
        if dim_x == 0 || dim_y == 0 {
            return false;
        }
        let pipeline = match &self.denoiser {
            Some(d) if d.pipeline.is_valid() => d.pipeline,
            _ => self.create_pipeline(&PipelineDescriptor {
                name: "denoise",
                data: DENOISE_WGSL.as_bytes(),
                entry_points: &["atrous"],
                force_recompile: false,
            }),
        };
        if !pipeline.is_valid() {
            return false;
        }
        let params_ptr = self
            .denoiser
            .take()
            .map_or(0, |d| d.params_ptr);
        self.denoiser = Some(Denoiser {
            pipeline,
            dim_x,
            dim_y,
            params_ptr,
        });
        true
    }

    fn denoise(&mut self, input: DevicePointer, output: DevicePointer) -> bool {
        let Some(denoiser) = self.denoiser.as_ref() else {
            tracing::debug!("denoise called before setup");
            return false;
        };
        let (pipeline, dim_x, dim_y, params_ptr) = (
            denoiser.pipeline,
            denoiser.dim_x,
            denoiser.dim_y,
            denoiser.params_ptr,
        );
        if input == 0 || output == 0 {
            return false;
        }

        let params: [u32; 4] = [input as u32, output as u32, dim_x, dim_y];
        let ptr = self.upload_to_shared_buffer(params_ptr, bytemuck::bytes_of(&params));
        if ptr == 0 {
            return false;
        }
        if let Some(d) = self.denoiser.as_mut() {
            d.params_ptr = ptr;
        }
        self.launch(pipeline, "atrous", dim_x, dim_y, ptr, 16)
    }

    fn rendering_enabled(&self) -> bool {
        self.rendering_enabled
    }
}

/// Pulls `@compute` entry point names out of WGSL source, for the file-based
/// creation paths where the caller never states them.
/// Layout sanity for an acceleration-structure descriptor. A vertex stride
/// below one `[f32; 3]` position or an index stride below one `u32` would
/// make the readback unparseable, so such descriptors never reach the heap.
fn accel_layout_is_well_formed(desc: &AccelDescriptor) -> bool {
    if desc.vertex_stride < 12 {
        return false;
    }
    desc.triangle_count == 0 || (desc.index_stride >= 4 && desc.vertex_count > 0)
}

fn default_entry_points(data: &[u8]) -> SmallVec<[&str; 4]> {
    let Ok(source) = std::str::from_utf8(data) else {
        return SmallVec::new();
    };
    let mut names = SmallVec::new();
    let mut pending = false;
    for line in source.lines() {
        let line = line.trim();
        if line.contains("@compute") {
            pending = true;
        }
        if pending {
            if let Some(rest) = line.split("fn ").nth(1) {
                let name = rest
                    .split(|c: char| c == '(' || c.is_whitespace())
                    .next()
                    .unwrap_or("");
                if !name.is_empty() {
                    names.push(name);
                }
                pending = false;
            }
        }
    }
    names
}
