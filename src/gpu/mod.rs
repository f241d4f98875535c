//! Device abstraction for GPU integrators.
//!
//! Integrators talk to a [`GpuDevice`] through opaque integer handles and
//! [`DevicePointer`] byte offsets, never to a vendor API. The shipped back
//! end ([`create_wgpu_device`], feature `gpu`) sub-allocates every resource
//! from one storage buffer (the heap) and binds that buffer to every kernel,
//! so a device pointer is simply an offset a kernel indexes with.
//!
//! Failure signaling at this boundary is deliberate: creation returns the
//! invalid handle, dispatch returns `false`. A caller skips the resource or
//! the frame and keeps the session alive; nothing here unwinds.

mod heap;

pub use heap::{HeapAllocator, HeapBlock, SlotTable, HEAP_ALIGNMENT};

#[cfg(feature = "gpu")]
mod wgpu_device;

#[cfg(feature = "gpu")]
pub use wgpu_device::create_wgpu_device;

/// Stub factory when the crate is built without the `gpu` feature; callers
/// already handle the no-device case.
#[cfg(not(feature = "gpu"))]
pub fn create_wgpu_device() -> Option<Box<dyn GpuDevice>> {
    None
}

use crate::rt::TaskScheduler;
use std::path::{Path, PathBuf};

/// Reserved slot index meaning "no resource".
pub const INVALID_HANDLE: u32 = u32::MAX;

/// Device-addressable byte offset into the device heap. `0` is never a live
/// allocation.
pub type DevicePointer = u64;

macro_rules! handle_type {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name {
            index: u32,
            generation: u32,
        }

        impl $name {
            pub const INVALID: Self = Self {
                index: INVALID_HANDLE,
                generation: 0,
            };

            #[inline]
            pub fn is_valid(self) -> bool {
                self.index != INVALID_HANDLE
            }

            /// Raw slot index, for boundaries that need a plain integer.
            #[inline]
            pub fn index(self) -> u32 {
                self.index
            }

            pub(crate) fn new(index: u32, generation: u32) -> Self {
                Self { index, generation }
            }

            pub(crate) fn parts(self) -> (u32, u32) {
                (self.index, self.generation)
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::INVALID
            }
        }
    };
}

handle_type! {
    /// Non-owning reference to a device buffer allocation.
    BufferHandle
}
handle_type! {
    /// Non-owning reference to a compiled kernel module.
    PipelineHandle
}
handle_type! {
    /// Non-owning reference to a device acceleration structure.
    AccelHandle
}

/// Requested buffer allocation, optionally pre-populated from host data.
#[derive(Debug, Default, Clone, Copy)]
pub struct BufferDescriptor<'a> {
    /// Size in bytes. When `data` is present its length wins.
    pub size: u64,
    pub data: Option<&'a [u8]>,
}

impl<'a> BufferDescriptor<'a> {
    pub fn sized(size: u64) -> Self {
        Self { size, data: None }
    }

    pub fn with_data(data: &'a [u8]) -> Self {
        Self {
            size: data.len() as u64,
            data: Some(data),
        }
    }
}

/// Kernel module to compile: raw WGSL bytes plus the entry points callers
/// will launch.
#[derive(Debug, Clone, Copy)]
pub struct PipelineDescriptor<'a> {
    /// Diagnostic label carried into device objects and log lines.
    pub name: &'a str,
    /// UTF-8 WGSL source.
    pub data: &'a [u8],
    pub entry_points: &'a [&'a str],
    /// Bypass the content-hash compilation cache.
    pub force_recompile: bool,
}

/// Geometry input for an acceleration-structure build: a vertex/index buffer
/// pair plus layout metadata.
#[derive(Debug, Clone, Copy)]
pub struct AccelDescriptor {
    pub vertex_buffer: BufferHandle,
    /// Bytes between consecutive vertex positions.
    pub vertex_stride: u64,
    pub vertex_count: u32,
    pub index_buffer: BufferHandle,
    /// Bytes between consecutive `u32` indices.
    pub index_stride: u64,
    pub triangle_count: u32,
}

/// Back-end-agnostic GPU device.
///
/// Dispatch is single-threaded by contract: all calls come from the
/// integrator's controlling thread. The device exclusively owns every
/// resource behind the handles it issues; dropping the device releases
/// whatever the caller leaked.
pub trait GpuDevice {
    /// Allocates device memory; [`BufferHandle::INVALID`] on exhaustion.
    /// A zero-size descriptor yields a valid handle to an empty buffer.
    fn create_buffer(&mut self, desc: &BufferDescriptor) -> BufferHandle;

    /// Releases a buffer. Invalid or stale handles are rejected without side
    /// effects.
    fn destroy_buffer(&mut self, handle: BufferHandle);

    /// Heap offset of the allocation, for kernel-side addressing. `0` for
    /// invalid handles.
    fn get_buffer_device_pointer(&self, handle: BufferHandle) -> DevicePointer;

    /// Writes `data` into the shared per-frame staging region. Pass `0` the
    /// first time to allocate; pass the returned pointer thereafter to
    /// reuse (the region grows when `data` outgrows it, so always keep the
    /// return value). `0` on allocation failure.
    fn upload_to_shared_buffer(&mut self, ptr: DevicePointer, data: &[u8]) -> DevicePointer;

    /// Uploads `data` at `offset` bytes into the buffer; returns the device
    /// pointer of the written region, `0` when rejected (invalid handle or
    /// out-of-range write).
    fn copy_to_buffer(&mut self, handle: BufferHandle, data: &[u8], offset: u64) -> DevicePointer;

    /// Synchronous readback of `dst.len()` bytes from `offset`. `false` when
    /// rejected or the device read fails.
    fn copy_from_buffer(&mut self, handle: BufferHandle, dst: &mut [u8], offset: u64) -> bool;

    /// Zeroes the allocation. `false` when rejected.
    fn clear_buffer(&mut self, handle: BufferHandle) -> bool;

    /// Compiles a kernel module and validates its entry points;
    /// [`PipelineHandle::INVALID`] on compile failure. Results are cached by
    /// a content hash of the source unless `force_recompile`.
    fn create_pipeline(&mut self, desc: &PipelineDescriptor) -> PipelineHandle;

    /// Reads and compiles one WGSL file.
    fn create_pipeline_from_file(&mut self, path: &Path, force_recompile: bool) -> PipelineHandle;

    /// Batch compile: source loading and hashing fan out on `scheduler`, and
    /// the call returns only once every file has compiled or failed. The
    /// result vector is parallel to `paths`; failed entries are the invalid
    /// handle.
    fn create_pipeline_from_files(
        &mut self,
        scheduler: &TaskScheduler,
        paths: &[PathBuf],
        force_recompile: bool,
    ) -> Vec<PipelineHandle>;

    fn destroy_pipeline(&mut self, handle: PipelineHandle);

    /// Builds a traversal structure from the described geometry and uploads
    /// it into the heap; [`AccelHandle::INVALID`] on failure.
    fn create_acceleration_structure(&mut self, desc: &AccelDescriptor) -> AccelHandle;

    /// Pointer to the structure's header block, for kernel traversal.
    fn get_acceleration_structure_device_pointer(&self, handle: AccelHandle) -> DevicePointer;

    fn destroy_acceleration_structure(&mut self, handle: AccelHandle);

    /// Invokes the named entry point over a `dim_x`×`dim_y` grid, passing
    /// the parameter blob by pointer and size. `false` means this frame's
    /// GPU work did not happen; partial completion is never assumed.
    fn launch(
        &mut self,
        pipeline: PipelineHandle,
        function: &str,
        dim_x: u32,
        dim_y: u32,
        params_ptr: DevicePointer,
        params_size: u64,
    ) -> bool;

    /// Prepares the denoiser for the given dimensions. Must be called before
    /// [`GpuDevice::denoise`] and again whenever dimensions change.
    fn setup_denoiser(&mut self, dim_x: u32, dim_y: u32) -> bool;

    /// Runs the denoiser from `input` to `output` (heap pointers to
    /// vec4-per-pixel images at the set-up dimensions). `false` when not set
    /// up or on dispatch failure.
    fn denoise(&mut self, input: DevicePointer, output: DevicePointer) -> bool;

    /// Whether the device is willing to do render work at all; drivers may
    /// disable it at creation time.
    fn rendering_enabled(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_handles_are_invalid() {
        assert!(!BufferHandle::default().is_valid());
        assert!(!PipelineHandle::default().is_valid());
        assert!(!AccelHandle::default().is_valid());
        assert_eq!(BufferHandle::INVALID.index(), INVALID_HANDLE);
    }

    #[test]
    fn test_handle_identity() {
        let a = BufferHandle::new(3, 1);
        let b = BufferHandle::new(3, 1);
        let stale = BufferHandle::new(3, 2);
        assert_eq!(a, b);
        assert_ne!(a, stale, "same slot, different generation");
        assert!(a.is_valid());
    }
}
