//! Whole-device handle discipline. These need a working adapter, so each
//! test is ignored by default; run with `cargo test -- --ignored` on a host
//! with a GPU. Slot-table and heap-allocator discipline is unit-tested
//! host-side next to the code.
#![cfg(feature = "gpu")]

use helios::gpu::{
    create_wgpu_device, BufferDescriptor, BufferHandle, GpuDevice, PipelineDescriptor,
    PipelineHandle,
};
use helios::rt::TaskScheduler;

fn device() -> Box<dyn GpuDevice> {
    create_wgpu_device().expect("adapter required; run with --ignored on a GPU host")
}

#[test]
#[ignore = "requires GPU"]
fn test_buffer_upload_roundtrip() {
    let mut dev = device();
    let data: Vec<u8> = (0..=255).collect();
    let buffer = dev.create_buffer(&BufferDescriptor::with_data(&data));
    assert!(buffer.is_valid());
    assert_ne!(dev.get_buffer_device_pointer(buffer), 0);

    let mut back = vec![0u8; data.len()];
    assert!(dev.copy_from_buffer(buffer, &mut back, 0));
    assert_eq!(back, data);

    // Offset reads see the tail.
    let mut tail = vec![0u8; 16];
    assert!(dev.copy_from_buffer(buffer, &mut tail, 240));
    assert_eq!(tail, data[240..]);

    dev.destroy_buffer(buffer);
}

#[test]
#[ignore = "requires GPU"]
fn test_zero_size_buffer_gets_a_valid_handle() {
    let mut dev = device();
    let empty = dev.create_buffer(&BufferDescriptor::sized(0));
    assert!(empty.is_valid(), "empty buffers are representable");
    assert_ne!(
        dev.get_buffer_device_pointer(empty),
        0,
        "even an empty buffer has a distinct device pointer"
    );

    // Reading zero bytes succeeds; bounds are block-granular, so a read
    // past the backing block is rejected.
    let mut nothing = [];
    assert!(dev.copy_from_buffer(empty, &mut nothing, 0));
    let mut page = [0u8; 257];
    assert!(!dev.copy_from_buffer(empty, &mut page, 0));

    dev.destroy_buffer(empty);
}

#[test]
#[ignore = "requires GPU"]
fn test_sentinel_handles_are_rejected_without_side_effects() {
    let mut dev = device();

    assert_eq!(dev.get_buffer_device_pointer(BufferHandle::INVALID), 0);
    dev.destroy_buffer(BufferHandle::INVALID);
    dev.clear_buffer(BufferHandle::INVALID);
    let mut byte = [0u8; 1];
    assert!(!dev.copy_from_buffer(BufferHandle::INVALID, &mut byte, 0));
    assert_eq!(dev.copy_to_buffer(BufferHandle::INVALID, &byte, 0), 0);

    // Default handles are never-issued; same treatment.
    dev.destroy_buffer(BufferHandle::default());
    assert!(!dev.launch(PipelineHandle::default(), "main", 1, 1, 0, 0));

    // The device is still fully usable afterwards.
    let buffer = dev.create_buffer(&BufferDescriptor::sized(64));
    assert!(buffer.is_valid());
    dev.destroy_buffer(buffer);
}

#[test]
#[ignore = "requires GPU"]
fn test_pipeline_compile_and_dispatch() {
    const FILL: &str = r#"
@group(0) @binding(0) var<storage, read_write> heap: array<u32>;
struct Launch { params_ptr: u32, params_size: u32, dim_x: u32, dim_y: u32 }
@group(0) @binding(1) var<uniform> launch: Launch;

@compute @workgroup_size(8, 8)
fn fill(@builtin(global_invocation_id) gid: vec3<u32>) {
    if (gid.x >= launch.dim_x || gid.y >= launch.dim_y) { return; }
    let base = launch.params_ptr >> 2u;
    let out = heap[base] >> 2u;
    heap[out + gid.y * launch.dim_x + gid.x] = gid.y * launch.dim_x + gid.x;
}
"#;

    let mut dev = device();
    let pipeline = dev.create_pipeline(&PipelineDescriptor {
        name: "fill_test",
        data: FILL.as_bytes(),
        entry_points: &["fill"],
        force_recompile: true,
    });
    assert!(pipeline.is_valid());

    let output = dev.create_buffer(&BufferDescriptor::sized(16 * 16 * 4));
    let out_ptr = dev.get_buffer_device_pointer(output) as u32;
    let params = dev.upload_to_shared_buffer(0, &out_ptr.to_le_bytes());
    assert_ne!(params, 0);

    assert!(dev.launch(pipeline, "fill", 16, 16, params, 4));
    // Unknown entry point fails cleanly.
    assert!(!dev.launch(pipeline, "no_such_entry", 16, 16, params, 4));

    let mut back = vec![0u8; 16 * 16 * 4];
    assert!(dev.copy_from_buffer(output, &mut back, 0));
    let words: &[u32] = bytemuck::cast_slice(&back);
    for (i, w) in words.iter().enumerate() {
        assert_eq!(*w, i as u32);
    }

    dev.destroy_buffer(output);
    dev.destroy_pipeline(pipeline);
}

#[test]
#[ignore = "requires GPU"]
fn test_bad_kernel_source_yields_sentinel() {
    let mut dev = device();
    let pipeline = dev.create_pipeline(&PipelineDescriptor {
        name: "broken",
        data: b"fn this is not wgsl {",
        entry_points: &["main"],
        force_recompile: true,
    });
    assert!(!pipeline.is_valid());

    // And the failure leaves the device usable.
    let buffer = dev.create_buffer(&BufferDescriptor::sized(32));
    assert!(buffer.is_valid());
    dev.destroy_buffer(buffer);
}

#[test]
#[ignore = "requires GPU"]
fn test_pipeline_from_files_on_disk() {
    const TOUCH: &str = r#"
@group(0) @binding(0) var<storage, read_write> heap: array<u32>;
struct Launch { params_ptr: u32, params_size: u32, dim_x: u32, dim_y: u32 }
@group(0) @binding(1) var<uniform> launch: Launch;

@compute @workgroup_size(8, 8)
fn touch(@builtin(global_invocation_id) gid: vec3<u32>) {
    if (gid.x == 0u && gid.y == 0u) {
        heap[launch.params_ptr / 4u] = 1u;
    }
}
"#;

    let dir = tempfile::tempdir().expect("tempdir");
    let good = dir.path().join("touch.wgsl");
    std::fs::write(&good, TOUCH).expect("write kernel");
    let missing = dir.path().join("does_not_exist.wgsl");

    let mut dev = device();
    let single = dev.create_pipeline_from_file(&good, false);
    assert!(single.is_valid(), "entry points are scanned from the source");

    let scheduler = TaskScheduler::with_threads(2);
    let batch =
        dev.create_pipeline_from_files(&scheduler, &[good.clone(), missing], false);
    assert_eq!(batch.len(), 2);
    assert_eq!(batch[0], single, "same source hits the content-hash cache");
    assert!(!batch[1].is_valid(), "unreadable files yield the invalid handle");

    dev.destroy_pipeline(single);
}
