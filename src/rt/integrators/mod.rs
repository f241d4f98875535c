//! Shipped integrators.
//!
//! - [`CpuAtmosphere`] — single-scattering sky raymarcher on the worker pool
//! - [`CpuLightTracer`] — photon splatting through the film's contention path
//! - [`GpuPathTracer`] — compute path tracer driving a [`crate::gpu::GpuDevice`]

mod atmosphere;
mod light_tracer;

#[cfg(feature = "gpu")]
mod gpu_path;

pub use atmosphere::CpuAtmosphere;
pub use light_tracer::CpuLightTracer;

#[cfg(feature = "gpu")]
pub use gpu_path::GpuPathTracer;

use crate::rt::{Integrator, RtContext};
use crate::util::{Error, Result};

/// Integrator names accepted by [`create_integrator`], in display order.
pub fn integrator_names() -> Vec<&'static str> {
    let mut names = vec!["atmosphere", "light-tracer"];
    if cfg!(feature = "gpu") {
        names.push("gpu-path");
    }
    names
}

/// Constructs an integrator by name.
pub fn create_integrator(name: &str, ctx: RtContext) -> Result<Box<dyn Integrator>> {
    match name {
        "atmosphere" => Ok(Box::new(CpuAtmosphere::new(ctx))),
        "light-tracer" => Ok(Box::new(CpuLightTracer::new(ctx))),
        #[cfg(feature = "gpu")]
        "gpu-path" => Ok(Box::new(GpuPathTracer::new(ctx))),
        _ => Err(Error::UnknownIntegrator(name.to_string())),
    }
}

/// PCG32: small, fast, decorrelated per-(pixel, pass) streams.
#[derive(Debug, Clone)]
pub(crate) struct Pcg32 {
    state: u64,
    inc: u64,
}

impl Pcg32 {
    pub fn new(seed: u64, stream: u64) -> Self {
        let mut rng = Self {
            state: 0,
            inc: (stream << 1) | 1,
        };
        rng.next_u32();
        rng.state = rng.state.wrapping_add(seed);
        rng.next_u32();
        rng
    }

    pub fn next_u32(&mut self) -> u32 {
        let old = self.state;
        self.state = old
            .wrapping_mul(6364136223846793005)
            .wrapping_add(self.inc);
        let xorshifted = (((old >> 18) ^ old) >> 27) as u32;
        let rot = (old >> 59) as u32;
        xorshifted.rotate_right(rot)
    }

    /// Uniform in [0, 1).
    pub fn next_f32(&mut self) -> f32 {
        (self.next_u32() >> 8) as f32 * (1.0 / (1 << 24) as f32)
    }
}
