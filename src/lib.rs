//! # Helios
//!
//! Progressive physically-based renderer core combining CPU and GPU
//! ray-tracing back ends.
//!
//! The crate is built around three cooperating pieces:
//!
//! - [`film::Film`] - a thread-safe accumulation buffer holding the
//!   in-progress image; many workers add weighted radiance samples, a single
//!   consumer reads stable snapshots.
//! - [`gpu::GpuDevice`] - a handle-based abstraction over device memory and
//!   kernel dispatch, so integrators never talk to a specific GPU API. The
//!   shipped back end sub-allocates every resource from one storage buffer
//!   and hands out byte offsets as device pointers (feature `gpu`).
//! - [`rt::Integrator`] - the render lifecycle state machine
//!   (`Stopped`/`Preview`/`Running`/`WaitingForCompletion`) every rendering
//!   algorithm implements, driven by polling [`rt::Integrator::update`].
//!
//! ## Modules
//!
//! - [`util`] - Errors, option bags, render settings, math re-exports
//! - [`film`] - Accumulation buffer
//! - [`accel`] - Bounding volume hierarchy shared by CPU queries and GPU
//!   acceleration-structure builds
//! - [`scene`] - Procedural demo scenes and CPU ray queries
//! - [`gpu`] - Device abstraction and the wgpu back end
//! - [`rt`] - Task scheduler, integrator lifecycle, shipped integrators
//!
//! ## Example
//!
//! ```ignore
//! use helios::prelude::*;
//!
//! let ctx = RtContext::new();
//! ctx.set_scene(Scene::cornell());
//!
//! let mut integrator = CpuAtmosphere::new(ctx.clone());
//! integrator.set_output_size(UVec2::new(1280, 720));
//! integrator.run(&integrator.options());
//! while integrator.state() != IntegratorState::Stopped {
//!     integrator.update();
//! }
//! let image = integrator.get_camera_image(true).to_vec();
//! ```

pub mod util;
pub mod film;
pub mod accel;
pub mod scene;
pub mod gpu;
pub mod rt;

// Re-export commonly used types
pub use film::Film;
pub use rt::{Integrator, IntegratorState, RtContext, StopMode};
pub use util::{Error, Options, Result};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::film::Film;
    pub use crate::gpu::{BufferHandle, GpuDevice, PipelineHandle, INVALID_HANDLE};
    pub use crate::rt::{
        integrators::{CpuAtmosphere, CpuLightTracer},
        Integrator, IntegratorState, RtContext, StopMode, TaskScheduler,
    };
    pub use crate::scene::Scene;
    pub use crate::util::{Error, OptionValue, Options, Result, UVec2, Vec2, Vec3, Vec4};

    #[cfg(feature = "gpu")]
    pub use crate::rt::integrators::GpuPathTracer;
}
