//! Utility types shared across the renderer.
//!
//! - [`Error`] / [`Result`] - Error handling
//! - [`Options`] / [`OptionValue`] - Typed, bounded option bags integrators
//!   publish and consume
//! - [`RenderSettings`] - JSON-persisted render configuration
//! - Math type re-exports from glam

mod error;
mod math;
mod options;
mod settings;

pub use error::*;
pub use math::*;
pub use options::*;
pub use settings::*;
