//! Integrator lifecycle contract.
//!
//! Every rendering algorithm, CPU or GPU, implements [`Integrator`] and its
//! four-state machine. The machine is driven entirely by polling: `stop`
//! never blocks, and [`Integrator::update`] is the only call that advances
//! `WaitingForCompletion` to `Stopped`.

use crate::film::Film;
use crate::util::{Options, UVec2, Vec4};

/// Render lifecycle state.
///
/// ```text
/// Stopped ──run──▶ Running ──stop(WaitForCompletion)──▶ WaitingForCompletion
///    │ ▲              │                                        │
/// preview             │stop(Immediate)              update(), no work left
///    ▼ │              ▼                                        │
/// Preview ─────▶ Stopped ◀─────────────────────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegratorState {
    /// Initial and terminal; the scene and options are editable.
    Stopped,
    /// Low-sample interactive mode; still editable, results discardable.
    Preview,
    /// Full render; the scene must not change underneath it.
    Running,
    /// Stop requested; dispatched work must finish and accumulate first.
    WaitingForCompletion,
}

impl IntegratorState {
    /// Whether scene and option mutation is legal in this state.
    #[inline]
    pub fn is_editable(self) -> bool {
        matches!(self, Self::Stopped | Self::Preview)
    }
}

impl std::fmt::Display for IntegratorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Stopped => "stopped",
            Self::Preview => "preview",
            Self::Running => "running",
            Self::WaitingForCompletion => "waiting for completion",
        };
        f.write_str(s)
    }
}

/// How a stop request treats in-flight work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopMode {
    /// Cancel outstanding work and reach `Stopped` on this very call;
    /// not-yet-accumulated contributions are dropped.
    Immediate,
    /// Let already-dispatched work finish and accumulate; `update()` drives
    /// the final transition.
    WaitForCompletion,
}

/// One diagnostic line for display layers.
#[derive(Debug, Clone, PartialEq)]
pub struct DebugInfo {
    pub label: String,
    pub value: String,
}

impl DebugInfo {
    pub fn new(label: impl Into<String>, value: impl std::fmt::Display) -> Self {
        Self {
            label: label.into(),
            value: value.to_string(),
        }
    }
}

/// A pluggable rendering algorithm with a controlled lifecycle.
///
/// Callers poll `update()` regularly in every non-`Stopped` state; all image
/// access goes through the snapshot getters, never a Film owned by the
/// integrator directly.
pub trait Integrator {
    fn name(&self) -> &'static str;

    /// The integrator's editable parameters, with current values.
    fn options(&self) -> Options;

    /// Applies new options. Legal only in editable states; rejected (state
    /// and options untouched) in `Running`/`WaitingForCompletion`.
    fn update_options(&mut self, options: &Options);

    fn state(&self) -> IntegratorState;

    /// False when no scene/geometry is bound (or a required device is
    /// missing); `run`/`preview` on an unrunnable integrator are no-ops.
    fn can_run(&self) -> bool;

    /// Resizes the output films. Editable states only.
    fn set_output_size(&mut self, size: UVec2);

    /// Stopped|Preview → Preview; (re)starts interactive sampling.
    fn preview(&mut self, options: &Options);

    /// Stopped|Preview → Running; clears accumulation and starts the full
    /// render.
    fn run(&mut self, options: &Options);

    fn stop(&mut self, mode: StopMode);

    /// Pumps bookkeeping: collects finished batches, dispatches the next,
    /// and performs the `WaitingForCompletion` → `Stopped` transition when
    /// nothing is outstanding. No-op when idle.
    fn update(&mut self);

    /// Latest stable camera image, recomputed only when `force_update` is
    /// set or the underlying film changed since the last call.
    fn get_camera_image(&mut self, force_update: bool) -> &[Vec4];

    /// Latest stable light image; all zeros for integrators without a light
    /// transport pass.
    fn get_light_image(&mut self, force_update: bool) -> &[Vec4];

    /// Whether this integrator ever produces a light image worth polling.
    fn have_updated_light_image(&self) -> bool {
        false
    }

    /// Short human-readable progress line; informational only.
    fn status(&self) -> String;

    /// Diagnostic label/value lines; empty by default.
    fn debug_info(&self) -> Vec<DebugInfo> {
        Vec::new()
    }
}

/// Cached display copy of a film, refreshed only when the film's write
/// generation moved. Shared by every shipped integrator.
pub(crate) struct ImageSnapshot {
    data: Vec<Vec4>,
    version: u64,
}

impl ImageSnapshot {
    pub fn new() -> Self {
        Self {
            data: Vec::new(),
            // Never matches a real film version, so the first read copies.
            version: u64::MAX,
        }
    }

    pub fn get(&mut self, film: &Film, force_update: bool) -> &[Vec4] {
        let version = film.version();
        if force_update || version != self.version {
            film.copy_into(&mut self.data);
            self.version = version;
        }
        &self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_editable_states() {
        assert!(IntegratorState::Stopped.is_editable());
        assert!(IntegratorState::Preview.is_editable());
        assert!(!IntegratorState::Running.is_editable());
        assert!(!IntegratorState::WaitingForCompletion.is_editable());
    }

    #[test]
    fn test_snapshot_skips_unchanged_film() {
        let mut film = Film::new();
        film.resize(UVec2::new(2, 2), 1);
        film.accumulate(Vec4::ONE, UVec2::ZERO, 1.0);
        film.mark_dirty();

        let mut snap = ImageSnapshot::new();
        assert_eq!(snap.get(&film, false)[0], Vec4::ONE);

        // Accumulate without marking: the cached copy is served.
        film.accumulate(Vec4::ZERO, UVec2::ZERO, 1.0);
        assert_eq!(snap.get(&film, false)[0], Vec4::ONE);
        // Force sees through the cache.
        assert_eq!(snap.get(&film, true)[0], Vec4::ZERO);
    }
}
