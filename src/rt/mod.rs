//! Render lifecycle: scheduler, integrator contract, shipped integrators.

mod integrator;
mod scheduler;

pub mod integrators;

pub use integrator::{DebugInfo, Integrator, IntegratorState, StopMode};
pub use scheduler::{TaskContext, TaskHandle, TaskScheduler};

pub(crate) use integrator::ImageSnapshot;

use crate::scene::Scene;
use parking_lot::RwLock;
use std::sync::Arc;

/// Shared raytracing context: the worker pool plus the currently bound
/// scene. Integrators hold a clone; the driver swaps scenes only while every
/// integrator is in an editable state.
#[derive(Clone)]
pub struct RtContext {
    inner: Arc<RtInner>,
}

struct RtInner {
    scheduler: TaskScheduler,
    scene: RwLock<Option<Arc<Scene>>>,
}

impl Default for RtContext {
    fn default() -> Self {
        Self::new()
    }
}

impl RtContext {
    /// Context over the global worker pool.
    pub fn new() -> Self {
        Self::with_scheduler(TaskScheduler::new())
    }

    /// Context with a dedicated pool of `threads` workers (`0` = global
    /// pool).
    pub fn with_threads(threads: u32) -> Self {
        Self::with_scheduler(TaskScheduler::with_threads(threads))
    }

    pub fn with_scheduler(scheduler: TaskScheduler) -> Self {
        Self {
            inner: Arc::new(RtInner {
                scheduler,
                scene: RwLock::new(None),
            }),
        }
    }

    #[inline]
    pub fn scheduler(&self) -> &TaskScheduler {
        &self.inner.scheduler
    }

    /// Binds a scene, replacing any previous one. In-flight renders keep
    /// their own `Arc` to the scene they started with.
    pub fn set_scene(&self, scene: Scene) {
        tracing::info!(scene = scene.name, triangles = scene.triangle_count(), "scene bound");
        *self.inner.scene.write() = Some(Arc::new(scene));
    }

    pub fn clear_scene(&self) {
        *self.inner.scene.write() = None;
    }

    /// The currently bound scene, if any.
    pub fn scene(&self) -> Option<Arc<Scene>> {
        self.inner.scene.read().clone()
    }

    #[inline]
    pub fn has_scene(&self) -> bool {
        self.inner.scene.read().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scene_slot() {
        let ctx = RtContext::with_threads(2);
        assert!(!ctx.has_scene());
        assert!(ctx.scene().is_none());

        ctx.set_scene(Scene::cornell());
        assert!(ctx.has_scene());

        // A render holding the old Arc survives a swap.
        let held = ctx.scene().unwrap();
        ctx.set_scene(Scene::sky());
        assert_eq!(held.name, "cornell");
        assert_eq!(ctx.scene().unwrap().name, "sky");

        ctx.clear_scene();
        assert!(!ctx.has_scene());
    }
}
