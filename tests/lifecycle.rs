//! Integrator lifecycle state machine, driven the way a display loop would
//! drive it: every transition out of a render goes through `update()`.

use helios::rt::integrators::CpuAtmosphere;
use helios::rt::{Integrator, IntegratorState, RtContext, StopMode};
use helios::scene::Scene;
use helios::util::{UVec2, Vec4};
use std::time::{Duration, Instant};

fn small_renderer() -> CpuAtmosphere {
    let ctx = RtContext::with_threads(2);
    ctx.set_scene(Scene::sky());
    let mut it = CpuAtmosphere::new(ctx);
    it.set_output_size(UVec2::new(32, 32));
    it
}

/// Polls `update()` until the integrator stops; panics after `limit`.
fn drive_to_stopped(it: &mut dyn Integrator, limit: Duration) {
    let deadline = Instant::now() + limit;
    while it.state() != IntegratorState::Stopped {
        assert!(Instant::now() < deadline, "no Stopped within {limit:?}");
        it.update();
        std::thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn test_run_enters_running_and_finishes() {
    let mut it = small_renderer();
    assert_eq!(it.state(), IntegratorState::Stopped);

    let mut options = it.options();
    options.set_integer("samples", 3, 1, 65536);
    it.run(&options);
    assert_eq!(it.state(), IntegratorState::Running);

    drive_to_stopped(&mut it, Duration::from_secs(60));
    assert!(it.status().contains("3 spp"), "status: {}", it.status());

    let image = it.get_camera_image(true);
    assert_eq!(image.len(), 32 * 32);
    assert!(
        image.iter().any(|v| v.max_element() > 0.0),
        "a finished sky render must not be black"
    );
}

#[test]
fn test_stop_immediate_is_synchronous() {
    let mut it = small_renderer();
    let mut options = it.options();
    options.set_integer("samples", 65536, 1, 65536);
    it.run(&options);
    assert_eq!(it.state(), IntegratorState::Running);

    // Same call, no update() needed.
    it.stop(StopMode::Immediate);
    assert_eq!(it.state(), IntegratorState::Stopped);
}

#[test]
fn test_stop_wait_drains_through_update() {
    let mut it = small_renderer();
    let mut options = it.options();
    options.set_integer("samples", 65536, 1, 65536);
    it.run(&options);

    it.stop(StopMode::WaitForCompletion);
    assert_eq!(
        it.state(),
        IntegratorState::WaitingForCompletion,
        "wait-stop must not complete inside stop()"
    );

    drive_to_stopped(&mut it, Duration::from_secs(60));
}

#[test]
fn test_update_options_inert_while_running() {
    let mut it = small_renderer();
    let published = it.options();
    let mut options = published.clone();
    options.set_integer("samples", 65536, 1, 65536);
    it.run(&options);

    let mut edited = options.clone();
    edited.set_float("turbidity", 9.0, 1.0, 10.0);
    it.update_options(&edited);
    assert_eq!(
        it.options(),
        options,
        "edits during Running must not be visible"
    );

    it.stop(StopMode::Immediate);
    it.update_options(&edited);
    assert_eq!(it.options(), edited, "Stopped accepts edits again");
}

#[test]
fn test_start_without_scene_is_rejected() {
    let ctx = RtContext::with_threads(1);
    let mut it = CpuAtmosphere::new(ctx);
    assert!(!it.can_run());

    let options = it.options();
    it.run(&options);
    assert_eq!(it.state(), IntegratorState::Stopped);
    it.preview(&options);
    assert_eq!(it.state(), IntegratorState::Stopped);
}

#[test]
fn test_preview_idles_at_its_sample_cap() {
    let mut it = small_renderer();
    let options = it.options();
    it.preview(&options);
    assert_eq!(it.state(), IntegratorState::Preview);

    // Preview refines to its cap and then stays interactive.
    let deadline = Instant::now() + Duration::from_secs(60);
    while !it.status().starts_with("8 spp") {
        assert!(Instant::now() < deadline, "preview never reached its cap");
        it.update();
        std::thread::sleep(Duration::from_millis(1));
    }
    for _ in 0..10 {
        it.update();
    }
    assert_eq!(it.state(), IntegratorState::Preview);

    // Editable again only after an explicit stop.
    it.stop(StopMode::Immediate);
    assert_eq!(it.state(), IntegratorState::Stopped);
}

#[test]
fn test_set_output_size_takes_effect_before_the_next_start() {
    let mut it = small_renderer();
    let mut options = it.options();
    options.set_integer("samples", 1, 1, 65536);
    it.run(&options);
    drive_to_stopped(&mut it, Duration::from_secs(60));
    assert_eq!(it.get_camera_image(true).len(), 32 * 32);

    // The films follow the new size immediately; an image query between the
    // resize and the next start must not serve the old frame.
    it.set_output_size(UVec2::new(16, 8));
    let image = it.get_camera_image(false);
    assert_eq!(image.len(), 16 * 8);
    assert!(
        image.iter().all(|&v| v == Vec4::ZERO),
        "a fresh size starts from zeros"
    );
}
