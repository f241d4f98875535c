//! Render-settings file round-trips and the option-override path the CLI
//! uses.

use helios::rt::integrators::create_integrator;
use helios::rt::RtContext;
use helios::util::RenderSettings;
use tempfile::tempdir;

#[test]
fn test_save_load_roundtrip() {
    let dir = tempdir().expect("Failed to create temp dir");
    let path = dir.path().join("render.json");

    let mut settings = RenderSettings::default();
    settings.width = 1920;
    settings.height = 1080;
    settings.integrator = "light-tracer".to_string();
    settings.samples = 32;
    settings.exposure = 2.5;
    settings
        .options
        .insert("max bounces".to_string(), serde_json::json!(6));

    settings.save(&path).expect("Failed to save settings");
    let loaded = RenderSettings::load(&path).expect("Failed to load settings");

    assert_eq!(loaded.width, 1920);
    assert_eq!(loaded.height, 1080);
    assert_eq!(loaded.integrator, "light-tracer");
    assert_eq!(loaded.samples, 32);
    assert!((loaded.exposure - 2.5).abs() < 1e-6);
    assert_eq!(loaded.options.get("max bounces"), Some(&serde_json::json!(6)));
}

#[test]
fn test_missing_file_is_a_clean_error() {
    let dir = tempdir().expect("Failed to create temp dir");
    let err = RenderSettings::load(dir.path().join("nope.json")).unwrap_err();
    assert!(matches!(err, helios::util::Error::FileNotFound(_)));
}

#[test]
fn test_invalid_settings_rejected_on_load() {
    let dir = tempdir().expect("Failed to create temp dir");
    let path = dir.path().join("bad.json");
    std::fs::write(&path, r#"{"width": 0}"#).expect("Failed to write file");
    assert!(RenderSettings::load(&path).is_err());
}

#[test]
fn test_overrides_reach_integrator_options() {
    let mut settings = RenderSettings::default();
    settings.integrator = "light-tracer".to_string();
    settings
        .options
        .insert("max bounces".to_string(), serde_json::json!(7));
    settings
        .options
        .insert("not an option".to_string(), serde_json::json!(1));

    let ctx = RtContext::with_threads(1);
    let integrator =
        create_integrator(&settings.integrator, ctx).expect("Failed to create integrator");
    let mut options = integrator.options();

    let mut applied = 0;
    for (name, value) in &settings.options {
        if options.apply(name, value) {
            applied += 1;
        }
    }
    assert_eq!(applied, 1, "only known names apply");
    assert_eq!(options.get_integer("max bounces", 0), 7);
}
