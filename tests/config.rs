use std::sync::Mutex;
use std::time::Duration;

use tempfile::{Builder, NamedTempFile};

use leafguard::config::LeafguardConfig;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "LEAFGUARD_CONFIG",
        "LEAFGUARD_DB_PATH",
        "LEAFGUARD_IMAGE_DIR",
        "LEAFGUARD_SOURCE",
        "LEAFGUARD_CLASSIFIER_URL",
        "LEAFGUARD_MODEL_PATH",
        "LEAFGUARD_SEVERITY_LOW",
        "LEAFGUARD_SEVERITY_HIGH",
        "LEAFGUARD_SPRAY_LOW_MS",
        "LEAFGUARD_SPRAY_HIGH_MS",
        "LEAFGUARD_GPIO_PIN",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "db_path": "field_a.db",
        "image_dir": "/var/lib/leafguard/images",
        "source": { "url": "http://cam-1.local", "target_fps": 5 },
        "classifier": { "url": "http://classifier:5000/api/upload_detect", "timeout_ms": 2500 },
        "schedule": { "auto_interval_ms": 4000 },
        "click": { "region_size": 120, "cooldown_ms": 500 },
        "policy": { "low_threshold": 25, "high_threshold": 60 },
        "sprayer": { "gpio_pin": 17, "simulate": true }
    }"#;
    std::io::Write::write_all(&mut file, json.as_bytes()).expect("write config");

    std::env::set_var("LEAFGUARD_CONFIG", file.path());
    std::env::set_var("LEAFGUARD_SOURCE", "stub://bench");
    std::env::set_var("LEAFGUARD_SPRAY_HIGH_MS", "4500");

    let cfg = LeafguardConfig::load().expect("load config");

    assert_eq!(cfg.db_path, "field_a.db");
    assert_eq!(
        cfg.image_dir.as_deref(),
        Some(std::path::Path::new("/var/lib/leafguard/images"))
    );
    assert_eq!(cfg.source.url, "stub://bench");
    assert_eq!(cfg.source.target_fps, 5);
    assert_eq!(cfg.source.frame_interval(), Duration::from_millis(200));
    assert_eq!(cfg.classifier.url, "http://classifier:5000/api/upload_detect");
    assert_eq!(cfg.classifier.timeout, Duration::from_millis(2500));
    assert_eq!(cfg.classifier.input_size, 224);
    assert_eq!(cfg.schedule.auto_interval, Duration::from_secs(4));
    assert_eq!(cfg.schedule.service_interval, Duration::from_secs(2));
    assert_eq!(cfg.click.region_size, 120);
    assert_eq!(cfg.click.cooldown, Duration::from_millis(500));
    assert_eq!(cfg.click.min_size, 100);
    assert_eq!(cfg.policy.low_threshold, 25.0);
    assert_eq!(cfg.policy.high_threshold, 60.0);
    assert_eq!(cfg.policy.low_duration_ms, 1000);
    assert_eq!(cfg.policy.high_duration_ms, 4500);
    assert_eq!(cfg.sprayer.gpio_pin, Some(17));
    assert!(cfg.sprayer.simulate);

    clear_env();
}

#[test]
fn defaults_apply_without_a_file() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();

    let cfg = LeafguardConfig::load_from(None).expect("defaults");
    assert_eq!(cfg.db_path, "data/db/leafguard.db");
    assert_eq!(cfg.source.url, "stub://garden");
    assert_eq!(cfg.schedule.auto_interval, Duration::from_secs(3));
    assert_eq!(cfg.click.region_size, 150);
    assert_eq!(cfg.click.cooldown, Duration::from_secs(1));
    assert_eq!(cfg.policy.low_threshold, 30.0);
    assert_eq!(cfg.policy.high_threshold, 70.0);
    assert_eq!(cfg.policy.high_duration_ms, 3000);
    assert!(cfg.detector.model_path.is_none());
    assert!(cfg.sprayer.simulate);
}

#[test]
fn loads_toml_by_extension() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();

    let mut file = Builder::new().suffix(".toml").tempfile().expect("temp config");
    let toml = r#"
db_path = "bench.db"

[detector]
model_path = "/opt/models/leaf.onnx"
confidence_threshold = 0.65

[policy]
high_duration_ms = 2000
"#;
    std::io::Write::write_all(&mut file, toml.as_bytes()).expect("write config");

    let cfg = LeafguardConfig::load_from(Some(file.path())).expect("load toml");
    assert_eq!(cfg.db_path, "bench.db");
    assert_eq!(
        cfg.detector.model_path.as_deref(),
        Some(std::path::Path::new("/opt/models/leaf.onnx"))
    );
    assert_eq!(cfg.detector.confidence_threshold, 0.65);
    assert_eq!(cfg.policy.high_duration_ms, 2000);
}

#[test]
fn gpio_pin_env_enables_hardware_sprayer() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();

    std::env::set_var("LEAFGUARD_GPIO_PIN", "22");
    let cfg = LeafguardConfig::load_from(None).expect("load config");
    assert_eq!(cfg.sprayer.gpio_pin, Some(22));
    assert!(!cfg.sprayer.simulate);

    clear_env();
}

#[test]
fn rejects_inverted_thresholds() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();

    std::env::set_var("LEAFGUARD_SEVERITY_LOW", "80");
    let err = LeafguardConfig::load_from(None).expect_err("low above high");
    assert!(err.to_string().contains("exceeds high threshold"));

    clear_env();
}

#[test]
fn rejects_unparseable_env_value() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();

    std::env::set_var("LEAFGUARD_SPRAY_LOW_MS", "one second");
    let err = LeafguardConfig::load_from(None).expect_err("bad env value");
    assert!(err.to_string().contains("LEAFGUARD_SPRAY_LOW_MS"));

    clear_env();
}

#[test]
fn rejects_region_smaller_than_minimum() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, br#"{ "click": { "region_size": 80 } }"#)
        .expect("write config");
    let err = LeafguardConfig::load_from(Some(file.path())).expect_err("region too small");
    assert!(err.to_string().contains("region_size"));
}

#[test]
fn reports_malformed_file() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, b"{ not json").expect("write config");
    let err = LeafguardConfig::load_from(Some(file.path())).expect_err("malformed");
    assert!(err.to_string().contains("invalid config file"));
}
