use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::geometry::MANUAL_MIN_SIZE;
use crate::policy::SprayPolicy;

const DEFAULT_DB_PATH: &str = "data/db/leafguard.db";
const DEFAULT_IMAGE_DIR: &str = "data/db/images";
const DEFAULT_SOURCE_URL: &str = "stub://garden";
const DEFAULT_SOURCE_FPS: u32 = 10;
const DEFAULT_CLASSIFIER_URL: &str = "http://localhost:5000/api/upload_detect";
const DEFAULT_CLASSIFIER_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_CLASSIFIER_INPUT: u32 = 224;
const DEFAULT_JPEG_QUALITY: u8 = 90;
const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;
const DEFAULT_MODEL_INPUT: u32 = 300;
const DEFAULT_LEAF_CLASS_ID: u32 = 1;
const DEFAULT_AUTO_INTERVAL_MS: u64 = 3_000;
const DEFAULT_SERVICE_INTERVAL_MS: u64 = 2_000;
const DEFAULT_REGION_SIZE: u32 = 150;
const DEFAULT_CLICK_COOLDOWN_MS: u64 = 1_000;
const DEFAULT_REGION_MIN_SIZE: u32 = MANUAL_MIN_SIZE;

#[derive(Debug, Deserialize, Default)]
struct LeafguardConfigFile {
    db_path: Option<String>,
    image_dir: Option<PathBuf>,
    source: Option<SourceConfigFile>,
    classifier: Option<ClassifierConfigFile>,
    detector: Option<DetectorConfigFile>,
    schedule: Option<ScheduleConfigFile>,
    click: Option<ClickConfigFile>,
    policy: Option<PolicyConfigFile>,
    sprayer: Option<SprayerConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct SourceConfigFile {
    url: Option<String>,
    target_fps: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct ClassifierConfigFile {
    url: Option<String>,
    timeout_ms: Option<u64>,
    input_size: Option<u32>,
    jpeg_quality: Option<u8>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    model_path: Option<PathBuf>,
    confidence_threshold: Option<f32>,
    input_size: Option<u32>,
    leaf_class_id: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct ScheduleConfigFile {
    auto_interval_ms: Option<u64>,
    service_interval_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct ClickConfigFile {
    region_size: Option<u32>,
    cooldown_ms: Option<u64>,
    min_size: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct PolicyConfigFile {
    low_threshold: Option<f32>,
    high_threshold: Option<f32>,
    low_duration_ms: Option<u32>,
    high_duration_ms: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct SprayerConfigFile {
    gpio_pin: Option<u32>,
    simulate: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct LeafguardConfig {
    pub db_path: String,
    pub image_dir: Option<PathBuf>,
    pub source: SourceSettings,
    pub classifier: ClassifierSettings,
    pub detector: DetectorSettings,
    pub schedule: ScheduleSettings,
    pub click: ClickSettings,
    pub policy: SprayPolicy,
    pub sprayer: SprayerSettings,
}

#[derive(Debug, Clone)]
pub struct SourceSettings {
    pub url: String,
    pub target_fps: u32,
}

impl SourceSettings {
    /// Delay between frame-loop ticks.
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis((1000 / self.target_fps.max(1)).max(1) as u64)
    }
}

#[derive(Debug, Clone)]
pub struct ClassifierSettings {
    pub url: String,
    pub timeout: Duration,
    pub input_size: u32,
    pub jpeg_quality: u8,
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    pub model_path: Option<PathBuf>,
    pub confidence_threshold: f32,
    pub input_size: u32,
    pub leaf_class_id: u32,
}

#[derive(Debug, Clone)]
pub struct ScheduleSettings {
    pub auto_interval: Duration,
    pub service_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct ClickSettings {
    pub region_size: u32,
    pub cooldown: Duration,
    pub min_size: u32,
}

#[derive(Debug, Clone)]
pub struct SprayerSettings {
    pub gpio_pin: Option<u32>,
    pub simulate: bool,
}

impl Default for LeafguardConfig {
    fn default() -> Self {
        // An empty file resolves to defaults and cannot fail.
        Self::from_file(LeafguardConfigFile::default())
    }
}

impl Default for SourceSettings {
    fn default() -> Self {
        LeafguardConfig::default().source
    }
}

impl Default for DetectorSettings {
    fn default() -> Self {
        LeafguardConfig::default().detector
    }
}

impl Default for ClickSettings {
    fn default() -> Self {
        LeafguardConfig::default().click
    }
}

impl Default for ClassifierSettings {
    fn default() -> Self {
        LeafguardConfig::default().classifier
    }
}

impl LeafguardConfig {
    /// Load from `LEAFGUARD_CONFIG` (if set), then apply env overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("LEAFGUARD_CONFIG").ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    /// Load from an explicit file path (if any), then apply env overrides.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: LeafguardConfigFile) -> Self {
        let db_path = file.db_path.unwrap_or_else(|| DEFAULT_DB_PATH.to_string());
        let image_dir = Some(
            file.image_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_IMAGE_DIR)),
        );

        let source = file.source.unwrap_or_default();
        let source = SourceSettings {
            url: source.url.unwrap_or_else(|| DEFAULT_SOURCE_URL.to_string()),
            target_fps: source.target_fps.unwrap_or(DEFAULT_SOURCE_FPS),
        };

        let classifier = file.classifier.unwrap_or_default();
        let classifier = ClassifierSettings {
            url: classifier
                .url
                .unwrap_or_else(|| DEFAULT_CLASSIFIER_URL.to_string()),
            timeout: Duration::from_millis(
                classifier
                    .timeout_ms
                    .unwrap_or(DEFAULT_CLASSIFIER_TIMEOUT_MS),
            ),
            input_size: classifier.input_size.unwrap_or(DEFAULT_CLASSIFIER_INPUT),
            jpeg_quality: classifier.jpeg_quality.unwrap_or(DEFAULT_JPEG_QUALITY),
        };

        let detector = file.detector.unwrap_or_default();
        let detector = DetectorSettings {
            model_path: detector.model_path,
            confidence_threshold: detector
                .confidence_threshold
                .unwrap_or(DEFAULT_CONFIDENCE_THRESHOLD),
            input_size: detector.input_size.unwrap_or(DEFAULT_MODEL_INPUT),
            leaf_class_id: detector.leaf_class_id.unwrap_or(DEFAULT_LEAF_CLASS_ID),
        };

        let schedule = file.schedule.unwrap_or_default();
        let schedule = ScheduleSettings {
            auto_interval: Duration::from_millis(
                schedule.auto_interval_ms.unwrap_or(DEFAULT_AUTO_INTERVAL_MS),
            ),
            service_interval: Duration::from_millis(
                schedule
                    .service_interval_ms
                    .unwrap_or(DEFAULT_SERVICE_INTERVAL_MS),
            ),
        };

        let click = file.click.unwrap_or_default();
        let click = ClickSettings {
            region_size: click.region_size.unwrap_or(DEFAULT_REGION_SIZE),
            cooldown: Duration::from_millis(click.cooldown_ms.unwrap_or(DEFAULT_CLICK_COOLDOWN_MS)),
            min_size: click.min_size.unwrap_or(DEFAULT_REGION_MIN_SIZE),
        };

        let defaults = SprayPolicy::default();
        let policy = file.policy.unwrap_or_default();
        let policy = SprayPolicy {
            low_threshold: policy.low_threshold.unwrap_or(defaults.low_threshold),
            high_threshold: policy.high_threshold.unwrap_or(defaults.high_threshold),
            low_duration_ms: policy.low_duration_ms.unwrap_or(defaults.low_duration_ms),
            high_duration_ms: policy.high_duration_ms.unwrap_or(defaults.high_duration_ms),
        };

        let sprayer = file.sprayer.unwrap_or_default();
        let sprayer = SprayerSettings {
            gpio_pin: sprayer.gpio_pin,
            simulate: sprayer.simulate.unwrap_or(true),
        };

        Self {
            db_path,
            image_dir,
            source,
            classifier,
            detector,
            schedule,
            click,
            policy,
            sprayer,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(path) = env_string("LEAFGUARD_DB_PATH") {
            self.db_path = path;
        }
        if let Some(dir) = env_string("LEAFGUARD_IMAGE_DIR") {
            self.image_dir = Some(PathBuf::from(dir));
        }
        if let Some(url) = env_string("LEAFGUARD_SOURCE") {
            self.source.url = url;
        }
        if let Some(url) = env_string("LEAFGUARD_CLASSIFIER_URL") {
            self.classifier.url = url;
        }
        if let Some(path) = env_string("LEAFGUARD_MODEL_PATH") {
            self.detector.model_path = Some(PathBuf::from(path));
        }
        if let Some(value) = env_parse::<f32>("LEAFGUARD_SEVERITY_LOW")? {
            self.policy.low_threshold = value;
        }
        if let Some(value) = env_parse::<f32>("LEAFGUARD_SEVERITY_HIGH")? {
            self.policy.high_threshold = value;
        }
        if let Some(value) = env_parse::<u32>("LEAFGUARD_SPRAY_LOW_MS")? {
            self.policy.low_duration_ms = value;
        }
        if let Some(value) = env_parse::<u32>("LEAFGUARD_SPRAY_HIGH_MS")? {
            self.policy.high_duration_ms = value;
        }
        if let Some(pin) = env_parse::<u32>("LEAFGUARD_GPIO_PIN")? {
            self.sprayer.gpio_pin = Some(pin);
            self.sprayer.simulate = false;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        let policy = &self.policy;
        if !(0.0..=100.0).contains(&policy.low_threshold)
            || !(0.0..=100.0).contains(&policy.high_threshold)
        {
            return Err(anyhow!("severity thresholds must be within 0..=100"));
        }
        if policy.low_threshold > policy.high_threshold {
            return Err(anyhow!(
                "low severity threshold {} exceeds high threshold {}",
                policy.low_threshold,
                policy.high_threshold
            ));
        }
        if self.source.target_fps == 0 {
            return Err(anyhow!("source target_fps must be greater than zero"));
        }
        if self.schedule.auto_interval.is_zero() || self.schedule.service_interval.is_zero() {
            return Err(anyhow!("detection intervals must be greater than zero"));
        }
        if self.classifier.timeout.is_zero() {
            return Err(anyhow!("classifier timeout must be greater than zero"));
        }
        if self.classifier.input_size == 0 || self.detector.input_size == 0 {
            return Err(anyhow!("model input sizes must be greater than zero"));
        }
        if !(1..=100).contains(&self.classifier.jpeg_quality) {
            return Err(anyhow!("jpeg_quality must be within 1..=100"));
        }
        if !(0.0..=1.0).contains(&self.detector.confidence_threshold) {
            return Err(anyhow!("detector confidence_threshold must be within 0..=1"));
        }
        if self.click.min_size == 0 || self.click.region_size < self.click.min_size {
            return Err(anyhow!(
                "click region_size {} must be at least min_size {} (> 0)",
                self.click.region_size,
                self.click.min_size
            ));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<LeafguardConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    match env_string(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| anyhow!("{} has an invalid value '{}'", key, raw)),
        None => Ok(None),
    }
}
