use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

/// Profile-aware key lookup over an arbitrary variable source.
///
/// Tries `{PROFILE}_{KEY}` first, falls back to `{KEY}`. Empty values count as unset.
struct Vars<'a> {
    profile: &'a str,
    lookup: &'a dyn Fn(&str) -> Option<String>,
}

impl Vars<'_> {
    fn opt(&self, key: &str) -> Option<String> {
        if !self.profile.is_empty() {
            let prefixed = format!("{}_{}", self.profile, key);
            if let Some(v) = (self.lookup)(&prefixed).filter(|s| !s.is_empty()) {
                return Some(v);
            }
        }
        (self.lookup)(key).filter(|s| !s.is_empty())
    }

    fn or(&self, key: &str, default: &str) -> String {
        self.opt(key).unwrap_or_else(|| default.to_string())
    }

    fn parsed<T: std::str::FromStr>(&self, key: &str, default: T) -> T {
        self.opt(key).and_then(|v| v.parse().ok()).unwrap_or(default)
    }

    fn flag(&self, key: &str, default: bool) -> bool {
        match self.opt(key).map(|v| v.to_ascii_lowercase()) {
            Some(v) if v == "true" || v == "1" || v == "yes" => true,
            Some(v) if v == "false" || v == "0" || v == "no" => false,
            _ => default,
        }
    }
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub ingestion: IngestionSettings,
    pub detector: DetectorConfig,
    pub aws: AwsConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `OBJDET_PROFILE`. When set (e.g. `PROD`), every key
    /// is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env::var("OBJDET_PROFILE").unwrap_or_default().to_uppercase();
        Self::from_lookup(&profile, &|key| env::var(key).ok())
    }

    /// Build config from an explicit key/value map instead of the process environment.
    pub fn from_map(profile: &str, vars: &HashMap<String, String>) -> Self {
        Self::from_lookup(profile, &|key| vars.get(key).cloned())
    }

    fn from_lookup(profile: &str, lookup: &dyn Fn(&str) -> Option<String>) -> Self {
        let p = profile.to_uppercase();
        let vars = Vars { profile: &p, lookup };
        Self {
            profile: p.clone(),
            server: ServerConfig::from_vars(&vars),
            storage: StorageConfig::from_vars(&vars),
            ingestion: IngestionSettings::from_vars(&vars),
            detector: DetectorConfig::from_vars(&vars),
            aws: AwsConfig::from_vars(&vars),
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Collect every configuration problem instead of stopping at the first one.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();

        if self.ingestion.source_url.trim().is_empty() {
            problems.push("DATA_SOURCE_URL is not set; training cannot fetch a dataset".to_string());
        }
        if let Some(ref digest) = self.ingestion.expected_sha256 {
            if digest.len() != 64 || !digest.chars().all(|c| c.is_ascii_hexdigit()) {
                problems.push(format!("DATA_SOURCE_SHA256 is not a hex sha256 digest: {digest}"));
            }
        }
        if self.ingestion.fetch_timeout_secs == 0 {
            problems.push("FETCH_TIMEOUT_SECS must be greater than zero".to_string());
        }

        let program = Path::new(&self.detector.program);
        if program.components().count() > 1 && !program.exists() {
            problems.push(format!(
                "Detector interpreter not found at: {}",
                self.detector.program
            ));
        }
        if !(0.0..=1.0).contains(&self.detector.confidence_threshold) {
            problems.push("CONFIDENCE_THRESHOLD must be between 0.0 and 1.0".to_string());
        }
        if !(0.0..=1.0).contains(&self.detector.iou_threshold) {
            problems.push("IOU_THRESHOLD must be between 0.0 and 1.0".to_string());
        }
        if self.detector.image_size == 0 {
            problems.push("IMAGE_SIZE must be greater than zero".to_string());
        }

        problems
    }

    /// Like [`Config::validate`], but as a `Result` for callers that want to bail.
    pub fn ensure_valid(&self) -> Result<(), CoreError> {
        let problems = self.validate();
        if problems.is_empty() {
            Ok(())
        } else {
            Err(CoreError::InvalidConfig(problems))
        }
    }

    /// Print a redacted summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!("  server:     {}:{}", self.server.host, self.server.port);
        tracing::info!("  storage:    data_dir={}", self.storage.data_dir.display());
        tracing::info!(
            "  ingestion:  source={}, artifact_root={}",
            if self.ingestion.source_url.is_empty() { "(none)" } else { &self.ingestion.source_url },
            self.ingestion.artifact_root.display()
        );
        tracing::info!(
            "  detector:   weights={}, img={}, conf={}",
            self.detector.weights, self.detector.image_size, self.detector.confidence_threshold
        );
        tracing::info!("  aws:        region={}, configured={}", self.aws.region, self.aws.is_configured());
    }

    /// Return a redacted view safe for API responses (no secrets).
    pub fn redacted_summary(&self) -> serde_json::Value {
        serde_json::json!({
            "profile": self.profile_label(),
            "server": { "host": self.server.host, "port": self.server.port },
            "storage": { "data_dir": self.storage.data_dir },
            "ingestion": {
                "source_url": self.ingestion.source_url,
                "artifact_root": self.ingestion.artifact_root,
                "auth_token_set": self.ingestion.auth_token.is_some(),
                "keep_archive": self.ingestion.keep_archive,
            },
            "detector": {
                "weights": self.detector.weights,
                "image_size": self.detector.image_size,
                "confidence_threshold": self.detector.confidence_threshold,
                "iou_threshold": self.detector.iou_threshold,
            },
            "aws": { "region": self.aws.region, "configured": self.aws.is_configured() },
        })
    }
}

// ── Server ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors_origin: String,
}

impl ServerConfig {
    fn from_vars(v: &Vars) -> Self {
        Self {
            host: v.or("HOST", "0.0.0.0"),
            port: v.parsed("PORT", 8080),
            cors_origin: v.or("CORS_ORIGIN", "*"),
        }
    }
}

// ── Storage (uploads / detection results) ─────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    /// Per-request upload directories live under here.
    pub upload_dir: PathBuf,
    /// Per-request detector output directories live under here.
    pub results_dir: PathBuf,
    pub upload_filename: String,
}

impl StorageConfig {
    fn from_vars(v: &Vars) -> Self {
        let data_dir = PathBuf::from(v.or("DATA_DIR", "data"));
        let upload_dir = v
            .opt("UPLOAD_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("uploads"));
        let results_dir = v
            .opt("RESULTS_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("results"));
        Self {
            data_dir,
            upload_dir,
            results_dir,
            upload_filename: v.or("UPLOAD_FILENAME", "inputImage.jpg"),
        }
    }
}

// ── Ingestion ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionSettings {
    /// Remote dataset archive (`http(s)://`, `s3://bucket/key` or `file:///path`).
    pub source_url: String,
    /// Base path for run artifacts; each run gets `<artifact_root>/<run_id>`.
    pub artifact_root: PathBuf,
    pub ingestion_dir_name: String,
    pub feature_store_dir_name: String,
    pub connect_timeout_secs: u64,
    pub fetch_timeout_secs: u64,
    /// Sent as `Authorization: Bearer <token>` on HTTP fetches.
    pub auth_token: Option<String>,
    pub expected_sha256: Option<String>,
    /// Keep the downloaded archive next to the feature store after a successful run.
    pub keep_archive: bool,
}

impl IngestionSettings {
    fn from_vars(v: &Vars) -> Self {
        Self {
            source_url: v.or("DATA_SOURCE_URL", ""),
            artifact_root: PathBuf::from(v.or("ARTIFACT_ROOT", "artifacts")),
            ingestion_dir_name: v.or("DATA_INGESTION_DIR", "data_ingestion"),
            feature_store_dir_name: v.or("FEATURE_STORE_DIR", "feature_store"),
            connect_timeout_secs: v.parsed("FETCH_CONNECT_TIMEOUT_SECS", 10),
            fetch_timeout_secs: v.parsed("FETCH_TIMEOUT_SECS", 900),
            auth_token: v.opt("DATA_SOURCE_AUTH_TOKEN"),
            expected_sha256: v.opt("DATA_SOURCE_SHA256").map(|s| s.to_ascii_lowercase()),
            keep_archive: v.flag("KEEP_ARCHIVE", true),
        }
    }
}

// ── Detector (external YOLO process) ──────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// Interpreter used to launch the detection script.
    pub program: String,
    pub script: String,
    /// Working directory the script is launched from.
    pub working_dir: PathBuf,
    pub weights: String,
    pub image_size: u32,
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    pub max_detections: u32,
    pub timeout_secs: u64,
    pub classes: Vec<String>,
}

impl DetectorConfig {
    fn from_vars(v: &Vars) -> Self {
        let classes = v
            .or("DETECTION_CLASSES", "person,bicycle,car,motorcycle,airplane,bus,train")
            .split(',')
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .collect();
        Self {
            program: v.or("DETECTOR_PROGRAM", "python"),
            script: v.or("DETECTOR_SCRIPT", "detect.py"),
            working_dir: PathBuf::from(v.or("DETECTOR_WORKDIR", "yolov5")),
            weights: v.or("YOLO_WEIGHTS", "best.pt"),
            image_size: v.parsed("IMAGE_SIZE", 416),
            confidence_threshold: v.parsed("CONFIDENCE_THRESHOLD", 0.5),
            iou_threshold: v.parsed("IOU_THRESHOLD", 0.45),
            max_detections: v.parsed("MAX_DETECTIONS", 1000),
            timeout_secs: v.parsed("DETECTOR_TIMEOUT_SECS", 300),
            classes,
        }
    }
}

// ── AWS / S3 (object-store dataset sources) ───────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AwsConfig {
    pub region: String,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub session_token: Option<String>,
    pub endpoint_url: Option<String>,
}

impl AwsConfig {
    fn from_vars(v: &Vars) -> Self {
        Self {
            region: v.or("AWS_REGION", "us-east-1"),
            access_key_id: v.opt("AWS_ACCESS_KEY_ID"),
            secret_access_key: v.opt("AWS_SECRET_ACCESS_KEY"),
            session_token: v.opt("AWS_SESSION_TOKEN"),
            endpoint_url: v.opt("AWS_ENDPOINT_URL"),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.access_key_id.is_some() && self.secret_access_key.is_some()
    }
}
