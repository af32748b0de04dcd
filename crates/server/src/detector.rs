//! Object detector collaborator: runs the external YOLO detection script.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, warn};

use objdet_core::config::DetectorConfig;

#[derive(Debug, Clone)]
pub struct DetectionRequest {
    pub source: PathBuf,
    /// Directory the annotated image is written to. Owned by the caller.
    pub output_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectionOutcome {
    pub success: bool,
    pub output_image: Option<PathBuf>,
}

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("failed to launch detector '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("detector timed out after {0:?}")]
    Timeout(Duration),

    #[error("invalid detection request: {0}")]
    InvalidRequest(String),
}

#[async_trait]
pub trait Detector: Send + Sync {
    async fn detect(&self, request: DetectionRequest) -> Result<DetectionOutcome, DetectorError>;
}

// ── Process-backed detector ─────────────────────────────────────────

pub struct ProcessDetector {
    config: DetectorConfig,
}

impl ProcessDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self { config }
    }

    /// Script arguments for one request. Paths must already be absolute.
    fn args(&self, source: &Path, output_dir: &Path) -> Result<Vec<OsString>, DetectorError> {
        let project = output_dir
            .parent()
            .ok_or_else(|| DetectorError::InvalidRequest("output dir has no parent".into()))?;
        let name = output_dir
            .file_name()
            .ok_or_else(|| DetectorError::InvalidRequest("output dir has no name".into()))?;
        let c = &self.config;

        let mut args: Vec<OsString> = vec![c.script.clone().into()];
        for (flag, value) in [
            ("--weights", c.weights.clone()),
            ("--img", c.image_size.to_string()),
            ("--conf", c.confidence_threshold.to_string()),
            ("--iou-thres", c.iou_threshold.to_string()),
            ("--max-det", c.max_detections.to_string()),
        ] {
            args.push(flag.into());
            args.push(value.into());
        }
        args.push("--source".into());
        args.push(source.as_os_str().to_owned());
        args.push("--project".into());
        args.push(project.as_os_str().to_owned());
        args.push("--name".into());
        args.push(name.to_owned());
        args.push("--exist-ok".into());
        Ok(args)
    }
}

#[async_trait]
impl Detector for ProcessDetector {
    async fn detect(&self, request: DetectionRequest) -> Result<DetectionOutcome, DetectorError> {
        // The script runs from its own working directory, so relative paths would resolve there.
        let source = absolute(&request.source)?;
        let output_dir = absolute(&request.output_dir)?;
        let args = self.args(&source, &output_dir)?;
        let timeout = Duration::from_secs(self.config.timeout_secs);

        debug!(program = %self.config.program, ?args, "launching detector");
        let child = tokio::process::Command::new(&self.config.program)
            .args(&args)
            .current_dir(&self.config.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| DetectorError::Spawn {
                program: self.config.program.clone(),
                source: e,
            })?;

        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(result) => result.map_err(|e| DetectorError::Spawn {
                program: self.config.program.clone(),
                source: e,
            })?,
            Err(_) => {
                warn!(timeout_secs = self.config.timeout_secs, "detector timed out, process killed");
                return Err(DetectorError::Timeout(timeout));
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(
                status = %output.status,
                stderr = %tail(&stderr, 2000),
                "detector exited with failure"
            );
            return Ok(DetectionOutcome {
                success: false,
                output_image: None,
            });
        }

        let output_image = source
            .file_name()
            .map(|name| output_dir.join(name))
            .filter(|p| p.is_file());
        info!(
            source = %source.display(),
            found = output_image.is_some(),
            "detection finished"
        );
        Ok(DetectionOutcome {
            success: true,
            output_image,
        })
    }
}

fn absolute(path: &Path) -> Result<PathBuf, DetectorError> {
    std::path::absolute(path)
        .map_err(|e| DetectorError::InvalidRequest(format!("{}: {e}", path.display())))
}

fn tail(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut start = text.len() - max;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    &text[start..]
}
