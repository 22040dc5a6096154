//! The external point-cloud processing engine.
use crate::pipeline::Pipeline;
use anyhow::{anyhow, bail, Context, Result};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

/// Lines of engine stderr kept in a failure reason.
const STDERR_TAIL_LINES: usize = 12;

#[derive(Debug, Clone, PartialEq)]
pub struct EngineRun {
    pub output: PathBuf,
    /// `None` when the engine could not report a count.
    pub point_count: Option<u64>,
}

pub trait Engine {
    /// Runs a pipeline to completion. An `Err` means no usable output.
    async fn execute(&self, pipeline: &impl Pipeline) -> Result<EngineRun>;
}

/// Runs pipelines through the `pdal` command line tool.
pub struct Pdal {
    binary: PathBuf,
}

impl Pdal {
    pub fn new<P: Into<PathBuf>>(binary: P) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub async fn point_count(&self, path: &Path) -> Result<u64> {
        let output = Command::new(&self.binary)
            .arg("info")
            .arg("--summary")
            .arg(path)
            .stdin(Stdio::null())
            .output()
            .await
            .with_context(|| format!("Unable to launch {}", self.binary.display()))?;
        if !output.status.success() {
            bail!(
                "pdal info failed ({}): {}",
                output.status,
                stderr_tail(&output.stderr)
            );
        }
        let summary: serde_json::Value = serde_json::from_slice(&output.stdout)?;
        summary["summary"]["num_points"]
            .as_u64()
            .ok_or(anyhow!("pdal info summary has no num_points"))
    }
}

impl Engine for Pdal {
    async fn execute(&self, pipeline: &impl Pipeline) -> Result<EngineRun> {
        let json = pipeline.to_json()?;
        let output = pipeline.output().to_path_buf();
        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        debug!("Running pdal pipeline for {}", pipeline.label());
        let mut child = Command::new(&self.binary)
            .arg("pipeline")
            .arg("--stdin")
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Unable to launch {}", self.binary.display()))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or(anyhow!("pdal stdin was not captured"))?;
        stdin.write_all(json.as_bytes()).await?;
        drop(stdin);

        let result = child.wait_with_output().await?;
        if !result.status.success() {
            bail!(
                "pdal pipeline failed ({}): {}",
                result.status,
                stderr_tail(&result.stderr)
            );
        }
        if !tokio::fs::try_exists(&output).await? {
            bail!(
                "pdal pipeline finished but {} was not written",
                output.display()
            );
        }

        let point_count = match self.point_count(&output).await {
            Ok(count) => Some(count),
            Err(e) => {
                warn!("Unable to count points in {}: {e:#}", output.display());
                None
            }
        };
        Ok(EngineRun {
            output,
            point_count,
        })
    }
}

fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let lines: Vec<&str> = text.trim().lines().collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    let tail = lines[start..].join("\n");
    if tail.is_empty() {
        "no error output".to_string()
    } else {
        tail
    }
}
