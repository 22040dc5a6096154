use crate::engine::Engine;
use crate::orchestrator::DownloadOutcome;
use crate::pipeline::{LasReader, LasWriter, MergeFilter, Pipeline, Stage};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Combines several per-dataset LAS/LAZ files into one.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeSpec {
    inputs: Vec<PathBuf>,
    output: PathBuf,
}

impl MergeSpec {
    pub fn new(inputs: Vec<PathBuf>, output: PathBuf) -> Self {
        Self { inputs, output }
    }
}

impl Pipeline for MergeSpec {
    fn label(&self) -> &str {
        "merge"
    }

    fn stages(&self) -> Vec<Stage> {
        let tags: Vec<String> = (0..self.inputs.len()).map(|i| format!("reader{i}")).collect();
        let mut stages: Vec<Stage> = self
            .inputs
            .iter()
            .zip(&tags)
            .map(|(input, tag)| {
                Stage::ReadLas(LasReader {
                    filename: input.to_string_lossy().into_owned(),
                    tag: tag.clone(),
                })
            })
            .collect();
        stages.push(Stage::Merge(MergeFilter {
            inputs: tags,
            tag: "merged".to_string(),
        }));
        stages.push(Stage::WriteLas(LasWriter {
            inputs: Some(vec!["merged".to_string()]),
            ..LasWriter::new(&self.output)
        }));
        stages
    }

    fn output(&self) -> &Path {
        &self.output
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MergeStatus {
    /// Every dataset keeps its own output.
    NotRequired,
    /// Merge was required but not attempted.
    Skipped(String),
    /// Only one output succeeded, so it was copied to the final location.
    Copied { dataset: String, output: PathBuf },
    Merged {
        inputs: usize,
        output: PathBuf,
        point_count: Option<u64>,
    },
    Failed(String),
}

impl MergeStatus {
    pub fn final_output(&self) -> Option<&Path> {
        match self {
            MergeStatus::Copied { output, .. } | MergeStatus::Merged { output, .. } => {
                Some(output)
            }
            _ => None,
        }
    }
}

impl fmt::Display for MergeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MergeStatus::NotRequired => write!(
                f,
                "No merge performed: each dataset was written to its own output"
            ),
            MergeStatus::Skipped(reason) => write!(f, "Merge skipped: {reason}"),
            MergeStatus::Copied { dataset, output } => write!(
                f,
                "No merge performed: only {dataset} succeeded, copied to {}",
                output.display()
            ),
            MergeStatus::Merged {
                inputs,
                output,
                point_count,
            } => {
                write!(f, "Merged {inputs} datasets into {}", output.display())?;
                if let Some(count) = point_count {
                    write!(f, " ({count} points)")?;
                }
                Ok(())
            }
            MergeStatus::Failed(reason) => write!(f, "Merge failed: {reason}"),
        }
    }
}

/// Combines the successful outputs into `output`. Never fails the run: a
/// problem is reported through the returned status.
pub async fn merge_outputs(
    engine: &impl Engine,
    outcomes: &[DownloadOutcome],
    output: &Path,
) -> MergeStatus {
    let succeeded: Vec<(&str, &Path)> = outcomes
        .iter()
        .filter(|o| o.is_success())
        .filter_map(|o| Some((o.dataset.as_str(), o.output.as_deref()?)))
        .collect();

    match succeeded.len() {
        0 => MergeStatus::Skipped("no dataset was downloaded successfully".to_string()),
        1 => {
            let (dataset, source) = succeeded[0];
            info!("Only {dataset} succeeded, copying it to {}", output.display());
            if let Some(parent) = output.parent() {
                if let Err(e) = tokio::fs::create_dir_all(parent).await {
                    return MergeStatus::Failed(format!("unable to create {}: {e}", parent.display()));
                }
            }
            match tokio::fs::copy(source, output).await {
                Ok(_) => MergeStatus::Copied {
                    dataset: dataset.to_string(),
                    output: output.to_path_buf(),
                },
                Err(e) => {
                    warn!("Unable to copy {}: {e}", source.display());
                    MergeStatus::Failed(format!("unable to copy {}: {e}", source.display()))
                }
            }
        }
        count => {
            info!("Merging {count} outputs into {}", output.display());
            let inputs = succeeded.iter().map(|(_, path)| path.to_path_buf()).collect();
            match engine.execute(&MergeSpec::new(inputs, output.to_path_buf())).await {
                Ok(run) => MergeStatus::Merged {
                    inputs: count,
                    output: run.output,
                    point_count: run.point_count,
                },
                Err(e) => {
                    warn!("Merge failed: {e:#}");
                    MergeStatus::Failed(format!("{e:#}"))
                }
            }
        }
    }
}
