//! One end-to-end run: resolve, select, build, download, merge, report.
use crate::boundary::Boundary;
use crate::catalog::{Catalog, IntersectingDataset};
use crate::config::Config;
use crate::engine::Engine;
use crate::merge::{merge_outputs, MergeStatus};
use crate::orchestrator::Orchestrator;
use crate::pipeline::{file_stem, Pipeline, PipelineBuilder, PipelineSpec};
use crate::report::RunReport;
use crate::selection::select;
use anyhow::Result;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

pub fn report_path(output_dir: &Path, boundary: &str) -> PathBuf {
    output_dir.join(format!("{}_report.txt", file_stem(boundary)))
}

pub fn audit_path(output_dir: &Path, dataset: &str) -> PathBuf {
    output_dir
        .join("pipelines")
        .join(format!("{}.json", file_stem(dataset)))
}

pub struct Run<'a, E: Engine> {
    pub boundary: &'a Boundary,
    pub catalog: &'a Catalog,
    pub config: &'a Config,
    pub engine: &'a E,
    /// Directory for this boundary's outputs.
    pub output_dir: PathBuf,
    pub dry_run: bool,
}

impl<'a, E: Engine> Run<'a, E> {
    /// Always writes a report. Only failing to write that report is an error.
    pub async fn execute(&self) -> Result<RunReport> {
        let mut report = RunReport::new(&self.boundary.name);
        report.dry_run = self.dry_run;

        if self.catalog.is_empty() {
            report.warn("The dataset catalog has no entries");
        }
        debug!("Searching {} catalog datasets", self.catalog.len());
        let intersecting = self.catalog.intersecting(self.boundary);
        report.record_intersecting(&intersecting);
        for (i, dataset) in intersecting.iter().enumerate() {
            match dataset.year {
                Some(year) => info!("  {}. {} ({year})", i + 1, dataset.identifier),
                None => info!("  {}. {} (unknown year)", i + 1, dataset.identifier),
            }
        }
        let guessed: Vec<&IntersectingDataset> = intersecting
            .iter()
            .filter(|d| d.year.is_some_and(|t| !t.is_reliable()))
            .collect();
        for dataset in guessed {
            warn!("Year of {} was read from a two-digit suffix", dataset.identifier);
            if self.config.most_recent {
                report.warn(format!(
                    "Year of {} was read from a two-digit suffix and may be wrong; check its ranking",
                    dataset.identifier
                ));
            }
        }
        if intersecting.is_empty() {
            warn!("No intersecting datasets found for {}", self.boundary.name);
            self.write_report(&report)?;
            return Ok(report);
        }

        let selection = select(&intersecting, self.config.selection_mode());
        report.record_selection(&selection);
        for note in &selection.notes {
            info!("{note}");
        }
        info!(
            "Selected {} of {} datasets ({})",
            selection.chosen.len(),
            intersecting.len(),
            selection.strategy
        );

        let temp_dir = self.output_dir.join("temp");
        let dataset_dir = if selection.requires_merge {
            &temp_dir
        } else {
            &self.output_dir
        };
        let options = self.config.pipeline_options(dataset_dir);
        let builder = PipelineBuilder::new(self.boundary, &options);
        let specs: Vec<PipelineSpec> = selection.chosen.iter().map(|d| builder.build(d)).collect();

        for spec in &specs {
            let path = audit_path(&self.output_dir, &spec.dataset);
            if let Err(e) = spec.write(&path) {
                warn!("Unable to save pipeline for {}: {e:#}", spec.dataset);
                report.warn(format!(
                    "Pipeline for {} could not be saved to {}: {e:#}",
                    spec.dataset,
                    path.display()
                ));
            }
        }

        if self.dry_run {
            info!("Dry run mode - not downloading files");
            self.write_report(&report)?;
            return Ok(report);
        }

        let outcomes = Orchestrator::new(self.engine, self.config.workers)
            .with_timeout(self.config.timeout())
            .with_min_points(self.config.min_points)
            .run(&specs)
            .await;
        report.outcomes = outcomes;
        if report.succeeded() == 0 {
            report.warn("No dataset was downloaded successfully");
        }

        let merge = if selection.requires_merge {
            let output = self
                .output_dir
                .join(format!("{}.laz", file_stem(&self.boundary.name)));
            let status = merge_outputs(self.engine, &report.outcomes, &output).await;
            match &status {
                MergeStatus::Skipped(_) | MergeStatus::Failed(_) => report.warn(status.to_string()),
                _ => {
                    if self.clean_up(&temp_dir).await {
                        // Those files are gone; the final output replaces them
                        for outcome in &mut report.outcomes {
                            if outcome.output.as_ref().is_some_and(|p| p.starts_with(&temp_dir)) {
                                outcome.output = None;
                            }
                        }
                    }
                }
            }
            status
        } else {
            MergeStatus::NotRequired
        };
        info!("{merge}");
        report.merge = Some(merge);

        self.write_report(&report)?;
        Ok(report)
    }

    /// Returns whether the temporary directory is gone afterwards.
    async fn clean_up(&self, temp_dir: &Path) -> bool {
        if self.config.keep_temp {
            return false;
        }
        match tokio::fs::remove_dir_all(temp_dir).await {
            Ok(()) => {
                info!("Removed temporary directory {}", temp_dir.display());
                true
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => true,
            Err(e) => {
                warn!("Unable to remove {}: {e}", temp_dir.display());
                false
            }
        }
    }

    fn write_report(&self, report: &RunReport) -> Result<()> {
        let path = report_path(&self.output_dir, &self.boundary.name);
        report.write(&path)?;
        info!("Download information saved to {}", path.display());
        Ok(())
    }
}
