//! The human readable record of one run.
use crate::catalog::IntersectingDataset;
use crate::merge::MergeStatus;
use crate::orchestrator::DownloadOutcome;
use crate::selection::{SelectionMode, SelectionNote, SelectionResult};
use crate::temporal::YearToken;
use anyhow::Result;
use chrono::{DateTime, Local};
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, PartialEq)]
pub struct DatasetSummary {
    pub identifier: String,
    pub year: Option<YearToken>,
}

impl DatasetSummary {
    fn describe(&self) -> String {
        match &self.year {
            Some(year) => format!("{} ({year})", self.identifier),
            None => format!("{} (unknown year)", self.identifier),
        }
    }
}

impl From<&IntersectingDataset> for DatasetSummary {
    fn from(dataset: &IntersectingDataset) -> Self {
        Self {
            identifier: dataset.identifier.clone(),
            year: dataset.year,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectionSummary {
    pub strategy: SelectionMode,
    pub requires_merge: bool,
    pub chosen: Vec<DatasetSummary>,
    pub notes: Vec<SelectionNote>,
}

impl From<&SelectionResult> for SelectionSummary {
    fn from(selection: &SelectionResult) -> Self {
        Self {
            strategy: selection.strategy,
            requires_merge: selection.requires_merge,
            chosen: selection.chosen.iter().map(DatasetSummary::from).collect(),
            notes: selection.notes.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub boundary: String,
    pub generated_at: DateTime<Local>,
    pub intersecting: Vec<DatasetSummary>,
    pub selection: Option<SelectionSummary>,
    pub outcomes: Vec<DownloadOutcome>,
    pub merge: Option<MergeStatus>,
    pub dry_run: bool,
    pub warnings: Vec<String>,
    pub fatal: Option<String>,
}

impl RunReport {
    pub fn new(boundary: &str) -> Self {
        Self {
            boundary: boundary.to_string(),
            generated_at: Local::now(),
            intersecting: vec![],
            selection: None,
            outcomes: vec![],
            merge: None,
            dry_run: false,
            warnings: vec![],
            fatal: None,
        }
    }

    /// A report for a run that stopped before anything was computed.
    pub fn fatal(boundary: &str, cause: &str) -> Self {
        Self {
            fatal: Some(cause.to_string()),
            ..Self::new(boundary)
        }
    }

    pub fn record_intersecting(&mut self, datasets: &[IntersectingDataset]) {
        self.intersecting = datasets.iter().map(DatasetSummary::from).collect();
    }

    pub fn record_selection(&mut self, selection: &SelectionResult) {
        self.selection = Some(SelectionSummary::from(selection));
    }

    pub fn warn(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        // Writing to a String cannot fail
        let _ = self.render_into(&mut out);
        out
    }

    fn render_into(&self, out: &mut String) -> std::fmt::Result {
        writeln!(out, "USGS LiDAR Download Report")?;
        writeln!(
            out,
            "Generated on: {}",
            self.generated_at.format("%Y-%m-%d %H:%M:%S")
        )?;
        writeln!(out, "Boundary: {}", self.boundary)?;

        if let Some(cause) = &self.fatal {
            writeln!(out)?;
            writeln!(out, "Run aborted: {cause}")?;
            return Ok(());
        }

        writeln!(out)?;
        writeln!(out, "Intersecting Datasets ({}):", self.intersecting.len())?;
        if self.intersecting.is_empty() {
            writeln!(
                out,
                "  0 intersecting datasets: no catalog dataset covers the boundary"
            )?;
        }
        for (i, dataset) in self.intersecting.iter().enumerate() {
            writeln!(out, "  {}. {}", i + 1, dataset.describe())?;
        }

        if let Some(selection) = &self.selection {
            writeln!(out)?;
            writeln!(out, "Download Strategy: {}", selection.strategy)?;
            writeln!(out, "Selected Datasets ({}):", selection.chosen.len())?;
            for (i, dataset) in selection.chosen.iter().enumerate() {
                writeln!(out, "  {}. {}", i + 1, dataset.describe())?;
            }
            if !selection.notes.is_empty() {
                writeln!(out, "Selection Notes:")?;
                for note in &selection.notes {
                    writeln!(out, "  - {note}")?;
                }
            }
        }

        writeln!(out)?;
        writeln!(out, "Download Log:")?;
        if self.dry_run {
            writeln!(out, "  - Dry run: pipelines were built but not executed")?;
        } else if self.outcomes.is_empty() {
            writeln!(out, "  - No downloads were attempted")?;
        } else {
            for outcome in &self.outcomes {
                writeln!(out, "  - {outcome}")?;
            }
            writeln!(
                out,
                "  {} of {} datasets downloaded successfully",
                self.succeeded(),
                self.outcomes.len()
            )?;
        }

        if !self.dry_run && self.succeeded() > 0 {
            writeln!(out)?;
            match self.merge.as_ref().and_then(MergeStatus::final_output) {
                Some(output) => writeln!(
                    out,
                    "Final LAZ file {} contains data from:",
                    output.display()
                )?,
                None => writeln!(out, "Source ID to Year Mapping:")?,
            }
            for outcome in self.outcomes.iter().filter(|o| o.is_success()) {
                writeln!(out, "  - {}: {}", outcome.dataset, self.year_of(&outcome.dataset))?;
            }
        }

        if !self.warnings.is_empty() {
            writeln!(out)?;
            writeln!(out, "Warnings:")?;
            for warning in &self.warnings {
                writeln!(out, "  - {warning}")?;
            }
        }

        writeln!(out)?;
        writeln!(out, "Result: {}", self.closing_statement())?;
        Ok(())
    }

    fn year_of(&self, identifier: &str) -> String {
        self.intersecting
            .iter()
            .find(|d| d.identifier == identifier)
            .and_then(|d| d.year)
            .map_or_else(|| "unknown year".to_string(), |year| year.to_string())
    }

    fn closing_statement(&self) -> String {
        if let Some(merge) = &self.merge {
            return merge.to_string();
        }
        if self.dry_run {
            "No merge performed: dry run".to_string()
        } else if self.intersecting.is_empty() {
            "No merge performed: no datasets intersect the boundary".to_string()
        } else {
            MergeStatus::NotRequired.to_string()
        }
    }

    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.render())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::fixtures::dataset;
    use crate::selection::select;
    use chrono::TimeZone;
    use std::path::PathBuf;

    fn report() -> RunReport {
        RunReport {
            generated_at: Local.with_ymd_and_hms(2024, 5, 4, 12, 30, 0).unwrap(),
            ..RunReport::new("site")
        }
    }

    #[test]
    fn test_zero_intersections() {
        let text = report().render();
        assert!(text.contains("Boundary: site"));
        assert!(text.contains("Generated on: 2024-05-04 12:30:00"));
        assert!(text.contains("0 intersecting datasets"));
        assert!(text.contains("No downloads were attempted"));
        assert!(text.contains("Result: No merge performed: no datasets intersect the boundary"));
    }

    #[test]
    fn test_full_report() {
        let datasets = vec![
            dataset("North_2020", 0.0, 0.0, 1.0),
            dataset("South_2020", 0.5, 0.5, 1.0),
            dataset("Mystery", 0.2, 0.2, 1.0),
        ];
        let selection = select(&datasets, SelectionMode::MostRecentOnly);
        let mut report = report();
        report.record_intersecting(&datasets);
        report.record_selection(&selection);
        report.outcomes = vec![
            DownloadOutcome {
                dataset: "North_2020".to_string(),
                status: crate::orchestrator::DownloadStatus::Succeeded,
                output: Some(PathBuf::from("/out/temp/North_2020.laz")),
                point_count: Some(1234),
            },
            DownloadOutcome::failed("South_2020", "pdal pipeline failed"),
        ];
        report.merge = Some(MergeStatus::Copied {
            dataset: "North_2020".to_string(),
            output: PathBuf::from("/out/site.laz"),
        });
        report.warn("South_2020 could not be downloaded");

        let text = report.render();
        assert!(text.contains("Intersecting Datasets (3):"));
        assert!(text.contains("  3. Mystery (unknown year)"));
        assert!(text.contains("Download Strategy: Most recent data only"));
        assert!(text.contains("Tie: North_2020, South_2020 share the most recent year 2020"));
        assert!(text.contains("Skipped Mystery (unknown year): superseded by 2020 data"));
        assert!(text.contains("North_2020: succeeded -> /out/temp/North_2020.laz (1234 points)"));
        assert!(text.contains("South_2020: failed: pdal pipeline failed"));
        assert!(text.contains("1 of 2 datasets downloaded successfully"));
        assert!(text.contains("Final LAZ file /out/site.laz contains data from:\n  - North_2020: 2020\n"));
        assert!(text.contains("Warnings:\n  - South_2020 could not be downloaded"));
        assert!(text.ends_with(
            "Result: No merge performed: only North_2020 succeeded, copied to /out/site.laz\n"
        ));
        assert_eq!(text, report.render());
    }

    #[test]
    fn test_source_years_without_merge() {
        let datasets = vec![
            dataset("A_2015", 0.0, 0.0, 1.0),
            dataset("B_D22", 2.0, 0.0, 1.0),
        ];
        let mut report = report();
        report.record_intersecting(&datasets);
        report.outcomes = vec![
            DownloadOutcome {
                dataset: "A_2015".to_string(),
                status: crate::orchestrator::DownloadStatus::Succeeded,
                output: Some(PathBuf::from("/out/A_2015.laz")),
                point_count: None,
            },
            DownloadOutcome {
                dataset: "B_D22".to_string(),
                status: crate::orchestrator::DownloadStatus::Succeeded,
                output: Some(PathBuf::from("/out/B_D22.laz")),
                point_count: None,
            },
        ];
        report.merge = Some(MergeStatus::NotRequired);

        let text = report.render();
        assert!(text.contains(
            "Source ID to Year Mapping:\n  - A_2015: 2015\n  - B_D22: 2022 (suffix-derived)\n"
        ));
    }

    #[test]
    fn test_fatal_report() {
        let report = RunReport::fatal("site", "Catalog is not a GeoJSON FeatureCollection");
        let text = report.render();
        assert!(text.contains("Run aborted: Catalog is not a GeoJSON FeatureCollection"));
        assert!(!text.contains("Download Log"));
    }

    #[test]
    fn test_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("site_report.txt");
        let report = report();
        report.write(&path).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), report.render());
    }
}
