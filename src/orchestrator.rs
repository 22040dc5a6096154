//! Bounded concurrent execution of one pipeline per chosen dataset.
//!
//! Every unit moves `Pending -> Running -> Succeeded | Failed`. A failure,
//! timeout or panic inside a unit is turned into a `Failed` outcome at the
//! unit boundary and never stops sibling units. Outcomes land in a slot
//! reserved for their submission index, so the returned list is in
//! submission order whatever order units finish in.
use crate::engine::{Engine, EngineRun};
use crate::pipeline::PipelineSpec;
use futures_util::stream::{self, StreamExt};
use futures_util::FutureExt;
use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum DownloadStatus {
    Succeeded,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct DownloadOutcome {
    pub dataset: String,
    pub status: DownloadStatus,
    pub output: Option<PathBuf>,
    pub point_count: Option<u64>,
}

impl DownloadOutcome {
    pub fn failed(dataset: &str, reason: impl Into<String>) -> Self {
        Self {
            dataset: dataset.to_string(),
            status: DownloadStatus::Failed(reason.into()),
            output: None,
            point_count: None,
        }
    }

    fn succeeded(dataset: &str, run: EngineRun) -> Self {
        Self {
            dataset: dataset.to_string(),
            status: DownloadStatus::Succeeded,
            output: Some(run.output),
            point_count: run.point_count,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == DownloadStatus::Succeeded
    }
}

impl fmt::Display for DownloadOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.status {
            DownloadStatus::Succeeded => {
                write!(f, "{}: succeeded", self.dataset)?;
                if let Some(output) = &self.output {
                    write!(f, " -> {}", output.display())?;
                }
                if let Some(count) = self.point_count {
                    write!(f, " ({count} points)")?;
                }
                Ok(())
            }
            DownloadStatus::Failed(reason) => write!(f, "{}: failed: {reason}", self.dataset),
        }
    }
}

pub struct Orchestrator<'a, E: Engine> {
    engine: &'a E,
    max_workers: usize,
    timeout: Option<Duration>,
    min_points: u64,
}

impl<'a, E: Engine> Orchestrator<'a, E> {
    /// `max_workers` is clamped to at least one.
    pub fn new(engine: &'a E, max_workers: usize) -> Self {
        Self {
            engine,
            max_workers: max_workers.max(1),
            timeout: None,
            min_points: 0,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Outputs with fewer points than this are discarded as failures.
    pub fn with_min_points(mut self, min_points: u64) -> Self {
        self.min_points = min_points;
        self
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    pub async fn run(&self, specs: &[PipelineSpec]) -> Vec<DownloadOutcome> {
        info!(
            "Processing {} datasets with up to {} workers",
            specs.len(),
            self.max_workers
        );
        let mut slots: Vec<Option<DownloadOutcome>> = vec![None; specs.len()];

        let units = specs.iter().enumerate().map(|(index, spec)| {
            debug!(index, dataset = %spec.dataset, "pending");
            async move { (index, self.run_unit(index, spec).await) }
        });
        let mut completed = stream::iter(units).buffer_unordered(self.max_workers);
        while let Some((index, outcome)) = completed.next().await {
            slots[index] = Some(outcome);
        }

        slots
            .into_iter()
            .zip(specs)
            .map(|(slot, spec)| {
                slot.unwrap_or_else(|| {
                    DownloadOutcome::failed(&spec.dataset, "unit did not report an outcome")
                })
            })
            .collect()
    }

    async fn run_unit(&self, index: usize, spec: &PipelineSpec) -> DownloadOutcome {
        debug!(index, dataset = %spec.dataset, "running");
        let unit = AssertUnwindSafe(self.engine.execute(spec)).catch_unwind();
        let result = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, unit).await {
                Ok(result) => result,
                Err(_) => {
                    let outcome = DownloadOutcome::failed(
                        &spec.dataset,
                        format!("timed out after {}s", limit.as_secs_f64()),
                    );
                    warn!(index, "{outcome}");
                    return outcome;
                }
            },
            None => unit.await,
        };

        let outcome = match result {
            Err(panic) => DownloadOutcome::failed(
                &spec.dataset,
                format!("worker panicked: {}", panic_message(panic.as_ref())),
            ),
            Ok(Err(e)) => DownloadOutcome::failed(&spec.dataset, format!("{e:#}")),
            Ok(Ok(run)) => self.check_point_count(spec, run).await,
        };
        match outcome.status {
            DownloadStatus::Succeeded => info!(index, "{outcome}"),
            DownloadStatus::Failed(_) => warn!(index, "{outcome}"),
        }
        outcome
    }

    async fn check_point_count(&self, spec: &PipelineSpec, run: EngineRun) -> DownloadOutcome {
        let Some(count) = run.point_count else {
            return DownloadOutcome::succeeded(&spec.dataset, run);
        };
        if count >= self.min_points {
            return DownloadOutcome::succeeded(&spec.dataset, run);
        }

        if let Err(e) = tokio::fs::remove_file(&run.output).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Unable to remove {}: {e}", run.output.display());
            }
        }
        let reason = if count == 0 {
            "no points found within the boundary".to_string()
        } else {
            format!("only {count} points, below threshold {}", self.min_points)
        };
        DownloadOutcome {
            point_count: Some(count),
            ..DownloadOutcome::failed(&spec.dataset, reason)
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boundary::Boundary;
    use crate::catalog::fixtures::dataset;
    use crate::engine::fixtures::MockEngine;
    use crate::geo_utils::fixtures::square;
    use crate::pipeline::{PipelineBuilder, PipelineOptions, Resolution};
    use std::sync::atomic::Ordering;

    fn specs(ids: &[&str]) -> Vec<PipelineSpec> {
        let boundary = Boundary::new("site", square(0.0, 0.0, 1.0)).unwrap();
        let options = PipelineOptions {
            output_dir: PathBuf::from("/data/site"),
            region: "us-west-2".to_string(),
            resolution: Resolution::Full,
            target_crs: None,
            outlier: None,
            ground_only: false,
        };
        let builder = PipelineBuilder::new(&boundary, &options);
        ids.iter()
            .map(|id| builder.build(&dataset(id, 0.0, 0.0, 1.0)))
            .collect()
    }

    fn statuses(outcomes: &[DownloadOutcome]) -> Vec<bool> {
        outcomes.iter().map(|o| o.is_success()).collect()
    }

    #[tokio::test]
    async fn test_failure_is_isolated() {
        let engine = MockEngine::failing(&["B_2019"]);
        let specs = specs(&["A_2020", "B_2019", "C_2018"]);
        let outcomes = Orchestrator::new(&engine, 3).run(&specs).await;

        assert_eq!(outcomes.len(), 3);
        assert_eq!(statuses(&outcomes), vec![true, false, true]);
        assert_eq!(outcomes[1].dataset, "B_2019");
        assert_eq!(
            outcomes[1].status,
            DownloadStatus::Failed("simulated network failure for B_2019".to_string())
        );
        assert_eq!(
            outcomes[0].output,
            Some(PathBuf::from("/data/site/A_2020.laz"))
        );
    }

    #[tokio::test]
    async fn test_panic_is_isolated() {
        let mut engine = MockEngine::default();
        engine.panicking.insert("B_2019".to_string());
        let specs = specs(&["A_2020", "B_2019", "C_2018"]);
        let outcomes = Orchestrator::new(&engine, 2).run(&specs).await;

        assert_eq!(statuses(&outcomes), vec![true, false, true]);
        assert_eq!(
            outcomes[1].status,
            DownloadStatus::Failed("worker panicked: engine crashed on B_2019".to_string())
        );
    }

    #[tokio::test]
    async fn test_outcomes_follow_submission_order() {
        let mut engine = MockEngine::default();
        engine
            .slow
            .insert("A_2020".to_string(), Duration::from_millis(80));
        engine
            .slow
            .insert("B_2019".to_string(), Duration::from_millis(40));
        let specs = specs(&["A_2020", "B_2019", "C_2018"]);
        let outcomes = Orchestrator::new(&engine, 3).run(&specs).await;

        let order: Vec<_> = outcomes.iter().map(|o| o.dataset.as_str()).collect();
        assert_eq!(order, vec!["A_2020", "B_2019", "C_2018"]);
        // C finished first, A last
        assert_eq!(engine.labels(), vec!["C_2018", "B_2019", "A_2020"]);
    }

    #[tokio::test]
    async fn test_worker_limit() {
        let engine = MockEngine::default();
        let specs = specs(&["A", "B", "C", "D", "E", "F"]);
        Orchestrator::new(&engine, 2).run(&specs).await;
        assert_eq!(engine.peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_zero_workers_is_clamped() {
        let engine = MockEngine::default();
        let orchestrator = Orchestrator::new(&engine, 0);
        assert_eq!(orchestrator.max_workers(), 1);
        let outcomes = orchestrator.run(&specs(&["A", "B"])).await;
        assert_eq!(statuses(&outcomes), vec![true, true]);
        assert_eq!(engine.peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_timeout() {
        let mut engine = MockEngine::default();
        engine
            .slow
            .insert("Slow".to_string(), Duration::from_secs(30));
        let outcomes = Orchestrator::new(&engine, 2)
            .with_timeout(Some(Duration::from_millis(50)))
            .run(&specs(&["Slow", "Fast"]))
            .await;
        assert_eq!(statuses(&outcomes), vec![false, true]);
        assert_eq!(
            outcomes[0].status,
            DownloadStatus::Failed("timed out after 0.05s".to_string())
        );
    }

    #[tokio::test]
    async fn test_min_points() {
        let mut engine = MockEngine::default();
        engine.point_counts.insert("Sparse".to_string(), 40);
        engine.point_counts.insert("Empty".to_string(), 0);
        let outcomes = Orchestrator::new(&engine, 2)
            .with_min_points(100)
            .run(&specs(&["Sparse", "Empty", "Dense"]))
            .await;

        assert_eq!(statuses(&outcomes), vec![false, false, true]);
        assert_eq!(
            outcomes[0].status,
            DownloadStatus::Failed("only 40 points, below threshold 100".to_string())
        );
        assert_eq!(outcomes[0].point_count, Some(40));
        assert_eq!(
            outcomes[1].status,
            DownloadStatus::Failed("no points found within the boundary".to_string())
        );
    }

    #[tokio::test]
    async fn test_no_work() {
        let engine = MockEngine::default();
        let outcomes = Orchestrator::new(&engine, 4).run(&[]).await;
        assert!(outcomes.is_empty());
        assert!(engine.labels().is_empty());
    }
}
