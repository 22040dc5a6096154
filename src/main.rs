use anyhow::{anyhow, Result};
use clap::Parser;
use lidar_fetch::boundary::Boundary;
use lidar_fetch::catalog::Catalog;
use lidar_fetch::config::Config;
use lidar_fetch::engine::Pdal;
use lidar_fetch::pipeline::Resolution;
use lidar_fetch::report::RunReport;
use lidar_fetch::run::{report_path, Run};
use std::path::{Path, PathBuf};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "lidar-fetch")]
#[command(about = "Download USGS 3DEP LiDAR point clouds clipped to a GeoJSON boundary")]
struct Cli {
    /// Boundary GeoJSON file
    #[arg(long)]
    geojson: PathBuf,

    /// Parent directory for outputs
    #[arg(long)]
    output_dir: Option<PathBuf>,

    #[arg(long, default_value = "config.toml")]
    config: PathBuf,

    /// Dataset catalog, as a URL or a local GeoJSON file
    #[arg(long)]
    catalog: Option<String>,

    /// "full" or a point spacing in metres
    #[arg(long)]
    resolution: Option<Resolution>,

    #[arg(long)]
    workers: Option<usize>,

    /// Only keep the newest data where datasets overlap
    #[arg(long)]
    most_recent: bool,

    /// Keep ground-classified points only
    #[arg(long)]
    ground_only: bool,

    /// Remove statistical outliers
    #[arg(long)]
    outlier: bool,

    /// Reproject outputs, e.g. EPSG:26913
    #[arg(long)]
    target_crs: Option<String>,

    /// Per-dataset timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Build and save pipelines without running them
    #[arg(long)]
    dry_run: bool,

    /// Keep per-dataset files after merging
    #[arg(long)]
    keep_temp: bool,

    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn apply(&self, mut config: Config) -> Config {
        if let Some(dir) = &self.output_dir {
            config.output_dir = dir.clone();
        }
        if let Some(catalog) = &self.catalog {
            config.catalog_url = catalog.clone();
        }
        if let Some(resolution) = self.resolution {
            config.resolution = resolution;
        }
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if let Some(crs) = &self.target_crs {
            config.target_crs = Some(crs.clone());
        }
        if self.timeout.is_some() {
            config.timeout_secs = self.timeout;
        }
        config.most_recent |= self.most_recent;
        config.ground_only |= self.ground_only;
        config.outlier.enabled |= self.outlier;
        config.keep_temp |= self.keep_temp;
        config.validate()
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "lidar_fetch=debug"
    } else {
        "lidar_fetch=info"
    };
    let filter =
        tracing_subscriber::EnvFilter::new(std::env::var("RUST_LOG").unwrap_or_else(|_| default.into()));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Logs a fatal error and leaves a report behind before giving up.
fn abort(boundary: &str, output_dir: &Path, cause: anyhow::Error) -> Result<()> {
    error!("{cause:#}");
    let path = report_path(output_dir, boundary);
    match RunReport::fatal(boundary, &format!("{cause:#}")).write(&path) {
        Ok(()) => info!("Failure report saved to {}", path.display()),
        Err(e) => error!("Unable to write failure report: {e:#}"),
    }
    Err(cause)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = cli.apply(Config::load_or_create(&cli.config));
    let name = cli
        .geojson
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .ok_or_else(|| anyhow!("{} is not a file path", cli.geojson.display()))?;
    let output_dir = config.output_dir.join(&name);

    let boundary = match Boundary::read(&cli.geojson) {
        Ok(boundary) => boundary,
        Err(e) => return abort(&name, &output_dir, e.into()),
    };
    info!("Loaded boundary {} from {}", boundary.name, cli.geojson.display());

    let catalog = match Catalog::load(&config.catalog_url).await {
        Ok(catalog) => catalog,
        Err(e) => return abort(&name, &output_dir, e.into()),
    };

    let engine = Pdal::new(config.pdal.clone());
    let report = Run {
        boundary: &boundary,
        catalog: &catalog,
        config: &config,
        engine: &engine,
        output_dir,
        dry_run: cli.dry_run,
    }
    .execute()
    .await?;

    info!(
        "{} of {} datasets downloaded successfully",
        report.succeeded(),
        report.outcomes.len()
    );
    Ok(())
}
