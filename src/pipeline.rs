//! Declarative PDAL pipelines.
//!
//! A [`PipelineSpec`] holds one slot per stage kind, so the emitted stage
//! order is fixed no matter which options are enabled:
//! read, reproject, outlier removal, ground filtering, write.
use crate::boundary::Boundary;
use crate::catalog::IntersectingDataset;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// LAS classification code PDAL's outlier filter assigns to noise.
const NOISE_CLASS: u8 = 7;
const GROUND_CLASS: u8 = 2;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EptReader {
    pub filename: String,
    pub polygon: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reprojection {
    pub out_srs: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutlierFilter {
    pub method: String,
    pub mean_k: u32,
    pub multiplier: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RangeFilter {
    pub limits: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroundClassifier {}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LasReader {
    pub filename: String,
    pub tag: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MergeFilter {
    pub inputs: Vec<String>,
    pub tag: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LasWriter {
    pub filename: String,
    pub minor_version: u8,
    pub dataformat_id: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inputs: Option<Vec<String>>,
}

impl LasWriter {
    pub fn new(output: &Path) -> Self {
        Self {
            filename: output.to_string_lossy().into_owned(),
            minor_version: 4,
            dataformat_id: 8,
            inputs: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum Stage {
    #[serde(rename = "readers.ept")]
    ReadEpt(EptReader),
    #[serde(rename = "readers.las")]
    ReadLas(LasReader),
    #[serde(rename = "filters.reprojection")]
    Reproject(Reprojection),
    #[serde(rename = "filters.outlier")]
    Outlier(OutlierFilter),
    #[serde(rename = "filters.range")]
    Range(RangeFilter),
    #[serde(rename = "filters.smrf")]
    ClassifyGround(GroundClassifier),
    #[serde(rename = "filters.merge")]
    Merge(MergeFilter),
    #[serde(rename = "writers.las")]
    WriteLas(LasWriter),
}

impl Stage {
    pub fn kind(&self) -> &'static str {
        match self {
            Stage::ReadEpt(_) => "readers.ept",
            Stage::ReadLas(_) => "readers.las",
            Stage::Reproject(_) => "filters.reprojection",
            Stage::Outlier(_) => "filters.outlier",
            Stage::Range(_) => "filters.range",
            Stage::ClassifyGround(_) => "filters.smrf",
            Stage::Merge(_) => "filters.merge",
            Stage::WriteLas(_) => "writers.las",
        }
    }
}

#[derive(Serialize)]
struct PipelineDocument<'a> {
    pipeline: &'a [Stage],
}

/// Anything the processing engine can run: an ordered stage list that ends
/// in a single output file.
pub trait Pipeline {
    fn label(&self) -> &str;

    fn stages(&self) -> Vec<Stage>;

    fn output(&self) -> &Path;

    fn to_json(&self) -> Result<String> {
        let stages = self.stages();
        let content = serde_json::to_string_pretty(&PipelineDocument { pipeline: &stages })?;
        Ok(content)
    }

    fn write<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.to_json()?)?;
        Ok(())
    }
}

/// The pipeline for downloading one dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSpec {
    pub dataset: String,
    output: PathBuf,
    reader: EptReader,
    reprojection: Option<Reprojection>,
    outlier: Option<OutlierFilter>,
    ground_only: bool,
    writer: LasWriter,
}

impl Pipeline for PipelineSpec {
    fn label(&self) -> &str {
        &self.dataset
    }

    fn stages(&self) -> Vec<Stage> {
        let mut stages = vec![Stage::ReadEpt(self.reader.clone())];
        if let Some(reprojection) = &self.reprojection {
            stages.push(Stage::Reproject(reprojection.clone()));
        }
        if let Some(outlier) = &self.outlier {
            stages.push(Stage::Outlier(outlier.clone()));
            stages.push(Stage::Range(RangeFilter {
                limits: format!("Classification![{NOISE_CLASS}:{NOISE_CLASS}]"),
            }));
        }
        // Ground classification runs on already denoised points
        if self.ground_only {
            stages.push(Stage::ClassifyGround(GroundClassifier {}));
            stages.push(Stage::Range(RangeFilter {
                limits: format!("Classification[{GROUND_CLASS}:{GROUND_CLASS}]"),
            }));
        }
        stages.push(Stage::WriteLas(self.writer.clone()));
        stages
    }

    fn output(&self) -> &Path {
        &self.output
    }
}

/// Point density for the remote read.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(try_from = "RawResolution", into = "RawResolution")]
pub enum Resolution {
    /// Native density, the `"full"` sentinel.
    #[default]
    Full,
    /// Point spacing passed through to the reader untouched.
    Spacing(f64),
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RawResolution {
    Spacing(f64),
    Text(String),
}

impl TryFrom<RawResolution> for Resolution {
    type Error = String;

    fn try_from(raw: RawResolution) -> Result<Self, Self::Error> {
        match raw {
            RawResolution::Spacing(v) => Ok(Resolution::Spacing(v)),
            RawResolution::Text(text) => text.parse(),
        }
    }
}

impl From<Resolution> for RawResolution {
    fn from(resolution: Resolution) -> Self {
        match resolution {
            Resolution::Full => RawResolution::Text("full".to_string()),
            Resolution::Spacing(v) => RawResolution::Spacing(v),
        }
    }
}

impl FromStr for Resolution {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("full") {
            return Ok(Resolution::Full);
        }
        s.parse::<f64>()
            .map(Resolution::Spacing)
            .map_err(|_| format!("invalid resolution '{s}': expected 'full' or a number"))
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolution::Full => write!(f, "full"),
            Resolution::Spacing(v) => write!(f, "{v}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OutlierOptions {
    pub mean_k: u32,
    pub multiplier: f64,
}

/// User options that shape every dataset's pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOptions {
    pub output_dir: PathBuf,
    pub region: String,
    pub resolution: Resolution,
    pub target_crs: Option<String>,
    pub outlier: Option<OutlierOptions>,
    pub ground_only: bool,
}

pub struct PipelineBuilder<'a> {
    polygon: String,
    options: &'a PipelineOptions,
}

impl<'a> PipelineBuilder<'a> {
    pub fn new(boundary: &Boundary, options: &'a PipelineOptions) -> Self {
        Self {
            polygon: boundary.to_geojson_string(),
            options,
        }
    }

    pub fn build(&self, dataset: &IntersectingDataset) -> PipelineSpec {
        let options = self.options;
        let output = output_path(&options.output_dir, &dataset.identifier);
        let resolution = match options.resolution {
            Resolution::Full => None,
            Resolution::Spacing(v) => Some(v),
        };

        PipelineSpec {
            dataset: dataset.identifier.clone(),
            reader: EptReader {
                filename: dataset.location.ept_url(&options.region),
                polygon: self.polygon.clone(),
                resolution,
            },
            reprojection: options.target_crs.as_ref().map(|crs| Reprojection {
                out_srs: crs.clone(),
            }),
            outlier: options.outlier.map(|o| OutlierFilter {
                method: "statistical".to_string(),
                mean_k: o.mean_k,
                multiplier: o.multiplier,
            }),
            ground_only: options.ground_only,
            writer: LasWriter::new(&output),
            output,
        }
    }
}

/// `<dir>/<identifier>.laz`, with path-hostile characters replaced.
pub fn output_path(dir: &Path, identifier: &str) -> PathBuf {
    dir.join(format!("{}.laz", file_stem(identifier)))
}

pub fn file_stem(identifier: &str) -> String {
    identifier
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '_' | '-' | '.' => c,
            _ => '_',
        })
        .collect()
}
