use crate::boundary::Boundary;
use crate::error::CatalogError;
use crate::geo_utils::{as_multi_polygon, clip};
use crate::temporal::{extract_year_token, YearToken};
use geo::{Geometry, MultiPolygon};
use geojson::{Feature, GeoJson};
use regex::Regex;
use std::fs;
use std::path::Path;
use std::sync::LazyLock;
use tracing::{debug, info, warn};
use url::Url;

pub const USGS_LIDAR_BOUNDARIES_URL: &str =
    "https://raw.githubusercontent.com/hobu/usgs-lidar/master/boundaries/resources.geojson";

static S3_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"amazonaws\.com/(?<bucket>[^/]+)/(?<prefix>[^/]+)")
        .expect("Regex pattern should always compile")
});

/// Where a dataset's Entwine Point Tile resource lives in public S3.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Location {
    pub bucket: String,
    pub prefix: String,
}

impl S3Location {
    pub fn from_url(url: &str) -> Option<Self> {
        let captures = S3_PATH.captures(url)?;
        let (_, [bucket, prefix]) = captures.extract();
        Some(Self {
            bucket: bucket.to_string(),
            prefix: prefix.to_string(),
        })
    }

    pub fn ept_url(&self, region: &str) -> String {
        format!(
            "https://s3-{region}.amazonaws.com/{}/{}/ept.json",
            self.bucket, self.prefix
        )
    }
}

#[derive(Debug, Clone)]
pub struct CatalogEntry {
    pub identifier: String,
    pub footprint: MultiPolygon<f64>,
    pub year: Option<YearToken>,
    pub location: S3Location,
}

impl CatalogEntry {
    fn from_feature(feature: Feature) -> Result<Self, String> {
        let identifier = feature
            .property("name")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .ok_or("missing 'name' property")?
            .to_string();
        let url = feature
            .property("url")
            .and_then(|v| v.as_str())
            .ok_or_else(|| format!("{identifier}: missing 'url' property"))?;
        let location = S3Location::from_url(url)
            .ok_or_else(|| format!("{identifier}: no S3 location in {url}"))?;
        let geometry = feature
            .geometry
            .ok_or_else(|| format!("{identifier}: no geometry"))?;
        let geometry = Geometry::<f64>::try_from(geometry)
            .map_err(|e| format!("{identifier}: invalid geometry: {e}"))?;
        let footprint = as_multi_polygon(geometry)
            .ok_or_else(|| format!("{identifier}: footprint is not a polygon"))?;

        Ok(Self {
            year: extract_year_token(&identifier),
            identifier,
            footprint,
            location,
        })
    }
}

/// A catalog entry whose footprint genuinely overlaps the boundary.
#[derive(Debug, Clone)]
pub struct IntersectingDataset {
    pub identifier: String,
    pub footprint: MultiPolygon<f64>,
    /// The footprint clipped to the boundary.
    pub coverage: MultiPolygon<f64>,
    pub year: Option<YearToken>,
    pub location: S3Location,
}

impl IntersectingDataset {
    pub fn year(&self) -> Option<u16> {
        self.year.map(|t| t.year)
    }
}

/// Known dataset footprints, loaded once per run and read-only afterwards.
#[derive(Debug, Clone)]
pub struct Catalog {
    entries: Vec<CatalogEntry>,
}

impl Catalog {
    pub fn new(entries: Vec<CatalogEntry>) -> Self {
        Self { entries }
    }

    pub async fn fetch(url: &Url) -> Result<Self, CatalogError> {
        info!("Downloading dataset catalog from {url}");
        let fetch_err = |source| CatalogError::Fetch {
            url: url.to_string(),
            source,
        };
        let content = reqwest::get(url.as_str())
            .await
            .and_then(|r| r.error_for_status())
            .map_err(fetch_err)?
            .text()
            .await
            .map_err(fetch_err)?;
        Self::from_geojson_str(&content)
    }

    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self, CatalogError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| CatalogError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_geojson_str(&content)
    }

    /// `source` is an http(s) URL or a local file path.
    pub async fn load(source: &str) -> Result<Self, CatalogError> {
        match Url::parse(source) {
            Ok(url) if matches!(url.scheme(), "http" | "https") => Self::fetch(&url).await,
            _ => Self::read(source),
        }
    }

    pub fn from_geojson_str(content: &str) -> Result<Self, CatalogError> {
        let GeoJson::FeatureCollection(collection) = content.parse::<GeoJson>()? else {
            return Err(CatalogError::NotFeatureCollection);
        };

        let mut entries = vec![];
        for feature in collection.features {
            match CatalogEntry::from_feature(feature) {
                Ok(entry) => entries.push(entry),
                Err(reason) => warn!("Skipping catalog feature: {reason}"),
            }
        }
        if entries.is_empty() {
            return Err(CatalogError::NoEntries);
        }
        info!("Loaded {} dataset footprints", entries.len());
        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Every entry whose footprint shares a positive area with the
    /// boundary, sorted by identifier.
    pub fn intersecting(&self, boundary: &Boundary) -> Vec<IntersectingDataset> {
        let mut found: Vec<IntersectingDataset> = self
            .entries
            .iter()
            .filter_map(|entry| {
                let coverage = clip(&entry.footprint, boundary.shape())?;
                debug!("{} intersects {}", entry.identifier, boundary.name);
                Some(IntersectingDataset {
                    identifier: entry.identifier.clone(),
                    footprint: entry.footprint.clone(),
                    coverage,
                    year: entry.year,
                    location: entry.location.clone(),
                })
            })
            .collect();
        found.sort_by(|a, b| a.identifier.cmp(&b.identifier));
        info!("Found {} intersecting datasets", found.len());
        found
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::entry;
    use super::*;
    use crate::geo_utils::fixtures::square;
    use geo::Area;

    const CATALOG: &str = r#"{
        "type": "FeatureCollection",
        "features": [
            {
                "type": "Feature",
                "properties": {
                    "name": "AR_Dardenelle_2011",
                    "url": "https://s3-us-west-2.amazonaws.com/usgs-lidar-public/AR_Dardenelle_2011/ept.json"
                },
                "geometry": {"type": "Polygon", "coordinates": [[[0, 0], [1, 0], [1, 1], [0, 1], [0, 0]]]}
            },
            {
                "type": "Feature",
                "properties": {"name": "NoUrl_2015"},
                "geometry": {"type": "Polygon", "coordinates": [[[0, 0], [1, 0], [1, 1], [0, 1], [0, 0]]]}
            },
            {
                "type": "Feature",
                "properties": {
                    "name": "Line_2016",
                    "url": "https://s3-us-west-2.amazonaws.com/usgs-lidar-public/Line_2016/ept.json"
                },
                "geometry": {"type": "LineString", "coordinates": [[0, 0], [1, 1]]}
            }
        ]
    }"#;

    #[test]
    fn test_s3_location_from_url() {
        let url = "https://s3-us-west-2.amazonaws.com/usgs-lidar-public/AR_Dardenelle_2011/ept.json";
        let location = S3Location::from_url(url).unwrap();
        assert_eq!(
            location,
            S3Location {
                bucket: "usgs-lidar-public".to_string(),
                prefix: "AR_Dardenelle_2011".to_string(),
            }
        );
        assert_eq!(
            location.ept_url("us-east-1"),
            "https://s3-us-east-1.amazonaws.com/usgs-lidar-public/AR_Dardenelle_2011/ept.json"
        );
        assert_eq!(S3Location::from_url("https://example.com/ept.json"), None);
    }

    #[test]
    fn test_parse_skips_unusable_features() {
        let catalog = Catalog::from_geojson_str(CATALOG).unwrap();
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.entries[0].identifier, "AR_Dardenelle_2011");
        assert_eq!(catalog.entries[0].year.map(|t| t.year), Some(2011));
    }

    #[test]
    fn test_parse_errors() {
        let err = Catalog::from_geojson_str(r#"{"type": "Point", "coordinates": [0, 0]}"#)
            .unwrap_err();
        assert!(matches!(err, CatalogError::NotFeatureCollection));

        let err = Catalog::from_geojson_str(r#"{"type": "FeatureCollection", "features": []}"#)
            .unwrap_err();
        assert!(matches!(err, CatalogError::NoEntries));

        let err = Catalog::from_geojson_str("not json").unwrap_err();
        assert!(matches!(err, CatalogError::Parse(_)));
    }

    #[test]
    fn test_read_missing_file() {
        let err = Catalog::read("/nonexistent/catalog.geojson").unwrap_err();
        assert!(matches!(err, CatalogError::Read { .. }));
    }

    #[tokio::test]
    async fn test_load_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("resources.geojson");
        fs::write(&path, CATALOG).unwrap();
        let catalog = Catalog::load(path.to_str().unwrap()).await.unwrap();
        assert_eq!(catalog.len(), 1);

        let err = Catalog::load("no/such/catalog.geojson").await.unwrap_err();
        assert!(matches!(err, CatalogError::Read { .. }));
    }

    #[test]
    fn test_intersecting() {
        let catalog = Catalog::new(vec![
            entry("Inside_2020", 0.25, 0.25, 0.5),
            entry("Partial_2018", 0.5, 0.5, 1.0),
            entry("Touching_2019", 1.0, 0.0, 1.0),
            entry("Far_2021", 10.0, 10.0, 1.0),
        ]);
        let boundary = Boundary::new("site", square(0.0, 0.0, 1.0)).unwrap();

        let found = catalog.intersecting(&boundary);
        let ids: Vec<_> = found.iter().map(|d| d.identifier.as_str()).collect();
        assert_eq!(ids, vec!["Inside_2020", "Partial_2018"]);

        // Coverage is clipped to the boundary
        let partial = &found[1];
        assert!((partial.coverage.unsigned_area() - 0.25).abs() < 1e-9);
        assert!((partial.footprint.unsigned_area() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_no_intersections() {
        let catalog = Catalog::new(vec![entry("Far_2021", 10.0, 10.0, 1.0)]);
        let boundary = Boundary::new("site", square(0.0, 0.0, 1.0)).unwrap();
        assert!(catalog.intersecting(&boundary).is_empty());
    }
}
