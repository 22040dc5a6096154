use thiserror::Error;

/// Problems with the user supplied boundary. These abort the run before any
/// catalog access happens.
#[derive(Error, Debug)]
pub enum BoundaryError {
    #[error("Unable to read boundary file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("Boundary is not valid GeoJSON: {0}")]
    Parse(#[from] geojson::Error),
    #[error("GeoJSON FeatureCollection has no features")]
    NoFeatures,
    #[error("GeoJSON feature has no geometry")]
    MissingGeometry,
    #[error("Unsupported boundary geometry: {0} (expected Polygon or MultiPolygon)")]
    Unsupported(String),
    #[error("Boundary geometry is empty or has zero area")]
    Empty,
    #[error("Boundary geometry contains non-finite coordinates")]
    NonFinite,
    #[error("Boundary polygon ring intersects itself")]
    Invalid,
}

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Unable to fetch catalog from {url}: {source}")]
    Fetch { url: String, source: reqwest::Error },
    #[error("Unable to read catalog file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("Catalog is not valid GeoJSON: {0}")]
    Parse(#[from] geojson::Error),
    #[error("Catalog is not a GeoJSON FeatureCollection")]
    NotFeatureCollection,
    #[error("Catalog contains no usable dataset footprints")]
    NoEntries,
}
