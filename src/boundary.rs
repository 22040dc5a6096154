use crate::error::BoundaryError;
use crate::geo_utils::{as_multi_polygon, geometry_kind, has_finite_coords, has_self_intersection};
use geo::{Area, Geometry, MultiPolygon};
use geojson::GeoJson;
use std::fs;
use std::path::Path;

/// The user's area of interest in EPSG:4326. Immutable once loaded.
#[derive(Debug, Clone)]
pub struct Boundary {
    pub name: String,
    shape: MultiPolygon<f64>,
}

impl Boundary {
    pub fn new(name: &str, shape: MultiPolygon<f64>) -> Result<Self, BoundaryError> {
        if !has_finite_coords(&shape) {
            return Err(BoundaryError::NonFinite);
        }
        if shape.0.is_empty() || shape.unsigned_area() <= 0.0 {
            return Err(BoundaryError::Empty);
        }
        if has_self_intersection(&shape) {
            return Err(BoundaryError::Invalid);
        }
        Ok(Self {
            name: name.to_string(),
            shape,
        })
    }

    /// Reads a GeoJSON boundary; the file stem becomes the boundary name.
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self, BoundaryError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| BoundaryError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "boundary".to_string());
        Self::from_geojson_str(&name, &content)
    }

    /// Accepts a FeatureCollection (first feature is used), a Feature, or a
    /// bare Polygon/MultiPolygon geometry.
    pub fn from_geojson_str(name: &str, content: &str) -> Result<Self, BoundaryError> {
        let geojson: GeoJson = content.parse()?;
        let geometry = match geojson {
            GeoJson::FeatureCollection(collection) => collection
                .features
                .into_iter()
                .next()
                .ok_or(BoundaryError::NoFeatures)?
                .geometry
                .ok_or(BoundaryError::MissingGeometry)?,
            GeoJson::Feature(feature) => feature.geometry.ok_or(BoundaryError::MissingGeometry)?,
            GeoJson::Geometry(geometry) => geometry,
        };
        let geometry = Geometry::<f64>::try_from(geometry)?;
        let kind = geometry_kind(&geometry);
        let shape = as_multi_polygon(geometry)
            .ok_or_else(|| BoundaryError::Unsupported(kind.to_string()))?;
        Self::new(name, shape)
    }

    pub fn shape(&self) -> &MultiPolygon<f64> {
        &self.shape
    }

    /// GeoJSON text of the boundary geometry, used as the clip polygon of
    /// the remote read stage.
    pub fn to_geojson_string(&self) -> String {
        geojson::Geometry::new(geojson::Value::from(&self.shape)).to_string()
    }
}
