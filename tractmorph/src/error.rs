use thiserror::Error;

/// Domain failures callers may want to match on.
/// Everything else travels as `anyhow::Error` with context.
#[derive(Debug, Error)]
pub enum TractError {
    #[error("duplicate GEOID in region set: {0}")]
    DuplicateGeoid(String),

    #[error("region set is empty")]
    EmptyRegions,

    #[error("feature is missing property `{0}`")]
    MissingProperty(String),

    #[error("unsupported geometry type `{0}` (expected Polygon or MultiPolygon)")]
    UnsupportedGeometry(String),

    #[error("raster CRS EPSG:{0} is not geographic and reprojection is not enabled")]
    UnsupportedCrs(i32),

    #[error("raster {0} has no ModelPixelScale/ModelTiepoint georeferencing")]
    MissingGeoreference(String),

    #[error("HTTP {status} when requesting {url}")]
    Http { url: String, status: u16 },

    #[error("column `{column}` contains a non-finite value for region {geoid}")]
    NonFinite { column: String, geoid: String },
}
