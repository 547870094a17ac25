pub const DATA_PATH: &str = "./data";

pub const DEFAULT_CENSUS_YEAR: u16 = 2015;
pub const DEFAULT_PROCESSES: usize = 5;
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 600;
pub const DEFAULT_STOREY_HEIGHT: f64 = 3.0;
pub const USER_AGENT: &str = concat!("tractmorph/", env!("CARGO_PKG_VERSION"));

pub const TIGER_BASE_URL: &str = "https://www2.census.gov/geo/tiger";
pub const MS_DATASET_LINKS_URL: &str =
    "https://minedbuildings.blob.core.windows.net/global-buildings/dataset-links.csv";
pub const MS_TILE_ZOOM: u8 = 9;
pub const NYC_BUILDINGS_URL: &str =
    "https://data.cityofnewyork.us/api/geospatial/nqwf-w8eh?method=export&format=GeoJSON";
/// NYC footprint feature code for buildings (other codes are garages, towers, etc.)
pub const NYC_BUILDING_FEAT_CODE: &str = "2100";
pub const FEET_TO_METERS: f64 = 0.3048;
pub const CNBH_BASE_URL: &str = "https://zenodo.org/records/7923866/files";
pub const WORLDPOP_BASE_URL: &str = "https://data.worldpop.org/GIS/Population/Global_2000_2020";
pub const OVERPASS_URL: &str = "https://overpass-api.de/api/interpreter";
pub const NOMINATIM_URL: &str = "https://nominatim.openstreetmap.org/search";

/// ACS 5-year subject tables used for US demographics.
pub const ACS_POPULATION_FILE: &str = "ACSST5Y2016.S0101-Data.csv";
pub const ACS_EMPLOYMENT_FILE: &str = "ACSST5Y2016.S2401-Data.csv";

pub const OUTPUT_FILE_NAME: &str = "region2info_building.json";
pub const VISUAL_FILE_NAME: &str = "visual.html";
pub const FEATURE_CSV_FILE_NAME: &str = "region_features.csv";
