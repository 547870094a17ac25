//! Building footprint backends.
//!
//! Every backend returns footprints in WGS84 with an optional height in
//! meters, whatever the provenance; the aggregation core only sees a
//! [`BuildingCollection`].

use anyhow::Result;

use crate::geometric::building::BuildingCollection;
use crate::geometric::region::RegionCollection;

pub mod cnbh;
pub mod geojson_file;
pub mod microsoft;
pub mod nyc;
pub mod osm;

pub use cnbh::CnbhHeights;
pub use geojson_file::GeoJsonBuildings;
pub use microsoft::MicrosoftBuildings;
pub use nyc::NycBuildings;
pub use osm::OsmBuildings;

/// Something that can produce building footprints covering a region set.
pub trait BuildingSource {
    fn name(&self) -> &str;

    fn fetch(&mut self, regions: &RegionCollection) -> Result<BuildingCollection>;
}

impl<S: BuildingSource + ?Sized> BuildingSource for Box<S> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn fetch(&mut self, regions: &RegionCollection) -> Result<BuildingCollection> {
        (**self).fetch(regions)
    }
}
