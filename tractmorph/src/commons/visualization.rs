use anyhow::{Context, Result};
use geojson::{FeatureCollection, GeoJson};
use std::path::Path;

use crate::commons::basic_functions::write_atomic;
use crate::error::TractError;
use crate::geometric::building::{Building, BuildingCollection};
use crate::geometric::region::RegionCollection;

const LEAFLET_VERSION: &str = "1.9.4";
const ZOOM_START: u8 = 10;

/// GeoJSON text safe to inline in a `<script>` element.
fn inline_geojson(fc: FeatureCollection) -> String {
    GeoJson::from(fc).to_string().replace("</", "<\\/")
}

/// Map centre `(lat, lon)`: interior point of the first region, else its envelope centre.
pub fn map_center(regions: &RegionCollection) -> Result<(f64, f64)> {
    let first = regions.regions().first().ok_or(TractError::EmptyRegions)?;
    if let Some(p) = first.interior_point {
        return Ok((p.y(), p.x()));
    }
    let bbox = first
        .bounding_box()
        .with_context(|| format!("Region {} has an empty geometry", first.geoid))?;
    let c = bbox.center();
    Ok((c.y, c.x))
}

/// Self-contained Leaflet page: region outlines in red, buildings in blue.
pub fn render_map(regions: &RegionCollection, buildings: &[&Building]) -> Result<String> {
    let (lat, lon) = map_center(regions)?;
    let building_fc = BuildingCollection::from_buildings(buildings.iter().map(|b| (*b).clone()).collect())
        .to_feature_collection();

    Ok(format!(
        r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8"/>
<title>regions and buildings</title>
<link rel="stylesheet" href="https://unpkg.com/leaflet@{version}/dist/leaflet.css"/>
<script src="https://unpkg.com/leaflet@{version}/dist/leaflet.js"></script>
<style>html, body, #map {{ height: 100%; margin: 0; }}</style>
</head>
<body>
<div id="map"></div>
<script>
var map = L.map("map").setView([{lat}, {lon}], {zoom});
L.tileLayer("https://{{s}}.tile.openstreetmap.org/{{z}}/{{x}}/{{y}}.png", {{
    maxZoom: 19,
    attribution: "&copy; OpenStreetMap contributors"
}}).addTo(map);
var regions = {regions};
var buildings = {buildings};
L.geoJSON(regions, {{style: {{color: "red", weight: 2, fill: false}}}}).addTo(map);
L.geoJSON(buildings, {{style: {{color: "blue", weight: 1, fill: false}}}}).addTo(map);
</script>
</body>
</html>
"#,
        version = LEAFLET_VERSION,
        lat = lat,
        lon = lon,
        zoom = ZOOM_START,
        regions = inline_geojson(regions.to_feature_collection()),
        buildings = inline_geojson(building_fc),
    ))
}

pub fn write_map(path: &Path, regions: &RegionCollection, buildings: &[&Building]) -> Result<()> {
    let html = render_map(regions, buildings)?;
    write_atomic(path, html.as_bytes())?;
    log::info!("map saved to {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometric::region::Region;
    use geo::{polygon, MultiPolygon, Point};

    fn regions(with_point: bool) -> RegionCollection {
        let mut region = Region::new(
            "001",
            1.0,
            MultiPolygon(vec![polygon![
                (x: 10.0, y: 40.0), (x: 12.0, y: 40.0), (x: 12.0, y: 44.0), (x: 10.0, y: 44.0), (x: 10.0, y: 40.0),
            ]]),
        );
        if with_point {
            region.interior_point = Some(Point::new(10.5, 41.0));
        }
        RegionCollection::from_regions(vec![region]).unwrap()
    }

    #[test]
    fn test_map_center() {
        assert_eq!(map_center(&regions(true)).unwrap(), (41.0, 10.5));
        assert_eq!(map_center(&regions(false)).unwrap(), (42.0, 11.0));
        assert!(map_center(&RegionCollection::new()).is_err());
    }

    #[test]
    fn test_write_map() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("visual.html");
        let building = Building::with_height(
            MultiPolygon(vec![polygon![
                (x: 10.1, y: 40.1), (x: 10.2, y: 40.1), (x: 10.2, y: 40.2), (x: 10.1, y: 40.1),
            ]]),
            12.0,
        );
        write_map(&path, &regions(false), &[&building]).unwrap();

        let html = std::fs::read_to_string(&path).unwrap();
        assert!(html.contains("setView([42, 11], 10)"));
        assert!(html.contains("\"GEOID\":\"001\""));
        assert!(html.contains("color: \"blue\""));
        assert!(html.contains("leaflet@1.9.4"));
    }
}
