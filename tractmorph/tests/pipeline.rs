use geo::{polygon, MultiPolygon};
use std::collections::BTreeMap;

use tractmorph::features::export::{build_records, write_region_info, FeatureSchema, RegionRecord};
use tractmorph::features::{aggregate, standardize};
use tractmorph::geometric::building::{geodesic_area, BuildingCollection};
use tractmorph::geometric::region::RegionCollection;

const REGIONS: &str = r#"{
  "type": "FeatureCollection",
  "features": [
    {"type": "Feature",
     "properties": {"GEOID": "001", "ALAND": 1000000, "pop_overall": 5000, "INTPTLAT": "+40.005", "INTPTLON": "-73.995"},
     "geometry": {"type": "Polygon", "coordinates": [[[-74.0, 40.0], [-73.99, 40.0], [-73.99, 40.01], [-74.0, 40.01], [-74.0, 40.0]]]}},
    {"type": "Feature",
     "properties": {"GEOID": "002", "ALAND": 500000},
     "geometry": {"type": "Polygon", "coordinates": [[[-73.99, 40.0], [-73.98, 40.0], [-73.98, 40.01], [-73.99, 40.01], [-73.99, 40.0]]]}},
    {"type": "Feature",
     "properties": {"GEOID": 3, "ALAND": 0},
     "geometry": {"type": "MultiPolygon", "coordinates": [[[[-73.98, 40.0], [-73.97, 40.0], [-73.97, 40.01], [-73.98, 40.01], [-73.98, 40.0]]]]}}
  ]
}"#;

const BUILDINGS: &str = r#"{
  "type": "FeatureCollection",
  "features": [
    {"type": "Feature", "properties": {"height": 10},
     "geometry": {"type": "Polygon", "coordinates": [[[-73.999, 40.001], [-73.998, 40.001], [-73.998, 40.002], [-73.999, 40.002], [-73.999, 40.001]]]}},
    {"type": "Feature", "properties": {"height": 0},
     "geometry": {"type": "Polygon", "coordinates": [[[-73.997, 40.001], [-73.996, 40.001], [-73.996, 40.002], [-73.997, 40.002], [-73.997, 40.001]]]}},
    {"type": "Feature", "properties": {"height": 30},
     "geometry": {"type": "Polygon", "coordinates": [[[-73.9905, 40.005], [-73.9895, 40.005], [-73.9895, 40.006], [-73.9905, 40.006], [-73.9905, 40.005]]]}},
    {"type": "Feature", "properties": {"storeys": 4},
     "geometry": {"type": "Polygon", "coordinates": [[[-73.975, 40.005], [-73.974, 40.005], [-73.974, 40.006], [-73.975, 40.005]]]}}
  ]
}"#;

fn load() -> (RegionCollection, BuildingCollection) {
    let regions = RegionCollection::from_geojson(REGIONS.as_bytes()).unwrap();
    let mut buildings = BuildingCollection::from_geojson(BUILDINGS.as_bytes(), 3.0).unwrap();
    buildings.resolve_heights();
    (regions, buildings)
}

#[test]
fn regions_and_buildings_to_region_info() {
    let (regions, buildings) = load();
    assert_eq!(regions.len(), 3);
    assert_eq!(buildings.len(), 4);

    let result = aggregate(&regions, &buildings).unwrap();
    let table = &result.table;
    assert_eq!(table.len(), 3);

    // Building 0 is the only survivor in 001; building 1 has height 0
    let area = geodesic_area(&buildings.buildings()[0].footprint);
    let a = table.get("001").unwrap();
    assert!((a.area_sum - area).abs() < 1e-6);
    assert!((a.area_mean - area).abs() < 1e-6);
    assert_eq!(a.height_mean, 10.0);
    assert!((a.volume_sum - 10.0 * area).abs() < 1e-6);
    assert!((a.building_density - area / 1_000_000.0).abs() < 1e-12);

    // Building 2 straddles the 001/002 border: counted nowhere
    let b = table.get("002").unwrap();
    assert_eq!((b.area_sum, b.volume_sum, b.building_density, b.plot_ratio), (0.0, 0.0, 0.0, 0.0));

    // Zero land area: ratios 0, aggregates kept
    let c = table.get("3").unwrap();
    assert!(c.area_sum > 0.0);
    assert_eq!(c.height_mean, 12.0);
    assert_eq!((c.building_density, c.plot_ratio), (0.0, 0.0));

    assert_eq!(result.stats.unmatched, 1);
    assert_eq!(result.stats.dropped_by_height, 1);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("region2info_building.json");
    let (records, scalers) = build_records(table, &FeatureSchema::cn()).unwrap();
    write_region_info(&records, &path).unwrap();

    let parsed: BTreeMap<String, RegionRecord> =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(parsed.keys().collect::<Vec<_>>(), vec!["001", "002", "3"]);
    assert_eq!(parsed["001"].aland, 1_000_000);
    assert_eq!(parsed["001"].pop_overall, Some(5000));
    assert_eq!(parsed["002"].pop_overall, Some(0));
    assert!(parsed.values().all(|r| r.feature.len() == 6));
    assert_eq!(scalers.len(), 6);

    // Every normalized column with spread has mean 0 and std 1
    for (j, scaler) in scalers.iter().enumerate() {
        let column: Vec<f64> = parsed.values().map(|r| r.feature[j]).collect();
        let (normalized, refit) = standardize(&[column.clone()]);
        if scaler.std > 0.0 {
            assert!(refit[0].mean.abs() < 1e-9);
            assert!((refit[0].std - 1.0).abs() < 1e-9);
            assert_eq!(normalized[0].len(), 3);
        } else {
            assert!(column.iter().all(|v| *v == 0.0));
        }
    }
}

#[test]
fn rerun_is_identical() {
    let (regions, buildings) = load();
    let first = aggregate(&regions, &buildings).unwrap();
    let second = aggregate(&regions, &buildings).unwrap();
    assert_eq!(first.table, second.table);

    let schema = FeatureSchema::us();
    let (r1, _) = build_records(&first.table, &schema).unwrap();
    let (r2, _) = build_records(&second.table, &schema).unwrap();
    assert_eq!(r1, r2);
}

#[test]
fn geodesic_area_ignores_winding() {
    let ccw = MultiPolygon(vec![polygon![
        (x: 2.0, y: 48.0), (x: 2.001, y: 48.0), (x: 2.001, y: 48.001), (x: 2.0, y: 48.001), (x: 2.0, y: 48.0),
    ]]);
    let cw = MultiPolygon(vec![polygon![
        (x: 2.0, y: 48.0), (x: 2.0, y: 48.001), (x: 2.001, y: 48.001), (x: 2.001, y: 48.0), (x: 2.0, y: 48.0),
    ]]);
    let a = geodesic_area(&ccw);
    assert!(a > 0.0);
    assert!((a - geodesic_area(&cw)).abs() < 1e-9);
}
