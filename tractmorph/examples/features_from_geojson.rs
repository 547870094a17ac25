// Example: region features from local GeoJSON files
// Regions and buildings are read from GeoJSON, joined, aggregated and exported
use anyhow::Result;
use tractmorph::config::Settings;
use tractmorph::features::export::FeatureSchema;
use tractmorph::geometric::region::RegionCollection;
use tractmorph::geometric::source::GeoJsonBuildings;
use tractmorph::pipeline::RegionFeaturePipeline;

fn main() -> Result<()> {
    println!("=== Example: region features from GeoJSON ===\n");

    let dir = std::env::temp_dir().join("tractmorph_example");
    std::fs::create_dir_all(&dir)?;

    let regions_geojson = r#"
    {
        "type": "FeatureCollection",
        "features": [
            {
                "type": "Feature",
                "properties": {"GEOID": "36061000100", "ALAND": 1000000, "pop_overall": 4200},
                "geometry": {
                    "type": "Polygon",
                    "coordinates": [[[-74.0, 40.70], [-73.99, 40.70], [-73.99, 40.71], [-74.0, 40.71], [-74.0, 40.70]]]
                }
            },
            {
                "type": "Feature",
                "properties": {"GEOID": "36061000200", "ALAND": 750000, "pop_overall": 1300},
                "geometry": {
                    "type": "Polygon",
                    "coordinates": [[[-73.99, 40.70], [-73.98, 40.70], [-73.98, 40.71], [-73.99, 40.71], [-73.99, 40.70]]]
                }
            }
        ]
    }
    "#;

    let buildings_geojson = r#"
    {
        "type": "FeatureCollection",
        "features": [
            {
                "type": "Feature",
                "properties": {"height": 45.0},
                "geometry": {
                    "type": "Polygon",
                    "coordinates": [[[-73.998, 40.702], [-73.997, 40.702], [-73.997, 40.703], [-73.998, 40.703], [-73.998, 40.702]]]
                }
            },
            {
                "type": "Feature",
                "properties": {"building:levels": 6},
                "geometry": {
                    "type": "Polygon",
                    "coordinates": [[[-73.995, 40.705], [-73.994, 40.705], [-73.994, 40.706], [-73.995, 40.706], [-73.995, 40.705]]]
                }
            },
            {
                "type": "Feature",
                "properties": {"height": 12.0},
                "geometry": {
                    "type": "Polygon",
                    "coordinates": [[[-73.985, 40.701], [-73.984, 40.701], [-73.984, 40.702], [-73.985, 40.702], [-73.985, 40.701]]]
                }
            }
        ]
    }
    "#;

    let buildings_path = dir.join("buildings.geojson");
    std::fs::write(&buildings_path, buildings_geojson)?;

    let regions = RegionCollection::from_geojson(regions_geojson.as_bytes())?;
    println!("Regions loaded: {}", regions.len());

    let settings = Settings::default();
    let source = GeoJsonBuildings::new(&settings, &buildings_path);
    let output = RegionFeaturePipeline::new(source, FeatureSchema::cn(), &dir)
        .with_visualization(true)
        .run(&regions)?;

    println!("\nJoin statistics: {:?}", output.aggregation.stats);
    println!("\nPer-region features:");
    for row in &output.aggregation.table.rows {
        println!("  {}:", row.geoid);
        println!("    - area_mean: {:.2} m²", row.area_mean);
        println!("    - height_mean: {:.2} m", row.height_mean);
        println!("    - building_density: {:.6}", row.building_density);
        println!("    - plot_ratio: {:.6}", row.plot_ratio);
    }

    #[cfg(feature = "polars")]
    {
        let df = output.aggregation.table.to_polars_df()?;
        println!("\nDataFrame preview:");
        println!("{}", df);
    }

    println!("\nRecords written to {}", output.output_path.display());
    Ok(())
}
