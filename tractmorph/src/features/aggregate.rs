//! Spatial join of buildings into regions and per-region morphology statistics.
//!
//! Columns produced for every region:
//! `area_mean`, `area_sum`, `height_mean`, `volume_sum` (buildings within the
//! region with a positive height) and `building_density = area_sum / ALAND`,
//! `plot_ratio = volume_sum / ALAND`.

use anyhow::Result;
use geo::{BoundingRect, Relate};
use log::{info, warn};
#[cfg(feature = "polars")]
use polars::prelude::*;
use rstar::primitives::{GeomWithData, Rectangle};
use rstar::{RTree, AABB};
use std::path::Path;

use crate::error::TractError;
use crate::geometric::building::BuildingCollection;
use crate::geometric::region::{Demographics, RegionCollection};

type RegionEnvelope = GeomWithData<Rectangle<[f64; 2]>, usize>;

/// What to emit for ratios of a region whose land area is zero, negative or non-finite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ZeroLandAreaPolicy {
    /// `building_density` and `plot_ratio` are 0
    #[default]
    EmitZero,
    /// Abort with [`TractError::NonFinite`]
    Fail,
}

/// Counters of one spatial join.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JoinStats {
    pub buildings: usize,
    /// (region, building) pairs with the building within the region
    pub join_rows: usize,
    /// Buildings within no region
    pub unmatched: usize,
    /// Buildings within more than one region; they count toward each
    pub multi_region: usize,
    /// Join rows removed because the building height is not positive
    pub dropped_by_height: usize,
}

/// One surviving (region, building) pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JoinRow {
    pub region: usize,
    pub building: usize,
    /// Geodesic footprint area, m²
    pub area: f64,
    /// Building height, m
    pub height: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RegionFeatureRow {
    pub geoid: String,
    pub aland: f64,
    pub demographics: Demographics,
    pub area_mean: f64,
    pub area_sum: f64,
    pub height_mean: f64,
    pub volume_sum: f64,
    pub building_density: f64,
    pub plot_ratio: f64,
}

/// One row per region, in region order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegionFeatureTable {
    pub rows: Vec<RegionFeatureRow>,
}

impl RegionFeatureTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn get(&self, geoid: &str) -> Option<&RegionFeatureRow> {
        self.rows.iter().find(|r| r.geoid == geoid)
    }

    #[cfg(feature = "polars")]
    pub fn to_polars_df(&self) -> Result<DataFrame> {
        let column = |f: fn(&RegionFeatureRow) -> f64| -> Vec<f64> { self.rows.iter().map(f).collect() };
        let demographic =
            |f: fn(&Demographics) -> Option<f64>| -> Vec<Option<f64>> {
                self.rows.iter().map(|r| f(&r.demographics)).collect()
            };
        let geoids: Vec<&str> = self.rows.iter().map(|r| r.geoid.as_str()).collect();

        let df = df! [
            "GEOID" => geoids,
            "ALAND" => column(|r| r.aland),
            "pop_overall" => demographic(|d| d.pop_overall),
            "population_over18" => demographic(|d| d.population_over18),
            "pop_employment" => demographic(|d| d.pop_employment),
            "area_mean" => column(|r| r.area_mean),
            "area_sum" => column(|r| r.area_sum),
            "height_mean" => column(|r| r.height_mean),
            "volume_sum" => column(|r| r.volume_sum),
            "building_density" => column(|r| r.building_density),
            "plot_ratio" => column(|r| r.plot_ratio),
        ]?;
        Ok(df)
    }

    /// Write the table as CSV.
    #[cfg(feature = "polars")]
    pub fn write_csv(&self, path: &Path) -> Result<()> {
        use anyhow::Context;

        let mut df = self.to_polars_df()?;
        let mut buffer = Vec::new();
        CsvWriter::new(&mut buffer)
            .finish(&mut df)
            .with_context(|| format!("Failed to write CSV to {}", path.display()))?;
        crate::commons::basic_functions::write_atomic(path, &buffer)
    }

    #[cfg(not(feature = "polars"))]
    pub fn write_csv(&self, path: &Path) -> Result<()> {
        use anyhow::Context;

        let mut writer = csv::Writer::from_writer(Vec::new());
        writer.write_record([
            "GEOID",
            "ALAND",
            "pop_overall",
            "population_over18",
            "pop_employment",
            "area_mean",
            "area_sum",
            "height_mean",
            "volume_sum",
            "building_density",
            "plot_ratio",
        ])?;
        let opt = |v: Option<f64>| v.map(|v| v.to_string()).unwrap_or_default();
        for r in &self.rows {
            writer.write_record([
                r.geoid.clone(),
                r.aland.to_string(),
                opt(r.demographics.pop_overall),
                opt(r.demographics.population_over18),
                opt(r.demographics.pop_employment),
                r.area_mean.to_string(),
                r.area_sum.to_string(),
                r.height_mean.to_string(),
                r.volume_sum.to_string(),
                r.building_density.to_string(),
                r.plot_ratio.to_string(),
            ])?;
        }
        let buffer = writer
            .into_inner()
            .with_context(|| format!("Failed to write CSV to {}", path.display()))?;
        crate::commons::basic_functions::write_atomic(path, &buffer)
    }
}

/// Result of [`RegionFeatureAggregator::aggregate`]
#[derive(Debug, Clone)]
pub struct Aggregation {
    pub table: RegionFeatureTable,
    pub stats: JoinStats,
    /// Join rows that survived the height filter
    pub rows: Vec<JoinRow>,
}

impl Aggregation {
    /// Indices of buildings that contribute to at least one region, ascending.
    pub fn joined_buildings(&self) -> Vec<usize> {
        let mut idx: Vec<usize> = self.rows.iter().map(|r| r.building).collect();
        idx.sort_unstable();
        idx.dedup();
        idx
    }
}

fn envelope(rect: geo::Rect<f64>) -> Rectangle<[f64; 2]> {
    Rectangle::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y])
}

/// (region index, building index) for every building within a region.
pub fn spatial_join(regions: &RegionCollection, buildings: &BuildingCollection) -> (Vec<(usize, usize)>, JoinStats) {
    let tree: RTree<RegionEnvelope> = RTree::bulk_load(
        regions
            .regions()
            .iter()
            .enumerate()
            .filter_map(|(i, r)| r.geometry.bounding_rect().map(|rect| GeomWithData::new(envelope(rect), i)))
            .collect(),
    );

    let mut stats = JoinStats {
        buildings: buildings.len(),
        ..JoinStats::default()
    };
    let mut pairs = Vec::new();
    for (b, building) in buildings.buildings().iter().enumerate() {
        let Some(rect) = building.footprint.bounding_rect() else {
            stats.unmatched += 1;
            continue;
        };
        let search = AABB::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y]);
        let mut containing: Vec<usize> = tree
            .locate_in_envelope_intersecting(&search)
            .map(|cand| cand.data)
            .filter(|&r| {
                building
                    .footprint
                    .relate(&regions.regions()[r].geometry)
                    .is_within()
            })
            .collect();
        containing.sort_unstable();

        match containing.len() {
            0 => stats.unmatched += 1,
            1 => {}
            _ => stats.multi_region += 1,
        }
        stats.join_rows += containing.len();
        pairs.extend(containing.into_iter().map(|r| (r, b)));
    }
    (pairs, stats)
}

/// Group join rows by region and derive the ratios. Regions without rows get zeros.
pub fn aggregate_rows(
    regions: &RegionCollection,
    rows: &[JoinRow],
    policy: ZeroLandAreaPolicy,
) -> Result<RegionFeatureTable> {
    #[derive(Default, Clone, Copy)]
    struct Acc {
        count: usize,
        area_sum: f64,
        height_sum: f64,
        volume_sum: f64,
    }

    let mut acc = vec![Acc::default(); regions.len()];
    for row in rows {
        let a = &mut acc[row.region];
        a.count += 1;
        a.area_sum += row.area;
        a.height_sum += row.height;
        a.volume_sum += row.area * row.height;
    }

    let mut table = RegionFeatureTable::default();
    for (region, a) in regions.regions().iter().zip(acc) {
        let (area_mean, height_mean) = if a.count == 0 {
            (0.0, 0.0)
        } else {
            let n = a.count as f64;
            (a.area_sum / n, a.height_sum / n)
        };

        let (building_density, plot_ratio) = if region.aland.is_finite() && region.aland > 0.0 {
            (a.area_sum / region.aland, a.volume_sum / region.aland)
        } else {
            match policy {
                ZeroLandAreaPolicy::EmitZero => {
                    warn!(
                        "Region {} has land area {}; building_density and plot_ratio set to 0",
                        region.geoid, region.aland
                    );
                    (0.0, 0.0)
                }
                ZeroLandAreaPolicy::Fail => {
                    return Err(TractError::NonFinite {
                        column: "ALAND".to_string(),
                        geoid: region.geoid.clone(),
                    }
                    .into())
                }
            }
        };

        let row = RegionFeatureRow {
            geoid: region.geoid.clone(),
            aland: region.aland,
            demographics: region.demographics,
            area_mean,
            area_sum: a.area_sum,
            height_mean,
            volume_sum: a.volume_sum,
            building_density,
            plot_ratio,
        };
        let computed = [
            ("area_mean", row.area_mean),
            ("area_sum", row.area_sum),
            ("height_mean", row.height_mean),
            ("volume_sum", row.volume_sum),
            ("building_density", row.building_density),
            ("plot_ratio", row.plot_ratio),
        ];
        if let Some((column, _)) = computed.iter().find(|(_, v)| !v.is_finite()) {
            return Err(TractError::NonFinite {
                column: column.to_string(),
                geoid: row.geoid,
            }
            .into());
        }
        table.rows.push(row);
    }
    Ok(table)
}

/// Join + filter + aggregate, parameterised by the zero land area policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct RegionFeatureAggregator {
    pub zero_land_area: ZeroLandAreaPolicy,
}

impl RegionFeatureAggregator {
    pub fn new(zero_land_area: ZeroLandAreaPolicy) -> Self {
        RegionFeatureAggregator { zero_land_area }
    }

    pub fn aggregate(&self, regions: &RegionCollection, buildings: &BuildingCollection) -> Result<Aggregation> {
        if regions.is_empty() {
            return Err(TractError::EmptyRegions.into());
        }

        let (pairs, mut stats) = spatial_join(regions, buildings);

        let mut areas: Vec<Option<f64>> = vec![None; buildings.len()];
        let mut rows = Vec::with_capacity(pairs.len());
        for (region, b) in pairs {
            let building = &buildings.buildings()[b];
            let height = building.effective_height();
            if height <= 0.0 {
                stats.dropped_by_height += 1;
                continue;
            }
            let area = *areas[b].get_or_insert_with(|| building.geodesic_area());
            rows.push(JoinRow {
                region,
                building: b,
                area,
                height,
            });
        }

        if stats.multi_region > 0 {
            warn!(
                "{} buildings lie within several regions and count toward each of them",
                stats.multi_region
            );
        }
        info!(
            "{} buildings: {} join rows, {} outside every region, {} without height",
            stats.buildings, stats.join_rows, stats.unmatched, stats.dropped_by_height
        );

        let table = aggregate_rows(regions, &rows, self.zero_land_area)?;
        Ok(Aggregation { table, stats, rows })
    }
}

/// [`RegionFeatureAggregator::aggregate`] with the default policies.
pub fn aggregate(regions: &RegionCollection, buildings: &BuildingCollection) -> Result<Aggregation> {
    RegionFeatureAggregator::default().aggregate(regions, buildings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometric::building::{geodesic_area, Building};
    use crate::geometric::region::Region;
    use geo::{polygon, MultiPolygon, Polygon};

    fn square(x: f64, y: f64, size: f64) -> Polygon<f64> {
        polygon![
            (x: x, y: y),
            (x: x + size, y: y),
            (x: x + size, y: y + size),
            (x: x, y: y + size),
            (x: x, y: y),
        ]
    }

    fn regions(specs: &[(&str, f64, Polygon<f64>)]) -> RegionCollection {
        RegionCollection::from_regions(
            specs
                .iter()
                .map(|(id, aland, p)| Region::new(*id, *aland, MultiPolygon(vec![p.clone()])))
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn test_region_scenarios_through_aggregator() {
        // Building 1 sets the unit of area; ALAND("001") = 10 of those units
        let b1 = square(0.001, 0.001, 0.001);
        let b2 = square(0.004, 0.004, 0.0007);
        let area = geodesic_area(&MultiPolygon(vec![b1.clone()]));
        let regions = regions(&[
            ("001", 10.0 * area, square(0.0, 0.0, 0.01)),
            ("002", 500.0, square(2.0, 0.0, 0.01)),
        ]);
        let buildings = BuildingCollection::from_buildings(vec![
            Building::with_height(MultiPolygon(vec![b1]), 10.0),
            Building::with_height(MultiPolygon(vec![b2]), 0.0),
        ]);

        let result = RegionFeatureAggregator::default()
            .aggregate(&regions, &buildings)
            .unwrap();
        assert_eq!(result.stats.join_rows, 2);
        assert_eq!(result.stats.dropped_by_height, 1);
        assert_eq!(result.rows.len(), 1);

        let a = result.table.get("001").unwrap();
        assert!((a.area_mean - area).abs() < 1e-9);
        assert!((a.area_sum - area).abs() < 1e-9);
        assert_eq!(a.height_mean, 10.0);
        assert!((a.volume_sum - 10.0 * area).abs() < 1e-6);
        assert!((a.building_density - 0.1).abs() < 1e-12);
        assert!((a.plot_ratio - 1.0).abs() < 1e-12);

        let b = result.table.get("002").unwrap();
        assert_eq!(
            (b.area_mean, b.area_sum, b.height_mean, b.volume_sum),
            (0.0, 0.0, 0.0, 0.0)
        );
        assert_eq!((b.building_density, b.plot_ratio), (0.0, 0.0));
    }

    #[test]
    fn test_zero_land_area_policy() {
        let regions = regions(&[("003", 0.0, square(0.0, 0.0, 1.0))]);
        let rows = [JoinRow {
            region: 0,
            building: 0,
            area: 10.0,
            height: 3.0,
        }];
        let table = aggregate_rows(&regions, &rows, ZeroLandAreaPolicy::EmitZero).unwrap();
        let row = &table.rows[0];
        assert_eq!(row.volume_sum, 30.0);
        assert_eq!((row.building_density, row.plot_ratio), (0.0, 0.0));

        let err = aggregate_rows(&regions, &rows, ZeroLandAreaPolicy::Fail).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<TractError>(),
            Some(TractError::NonFinite { .. })
        ));
    }

    #[test]
    fn test_join_within_only_and_height_filter() {
        let region_poly = square(0.0, 0.0, 0.01);
        let aland = geodesic_area(&MultiPolygon(vec![region_poly.clone()]));
        let regions = regions(&[("001", aland, region_poly), ("002", 500.0, square(1.0, 1.0, 0.01))]);

        let inside = square(0.002, 0.002, 0.001);
        let inside_area = geodesic_area(&MultiPolygon(vec![inside.clone()]));
        let buildings = BuildingCollection::from_buildings(vec![
            Building::with_height(MultiPolygon(vec![inside]), 10.0),
            // Same region, height 0
            Building::with_height(MultiPolygon(vec![square(0.005, 0.005, 0.001)]), 0.0),
            // Crosses the region border
            Building::with_height(MultiPolygon(vec![square(0.0095, 0.0, 0.001)]), 20.0),
            // Unknown height
            Building::from_polygon(square(0.007, 0.001, 0.001)),
            // Nowhere
            Building::with_height(MultiPolygon(vec![square(5.0, 5.0, 0.001)]), 8.0),
        ]);

        let result = aggregate(&regions, &buildings).unwrap();
        assert_eq!(
            result.stats,
            JoinStats {
                buildings: 5,
                join_rows: 3,
                unmatched: 2,
                multi_region: 0,
                dropped_by_height: 2,
            }
        );
        assert_eq!(result.joined_buildings(), vec![0]);

        let a = result.table.get("001").unwrap();
        assert!((a.area_sum - inside_area).abs() < 1e-6);
        assert_eq!(a.height_mean, 10.0);
        assert!((a.building_density - inside_area / aland).abs() < 1e-12);
        assert!((a.plot_ratio - 10.0 * inside_area / aland).abs() < 1e-12);

        let b = result.table.get("002").unwrap();
        assert_eq!(b.area_sum, 0.0);
        assert_eq!(b.plot_ratio, 0.0);

        // Same inputs, same output
        let again = aggregate(&regions, &buildings).unwrap();
        assert_eq!(again.table, result.table);
    }

    #[test]
    fn test_overlapping_regions_count_twice() {
        let regions = regions(&[
            ("A", 1000.0, square(0.0, 0.0, 0.01)),
            ("B", 1000.0, square(0.0, 0.0, 0.02)),
        ]);
        let buildings = BuildingCollection::from_buildings(vec![Building::with_height(
            MultiPolygon(vec![square(0.001, 0.001, 0.001)]),
            5.0,
        )]);
        let result = aggregate(&regions, &buildings).unwrap();
        assert_eq!(result.stats.multi_region, 1);
        assert_eq!(result.stats.join_rows, 2);
        assert_eq!(
            result.table.get("A").unwrap().area_sum,
            result.table.get("B").unwrap().area_sum
        );
    }

    #[test]
    fn test_empty_regions_rejected() {
        let err = aggregate(&RegionCollection::new(), &BuildingCollection::from_buildings(vec![])).unwrap_err();
        assert!(matches!(err.downcast_ref::<TractError>(), Some(TractError::EmptyRegions)));
    }

    #[cfg(feature = "polars")]
    #[test]
    fn test_to_polars_df() {
        let regions = regions(&[("001", 1000.0, square(0.0, 0.0, 1.0))]);
        let table = aggregate_rows(&regions, &[], ZeroLandAreaPolicy::EmitZero).unwrap();
        let df = table.to_polars_df().unwrap();
        assert_eq!(df.shape(), (1, 11));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("features.csv");
        table.write_csv(&path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("GEOID,ALAND,pop_overall"));
    }
}
