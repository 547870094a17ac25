use anyhow::{Context, Result};
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::commons::basic_functions::write_atomic;
use crate::error::TractError;
use crate::features::aggregate::{RegionFeatureRow, RegionFeatureTable};
use crate::features::normalize::{standardize, ColumnScaler};

/// A numeric column of the exported feature vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeatureColumn {
    Aland,
    PopOverall,
    PopulationOver18,
    PopEmployment,
    AreaMean,
    HeightMean,
    BuildingDensity,
    PlotRatio,
}

impl FeatureColumn {
    pub fn name(&self) -> &'static str {
        match self {
            FeatureColumn::Aland => "ALAND",
            FeatureColumn::PopOverall => "pop_overall",
            FeatureColumn::PopulationOver18 => "population_over18",
            FeatureColumn::PopEmployment => "pop_employment",
            FeatureColumn::AreaMean => "area_mean",
            FeatureColumn::HeightMean => "height_mean",
            FeatureColumn::BuildingDensity => "building_density",
            FeatureColumn::PlotRatio => "plot_ratio",
        }
    }

    /// Raw value of the column; absent demographics count as 0.
    pub fn value(&self, row: &RegionFeatureRow) -> f64 {
        let d = &row.demographics;
        match self {
            FeatureColumn::Aland => row.aland,
            FeatureColumn::PopOverall => d.pop_overall.unwrap_or(0.0),
            FeatureColumn::PopulationOver18 => d.population_over18.unwrap_or(0.0),
            FeatureColumn::PopEmployment => d.pop_employment.unwrap_or(0.0),
            FeatureColumn::AreaMean => row.area_mean,
            FeatureColumn::HeightMean => row.height_mean,
            FeatureColumn::BuildingDensity => row.building_density,
            FeatureColumn::PlotRatio => row.plot_ratio,
        }
    }
}

/// Ordered columns of the `feature` vector. The GEOID is never one of them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureSchema {
    columns: Vec<FeatureColumn>,
}

impl FeatureSchema {
    pub fn new(columns: Vec<FeatureColumn>) -> Self {
        FeatureSchema { columns }
    }

    /// US tracts with ACS demographics
    pub fn us() -> Self {
        use FeatureColumn::*;
        Self::new(vec![
            Aland,
            PopOverall,
            PopulationOver18,
            PopEmployment,
            AreaMean,
            HeightMean,
            BuildingDensity,
            PlotRatio,
        ])
    }

    /// Chinese regions with WorldPop population
    pub fn cn() -> Self {
        use FeatureColumn::*;
        Self::new(vec![
            Aland,
            PopOverall,
            AreaMean,
            HeightMean,
            BuildingDensity,
            PlotRatio,
        ])
    }

    pub fn columns(&self) -> &[FeatureColumn] {
        &self.columns
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.columns.iter().map(FeatureColumn::name).collect()
    }

    pub fn contains(&self, column: FeatureColumn) -> bool {
        self.columns.contains(&column)
    }
}

/// Value stored under each GEOID in `region2info_building.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionRecord {
    #[serde(rename = "ALAND")]
    pub aland: i64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub pop_overall: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub population_over18: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub pop_employment: Option<i64>,
    pub area_mean: f64,
    pub height_mean: f64,
    pub building_density: f64,
    pub plot_ratio: f64,
    /// Normalized schema columns, in schema order
    pub feature: Vec<f64>,
}

/// Integer count, truncated toward zero.
fn count(value: f64) -> i64 {
    value.trunc() as i64
}

/// Records keyed by GEOID, plus the scalers fitted on this table.
pub fn build_records(
    table: &RegionFeatureTable,
    schema: &FeatureSchema,
) -> Result<(BTreeMap<String, RegionRecord>, Vec<ColumnScaler>)> {
    let mut columns: Vec<Vec<f64>> = Vec::with_capacity(schema.columns().len());
    for column in schema.columns() {
        let mut values = Vec::with_capacity(table.len());
        for row in &table.rows {
            let v = column.value(row);
            if !v.is_finite() {
                return Err(TractError::NonFinite {
                    column: column.name().to_string(),
                    geoid: row.geoid.clone(),
                }
                .into());
            }
            values.push(v);
        }
        columns.push(values);
    }

    let (normalized, scalers) = standardize(&columns);

    let optional_count = |column: FeatureColumn, row: &RegionFeatureRow| {
        schema.contains(column).then(|| count(column.value(row)))
    };

    let mut records = BTreeMap::new();
    for (i, row) in table.rows.iter().enumerate() {
        let record = RegionRecord {
            aland: count(row.aland),
            pop_overall: optional_count(FeatureColumn::PopOverall, row),
            population_over18: optional_count(FeatureColumn::PopulationOver18, row),
            pop_employment: optional_count(FeatureColumn::PopEmployment, row),
            area_mean: row.area_mean,
            height_mean: row.height_mean,
            building_density: row.building_density,
            plot_ratio: row.plot_ratio,
            feature: normalized.iter().map(|column| column[i]).collect(),
        };
        if records.insert(row.geoid.clone(), record).is_some() {
            return Err(TractError::DuplicateGeoid(row.geoid.clone()).into());
        }
    }
    Ok((records, scalers))
}

/// Serialize the records and replace `path` in one rename.
pub fn write_region_info(records: &BTreeMap<String, RegionRecord>, path: &Path) -> Result<()> {
    let bytes = serde_json::to_vec(records).context("Failed to serialize region records")?;
    write_atomic(path, &bytes)?;
    info!("wrote {} region records to {}", records.len(), path.display());
    Ok(())
}

/// Normalize a feature table under a schema and write it.
#[derive(Debug, Clone)]
pub struct FeatureExporter {
    pub schema: FeatureSchema,
}

impl FeatureExporter {
    pub fn new(schema: FeatureSchema) -> Self {
        FeatureExporter { schema }
    }

    pub fn export(&self, table: &RegionFeatureTable, path: &Path) -> Result<BTreeMap<String, RegionRecord>> {
        let (records, scalers) = build_records(table, &self.schema)?;
        for (name, scaler) in self.schema.names().iter().zip(&scalers) {
            log::debug!("{}: mean {:.6}, std {:.6}", name, scaler.mean, scaler.std);
        }
        write_region_info(&records, path)?;
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometric::region::Demographics;

    fn row(geoid: &str, aland: f64, pop: Option<f64>, area_mean: f64) -> RegionFeatureRow {
        RegionFeatureRow {
            geoid: geoid.to_string(),
            aland,
            demographics: Demographics {
                pop_overall: pop,
                population_over18: pop.map(|p| p * 0.8),
                pop_employment: None,
            },
            area_mean,
            area_sum: area_mean,
            height_mean: 10.0,
            volume_sum: area_mean * 10.0,
            building_density: area_mean / aland,
            plot_ratio: area_mean * 10.0 / aland,
        }
    }

    fn table() -> RegionFeatureTable {
        RegionFeatureTable {
            rows: vec![
                row("36061000100", 1000.9, Some(120.7), 100.0),
                row("36061000200", 500.0, None, 0.0),
                row("36061000300", 2000.0, Some(50.0), 40.0),
            ],
        }
    }

    #[test]
    fn test_schema_order() {
        assert_eq!(
            FeatureSchema::us().names(),
            vec![
                "ALAND",
                "pop_overall",
                "population_over18",
                "pop_employment",
                "area_mean",
                "height_mean",
                "building_density",
                "plot_ratio"
            ]
        );
        assert_eq!(FeatureSchema::cn().columns().len(), 6);
        assert!(!FeatureSchema::cn().contains(FeatureColumn::PopEmployment));
    }

    #[test]
    fn test_build_records_us() {
        let (records, scalers) = build_records(&table(), &FeatureSchema::us()).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(scalers.len(), 8);

        let first = &records["36061000100"];
        assert_eq!(first.aland, 1000);
        assert_eq!(first.pop_overall, Some(120));
        assert_eq!(first.population_over18, Some(96));
        assert_eq!(first.pop_employment, Some(0));
        assert_eq!(first.feature.len(), 8);

        let missing = &records["36061000200"];
        assert_eq!(missing.pop_overall, Some(0));

        // Constant columns normalize to 0
        assert!(records.values().all(|r| r.feature[3] == 0.0 && r.feature[5] == 0.0));

        let column_sum: f64 = records.values().map(|r| r.feature[0]).sum();
        assert!(column_sum.abs() < 1e-9);
    }

    #[test]
    fn test_build_records_cn_omits_us_fields() {
        let (records, _) = build_records(&table(), &FeatureSchema::cn()).unwrap();
        let json = serde_json::to_value(&records).unwrap();
        let first = &json["36061000100"];
        assert!(first.get("pop_employment").is_none());
        assert!(first.get("population_over18").is_none());
        assert_eq!(first["ALAND"], 1000);
        assert_eq!(first["feature"].as_array().unwrap().len(), 6);
    }

    #[test]
    fn test_non_finite_rejected() {
        let mut t = table();
        t.rows[1].plot_ratio = f64::NAN;
        let err = build_records(&t, &FeatureSchema::cn()).unwrap_err();
        assert!(err.to_string().contains("plot_ratio"));
    }

    #[test]
    fn test_export_writes_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("region2info_building.json");
        std::fs::write(&path, "stale").unwrap();

        let exporter = FeatureExporter::new(FeatureSchema::us());
        let records = exporter.export(&table(), &path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let parsed: BTreeMap<String, RegionRecord> = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, records);
        assert_eq!(parsed["36061000100"].building_density, 100.0 / 1000.9);
        assert_eq!(
            parsed.keys().collect::<Vec<_>>(),
            vec!["36061000100", "36061000200", "36061000300"]
        );
    }
}
