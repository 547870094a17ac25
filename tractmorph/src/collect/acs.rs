use anyhow::{Context, Result};
use log::{debug, warn};
use std::collections::HashMap;
use std::path::Path;

/// Fraction of the total population assumed to be adult when the ACS cell is suppressed (`-`).
pub const ADULT_SHARE_FALLBACK: f64 = 0.8;

/// Length of the summary-level prefix on ACS geography ids (`1400000US36061000100`).
const GEOGRAPHY_PREFIX_LEN: usize = 9;

const POP_OVERALL_COLUMN: usize = 2;
const POP_OVER18_COLUMN: usize = 146;
const EMPLOYMENT_COLUMN: usize = 2;

/// Population figures for one tract from the S0101 table.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PopulationRow {
    pub pop_overall: Option<f64>,
    pub population_over18: Option<f64>,
}

/// Decode a census export: UTF-8 (BOM aware), falling back to Windows-1252 for legacy exports.
fn decode(bytes: &[u8]) -> String {
    let (text, _, had_errors) = encoding_rs::UTF_8.decode(bytes);
    if !had_errors {
        return text.into_owned();
    }
    debug!("ACS export is not UTF-8, decoding as Windows-1252");
    let (text, _, _) = encoding_rs::WINDOWS_1252.decode(bytes);
    text.into_owned()
}

/// Data rows of an ACS "Data.csv" export.
/// The first line holds column codes and the second the labels; data starts on the third.
fn read_data_rows(bytes: &[u8]) -> Result<Vec<csv::StringRecord>> {
    let text = decode(bytes);
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(text.as_bytes());

    let mut rows = Vec::new();
    for (idx, record) in reader.records().enumerate() {
        let record = record.with_context(|| format!("Malformed ACS row {}", idx + 1))?;
        if idx < 2 {
            continue;
        }
        rows.push(record);
    }
    Ok(rows)
}

fn geoid_of(record: &csv::StringRecord) -> Option<String> {
    let geography = record.get(0)?;
    let geoid: String = geography.chars().skip(GEOGRAPHY_PREFIX_LEN).collect();
    if geoid.is_empty() {
        None
    } else {
        Some(geoid)
    }
}

fn numeric_cell(record: &csv::StringRecord, column: usize) -> Option<f64> {
    record
        .get(column)
        .and_then(|v| v.trim().replace(',', "").parse::<f64>().ok())
        .filter(|v| v.is_finite())
}

/// Parse the S0101 (age and sex) export into total and adult population per GEOID.
pub fn parse_population(bytes: &[u8]) -> Result<HashMap<String, PopulationRow>> {
    let mut table = HashMap::new();
    for record in read_data_rows(bytes)? {
        let Some(geoid) = geoid_of(&record) else {
            continue;
        };
        let pop_overall = numeric_cell(&record, POP_OVERALL_COLUMN);
        let population_over18 = match record.get(POP_OVER18_COLUMN).map(str::trim) {
            Some("-") => pop_overall.map(|p| p * ADULT_SHARE_FALLBACK),
            _ => numeric_cell(&record, POP_OVER18_COLUMN),
        };
        table.insert(
            geoid,
            PopulationRow {
                pop_overall,
                population_over18,
            },
        );
    }
    if table.is_empty() {
        warn!("ACS population export has no data rows");
    }
    Ok(table)
}

/// Parse the S2401 (occupation) export into employed population per GEOID.
pub fn parse_employment(bytes: &[u8]) -> Result<HashMap<String, Option<f64>>> {
    let mut table = HashMap::new();
    for record in read_data_rows(bytes)? {
        if let Some(geoid) = geoid_of(&record) {
            table.insert(geoid, numeric_cell(&record, EMPLOYMENT_COLUMN));
        }
    }
    Ok(table)
}

pub fn read_population(path: &Path) -> Result<HashMap<String, PopulationRow>> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read ACS population export {}", path.display()))?;
    parse_population(&bytes)
}

pub fn read_employment(path: &Path) -> Result<HashMap<String, Option<f64>>> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read ACS employment export {}", path.display()))?;
    parse_employment(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Builds an S0101-like export with values in columns 2 and 146.
    fn population_csv(rows: &[(&str, &str, &str)]) -> String {
        let width = 147;
        let header = |prefix: &str| {
            (0..width)
                .map(|i| format!("{}{}", prefix, i))
                .collect::<Vec<_>>()
                .join(",")
        };
        let mut out = format!("{}\n{}\n", header("CODE_"), header("Label "));
        for (geo, total, adults) in rows {
            let mut cells = vec![String::new(); width];
            cells[0] = geo.to_string();
            cells[1] = "\"Census Tract 1, New York County, New York\"".to_string();
            cells[2] = total.to_string();
            cells[146] = adults.to_string();
            out.push_str(&cells.join(","));
            out.push('\n');
        }
        out
    }

    #[test]
    fn test_population_prefix_and_fallback() {
        let csv = population_csv(&[
            ("1400000US36061000100", "1000", "750"),
            ("1400000US36061000200", "500", "-"),
        ]);
        let table = parse_population(csv.as_bytes()).unwrap();
        assert_eq!(table.len(), 2);

        let a = table["36061000100"];
        assert_eq!(a.pop_overall, Some(1000.0));
        assert_eq!(a.population_over18, Some(750.0));

        let b = table["36061000200"];
        assert!((b.population_over18.unwrap() - 400.0).abs() < 0.001);
    }

    #[test]
    fn test_population_with_bom_and_unparsable_cells() {
        let csv = format!(
            "\u{feff}{}",
            population_csv(&[("1400000US36061000300", "(X)", "12")])
        );
        let table = parse_population(csv.as_bytes()).unwrap();
        let row = table["36061000300"];
        assert_eq!(row.pop_overall, None);
        assert_eq!(row.population_over18, Some(12.0));
    }

    #[test]
    fn test_employment() {
        let csv = "GEO_ID,NAME,S2401_C01_001E\n\
                   Geography,Geographic Area Name,Estimate!!Total\n\
                   1400000US11001000100,\"Census Tract 1, DC\",2345\n\
                   1400000US11001000201,\"Census Tract 2.01, DC\",N\n";
        let table = parse_employment(csv.as_bytes()).unwrap();
        assert_eq!(table["11001000100"], Some(2345.0));
        assert_eq!(table["11001000201"], None);
    }

    #[test]
    fn test_windows_1252_fallback() {
        let mut bytes = b"GEO_ID,NAME,X\nGeography,Name,Total\n1400000US72001956300,\"Adjuntas Municipio, Puerto Rico ".to_vec();
        bytes.push(0xF1); // n-tilde in Windows-1252
        bytes.extend_from_slice(b"\",42\n");
        let table = parse_employment(&bytes).unwrap();
        assert_eq!(table["72001956300"], Some(42.0));
    }
}
