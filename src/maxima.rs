//! Per-entity maximum value and time-of-maximum tables.

use crate::config::{SpecialTimeRules, TimeKind};
use crate::error::{Result, ResultError};
use crate::result_type::ResultType;
use crate::timeseries::{Timeseries, is_null};
use csv::ReaderBuilder;
use serde::Serialize;
use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MaxEntry {
    pub value: f64,
    /// Time of the maximum in hours.
    pub time: f64,
    pub time_kind: TimeKind,
}

#[derive(Debug, Clone, Default)]
pub struct MaximaTable {
    ids: Vec<String>,
    entries: Vec<MaxEntry>,
    index: HashMap<String, usize>,
}

impl MaximaTable {
    pub fn from_entries(rows: Vec<(String, MaxEntry)>) -> Self {
        let mut table = MaximaTable::default();
        for (id, entry) in rows {
            if table.index.contains_key(&id) {
                continue;
            }
            table.index.insert(id.clone(), table.ids.len());
            table.ids.push(id);
            table.entries.push(entry);
        }
        table
    }

    /// Maxima of every entity in a timeseries, ignoring masked cells.
    pub fn from_timeseries(ts: &Timeseries) -> Self {
        let rows = ts
            .ids()
            .iter()
            .filter_map(|id| {
                ts.maximum(id).map(|(time, value)| {
                    (
                        id.clone(),
                        MaxEntry {
                            value,
                            time,
                            time_kind: TimeKind::Regular,
                        },
                    )
                })
            })
            .collect();
        MaximaTable::from_entries(rows)
    }

    pub fn get(&self, id: &str) -> Option<&MaxEntry> {
        self.index.get(id).map(|&i| &self.entries[i])
    }

    pub fn lookup(&self, id: &str) -> Result<MaxEntry> {
        self.get(id)
            .copied()
            .ok_or_else(|| ResultError::not_found("maximum", id))
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Load a maxima file: an id column followed by `<X>max, Time <X>max` pairs.
///
/// Returns one table per recognised maximum column. When `special` is given,
/// times are classified against its thresholds.
pub fn load_maxima_csv(
    path: &Path,
    special: Option<&SpecialTimeRules>,
) -> Result<HashMap<ResultType, MaximaTable>> {
    if !path.exists() {
        return Err(ResultError::FileNotFound {
            path: path.to_path_buf(),
        });
    }
    let dataset = path.display().to_string();
    let mut rdr = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(BufReader::new(File::open(path)?));
    let headers = rdr.headers()?.clone();

    // Id column sits immediately before the first maximum column
    let mut pairs: Vec<(ResultType, usize, Option<usize>)> = Vec::new();
    for (i, h) in headers.iter().enumerate() {
        let lower = h.to_ascii_lowercase();
        if lower.starts_with("time") {
            continue;
        }
        if let Some(stem) = lower.strip_suffix("max") {
            if let Some(rt) = ResultType::parse(stem).or_else(|| ResultType::parse(&lower)) {
                let time_col = headers
                    .iter()
                    .position(|t| t.eq_ignore_ascii_case(&format!("Time {}", h)));
                pairs.push((rt, i, time_col));
            }
        }
    }
    let first_value = pairs
        .iter()
        .map(|(_, i, _)| *i)
        .min()
        .ok_or_else(|| ResultError::schema(&dataset, "no maximum columns found"))?;
    if first_value == 0 {
        return Err(ResultError::schema(&dataset, "maxima file has no id column"));
    }
    let id_col = first_value - 1;

    let mut rows: HashMap<ResultType, Vec<(String, MaxEntry)>> = HashMap::new();
    for result in rdr.records() {
        let record = result?;
        let Some(id) = record.get(id_col).filter(|v| !v.is_empty()) else {
            continue;
        };
        for (rt, value_col, time_col) in &pairs {
            let value = record
                .get(*value_col)
                .and_then(|v| v.parse::<f64>().ok())
                .filter(|v| !is_null(*v))
                .unwrap_or(f64::NAN);
            let time = time_col
                .and_then(|c| record.get(c))
                .and_then(|v| v.parse::<f64>().ok())
                .unwrap_or(f64::NAN);
            let time_kind = special
                .map(|rules| rules.classify(time))
                .unwrap_or(TimeKind::Regular);
            rows.entry(*rt).or_default().push((
                id.to_string(),
                MaxEntry {
                    value,
                    time,
                    time_kind,
                },
            ));
        }
    }

    let tables: HashMap<ResultType, MaximaTable> = rows
        .into_iter()
        .map(|(rt, rows)| (rt, MaximaTable::from_entries(rows)))
        .collect();
    info!(file = %dataset, types = tables.len(), "loaded maxima");
    Ok(tables)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::TimeUnit;

    #[test]
    fn lookup_missing_id_is_not_found() {
        let table = MaximaTable::from_entries(vec![(
            "N1".to_string(),
            MaxEntry {
                value: 3.0,
                time: 1.0,
                time_kind: TimeKind::Regular,
            },
        )]);
        assert_eq!(table.lookup("N1").unwrap().value, 3.0);
        assert!(matches!(
            table.lookup("N9"),
            Err(ResultError::NotFound { .. })
        ));
    }

    #[test]
    fn node_maxima_file_yields_water_and_energy() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nmx.csv");
        std::fs::write(
            &path,
            "Node,Hmax,Time Hmax,Emax,Time Emax\nn0,12.0,1.5,12.2,1.5\nn1,11.0,900001.0,11.1,2.0\n",
        )
        .unwrap();
        let rules = SpecialTimeRules::default();
        let tables = load_maxima_csv(&path, Some(&rules)).unwrap();
        let h = &tables[&ResultType::WaterLevel];
        let e = &tables[&ResultType::EnergyLevel];
        assert_eq!(h.lookup("n0").unwrap().value, 12.0);
        assert_eq!(e.lookup("n1").unwrap().time, 2.0);
        assert_eq!(h.lookup("n1").unwrap().time_kind, TimeKind::PeakMarker);
    }

    #[test]
    fn computed_from_timeseries_skips_masked() {
        let ids = vec!["C1".to_string()];
        let ts = Timeseries::from_columns(
            "Q",
            &ids,
            vec![0.0, 1.0, 2.0],
            TimeUnit::Hours,
            vec![vec![1.0], vec![-99999.0], vec![4.0]],
        )
        .unwrap();
        let table = MaximaTable::from_timeseries(&ts);
        let entry = table.lookup("C1").unwrap();
        assert_eq!((entry.time, entry.value), (2.0, 4.0));
    }
}
