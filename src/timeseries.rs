//! Normalized timeseries container produced by every backend.
//!
//! Rows are timesteps and columns are value columns. An entity (node,
//! channel, 2D point) owns one or more consecutive columns; channel losses
//! for example report several columns per channel.

use crate::error::{Result, ResultError};
use crate::time::TimeUnit;
use std::collections::HashMap;

/// Value written by the solver for "no data".
pub const NULL_VALUE: f64 = -99999.0;

pub fn is_null(value: f64) -> bool {
    value.is_nan() || (value - NULL_VALUE).abs() < 1e-6
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct EntitySlot {
    first_column: usize,
    width: usize,
}

#[derive(Debug, Clone)]
pub struct Timeseries {
    name: String,
    header: Vec<String>,
    times: Vec<f64>,
    source_unit: TimeUnit,
    values: Vec<f64>,
    mask: Vec<bool>,
    n_columns: usize,
    entities: Vec<String>,
    slots: HashMap<String, EntitySlot>,
}

impl Timeseries {
    /// Build a container from per-row values.
    ///
    /// `header` holds the step and time labels followed by one label per
    /// value column. Consecutive repeated labels are grouped into one entity.
    /// `times` are in `source_unit` and are stored as hours.
    pub fn new(
        name: impl Into<String>,
        header: Vec<String>,
        times: Vec<f64>,
        source_unit: TimeUnit,
        rows: Vec<Vec<f64>>,
    ) -> Result<Self> {
        let name = name.into();
        if header.len() < 2 {
            return Err(ResultError::schema(&name, "header needs step and time columns"));
        }
        let n_columns = header.len() - 2;
        if rows.len() != times.len() {
            return Err(ResultError::schema(
                &name,
                format!("{} time values but {} rows", times.len(), rows.len()),
            ));
        }

        let mut values = Vec::with_capacity(rows.len() * n_columns);
        for (i, row) in rows.into_iter().enumerate() {
            if row.len() != n_columns {
                return Err(ResultError::schema(
                    &name,
                    format!("row {} has {} values, header declares {}", i, row.len(), n_columns),
                ));
            }
            values.extend(row);
        }

        let mask = values.iter().map(|v| is_null(*v)).collect::<Vec<_>>();
        for (v, masked) in values.iter_mut().zip(&mask) {
            if *masked {
                *v = f64::NAN;
            }
        }

        let factor = source_unit.to_hours();
        let times = times.into_iter().map(|t| t * factor).collect();

        let (entities, slots) = group_columns(&header[2..]);

        Ok(Timeseries {
            name,
            header,
            times,
            source_unit,
            values,
            mask,
            n_columns,
            entities,
            slots,
        })
    }

    /// Convenience constructor with one column per id.
    pub fn from_columns(
        name: impl Into<String>,
        ids: &[String],
        times: Vec<f64>,
        source_unit: TimeUnit,
        rows: Vec<Vec<f64>>,
    ) -> Result<Self> {
        let mut header = vec!["Timestep".to_string(), "Time".to_string()];
        header.extend(ids.iter().cloned());
        Timeseries::new(name, header, times, source_unit, rows)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn header(&self) -> &[String] {
        &self.header
    }

    /// Timestep times in hours.
    pub fn times(&self) -> &[f64] {
        &self.times
    }

    pub fn source_unit(&self) -> TimeUnit {
        self.source_unit
    }

    pub fn n_rows(&self) -> usize {
        self.times.len()
    }

    pub fn n_columns(&self) -> usize {
        self.n_columns
    }

    /// Entity ids in file order.
    pub fn ids(&self) -> &[String] {
        &self.entities
    }

    pub fn contains(&self, id: &str) -> bool {
        self.slots.contains_key(id)
    }

    /// Number of value columns owned by `id`.
    pub fn columns_per_entity(&self, id: &str) -> Option<usize> {
        self.slots.get(id).map(|s| s.width)
    }

    pub fn value_at(&self, row: usize, column: usize) -> Option<f64> {
        if row >= self.n_rows() || column >= self.n_columns {
            return None;
        }
        Some(self.values[row * self.n_columns + column])
    }

    pub fn is_masked(&self, row: usize, column: usize) -> bool {
        self.mask
            .get(row * self.n_columns + column)
            .copied()
            .unwrap_or(true)
    }

    /// Values of the first column belonging to `id`; masked cells are NaN.
    pub fn series(&self, id: &str) -> Option<Vec<f64>> {
        let slot = self.slots.get(id)?;
        Some(self.column(slot.first_column))
    }

    /// Every column belonging to `id`.
    pub fn entity_columns(&self, id: &str) -> Option<Vec<Vec<f64>>> {
        let slot = self.slots.get(id)?;
        Some(
            (slot.first_column..slot.first_column + slot.width)
                .map(|c| self.column(c))
                .collect(),
        )
    }

    pub fn value(&self, id: &str, row: usize) -> Option<f64> {
        let slot = self.slots.get(id)?;
        self.value_at(row, slot.first_column)
    }

    fn column(&self, column: usize) -> Vec<f64> {
        (0..self.n_rows())
            .map(|row| self.values[row * self.n_columns + column])
            .collect()
    }

    /// Index of the timestep closest to `time` (hours) within `tolerance`.
    pub fn closest_index(&self, time: f64, tolerance: f64) -> Option<usize> {
        self.times
            .iter()
            .enumerate()
            .map(|(i, t)| (i, (t - time).abs()))
            .filter(|(_, d)| *d <= tolerance)
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(i, _)| i)
    }

    /// Latest timestep strictly before `time`. Times outside the stored range
    /// have no answer.
    pub fn previous_lower_index(&self, time: f64) -> Option<usize> {
        let first = *self.times.first()?;
        let last = *self.times.last()?;
        if time < first || time > last {
            return None;
        }
        self.times.iter().rposition(|t| *t < time)
    }

    /// Maximum unmasked value of `id` and the time it occurs.
    pub fn maximum(&self, id: &str) -> Option<(f64, f64)> {
        let slot = self.slots.get(id)?;
        let mut best: Option<(f64, f64)> = None;
        for row in 0..self.n_rows() {
            let idx = row * self.n_columns + slot.first_column;
            if self.mask[idx] {
                continue;
            }
            let v = self.values[idx];
            if best.is_none_or(|(_, b)| v > b) {
                best = Some((self.times[row], v));
            }
        }
        best
    }
}

fn group_columns(labels: &[String]) -> (Vec<String>, HashMap<String, EntitySlot>) {
    let mut entities: Vec<String> = Vec::new();
    let mut slots: HashMap<String, EntitySlot> = HashMap::new();
    let mut previous: Option<&str> = None;

    for (column, label) in labels.iter().enumerate() {
        if previous == Some(label.as_str()) {
            if let Some(slot) = slots.get_mut(label) {
                slot.width += 1;
            }
        } else if !slots.contains_key(label) {
            entities.push(label.clone());
            slots.insert(
                label.clone(),
                EntitySlot {
                    first_column: column,
                    width: 1,
                },
            );
        }
        previous = Some(label.as_str());
    }

    (entities, slots)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Timeseries {
        let ids = vec!["N1".to_string(), "N2".to_string()];
        Timeseries::from_columns(
            "H",
            &ids,
            vec![0.0, 0.5, 1.0, 1.5],
            TimeUnit::Hours,
            vec![
                vec![1.0, 2.0],
                vec![3.0, NULL_VALUE],
                vec![2.0, 5.0],
                vec![1.0, 4.0],
            ],
        )
        .unwrap()
    }

    #[test]
    fn null_sentinel_is_masked() {
        let ts = sample();
        assert!(ts.is_masked(1, 1));
        assert!(ts.value("N2", 1).unwrap().is_nan());
        assert_eq!(ts.maximum("N2"), Some((1.0, 5.0)));
    }

    #[test]
    fn maximum_reports_time() {
        assert_eq!(sample().maximum("N1"), Some((0.5, 3.0)));
        assert_eq!(sample().maximum("missing"), None);
    }

    #[test]
    fn repeated_labels_group_columns() {
        let header = ["Timestep", "Time", "C1", "C1", "C1", "C2"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let ts = Timeseries::new(
            "LC",
            header,
            vec![0.0],
            TimeUnit::Hours,
            vec![vec![0.1, 0.2, 0.3, 0.4]],
        )
        .unwrap();
        assert_eq!(ts.ids(), &["C1".to_string(), "C2".to_string()]);
        assert_eq!(ts.columns_per_entity("C1"), Some(3));
        assert_eq!(ts.entity_columns("C1").unwrap()[2], vec![0.3]);
        assert_eq!(ts.series("C2").unwrap(), vec![0.4]);
    }

    #[test]
    fn row_width_mismatch_is_schema_error() {
        let ids = vec!["A".to_string()];
        let err = Timeseries::from_columns("H", &ids, vec![0.0], TimeUnit::Hours, vec![vec![1.0, 2.0]])
            .unwrap_err();
        assert!(matches!(err, ResultError::SchemaMismatch { .. }));
    }

    #[test]
    fn seconds_are_normalized_to_hours() {
        let ids = vec!["A".to_string()];
        let ts = Timeseries::from_columns(
            "Q",
            &ids,
            vec![0.0, 1800.0],
            TimeUnit::Seconds,
            vec![vec![1.0], vec![2.0]],
        )
        .unwrap();
        assert_eq!(ts.times(), &[0.0, 0.5]);
    }

    #[test]
    fn closest_index_respects_tolerance() {
        let ts = sample();
        assert_eq!(ts.closest_index(0.55, 0.1), Some(1));
        assert_eq!(ts.closest_index(0.75, 0.1), None);
    }

    #[test]
    fn previous_lower_out_of_range_is_none() {
        let ts = sample();
        assert_eq!(ts.previous_lower_index(-1.0), None);
        assert_eq!(ts.previous_lower_index(2.0), None);
        assert_eq!(ts.previous_lower_index(0.0), None);
        assert_eq!(ts.previous_lower_index(1.0), Some(1));
        assert_eq!(ts.previous_lower_index(1.2), Some(2));
    }
}
