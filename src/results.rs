//! Query surface over an opened result set.
//!
//! A `ResultSet` owns one backend plus the caches built on top of it:
//! computed maxima per (domain, type) and the most recent long profile.

use crate::backend::{Format, LoadIssue, ResultBackend, open_backend};
use crate::config::LoaderConfig;
use crate::error::{Result, ResultError};
use crate::long_profile::{self, LongProfile, ProfileLevels};
use crate::maxima::{MaxEntry, MaximaTable};
use crate::network::Network;
use crate::result_type::{Domain, ResultType};
use crate::time::ReferenceTime;
use crate::timeseries::Timeseries;
use crate::tpc::UnitSystem;
use chrono::NaiveDateTime;
use serde::Serialize;
use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use tracing::{debug, info};

/// How a single-value query picks its timestep.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TimeQuery {
    /// Value and time of the maximum.
    Max,
    /// Closest timestep within `tolerance` hours.
    At { time: f64, tolerance: f64 },
    /// Latest timestep strictly before `time`.
    PreviousLower(f64),
}

/// Success flag, value and message for callers that surface errors as text.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Outcome<T> {
    pub ok: bool,
    pub value: Option<T>,
    pub message: String,
}

impl<T> From<Result<T>> for Outcome<T> {
    fn from(result: Result<T>) -> Self {
        match result {
            Ok(value) => Outcome {
                ok: true,
                value: Some(value),
                message: String::new(),
            },
            Err(e) => Outcome {
                ok: false,
                value: None,
                message: e.to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Series {
    pub id: String,
    pub domain: Domain,
    pub result_type: ResultType,
    pub times: Vec<f64>,
    /// First column of the entity.
    pub values: Vec<f64>,
    /// Every column of the entity, in file order. Per-channel losses carry
    /// more than one.
    pub columns: Vec<Vec<f64>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PointValue {
    pub time: f64,
    pub value: f64,
}

// Most recent long profile and the endpoints it was resolved for
struct CachedProfile {
    start: String,
    end: Option<String>,
    profile: LongProfile,
}

pub struct ResultSet {
    path: PathBuf,
    config: LoaderConfig,
    backend: Box<dyn ResultBackend>,
    computed_maxima: RefCell<HashMap<(Domain, ResultType), Rc<MaximaTable>>>,
    profile: Option<CachedProfile>,
}

impl ResultSet {
    pub fn open(path: &Path, config: LoaderConfig) -> Result<Self> {
        let backend = open_backend(path, &config)?;
        info!(
            path = %path.display(),
            simulation = backend.simulation_id(),
            format = ?backend.format(),
            "result set ready"
        );
        Ok(ResultSet {
            path: path.to_path_buf(),
            config,
            backend,
            computed_maxima: RefCell::new(HashMap::new()),
            profile: None,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format(&self) -> Format {
        self.backend.format()
    }

    pub fn simulation_id(&self) -> &str {
        self.backend.simulation_id()
    }

    pub fn units(&self) -> Option<UnitSystem> {
        self.backend.units()
    }

    pub fn reference_time(&self) -> Option<ReferenceTime> {
        self.backend.reference_time()
    }

    /// Absolute date of a relative time in hours, when a reference is known.
    pub fn absolute_time(&self, hours: f64) -> Option<NaiveDateTime> {
        self.reference_time().and_then(|r| r.to_datetime(hours))
    }

    pub fn load_issues(&self) -> Vec<LoadIssue> {
        self.backend.load_issues()
    }

    pub fn network(&self) -> Result<&Network> {
        self.backend.network()
    }

    pub fn list_result_types(&self, domain: Domain) -> Vec<ResultType> {
        self.backend.result_types(domain)
    }

    fn timeseries(&self, domain: Domain, result_type: &str) -> Result<(ResultType, Rc<Timeseries>)> {
        let rt: ResultType = result_type.parse()?;
        Ok((rt, self.backend.timeseries(domain, rt)?))
    }

    pub fn ids(&self, domain: Domain, result_type: &str) -> Result<Vec<String>> {
        Ok(self.timeseries(domain, result_type)?.1.ids().to_vec())
    }

    pub fn timesteps(&self, domain: Domain, result_type: &str) -> Result<Vec<f64>> {
        Ok(self.timeseries(domain, result_type)?.1.times().to_vec())
    }

    pub fn get_timeseries(&self, id: &str, domain: Domain, result_type: &str) -> Result<Series> {
        let (rt, ts) = self.timeseries(domain, result_type)?;
        let columns = ts
            .entity_columns(id)
            .ok_or_else(|| ResultError::not_found("id", id))?;
        Ok(Series {
            id: id.to_string(),
            domain,
            result_type: rt,
            times: ts.times().to_vec(),
            values: columns.first().cloned().unwrap_or_default(),
            columns,
        })
    }

    /// Dedicated maxima when the backend has them, otherwise computed from
    /// the timeseries and kept for later calls.
    pub fn maxima(&self, domain: Domain, result_type: ResultType) -> Result<Rc<MaximaTable>> {
        if let Some(table) = self.backend.dedicated_maxima(domain, result_type) {
            return Ok(table);
        }
        if let Some(table) = self.computed_maxima.borrow().get(&(domain, result_type)) {
            return Ok(Rc::clone(table));
        }
        let ts = self.backend.timeseries(domain, result_type)?;
        let table = Rc::new(MaximaTable::from_timeseries(&ts));
        debug!(%domain, %result_type, entities = table.len(), "computed maxima from timeseries");
        self.computed_maxima
            .borrow_mut()
            .insert((domain, result_type), Rc::clone(&table));
        Ok(table)
    }

    pub fn get_maximum(&self, id: &str, domain: Domain, result_type: &str) -> Result<MaxEntry> {
        let rt: ResultType = result_type.parse()?;
        self.maxima(domain, rt)?.lookup(id)
    }

    pub fn get_value(&self, id: &str, domain: Domain, result_type: &str, query: TimeQuery) -> Result<PointValue> {
        if query == TimeQuery::Max {
            let entry = self.get_maximum(id, domain, result_type)?;
            return Ok(PointValue {
                time: entry.time,
                value: entry.value,
            });
        }
        let (_, ts) = self.timeseries(domain, result_type)?;
        if !ts.contains(id) {
            return Err(ResultError::not_found("id", id));
        }
        let row = match query {
            TimeQuery::At { time, tolerance } => ts.closest_index(time, tolerance),
            TimeQuery::PreviousLower(time) => ts.previous_lower_index(time),
            TimeQuery::Max => None,
        };
        let row = row.ok_or_else(|| ResultError::not_found("timestep", format!("{query:?}")))?;
        Ok(PointValue {
            time: ts.times()[row],
            value: ts.value(id, row).unwrap_or(f64::NAN),
        })
    }

    /// Resolve and build the long profile between two channels, reusing the
    /// cached profile when the endpoints are unchanged.
    pub fn resolve_long_profile(&mut self, start: &str, end: Option<&str>) -> Result<&[String]> {
        let cached = self
            .profile
            .as_ref()
            .is_some_and(|c| c.start == start && c.end.as_deref() == end);
        if !cached {
            self.profile = None;
            let profile = self.build_profile(start, end)?;
            self.profile = Some(CachedProfile {
                start: start.to_string(),
                end: end.map(str::to_string),
                profile,
            });
        }
        Ok(self.long_profile_static()?.channels.as_slice())
    }

    fn build_profile(&self, start: &str, end: Option<&str>) -> Result<LongProfile> {
        let network = self.backend.network()?;
        let chain = long_profile::resolve(network, start, end)?;
        let water = self.maxima(Domain::OneD, ResultType::WaterLevel).ok();
        let energy = self.maxima(Domain::OneD, ResultType::EnergyLevel).ok();
        let levels = ProfileLevels {
            water: water.as_deref(),
            energy: energy.as_deref(),
        };
        let profile = LongProfile::build(network, &chain, levels, &self.config)?;
        info!(start, end, channels = chain.len(), "resolved long profile");
        Ok(profile)
    }

    pub fn long_profile_static(&self) -> Result<&LongProfile> {
        self.profile
            .as_ref()
            .map(|c| &c.profile)
            .ok_or(ResultError::NoLongProfile)
    }

    /// Node values along the current profile at the timestep closest to `time`.
    pub fn long_profile_at_time(&self, result_type: &str, time: f64, tolerance: f64) -> Result<Vec<f64>> {
        let profile = self.long_profile_static()?;
        let rt: ResultType = result_type.parse()?;
        if !rt.is_node_type() {
            return Err(ResultError::UnknownResultType(format!(
                "{rt} is not reported at nodes"
            )));
        }
        let ts = self.backend.timeseries(Domain::OneD, rt)?;
        profile.at_time(self.backend.network()?, &ts, time, tolerance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::gpkg::tests::write_fixture;

    fn open_fixture() -> (tempfile::TempDir, ResultSet) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sim.gpkg");
        write_fixture(&path);
        let rs = ResultSet::open(&path, LoaderConfig::default()).unwrap();
        (dir, rs)
    }

    #[test]
    fn outcome_from_error_carries_message() {
        let outcome: Outcome<f64> = Err(ResultError::NoLongProfile).into();
        assert!(!outcome.ok);
        assert!(outcome.value.is_none());
        assert!(!outcome.message.is_empty());
    }

    #[test]
    fn synonyms_reach_the_same_series() {
        let (_dir, rs) = open_fixture();
        let a = rs.get_timeseries("N1", Domain::OneD, "H").unwrap();
        let b = rs.get_timeseries("N1", Domain::OneD, "water level").unwrap();
        assert_eq!(a, b);
        assert!(matches!(
            rs.get_timeseries("N1", Domain::OneD, "nonsense"),
            Err(ResultError::UnknownResultType(_))
        ));
    }

    #[test]
    fn computed_maximum_matches_series() {
        let (_dir, rs) = open_fixture();
        let max = rs.get_maximum("C1", Domain::OneD, "Q").unwrap();
        assert_eq!((max.time, max.value), (0.5, 3.0));
        let again = rs.maxima(Domain::OneD, ResultType::Flow).unwrap();
        let first = rs.maxima(Domain::OneD, ResultType::Flow).unwrap();
        assert!(Rc::ptr_eq(&again, &first));
    }

    #[test]
    fn previous_lower_and_bounds() {
        let (_dir, rs) = open_fixture();
        let v = rs
            .get_value("N2", Domain::OneD, "H", TimeQuery::PreviousLower(0.75))
            .unwrap();
        assert_eq!((v.time, v.value), (0.5, 9.4));
        for t in [-1.0, 5.0] {
            assert!(matches!(
                rs.get_value("N2", Domain::OneD, "H", TimeQuery::PreviousLower(t)),
                Err(ResultError::NotFound { .. })
            ));
        }
        let at = rs
            .get_value("N1", Domain::OneD, "H", TimeQuery::At { time: 1.01, tolerance: 0.05 })
            .unwrap();
        assert_eq!(at.value, 10.2);
    }

    #[test]
    fn long_profile_is_cached_and_queryable() {
        let (_dir, mut rs) = open_fixture();
        assert!(matches!(rs.long_profile_static(), Err(ResultError::NoLongProfile)));
        let chain = rs.resolve_long_profile("C1", None).unwrap().to_vec();
        assert_eq!(chain, vec!["C1".to_string(), "C2".to_string()]);
        // Energy maxima are absent here, so compare NaN-aware renderings
        let first = format!("{:?}", rs.long_profile_static().unwrap());
        rs.resolve_long_profile("C1", None).unwrap();
        assert_eq!(first, format!("{:?}", rs.long_profile_static().unwrap()));

        let reversed = rs.resolve_long_profile("C2", Some("C1")).unwrap().to_vec();
        assert_eq!(reversed, chain);

        let at = rs.long_profile_at_time("H", 0.5, 0.01).unwrap();
        assert_eq!(at.len(), 4);
        assert!(rs.long_profile_at_time("Q", 0.5, 0.01).is_err());
    }

    #[test]
    fn absolute_time_uses_reference() {
        let (_dir, rs) = open_fixture();
        let dt = rs.absolute_time(1.0).unwrap();
        assert_eq!(dt.to_string(), "2000-01-01 01:00:00");
        assert!(rs.absolute_time(1.0e13).is_none());
        assert!(rs.absolute_time(f64::INFINITY).is_none());
    }
}
