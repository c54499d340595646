//! Parser for the TPC master index (`Key == Value` lines).

use crate::error::{Result, ResultError};
use crate::result_type::{Domain, ResultType};
use crate::time::{ReferenceTime, TimeUnit, parse_datetime};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum UnitSystem {
    Metric,
    UsCustomary,
}

/// One result-type data file announced by the index.
#[derive(Debug, Clone, PartialEq)]
pub struct DataEntry {
    pub key: String,
    pub domain: Domain,
    pub result_type: ResultType,
    pub path: PathBuf,
    /// Count embedded in the key as `[N]`.
    pub expected_count: Option<usize>,
}

#[derive(Debug, Clone, Default)]
pub struct TpcIndex {
    pub dir: PathBuf,
    pub format_version: Option<String>,
    pub units: Option<UnitSystem>,
    pub simulation_id: String,
    pub reference_time: Option<ReferenceTime>,
    pub n_channels: Option<usize>,
    pub n_nodes: Option<usize>,
    pub n_rl_points: Option<usize>,
    pub channel_info: Option<PathBuf>,
    pub node_info: Option<PathBuf>,
    pub node_maxima: Option<PathBuf>,
    pub channel_maxima: Option<PathBuf>,
    pub netcdf: Option<PathBuf>,
    pub data: Vec<DataEntry>,
    /// Every pair as written, keyed by lowercase key.
    pub raw: BTreeMap<String, String>,
}

impl TpcIndex {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(ResultError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        let text = std::fs::read_to_string(path)?;
        let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        let mut index = Self::parse(&text, dir)?;
        if index.simulation_id.is_empty() {
            index.simulation_id = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
        }
        Ok(index)
    }

    pub fn parse(text: &str, dir: PathBuf) -> Result<Self> {
        let mut index = TpcIndex {
            dir,
            ..Default::default()
        };

        for (line_no, line) in text.lines().enumerate() {
            let Some((key, value)) = line.split_once("==") else {
                continue;
            };
            let (key, count) = split_count(key.trim());
            let value = value.trim().to_string();
            let lower = key.to_ascii_lowercase();
            index.raw.insert(lower.clone(), value.clone());

            match lower.as_str() {
                "format version" => index.format_version = Some(value),
                "units" => {
                    index.units = Some(if value.to_ascii_lowercase().starts_with("us") {
                        UnitSystem::UsCustomary
                    } else {
                        UnitSystem::Metric
                    })
                }
                "simulation id" => index.simulation_id = value,
                "reference time" => {
                    index.reference_time = parse_datetime(&value)
                        .map(|origin| ReferenceTime::new(origin, TimeUnit::Hours));
                    if index.reference_time.is_none() {
                        warn!(line = line_no + 1, value = %value, "unreadable reference time, ignoring it");
                    }
                }
                "number 1d channels" => index.n_channels = Some(parse_count(&value, line_no)?),
                "number 1d nodes" => index.n_nodes = Some(parse_count(&value, line_no)?),
                "number reporting location points" => {
                    index.n_rl_points = Some(parse_count(&value, line_no)?)
                }
                "1d channel info" => index.channel_info = Some(index.resolve(&value)),
                "1d node info" => index.node_info = Some(index.resolve(&value)),
                "1d node maximums" => index.node_maxima = Some(index.resolve(&value)),
                "1d channel maximums" => index.channel_maxima = Some(index.resolve(&value)),
                "netcdf time series" => index.netcdf = Some(index.resolve(&value)),
                _ => match classify_data_key(&lower) {
                    Some((domain, result_type)) => {
                        let path = index.resolve(&value);
                        index.data.push(DataEntry {
                            key: key.to_string(),
                            domain,
                            result_type,
                            path,
                            expected_count: count,
                        });
                    }
                    None => debug!(key = %key, value = %value, "unrecognised TPC key"),
                },
            }
        }

        Ok(index)
    }

    /// Path of a data file relative to the TPC directory.
    pub fn resolve(&self, value: &str) -> PathBuf {
        let normalized = value.trim().trim_matches('"').replace('\\', "/");
        self.dir.join(normalized)
    }

    pub fn entries(&self, domain: Domain) -> impl Iterator<Item = &DataEntry> {
        self.data.iter().filter(move |e| e.domain == domain)
    }
}

fn split_count(key: &str) -> (&str, Option<usize>) {
    if let Some(open) = key.rfind('[') {
        if key.ends_with(']') {
            let count = key[open + 1..key.len() - 1].trim().parse().ok();
            return (key[..open].trim_end(), count);
        }
    }
    (key, None)
}

fn parse_count(value: &str, line_no: usize) -> Result<usize> {
    value
        .trim()
        .parse()
        .map_err(|_| ResultError::Parse(format!("line {}: invalid count '{}'", line_no + 1, value)))
}

fn classify_data_key(lower: &str) -> Option<(Domain, ResultType)> {
    const PREFIXES: &[(&str, Domain)] = &[
        ("1d ", Domain::OneD),
        ("2d point ", Domain::TwoD),
        ("2d line ", Domain::TwoD),
        ("2d region ", Domain::TwoD),
        ("reporting location ", Domain::ReportingLocation),
    ];
    PREFIXES.iter().find_map(|(prefix, domain)| {
        let rest = lower.strip_prefix(prefix)?;
        ResultType::parse(rest).map(|rt| (*domain, rt))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
Format Version == 2
Units == METRIC
Simulation ID == M01_5m_001
Reference Time == 2000-01-01 00:00
Number 1D Channels == 3
Number 1D Nodes == 4
1D Channel Info == csv\\M01_5m_001_1d_Chan.csv
1D Node Info == csv\\M01_5m_001_1d_Nodes.csv
1D Water Levels == csv\\M01_5m_001_1d_H.csv
1D Flows == csv\\M01_5m_001_1d_Q.csv
1D Node Maximums == csv\\M01_5m_001_1d_Nmx.csv
2D Point Water Level [3] == csv\\M01_5m_001_2d_PO_H.csv
Reporting Location Flows [2] == csv\\M01_5m_001_RL_Q.csv
Something Else == 1
";

    #[test]
    fn parses_keys_and_paths() {
        let idx = TpcIndex::parse(SAMPLE, PathBuf::from("/runs")).unwrap();
        assert_eq!(idx.simulation_id, "M01_5m_001");
        assert_eq!(idx.units, Some(UnitSystem::Metric));
        assert_eq!(idx.n_channels, Some(3));
        assert_eq!(
            idx.channel_info.as_deref(),
            Some(Path::new("/runs/csv/M01_5m_001_1d_Chan.csv"))
        );
        assert!(idx.reference_time.is_some());
        assert_eq!(idx.data.len(), 4);
        assert_eq!(idx.raw.get("something else").map(String::as_str), Some("1"));
    }

    #[test]
    fn bracket_count_is_extracted() {
        let idx = TpcIndex::parse(SAMPLE, PathBuf::new()).unwrap();
        let po: Vec<_> = idx.entries(Domain::TwoD).collect();
        assert_eq!(po.len(), 1);
        assert_eq!(po[0].result_type, ResultType::WaterLevel);
        assert_eq!(po[0].expected_count, Some(3));
        let rl: Vec<_> = idx.entries(Domain::ReportingLocation).collect();
        assert_eq!(rl[0].result_type, ResultType::Flow);
        assert_eq!(rl[0].expected_count, Some(2));
    }

    #[test]
    fn unreadable_reference_time_is_skipped() {
        let idx = TpcIndex::parse("Reference Time == sometime\nSimulation ID == run", PathBuf::new()).unwrap();
        assert!(idx.reference_time.is_none());
        assert_eq!(idx.simulation_id, "run");

        let idx = TpcIndex::parse("Reference Time == 01/01/2000 00:00:00.000", PathBuf::new()).unwrap();
        assert!(idx.reference_time.is_some());
    }

    #[test]
    fn bad_count_is_parse_error() {
        let err = TpcIndex::parse("Number 1D Channels == many", PathBuf::new()).unwrap_err();
        assert!(matches!(err, ResultError::Parse(_)));
    }
}
