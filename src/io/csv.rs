use crate::backend::{Format, LoadIssue, ResultBackend};
use crate::config::LoaderConfig;
use crate::error::{Result, ResultError};
use crate::io::netcdf::load_netcdf;
use crate::maxima::{MaximaTable, load_maxima_csv};
use crate::network::{Network, load_channel_info, load_node_info};
use crate::result_type::{Domain, ResultType};
use crate::time::{ReferenceTime, TimeUnit};
use crate::timeseries::{NULL_VALUE, Timeseries};
use crate::tpc::{DataEntry, TpcIndex, UnitSystem};
use csv::{ReaderBuilder, StringRecord};
use regex::Regex;
use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::rc::Rc;
use tracing::{info, warn};

// Strips "<prefix> " and a trailing " [<simulation>]" from a header cell.
// A bracket glued to the id is part of the id.
#[derive(Debug)]
pub struct HeaderCleaner {
    pattern: Regex,
}

impl HeaderCleaner {
    pub fn new(prefix: &str, simulation_id: &str) -> Result<Self> {
        let sim = if simulation_id.is_empty() {
            String::new()
        } else {
            format!("{}|", regex::escape(simulation_id))
        };
        let pattern = format!(
            r"(?i)^\s*(?:{}\s+)?(.*?)(?:\s+\[\s*(?:{}[^\]]*)\s*\])?\s*$",
            regex::escape(prefix),
            sim
        );
        let pattern = Regex::new(&pattern).map_err(|e| ResultError::Parse(e.to_string()))?;
        Ok(HeaderCleaner { pattern })
    }

    pub fn clean(&self, cell: &str) -> String {
        self.pattern
            .captures(cell)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| cell.trim().to_string())
    }
}

// Per-row parse of a timeseries record: (time, values)
fn parse_row(record: &StringRecord, n_values: usize, bad_cells: &mut usize) -> Option<(f64, Vec<f64>)> {
    let time = record.get(1)?.trim().parse::<f64>().ok()?;
    let values = (0..n_values)
        .map(|i| match record.get(i + 2).map(|v| v.trim().parse::<f64>()) {
            Some(Ok(v)) => v,
            _ => {
                *bad_cells += 1;
                NULL_VALUE
            }
        })
        .collect();
    Some((time, values))
}

/// Read a CSV timeseries file.
pub fn read_timeseries_csv(
    path: &Path,
    name: &str,
    cleaner: &HeaderCleaner,
) -> Result<Timeseries> {
    if !path.exists() {
        return Err(ResultError::FileNotFound {
            path: path.to_path_buf(),
        });
    }
    let file = File::open(path)?;
    let mut rdr = ReaderBuilder::new()
        .has_headers(true)
        .delimiter(b',')
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(BufReader::new(file));

    let raw_headers = rdr.headers()?.clone();
    if raw_headers.len() < 3 {
        return Err(ResultError::schema(
            path.display().to_string(),
            "timeseries needs step, time and at least one value column",
        ));
    }
    let unit = TimeUnit::from_header(&raw_headers[1]);
    let mut header = vec![raw_headers[0].to_string(), raw_headers[1].to_string()];
    header.extend(raw_headers.iter().skip(2).map(|h| cleaner.clean(h)));
    let n_values = header.len() - 2;

    let mut times = Vec::new();
    let mut rows = Vec::new();
    let mut bad_cells = 0usize;
    let mut skipped = 0usize;
    for result in rdr.records() {
        let record = result?;
        match parse_row(&record, n_values, &mut bad_cells) {
            Some((time, values)) => {
                times.push(time);
                rows.push(values);
            }
            None => skipped += 1,
        }
    }
    if bad_cells > 0 || skipped > 0 {
        warn!(file = %path.display(), bad_cells, skipped_rows = skipped, "recovered from unreadable cells");
    }

    Timeseries::new(name, header, times, unit, rows)
}

// Result set indexed by a TPC file with CSV (or NetCDF) timeseries
pub struct TpcBackend {
    index: TpcIndex,
    format: Format,
    reference_time: Option<ReferenceTime>,
    network: Network,
    series: HashMap<(Domain, ResultType), Rc<Timeseries>>,
    maxima: HashMap<ResultType, Rc<MaximaTable>>,
    issues: Vec<LoadIssue>,
}

impl TpcBackend {
    pub fn open(path: &Path, config: &LoaderConfig) -> Result<Self> {
        let index = TpcIndex::load(path)?;
        let mut issues = Vec::new();

        let network = load_network(&index, config, &mut issues)?;

        let mut backend = TpcBackend {
            reference_time: ReferenceTime::reconcile(index.reference_time, config.default_reference_time),
            format: Format::Csv,
            network,
            series: HashMap::new(),
            maxima: HashMap::new(),
            issues,
            index,
        };

        let nc_path = backend
            .index
            .netcdf
            .clone()
            .filter(|_| config.prefer_netcdf);
        match nc_path {
            Some(nc_path) => backend.load_netcdf_series(&nc_path, config),
            None => backend.load_csv_series(config),
        }
        backend.load_maxima(config);

        info!(
            simulation = %backend.index.simulation_id,
            channels = backend.network.channels().len(),
            datasets = backend.series.len(),
            issues = backend.issues.len(),
            "result set loaded"
        );
        Ok(backend)
    }

    fn load_csv_series(&mut self, config: &LoaderConfig) {
        let entries: Vec<DataEntry> = self.index.data.clone();
        for entry in entries {
            match self.load_entry(&entry, config) {
                Ok(ts) => {
                    self.series
                        .insert((entry.domain, entry.result_type), Rc::new(ts));
                }
                Err(e) => {
                    warn!(dataset = %entry.key, error = %e, "failed to load dataset");
                    self.issues.push(LoadIssue {
                        dataset: entry.key.clone(),
                        domain: Some(entry.domain),
                        result_type: Some(entry.result_type),
                        message: e.to_string(),
                    });
                }
            }
        }
    }

    fn load_entry(&self, entry: &DataEntry, config: &LoaderConfig) -> Result<Timeseries> {
        let cleaner = HeaderCleaner::new(
            &config.header_prefix(entry.result_type),
            &self.index.simulation_id,
        )?;
        let ts = read_timeseries_csv(&entry.path, &entry.key, &cleaner)?;
        let expected = match entry.domain {
            Domain::ReportingLocation => entry.expected_count.or(self.index.n_rl_points),
            _ => entry.expected_count,
        };
        if let Some(expected) = expected {
            if expected != ts.ids().len() {
                return Err(ResultError::schema(
                    &entry.key,
                    format!("index declares {} entities, file holds {}", expected, ts.ids().len()),
                ));
            }
        }
        Ok(ts)
    }

    fn load_netcdf_series(&mut self, nc_path: &Path, config: &LoaderConfig) {
        self.format = Format::NetCdf;
        match load_netcdf(nc_path, config.netcdf_access) {
            Ok(dataset) => {
                if self.index.reference_time.is_none() {
                    self.reference_time =
                        ReferenceTime::reconcile(dataset.reference_time, config.default_reference_time);
                }
                for (domain, rt, result) in dataset.series {
                    match result {
                        Ok(ts) => {
                            self.series.insert((domain, rt), Rc::new(ts));
                        }
                        Err(e) => self.issues.push(LoadIssue {
                            dataset: nc_path.display().to_string(),
                            domain: Some(domain),
                            result_type: Some(rt),
                            message: e.to_string(),
                        }),
                    }
                }
            }
            Err(e) => {
                warn!(file = %nc_path.display(), error = %e, "NetCDF timeseries unavailable, falling back to CSV");
                self.issues.push(LoadIssue {
                    dataset: nc_path.display().to_string(),
                    domain: None,
                    result_type: None,
                    message: e.to_string(),
                });
                self.format = Format::Csv;
                self.load_csv_series(config);
            }
        }
    }

    fn load_maxima(&mut self, config: &LoaderConfig) {
        let hours = self
            .series
            .iter()
            .find(|((domain, _), _)| *domain == Domain::OneD)
            .map(|(_, ts)| ts.source_unit() == TimeUnit::Hours)
            .unwrap_or(true);
        let special = (config.interpret_special_times && hours).then_some(&config.special_times);

        let files = [self.index.node_maxima.clone(), self.index.channel_maxima.clone()];
        for path in files.into_iter().flatten() {
            match load_maxima_csv(&path, special) {
                Ok(tables) => {
                    for (rt, table) in tables {
                        self.maxima.insert(rt, Rc::new(table));
                    }
                }
                Err(e) => self.issues.push(LoadIssue {
                    dataset: path.display().to_string(),
                    domain: Some(Domain::OneD),
                    result_type: None,
                    message: e.to_string(),
                }),
            }
        }
    }
}

// Channel/node registries from the info files named by the index
fn load_network(index: &TpcIndex, config: &LoaderConfig, issues: &mut Vec<LoadIssue>) -> Result<Network> {
    let Some(channel_path) = &index.channel_info else {
        return Ok(Network::default());
    };
    let channels = match load_channel_info(channel_path, &config.channel_columns) {
        Ok(channels) => channels,
        Err(e) => {
            issues.push(LoadIssue {
                dataset: channel_path.display().to_string(),
                domain: Some(Domain::OneD),
                result_type: None,
                message: e.to_string(),
            });
            return Ok(Network::default());
        }
    };

    let network = match &index.node_info {
        Some(node_path) => match load_node_info(node_path, &config.node_columns) {
            Ok(nodes) => Network::new(channels, nodes),
            Err(e) => {
                issues.push(LoadIssue {
                    dataset: node_path.display().to_string(),
                    domain: Some(Domain::OneD),
                    result_type: None,
                    message: e.to_string(),
                });
                Network::from_channels(channels)
            }
        },
        None => Network::from_channels(channels),
    };

    let declared_nodes = index.node_info.as_ref().and(index.n_nodes);
    network.validate_counts(index.n_channels, declared_nodes)?;
    Ok(network)
}

impl ResultBackend for TpcBackend {
    fn format(&self) -> Format {
        self.format
    }

    fn simulation_id(&self) -> &str {
        &self.index.simulation_id
    }

    fn units(&self) -> Option<UnitSystem> {
        self.index.units
    }

    fn reference_time(&self) -> Option<ReferenceTime> {
        self.reference_time
    }

    fn result_types(&self, domain: Domain) -> Vec<ResultType> {
        let mut types: Vec<ResultType> = self
            .series
            .keys()
            .filter(|(d, _)| *d == domain)
            .map(|(_, rt)| *rt)
            .collect();
        types.sort();
        types
    }

    fn timeseries(&self, domain: Domain, result_type: ResultType) -> Result<Rc<Timeseries>> {
        self.series
            .get(&(domain, result_type))
            .cloned()
            .ok_or_else(|| ResultError::not_found("result type", format!("{domain} {result_type}")))
    }

    fn dedicated_maxima(&self, domain: Domain, result_type: ResultType) -> Option<Rc<MaximaTable>> {
        match domain {
            Domain::OneD => self.maxima.get(&result_type).cloned(),
            _ => None,
        }
    }

    fn network(&self) -> Result<&Network> {
        Ok(&self.network)
    }

    fn load_issues(&self) -> Vec<LoadIssue> {
        self.issues.clone()
    }
}
