use crate::backend::{Format, LoadIssue, ResultBackend};
use crate::config::{LoaderConfig, NetCdfAccess};
use crate::error::{Result, ResultError};
use crate::io::netcdf_raw::RawNcFile;
use crate::network::Network;
use crate::result_type::{Domain, ResultType};
use crate::time::{ReferenceTime, TimeUnit};
use crate::timeseries::{NULL_VALUE, Timeseries};
use std::collections::HashMap;
use std::path::Path;
use std::rc::Rc;
use tracing::{debug, info, warn};

// Variable layout shared by both access strategies
pub const TIME_DIMENSION: &str = "time";
pub const TIME_VARIABLE: &str = "time";

/// (data variable, id variable, domain, result type)
pub const NC_VARIABLES: &[(&str, &str, Domain, ResultType)] = &[
    ("water_levels_1d", "node_names", Domain::OneD, ResultType::WaterLevel),
    ("energy_levels_1d", "node_names", Domain::OneD, ResultType::EnergyLevel),
    ("flows_1d", "channel_names", Domain::OneD, ResultType::Flow),
    ("flow_1d", "channel_names", Domain::OneD, ResultType::Flow),
    ("velocities_1d", "channel_names", Domain::OneD, ResultType::Velocity),
    ("flow_areas_1d", "channel_names", Domain::OneD, ResultType::FlowArea),
    ("water_levels_2d", "point_names", Domain::TwoD, ResultType::WaterLevel),
    ("velocities_2d", "point_names", Domain::TwoD, ResultType::Velocity),
    ("flows_2d", "line_names", Domain::TwoD, ResultType::Flow),
    ("water_levels_rl", "rl_point_names", Domain::ReportingLocation, ResultType::WaterLevel),
    ("flows_rl", "rl_line_names", Domain::ReportingLocation, ResultType::Flow),
];

// Fill values written by the library for unset cells
const FILL_THRESHOLD: f64 = 1e30;

/// Read access to a NetCDF file, independent of how the library is reached.
pub trait NcSource {
    fn dimension_len(&self, name: &str) -> Result<Option<usize>>;

    fn has_variable(&self, name: &str) -> Result<bool>;

    /// Dimension lengths of a variable.
    fn shape(&self, name: &str) -> Result<Vec<usize>>;

    /// All values of a numeric variable, flattened row-major.
    fn read_f64(&self, name: &str) -> Result<Vec<f64>>;

    /// Raw bytes of a character variable.
    fn read_text(&self, name: &str) -> Result<Vec<u8>>;

    fn text_attribute(&self, variable: &str, attribute: &str) -> Result<Option<String>>;
}

// Managed access through the netcdf crate
pub struct ManagedNc {
    file: netcdf::File,
}

impl ManagedNc {
    pub fn open(path: &Path) -> Result<Self> {
        let file = netcdf::open(path)?;
        Ok(ManagedNc { file })
    }

    fn variable(&self, name: &str) -> Result<netcdf::Variable<'_>> {
        self.file
            .variable(name)
            .ok_or_else(|| ResultError::not_found("NetCDF variable", name))
    }
}

impl NcSource for ManagedNc {
    fn dimension_len(&self, name: &str) -> Result<Option<usize>> {
        Ok(self.file.dimension(name).map(|d| d.len()))
    }

    fn has_variable(&self, name: &str) -> Result<bool> {
        Ok(self.file.variable(name).is_some())
    }

    fn shape(&self, name: &str) -> Result<Vec<usize>> {
        Ok(self
            .variable(name)?
            .dimensions()
            .iter()
            .map(|d| d.len())
            .collect())
    }

    fn read_f64(&self, name: &str) -> Result<Vec<f64>> {
        Ok(self.variable(name)?.get_values::<f64, _>(..)?)
    }

    fn read_text(&self, name: &str) -> Result<Vec<u8>> {
        Ok(self.variable(name)?.get_raw_values(..)?)
    }

    fn text_attribute(&self, variable: &str, attribute: &str) -> Result<Option<String>> {
        match self.variable(variable)?.attribute_value(attribute) {
            Some(Ok(netcdf::AttributeValue::Str(text))) => Ok(Some(text)),
            Some(Ok(_)) | None => Ok(None),
            Some(Err(e)) => Err(e.into()),
        }
    }
}

/// Split a (rows x width) character array into trimmed ids.
pub fn decode_names(bytes: &[u8], rows: usize, width: usize) -> Vec<String> {
    (0..rows)
        .map(|i| {
            let start = i * width;
            let end = (start + width).min(bytes.len());
            let raw = bytes.get(start..end).unwrap_or_default();
            let raw = raw.split(|b| *b == 0).next().unwrap_or_default();
            String::from_utf8_lossy(raw).trim().to_string()
        })
        .collect()
}

pub struct NcDataset {
    pub reference_time: Option<ReferenceTime>,
    pub unit: TimeUnit,
    pub series: Vec<(Domain, ResultType, Result<Timeseries>)>,
}

pub fn load_netcdf(path: &Path, access: NetCdfAccess) -> Result<NcDataset> {
    if !path.exists() {
        return Err(ResultError::FileNotFound {
            path: path.to_path_buf(),
        });
    }
    match access {
        NetCdfAccess::Managed => read_dataset(&ManagedNc::open(path)?, path),
        NetCdfAccess::Raw => {
            let file = RawNcFile::open(path)?;
            let (ndims, nvars) = file.counts()?;
            debug!(ndims, nvars, file = %path.display(), "opened NetCDF through the C library");
            read_dataset(&file, path)
        }
    }
}

fn read_dataset(source: &dyn NcSource, path: &Path) -> Result<NcDataset> {
    let n_times = source
        .dimension_len(TIME_DIMENSION)?
        .ok_or_else(|| ResultError::schema(path.display().to_string(), "missing time dimension"))?;
    let times = source.read_f64(TIME_VARIABLE)?;
    if times.len() != n_times {
        return Err(ResultError::schema(
            path.display().to_string(),
            format!("time variable holds {} values, dimension {}", times.len(), n_times),
        ));
    }

    let units = source.text_attribute(TIME_VARIABLE, "units")?;
    let reference_time = units.as_deref().and_then(ReferenceTime::from_cf_units);
    let unit = reference_time.map(|r| r.unit).unwrap_or_else(|| {
        units
            .as_deref()
            .map(TimeUnit::from_header)
            .unwrap_or(TimeUnit::Hours)
    });

    let mut series = Vec::new();
    let mut loaded: Vec<(Domain, ResultType)> = Vec::new();
    for (variable, names, domain, rt) in NC_VARIABLES {
        if loaded.contains(&(*domain, *rt)) || !source.has_variable(variable)? {
            continue;
        }
        let result = read_variable(source, variable, names, &times, unit);
        if let Err(e) = &result {
            warn!(variable, error = %e, "failed to read NetCDF variable");
        }
        loaded.push((*domain, *rt));
        series.push((*domain, *rt, result));
    }

    info!(file = %path.display(), variables = series.len(), "read NetCDF timeseries");
    Ok(NcDataset {
        reference_time,
        unit,
        series,
    })
}

fn read_variable(
    source: &dyn NcSource,
    variable: &str,
    names_variable: &str,
    times: &[f64],
    unit: TimeUnit,
) -> Result<Timeseries> {
    let shape = source.shape(variable)?;
    let [n_times, n_entities] = shape[..] else {
        return Err(ResultError::schema(variable, format!("expected 2 dimensions, found {}", shape.len())));
    };
    if n_times != times.len() {
        return Err(ResultError::schema(
            variable,
            format!("{} rows but {} timesteps", n_times, times.len()),
        ));
    }

    let name_shape = source.shape(names_variable)?;
    let [n_names, width] = name_shape[..] else {
        return Err(ResultError::schema(names_variable, "id variable must be a 2-D character array"));
    };
    if n_names != n_entities {
        return Err(ResultError::schema(
            variable,
            format!("{} ids in {} but {} columns", n_names, names_variable, n_entities),
        ));
    }
    let ids = decode_names(&source.read_text(names_variable)?, n_names, width);

    let values = source.read_f64(variable)?;
    if values.len() != n_times * n_entities {
        return Err(ResultError::schema(variable, "value buffer does not match dimensions"));
    }
    let rows = values
        .chunks(n_entities.max(1))
        .take(n_times)
        .map(|row| {
            row.iter()
                .map(|v| if v.abs() > FILL_THRESHOLD { NULL_VALUE } else { *v })
                .collect()
        })
        .collect();

    Timeseries::from_columns(variable, &ids, times.to_vec(), unit, rows)
}

// Result set consisting only of a NetCDF timeseries file (no 1D network)
pub struct NetCdfBackend {
    simulation_id: String,
    reference_time: Option<ReferenceTime>,
    network: Network,
    series: HashMap<(Domain, ResultType), Rc<Timeseries>>,
    issues: Vec<LoadIssue>,
}

impl NetCdfBackend {
    pub fn open(path: &Path, config: &LoaderConfig) -> Result<Self> {
        let dataset = load_netcdf(path, config.netcdf_access)?;
        let mut series = HashMap::new();
        let mut issues = Vec::new();
        for (domain, rt, result) in dataset.series {
            match result {
                Ok(ts) => {
                    series.insert((domain, rt), Rc::new(ts));
                }
                Err(e) => issues.push(LoadIssue {
                    dataset: path.display().to_string(),
                    domain: Some(domain),
                    result_type: Some(rt),
                    message: e.to_string(),
                }),
            }
        }
        Ok(NetCdfBackend {
            simulation_id: path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default(),
            reference_time: ReferenceTime::reconcile(dataset.reference_time, config.default_reference_time),
            network: Network::default(),
            series,
            issues,
        })
    }
}

impl ResultBackend for NetCdfBackend {
    fn format(&self) -> Format {
        Format::NetCdf
    }

    fn simulation_id(&self) -> &str {
        &self.simulation_id
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

    fn network(&self) -> Result<&Network> {
        Ok(&self.network)
    }

    fn load_issues(&self) -> Vec<LoadIssue> {
        self.issues.clone()
    }
}
