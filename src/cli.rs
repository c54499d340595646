use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand, command};
use flood_results::config::{LoaderConfig, NetCdfAccess};
use flood_results::time::parse_datetime;
use std::path::PathBuf;

/// Query flood simulation results (TPC, NetCDF or GeoPackage)
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Result index file (.tpc, .gpkg, .nc)
    pub results: PathBuf,

    /// Loader configuration (TOML)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Read timeseries from the NetCDF file named in the TPC
    #[arg(long)]
    pub prefer_netcdf: bool,

    /// NetCDF access strategy
    #[arg(long, value_parser = ["managed", "raw"])]
    pub netcdf_access: Option<String>,

    /// Reference time used when the results do not embed one
    #[arg(long)]
    pub reference_time: Option<String>,

    /// Classify solver marker values in maxima times
    #[arg(long)]
    pub interpret_special_times: bool,

    /// More log output (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Summary of the result set
    Info,
    /// Full timeseries of one entity
    Series {
        id: String,
        #[arg(short = 't', long, default_value = "H")]
        result_type: String,
        #[arg(short, long, default_value = "1d")]
        domain: String,
    },
    /// Maximum value and its time
    Max {
        id: String,
        #[arg(short = 't', long, default_value = "H")]
        result_type: String,
        #[arg(short, long, default_value = "1d")]
        domain: String,
    },
    /// Value at a time (closest timestep, or latest strictly before it)
    Value {
        id: String,
        #[arg(long)]
        time: f64,
        #[arg(short = 't', long, default_value = "H")]
        result_type: String,
        #[arg(short, long, default_value = "1d")]
        domain: String,
        #[arg(long, default_value_t = 0.01)]
        tolerance: f64,
        #[arg(long)]
        previous_lower: bool,
    },
    /// Long profile from a channel downstream, optionally to a second channel
    Profile {
        start: String,
        end: Option<String>,
        /// Also report node values at this time (hours)
        #[arg(long)]
        time: Option<f64>,
        #[arg(short = 't', long, default_value = "H")]
        result_type: String,
        #[arg(long, default_value_t = 0.01)]
        tolerance: f64,
    },
    /// Write a maxima table to CSV
    ExportMaxima {
        #[arg(short, long)]
        output: PathBuf,
        #[arg(short = 't', long, default_value = "H")]
        result_type: String,
        #[arg(short, long, default_value = "1d")]
        domain: String,
    },
}

pub fn get_args() -> Args {
    Args::parse()
}

impl Args {
    /// Configuration file (or defaults) with command line overrides applied.
    pub fn loader_config(&self) -> Result<LoaderConfig> {
        let mut config = match &self.config {
            Some(path) => LoaderConfig::from_toml_file(path)
                .with_context(|| format!("Failed to read config: {:?}", path))?,
            None => LoaderConfig::new(),
        };
        if self.prefer_netcdf {
            config.prefer_netcdf = true;
        }
        if self.interpret_special_times {
            config.interpret_special_times = true;
        }
        match self.netcdf_access.as_deref() {
            Some("raw") => config.netcdf_access = NetCdfAccess::Raw,
            Some("managed") => config.netcdf_access = NetCdfAccess::Managed,
            _ => {}
        }
        if let Some(text) = &self.reference_time {
            let origin = parse_datetime(text).ok_or_else(|| anyhow!("Unrecognised reference time: {text}"))?;
            config.default_reference_time = Some(origin);
        }
        Ok(config)
    }
}
