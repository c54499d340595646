use anyhow::{Context, Result};
use csv::{Writer, WriterBuilder};
use flood_results::{Domain, LongProfile, Outcome, ResultSet, ResultType, TimeQuery};
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::path::Path;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod cli;

use cli::{Command, get_args};

#[derive(Serialize)]
struct InfoReport {
    simulation_id: String,
    format: String,
    units: Option<String>,
    reference_time: Option<String>,
    result_types: BTreeMap<String, Vec<String>>,
    channels: Option<usize>,
    nodes: Option<usize>,
    issues: Vec<flood_results::LoadIssue>,
}

#[derive(Serialize)]
struct ProfileReport<'a> {
    profile: &'a LongProfile,
    at_time: Option<Outcome<Vec<f64>>>,
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value).context("Failed to serialise output")?);
    Ok(())
}

fn main() -> Result<()> {
    let args = get_args();
    init_tracing(args.verbose);
    let config = args.loader_config()?;

    let mut results = ResultSet::open(&args.results, config)
        .with_context(|| format!("Failed to open result set: {:?}", args.results))?;

    match &args.command {
        Command::Info => print_json(&info_report(&results)),
        Command::Series {
            id,
            result_type,
            domain,
        } => {
            let domain: Domain = domain.parse()?;
            print_json(&Outcome::from(results.get_timeseries(id, domain, result_type)))
        }
        Command::Max {
            id,
            result_type,
            domain,
        } => {
            let domain: Domain = domain.parse()?;
            print_json(&Outcome::from(results.get_maximum(id, domain, result_type)))
        }
        Command::Value {
            id,
            time,
            result_type,
            domain,
            tolerance,
            previous_lower,
        } => {
            let domain: Domain = domain.parse()?;
            let query = if *previous_lower {
                TimeQuery::PreviousLower(*time)
            } else {
                TimeQuery::At {
                    time: *time,
                    tolerance: *tolerance,
                }
            };
            print_json(&Outcome::from(results.get_value(id, domain, result_type, query)))
        }
        Command::Profile {
            start,
            end,
            time,
            result_type,
            tolerance,
        } => {
            results
                .resolve_long_profile(start, end.as_deref())
                .with_context(|| format!("Failed to resolve long profile from {start}"))?;
            let at_time = time.map(|t| Outcome::from(results.long_profile_at_time(result_type, t, *tolerance)));
            let profile = results.long_profile_static()?;
            print_json(&ProfileReport { profile, at_time })
        }
        Command::ExportMaxima {
            output,
            result_type,
            domain,
        } => export_maxima(&results, output, domain.parse()?, result_type.parse()?),
    }
}

fn info_report(results: &ResultSet) -> InfoReport {
    let result_types = Domain::ALL
        .into_iter()
        .map(|d| {
            (
                d.to_string(),
                results
                    .list_result_types(d)
                    .into_iter()
                    .map(|rt| rt.name().to_string())
                    .collect(),
            )
        })
        .collect();
    let network = results.network().ok();
    InfoReport {
        simulation_id: results.simulation_id().to_string(),
        format: format!("{:?}", results.format()),
        units: results.units().map(|u| format!("{:?}", u)),
        reference_time: results.reference_time().map(|r| r.origin.to_string()),
        result_types,
        channels: network.map(|n| n.channels().len()),
        nodes: network.map(|n| n.nodes().len()),
        issues: results.load_issues(),
    }
}

pub fn create_csv_writer(path: &Path) -> Result<Writer<File>> {
    let mut wtr = WriterBuilder::new()
        .has_headers(true)
        .from_path(path)
        .with_context(|| format!("Failed to create CSV: {:?}", path))?;

    wtr.write_record(["id", "max", "time_of_max", "datetime_of_max", "time_kind"])?;

    Ok(wtr)
}

fn export_maxima(results: &ResultSet, output: &Path, domain: Domain, result_type: ResultType) -> Result<()> {
    let table = results.maxima(domain, result_type)?;
    let mut wtr = create_csv_writer(output)?;

    let pb = ProgressBar::new(table.len() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ids ({eta})")?
            .progress_chars("#>-"),
    );

    for id in table.ids() {
        let entry = table.lookup(id)?;
        let datetime = results
            .absolute_time(entry.time)
            .map(|d| d.to_string())
            .unwrap_or_default();
        let record = [
            id.clone(),
            entry.value.to_string(),
            entry.time.to_string(),
            datetime,
            format!("{:?}", entry.time_kind),
        ];
        wtr.write_record(&record)?;
        pb.inc(1);
    }
    pb.finish_and_clear();

    wtr.flush().context("Failed to flush CSV writer")?;
    info!(path = %output.display(), rows = table.len(), "wrote maxima");
    println!("{} maxima written to {}", table.len(), output.display());
    Ok(())
}
