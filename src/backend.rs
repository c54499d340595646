//! The backend seam: one trait, one variant per physical format.

use crate::config::LoaderConfig;
use crate::error::{Result, ResultError};
use crate::io::csv::TpcBackend;
use crate::io::gpkg::GpkgBackend;
use crate::io::netcdf::NetCdfBackend;
use crate::maxima::MaximaTable;
use crate::network::Network;
use crate::result_type::{Domain, ResultType};
use crate::time::ReferenceTime;
use crate::timeseries::Timeseries;
use crate::tpc::UnitSystem;
use serde::Serialize;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::rc::Rc;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Format {
    Csv,
    NetCdf,
    GeoPackage,
}

/// A dataset that failed to load while the rest of the result set did.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoadIssue {
    pub dataset: String,
    pub domain: Option<Domain>,
    pub result_type: Option<ResultType>,
    pub message: String,
}

mod private {
    pub trait Sealed {}

    impl Sealed for crate::io::csv::TpcBackend {}
    impl Sealed for crate::io::netcdf::NetCdfBackend {}
    impl Sealed for crate::io::gpkg::GpkgBackend {}
}

pub trait ResultBackend: private::Sealed {
    fn format(&self) -> Format;

    fn simulation_id(&self) -> &str;

    fn units(&self) -> Option<UnitSystem> {
        None
    }

    fn reference_time(&self) -> Option<ReferenceTime>;

    fn result_types(&self, domain: Domain) -> Vec<ResultType>;

    fn timeseries(&self, domain: Domain, result_type: ResultType) -> Result<Rc<Timeseries>>;

    /// Maxima read from a dedicated table, if the format has one.
    fn dedicated_maxima(&self, _domain: Domain, _result_type: ResultType) -> Option<Rc<MaximaTable>> {
        None
    }

    fn network(&self) -> Result<&Network>;

    fn load_issues(&self) -> Vec<LoadIssue>;
}

const SQLITE_MAGIC: &[u8] = b"SQLite format 3\0";
const HDF5_MAGIC: &[u8] = b"\x89HDF";

/// Pick a backend from the file extension, sniffing magic bytes when the
/// extension is not conclusive.
pub fn detect_format(path: &Path, config: &LoaderConfig) -> Result<Format> {
    if !path.exists() {
        return Err(ResultError::FileNotFound {
            path: path.to_path_buf(),
        });
    }
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "tpc" => {
            return Ok(if config.prefer_netcdf {
                Format::NetCdf
            } else {
                Format::Csv
            });
        }
        "gpkg" | "sqlite" | "db" => return Ok(Format::GeoPackage),
        "nc" => return Ok(Format::NetCdf),
        _ => {}
    }

    let mut head = [0u8; 16];
    let n = File::open(path)?.read(&mut head)?;
    let head = &head[..n];
    if head.starts_with(SQLITE_MAGIC) {
        Ok(Format::GeoPackage)
    } else if head.starts_with(b"CDF\x01") || head.starts_with(b"CDF\x02") || head.starts_with(HDF5_MAGIC) {
        Ok(Format::NetCdf)
    } else if head.is_empty() {
        Err(ResultError::UnsupportedFormat {
            path: path.to_path_buf(),
        })
    } else {
        Ok(Format::Csv)
    }
}

pub fn open_backend(path: &Path, config: &LoaderConfig) -> Result<Box<dyn ResultBackend>> {
    let format = detect_format(path, config)?;
    info!(path = %path.display(), ?format, "opening result set");
    // A TPC may still route its timeseries through NetCDF
    let is_index = path
        .extension()
        .is_some_and(|e| e.eq_ignore_ascii_case("tpc"));
    let backend: Box<dyn ResultBackend> = match format {
        Format::GeoPackage => Box::new(GpkgBackend::open(path, config)?),
        Format::NetCdf if !is_index => Box::new(NetCdfBackend::open(path, config)?),
        Format::NetCdf | Format::Csv => Box::new(TpcBackend::open(path, config)?),
    };
    Ok(backend)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sniffs_sqlite_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.bin");
        std::fs::write(&path, b"SQLite format 3\0rest").unwrap();
        assert_eq!(detect_format(&path, &LoaderConfig::default()).unwrap(), Format::GeoPackage);
    }

    #[test]
    fn sniffs_classic_netcdf() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.dat");
        std::fs::write(&path, b"CDF\x01\0\0\0\0").unwrap();
        assert_eq!(detect_format(&path, &LoaderConfig::default()).unwrap(), Format::NetCdf);
    }

    #[test]
    fn text_defaults_to_tpc() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.txt");
        std::fs::write(&path, "Format Version == 2\n").unwrap();
        assert_eq!(detect_format(&path, &LoaderConfig::default()).unwrap(), Format::Csv);
    }

    #[test]
    fn missing_file() {
        let err = detect_format(Path::new("/no/such/file.tpc"), &LoaderConfig::default()).unwrap_err();
        assert!(matches!(err, ResultError::FileNotFound { .. }));
    }
}
