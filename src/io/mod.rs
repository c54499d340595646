pub mod csv;
pub mod gpkg;
pub mod netcdf;
pub mod netcdf_raw;
