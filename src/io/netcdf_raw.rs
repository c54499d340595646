//! NetCDF access straight through the C library.
//!
//! Every call goes through `netcdf_sys` and its status code is checked.
//! The file handle is closed when `RawNcFile` is dropped.
//!
//! libnetcdf is linked when the crate is built rather than located and
//! loaded at run time, so there is no search for a library next to the
//! executable and no "library not found" error at open. A missing library
//! shows up as a link failure instead.

use crate::error::{Result, ResultError};
use crate::io::netcdf::NcSource;
use netcdf_sys as ffi;
use std::ffi::{CStr, CString, c_char, c_int};
use std::path::Path;
use tracing::warn;

/// Turn a status code into an error carrying the library's message.
fn check(call: &'static str, status: c_int) -> Result<()> {
    if status == ffi::NC_NOERR {
        return Ok(());
    }
    let message = unsafe {
        let ptr = ffi::nc_strerror(status);
        if ptr.is_null() {
            String::new()
        } else {
            CStr::from_ptr(ptr).to_string_lossy().into_owned()
        }
    };
    Err(ResultError::NetCdfStatus {
        call,
        status,
        message,
    })
}

fn c_name(name: &str) -> Result<CString> {
    CString::new(name).map_err(|_| ResultError::Parse(format!("name contains a null byte: {name:?}")))
}

/// Buffer of fixed length handed to the library for numeric reads.
struct FloatBuffer(Box<[f64]>);

impl FloatBuffer {
    fn zeroed(len: usize) -> Self {
        FloatBuffer(vec![0.0; len].into_boxed_slice())
    }

    fn as_mut_ptr(&mut self) -> *mut f64 {
        self.0.as_mut_ptr()
    }

    fn into_vec(self) -> Vec<f64> {
        self.0.into_vec()
    }
}

/// Buffer of fixed length handed to the library for character reads.
struct CharBuffer(Box<[u8]>);

impl CharBuffer {
    fn zeroed(len: usize) -> Self {
        CharBuffer(vec![0; len].into_boxed_slice())
    }

    fn as_mut_ptr(&mut self) -> *mut c_char {
        self.0.as_mut_ptr() as *mut c_char
    }

    fn into_vec(self) -> Vec<u8> {
        self.0.into_vec()
    }
}

pub struct RawNcFile {
    ncid: c_int,
}

impl RawNcFile {
    pub fn open(path: &Path) -> Result<Self> {
        let c_path = c_name(&path.to_string_lossy())?;
        let mut ncid: c_int = 0;
        let status = unsafe { ffi::nc_open(c_path.as_ptr(), ffi::NC_NOWRITE, &mut ncid) };
        check("nc_open", status)?;
        Ok(RawNcFile { ncid })
    }

    /// Number of dimensions and variables in the root group.
    pub fn counts(&self) -> Result<(usize, usize)> {
        let mut ndims: c_int = 0;
        let mut nvars: c_int = 0;
        check("nc_inq_ndims", unsafe { ffi::nc_inq_ndims(self.ncid, &mut ndims) })?;
        check("nc_inq_nvars", unsafe { ffi::nc_inq_nvars(self.ncid, &mut nvars) })?;
        Ok((ndims.max(0) as usize, nvars.max(0) as usize))
    }

    fn varid(&self, name: &str) -> Result<Option<c_int>> {
        let c = c_name(name)?;
        let mut varid: c_int = 0;
        let status = unsafe { ffi::nc_inq_varid(self.ncid, c.as_ptr(), &mut varid) };
        if status == ffi::NC_ENOTVAR {
            return Ok(None);
        }
        check("nc_inq_varid", status)?;
        Ok(Some(varid))
    }

    fn require_varid(&self, name: &str) -> Result<c_int> {
        self.varid(name)?
            .ok_or_else(|| ResultError::not_found("NetCDF variable", name))
    }

    fn dimlen(&self, dimid: c_int) -> Result<usize> {
        let mut len: usize = 0;
        check("nc_inq_dimlen", unsafe { ffi::nc_inq_dimlen(self.ncid, dimid, &mut len) })?;
        Ok(len)
    }

    fn element_count(&self, name: &str) -> Result<usize> {
        Ok(self.shape(name)?.iter().product())
    }
}

impl Drop for RawNcFile {
    fn drop(&mut self) {
        let status = unsafe { ffi::nc_close(self.ncid) };
        if status != ffi::NC_NOERR {
            warn!(status, "nc_close failed");
        }
    }
}

impl NcSource for RawNcFile {
    fn dimension_len(&self, name: &str) -> Result<Option<usize>> {
        let c = c_name(name)?;
        let mut dimid: c_int = 0;
        let status = unsafe { ffi::nc_inq_dimid(self.ncid, c.as_ptr(), &mut dimid) };
        if status == ffi::NC_EBADDIM {
            return Ok(None);
        }
        check("nc_inq_dimid", status)?;
        Ok(Some(self.dimlen(dimid)?))
    }

    fn has_variable(&self, name: &str) -> Result<bool> {
        Ok(self.varid(name)?.is_some())
    }

    fn shape(&self, name: &str) -> Result<Vec<usize>> {
        let varid = self.require_varid(name)?;
        let mut ndims: c_int = 0;
        check("nc_inq_varndims", unsafe {
            ffi::nc_inq_varndims(self.ncid, varid, &mut ndims)
        })?;
        let mut dimids = vec![0 as c_int; ndims.max(0) as usize];
        if !dimids.is_empty() {
            check("nc_inq_vardimid", unsafe {
                ffi::nc_inq_vardimid(self.ncid, varid, dimids.as_mut_ptr())
            })?;
        }
        dimids.into_iter().map(|d| self.dimlen(d)).collect()
    }

    fn read_f64(&self, name: &str) -> Result<Vec<f64>> {
        let varid = self.require_varid(name)?;
        let len = self.element_count(name)?;
        let mut values = FloatBuffer::zeroed(len);
        if len > 0 {
            check("nc_get_var_double", unsafe {
                ffi::nc_get_var_double(self.ncid, varid, values.as_mut_ptr())
            })?;
        }
        Ok(values.into_vec())
    }

    fn read_text(&self, name: &str) -> Result<Vec<u8>> {
        let varid = self.require_varid(name)?;
        let len = self.element_count(name)?;
        let mut bytes = CharBuffer::zeroed(len);
        if len > 0 {
            check("nc_get_var_text", unsafe {
                ffi::nc_get_var_text(self.ncid, varid, bytes.as_mut_ptr())
            })?;
        }
        Ok(bytes.into_vec())
    }

    fn text_attribute(&self, variable: &str, attribute: &str) -> Result<Option<String>> {
        let varid = self.require_varid(variable)?;
        let c_att = c_name(attribute)?;
        let mut len: usize = 0;
        let status = unsafe { ffi::nc_inq_attlen(self.ncid, varid, c_att.as_ptr(), &mut len) };
        if status == ffi::NC_ENOTATT {
            return Ok(None);
        }
        check("nc_inq_attlen", status)?;
        let mut buffer = CharBuffer::zeroed(len);
        if len > 0 {
            check("nc_get_att_text", unsafe {
                ffi::nc_get_att_text(self.ncid, varid, c_att.as_ptr(), buffer.as_mut_ptr())
            })?;
        }
        let bytes = buffer.into_vec();
        let text = bytes.split(|b| *b == 0).next().unwrap_or_default();
        Ok(Some(String::from_utf8_lossy(text).trim().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ok_status_passes() {
        assert!(check("nc_open", ffi::NC_NOERR).is_ok());
    }

    #[test]
    fn error_status_carries_call_name() {
        let err = check("nc_inq_varid", ffi::NC_ENOTVAR).unwrap_err();
        match err {
            ResultError::NetCdfStatus { call, status, .. } => {
                assert_eq!(call, "nc_inq_varid");
                assert_eq!(status, ffi::NC_ENOTVAR);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn missing_file_fails_to_open() {
        assert!(RawNcFile::open(Path::new("/no/such/results.nc")).is_err());
    }
}
