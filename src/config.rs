use crate::error::Result;
use crate::result_type::ResultType;
use crate::time::parse_datetime;
use chrono::NaiveDateTime;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

// Column name mapping for the 1D channel info file / channel layer
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChannelColumns {
    pub id: String,
    pub us_node: String,
    pub ds_node: String,
    pub us_channel: String,
    pub ds_channel: String,
    pub flags: String,
    pub length: String,
    pub form_loss: String,
    pub n: String,
    pub slope: String,
    pub us_invert: String,
    pub ds_invert: String,
    pub lb_us_obvert: String,
    pub rb_us_obvert: String,
    pub lb_ds_obvert: String,
    pub rb_ds_obvert: String,
    pub blockage: String,
}

impl ChannelColumns {
    /// Header names used by the CSV channel info file.
    pub fn csv() -> Self {
        ChannelColumns {
            id: "Channel".to_string(),
            us_node: "US Node".to_string(),
            ds_node: "DS Node".to_string(),
            us_channel: "US Channel".to_string(),
            ds_channel: "DS Channel".to_string(),
            flags: "Flags".to_string(),
            length: "Length".to_string(),
            form_loss: "Form Loss".to_string(),
            n: "n or Cd".to_string(),
            slope: "pSlope".to_string(),
            us_invert: "US Invert".to_string(),
            ds_invert: "DS Invert".to_string(),
            lb_us_obvert: "LBUS Obvert".to_string(),
            rb_us_obvert: "RBUS Obvert".to_string(),
            lb_ds_obvert: "LBDS Obvert".to_string(),
            rb_ds_obvert: "RBDS Obvert".to_string(),
            blockage: "pBlockage".to_string(),
        }
    }

    /// Column names used by the GeoPackage channel line layer.
    pub fn gpkg() -> Self {
        ChannelColumns {
            id: "ID".to_string(),
            us_node: "US_Node".to_string(),
            ds_node: "DS_Node".to_string(),
            us_channel: "US_Channel".to_string(),
            ds_channel: "DS_Channel".to_string(),
            flags: "Flags".to_string(),
            length: "Length".to_string(),
            form_loss: "Form_Loss".to_string(),
            n: "n_or_Cd".to_string(),
            slope: "pSlope".to_string(),
            us_invert: "US_Invert".to_string(),
            ds_invert: "DS_Invert".to_string(),
            lb_us_obvert: "LBUS_Obvert".to_string(),
            rb_us_obvert: "RBUS_Obvert".to_string(),
            lb_ds_obvert: "LBDS_Obvert".to_string(),
            rb_ds_obvert: "RBDS_Obvert".to_string(),
            blockage: "pBlockage".to_string(),
        }
    }
}

impl Default for ChannelColumns {
    fn default() -> Self {
        Self::csv()
    }
}

// Column name mapping for the 1D node info file / node layer
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NodeColumns {
    pub id: String,
    pub bed_level: String,
    pub top_level: String,
    pub n_channels: String,
}

impl NodeColumns {
    pub fn csv() -> Self {
        NodeColumns {
            id: "Node".to_string(),
            bed_level: "Bed Level".to_string(),
            top_level: "Top Level".to_string(),
            n_channels: "No. Channels".to_string(),
        }
    }

    pub fn gpkg() -> Self {
        NodeColumns {
            id: "ID".to_string(),
            bed_level: "Bed_Level".to_string(),
            top_level: "Top_Level".to_string(),
            n_channels: String::new(),
        }
    }
}

impl Default for NodeColumns {
    fn default() -> Self {
        Self::csv()
    }
}

// GeoPackage table names
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GpkgTables {
    pub timeseries_info: String,
    pub dataset_times: String,
    pub channel_layer: String,
    pub node_layer: String,
    pub channel_columns: ChannelColumns,
    pub node_columns: NodeColumns,
}

impl Default for GpkgTables {
    fn default() -> Self {
        GpkgTables {
            timeseries_info: "Timeseries_info".to_string(),
            dataset_times: "DatasetTimes".to_string(),
            channel_layer: "1D_Channels".to_string(),
            node_layer: "1D_Nodes".to_string(),
            channel_columns: ChannelColumns::gpkg(),
            node_columns: NodeColumns::gpkg(),
        }
    }
}

// NetCDF access strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NetCdfAccess {
    #[default]
    Managed,
    Raw,
}

/// Thresholds for solver time values that are markers rather than times.
///
/// Only consulted when `LoaderConfig::interpret_special_times` is set and the
/// result set reports times in hours.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct SpecialTimeRules {
    pub peak_marker: f64,
    pub cutoff_min: f64,
    pub cutoff_max: f64,
}

impl Default for SpecialTimeRules {
    fn default() -> Self {
        SpecialTimeRules {
            peak_marker: 900001.0,
            cutoff_min: 100000.0,
            cutoff_max: 300000.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum TimeKind {
    Regular,
    PeakMarker,
    Cutoff,
}

impl SpecialTimeRules {
    pub fn classify(&self, time: f64) -> TimeKind {
        if (time - self.peak_marker).abs() < 1e-6 {
            TimeKind::PeakMarker
        } else if time >= self.cutoff_min && time <= self.cutoff_max {
            TimeKind::Cutoff
        } else {
            TimeKind::Regular
        }
    }
}

// Loader configuration passed to every backend
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Origin used when the result file carries no reference time.
    #[serde(deserialize_with = "deserialize_datetime")]
    pub default_reference_time: Option<NaiveDateTime>,
    /// Read timeseries from the NetCDF file named by the TPC when present.
    pub prefer_netcdf: bool,
    pub netcdf_access: NetCdfAccess,
    pub interpret_special_times: bool,
    pub special_times: SpecialTimeRules,
    /// Overrides for the CSV header prefix of a result type, keyed by type name.
    pub header_prefixes: HashMap<String, String>,
    /// Flag tokens marking closed conduit channels.
    pub culvert_flags: Vec<String>,
    pub channel_columns: ChannelColumns,
    pub node_columns: NodeColumns,
    pub gpkg: GpkgTables,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        LoaderConfig {
            default_reference_time: None,
            prefer_netcdf: false,
            netcdf_access: NetCdfAccess::default(),
            interpret_special_times: false,
            special_times: SpecialTimeRules::default(),
            header_prefixes: HashMap::new(),
            culvert_flags: vec!["C".to_string(), "R".to_string(), "I".to_string()],
            channel_columns: ChannelColumns::csv(),
            node_columns: NodeColumns::csv(),
            gpkg: GpkgTables::default(),
        }
    }
}

impl LoaderConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// CSV header prefix for a result type, honouring overrides.
    pub fn header_prefix(&self, result_type: ResultType) -> String {
        self.header_prefixes
            .iter()
            .find(|(name, _)| ResultType::parse(name) == Some(result_type))
            .map(|(_, prefix)| prefix.clone())
            .unwrap_or_else(|| result_type.csv_prefix().to_string())
    }

    pub fn is_culvert_flag(&self, flags: &str) -> bool {
        let flags = flags.trim();
        self.culvert_flags.iter().any(|token| {
            flags
                .get(..token.len())
                .is_some_and(|head| head.eq_ignore_ascii_case(token))
        })
    }
}

fn deserialize_datetime<'de, D>(deserializer: D) -> std::result::Result<Option<NaiveDateTime>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let text: Option<String> = Option::deserialize(deserializer)?;
    match text {
        None => Ok(None),
        Some(text) => parse_datetime(&text)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid datetime '{text}'"))),
    }
}
