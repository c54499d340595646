//! Result type and domain vocabulary.
//!
//! Callers name result types the way users type them ("H", "Level",
//! "water level"); backends need the file-specific spelling. Everything is
//! funnelled through [`ResultType`].

use crate::error::{Result, ResultError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Domain {
    #[serde(rename = "1d")]
    OneD,
    #[serde(rename = "2d")]
    TwoD,
    #[serde(rename = "rl")]
    ReportingLocation,
}

impl Domain {
    pub const ALL: [Domain; 3] = [Domain::OneD, Domain::TwoD, Domain::ReportingLocation];

    /// Suffix used by NetCDF variable names and GeoPackage table names.
    pub fn token(self) -> &'static str {
        match self {
            Domain::OneD => "1d",
            Domain::TwoD => "2d",
            Domain::ReportingLocation => "rl",
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Domain::OneD => write!(f, "1D"),
            Domain::TwoD => write!(f, "2D"),
            Domain::ReportingLocation => write!(f, "RL"),
        }
    }
}

impl FromStr for Domain {
    type Err = ResultError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "1d" | "1" => Ok(Domain::OneD),
            "2d" | "2" | "po" => Ok(Domain::TwoD),
            "rl" | "reporting location" | "reporting locations" => {
                Ok(Domain::ReportingLocation)
            }
            other => Err(ResultError::Parse(format!("unknown domain '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResultType {
    WaterLevel,
    EnergyLevel,
    Flow,
    Velocity,
    FlowArea,
    Losses,
}

impl ResultType {
    pub const ALL: [ResultType; 6] = [
        ResultType::WaterLevel,
        ResultType::EnergyLevel,
        ResultType::Flow,
        ResultType::Velocity,
        ResultType::FlowArea,
        ResultType::Losses,
    ];

    /// Parse a human-facing name. Case-insensitive; accepts the short solver
    /// codes, singular and plural spellings.
    pub fn parse(name: &str) -> Option<Self> {
        let normalized: String = name
            .trim()
            .to_ascii_lowercase()
            .chars()
            .map(|c| if c == '_' || c == '-' { ' ' } else { c })
            .collect();
        let normalized = normalized.split_whitespace().collect::<Vec<_>>().join(" ");
        let rt = match normalized.as_str() {
            "h" | "level" | "levels" | "water level" | "water levels" | "wl" | "hmax" => {
                ResultType::WaterLevel
            }
            "e" | "energy" | "energy level" | "energy levels" | "emax" => ResultType::EnergyLevel,
            "q" | "flow" | "flows" | "discharge" | "qmax" => ResultType::Flow,
            "v" | "velocity" | "velocities" | "vmax" => ResultType::Velocity,
            "a" | "area" | "flow area" | "flow areas" | "avmax" => ResultType::FlowArea,
            "lc" | "loss" | "losses" | "channel losses" => ResultType::Losses,
            _ => return None,
        };
        Some(rt)
    }

    pub fn name(self) -> &'static str {
        match self {
            ResultType::WaterLevel => "Water Level",
            ResultType::EnergyLevel => "Energy Level",
            ResultType::Flow => "Flow",
            ResultType::Velocity => "Velocity",
            ResultType::FlowArea => "Flow Area",
            ResultType::Losses => "Losses",
        }
    }

    /// Default label prefix in CSV timeseries headers.
    pub fn csv_prefix(self) -> &'static str {
        match self {
            ResultType::WaterLevel => "H",
            ResultType::EnergyLevel => "E",
            ResultType::Flow => "Q",
            ResultType::Velocity => "V",
            ResultType::FlowArea => "A",
            ResultType::Losses => "LC",
        }
    }

    /// Whether the 1D values belong to nodes rather than channels.
    pub fn is_node_type(self) -> bool {
        matches!(self, ResultType::WaterLevel | ResultType::EnergyLevel)
    }
}

impl fmt::Display for ResultType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ResultType {
    type Err = ResultError;

    fn from_str(s: &str) -> Result<Self> {
        ResultType::parse(s).ok_or_else(|| ResultError::UnknownResultType(s.to_string()))
    }
}
