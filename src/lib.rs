pub mod backend;
pub mod config;
pub mod error;
pub mod io;
pub mod long_profile;
pub mod maxima;
pub mod network;
pub mod result_type;
pub mod results;
pub mod time;
pub mod timeseries;
pub mod tpc;

pub use backend::{Format, LoadIssue, ResultBackend, detect_format, open_backend};
pub use config::{LoaderConfig, NetCdfAccess, SpecialTimeRules, TimeKind};
pub use error::{ConnectivityError, Result, ResultError};
pub use long_profile::LongProfile;
pub use maxima::{MaxEntry, MaximaTable};
pub use network::{Channel, Network, Node};
pub use result_type::{Domain, ResultType};
pub use results::{Outcome, PointValue, ResultSet, Series, TimeQuery};
pub use time::{ReferenceTime, TimeUnit};
pub use timeseries::Timeseries;
