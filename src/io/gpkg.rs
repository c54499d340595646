//! GeoPackage / SQLite result sets.
//!
//! Temporal tables are listed in `Timeseries_info` and share the time axis in
//! `DatasetTimes`. The 1D network is derived on demand from the channel line
//! layer and node point layer; each derived property is computed once.

use crate::backend::{Format, LoadIssue, ResultBackend};
use crate::config::{GpkgTables, LoaderConfig};
use crate::error::{Result, ResultError};
use crate::network::{Channel, Network, Node};
use crate::result_type::{Domain, ResultType};
use crate::time::{ReferenceTime, TimeUnit, parse_datetime};
use crate::timeseries::{NULL_VALUE, Timeseries};
use once_cell::unsync::OnceCell;
use rusqlite::types::Value;
use rusqlite::{Connection, OpenFlags};
use std::cell::{Cell, Ref, RefCell};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use tracing::{debug, info, warn};

// Tolerance (hours) when matching a row's Datetime to the shared time axis
const TIME_MATCH_TOLERANCE: f64 = 1e-4;

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Shared SQLite handle opened on first use and closed when the last
/// session ends. Nested sessions reuse the physical connection.
pub struct GpkgDb {
    path: PathBuf,
    conn: RefCell<Option<Connection>>,
    depth: Cell<usize>,
    opens: Cell<usize>,
}

pub struct DbSession<'a> {
    db: &'a GpkgDb,
}

impl GpkgDb {
    pub fn new(path: &Path) -> Self {
        GpkgDb {
            path: path.to_path_buf(),
            conn: RefCell::new(None),
            depth: Cell::new(0),
            opens: Cell::new(0),
        }
    }

    pub fn session(&self) -> Result<DbSession<'_>> {
        if self.depth.get() == 0 {
            let conn = Connection::open_with_flags(&self.path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
            debug!(path = %self.path.display(), "opened database connection");
            *self.conn.borrow_mut() = Some(conn);
            self.opens.set(self.opens.get() + 1);
        }
        self.depth.set(self.depth.get() + 1);
        Ok(DbSession { db: self })
    }

    pub fn is_open(&self) -> bool {
        self.conn.borrow().is_some()
    }

    pub fn depth(&self) -> usize {
        self.depth.get()
    }

    /// Physical connections opened so far.
    pub fn open_count(&self) -> usize {
        self.opens.get()
    }
}

impl DbSession<'_> {
    pub fn conn(&self) -> Result<Ref<'_, Connection>> {
        Ref::filter_map(self.db.conn.borrow(), |c| c.as_ref())
            .map_err(|_| ResultError::Structural("database connection is closed".to_string()))
    }
}

impl Drop for DbSession<'_> {
    fn drop(&mut self) {
        let depth = self.db.depth.get().saturating_sub(1);
        self.db.depth.set(depth);
        if depth == 0 {
            self.db.conn.borrow_mut().take();
            debug!(path = %self.db.path.display(), "closed database connection");
        }
    }
}

/// Column names of a table in declaration order.
pub fn table_columns(conn: &Connection, table: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", quote_ident(table)))?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(1))?;
    let mut columns = Vec::new();
    for row in rows {
        columns.push(row?);
    }
    Ok(columns)
}

/// Every column after the `Datetime` marker.
pub fn result_columns(conn: &Connection, table: &str) -> Result<Vec<String>> {
    let columns = table_columns(conn, table)?;
    Ok(columns
        .iter()
        .position(|c| c.eq_ignore_ascii_case("Datetime"))
        .map(|i| columns[i + 1..].to_vec())
        .unwrap_or_default())
}

fn domain_of_table(table: &str) -> Option<Domain> {
    let lower = table.to_ascii_lowercase();
    lower
        .split(|c: char| !c.is_ascii_alphanumeric())
        .find_map(|tok| Domain::ALL.into_iter().find(|d| d.token() == tok))
}

// One temporal table and the result types it carries
#[derive(Debug, Clone)]
struct TemporalTable {
    name: String,
    domain: Domain,
    columns: Vec<(String, ResultType)>,
    count: Option<usize>,
}

#[derive(Debug, Clone)]
struct ChannelEndpoints {
    id: String,
    us_node: String,
    ds_node: String,
}

pub struct GpkgBackend {
    db: GpkgDb,
    tables: GpkgTables,
    simulation_id: String,
    reference_time: Option<ReferenceTime>,
    catalog: Vec<TemporalTable>,
    times: Vec<f64>,
    series: RefCell<HashMap<(Domain, ResultType), Rc<Timeseries>>>,
    node_ids: OnceCell<Vec<(i64, String)>>,
    endpoints: OnceCell<Vec<ChannelEndpoints>>,
    network: OnceCell<Network>,
    issues: RefCell<Vec<LoadIssue>>,
}

impl GpkgBackend {
    pub fn open(path: &Path, config: &LoaderConfig) -> Result<Self> {
        if !path.exists() {
            return Err(ResultError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        let mut backend = GpkgBackend {
            db: GpkgDb::new(path),
            tables: config.gpkg.clone(),
            simulation_id: path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default(),
            reference_time: None,
            catalog: Vec::new(),
            times: Vec::new(),
            series: RefCell::new(HashMap::new()),
            node_ids: OnceCell::new(),
            endpoints: OnceCell::new(),
            network: OnceCell::new(),
            issues: RefCell::new(Vec::new()),
        };

        let (catalog, embedded, times) = {
            let session = backend.db.session()?;
            let conn = session.conn()?;
            let (catalog, embedded) = read_catalog(&conn, &backend.tables)?;
            let times = read_dataset_times(&conn, &backend.tables)?;
            (catalog, embedded, times)
        };
        backend.catalog = catalog;
        backend.reference_time = ReferenceTime::reconcile(embedded, config.default_reference_time);
        backend.times = times;

        info!(
            file = %path.display(),
            tables = backend.catalog.len(),
            timesteps = backend.times.len(),
            "opened GeoPackage result set"
        );
        Ok(backend)
    }

    fn table_for(&self, domain: Domain, result_type: ResultType) -> Option<(&TemporalTable, &str)> {
        self.catalog
            .iter()
            .filter(|t| t.domain == domain)
            .find_map(|t| {
                t.columns
                    .iter()
                    .find(|(_, rt)| *rt == result_type)
                    .map(|(col, _)| (t, col.as_str()))
            })
    }

    fn read_series(&self, table: &TemporalTable, column: &str) -> Result<Timeseries> {
        let session = self.db.session()?;
        let conn = session.conn()?;
        let sql = format!(
            "SELECT ID, Datetime, {} FROM {} ORDER BY rowid",
            quote_ident(column),
            quote_ident(&table.name)
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Value>(1)?,
                row.get::<_, Value>(2)?,
            ))
        })?;

        let mut ids: Vec<String> = Vec::new();
        let mut id_index: HashMap<String, usize> = HashMap::new();
        let mut cells: Vec<(usize, usize, f64)> = Vec::new();
        let mut unmatched = 0usize;
        for row in rows {
            let (id, datetime, value) = row?;
            let Some(t) = self.relative_hours(&datetime, &table.name)? else {
                unmatched += 1;
                continue;
            };
            let Some(step) = self
                .times
                .iter()
                .position(|axis| (axis - t).abs() <= TIME_MATCH_TOLERANCE)
            else {
                unmatched += 1;
                continue;
            };
            let col = *id_index.entry(id.clone()).or_insert_with(|| {
                ids.push(id);
                ids.len() - 1
            });
            let value = match value {
                Value::Real(v) => v,
                Value::Integer(v) => v as f64,
                _ => NULL_VALUE,
            };
            cells.push((step, col, value));
        }
        if unmatched > 0 {
            warn!(table = %table.name, unmatched, "rows outside the dataset time axis were skipped");
        }

        let mut grid = vec![vec![NULL_VALUE; ids.len()]; self.times.len()];
        for (step, col, value) in cells {
            grid[step][col] = value;
        }
        Timeseries::from_columns(
            format!("{}.{}", table.name, column),
            &ids,
            self.times.clone(),
            TimeUnit::Hours,
            grid,
        )
    }

    fn relative_hours(&self, datetime: &Value, table: &str) -> Result<Option<f64>> {
        match datetime {
            Value::Real(v) => Ok(Some(*v)),
            Value::Integer(v) => Ok(Some(*v as f64)),
            Value::Text(text) => {
                let Some(dt) = parse_datetime(text) else {
                    return Ok(None);
                };
                let reference = self.reference_time.ok_or_else(|| {
                    ResultError::schema(table, "text Datetime values need a reference time")
                })?;
                Ok(Some(reference.to_hours(&dt)))
            }
            _ => Ok(None),
        }
    }

    /// Node point layer (fid, ID), computed once.
    fn node_ids(&self) -> Result<&[(i64, String)]> {
        self.node_ids
            .get_or_try_init(|| {
                let session = self.db.session()?;
                let conn = session.conn()?;
                let sql = format!(
                    "SELECT fid, {} FROM {} ORDER BY fid",
                    quote_ident(&self.tables.node_columns.id),
                    quote_ident(&self.tables.node_layer)
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))?;
                let mut ids = Vec::new();
                for row in rows {
                    ids.push(row?);
                }
                Ok(ids)
            })
            .map(|v| v.as_slice())
    }

    /// Channel endpoints from the line layer joined to the point layer.
    fn channel_endpoints(&self) -> Result<&[ChannelEndpoints]> {
        self.endpoints
            .get_or_try_init(|| {
                let session = self.db.session()?;
                let conn = session.conn()?;
                let cols = &self.tables.channel_columns;
                let node_id = quote_ident(&self.tables.node_columns.id);
                let nodes = quote_ident(&self.tables.node_layer);
                let sql = format!(
                    "SELECT c.{id}, nu.{nid}, nd.{nid} FROM {chan} c \
                     JOIN {nodes} nu ON c.{us} = nu.fid \
                     JOIN {nodes} nd ON c.{ds} = nd.fid \
                     ORDER BY c.fid",
                    id = quote_ident(&cols.id),
                    nid = node_id,
                    chan = quote_ident(&self.tables.channel_layer),
                    nodes = nodes,
                    us = quote_ident(&cols.us_node),
                    ds = quote_ident(&cols.ds_node),
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map([], |row| {
                    Ok(ChannelEndpoints {
                        id: row.get(0)?,
                        us_node: row.get(1)?,
                        ds_node: row.get(2)?,
                    })
                })?;
                let mut endpoints = Vec::new();
                for row in rows {
                    endpoints.push(row?);
                }
                Ok(endpoints)
            })
            .map(|v| v.as_slice())
    }

    fn declared_channel_count(&self) -> Option<usize> {
        self.catalog
            .iter()
            .find(|t| {
                t.domain == Domain::OneD && t.columns.iter().any(|(_, rt)| *rt == ResultType::Flow)
            })
            .and_then(|t| t.count)
    }

    fn build_network(&self) -> Result<Network> {
        // One connection serves the id, endpoint and attribute reads
        let session = self.db.session()?;
        let node_ids = self.node_ids()?;
        let endpoints = self.channel_endpoints()?;
        let conn = session.conn()?;
        let channel_attrs = read_attributes(
            &conn,
            &self.tables.channel_layer,
            &self.tables.channel_columns.id,
        )?;
        let node_attrs = read_attributes(&conn, &self.tables.node_layer, &self.tables.node_columns.id)?;

        let cols = &self.tables.channel_columns;
        let mut channels: Vec<Channel> = endpoints
            .iter()
            .map(|e| {
                let mut channel = Channel::new(&e.id, &e.us_node, &e.ds_node);
                if let Some(attrs) = channel_attrs.get(&e.id) {
                    let num = |name: &str| attrs.number(name);
                    channel.flags = attrs.text(&cols.flags);
                    channel.length = num(&cols.length);
                    channel.form_loss = num(&cols.form_loss);
                    channel.n = num(&cols.n);
                    channel.slope = num(&cols.slope);
                    channel.us_invert = num(&cols.us_invert);
                    channel.ds_invert = num(&cols.ds_invert);
                    channel.lb_us_obvert = num(&cols.lb_us_obvert);
                    channel.rb_us_obvert = num(&cols.rb_us_obvert);
                    channel.lb_ds_obvert = num(&cols.lb_ds_obvert);
                    channel.rb_ds_obvert = num(&cols.rb_ds_obvert);
                    channel.blockage = num(&cols.blockage);
                }
                channel
            })
            .collect();

        let mut by_us_node: HashMap<String, Vec<usize>> = HashMap::new();
        let mut by_ds_node: HashMap<String, Vec<usize>> = HashMap::new();
        for (i, c) in channels.iter().enumerate() {
            by_us_node.entry(c.us_node.clone()).or_default().push(i);
            by_ds_node.entry(c.ds_node.clone()).or_default().push(i);
        }
        for channel in channels.iter_mut() {
            let first = |index: &HashMap<String, Vec<usize>>, node: &str| {
                index.get(node).and_then(|v| v.first()).map(|&i| endpoints[i].id.clone())
            };
            channel.ds_channel = first(&by_us_node, &channel.ds_node);
            channel.us_channel = first(&by_ds_node, &channel.us_node);
        }

        let node_cols = &self.tables.node_columns;
        let nodes: Vec<Node> = node_ids
            .iter()
            .map(|(_, id)| {
                let attrs = node_attrs.get(id);
                Node {
                    id: id.clone(),
                    bed_level: attrs.map_or(f64::NAN, |a| a.number(&node_cols.bed_level)),
                    top_level: attrs.map_or(f64::NAN, |a| a.number(&node_cols.top_level)),
                    channels: node_channels(&by_us_node, &by_ds_node, id)
                        .into_iter()
                        .map(|i| channels[i].id.clone())
                        .collect(),
                }
            })
            .collect();

        let network = Network::new(channels, nodes);
        network.validate_counts(self.declared_channel_count(), None)?;
        info!(
            channels = network.channels().len(),
            nodes = network.nodes().len(),
            "derived 1D network from GeoPackage layers"
        );
        Ok(network)
    }
}

// Channels touching a node, in layer order
fn node_channels(
    by_us_node: &HashMap<String, Vec<usize>>,
    by_ds_node: &HashMap<String, Vec<usize>>,
    node: &str,
) -> Vec<usize> {
    let mut touching: Vec<usize> = by_us_node
        .get(node)
        .into_iter()
        .chain(by_ds_node.get(node))
        .flatten()
        .copied()
        .collect();
    touching.sort_unstable();
    touching.dedup();
    touching
}

// Attribute row keyed by column name
struct Attributes(HashMap<String, Value>);

impl Attributes {
    fn number(&self, column: &str) -> f64 {
        match self.0.get(column) {
            Some(Value::Real(v)) => *v,
            Some(Value::Integer(v)) => *v as f64,
            Some(Value::Text(t)) => t.trim().parse().unwrap_or(f64::NAN),
            _ => f64::NAN,
        }
    }

    fn text(&self, column: &str) -> String {
        match self.0.get(column) {
            Some(Value::Text(t)) => t.trim().to_string(),
            Some(Value::Integer(v)) => v.to_string(),
            _ => String::new(),
        }
    }
}

fn read_attributes(conn: &Connection, table: &str, id_column: &str) -> Result<HashMap<String, Attributes>> {
    let columns = table_columns(conn, table)?;
    let Some(id_pos) = columns.iter().position(|c| c == id_column) else {
        return Err(ResultError::schema(table, format!("missing column {id_column}")));
    };
    let mut stmt = conn.prepare(&format!("SELECT * FROM {}", quote_ident(table)))?;
    let mut rows = stmt.query([])?;
    let mut out = HashMap::new();
    while let Some(row) = rows.next()? {
        let mut values = HashMap::new();
        for (i, name) in columns.iter().enumerate() {
            values.insert(name.clone(), row.get::<_, Value>(i)?);
        }
        let id = match row.get::<_, Value>(id_pos)? {
            Value::Text(t) => t,
            Value::Integer(v) => v.to_string(),
            _ => continue,
        };
        out.entry(id).or_insert(Attributes(values));
    }
    Ok(out)
}

fn read_catalog(conn: &Connection, tables: &GpkgTables) -> Result<(Vec<TemporalTable>, Option<ReferenceTime>)> {
    let sql = format!(
        "SELECT Table_name, Reference_time, Count FROM {} ORDER BY rowid",
        quote_ident(&tables.timeseries_info)
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, Option<String>>(1)?,
            row.get::<_, Option<i64>>(2)?,
        ))
    })?;

    let mut catalog: Vec<TemporalTable> = Vec::new();
    let mut reference = None;
    for row in rows {
        let (name, reference_text, count) = row?;
        if reference.is_none() {
            reference = reference_text
                .as_deref()
                .and_then(parse_datetime)
                .map(|origin| ReferenceTime::new(origin, TimeUnit::Hours));
        }
        if catalog.iter().any(|t| t.name == name) {
            continue;
        }
        let Some(domain) = domain_of_table(&name) else {
            debug!(table = %name, "no domain token in table name");
            continue;
        };
        let columns = result_columns(conn, &name)?
            .into_iter()
            .filter_map(|c| ResultType::parse(&c).map(|rt| (c, rt)))
            .collect::<Vec<_>>();
        debug!(table = %name, %domain, columns = columns.len(), "catalogued temporal table");
        catalog.push(TemporalTable {
            name,
            domain,
            columns,
            count: count.and_then(|c| usize::try_from(c).ok()),
        });
    }
    Ok((catalog, reference))
}

fn read_dataset_times(conn: &Connection, tables: &GpkgTables) -> Result<Vec<f64>> {
    let sql = format!(
        "SELECT Time_relative FROM {} ORDER BY rowid",
        quote_ident(&tables.dataset_times)
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map([], |row| row.get::<_, f64>(0))?;
    let mut times = Vec::new();
    for row in rows {
        times.push(row?);
    }
    Ok(times)
}

impl ResultBackend for GpkgBackend {
    fn format(&self) -> Format {
        Format::GeoPackage
    }

    fn simulation_id(&self) -> &str {
        &self.simulation_id
    }

    fn reference_time(&self) -> Option<ReferenceTime> {
        self.reference_time
    }

    fn result_types(&self, domain: Domain) -> Vec<ResultType> {
        let mut types: Vec<ResultType> = self
            .catalog
            .iter()
            .filter(|t| t.domain == domain)
            .flat_map(|t| t.columns.iter().map(|(_, rt)| *rt))
            .collect();
        types.sort();
        types.dedup();
        types
    }

    fn timeseries(&self, domain: Domain, result_type: ResultType) -> Result<Rc<Timeseries>> {
        if let Some(ts) = self.series.borrow().get(&(domain, result_type)) {
            return Ok(Rc::clone(ts));
        }
        let (table, column) = self
            .table_for(domain, result_type)
            .ok_or_else(|| ResultError::not_found("result type", format!("{domain} {result_type}")))?;
        match self.read_series(table, column) {
            Ok(ts) => {
                let ts = Rc::new(ts);
                self.series
                    .borrow_mut()
                    .insert((domain, result_type), Rc::clone(&ts));
                Ok(ts)
            }
            Err(e) => {
                self.issues.borrow_mut().push(LoadIssue {
                    dataset: table.name.clone(),
                    domain: Some(domain),
                    result_type: Some(result_type),
                    message: e.to_string(),
                });
                Err(e)
            }
        }
    }

    fn network(&self) -> Result<&Network> {
        self.network.get_or_try_init(|| self.build_network())
    }

    fn load_issues(&self) -> Vec<LoadIssue> {
        self.issues.borrow().clone()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Small two-channel GeoPackage-shaped database.
    pub(crate) fn write_fixture(path: &Path) {
        let conn = Connection::open(path).unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE Timeseries_info (Table_name TEXT, Column_name TEXT, Reference_time TEXT, dt REAL, Count INTEGER);
            CREATE TABLE DatasetTimes (Time_relative REAL);
            CREATE TABLE "sim_1d_P" (fid INTEGER PRIMARY KEY, ID TEXT, Datetime TEXT, "Water Level" REAL);
            CREATE TABLE "sim_1d_L" (fid INTEGER PRIMARY KEY, ID TEXT, Datetime TEXT, Flow REAL, Velocity REAL);
            CREATE TABLE "1D_Nodes" (fid INTEGER PRIMARY KEY, ID TEXT, Bed_Level REAL, Top_Level REAL);
            CREATE TABLE "1D_Channels" (fid INTEGER PRIMARY KEY, ID TEXT, US_Node INTEGER, DS_Node INTEGER,
                Flags TEXT, Length REAL, Form_Loss REAL, n_or_Cd REAL, pSlope REAL, US_Invert REAL, DS_Invert REAL,
                LBUS_Obvert REAL, RBUS_Obvert REAL, LBDS_Obvert REAL, RBDS_Obvert REAL, pBlockage REAL);

            INSERT INTO Timeseries_info VALUES ('sim_1d_P', 'geom', '2000-01-01 00:00:00', 0.5, 3);
            INSERT INTO Timeseries_info VALUES ('sim_1d_L', 'geom', '2000-01-01 00:00:00', 0.5, 2);
            INSERT INTO DatasetTimes VALUES (0.0), (0.5), (1.0);

            INSERT INTO "1D_Nodes" VALUES (1, 'N1', 9.0, 12.0), (2, 'N2', 8.0, 11.0), (3, 'N3', 7.0, 10.0);
            INSERT INTO "1D_Channels" VALUES
                (1, 'C1', 1, 2, 'S', 100.0, 0.0, 0.03, 0.01, 9.0, 8.0, 0, 0, 0, 0, 0),
                (2, 'C2', 2, 3, 'C', 50.0, 0.0, 0.013, 0.02, 8.0, 7.0, 9.0, 9.0, 8.0, 8.0, 0);

            INSERT INTO "sim_1d_P" (ID, Datetime, "Water Level") VALUES
                ('N1', '2000-01-01 00:00:00', 10.0), ('N2', '2000-01-01 00:00:00', 9.0), ('N3', '2000-01-01 00:00:00', 8.0),
                ('N1', '2000-01-01 00:30:00', 10.5), ('N2', '2000-01-01 00:30:00', 9.4), ('N3', '2000-01-01 00:30:00', 8.2),
                ('N1', '2000-01-01 01:00:00', 10.2), ('N2', '2000-01-01 01:00:00', 9.6), ('N3', '2000-01-01 01:00:00', NULL);
            INSERT INTO "sim_1d_L" (ID, Datetime, Flow, Velocity) VALUES
                ('C1', '2000-01-01 00:00:00', 1.0, 0.1), ('C2', '2000-01-01 00:00:00', 0.5, 0.2),
                ('C1', '2000-01-01 00:30:00', 3.0, 0.3), ('C2', '2000-01-01 00:30:00', 2.5, 0.4),
                ('C1', '2000-01-01 01:00:00', 2.0, 0.2), ('C2', '2000-01-01 01:00:00', 2.8, 0.5);
            "#,
        )
        .unwrap();
    }

    fn fixture() -> (tempfile::TempDir, GpkgBackend) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sim.gpkg");
        write_fixture(&path);
        let backend = GpkgBackend::open(&path, &LoaderConfig::default()).unwrap();
        (dir, backend)
    }

    #[test]
    fn domain_token_from_table_name() {
        assert_eq!(domain_of_table("M01_1d_L"), Some(Domain::OneD));
        assert_eq!(domain_of_table("M01_2D_P"), Some(Domain::TwoD));
        assert_eq!(domain_of_table("run_rl_points"), Some(Domain::ReportingLocation));
        assert_eq!(domain_of_table("Timeseries_info"), None);
    }

    #[test]
    fn nested_sessions_share_one_connection() {
        let (dir, _) = fixture();
        let db = GpkgDb::new(&dir.path().join("sim.gpkg"));
        {
            let outer = db.session().unwrap();
            {
                let _inner = db.session().unwrap();
                assert_eq!(db.depth(), 2);
                assert!(outer.conn().is_ok());
            }
            assert!(db.is_open());
            assert_eq!(db.depth(), 1);
        }
        assert!(!db.is_open());
        assert_eq!(db.depth(), 0);
    }

    #[test]
    fn lists_result_types_after_datetime() {
        let (_dir, backend) = fixture();
        assert_eq!(
            backend.result_types(Domain::OneD),
            vec![ResultType::WaterLevel, ResultType::Flow, ResultType::Velocity]
        );
        assert!(backend.result_types(Domain::TwoD).is_empty());
        assert!(backend.reference_time().is_some());
    }

    #[test]
    fn reads_timeseries_on_the_shared_axis() {
        let (_dir, backend) = fixture();
        let ts = backend.timeseries(Domain::OneD, ResultType::WaterLevel).unwrap();
        assert_eq!(ts.times(), &[0.0, 0.5, 1.0]);
        assert_eq!(ts.ids(), &["N1".to_string(), "N2".to_string(), "N3".to_string()]);
        assert_eq!(ts.value("N2", 1), Some(9.4));
        assert!(ts.is_masked(2, 2));
        // Second call is served from the cache
        let again = backend.timeseries(Domain::OneD, ResultType::WaterLevel).unwrap();
        assert!(Rc::ptr_eq(&ts, &again));
        assert!(!backend.db.is_open());
    }

    #[test]
    fn derives_network_and_neighbours() {
        let (_dir, backend) = fixture();
        let network = backend.network().unwrap();
        let c1 = network.channel("C1").unwrap();
        assert_eq!((c1.us_node.as_str(), c1.ds_node.as_str()), ("N1", "N2"));
        assert_eq!(c1.ds_channel.as_deref(), Some("C2"));
        assert_eq!(c1.us_channel, None);
        let c2 = network.channel("C2").unwrap();
        assert_eq!(c2.us_channel.as_deref(), Some("C1"));
        assert_eq!(c2.flags, "C");
        assert_eq!(c2.us_obvert(), 9.0);
        assert_eq!(network.node("N2").unwrap().n_channels(), 2);
        assert_eq!(network.node("N1").unwrap().bed_level, 9.0);
    }

    #[test]
    fn network_derivation_opens_one_connection() {
        let (_dir, backend) = fixture();
        let before = backend.db.open_count();
        backend.network().unwrap();
        assert_eq!(backend.db.open_count(), before + 1);
        assert!(!backend.db.is_open());
    }

    #[test]
    fn node_channels_follow_layer_order() {
        let mut by_us = HashMap::new();
        let mut by_ds = HashMap::new();
        by_us.insert("J".to_string(), vec![3, 5]);
        by_ds.insert("J".to_string(), vec![1, 3]);
        assert_eq!(node_channels(&by_us, &by_ds, "J"), vec![1, 3, 5]);
        assert!(node_channels(&by_us, &by_ds, "K").is_empty());
    }

    #[test]
    fn flow_count_mismatch_is_structural() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.gpkg");
        write_fixture(&path);
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute("UPDATE Timeseries_info SET Count = 5 WHERE Table_name = 'sim_1d_L'", [])
                .unwrap();
        }
        let backend = GpkgBackend::open(&path, &LoaderConfig::default()).unwrap();
        assert!(matches!(backend.network(), Err(ResultError::Structural(_))));
    }

    #[test]
    fn unknown_type_is_not_found() {
        let (_dir, backend) = fixture();
        assert!(matches!(
            backend.timeseries(Domain::OneD, ResultType::Losses),
            Err(ResultError::NotFound { .. })
        ));
    }
}
