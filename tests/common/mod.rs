#![allow(dead_code)]

use rusqlite::Connection;
use std::fs;
use std::path::{Path, PathBuf};

pub const TPC: &str = "\
Format Version == 2
Units == METRIC
Simulation ID == sim
Reference Time == 2000-01-01 00:00
Number 1D Channels == 2
Number 1D Nodes == 3
1D Channel Info == csv\\sim_1d_Chan.csv
1D Node Info == csv\\sim_1d_Nodes.csv
1D Water Levels == csv\\sim_1d_H.csv
1D Flows == csv\\sim_1d_Q.csv
1D Node Maximums == csv\\sim_1d_Nmx.csv
";

const CHANNELS: &str = "\
Channel,US Node,DS Node,US Channel,DS Channel,Flags,Length,Form Loss,n or Cd,pSlope,US Invert,DS Invert,LBUS Obvert,RBUS Obvert,LBDS Obvert,RBDS Obvert,pBlockage
C1,N1,N2,------,C2,S,100,0,0.03,0.01,9,8,0,0,0,0,0
C2,N2,N3,C1,------,C,50,0,0.013,0.02,8,7,9,9,8,8,0
";

const NODES: &str = "\
Node #,Node,Bed Level,Top Level,No. Channels,Channel 1,Channel 2
1,N1,9,12,1,C1
2,N2,8,11,2,C1,C2
3,N3,7,10,1,C2
";

const WATER: &str = "\
Timestep,Time (h),H N1 [sim],H N2 [sim],H N3 [sim]
1,0.0,10.0,9.0,8.0
2,0.5,10.5,9.4,8.2
3,1.0,10.2,9.6,-99999
";

const FLOW: &str = "\
Timestep,Time (h),Q C1 [sim],Q C2 [sim]
1,0.0,1.0,0.5
2,0.5,3.0,2.5
3,1.0,2.0,2.8
";

const NODE_MAXIMA: &str = "\
Node #,Node,Hmax,Time Hmax,Emax,Time Emax
1,N1,10.5,0.5,10.6,0.5
2,N2,9.6,1.0,9.7,1.0
3,N3,8.2,0.5,8.3,0.5
";

/// Write the CSV result tree and return the TPC path.
pub fn write_tpc_tree(dir: &Path, tpc: &str) -> PathBuf {
    let csv_dir = dir.join("csv");
    fs::create_dir_all(&csv_dir).unwrap();
    fs::write(csv_dir.join("sim_1d_Chan.csv"), CHANNELS).unwrap();
    fs::write(csv_dir.join("sim_1d_Nodes.csv"), NODES).unwrap();
    fs::write(csv_dir.join("sim_1d_H.csv"), WATER).unwrap();
    fs::write(csv_dir.join("sim_1d_Q.csv"), FLOW).unwrap();
    fs::write(csv_dir.join("sim_1d_Nmx.csv"), NODE_MAXIMA).unwrap();
    let path = dir.join("sim.tpc");
    fs::write(&path, tpc).unwrap();
    path
}

/// Write an extra file under the `csv` folder of a result tree.
pub fn write_csv(dir: &Path, name: &str, text: &str) {
    let csv_dir = dir.join("csv");
    fs::create_dir_all(&csv_dir).unwrap();
    fs::write(csv_dir.join(name), text).unwrap();
}

pub const LOSSES: &str = "\
Timestep,Time (h),LC C1 [sim],LC C1 [sim],LC C2 [sim],LC C2 [sim]
1,0.0,0.1,0.2,0.3,0.4
2,0.5,0.5,0.6,0.7,0.8
3,1.0,0.9,1.0,1.1,1.2
";

pub const PO_WATER: &str = "\
Timestep,Time (h),H PO1 [sim],H PO2 [sim]
1,0.0,20.0,21.0
2,0.5,20.4,21.3
3,1.0,20.2,21.1
";

pub const RL_FLOW: &str = "\
Timestep,Time (h),Q RL1 [sim],Q RL2 [sim]
1,0.0,4.0,1.0
2,0.5,6.0,1.5
3,1.0,5.0,2.5
";

/// Same simulation exported as a GeoPackage.
pub fn write_gpkg(path: &Path) {
    let conn = Connection::open(path).unwrap();
    conn.execute_batch(
        r#"
        CREATE TABLE Timeseries_info (Table_name TEXT, Column_name TEXT, Reference_time TEXT, dt REAL, Count INTEGER);
        CREATE TABLE DatasetTimes (Time_relative REAL);
        CREATE TABLE "sim_1d_P" (fid INTEGER PRIMARY KEY, ID TEXT, Datetime TEXT, "Water Level" REAL);
        CREATE TABLE "sim_1d_L" (fid INTEGER PRIMARY KEY, ID TEXT, Datetime TEXT, Flow REAL);
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
        INSERT INTO "sim_1d_L" (ID, Datetime, Flow) VALUES
            ('C1', '2000-01-01 00:00:00', 1.0), ('C2', '2000-01-01 00:00:00', 0.5),
            ('C1', '2000-01-01 00:30:00', 3.0), ('C2', '2000-01-01 00:30:00', 2.5),
            ('C1', '2000-01-01 01:00:00', 2.0), ('C2', '2000-01-01 01:00:00', 2.8);
        "#,
    )
    .unwrap();
}

/// Equal within tolerance, with NaN matching NaN.
pub fn same_values(a: &[f64], b: &[f64]) -> bool {
    a.len() == b.len()
        && a.iter().zip(b).all(|(x, y)| {
            (x.is_nan() && y.is_nan()) || (x - y).abs() < 1e-9
        })
}
