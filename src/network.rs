use crate::config::{ChannelColumns, NodeColumns};
use crate::error::{Result, ResultError};
use csv::{ReaderBuilder, StringRecord};
use serde::Serialize;
use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tracing::{info, warn};

// Tokens written for "no neighbouring channel"
const TERMINAL_TOKENS: &[&str] = &["", "------", "none", "-"];

pub fn parse_neighbour(value: &str) -> Option<String> {
    let value = value.trim();
    if TERMINAL_TOKENS
        .iter()
        .any(|t| value.eq_ignore_ascii_case(t))
    {
        None
    } else {
        Some(value.to_string())
    }
}

// 1D channel (network edge)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Channel {
    pub id: String,
    pub us_node: String,
    pub ds_node: String,
    pub us_channel: Option<String>,
    pub ds_channel: Option<String>,
    pub flags: String,
    pub length: f64,
    pub form_loss: f64,
    pub n: f64,
    pub slope: f64,
    pub us_invert: f64,
    pub ds_invert: f64,
    pub lb_us_obvert: f64,
    pub rb_us_obvert: f64,
    pub lb_ds_obvert: f64,
    pub rb_ds_obvert: f64,
    pub blockage: f64,
}

impl Channel {
    /// Bare channel with the given endpoints; geometry defaults to zero.
    pub fn new(id: &str, us_node: &str, ds_node: &str) -> Self {
        Channel {
            id: id.to_string(),
            us_node: us_node.to_string(),
            ds_node: ds_node.to_string(),
            us_channel: None,
            ds_channel: None,
            flags: String::new(),
            length: 0.0,
            form_loss: 0.0,
            n: 0.0,
            slope: 0.0,
            us_invert: 0.0,
            ds_invert: 0.0,
            lb_us_obvert: 0.0,
            rb_us_obvert: 0.0,
            lb_ds_obvert: 0.0,
            rb_ds_obvert: 0.0,
            blockage: 0.0,
        }
    }

    /// True when neither end connects to another channel.
    pub fn is_isolated(&self) -> bool {
        self.us_channel.is_none() && self.ds_channel.is_none()
    }

    pub fn us_obvert(&self) -> f64 {
        self.lb_us_obvert.max(self.rb_us_obvert)
    }

    pub fn ds_obvert(&self) -> f64 {
        self.lb_ds_obvert.max(self.rb_ds_obvert)
    }
}

// 1D node (network vertex)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Node {
    pub id: String,
    pub bed_level: f64,
    pub top_level: f64,
    pub channels: Vec<String>,
}

impl Node {
    pub fn n_channels(&self) -> usize {
        self.channels.len()
    }
}

// Network registries
#[derive(Debug, Clone, Default)]
pub struct Network {
    channels: Vec<Channel>,
    nodes: Vec<Node>,
    channel_index: HashMap<String, usize>,
    node_index: HashMap<String, usize>,
}

impl Network {
    pub fn new(channels: Vec<Channel>, nodes: Vec<Node>) -> Self {
        let channel_index = channels
            .iter()
            .enumerate()
            .map(|(i, c)| (c.id.clone(), i))
            .collect();
        let node_index = nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.id.clone(), i))
            .collect();
        Network {
            channels,
            nodes,
            channel_index,
            node_index,
        }
    }

    /// Build from channels alone, deriving nodes from channel endpoints.
    pub fn from_channels(channels: Vec<Channel>) -> Self {
        let mut nodes: Vec<Node> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();
        for channel in &channels {
            for node_id in [&channel.us_node, &channel.ds_node] {
                let i = *index.entry(node_id.clone()).or_insert_with(|| {
                    nodes.push(Node {
                        id: node_id.clone(),
                        bed_level: f64::NAN,
                        top_level: f64::NAN,
                        channels: Vec::new(),
                    });
                    nodes.len() - 1
                });
                nodes[i].channels.push(channel.id.clone());
            }
        }
        Network::new(channels, nodes)
    }

    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn channel(&self, id: &str) -> Option<&Channel> {
        self.channel_index.get(id).map(|&i| &self.channels[i])
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.node_index.get(id).map(|&i| &self.nodes[i])
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Check registry sizes against the counts declared by the result index.
    pub fn validate_counts(
        &self,
        declared_channels: Option<usize>,
        declared_nodes: Option<usize>,
    ) -> Result<()> {
        if let Some(expected) = declared_channels {
            if expected != self.channels.len() {
                return Err(ResultError::Structural(format!(
                    "index declares {} channels, channel info holds {}",
                    expected,
                    self.channels.len()
                )));
            }
        }
        if let Some(expected) = declared_nodes {
            if expected != self.nodes.len() {
                return Err(ResultError::Structural(format!(
                    "index declares {} nodes, node info holds {}",
                    expected,
                    self.nodes.len()
                )));
            }
        }
        Ok(())
    }
}

fn reader(path: &Path) -> Result<csv::Reader<BufReader<File>>> {
    if !path.exists() {
        return Err(ResultError::FileNotFound {
            path: path.to_path_buf(),
        });
    }
    let file = File::open(path)?;
    Ok(ReaderBuilder::new()
        .has_headers(true)
        .delimiter(b',')
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(BufReader::new(file)))
}

fn column_position(headers: &StringRecord, name: &str, dataset: &str) -> Result<usize> {
    headers
        .iter()
        .position(|h| h.eq_ignore_ascii_case(name))
        .ok_or_else(|| ResultError::schema(dataset, format!("missing column '{}'", name)))
}

fn parse_f64(record: &StringRecord, index: usize) -> f64 {
    record
        .get(index)
        .and_then(|v| v.trim().parse::<f64>().ok())
        .unwrap_or(f64::NAN)
}

// Channel info CSV
pub fn load_channel_info(path: &Path, columns: &ChannelColumns) -> Result<Vec<Channel>> {
    let dataset = path.display().to_string();
    let mut rdr = reader(path)?;
    let headers = rdr.headers()?.clone();
    let col = |name: &str| column_position(&headers, name, &dataset);

    let id = col(&columns.id)?;
    let us_node = col(&columns.us_node)?;
    let ds_node = col(&columns.ds_node)?;
    let us_channel = col(&columns.us_channel)?;
    let ds_channel = col(&columns.ds_channel)?;
    let flags = col(&columns.flags)?;
    let length = col(&columns.length)?;
    let us_invert = col(&columns.us_invert)?;
    let ds_invert = col(&columns.ds_invert)?;
    // Optional hydraulic attributes
    let form_loss = col(&columns.form_loss).ok();
    let n = col(&columns.n).ok();
    let slope = col(&columns.slope).ok();
    let lb_us = col(&columns.lb_us_obvert).ok();
    let rb_us = col(&columns.rb_us_obvert).ok();
    let lb_ds = col(&columns.lb_ds_obvert).ok();
    let rb_ds = col(&columns.rb_ds_obvert).ok();
    let blockage = col(&columns.blockage).ok();
    let opt = |record: &StringRecord, index: Option<usize>| {
        index.map(|i| parse_f64(record, i)).unwrap_or(f64::NAN)
    };

    let mut channels = Vec::new();
    for (row, result) in rdr.records().enumerate() {
        let record = result?;
        let Some(channel_id) = record.get(id).filter(|v| !v.is_empty()) else {
            warn!(row, file = %dataset, "skipping channel row without id");
            continue;
        };
        channels.push(Channel {
            id: channel_id.to_string(),
            us_node: record.get(us_node).unwrap_or_default().to_string(),
            ds_node: record.get(ds_node).unwrap_or_default().to_string(),
            us_channel: parse_neighbour(record.get(us_channel).unwrap_or_default()),
            ds_channel: parse_neighbour(record.get(ds_channel).unwrap_or_default()),
            flags: record.get(flags).unwrap_or_default().to_string(),
            length: parse_f64(&record, length),
            form_loss: opt(&record, form_loss),
            n: opt(&record, n),
            slope: opt(&record, slope),
            us_invert: parse_f64(&record, us_invert),
            ds_invert: parse_f64(&record, ds_invert),
            lb_us_obvert: opt(&record, lb_us),
            rb_us_obvert: opt(&record, rb_us),
            lb_ds_obvert: opt(&record, lb_ds),
            rb_ds_obvert: opt(&record, rb_ds),
            blockage: opt(&record, blockage),
        });
    }

    info!(count = channels.len(), file = %dataset, "loaded channel info");
    Ok(channels)
}

// Node info CSV: connected channel ids trail the channel count column
pub fn load_node_info(path: &Path, columns: &NodeColumns) -> Result<Vec<Node>> {
    let dataset = path.display().to_string();
    let mut rdr = reader(path)?;
    let headers = rdr.headers()?.clone();
    let col = |name: &str| column_position(&headers, name, &dataset);

    let id = col(&columns.id)?;
    let bed_level = col(&columns.bed_level)?;
    let top_level = col(&columns.top_level).ok();
    let n_channels = col(&columns.n_channels)?;

    let mut nodes = Vec::new();
    for result in rdr.records() {
        let record = result?;
        let Some(node_id) = record.get(id).filter(|v| !v.is_empty()) else {
            continue;
        };
        let count = record
            .get(n_channels)
            .and_then(|v| v.trim().parse::<usize>().ok())
            .unwrap_or(0);
        let channels: Vec<String> = record
            .iter()
            .skip(n_channels + 1)
            .filter(|v| !v.is_empty())
            .take(count)
            .map(str::to_string)
            .collect();
        if channels.len() != count {
            warn!(node = node_id, declared = count, found = channels.len(), "node channel list is short");
        }
        nodes.push(Node {
            id: node_id.to_string(),
            bed_level: parse_f64(&record, bed_level),
            top_level: top_level.map(|i| parse_f64(&record, i)).unwrap_or(f64::NAN),
            channels,
        });
    }

    info!(count = nodes.len(), file = %dataset, "loaded node info");
    Ok(nodes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write(dir: &Path, name: &str, text: &str) -> std::path::PathBuf {
        let path = dir.join(name);
        let mut f = File::create(&path).unwrap();
        f.write_all(text.as_bytes()).unwrap();
        path
    }

    #[test]
    fn channel_info_with_terminal_sentinels() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "chan.csv",
            "Channel,US Node,DS Node,US Channel,DS Channel,Flags,Length,Form Loss,n or Cd,pSlope,US Invert,DS Invert,LBUS Obvert,RBUS Obvert,LBDS Obvert,RBDS Obvert,pBlockage\n\
             A,n0,n1,------,B,S,10.0,0.0,0.03,0.1,10.0,9.0,12.0,12.0,11.0,11.0,0\n\
             B,n1,n2,A,------,R,20.0,0.5,0.015,0.05,9.0,8.0,10.0,10.0,9.0,9.0,0\n",
        );
        let channels = load_channel_info(&path, &ChannelColumns::csv()).unwrap();
        assert_eq!(channels.len(), 2);
        assert_eq!(channels[0].us_channel, None);
        assert_eq!(channels[0].ds_channel.as_deref(), Some("B"));
        assert_eq!(channels[1].flags, "R");
        assert_eq!(channels[1].us_obvert(), 10.0);
    }

    #[test]
    fn missing_required_column_is_schema_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(dir.path(), "chan.csv", "Channel,US Node\nA,n0\n");
        let err = load_channel_info(&path, &ChannelColumns::csv()).unwrap_err();
        assert!(matches!(err, ResultError::SchemaMismatch { .. }));
    }

    #[test]
    fn node_info_reads_trailing_channels() {
        let dir = tempfile::tempdir().unwrap();
        let path = write(
            dir.path(),
            "nodes.csv",
            "Node #,Node,Bed Level,Top Level,No. Channels,Channels\n\
             1,n0,10.0,15.0,1,A\n\
             2,n1,9.0,14.0,2,A,B\n",
        );
        let nodes = load_node_info(&path, &NodeColumns::csv()).unwrap();
        assert_eq!(nodes[1].channels, vec!["A".to_string(), "B".to_string()]);
        assert_eq!(nodes[1].n_channels(), 2);
        assert_eq!(nodes[0].bed_level, 10.0);
    }

    #[test]
    fn count_mismatch_is_structural() {
        let network = Network::from_channels(vec![Channel::new("A", "n0", "n1")]);
        assert_eq!(network.nodes().len(), 2);
        assert!(network.validate_counts(Some(1), Some(2)).is_ok());
        let err = network.validate_counts(Some(2), None).unwrap_err();
        assert!(matches!(err, ResultError::Structural(_)));
    }

    #[test]
    fn missing_file_is_reported() {
        let err = load_node_info(Path::new("/nonexistent/nodes.csv"), &NodeColumns::csv()).unwrap_err();
        assert!(matches!(err, ResultError::FileNotFound { .. }));
    }
}
