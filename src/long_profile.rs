//! Long profiles: distance-vs-elevation views along a path of 1D channels.
//!
//! A profile is resolved once per (start, end) channel pair. Channel ends are
//! offset by [`STEP_EPSILON`] so that values plot as steps at each node
//! instead of diagonal ramps between channels.

use crate::config::LoaderConfig;
use crate::error::{ConnectivityError, Result, ResultError};
use crate::maxima::MaximaTable;
use crate::network::{Channel, Network};
use crate::timeseries::Timeseries;
use serde::Serialize;
use std::collections::HashSet;
use tracing::debug;

pub const STEP_EPSILON: f64 = 0.0001;

/// Walk downstream from `start` following each channel's downstream pointer.
///
/// With `end` set the walk stops at `end`; if it is never reached the walk is
/// retried from `end` towards `start` in case the pair was given in reverse
/// hydraulic order.
pub fn resolve(
    network: &Network,
    start: &str,
    end: Option<&str>,
) -> std::result::Result<Vec<String>, ConnectivityError> {
    for id in std::iter::once(start).chain(end) {
        if network.channel(id).is_none() {
            return Err(ConnectivityError::UnknownChannel(id.to_string()));
        }
    }

    let Some(end) = end else {
        return walk_downstream(network, start, None).map(|(chain, _)| chain);
    };

    let (chain, reached) = walk_downstream(network, start, Some(end))?;
    if reached {
        return Ok(chain);
    }
    debug!(start, end, "retrying long profile walk in reverse order");
    let (chain, reached) = walk_downstream(network, end, Some(start))?;
    if reached {
        return Ok(chain);
    }
    Err(ConnectivityError::NotConnected {
        from: start.to_string(),
        to: end.to_string(),
    })
}

fn walk_downstream(
    network: &Network,
    start: &str,
    target: Option<&str>,
) -> std::result::Result<(Vec<String>, bool), ConnectivityError> {
    let mut chain = Vec::new();
    let mut seen = HashSet::new();
    let mut current = Some(start.to_string());

    while let Some(id) = current {
        if !seen.insert(id.clone()) {
            return Err(ConnectivityError::Cycle(start.to_string()));
        }
        let channel = network
            .channel(&id)
            .ok_or_else(|| ConnectivityError::UnknownChannel(id.clone()))?;
        chain.push(id.clone());
        if target == Some(id.as_str()) {
            return Ok((chain, true));
        }
        current = channel.ds_channel.clone();
    }

    Ok((chain, false))
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Pit {
    pub channel: String,
    pub node: String,
    pub distance: f64,
    pub elevation: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdverseGradient {
    pub chainage: f64,
    pub node: String,
    pub elevation: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CulvertOutline {
    pub channel: String,
    /// Closed polygon: first vertex repeated at the end.
    pub vertices: Vec<(f64, f64)>,
}

/// Static arrays of a resolved long profile.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LongProfile {
    pub channels: Vec<String>,
    pub nodes: Vec<String>,
    /// Cumulative distance at each node, `channels.len() + 1` entries.
    pub dist_nodes: Vec<f64>,
    /// Two entries per channel, pulled inward by the step epsilon.
    pub dist_chan_inverts: Vec<f64>,
    /// Node and channel-end distances merged in order.
    pub dist_combined: Vec<f64>,
    pub inverts: Vec<f64>,
    pub lb_obverts: Vec<f64>,
    pub rb_obverts: Vec<f64>,
    pub culverts: Vec<CulvertOutline>,
    pub pits: Vec<Pit>,
    /// Maximum water level per node, doubled at interior nodes.
    pub max_water: Vec<f64>,
    pub max_energy: Vec<f64>,
    pub adverse_water: Vec<AdverseGradient>,
    pub adverse_energy: Vec<AdverseGradient>,
}

/// Node maxima used to decorate a profile.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProfileLevels<'a> {
    pub water: Option<&'a MaximaTable>,
    pub energy: Option<&'a MaximaTable>,
}

impl LongProfile {
    pub fn build(
        network: &Network,
        chain: &[String],
        levels: ProfileLevels<'_>,
        config: &LoaderConfig,
    ) -> Result<Self> {
        let channels = chain
            .iter()
            .map(|id| {
                network
                    .channel(id)
                    .ok_or_else(|| ConnectivityError::UnknownChannel(id.clone()).into())
            })
            .collect::<Result<Vec<&Channel>>>()?;
        let first = channels.first().ok_or(ResultError::NoLongProfile)?;

        let mut nodes = vec![first.us_node.clone()];
        let mut dist_nodes = vec![0.0];
        let mut dist_chan_inverts = Vec::with_capacity(2 * channels.len());
        let mut inverts = Vec::with_capacity(2 * channels.len());
        let mut lb_obverts = Vec::with_capacity(2 * channels.len());
        let mut rb_obverts = Vec::with_capacity(2 * channels.len());
        let mut culverts = Vec::new();

        for channel in &channels {
            let start = *dist_nodes.last().unwrap_or(&0.0);
            let length = if channel.length.is_finite() {
                channel.length.max(0.0)
            } else {
                0.0
            };
            let end = start + length;
            let eps = STEP_EPSILON.min(length / 2.0);

            dist_nodes.push(end);
            nodes.push(channel.ds_node.clone());
            dist_chan_inverts.push(start + eps);
            dist_chan_inverts.push(end - eps);
            inverts.push(channel.us_invert);
            inverts.push(channel.ds_invert);
            lb_obverts.push(channel.lb_us_obvert);
            lb_obverts.push(channel.lb_ds_obvert);
            rb_obverts.push(channel.rb_us_obvert);
            rb_obverts.push(channel.rb_ds_obvert);

            if let Some(outline) = culvert_outline(channel, start + eps, end - eps, config) {
                culverts.push(outline);
            }
        }

        let mut dist_combined: Vec<f64> = dist_nodes
            .iter()
            .chain(dist_chan_inverts.iter())
            .copied()
            .collect();
        dist_combined.sort_by(f64::total_cmp);

        let pits = find_pits(network, &nodes, &dist_nodes);

        let water = node_levels(&nodes, levels.water);
        let energy = node_levels(&nodes, levels.energy);
        let adverse_water = adverse_gradients(&nodes, &dist_nodes, &water);
        let adverse_energy = adverse_gradients(&nodes, &dist_nodes, &energy);

        Ok(LongProfile {
            channels: chain.to_vec(),
            max_water: clip_and_double(&water, &channels),
            max_energy: clip_and_double(&energy, &channels),
            nodes,
            dist_nodes,
            dist_chan_inverts,
            dist_combined,
            inverts,
            lb_obverts,
            rb_obverts,
            culverts,
            pits,
            adverse_water,
            adverse_energy,
        })
    }

    /// Instantaneous node values at the timestep closest to `time` (hours),
    /// clipped and doubled like the maxima arrays.
    pub fn at_time(
        &self,
        network: &Network,
        ts: &Timeseries,
        time: f64,
        tolerance: f64,
    ) -> Result<Vec<f64>> {
        let row = ts
            .closest_index(time, tolerance)
            .ok_or_else(|| ResultError::not_found("timestep", format!("{time}")))?;
        let channels = self
            .channels
            .iter()
            .map(|id| {
                network
                    .channel(id)
                    .ok_or_else(|| ConnectivityError::UnknownChannel(id.clone()).into())
            })
            .collect::<Result<Vec<&Channel>>>()?;
        let values: Vec<f64> = self
            .nodes
            .iter()
            .map(|id| ts.value(id, row).unwrap_or(f64::NAN))
            .collect();
        Ok(clip_and_double(&values, &channels))
    }
}

fn culvert_outline(
    channel: &Channel,
    start: f64,
    end: f64,
    config: &LoaderConfig,
) -> Option<CulvertOutline> {
    if !config.is_culvert_flag(&channel.flags) {
        return None;
    }
    let us_height = channel.us_obvert() - channel.us_invert;
    let ds_height = channel.ds_obvert() - channel.ds_invert;
    if !(us_height > 0.0 || ds_height > 0.0) {
        return None;
    }
    let vertices = vec![
        (start, channel.us_invert),
        (start, channel.us_obvert()),
        (end, channel.ds_obvert()),
        (end, channel.ds_invert),
        (start, channel.us_invert),
    ];
    Some(CulvertOutline {
        channel: channel.id.clone(),
        vertices,
    })
}

// Isolated channels hanging off a visited node, reported once each
fn find_pits(network: &Network, nodes: &[String], dist_nodes: &[f64]) -> Vec<Pit> {
    let mut seen = HashSet::new();
    let mut pits = Vec::new();
    for (node_id, distance) in nodes.iter().zip(dist_nodes) {
        let Some(node) = network.node(node_id) else {
            continue;
        };
        for channel_id in &node.channels {
            let Some(channel) = network.channel(channel_id) else {
                continue;
            };
            if channel.is_isolated() && seen.insert(channel_id.clone()) {
                pits.push(Pit {
                    channel: channel_id.clone(),
                    node: node_id.clone(),
                    distance: *distance,
                    elevation: channel.us_invert,
                });
            }
        }
    }
    pits
}

fn node_levels(nodes: &[String], table: Option<&MaximaTable>) -> Vec<f64> {
    nodes
        .iter()
        .map(|id| {
            table
                .and_then(|t| t.get(id))
                .map(|e| e.value)
                .unwrap_or(f64::NAN)
        })
        .collect()
}

/// Nodes whose level rises above the previous node's level.
pub fn adverse_gradients(
    nodes: &[String],
    dist_nodes: &[f64],
    levels: &[f64],
) -> Vec<AdverseGradient> {
    levels
        .windows(2)
        .enumerate()
        .filter(|(_, pair)| pair[1] > pair[0])
        .map(|(i, pair)| AdverseGradient {
            chainage: dist_nodes[i + 1],
            node: nodes[i + 1].clone(),
            elevation: pair[1],
        })
        .collect()
}

/// Raise node values to the adjacent channel invert and emit one value per
/// channel end: node `i` appears at the downstream end of channel `i - 1`
/// and the upstream end of channel `i`.
fn clip_and_double(values: &[f64], channels: &[&Channel]) -> Vec<f64> {
    let mut out = Vec::with_capacity(2 * channels.len());
    for (i, channel) in channels.iter().enumerate() {
        out.push(clip(values[i], channel.us_invert));
        out.push(clip(values[i + 1], channel.ds_invert));
    }
    out
}

fn clip(value: f64, invert: f64) -> f64 {
    if value.is_nan() || invert.is_nan() {
        value
    } else {
        value.max(invert)
    }
}
