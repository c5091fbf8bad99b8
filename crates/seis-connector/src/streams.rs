//! Stream selection: all-station mode or an explicit station list

use std::path::Path;

use crate::error::ConfigError;

/// One station in multi-station mode
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StationSpec {
    pub net: String,
    pub sta: String,
    /// SELECT patterns, e.g. `BH?` or `00HHZ.D`
    pub selectors: Vec<String>,
}

impl StationSpec {
    /// `NET_STA`, the key used for sequence tracking
    pub fn key(&self) -> String {
        format!("{}_{}", self.net, self.sta)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamSelection {
    /// Every station the server offers
    AllStation { selectors: Vec<String> },
    MultiStation(Vec<StationSpec>),
}

fn split_selectors(s: &str) -> Vec<String> {
    s.split_whitespace().map(str::to_string).collect()
}

fn parse_station(id: &str, raw: &str) -> Result<(String, String), ConfigError> {
    match id.split_once('_') {
        Some((net, sta)) if !net.is_empty() && !sta.is_empty() && !sta.contains('_') => {
            Ok((net.to_string(), sta.to_string()))
        }
        _ => Err(ConfigError::Selection(raw.to_string())),
    }
}

/// Parse `NET_STA[:sel1 sel2],NET_STA,...`. Stations without their own
/// selectors get `defaults`.
pub fn parse_multiselect(spec: &str, defaults: &[String]) -> Result<Vec<StationSpec>, ConfigError> {
    let mut stations = Vec::new();
    for entry in spec.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (id, selectors) = match entry.split_once(':') {
            Some((id, sel)) => (id, split_selectors(sel)),
            None => (entry, defaults.to_vec()),
        };
        let (net, sta) = parse_station(id.trim(), entry)?;
        stations.push(StationSpec { net, sta, selectors });
    }
    if stations.is_empty() {
        return Err(ConfigError::Selection(spec.to_string()));
    }
    Ok(stations)
}

/// Parse stream list text: `NET STA [selectors...]` per line, `#` comments
pub fn parse_stream_list(text: &str, defaults: &[String]) -> Result<Vec<StationSpec>, ConfigError> {
    let mut stations = Vec::new();
    for line in text.lines() {
        let line = line.split('#').next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }
        let mut fields = line.split_whitespace();
        let (net, sta) = match (fields.next(), fields.next()) {
            (Some(net), Some(sta)) => (net.to_string(), sta.to_string()),
            _ => return Err(ConfigError::Selection(line.to_string())),
        };
        let selectors: Vec<String> = fields.map(str::to_string).collect();
        stations.push(StationSpec {
            net,
            sta,
            selectors: if selectors.is_empty() { defaults.to_vec() } else { selectors },
        });
    }
    Ok(stations)
}

pub fn load_stream_list(path: &Path, defaults: &[String]) -> Result<Vec<StationSpec>, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::StreamList {
        path: path.display().to_string(),
        source,
    })?;
    parse_stream_list(&text, defaults)
}

/// Combine stream list file, inline list and default selectors.
/// Neither list given means all-station mode.
pub fn build_selection(
    stream_file: Option<&Path>,
    multiselect: Option<&str>,
    selectors: Option<&str>,
) -> Result<StreamSelection, ConfigError> {
    let defaults = selectors.map(split_selectors).unwrap_or_default();

    let mut stations = Vec::new();
    if let Some(path) = stream_file {
        stations.extend(load_stream_list(path, &defaults)?);
    }
    if let Some(spec) = multiselect {
        stations.extend(parse_multiselect(spec, &defaults)?);
    }

    if stream_file.is_none() && multiselect.is_none() {
        return Ok(StreamSelection::AllStation { selectors: defaults });
    }
    if stations.is_empty() {
        return Err(ConfigError::Selection("stream list is empty".to_string()));
    }
    Ok(StreamSelection::MultiStation(stations))
}
