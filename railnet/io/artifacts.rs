//! Persisted pipeline artifacts.
//!
//! Every map that reaches disk is a `BTreeMap` so that rebuilding from the
//! same input produces byte-identical files.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::route::RouteCheck;
use crate::snap::SnapRecord;

/// `railway_network`: the graph without edge geometry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RailwayNetwork {
    pub metadata: NetworkMetadata,
    pub stats: NetworkStats,
    pub nodes: Vec<NetworkNode>,
    pub edges: Vec<NetworkEdge>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkMetadata {
    pub description: String,
    pub source: String,
    pub projection: String,
    pub units: String,
    pub snap_tolerance_m: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkStats {
    /// Source records accepted by the geographic filter
    pub sk_segments: usize,
    /// Summed original record lengths, km
    pub total_length_km: f64,
    pub node_count: usize,
    pub edge_count: usize,
    pub by_builder: BTreeMap<String, CountLength>,
    pub by_decade: BTreeMap<i32, CountLength>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CountLength {
    pub count: usize,
    pub length_km: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkNode {
    pub id: String,
    /// Projected frame, meters
    pub x: f64,
    pub y: f64,
    /// Rounded to 6 decimals
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkEdge {
    pub source: String,
    pub target: String,
    pub length_m: f64,
    pub length_km: f64,
    pub built_year: i32,
    pub abandoned_year: i32,
    pub builder_code: String,
    pub builder_name: String,
}

/// `railway_tracks`: full per-edge geometry for rendering and route assembly
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RailwayTracks {
    pub metadata: TracksMetadata,
    pub track_count: usize,
    pub tracks: Vec<Track>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TracksMetadata {
    pub description: String,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub source: String,
    pub target: String,
    /// [lon, lat] pairs rounded to 6 decimals
    pub coordinates: Vec<[f64; 2]>,
    pub built_year: i32,
    pub abandoned_year: i32,
    pub builder_name: String,
    pub length_km: f64,
}

/// `settlement_network_mapping`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementMapping {
    pub metadata: MappingMetadata,
    pub stats: MappingStats,
    pub mappings: Vec<SnapRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingMetadata {
    pub description: String,
    pub thresholds: SnapThresholds,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SnapThresholds {
    pub on_network_m: f64,
    pub near_network_m: f64,
    pub max_snap_m: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MappingStats {
    pub total_settlements: usize,
    pub by_quality: BTreeMap<String, usize>,
    pub distance_km: DistanceSummary,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DistanceSummary {
    pub min: f64,
    pub max: f64,
    pub avg: f64,
}

/// `settlement_connections`: the pair table the router annotates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementConnections {
    pub settlements: BTreeMap<String, SettlementInfo>,
    pub connections: BTreeMap<String, Vec<Connection>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementInfo {
    pub lat: f64,
    pub lon: f64,
    pub railway_arrives: Option<i32>,
    pub first_railway: Option<String>,
    pub railways: Option<Vec<RailwayStint>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RailwayStint {
    pub railway: String,
    pub year: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    pub to: String,
    /// Straight-line (great-circle) distance
    pub distance_km: f64,
    /// In-network distance; absent before routing, null when unreachable
    #[serde(default)]
    pub railway_distance_km: Option<f64>,
    #[serde(default)]
    pub shared_railway: Option<String>,
    #[serde(default)]
    pub connected_year: Option<i32>,
    #[serde(default)]
    pub connection_type: Option<String>,
    #[serde(default)]
    pub all_shared_railways: Option<Vec<RailwayStint>>,
}

/// Per-pair route verification report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteReport {
    pub metadata: ReportMetadata,
    pub summary: BTreeMap<String, usize>,
    pub results: Vec<RouteCheck>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportMetadata {
    pub description: String,
    pub thresholds: RouteThresholds,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RouteThresholds {
    pub warn_km: f64,
    pub far_km: f64,
}
