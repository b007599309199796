//! Associate each settlement with the nearest element of the graph: either a
//! node or a point on an edge interior.
//!
//! Settlements frequently sit between network nodes on a long edge; without
//! edge snapping the router would assign them to a distant endpoint and
//! produce large false distances. The edge test uses the straight segment
//! between the edge's two node positions, not the edge's internal polyline.

use std::collections::BTreeMap;

use geo::Coord;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::PipelineConfig;
use crate::graph::{RailwayGraph, euclidean_m};
use crate::io::{
    DistanceSummary, MappingMetadata, MappingStats, Settlement, SettlementMapping, SnapThresholds,
    round1, round2, round4,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapType {
    Node,
    Edge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapQuality {
    /// On or very close to the railway
    OnNetwork,
    /// Close enough to be a railway town
    NearNetwork,
    /// Far but still snappable
    Distant,
    /// Too far to reasonably snap
    OffNetwork,
}

impl std::fmt::Display for SnapQuality {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        // important: Should match the serde snake_case rename
        match self {
            SnapQuality::OnNetwork => write!(f, "on_network"),
            SnapQuality::NearNetwork => write!(f, "near_network"),
            SnapQuality::Distant => write!(f, "distant"),
            SnapQuality::OffNetwork => write!(f, "off_network"),
        }
    }
}

/// One settlement's assignment to the network
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapRecord {
    pub settlement: String,
    pub lat: f64,
    pub lon: f64,
    /// The primary node: the single snapped node, or the source of the
    /// snapped edge in its canonical orientation
    pub snap_node: String,
    pub snap_nodes: Vec<String>,
    pub snap_type: SnapType,
    /// Position along the snapped edge, 0 at the source node, rounded to 4
    /// decimals; null for node snaps
    pub snap_edge_t: Option<f64>,
    pub snap_edge_length_km: Option<f64>,
    pub snap_distance_m: f64,
    pub snap_distance_km: f64,
    pub snap_quality: SnapQuality,
    pub node_lat: f64,
    pub node_lon: f64,
    pub railway_arrives: Option<i32>,
    pub first_railway: Option<String>,
}

/// Shortest distance from `p` to the segment `a`-`b`, and the parameter
/// `t in [0, 1]` of the foot of the perpendicular
///
/// Degenerate segments (both endpoints coincident) return `t = 0` and the
/// distance to the endpoint.
pub fn point_to_segment_distance_with_t(p: Coord, a: Coord, b: Coord) -> (f64, f64) {
    let dx = b.x - a.x;
    let dy = b.y - a.y;

    if dx == 0.0 && dy == 0.0 {
        return (euclidean_m(p, a), 0.0);
    }

    let t = (((p.x - a.x) * dx + (p.y - a.y) * dy) / (dx * dx + dy * dy)).clamp(0.0, 1.0);
    let nearest = Coord {
        x: a.x + t * dx,
        y: a.y + t * dy,
    };
    (euclidean_m(p, nearest), t)
}

pub fn classify_snap_quality(distance_m: f64, config: &PipelineConfig) -> SnapQuality {
    if distance_m <= config.on_network_m {
        SnapQuality::OnNetwork
    } else if distance_m <= config.near_network_m {
        SnapQuality::NearNetwork
    } else if distance_m <= config.max_snap_m {
        SnapQuality::Distant
    } else {
        SnapQuality::OffNetwork
    }
}

/// Snap every settlement to the nearest node or edge of the graph
///
/// Returns records sorted by settlement name.
pub fn snap_settlements(
    settlements: &[Settlement],
    graph: &RailwayGraph,
    config: &PipelineConfig,
) -> Vec<SnapRecord> {
    let mut records: Vec<SnapRecord> = settlements
        .iter()
        .map(|settlement| snap_one(settlement, graph, config))
        .collect();
    records.sort_by(|a, b| a.settlement.cmp(&b.settlement));

    let mut by_quality: BTreeMap<SnapQuality, usize> = BTreeMap::new();
    for record in &records {
        *by_quality.entry(record.snap_quality).or_default() += 1;
    }
    for (quality, count) in &by_quality {
        info!(
            "  {quality}: {count} ({:.1}%)",
            *count as f64 / records.len().max(1) as f64 * 100.0
        );
    }

    records
}

fn snap_one(settlement: &Settlement, graph: &RailwayGraph, config: &PipelineConfig) -> SnapRecord {
    let (x, y) = config.projection.forward(settlement.lon, settlement.lat);
    let position = Coord { x, y };

    let (node_index, node_dist) = nearest_node(position, graph);
    let nearest_edge = nearest_edge_point(position, graph);

    // The edge wins only when strictly closer, so a settlement that lands
    // exactly on a node stays a node snap
    let edge_snap = nearest_edge.filter(|(_, edge_dist, _)| *edge_dist < node_dist);

    let (snap_type, snap_nodes, snap_distance, snap_edge_t, snap_edge_length_km) =
        if let Some((edge_index, edge_dist, t)) = edge_snap {
            let edge = graph.edge(edge_index);
            (
                SnapType::Edge,
                vec![
                    graph.node(edge.source).id.clone(),
                    graph.node(edge.target).id.clone(),
                ],
                edge_dist,
                Some(round4(t)),
                Some(edge.length_km),
            )
        } else {
            (
                SnapType::Node,
                vec![graph.node(node_index).id.clone()],
                node_dist,
                None,
                None,
            )
        };

    let quality = classify_snap_quality(snap_distance, config);
    let primary = graph
        .node_index(&snap_nodes[0])
        .map(|index| graph.node(index))
        .expect("snap_nodes[0] came from the graph");

    debug!(
        "{}: {:?} snap at {:.1}m ({quality})",
        settlement.name, snap_type, snap_distance
    );

    SnapRecord {
        settlement: settlement.name.clone(),
        lat: settlement.lat,
        lon: settlement.lon,
        snap_node: snap_nodes[0].clone(),
        snap_nodes,
        snap_type,
        snap_edge_t,
        snap_edge_length_km,
        snap_distance_m: round1(snap_distance),
        snap_distance_km: round2(snap_distance / 1000.0),
        snap_quality: quality,
        node_lat: primary.lat,
        node_lon: primary.lon,
        railway_arrives: settlement.railway_arrives,
        first_railway: settlement.first_railway.clone(),
    }
}

/// Nearest node by projected distance; ties go to the earliest-created node
fn nearest_node(position: Coord, graph: &RailwayGraph) -> (usize, f64) {
    let mut nearest = (usize::MAX, f64::INFINITY);
    for (index, node) in graph.nodes().iter().enumerate() {
        let dist = euclidean_m(position, node.position);
        if dist < nearest.1 {
            nearest = (index, dist);
        }
    }
    nearest
}

/// Nearest edge treated as a single straight segment between its node
/// positions; returns `(edge index, distance, t)`
fn nearest_edge_point(position: Coord, graph: &RailwayGraph) -> Option<(usize, f64, f64)> {
    let mut best: Option<(usize, f64, f64)> = None;
    for (index, edge) in graph.edges().iter().enumerate() {
        let a = graph.node(edge.source).position;
        let b = graph.node(edge.target).position;
        let (dist, t) = point_to_segment_distance_with_t(position, a, b);
        if best.is_none_or(|(_, best_dist, _)| dist < best_dist) {
            best = Some((index, dist, t));
        }
    }
    best
}

/// Assemble the persisted mapping artifact
pub fn mapping_artifact(records: Vec<SnapRecord>, config: &PipelineConfig) -> SettlementMapping {
    let mut by_quality = BTreeMap::new();
    for record in &records {
        *by_quality.entry(record.snap_quality.to_string()).or_insert(0) += 1;
    }

    let distances: Vec<f64> = records.iter().map(|r| r.snap_distance_km).collect();
    let distance_km = if distances.is_empty() {
        DistanceSummary {
            min: 0.0,
            max: 0.0,
            avg: 0.0,
        }
    } else {
        DistanceSummary {
            min: round2(distances.iter().cloned().fold(f64::INFINITY, f64::min)),
            max: round2(distances.iter().cloned().fold(f64::NEG_INFINITY, f64::max)),
            avg: round2(distances.iter().sum::<f64>() / distances.len() as f64),
        }
    };

    SettlementMapping {
        metadata: MappingMetadata {
            description: "Settlement to railway network node mappings".to_string(),
            thresholds: SnapThresholds {
                on_network_m: config.on_network_m,
                near_network_m: config.near_network_m,
                max_snap_m: config.max_snap_m,
            },
        },
        stats: MappingStats {
            total_settlements: records.len(),
            by_quality,
            distance_km,
        },
        mappings: records,
    }
}

#[cfg(test)]
mod tests {
    use float_cmp::assert_approx_eq;
    use geo::{coord, line_string};
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::graph::{Edge, Node};

    /// A graph with real geographic node positions so forward projection of a
    /// settlement lands where the test expects
    fn two_node_graph(config: &PipelineConfig) -> RailwayGraph {
        let mut graph = RailwayGraph::new();
        for (i, (lon, lat)) in [(-105.0, 51.0), (-105.0, 51.09)].into_iter().enumerate() {
            let (x, y) = config.projection.forward(lon, lat);
            graph.push_node(Node {
                id: format!("n{i}"),
                position: coord! { x: x, y: y },
                lat,
                lon,
            });
        }
        let length_m = euclidean_m(graph.node(0).position, graph.node(1).position);
        graph.push_edge(Edge {
            source: 0,
            target: 1,
            length_m,
            length_km: round2(length_m / 1000.0),
            built_year: 1905,
            abandoned_year: 0,
            builder_code: "1".to_string(),
            builder_name: "CPR".to_string(),
            points: line_string![],
        });
        graph
    }

    fn settlement(name: &str, lat: f64, lon: f64) -> Settlement {
        Settlement {
            name: name.to_string(),
            lat,
            lon,
            first_railway: None,
            railway_arrives: None,
        }
    }

    #[test]
    fn test_point_to_segment_foot_inside() {
        let (dist, t) = point_to_segment_distance_with_t(
            coord! { x: 5.0, y: 3.0 },
            coord! { x: 0.0, y: 0.0 },
            coord! { x: 10.0, y: 0.0 },
        );
        assert_approx_eq!(f64, dist, 3.0);
        assert_approx_eq!(f64, t, 0.5);
    }

    #[test]
    fn test_point_to_segment_clamps_t() {
        let (dist, t) = point_to_segment_distance_with_t(
            coord! { x: -4.0, y: 3.0 },
            coord! { x: 0.0, y: 0.0 },
            coord! { x: 10.0, y: 0.0 },
        );
        assert_approx_eq!(f64, dist, 5.0);
        assert_approx_eq!(f64, t, 0.0);

        let (dist, t) = point_to_segment_distance_with_t(
            coord! { x: 14.0, y: 3.0 },
            coord! { x: 0.0, y: 0.0 },
            coord! { x: 10.0, y: 0.0 },
        );
        assert_approx_eq!(f64, dist, 5.0);
        assert_approx_eq!(f64, t, 1.0);
    }

    #[test]
    fn test_point_to_segment_degenerate() {
        let (dist, t) = point_to_segment_distance_with_t(
            coord! { x: 3.0, y: 4.0 },
            coord! { x: 0.0, y: 0.0 },
            coord! { x: 0.0, y: 0.0 },
        );
        assert_approx_eq!(f64, dist, 5.0);
        assert_approx_eq!(f64, t, 0.0);
    }

    #[test]
    fn test_settlement_on_node_snaps_to_node_with_zero_distance() {
        let config = PipelineConfig::default();
        let graph = two_node_graph(&config);
        // Same position as n0; the coincident edge endpoint must not win
        let records = snap_settlements(&[settlement("Briercrest", 51.0, -105.0)], &graph, &config);

        assert_eq!(records[0].snap_type, SnapType::Node);
        assert_eq!(records[0].snap_nodes, vec!["n0".to_string()]);
        assert_eq!(records[0].snap_distance_m, 0.0);
        assert_eq!(records[0].snap_quality, SnapQuality::OnNetwork);
        assert_eq!(records[0].snap_edge_t, None);
    }

    #[test]
    fn test_settlement_beside_edge_midpoint_snaps_to_edge() {
        let config = PipelineConfig::default();
        let graph = two_node_graph(&config);
        // Halfway between the nodes, nudged slightly east
        let records = snap_settlements(&[settlement("Midway", 51.045, -104.99)], &graph, &config);

        let record = &records[0];
        assert_eq!(record.snap_type, SnapType::Edge);
        assert_eq!(
            record.snap_nodes,
            vec!["n0".to_string(), "n1".to_string()]
        );
        assert_eq!(record.snap_node, "n0");
        let t = record.snap_edge_t.unwrap();
        assert!((0.4..=0.6).contains(&t), "t = {t}");
        assert!(record.snap_distance_m < 1500.0);
        assert_eq!(record.snap_quality, SnapQuality::OnNetwork);
        assert_eq!(record.snap_edge_length_km, Some(graph.edge(0).length_km));
    }

    #[test]
    fn test_quality_thresholds() {
        let config = PipelineConfig::default();
        assert_eq!(classify_snap_quality(0.0, &config), SnapQuality::OnNetwork);
        assert_eq!(
            classify_snap_quality(5_000.0, &config),
            SnapQuality::OnNetwork
        );
        assert_eq!(
            classify_snap_quality(5_000.1, &config),
            SnapQuality::NearNetwork
        );
        assert_eq!(
            classify_snap_quality(15_000.1, &config),
            SnapQuality::Distant
        );
        assert_eq!(
            classify_snap_quality(50_000.1, &config),
            SnapQuality::OffNetwork
        );
    }

    #[test]
    fn test_records_sorted_by_name_and_stats_counted() {
        let config = PipelineConfig::default();
        let graph = two_node_graph(&config);
        let records = snap_settlements(
            &[
                settlement("Zealandia", 51.0, -105.0),
                settlement("Aberdeen", 51.05, -105.0),
            ],
            &graph,
            &config,
        );
        assert_eq!(records[0].settlement, "Aberdeen");
        assert_eq!(records[1].settlement, "Zealandia");

        let artifact = mapping_artifact(records, &config);
        assert_eq!(artifact.stats.total_settlements, 2);
        assert_eq!(artifact.stats.by_quality.get("on_network"), Some(&2));
    }
}
