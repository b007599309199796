//! Compute shortest in-network distances between snapped settlement pairs
//! and reconstruct the route polyline for rendering.
//!
//! The distance branch is chosen from the snap records: two settlements on
//! the same edge never detour through the rest of the network, two
//! settlements on the same node are zero distance apart, and everything else
//! goes through Dijkstra over physical track lengths. Geometry assembly then
//! has its own cases, tried in order, and every failure surface is reported
//! per pair as a structured kind; a bad pair never aborts the batch.

use geo::Coord;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::PipelineConfig;
use crate::graph::{Adjacency, RailwayGraph, euclidean_m, haversine_m};
use crate::snap::{SnapRecord, SnapType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RouteStatus {
    #[serde(rename = "OK")]
    Ok,
    #[serde(rename = "WARNING")]
    Warning,
    #[serde(rename = "FAR_FROM_PATH")]
    FarFromPath,
    #[serde(rename = "NO_MAPPING")]
    NoMapping,
    #[serde(rename = "NO_PATH")]
    NoPath,
    #[serde(rename = "NO_GEOMETRY")]
    NoGeometry,
}

impl std::fmt::Display for RouteStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        // important: Should match the serde renames
        let name = match self {
            RouteStatus::Ok => "OK",
            RouteStatus::Warning => "WARNING",
            RouteStatus::FarFromPath => "FAR_FROM_PATH",
            RouteStatus::NoMapping => "NO_MAPPING",
            RouteStatus::NoPath => "NO_PATH",
            RouteStatus::NoGeometry => "NO_GEOMETRY",
        };
        write!(f, "{name}")
    }
}

/// One verified pair in the route report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteCheck {
    #[serde(rename = "from")]
    pub from_settlement: String,
    #[serde(rename = "to")]
    pub to_settlement: String,
    pub status: RouteStatus,
    pub detail: String,
    pub direct_distance_km: Option<f64>,
}

/// How a pair's distance was obtained
#[derive(Debug, Clone, PartialEq)]
pub enum DistanceCase {
    /// Both snaps share one edge; distance is the parameter span
    SameEdge,
    /// Identical primary nodes; zero distance
    SameNode,
    /// Full graph traversal over the given node path
    Network { path: Vec<usize> },
    NoPath,
    NoMapping,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PairDistance {
    pub railway_km: Option<f64>,
    pub case: DistanceCase,
}

fn same_edge(a: &SnapRecord, b: &SnapRecord) -> bool {
    if a.snap_type != SnapType::Edge || b.snap_type != SnapType::Edge {
        return false;
    }
    let mut nodes_a = a.snap_nodes.clone();
    let mut nodes_b = b.snap_nodes.clone();
    nodes_a.sort();
    nodes_b.sort();
    nodes_a == nodes_b
}

/// Shortest in-network distance between two snapped settlements
pub fn pair_distance(
    graph: &RailwayGraph,
    adjacency: &Adjacency,
    a: Option<&SnapRecord>,
    b: Option<&SnapRecord>,
) -> PairDistance {
    let (Some(a), Some(b)) = (a, b) else {
        return PairDistance {
            railway_km: None,
            case: DistanceCase::NoMapping,
        };
    };

    // Same edge comes first: a pair bracketing one edge must not detour
    // through the rest of the network
    if same_edge(a, b) {
        if let (Some(t1), Some(t2), Some(edge_length_km)) =
            (a.snap_edge_t, b.snap_edge_t, a.snap_edge_length_km)
        {
            return PairDistance {
                railway_km: Some((t2 - t1).abs() * edge_length_km),
                case: DistanceCase::SameEdge,
            };
        }
    }

    if a.snap_node == b.snap_node {
        return PairDistance {
            railway_km: Some(0.0),
            case: DistanceCase::SameNode,
        };
    }

    let (Some(from), Some(to)) = (graph.node_index(&a.snap_node), graph.node_index(&b.snap_node))
    else {
        return PairDistance {
            railway_km: None,
            case: DistanceCase::NoMapping,
        };
    };

    match graph.shortest_path(adjacency, from, to) {
        Some((length_m, path)) => PairDistance {
            railway_km: Some(length_m / 1000.0),
            case: DistanceCase::Network { path },
        },
        None => PairDistance {
            railway_km: None,
            case: DistanceCase::NoPath,
        },
    }
}

fn taxicab(a: Coord, b: Coord) -> f64 {
    (a.x - b.x).abs() + (a.y - b.y).abs()
}

fn closest_vertex(points: &[Coord], position: Coord) -> usize {
    let mut closest = 0;
    let mut min_dist = f64::INFINITY;
    for (i, &point) in points.iter().enumerate() {
        let dist = euclidean_m(point, position);
        if dist < min_dist {
            min_dist = dist;
            closest = i;
        }
    }
    closest
}

fn settlement_position(record: &SnapRecord, config: &PipelineConfig) -> Coord {
    let (x, y) = config.projection.forward(record.lon, record.lat);
    Coord { x, y }
}

fn edge_between(graph: &RailwayGraph, ids: &[String]) -> Option<usize> {
    if ids.len() != 2 {
        return None;
    }
    let u = graph.node_index(&ids[0])?;
    let v = graph.node_index(&ids[1])?;
    graph.find_edge(u, v)
}

/// Both settlements on one edge: the vertex slice between their closest
/// vertices, oriented from source to target
fn same_edge_geometry(
    graph: &RailwayGraph,
    a: &SnapRecord,
    b: &SnapRecord,
    config: &PipelineConfig,
) -> Vec<Coord> {
    let Some(edge_index) = edge_between(graph, &a.snap_nodes) else {
        return Vec::new();
    };
    let points: Vec<Coord> = graph.edge(edge_index).points.coords().copied().collect();
    if points.is_empty() {
        return Vec::new();
    }

    let position_a = settlement_position(a, config);
    let position_b = settlement_position(b, config);
    let index_a = closest_vertex(&points, position_a);
    let index_b = closest_vertex(&points, position_b);

    if index_a == index_b {
        // Sparse geometry: the slice collapsed to a single vertex
        return vec![position_a, points[index_a], position_b];
    }

    let mut slice: Vec<Coord> = points[index_a.min(index_b)..=index_a.max(index_b)].to_vec();
    if index_a > index_b {
        slice.reverse();
    }
    slice
}

/// One side of a shared-node route: the slice of the snap edge from the
/// settlement's closest vertex to the shared node, or a straight hop from
/// the settlement itself for node-only snaps
///
/// Returned oriented settlement-side first, node last.
fn side_toward_node(
    graph: &RailwayGraph,
    record: &SnapRecord,
    node_position: Coord,
    config: &PipelineConfig,
) -> Vec<Coord> {
    let position = settlement_position(record, config);

    if record.snap_type == SnapType::Edge {
        if let Some(edge_index) = edge_between(graph, &record.snap_nodes) {
            let points: Vec<Coord> = graph.edge(edge_index).points.coords().copied().collect();
            if points.len() >= 2 {
                let closest = closest_vertex(&points, position);
                let node_at_start = euclidean_m(points[0], node_position)
                    <= euclidean_m(points[points.len() - 1], node_position);
                let side: Vec<Coord> = if node_at_start {
                    let mut slice = points[..=closest].to_vec();
                    slice.reverse();
                    slice
                } else {
                    points[closest..].to_vec()
                };
                if side.len() >= 2 {
                    return side;
                }
            }
        }
    }

    vec![position, node_position]
}

/// Shared-node geometry: both sides meet at the shared node
fn shared_node_geometry(
    graph: &RailwayGraph,
    a: &SnapRecord,
    b: &SnapRecord,
    config: &PipelineConfig,
) -> Vec<Coord> {
    let Some(node_index) = graph.node_index(&a.snap_node) else {
        return Vec::new();
    };
    let node_position = graph.node(node_index).position;

    let from_side = side_toward_node(graph, a, node_position, config);
    let mut to_side = side_toward_node(graph, b, node_position, config);
    to_side.reverse();

    let mut geometry = from_side;
    for point in to_side {
        if geometry.last() != Some(&point) {
            geometry.push(point);
        }
    }
    geometry
}

/// Concatenate the polylines of consecutive edges along a node path
///
/// Each next polyline is reversed when its far end, not its near end, abuts
/// the running chain's tail; the discrete decision only needs taxicab
/// distance. The first polyline is oriented to leave from the path's first
/// node.
fn path_geometry(graph: &RailwayGraph, path: &[usize]) -> Vec<Coord> {
    let mut coords: Vec<Coord> = Vec::new();

    for (u, v) in path.iter().copied().tuple_windows() {
        let Some(edge_index) = graph.find_edge(u, v) else {
            debug!(
                "No edge between path nodes {} and {}",
                graph.node(u).id,
                graph.node(v).id
            );
            continue;
        };
        let mut points: Vec<Coord> = graph.edge(edge_index).points.coords().copied().collect();
        if points.is_empty() {
            continue;
        }

        let reverse = match coords.last() {
            None => {
                let start = graph.node(u).position;
                taxicab(points[points.len() - 1], start) < taxicab(points[0], start)
            }
            Some(&tail) => taxicab(points[points.len() - 1], tail) < taxicab(points[0], tail),
        };
        if reverse {
            points.reverse();
        }
        coords.extend(points);
    }

    coords
}

/// Extend a path's geometry onto a settlement's snap edge when that brings
/// the route strictly closer to the settlement
fn extend_to_snap_edge(
    mut coords: Vec<Coord>,
    record: &SnapRecord,
    graph: &RailwayGraph,
    config: &PipelineConfig,
    at_end: bool,
) -> Vec<Coord> {
    if record.snap_type != SnapType::Edge || coords.is_empty() {
        return coords;
    }
    let Some(edge_index) = edge_between(graph, &record.snap_nodes) else {
        return coords;
    };
    let track: Vec<Coord> = graph.edge(edge_index).points.coords().copied().collect();
    if track.len() < 2 {
        return coords;
    }

    let position = settlement_position(record, config);
    let closest = closest_vertex(&track, position);
    let closest_dist = euclidean_m(track[closest], position);

    let endpoint = if at_end {
        coords[coords.len() - 1]
    } else {
        coords[0]
    };
    if closest_dist >= euclidean_m(endpoint, position) {
        return coords;
    }

    // Which end of the snap edge touches the path?
    let connects_at_start =
        taxicab(endpoint, track[0]) < taxicab(endpoint, track[track.len() - 1]);
    // Oriented connection point first, closest vertex last
    let extension: Vec<Coord> = if connects_at_start {
        track[..=closest].to_vec()
    } else {
        track[closest..].iter().rev().copied().collect()
    };

    if at_end {
        coords.extend(extension.into_iter().skip(1));
        coords
    } else {
        let mut prefix: Vec<Coord> = extension.into_iter().rev().collect();
        prefix.pop();
        prefix.extend(coords);
        prefix
    }
}

/// Reconstruct the route polyline for a pair, in the projected frame
pub fn route_geometry(
    graph: &RailwayGraph,
    a: &SnapRecord,
    b: &SnapRecord,
    case: &DistanceCase,
    config: &PipelineConfig,
) -> Vec<Coord> {
    match case {
        DistanceCase::SameEdge => same_edge_geometry(graph, a, b, config),
        DistanceCase::SameNode => shared_node_geometry(graph, a, b, config),
        DistanceCase::Network { path } => {
            let coords = path_geometry(graph, path);
            let coords = extend_to_snap_edge(coords, a, graph, config, false);
            extend_to_snap_edge(coords, b, graph, config, true)
        }
        DistanceCase::NoPath | DistanceCase::NoMapping => Vec::new(),
    }
}

/// Minimum great-circle distance from any route vertex to the settlement (km)
fn closest_approach_km(coords: &[Coord], lat: f64, lon: f64, config: &PipelineConfig) -> f64 {
    coords
        .iter()
        .map(|coord| {
            let (vertex_lon, vertex_lat) = config.projection.inverse(coord.x, coord.y);
            haversine_m((vertex_lon, vertex_lat), (lon, lat)) / 1000.0
        })
        .fold(f64::INFINITY, f64::min)
}

/// Classify how well the reconstructed geometry serves both settlements
fn classify_route(
    coords: &[Coord],
    a: &SnapRecord,
    b: &SnapRecord,
    config: &PipelineConfig,
) -> (RouteStatus, String) {
    let from_km = closest_approach_km(coords, a.lat, a.lon, config);
    let to_km = closest_approach_km(coords, b.lat, b.lon, config);

    let mut issues = Vec::new();
    for (dist_km, record) in [(from_km, a), (to_km, b)] {
        if dist_km > config.route_far_km {
            issues.push(format!("Path {dist_km:.1}km from {}", record.settlement));
        } else if dist_km > config.route_warn_km {
            issues.push(format!(
                "Path {dist_km:.1}km from {} (warn)",
                record.settlement
            ));
        }
    }

    let worst = from_km.max(to_km);
    if issues.is_empty() {
        (
            RouteStatus::Ok,
            format!("Path within {worst:.1}km of both settlements"),
        )
    } else if worst > config.route_far_km {
        (RouteStatus::FarFromPath, issues.join("; "))
    } else {
        (RouteStatus::Warning, issues.join("; "))
    }
}

/// Verify one settlement pair end to end: distance branch, geometry, quality
#[allow(clippy::too_many_arguments)]
pub fn verify_pair(
    graph: &RailwayGraph,
    adjacency: &Adjacency,
    from_name: &str,
    to_name: &str,
    a: Option<&SnapRecord>,
    b: Option<&SnapRecord>,
    direct_distance_km: Option<f64>,
    config: &PipelineConfig,
) -> RouteCheck {
    let check = |status, detail| RouteCheck {
        from_settlement: from_name.to_string(),
        to_settlement: to_name.to_string(),
        status,
        detail,
        direct_distance_km,
    };

    let (Some(a), Some(b)) = (a, b) else {
        let missing = if a.is_none() { from_name } else { to_name };
        return check(
            RouteStatus::NoMapping,
            format!("{missing} not in mapping data"),
        );
    };

    let distance = pair_distance(graph, adjacency, Some(a), Some(b));
    match &distance.case {
        DistanceCase::NoMapping => {
            return check(
                RouteStatus::NoMapping,
                format!("{} or {} maps to an unknown node", a.snap_node, b.snap_node),
            );
        }
        DistanceCase::NoPath => {
            return check(
                RouteStatus::NoPath,
                format!("No path from {} to {}", a.snap_node, b.snap_node),
            );
        }
        _ => {}
    }

    let coords = route_geometry(graph, a, b, &distance.case, config);
    if coords.len() < 2 {
        return check(
            RouteStatus::NoGeometry,
            format!("No track geometry between {} and {}", a.snap_node, b.snap_node),
        );
    }

    let (status, detail) = classify_route(&coords, a, b, config);
    check(status, detail)
}
