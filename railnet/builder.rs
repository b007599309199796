//! Convert a filtered collection of polylines into a graph whose edges are
//! topologically connected at junctions and whose geometry preserves the
//! original track lengths.
//!
//! Junction detection is two-pass: pass 1 maps every vertex of every accepted
//! polyline onto a coarse grid and keeps the cells hit by more than one
//! polyline; pass 2 splits each polyline at interior vertices that sit on a
//! detected junction. Segment endpoints are then resolved to nodes, reusing
//! any node within the snap tolerance.

use std::collections::{BTreeMap, HashMap};

use geo::{Coord, LineString};
use kdtree::KdTree;
use kdtree::distance::squared_euclidean;
use tracing::{debug, info};

use crate::config::PipelineConfig;
use crate::graph::{Edge, Node, RailwayGraph};
use crate::io::{
    CountLength, NetworkEdge, NetworkMetadata, NetworkNode, NetworkStats, RailwayNetwork,
    RailwayTracks, Track, TrackRecord, TracksMetadata, round1, round2, round6,
};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BuildStats {
    /// Every record seen, accepted or not
    pub total_segments: usize,
    /// Records accepted by the geographic filter
    pub sk_segments: usize,
    /// Records with a null bbox or fewer than 2 points
    pub degenerate: usize,
    /// Segments whose endpoints resolved to the same node
    pub self_loops: usize,
    /// Summed original record lengths (meters)
    pub total_length_m: f64,
    pub by_builder: BTreeMap<String, CountLengthM>,
    pub by_decade: BTreeMap<i32, CountLengthM>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CountLengthM {
    pub count: usize,
    pub length_m: f64,
}

impl CountLengthM {
    fn record(&mut self, length_m: f64) {
        self.count += 1;
        self.length_m += length_m;
    }
}

/// Resolves segment endpoints to graph nodes, reusing the nearest existing
/// node within the snap tolerance
///
/// Nearest-first, with ties broken by node insertion order, so resolution is
/// deterministic regardless of the spatial index internals.
pub struct NodeLocator {
    tree: KdTree<f64, usize, [f64; 2]>,
}

impl Default for NodeLocator {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeLocator {
    pub fn new() -> Self {
        Self {
            tree: KdTree::new(2),
        }
    }

    pub fn resolve(
        &mut self,
        graph: &mut RailwayGraph,
        point: Coord,
        tolerance_m: f64,
        config: &PipelineConfig,
    ) -> usize {
        let coords = [point.x, point.y];

        if graph.node_count() > 0 {
            let candidates = self
                .tree
                .within(&coords, tolerance_m * tolerance_m, &squared_euclidean)
                .expect("finite 2d query point");
            let mut nearest: Option<(f64, usize)> = None;
            for (squared, &index) in candidates {
                if squared >= tolerance_m * tolerance_m {
                    continue;
                }
                let better = match nearest {
                    None => true,
                    Some((best, best_index)) => {
                        squared < best || (squared == best && index < best_index)
                    }
                };
                if better {
                    nearest = Some((squared, index));
                }
            }
            if let Some((_, index)) = nearest {
                return index;
            }
        }

        let id = format!("n{}", graph.node_count());
        let (lon, lat) = config.projection.inverse(point.x, point.y);
        let index = graph.push_node(Node {
            id,
            position: point,
            lat,
            lon,
        });
        self.tree
            .add(coords, index)
            .expect("finite 2d node position");
        index
    }
}

/// Does the record's projected bbox, taken back to lat/lon, intersect the
/// accept rectangle?
///
/// The comparison is in geographic coordinates because latitude lines curve
/// in the projected frame, which makes projected-frame rectangle tests
/// unreliable near the projection edges.
fn accepts_bbox(bbox: &[f64; 4], config: &PipelineConfig) -> bool {
    let (sw_lon, sw_lat) = config.projection.inverse(bbox[0], bbox[1]);
    let (ne_lon, ne_lat) = config.projection.inverse(bbox[2], bbox[3]);

    sw_lon < config.accept_bounds.max_lon
        && ne_lon > config.accept_bounds.min_lon
        && sw_lat < config.accept_bounds.max_lat
        && ne_lat > config.accept_bounds.min_lat
}

/// Pass 1: junction points, where vertices of two or more distinct polylines
/// fall into the same grid cell
///
/// The representative location of a cell is the first original vertex that
/// mapped into it.
fn find_junction_points(accepted: &[&TrackRecord], config: &PipelineConfig) -> Vec<Coord> {
    struct Cell {
        polylines: usize,
        last_polyline: usize,
        first_vertex: Coord,
    }

    let cell_size = config.junction_grid_m;
    let mut grid: HashMap<(i64, i64), Cell> = HashMap::new();

    for (polyline, record) in accepted.iter().enumerate() {
        for point in &record.points {
            let key = (
                (point[0] / cell_size).round() as i64,
                (point[1] / cell_size).round() as i64,
            );
            grid.entry(key)
                .and_modify(|cell| {
                    if cell.last_polyline != polyline {
                        cell.polylines += 1;
                        cell.last_polyline = polyline;
                    }
                })
                .or_insert(Cell {
                    polylines: 1,
                    last_polyline: polyline,
                    first_vertex: Coord {
                        x: point[0],
                        y: point[1],
                    },
                });
        }
    }

    let mut junctions: Vec<Coord> = grid
        .into_values()
        .filter(|cell| cell.polylines > 1)
        .map(|cell| cell.first_vertex)
        .collect();
    junctions.sort_by(|a, b| a.x.total_cmp(&b.x).then(a.y.total_cmp(&b.y)));
    junctions
}

fn is_junction_point(point: Coord, junctions: &[Coord], tolerance_m: f64) -> bool {
    junctions
        .iter()
        .any(|junction| crate::graph::euclidean_m(point, *junction) < tolerance_m)
}

/// Pass 2: split a polyline at every interior vertex that sits on a junction
///
/// Each emitted segment includes the junction vertex as its last point, and
/// the next segment starts at that same vertex, so no track length is lost.
/// The first and last vertices always terminate segments.
fn split_at_junctions(points: &[Coord], junctions: &[Coord], tolerance_m: f64) -> Vec<Vec<Coord>> {
    if points.len() < 2 {
        return Vec::new();
    }

    let mut segments = Vec::new();
    let mut current = vec![points[0]];

    for (i, &point) in points.iter().enumerate().skip(1) {
        current.push(point);

        let interior = i < points.len() - 1;
        if interior && is_junction_point(point, junctions, tolerance_m) {
            segments.push(current);
            current = vec![point];
        }
    }

    if current.len() >= 2 {
        segments.push(current);
    }

    segments
}

/// Build the network graph from polyline records
pub fn build_network(
    records: impl IntoIterator<Item = TrackRecord>,
    config: &PipelineConfig,
) -> (RailwayGraph, BuildStats) {
    let records: Vec<TrackRecord> = records.into_iter().collect();
    let accepted_mask: Vec<bool> = records
        .iter()
        .map(|record| {
            record
                .bbox
                .as_ref()
                .is_some_and(|bbox| accepts_bbox(bbox, config))
        })
        .collect();

    let accepted: Vec<&TrackRecord> = records
        .iter()
        .zip(&accepted_mask)
        .filter_map(|(record, &keep)| keep.then_some(record))
        .collect();

    info!("Finding junction points across {} polylines", accepted.len());
    let junctions = find_junction_points(&accepted, config);
    info!("Found {} junction points", junctions.len());

    let mut graph = RailwayGraph::new();
    let mut locator = NodeLocator::new();
    let mut stats = BuildStats::default();

    for (record, &keep) in records.iter().zip(&accepted_mask) {
        stats.total_segments += 1;

        if record.bbox.is_none() {
            stats.degenerate += 1;
            continue;
        }
        if !keep {
            continue;
        }
        stats.sk_segments += 1;

        let original_length_m = record.attrs.length.unwrap_or(0.0);
        let built_year = record.attrs.built_year.unwrap_or(0);
        let abandoned_year = record.attrs.abandoned_year.unwrap_or(0);
        let builder_code = record.attrs.builder_code.trim().to_string();

        stats.total_length_m += original_length_m;
        stats
            .by_builder
            .entry(builder_code.clone())
            .or_default()
            .record(original_length_m);
        if built_year != 0 {
            stats
                .by_decade
                .entry((built_year / 10) * 10)
                .or_default()
                .record(original_length_m);
        }

        if record.points.len() < 2 {
            stats.degenerate += 1;
            continue;
        }
        let points: Vec<Coord> = record
            .points
            .iter()
            .map(|&[x, y]| Coord { x, y })
            .collect();

        let mut segments = split_at_junctions(&points, &junctions, config.junction_tolerance_m);
        if segments.is_empty() {
            segments = vec![points];
        }

        for segment in segments {
            if segment.len() < 2 {
                continue;
            }

            let start =
                locator.resolve(&mut graph, segment[0], config.snap_tolerance_m, config);
            let end = locator.resolve(
                &mut graph,
                *segment.last().expect("segment has >= 2 points"),
                config.snap_tolerance_m,
                config,
            );

            if start == end {
                stats.self_loops += 1;
                continue;
            }

            let length_m = RailwayGraph::polyline_length_m(&segment);
            let edge = Edge {
                source: start,
                target: end,
                length_m,
                length_km: round2(length_m / 1000.0),
                built_year,
                abandoned_year,
                builder_code: builder_code.clone(),
                builder_name: config.builder_name(&builder_code),
                points: LineString::from(segment),
            };

            // Parallel edges collapse to the shorter of the two
            match graph.find_edge(start, end) {
                Some(existing) if edge.length_m < graph.edge(existing).length_m => {
                    debug!(
                        "Replacing {} -> {} with a shorter segment ({:.1}m)",
                        graph.node(start).id,
                        graph.node(end).id,
                        edge.length_m
                    );
                    graph.replace_edge(existing, edge);
                }
                Some(_) => {}
                None => {
                    graph.push_edge(edge);
                }
            }
        }
    }

    info!(
        "Accepted {}/{} records ({} degenerate, {} self-loop segments discarded)",
        stats.sk_segments, stats.total_segments, stats.degenerate, stats.self_loops
    );
    graph.log_analysis();

    (graph, stats)
}

/// Assemble the persisted `railway_network` artifact
pub fn network_artifact(
    graph: &RailwayGraph,
    stats: &BuildStats,
    config: &PipelineConfig,
) -> RailwayNetwork {
    let nodes = graph
        .nodes()
        .iter()
        .map(|node| NetworkNode {
            id: node.id.clone(),
            x: node.position.x,
            y: node.position.y,
            lat: round6(node.lat),
            lon: round6(node.lon),
        })
        .collect::<Vec<_>>();

    let edges = graph
        .edges()
        .iter()
        .map(|edge| NetworkEdge {
            source: graph.node(edge.source).id.clone(),
            target: graph.node(edge.target).id.clone(),
            length_m: round1(edge.length_m),
            length_km: edge.length_km,
            built_year: edge.built_year,
            abandoned_year: edge.abandoned_year,
            builder_code: edge.builder_code.clone(),
            builder_name: edge.builder_name.clone(),
        })
        .collect::<Vec<_>>();

    RailwayNetwork {
        metadata: NetworkMetadata {
            description: config.description.clone(),
            source: config.source.clone(),
            projection: config.projection_name.clone(),
            units: config.units.clone(),
            snap_tolerance_m: config.snap_tolerance_m,
        },
        stats: NetworkStats {
            sk_segments: stats.sk_segments,
            total_length_km: round1(stats.total_length_m / 1000.0),
            node_count: nodes.len(),
            edge_count: edges.len(),
            by_builder: stats
                .by_builder
                .iter()
                .map(|(code, counts)| {
                    (
                        code.clone(),
                        CountLength {
                            count: counts.count,
                            length_km: round1(counts.length_m / 1000.0),
                        },
                    )
                })
                .collect(),
            by_decade: stats
                .by_decade
                .iter()
                .map(|(decade, counts)| {
                    (
                        *decade,
                        CountLength {
                            count: counts.count,
                            length_km: round1(counts.length_m / 1000.0),
                        },
                    )
                })
                .collect(),
        },
        nodes,
        edges,
    }
}

/// Assemble the persisted `railway_tracks` artifact with full edge geometry
pub fn tracks_artifact(graph: &RailwayGraph, config: &PipelineConfig) -> RailwayTracks {
    let tracks = graph
        .edges()
        .iter()
        .map(|edge| Track {
            source: graph.node(edge.source).id.clone(),
            target: graph.node(edge.target).id.clone(),
            coordinates: edge
                .points
                .coords()
                .map(|coord| {
                    let (lon, lat) = config.projection.inverse(coord.x, coord.y);
                    [round6(lon), round6(lat)]
                })
                .collect(),
            built_year: edge.built_year,
            abandoned_year: edge.abandoned_year,
            builder_name: edge.builder_name.clone(),
            length_km: edge.length_km,
        })
        .collect::<Vec<_>>();

    RailwayTracks {
        metadata: TracksMetadata {
            description: "Railway track geometries for route rendering".to_string(),
            source: config.source.clone(),
        },
        track_count: tracks.len(),
        tracks,
    }
}

#[cfg(test)]
mod tests {
    use float_cmp::assert_approx_eq;
    use pretty_assertions::assert_eq;

    use super::*;

    /// Records positioned inside the accept rectangle: the projected frame
    /// around (-105, 52) is roughly (-700km, 350km)
    fn base() -> (f64, f64) {
        let config = PipelineConfig::default();
        config.projection.forward(-105.0, 52.0)
    }

    fn record(points: Vec<[f64; 2]>, builder_code: &str) -> TrackRecord {
        let xs: Vec<f64> = points.iter().map(|p| p[0]).collect();
        let ys: Vec<f64> = points.iter().map(|p| p[1]).collect();
        let bbox = [
            xs.iter().cloned().fold(f64::INFINITY, f64::min),
            ys.iter().cloned().fold(f64::INFINITY, f64::min),
            xs.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
            ys.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
        ];
        TrackRecord {
            bbox: Some(bbox),
            points,
            attrs: crate::io::TrackAttrs {
                length: Some(1000.0),
                built_year: Some(1905),
                abandoned_year: Some(0),
                builder_code: builder_code.to_string(),
            },
        }
    }

    #[test]
    fn test_parallel_tracks_stay_separate() {
        let config = PipelineConfig::default();
        let (x, y) = base();
        // Two parallel polylines 10m apart laterally, endpoints offset 600m
        // lengthwise so endpoint snapping cannot fuse them
        let records = vec![
            record(vec![[x, y], [x + 5000.0, y]], "1"),
            record(vec![[x + 600.0, y + 10.0], [x + 5600.0, y + 10.0]], "2"),
        ];
        let (graph, stats) = build_network(records, &config);

        assert_eq!(stats.sk_segments, 2);
        assert_eq!(graph.node_count(), 4);
        assert_eq!(graph.edge_count(), 2);
    }

    #[test]
    fn test_shared_interior_vertex_splits_both_polylines() {
        let config = PipelineConfig::default();
        let (x, y) = base();
        let center = [x + 5000.0, y + 5000.0];
        let records = vec![
            record(vec![[x, y], center, [x + 10_000.0, y]], "1"),
            record(
                vec![[x, y + 10_000.0], center, [x + 10_000.0, y + 10_000.0]],
                "2",
            ),
        ];
        let (graph, _) = build_network(records, &config);

        // Four segments meeting at one shared junction node
        assert_eq!(graph.edge_count(), 4);
        assert_eq!(graph.node_count(), 5);

        let center_index = graph
            .nodes()
            .iter()
            .position(|n| n.position.x == center[0] && n.position.y == center[1])
            .expect("junction node exists");
        let degree = graph
            .edges()
            .iter()
            .filter(|e| e.source == center_index || e.target == center_index)
            .count();
        assert_eq!(degree, 4);
    }

    #[test]
    fn test_near_loop_collapses_to_discarded_self_loop() {
        let config = PipelineConfig::default();
        let (x, y) = base();
        // Endpoints 400m apart: both resolve to the same node at the default
        // 500m snap tolerance, so the segment is a self-loop and is dropped
        let records = vec![record(
            vec![[x, y], [x + 5000.0, y], [x + 5000.0, y + 5000.0], [x, y + 400.0]],
            "1",
        )];
        let (graph, stats) = build_network(records, &config);

        assert_eq!(stats.self_loops, 1);
        assert_eq!(graph.node_count(), 1);
        assert_eq!(graph.edge_count(), 0);
    }

    #[test]
    fn test_edge_length_is_polyline_length_not_straight_line() {
        let config = PipelineConfig::default();
        let (x, y) = base();
        // An L: 5km east then 5km north; straight-line would be ~7.07km
        let records = vec![record(
            vec![[x, y], [x + 5000.0, y], [x + 5000.0, y + 5000.0]],
            "1",
        )];
        let (graph, _) = build_network(records, &config);

        assert_eq!(graph.edge_count(), 1);
        assert_approx_eq!(f64, graph.edge(0).length_m, 10_000.0, epsilon = 1e-6);
    }

    #[test]
    fn test_duplicate_edge_keeps_the_shorter_segment() {
        let config = PipelineConfig::default();
        let (x, y) = base();
        let records = vec![
            // A detour and a direct line between the same endpoints
            record(
                vec![[x, y], [x + 2500.0, y + 4000.0], [x + 5000.0, y]],
                "1",
            ),
            record(vec![[x, y], [x + 5000.0, y]], "2"),
        ];
        let (graph, _) = build_network(records, &config);

        assert_eq!(graph.edge_count(), 1);
        assert_approx_eq!(f64, graph.edge(0).length_m, 5000.0, epsilon = 1e-6);
        assert_eq!(graph.edge(0).builder_code, "2");
        assert_eq!(graph.edge(0).builder_name, "CNR");
    }

    #[test]
    fn test_degenerate_records_are_counted_not_fatal() {
        let config = PipelineConfig::default();
        let (x, y) = base();
        let mut null_bbox = record(vec![[x, y], [x + 1000.0, y]], "1");
        null_bbox.bbox = None;
        let single_point = record(vec![[x, y + 2000.0]], "1");
        let records = vec![
            null_bbox,
            single_point,
            record(vec![[x, y + 4000.0], [x + 1000.0, y + 4000.0]], "1"),
        ];
        let (graph, stats) = build_network(records, &config);

        assert_eq!(stats.total_segments, 3);
        assert_eq!(stats.degenerate, 2);
        assert_eq!(graph.edge_count(), 1);
    }

    #[test]
    fn test_out_of_bounds_records_are_filtered_geographically() {
        let config = PipelineConfig::default();
        // Manitoba, east of the accept rectangle
        let (x, y) = config.projection.forward(-98.0, 52.0);
        let (in_x, in_y) = base();
        let records = vec![
            record(vec![[x, y], [x + 1000.0, y]], "1"),
            record(vec![[in_x, in_y], [in_x + 1000.0, in_y]], "1"),
        ];
        let (graph, stats) = build_network(records, &config);

        assert_eq!(stats.total_segments, 2);
        assert_eq!(stats.sk_segments, 1);
        assert_eq!(graph.edge_count(), 1);
    }

    #[test]
    fn test_junction_split_preserves_total_length() {
        let config = PipelineConfig::default();
        let (x, y) = base();
        let center = [x + 5000.0, y + 5000.0];
        let records = vec![
            record(vec![[x, y], center, [x + 10_000.0, y]], "1"),
            record(
                vec![[x, y + 10_000.0], center, [x + 10_000.0, y + 10_000.0]],
                "2",
            ),
        ];
        let (graph, _) = build_network(records, &config);

        let split_total: f64 = graph.edges().iter().map(|e| e.length_m).sum();
        let original_total = 4.0 * (5000.0f64.powi(2) + 5000.0f64.powi(2)).sqrt();
        assert_approx_eq!(f64, split_total, original_total, epsilon = 1e-6);
    }

    #[test]
    fn test_builder_invariants_hold() {
        let config = PipelineConfig::default();
        let (x, y) = base();
        let center = [x + 5000.0, y + 5000.0];
        let records = vec![
            record(vec![[x, y], center, [x + 10_000.0, y]], "1"),
            record(
                vec![[x, y + 10_000.0], center, [x + 10_000.0, y + 10_000.0]],
                "49A",
            ),
            record(vec![[x + 600.0, y + 10.0], [x + 5600.0, y + 10.0]], "99"),
        ];
        let (graph, _) = build_network(records, &config);

        for edge in graph.edges() {
            // No self-loops
            assert_ne!(edge.source, edge.target);

            // length_m is the Euclidean sum over the stored geometry
            let coords: Vec<Coord> = edge.points.coords().copied().collect();
            let recomputed = RailwayGraph::polyline_length_m(&coords);
            assert!((edge.length_m - recomputed).abs() < 0.1);

            // Geometry endpoints lie within the snap tolerance of the nodes
            let first = *coords.first().unwrap();
            let last = *coords.last().unwrap();
            let u = graph.node(edge.source).position;
            let v = graph.node(edge.target).position;
            let direct = crate::graph::euclidean_m(first, u).max(crate::graph::euclidean_m(last, v));
            let swapped =
                crate::graph::euclidean_m(first, v).max(crate::graph::euclidean_m(last, u));
            assert!(direct.min(swapped) < config.snap_tolerance_m);
        }

        // Unknown builder codes pass through unchanged; known are aliased
        let names: Vec<&str> = graph
            .edges()
            .iter()
            .map(|e| e.builder_name.as_str())
            .collect();
        assert!(names.contains(&"CPR"));
        assert!(names.contains(&"GTP Branch"));
        assert!(names.contains(&"99"));
    }

    #[test]
    fn test_artifact_rounding_and_stats() {
        let config = PipelineConfig::default();
        let (x, y) = base();
        let records = vec![record(vec![[x, y], [x + 1234.567, y]], "1")];
        let (graph, stats) = build_network(records, &config);

        let network = network_artifact(&graph, &stats, &config);
        assert_eq!(network.stats.sk_segments, 1);
        assert_eq!(network.stats.node_count, 2);
        assert_eq!(network.stats.edge_count, 1);
        assert_approx_eq!(f64, network.edges[0].length_m, 1234.6);
        assert_approx_eq!(f64, network.edges[0].length_km, 1.23);
        assert_eq!(network.stats.by_decade.get(&1900).map(|d| d.count), Some(1));

        let tracks = tracks_artifact(&graph, &config);
        assert_eq!(tracks.track_count, 1);
        assert_eq!(tracks.tracks[0].coordinates.len(), 2);
        // Track coordinates are geographic and inside the accept rectangle
        for &[lon, lat] in &tracks.tracks[0].coordinates {
            assert!(config.accept_bounds.contains(lon, lat));
        }
    }
}
