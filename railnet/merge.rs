//! Integrate a second polyline dataset (delivered in geographic coordinates,
//! possibly under a different datum) into an existing network without
//! producing parallel duplicates or floating subgraphs.
//!
//! The incoming data arrives as many short segments that together form a few
//! continuous lines, so segments are first stitched into chains, then each
//! chain's endpoints are resolved against the existing graph with a generous
//! great-circle tolerance that absorbs the datum offset.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use geo::Coord;
use tracing::{debug, info, warn};

use crate::config::{PipelineConfig, VIRTUAL_BUILDER_CODE, VIRTUAL_BUILDER_NAME};
use crate::graph::{RailwayGraph, haversine_m};
use crate::io::{
    CountLength, MergeRecord, NetworkEdge, NetworkNode, RailwayNetwork, RailwayTracks, Track,
    round1, round2, round6,
};

/// A maximal run of input segments stitched together end to end
#[derive(Debug, Clone, PartialEq)]
pub struct Chain {
    pub operator: String,
    pub subdivision: String,
    pub classification: String,
    /// [lon, lat] pairs
    pub coordinates: Vec<[f64; 2]>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MergeReport {
    pub chains: usize,
    pub junctions_matched: usize,
    pub new_nodes: usize,
    pub new_edges: usize,
    pub virtual_edges: usize,
}

/// Is this record one we merge at all?
pub fn accept_record(record: &MergeRecord, config: &PipelineConfig) -> bool {
    if !config.merge_operators.contains(&record.operator) {
        return false;
    }
    let classification = record.classification.as_deref().unwrap_or("Unknown");
    if !config.merge_classifications.contains(classification) {
        return false;
    }
    record.coordinates.len() >= 2
}

enum EndpointKind {
    Start,
    End,
}

/// Find an unused segment with an endpoint within tolerance of `point`
fn find_nearby_endpoint(
    point: [f64; 2],
    segments: &[MergeRecord],
    used: &[bool],
    tolerance_m: f64,
) -> Option<(usize, EndpointKind)> {
    for (i, segment) in segments.iter().enumerate() {
        if used[i] {
            continue;
        }
        let start = segment.coordinates[0];
        if haversine_m((point[0], point[1]), (start[0], start[1])) < tolerance_m {
            return Some((i, EndpointKind::Start));
        }
        let end = segment.coordinates[segment.coordinates.len() - 1];
        if haversine_m((point[0], point[1]), (end[0], end[1])) < tolerance_m {
            return Some((i, EndpointKind::End));
        }
    }
    None
}

/// Stitch the incoming segments into continuous chains, grouped by operator
///
/// Pass one grows each chain by repeatedly searching for any unused segment
/// with an endpoint near either end of the growing chain; pass two joins the
/// resulting chains to each other under the same tolerance. Reversed
/// segments are flipped to fit, and the shared point at each joint is
/// dropped so no zero-length sub-segment appears.
pub fn assemble_chains(records: Vec<MergeRecord>, config: &PipelineConfig) -> Vec<Chain> {
    let mut by_operator: BTreeMap<String, Vec<MergeRecord>> = BTreeMap::new();
    for record in records {
        by_operator.entry(record.operator.clone()).or_default().push(record);
    }

    let tolerance = config.merge_tolerance_m;
    let mut all_chains = Vec::new();

    for (operator, segments) in by_operator {
        debug!("Stitching {}: {} segments", operator, segments.len());
        let mut used = vec![false; segments.len()];
        let mut chains: Vec<Chain> = Vec::new();

        for i in 0..segments.len() {
            if used[i] {
                continue;
            }

            let mut coordinates = segments[i].coordinates.clone();
            let mut subdivisions: BTreeSet<String> =
                [segments[i].subdivision.clone().unwrap_or_else(|| "Unknown".to_string())]
                    .into();
            let mut classifications: BTreeSet<String> =
                [segments[i].classification.clone().unwrap_or_else(|| "Unknown".to_string())]
                    .into();
            used[i] = true;

            // Grow from the tail
            while let Some((j, kind)) =
                find_nearby_endpoint(*coordinates.last().unwrap(), &segments, &used, tolerance)
            {
                let mut addition = segments[j].coordinates.clone();
                if matches!(kind, EndpointKind::End) {
                    addition.reverse();
                }
                coordinates.extend(addition.into_iter().skip(1));
                subdivisions
                    .insert(segments[j].subdivision.clone().unwrap_or_else(|| "Unknown".to_string()));
                classifications.insert(
                    segments[j].classification.clone().unwrap_or_else(|| "Unknown".to_string()),
                );
                used[j] = true;
            }

            // Grow from the head
            while let Some((j, kind)) =
                find_nearby_endpoint(coordinates[0], &segments, &used, tolerance)
            {
                let mut addition = segments[j].coordinates.clone();
                if matches!(kind, EndpointKind::Start) {
                    addition.reverse();
                }
                addition.pop();
                addition.extend(coordinates);
                coordinates = addition;
                subdivisions
                    .insert(segments[j].subdivision.clone().unwrap_or_else(|| "Unknown".to_string()));
                classifications.insert(
                    segments[j].classification.clone().unwrap_or_else(|| "Unknown".to_string()),
                );
                used[j] = true;
            }

            let classification = if classifications.contains("Main") {
                "Main".to_string()
            } else {
                classifications.iter().next().cloned().unwrap_or_default()
            };
            chains.push(Chain {
                operator: operator.clone(),
                subdivision: itertools::join(&subdivisions, ", "),
                classification,
                coordinates,
            });
        }

        debug!("  {} initial chains", chains.len());
        let merged = join_chains(chains, tolerance);
        info!("{}: merged into {} chains", operator, merged.len());
        all_chains.extend(merged);
    }

    all_chains
}

/// Second stitching pass: join whole chains whose endpoints are near
fn join_chains(chains: Vec<Chain>, tolerance_m: f64) -> Vec<Chain> {
    let mut used = vec![false; chains.len()];
    let mut joined = Vec::new();

    for i in 0..chains.len() {
        if used[i] {
            continue;
        }

        let mut coordinates = chains[i].coordinates.clone();
        let mut subdivisions: BTreeSet<String> = chains[i]
            .subdivision
            .split(", ")
            .map(String::from)
            .collect();
        used[i] = true;

        let mut changed = true;
        while changed {
            changed = false;
            let head = coordinates[0];
            let tail = coordinates[coordinates.len() - 1];

            for (j, other) in chains.iter().enumerate() {
                if used[j] {
                    continue;
                }
                let other_head = other.coordinates[0];
                let other_tail = other.coordinates[other.coordinates.len() - 1];

                let attach = if haversine_m((tail[0], tail[1]), (other_head[0], other_head[1]))
                    < tolerance_m
                {
                    coordinates.extend(other.coordinates.iter().copied().skip(1));
                    true
                } else if haversine_m((tail[0], tail[1]), (other_tail[0], other_tail[1]))
                    < tolerance_m
                {
                    coordinates.extend(other.coordinates.iter().rev().copied().skip(1));
                    true
                } else if haversine_m((head[0], head[1]), (other_tail[0], other_tail[1]))
                    < tolerance_m
                {
                    let mut prefix = other.coordinates.clone();
                    prefix.pop();
                    prefix.extend(coordinates);
                    coordinates = prefix;
                    true
                } else if haversine_m((head[0], head[1]), (other_head[0], other_head[1]))
                    < tolerance_m
                {
                    let mut prefix: Vec<[f64; 2]> =
                        other.coordinates.iter().rev().copied().collect();
                    prefix.pop();
                    prefix.extend(coordinates);
                    coordinates = prefix;
                    true
                } else {
                    false
                };

                if attach {
                    subdivisions.extend(other.subdivision.split(", ").map(String::from));
                    used[j] = true;
                    changed = true;
                    break;
                }
            }
        }

        joined.push(Chain {
            operator: chains[i].operator.clone(),
            subdivision: itertools::join(&subdivisions, ", "),
            classification: chains[i].classification.clone(),
            coordinates,
        });
    }

    joined
}

/// Integrate assembled chains into the persisted network and tracks
///
/// `dataset_label` is appended to the artifacts' source metadata.
pub fn merge_into(
    network: &mut RailwayNetwork,
    tracks: &mut RailwayTracks,
    chains: &[Chain],
    dataset_label: &str,
    config: &PipelineConfig,
) -> eyre::Result<MergeReport> {
    if network.nodes.is_empty() {
        eyre::bail!("Cannot merge into an empty network: no main component exists");
    }

    let mut report = MergeReport {
        chains: chains.len(),
        ..MergeReport::default()
    };

    let original_ids: BTreeSet<String> = network.nodes.iter().map(|n| n.id.clone()).collect();
    let mut next_node_num = network
        .nodes
        .iter()
        .filter_map(|n| n.id.strip_prefix('n'))
        .filter_map(|digits| digits.parse::<usize>().ok())
        .map(|n| n + 1)
        .max()
        .unwrap_or(0);

    // Exact-coordinate reuse of endpoints already seen, at 5-decimal precision
    let coord_key = |lon: f64, lat: f64| {
        (
            (lon * 100_000.0).round() as i64,
            (lat * 100_000.0).round() as i64,
        )
    };
    let mut coord_to_node: HashMap<(i64, i64), String> = network
        .nodes
        .iter()
        .map(|n| (coord_key(n.lon, n.lat), n.id.clone()))
        .collect();

    let mut new_nodes: Vec<NetworkNode> = Vec::new();
    let mut new_edges: Vec<NetworkEdge> = Vec::new();
    let mut new_tracks: Vec<Track> = Vec::new();

    for chain in chains {
        if chain.coordinates.len() < 2 {
            continue;
        }

        let mut resolve = |lon: f64,
                           lat: f64,
                           new_nodes: &mut Vec<NetworkNode>,
                           report: &mut MergeReport| {
            if let Some(id) = coord_to_node.get(&coord_key(lon, lat)) {
                return id.clone();
            }

            // Junction detection against the pre-merge network, great-circle
            // because the datasets disagree on datum
            for node in &network.nodes {
                let dist = haversine_m((lon, lat), (node.lon, node.lat));
                if dist < config.junction_tolerance_m {
                    report.junctions_matched += 1;
                    debug!(
                        "Junction: {} endpoint -> {} ({:.0}m)",
                        chain.operator, node.id, dist
                    );
                    return node.id.clone();
                }
            }

            let id = format!("n{next_node_num}");
            next_node_num += 1;
            let (x, y) = config.projection.forward(lon, lat);
            new_nodes.push(NetworkNode {
                id: id.clone(),
                x,
                y,
                lat: round6(lat),
                lon: round6(lon),
            });
            coord_to_node.insert(coord_key(lon, lat), id.clone());
            id
        };

        let [start_lon, start_lat] = chain.coordinates[0];
        let source = resolve(start_lon, start_lat, &mut new_nodes, &mut report);
        let [end_lon, end_lat] = chain.coordinates[chain.coordinates.len() - 1];
        let target = resolve(end_lon, end_lat, &mut new_nodes, &mut report);

        if source == target {
            continue;
        }

        // Merge never displaces topology that is already there
        let exists = network
            .edges
            .iter()
            .chain(&new_edges)
            .any(|e| {
                (e.source == source && e.target == target)
                    || (e.source == target && e.target == source)
            });
        if exists {
            continue;
        }

        let projected: Vec<Coord> = chain
            .coordinates
            .iter()
            .map(|&[lon, lat]| {
                let (x, y) = config.projection.forward(lon, lat);
                Coord { x, y }
            })
            .collect();
        let length_m = RailwayGraph::polyline_length_m(&projected);

        new_edges.push(NetworkEdge {
            source: source.clone(),
            target: target.clone(),
            length_m: round1(length_m),
            length_km: round2(length_m / 1000.0),
            built_year: 0,
            abandoned_year: 0,
            builder_code: chain.operator.clone(),
            builder_name: chain.operator.clone(),
        });
        new_tracks.push(Track {
            source,
            target,
            coordinates: chain
                .coordinates
                .iter()
                .map(|&[lon, lat]| [round6(lon), round6(lat)])
                .collect(),
            built_year: 0,
            abandoned_year: 0,
            builder_name: chain.operator.clone(),
            length_km: round2(length_m / 1000.0),
        });
    }

    if new_edges.is_empty() {
        info!("No new edges to add; artifacts left unchanged");
        return Ok(report);
    }

    report.new_nodes = new_nodes.len();
    report.new_edges = new_edges.len();
    info!(
        "Integrated {} chains: {} junction matches, {} new nodes, {} new edges",
        report.chains, report.junctions_matched, report.new_nodes, report.new_edges
    );

    let (virtual_edges, virtual_tracks) =
        connect_floating_components(network, &new_nodes, &new_edges, &original_ids, config);
    report.virtual_edges = virtual_edges.len();

    // Fold everything into the artifacts
    let mut by_operator: BTreeMap<String, CountLength> = BTreeMap::new();
    for edge in &new_edges {
        let entry = by_operator.entry(edge.builder_code.clone()).or_insert(CountLength {
            count: 0,
            length_km: 0.0,
        });
        entry.count += 1;
        entry.length_km += edge.length_km;
    }
    for (operator, counts) in by_operator {
        network.stats.by_builder.insert(
            operator,
            CountLength {
                count: counts.count,
                length_km: round1(counts.length_km),
            },
        );
    }

    network.nodes.extend(new_nodes);
    network.edges.extend(new_edges);
    network.edges.extend(virtual_edges);
    network.stats.node_count = network.nodes.len();
    network.stats.edge_count = network.edges.len();
    network.metadata.source = format!("{} + {dataset_label}", network.metadata.source);

    tracks.tracks.extend(new_tracks);
    tracks.tracks.extend(virtual_tracks);
    tracks.track_count = tracks.tracks.len();
    tracks.metadata.source = format!("{} + {dataset_label}", tracks.metadata.source);

    Ok(report)
}

/// Attach every component that contains no pre-merge node to the main
/// component with a virtual edge between the geodesically closest node pair
///
/// A floating component is a real shortline whose connection to the mainline
/// exists in reality but is absent from both source datasets, so the virtual
/// edge carries the honest geodesic length and is visible to routing.
fn connect_floating_components(
    network: &RailwayNetwork,
    new_nodes: &[NetworkNode],
    new_edges: &[NetworkEdge],
    original_ids: &BTreeSet<String>,
    config: &PipelineConfig,
) -> (Vec<NetworkEdge>, Vec<Track>) {
    let all_edges: Vec<&NetworkEdge> = network.edges.iter().chain(new_edges).collect();

    // Union-find over node ids, indexed by first appearance in the edge list
    let mut id_index: HashMap<&str, usize> = HashMap::new();
    let mut ids: Vec<&str> = Vec::new();
    for edge in &all_edges {
        for id in [edge.source.as_str(), edge.target.as_str()] {
            if !id_index.contains_key(id) {
                id_index.insert(id, ids.len());
                ids.push(id);
            }
        }
    }
    let mut parent: Vec<usize> = (0..ids.len()).collect();
    fn find(parent: &mut Vec<usize>, x: usize) -> usize {
        let mut root = x;
        while parent[root] != root {
            root = parent[root];
        }
        let mut current = x;
        while parent[current] != root {
            let next = parent[current];
            parent[current] = root;
            current = next;
        }
        root
    }
    for edge in &all_edges {
        let a = find(&mut parent, id_index[edge.source.as_str()]);
        let b = find(&mut parent, id_index[edge.target.as_str()]);
        if a != b {
            parent[a] = b;
        }
    }

    let mut components: BTreeMap<usize, BTreeSet<String>> = BTreeMap::new();
    for (index, id) in ids.iter().enumerate() {
        let root = find(&mut parent, index);
        components.entry(root).or_default().insert(id.to_string());
    }
    let components: Vec<BTreeSet<String>> = components.into_values().collect();
    info!("Found {} connected components", components.len());

    // The main component is the largest one containing any pre-merge node
    let mut main_component: Option<BTreeSet<String>> = None;
    let mut floating: Vec<BTreeSet<String>> = Vec::new();
    for component in components {
        if component.intersection(original_ids).next().is_some() {
            match &main_component {
                Some(main) if component.len() <= main.len() => floating.push(component),
                _ => {
                    if let Some(previous) = main_component.take() {
                        floating.push(previous);
                    }
                    main_component = Some(component);
                }
            }
        } else {
            floating.push(component);
        }
    }

    let Some(mut main_component) = main_component else {
        warn!("No main component found; floating components left unattached");
        return (Vec::new(), Vec::new());
    };
    info!(
        "Main component has {} nodes; {} floating components to connect",
        main_component.len(),
        floating.len()
    );

    let positions: HashMap<&str, (f64, f64)> = network
        .nodes
        .iter()
        .chain(new_nodes)
        .map(|n| (n.id.as_str(), (n.lon, n.lat)))
        .collect();

    let mut virtual_edges = Vec::new();
    let mut virtual_tracks = Vec::new();

    for component in floating {
        let mut best: Option<(f64, String, String)> = None;
        for floating_id in &component {
            let Some(&floating_pos) = positions.get(floating_id.as_str()) else {
                continue;
            };
            for main_id in &main_component {
                let Some(&main_pos) = positions.get(main_id.as_str()) else {
                    continue;
                };
                let dist = haversine_m(floating_pos, main_pos);
                if best.as_ref().is_none_or(|(best_dist, _, _)| dist < *best_dist) {
                    best = Some((dist, main_id.clone(), floating_id.clone()));
                }
            }
        }

        let Some((dist_m, main_id, floating_id)) = best else {
            continue;
        };
        info!(
            "Connecting {floating_id} -> {main_id} ({:.1}km)",
            dist_m / 1000.0
        );

        virtual_edges.push(NetworkEdge {
            source: main_id.clone(),
            target: floating_id.clone(),
            length_m: round1(dist_m),
            length_km: round2(dist_m / 1000.0),
            built_year: 0,
            abandoned_year: 0,
            builder_code: VIRTUAL_BUILDER_CODE.to_string(),
            builder_name: VIRTUAL_BUILDER_NAME.to_string(),
        });
        let main_pos = positions[main_id.as_str()];
        let floating_pos = positions[floating_id.as_str()];
        virtual_tracks.push(Track {
            source: main_id,
            target: floating_id,
            coordinates: vec![
                [main_pos.0, main_pos.1],
                [floating_pos.0, floating_pos.1],
            ],
            built_year: 0,
            abandoned_year: 0,
            builder_name: VIRTUAL_BUILDER_NAME.to_string(),
            length_km: round2(dist_m / 1000.0),
        });

        // Later floating components may attach through this one
        main_component.extend(component);
    }

    (virtual_edges, virtual_tracks)
}
