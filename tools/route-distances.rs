use std::collections::BTreeMap;
use std::path::PathBuf;

use clap::Parser;
use railnet::config::PipelineConfig;
use railnet::graph::RailwayGraph;
use railnet::io::{
    RailwayNetwork, SettlementConnections, SettlementMapping, get_output_writer, read_artifact,
    round1, write_artifact,
};
use railnet::route::{DistanceCase, pair_distance};
use railnet::snap::SnapRecord;

/// Calculate railway distances between connected settlements
///
/// Walks the settlement_connections pair table, computes the shortest
/// in-network distance for every unordered pair, and writes the connections
/// back with railway_distance_km filled in on both directions.
#[derive(Debug, Parser)]
#[clap(name = "route-distances", verbatim_doc_comment)]
struct CmdlineOptions {
    /// The log level
    #[clap(short, long, default_value_t = tracing::Level::INFO)]
    log_level: tracing::Level,

    /// The railway_network artifact
    #[clap(short, long)]
    network: PathBuf,

    /// The settlement_network_mapping artifact
    #[clap(short, long)]
    mapping: PathBuf,

    /// The settlement_connections artifact
    #[clap(short, long)]
    connections: PathBuf,

    /// Output file for the updated connections. Defaults to stdout.
    #[clap(short, long)]
    output: Option<PathBuf>,
}

#[derive(Debug, Default)]
struct PairStats {
    total_pairs: usize,
    calculated: usize,
    same_edge: usize,
    same_node: usize,
    no_path: usize,
    no_mapping: usize,
}

fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    let args = CmdlineOptions::parse();

    let filter = tracing_subscriber::EnvFilter::builder()
        .with_default_directive(args.log_level.into())
        .from_env_lossy();
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .init();

    let config = PipelineConfig::default();

    let network: RailwayNetwork = read_artifact(&args.network)?;
    let mapping: SettlementMapping = read_artifact(&args.mapping)?;
    let mut connections: SettlementConnections = read_artifact(&args.connections)?;

    let graph = RailwayGraph::from_artifacts(&network, None, &config.projection)?;
    let adjacency = graph.adjacency();
    let snaps: BTreeMap<&str, &SnapRecord> = mapping
        .mappings
        .iter()
        .map(|record| (record.settlement.as_str(), record))
        .collect();

    tracing::info!(
        "Network: {} nodes, {} edges; {} mapped settlements",
        graph.node_count(),
        graph.edge_count(),
        snaps.len()
    );

    // Each unordered pair is computed once and applied to both directions
    let mut pair_distances: BTreeMap<(String, String), Option<f64>> = BTreeMap::new();
    let mut stats = PairStats::default();
    let mut ratios: Vec<f64> = Vec::new();

    for (settlement, conns) in &connections.connections {
        for connection in conns {
            stats.total_pairs += 1;

            let key = pair_key(settlement, &connection.to);
            if pair_distances.contains_key(&key) {
                continue;
            }

            let a = snaps.get(settlement.as_str()).copied();
            let b = snaps.get(connection.to.as_str()).copied();
            let result = pair_distance(&graph, &adjacency, a, b);

            let distance_km = match result.case {
                DistanceCase::SameEdge => {
                    stats.same_edge += 1;
                    stats.calculated += 1;
                    result.railway_km.map(round1)
                }
                DistanceCase::SameNode => {
                    stats.same_node += 1;
                    Some(0.0)
                }
                DistanceCase::Network { .. } => {
                    stats.calculated += 1;
                    result.railway_km.map(round1)
                }
                DistanceCase::NoPath => {
                    stats.no_path += 1;
                    None
                }
                DistanceCase::NoMapping => {
                    stats.no_mapping += 1;
                    None
                }
            };

            if let Some(rail_km) = distance_km {
                if connection.distance_km > 0.0 && rail_km > 0.0 {
                    ratios.push(rail_km / connection.distance_km);
                }
            }
            pair_distances.insert(key, distance_km);
        }
    }

    for (settlement, conns) in &mut connections.connections {
        for connection in conns {
            let key = pair_key(settlement, &connection.to);
            if let Some(distance) = pair_distances.get(&key) {
                connection.railway_distance_km = *distance;
            }
        }
    }

    tracing::info!(
        "Processed {} directed connections ({} unique pairs)",
        stats.total_pairs,
        pair_distances.len()
    );
    tracing::info!(
        "Calculated: {} ({} same-edge, {} via routing)",
        stats.calculated,
        stats.same_edge,
        stats.calculated - stats.same_edge
    );
    tracing::info!(
        "Same node: {}; no path: {}; missing mapping: {}",
        stats.same_node,
        stats.no_path,
        stats.no_mapping
    );
    if !ratios.is_empty() {
        let avg = ratios.iter().sum::<f64>() / ratios.len() as f64;
        let min = ratios.iter().cloned().fold(f64::INFINITY, f64::min);
        let max = ratios.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        tracing::info!("Railway vs straight-line ratio: avg {avg:.2}x, min {min:.2}x, max {max:.2}x");
    }

    write_artifact(get_output_writer(&args.output)?, &connections)?;
    Ok(())
}

fn pair_key(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}
