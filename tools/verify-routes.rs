use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use clap::Parser;
use railnet::config::PipelineConfig;
use railnet::graph::RailwayGraph;
use railnet::io::{
    RailwayNetwork, RailwayTracks, ReportMetadata, RouteReport, RouteThresholds,
    SettlementConnections, SettlementMapping, get_output_writer, read_artifact, write_artifact,
};
use railnet::route::{RouteCheck, RouteStatus, verify_pair};
use railnet::snap::SnapRecord;

/// Verify that every settlement connection has a usable railway route
///
/// Reconstructs the route geometry for each unordered pair and reports, per
/// pair, whether the geometry actually reaches both settlements. Every
/// failure mode gets a structured kind; a bad pair never aborts the run.
#[derive(Debug, Parser)]
#[clap(name = "verify-routes", verbatim_doc_comment)]
struct CmdlineOptions {
    /// The log level
    #[clap(short, long, default_value_t = tracing::Level::INFO)]
    log_level: tracing::Level,

    /// The railway_network artifact
    #[clap(short, long)]
    network: PathBuf,

    /// The railway_tracks artifact
    #[clap(short, long)]
    tracks: PathBuf,

    /// The settlement_network_mapping artifact
    #[clap(short, long)]
    mapping: PathBuf,

    /// The settlement_connections artifact
    #[clap(short, long)]
    connections: PathBuf,

    /// Output file for the route report. Defaults to stdout.
    #[clap(short, long)]
    output: Option<PathBuf>,
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
    let tracks: RailwayTracks = read_artifact(&args.tracks)?;
    let mapping: SettlementMapping = read_artifact(&args.mapping)?;
    let connections: SettlementConnections = read_artifact(&args.connections)?;

    let graph = RailwayGraph::from_artifacts(&network, Some(&tracks), &config.projection)?;
    let adjacency = graph.adjacency();
    let snaps: BTreeMap<&str, &SnapRecord> = mapping
        .mappings
        .iter()
        .map(|record| (record.settlement.as_str(), record))
        .collect();

    let total: usize = connections.connections.values().map(Vec::len).sum();
    tracing::info!("Verifying {total} connections");

    let mut checked: BTreeSet<(String, String)> = BTreeSet::new();
    let mut results: Vec<RouteCheck> = Vec::new();

    for (from_name, conns) in &connections.connections {
        for connection in conns {
            let to_name = &connection.to;
            let key = if from_name <= to_name {
                (from_name.clone(), to_name.clone())
            } else {
                (to_name.clone(), from_name.clone())
            };
            if !checked.insert(key) {
                continue;
            }

            let check = verify_pair(
                &graph,
                &adjacency,
                from_name,
                to_name,
                snaps.get(from_name.as_str()).copied(),
                snaps.get(to_name.as_str()).copied(),
                Some(connection.distance_km),
                &config,
            );
            results.push(check);
        }
    }

    results.sort_by(|a, b| {
        (a.from_settlement.as_str(), a.to_settlement.as_str())
            .cmp(&(b.from_settlement.as_str(), b.to_settlement.as_str()))
    });

    let mut summary: BTreeMap<String, usize> = [
        RouteStatus::Ok,
        RouteStatus::Warning,
        RouteStatus::FarFromPath,
        RouteStatus::NoMapping,
        RouteStatus::NoPath,
        RouteStatus::NoGeometry,
    ]
    .into_iter()
    .map(|status| (status.to_string(), 0))
    .collect();
    for check in &results {
        *summary.entry(check.status.to_string()).or_insert(0) += 1;
    }

    tracing::info!("Checked {} unique pairs", results.len());
    for (status, count) in &summary {
        tracing::info!("  {status}: {count}");
    }
    let errors = results
        .iter()
        .filter(|c| {
            matches!(
                c.status,
                RouteStatus::FarFromPath
                    | RouteStatus::NoMapping
                    | RouteStatus::NoPath
                    | RouteStatus::NoGeometry
            )
        })
        .count();
    if errors > 0 {
        tracing::warn!("{errors} connections would fall back to straight lines");
    }

    let report = RouteReport {
        metadata: ReportMetadata {
            description: "Railway route verification report".to_string(),
            thresholds: RouteThresholds {
                warn_km: config.route_warn_km,
                far_km: config.route_far_km,
            },
        },
        summary,
        results,
    };
    write_artifact(get_output_writer(&args.output)?, &report)?;
    Ok(())
}
