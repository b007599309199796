mod test_snap_settlements;

use std::path::PathBuf;
use std::process::Output;

use assert_cmd::Command;
use railnet::config::PipelineConfig;
use railnet::io::{
    NetworkEdge, NetworkMetadata, NetworkNode, NetworkStats, RailwayNetwork, RailwayTracks,
    TracksMetadata,
};

/// Start a command for one of the pipeline stages, with verbose logging
/// already switched on
///
/// Stage binaries are resolved at compile time through Cargo's
/// CARGO_BIN_EXE metadata, so there is nothing to look up or cache when the
/// tests run.
pub fn tool(stage: &str) -> Command {
    let binary = match stage {
        "build-network" => assert_cmd::cargo_bin!("build-network"),
        "merge-network" => assert_cmd::cargo_bin!("merge-network"),
        "snap-settlements" => assert_cmd::cargo_bin!("snap-settlements"),
        "route-distances" => assert_cmd::cargo_bin!("route-distances"),
        "verify-routes" => assert_cmd::cargo_bin!("verify-routes"),
        other => panic!("no pipeline stage named '{other}'"),
    };
    let mut command = Command::new(binary);
    command.arg("--log-level=TRACE");
    command
}

/// Run a configured stage command and hand back its raw output
///
/// Everything the stage wrote is replayed through print!/eprint!, which
/// libtest captures, so a failing assertion also shows the stage's logs.
pub fn run(command: &mut Command) -> Output {
    let output = command.output().expect("stage binary should run");
    print!("{}", String::from_utf8_lossy(&output.stdout));
    eprint!("{}", String::from_utf8_lossy(&output.stderr));
    output
}

/// Project a geographic position with the default pipeline projection
pub fn projected(lon: f64, lat: f64) -> (f64, f64) {
    PipelineConfig::default().projection.forward(lon, lat)
}

/// A three-node network marching north along -105: n0 (51.0), n1 (51.2),
/// n2 (51.4), with edges n0-n1 and n1-n2
pub fn three_node_network() -> RailwayNetwork {
    let nodes = [(-105.0, 51.0), (-105.0, 51.2), (-105.0, 51.4)]
        .iter()
        .enumerate()
        .map(|(i, &(lon, lat))| {
            let (x, y) = projected(lon, lat);
            NetworkNode {
                id: format!("n{i}"),
                x,
                y,
                lat,
                lon,
            }
        })
        .collect();

    let edge = |source: &str, target: &str, code: &str, name: &str| NetworkEdge {
        source: source.to_string(),
        target: target.to_string(),
        length_m: 22_300.0,
        length_km: 22.3,
        built_year: 1890,
        abandoned_year: 0,
        builder_code: code.to_string(),
        builder_name: name.to_string(),
    };

    RailwayNetwork {
        metadata: NetworkMetadata {
            description: "test network".to_string(),
            source: "fixture".to_string(),
            projection: "NAD27 Lambert Conformal Conic".to_string(),
            units: "meters".to_string(),
            snap_tolerance_m: 500.0,
        },
        stats: NetworkStats {
            sk_segments: 2,
            total_length_km: 44.6,
            node_count: 3,
            edge_count: 2,
            by_builder: Default::default(),
            by_decade: Default::default(),
        },
        nodes,
        edges: vec![edge("n0", "n1", "1", "CPR"), edge("n1", "n2", "2", "CNR")],
    }
}

pub fn empty_tracks() -> RailwayTracks {
    RailwayTracks {
        metadata: TracksMetadata {
            description: "test tracks".to_string(),
            source: "fixture".to_string(),
        },
        track_count: 0,
        tracks: Vec::new(),
    }
}

/// Serialize an artifact fixture to a file inside `dir`
pub fn write_fixture<T: serde::Serialize>(
    dir: &std::path::Path,
    name: &str,
    artifact: &T,
) -> PathBuf {
    let path = dir.join(name);
    let json = serde_json::to_string_pretty(artifact).expect("fixture serializes");
    std::fs::write(&path, json).expect("fixture written");
    path
}
