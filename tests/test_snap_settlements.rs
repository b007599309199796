use pretty_assertions::assert_eq;
use railnet::io::SettlementMapping;
use railnet::snap::{SnapQuality, SnapType};

use crate::{run, three_node_network, tool, write_fixture};

fn settlements() -> String {
    serde_json::json!([
        {"name": "Mortlach", "lat": 51.0, "lon": -105.0, "first_railway": "CPR", "railway_arrives": 1883},
        {"name": "Aylesbury", "lat": 51.1, "lon": -105.002},
        {"name": "Yarbo", "lat": 51.92, "lon": -105.0}
    ])
    .to_string()
}

#[test]
fn test_snap_settlements_classifies_node_edge_and_off_network() {
    let dir = tempfile::tempdir().unwrap();
    let network_path = write_fixture(dir.path(), "network.json", &three_node_network());

    let output = run(tool("snap-settlements")
        .arg("--network")
        .arg(&network_path)
        .write_stdin(settlements()));
    assert!(output.status.success());

    let mapping: SettlementMapping =
        serde_json::from_slice(&output.stdout).expect("valid mapping artifact");

    assert_eq!(mapping.stats.total_settlements, 3);
    // Sorted by settlement name
    let names: Vec<&str> = mapping
        .mappings
        .iter()
        .map(|m| m.settlement.as_str())
        .collect();
    assert_eq!(names, vec!["Aylesbury", "Mortlach", "Yarbo"]);

    // Mortlach sits exactly on n0: a node snap at zero distance
    let mortlach = &mapping.mappings[1];
    assert_eq!(mortlach.snap_type, SnapType::Node);
    assert_eq!(mortlach.snap_node, "n0");
    assert_eq!(mortlach.snap_nodes, vec!["n0".to_string()]);
    assert_eq!(mortlach.snap_distance_m, 0.0);
    assert_eq!(mortlach.snap_quality, SnapQuality::OnNetwork);
    assert_eq!(mortlach.snap_edge_t, None);
    assert_eq!(mortlach.railway_arrives, Some(1883));
    assert_eq!(mortlach.first_railway.as_deref(), Some("CPR"));

    // Aylesbury sits beside the middle of n0-n1: an edge snap near t=0.5
    let aylesbury = &mapping.mappings[0];
    assert_eq!(aylesbury.snap_type, SnapType::Edge);
    assert_eq!(
        aylesbury.snap_nodes,
        vec!["n0".to_string(), "n1".to_string()]
    );
    assert_eq!(aylesbury.snap_node, "n0");
    let t = aylesbury.snap_edge_t.expect("edge snaps carry t");
    assert!((0.4..=0.6).contains(&t), "t = {t}");
    assert_eq!(aylesbury.snap_edge_length_km, Some(22.3));
    assert!(aylesbury.snap_distance_m < 1000.0);

    // Yarbo is ~58km past the end of the line
    let yarbo = &mapping.mappings[2];
    assert_eq!(yarbo.snap_quality, SnapQuality::OffNetwork);
    assert!(yarbo.snap_distance_m > 50_000.0);

    assert_eq!(mapping.stats.by_quality.get("on_network"), Some(&2));
    assert_eq!(mapping.stats.by_quality.get("off_network"), Some(&1));
    assert_eq!(mapping.metadata.thresholds.max_snap_m, 50_000.0);
}

#[test]
fn test_duplicate_settlement_names_fail_the_stage() {
    let dir = tempfile::tempdir().unwrap();
    let network_path = write_fixture(dir.path(), "network.json", &three_node_network());

    let input = serde_json::json!([
        {"name": "Mortlach", "lat": 51.0, "lon": -105.0},
        {"name": "Mortlach", "lat": 51.1, "lon": -105.0}
    ])
    .to_string();

    let output = run(tool("snap-settlements")
        .arg("--network")
        .arg(&network_path)
        .write_stdin(input));
    assert!(!output.status.success());
}
