//! The railway network graph: a dense node array, a flat edge vector, and an
//! adjacency list built on demand for routing.
//!
//! Nodes and edges reference each other by index only; node ids are stable
//! strings of the form `n<integer>` assigned in creation order.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};

use geo::{Coord, Distance, Euclidean, Haversine, LineString, Point};

/// Euclidean distance between two projected-frame coordinates (meters)
pub fn euclidean_m(a: Coord, b: Coord) -> f64 {
    Euclidean.distance(Point::from(a), Point::from(b))
}

/// Great-circle distance between two (lon, lat) positions (meters)
pub fn haversine_m(a: (f64, f64), b: (f64, f64)) -> f64 {
    Haversine.distance(Point::new(a.0, a.1), Point::new(b.0, b.1))
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub id: String,
    /// Position in the projected frame (meters)
    pub position: Coord,
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Edge {
    pub source: usize,
    pub target: usize,
    /// Physical length of the underlying sub-polyline, never the node-to-node
    /// straight-line distance
    pub length_m: f64,
    /// As persisted (rounded to 2 decimals); kept verbatim so loaded graphs
    /// reproduce artifact values exactly
    pub length_km: f64,
    pub built_year: i32,
    pub abandoned_year: i32,
    pub builder_code: String,
    pub builder_name: String,
    /// Full polyline geometry in the projected frame
    pub points: LineString,
}

impl Edge {
    /// True when this edge joins the same unordered node pair
    pub fn joins(&self, u: usize, v: usize) -> bool {
        (self.source == u && self.target == v) || (self.source == v && self.target == u)
    }
}

#[derive(Debug, Clone, Default)]
pub struct RailwayGraph {
    nodes: Vec<Node>,
    edges: Vec<Edge>,
    ids: HashMap<String, usize>,
}

/// Adjacency list: for every node, its `(neighbor, edge index)` pairs
pub type Adjacency = Vec<Vec<(usize, usize)>>;

impl RailwayGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn node(&self, index: usize) -> &Node {
        &self.nodes[index]
    }

    pub fn edge(&self, index: usize) -> &Edge {
        &self.edges[index]
    }

    pub fn node_index(&self, id: &str) -> Option<usize> {
        self.ids.get(id).copied()
    }

    /// Append a node; the id must be unique
    pub fn push_node(&mut self, node: Node) -> usize {
        let index = self.nodes.len();
        debug_assert!(!self.ids.contains_key(&node.id), "duplicate node id {}", node.id);
        self.ids.insert(node.id.clone(), index);
        self.nodes.push(node);
        index
    }

    pub fn push_edge(&mut self, edge: Edge) -> usize {
        debug_assert_ne!(edge.source, edge.target, "self-loops are forbidden");
        self.edges.push(edge);
        self.edges.len() - 1
    }

    /// Find the edge joining the unordered pair `(u, v)`, if any
    pub fn find_edge(&self, u: usize, v: usize) -> Option<usize> {
        self.edges.iter().position(|e| e.joins(u, v))
    }

    pub fn replace_edge(&mut self, index: usize, edge: Edge) {
        self.edges[index] = edge;
    }

    /// Build the adjacency list once; the graph must not change afterwards
    pub fn adjacency(&self) -> Adjacency {
        let mut adjacency = vec![Vec::new(); self.nodes.len()];
        for (edge_index, edge) in self.edges.iter().enumerate() {
            adjacency[edge.source].push((edge.target, edge_index));
            adjacency[edge.target].push((edge.source, edge_index));
        }
        adjacency
    }

    /// Connected components over the edge set (isolated nodes are not
    /// reported), each component a set of node indices
    pub fn connected_components(&self) -> Vec<Vec<usize>> {
        let mut union_find = UnionFind::new(self.nodes.len());
        for edge in &self.edges {
            union_find.union(edge.source, edge.target);
        }

        let mut components: HashMap<usize, Vec<usize>> = HashMap::new();
        for edge in &self.edges {
            for node in [edge.source, edge.target] {
                let root = union_find.find(node);
                let members = components.entry(root).or_default();
                if !members.contains(&node) {
                    members.push(node);
                }
            }
        }

        let mut components: Vec<Vec<usize>> = components.into_values().collect();
        for component in &mut components {
            component.sort_unstable();
        }
        // Deterministic order regardless of hash iteration
        components.sort_unstable_by_key(|c| c[0]);
        components
    }

    /// Dijkstra over `length_m` edge weights
    ///
    /// Returns the total length in meters and the node sequence, or None when
    /// `to` is unreachable from `from`.
    pub fn shortest_path(
        &self,
        adjacency: &Adjacency,
        from: usize,
        to: usize,
    ) -> Option<(f64, Vec<usize>)> {
        if from == to {
            return Some((0.0, vec![from]));
        }

        let mut dist = vec![f64::INFINITY; self.nodes.len()];
        let mut prev = vec![usize::MAX; self.nodes.len()];
        let mut visited = vec![false; self.nodes.len()];
        let mut heap = BinaryHeap::new();

        dist[from] = 0.0;
        heap.push(QueueEntry { dist_m: 0.0, node: from });

        while let Some(QueueEntry { dist_m, node }) = heap.pop() {
            if visited[node] {
                continue;
            }
            visited[node] = true;
            if node == to {
                break;
            }

            for &(neighbor, edge_index) in &adjacency[node] {
                if visited[neighbor] {
                    continue;
                }
                let next = dist_m + self.edges[edge_index].length_m;
                if next < dist[neighbor] {
                    dist[neighbor] = next;
                    prev[neighbor] = node;
                    heap.push(QueueEntry { dist_m: next, node: neighbor });
                }
            }
        }

        if !visited[to] {
            return None;
        }

        let mut path = vec![to];
        let mut current = to;
        while current != from {
            current = prev[current];
            path.push(current);
        }
        path.reverse();
        Some((dist[to], path))
    }

    /// Log basic structure numbers after a build
    pub fn log_analysis(&self) {
        let total_length_m: f64 = self.edges.iter().map(|e| e.length_m).sum();
        tracing::info!(
            "Network: {} nodes, {} edges, {:.1} km of track",
            self.node_count(),
            self.edge_count(),
            total_length_m / 1000.0
        );

        let components = self.connected_components();
        let largest = components.iter().map(Vec::len).max().unwrap_or(0);
        tracing::info!(
            "Connected components: {} (largest: {} nodes)",
            components.len(),
            largest
        );

        let mut degrees = vec![0usize; self.nodes.len()];
        for edge in &self.edges {
            degrees[edge.source] += 1;
            degrees[edge.target] += 1;
        }
        if !degrees.is_empty() {
            let min = degrees.iter().min().unwrap();
            let max = degrees.iter().max().unwrap();
            let mean = degrees.iter().sum::<usize>() as f64 / degrees.len() as f64;
            let junctions = degrees.iter().filter(|&&d| d > 2).count();
            tracing::info!(
                "Node degrees: min={min}, max={max}, avg={mean:.1}; {junctions} junction nodes"
            );
        }
    }

    /// Rebuild a routable graph from the persisted artifacts
    ///
    /// Node positions are forward-projected from the persisted lat/lon so
    /// every consumer works from the same (rounded) coordinates. Edge
    /// geometry comes from the tracks artifact when one is supplied; edges
    /// without a matching track get an empty polyline.
    pub fn from_artifacts(
        network: &crate::io::RailwayNetwork,
        tracks: Option<&crate::io::RailwayTracks>,
        projection: &crate::projection::LambertConformalConic,
    ) -> eyre::Result<Self> {
        let mut graph = Self::new();
        for node in &network.nodes {
            let (x, y) = projection.forward(node.lon, node.lat);
            graph.push_node(Node {
                id: node.id.clone(),
                position: Coord { x, y },
                lat: node.lat,
                lon: node.lon,
            });
        }

        let mut track_lookup: HashMap<(&str, &str), &crate::io::Track> = HashMap::new();
        if let Some(tracks) = tracks {
            for track in &tracks.tracks {
                track_lookup.insert((&track.source, &track.target), track);
                track_lookup.insert((&track.target, &track.source), track);
            }
        }

        for edge in &network.edges {
            let source = graph
                .node_index(&edge.source)
                .ok_or_else(|| eyre::eyre!("Edge references unknown node {}", edge.source))?;
            let target = graph
                .node_index(&edge.target)
                .ok_or_else(|| eyre::eyre!("Edge references unknown node {}", edge.target))?;
            if source == target {
                eyre::bail!("Edge {} -> {} is a self-loop", edge.source, edge.target);
            }

            let points: LineString = track_lookup
                .get(&(edge.source.as_str(), edge.target.as_str()))
                .map(|track| {
                    track
                        .coordinates
                        .iter()
                        .map(|&[lon, lat]| {
                            let (x, y) = projection.forward(lon, lat);
                            Coord { x, y }
                        })
                        .collect()
                })
                .unwrap_or_else(|| LineString::new(Vec::new()));

            graph.push_edge(Edge {
                source,
                target,
                length_m: edge.length_m,
                length_km: edge.length_km,
                built_year: edge.built_year,
                abandoned_year: edge.abandoned_year,
                builder_code: edge.builder_code.clone(),
                builder_name: edge.builder_name.clone(),
                points,
            });
        }

        Ok(graph)
    }

    /// Sum of Euclidean segment lengths along a polyline (meters)
    pub fn polyline_length_m(points: &[Coord]) -> f64 {
        points
            .windows(2)
            .map(|pair| euclidean_m(pair[0], pair[1]))
            .sum()
    }
}

/// Min-heap entry; ties broken by node index so traversal order is stable
struct QueueEntry {
    dist_m: f64,
    node: usize,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueueEntry {}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed: BinaryHeap is a max-heap, Dijkstra wants the minimum
        other
            .dist_m
            .total_cmp(&self.dist_m)
            .then_with(|| other.node.cmp(&self.node))
    }
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    fn new(size: usize) -> Self {
        Self {
            parent: (0..size).collect(),
        }
    }

    fn find(&mut self, x: usize) -> usize {
        let mut root = x;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        // Path compression
        let mut current = x;
        while self.parent[current] != root {
            let next = self.parent[current];
            self.parent[current] = root;
            current = next;
        }
        root
    }

    fn union(&mut self, x: usize, y: usize) {
        let root_x = self.find(x);
        let root_y = self.find(y);
        if root_x != root_y {
            self.parent[root_x] = root_y;
        }
    }
}

#[cfg(test)]
mod tests {
    use float_cmp::assert_approx_eq;
    use geo::{coord, line_string};

    use super::*;

    fn test_node(id: &str, x: f64, y: f64) -> Node {
        Node {
            id: id.to_string(),
            position: coord! { x: x, y: y },
            lat: 0.0,
            lon: 0.0,
        }
    }

    fn test_edge(source: usize, target: usize, length_m: f64) -> Edge {
        Edge {
            source,
            target,
            length_m,
            length_km: length_m / 1000.0,
            built_year: 0,
            abandoned_year: 0,
            builder_code: "1".to_string(),
            builder_name: "CPR".to_string(),
            points: line_string![],
        }
    }

    fn diamond() -> RailwayGraph {
        // 0 -- 1 -- 3 plus a long 0 -- 2 -- 3 detour
        let mut graph = RailwayGraph::new();
        for i in 0..4 {
            graph.push_node(test_node(&format!("n{i}"), i as f64, 0.0));
        }
        graph.push_edge(test_edge(0, 1, 1000.0));
        graph.push_edge(test_edge(1, 3, 1000.0));
        graph.push_edge(test_edge(0, 2, 5000.0));
        graph.push_edge(test_edge(2, 3, 5000.0));
        graph
    }

    #[test]
    fn test_shortest_path_prefers_shorter_track() {
        let graph = diamond();
        let adjacency = graph.adjacency();
        let (dist_m, path) = graph.shortest_path(&adjacency, 0, 3).unwrap();
        assert_approx_eq!(f64, dist_m, 2000.0);
        assert_eq!(path, vec![0, 1, 3]);
    }

    #[test]
    fn test_shortest_path_no_alternate_is_shorter() {
        // Optimality: enumerate the only two simple paths by hand
        let graph = diamond();
        let adjacency = graph.adjacency();
        let (dist_m, _) = graph.shortest_path(&adjacency, 0, 3).unwrap();
        assert!(dist_m <= 1000.0 + 1000.0);
        assert!(dist_m <= 5000.0 + 5000.0);
    }

    #[test]
    fn test_shortest_path_unreachable() {
        let mut graph = diamond();
        graph.push_node(test_node("n4", 10.0, 10.0));
        let adjacency = graph.adjacency();
        assert!(graph.shortest_path(&adjacency, 0, 4).is_none());
    }

    #[test]
    fn test_shortest_path_same_node() {
        let graph = diamond();
        let adjacency = graph.adjacency();
        let (dist_m, path) = graph.shortest_path(&adjacency, 2, 2).unwrap();
        assert_approx_eq!(f64, dist_m, 0.0);
        assert_eq!(path, vec![2]);
    }

    #[test]
    fn test_connected_components() {
        let mut graph = diamond();
        // A separate two-node island
        let a = graph.push_node(test_node("n4", 100.0, 100.0));
        let b = graph.push_node(test_node("n5", 101.0, 100.0));
        graph.push_edge(test_edge(a, b, 10.0));
        // And one isolated node that should not be reported at all
        graph.push_node(test_node("n6", 200.0, 200.0));

        let components = graph.connected_components();
        assert_eq!(components.len(), 2);
        assert_eq!(components[0], vec![0, 1, 2, 3]);
        assert_eq!(components[1], vec![4, 5]);
    }

    #[test]
    fn test_polyline_length() {
        let points = [
            coord! { x: 0.0, y: 0.0 },
            coord! { x: 3.0, y: 4.0 },
            coord! { x: 3.0, y: 14.0 },
        ];
        assert_approx_eq!(f64, RailwayGraph::polyline_length_m(&points), 15.0);
    }
}
