//! Turns a raw road network into the routable graph.

use std::{fs, io, path::Path, time::Instant};

use rayon::prelude::*;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::{
    config::{thread_pool, ExtractorConfig},
    coordinate::Coordinate,
    error::{LoadError, PreprocessError},
    graph::RoadGraph,
    io::{decode_error, payload, write_artifact, write_atomic, Artifact, ReadLe},
    network::{RawWay, RoadNetwork},
    profile::{Profile, TravelDirection},
    Edge, Node, NodeIdx, Outcome,
};

/// Summary written next to the graph as `<base>.properties`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Properties {
    pub profile: String,
    pub nodes: u32,
    pub edges: u32,
    pub routable_ways: usize,
    pub ignored_ways: usize,
    pub edge_lookup: bool,
}

impl Properties {
    pub fn load(base: &Path) -> Result<Self, LoadError> {
        let path = Artifact::Properties.path(base);
        let text = fs::read_to_string(&path).map_err(|source| match source.kind() {
            io::ErrorKind::NotFound => LoadError::Missing(path.clone()),
            _ => LoadError::Io {
                path: path.clone(),
                source,
            },
        })?;

        serde_json::from_str(&text).map_err(|err| LoadError::Corrupt {
            artifact: Artifact::Properties.name(),
            reason: err.to_string(),
        })
    }
}

/// A directed segment between two raw nodes, by position in the input.
struct Segment {
    from: usize,
    to: usize,
    weight: f32,
    length: f32,
    way: i64,
}

/// Extracts `config.input_path` into `<base>.graph` unless the graph already
/// exists.
pub fn extract(config: &ExtractorConfig) -> Result<Outcome, PreprocessError> {
    let output = Artifact::Graph.path(&config.base_path);
    if output.exists() {
        tracing::info!(path = %output.display(), "graph already present, skipping extraction");
        return Ok(Outcome::Skipped);
    }

    let started = Instant::now();
    let network = RoadNetwork::read(&config.input_path)?;
    let profile = match &config.profile_path {
        Some(path) => Profile::load(path)?,
        None => Profile::car(),
    };

    tracing::info!(
        input = %config.input_path.display(),
        profile = %profile.name,
        nodes = network.nodes.len(),
        ways = network.ways.len(),
        "extracting road network"
    );

    let malformed = |reason: String| PreprocessError::MalformedInput {
        path: config.input_path.clone(),
        reason,
    };

    let mut coordinates = Vec::with_capacity(network.nodes.len());
    let mut positions = FxHashMap::default();
    for (position, node) in network.nodes.iter().enumerate() {
        let coordinate =
            Coordinate::new(node.lon, node.lat).map_err(|err| malformed(err.to_string()))?;
        if positions.insert(node.id, position).is_some() {
            return Err(malformed(format!("node {} is defined twice", node.id)));
        }
        coordinates.push(coordinate);
    }

    let pool = thread_pool(config.requested_num_threads)?;
    let per_way: Vec<Option<Vec<Segment>>> = pool.install(|| {
        network
            .ways
            .par_iter()
            .map(|way| way_segments(way, &profile, &positions, &coordinates))
            .collect()
    });

    let routable_ways = per_way.iter().filter(|segments| segments.is_some()).count();
    let ignored_ways = per_way.len() - routable_ways;
    let mut segments: Vec<Segment> = per_way.into_iter().flatten().flatten().collect();

    // Renumber the nodes that survive, in input order.
    let mut new_index = vec![NodeIdx::MAX; coordinates.len()];
    for segment in &segments {
        new_index[segment.from] = 0;
        new_index[segment.to] = 0;
    }
    let mut nodes = vec![];
    for (position, index) in new_index.iter_mut().enumerate() {
        if *index == 0 {
            *index = nodes.len() as NodeIdx;
            nodes.push(Node {
                coordinate: coordinates[position],
            });
        }
    }

    // Parallel segments keep the fastest one.
    segments.sort_by(|a, b| {
        (new_index[a.from], new_index[a.to])
            .cmp(&(new_index[b.from], new_index[b.to]))
            .then(a.weight.total_cmp(&b.weight))
    });
    segments.dedup_by_key(|segment| (new_index[segment.from], new_index[segment.to]));

    let edges: Vec<Edge> = segments
        .iter()
        .map(|segment| Edge {
            from: new_index[segment.from],
            to: new_index[segment.to],
            weight: segment.weight,
            length: segment.length,
        })
        .collect();

    let graph = RoadGraph::new(nodes, &edges);
    let properties = Properties {
        profile: profile.name.clone(),
        nodes: graph.node_count(),
        edges: graph.edge_count(),
        routable_ways,
        ignored_ways,
        edge_lookup: config.generate_edge_lookup,
    };

    if config.generate_edge_lookup {
        let ways: Vec<i64> = segments.iter().map(|segment| segment.way).collect();
        write_artifact(Artifact::EdgeLookup, &config.base_path, |out| {
            write_edge_lookup(&ways, out)
        })?;
    }

    let properties_path = Artifact::Properties.path(&config.base_path);
    let json = serde_json::to_vec_pretty(&properties).map_err(|err| PreprocessError::Write {
        path: properties_path.clone(),
        source: err.into(),
    })?;
    write_atomic(&properties_path, &json)?;

    // The graph goes last: its presence marks a finished extraction.
    graph.save(&config.base_path)?;

    tracing::info!(
        nodes = properties.nodes,
        edges = properties.edges,
        ignored_ways,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "extraction finished"
    );

    Ok(Outcome::Built)
}

/// Directed segments of a routable way, `None` if the profile rejects it.
/// References to nodes missing from the input split the way.
fn way_segments(
    way: &RawWay,
    profile: &Profile,
    positions: &FxHashMap<i64, usize>,
    coordinates: &[Coordinate],
) -> Option<Vec<Segment>> {
    let speed = profile.way_speed(way)? / 3.6;
    let direction = profile.direction(way);

    let mut segments = vec![];
    for pair in way.nodes.windows(2) {
        let (Some(&a), Some(&b)) = (positions.get(&pair[0]), positions.get(&pair[1])) else {
            continue;
        };
        if a == b {
            continue;
        }

        let length = coordinates[a].haversine_distance(&coordinates[b]);
        let weight = (length / speed) as f32;
        let length = length as f32;

        let mut push = |from, to| {
            segments.push(Segment {
                from,
                to,
                weight,
                length,
                way: way.id,
            })
        };

        match direction {
            TravelDirection::Both => {
                push(a, b);
                push(b, a);
            }
            TravelDirection::Forward => push(a, b),
            TravelDirection::Backward => push(b, a),
        }
    }

    Some(segments)
}

fn write_edge_lookup(ways: &[i64], writer: &mut impl io::Write) -> io::Result<()> {
    writer.write_all(&(ways.len() as u32).to_le_bytes())?;
    for way in ways {
        writer.write_all(&way.to_le_bytes())?;
    }
    Ok(())
}

/// Source way id of every graph edge, in graph edge order.
pub fn load_edge_lookup(base: &Path) -> Result<Vec<i64>, LoadError> {
    let path = Artifact::EdgeLookup.path(base);
    if !path.exists() {
        return Err(LoadError::Missing(path));
    }
    let bytes = fs::read(&path).map_err(|source| LoadError::Io { path, source })?;

    let mut reader = payload(Artifact::EdgeLookup, &bytes)?;
    let read = |reader: &mut &[u8]| -> io::Result<Vec<i64>> {
        let len = reader.read_u32_le()?;
        (0..len).map(|_| reader.read_i64_le()).collect()
    };

    read(&mut reader).map_err(decode_error(Artifact::EdgeLookup))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::RawNode;

    fn node(id: i64, lon: f64, lat: f64) -> RawNode {
        RawNode { id, lon, lat }
    }

    fn way(id: i64, nodes: &[i64], tags: &[(&str, &str)]) -> RawWay {
        RawWay {
            id,
            nodes: nodes.to_vec(),
            tags: tags
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    fn network() -> RoadNetwork {
        RoadNetwork {
            nodes: vec![
                node(10, 7.4190, 43.7310),
                node(11, 7.4195, 43.7310),
                node(12, 7.4200, 43.7310),
                node(13, 7.4200, 43.7315),
                node(14, 7.4300, 43.7400),
            ],
            ways: vec![
                way(1, &[10, 11, 12], &[("highway", "residential")]),
                way(2, &[12, 13], &[("highway", "primary"), ("oneway", "yes")]),
                way(3, &[13, 14], &[("highway", "footway")]),
                way(4, &[11, 99, 12], &[("highway", "service")]),
            ],
        }
    }

    #[test]
    fn builds_graph_from_routable_ways() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("map.json");
        let base = dir.path().join("map");
        network().save(&input).unwrap();

        let config = ExtractorConfig::new(&input, &base)
            .with_threads(2)
            .with_edge_lookup(true);
        assert_eq!(extract(&config).unwrap(), Outcome::Built);

        let graph = RoadGraph::load(&base).unwrap();
        // Node 14 is only reachable by foot.
        assert_eq!(graph.node_count(), 4);
        // 10<->11, 11<->12 and 12->13.
        assert_eq!(graph.edge_count(), 5);
        assert_eq!(graph.out_edges(3).count(), 0);

        let residential = graph.out_edges(0).next().unwrap();
        let expected = residential.length / (25.0 / 3.6);
        assert!((residential.weight - expected).abs() < 1e-3);

        let properties = Properties::load(&base).unwrap();
        assert_eq!(properties.profile, "car");
        assert_eq!(properties.routable_ways, 3);
        assert_eq!(properties.ignored_ways, 1);

        let lookup = load_edge_lookup(&base).unwrap();
        assert_eq!(lookup.len(), 5);
        assert_eq!(lookup.iter().filter(|&&way| way == 2).count(), 1);
    }

    #[test]
    fn skips_existing_output() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("map.json");
        let base = dir.path().join("map");
        network().save(&input).unwrap();

        let config = ExtractorConfig::new(&input, &base);
        assert_eq!(extract(&config).unwrap(), Outcome::Built);
        let written = fs::read(Artifact::Graph.path(&base)).unwrap();

        fs::remove_file(&input).unwrap();
        assert_eq!(extract(&config).unwrap(), Outcome::Skipped);
        assert_eq!(fs::read(Artifact::Graph.path(&base)).unwrap(), written);
        assert!(matches!(
            load_edge_lookup(&base),
            Err(LoadError::Missing(_))
        ));
    }

    #[test]
    fn reports_bad_input() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("map");

        let missing = ExtractorConfig::new(dir.path().join("absent.json"), &base);
        assert!(matches!(
            extract(&missing),
            Err(PreprocessError::MissingInput(_))
        ));

        let input = dir.path().join("broken.json");
        fs::write(&input, "{\"nodes\": [").unwrap();
        assert!(matches!(
            extract(&ExtractorConfig::new(&input, &base)),
            Err(PreprocessError::MalformedInput { .. })
        ));

        let mut duplicated = network();
        duplicated.nodes.push(node(10, 7.0, 43.0));
        duplicated.save(&input).unwrap();
        assert!(matches!(
            extract(&ExtractorConfig::new(&input, &base)),
            Err(PreprocessError::MalformedInput { .. })
        ));
        assert!(!Artifact::Graph.path(&base).exists());
    }

    #[test]
    fn custom_profile() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("map.json");
        let profile = dir.path().join("foot.json");
        let base = dir.path().join("map");
        network().save(&input).unwrap();
        fs::write(
            &profile,
            r#"{"name":"foot","speeds":{"footway":5,"residential":5,"primary":5},"obey_oneway":false}"#,
        )
        .unwrap();

        let config = ExtractorConfig::new(&input, &base).with_profile(&profile);
        extract(&config).unwrap();

        let graph = RoadGraph::load(&base).unwrap();
        assert_eq!(graph.node_count(), 5);
        assert_eq!(graph.edge_count(), 8);
        assert_eq!(Properties::load(&base).unwrap().profile, "foot");
    }
}
