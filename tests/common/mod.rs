use std::path::{Path, PathBuf};

use route_machine::{Coordinate, RawNode, RawWay, RoadNetwork};

pub const MONACO_FROM: (f64, f64) = (7.419758, 43.731142);
pub const MONACO_TO: (f64, f64) = (7.419505, 43.736825);

pub fn at((lon, lat): (f64, f64)) -> Coordinate {
    Coordinate::new(lon, lat).unwrap()
}

fn way(id: i64, nodes: Vec<i64>, tags: &[(&str, &str)]) -> RawWay {
    RawWay {
        id,
        nodes,
        tags: tags
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect(),
    }
}

/// A street grid of `width` x `height` nodes spaced 0.0005 degrees apart,
/// starting at `origin`. Rows are two-way, every third one a primary road.
/// Odd columns are one-way northbound.
pub fn grid_network(origin: (f64, f64), width: i64, height: i64) -> RoadNetwork {
    let id = |x: i64, y: i64| 1000 + y * width + x;

    let nodes = (0..height)
        .flat_map(|y| {
            (0..width).map(move |x| RawNode {
                id: id(x, y),
                lon: origin.0 + 0.0005 * x as f64,
                lat: origin.1 + 0.0005 * y as f64,
            })
        })
        .collect();

    let mut ways = vec![];
    for y in 0..height {
        let highway = if y % 3 == 0 { "primary" } else { "residential" };
        ways.push(way(
            y,
            (0..width).map(|x| id(x, y)).collect(),
            &[("highway", highway), ("name", "row")],
        ));
    }
    for x in 0..width {
        let mut tags = vec![("highway", "residential")];
        if x % 2 == 1 {
            tags.push(("oneway", "yes"));
        }
        ways.push(way(100 + x, (0..height).map(|y| id(x, y)).collect(), &tags));
    }
    // Not routable for cars.
    ways.push(way(999, vec![id(0, 0), id(width - 1, height - 1)], &[("highway", "footway")]));

    RoadNetwork { nodes, ways }
}

/// Streets around both Monaco waypoints.
pub fn monaco() -> RoadNetwork {
    grid_network((7.417, 43.729), 11, 19)
}

/// A few blocks in Manhattan, far away from Monaco.
pub fn new_york() -> RoadNetwork {
    grid_network((-73.99, 40.75), 4, 4)
}

/// Writes `network` into `dir` and returns `(input, base)`.
pub fn write_network(dir: &Path, name: &str, network: &RoadNetwork) -> (PathBuf, PathBuf) {
    let input = dir.join(format!("{name}.json"));
    network.save(&input).unwrap();
    (input, dir.join(name))
}
