use std::{fs, io, path::Path, time::Instant};

use super::bisection::{bisect_graph, Bisection};
use crate::{
    config::{thread_pool, PartitionConfig},
    error::{LoadError, PreprocessError},
    graph::RoadGraph,
    io::{decode_error, payload, write_artifact, Artifact, ReadLe},
    NodeIdx, Outcome,
};

/// Nested cells over the graph nodes. Levels are numbered from 1 (finest)
/// to `level_count()`; level 0 stands for the graph itself. Every cell is
/// contained in exactly one cell of the next level.
#[derive(Debug, Clone, PartialEq)]
pub struct Partition {
    node_count: u32,
    cells: Vec<Vec<u32>>,
    cell_counts: Vec<u32>,
}

impl Partition {
    /// Bisects `graph` and cuts the bisection tree into one level per entry
    /// of `max_cell_sizes`. Levels that would hold a single cell are left
    /// out. Runs on the current rayon pool.
    pub fn build(graph: &RoadGraph, config: &PartitionConfig) -> Self {
        let node_count = graph.node_count();
        let leaf_size = config.max_cell_sizes.first().copied().unwrap_or(1);
        let (order, root) = bisect_graph(graph, config, leaf_size);

        let mut cells = vec![];
        let mut cell_counts = vec![];

        for &max_size in &config.max_cell_sizes {
            let mut level = vec![0; node_count as usize];
            let mut next = 0;
            assign_cells(&root, &order, max_size, &mut level, &mut next);

            if next <= 1 {
                break;
            }
            cells.push(level);
            cell_counts.push(next);
        }

        Self {
            node_count,
            cells,
            cell_counts,
        }
    }

    pub fn node_count(&self) -> u32 {
        self.node_count
    }

    pub fn level_count(&self) -> usize {
        self.cells.len()
    }

    /// Cell of `node` at `level` (1-based).
    pub fn cell(&self, level: usize, node: NodeIdx) -> u32 {
        self.cells[level - 1][node as usize]
    }

    pub fn cell_count(&self, level: usize) -> u32 {
        self.cell_counts[level - 1]
    }

    /// Highest level at which `a` and `b` are in different cells, 0 if they
    /// share even the finest cell.
    pub fn highest_different_level(&self, a: NodeIdx, b: NodeIdx) -> usize {
        (1..=self.level_count())
            .rev()
            .find(|&level| self.cell(level, a) != self.cell(level, b))
            .unwrap_or(0)
    }

    /// The level a query from `source` to `target` may use at `node`: the
    /// coarsest level whose cell around `node` holds neither endpoint.
    pub fn query_level(&self, node: NodeIdx, source: NodeIdx, target: NodeIdx) -> usize {
        self.highest_different_level(node, source)
            .min(self.highest_different_level(node, target))
    }

    pub fn save(&self, base: &Path) -> Result<(), PreprocessError> {
        write_artifact(Artifact::Partition, base, |out| self.write(out)).map(|_| ())
    }

    pub fn load(base: &Path) -> Result<Self, PreprocessError> {
        let path = Artifact::Partition.path(base);
        if !path.exists() {
            return Err(PreprocessError::MissingIntermediate(path));
        }

        let bytes = fs::read(&path).map_err(|source| LoadError::Io { path, source })?;
        Ok(Self::from_bytes(&bytes)?)
    }

    pub(crate) fn from_bytes(bytes: &[u8]) -> Result<Self, LoadError> {
        let mut reader = payload(Artifact::Partition, bytes)?;
        Self::read(&mut reader).map_err(decode_error(Artifact::Partition))
    }

    pub fn write(&self, writer: &mut impl io::Write) -> io::Result<()> {
        writer.write_all(&self.node_count.to_le_bytes())?;
        writer.write_all(&(self.cells.len() as u32).to_le_bytes())?;

        for (level, &count) in self.cells.iter().zip(&self.cell_counts) {
            writer.write_all(&count.to_le_bytes())?;
            for cell in level {
                writer.write_all(&cell.to_le_bytes())?;
            }
        }

        Ok(())
    }

    pub fn read(reader: &mut impl io::Read) -> io::Result<Self> {
        let node_count = reader.read_u32_le()?;
        let level_count = reader.read_u32_le()?;

        let mut cells = Vec::with_capacity(level_count as usize);
        let mut cell_counts = Vec::with_capacity(level_count as usize);

        for level in 1..=level_count {
            let count = reader.read_u32_le()?;
            let mut ids = Vec::with_capacity(node_count as usize);
            for _ in 0..node_count {
                let cell = reader.read_u32_le()?;
                if cell >= count {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("cell {cell} on level {level} exceeds the {count} cells"),
                    ));
                }
                ids.push(cell);
            }
            cells.push(ids);
            cell_counts.push(count);
        }

        Ok(Self {
            node_count,
            cells,
            cell_counts,
        })
    }
}

/// Numbers the largest subtrees with at most `max_size` nodes as cells.
fn assign_cells(
    tree: &Bisection,
    order: &[NodeIdx],
    max_size: usize,
    cells: &mut [u32],
    next: &mut u32,
) {
    if tree.len <= max_size || tree.children.is_empty() {
        for &node in &order[..tree.len] {
            cells[node as usize] = *next;
        }
        *next += 1;
        return;
    }

    let mut offset = 0;
    for child in &tree.children {
        assign_cells(child, &order[offset..], max_size, cells, next);
        offset += child.len;
    }
}

/// Writes `<base>.partition` from `<base>.graph` unless it already exists.
pub fn partition(config: &PartitionConfig) -> Result<Outcome, PreprocessError> {
    let output = Artifact::Partition.path(&config.base_path);
    if output.exists() {
        tracing::info!(path = %output.display(), "partition already present, skipping");
        return Ok(Outcome::Skipped);
    }

    config.validate()?;

    let started = Instant::now();
    let graph = RoadGraph::load(&config.base_path)?;
    tracing::info!(
        nodes = graph.node_count(),
        max_cell_sizes = ?config.max_cell_sizes,
        "partitioning graph"
    );

    let pool = thread_pool(config.requested_num_threads)?;
    let partition = pool.install(|| Partition::build(&graph, config));

    for level in 1..=partition.level_count() {
        tracing::info!(level, cells = partition.cell_count(level), "partition level");
    }

    partition.save(&config.base_path)?;
    tracing::info!(
        path = %output.display(),
        levels = partition.level_count(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "partition written"
    );

    Ok(Outcome::Built)
}

#[cfg(test)]
mod tests {
    use rustc_hash::FxHashMap;

    use super::*;
    use crate::graph::test_graphs::grid;

    fn config() -> PartitionConfig {
        PartitionConfig::default().with_max_cell_sizes(vec![4, 12, 30])
    }

    #[test]
    fn levels_are_nested_and_bounded() {
        let graph = grid(7, 6);
        let partition = Partition::build(&graph, &config());

        assert_eq!(partition.level_count(), 3);

        for (level, max_size) in [(1, 4), (2, 12), (3, 30)] {
            let mut sizes: FxHashMap<u32, usize> = FxHashMap::default();
            for node in 0..graph.node_count() {
                *sizes.entry(partition.cell(level, node)).or_default() += 1;
            }
            assert_eq!(sizes.len() as u32, partition.cell_count(level));
            assert!(sizes.values().all(|&size| size <= max_size));
        }

        // Same finer cell implies same coarser cell.
        for level in 1..partition.level_count() {
            let mut parent = FxHashMap::default();
            for node in 0..graph.node_count() {
                let coarse = partition.cell(level + 1, node);
                let previous = *parent.entry(partition.cell(level, node)).or_insert(coarse);
                assert_eq!(previous, coarse);
            }
        }
    }

    #[test]
    fn query_levels() {
        let graph = grid(7, 6);
        let partition = Partition::build(&graph, &config());

        for node in 0..graph.node_count() {
            assert_eq!(partition.query_level(node, node, 41), 0);
            assert_eq!(partition.highest_different_level(node, node), 0);
        }

        let far = (0..graph.node_count())
            .find(|&node| partition.cell(3, node) != partition.cell(3, 0))
            .unwrap();
        assert_eq!(partition.highest_different_level(0, far), 3);
    }

    #[test]
    fn collapsed_levels_are_dropped() {
        let graph = grid(3, 3);
        let partition = Partition::build(&graph, &config());

        // 9 nodes fit into a single cell from level 2 on.
        assert_eq!(partition.level_count(), 1);
        assert!(partition.cell_count(1) >= 3);
    }

    #[test]
    fn trigger_writes_once() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("grid");
        let graph = grid(6, 6);
        graph.save(&base).unwrap();

        let config = PartitionConfig {
            base_path: base.clone(),
            ..config()
        };
        assert_eq!(partition(&config).unwrap(), Outcome::Built);
        assert_eq!(partition(&config).unwrap(), Outcome::Skipped);

        let loaded = Partition::load(&base).unwrap();
        assert_eq!(loaded, Partition::build(&graph, &config));
    }

    #[test]
    fn invalid_config_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let config = PartitionConfig::new(dir.path().join("grid")).with_max_cell_sizes(vec![]);

        assert!(matches!(
            partition(&config),
            Err(PreprocessError::InvalidConfig(_))
        ));
    }
}
