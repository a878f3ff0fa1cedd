use std::{io, path::Path, time::Instant};

use rayon::prelude::*;

use super::{cell_search, partition::Partition};
use crate::{
    config::{thread_pool, CustomizationConfig},
    error::{LoadError, PreprocessError},
    graph::RoadGraph,
    io::{decode_error, payload, write_artifact, Artifact, ReadLe},
    NodeIdx, Outcome,
};

/// Shortest paths inside one cell from every entry node to every exit node.
/// Unreachable pairs have infinite weight.
#[derive(Debug, Clone, PartialEq)]
pub struct Cell {
    sources: Vec<NodeIdx>,
    destinations: Vec<NodeIdx>,
    weights: Vec<f32>,
    lengths: Vec<f32>,
}

impl Cell {
    /// Nodes with an edge coming in from another cell, sorted.
    pub fn sources(&self) -> &[NodeIdx] {
        &self.sources
    }

    /// Nodes with an edge leaving to another cell, sorted.
    pub fn destinations(&self) -> &[NodeIdx] {
        &self.destinations
    }

    /// `(destination, weight, length)` of every clique edge leaving `source`,
    /// or `None` if `source` is not an entry node of this cell.
    pub fn clique(&self, source: NodeIdx) -> Option<impl Iterator<Item = (NodeIdx, f32, f32)> + '_> {
        let row = self.sources.binary_search(&source).ok()?;
        let width = self.destinations.len();
        let range = row * width..(row + 1) * width;

        Some(
            self.destinations
                .iter()
                .zip(&self.weights[range.clone()])
                .zip(&self.lengths[range])
                .map(|((&destination, &weight), &length)| (destination, weight, length)),
        )
    }

    fn build(
        graph: &RoadGraph,
        partition: &Partition,
        level: usize,
        cell: u32,
        sources: Vec<NodeIdx>,
        destinations: Vec<NodeIdx>,
    ) -> Self {
        let mut weights = Vec::with_capacity(sources.len() * destinations.len());
        let mut lengths = Vec::with_capacity(sources.len() * destinations.len());

        for &source in &sources {
            let labels = cell_search(graph, partition, level, cell, source, None);
            for destination in &destinations {
                match labels.get(destination) {
                    Some(label) => {
                        weights.push(label.weight as f32);
                        lengths.push(label.length as f32);
                    }
                    None => {
                        weights.push(f32::INFINITY);
                        lengths.push(f32::INFINITY);
                    }
                }
            }
        }

        Self {
            sources,
            destinations,
            weights,
            lengths,
        }
    }
}

/// The customized cliques of every cell on every partition level.
#[derive(Debug, Clone, PartialEq)]
pub struct CellStorage {
    node_count: u32,
    levels: Vec<Vec<Cell>>,
}

impl CellStorage {
    /// Computes all cliques. Cells are processed in parallel on the current
    /// rayon pool.
    pub fn build(graph: &RoadGraph, partition: &Partition) -> Self {
        let levels = (1..=partition.level_count())
            .map(|level| {
                let count = partition.cell_count(level) as usize;
                let mut sources = vec![vec![]; count];
                let mut destinations = vec![vec![]; count];

                for edge in graph.edges() {
                    let from = partition.cell(level, edge.from);
                    let to = partition.cell(level, edge.to);
                    if from != to {
                        destinations[from as usize].push(edge.from);
                        sources[to as usize].push(edge.to);
                    }
                }

                sources
                    .into_par_iter()
                    .zip(destinations)
                    .enumerate()
                    .map(|(cell, (mut sources, mut destinations))| {
                        sources.sort_unstable();
                        sources.dedup();
                        destinations.sort_unstable();
                        destinations.dedup();
                        Cell::build(graph, partition, level, cell as u32, sources, destinations)
                    })
                    .collect()
            })
            .collect();

        Self {
            node_count: graph.node_count(),
            levels,
        }
    }

    pub fn node_count(&self) -> u32 {
        self.node_count
    }

    pub fn level_count(&self) -> usize {
        self.levels.len()
    }

    pub fn cell_count(&self, level: usize) -> u32 {
        self.levels[level - 1].len() as u32
    }

    pub fn cell(&self, level: usize, cell: u32) -> &Cell {
        &self.levels[level - 1][cell as usize]
    }

    pub fn save(&self, base: &Path) -> Result<(), PreprocessError> {
        write_artifact(Artifact::Cells, base, |out| self.write(out)).map(|_| ())
    }

    pub(crate) fn from_bytes(bytes: &[u8]) -> Result<Self, LoadError> {
        let mut reader = payload(Artifact::Cells, bytes)?;
        Self::read(&mut reader).map_err(decode_error(Artifact::Cells))
    }

    pub fn write(&self, writer: &mut impl io::Write) -> io::Result<()> {
        writer.write_all(&self.node_count.to_le_bytes())?;
        writer.write_all(&(self.levels.len() as u32).to_le_bytes())?;

        for cells in &self.levels {
            writer.write_all(&(cells.len() as u32).to_le_bytes())?;
            for cell in cells {
                for nodes in [&cell.sources, &cell.destinations] {
                    writer.write_all(&(nodes.len() as u32).to_le_bytes())?;
                    for node in nodes {
                        writer.write_all(&node.to_le_bytes())?;
                    }
                }
                for value in cell.weights.iter().chain(&cell.lengths) {
                    writer.write_all(&value.to_le_bytes())?;
                }
            }
        }

        Ok(())
    }

    pub fn read(reader: &mut impl io::Read) -> io::Result<Self> {
        let node_count = reader.read_u32_le()?;
        let level_count = reader.read_u32_le()?;

        let read_nodes = |reader: &mut dyn io::Read| -> io::Result<Vec<NodeIdx>> {
            let len = reader.read_u32_le()?;
            let nodes = (0..len)
                .map(|_| reader.read_u32_le())
                .collect::<io::Result<Vec<_>>>()?;
            if nodes.iter().any(|&node| node >= node_count) {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("boundary node beyond the {node_count} nodes"),
                ));
            }
            Ok(nodes)
        };

        let mut levels = Vec::with_capacity(level_count as usize);
        for _ in 0..level_count {
            let cell_count = reader.read_u32_le()?;
            let mut cells = Vec::with_capacity(cell_count as usize);

            for _ in 0..cell_count {
                let sources = read_nodes(reader)?;
                let destinations = read_nodes(reader)?;
                let entries = sources.len() * destinations.len();

                let weights = (0..entries)
                    .map(|_| reader.read_f32_le())
                    .collect::<io::Result<Vec<_>>>()?;
                let lengths = (0..entries)
                    .map(|_| reader.read_f32_le())
                    .collect::<io::Result<Vec<_>>>()?;

                cells.push(Cell {
                    sources,
                    destinations,
                    weights,
                    lengths,
                });
            }

            levels.push(cells);
        }

        Ok(Self { node_count, levels })
    }
}

/// Writes `<base>.cells` from the graph and partition unless it already
/// exists.
pub fn customize(config: &CustomizationConfig) -> Result<Outcome, PreprocessError> {
    let output = Artifact::Cells.path(&config.base_path);
    if output.exists() {
        tracing::info!(path = %output.display(), "cells already present, skipping customization");
        return Ok(Outcome::Skipped);
    }

    let started = Instant::now();
    let graph = RoadGraph::load(&config.base_path)?;
    let partition = Partition::load(&config.base_path)?;

    if partition.node_count() != graph.node_count() {
        return Err(LoadError::Inconsistent(format!(
            "partition covers {} nodes but the graph has {}",
            partition.node_count(),
            graph.node_count()
        ))
        .into());
    }

    tracing::info!(
        nodes = graph.node_count(),
        levels = partition.level_count(),
        "customizing cells"
    );

    let pool = thread_pool(config.requested_num_threads)?;
    let cells = pool.install(|| CellStorage::build(&graph, &partition));
    cells.save(&config.base_path)?;

    tracing::info!(
        path = %output.display(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "cells written"
    );

    Ok(Outcome::Built)
}
