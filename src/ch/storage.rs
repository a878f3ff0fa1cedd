use std::{io, path::Path};

use super::{unfolding::AllEdges, ContractionHierarchy, Edge};
use crate::{
    error::{LoadError, PreprocessError},
    io::{decode_error, payload, write_artifact, Artifact, ReadLe},
};

impl ContractionHierarchy {
    pub fn save(&self, base: &Path) -> Result<(), PreprocessError> {
        write_artifact(Artifact::Hierarchy, base, |out| self.write(out)).map(|_| ())
    }

    pub(crate) fn from_bytes(bytes: &[u8]) -> Result<Self, LoadError> {
        let mut reader = payload(Artifact::Hierarchy, bytes)?;
        Self::read(&mut reader).map_err(decode_error(Artifact::Hierarchy))
    }

    /// Node count, then the upward, downward and unpruned adjacency lists.
    pub fn write(&self, writer: &mut impl io::Write) -> io::Result<()> {
        writer.write_all(&self.node_count().to_le_bytes())?;

        for adjacency in [
            &self.forward_edges[..],
            &self.backward_edges[..],
            self.all_edges.forward(),
        ] {
            for edges in adjacency {
                writer.write_all(&(edges.len() as u32).to_le_bytes())?;
                for edge in edges {
                    edge.write(writer)?;
                }
            }
        }

        Ok(())
    }

    pub fn read(reader: &mut impl io::Read) -> io::Result<Self> {
        let node_count = reader.read_u32_le()?;

        let forward_edges = read_adjacency(reader, node_count)?;
        let backward_edges = read_adjacency(reader, node_count)?;
        let all_edges = AllEdges::from_forward(read_adjacency(reader, node_count)?);

        Ok(Self {
            forward_edges,
            backward_edges,
            all_edges,
        })
    }
}

impl Edge {
    fn write(&self, writer: &mut impl io::Write) -> io::Result<()> {
        writer.write_all(&self.to.to_le_bytes())?;
        writer.write_all(&self.weight.to_le_bytes())?;
        writer.write_all(&self.length.to_le_bytes())?;
        // 0 marks an original edge.
        writer.write_all(&self.via.map_or(0, |via| via + 1).to_le_bytes())
    }

    fn read(reader: &mut impl io::Read, node_count: u32) -> io::Result<Self> {
        let to = reader.read_u32_le()?;
        let weight = reader.read_f32_le()?;
        let length = reader.read_f32_le()?;
        let via = reader.read_u32_le()?.checked_sub(1);

        if to >= node_count || via.is_some_and(|via| via >= node_count) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("edge to {to} points past {node_count} nodes"),
            ));
        }

        Ok(Self {
            to,
            weight,
            length,
            via,
        })
    }
}

fn read_adjacency(reader: &mut impl io::Read, node_count: u32) -> io::Result<Vec<Vec<Edge>>> {
    (0..node_count)
        .map(|_| -> io::Result<Vec<Edge>> {
            let len = reader.read_u32_le()?;
            (0..len).map(|_| Edge::read(reader, node_count)).collect()
        })
        .collect()
}
