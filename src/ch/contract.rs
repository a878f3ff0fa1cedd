use std::time::Instant;

use super::ContractionHierarchy;
use crate::{
    config::{thread_pool, ContractorConfig},
    error::PreprocessError,
    graph::RoadGraph,
    io::Artifact,
    Outcome,
};

/// Builds `<base>.hsgr` from `<base>.graph` unless it already exists.
pub fn contract(config: &ContractorConfig) -> Result<Outcome, PreprocessError> {
    let output = Artifact::Hierarchy.path(&config.base_path);
    if output.exists() {
        tracing::info!(path = %output.display(), "hierarchy already present, skipping contraction");
        return Ok(Outcome::Skipped);
    }

    let started = Instant::now();
    let graph = RoadGraph::load(&config.base_path)?;
    tracing::info!(
        nodes = graph.node_count(),
        edges = graph.edge_count(),
        "contracting graph"
    );

    let pool = thread_pool(config.requested_num_threads)?;
    let ch = pool.install(|| ContractionHierarchy::new(&graph));
    ch.save(&config.base_path)?;

    tracing::info!(
        path = %output.display(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "contraction hierarchy written"
    );

    Ok(Outcome::Built)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::test_graphs::grid;

    #[test]
    fn contracts_once() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("grid");
        grid(5, 4).save(&base).unwrap();

        let config = ContractorConfig::new(&base).with_threads(2);
        assert_eq!(contract(&config).unwrap(), Outcome::Built);
        assert!(Artifact::Hierarchy.path(&base).exists());
        assert_eq!(contract(&config).unwrap(), Outcome::Skipped);
    }

    #[test]
    fn missing_graph() {
        let dir = tempfile::tempdir().unwrap();
        let config = ContractorConfig::new(dir.path().join("nothing"));

        assert!(matches!(
            contract(&config),
            Err(PreprocessError::MissingIntermediate(_))
        ));
    }
}
