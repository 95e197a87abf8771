//! Engine-facing entry point: read a snapshot, run the algorithm, write the
//! resulting cluster ids back through one write transaction.

use duograph_core::{DualGraphEngine, ElementKind, GraphStore, Value};

use crate::config::ClusterConfig;
use crate::error::{ClusterError, ClusterResult};
use crate::flow::LeafNetwork;
use crate::hierarchy::Infomap;

/// Outcome of a clustering run.
#[derive(Debug, Clone, PartialEq)]
pub enum ClusterOutcome {
    /// Partition written back
    Clustered {
        /// Number of distinct cluster ids assigned
        clusters: usize,
        /// Hierarchical codelength of the winning partition (bits)
        codelength: f64,
    },
    /// The snapshot had no vertices; nothing was mutated
    EmptyGraph,
}

/// Partition a read snapshot without writing anything back.
///
/// Returns one integer cluster id per vertex, in `vertex_ids` order.
/// Errors with [`ClusterError::EmptyGraph`] when there is nothing to
/// partition.
pub fn cluster_snapshot(store: &GraphStore, config: &ClusterConfig) -> ClusterResult<Vec<u32>> {
    config.validate().map_err(ClusterError::InvalidConfig)?;
    let network = LeafNetwork::from_store(store, config)?;
    if network.is_empty() {
        return Err(ClusterError::EmptyGraph);
    }
    let mut infomap = Infomap::from_network(network, config.clone());
    infomap.run();
    Ok(infomap.partition_vector())
}

/// Cluster the engine's current graph.
///
/// Takes a read snapshot, runs the configured community detection, then
/// writes each vertex's integer cluster id into
/// `config.result_attribute` (registered on demand) in a single committed
/// transaction. An empty graph aborts with a warning before any write
/// transaction is opened.
pub fn cluster_graph(
    engine: &DualGraphEngine,
    config: &ClusterConfig,
) -> ClusterResult<ClusterOutcome> {
    config.validate().map_err(ClusterError::InvalidConfig)?;

    let network = {
        let read = engine.read();
        LeafNetwork::from_store(&read, config)?
    };
    if network.is_empty() {
        eprintln!("[CLUSTER] nothing to cluster: the graph has no vertices");
        return Ok(ClusterOutcome::EmptyGraph);
    }

    let vertices = network.vertices.clone();
    let mut infomap = Infomap::from_network(network, config.clone());
    infomap.run();
    let partition = infomap.partition_vector();
    let clusters = partition.iter().copied().max().map_or(0, |max| max as usize + 1);

    let mut tx = engine.write("Cluster graph", true, "duograph-cluster");
    let attribute = match tx.attribute_by_name(ElementKind::Vertex, &config.result_attribute) {
        Some(existing) => existing,
        None => tx.add_attribute(&config.result_attribute, ElementKind::Vertex, false)?,
    };
    for (position, &vertex) in vertices.iter().enumerate() {
        tx.set_vertex_value(attribute, vertex, Some(Value::Integer(partition[position] as i64)))?;
    }
    tx.commit("Community detection")?;

    Ok(ClusterOutcome::Clustered {
        clusters,
        codelength: infomap.hierarchical_codelength(),
    })
}
