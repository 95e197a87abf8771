//! Error types for clustering runs.

use std::error::Error;
use std::fmt;

use duograph_core::GraphError;

/// Clustering error types.
#[derive(Debug, Clone)]
pub enum ClusterError {
    /// The snapshot has no vertices; the run aborts without mutating.
    EmptyGraph,

    /// A configuration parameter failed validation.
    InvalidConfig(String),

    /// The engine rejected a read or write operation.
    Graph(GraphError),
}

impl fmt::Display for ClusterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClusterError::EmptyGraph => {
                write!(f, "nothing to cluster: the graph has no vertices")
            }
            ClusterError::InvalidConfig(reason) => {
                write!(f, "invalid cluster config: {}", reason)
            }
            ClusterError::Graph(err) => write!(f, "graph operation failed: {}", err),
        }
    }
}

impl Error for ClusterError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ClusterError::Graph(err) => Some(err),
            _ => None,
        }
    }
}

impl From<GraphError> for ClusterError {
    fn from(err: GraphError) -> Self {
        ClusterError::Graph(err)
    }
}

/// Result type alias for clustering operations.
pub type ClusterResult<T> = Result<T, ClusterError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert!(ClusterError::EmptyGraph.to_string().contains("no vertices"));
        assert!(ClusterError::InvalidConfig("bad seed".into())
            .to_string()
            .contains("bad seed"));
    }
}
