//! Clustering configuration: random-walk dynamics, optimization level, and
//! run parameters.

/// How edge direction and flow are interpreted by the objective.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DynamicsMode {
    /// Undirected random walk; stationary flow proportional to weighted degree
    Undirected,
    /// Directed walk with teleportation, flow from power iteration
    Directed,
    /// Undirected flow, directed codelength
    UndirectedFlow,
    /// Node flow taken from incoming link weight
    IncomingFlow,
    /// Directed link weight used directly as flow
    RawFlow,
}

/// How hard the optimizer works after the initial aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptimizationLevel {
    /// Alternate fine-tune and full coarse-tune passes until they stop paying
    FullCoarseTune,
    /// Tune loop with fast sub-partitioning in the coarse passes
    FastCoarseTune,
    /// Initial aggregation only
    NoTuning,
    /// Single optimize-and-consolidate pass, no aggregation loop
    NoAggregationOrTuning,
}

/// Clustering run configuration.
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    pub dynamics: DynamicsMode,
    pub optimization: OptimizationLevel,
    /// Independent attempts; the best partition by codelength wins
    pub num_trials: usize,
    /// RNG seed — identical seeds reproduce identical partitions
    pub seed: u64,
    /// Upper bound on optimization rounds per merge pass
    pub core_loop_limit: usize,
    /// Codelength gain below this counts as no improvement (bits)
    pub min_improvement: f64,
    /// Maximum aggregation levels per merge pass; 0 means unbounded
    pub level_aggregation_limit: usize,
    /// Teleportation rate for directed dynamics
    pub teleportation_rate: f64,
    /// Tune iterations per partition; 0 means until convergence
    pub tune_iteration_limit: usize,
    /// Sub-partition recursion depth used by coarse-tune
    pub coarse_tune_level: usize,
    /// Maximum depth of sub-structure exploration below the top modules
    pub sub_structure_depth: usize,
    /// Edge attribute holding weights; unset weighs every edge 1.0
    pub weight_attribute: Option<String>,
    /// Vertex attribute receiving the final integer cluster id
    pub result_attribute: String,
}

impl ClusterConfig {
    /// Validate all configuration parameters.
    pub fn validate(&self) -> Result<(), String> {
        if self.num_trials == 0 {
            return Err("num_trials must be > 0".into());
        }
        if self.core_loop_limit == 0 {
            return Err("core_loop_limit must be > 0".into());
        }
        if self.min_improvement <= 0.0 {
            return Err("min_improvement must be > 0".into());
        }
        if self.teleportation_rate <= 0.0 || self.teleportation_rate >= 1.0 {
            return Err("teleportation_rate must be in (0.0, 1.0)".into());
        }
        if self.result_attribute.is_empty() {
            return Err("result_attribute must not be empty".into());
        }
        Ok(())
    }
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            dynamics: DynamicsMode::Undirected,
            optimization: OptimizationLevel::FullCoarseTune,
            num_trials: 1,
            seed: 123,
            core_loop_limit: 10,
            min_improvement: 1e-10,
            level_aggregation_limit: 0,
            teleportation_rate: 0.15,
            tune_iteration_limit: 0,
            coarse_tune_level: 1,
            sub_structure_depth: 4,
            weight_attribute: None,
            result_attribute: "cluster".to_string(),
        }
    }
}
