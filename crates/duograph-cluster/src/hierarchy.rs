//! The hierarchical partition driver.
//!
//! A run repeatedly merges active nodes into modules that shorten the map
//! equation (greedy core in `greedy.rs`), consolidates each improvement into
//! the tree, alternates fine- and coarse-tuning passes, and finally descends
//! breadth-wise into module interiors: every module on one level is explored
//! before the next level's queue is processed, until no module yields a
//! non-trivial improvement.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::config::{ClusterConfig, OptimizationLevel};
use crate::flow::LeafNetwork;
use crate::greedy::plogp;
use crate::tree::{ClusterTree, FlowData, NodeIndex, SubStructure};

/// Tune passes stop when the relative gain drops below this fraction of the
/// initial codelength.
const MIN_RELATIVE_TUNE_IMPROVEMENT: f64 = 1e-5;

/// One breadth level of modules queued for sub-structure exploration.
///
/// An entry addresses a module by the chain of stored sub-partitions leading
/// down from the top instance; the last element is the module's node in the
/// owner's tree. The codelength fields carry what `process_partition_queue`
/// found on the level: the index and module cost of the sub-partitions that
/// improved, and the flat cost of the modules that stay leaves.
#[derive(Debug, Default)]
struct PartitionQueue {
    paths: Vec<Vec<NodeIndex>>,
    index_codelength: f64,
    module_codelength: f64,
    leaf_codelength: f64,
}

impl PartitionQueue {
    fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

/// One partitioning engine instance over one network level. Sub-structure
/// exploration spawns nested instances over module interiors.
#[derive(Debug)]
pub struct Infomap {
    pub(crate) config: ClusterConfig,
    pub(crate) tree: ClusterTree,
    pub(crate) rng: ChaCha8Rng,
    pub(crate) sub_level: usize,

    /// The network being optimized: leaf nodes or children of the root
    pub(crate) active: Vec<NodeIndex>,
    pub(crate) move_to: Vec<usize>,

    pub(crate) module_flow: Vec<FlowData>,
    pub(crate) module_members: Vec<usize>,
    pub(crate) empty_modules: Vec<usize>,

    // Map-equation terms over the active network
    pub(crate) node_flow_log_node_flow: f64,
    pub(crate) flow_log_flow: f64,
    pub(crate) exit_log_exit: f64,
    pub(crate) enter_log_enter: f64,
    pub(crate) enter_flow: f64,
    pub(crate) enter_flow_log_enter_flow: f64,
    pub(crate) exit_network_flow: f64,
    pub(crate) exit_network_flow_log: f64,

    pub(crate) index_codelength: f64,
    pub(crate) module_codelength: f64,
    pub(crate) codelength: f64,
    pub(crate) one_level_codelength: f64,
    pub(crate) hierarchical_codelength: f64,

    pub(crate) num_non_trivial_top: usize,
    pub(crate) detailed_balance: bool,

    best_partition: Option<Vec<u32>>,
    best_codelength: f64,
}

impl Infomap {
    fn empty(config: ClusterConfig, seed: u64) -> Infomap {
        Infomap {
            config,
            tree: ClusterTree::new(),
            rng: ChaCha8Rng::seed_from_u64(seed),
            sub_level: 0,
            active: Vec::new(),
            move_to: Vec::new(),
            module_flow: Vec::new(),
            module_members: Vec::new(),
            empty_modules: Vec::new(),
            node_flow_log_node_flow: 0.0,
            flow_log_flow: 0.0,
            exit_log_exit: 0.0,
            enter_log_enter: 0.0,
            enter_flow: 0.0,
            enter_flow_log_enter_flow: 0.0,
            exit_network_flow: 0.0,
            exit_network_flow_log: 0.0,
            index_codelength: 0.0,
            module_codelength: 0.0,
            codelength: 0.0,
            one_level_codelength: 0.0,
            hierarchical_codelength: 0.0,
            num_non_trivial_top: 0,
            detailed_balance: false,
            best_partition: None,
            best_codelength: f64::MAX,
        }
    }

    /// Build the top-level instance from a flow-annotated leaf network.
    pub(crate) fn from_network(network: LeafNetwork, config: ClusterConfig) -> Infomap {
        let seed = config.seed;
        let mut infomap = Infomap::empty(config, seed);
        infomap.detailed_balance = network.detailed_balance;

        let mut total_flow = 0.0;
        for i in 0..network.vertices.len() {
            total_flow += network.node_flow[i];
            infomap
                .tree
                .add_leaf(i, FlowData::node(network.node_flow[i], network.node_teleport[i]));
        }
        for (c, &flow) in network.connections.iter().zip(network.link_flow.iter()) {
            let source = infomap.tree.leaves[c.source];
            let target = infomap.tree.leaves[c.target];
            infomap.tree.add_edge(source, target, c.weight, flow);
        }

        let root = infomap.tree.root();
        infomap.tree.nodes[root].data.flow = total_flow;
        infomap.init_enter_exit_flow();
        infomap
    }

    /// Clone a module's interior into a fresh nested instance. The module's
    /// children get scratch indices so cloned edges can find their targets.
    pub(crate) fn sub_instance(&mut self, module: NodeIndex) -> Infomap {
        let seed = self.rng.gen::<u64>();
        let mut sub = Infomap::empty(self.config.clone(), seed);
        sub.sub_level = self.sub_level + 1;
        sub.detailed_balance = self.detailed_balance;

        let sub_root = sub.tree.root();
        sub.tree.nodes[sub_root].data = self.tree.nodes[module].data.clone();

        let children = self.tree.child_indices(module);
        for (i, &child) in children.iter().enumerate() {
            let data = self.tree.nodes[child].data.clone();
            let leaf = sub.tree.add_leaf(i, data);
            sub.tree.nodes[leaf].original_index = self.tree.nodes[child].original_index;
            self.tree.nodes[child].index = i;
        }

        for &child in &children {
            let out_edges = self.tree.nodes[child].out_edges.clone();
            for e in out_edges {
                let target = self.tree.edges[e].target;
                if self.tree.nodes[target].parent == Some(module) {
                    sub.tree.add_edge(
                        sub.tree.leaves[self.tree.nodes[child].index],
                        sub.tree.leaves[self.tree.nodes[target].index],
                        self.tree.edges[e].weight,
                        self.tree.edges[e].flow,
                    );
                }
            }
        }

        sub.exit_network_flow = self.tree.nodes[module].data.exit_flow;
        sub.exit_network_flow_log = plogp(sub.exit_network_flow);
        sub.one_level_codelength = sub.calc_codelength_from_flow_within_or_exit(sub_root);
        sub.tree.nodes[sub_root].codelength = sub.one_level_codelength;
        sub
    }

    // -----------------------------------------------------------------
    // Driver
    // -----------------------------------------------------------------

    /// Run the configured number of trials and keep the best partition.
    pub fn run(&mut self) {
        if self.tree.leaf_count() == 0 {
            return;
        }
        let root = self.tree.root();
        self.one_level_codelength = self.calc_codelength_from_flow_within_or_exit(root);
        self.tree.nodes[root].codelength = self.one_level_codelength;
        self.index_codelength = self.one_level_codelength;
        self.best_codelength = f64::MAX;

        for _trial in 0..self.config.num_trials {
            // Clear modular structure left by the previous attempt.
            let first_leaf = self.tree.leaves[0];
            while self.tree.nodes[first_leaf].parent != Some(root) {
                self.tree.replace_children_with_grandchildren(root);
            }

            self.run_partition();

            if self.hierarchical_codelength < self.best_codelength {
                self.best_codelength = self.hierarchical_codelength;
                self.best_partition = Some(self.current_partition());
            }
        }
    }

    fn run_partition(&mut self) {
        self.hierarchical_codelength = self.one_level_codelength;
        self.index_codelength = self.one_level_codelength;
        self.module_codelength = 0.0;

        if self.config.optimization == OptimizationLevel::NoAggregationOrTuning {
            // Two-level only: no exploration below the modules.
            self.partition();
            self.hierarchical_codelength = self.codelength;
            let root = self.tree.root();
            for module in self.tree.child_indices(root) {
                self.tree.nodes[module].codelength =
                    self.calc_codelength_from_flow_within_or_exit(module);
            }
            return;
        }

        let mut queue = PartitionQueue::default();
        self.partition_and_queue_next_level(&mut queue);

        // Breadth-wise descent: explore every module on one level, collect
        // the next level from the sub-partitions that improved, swap queues
        // and repeat. The hierarchical codelength converges from above as
        // the unexplored remainder shrinks.
        let mut consolidated = self.hierarchical_codelength - queue.module_codelength;
        while !queue.is_empty() {
            let mut next = PartitionQueue::default();
            self.process_partition_queue(&mut queue, &mut next);
            consolidated += queue.index_codelength + queue.leaf_codelength;
            self.hierarchical_codelength = consolidated + queue.module_codelength;
            queue = next;
        }
    }

    /// Two-level partition of this instance, then queue its top modules for
    /// the next level of exploration.
    fn partition_and_queue_next_level(&mut self, queue: &mut PartitionQueue) {
        let root = self.tree.root();
        self.codelength = self.tree.nodes[root].codelength;
        self.hierarchical_codelength = self.codelength;

        if self.num_leaf_nodes() == 1 {
            return;
        }

        self.partition();
        self.hierarchical_codelength = self.codelength;

        if self.num_top_modules() == 1 {
            let only = self.tree.nodes[root].first_child.expect("root has a child");
            self.tree.nodes[only].codelength = self.codelength;
            return;
        }

        self.queue_top_modules(queue);
    }

    fn queue_top_modules(&mut self, queue: &mut PartitionQueue) {
        let root = self.tree.root();
        queue.paths =
            self.tree.child_indices(root).into_iter().map(|module| vec![module]).collect();
        queue.index_codelength = self.index_codelength;
        queue.module_codelength = self.module_codelength;
        queue.leaf_codelength = 0.0;
    }

    /// Partition the interior of every queued module. A module whose
    /// sub-partition improves on its flat codelength keeps the nested
    /// instance and contributes its sub-modules to the next level; the rest
    /// are flagged as explored and kept flat.
    fn process_partition_queue(&mut self, queue: &mut PartitionQueue, next: &mut PartitionQueue) {
        let mut index_codelength = 0.0;
        let mut module_codelength = 0.0;
        let mut leaf_codelength = 0.0;

        for path in &queue.paths {
            let module = *path.last().expect("queued path is never empty");
            let owner = self.owner_of(&path[..path.len() - 1]);

            owner.tree.nodes[module].sub = SubStructure::default();
            let flat_codelength = owner.calc_codelength_from_flow_within_or_exit(module);
            owner.tree.nodes[module].codelength = flat_codelength;

            // Trivial interiors and exhausted depth stay flat.
            if owner.tree.nodes[module].child_degree <= 2
                || owner.sub_level >= owner.config.sub_structure_depth
            {
                leaf_codelength += flat_codelength;
                continue;
            }

            let mut sub = owner.sub_instance(module);
            let mut sub_queue = PartitionQueue::default();
            sub.partition_and_queue_next_level(&mut sub_queue);

            let non_trivial =
                sub.num_top_modules() > 1 && sub.num_top_modules() < sub.num_leaf_nodes();
            let improved = non_trivial
                && sub.hierarchical_codelength
                    < flat_codelength - owner.config.min_improvement;
            if !improved {
                leaf_codelength += flat_codelength;
                owner.tree.nodes[module].sub.explored_without_improvement = true;
                continue;
            }

            index_codelength += sub.index_codelength;
            module_codelength += sub.module_codelength;
            owner.tree.nodes[module].sub.partition = Some(Box::new(sub));
            for sub_path in sub_queue.paths {
                let mut extended = path.clone();
                extended.extend(sub_path);
                next.paths.push(extended);
            }
        }

        queue.index_codelength = index_codelength;
        queue.module_codelength = module_codelength;
        queue.leaf_codelength = leaf_codelength;
    }

    /// Walk a chain of stored sub-partitions down from this instance.
    fn owner_of(&mut self, hops: &[NodeIndex]) -> &mut Infomap {
        let mut owner = self;
        for &hop in hops {
            owner = owner.tree.nodes[hop]
                .sub
                .partition
                .as_deref_mut()
                .expect("queued path descends through stored sub-partitions");
        }
        owner
    }

    /// Two-level partition of the current (flat) tree plus tuning.
    pub(crate) fn partition(&mut self) {
        let (fast, aggregation_limit) = match self.config.optimization {
            OptimizationLevel::NoAggregationOrTuning => (true, 1),
            OptimizationLevel::NoTuning => (true, self.config.level_aggregation_limit),
            _ => (false, self.config.level_aggregation_limit),
        };
        self.partition_nested(0, fast, aggregation_limit);
    }

    fn partition_nested(&mut self, recursive_count: usize, fast: bool, aggregation_limit: usize) {
        if self.num_leaf_nodes() == 1 {
            self.codelength = self.one_level_codelength;
            return;
        }

        self.set_active_from_children_of_root();
        self.init_constant_terms();
        self.init_module_optimization();
        let initial_codelength = self.codelength;

        self.merge_and_consolidate_repeatedly(aggregation_limit);

        let tune = !fast
            && self.config.tune_iteration_limit != 1
            && self.num_top_modules() != self.num_leaf_nodes();
        if tune {
            let mut tune_count = 1;
            let coarse_level = self.config.coarse_tune_level.saturating_sub(1);
            let mut do_fine = true;
            let mut old_codelength = self.codelength;
            while self.num_top_modules() > 1 {
                if do_fine {
                    self.fine_tune();
                } else {
                    self.coarse_tune(coarse_level);
                }
                if self.codelength
                    > old_codelength - initial_codelength * MIN_RELATIVE_TUNE_IMPROVEMENT
                    || self.codelength > old_codelength - self.config.min_improvement
                {
                    break;
                }
                old_codelength = self.codelength;

                tune_count += 1;
                if self.config.tune_iteration_limit != 0
                    && tune_count == self.config.tune_iteration_limit
                {
                    break;
                }
                do_fine = !do_fine;
            }
        }

        if !fast
            && recursive_count > 0
            && self.num_top_modules() != 1
            && self.num_top_modules() != self.num_leaf_nodes()
        {
            self.partition_each_module(recursive_count - 1, false);

            // Move the leaves into the per-module sub-structure just found.
            self.set_active_from_leaves();
            for i in 0..self.active.len() {
                let leaf = self.active[i];
                self.move_to[i] = self.tree.nodes[leaf].index;
            }
            self.init_module_optimization();
            self.move_nodes_to_predefined_modules();
            self.consolidate_modules(true, true);
            self.pack_top_module_indices();
        }
    }

    /// Merge and consolidate until no level of aggregation improves the
    /// codelength (bounded by `aggregation_limit`, 0 meaning unbounded).
    fn merge_and_consolidate_repeatedly(&mut self, aggregation_limit: usize) {
        self.optimize_modules();
        self.consolidate_modules(true, false);
        let mut levels = 1;

        while self.num_top_modules() > 1 && (aggregation_limit == 0 || levels < aggregation_limit)
        {
            let consolidated_codelength = self.codelength;
            let consolidated_index = self.index_codelength;
            let consolidated_module = self.module_codelength;

            self.set_active_from_children_of_root();
            self.init_module_optimization();
            self.optimize_modules();

            // If the super level does not pay, restore the codelength terms
            // of the structure that actually stands.
            if !(self.codelength < consolidated_codelength - self.config.min_improvement) {
                self.codelength = consolidated_codelength;
                self.index_codelength = consolidated_index;
                self.module_codelength = consolidated_module;
                break;
            }

            self.consolidate_modules(true, false);
            levels += 1;
        }

        self.pack_top_module_indices();
    }

    fn pack_top_module_indices(&mut self) {
        let root = self.tree.root();
        for (i, module) in self.tree.child_indices(root).into_iter().enumerate() {
            self.tree.nodes[module].index = i;
            self.tree.nodes[module].original_index = Some(i);
        }
    }

    /// Re-optimize leaf placement starting from the current modules.
    fn fine_tune(&mut self) {
        self.set_active_from_leaves();
        for i in 0..self.active.len() {
            let leaf = self.active[i];
            let parent = self.tree.nodes[leaf].parent.expect("leaf sits below a module");
            self.move_to[i] = self.tree.nodes[parent].index;
        }
        self.init_module_optimization();
        self.move_nodes_to_predefined_modules();
        self.merge_and_consolidate_repeatedly(0);
    }

    /// Split each module into sub-modules, then re-optimize with the
    /// sub-modules as the movable units.
    fn coarse_tune(&mut self, recursive_count: usize) {
        if self.num_top_modules() == 1 {
            return;
        }
        let fast_partition = self.config.optimization == OptimizationLevel::FastCoarseTune;
        self.partition_each_module(recursive_count, fast_partition);

        // Leaves into the sub-module structure.
        self.set_active_from_leaves();
        for i in 0..self.active.len() {
            let leaf = self.active[i];
            self.move_to[i] = self.tree.nodes[leaf].index;
        }
        self.init_module_optimization();
        self.move_nodes_to_predefined_modules();
        self.consolidate_modules(true, true);

        // Sub-modules into the former module structure, then optimize from
        // there.
        self.set_active_from_children_of_root();
        for i in 0..self.active.len() {
            let sub_module = self.active[i];
            self.move_to[i] = self.tree.nodes[sub_module].index;
        }
        self.init_module_optimization();
        self.move_nodes_to_predefined_modules();
        self.merge_and_consolidate_repeatedly(0);
    }

    /// Partition each module's interior in a nested instance; leaves collect
    /// their sub-module index (offset so indices stay unique across modules).
    fn partition_each_module(&mut self, recursive_count: usize, fast: bool) {
        let root = self.tree.root();
        let mut module_index_offset = 0;
        for module in self.tree.child_indices(root) {
            // A single child cannot split further.
            if self.tree.nodes[module].child_degree == 1 {
                for child in self.tree.child_indices(module) {
                    self.tree.nodes[child].index = module_index_offset;
                }
                module_index_offset += 1;
                continue;
            }

            let mut sub = self.sub_instance(module);
            sub.partition_nested(recursive_count, fast, 0);

            let children = self.tree.child_indices(module);
            for (i, &child) in children.iter().enumerate() {
                let sub_leaf = sub.tree.leaves[i];
                let sub_parent =
                    sub.tree.nodes[sub_leaf].parent.expect("sub leaf sits below a module");
                self.tree.nodes[child].index =
                    sub.tree.nodes[sub_parent].index + module_index_offset;
            }
            module_index_offset += sub.num_top_modules();
        }
    }

    // -----------------------------------------------------------------
    // Results
    // -----------------------------------------------------------------

    pub fn num_top_modules(&self) -> usize {
        let root = self.tree.root();
        self.tree.nodes[root].child_degree
    }

    /// Top modules holding more than one child.
    pub fn num_non_trivial_top_modules(&self) -> usize {
        self.num_non_trivial_top
    }

    pub fn num_leaf_nodes(&self) -> usize {
        self.tree.leaf_count()
    }

    pub fn codelength(&self) -> f64 {
        self.codelength
    }

    pub fn hierarchical_codelength(&self) -> f64 {
        self.hierarchical_codelength
    }

    fn current_partition(&self) -> Vec<u32> {
        self.tree
            .leaves
            .iter()
            .map(|&leaf| {
                let parent = self.tree.nodes[leaf].parent.expect("leaf attached to a module");
                self.tree.nodes[parent].index as u32
            })
            .collect()
    }

    /// Cluster id per leaf in source-vertex order: the best partition seen
    /// across trials.
    pub fn partition_vector(&self) -> Vec<u32> {
        match &self.best_partition {
            Some(best) => best.clone(),
            None => self.current_partition(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DynamicsMode;
    use crate::flow::{Connection, LeafNetwork};
    use duograph_core::VertexId;

    fn network(n: usize, links: &[(usize, usize, f64)], config: &ClusterConfig) -> LeafNetwork {
        let vertices = (0..n as u32).map(VertexId).collect();
        let connections = links
            .iter()
            .map(|&(source, target, weight)| Connection { source, target, weight })
            .collect();
        LeafNetwork::from_parts(vertices, connections, config)
    }

    fn run(n: usize, links: &[(usize, usize, f64)], config: ClusterConfig) -> (Infomap, Vec<u32>) {
        let mut infomap = Infomap::from_network(network(n, links, &config), config);
        infomap.run();
        let partition = infomap.partition_vector();
        (infomap, partition)
    }

    #[test]
    fn test_partition_is_total_and_packed() {
        let links = [(0, 1, 1.0), (1, 2, 1.0), (2, 3, 1.0), (3, 0, 1.0)];
        let (_, partition) = run(4, &links, ClusterConfig::default());
        assert_eq!(partition.len(), 4);
        let max = *partition.iter().max().unwrap() as usize;
        for id in 0..=max {
            assert!(
                partition.iter().any(|&p| p as usize == id),
                "cluster ids must be packed, missing {} in {:?}",
                id,
                partition
            );
        }
    }

    #[test]
    fn test_two_pair_graph_separates() {
        // Twins 0-1 tied tightly, 2-3 tied tightly, one weak bridge.
        let links = [(0, 1, 5.0), (2, 3, 5.0), (1, 2, 1.0)];
        let (_, partition) = run(4, &links, ClusterConfig::default());

        assert_eq!(partition[0], partition[1], "twin nodes share a cluster");
        assert_eq!(partition[2], partition[3]);
        assert_ne!(partition[0], partition[3], "distant node gets its own cluster");
    }

    #[test]
    fn test_two_cliques_with_bridge() {
        let links = [
            (0, 1, 1.0),
            (0, 2, 1.0),
            (1, 2, 1.0),
            (3, 4, 1.0),
            (3, 5, 1.0),
            (4, 5, 1.0),
            (2, 3, 0.2),
        ];
        let (infomap, partition) = run(6, &links, ClusterConfig::default());
        assert_eq!(partition[0], partition[1]);
        assert_eq!(partition[0], partition[2]);
        assert_eq!(partition[3], partition[4]);
        assert_eq!(partition[3], partition[5]);
        assert_ne!(partition[0], partition[3]);
        assert!(infomap.codelength() <= infomap.one_level_codelength + 1e-12);
        // Exploring module interiors can only tighten the two-level bound.
        assert!(infomap.hierarchical_codelength() <= infomap.codelength() + 1e-9);
        assert_eq!(infomap.num_non_trivial_top_modules(), 2);
    }

    #[test]
    fn test_seeded_runs_reproduce() {
        let links = [
            (0, 1, 3.0),
            (1, 2, 3.0),
            (0, 2, 3.0),
            (3, 4, 3.0),
            (4, 5, 3.0),
            (3, 5, 3.0),
            (2, 3, 1.0),
            (5, 0, 1.0),
        ];
        let (_, first) = run(6, &links, ClusterConfig::default());
        let (_, second) = run(6, &links, ClusterConfig::default());
        assert_eq!(first, second, "identical seeds must reproduce the partition");
    }

    #[test]
    fn test_singleton_graph() {
        let (_, partition) = run(1, &[], ClusterConfig::default());
        assert_eq!(partition, vec![0]);
    }

    #[test]
    fn test_isolated_nodes_stay_apart() {
        let (_, partition) = run(3, &[], ClusterConfig::default());
        assert_eq!(partition.len(), 3);
        // No links, no merging: three singleton clusters.
        let mut ids = partition.clone();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 3);
    }

    #[test]
    fn test_optimization_levels_produce_valid_partitions() {
        let links = [(0, 1, 5.0), (2, 3, 5.0), (1, 2, 1.0)];
        for optimization in [
            OptimizationLevel::FullCoarseTune,
            OptimizationLevel::FastCoarseTune,
            OptimizationLevel::NoTuning,
            OptimizationLevel::NoAggregationOrTuning,
        ] {
            let config = ClusterConfig { optimization, ..ClusterConfig::default() };
            let (_, partition) = run(4, &links, config);
            assert_eq!(partition.len(), 4, "{:?} must assign every vertex", optimization);
        }
    }

    #[test]
    fn test_directed_cycle_clusters() {
        let links = [
            (0, 1, 2.0),
            (1, 0, 2.0),
            (2, 3, 2.0),
            (3, 2, 2.0),
            (1, 2, 0.5),
            (3, 0, 0.5),
        ];
        let config =
            ClusterConfig { dynamics: DynamicsMode::Directed, ..ClusterConfig::default() };
        let (_, partition) = run(4, &links, config);
        assert_eq!(partition.len(), 4);
        assert_eq!(partition[0], partition[1]);
        assert_eq!(partition[2], partition[3]);
    }
}
