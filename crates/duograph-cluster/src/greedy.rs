//! The greedy map-equation core: codelength bookkeeping, single-node move
//! search, and consolidation of dynamic modules into the tree.
//!
//! Move search keeps the O(d) marginal-delta structure of the original:
//! a redirect array maps neighbour modules to scratch slots, refreshed per
//! node by bumping an offset instead of clearing the array.

use std::collections::BTreeMap;

use rand::seq::SliceRandom;
use rand::Rng;

use crate::hierarchy::Infomap;
use crate::tree::NodeIndex;

/// p * log2(p), with plogp(0) = 0. Codelengths are in bits.
pub(crate) fn plogp(p: f64) -> f64 {
    if p > 0.0 {
        p * p.log2()
    } else {
        0.0
    }
}

/// Marginal enter/exit flow between a node and one candidate module.
#[derive(Debug, Clone, Default)]
pub(crate) struct DeltaFlow {
    pub module: usize,
    pub delta_exit: f64,
    pub delta_enter: f64,
}

impl Infomap {
    /// Seed enter/exit flow on the leaf nodes from the link flow. Self-loops
    /// stay inside their node and never contribute. Under detailed balance
    /// every link carries flow both ways.
    pub(crate) fn init_enter_exit_flow(&mut self) {
        for e in 0..self.tree.edges.len() {
            if self.tree.is_self_pointing(e) {
                continue;
            }
            let (source, target, flow) = {
                let edge = &self.tree.edges[e];
                (edge.source, edge.target, edge.flow)
            };
            self.tree.nodes[source].data.exit_flow += flow;
            self.tree.nodes[target].data.enter_flow += flow;
            if self.detailed_balance {
                self.tree.nodes[source].data.enter_flow += flow;
                self.tree.nodes[target].data.exit_flow += flow;
            }
        }
    }

    pub(crate) fn set_active_from_leaves(&mut self) {
        self.active = self.tree.leaves.clone();
        self.move_to = vec![0; self.active.len()];
    }

    pub(crate) fn set_active_from_children_of_root(&mut self) {
        let root = self.tree.root();
        self.active = self.tree.child_indices(root);
        self.move_to = vec![0; self.active.len()];
    }

    /// Constant while the same leaf network is being partitioned.
    pub(crate) fn init_constant_terms(&mut self) {
        self.node_flow_log_node_flow = self
            .active
            .iter()
            .map(|&node| plogp(self.tree.nodes[node].data.flow))
            .sum();
    }

    /// One module per active node, then the initial codelength terms.
    pub(crate) fn init_module_optimization(&mut self) {
        let num_nodes = self.active.len();
        self.module_flow = self
            .active
            .iter()
            .map(|&node| self.tree.nodes[node].data.clone())
            .collect();
        self.module_members = vec![1; num_nodes];
        self.empty_modules = Vec::with_capacity(num_nodes);
        for (i, &node) in self.active.iter().enumerate() {
            self.tree.nodes[node].index = i;
        }
        self.calculate_codelength_from_active_network();
    }

    /// Codelength terms for the current one-module-per-node state. Under
    /// detailed balance enter equals exit, so the general form covers both.
    pub(crate) fn calculate_codelength_from_active_network(&mut self) {
        self.flow_log_flow = 0.0;
        self.exit_log_exit = 0.0;
        self.enter_log_enter = 0.0;
        self.enter_flow = 0.0;

        for &node in &self.active {
            let data = &self.tree.nodes[node].data;
            // Own module codebook.
            self.flow_log_flow += plogp(data.flow + data.exit_flow);
            // Use of the index codebook.
            self.enter_log_enter += plogp(data.enter_flow);
            self.exit_log_exit += plogp(data.exit_flow);
            self.enter_flow += data.enter_flow;
        }

        self.enter_flow += self.exit_network_flow;
        self.enter_flow_log_enter_flow = plogp(self.enter_flow);

        self.index_codelength =
            self.enter_flow_log_enter_flow - self.enter_log_enter - self.exit_network_flow_log;
        self.module_codelength =
            -self.exit_log_exit + self.flow_log_flow - self.node_flow_log_node_flow;
        self.codelength = self.index_codelength + self.module_codelength;
    }

    /// Codelength change if `current` moved between the two modules.
    fn get_delta_codelength(
        &self,
        current: NodeIndex,
        old_delta: &DeltaFlow,
        new_delta: &DeltaFlow,
    ) -> f64 {
        let old_module = old_delta.module;
        let new_module = new_delta.module;
        let delta_old = old_delta.delta_enter + old_delta.delta_exit;
        let delta_new = new_delta.delta_enter + new_delta.delta_exit;
        let data = &self.tree.nodes[current].data;

        let delta_enter =
            plogp(self.enter_flow + delta_old - delta_new) - self.enter_flow_log_enter_flow;

        let delta_enter_log_enter = -plogp(self.module_flow[old_module].enter_flow)
            - plogp(self.module_flow[new_module].enter_flow)
            + plogp(self.module_flow[old_module].enter_flow - data.enter_flow + delta_old)
            + plogp(self.module_flow[new_module].enter_flow + data.enter_flow - delta_new);

        let delta_exit_log_exit = -plogp(self.module_flow[old_module].exit_flow)
            - plogp(self.module_flow[new_module].exit_flow)
            + plogp(self.module_flow[old_module].exit_flow - data.exit_flow + delta_old)
            + plogp(self.module_flow[new_module].exit_flow + data.exit_flow - delta_new);

        let delta_flow_log_flow = -plogp(
            self.module_flow[old_module].exit_flow + self.module_flow[old_module].flow,
        ) - plogp(self.module_flow[new_module].exit_flow + self.module_flow[new_module].flow)
            + plogp(
                self.module_flow[old_module].exit_flow + self.module_flow[old_module].flow
                    - data.exit_flow
                    - data.flow
                    + delta_old,
            )
            + plogp(
                self.module_flow[new_module].exit_flow + self.module_flow[new_module].flow
                    + data.exit_flow
                    + data.flow
                    - delta_new,
            );

        delta_enter - delta_enter_log_enter - delta_exit_log_exit + delta_flow_log_flow
    }

    /// Apply the move of `current` to the codelength terms and module flow.
    fn update_codelength(
        &mut self,
        current: NodeIndex,
        old_delta: &DeltaFlow,
        new_delta: &DeltaFlow,
    ) {
        let old_module = old_delta.module;
        let new_module = new_delta.module;
        let delta_old = old_delta.delta_enter + old_delta.delta_exit;
        let delta_new = new_delta.delta_enter + new_delta.delta_exit;

        self.enter_flow -= self.module_flow[old_module].enter_flow
            + self.module_flow[new_module].enter_flow;
        self.enter_log_enter -= plogp(self.module_flow[old_module].enter_flow)
            + plogp(self.module_flow[new_module].enter_flow);
        self.exit_log_exit -= plogp(self.module_flow[old_module].exit_flow)
            + plogp(self.module_flow[new_module].exit_flow);
        self.flow_log_flow -= plogp(
            self.module_flow[old_module].exit_flow + self.module_flow[old_module].flow,
        ) + plogp(self.module_flow[new_module].exit_flow + self.module_flow[new_module].flow);

        let data = self.tree.nodes[current].data.clone();
        self.module_flow[old_module].sub(&data);
        self.module_flow[new_module].add(&data);

        self.module_flow[old_module].enter_flow += delta_old;
        self.module_flow[old_module].exit_flow += delta_old;
        self.module_flow[new_module].enter_flow -= delta_new;
        self.module_flow[new_module].exit_flow -= delta_new;

        self.enter_flow += self.module_flow[old_module].enter_flow
            + self.module_flow[new_module].enter_flow;
        self.enter_log_enter += plogp(self.module_flow[old_module].enter_flow)
            + plogp(self.module_flow[new_module].enter_flow);
        self.exit_log_exit += plogp(self.module_flow[old_module].exit_flow)
            + plogp(self.module_flow[new_module].exit_flow);
        self.flow_log_flow += plogp(
            self.module_flow[old_module].exit_flow + self.module_flow[old_module].flow,
        ) + plogp(self.module_flow[new_module].exit_flow + self.module_flow[new_module].flow);

        self.enter_flow_log_enter_flow = plogp(self.enter_flow);

        self.index_codelength =
            self.enter_flow_log_enter_flow - self.enter_log_enter - self.exit_network_flow_log;
        self.module_codelength =
            -self.exit_log_exit + self.flow_log_flow - self.node_flow_log_node_flow;
        self.codelength = self.index_codelength + self.module_codelength;
    }

    /// Optimization loop: move nodes until a round stops paying or the loop
    /// limit is reached. Returns the number of rounds run.
    pub(crate) fn optimize_modules(&mut self) -> usize {
        let mut rounds = 0;
        loop {
            let old_codelength = self.codelength;
            self.try_move_each_node_into_best_module();
            rounds += 1;
            if rounds == self.config.core_loop_limit
                || !(self.codelength < old_codelength - self.config.min_improvement)
            {
                break;
            }
        }
        rounds
    }

    /// Visit every active node in random order and move it to the
    /// neighbouring (or empty) module that shrinks the codelength the most.
    /// Returns the number of nodes moved.
    pub(crate) fn try_move_each_node_into_best_module(&mut self) -> usize {
        let num_nodes = self.active.len();

        let mut order: Vec<usize> = (0..num_nodes).collect();
        order.shuffle(&mut self.rng);

        let mut module_delta: Vec<DeltaFlow> = vec![DeltaFlow::default(); num_nodes + 2];
        let mut redirect = vec![0usize; num_nodes];
        let mut offset = 1usize;
        let max_offset = usize::MAX - 2 - num_nodes;

        let mut num_moved = 0;
        for &flip in &order {
            if offset > max_offset {
                redirect.iter_mut().for_each(|r| *r = 0);
                offset = 1;
            }

            let current = self.active[flip];
            let current_module = self.tree.nodes[current].index;

            // A node with no links will not move and nothing moves onto it.
            if self.tree.nodes[current].degree() == 0 {
                offset += num_nodes;
                continue;
            }

            // Collect the marginal flow to each neighbouring module.
            let mut num_links = 0usize;
            if self.tree.nodes[current].is_dangling() {
                redirect[current_module] = offset + num_links;
                module_delta[num_links] =
                    DeltaFlow { module: current_module, delta_exit: 0.0, delta_enter: 0.0 };
                num_links += 1;
            } else {
                let out_edges = self.tree.nodes[current].out_edges.clone();
                for e in out_edges {
                    if self.tree.is_self_pointing(e) {
                        continue;
                    }
                    let neighbour = self.tree.edges[e].target;
                    let neighbour_module = self.tree.nodes[neighbour].index;
                    let flow = self.tree.edges[e].flow;
                    if redirect[neighbour_module] >= offset {
                        module_delta[redirect[neighbour_module] - offset].delta_exit += flow;
                    } else {
                        redirect[neighbour_module] = offset + num_links;
                        module_delta[num_links] = DeltaFlow {
                            module: neighbour_module,
                            delta_exit: flow,
                            delta_enter: 0.0,
                        };
                        num_links += 1;
                    }
                }
            }

            let in_edges = self.tree.nodes[current].in_edges.clone();
            for e in in_edges {
                if self.tree.is_self_pointing(e) {
                    continue;
                }
                let neighbour = self.tree.edges[e].source;
                let neighbour_module = self.tree.nodes[neighbour].index;
                let flow = self.tree.edges[e].flow;
                if redirect[neighbour_module] >= offset {
                    module_delta[redirect[neighbour_module] - offset].delta_enter += flow;
                } else {
                    redirect[neighbour_module] = offset + num_links;
                    module_delta[num_links] = DeltaFlow {
                        module: neighbour_module,
                        delta_exit: 0.0,
                        delta_enter: flow,
                    };
                    num_links += 1;
                }
            }

            // The node's own module, if no link pointed back at it.
            if redirect[current_module] < offset {
                redirect[current_module] = offset + num_links;
                module_delta[num_links] =
                    DeltaFlow { module: current_module, delta_exit: 0.0, delta_enter: 0.0 };
                num_links += 1;
            }

            // Option to open an empty module, unless already alone.
            if self.module_members[current_module] > 1 && !self.empty_modules.is_empty() {
                module_delta[num_links] = DeltaFlow {
                    module: *self.empty_modules.last().expect("checked non-empty"),
                    delta_exit: 0.0,
                    delta_enter: 0.0,
                };
                num_links += 1;
            }

            let old_module_delta = module_delta[redirect[current_module] - offset].clone();

            // Randomize candidate order; ties resolve to the first best seen.
            for j in 0..num_links.saturating_sub(1) {
                let swap_with = j + self.rng.gen_range(0..=(num_links - j - 1));
                module_delta.swap(j, swap_with);
            }

            let mut best = old_module_delta.clone();
            let mut best_delta = 0.0;
            for candidate in module_delta.iter().take(num_links) {
                if candidate.module == current_module {
                    continue;
                }
                let delta = self.get_delta_codelength(current, &old_module_delta, candidate);
                if delta < best_delta {
                    best = candidate.clone();
                    best_delta = delta;
                }
            }

            if best.module != current_module {
                let best_module = best.module;
                if self.module_members[best_module] == 0 {
                    self.empty_modules.pop();
                }
                if self.module_members[current_module] == 1 {
                    self.empty_modules.push(current_module);
                }

                self.update_codelength(current, &old_module_delta, &best);

                self.module_members[current_module] -= 1;
                self.module_members[best_module] += 1;
                self.tree.nodes[current].index = best_module;
                num_moved += 1;
            }

            offset += num_nodes;
        }

        num_moved
    }

    /// Move each active node to the module `move_to` prescribes, updating
    /// the codelength terms move by move.
    pub(crate) fn move_nodes_to_predefined_modules(&mut self) -> usize {
        debug_assert_eq!(self.move_to.len(), self.active.len());
        let num_nodes = self.active.len();
        let mut num_moved = 0;

        for k in 0..num_nodes {
            let current = self.active[k];
            let old_module = self.tree.nodes[current].index;
            let new_module = self.move_to[k];
            if new_module == old_module {
                continue;
            }

            let mut old_delta =
                DeltaFlow { module: old_module, delta_exit: 0.0, delta_enter: 0.0 };
            let mut new_delta =
                DeltaFlow { module: new_module, delta_exit: 0.0, delta_enter: 0.0 };

            let out_edges = self.tree.nodes[current].out_edges.clone();
            for e in out_edges {
                if self.tree.is_self_pointing(e) {
                    continue;
                }
                let other = self.tree.nodes[self.tree.edges[e].target].index;
                if other == old_module {
                    old_delta.delta_exit += self.tree.edges[e].flow;
                } else if other == new_module {
                    new_delta.delta_exit += self.tree.edges[e].flow;
                }
            }

            let in_edges = self.tree.nodes[current].in_edges.clone();
            for e in in_edges {
                if self.tree.is_self_pointing(e) {
                    continue;
                }
                let other = self.tree.nodes[self.tree.edges[e].source].index;
                if other == old_module {
                    old_delta.delta_enter += self.tree.edges[e].flow;
                } else if other == new_module {
                    new_delta.delta_enter += self.tree.edges[e].flow;
                }
            }

            if self.module_members[new_module] == 0 {
                self.empty_modules.pop();
            }
            if self.module_members[old_module] == 1 {
                self.empty_modules.push(old_module);
            }

            self.update_codelength(current, &old_delta, &new_delta);

            self.module_members[old_module] -= 1;
            self.module_members[new_module] += 1;
            self.tree.nodes[current].index = new_module;
            num_moved += 1;
        }

        num_moved
    }

    /// Turn the non-empty dynamic modules into tree nodes above the active
    /// network and aggregate inter-module links onto the new level.
    ///
    /// With `as_sub_modules` the dynamic modules are inserted *below* the
    /// existing modules (whose former structure is stored on the sub-module
    /// scratch index); otherwise they replace the level above the active
    /// network. Returns the number of consolidated modules.
    pub(crate) fn consolidate_modules(
        &mut self,
        replace_existing: bool,
        as_sub_modules: bool,
    ) -> usize {
        let root = self.tree.root();
        let num_nodes = self.active.len();
        let mut modules: Vec<Option<NodeIndex>> = vec![None; num_nodes];

        let first_active = self.active[0];
        let active_has_module_level = self.tree.nodes[first_active].parent != Some(root);
        let active_is_leaf_level = self.tree.is_leaf(first_active);

        if as_sub_modules {
            debug_assert!(active_has_module_level);
            // Detach the leaf nodes so the new sub-modules become the
            // modules' only children.
            for module in self.tree.child_indices(root) {
                self.tree.release_children(module);
            }
        } else {
            // After fine-tune the active leaves still sit under the old
            // modules; dissolve that level before rebuilding it.
            if active_has_module_level {
                self.tree.replace_children_with_grandchildren(root);
            }
            self.tree.release_children(root);
        }

        // Create the module nodes and re-parent the active network. The
        // stale parent link of each released node points at the level the
        // new module must attach under.
        for i in 0..num_nodes {
            let node = self.active[i];
            let module_index = self.tree.nodes[node].index;
            let module = match modules[module_index] {
                Some(module) => module,
                None => {
                    let module = self.tree.new_node(self.module_flow[module_index].clone());
                    let old_parent =
                        self.tree.nodes[node].parent.expect("released node keeps a stale parent");
                    self.tree.add_child(old_parent, module);
                    self.tree.nodes[module].index = module_index;
                    modules[module_index] = Some(module);
                    module
                }
            };
            self.tree.add_child(module, node);
        }

        for module in modules.iter().flatten() {
            let leaves: usize =
                self.tree.children(*module).map(|c| self.tree.nodes[c].leaf_count).sum();
            self.tree.nodes[*module].leaf_count = leaves;
        }

        if as_sub_modules {
            // Remember which module each sub-module belonged to, then drop
            // the old module level if asked to.
            for (module_index, module) in
                self.tree.child_indices(root).into_iter().enumerate()
            {
                for sub_module in self.tree.child_indices(module) {
                    self.tree.nodes[sub_module].index = module_index;
                }
            }
            if replace_existing {
                self.tree.replace_children_with_grandchildren(root);
            }
        }

        // Aggregate links between different parents onto the new level,
        // in node-id order so runs are reproducible.
        let mut module_links: BTreeMap<(u32, u32), ((NodeIndex, NodeIndex), f64)> =
            BTreeMap::new();
        for i in 0..num_nodes {
            let node = self.active[i];
            let parent = self.tree.nodes[node].parent.expect("just re-parented");
            let out_edges = self.tree.nodes[node].out_edges.clone();
            for e in out_edges {
                let other_parent = self.tree.nodes[self.tree.edges[e].target].parent
                    .expect("active sibling has a parent");
                if other_parent == parent {
                    continue;
                }
                let (mut m1, mut m2) = (parent, other_parent);
                // Undirected flow aggregates opposite directions together.
                if self.detailed_balance
                    && self.tree.nodes[m1].index > self.tree.nodes[m2].index
                {
                    std::mem::swap(&mut m1, &mut m2);
                }
                let key = (self.tree.nodes[m1].id, self.tree.nodes[m2].id);
                let flow = self.tree.edges[e].flow;
                module_links
                    .entry(key)
                    .and_modify(|(_, aggregated)| *aggregated += flow)
                    .or_insert(((m1, m2), flow));
            }
        }
        for ((m1, m2), flow) in module_links.into_values() {
            self.tree.add_edge(m1, m2, 0.0, flow);
        }

        // When consolidating a module level in place, the old units dissolve
        // into their children.
        if !active_is_leaf_level && replace_existing {
            for i in 0..num_nodes {
                let node = self.active[i];
                self.tree.replace_with_children(node);
            }
        }

        let root_children = self.tree.child_indices(root);
        self.num_non_trivial_top = root_children
            .iter()
            .filter(|&&module| self.tree.nodes[module].child_degree != 1)
            .count();

        self.active.len() - self.empty_modules.len()
    }

    /// Codelength of one module interior: the entropy of choosing among the
    /// children's flow or exiting, scaled by the total flow through it.
    pub(crate) fn calc_codelength_from_flow_within_or_exit(&self, parent: NodeIndex) -> f64 {
        let data = &self.tree.nodes[parent].data;
        let total = data.flow + data.exit_flow;
        if total < 1e-16 {
            return 0.0;
        }

        let mut length = 0.0;
        for child in self.tree.children(parent) {
            length -= plogp(self.tree.nodes[child].data.flow / total);
        }
        length -= plogp(data.exit_flow / total);
        length * total
    }
}
