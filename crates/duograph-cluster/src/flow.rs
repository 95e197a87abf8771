//! Leaf network extraction and flow calculation.
//!
//! A clustering run starts from a read snapshot: vertices become leaf nodes,
//! parallel edges aggregate into weighted connections, and the configured
//! dynamics mode turns weights into node and link flow — the stationary
//! visit rates the map equation codes for.

use std::collections::BTreeMap;

use hashbrown::HashMap;

use duograph_core::{ElementKind, GraphStore, Value, VertexId};

use crate::config::{ClusterConfig, DynamicsMode};
use crate::error::ClusterResult;

/// An aggregated weighted connection between two leaf positions.
#[derive(Debug, Clone)]
pub(crate) struct Connection {
    pub source: usize,
    pub target: usize,
    pub weight: f64,
}

/// The flow-annotated leaf network a run is built from.
#[derive(Debug)]
pub(crate) struct LeafNetwork {
    /// Source vertices in snapshot order; leaf i maps back to vertices[i]
    pub vertices: Vec<VertexId>,
    pub connections: Vec<Connection>,
    pub node_flow: Vec<f64>,
    pub node_teleport: Vec<f64>,
    /// Parallel to `connections`
    pub link_flow: Vec<f64>,
    /// Enter and exit flow coincide (undirected dynamics)
    pub detailed_balance: bool,
}

impl LeafNetwork {
    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    /// Extract the network from a store snapshot.
    pub fn from_store(store: &GraphStore, config: &ClusterConfig) -> ClusterResult<LeafNetwork> {
        let vertices: Vec<VertexId> = store.vertex_ids().collect();
        let mut index_of: HashMap<VertexId, usize> = HashMap::with_capacity(vertices.len());
        for (i, &v) in vertices.iter().enumerate() {
            index_of.insert(v, i);
        }

        let weight_attr = match &config.weight_attribute {
            Some(name) => {
                let attr = store.attribute_by_name(ElementKind::Edge, name);
                if attr.is_none() {
                    eprintln!(
                        "[CLUSTER] weight attribute '{}' not found, weighing every edge 1.0",
                        name
                    );
                }
                attr
            }
            None => None,
        };

        let undirected = config.dynamics == DynamicsMode::Undirected;

        // BTreeMap keeps connection order deterministic across runs.
        let mut aggregated: BTreeMap<(usize, usize), f64> = BTreeMap::new();
        for e in store.edge_ids() {
            let (s, t) = store.edge_endpoints(e)?;
            let (mut si, mut ti) = (index_of[&s], index_of[&t]);
            if undirected && si > ti {
                std::mem::swap(&mut si, &mut ti);
            }
            let weight = match weight_attr {
                Some(a) => match store.edge_value(a, e)? {
                    Some(Value::Real(w)) => *w,
                    Some(Value::Integer(i)) => *i as f64,
                    _ => 1.0,
                },
                None => 1.0,
            };
            if weight <= 0.0 {
                // A non-positive weight cannot carry flow.
                continue;
            }
            *aggregated.entry((si, ti)).or_insert(0.0) += weight;
        }

        let connections: Vec<Connection> = aggregated
            .into_iter()
            .map(|((source, target), weight)| Connection { source, target, weight })
            .collect();

        Ok(Self::from_parts(vertices, connections, config))
    }

    /// Build from pre-aggregated parts and run the flow calculation.
    pub fn from_parts(
        vertices: Vec<VertexId>,
        connections: Vec<Connection>,
        config: &ClusterConfig,
    ) -> LeafNetwork {
        let n = vertices.len();
        let mut network = LeafNetwork {
            vertices,
            connections,
            node_flow: vec![0.0; n],
            node_teleport: vec![0.0; n],
            link_flow: Vec::new(),
            detailed_balance: config.dynamics == DynamicsMode::Undirected,
        };
        if n > 0 {
            network.calculate_flow(config);
        }
        network
    }

    fn calculate_flow(&mut self, config: &ClusterConfig) {
        match config.dynamics {
            DynamicsMode::Undirected | DynamicsMode::UndirectedFlow => self.undirected_flow(),
            DynamicsMode::Directed => self.directed_flow(config.teleportation_rate),
            DynamicsMode::IncomingFlow => self.weight_as_flow(false),
            DynamicsMode::RawFlow => self.weight_as_flow(true),
        }
    }

    /// Stationary flow of an undirected walk: proportional to weighted
    /// degree. Used both for undirected dynamics and for the
    /// undirected-flow/directed-codelength hybrid.
    fn undirected_flow(&mut self) {
        let total: f64 = self.connections.iter().map(|c| c.weight).sum();
        if total <= 0.0 {
            return;
        }
        let mut incident = vec![0.0; self.node_flow.len()];
        for c in &self.connections {
            incident[c.source] += c.weight;
            if c.source != c.target {
                incident[c.target] += c.weight;
            }
        }
        for (i, w) in incident.iter().enumerate() {
            self.node_flow[i] = w / (2.0 * total);
        }
        self.link_flow = self.connections.iter().map(|c| c.weight / (2.0 * total)).collect();
    }

    /// Link weight used directly as flow. `out` selects whether node flow
    /// accumulates from outgoing or incoming links.
    fn weight_as_flow(&mut self, out: bool) {
        let total: f64 = self.connections.iter().map(|c| c.weight).sum();
        if total <= 0.0 {
            return;
        }
        self.link_flow = self.connections.iter().map(|c| c.weight / total).collect();
        for (c, &flow) in self.connections.iter().zip(self.link_flow.iter()) {
            let node = if out { c.source } else { c.target };
            self.node_flow[node] += flow;
        }
    }

    /// Directed walk with teleportation: power iteration to the stationary
    /// distribution, teleport weight proportional to out-weight. Teleport
    /// steps are not recorded into link flow.
    fn directed_flow(&mut self, teleportation_rate: f64) {
        let n = self.node_flow.len();
        let tau = teleportation_rate;

        let mut out_weight = vec![0.0; n];
        for c in &self.connections {
            out_weight[c.source] += c.weight;
        }
        let total_out: f64 = out_weight.iter().sum();
        for i in 0..n {
            self.node_teleport[i] = if total_out > 0.0 {
                out_weight[i] / total_out
            } else {
                1.0 / n as f64
            };
        }

        let mut rank: Vec<f64> = self.node_teleport.clone();
        for _ in 0..200 {
            let dangling: f64 = rank
                .iter()
                .enumerate()
                .filter(|(i, _)| out_weight[*i] == 0.0)
                .map(|(_, r)| r)
                .sum();

            let mut next: Vec<f64> = self
                .node_teleport
                .iter()
                .map(|t| (tau + (1.0 - tau) * dangling) * t)
                .collect();
            for c in &self.connections {
                next[c.target] += (1.0 - tau) * rank[c.source] * c.weight / out_weight[c.source];
            }

            let err: f64 = next.iter().zip(rank.iter()).map(|(a, b)| (a - b).abs()).sum();
            rank = next;
            if err < 1e-15 {
                break;
            }
        }

        self.link_flow = self
            .connections
            .iter()
            .map(|c| (1.0 - tau) * rank[c.source] * c.weight / out_weight[c.source])
            .collect();
        let total_link: f64 = self.link_flow.iter().sum();
        if total_link > 0.0 {
            for flow in &mut self.link_flow {
                *flow /= total_link;
            }
        }
        self.node_flow = rank;
    }
}
