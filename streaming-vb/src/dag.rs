use crate::datastream::Value;
use crate::errors::LearningError;
use crate::variables::*;
use petgraph::algo::{is_cyclic_directed, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;

/// Directed acyclic dependency graph over a fixed set of variables.
///
/// Node `i` of the underlying graph is variable `i`. A multinomial
/// variable may only depend on multinomial parents; a normal variable
/// may depend on both kinds (conditional linear Gaussian).
#[derive(Debug, Clone)]
pub struct Dag {
    variables: Variables,
    graph: DiGraph<usize, ()>,
    parents: Vec<Vec<usize>>,
}

impl Dag {
    pub fn new(variables: Variables) -> Self {
        let mut graph = DiGraph::with_capacity(variables.len(), variables.len());
        for var in variables.iter() {
            graph.add_node(var.index());
        }
        let parents = vec![vec![]; variables.len()];
        Self {
            variables,
            graph,
            parents,
        }
    }

    pub fn variables(&self) -> &Variables {
        &self.variables
    }

    pub fn num_variables(&self) -> usize {
        self.variables.len()
    }

    fn check_member(&self, var: &Variable) -> anyhow::Result<()> {
        match self.variables.get(var.index()) {
            Some(v) if v == var => Ok(()),
            _ => Err(LearningError::Structural(format!(
                "variable {} does not belong to this graph",
                var.name()
            ))
            .into()),
        }
    }

    /// Declare `parent -> child`. Rejects self-loops, duplicate edges,
    /// continuous parents of discrete children and anything that would
    /// close a cycle; the graph is left untouched on error.
    pub fn add_parent(&mut self, child: &Variable, parent: &Variable) -> anyhow::Result<()> {
        self.check_member(child)?;
        self.check_member(parent)?;

        let (c, p) = (child.index(), parent.index());

        if c == p {
            return Err(LearningError::Structural(format!("self-loop on {}", child.name())).into());
        }

        if self.parents[c].contains(&p) {
            return Err(LearningError::Structural(format!(
                "{} is already a parent of {}",
                parent.name(),
                child.name()
            ))
            .into());
        }

        if child.is_discrete() && !parent.is_discrete() {
            return Err(LearningError::Structural(format!(
                "discrete variable {} cannot have continuous parent {}",
                child.name(),
                parent.name()
            ))
            .into());
        }

        let edge = self
            .graph
            .add_edge(NodeIndex::new(p), NodeIndex::new(c), ());

        if is_cyclic_directed(&self.graph) {
            self.graph.remove_edge(edge);
            return Err(LearningError::Structural(format!(
                "{} -> {} closes a cycle",
                parent.name(),
                child.name()
            ))
            .into());
        }

        self.parents[c].push(p);
        Ok(())
    }

    /// parents in declaration order
    pub fn parents(&self, var: usize) -> &[usize] {
        &self.parents[var]
    }

    /// children sorted by index
    pub fn children(&self, var: usize) -> Vec<usize> {
        let mut ret: Vec<usize> = self
            .graph
            .neighbors_directed(NodeIndex::new(var), Direction::Outgoing)
            .map(|n| n.index())
            .collect();
        ret.sort_unstable();
        ret
    }

    pub fn topological_order(&self) -> anyhow::Result<Vec<usize>> {
        let order = toposort(&self.graph, None).map_err(|cyc| {
            LearningError::Structural(format!(
                "cycle through variable {}",
                cyc.node_id().index()
            ))
        })?;
        Ok(order.into_iter().map(|n| n.index()).collect())
    }

    /// number of joint states of the discrete parents
    pub fn num_parent_configs(&self, var: usize) -> usize {
        self.parents[var]
            .iter()
            .filter_map(|&p| self.variables.get(p).and_then(|v| v.kind().num_states()))
            .product()
    }

    /// `(index, num_states)` of the discrete parents, declaration order
    pub fn discrete_parents(&self, var: usize) -> Vec<(usize, usize)> {
        self.parents[var]
            .iter()
            .filter_map(|&p| {
                self.variables
                    .get(p)
                    .and_then(|v| v.kind().num_states())
                    .map(|k| (p, k))
            })
            .collect()
    }

    /// indices of the continuous parents, declaration order
    pub fn continuous_parents(&self, var: usize) -> Vec<usize> {
        self.parents[var]
            .iter()
            .copied()
            .filter(|&p| self.variables.get(p).is_some_and(|v| !v.is_discrete()))
            .collect()
    }

    /// Row of the conditional table selected by fully observed parent
    /// values. The first declared parent is the most significant digit.
    pub fn parent_config_index(&self, var: usize, record: &[Value]) -> Option<usize> {
        let mut config = 0;
        for (p, k) in self.discrete_parents(var) {
            match record.get(p) {
                Some(Value::Discrete(s)) if *s < k => config = config * k + s,
                _ => return None,
            }
        }
        Some(config)
    }

    /// same variable names, kinds and parent sets
    pub fn same_structure(&self, other: &Dag) -> bool {
        self.num_variables() == other.num_variables()
            && self
                .variables
                .iter()
                .zip(other.variables.iter())
                .all(|(a, b)| a.name() == b.name() && a.kind() == b.kind())
            && self.parents == other.parents
    }
}
