//! Replication of the network over the records of one batch.
//!
//! Local nodes live in a flat arena indexed by `record * num_vars + var`;
//! the graph structure is shared through [`PlateLayout`].

use crate::dag::Dag;
use crate::datastream::*;
use crate::errors::LearningError;
use crate::parameters::*;
use crate::variables::*;
use nalgebra::DVector;
use rand::Rng;

/// Variational state of one `(record, variable)` node
#[derive(Debug, Clone, PartialEq)]
pub enum LocalNode {
    /// observed discrete state
    Observed(usize),
    /// missing discrete value with its categorical `q`
    Latent(Vec<f64>),
    /// observed real value
    Continuous(f64),
}

#[derive(Debug, Clone)]
struct NodeLayout {
    kind: VariableKind,
    discrete_parents: Vec<(usize, usize)>,
    continuous_parents: Vec<usize>,
    children: Vec<usize>,
}

/// Per-variable neighbourhoods, shared by every record of a plate
#[derive(Debug, Clone)]
pub struct PlateLayout {
    attributes: Vec<Attribute>,
    nodes: Vec<NodeLayout>,
    order: Vec<usize>,
}

impl PlateLayout {
    pub fn new(dag: &Dag) -> anyhow::Result<Self> {
        let nodes = dag
            .variables()
            .iter()
            .map(|v| NodeLayout {
                kind: v.kind(),
                discrete_parents: dag.discrete_parents(v.index()),
                continuous_parents: dag.continuous_parents(v.index()),
                children: dag.children(v.index()),
            })
            .collect();

        Ok(Self {
            attributes: attributes_of(dag.variables()),
            nodes,
            order: dag.topological_order()?,
        })
    }

    pub fn num_vars(&self) -> usize {
        self.nodes.len()
    }

    /// Check the batch header against the graph and turn every record
    /// into local nodes. Missing discrete cells start from a random
    /// categorical drawn from `rng`.
    pub fn build<R: Rng>(
        &self,
        batch: &DataOnMemory,
        rng: &mut R,
    ) -> anyhow::Result<Plate> {
        if batch.attributes() != self.attributes.as_slice() {
            return Err(LearningError::SchemaMismatch(format!(
                "batch attributes [{}] do not match model variables [{}]",
                names(batch.attributes()),
                names(&self.attributes)
            ))
            .into());
        }

        let num_vars = self.num_vars();
        let mut nodes = Vec::with_capacity(batch.len() * num_vars);
        let mut num_latent = 0;

        for (r, inst) in batch.instances().iter().enumerate() {
            if inst.len() != num_vars {
                return Err(LearningError::SchemaMismatch(format!(
                    "record {} has {} values for {} variables",
                    r,
                    inst.len(),
                    num_vars
                ))
                .into());
            }

            for (attr, value) in self.attributes.iter().zip(inst.values()) {
                let node = match (attr.kind, *value) {
                    (VariableKind::Multinomial { num_states }, Value::Discrete(s))
                        if s < num_states =>
                    {
                        LocalNode::Observed(s)
                    }
                    (VariableKind::Multinomial { num_states }, Value::Missing) => {
                        num_latent += 1;
                        LocalNode::Latent(random_categorical(num_states, rng))
                    }
                    (VariableKind::Normal, Value::Continuous(x)) if x.is_finite() => {
                        LocalNode::Continuous(x)
                    }
                    _ => {
                        return Err(LearningError::SchemaMismatch(format!(
                            "record {}: invalid value {:?} for {} ({:?})",
                            r, value, attr.name, attr.kind
                        ))
                        .into());
                    }
                };
                nodes.push(node);
            }
        }

        Ok(Plate {
            num_vars,
            nodes,
            num_latent,
        })
    }

    /// `(configuration, weight)` pairs of the discrete parents of `var`
    /// under the mean-field distribution of `record`. A `pinned`
    /// variable is treated as observed in the given state.
    fn parent_configs(
        &self,
        var: usize,
        record: &[LocalNode],
        pinned: Option<(usize, usize)>,
    ) -> Vec<(usize, f64)> {
        let mut ret = vec![(0_usize, 1.0)];
        for &(p, k) in self.nodes[var].discrete_parents.iter() {
            let mut next = Vec::with_capacity(ret.len() * k);
            match (pinned, &record[p]) {
                (Some((z, s)), _) if z == p => {
                    next.extend(ret.iter().map(|&(c, w)| (c * k + s, w)));
                }
                (_, LocalNode::Observed(s)) => {
                    next.extend(ret.iter().map(|&(c, w)| (c * k + s, w)));
                }
                (_, LocalNode::Latent(q)) => {
                    for &(c, w) in ret.iter() {
                        next.extend(q.iter().enumerate().map(|(s, &qs)| (c * k + s, w * qs)));
                    }
                }
                (_, LocalNode::Continuous(_)) => unreachable!("continuous discrete parent"),
            }
            ret = next;
        }
        ret
    }

    /// `[1, x_1, ..., x_p]` over the continuous parents
    fn features(&self, var: usize, record: &[LocalNode]) -> DVector<f64> {
        let cont = &self.nodes[var].continuous_parents;
        DVector::from_iterator(
            1 + cont.len(),
            std::iter::once(1.0).chain(cont.iter().map(|&p| match record[p] {
                LocalNode::Continuous(x) => x,
                _ => unreachable!("continuous parent without a value"),
            })),
        )
    }

    /// `E[log p(x_var | parents = config)]` under the current messages
    fn expected_log_lik(
        &self,
        var: usize,
        config: usize,
        record: &[LocalNode],
        moments: &[BlockMoments],
    ) -> f64 {
        match (&record[var], &moments[var]) {
            (LocalNode::Observed(s), BlockMoments::Multinomial(elog)) => elog[(config, *s)],
            (LocalNode::Latent(q), BlockMoments::Multinomial(elog)) => q
                .iter()
                .enumerate()
                .map(|(k, &qk)| qk * elog[(config, k)])
                .sum(),
            (LocalNode::Continuous(y), BlockMoments::Normal(ms)) => {
                ms[config].expected_log_likelihood(&self.features(var, record), *y)
            }
            _ => unreachable!("local node does not match its parameter block"),
        }
    }

    /// Coordinate updates of the latent nodes of one record, visited in
    /// topological order
    pub fn update_record(&self, record: &mut [LocalNode], moments: &[BlockMoments]) {
        for &z in self.order.iter() {
            if !matches!(record[z], LocalNode::Latent(_)) {
                continue;
            }
            let num_states = match self.nodes[z].kind {
                VariableKind::Multinomial { num_states } => num_states,
                VariableKind::Normal => continue,
            };

            let mut log_q = vec![0.0; num_states];

            if let BlockMoments::Multinomial(elog) = &moments[z] {
                for (c, w) in self.parent_configs(z, record, None) {
                    for (k, lq) in log_q.iter_mut().enumerate() {
                        *lq += w * elog[(c, k)];
                    }
                }
            }

            for &ch in self.nodes[z].children.iter() {
                for (k, lq) in log_q.iter_mut().enumerate() {
                    for (c, w) in self.parent_configs(ch, record, Some((z, k))) {
                        *lq += w * self.expected_log_lik(ch, c, record, moments);
                    }
                }
            }

            record[z] = LocalNode::Latent(normalize_log_prob(&log_q));
        }
    }

    /// Add the expected sufficient statistics of one record
    pub fn accumulate(&self, record: &[LocalNode], params: &mut GlobalParams) {
        for var in 0..self.num_vars() {
            let configs = self.parent_configs(var, record, None);
            match (&record[var], params.block_mut(var)) {
                (LocalNode::Observed(s), VariableParams::Multinomial(dir)) => {
                    for (c, w) in configs {
                        dir.add_count(c, *s, w);
                    }
                }
                (LocalNode::Latent(q), VariableParams::Multinomial(dir)) => {
                    for (c, w) in configs {
                        for (k, &qk) in q.iter().enumerate() {
                            dir.add_count(c, k, w * qk);
                        }
                    }
                }
                (LocalNode::Continuous(y), VariableParams::Normal(ngs)) => {
                    let phi = self.features(var, record);
                    for (c, w) in configs {
                        ngs[c].add_observation(&phi, *y, w);
                    }
                }
                _ => unreachable!("local node does not match its parameter block"),
            }
        }
    }

    /// `E[log p(x, z | theta)] + H[q(z)]` of one record
    pub fn record_elbo(&self, record: &[LocalNode], moments: &[BlockMoments]) -> f64 {
        let mut elbo = 0.0;
        for var in 0..self.num_vars() {
            for (c, w) in self.parent_configs(var, record, None) {
                elbo += w * self.expected_log_lik(var, c, record, moments);
            }
            if let LocalNode::Latent(q) = &record[var] {
                elbo -= q.iter().filter(|&&x| x > 0.0).map(|&x| x * x.ln()).sum::<f64>();
            }
        }
        elbo
    }
}

/// Local nodes of every record of one batch
#[derive(Debug, Clone)]
pub struct Plate {
    num_vars: usize,
    nodes: Vec<LocalNode>,
    num_latent: usize,
}

impl Plate {
    pub fn num_records(&self) -> usize {
        if self.num_vars == 0 {
            0
        } else {
            self.nodes.len() / self.num_vars
        }
    }

    pub fn num_vars(&self) -> usize {
        self.num_vars
    }

    pub fn num_latent(&self) -> usize {
        self.num_latent
    }

    pub fn node(&self, record: usize, var: usize) -> &LocalNode {
        &self.nodes[record * self.num_vars + var]
    }

    pub fn records(&self) -> std::slice::Chunks<'_, LocalNode> {
        self.nodes.chunks(self.num_vars.max(1))
    }

    pub fn records_mut(&mut self) -> std::slice::ChunksMut<'_, LocalNode> {
        self.nodes.chunks_mut(self.num_vars.max(1))
    }

    pub(crate) fn arena(&self) -> &[LocalNode] {
        &self.nodes
    }

    pub(crate) fn arena_mut(&mut self) -> &mut [LocalNode] {
        &mut self.nodes
    }
}

fn names(attrs: &[Attribute]) -> String {
    attrs
        .iter()
        .map(|a| a.name.as_ref())
        .collect::<Vec<_>>()
        .join(", ")
}

fn random_categorical<R: Rng>(num_states: usize, rng: &mut R) -> Vec<f64> {
    let mut q: Vec<f64> = (0..num_states)
        .map(|_| rng.random::<f64>() + 1e-2)
        .collect();
    let tot: f64 = q.iter().sum();
    q.iter_mut().for_each(|x| *x /= tot);
    q
}

/// log-sum-exp normalization
fn normalize_log_prob(log_q: &[f64]) -> Vec<f64> {
    let max = log_q.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let mut q: Vec<f64> = log_q.iter().map(|&x| (x - max).exp()).collect();
    let tot: f64 = q.iter().sum();
    q.iter_mut().for_each(|x| *x /= tot);
    q
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::sync::Arc;

    fn mixed() -> anyhow::Result<Dag> {
        let mut vars = Variables::new();
        let z = vars.new_multinomial("Z", 2)?;
        let a = vars.new_multinomial("A", 3)?;
        let x = vars.new_normal("X")?;
        let y = vars.new_normal("Y")?;
        let mut dag = Dag::new(vars);
        dag.add_parent(&a, &z)?;
        dag.add_parent(&y, &z)?;
        dag.add_parent(&y, &x)?;
        Ok(dag)
    }

    fn batch(dag: &Dag, records: Vec<Vec<Value>>) -> DataOnMemory {
        let attrs: Arc<[Attribute]> = attributes_of(dag.variables()).into();
        DataOnMemory::new(attrs, records.into_iter().map(DataInstance::new).collect())
    }

    fn schema_mismatch(err: &anyhow::Error) -> bool {
        matches!(
            LearningError::of(err),
            Some(LearningError::SchemaMismatch(_))
        )
    }

    #[test]
    fn test_build_marks_missing_as_latent() -> anyhow::Result<()> {
        let dag = mixed()?;
        let layout = PlateLayout::new(&dag)?;
        let data = batch(
            &dag,
            vec![
                vec![
                    Value::Missing,
                    Value::Discrete(2),
                    Value::Continuous(0.5),
                    Value::Continuous(1.0),
                ],
                vec![
                    Value::Discrete(1),
                    Value::Missing,
                    Value::Continuous(-0.5),
                    Value::Continuous(2.0),
                ],
            ],
        );
        let mut rng = StdRng::seed_from_u64(7);
        let plate = layout.build(&data, &mut rng)?;

        assert_eq!(plate.num_records(), 2);
        assert_eq!(plate.num_latent(), 2);
        assert_eq!(plate.node(0, 1), &LocalNode::Observed(2));
        match plate.node(1, 1) {
            LocalNode::Latent(q) => {
                assert_eq!(q.len(), 3);
                assert_abs_diff_eq!(q.iter().sum::<f64>(), 1.0, epsilon = 1e-12);
            }
            other => panic!("expected a latent node, got {:?}", other),
        }
        Ok(())
    }

    #[test]
    fn test_schema_mismatch() -> anyhow::Result<()> {
        let dag = mixed()?;
        let layout = PlateLayout::new(&dag)?;
        let mut rng = StdRng::seed_from_u64(0);

        // continuous cell must be observed
        let data = batch(
            &dag,
            vec![vec![
                Value::Discrete(0),
                Value::Discrete(0),
                Value::Missing,
                Value::Continuous(1.0),
            ]],
        );
        assert!(schema_mismatch(&layout.build(&data, &mut rng).unwrap_err()));

        // state out of range
        let data = batch(
            &dag,
            vec![vec![
                Value::Discrete(0),
                Value::Discrete(3),
                Value::Continuous(0.0),
                Value::Continuous(1.0),
            ]],
        );
        assert!(schema_mismatch(&layout.build(&data, &mut rng).unwrap_err()));

        // short record
        let data = batch(&dag, vec![vec![Value::Discrete(0)]]);
        assert!(schema_mismatch(&layout.build(&data, &mut rng).unwrap_err()));

        // header from another model
        let mut other = Variables::new();
        other.new_multinomial("W", 2)?;
        let attrs: Arc<[Attribute]> = attributes_of(&other).into();
        let data = DataOnMemory::new(attrs, vec![DataInstance::new(vec![Value::Discrete(0)])]);
        assert!(schema_mismatch(&layout.build(&data, &mut rng).unwrap_err()));
        Ok(())
    }

    #[test]
    fn test_latent_update_follows_evidence() -> anyhow::Result<()> {
        // Z -> A with A = Z almost surely
        let mut vars = Variables::new();
        let z = vars.new_multinomial("Z", 2)?;
        let a = vars.new_multinomial("A", 2)?;
        let mut dag = Dag::new(vars);
        dag.add_parent(&a, &z)?;

        let layout = PlateLayout::new(&dag)?;
        let mut params = GlobalParams::prior(&dag, &PriorConfig::default());
        if let VariableParams::Multinomial(dir) = params.block_mut(a.index()) {
            dir.add_count(0, 0, 100.0);
            dir.add_count(1, 1, 100.0);
        }
        let moments = params.moments()?;

        let mut record = vec![LocalNode::Latent(vec![0.5, 0.5]), LocalNode::Observed(1)];
        layout.update_record(&mut record, &moments);

        match &record[0] {
            LocalNode::Latent(q) => assert!(q[1] > 0.99),
            other => panic!("expected a latent node, got {:?}", other),
        }
        Ok(())
    }

    #[test]
    fn test_parent_configs_mix_latent_parents() -> anyhow::Result<()> {
        let dag = mixed()?;
        let layout = PlateLayout::new(&dag)?;
        let record = vec![
            LocalNode::Latent(vec![0.25, 0.75]),
            LocalNode::Observed(0),
            LocalNode::Continuous(1.0),
            LocalNode::Continuous(3.0),
        ];
        let configs = layout.parent_configs(3, &record, None);
        assert_eq!(configs, vec![(0, 0.25), (1, 0.75)]);

        let pinned = layout.parent_configs(3, &record, Some((0, 1)));
        assert_eq!(pinned, vec![(1, 1.0)]);

        let phi = layout.features(3, &record);
        assert_eq!(phi.as_slice(), &[1.0, 1.0]);
        Ok(())
    }

    #[test]
    fn test_normalize_log_prob() {
        let q = normalize_log_prob(&[-1000.0, -1000.0 + 2.0_f64.ln()]);
        assert_abs_diff_eq!(q[0], 1.0 / 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(q[1], 2.0 / 3.0, epsilon = 1e-12);
    }
}
