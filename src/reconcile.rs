use std::collections::BTreeMap;
use std::sync::Arc;

use derive_new::new;
use itertools::Itertools;
use tracing::debug;

use crate::{
    config::ReconcilerConfig,
    consensus::ConsensusSet,
    credible_set::{rank_cmp, CredibleSet},
    error::Result,
    finemap::CohortFit,
    harmonize::{HarmonizedCohort, HarmonizedLocus},
    math::{arithmetic_mean, min_abs_correlation},
};

/// A fine-mapping run together with the credible sets that passed evaluation
#[derive(Debug, Clone, PartialEq, new)]
pub struct EvaluatedFit {
    pub fit: CohortFit,
    pub passing: Vec<Arc<CredibleSet>>,
}

/// Disjoint-set forest over node indices.
///
/// Roots are always the smallest index of their component.
struct UnionFind {
    parent: Vec<usize>,
}
impl UnionFind {
    fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
        }
    }

    fn find(&mut self, x: usize) -> usize {
        let mut root = x;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        let mut node = x;
        while self.parent[node] != root {
            let next = self.parent[node];
            self.parent[node] = root;
            node = next;
        }
        root
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            self.parent[ra.max(rb)] = ra.min(rb);
        }
    }
}

/// |r| between two shared variants as both cohorts agree on it
fn joint_abs_r(a: usize, b: usize, ca: &HarmonizedCohort, cb: &HarmonizedCohort) -> f64 {
    if a == b {
        return 1.0;
    }
    match (ca.shared_r(a, b), cb.shared_r(a, b)) {
        (Some(x), Some(y)) => x.abs().min(y.abs()),
        _ => 0.0,
    }
}

fn shares_member(a: &CredibleSet, b: &CredibleSet) -> bool {
    a.members().iter().any(|m| b.contains(*m))
}

/// Merges credible sets from different cohorts into consensus sets
#[derive(Debug, Clone, Copy, Default)]
pub struct CrossCohortReconciler {
    config: ReconcilerConfig,
}
impl CrossCohortReconciler {
    pub fn new(config: ReconcilerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// LD-weighted Jaccard overlap of two credible sets.
    ///
    /// Each member is matched to its most correlated member of the other set,
    /// the matched |r| summed over both directions and halved gives the weighted
    /// intersection. Without LD this reduces to the plain Jaccard index.
    pub fn overlap(
        &self,
        a: &CredibleSet,
        b: &CredibleSet,
        ca: &HarmonizedCohort,
        cb: &HarmonizedCohort,
    ) -> f64 {
        let best = |from: &CredibleSet, to: &CredibleSet| -> f64 {
            from.members()
                .iter()
                .map(|x| {
                    to.members()
                        .iter()
                        .map(|y| joint_abs_r(*x, *y, ca, cb))
                        .fold(0.0, f64::max)
                })
                .sum()
        };
        let weighted = (best(a, b) + best(b, a)) / 2.0;
        let denominator = (a.size() + b.size()) as f64 - weighted;
        if denominator <= 0.0 {
            return 0.0;
        }
        weighted / denominator
    }

    /// Groups overlapping sets into ranked consensus sets.
    ///
    /// The result depends only on the content of `fits`, never on their order.
    pub fn reconcile(&self, locus: &HarmonizedLocus, fits: &[EvaluatedFit]) -> Vec<ConsensusSet> {
        let nodes = fits
            .iter()
            .enumerate()
            .flat_map(|(fi, fit)| fit.passing.iter().map(move |set| (fi, Arc::clone(set))))
            .sorted_by(|(_, a), (_, b)| {
                a.provenance()
                    .cmp(b.provenance())
                    .then_with(|| a.members().cmp(b.members()))
            })
            .collect::<Vec<_>>();
        let cohort_of = |fi: usize| locus.cohort(&fits[fi].fit.provenance.cohort);

        // Materialize the overlap graph
        let mut edges = Vec::new();
        for (i, j) in (0..nodes.len()).tuple_combinations() {
            let (fa, a) = &nodes[i];
            let (fb, b) = &nodes[j];
            if a.provenance().cohort == b.provenance().cohort || !shares_member(a, b) {
                continue;
            }
            let (Some(ca), Some(cb)) = (cohort_of(*fa), cohort_of(*fb)) else {
                continue;
            };
            let overlap = self.overlap(a, b, ca, cb);
            if overlap > self.config.merge_threshold {
                edges.push((i, j));
            }
        }
        debug!(
            "Overlap graph at {}: {} credible sets, {} edges",
            locus.locus_id(),
            nodes.len(),
            edges.len()
        );

        let mut forest = UnionFind::new(nodes.len());
        for (i, j) in &edges {
            forest.union(*i, *j);
        }
        let mut components: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for i in 0..nodes.len() {
            components.entry(forest.find(i)).or_default().push(i);
        }

        let mut consensus = components
            .into_values()
            .map(|component| self.build(locus, fits, &nodes, &component))
            .collect::<Vec<_>>();
        consensus.sort_by(|a, b| rank_cmp(a, b, locus.variants()));
        consensus
    }

    fn build(
        &self,
        locus: &HarmonizedLocus,
        fits: &[EvaluatedFit],
        nodes: &[(usize, Arc<CredibleSet>)],
        component: &[usize],
    ) -> ConsensusSet {
        let contributing = component
            .iter()
            .map(|i| nodes[*i].0)
            .unique()
            .map(|fi| &fits[fi].fit)
            .sorted_by(|a, b| a.provenance.cmp(&b.provenance))
            .collect::<Vec<_>>();
        // One entry per cohort; its methods are averaged before cohorts are combined
        let mut by_cohort: BTreeMap<&str, Vec<&CohortFit>> = BTreeMap::new();
        for fit in contributing.iter().copied() {
            by_cohort
                .entry(fit.provenance.cohort.as_str())
                .or_default()
                .push(fit);
        }
        let sample_sizes = by_cohort
            .values()
            .map(|cohort_fits| cohort_fits[0].sample_size)
            .collect::<Vec<_>>();
        let combination = self.config.pip_combination;
        let merged_pip = |shared: usize| {
            let pips = by_cohort
                .values()
                .map(|cohort_fits| {
                    let per_method = cohort_fits
                        .iter()
                        .map(|fit| fit.pip(shared).unwrap_or(0.0))
                        .collect::<Vec<_>>();
                    arithmetic_mean(&per_method)
                })
                .collect::<Vec<_>>();
            combination.combine(&pips, &sample_sizes)
        };

        let purity = |members: &[usize]| match locus.shared_ld() {
            Some(ld) => min_abs_correlation(members, |i, j| ld[[i, j]]),
            None => {
                let reference = contributing
                    .iter()
                    .filter_map(|fit| locus.cohort(&fit.provenance.cohort))
                    .max_by(|a, b| {
                        a.sample_size()
                            .cmp(&b.sample_size())
                            .then_with(|| b.cohort().cmp(a.cohort()))
                    });
                match reference {
                    Some(cohort) => min_abs_correlation(members, |i, j| {
                        cohort.shared_r(i, j).unwrap_or(0.0)
                    }),
                    None => min_abs_correlation(members, |_, _| 0.0),
                }
            }
        };

        let sets = component.iter().map(|i| nodes[*i].1.clone()).collect();
        ConsensusSet::new(sets, merged_pip, purity)
    }
}
