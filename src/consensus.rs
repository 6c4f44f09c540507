use std::sync::Arc;

use itertools::Itertools;

use crate::credible_set::{CredibleSet, Provenance, Ranked};

/// Credible sets from several sources judged to capture the same signal.
///
/// The contributing sets are shared with the per-cohort results, not copied.
#[derive(Debug, Clone, PartialEq)]
pub struct ConsensusSet {
    members: Vec<usize>,
    pips: Vec<f64>,
    coverage: f64,
    purity: f64,
    sources: Vec<Provenance>,
    credible_sets: Vec<Arc<CredibleSet>>,
}
impl ConsensusSet {
    /// Builds a consensus from its contributing sets.
    ///
    /// `merged_pip` receives each member of the union in ascending order and
    /// `purity` the sorted union.
    pub(crate) fn new<P, Q>(credible_sets: Vec<Arc<CredibleSet>>, merged_pip: P, purity: Q) -> Self
    where
        P: Fn(usize) -> f64,
        Q: FnOnce(&[usize]) -> f64,
    {
        let credible_sets = credible_sets
            .into_iter()
            .sorted_by(|a, b| {
                a.provenance()
                    .cmp(b.provenance())
                    .then_with(|| a.members().cmp(b.members()))
            })
            .collect::<Vec<_>>();
        let members = credible_sets
            .iter()
            .flat_map(|set| set.members().iter().copied())
            .sorted()
            .dedup()
            .collect::<Vec<_>>();
        let sources = credible_sets
            .iter()
            .map(|set| set.provenance().clone())
            .dedup()
            .collect::<Vec<_>>();
        let pips = members
            .iter()
            .map(|idx| merged_pip(*idx).clamp(0.0, 1.0))
            .collect::<Vec<_>>();
        let coverage = pips.iter().sum();
        let purity = purity(&members);
        Self {
            members,
            pips,
            coverage,
            purity,
            sources,
            credible_sets,
        }
    }

    pub fn members(&self) -> &[usize] {
        &self.members
    }

    /// Merged posterior inclusion probability of each member
    pub fn pips(&self) -> &[f64] {
        &self.pips
    }

    pub fn pip_of(&self, shared: usize) -> Option<f64> {
        self.members
            .binary_search(&shared)
            .ok()
            .map(|i| self.pips[i])
    }

    pub fn coverage(&self) -> f64 {
        self.coverage
    }

    pub fn purity(&self) -> f64 {
        self.purity
    }

    /// Sorted, unique contributing sources
    pub fn sources(&self) -> &[Provenance] {
        &self.sources
    }

    pub fn credible_sets(&self) -> &[Arc<CredibleSet>] {
        &self.credible_sets
    }

    pub fn size(&self) -> usize {
        self.members.len()
    }
}

impl Ranked for ConsensusSet {
    fn coverage(&self) -> f64 {
        self.coverage
    }

    fn members(&self) -> &[usize] {
        &self.members
    }

    fn provenance_key(&self) -> Vec<&Provenance> {
        self.sources.iter().collect()
    }
}
